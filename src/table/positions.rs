//! Spatial point columns
//!
//! The materialization service returns each point split into `<base>_x`,
//! `<base>_y`, `<base>_z` columns. These helpers rescale them between voxel
//! resolutions and fold them back into one `[x, y, z]` column.

use super::{CellValue, Table};

const AXES: [&str; 3] = ["_x", "_y", "_z"];

/// Base names of every complete `_x/_y/_z` column triple, in column order
fn position_bases(table: &Table) -> Vec<String> {
    let mut bases = Vec::new();
    for column in table.columns() {
        let Some(base) = column.strip_suffix("_x") else {
            continue;
        };
        let complete = AXES
            .iter()
            .all(|axis| table.has_column(&format!("{base}{axis}")));
        if complete && !bases.iter().any(|b| b == base) {
            bases.push(base.to_string());
        }
    }
    bases
}

/// Rescale split position columns from `given` to `desired` resolution.
///
/// Values are multiplied by `given / desired` per axis. Non-numeric cells are
/// left untouched. Returns `false` if no scaling was needed.
pub fn scale_positions(table: &mut Table, given: [f64; 3], desired: [f64; 3]) -> bool {
    let factors = [
        given[0] / desired[0],
        given[1] / desired[1],
        given[2] / desired[2],
    ];
    if factors.iter().all(|f| *f == 1.0) {
        return false;
    }
    let bases = position_bases(table);
    for row in table.rows_mut() {
        for base in &bases {
            for (axis, factor) in AXES.iter().zip(factors) {
                let key = format!("{base}{axis}");
                if let Some(cell) = row.get_mut(&key) {
                    if let Some(v) = cell.as_f64() {
                        *cell = CellValue::Float(v * factor);
                    }
                }
            }
        }
    }
    true
}

/// Replace every `_x/_y/_z` triple with a single `[x, y, z]` array column
pub fn concatenate_positions(table: &mut Table) {
    let bases = position_bases(table);
    if bases.is_empty() {
        return;
    }
    for row in table.rows_mut() {
        for base in &bases {
            let coords: Vec<CellValue> = AXES
                .iter()
                .map(|axis| row.remove(&format!("{base}{axis}")).unwrap_or(CellValue::Null))
                .collect();
            row.insert(base.clone(), CellValue::Array(coords));
        }
    }

    let mut columns = Vec::with_capacity(table.columns().len());
    for column in table.columns() {
        let base = AXES.iter().find_map(|axis| {
            column
                .strip_suffix(*axis)
                .filter(|b| bases.iter().any(|base| base == b))
        });
        match base {
            Some(base) if column.ends_with("_x") => columns.push(base.to_string()),
            Some(_) => {}
            None => columns.push(column.clone()),
        }
    }
    table.set_columns(columns);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Row;

    fn point_table() -> Table {
        let mut row = Row::new();
        row.insert("id".into(), CellValue::UInt(1));
        row.insert("pt_position_x".into(), CellValue::UInt(10));
        row.insert("pt_position_y".into(), CellValue::UInt(20));
        row.insert("pt_position_z".into(), CellValue::UInt(3));
        row.insert("size_x".into(), CellValue::UInt(7));
        let mut table = Table::new(["id", "pt_position_x", "pt_position_y", "pt_position_z", "size_x"]);
        table.push_row(row);
        table
    }

    #[test]
    fn concatenate_merges_complete_triples_only() {
        let mut table = point_table();
        concatenate_positions(&mut table);
        assert_eq!(table.columns(), &["id", "pt_position", "size_x"]);
        assert_eq!(
            table.rows()[0].get("pt_position"),
            Some(&CellValue::Array(vec![
                CellValue::UInt(10),
                CellValue::UInt(20),
                CellValue::UInt(3)
            ]))
        );
        assert_eq!(table.rows()[0].get("size_x"), Some(&CellValue::UInt(7)));
    }

    #[test]
    fn scale_converts_voxels_to_nanometers() {
        let mut table = point_table();
        assert!(scale_positions(&mut table, [4.0, 4.0, 40.0], [1.0, 1.0, 1.0]));
        let row = &table.rows()[0];
        assert_eq!(row.get("pt_position_x"), Some(&CellValue::Float(40.0)));
        assert_eq!(row.get("pt_position_z"), Some(&CellValue::Float(120.0)));
        assert_eq!(row.get("size_x"), Some(&CellValue::UInt(7)));
    }

    #[test]
    fn scale_is_noop_for_equal_resolution() {
        let mut table = point_table();
        assert!(!scale_positions(&mut table, [4.0, 4.0, 40.0], [4.0, 4.0, 40.0]));
        assert_eq!(table.rows()[0].get("pt_position_x"), Some(&CellValue::UInt(10)));
    }
}
