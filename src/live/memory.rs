//! In-process query executor over fixed snapshot tables

use super::query::{QueryExecutor, Snapshot, TableQuery};
use crate::error::{CaveError, CaveResult};
use crate::table::{Row, Table};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Serves table contents per `(table, version)` and records every query.
///
/// Include and exclude filters are evaluated; spatial and regex filters are
/// ignored.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    tables: BTreeMap<(String, u32), Table>,
    failing: bool,
    queries: Mutex<Vec<(TableQuery, Snapshot)>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of `table` at materialization `version`
    pub fn with_table(mut self, table: impl Into<String>, version: u32, rows: Vec<Row>) -> Self {
        self.tables.insert((table.into(), version), Table::from_records(rows));
        self
    }

    /// Fail every query with a server error
    pub fn with_failure(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Every query received so far, in order
    pub fn queries(&self) -> Vec<(TableQuery, Snapshot)> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn execute(&self, query: &TableQuery, snapshot: &Snapshot) -> CaveResult<Table> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((query.clone(), *snapshot));
        }
        if self.failing {
            return Err(CaveError::ServerError {
                status: 500,
                url: format!("memory://{}/{}", query.table, snapshot.version),
                message: "injected failure".into(),
            });
        }
        let source = self
            .tables
            .get(&(query.table.clone(), snapshot.version))
            .ok_or_else(|| CaveError::NotFound {
                url: format!("memory://{}/{}", query.table, snapshot.version),
            })?;

        let columns: Vec<String> = match &query.select_columns {
            Some(selected) => selected.clone(),
            None => source.columns().to_vec(),
        };
        let mut out = Table::new(columns.clone());
        if query.filters.matches_nothing() {
            return Ok(out);
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        let matching = source
            .rows()
            .iter()
            .filter(|row| query.filters.matches_row(row))
            .skip(offset)
            .take(limit);
        for row in matching {
            let projected: Row = row
                .iter()
                .filter(|(column, _)| columns.contains(*column))
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();
            out.push_row(projected);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::QueryFilters;
    use crate::table::CellValue;
    use chrono::TimeZone;
    use chrono::Utc;

    fn row(id: u64, root: u64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), CellValue::UInt(id));
        row.insert("pt_root_id".into(), CellValue::UInt(root));
        row
    }

    fn snapshot() -> Snapshot {
        Snapshot::new(3, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    fn executor() -> MemoryExecutor {
        MemoryExecutor::new().with_table("cells", 3, vec![row(1, 10), row(2, 11), row(3, 10)])
    }

    #[tokio::test]
    async fn filters_select_and_page() {
        let query = TableQuery::new("cells")
            .with_filters(QueryFilters::new().equal("pt_root_id", 10u64))
            .select(["id"])
            .limit(1)
            .offset(1);
        let table = executor().execute(&query, &snapshot()).await.unwrap();
        assert_eq!(table.columns(), &["id".to_string()]);
        assert_eq!(table.rows(), &[Row::from([("id".to_string(), CellValue::UInt(3))])]);
    }

    #[tokio::test]
    async fn empty_one_of_matches_nothing() {
        let query = TableQuery::new("cells").with_filters(QueryFilters {
            include: [("pt_root_id".to_string(), crate::filter::FilterValue::OneOf(vec![]))].into(),
            ..Default::default()
        });
        let table = executor().execute(&query, &snapshot()).await.unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn unknown_version_is_not_found() {
        let executor = executor();
        let query = TableQuery::new("cells");
        let err = executor
            .execute(&query, &Snapshot::new(9, snapshot().timestamp))
            .await
            .unwrap_err();
        assert!(matches!(err, CaveError::NotFound { .. }));
        assert_eq!(executor.queries().len(), 1);
    }
}
