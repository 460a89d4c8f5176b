//! caveclient CLI: materialization versions, root-ID lineage and live queries.
//!
//! Usage:
//!   caveclient versions [--expired]
//!   caveclient is-latest <ROOT>... [--timestamp T]
//!   caveclient past-ids <ROOT>... --past T [--future T]
//!   caveclient live-query <TABLE> [--timestamp T] [--filter-in col=1,2] ...
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use caveclient::lineage::LineageOracle;
use caveclient::timestamp::parse_service_timestamp;
use caveclient::{
    CaveClient, CaveResult, CellValue, ClientConfig, QueryFilters, RootId, SupervoxelId,
    TableQuery,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "caveclient",
    version,
    about = "Query CAVE materialization and chunkedgraph services"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to a YAML config file (default: ~/.config/caveclient/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Datastack to use; overrides the config file and CAVE_DATASTACK
    #[arg(long, short, global = true)]
    datastack: Option<String>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List materialization versions with their timestamps
    Versions {
        /// Include expired versions
        #[arg(long)]
        expired: bool,
    },
    /// Check whether root IDs are current
    IsLatest {
        #[arg(required = true)]
        roots: Vec<u64>,
        /// Reference time (default: now)
        #[arg(long, value_parser = parse_timestamp)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Root owning a supervoxel
    RootId {
        supervoxel: u64,
        #[arg(long, value_parser = parse_timestamp)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Map root IDs valid at --future onto their ancestors at --past
    PastIds {
        #[arg(required = true)]
        roots: Vec<u64>,
        #[arg(long, value_parser = parse_timestamp)]
        past: DateTime<Utc>,
        /// Default: now
        #[arg(long, value_parser = parse_timestamp)]
        future: Option<DateTime<Utc>>,
    },
    /// Query a table as of any time, remapping root IDs across edits
    LiveQuery {
        table: String,
        /// Query time (default: now)
        #[arg(long, value_parser = parse_timestamp)]
        timestamp: Option<DateTime<Utc>>,
        /// col=value; repeatable
        #[arg(long = "filter-equal", value_parser = parse_assignment)]
        filter_equal: Vec<(String, String)>,
        /// col=v1,v2,...; repeatable
        #[arg(long = "filter-in", value_parser = parse_assignment)]
        filter_in: Vec<(String, String)>,
        /// col=v1,v2,...; repeatable
        #[arg(long, value_parser = parse_assignment)]
        exclude: Vec<(String, String)>,
        /// Columns to return, comma separated
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,
        #[arg(long)]
        offset: Option<u64>,
        #[arg(long)]
        limit: Option<u64>,
        /// Keep rows whose remapped roots no longer match the filters
        #[arg(long)]
        no_post_filter: bool,
        /// Return position columns as separate x/y/z columns
        #[arg(long)]
        split_positions: bool,
    },
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    parse_service_timestamp(s).ok_or_else(|| format!("invalid timestamp '{}'", s))
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((column, values)) if !column.is_empty() => {
            Ok((column.to_string(), values.to_string()))
        }
        _ => Err(format!("expected column=value, got '{}'", s)),
    }
}

fn parse_values(values: &str) -> Vec<CellValue> {
    values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(CellValue::parse_token)
        .collect()
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<PathBuf>, datastack: Option<String>) -> Result<ClientConfig, String> {
    let config = ClientConfig::load(path.as_deref()).map_err(|e| e.to_string())?;
    Ok(match datastack {
        Some(ds) => config.with_datastack(ds),
        None => config,
    })
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn report<T: Serialize>(result: CaveResult<T>) -> i32 {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_versions(client: &CaveClient, expired: bool) -> i32 {
    report(client.materialize.versions_metadata(expired).await)
}

async fn cmd_is_latest(
    client: &CaveClient,
    roots: &[u64],
    timestamp: Option<DateTime<Utc>>,
) -> i32 {
    let ids: Vec<RootId> = roots.iter().copied().map(RootId::new).collect();
    let at = timestamp.unwrap_or_else(Utc::now);
    let result = client.chunkedgraph.is_latest(&ids, at).await.map(|flags| {
        ids.iter()
            .zip(flags)
            .map(|(id, latest)| (id.get().to_string(), serde_json::Value::Bool(latest)))
            .collect::<serde_json::Map<_, _>>()
    });
    report(result)
}

async fn cmd_root_id(
    client: &CaveClient,
    supervoxel: u64,
    timestamp: Option<DateTime<Utc>>,
) -> i32 {
    report(
        client
            .chunkedgraph
            .root_id(SupervoxelId::new(supervoxel), timestamp)
            .await,
    )
}

async fn cmd_past_ids(
    client: &CaveClient,
    roots: &[u64],
    past: DateTime<Utc>,
    future: Option<DateTime<Utc>>,
) -> i32 {
    let ids: Vec<RootId> = roots.iter().copied().map(RootId::new).collect();
    let future = future.unwrap_or_else(Utc::now);
    if past > future {
        eprintln!("Error: --past {} is after --future {}", past, future);
        return 1;
    }
    report(client.chunkedgraph.past_ids(&ids, past, future).await)
}

struct LiveQueryArgs {
    table: String,
    timestamp: Option<DateTime<Utc>>,
    filter_equal: Vec<(String, String)>,
    filter_in: Vec<(String, String)>,
    exclude: Vec<(String, String)>,
    select: Vec<String>,
    offset: Option<u64>,
    limit: Option<u64>,
    post_filter: bool,
    split_positions: bool,
}

impl LiveQueryArgs {
    fn query(&self) -> TableQuery {
        let mut filters = QueryFilters::new();
        for (column, value) in &self.filter_equal {
            filters = filters.equal(column.as_str(), CellValue::parse_token(value.trim()));
        }
        for (column, values) in &self.filter_in {
            filters = filters.one_of(column.as_str(), parse_values(values));
        }
        for (column, values) in &self.exclude {
            filters = filters.exclude(column.as_str(), parse_values(values));
        }

        let mut query = TableQuery::new(self.table.as_str())
            .with_filters(filters)
            .split_positions(self.split_positions);
        if !self.select.is_empty() {
            query = query.select(self.select.iter().map(String::as_str));
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

async fn cmd_live_query(client: &CaveClient, args: LiveQueryArgs) -> i32 {
    let query = args.query();
    let timestamp = args.timestamp.unwrap_or_else(Utc::now);
    let result = client
        .materialize
        .live_query(&query, timestamp, args.post_filter)
        .await
        .map(|resolution| resolution.table);
    report(result)
}

async fn run(cli: Cli) -> i32 {
    let config = match load_config(cli.config, cli.datastack) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let client = match CaveClient::connect(&config).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    match cli.command {
        Commands::Versions { expired } => cmd_versions(&client, expired).await,
        Commands::IsLatest { roots, timestamp } => cmd_is_latest(&client, &roots, timestamp).await,
        Commands::RootId {
            supervoxel,
            timestamp,
        } => cmd_root_id(&client, supervoxel, timestamp).await,
        Commands::PastIds {
            roots,
            past,
            future,
        } => cmd_past_ids(&client, &roots, past, future).await,
        Commands::LiveQuery {
            table,
            timestamp,
            filter_equal,
            filter_in,
            exclude,
            select,
            offset,
            limit,
            no_post_filter,
            split_positions,
        } => {
            let args = LiveQueryArgs {
                table,
                timestamp,
                filter_equal,
                filter_in,
                exclude,
                select,
                offset,
                limit,
                post_filter: !no_post_filter,
                split_positions,
            };
            cmd_live_query(&client, args).await
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };
    let code = runtime.block_on(run(cli));
    std::process::exit(code);
}
