use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value as JsonValue;
use tabula_core::{DelimitedLoader, EngineConfig, Loader, QueryEngine, TieBreak};
use tabula_query::output::output_to_json;
use tabula_query::QueryText;
use tracing::info;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the tabula REST API server
    Run {
        #[arg(
            short,
            long,
            env = "TABULA_LISTEN_ADDRESS",
            default_value = "127.0.0.1:4302"
        )]
        /// The server bind address. {n}
        /// {n}
        /// * For local development this should be `127.0.0.1`. {n}
        /// * For external use this should be `0.0.0.0`.
        listen_address: SocketAddr,
        #[arg(long, env = "TABULA_DATA_PATH", default_value = "./data")]
        /// The directory to load tables from.
        ///
        /// Every `*.csv` file becomes a table named after the file.
        data_path: PathBuf,
        #[arg(long, env = "TABULA_KEY_COLUMNS", value_delimiter = ',')]
        /// The columns to index on each table as it is loaded.
        key_columns: Vec<String>,
        #[arg(long, env = "TABULA_STAGE_TIMEOUT_MS")]
        /// Fail queries with any stage running for longer than this many milliseconds.
        stage_timeout_ms: Option<u64>,
    },
    /// Run a single query against a file and print the result as JSON
    Query {
        /// The delimited text file to load.
        path: PathBuf,
        #[arg(long)]
        /// Only rows matching the filter are selected, for example `signal > 2.5`.
        filter: Option<String>,
        #[arg(long)]
        /// The comma separated output expressions or `name := expression` assignments.
        select: Option<String>,
        #[arg(long)]
        /// The comma separated columns to group rows by.
        group_by: Option<String>,
        #[arg(long, value_delimiter = ',')]
        /// The columns to index before running the query.
        index: Vec<String>,
        #[arg(long)]
        /// The maximum number of rows to print.
        limit: Option<usize>,
        #[arg(long, default_value = "row-order")]
        /// How rows sharing an index key are ordered, `row-order` or `reverse-row-order`.
        ties: TieBreak,
        #[arg(long, default_value_t = ',')]
        /// The character separating fields.
        delimiter: char,
    },
}

impl Commands {
    /// Triggers any additional startup messages which are aware
    /// of the provided subcommand.
    pub fn display_startup_message(&self) {
        match self {
            Commands::Run {
                listen_address,
                data_path,
                ..
            } => {
                info!(listen_address = %listen_address, data_path = %data_path.display(), "Starting the tabula server");
            },
            Commands::Query { path, .. } => {
                info!(path = %path.display(), "Running query");
            },
        }
    }

    /// Executes the command
    pub async fn execute(self) -> Result<()> {
        match self {
            Commands::Run {
                listen_address,
                data_path,
                key_columns,
                stage_timeout_ms,
            } => {
                let config = EngineConfig::builder()
                    .key_columns(key_columns)
                    .maybe_timeout_per_stage(stage_timeout_ms.map(Duration::from_millis))
                    .build();
                tabula_server::run(listen_address, data_path, config).await?
            },
            Commands::Query {
                path,
                filter,
                select,
                group_by,
                index,
                limit,
                ties,
                delimiter,
            } => {
                let text = QueryText {
                    filter,
                    select,
                    group_by,
                };
                let config = EngineConfig::builder().key_columns(index).ties(ties).build();
                let loader = DelimitedLoader::builder().delimiter(delimiter).build();

                let output = tokio::task::spawn_blocking(move || {
                    run_query(&path, &loader, config, &text, limit)
                })
                .await??;
                let rendered = serde_json::to_string_pretty(&output)
                    .context("Render query output")?;
                println!("{rendered}");
            },
        }

        Ok(())
    }
}

fn run_query(
    path: &Path,
    loader: &DelimitedLoader,
    config: EngineConfig,
    text: &QueryText,
    limit: Option<usize>,
) -> Result<JsonValue> {
    let query = text.parse().context("Parse query")?;
    let table = loader
        .load_path(path)
        .with_context(|| format!("Load table from {}", path.display()))?;

    let engine = QueryEngine::new(config);
    let table = engine.register(table).context("Build index")?;
    let output = engine.execute(&table, &query).context("Execute query")?;
    Ok(output_to_json(&output, limit))
}
