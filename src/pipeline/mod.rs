// src/pipeline/mod.rs

pub mod state;

use chrono::{DateTime, Utc};
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::Config;
use crate::destination::{DeltaDestination, DestinationError};
use crate::history::{LoadRow, TableHistory};
use crate::source::{
    incremental::max_cursor_value, mssql_tables, CursorValue, Source, SourceError,
    SqlServerSource, TableResource,
};
use state::{StateError, StateStore};

pub const PIPELINE_NAME: &str = "mssql_tables";
pub const DATASET_NAME: &str = "mssql_tables_dataset";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extracting `{table}`")]
    Extract {
        table: String,
        #[source]
        source: SourceError,
    },
    #[error("loading `{table}`")]
    Load {
        table: String,
        #[source]
        source: DestinationError,
    },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("recording load history")]
    History(#[source] anyhow::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Outcome for one table in a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoad {
    pub table: String,
    pub rows_extracted: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub cursor_start: Option<CursorValue>,
    pub cursor_end: Option<CursorValue>,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone)]
pub struct LoadInfo {
    pub pipeline_name: String,
    pub dataset_name: String,
    pub destination: PathBuf,
    pub load_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableLoad>,
}

impl LoadInfo {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_extracted).sum()
    }
}

impl fmt::Display for LoadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Pipeline {} load {} to filesystem at {} ({} rows in {} tables)",
            self.pipeline_name,
            self.load_id,
            self.destination.display(),
            self.total_rows(),
            self.tables.len()
        )?;
        for t in &self.tables {
            write!(
                f,
                "  {}: {} extracted, {} inserted, {} updated",
                t.table, t.rows_extracted, t.rows_inserted, t.rows_updated
            )?;
            match (&t.cursor_start, &t.cursor_end) {
                (Some(start), Some(end)) => writeln!(f, " (cursor {} -> {})", start, end)?,
                (None, Some(end)) => writeln!(f, " (cursor -> {})", end)?,
                _ => writeln!(f)?,
            }
        }
        Ok(())
    }
}

/// An extract-and-load pipeline over a filesystem Delta destination.
///
/// Working state lives in `<pipelines_dir>/<name>/`: the cursor state file
/// and the hive-partitioned load history.
pub struct Pipeline {
    name: String,
    dataset_name: String,
    destination: DeltaDestination,
    state: StateStore,
    history: TableHistory<LoadRow>,
}

impl Pipeline {
    pub fn new(
        name: &str,
        dataset_name: &str,
        bucket_url: impl AsRef<Path>,
        pipelines_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let working_dir = pipelines_dir.as_ref().join(name);
        let state = StateStore::open(&working_dir)?;
        let history =
            TableHistory::new_loads(&working_dir).map_err(PipelineError::History)?;

        Ok(Self {
            name: name.to_string(),
            dataset_name: dataset_name.to_string(),
            destination: DeltaDestination::new(bucket_url, dataset_name),
            state,
            history,
        })
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn history(&self) -> &TableHistory<LoadRow> {
        &self.history
    }

    /// Extract and load every resource in order. The first failure aborts the
    /// run; tables already loaded keep their data and cursors.
    #[instrument(level = "info", skip_all, fields(pipeline = %self.name))]
    pub async fn run<S>(&mut self, source: &mut S, resources: &[TableResource]) -> Result<LoadInfo>
    where
        S: Source + ?Sized,
    {
        let started_at = Utc::now();
        let load_id = new_load_id(started_at);
        info!(%load_id, tables = resources.len(), "starting load");

        let mut tables = Vec::with_capacity(resources.len());
        for resource in resources {
            tables.push(self.load_table(source, resource, &load_id).await?);
        }

        self.history.vacuum().map_err(PipelineError::History)?;

        Ok(LoadInfo {
            pipeline_name: self.name.clone(),
            dataset_name: self.dataset_name.clone(),
            destination: self.destination.dataset_dir().to_path_buf(),
            load_id,
            started_at,
            finished_at: Utc::now(),
            tables,
        })
    }

    #[instrument(level = "info", skip_all, fields(table = %resource.name))]
    async fn load_table<S>(
        &mut self,
        source: &mut S,
        resource: &TableResource,
        load_id: &str,
    ) -> Result<TableLoad>
    where
        S: Source + ?Sized,
    {
        let start = Instant::now();
        let load_start = Utc::now();
        let cursor_start = self.state.cursor(&resource.name).cloned();

        let extract = source
            .extract(resource, cursor_start.as_ref())
            .await
            .map_err(|source| PipelineError::Extract {
                table: resource.name.clone(),
                source,
            })?;
        let rows_extracted = extract.num_rows() as u64;
        let cursor_end = max_cursor_value(&extract.batches, &resource.incremental.cursor_column)?;

        let counts = self
            .destination
            .write(
                &resource.folder_name(),
                resource.write_disposition,
                &resource.primary_key,
                extract.batches,
            )
            .await
            .map_err(|source| PipelineError::Load {
                table: resource.name.clone(),
                source,
            })?;

        if let Some(end) = &cursor_end {
            self.state.set_cursor(&resource.name, end.clone())?;
        }

        self.history
            .add(&LoadRow {
                load_id: load_id.to_string(),
                table_name: resource.folder_name(),
                rows_extracted,
                rows_inserted: counts.inserted,
                rows_updated: counts.updated,
                load_start,
                load_end: Utc::now(),
            })
            .map_err(PipelineError::History)?;

        info!(
            rows = rows_extracted,
            inserted = counts.inserted,
            updated = counts.updated,
            elapsed = ?start.elapsed(),
            "table loaded"
        );

        Ok(TableLoad {
            table: resource.folder_name(),
            rows_extracted,
            rows_inserted: counts.inserted,
            rows_updated: counts.updated,
            cursor_start,
            cursor_end: cursor_end.or_else(|| self.state.cursor(&resource.name).cloned()),
        })
    }
}

/// Seconds since the epoch with microsecond precision, e.g. `1718000000.123456`.
fn new_load_id(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

/// Extract the fixed table set from SQL Server into the filesystem dataset.
pub async fn run_mssql_pipeline(config: &Config) -> Result<LoadInfo> {
    let mut source = SqlServerSource::connect(
        &config.source.conn_str,
        &config.source.schema,
        config.source.batch_size,
    )
    .await?;

    let mut pipeline = Pipeline::new(
        PIPELINE_NAME,
        DATASET_NAME,
        &config.destination.bucket_url,
        &config.destination.pipelines_dir,
    )?;
    pipeline.run(&mut source, &mssql_tables()).await
}
