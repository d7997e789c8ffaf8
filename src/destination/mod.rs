// src/destination/mod.rs

use arrow::record_batch::RecordBatch;
use deltalake::{
    datafusion::{common::Column, error::DataFusionError, prelude::*},
    protocol::SaveMode,
    DeltaOps, DeltaTableError,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::source::WriteDisposition;

const SOURCE_ALIAS: &str = "source";
const TARGET_ALIAS: &str = "target";

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error(transparent)]
    Delta(#[from] DeltaTableError),
    #[error(transparent)]
    DataFusion(#[from] DataFusionError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("primary key `{key}` not present in batches for `{table}`")]
    MissingKey { table: String, key: String },
    #[error("path `{0}` is not valid UTF-8")]
    InvalidPath(PathBuf),
}

pub type Result<T, E = DestinationError> = std::result::Result<T, E>;

/// Rows written by one table load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Filesystem destination writing one Delta table per source table under
/// `<bucket_url>/<dataset_name>/<table>`.
#[derive(Debug, Clone)]
pub struct DeltaDestination {
    dataset_dir: PathBuf,
}

impl DeltaDestination {
    pub fn new(bucket_url: impl AsRef<Path>, dataset_name: &str) -> Self {
        Self {
            dataset_dir: bucket_url.as_ref().join(dataset_name),
        }
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.dataset_dir.join(table)
    }

    /// A Delta table exists once its transaction log does.
    pub fn table_exists(&self, table: &str) -> bool {
        self.table_dir(table).join("_delta_log").is_dir()
    }

    /// Write `batches` into `table` with the given disposition.
    #[instrument(level = "info", skip(self, batches), fields(rows))]
    pub async fn write(
        &self,
        table: &str,
        disposition: WriteDisposition,
        primary_key: &str,
        batches: Vec<RecordBatch>,
    ) -> Result<WriteCounts> {
        let rows: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();
        tracing::Span::current().record("rows", rows);

        if batches.is_empty() || rows == 0 {
            debug!("nothing to write");
            return Ok(WriteCounts::default());
        }

        let uri = self.table_uri(table)?;
        let exists = self.table_exists(table);

        let counts = match disposition {
            WriteDisposition::Merge if exists => {
                self.merge(table, &uri, primary_key, batches).await?
            }
            WriteDisposition::Merge => {
                ensure_key(table, primary_key, &batches)?;
                DeltaOps::try_from_uri(&uri)
                    .await?
                    .write(batches)
                    .with_save_mode(SaveMode::Append)
                    .await?;
                WriteCounts {
                    inserted: rows,
                    updated: 0,
                }
            }
        };

        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            %disposition,
            "written"
        );
        Ok(counts)
    }

    async fn merge(
        &self,
        table: &str,
        uri: &str,
        primary_key: &str,
        batches: Vec<RecordBatch>,
    ) -> Result<WriteCounts> {
        ensure_key(table, primary_key, &batches)?;
        let columns: Vec<String> = batches[0]
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();

        let delta_table = deltalake::open_table(uri).await?;
        let ctx = SessionContext::new();
        let source = ctx.read_batches(batches)?;

        let predicate = target_col(primary_key).eq(source_col(primary_key));
        let (_, metrics) = DeltaOps(delta_table)
            .merge(source, predicate)
            .with_source_alias(SOURCE_ALIAS)
            .with_target_alias(TARGET_ALIAS)
            .when_matched_update(|update| {
                columns
                    .iter()
                    .fold(update, |u, c| u.update(target_field(c), source_col(c)))
            })?
            .when_not_matched_insert(|insert| {
                columns
                    .iter()
                    .fold(insert, |i, c| i.set(target_field(c), source_col(c)))
            })?
            .await?;

        debug!(?metrics, "merge metrics");
        Ok(WriteCounts {
            inserted: metrics.num_target_rows_inserted as u64,
            updated: metrics.num_target_rows_updated as u64,
        })
    }

    fn table_uri(&self, table: &str) -> Result<String> {
        let dir = self.table_dir(table);
        fs::create_dir_all(&dir)?;
        let dir = fs::canonicalize(&dir)?;
        dir.to_str()
            .map(str::to_string)
            .ok_or(DestinationError::InvalidPath(dir))
    }
}

fn ensure_key(table: &str, key: &str, batches: &[RecordBatch]) -> Result<()> {
    match batches.first() {
        Some(batch) if batch.schema().index_of(key).is_ok() => Ok(()),
        _ => Err(DestinationError::MissingKey {
            table: table.to_string(),
            key: key.to_string(),
        }),
    }
}

fn source_col(name: &str) -> Expr {
    Expr::Column(Column::new(Some(SOURCE_ALIAS), name))
}

fn target_col(name: &str) -> Expr {
    Expr::Column(Column::new(Some(TARGET_ALIAS), name))
}

/// Assignment target in the merge clauses. Names like `unit.price` must not
/// be split into a qualifier and a field.
fn target_field(name: &str) -> Column {
    Column::new_unqualified(name)
}
