use anyhow::{anyhow, Result};
use arrow::{
    array::{ArrayRef, AsArray, StringArray, TimestampMicrosecondArray, UInt64Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::{path::PathBuf, sync::Arc};

use crate::history::table_history::{HistoryRow, TableHistory};

/// One table's share of a pipeline load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRow {
    pub load_id: String,
    pub table_name: String,
    pub rows_extracted: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub load_start: DateTime<Utc>,
    pub load_end: DateTime<Utc>,
}

impl HistoryRow for LoadRow {
    fn partition_date(&self) -> NaiveDate {
        self.load_end.date_naive()
    }

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new("load_id", ArrowDataType::Utf8, false),
            Field::new("table_name", ArrowDataType::Utf8, false),
            Field::new("rows_extracted", ArrowDataType::UInt64, false),
            Field::new("rows_inserted", ArrowDataType::UInt64, false),
            Field::new("rows_updated", ArrowDataType::UInt64, false),
            Field::new(
                "load_start",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
            Field::new(
                "load_end",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        vec![
            Arc::new(StringArray::from(vec![self.load_id.clone()])),
            Arc::new(StringArray::from(vec![self.table_name.clone()])),
            Arc::new(UInt64Array::from(vec![self.rows_extracted])),
            Arc::new(UInt64Array::from(vec![self.rows_inserted])),
            Arc::new(UInt64Array::from(vec![self.rows_updated])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .load_start
                .timestamp_micros()])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .load_end
                .timestamp_micros()])),
        ]
    }

    fn unique_key(&self) -> String {
        load_key(&self.load_id, &self.table_name)
    }

    fn extract_key(batch: &RecordBatch, row: usize) -> Result<String> {
        let load_id = batch
            .column(0)
            .as_string_opt::<i32>()
            .ok_or_else(|| anyhow!("load_id column must be Utf8"))?;
        let table = batch
            .column(1)
            .as_string_opt::<i32>()
            .ok_or_else(|| anyhow!("table_name column must be Utf8"))?;
        Ok(load_key(load_id.value(row), table.value(row)))
    }
}

/// Dedupe key for a table within a load.
pub fn load_key(load_id: &str, table: &str) -> String {
    format!("{}--{}", load_id, table)
}

impl TableHistory<LoadRow> {
    pub fn new_loads(base: impl Into<PathBuf>) -> Result<Self> {
        TableHistory::new(base, "loads")
    }
}
