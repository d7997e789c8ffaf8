// src/source/mod.rs

pub mod errors;
pub mod incremental;
pub mod sqlserver;
pub mod types;

use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

pub use errors::{Result, SourceError};
pub use incremental::{CursorValue, Incremental};
pub use sqlserver::SqlServerSource;
pub use types::{ColumnKind, SourceColumn};

/// How extracted rows land in the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Upsert by primary key.
    Merge,
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteDisposition::Merge => "merge",
        })
    }
}

/// One source table plus the hints that drive its extraction and load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableResource {
    pub name: String,
    pub primary_key: String,
    pub write_disposition: WriteDisposition,
    pub incremental: Incremental,
}

impl TableResource {
    pub fn merge(name: &str, primary_key: &str, cursor_column: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            write_disposition: WriteDisposition::Merge,
            incremental: Incremental::new(cursor_column),
        }
    }

    /// Folder (and destination table) name for this resource.
    pub fn folder_name(&self) -> String {
        normalize_table_name(&self.name)
    }
}

/// The fixed set of tables this loader moves.
pub fn mssql_tables() -> Vec<TableResource> {
    vec![
        TableResource::merge("Products", "product_id", "last_updated"),
        TableResource::merge("Customers", "customer_id", "last_updated"),
        TableResource::merge("Orders", "order_id", "last_updated"),
    ]
}

static ACRONYM_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("acronym regex should be valid"));
static WORD_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("word regex should be valid"));
static NON_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9_]+").expect("identifier regex should be valid"));

/// CamelCase → snake_case, the way the destination names its folders.
pub fn normalize_table_name(name: &str) -> String {
    let s = ACRONYM_BOUNDARY.replace_all(name.trim(), "${1}_${2}");
    let s = WORD_BOUNDARY.replace_all(&s, "${1}_${2}");
    let s = NON_IDENT.replace_all(&s.to_lowercase(), "_").into_owned();
    s.trim_matches('_').to_string()
}

/// Rows pulled from one table in a single run.
#[derive(Debug)]
pub struct Extract {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl Extract {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// A place rows are extracted from.
#[async_trait]
pub trait Source: Send {
    /// Pull every row of `resource` whose cursor is at or past `cursor`
    /// (all rows when `cursor` is `None`).
    async fn extract(
        &mut self,
        resource: &TableResource,
        cursor: Option<&CursorValue>,
    ) -> Result<Extract>;
}

/// Check that the key and cursor hints refer to real, usable columns.
pub fn validate_resource(resource: &TableResource, columns: &[SourceColumn]) -> Result<()> {
    let find = |name: &str| columns.iter().find(|c| c.name.eq_ignore_ascii_case(name));

    if find(&resource.primary_key).is_none() {
        return Err(SourceError::MissingColumn {
            table: resource.name.clone(),
            column: resource.primary_key.clone(),
        });
    }

    let cursor_column = &resource.incremental.cursor_column;
    match find(cursor_column) {
        None => Err(SourceError::MissingColumn {
            table: resource.name.clone(),
            column: cursor_column.clone(),
        }),
        Some(col) if !col.kind.is_cursor_capable() => Err(SourceError::InvalidCursorType {
            table: resource.name.clone(),
            column: col.name.clone(),
            data_type: col.kind.arrow_type(),
        }),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_tables_merge_on_key_with_last_updated_cursor() {
        let tables = mssql_tables();
        let expected = [
            ("Products", "product_id"),
            ("Customers", "customer_id"),
            ("Orders", "order_id"),
        ];
        assert_eq!(tables.len(), expected.len());
        for (resource, (name, key)) in tables.iter().zip(expected) {
            assert_eq!(resource.name, name);
            assert_eq!(resource.write_disposition, WriteDisposition::Merge);
            assert_eq!(resource.write_disposition.to_string(), "merge");
            assert_eq!(resource.primary_key, key);
            assert_eq!(resource.incremental.cursor_column, "last_updated");
        }
    }

    #[test]
    fn folder_names_are_lower_snake_case() {
        let folders: Vec<_> = mssql_tables().iter().map(|t| t.folder_name()).collect();
        assert_eq!(folders, ["products", "customers", "orders"]);

        assert_eq!(normalize_table_name("OrderItems"), "order_items");
        assert_eq!(normalize_table_name("HTTPLogs"), "http_logs");
        assert_eq!(normalize_table_name("Sales Order-Lines"), "sales_order_lines");
        assert_eq!(normalize_table_name("orders2024"), "orders2024");
    }

    fn columns() -> Vec<SourceColumn> {
        vec![
            SourceColumn::new("product_id", ColumnKind::Int),
            SourceColumn::new("name", ColumnKind::Text),
            SourceColumn::new("last_updated", ColumnKind::Timestamp),
        ]
    }

    #[test]
    fn validation_accepts_present_columns() {
        let resource = TableResource::merge("Products", "product_id", "last_updated");
        validate_resource(&resource, &columns()).unwrap();
    }

    #[test]
    fn validation_rejects_missing_key_or_cursor() {
        let resource = TableResource::merge("Products", "sku", "last_updated");
        assert!(matches!(
            validate_resource(&resource, &columns()),
            Err(SourceError::MissingColumn { column, .. }) if column == "sku"
        ));

        let resource = TableResource::merge("Products", "product_id", "modified_at");
        assert!(matches!(
            validate_resource(&resource, &columns()),
            Err(SourceError::MissingColumn { column, .. }) if column == "modified_at"
        ));
    }

    #[test]
    fn validation_rejects_text_cursor() {
        let resource = TableResource::merge("Products", "product_id", "name");
        assert!(matches!(
            validate_resource(&resource, &columns()),
            Err(SourceError::InvalidCursorType { .. })
        ));
    }
}
