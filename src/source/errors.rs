use arrow::datatypes::DataType;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{0}")]
    String(String),
    #[error(transparent)]
    Tiberius(#[from] tiberius::error::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("table {schema}.{table} not found in source database")]
    TableNotFound { schema: String, table: String },
    #[error("column `{column}` not found in source table `{table}`")]
    MissingColumn { table: String, column: String },
    #[error("unsupported SQL Server type `{data_type}` for column `{column}`")]
    UnsupportedType { column: String, data_type: String },
    #[error("cursor column `{column}` of `{table}` has type {data_type}; expected a timestamp, date or integer")]
    InvalidCursorType {
        table: String,
        column: String,
        data_type: DataType,
    },
}

pub type Result<T, E = SourceError> = std::result::Result<T, E>;
