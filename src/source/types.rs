// src/source/types.rs

use arrow::{
    array::{
        ArrayRef, BinaryBuilder, BooleanBuilder, Date32Builder, Decimal128Builder,
        Float32Builder, Float64Builder, Int16Builder, Int32Builder, Int64Builder, StringBuilder,
        TimestampMicrosecondBuilder,
    },
    datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use tiberius::{numeric::Numeric, Row, Uuid};

use super::errors::{Result, SourceError};
use super::incremental::date_to_days;

/// Timezone attached to every timestamp column. Naive source values are read
/// as UTC.
pub const TIMESTAMP_TZ: &str = "UTC";

/// Arrow-side shape of a SQL Server column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    /// `tinyint` is unsigned; widened to Int16 since Delta has no unsigned types.
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Real,
    Float,
    Money,
    Decimal { precision: u8, scale: i8 },
    Text,
    Guid,
    Date,
    Timestamp,
    TimestampOffset,
    /// Delta has no time-of-day type; stored as `HH:MM:SS.ffffff` text.
    Time,
    Binary,
}

impl ColumnKind {
    /// Map an `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE` value.
    pub fn from_sql_type(data_type: &str, precision: Option<u8>, scale: Option<i32>) -> Option<Self> {
        let kind = match data_type.trim().to_ascii_lowercase().as_str() {
            "bit" => ColumnKind::Boolean,
            "tinyint" => ColumnKind::TinyInt,
            "smallint" => ColumnKind::SmallInt,
            "int" => ColumnKind::Int,
            "bigint" => ColumnKind::BigInt,
            "real" => ColumnKind::Real,
            "float" => ColumnKind::Float,
            "money" | "smallmoney" => ColumnKind::Money,
            "decimal" | "numeric" => ColumnKind::Decimal {
                precision: precision.unwrap_or(18).clamp(1, 38),
                scale: scale.unwrap_or(0).clamp(0, 38) as i8,
            },
            "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "sysname" => {
                ColumnKind::Text
            }
            "uniqueidentifier" => ColumnKind::Guid,
            "date" => ColumnKind::Date,
            "datetime" | "datetime2" | "smalldatetime" => ColumnKind::Timestamp,
            "datetimeoffset" => ColumnKind::TimestampOffset,
            "time" => ColumnKind::Time,
            "binary" | "varbinary" | "image" => ColumnKind::Binary,
            _ => return None,
        };
        Some(kind)
    }

    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnKind::Boolean => DataType::Boolean,
            ColumnKind::TinyInt | ColumnKind::SmallInt => DataType::Int16,
            ColumnKind::Int => DataType::Int32,
            ColumnKind::BigInt => DataType::Int64,
            ColumnKind::Real => DataType::Float32,
            ColumnKind::Float | ColumnKind::Money => DataType::Float64,
            ColumnKind::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale),
            ColumnKind::Text | ColumnKind::Guid | ColumnKind::Time => DataType::Utf8,
            ColumnKind::Date => DataType::Date32,
            ColumnKind::Timestamp | ColumnKind::TimestampOffset => {
                DataType::Timestamp(TimeUnit::Microsecond, Some(TIMESTAMP_TZ.into()))
            }
            ColumnKind::Binary => DataType::Binary,
        }
    }

    /// Whether values of this kind can drive an incremental cursor.
    pub fn is_cursor_capable(&self) -> bool {
        matches!(
            self,
            ColumnKind::TinyInt
                | ColumnKind::SmallInt
                | ColumnKind::Int
                | ColumnKind::BigInt
                | ColumnKind::Date
                | ColumnKind::Timestamp
                | ColumnKind::TimestampOffset
        )
    }
}

/// A reflected source column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    pub kind: ColumnKind,
}

impl SourceColumn {
    pub fn new(name: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Build an ArrowSchema from reflected columns. Every field is nullable.
pub fn build_arrow_schema(columns: &[SourceColumn]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|c| Field::new(&c.name, c.kind.arrow_type(), true))
        .collect();
    Arc::new(ArrowSchema::new(fields))
}

enum ColumnBuilder {
    Boolean(BooleanBuilder),
    TinyInt(Int16Builder),
    SmallInt(Int16Builder),
    Int(Int32Builder),
    BigInt(Int64Builder),
    Real(Float32Builder),
    Float(Float64Builder),
    Decimal(Decimal128Builder, i8),
    Text(StringBuilder),
    Guid(StringBuilder),
    Time(StringBuilder),
    Date(Date32Builder),
    Timestamp(TimestampMicrosecondBuilder),
    TimestampOffset(TimestampMicrosecondBuilder),
    Binary(BinaryBuilder),
}

impl ColumnBuilder {
    fn new(kind: ColumnKind, capacity: usize) -> Result<Self> {
        let builder = match kind {
            ColumnKind::Boolean => ColumnBuilder::Boolean(BooleanBuilder::with_capacity(capacity)),
            ColumnKind::TinyInt => ColumnBuilder::TinyInt(Int16Builder::with_capacity(capacity)),
            ColumnKind::SmallInt => ColumnBuilder::SmallInt(Int16Builder::with_capacity(capacity)),
            ColumnKind::Int => ColumnBuilder::Int(Int32Builder::with_capacity(capacity)),
            ColumnKind::BigInt => ColumnBuilder::BigInt(Int64Builder::with_capacity(capacity)),
            ColumnKind::Real => ColumnBuilder::Real(Float32Builder::with_capacity(capacity)),
            ColumnKind::Float | ColumnKind::Money => {
                ColumnBuilder::Float(Float64Builder::with_capacity(capacity))
            }
            ColumnKind::Decimal { precision, scale } => ColumnBuilder::Decimal(
                Decimal128Builder::with_capacity(capacity)
                    .with_precision_and_scale(precision, scale)?,
                scale,
            ),
            ColumnKind::Text => ColumnBuilder::Text(StringBuilder::with_capacity(capacity, capacity * 16)),
            ColumnKind::Guid => ColumnBuilder::Guid(StringBuilder::with_capacity(capacity, capacity * 36)),
            ColumnKind::Time => ColumnBuilder::Time(StringBuilder::with_capacity(capacity, capacity * 15)),
            ColumnKind::Date => ColumnBuilder::Date(Date32Builder::with_capacity(capacity)),
            ColumnKind::Timestamp => ColumnBuilder::Timestamp(
                TimestampMicrosecondBuilder::with_capacity(capacity).with_timezone(TIMESTAMP_TZ),
            ),
            ColumnKind::TimestampOffset => ColumnBuilder::TimestampOffset(
                TimestampMicrosecondBuilder::with_capacity(capacity).with_timezone(TIMESTAMP_TZ),
            ),
            ColumnKind::Binary => ColumnBuilder::Binary(BinaryBuilder::with_capacity(capacity, capacity * 16)),
        };
        Ok(builder)
    }

    fn append(&mut self, row: &Row, idx: usize) -> Result<()> {
        match self {
            ColumnBuilder::Boolean(b) => b.append_option(row.try_get::<bool, _>(idx)?),
            ColumnBuilder::TinyInt(b) => {
                b.append_option(row.try_get::<u8, _>(idx)?.map(i16::from))
            }
            ColumnBuilder::SmallInt(b) => b.append_option(row.try_get::<i16, _>(idx)?),
            ColumnBuilder::Int(b) => b.append_option(row.try_get::<i32, _>(idx)?),
            ColumnBuilder::BigInt(b) => b.append_option(row.try_get::<i64, _>(idx)?),
            ColumnBuilder::Real(b) => b.append_option(row.try_get::<f32, _>(idx)?),
            ColumnBuilder::Float(b) => b.append_option(row.try_get::<f64, _>(idx)?),
            ColumnBuilder::Decimal(b, scale) => {
                let value = row
                    .try_get::<Numeric, _>(idx)?
                    .map(|n| numeric_to_decimal(n, *scale));
                b.append_option(value)
            }
            ColumnBuilder::Text(b) => b.append_option(row.try_get::<&str, _>(idx)?),
            ColumnBuilder::Guid(b) => {
                b.append_option(row.try_get::<Uuid, _>(idx)?.map(|u| u.to_string()))
            }
            ColumnBuilder::Time(b) => {
                b.append_option(row.try_get::<NaiveTime, _>(idx)?.map(time_to_text))
            }
            ColumnBuilder::Date(b) => {
                b.append_option(row.try_get::<NaiveDate, _>(idx)?.map(date_to_days))
            }
            ColumnBuilder::Timestamp(b) => {
                b.append_option(row.try_get::<NaiveDateTime, _>(idx)?.map(naive_utc_micros))
            }
            ColumnBuilder::TimestampOffset(b) => b.append_option(
                row.try_get::<DateTime<FixedOffset>, _>(idx)?
                    .map(|dt| dt.timestamp_micros()),
            ),
            ColumnBuilder::Binary(b) => b.append_option(row.try_get::<&[u8], _>(idx)?),
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Boolean(b) => Arc::new(b.finish()),
            ColumnBuilder::TinyInt(b) | ColumnBuilder::SmallInt(b) => Arc::new(b.finish()),
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::BigInt(b) => Arc::new(b.finish()),
            ColumnBuilder::Real(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::Decimal(b, _) => Arc::new(b.finish()),
            ColumnBuilder::Text(b) | ColumnBuilder::Guid(b) | ColumnBuilder::Time(b) => {
                Arc::new(b.finish())
            }
            ColumnBuilder::Date(b) => Arc::new(b.finish()),
            ColumnBuilder::Timestamp(b) | ColumnBuilder::TimestampOffset(b) => {
                Arc::new(b.finish())
            }
            ColumnBuilder::Binary(b) => Arc::new(b.finish()),
        }
    }
}

/// Unscaled Decimal128 value of `n` at the column's declared `scale`.
fn numeric_to_decimal(n: Numeric, scale: i8) -> i128 {
    rescale(n.value(), n.scale() as i8, scale)
}

/// `time` columns are stored as text with microsecond precision.
fn time_to_text(t: NaiveTime) -> String {
    t.format("%H:%M:%S%.6f").to_string()
}

/// Naive `datetime`/`datetime2` values are taken to be UTC.
fn naive_utc_micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

/// Move a decimal's unscaled value from scale `from` to scale `to`.
fn rescale(value: i128, from: i8, to: i8) -> i128 {
    match to.cmp(&from) {
        std::cmp::Ordering::Equal => value,
        std::cmp::Ordering::Greater => value * 10i128.pow((to - from) as u32),
        std::cmp::Ordering::Less => value / 10i128.pow((from - to) as u32),
    }
}

/// Accumulates rows into Arrow record batches. Column order must match the
/// SELECT list the rows came from.
pub struct BatchBuilder {
    schema: SchemaRef,
    builders: Vec<ColumnBuilder>,
    rows: usize,
}

impl BatchBuilder {
    pub fn new(columns: &[SourceColumn], capacity: usize) -> Result<Self> {
        let builders = columns
            .iter()
            .map(|c| ColumnBuilder::new(c.kind, capacity))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            schema: build_arrow_schema(columns),
            builders,
            rows: 0,
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn push_row(&mut self, row: &Row) -> Result<()> {
        if row.len() != self.builders.len() {
            return Err(SourceError::String(format!(
                "row has {} columns, expected {}",
                row.len(),
                self.builders.len()
            )));
        }
        for (idx, builder) in self.builders.iter_mut().enumerate() {
            builder.append(row, idx)?;
        }
        self.rows += 1;
        Ok(())
    }

    /// Drain the buffered rows into a batch; the builder is reusable afterwards.
    pub fn finish(&mut self) -> Result<RecordBatch> {
        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        self.rows = 0;
        Ok(RecordBatch::try_new(self.schema.clone(), arrays)?)
    }
}
