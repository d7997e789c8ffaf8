// src/source/incremental.rs

use arrow::{
    array::{Array, AsArray},
    compute,
    datatypes::{
        DataType, Date32Type, Int16Type, Int32Type, Int64Type, Int8Type, TimeUnit,
        TimestampMicrosecondType, UInt8Type,
    },
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{Result, SourceError};

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Incremental extraction hint: rows are selected by a monotonically
/// increasing cursor column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incremental {
    pub cursor_column: String,
}

impl Incremental {
    pub fn new(cursor_column: &str) -> Self {
        Self {
            cursor_column: cursor_column.to_string(),
        }
    }
}

/// Last value seen in a cursor column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CursorValue {
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Integer(i64),
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            CursorValue::Date(d) => write!(f, "{}", d),
            CursorValue::Integer(i) => write!(f, "{}", i),
        }
    }
}

/// Max value of `column` across `batches`, or `None` when every value is null
/// or there are no rows.
pub fn max_cursor_value(batches: &[RecordBatch], column: &str) -> Result<Option<CursorValue>> {
    let mut max: Option<CursorValue> = None;

    for batch in batches {
        let idx = batch
            .schema()
            .fields()
            .iter()
            .position(|f| f.name().eq_ignore_ascii_case(column))
            .ok_or_else(|| SourceError::MissingColumn {
                table: String::from("<extract>"),
                column: column.to_string(),
            })?;
        let array = batch.column(idx);

        let batch_max = match array.data_type() {
            DataType::Timestamp(TimeUnit::Microsecond, _) => {
                compute::max(array.as_primitive::<TimestampMicrosecondType>())
                    .map(|micros| {
                        DateTime::<Utc>::from_timestamp_micros(micros)
                            .map(CursorValue::Timestamp)
                            .ok_or_else(|| {
                                SourceError::String(format!(
                                    "cursor `{}` timestamp {} out of range",
                                    column, micros
                                ))
                            })
                    })
                    .transpose()?
            }
            DataType::Date32 => compute::max(array.as_primitive::<Date32Type>())
                .map(|days| {
                    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                        .map(CursorValue::Date)
                        .ok_or_else(|| {
                            SourceError::String(format!(
                                "cursor `{}` date {} out of range",
                                column, days
                            ))
                        })
                })
                .transpose()?,
            DataType::Int64 => compute::max(array.as_primitive::<Int64Type>()).map(CursorValue::Integer),
            DataType::Int32 => compute::max(array.as_primitive::<Int32Type>())
                .map(|v| CursorValue::Integer(v as i64)),
            DataType::Int16 => compute::max(array.as_primitive::<Int16Type>())
                .map(|v| CursorValue::Integer(v as i64)),
            DataType::Int8 => compute::max(array.as_primitive::<Int8Type>())
                .map(|v| CursorValue::Integer(v as i64)),
            DataType::UInt8 => compute::max(array.as_primitive::<UInt8Type>())
                .map(|v| CursorValue::Integer(v as i64)),
            other => {
                return Err(SourceError::InvalidCursorType {
                    table: String::from("<extract>"),
                    column: column.to_string(),
                    data_type: other.clone(),
                })
            }
        };

        if let Some(value) = batch_max {
            if max.as_ref().map_or(true, |current| value > *current) {
                max = Some(value);
            }
        }
    }

    Ok(max)
}

/// Arrow Date32 value for a calendar date.
pub fn date_to_days(date: NaiveDate) -> i32 {
    use chrono::Datelike;
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Date32Array, Int32Array, StringArray, TimestampMicrosecondArray};
    use arrow::datatypes::{Field, Schema};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn ts_batch(values: Vec<Option<i64>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "last_updated",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            true,
        )]));
        let array: ArrayRef =
            Arc::new(TimestampMicrosecondArray::from(values).with_timezone("UTC"));
        RecordBatch::try_new(schema, vec![array]).unwrap()
    }

    #[test]
    fn timestamp_max_spans_batches() {
        let a = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let batches = vec![
            ts_batch(vec![Some(a.timestamp_micros()), None]),
            ts_batch(vec![Some(b.timestamp_micros())]),
        ];
        let max = max_cursor_value(&batches, "last_updated").unwrap();
        assert_eq!(max, Some(CursorValue::Timestamp(b)));
    }

    #[test]
    fn all_null_or_empty_has_no_cursor() {
        assert_eq!(max_cursor_value(&[], "last_updated").unwrap(), None);
        let batches = vec![ts_batch(vec![None, None])];
        assert_eq!(max_cursor_value(&batches, "last_updated").unwrap(), None);
    }

    #[test]
    fn integer_and_date_cursors() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("version", DataType::Int32, true),
            Field::new("day", DataType::Date32, true),
        ]));
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![3, 17, 9])),
                Arc::new(Date32Array::from(vec![date_to_days(d2), date_to_days(d1), date_to_days(d1)])),
            ],
        )
        .unwrap();

        assert_eq!(
            max_cursor_value(&[batch.clone()], "version").unwrap(),
            Some(CursorValue::Integer(17))
        );
        assert_eq!(
            max_cursor_value(&[batch], "DAY").unwrap(),
            Some(CursorValue::Date(d2))
        );
    }

    #[test]
    fn text_cursor_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("name", DataType::Utf8, true)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["a"]))]).unwrap();
        assert!(matches!(
            max_cursor_value(&[batch], "name"),
            Err(SourceError::InvalidCursorType { .. })
        ));
    }

    #[test]
    fn cursor_state_serializes_with_type_tag() {
        let v = CursorValue::Integer(42);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"integer","value":42}"#);
        let back: CursorValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
