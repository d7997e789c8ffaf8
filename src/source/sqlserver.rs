//! SQL Server source backed by a tiberius client.
//!
//! Tables are reflected through `INFORMATION_SCHEMA.COLUMNS` so the Arrow
//! schema is stable across runs regardless of which rows come back. Rows are
//! streamed and cut into record batches of `batch_size` rows.

use async_trait::async_trait;
use futures::TryStreamExt;
use std::time::Instant;
use tiberius::{Client, Config, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, instrument};

use super::errors::{Result, SourceError};
use super::incremental::CursorValue;
use super::types::{BatchBuilder, ColumnKind, SourceColumn};
use super::{validate_resource, Extract, Source, TableResource};

const REFLECT_COLUMNS_SQL: &str = "SELECT COLUMN_NAME, DATA_TYPE, NUMERIC_PRECISION, NUMERIC_SCALE \
     FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 \
     ORDER BY ORDINAL_POSITION";

pub struct SqlServerSource {
    client: Client<Compat<TcpStream>>,
    schema: String,
    batch_size: usize,
}

impl SqlServerSource {
    /// Connect using an ADO.NET connection string.
    pub async fn connect(conn_str: &str, schema: &str, batch_size: usize) -> Result<Self> {
        let config = Config::from_ado_string(conn_str)?;
        let client = connect(config).await?;
        Ok(Self {
            client,
            schema: schema.to_string(),
            batch_size: batch_size.max(1),
        })
    }

    /// Column names and kinds of `table`, in ordinal order.
    pub async fn reflect_columns(&mut self, table: &str) -> Result<Vec<SourceColumn>> {
        let schema = self.schema.clone();
        let rows = self
            .client
            .query(REFLECT_COLUMNS_SQL, &[&schema.as_str(), &table])
            .await?
            .into_first_result()
            .await?;

        if rows.is_empty() {
            return Err(SourceError::TableNotFound {
                schema,
                table: table.to_string(),
            });
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = row
                .try_get::<&str, _>(0)?
                .ok_or_else(|| SourceError::String("null COLUMN_NAME".into()))?;
            let data_type = row.try_get::<&str, _>(1)?.unwrap_or_default();
            let precision = row.try_get::<u8, _>(2)?;
            let scale = row.try_get::<i32, _>(3)?;

            let kind = ColumnKind::from_sql_type(data_type, precision, scale).ok_or_else(|| {
                SourceError::UnsupportedType {
                    column: name.to_string(),
                    data_type: data_type.to_string(),
                }
            })?;
            columns.push(SourceColumn::new(name, kind));
        }
        Ok(columns)
    }
}

#[async_trait]
impl Source for SqlServerSource {
    #[instrument(level = "info", skip(self, resource, cursor), fields(table = %resource.name))]
    async fn extract(
        &mut self,
        resource: &TableResource,
        cursor: Option<&CursorValue>,
    ) -> Result<Extract> {
        let start = Instant::now();
        let columns = self.reflect_columns(&resource.name).await?;
        validate_resource(resource, &columns)?;

        let sql = incremental_query(
            &self.schema,
            &resource.name,
            &columns,
            &resource.incremental.cursor_column,
            cursor.is_some(),
        );
        debug!(%sql, cursor = ?cursor, "querying");

        let params: Vec<Box<dyn ToSql>> = cursor.map(cursor_param).into_iter().collect();
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut builder = BatchBuilder::new(&columns, self.batch_size)?;
        let mut batches = Vec::new();
        let mut rows = self
            .client
            .query(sql, &param_refs[..])
            .await?
            .into_row_stream();

        while let Some(row) = rows.try_next().await? {
            builder.push_row(&row)?;
            if builder.len() >= self.batch_size {
                batches.push(builder.finish()?);
                debug!(batches = batches.len(), "batch complete");
            }
        }
        if !builder.is_empty() {
            batches.push(builder.finish()?);
        }

        let extract = Extract {
            schema: builder.schema(),
            batches,
        };
        info!(
            rows = extract.num_rows(),
            elapsed = ?start.elapsed(),
            "extracted"
        );
        Ok(extract)
    }
}

/// Connect, following one server redirect (Azure SQL gateways route clients
/// to the actual node).
async fn connect(config: Config) -> Result<Client<Compat<TcpStream>>> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;

    match Client::connect(config.clone(), tcp.compat_write()).await {
        Ok(client) => Ok(client),
        Err(tiberius::error::Error::Routing { host, port }) => {
            debug!(%host, port, "following SQL Server redirect");
            let mut config = config;
            config.host(&host);
            config.port(port);

            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Ok(Client::connect(config, tcp.compat_write()).await?)
        }
        Err(e) => Err(e.into()),
    }
}

fn cursor_param(cursor: &CursorValue) -> Box<dyn ToSql> {
    match cursor {
        CursorValue::Timestamp(ts) => Box::new(ts.naive_utc()),
        CursorValue::Date(d) => Box::new(*d),
        CursorValue::Integer(i) => Box::new(*i),
    }
}

/// `[name]`, with embedded `]` doubled.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// SELECT for one table, optionally bounded below (inclusive) by `@P1` on the
/// cursor column and always ordered by it.
pub fn incremental_query(
    schema: &str,
    table: &str,
    columns: &[SourceColumn],
    cursor_column: &str,
    bounded: bool,
) -> String {
    let projection = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let cursor = quote_ident(cursor_column);

    let mut sql = format!(
        "SELECT {} FROM {}.{}",
        projection,
        quote_ident(schema),
        quote_ident(table)
    );
    if bounded {
        sql.push_str(&format!(" WHERE {} >= @P1", cursor));
    }
    sql.push_str(&format!(" ORDER BY {}", cursor));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<SourceColumn> {
        vec![
            SourceColumn::new("order_id", ColumnKind::Int),
            SourceColumn::new("total", ColumnKind::Decimal { precision: 10, scale: 2 }),
            SourceColumn::new("last_updated", ColumnKind::Timestamp),
        ]
    }

    #[test]
    fn first_run_selects_everything_ordered_by_cursor() {
        let sql = incremental_query("dbo", "Orders", &columns(), "last_updated", false);
        assert_eq!(
            sql,
            "SELECT [order_id], [total], [last_updated] FROM [dbo].[Orders] ORDER BY [last_updated]"
        );
    }

    #[test]
    fn later_runs_bound_by_stored_cursor() {
        let sql = incremental_query("dbo", "Orders", &columns(), "last_updated", true);
        assert_eq!(
            sql,
            "SELECT [order_id], [total], [last_updated] FROM [dbo].[Orders] \
             WHERE [last_updated] >= @P1 ORDER BY [last_updated]"
        );
    }

    #[test]
    fn identifiers_are_bracket_escaped() {
        assert_eq!(quote_ident("Orders"), "[Orders]");
        assert_eq!(quote_ident("odd]name"), "[odd]]name]");
    }
}
