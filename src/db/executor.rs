use std::future::Future;

use tokio_postgres::{Client, SimpleQueryMessage};
use tracing::debug;

use crate::error::Result;

/// One row returned by a catalog or statement query, in text format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRow {
    columns: Vec<(String, Option<String>)>,
}

impl CatalogRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column; `None` is SQL NULL.
    pub fn with(mut self, name: &str, value: Option<&str>) -> Self {
        self.columns
            .push((name.to_string(), value.map(str::to_string)));
        self
    }

    /// Text value of the named column, `None` when NULL or absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Text value of the named column, empty when NULL or absent.
    pub fn text(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }

    /// Boolean column in the server's text encoding (`t`/`true`).
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some("t" | "true" | "TRUE" | "on"))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }
}

/// The connection seam: everything the adapter needs from a driver.
///
/// Calls are single-shot; retries and cancellation belong to the driver.
pub trait Executor: Send + Sync {
    /// Run a statement returning rows.
    fn query(&self, sql: &str) -> impl Future<Output = Result<Vec<CatalogRow>>> + Send;

    /// Run one or more statements, returning the affected row count.
    fn execute(&self, sql: &str) -> impl Future<Output = Result<u64>> + Send;
}

impl Executor for Client {
    async fn query(&self, sql: &str) -> Result<Vec<CatalogRow>> {
        debug!(sql = %sql, "query");
        let messages = self.simple_query(sql).await?;
        let rows = messages
            .into_iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => {
                    let columns = row
                        .columns()
                        .iter()
                        .enumerate()
                        .map(|(i, col)| (col.name().to_string(), row.get(i).map(str::to_string)))
                        .collect();
                    Some(CatalogRow { columns })
                }
                _ => None,
            })
            .collect();
        Ok(rows)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        debug!(sql = %sql, "execute");
        let messages = self.simple_query(sql).await?;
        Ok(messages
            .iter()
            .map(|message| match message {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum())
    }
}
