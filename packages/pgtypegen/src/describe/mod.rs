use crate::error::DescribeError;
use crate::log::DESCRIBE;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::timeout;
use tokio_postgres::{Client, Statement};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One result column as reported by the server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_oid: u32,
    /// Source table when the server can attribute the column to a physical table column
    pub table_oid: Option<u32>,
    /// Attribute number of the source column
    pub column_id: Option<i16>,
}

/// Result columns and parameter types of a prepared statement
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Description {
    pub columns: Vec<ColumnDescriptor>,
    pub params: Vec<u32>,
}

impl Description {
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

impl From<&Statement> for Description {
    fn from(statement: &Statement) -> Self {
        let columns = statement
            .columns()
            .iter()
            .map(|column| ColumnDescriptor {
                name: column.name().to_owned(),
                type_oid: column.type_().oid(),
                table_oid: column.table_oid().filter(|oid| *oid != 0),
                column_id: column.column_id().filter(|id| *id > 0),
            })
            .collect();

        let params = statement.params().iter().map(|t| t.oid()).collect();

        Description { columns, params }
    }
}

pub type Descriptions = HashMap<String, Result<Description, DescribeError>>;

///
/// Prepares statements without executing them.
///
/// Every round trip is bounded by the statement timeout, and all outstanding
/// round trips stop when the cancellation token fires.
///
pub struct Describer<'a> {
    client: &'a Client,
    statement_timeout: Duration,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<'a> Describer<'a> {
    pub fn new(
        client: &'a Client,
        statement_timeout: Duration,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Describer {
            client,
            statement_timeout,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub async fn describe(&self, sql: &str) -> Result<Description, DescribeError> {
        if self.cancel.is_cancelled() {
            return Err(DescribeError::Cancelled);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(DescribeError::Cancelled),
            prepared = timeout(self.statement_timeout, self.client.prepare(sql)) => {
                let statement = prepared??;
                let description = Description::from(&statement);
                debug!(
                    target: DESCRIBE,
                    msg = "Described statement",
                    columns = description.columns.len(),
                    params = description.param_count()
                );
                Ok(description)
            }
        }
    }

    ///
    /// Describe each distinct text once, with at most `concurrency` round trips in flight.
    ///
    pub async fn describe_all<I, S>(&self, sqls: I) -> Descriptions
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let unique: Vec<String> = sqls
            .into_iter()
            .filter_map(|sql| {
                let sql = sql.as_ref();
                seen.insert(sql.to_owned()).then(|| sql.to_owned())
            })
            .collect();

        debug!(target: DESCRIBE, msg = "Describing statements", count = unique.len());

        stream::iter(unique)
            .map(|sql| async move {
                let described = self.describe(&sql).await;
                if let Err(err) = &described {
                    warn!(target: DESCRIBE, msg = "Describe failed", error = err.to_string());
                }
                (sql, described)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}
