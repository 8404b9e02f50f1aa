use crate::config::DatabaseConfig;
use crate::error::Error;
use crate::log::CATALOG;
use std::time::Duration;
use tokio::time;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);
const MAX_RETRY_COUNT: u32 = 3;

///
/// Connect to the database, bounded by the connection timeout.
///
/// Attempts that fail before the server answers (refused, unreachable) are retried with backoff.
/// Errors reported by the server itself, such as a bad password, are returned straight away.
///
pub async fn database(config: &DatabaseConfig) -> Result<Client, Error> {
    time::timeout(config.connection_timeout(), connect_with_retry(config)).await?
}

async fn connect_with_retry(config: &DatabaseConfig) -> Result<Client, Error> {
    let mut retry_count = 0;

    loop {
        debug!(target: CATALOG, msg = "Connecting to database", database = %config);

        match tokio_postgres::connect(&config.connection_string, NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        error!(msg = "Connection error", error = err.to_string());
                    }
                });
                return Ok(client);
            }
            Err(err) => {
                if err.as_db_error().is_some() || retry_count >= MAX_RETRY_COUNT {
                    error!(
                        msg = "Could not connect to database",
                        database = %config,
                        retries = retry_count,
                        error = err.to_string()
                    );
                    error!(msg = "Confirm that the connection string is correct");
                    return Err(Error::DatabaseConnection {
                        database: config.to_string(),
                        source: err,
                    });
                }
            }
        }

        let sleep_duration_ms =
            (100 * 2_u64.pow(retry_count)).min(MAX_RETRY_DELAY.as_millis() as _);
        time::sleep(Duration::from_millis(sleep_duration_ms)).await;

        retry_count += 1;
    }
}
