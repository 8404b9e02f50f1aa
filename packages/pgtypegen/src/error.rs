use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::error::Elapsed;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Generation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database connection timed out")]
    ConnectionTimeout(#[from] Elapsed),

    #[error("Could not connect to database {database}: {source}")]
    DatabaseConnection {
        database: String,
        source: tokio_postgres::Error,
    },

    #[error(transparent)]
    Describe(#[from] DescribeError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Infer(#[from] InferError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] JoinError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl Error {
    ///
    /// Fatal errors abort the whole run.
    /// Everything else is recorded against a file or query and the run continues.
    ///
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Describe(_) | Error::Extract(_) | Error::Infer(_) | Error::Write(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Connection string should not contain spaces or quotes")]
    InvalidConnectionString,

    #[error("Invalid glob pattern {pattern}: {source}")]
    InvalidGlob {
        pattern: String,
        source: globset::Error,
    },

    #[error("Invalid value {value} for parameter {name}")]
    InvalidParameter { name: String, value: String },

    #[error("Unknown type parser {name}")]
    UnknownTypeParser { name: String },

    #[error(transparent)]
    FileOrEnvironment(#[from] config::ConfigError),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog query timed out")]
    Timeout(#[from] Elapsed),

    #[error("Catalog could not be loaded: {0}")]
    Query(#[from] tokio_postgres::Error),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unterminated {what} starting on line {line}")]
    Unterminated { what: &'static str, line: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum DescribeError {
    #[error("Describe was cancelled")]
    Cancelled,

    #[error("Describe timed out")]
    Timeout(#[from] Elapsed),

    #[error("{}", format_db_error(.0))]
    Prepare(#[from] tokio_postgres::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferError {
    #[error("No TypeScript type could be determined for column {column} of type {pg_type}")]
    UnknownType { column: String, pg_type: String },

    #[error("Type with oid {oid} is not in the catalog")]
    UnknownOid { oid: u32 },
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("File {path} changed on disk during generation")]
    Conflict { path: PathBuf },

    #[error("Could not persist {path}: {source}")]
    Persist { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Working tree is not clean {point}:\n{status}")]
    Dirty { point: String, status: String },

    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

///
/// Server errors carry the useful part of the message in the DbError.
/// The default Display for tokio_postgres::Error is just "db error".
///
fn format_db_error(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => match db.hint() {
            Some(hint) => format!("{} ({}). Hint: {hint}", db.message(), db.code().code()),
            None => format!("{} ({})", db.message(), db.code().code()),
        },
        None => err.to_string(),
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.into())
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        Error::Catalog(e.into())
    }
}
