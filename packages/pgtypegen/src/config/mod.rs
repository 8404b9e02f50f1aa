mod database;
mod log;
mod options;

pub use database::{DatabaseConfig, PartialDatabaseConfig, DEFAULT_CONNECTION_STRING};
pub use log::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use options::{CheckClean, Defaults, ErrorPolicy, Options, PartialOptions, Resolved};

pub const TYPEGEN_PREFIX: &str = "TYPEGEN";
pub const DEFAULT_CONFIG_FILE_PATH: &str = "typegen.toml";
