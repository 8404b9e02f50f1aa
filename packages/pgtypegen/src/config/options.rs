use super::database::{DatabaseConfig, PartialDatabaseConfig};
use super::log::LogConfig;
use super::TYPEGEN_PREFIX;
use crate::error::{ConfigError, Error};
use crate::infer::{default_sample_values, BuiltinParser, SampleValues, TypeParsers};
use crate::log::{Logger, TracingLogger};
use clap::ValueEnum;
use config::{Config, Environment};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::path::{Path, PathBuf};
use std::sync::Arc;

///
/// Points in the run at which the git working tree must be clean.
///
/// `before-migrate` is checked before anything is read, `after` once every file has been written
/// (which fails the run whenever generation changed something).
///
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CheckClean {
    BeforeMigrate,
    After,
    None,
}

impl Display for CheckClean {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckClean::BeforeMigrate => "before-migrate",
            CheckClean::After => "after",
            CheckClean::None => "none",
        };
        write!(f, "{s}")
    }
}

/// What happens when a column's TypeScript type cannot be determined
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// The query is recorded as failed and left out of generation
    #[default]
    Strict,
    /// The column degrades to the default type with a warning
    Lazy,
}

impl ErrorPolicy {
    pub fn from_lazy(lazy: bool) -> Self {
        if lazy {
            ErrorPolicy::Lazy
        } else {
            ErrorPolicy::Strict
        }
    }
}

///
/// Options as supplied by the user. Every field is optional.
/// Loaded from `typegen.toml` and `TYPEGEN_` environment variables, then overlaid with CLI flags.
///
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PartialOptions {
    pub connection_string: Option<String>,
    pub database: Option<PartialDatabaseConfig>,
    pub root_dir: Option<PathBuf>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub since: Option<String>,
    pub check_clean: Option<Vec<CheckClean>>,
    pub lazy: Option<bool>,
    pub default_type: Option<String>,
    pub type_overrides: Option<BTreeMap<String, String>>,
    pub type_parsers: Option<BTreeMap<String, BuiltinParser>>,
    pub sample_values: Option<BTreeMap<String, String>>,
    pub log: Option<LogConfig>,
    /// Keys that match no option
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl PartialOptions {
    ///
    /// Values set in `overlay` win over values set in `self`
    ///
    pub fn overlay(self, overlay: PartialOptions) -> PartialOptions {
        PartialOptions {
            connection_string: overlay.connection_string.or(self.connection_string),
            database: overlay.database.or(self.database),
            root_dir: overlay.root_dir.or(self.root_dir),
            include: overlay.include.or(self.include),
            exclude: overlay.exclude.or(self.exclude),
            since: overlay.since.or(self.since),
            check_clean: overlay.check_clean.or(self.check_clean),
            lazy: overlay.lazy.or(self.lazy),
            default_type: overlay.default_type.or(self.default_type),
            type_overrides: overlay.type_overrides.or(self.type_overrides),
            type_parsers: overlay.type_parsers.or(self.type_parsers),
            sample_values: overlay.sample_values.or(self.sample_values),
            log: overlay.log.or(self.log),
            unknown: self.unknown.into_iter().chain(overlay.unknown).collect(),
        }
    }

    /// Config defaults to a file called `typegen.toml` in the current directory.
    /// Supports TOML and JSON.
    /// Variable names should match the struct field names.
    ///
    /// ENV vars can be used to override file settings.
    ///
    /// ENV vars must be prefixed with `TYPEGEN_`.
    ///
    pub fn load(path: &str) -> Result<PartialOptions, Error> {
        // For parsing top-level values such as TYPEGEN_ROOT_DIR
        // and for parsing nested env values such as TYPEGEN_DATABASE__STATEMENT_TIMEOUT
        let env_source = Environment::with_prefix(TYPEGEN_PREFIX)
            .try_parsing(true)
            .separator("__")
            .prefix_separator("_")
            .list_separator(",")
            .with_list_parse_key("include")
            .with_list_parse_key("exclude")
            .with_list_parse_key("check_clean");

        let partial: Self = Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(env_source)
            .build()?
            .try_deserialize()
            .map_err(|err| match err {
                config::ConfigError::Message(ref s) if s.contains("unknown variant") => {
                    let (name, value) = extract_invalid_field(s);
                    ConfigError::InvalidParameter { name, value }
                }
                _ => err.into(),
            })?;

        Ok(partial)
    }
}

/// Explicit defaults for every option
#[derive(Clone, Debug, PartialEq)]
pub struct Defaults {
    pub connection_string: String,
    pub root_dir: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub check_clean: Vec<CheckClean>,
    pub default_type: String,
    pub sample_values: SampleValues,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            connection_string: DatabaseConfig::default_connection_string(),
            root_dir: PathBuf::from("src"),
            include: vec!["**/*.{ts,sql}".to_string()],
            exclude: vec!["**/node_modules/**".to_string()],
            check_clean: vec![CheckClean::BeforeMigrate, CheckClean::After],
            default_type: "unknown".to_string(),
            sample_values: default_sample_values(),
        }
    }
}

/// Fully resolved options for one generation run
#[derive(Clone)]
pub struct Options {
    pub database: DatabaseConfig,
    pub root_dir: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub since: Option<String>,
    pub check_clean: Vec<CheckClean>,
    pub error_policy: ErrorPolicy,
    pub default_type: String,
    pub type_overrides: BTreeMap<String, String>,
    pub type_parsers: TypeParsers,
    pub sample_values: SampleValues,
    pub logger: Arc<dyn Logger>,
    pub log: LogConfig,
}

impl Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("database", &self.database.to_string())
            .field("root_dir", &self.root_dir)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("since", &self.since)
            .field("check_clean", &self.check_clean)
            .field("error_policy", &self.error_policy)
            .field("default_type", &self.default_type)
            .field("type_overrides", &self.type_overrides)
            .field("type_parsers", &self.type_parsers)
            .finish_non_exhaustive()
    }
}

/// Resolved options plus anything worth telling the user about how they were resolved
#[derive(Debug)]
pub struct Resolved {
    pub options: Options,
    pub warnings: Vec<String>,
}

impl Options {
    ///
    /// Merge user supplied options over explicit defaults.
    ///
    /// Pure: nothing is read from the environment or the file system here.
    ///
    pub fn resolve(partial: PartialOptions, defaults: &Defaults) -> Result<Resolved, ConfigError> {
        let mut warnings = vec![];

        if !partial.unknown.is_empty() {
            let keys: Vec<&str> = partial.unknown.keys().map(String::as_str).collect();
            warnings.push(format!("Unexpected configuration keys: {}", keys.join(", ")));
        }

        let connection_string = match partial.connection_string {
            Some(connection_string) => connection_string,
            None => {
                warnings.push(format!(
                    "Using default connection string of {}",
                    defaults.connection_string
                ));
                defaults.connection_string.clone()
            }
        };

        if connection_string.contains([' ', '\'', '"']) {
            return Err(ConfigError::InvalidConnectionString);
        }

        let database =
            DatabaseConfig::merge(connection_string, &partial.database.unwrap_or_default());

        let type_parsers = match partial.type_parsers {
            Some(named) => {
                let mut parsers = TypeParsers::recommended();
                for (type_name, builtin) in named {
                    parsers.register_builtin(&type_name, builtin);
                }
                parsers
            }
            None => TypeParsers::recommended(),
        };

        let sample_values = match partial.sample_values {
            Some(overrides) => {
                let mut samples = defaults.sample_values.clone();
                samples.extend(overrides);
                samples
            }
            None => defaults.sample_values.clone(),
        };

        let check_clean = partial
            .check_clean
            .unwrap_or_else(|| defaults.check_clean.clone())
            .into_iter()
            .filter(|point| *point != CheckClean::None)
            .collect();

        Ok(Resolved {
            options: Options {
                database,
                root_dir: partial.root_dir.unwrap_or_else(|| defaults.root_dir.clone()),
                include: partial.include.unwrap_or_else(|| defaults.include.clone()),
                exclude: partial.exclude.unwrap_or_else(|| defaults.exclude.clone()),
                since: partial.since,
                check_clean,
                error_policy: ErrorPolicy::from_lazy(partial.lazy.unwrap_or(false)),
                default_type: partial
                    .default_type
                    .unwrap_or_else(|| defaults.default_type.clone()),
                type_overrides: partial.type_overrides.unwrap_or_default(),
                type_parsers,
                sample_values,
                logger: Arc::new(TracingLogger),
                log: partial.log.unwrap_or_default(),
            },
            warnings,
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_root_dir(mut self, root_dir: impl AsRef<Path>) -> Self {
        self.root_dir = root_dir.as_ref().to_path_buf();
        self
    }

    pub fn should_check_clean(&self, point: CheckClean) -> bool {
        self.check_clean.contains(&point)
    }
}

///
/// Extracts the field name and value from a config::ConfigError::Message
/// This is called in `load` if a ConfigError message contains the string `unknown variant`
///
/// Error string is `unknown variant `{value}`, expected one of ... for key `{name}``
///
fn extract_invalid_field(input: &str) -> (String, String) {
    let re = match Regex::new(r"unknown variant `([^`]*)`.*key `([^`]*)`") {
        Ok(re) => re,
        Err(_) => return ("unknown".to_string(), "".to_string()),
    };

    match re.captures(input) {
        Some(caps) => (caps[2].to_string(), caps[1].to_string()),
        None => ("unknown".to_string(), "".to_string()),
    }
}
