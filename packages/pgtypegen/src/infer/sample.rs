//! Type-Sample Resolver.
//!
//! A decoder is whatever the application registers to turn Postgres text output into a runtime value.
//! The resolver feeds each decoder a sample literal for its type and classifies what comes back, which
//! tells the inference engine what TypeScript type the application will actually see.

use super::host_type::HostType;
use crate::error::ConfigError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

/// Sample input used when the sample table has no entry for a type
pub const DEFAULT_SAMPLE_INPUT: &str = "";

/// Runtime value produced by a decoder
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Null,
    Number(f64),
    String(String),
    Boolean(bool),
    BigInt(i128),
    Date(NaiveDateTime),
    Json(serde_json::Value),
}

pub type ParseFn = Arc<dyn Fn(&str) -> Result<Decoded, String> + Send + Sync>;

/// Decoders selectable by name from configuration files
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltinParser {
    Number,
    Bigint,
    String,
    Boolean,
    Date,
    Json,
    IntervalSeconds,
}

impl BuiltinParser {
    pub fn parse_fn(self) -> ParseFn {
        match self {
            BuiltinParser::Number => Arc::new(parse_number),
            BuiltinParser::Bigint => Arc::new(|s: &str| {
                s.trim()
                    .parse::<i128>()
                    .map(Decoded::BigInt)
                    .map_err(|e| e.to_string())
            }),
            BuiltinParser::String => Arc::new(|s: &str| Ok(Decoded::String(s.to_owned()))),
            BuiltinParser::Boolean => Arc::new(|s: &str| match s.trim() {
                "t" | "true" => Ok(Decoded::Boolean(true)),
                "f" | "false" => Ok(Decoded::Boolean(false)),
                other => Err(format!("not a boolean: {other}")),
            }),
            BuiltinParser::Date => Arc::new(parse_date),
            BuiltinParser::Json => Arc::new(|s: &str| {
                serde_json::from_str(s)
                    .map(Decoded::Json)
                    .map_err(|e| e.to_string())
            }),
            BuiltinParser::IntervalSeconds => Arc::new(parse_interval_seconds),
        }
    }
}

impl FromStr for BuiltinParser {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parser = match s {
            "number" => BuiltinParser::Number,
            "bigint" => BuiltinParser::Bigint,
            "string" => BuiltinParser::String,
            "boolean" => BuiltinParser::Boolean,
            "date" => BuiltinParser::Date,
            "json" => BuiltinParser::Json,
            "interval-seconds" => BuiltinParser::IntervalSeconds,
            _ => {
                return Err(ConfigError::UnknownTypeParser {
                    name: s.to_string(),
                })
            }
        };
        Ok(parser)
    }
}

#[derive(Clone)]
pub struct TypeParser {
    pub description: String,
    pub parse: ParseFn,
}

impl Debug for TypeParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeParser")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Decoders keyed by Postgres type name (`pg_type.typname`)
#[derive(Clone, Debug, Default)]
pub struct TypeParsers {
    parsers: BTreeMap<String, TypeParser>,
}

impl TypeParsers {
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// The decoders most applications install.
    /// int8 and numeric decode to numbers, date/time types to dates, intervals to seconds.
    ///
    pub fn recommended() -> Self {
        let mut parsers = Self::new();
        for (type_name, builtin) in [
            ("int8", BuiltinParser::Number),
            ("numeric", BuiltinParser::Number),
            ("date", BuiltinParser::Date),
            ("timestamp", BuiltinParser::Date),
            ("timestamptz", BuiltinParser::Date),
            ("interval", BuiltinParser::IntervalSeconds),
        ] {
            parsers.register_builtin(type_name, builtin);
        }
        parsers
    }

    pub fn register_builtin(&mut self, type_name: &str, builtin: BuiltinParser) {
        self.parsers.insert(
            type_name.to_owned(),
            TypeParser {
                description: format!("{builtin:?}"),
                parse: builtin.parse_fn(),
            },
        );
    }

    pub fn register<F>(&mut self, type_name: &str, parse: F)
    where
        F: Fn(&str) -> Result<Decoded, String> + Send + Sync + 'static,
    {
        self.parsers.insert(
            type_name.to_owned(),
            TypeParser {
                description: "custom".to_string(),
                parse: Arc::new(parse),
            },
        );
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TypeParser)> {
        self.parsers.iter()
    }

}

/// Literal samples keyed by Postgres type name
pub type SampleValues = BTreeMap<String, String>;

pub fn default_sample_values() -> SampleValues {
    [
        ("int8", "0"),
        ("date", "2000-01-01"),
        ("interval", "1 hour"),
        ("numeric", "0"),
        ("timestamp", "2000-01-01"),
        ("timestamptz", "2000-01-01"),
        ("varchar", ""),
        ("text", ""),
        ("int2", "0"),
        ("int4", "0"),
        ("float4", "0"),
        ("float8", "0"),
        ("bool", "t"),
        ("money", "$0.00"),
        ("json", "{}"),
        ("jsonb", "{}"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

///
/// Ordered predicates. The first match wins, so a decoder that returns a number is "number"
/// even though a number would also satisfy looser checks further down.
///
fn matchers() -> [(HostType, fn(&Decoded) -> bool); 5] {
    [
        (HostType::Number, |d: &Decoded| {
            matches!(d, Decoded::Number(_) | Decoded::Json(serde_json::Value::Number(_)))
        }),
        (HostType::String, |d: &Decoded| {
            matches!(d, Decoded::String(_) | Decoded::Json(serde_json::Value::String(_)))
        }),
        (HostType::Boolean, |d: &Decoded| {
            matches!(d, Decoded::Boolean(_) | Decoded::Json(serde_json::Value::Bool(_)))
        }),
        (HostType::BigInt, |d: &Decoded| matches!(d, Decoded::BigInt(_))),
        (HostType::Date, |d: &Decoded| matches!(d, Decoded::Date(_))),
    ]
}

pub fn classify(decoded: &Decoded) -> HostType {
    matchers()
        .into_iter()
        .find(|(_, test)| test(decoded))
        .map(|(host_type, _)| host_type)
        .unwrap_or(HostType::Unknown)
}

/// Postgres type name to host type, derived by decoding samples
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleResolver {
    table: BTreeMap<String, HostType>,
}

impl SampleResolver {
    pub fn resolve(parsers: &TypeParsers, samples: &SampleValues) -> Self {
        let table = parsers
            .iter()
            .map(|(type_name, parser)| {
                let sample = samples
                    .get(type_name)
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_SAMPLE_INPUT);

                let host_type = match (parser.parse)(sample) {
                    Ok(decoded) => classify(&decoded),
                    Err(_) => HostType::Unknown,
                };

                (type_name.to_owned(), host_type)
            })
            .collect();

        SampleResolver { table }
    }

    pub fn host_type(&self, type_name: &str) -> Option<&HostType> {
        self.table.get(type_name)
    }
}

fn parse_number(s: &str) -> Result<Decoded, String> {
    let s = s.trim();
    let decimal = Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|e| e.to_string())?;
    decimal
        .to_f64()
        .map(Decoded::Number)
        .ok_or_else(|| format!("{s} is out of range"))
}

fn parse_date(s: &str) -> Result<Decoded, String> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(Decoded::Date(dt.naive_utc()));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Decoded::Date(dt));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| e.to_string())?
        .and_hms_opt(0, 0, 0)
        .map(Decoded::Date)
        .ok_or_else(|| format!("{s} is not a valid date"))
}

static INTERVAL_UNIT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(-?\d+(?:\.\d+)?)\s*(years?|mons?|months?|weeks?|days?|hours?|mins?|minutes?|secs?|seconds?)")
        .ok()
});

static INTERVAL_CLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(-)?(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").ok());

///
/// Postgres interval text (`1 hour`, `2 days 01:00:00`, `-00:00:30`) to a number of seconds.
/// Months and years use the Postgres convention of 30 and 365.25 days.
///
fn parse_interval_seconds(s: &str) -> Result<Decoded, String> {
    let (Some(unit_pattern), Some(clock_pattern)) =
        (INTERVAL_UNIT.as_ref(), INTERVAL_CLOCK.as_ref())
    else {
        return Err(format!("not an interval: {s}"));
    };

    let mut seconds = 0.0;
    let mut matched = false;

    for caps in unit_pattern.captures_iter(s) {
        matched = true;
        let amount: f64 = caps[1].parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
        let unit = &caps[2];
        let factor = if unit.starts_with("year") {
            365.25 * 86_400.0
        } else if unit.starts_with("mon") {
            30.0 * 86_400.0
        } else if unit.starts_with("week") {
            7.0 * 86_400.0
        } else if unit.starts_with("day") {
            86_400.0
        } else if unit.starts_with("hour") {
            3_600.0
        } else if unit.starts_with("min") {
            60.0
        } else {
            1.0
        };
        seconds += amount * factor;
    }

    if let Some(caps) = clock_pattern.captures(s) {
        matched = true;
        let sign = if caps.get(1).is_some() { -1.0 } else { 1.0 };
        let hours: f64 = caps[2].parse().unwrap_or(0.0);
        let minutes: f64 = caps[3].parse().unwrap_or(0.0);
        let secs: f64 = caps[4].parse().unwrap_or(0.0);
        seconds += sign * (hours * 3_600.0 + minutes * 60.0 + secs);
    }

    if matched {
        Ok(Decoded::Number(seconds))
    } else {
        Err(format!("not an interval: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommended_parsers_resolve_with_default_samples() {
        let resolver =
            SampleResolver::resolve(&TypeParsers::recommended(), &default_sample_values());

        assert_eq!(resolver.host_type("int8"), Some(&HostType::Number));
        assert_eq!(resolver.host_type("numeric"), Some(&HostType::Number));
        assert_eq!(resolver.host_type("date"), Some(&HostType::Date));
        assert_eq!(resolver.host_type("timestamptz"), Some(&HostType::Date));
        assert_eq!(resolver.host_type("interval"), Some(&HostType::Number));
        assert_eq!(resolver.host_type("circle"), None);
    }

    #[test]
    fn supplied_sample_table_is_used_instead_of_defaults() {
        let mut parsers = TypeParsers::new();
        parsers.register_builtin("int8", BuiltinParser::Bigint);

        let mut samples = SampleValues::new();
        samples.insert("int8".into(), "9007199254740993".into());

        let resolver = SampleResolver::resolve(&parsers, &samples);
        assert_eq!(resolver.host_type("int8"), Some(&HostType::BigInt));
    }

    #[test]
    fn failing_decoder_resolves_to_unknown() {
        let mut parsers = TypeParsers::new();
        parsers.register_builtin("date", BuiltinParser::Date);

        // No sample for date, so the decoder sees the empty default input and fails
        let resolver = SampleResolver::resolve(&parsers, &SampleValues::new());
        assert_eq!(resolver.host_type("date"), Some(&HostType::Unknown));
    }

    #[test]
    fn custom_decoder_is_classified() {
        let mut parsers = TypeParsers::new();
        parsers.register("point", |s| Ok(Decoded::Json(serde_json::json!({ "raw": s }))));
        parsers.register("citext", |s| Ok(Decoded::String(s.to_lowercase())));

        let resolver = SampleResolver::resolve(&parsers, &default_sample_values());
        assert_eq!(resolver.host_type("point"), Some(&HostType::Unknown));
        assert_eq!(resolver.host_type("citext"), Some(&HostType::String));
    }

    #[test]
    fn interval_text_to_seconds() {
        assert_eq!(parse_interval_seconds("1 hour"), Ok(Decoded::Number(3600.0)));
        assert_eq!(
            parse_interval_seconds("2 days 01:00:30"),
            Ok(Decoded::Number(2.0 * 86_400.0 + 3_630.0))
        );
        assert_eq!(parse_interval_seconds("-00:00:30"), Ok(Decoded::Number(-30.0)));
        assert!(parse_interval_seconds("soon").is_err());
    }

    #[test]
    fn builtin_parser_names() {
        assert_eq!(
            "interval-seconds".parse::<BuiltinParser>().unwrap(),
            BuiltinParser::IntervalSeconds
        );
        assert!("float".parse::<BuiltinParser>().is_err());
    }
}
