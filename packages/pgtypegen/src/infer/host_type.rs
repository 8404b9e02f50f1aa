use serde::Serialize;
use std::fmt::Write;

/// The TypeScript runtime type a decoded Postgres value maps to
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    Number,
    String,
    Boolean,
    BigInt,
    Date,
    Json,
    Buffer,
    Array(Box<HostType>),
    /// Labels of a Postgres enum
    Union(Vec<String>),
    /// Verbatim TypeScript text from a configured override
    Custom(String),
    Unknown,
}

impl HostType {
    pub fn is_unknown(&self) -> bool {
        match self {
            HostType::Unknown => true,
            HostType::Array(element) => element.is_unknown(),
            _ => false,
        }
    }

    ///
    /// TypeScript text for this type.
    /// `default_type` is used wherever the type could not be determined.
    ///
    pub fn render(&self, default_type: &str) -> String {
        match self {
            HostType::Number => "number".to_string(),
            HostType::String => "string".to_string(),
            HostType::Boolean => "boolean".to_string(),
            HostType::BigInt => "bigint".to_string(),
            HostType::Date => "Date".to_string(),
            HostType::Json => "unknown".to_string(),
            HostType::Buffer => "Buffer".to_string(),
            HostType::Array(element) => match **element {
                HostType::Union(_) | HostType::Custom(_) => {
                    format!("Array<{}>", element.render(default_type))
                }
                _ => format!("{}[]", element.render(default_type)),
            },
            HostType::Union(labels) if labels.is_empty() => "never".to_string(),
            HostType::Union(labels) => {
                labels.iter().enumerate().fold(String::new(), |mut out, (i, label)| {
                    if i > 0 {
                        out.push_str(" | ");
                    }
                    let _ = write!(out, "'{}'", label.replace('\\', "\\\\").replace('\'', "\\'"));
                    out
                })
            }
            HostType::Custom(text) => text.clone(),
            HostType::Unknown => default_type.to_string(),
        }
    }
}

///
/// Direct Postgres type name (`pg_type.typname`) to host type rules.
///
/// Types whose runtime shape depends on the configured decoders (int8, numeric, date/time, interval)
/// are deliberately absent so the Type-Sample Resolver decides them.
///
pub fn direct_rule(type_name: &str) -> Option<HostType> {
    let host_type = match type_name {
        "bool" => HostType::Boolean,

        "int2" | "int4" | "float4" | "float8" | "oid" | "xid" | "cid" | "regproc"
        | "regclass" | "regtype" => HostType::Number,

        "text" | "varchar" | "bpchar" | "char" | "name" | "uuid" | "citext" | "money" | "bit"
        | "varbit" | "inet" | "cidr" | "macaddr" | "macaddr8" | "time" | "timetz" | "xml"
        | "tsvector" | "tsquery" | "unknown" => HostType::String,

        "json" | "jsonb" => HostType::Json,

        "bytea" => HostType::Buffer,

        _ => return None,
    };

    Some(host_type)
}
