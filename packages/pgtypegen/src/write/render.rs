use crate::infer::InferredColumn;
use crate::shape::{is_identifier, NamedShape};
use std::fmt::Write;

const QUERY_DOC_LIMIT: usize = 100;
const QUERY_DOC_KEEP: usize = 40;

///
/// Query text as it appears in doc comments: whitespace collapsed, backticks escaped,
/// long text cut in the middle.
///
pub fn query_doc(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");

    let chars: Vec<char> = collapsed.chars().collect();
    let text = if chars.len() > QUERY_DOC_LIMIT {
        let head: String = chars[..QUERY_DOC_KEEP].iter().collect();
        let tail: String = chars[chars.len() - QUERY_DOC_KEEP..].iter().collect();
        format!("{head}... [truncated] ...{tail}")
    } else {
        collapsed
    };

    text.replace('`', "\\`").replace("*/", "*\\/")
}

/// Property key, quoted when it is not a valid identifier
pub fn property_name(name: &str) -> String {
    if is_identifier(name) {
        name.to_owned()
    } else {
        format!("'{}'", name.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

fn property_doc(column: &InferredColumn) -> String {
    let mut parts = vec![];
    if let Some(source) = &column.source {
        parts.push(format!("column: `{source}`"));
    }
    if column.not_null {
        parts.push("not null: `true`".to_string());
    }
    parts.push(format!("regtype: `{}`", column.regtype));
    parts.join(", ")
}

pub fn property_type(column: &InferredColumn, default_type: &str) -> String {
    let host_type = column.host_type.render(default_type);
    if column.not_null {
        host_type
    } else {
        format!("{host_type} | null")
    }
}

///
/// `export interface` declaration for a shape, every line prefixed with `indent`.
/// No trailing newline.
///
pub fn interface(shape: &NamedShape, default_type: &str, indent: &str) -> String {
    let mut out = String::new();

    let queries: Vec<String> = shape.queries.iter().map(|q| query_doc(&q.raw_sql)).collect();
    match queries.as_slice() {
        [single] => {
            let _ = writeln!(out, "{indent}/** - query: `{single}` */");
        }
        many => {
            let _ = writeln!(out, "{indent}/**");
            let _ = writeln!(out, "{indent} * queries:");
            for query in many {
                let _ = writeln!(out, "{indent} * - `{query}`");
            }
            let _ = writeln!(out, "{indent} */");
        }
    }

    let _ = write!(out, "{indent}export interface {} {{", shape.name);

    for (i, column) in shape.columns.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(
            out,
            "\n{indent}  /** {} */\n{indent}  {}: {}",
            property_doc(column),
            property_name(&column.name),
            property_type(column, default_type)
        );
    }

    let _ = write!(out, "\n{indent}}}");
    out
}
