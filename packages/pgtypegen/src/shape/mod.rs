use crate::extract::{QueryRecord, TagKind};
use crate::infer::{HostType, InferredColumn, InferredParam, InferredQuery};
use heck::ToUpperCamelCase;
use std::collections::HashSet;
use std::path::Path;

/// A query with its inferred columns
#[derive(Clone, Debug, PartialEq)]
pub struct DescribedQuery {
    pub record: QueryRecord,
    pub inferred: InferredQuery,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapeColumn {
    pub name: String,
    pub not_null: bool,
    pub host_type: HostType,
}

/// Ordered result columns, compared structurally
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<ShapeColumn>);

impl Shape {
    pub fn of(columns: &[InferredColumn]) -> Shape {
        Shape(
            columns
                .iter()
                .map(|c| ShapeColumn {
                    name: c.name.clone(),
                    not_null: c.not_null,
                    host_type: c.host_type.clone(),
                })
                .collect(),
        )
    }
}

/// A shape with its declaration name and every query that produces it
#[derive(Clone, Debug, PartialEq)]
pub struct NamedShape {
    pub name: String,
    pub shape: Shape,
    /// Columns of the first contributing query, used for documentation
    pub columns: Vec<InferredColumn>,
    pub params: Vec<InferredParam>,
    pub queries: Vec<QueryRecord>,
}

///
/// Group one file's queries by shape and name each group.
///
/// Groups keep the order of their first query. A group whose name is already taken is suffixed
/// with the line of its first query, so names only move when that query moves.
///
pub fn group(queries: Vec<DescribedQuery>) -> Vec<NamedShape> {
    let mut groups: Vec<(String, NamedShape)> = vec![];

    for query in queries {
        let shape = Shape::of(&query.inferred.columns);

        match groups.iter_mut().find(|(_, group)| group.shape == shape) {
            Some((_, group)) => group.queries.push(query.record),
            None => {
                let base = base_name(&query.record, &query.inferred);
                groups.push((
                    base,
                    NamedShape {
                        name: String::new(),
                        shape,
                        columns: query.inferred.columns,
                        params: query.inferred.params,
                        queries: vec![query.record],
                    },
                ));
            }
        }
    }

    let mut taken = HashSet::new();

    groups
        .into_iter()
        .map(|(base, mut group)| {
            let line = group.queries.first().map(|q| q.line).unwrap_or(0);
            group.name = unique_name(&base, line, &taken);
            taken.insert(group.name.clone());
            group
        })
        .collect()
}

fn unique_name(base: &str, line: usize, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_owned();
    }

    let suffixed = format!("{base}_{line}");
    if !taken.contains(&suffixed) {
        return suffixed;
    }

    (2..)
        .map(|n| format!("{suffixed}_{n}"))
        .find(|name| !taken.contains(name))
        .unwrap_or(suffixed)
}

///
/// Declaration name before collisions are resolved.
///
/// `.sql` files are named after the file. Otherwise source tables are joined with `_`. When no
/// column can be traced to a table, column names are appended so computed results over the same
/// table stay distinguishable. With no tables at all the column names are the name.
///
pub fn base_name(record: &QueryRecord, inferred: &InferredQuery) -> String {
    if record.tag_kind == TagKind::SqlFile {
        if let Some(name) = file_stem_name(&record.file) {
            return name;
        }
    }

    let column_names: Vec<&str> = inferred
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| is_identifier(name))
        .collect();

    if !inferred.tables.is_empty() {
        let mut name = inferred
            .tables
            .iter()
            .map(|t| t.to_upper_camel_case())
            .collect::<Vec<_>>()
            .join("_");

        let has_provenance = inferred.columns.iter().any(|c| c.source.is_some());
        if !has_provenance && !column_names.is_empty() {
            name.push('_');
            name.push_str(&column_names.join("_"));
        }
        return name;
    }

    if column_names.is_empty() {
        return "Column".to_string();
    }

    column_names
        .iter()
        .map(|name| name.to_upper_camel_case())
        .collect::<Vec<_>>()
        .join("_")
}

fn file_stem_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = stem.to_upper_camel_case();
    (!name.is_empty()).then_some(name)
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
