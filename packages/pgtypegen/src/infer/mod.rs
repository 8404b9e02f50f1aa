mod expr;
mod host_type;
mod sample;

pub use expr::QueryAnalysis;
pub use host_type::{direct_rule, HostType};
pub use sample::{
    classify, default_sample_values, BuiltinParser, Decoded, ParseFn, SampleResolver,
    SampleValues, TypeParser, TypeParsers, DEFAULT_SAMPLE_INPUT,
};

use crate::catalog::{Catalog, TypeInfo, TypeKind};
use crate::config::{ErrorPolicy, Options};
use crate::describe::Description;
use crate::error::InferError;
use crate::log::INFER;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

// Guards against self-referencing domains and arrays
const MAX_TYPE_DEPTH: usize = 8;

/// A result column with its nullability and TypeScript type decided
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InferredColumn {
    pub name: String,
    pub not_null: bool,
    /// `pg_type.typname`
    pub pg_type_name: String,
    /// `format_type` text, e.g. `integer` or `character varying`
    pub regtype: String,
    pub host_type: HostType,
    /// `schema.table.column` when the column has provenance
    pub source: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InferredParam {
    pub regtype: String,
    pub host_type: HostType,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferredQuery {
    pub columns: Vec<InferredColumn>,
    pub params: Vec<InferredParam>,
    /// Source tables, from the FROM clause when it can be read, otherwise from provenance
    pub tables: Vec<String>,
    /// Columns that degraded to the default type
    pub warnings: Vec<String>,
}

///
/// Decides nullability and TypeScript types for described queries.
///
/// Physical columns take their not-null flag from the catalog. Everything else is nullable
/// unless it is a non-null literal.
///
pub struct InferenceEngine<'a> {
    catalog: &'a Catalog,
    resolver: SampleResolver,
    type_overrides: BTreeMap<String, String>,
    policy: ErrorPolicy,
}

impl<'a> InferenceEngine<'a> {
    pub fn new(catalog: &'a Catalog, options: &Options) -> Self {
        let resolver = SampleResolver::resolve(&options.type_parsers, &options.sample_values);
        InferenceEngine {
            catalog,
            resolver,
            type_overrides: options.type_overrides.clone(),
            policy: options.error_policy,
        }
    }

    pub fn with_resolver(
        catalog: &'a Catalog,
        resolver: SampleResolver,
        type_overrides: BTreeMap<String, String>,
        policy: ErrorPolicy,
    ) -> Self {
        InferenceEngine {
            catalog,
            resolver,
            type_overrides,
            policy,
        }
    }

    pub fn infer(&self, sql: &str, description: &Description) -> Result<InferredQuery, InferError> {
        let analysis = QueryAnalysis::analyse(sql);
        let column_count = description.columns.len();

        let mut inferred = InferredQuery::default();

        for (index, descriptor) in description.columns.iter().enumerate() {
            let type_info = self.type_info(descriptor.type_oid);
            let (pg_type_name, regtype) = match type_info {
                Some(info) => (info.name.clone(), info.regtype.clone()),
                None => (String::new(), format!("oid {}", descriptor.type_oid)),
            };

            let host_type = match type_info {
                Some(info) => self.host_type(info, 0),
                None => HostType::Unknown,
            };

            if host_type.is_unknown() {
                match self.policy {
                    ErrorPolicy::Strict if type_info.is_none() => {
                        return Err(InferError::UnknownOid {
                            oid: descriptor.type_oid,
                        })
                    }
                    ErrorPolicy::Strict => {
                        return Err(InferError::UnknownType {
                            column: descriptor.name.clone(),
                            pg_type: regtype,
                        })
                    }
                    ErrorPolicy::Lazy => inferred.warnings.push(format!(
                        "Column {} of type {regtype} has no known TypeScript type",
                        descriptor.name
                    )),
                }
            }

            let source = match (descriptor.table_oid, descriptor.column_id) {
                (Some(table_oid), Some(column_id)) => self.catalog.column_info(table_oid, column_id),
                _ => None,
            };

            let not_null = if analysis.all_nullable {
                false
            } else {
                match source {
                    Some(column) if analysis.is_nullable_table(&column.table) => false,
                    Some(column) => {
                        column.not_null || analysis.is_where_not_null(&column.table, &column.column)
                    }
                    None => analysis.is_literal_not_null(index, column_count),
                }
            };

            if let Some(column) = source {
                if !inferred.tables.contains(&column.table) && analysis.tables.is_empty() {
                    inferred.tables.push(column.table.clone());
                }
            }

            inferred.columns.push(InferredColumn {
                name: descriptor.name.clone(),
                not_null,
                pg_type_name,
                regtype,
                host_type,
                source: source.map(|column| column.qualified_name()),
            });
        }

        if !analysis.tables.is_empty() {
            inferred.tables = analysis.tables;
        }

        inferred.params = description
            .params
            .iter()
            .map(|oid| match self.type_info(*oid) {
                Some(info) => InferredParam {
                    regtype: info.regtype.clone(),
                    host_type: self.host_type(info, 0),
                },
                None => InferredParam {
                    regtype: format!("oid {oid}"),
                    host_type: HostType::Unknown,
                },
            })
            .collect();

        debug!(
            target: INFER,
            msg = "Inferred query",
            columns = inferred.columns.len(),
            params = inferred.params.len()
        );

        Ok(inferred)
    }

    fn type_info(&self, oid: u32) -> Option<&TypeInfo> {
        self.catalog.type_info(oid)
    }

    ///
    /// Overrides first, then the structure of the type (enum, array, domain),
    /// then the direct rules, then the sample resolver.
    ///
    fn host_type(&self, info: &TypeInfo, depth: usize) -> HostType {
        if let Some(text) = self
            .type_overrides
            .get(&info.name)
            .or_else(|| self.type_overrides.get(&info.regtype))
        {
            return HostType::Custom(text.clone());
        }

        if depth > MAX_TYPE_DEPTH {
            return HostType::Unknown;
        }

        match info.kind {
            TypeKind::Enum => return HostType::Union(info.enum_labels.clone()),
            TypeKind::Domain => {
                if let Some(base) = info.base.and_then(|oid| self.type_info(oid)) {
                    return self.host_type(base, depth + 1);
                }
            }
            _ => {}
        }

        if info.name.starts_with('_') {
            if let Some(element) = info.element.and_then(|oid| self.type_info(oid)) {
                return HostType::Array(Box::new(self.host_type(element, depth + 1)));
            }
        }

        if let Some(host_type) = direct_rule(&info.name) {
            return host_type;
        }

        self.resolver
            .host_type(&info.name)
            .cloned()
            .unwrap_or(HostType::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::{base_type, column};
    use crate::describe::ColumnDescriptor;
    use pretty_assertions::assert_eq;

    const TEST_TABLE: u32 = 16384;
    const OTHER_TABLE: u32 = 16390;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default();
        catalog.insert_type(base_type(16, "bool", "boolean"));
        catalog.insert_type(base_type(20, "int8", "bigint"));
        catalog.insert_type(base_type(23, "int4", "integer"));
        catalog.insert_type(base_type(25, "text", "text"));
        catalog.insert_type(base_type(1082, "date", "date"));
        catalog.insert_type(base_type(600, "point", "point"));
        catalog.insert_type(TypeInfo {
            element: Some(25),
            ..base_type(1009, "_text", "text[]")
        });
        catalog.insert_type(TypeInfo {
            kind: TypeKind::Enum,
            enum_labels: vec!["happy".into(), "sad".into()],
            ..base_type(17000, "mood", "mood")
        });
        catalog.insert_type(TypeInfo {
            kind: TypeKind::Domain,
            base: Some(25),
            ..base_type(17010, "email", "email")
        });

        catalog.insert_column(TEST_TABLE, 1, column("public", "test_table", "a", 23, true));
        catalog.insert_column(TEST_TABLE, 2, column("public", "test_table", "b", 23, false));
        catalog.insert_column(OTHER_TABLE, 1, column("public", "other", "c", 25, true));
        catalog
    }

    fn physical(name: &str, type_oid: u32, table_oid: u32, column_id: i16) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.into(),
            type_oid,
            table_oid: Some(table_oid),
            column_id: Some(column_id),
        }
    }

    fn computed(name: &str, type_oid: u32) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.into(),
            type_oid,
            table_oid: None,
            column_id: None,
        }
    }

    fn engine(catalog: &Catalog, policy: ErrorPolicy) -> InferenceEngine<'_> {
        let resolver =
            SampleResolver::resolve(&TypeParsers::recommended(), &default_sample_values());
        InferenceEngine::with_resolver(catalog, resolver, BTreeMap::new(), policy)
    }

    fn nullability(query: &InferredQuery) -> Vec<(&str, bool)> {
        query
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.not_null))
            .collect()
    }

    #[test]
    fn not_null_comes_from_catalog() {
        let catalog = catalog();
        let description = Description {
            columns: vec![physical("a", 23, TEST_TABLE, 1), physical("b", 23, TEST_TABLE, 2)],
            params: vec![],
        };

        let query = engine(&catalog, ErrorPolicy::Strict)
            .infer("select a, b from test_table", &description)
            .unwrap();

        assert_eq!(nullability(&query), vec![("a", true), ("b", false)]);
        assert_eq!(query.columns[0].source.as_deref(), Some("public.test_table.a"));
        assert_eq!(query.columns[0].regtype, "integer");
        assert_eq!(query.tables, vec!["test_table"]);
    }

    #[test]
    fn literal_nullability() {
        let catalog = catalog();
        let description = Description {
            columns: vec![computed("a", 23), computed("b", 23)],
            params: vec![],
        };

        let query = engine(&catalog, ErrorPolicy::Strict)
            .infer("select 1 as a, null::integer as b", &description)
            .unwrap();

        assert_eq!(nullability(&query), vec![("a", true), ("b", false)]);
        assert_eq!(query.columns[0].host_type, HostType::Number);
    }

    #[test]
    fn aggregates_are_nullable() {
        let catalog = catalog();
        let description = Description {
            columns: vec![computed("sum", 20)],
            params: vec![],
        };

        let query = engine(&catalog, ErrorPolicy::Strict)
            .infer("select sum(a) from test_table", &description)
            .unwrap();

        assert_eq!(nullability(&query), vec![("sum", false)]);
        assert_eq!(query.columns[0].host_type, HostType::Number);
        assert_eq!(query.tables, vec!["test_table"]);
    }

    #[test]
    fn outer_join_demotes_nullable_side() {
        let catalog = catalog();
        let description = Description {
            columns: vec![physical("a", 23, TEST_TABLE, 1), physical("c", 25, OTHER_TABLE, 1)],
            params: vec![],
        };

        let query = engine(&catalog, ErrorPolicy::Strict)
            .infer(
                "select t.a, o.c from test_table t left join other o on o.c = t.b::text",
                &description,
            )
            .unwrap();

        assert_eq!(nullability(&query), vec![("a", true), ("c", false)]);
        assert_eq!(query.tables, vec!["test_table", "other"]);
    }

    #[test]
    fn where_clause_refines_provenance_columns() {
        let catalog = catalog();
        let description = Description {
            columns: vec![physical("b", 23, TEST_TABLE, 2)],
            params: vec![23],
        };

        let query = engine(&catalog, ErrorPolicy::Strict)
            .infer("select b from test_table where b = $1", &description)
            .unwrap();

        assert_eq!(nullability(&query), vec![("b", true)]);
        assert_eq!(
            query.params,
            vec![InferredParam {
                regtype: "integer".into(),
                host_type: HostType::Number
            }]
        );
    }

    #[test]
    fn structural_types() {
        let catalog = catalog();
        let description = Description {
            columns: vec![
                computed("tags", 1009),
                computed("mood", 17000),
                computed("email", 17010),
                computed("day", 1082),
            ],
            params: vec![],
        };

        let query = engine(&catalog, ErrorPolicy::Strict)
            .infer("select tags, mood, email, day from somewhere", &description)
            .unwrap();

        let host_types: Vec<_> = query.columns.iter().map(|c| c.host_type.clone()).collect();
        assert_eq!(
            host_types,
            vec![
                HostType::Array(Box::new(HostType::String)),
                HostType::Union(vec!["happy".into(), "sad".into()]),
                HostType::String,
                HostType::Date,
            ]
        );
    }

    #[test]
    fn unknown_type_follows_error_policy() {
        let catalog = catalog();
        let description = Description {
            columns: vec![computed("p", 600)],
            params: vec![],
        };

        let strict = engine(&catalog, ErrorPolicy::Strict).infer("select point(1,2) as p", &description);
        assert_eq!(
            strict,
            Err(InferError::UnknownType {
                column: "p".into(),
                pg_type: "point".into()
            })
        );

        let lazy = engine(&catalog, ErrorPolicy::Lazy)
            .infer("select point(1,2) as p", &description)
            .unwrap();
        assert_eq!(lazy.columns[0].host_type, HostType::Unknown);
        assert_eq!(lazy.warnings.len(), 1);
    }

    #[test]
    fn overrides_win() {
        let catalog = catalog();
        let description = Description {
            columns: vec![computed("p", 600), computed("n", 23)],
            params: vec![],
        };

        let mut overrides = BTreeMap::new();
        overrides.insert("point".to_string(), "{x: number, y: number}".to_string());
        overrides.insert("integer".to_string(), "MyInt".to_string());

        let resolver = SampleResolver::resolve(&TypeParsers::new(), &default_sample_values());
        let engine = InferenceEngine::with_resolver(&catalog, resolver, overrides, ErrorPolicy::Strict);
        let query = engine.infer("select point(1,2) as p, 1 as n", &description).unwrap();

        assert_eq!(
            query.columns[0].host_type,
            HostType::Custom("{x: number, y: number}".into())
        );
        assert_eq!(query.columns[1].host_type, HostType::Custom("MyInt".into()));
    }
}
