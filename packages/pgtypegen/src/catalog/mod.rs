use crate::error::CatalogError;
use crate::log::CATALOG;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::timeout;
use tokio_postgres::{Client, Row};
use tracing::{debug, info};

const COLUMNS_QUERY: &str = r#"
    SELECT c.oid AS table_oid,
           n.nspname::text AS schema_name,
           c.relname::text AS table_name,
           a.attnum AS attnum,
           a.attname::text AS column_name,
           a.atttypid AS type_oid,
           a.attnotnull AS not_null
      FROM pg_catalog.pg_attribute a
      JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
      JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
     WHERE a.attnum > 0
       AND NOT a.attisdropped
       AND c.relkind IN ('r', 'v', 'm', 'p', 'f')
       AND n.nspname NOT LIKE 'pg_toast%'
"#;

const TYPES_QUERY: &str = r#"
    SELECT t.oid AS type_oid,
           t.typname::text AS type_name,
           format_type(t.oid, NULL) AS regtype,
           t.typtype::text AS type_kind,
           t.typelem AS element_oid,
           t.typbasetype AS base_oid,
           COALESCE(
             (SELECT array_agg(e.enumlabel::text ORDER BY e.enumsortorder)
                FROM pg_catalog.pg_enum e
               WHERE e.enumtypid = t.oid),
             '{}'::text[]
           ) AS enum_labels
      FROM pg_catalog.pg_type t
"#;

/// A physical table column
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub type_oid: u32,
    pub not_null: bool,
}

impl ColumnInfo {
    /// `schema.table.column`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.schema, self.table, self.column)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Base,
    Composite,
    Domain,
    Enum,
    Pseudo,
    Range,
    Multirange,
}

impl TypeKind {
    fn from_typtype(typtype: &str) -> TypeKind {
        match typtype {
            "c" => TypeKind::Composite,
            "d" => TypeKind::Domain,
            "e" => TypeKind::Enum,
            "p" => TypeKind::Pseudo,
            "r" => TypeKind::Range,
            "m" => TypeKind::Multirange,
            _ => TypeKind::Base,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeInfo {
    pub oid: u32,
    /// `pg_type.typname`, e.g. `int4` or `_text`
    pub name: String,
    /// `format_type(oid, null)`, e.g. `integer` or `text[]`
    pub regtype: String,
    pub kind: TypeKind,
    /// Element type for array types
    pub element: Option<u32>,
    /// Underlying type for domains
    pub base: Option<u32>,
    pub enum_labels: Vec<String>,
}

///
/// Column and type metadata for the connected database.
///
/// Loaded once at the start of a run and read-only afterwards.
///
#[derive(Debug, Default)]
pub struct Catalog {
    columns: HashMap<(u32, i16), ColumnInfo>,
    types: HashMap<u32, TypeInfo>,
}

impl Catalog {
    pub async fn load(client: &Client, statement_timeout: Duration) -> Result<Catalog, CatalogError> {
        let column_rows = timeout(statement_timeout, client.query(COLUMNS_QUERY, &[])).await??;
        let type_rows = timeout(statement_timeout, client.query(TYPES_QUERY, &[])).await??;

        let mut catalog = Catalog::default();

        for row in column_rows {
            let (table_oid, attnum, info) = column_from_row(&row)?;
            catalog.insert_column(table_oid, attnum, info);
        }

        for row in type_rows {
            let info = type_from_row(&row)?;
            catalog.types.insert(info.oid, info);
        }

        info!(
            target: CATALOG,
            msg = "Loaded catalog",
            columns = catalog.columns.len(),
            types = catalog.types.len()
        );

        Ok(catalog)
    }

    pub fn insert_column(&mut self, table_oid: u32, attnum: i16, info: ColumnInfo) {
        self.columns.insert((table_oid, attnum), info);
    }

    pub fn insert_type(&mut self, info: TypeInfo) {
        self.types.insert(info.oid, info);
    }

    /// Column identified by the table OID and attribute number reported by a describe
    pub fn column_info(&self, table_oid: u32, attnum: i16) -> Option<&ColumnInfo> {
        self.columns.get(&(table_oid, attnum))
    }

    ///
    /// Columns of `table` in attribute order. `table` may be schema qualified.
    ///
    /// An unqualified name that exists in more than one schema matches nothing.
    ///
    pub fn columns(&self, table: &str) -> Vec<&ColumnInfo> {
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, table),
        };

        let mut matches: Vec<(&(u32, i16), &ColumnInfo)> = self
            .columns
            .iter()
            .filter(|(_, info)| {
                info.table == name && schema.map_or(true, |schema| info.schema == schema)
            })
            .collect();

        let oids: HashSet<u32> = matches.iter().map(|((oid, _), _)| *oid).collect();
        if oids.len() > 1 {
            debug!(target: CATALOG, msg = "Ambiguous table name", table);
            return vec![];
        }

        matches.sort_by_key(|((_, attnum), _)| *attnum);
        matches.into_iter().map(|(_, info)| info).collect()
    }

    pub fn type_info(&self, oid: u32) -> Option<&TypeInfo> {
        self.types.get(&oid)
    }

    pub fn type_name(&self, oid: u32) -> Option<&str> {
        self.types.get(&oid).map(|t| t.name.as_str())
    }
}

fn column_from_row(row: &Row) -> Result<(u32, i16, ColumnInfo), CatalogError> {
    let table_oid: u32 = row.try_get("table_oid")?;
    let attnum: i16 = row.try_get("attnum")?;
    let info = ColumnInfo {
        schema: row.try_get("schema_name")?,
        table: row.try_get("table_name")?,
        column: row.try_get("column_name")?,
        type_oid: row.try_get("type_oid")?,
        not_null: row.try_get("not_null")?,
    };
    Ok((table_oid, attnum, info))
}

fn type_from_row(row: &Row) -> Result<TypeInfo, CatalogError> {
    let kind: String = row.try_get("type_kind")?;
    let element: u32 = row.try_get("element_oid")?;
    let base: u32 = row.try_get("base_oid")?;

    Ok(TypeInfo {
        oid: row.try_get("type_oid")?,
        name: row.try_get("type_name")?,
        regtype: row.try_get("regtype")?,
        kind: TypeKind::from_typtype(&kind),
        element: (element != 0).then_some(element),
        base: (base != 0).then_some(base),
        enum_labels: row.try_get("enum_labels")?,
    })
}
