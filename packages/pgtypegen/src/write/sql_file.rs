use super::render::{interface, query_doc};
use crate::shape::{is_identifier, NamedShape};
use std::fmt::Write;
use std::path::{Path, PathBuf};

const COMPANION_DIR: &str = "__sql__";

/// `dir/name.sql` has its declarations in `dir/__sql__/name.sql.ts`
pub fn companion_path(sql_path: &Path) -> Option<PathBuf> {
    let dir = sql_path.parent()?;
    let file_name = sql_path.file_name()?.to_str()?;
    Some(dir.join(COMPANION_DIR).join(format!("{file_name}.ts")))
}

///
/// Companion module for a `.sql` file: the row interface plus accessors that read the file once,
/// cache it, and bind `$1`, `$2`, ... from a typed parameter record.
///
pub fn render(shape: &NamedShape, sql_path: &Path, default_type: &str) -> String {
    let name = &shape.name;
    let file_name = sql_path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default();
    let relative = format!("../{file_name}");
    let module = file_name.trim_end_matches(".sql");

    let query = shape
        .queries
        .first()
        .map(|q| query_doc(&q.raw_sql))
        .unwrap_or_default();

    let row = shape
        .columns
        .iter()
        .map(|c| {
            if is_identifier(&c.name) {
                format!("r.{}", c.name)
            } else {
                format!("r['{}']", c.name.replace('\'', "\\'"))
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let has_params = !shape.params.is_empty();
    let values = (1..=shape.params.len())
        .map(|i| format!("params['${i}']"))
        .collect::<Vec<_>>()
        .join(", ");
    let (params_field, options_default) = if has_params {
        ("\n  params,", "")
    } else {
        ("", " = {}")
    };

    let mut out = String::new();

    out.push_str("import {TaggedTemplateLiteralInvocationType} from 'slonik'\n");
    out.push_str("import * as path from 'path'\n");
    out.push_str("import * as fs from 'fs'\n\n");
    out.push_str(&interface(shape, default_type, ""));
    out.push_str("\n\n");

    for (kind, reader, reader_default, call, result_type, sql_expr) in [
        (
            "Sync",
            "readFileSync",
            "defaultReadFileSync",
            format!("get{name}QuerySync()"),
            format!("TaggedTemplateLiteralInvocationType<{name}>"),
            "readFileSync(sqlPath).toString()",
        ),
        (
            "Async",
            "readFile",
            "defaultReadFileAsync",
            format!("await get{name}QueryAsync()"),
            format!("Promise<TaggedTemplateLiteralInvocationType<{name}>>"),
            "(await readFile(sqlPath)).toString()",
        ),
    ] {
        let (mode, asynchronous) = match kind {
            "Sync" => ("synchronously", ""),
            _ => ("asynchronously", "async "),
        };

        let _ = write!(
            out,
            r#"/**
 * Helper which reads the file system {mode} to get a query object for {relative}.
 * (query: `{query}`)
 *
 * Uses `fs` by default and caches the result so the disk is only accessed once. You can pass in a custom `{reader}` function for use-cases where disk access is not possible.
 *
 * @example
 * ```
 * import {{createPool}} from 'slonik'
 * import {{get{name}Query{kind}}} from './path/to/{module}.sql'
 *
 * async function () {{
 *   const pool = createPool('...connection string...')
 *
 *   const result = await pool.query({call})
 *
 *   return result.rows.map(r => [{row}])
 * }}
 * ```
 */
export const get{name}Query{kind} = {asynchronous}({{
  {reader} = {reader_default},{params_field}
}}: Get{name}Query{kind}Options{options_default}): {result_type} => ({{
  sql: {sql_expr},
  type: 'SLONIK_TOKEN_SQL',
  values: [{values}],
}})
"#
        );
        if kind == "Sync" {
            out.push('\n');
        }
    }

    let _ = writeln!(out, "const sqlPath = path.join(__dirname, '{relative}')");
    out.push_str("\nexport interface FileContent {\n  toString(): string\n}\n");

    let params_member = if has_params {
        let _ = write!(out, "\nexport interface Get{name}QueryParams {{\n");
        for (i, param) in shape.params.iter().enumerate() {
            let _ = writeln!(out, "  ${}: {}", i + 1, param.host_type.render(default_type));
        }
        out.push_str("}\n");
        format!("\n  params: Get{name}QueryParams")
    } else {
        String::new()
    };

    let _ = write!(
        out,
        r#"
export interface Get{name}QuerySyncOptions {{
  readFileSync?: (filepath: string) => FileContent{params_member}
}}

export interface Get{name}QueryAsyncOptions {{
  readFile?: (filepath: string) => Promise<FileContent>{params_member}
}}

export const _queryCache = new Map<string, string>()

export const defaultReadFileSync = (filepath: string) => {{
  const cached = _queryCache.get(filepath)
  if (cached) {{
    return cached
  }}
  const content = fs.readFileSync(filepath).toString()
  _queryCache.set(filepath, content)
  return content
}}

export const defaultReadFileAsync = async (filepath: string) => {{
  const cached = _queryCache.get(filepath)
  if (cached) {{
    return cached
  }}
  const content = (await fs.promises.readFile(filepath)).toString()
  _queryCache.set(filepath, content)
  return content
}}
"#
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{QueryRecord, TagKind};
    use crate::infer::{HostType, InferredColumn, InferredParam};
    use crate::shape::Shape;

    fn shape(params: Vec<InferredParam>) -> NamedShape {
        let columns = vec![
            InferredColumn {
                name: "a".into(),
                not_null: true,
                pg_type_name: "int4".into(),
                regtype: "integer".into(),
                host_type: HostType::Number,
                source: Some("public.test_table.a".into()),
            },
            InferredColumn {
                name: "b".into(),
                not_null: false,
                pg_type_name: "text".into(),
                regtype: "text".into(),
                host_type: HostType::String,
                source: Some("public.test_table.b".into()),
            },
        ];
        NamedShape {
            name: "TestTable".into(),
            shape: Shape::of(&columns),
            columns,
            params,
            queries: vec![QueryRecord {
                file: PathBuf::from("src/test-table.sql"),
                range: 0..0,
                line: 1,
                raw_sql: "select a, b from test_table where a = $1 and b = $2".into(),
                annotation: None,
                tag_end: 0,
                tag_kind: TagKind::SqlFile,
                param_count: 2,
            }],
        }
    }

    #[test]
    fn companion_lives_next_to_sql_file() {
        assert_eq!(
            companion_path(Path::new("src/queries/test-table.sql")),
            Some(PathBuf::from("src/queries/__sql__/test-table.sql.ts"))
        );
    }

    #[test]
    fn params_are_typed_and_bound_in_order() {
        let params = vec![
            InferredParam {
                regtype: "integer".into(),
                host_type: HostType::Number,
            },
            InferredParam {
                regtype: "text".into(),
                host_type: HostType::String,
            },
        ];

        let rendered = render(&shape(params), Path::new("src/test-table.sql"), "unknown");

        assert!(rendered.contains("export interface TestTable {\n  /** column: `public.test_table.a`, not null: `true`, regtype: `integer` */\n  a: number\n"));
        assert!(rendered.contains("export interface GetTestTableQueryParams {\n  $1: number\n  $2: string\n}\n"));
        assert!(rendered.contains("values: [params['$1'], params['$2']],"));
        assert!(rendered.contains("}: GetTestTableQuerySyncOptions): TaggedTemplateLiteralInvocationType<TestTable> => ({"));
        assert!(rendered.contains("  readFile = defaultReadFileAsync,\n  params,\n}"));
        assert!(rendered.contains("const sqlPath = path.join(__dirname, '../test-table.sql')"));
        assert!(rendered.contains("return result.rows.map(r => [r.a, r.b])"));
    }

    #[test]
    fn no_params_means_optional_options() {
        let rendered = render(&shape(vec![]), Path::new("src/test-table.sql"), "unknown");

        assert!(rendered.contains("}: GetTestTableQuerySyncOptions = {}): TaggedTemplateLiteralInvocationType<TestTable> => ({"));
        assert!(rendered.contains("values: [],"));
        assert!(!rendered.contains("QueryParams"));
    }
}
