use super::render::interface;
use crate::extract::QueryRecord;
use crate::shape::NamedShape;
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

pub const NAMESPACE: &str = "queries";
const HEADER: &str = "// Generated by pgtypegen";

static NAMESPACE_START: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"export\s+declare\s+namespace\s+{NAMESPACE}\s*\{{")).ok()
});

///
/// New type argument text for a tag.
///
/// An intersection keeps every member after the first, since those were added by hand. The first
/// member is always replaced: there is no telling a hand-written first member from a stale
/// generated one. Anything else, unions included, is replaced outright.
///
pub fn merge_annotation(existing: Option<&str>, name: &str) -> String {
    let reference = format!("{NAMESPACE}.{name}");

    let existing = match existing {
        Some(existing) => existing,
        None => return reference,
    };

    if !top_level(existing, b'|').is_empty() {
        return reference;
    }

    match top_level(existing, b'&').first() {
        Some(&first) => {
            let rest = existing[first + 1..].trim();
            if rest.is_empty() {
                reference
            } else {
                format!("{reference} & {rest}")
            }
        }
        None => reference,
    }
}

/// Offsets of `separator` outside any brackets, strings or arrows
fn top_level(text: &str, separator: u8) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut positions = vec![];
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;

    for (i, &byte) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if byte == q && bytes.get(i.wrapping_sub(1)) != Some(&b'\\') {
                quote = None;
            }
            continue;
        }

        match byte {
            b'\'' | b'"' | b'`' => quote = Some(byte),
            b'<' | b'(' | b'{' | b'[' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'=' => {}
            b'>' | b')' | b'}' | b']' => depth -= 1,
            b if b == separator && depth == 0 => positions.push(i),
            _ => {}
        }
    }

    positions
}

/// The generated namespace for a file's shapes
pub fn namespace_block(shapes: &[NamedShape], default_type: &str) -> String {
    let mut block = format!("export declare namespace {NAMESPACE} {{\n  {HEADER}\n");
    for shape in shapes {
        block.push('\n');
        block.push_str(&interface(shape, default_type, "  "));
        block.push('\n');
    }
    block.push('}');
    block
}

///
/// Range of an existing generated namespace, from `export` to the closing brace
///
pub fn find_namespace_block(content: &str) -> Option<Range<usize>> {
    let start = NAMESPACE_START.as_ref()?.find(content)?;
    let open = start.end() - 1;
    let close = matching_brace(content.as_bytes(), open)?;
    Some(start.start()..close + 1)
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;

    while let Some(&byte) = bytes.get(i) {
        match byte {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while bytes.get(i).is_some_and(|b| *b != b'\n') {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            b'\'' | b'"' | b'`' => {
                i += 1;
                while bytes.get(i).is_some_and(|b| *b != byte) {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }

    None
}

///
/// Name of the generated interface an annotation refers to, e.g. `TestTable` for
/// `queries.TestTable & {extra: true}`
///
pub fn generated_name(annotation: &str) -> Option<&str> {
    let first = match top_level(annotation, b'&').first() {
        Some(&end) => &annotation[..end],
        None => annotation,
    };
    let name = first.trim().strip_prefix(NAMESPACE)?.strip_prefix('.')?;
    crate::shape::is_identifier(name).then_some(name)
}

///
/// An interface as it stands in an existing block, doc comment and indentation included
///
pub fn existing_interface<'c>(block: &'c str, name: &str) -> Option<&'c str> {
    let pattern = Regex::new(&format!(r"export\s+interface\s+{}\s*\{{", regex::escape(name))).ok()?;
    let found = pattern.find(block)?;
    let close = matching_brace(block.as_bytes(), found.end() - 1)?;

    let mut start = line_start(block, found.start());
    let before = block[..start].trim_end();
    if before.ends_with("*/") {
        if let Some(doc) = before.rfind("/**") {
            start = line_start(block, doc);
        }
    }

    Some(&block[start..close + 1])
}

fn line_start(text: &str, offset: usize) -> usize {
    text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

///
/// The file with every tag annotated and the namespace regenerated.
///
/// Only type argument spans and the namespace block change. Everything else is copied through.
/// Queries in `failed` keep their annotation, and the interface it names is carried over from the
/// existing block. A generated block with nothing left in it is removed.
///
pub fn rewrite(
    content: &str,
    shapes: &[NamedShape],
    failed: &[QueryRecord],
    default_type: &str,
) -> String {
    let mut edits: Vec<(Range<usize>, String)> = vec![];

    for shape in shapes {
        for query in &shape.queries {
            let existing = query.annotation.as_ref().map(|a| a.text.as_str());
            let arguments = format!("<{}>", merge_annotation(existing, &shape.name));

            match &query.annotation {
                Some(annotation) => edits.push((annotation.range.clone(), arguments)),
                None => edits.push((query.tag_end..query.tag_end, arguments)),
            }
        }
    }

    let existing_block = find_namespace_block(content);

    let mut carried: Vec<(&str, &str)> = vec![];
    if let Some(range) = &existing_block {
        let old = &content[range.clone()];
        for query in failed {
            let Some(name) = query.annotation.as_ref().and_then(|a| generated_name(&a.text)) else {
                continue;
            };
            if shapes.iter().any(|shape| shape.name == name)
                || carried.iter().any(|(taken, _)| *taken == name)
            {
                continue;
            }
            if let Some(interface) = existing_interface(old, name) {
                carried.push((name, interface));
            }
        }
    }

    if shapes.is_empty() && carried.is_empty() {
        return match existing_block {
            Some(range) if content[range.clone()].contains(HEADER) => remove_block(content, range),
            _ => content.to_owned(),
        };
    }

    let mut block = namespace_block(shapes, default_type);
    if !carried.is_empty() {
        block.pop();
        for (_, interface) in &carried {
            block.push('\n');
            block.push_str(interface);
            block.push('\n');
        }
        block.push('}');
    }

    let mut output = content.to_owned();
    match existing_block {
        Some(range) => edits.push((range, block)),
        None => {
            let separator = if content.ends_with('\n') { "\n" } else { "\n\n" };
            output = format!("{content}{separator}{block}\n");
        }
    }

    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    for (range, text) in edits {
        output.replace_range(range, &text);
    }

    output
}

/// Drops a block along with the blank lines that set it apart
fn remove_block(content: &str, range: Range<usize>) -> String {
    let before = content[..range.start].trim_end_matches('\n');
    let after = &content[range.end..];

    if after.trim().is_empty() {
        if before.is_empty() {
            String::new()
        } else {
            format!("{before}\n")
        }
    } else {
        format!("{before}{after}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{extract_file, Annotation, QueryRecord};
    use crate::infer::{HostType, InferredColumn};
    use crate::shape::Shape;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn merge_rules() {
        let cases = [
            (None, "queries.TestTable"),
            (Some("{col: string}"), "queries.TestTable"),
            (Some("queries.TestTable"), "queries.TestTable"),
            (Some("queries.Old"), "queries.TestTable"),
            (Some("queries.TestTable | Other"), "queries.TestTable"),
            (Some("Omit<queries.TestTable, 'foo'>"), "queries.TestTable"),
            (Some("queries.Old & {col: string}"), "queries.TestTable & {col: string}"),
            (Some("queries.TestTable & Other"), "queries.TestTable & Other"),
            (
                Some("queries.TestTable & One & Two & {col: string}"),
                "queries.TestTable & One & Two & {col: string}",
            ),
            (Some("{col: string} & Other"), "queries.TestTable & Other"),
            (Some("{} & {bar: string}"), "queries.TestTable & {bar: string}"),
            (Some("{f: (a: A & B) => void}"), "queries.TestTable"),
            (Some("{s: 'a | b'}"), "queries.TestTable"),
        ];

        for (existing, expected) in cases {
            assert_eq!(merge_annotation(existing, "TestTable"), expected, "{existing:?}");
        }
    }

    fn test_table_shape(queries: Vec<QueryRecord>) -> NamedShape {
        let columns = vec![
            InferredColumn {
                name: "foo".into(),
                not_null: true,
                pg_type_name: "int4".into(),
                regtype: "integer".into(),
                host_type: HostType::Number,
                source: Some("public.test_table.foo".into()),
            },
            InferredColumn {
                name: "bar".into(),
                not_null: false,
                pg_type_name: "text".into(),
                regtype: "text".into(),
                host_type: HostType::String,
                source: Some("public.test_table.bar".into()),
            },
        ];
        NamedShape {
            name: "TestTable".into(),
            shape: Shape::of(&columns),
            columns,
            params: vec![],
            queries,
        }
    }

    const EXPECTED_BLOCK: &str = "export declare namespace queries {
  // Generated by pgtypegen

  /** - query: `select foo, bar from test_table` */
  export interface TestTable {
    /** column: `public.test_table.foo`, not null: `true`, regtype: `integer` */
    foo: number

    /** column: `public.test_table.bar`, regtype: `text` */
    bar: string | null
  }
}";

    fn rewrite_source(source: &str) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.ts");
        fs::write(&path, source).unwrap();

        let file = extract_file(&path).unwrap();
        let shape = test_table_shape(file.queries.clone());
        rewrite(&file.content, &[shape], &[], "unknown")
    }

    #[test]
    fn adds_annotation_and_block() {
        let source = "import {sql} from 'slonik'\n\nexport default sql<{} & {bar: string}>`select foo, bar from test_table`\n";

        let expected = format!(
            "import {{sql}} from 'slonik'\n\nexport default sql<queries.TestTable & {{bar: string}}>`select foo, bar from test_table`\n\n{EXPECTED_BLOCK}\n"
        );

        assert_eq!(rewrite_source(source), expected);
    }

    #[test]
    fn rewriting_is_idempotent() {
        let source = "const q = sql`select foo, bar from test_table`";
        let once = rewrite_source(source);
        assert_eq!(
            once,
            format!("const q = sql<queries.TestTable>`select foo, bar from test_table`\n\n{EXPECTED_BLOCK}\n")
        );

        let twice = rewrite_source(&once);
        assert_eq!(twice, once);
    }

    #[test]
    fn existing_block_is_replaced_in_place() {
        let source = "const q = sql<queries.Stale>`select foo, bar from test_table`\n\n\
                      export declare namespace queries {\n  // Generated by pgtypegen\n\n  /** `{` */\n  export interface Stale {}\n}\n\n\
                      export const after = 1\n";

        let expected = format!(
            "const q = sql<queries.TestTable>`select foo, bar from test_table`\n\n{EXPECTED_BLOCK}\n\nexport const after = 1\n"
        );

        assert_eq!(rewrite_source(source), expected);
    }

    #[test]
    fn annotation_span_replaced_exactly() {
        let content = "sql< A & B >`x`";
        let shape = test_table_shape(vec![QueryRecord {
            file: "index.ts".into(),
            range: 12..15,
            line: 1,
            raw_sql: "x".into(),
            annotation: Some(Annotation {
                range: 3..12,
                text: "A & B".into(),
            }),
            tag_end: 3,
            tag_kind: crate::extract::TagKind::Inline,
            param_count: 0,
        }]);

        let output = rewrite(content, &[shape], &[], "unknown");
        assert!(output.starts_with("sql<queries.TestTable & B>`x`\n\n"));
    }

    const CARRIED_INTERFACE: &str = "  /** - query: `select b from test_table` */
  export interface TestTable_2 {
    /** regtype: `integer` */
    b: number | null
  }";

    fn source_with_two_queries() -> String {
        let block = format!(
            "{}\n{CARRIED_INTERFACE}\n}}",
            EXPECTED_BLOCK.strip_suffix('}').unwrap()
        );
        format!(
            "const a = sql<queries.TestTable>`select foo, bar from test_table`\n\
             const b = sql<queries.TestTable_2 & {{x: 1}}>`select b from test_table`\n\n{block}\n"
        )
    }

    #[test]
    fn failed_query_keeps_its_interface() {
        let source = source_with_two_queries();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.ts");
        fs::write(&path, &source).unwrap();

        let file = extract_file(&path).unwrap();
        let shape = test_table_shape(vec![file.queries[0].clone()]);
        let failed = vec![file.queries[1].clone()];

        let output = rewrite(&file.content, &[shape], &failed, "unknown");
        assert_eq!(output, source);
    }

    #[test]
    fn every_query_failing_keeps_the_block() {
        let source = source_with_two_queries();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.ts");
        fs::write(&path, &source).unwrap();

        let file = extract_file(&path).unwrap();
        let output = rewrite(&file.content, &[], &file.queries, "unknown");
        assert_eq!(output, source);
    }

    #[test]
    fn empty_block_is_removed() {
        let source = format!("const a = 1\n\n{EXPECTED_BLOCK}\n");
        assert_eq!(rewrite(&source, &[], &[], "unknown"), "const a = 1\n");

        let source = format!("const a = 1\n\n{EXPECTED_BLOCK}\n\nconst b = 2\n");
        assert_eq!(rewrite(&source, &[], &[], "unknown"), "const a = 1\n\nconst b = 2\n");

        // Not generated by us
        let source = "export declare namespace queries {\n  type Mine = 1\n}\n";
        assert_eq!(rewrite(source, &[], &[], "unknown"), source);
    }

    #[test]
    fn generated_names() {
        assert_eq!(generated_name("queries.TestTable"), Some("TestTable"));
        assert_eq!(generated_name("queries.TestTable_2 & {x: 1}"), Some("TestTable_2"));
        assert_eq!(generated_name("{x: 1} & queries.TestTable"), None);
        assert_eq!(generated_name("Other.TestTable"), None);
    }
}
