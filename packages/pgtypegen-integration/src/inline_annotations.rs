#[cfg(test)]
mod tests {
    use crate::common::{generate, trace, Project, TestSchema};
    use pgtypegen::log::RecordingLogger;

    const SCHEMA: &str = "create table test_table(foo int not null, bar text);";

    async fn annotate(source: &str) -> String {
        trace();

        let schema = TestSchema::create(SCHEMA).await;
        let project = Project::new();
        project.write("index.ts", source);

        let logger = RecordingLogger::new();
        let report = generate(&schema, &project, &logger).await;
        assert!(!report.has_failures(), "{report:?}");

        let content = project.read("index.ts");
        schema.drop().await;
        content
    }

    fn tag_line(content: &str) -> &str {
        content.lines().next().unwrap_or_default()
    }

    #[tokio::test]
    async fn intersections_keep_their_extra_members() {
        let cases = [
            (
                "sql<queries.Old & {extra: string}>`select foo, bar from test_table`\n",
                "sql<queries.TestTable & {extra: string}>`select foo, bar from test_table`",
            ),
            (
                "sql<queries.TestTable & One & {extra: string}>`select foo, bar from test_table`\n",
                "sql<queries.TestTable & One & {extra: string}>`select foo, bar from test_table`",
            ),
            (
                "sql<queries.TestTable & One & Two & {extra: string}>`select foo, bar from test_table`\n",
                "sql<queries.TestTable & One & Two & {extra: string}>`select foo, bar from test_table`",
            ),
        ];

        for (source, expected) in cases {
            let content = annotate(source).await;
            assert_eq!(tag_line(&content), expected);
        }
    }

    #[tokio::test]
    async fn anything_else_is_replaced() {
        let cases = [
            "sql<{foo: number}>`select foo, bar from test_table`\n",
            "sql<queries.TestTable | Other>`select foo, bar from test_table`\n",
            "sql<Omit<queries.TestTable, 'bar'>>`select foo, bar from test_table`\n",
        ];

        for source in cases {
            let content = annotate(source).await;
            assert_eq!(
                tag_line(&content),
                "sql<queries.TestTable>`select foo, bar from test_table`"
            );
        }
    }

    #[tokio::test]
    async fn surrounding_code_is_untouched() {
        let source = "import {sql} from 'slonik'

// `sql` in a comment is not a query
export const url = 'sql`nope`'

export async function load(pool: any, id: number) {
  return pool.query(sql`select foo, bar from test_table where foo = ${id}`)
}
";
        let content = annotate(source).await;

        let expected_code = source.replace("sql`select", "sql<queries.TestTable>`select");
        assert!(content.starts_with(&expected_code));
        assert!(content.contains("/** - query: `select foo, bar from test_table where foo = $1` */"));
    }
}
