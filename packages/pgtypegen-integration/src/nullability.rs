#[cfg(test)]
mod tests {
    use crate::common::{generate, trace, Project, TestSchema};
    use pgtypegen::log::RecordingLogger;

    const SCHEMA: &str = "
        create table test_table(a int not null, b int);
        create table other_table(id int primary key, a text not null);
    ";

    #[tokio::test]
    async fn not_null_comes_from_the_catalog() {
        trace();

        let schema = TestSchema::create(SCHEMA).await;
        let project = Project::new();
        project.write("index.ts", "export default sql`select a, b from test_table`\n");

        let logger = RecordingLogger::new();
        let report = generate(&schema, &project, &logger).await;

        assert_eq!(report.files_changed, 1);
        assert!(!report.has_failures());

        let content = project.read("index.ts");
        let expected = format!(
            "export default sql<queries.TestTable>`select a, b from test_table`

export declare namespace queries {{
  // Generated by pgtypegen

  /** - query: `select a, b from test_table` */
  export interface TestTable {{
    /** column: `{}`, not null: `true`, regtype: `integer` */
    a: number

    /** column: `{}`, regtype: `integer` */
    b: number | null
  }}
}}
",
            schema.column("test_table", "a"),
            schema.column("test_table", "b"),
        );
        pretty_assertions::assert_eq!(content, expected);

        schema.drop().await;
    }

    #[tokio::test]
    async fn literals_and_aggregates() {
        trace();

        let schema = TestSchema::create(SCHEMA).await;
        let project = Project::new();
        project.write(
            "index.ts",
            "export const literal = sql`select 1 as a`
export const nullLiteral = sql`select null::integer as b`
export const total = sql`select sum(a) from test_table`
",
        );

        let logger = RecordingLogger::new();
        let report = generate(&schema, &project, &logger).await;
        assert!(!report.has_failures());

        let content = project.read("index.ts");

        assert!(content.contains("sql<queries.A>`select 1 as a`"));
        assert!(content.contains(
            "  export interface A {\n    /** not null: `true`, regtype: `integer` */\n    a: number\n  }"
        ));

        assert!(content.contains("sql<queries.B>`select null::integer as b`"));
        assert!(content.contains(
            "  export interface B {\n    /** regtype: `integer` */\n    b: number | null\n  }"
        ));

        // sum over a not-null column is still null for an empty table
        assert!(content.contains("sql<queries.TestTable_sum>`select sum(a) from test_table`"));
        assert!(content.contains(
            "  export interface TestTable_sum {\n    /** regtype: `bigint` */\n    sum: number | null\n  }"
        ));

        schema.drop().await;
    }

    #[tokio::test]
    async fn outer_joins_and_where_clauses() {
        trace();

        let schema = TestSchema::create(SCHEMA).await;
        let project = Project::new();
        project.write(
            "index.ts",
            "export const joined = sql`select t.b, o.a from test_table t left join other_table o on o.id = t.a`
export const filtered = sql`select b from test_table where b is not null`
",
        );

        let logger = RecordingLogger::new();
        let report = generate(&schema, &project, &logger).await;
        assert!(!report.has_failures());

        let content = project.read("index.ts");

        // other_table is on the nullable side of the join, so its not-null column is demoted
        assert!(content.contains(&format!(
            "    /** column: `{}`, regtype: `text` */\n    a: string | null",
            schema.column("other_table", "a")
        )));

        assert!(content.contains(&format!(
            "    /** column: `{}`, not null: `true`, regtype: `integer` */\n    b: number\n",
            schema.column("test_table", "b")
        )));

        schema.drop().await;
    }

    #[tokio::test]
    async fn outer_joins_through_derived_tables_ctes_and_nested_joins() {
        trace();

        let schema = TestSchema::create(
            "
            create table test_table(id int not null);
            create table other_table(id int not null, c text not null);
            create table third(id int not null);
            insert into test_table values (1);
        ",
        )
        .await;

        let project = Project::new();
        project.write(
            "index.ts",
            "export const derived = sql`select x.c from (select o.c from test_table t left join other_table o on false) x`
export const cte = sql`with x as (select o.c from test_table t left join other_table o on false) select x.c as c2 from x`
export const nested = sql`select o.c as c3 from test_table t left join (other_table o join third h on h.id = o.id) on false`
",
        );

        let logger = RecordingLogger::new();
        let report = generate(&schema, &project, &logger).await;
        assert!(!report.has_failures(), "{report:?}");

        let content = project.read("index.ts");
        let source = schema.column("other_table", "c");

        for name in ["c", "c2", "c3"] {
            let nullable = format!("    /** column: `{source}`, regtype: `text` */\n    {name}: string | null\n");
            assert!(content.contains(&nullable), "{name} should be nullable:\n{content}");
        }

        // Each form really does produce a null
        for sql in [
            "select x.c from (select o.c from test_table t left join other_table o on false) x",
            "with x as (select o.c from test_table t left join other_table o on false) select x.c as c2 from x",
            "select o.c as c3 from test_table t left join (other_table o join third h on h.id = o.id) on false",
        ] {
            let row = schema.client.query_one(sql, &[]).await.unwrap();
            let value: Option<String> = row.get(0);
            assert_eq!(value, None);
        }

        schema.drop().await;
    }
}
