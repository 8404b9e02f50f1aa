#[cfg(test)]
mod tests {
    use crate::common::{generate, trace, Project, TestSchema};
    use pgtypegen::log::RecordingLogger;

    const SCHEMA: &str = "
        create table test_table(a int not null, b text);
        insert into test_table values (1, 'one'), (2, 'two'), (2, 'three');
    ";

    const SQL: &str = "select a, b from test_table where a = $1 and b = $2\n";

    #[tokio::test]
    async fn parameterised_sql_file_gets_a_typed_companion() {
        trace();

        let schema = TestSchema::create(SCHEMA).await;
        let project = Project::new();
        project.write("queries/test-table.sql", SQL);

        let logger = RecordingLogger::new();
        let report = generate(&schema, &project, &logger).await;

        assert!(!report.has_failures(), "{report:?}");
        assert_eq!(report.changed, vec![project.path("queries/__sql__/test-table.sql.ts")]);

        // The query itself is never rewritten
        assert_eq!(project.read("queries/test-table.sql"), SQL);

        let companion = project.read("queries/__sql__/test-table.sql.ts");

        assert!(companion.contains(&format!(
            "export interface TestTable {{
  /** column: `{}`, not null: `true`, regtype: `integer` */
  a: number

  /** column: `{}`, not null: `true`, regtype: `text` */
  b: string
}}",
            schema.column("test_table", "a"),
            schema.column("test_table", "b"),
        )));
        assert!(companion.contains("export interface GetTestTableQueryParams {\n  $1: number\n  $2: string\n}"));
        assert!(companion.contains("values: [params['$1'], params['$2']],"));
        assert!(companion.contains("const sqlPath = path.join(__dirname, '../test-table.sql')"));

        schema.drop().await;
    }

    #[tokio::test]
    async fn parameter_types_match_direct_execution() {
        trace();

        let schema = TestSchema::create(SCHEMA).await;
        let project = Project::new();
        project.write("test-table.sql", SQL);

        let logger = RecordingLogger::new();
        generate(&schema, &project, &logger).await;

        let companion = project.read("__sql__/test-table.sql.ts");
        assert!(companion.contains("  $1: number\n  $2: string\n"));

        // Values of the generated parameter types bind and return the same rows as the query run by hand
        let a: i32 = 2;
        let b: &str = "three";
        let rows = schema.client.query(SQL, &[&a, &b]).await.unwrap();

        assert_eq!(rows.len(), 1);
        let row_a: i32 = rows[0].get("a");
        let row_b: Option<String> = rows[0].get("b");
        assert_eq!(row_a, 2);
        assert_eq!(row_b.as_deref(), Some("three"));

        schema.drop().await;
    }

    #[tokio::test]
    async fn query_errors_are_reported_with_path_and_sql() {
        trace();

        let schema = TestSchema::create(SCHEMA).await;
        let project = Project::new();
        let broken = project.write("broken.sql", "select missing_column from test_table");
        project.write("ok.sql", "select a from test_table");

        let logger = RecordingLogger::new();
        let report = generate(&schema, &project, &logger).await;

        assert_eq!(report.query_failures.len(), 1);
        assert_eq!(report.query_failures[0].file, broken);
        assert_eq!(report.query_failures[0].sql, "select missing_column from test_table");
        assert!(report.query_failures[0].error.contains("missing_column"));

        // The rest of the run still completes
        assert!(project.path("__sql__/ok.sql.ts").exists());
        assert!(!project.path("__sql__/broken.sql.ts").exists());

        let errors = logger.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("broken.sql"));
        assert!(errors[0].contains("select missing_column from test_table"));

        schema.drop().await;
    }
}
