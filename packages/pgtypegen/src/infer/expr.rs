use crate::log::INFER;
use regex::Regex;
use sqltk::parser::ast::{
    BinaryOperator, Expr, GroupByExpr, Ident, Join, JoinOperator, ObjectName, Query, Select,
    SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, Value, ValueWithSpan,
};
use sqltk::parser::dialect::PostgreSqlDialect;
use sqltk::parser::parser::Parser;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::debug;

static OUTER_JOIN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(left|right|full)\s+(outer\s+)?join\b").ok());

///
/// What can be learned about a query from its text alone.
///
/// This is a shallow reading of the statement. It never decides a column type,
/// it only refines nullability and supplies table names for naming.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryAnalysis {
    /// Tables named in the outermost FROM clause, in order of appearance
    pub tables: Vec<String>,

    /// For each select list item, whether it is a literal that can never be null.
    /// Empty when the select list contains a wildcard.
    pub literal_not_null: Vec<bool>,

    /// Tables on the nullable side of an outer join
    pub nullable_tables: HashSet<String>,

    /// Single table whose columns are constrained by the WHERE clause, with those columns
    pub where_not_null: Option<(String, HashSet<String>)>,

    /// The text could not be parsed but contains an outer join
    pub all_nullable: bool,
}

impl QueryAnalysis {
    pub fn analyse(sql: &str) -> QueryAnalysis {
        let statements = match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
            Ok(statements) => statements,
            Err(err) => {
                debug!(target: INFER, msg = "Could not parse query", error = err.to_string());
                return QueryAnalysis::unparsed(sql);
            }
        };

        match statements.as_slice() {
            [Statement::Query(query)] => QueryAnalysis::from_query(query),
            _ => QueryAnalysis::default(),
        }
    }

    fn unparsed(sql: &str) -> QueryAnalysis {
        let all_nullable = OUTER_JOIN
            .as_ref()
            .map(|re| re.is_match(sql))
            .unwrap_or(true);

        QueryAnalysis {
            all_nullable,
            ..Default::default()
        }
    }

    fn from_query(query: &Query) -> QueryAnalysis {
        let mut analysis = match query.body.as_ref() {
            SetExpr::Select(select) => QueryAnalysis::from_select(query, select),
            SetExpr::Query(inner) => QueryAnalysis::from_query(inner),
            _ => QueryAnalysis::default(),
        };

        analysis
            .nullable_tables
            .extend(NullableTables::collect(query));

        analysis
    }

    fn from_select(query: &Query, select: &Select) -> QueryAnalysis {
        let mut analysis = QueryAnalysis {
            literal_not_null: literal_items(&select.projection),
            ..Default::default()
        };

        for from in &select.from {
            let names = std::iter::once(&from.relation)
                .chain(from.joins.iter().map(|join| &join.relation))
                .filter_map(table_factor_name);

            for name in names {
                if !analysis.tables.contains(&name) {
                    analysis.tables.push(name);
                }
            }
        }

        analysis.where_not_null = where_refinement(query, select, &analysis.tables);

        analysis
    }

    ///
    /// Select list item at `index` is a non-null literal.
    /// `column_count` guards against a select list that does not line up with the described columns.
    ///
    pub fn is_literal_not_null(&self, index: usize, column_count: usize) -> bool {
        self.literal_not_null.len() == column_count
            && self.literal_not_null.get(index).copied().unwrap_or(false)
    }

    pub fn is_nullable_table(&self, table: &str) -> bool {
        self.nullable_tables.contains(table)
    }

    pub fn is_where_not_null(&self, table: &str, column: &str) -> bool {
        match &self.where_not_null {
            Some((constrained_table, columns)) => {
                constrained_table == table && columns.contains(column)
            }
            None => false,
        }
    }
}

///
/// Tables whose columns may be null-extended anywhere in a query.
///
/// Postgres reports provenance for columns passed up through derived tables and CTEs,
/// so the nullable side of an outer join is tracked through every level of nesting.
/// Each branch of a set operation counts as nullable, as another branch may supply the nulls.
///
#[derive(Default)]
struct NullableTables {
    /// Physical tables read by each CTE
    ctes: HashMap<String, HashSet<String>>,
    nullable: HashSet<String>,
}

impl NullableTables {
    fn collect(query: &Query) -> HashSet<String> {
        let mut walker = NullableTables::default();
        walker.query(query);
        walker.nullable
    }

    /// Returns the physical tables the query reads from
    fn query(&mut self, query: &Query) -> HashSet<String> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let tables = self.query(&cte.query);
                self.ctes.insert(normalize(&cte.alias.name), tables);
            }
        }
        self.set_expr(&query.body)
    }

    fn set_expr(&mut self, expr: &SetExpr) -> HashSet<String> {
        match expr {
            SetExpr::Select(select) => {
                let mut tables = HashSet::new();
                for from in &select.from {
                    tables.extend(self.table_with_joins(from));
                }
                tables
            }
            SetExpr::Query(query) => self.query(query),
            SetExpr::SetOperation { left, right, .. } => {
                let mut tables = self.set_expr(left);
                tables.extend(self.set_expr(right));
                self.nullable.extend(tables.iter().cloned());
                tables
            }
            _ => HashSet::new(),
        }
    }

    fn table_with_joins(&mut self, from: &TableWithJoins) -> HashSet<String> {
        let mut seen = self.table_factor(&from.relation);

        for join in &from.joins {
            let relation = self.table_factor(&join.relation);

            match outer_side(join) {
                OuterSide::Right => self.nullable.extend(relation.iter().cloned()),
                OuterSide::Left => self.nullable.extend(seen.iter().cloned()),
                OuterSide::Both => {
                    self.nullable.extend(seen.iter().cloned());
                    self.nullable.extend(relation.iter().cloned());
                }
                OuterSide::Neither => {}
            }

            seen.extend(relation);
        }

        seen
    }

    fn table_factor(&mut self, factor: &TableFactor) -> HashSet<String> {
        match factor {
            TableFactor::Table { name, .. } => {
                let name = object_name(name);
                let mut tables = self.ctes.get(&name).cloned().unwrap_or_default();
                tables.insert(name);
                tables
            }
            TableFactor::Derived { subquery, .. } => self.query(subquery),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.table_with_joins(table_with_joins),
            _ => HashSet::new(),
        }
    }
}

enum OuterSide {
    /// Right hand relation may be null-extended
    Right,
    /// Everything to the left may be null-extended
    Left,
    Both,
    Neither,
}

fn outer_side(join: &Join) -> OuterSide {
    match &join.join_operator {
        JoinOperator::LeftOuter(_) | JoinOperator::OuterApply => OuterSide::Right,
        JoinOperator::RightOuter(_) => OuterSide::Left,
        JoinOperator::FullOuter(_) => OuterSide::Both,
        // Some parser versions give `LEFT JOIN` without OUTER a variant of its own
        _ => {
            let rendered = join.to_string().to_uppercase();
            let keyword = rendered.trim_start();
            let keyword = keyword.strip_prefix("NATURAL ").unwrap_or(keyword);

            if keyword.starts_with("LEFT JOIN") {
                OuterSide::Right
            } else if keyword.starts_with("RIGHT JOIN") {
                OuterSide::Left
            } else {
                OuterSide::Neither
            }
        }
    }
}

fn literal_items(projection: &[SelectItem]) -> Vec<bool> {
    let mut items = Vec::with_capacity(projection.len());
    for item in projection {
        match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                items.push(is_non_null_literal(expr))
            }
            _ => return vec![],
        }
    }
    items
}

///
/// Literals, casts of literals and comparisons between literals.
/// Parameters are not literals: they can be bound to null.
///
fn is_non_null_literal(expr: &Expr) -> bool {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => {
            !matches!(value, Value::Null | Value::Placeholder(_))
        }
        Expr::TypedString { .. } => true,
        Expr::Nested(inner) => is_non_null_literal(inner),
        Expr::Cast { expr, .. } => is_non_null_literal(expr),
        Expr::UnaryOp { expr, .. } => is_non_null_literal(expr),
        Expr::BinaryOp { left, op, right } if is_comparison(op) => {
            is_non_null_literal(left) && is_non_null_literal(right)
        }
        _ => false,
    }
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
    )
}

fn where_refinement(
    query: &Query,
    select: &Select,
    tables: &[String],
) -> Option<(String, HashSet<String>)> {
    let single_table = matches!(select.from.as_slice(), [from] if from.joins.is_empty());
    let grouped = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
        _ => true,
    };

    if query.with.is_some() || !single_table || grouped || select.having.is_some() {
        return None;
    }

    if select.projection.iter().any(|item| match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
            matches!(expr, Expr::Function(_))
        }
        _ => false,
    }) {
        return None;
    }

    let table = tables.first()?;
    let columns = constrained_columns(select.selection.as_ref()?);

    (!columns.is_empty()).then(|| (table.clone(), columns))
}

/// Columns that cannot be null in any row satisfying `expr`
fn constrained_columns(expr: &Expr) -> HashSet<String> {
    match expr {
        Expr::Nested(inner) => constrained_columns(inner),
        Expr::IsNotNull(inner) => column_name(inner).into_iter().collect(),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut columns = constrained_columns(left);
            columns.extend(constrained_columns(right));
            columns
        }
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Or,
            right,
        } => {
            let left = constrained_columns(left);
            let right = constrained_columns(right);
            left.intersection(&right).cloned().collect()
        }
        Expr::BinaryOp { left, op, right } if is_comparison(op) => column_name(left)
            .into_iter()
            .chain(column_name(right))
            .collect(),
        _ => HashSet::new(),
    }
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Nested(inner) => column_name(inner),
        Expr::Identifier(ident) => Some(normalize(ident)),
        Expr::CompoundIdentifier(idents) => idents.last().map(normalize),
        _ => None,
    }
}

fn table_factor_name(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { name, .. } => Some(object_name(name)),
        _ => None,
    }
}

/// Unqualified name, folded to lower case unless quoted
fn object_name(name: &ObjectName) -> String {
    let text = name.to_string();
    let last = text.rsplit('.').next().unwrap_or(&text);

    match last.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => last.to_lowercase(),
    }
}

fn normalize(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}
