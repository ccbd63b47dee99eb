/// AST → SQL compiler.
///
/// Rendering is capability-agnostic: by the time a query reaches here the
/// extension passes have validated annotations and pushed index hints into
/// the FROM table node.
use chrono::SecondsFormat;

use super::types::*;

/// Compile a SELECT AST into SQL text.
pub fn compile(select: &SelectQuery) -> String {
    let mut parts = Vec::new();

    let mut select_clause = String::from("SELECT ");
    if select.distinct {
        select_clause.push_str("DISTINCT ");
    }
    if select.projections.is_empty() {
        select_clause.push('*');
    } else {
        let items: Vec<String> = select.projections.iter().map(compile_select_item).collect();
        select_clause.push_str(&items.join(", "));
    }
    parts.push(select_clause);

    if !select.from.is_empty() {
        let tables: Vec<String> = select.from.iter().map(compile_table_ref).collect();
        parts.push(format!("FROM {}", tables.join(", ")));
    }

    for join in &select.joins {
        parts.push(compile_join(join));
    }

    // Time travel applies to the whole source list, after the last join.
    if let Some(ts) = &select.as_of {
        parts.push(format!(
            "AS OF SYSTEM TIME '{}'",
            ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        ));
    }

    if let Some(ref filter) = select.filter {
        parts.push(format!("WHERE {}", compile_expr(filter)));
    }

    if !select.group_by.is_empty() {
        let groups: Vec<String> = select.group_by.iter().map(compile_expr).collect();
        parts.push(format!("GROUP BY {}", groups.join(", ")));
    }

    if !select.order_by.is_empty() {
        let orders: Vec<String> = select.order_by.iter().map(compile_order_by).collect();
        parts.push(format!("ORDER BY {}", orders.join(", ")));
    }

    if let Some(limit) = select.limit {
        parts.push(format!("LIMIT {}", limit));
    }

    if let Some(offset) = select.offset {
        parts.push(format!("OFFSET {}", offset));
    }

    parts.join(" ")
}

fn compile_select_item(item: &SelectItem) -> String {
    match item {
        SelectItem::Wildcard => "*".to_string(),
        SelectItem::QualifiedWildcard(table) => format!("{}.*", table),
        SelectItem::Expression { expr, alias } => {
            let expr_str = compile_expr(expr);
            match alias {
                Some(a) => format!("{} AS {}", expr_str, a),
                None => expr_str,
            }
        }
    }
}

fn compile_table_ref(table: &TableRef) -> String {
    match table {
        TableRef::Table {
            schema,
            name,
            alias,
            hints,
        } => {
            let mut s = match schema {
                Some(sc) => format!("{}.{}", sc, name),
                None => name.clone(),
            };
            if let Some(h) = hints {
                s.push_str(&format!("@{{{}}}", h));
            }
            if let Some(a) = alias {
                s.push_str(&format!(" AS {}", a));
            }
            s
        }
        TableRef::Subquery { query, alias } => format!("({}) AS {}", compile(query), alias),
        TableRef::Raw(text) => text.clone(),
    }
}

fn compile_join(join: &Join) -> String {
    let type_str = match join.join_type {
        JoinType::Inner => "JOIN",
        JoinType::Left => "LEFT JOIN",
        JoinType::Right => "RIGHT JOIN",
        JoinType::Full => "FULL JOIN",
        JoinType::Cross => "CROSS JOIN",
    };

    let condition_str = match &join.condition {
        Some(JoinCondition::On(expr)) => format!(" ON {}", compile_expr(expr)),
        Some(JoinCondition::Using(cols)) => format!(" USING ({})", cols.join(", ")),
        None => String::new(),
    };

    format!("{} {}{}", type_str, compile_table_ref(&join.table), condition_str)
}

pub(crate) fn compile_expr(expr: &Expression) -> String {
    match expr {
        Expression::Column { table, name } => match table {
            Some(t) => format!("{}.{}", t, name),
            None => name.clone(),
        },
        Expression::Literal(lit) => compile_literal(lit),
        Expression::BinaryOp { left, op, right } => {
            let op_str = match op {
                BinaryOperator::Eq => "=",
                BinaryOperator::NotEq => "<>",
                BinaryOperator::Lt => "<",
                BinaryOperator::LtEq => "<=",
                BinaryOperator::Gt => ">",
                BinaryOperator::GtEq => ">=",
                BinaryOperator::And => "AND",
                BinaryOperator::Or => "OR",
                BinaryOperator::Plus => "+",
                BinaryOperator::Minus => "-",
                BinaryOperator::Multiply => "*",
                BinaryOperator::Divide => "/",
                BinaryOperator::Modulo => "%",
                BinaryOperator::Like => "LIKE",
                BinaryOperator::ILike => "ILIKE",
                BinaryOperator::Concat => "||",
            };
            format!("{} {} {}", compile_expr(left), op_str, compile_expr(right))
        }
        Expression::UnaryOp { op, expr } => match op {
            UnaryOperator::Not => format!("NOT {}", compile_expr(expr)),
            UnaryOperator::Minus => format!("-{}", compile_expr(expr)),
        },
        Expression::Function {
            name,
            args,
            distinct,
        } => {
            let distinct_str = if *distinct { "DISTINCT " } else { "" };
            let args_str: Vec<String> = args.iter().map(compile_expr).collect();
            format!("{}({}{})", name, distinct_str, args_str.join(", "))
        }
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let not_str = if *negated { "NOT " } else { "" };
            let items: Vec<String> = list.iter().map(compile_expr).collect();
            format!("{} {}IN ({})", compile_expr(expr), not_str, items.join(", "))
        }
        Expression::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let not_str = if *negated { "NOT " } else { "" };
            format!(
                "{} {}BETWEEN {} AND {}",
                compile_expr(expr),
                not_str,
                compile_expr(low),
                compile_expr(high)
            )
        }
        Expression::IsNull { expr, negated } => {
            if *negated {
                format!("{} IS NOT NULL", compile_expr(expr))
            } else {
                format!("{} IS NULL", compile_expr(expr))
            }
        }
        Expression::Wildcard => "*".to_string(),
        Expression::Parameter(idx) => format!("${}", idx),
        Expression::Nested(expr) => format!("({})", compile_expr(expr)),
        Expression::Raw(sql) => sql.clone(),
    }
}

fn compile_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Boolean(true) => "TRUE".to_string(),
        Literal::Boolean(false) => "FALSE".to_string(),
        Literal::Integer(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn compile_order_by(order: &OrderByExpr) -> String {
    let mut s = compile_expr(&order.expr);
    match order.asc {
        Some(true) => s.push_str(" ASC"),
        Some(false) => s.push_str(" DESC"),
        None => {}
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn accounts() -> SelectQuery {
        SelectQuery {
            from: vec![TableRef::table("accounts")],
            ..Default::default()
        }
    }

    #[test]
    fn test_compile_simple_select() {
        let q = SelectQuery {
            projections: vec![SelectItem::Expression {
                expr: Expression::column("firm_id"),
                alias: Some("f".into()),
            }],
            filter: Some(Expression::column("balance").eq(Expression::Literal(Literal::Integer(0)))),
            order_by: vec![OrderByExpr {
                expr: Expression::column("id"),
                asc: Some(false),
            }],
            limit: Some(10),
            ..accounts()
        };
        assert_eq!(
            compile(&q),
            "SELECT firm_id AS f FROM accounts WHERE balance = 0 ORDER BY id DESC LIMIT 10"
        );
    }

    #[test]
    fn test_as_of_follows_joins_and_precedes_where() {
        let q = SelectQuery {
            joins: vec![Join {
                join_type: JoinType::Left,
                table: TableRef::table("firms"),
                condition: Some(JoinCondition::On(
                    Expression::column("firms.id").eq(Expression::column("accounts.firm_id")),
                )),
            }],
            filter: Some(Expression::IsNull {
                expr: Box::new(Expression::column("accounts.deleted_at")),
                negated: false,
            }),
            as_of: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            ..accounts()
        };
        assert_eq!(
            compile(&q),
            "SELECT * FROM accounts LEFT JOIN firms ON firms.id = accounts.firm_id \
             AS OF SYSTEM TIME '2024-01-02T03:04:05Z' WHERE accounts.deleted_at IS NULL"
        );
    }

    #[test]
    fn test_table_hints_precede_alias() {
        let q = SelectQuery {
            from: vec![TableRef::Table {
                schema: Some("public".into()),
                name: "accounts".into(),
                alias: Some("a".into()),
                hints: Some("FORCE_INDEX=accounts_idx".into()),
            }],
            ..Default::default()
        };
        assert_eq!(
            compile(&q),
            "SELECT * FROM public.accounts@{FORCE_INDEX=accounts_idx} AS a"
        );
    }

    #[test]
    fn test_compile_expressions() {
        let expr = Expression::InList {
            expr: Box::new(Expression::column("id")),
            list: vec![1.into(), 2.into()],
            negated: true,
        };
        assert_eq!(compile_expr(&expr), "id NOT IN (1, 2)");
        assert_eq!(compile_expr(&"O'Brien".into()), "'O''Brien'");
        let between = Expression::Between {
            expr: Box::new(Expression::column("n")),
            low: Box::new(Expression::Parameter(1)),
            high: Box::new(Expression::Parameter(2)),
            negated: false,
        };
        assert_eq!(compile_expr(&between), "n BETWEEN $1 AND $2");
    }

    #[test]
    fn test_subquery_source() {
        let q = SelectQuery {
            from: vec![TableRef::Subquery {
                query: Box::new(accounts()),
                alias: "sub".into(),
            }],
            ..Default::default()
        };
        assert_eq!(compile(&q), "SELECT * FROM (SELECT * FROM accounts) AS sub");
    }
}
