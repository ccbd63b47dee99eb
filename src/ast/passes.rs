/// Extension passes run over a query before it is compiled.
///
/// Each pass takes the AST plus the target's capability table and returns
/// a possibly rewritten AST. Passes run in registration order.
use tracing::debug;

use super::types::*;
use crate::dialect::CapabilityFlags;
use crate::error::{AdapterError, Result};

pub trait ExtensionPass: Send + Sync {
    /// Unique name identifying this pass.
    fn name(&self) -> &str;

    fn transform(&self, query: SelectQuery, caps: &CapabilityFlags) -> Result<SelectQuery>;
}

#[derive(Default)]
pub struct Pipeline {
    passes: Vec<Box<dyn ExtensionPass>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The passes every rendered query goes through.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.add_pass(Box::new(CheckAsOfSystemTime));
        pipeline.add_pass(Box::new(PushDownIndexHints));
        pipeline.add_pass(Box::new(QuoteNumericLiterals));
        pipeline
    }

    pub fn add_pass(&mut self, pass: Box<dyn ExtensionPass>) {
        self.passes.push(pass);
    }

    pub fn run(&self, query: SelectQuery, caps: &CapabilityFlags) -> Result<SelectQuery> {
        let mut current = query;
        for pass in &self.passes {
            current = pass.transform(current, caps)?;
        }
        Ok(current)
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

/// Rejects time-travel reads the target cannot serve.
struct CheckAsOfSystemTime;

impl ExtensionPass for CheckAsOfSystemTime {
    fn name(&self) -> &str {
        "check_as_of_system_time"
    }

    fn transform(&self, query: SelectQuery, caps: &CapabilityFlags) -> Result<SelectQuery> {
        if query.as_of.is_none() {
            return Ok(query);
        }
        if !caps.supports_as_of_system_time {
            return Err(AdapterError::Unsupported("AS OF SYSTEM TIME".into()));
        }
        if query.from.is_empty() {
            return Err(AdapterError::InvalidArgument(
                "AS OF SYSTEM TIME needs a FROM source".into(),
            ));
        }
        Ok(query)
    }
}

/// Moves pending index hints onto the FROM table node.
struct PushDownIndexHints;

impl ExtensionPass for PushDownIndexHints {
    fn name(&self) -> &str {
        "push_down_index_hints"
    }

    fn transform(&self, mut query: SelectQuery, caps: &CapabilityFlags) -> Result<SelectQuery> {
        let hints = std::mem::take(&mut query.index_hints);
        let Some(rendered) = hints.render() else {
            return Ok(query);
        };
        if !caps.supports_index_hints {
            return Err(AdapterError::Unsupported("index hints".into()));
        }

        match query.from.as_mut_slice() {
            [TableRef::Table { hints, .. }] => {
                *hints = Some(match hints.take() {
                    Some(existing) => format!("{},{}", existing, rendered),
                    None => rendered,
                });
            }
            [TableRef::Raw(text)] if is_bare_table_text(text) => {
                *text = attach_hints_to_raw(text, &rendered);
            }
            _ => debug!("dropping index hints: FROM target is not a bare table"),
        }
        Ok(query)
    }
}

/// Renders numeric literals as quoted strings for targets that only narrow
/// safely from string input.
///
/// Only literals compared against a column are quoted; the column supplies
/// the type the string narrows to. Arithmetic operands stay numeric.
struct QuoteNumericLiterals;

impl ExtensionPass for QuoteNumericLiterals {
    fn name(&self) -> &str {
        "quote_numeric_literals"
    }

    fn transform(&self, mut query: SelectQuery, caps: &CapabilityFlags) -> Result<SelectQuery> {
        if !caps.quote_numeric_literals {
            return Ok(query);
        }
        query.filter = query.filter.map(quote_numbers);
        query.projections = query
            .projections
            .into_iter()
            .map(|item| match item {
                SelectItem::Expression { expr, alias } => SelectItem::Expression {
                    expr: quote_numbers(expr),
                    alias,
                },
                other => other,
            })
            .collect();
        for join in &mut query.joins {
            if let Some(JoinCondition::On(expr)) = &mut join.condition {
                *expr = quote_numbers(std::mem::replace(expr, Expression::Wildcard));
            }
        }
        for source in &mut query.from {
            if let TableRef::Subquery { query: inner, .. } = source {
                let taken = std::mem::take(inner.as_mut());
                **inner = self.transform(taken, caps)?;
            }
        }
        Ok(query)
    }
}

fn quote_numbers(expr: Expression) -> Expression {
    let boxed = |e: Box<Expression>| Box::new(quote_numbers(*e));
    match expr {
        Expression::BinaryOp { left, op, right } if is_comparison(op) => {
            let (left, right) = if is_column_typed(&right) {
                (Box::new(numeric_operand(*left)), boxed(right))
            } else if is_column_typed(&left) {
                (boxed(left), Box::new(numeric_operand(*right)))
            } else {
                (boxed(left), boxed(right))
            };
            Expression::BinaryOp { left, op, right }
        }
        Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
            left: boxed(left),
            op,
            right: boxed(right),
        },
        Expression::UnaryOp { op, expr } => Expression::UnaryOp { op, expr: boxed(expr) },
        Expression::Function {
            name,
            args,
            distinct,
        } => Expression::Function {
            name,
            args: args.into_iter().map(quote_numbers).collect(),
            distinct,
        },
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let column = is_column_typed(&expr);
            Expression::InList {
                expr: boxed(expr),
                list: list
                    .into_iter()
                    .map(|e| if column { numeric_operand(e) } else { quote_numbers(e) })
                    .collect(),
                negated,
            }
        }
        Expression::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let bound = |e: Box<Expression>| {
                if is_column_typed(&expr) {
                    Box::new(numeric_operand(*e))
                } else {
                    Box::new(quote_numbers(*e))
                }
            };
            let (low, high) = (bound(low), bound(high));
            Expression::Between {
                expr: boxed(expr),
                low,
                high,
                negated,
            }
        }
        Expression::IsNull { expr, negated } => Expression::IsNull {
            expr: boxed(expr),
            negated,
        },
        Expression::Nested(inner) => Expression::Nested(boxed(inner)),
        other => other,
    }
}

/// Quote `expr` if it is a numeric literal, folding a leading minus into it.
fn numeric_operand(expr: Expression) -> Expression {
    match expr {
        Expression::Literal(Literal::Integer(i)) => Expression::Literal(Literal::String(i.to_string())),
        Expression::Literal(Literal::Float(f)) if f.is_finite() => {
            Expression::Literal(Literal::String(f.to_string()))
        }
        Expression::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match *expr {
            Expression::Literal(Literal::Integer(i)) if i.checked_neg().is_some() => {
                Expression::Literal(Literal::String((-i).to_string()))
            }
            Expression::Literal(Literal::Float(f)) if f.is_finite() => {
                Expression::Literal(Literal::String((-f).to_string()))
            }
            inner => Expression::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(quote_numbers(inner)),
            },
        },
        other => quote_numbers(other),
    }
}

fn is_comparison(op: BinaryOperator) -> bool {
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

fn is_column_typed(expr: &Expression) -> bool {
    match expr {
        Expression::Column { .. } => true,
        Expression::Nested(inner) => is_column_typed(inner),
        _ => false,
    }
}

/// Source text minus any `@{...}` hint blocks.
fn strip_hint_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("@{") {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// A single table name, possibly already hinted or aliased: no parentheses
/// and no commas outside hint braces.
pub fn is_bare_table_text(text: &str) -> bool {
    let stripped = strip_hint_blocks(text);
    !stripped.trim().is_empty() && !stripped.contains(['(', ')', ','])
}

/// Put hints directly after the table name in raw source text, merging
/// into an existing `@{...}` block.
fn attach_hints_to_raw(text: &str, rendered: &str) -> String {
    let text = text.trim();
    let (head, tail) = match text.find('@') {
        Some(at) => match text[at..].find('}') {
            Some(end) => text.split_at(at + end + 1),
            None => (text, ""),
        },
        None => match text.find(char::is_whitespace) {
            Some(ws) => text.split_at(ws),
            None => (text, ""),
        },
    };
    if let Some(inner) = head.strip_suffix('}') {
        format!("{},{}}}{}", inner, rendered, tail)
    } else {
        format!("{}@{{{}}}{}", head, rendered, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::compiler::compile;

    fn hinted(from: TableRef) -> SelectQuery {
        SelectQuery {
            from: vec![from],
            index_hints: IndexHints {
                hint: Some("NO_FULL_SCAN".into()),
                forced: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_standard_pipeline_order() {
        assert_eq!(
            Pipeline::standard().pass_names(),
            vec!["check_as_of_system_time", "push_down_index_hints", "quote_numeric_literals"]
        );
    }

    #[test]
    fn test_push_down_onto_table() {
        let caps = CapabilityFlags::cockroachdb();
        let q = Pipeline::standard().run(hinted(TableRef::table("accounts")), &caps).unwrap();
        assert!(q.index_hints.is_empty());
        assert_eq!(compile(&q), "SELECT * FROM accounts@{NO_FULL_SCAN}");
    }

    #[test]
    fn test_push_down_merges_raw_hint_block() {
        let caps = CapabilityFlags::cockroachdb();
        let q = Pipeline::standard()
            .run(hinted(TableRef::Raw("accounts@{FORCE_ZIGZAG} AS a".into())), &caps)
            .unwrap();
        assert_eq!(compile(&q), "SELECT * FROM accounts@{FORCE_ZIGZAG,NO_FULL_SCAN} AS a");

        let q = Pipeline::standard()
            .run(hinted(TableRef::Raw("accounts a".into())), &caps)
            .unwrap();
        assert_eq!(compile(&q), "SELECT * FROM accounts@{NO_FULL_SCAN} a");
    }

    #[test]
    fn test_hints_unsupported_on_postgres() {
        let caps = CapabilityFlags::postgres();
        let err = Pipeline::standard()
            .run(hinted(TableRef::table("accounts")), &caps)
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unsupported(_)));
    }

    #[test]
    fn test_as_of_requires_capability() {
        let q = SelectQuery {
            from: vec![TableRef::table("accounts")],
            as_of: Some(chrono::Utc::now()),
            ..Default::default()
        };
        assert!(Pipeline::standard().run(q.clone(), &CapabilityFlags::postgres()).is_err());
        assert!(Pipeline::standard().run(q, &CapabilityFlags::cockroachdb()).is_ok());
    }

    #[test]
    fn test_numeric_literals_quoted() {
        let q = SelectQuery {
            from: vec![TableRef::table("accounts")],
            filter: Some(Expression::column("firm_id").eq(7.into())),
            ..Default::default()
        };
        let out = Pipeline::standard().run(q.clone(), &CapabilityFlags::cockroachdb()).unwrap();
        assert_eq!(compile(&out), "SELECT * FROM accounts WHERE firm_id = '7'");
        let out = Pipeline::standard().run(q, &CapabilityFlags::postgres()).unwrap();
        assert_eq!(compile(&out), "SELECT * FROM accounts WHERE firm_id = 7");
    }

    #[test]
    fn test_arithmetic_and_negated_literals_stay_typed() {
        let q = SelectQuery {
            projections: vec![SelectItem::Expression {
                expr: Expression::binary(1.into(), BinaryOperator::Plus, 1.into()),
                alias: Some("two".into()),
            }],
            from: vec![TableRef::table("accounts")],
            filter: Some(Expression::binary(
                Expression::column("balance"),
                BinaryOperator::Gt,
                Expression::UnaryOp {
                    op: UnaryOperator::Minus,
                    expr: Box::new(5.into()),
                },
            )),
            ..Default::default()
        };
        let out = Pipeline::standard().run(q, &CapabilityFlags::cockroachdb()).unwrap();
        assert_eq!(
            compile(&out),
            "SELECT 1 + 1 AS two FROM accounts WHERE balance > '-5'"
        );
    }

    #[test]
    fn test_only_column_comparisons_are_quoted() {
        let filter = Expression::binary(
            Expression::column("balance"),
            BinaryOperator::Gt,
            Expression::binary(Expression::column("limit_cents"), BinaryOperator::Multiply, 2.into()),
        )
        .and(Expression::InList {
            expr: Box::new(Expression::column("firm_id")),
            list: vec![1.into(), 2.into()],
            negated: false,
        })
        .and(Expression::binary(3.into(), BinaryOperator::Lt, Expression::column("age")));
        let q = SelectQuery {
            from: vec![TableRef::table("accounts")],
            filter: Some(filter),
            ..Default::default()
        };
        let out = Pipeline::standard().run(q, &CapabilityFlags::cockroachdb()).unwrap();
        assert_eq!(
            compile(&out),
            "SELECT * FROM accounts WHERE balance > limit_cents * 2 AND firm_id IN ('1', '2') AND '3' < age"
        );
    }

    #[test]
    fn test_bare_table_text() {
        assert!(is_bare_table_text("accounts"));
        assert!(is_bare_table_text("public.accounts@{FORCE_INDEX=a,ASC}"));
        assert!(!is_bare_table_text("accounts, firms"));
        assert!(!is_bare_table_text("(SELECT 1) AS t"));
        assert!(!is_bare_table_text("  "));
    }
}
