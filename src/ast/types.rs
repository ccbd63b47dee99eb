/// Query AST consumed by the extension passes and the SQL compiler.
///
/// Nodes are plain values; the builder shares them behind an `Arc` and
/// clones on write, so a query handed to another thread never changes.
use chrono::{DateTime, Utc};

/// A SELECT query with the clauses the builder exposes, plus the
/// distributed engine's time-travel and index-hint annotations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub distinct: bool,
    pub projections: Vec<SelectItem>,
    pub from: Vec<TableRef>,
    pub joins: Vec<Join>,
    pub filter: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Historical read timestamp, rendered after the FROM sources.
    pub as_of: Option<DateTime<Utc>>,
    /// Pending hints for the single FROM table, pushed into it when the
    /// query is rendered.
    pub index_hints: IndexHints,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    QualifiedWildcard(String),
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
}

/// FROM / JOIN source.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// `schema.table@{hints} AS alias`
    Table {
        schema: Option<String>,
        name: String,
        alias: Option<String>,
        /// Rendered hint list, without the `@{}` wrapper.
        hints: Option<String>,
    },
    /// `(SELECT ...) AS alias`
    Subquery {
        query: Box<SelectQuery>,
        alias: String,
    },
    /// Source text passed through as written.
    Raw(String),
}

impl TableRef {
    pub fn table(name: &str) -> Self {
        let (schema, name) = match name.split_once('.') {
            Some((schema, table)) => (Some(schema.to_string()), table.to_string()),
            None => (None, name.to_string()),
        };
        TableRef::Table {
            schema,
            name,
            alias: None,
            hints: None,
        }
    }
}

/// A `&str` source becomes a table when it is a plain (optionally
/// schema-qualified) name, raw text otherwise.
impl From<&str> for TableRef {
    fn from(source: &str) -> Self {
        let source = source.trim();
        let plain = !source.is_empty()
            && source.split('.').count() <= 2
            && source
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'));
        if plain {
            TableRef::table(source)
        } else {
            TableRef::Raw(source.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub condition: Option<JoinCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinCondition {
    On(Expression),
    Using(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Column {
        table: Option<String>,
        name: String,
    },
    Literal(Literal),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    Function {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    Wildcard,
    /// `$1`, `$2`, ...
    Parameter(usize),
    Nested(Box<Expression>),
    /// SQL text passed through as written.
    Raw(String),
}

impl Expression {
    pub fn column(name: &str) -> Self {
        match name.split_once('.') {
            Some((table, col)) => Expression::Column {
                table: Some(table.to_string()),
                name: col.to_string(),
            },
            None => Expression::Column {
                table: None,
                name: name.to_string(),
            },
        }
    }

    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expression) -> Self {
        Self::binary(self, BinaryOperator::Eq, right)
    }

    pub fn and(self, right: Expression) -> Self {
        Self::binary(self, BinaryOperator::And, right)
    }
}

impl From<i64> for Expression {
    fn from(v: i64) -> Self {
        Expression::Literal(Literal::Integer(v))
    }
}

impl From<&str> for Expression {
    fn from(v: &str) -> Self {
        Expression::Literal(Literal::String(v.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Like,
    ILike,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expression,
    pub asc: Option<bool>,
}

/// Scan direction for a forced index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    Asc,
    Desc,
}

impl IndexDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IndexDirection::Asc => "ASC",
            IndexDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedIndex {
    pub name: String,
    pub direction: Option<IndexDirection>,
}

/// Index hints for the FROM table. Rendered hint text first, then the
/// forced index, whatever order they were attached in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexHints {
    pub hint: Option<String>,
    pub forced: Option<ForcedIndex>,
}

impl IndexHints {
    pub fn is_empty(&self) -> bool {
        self.hint.is_none() && self.forced.is_none()
    }

    /// Comma-joined hint list without the `@{}` wrapper.
    pub fn render(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(hint) = &self.hint {
            parts.push(hint.clone());
        }
        if let Some(forced) = &self.forced {
            let mut part = format!("FORCE_INDEX={}", forced.name);
            if let Some(direction) = forced.direction {
                part.push(',');
                part.push_str(direction.as_sql());
            }
            parts.push(part);
        }
        (!parts.is_empty()).then(|| parts.join(","))
    }
}
