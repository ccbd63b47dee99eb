use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::compiler::compile;
use super::passes::{is_bare_table_text, Pipeline};
use super::types::*;
use crate::dialect::CapabilityFlags;
use crate::error::{AdapterError, Result};

/// Immutable SELECT builder.
///
/// Every method returns a new builder; the underlying AST is shared until a
/// mutation copies it, so a base query can be reused from several threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBuilder {
    query: Arc<SelectQuery>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shortcut for `QueryBuilder::new().from(source)`.
    pub fn table(source: impl Into<TableRef>) -> Self {
        Self::new().from(source)
    }

    fn with(&self, f: impl FnOnce(&mut SelectQuery)) -> Self {
        let mut query = Arc::clone(&self.query);
        f(Arc::make_mut(&mut query));
        Self { query }
    }

    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// Replace the FROM source. Hints attached to the previous source are
    /// discarded.
    pub fn from(&self, source: impl Into<TableRef>) -> Self {
        let source = source.into();
        self.with(|q| {
            q.from = vec![source];
            q.index_hints = IndexHints::default();
        })
    }

    pub fn select(&self, columns: &[&str]) -> Self {
        let items: Vec<SelectItem> = columns
            .iter()
            .map(|c| match *c {
                "*" => SelectItem::Wildcard,
                c => SelectItem::Expression {
                    expr: Expression::column(c),
                    alias: None,
                },
            })
            .collect();
        self.with(|q| q.projections = items)
    }

    pub fn distinct(&self) -> Self {
        self.with(|q| q.distinct = true)
    }

    /// Add a WHERE condition, AND-ed with any existing one.
    pub fn filter(&self, expr: Expression) -> Self {
        self.with(|q| {
            q.filter = Some(match q.filter.take() {
                Some(existing) => existing.and(expr),
                None => expr,
            })
        })
    }

    pub fn join(&self, join_type: JoinType, table: impl Into<TableRef>, on: Expression) -> Self {
        let join = Join {
            join_type,
            table: table.into(),
            condition: Some(JoinCondition::On(on)),
        };
        self.with(|q| q.joins.push(join))
    }

    pub fn order_by(&self, column: &str, asc: bool) -> Self {
        let order = OrderByExpr {
            expr: Expression::column(column),
            asc: Some(asc),
        };
        self.with(|q| q.order_by.push(order))
    }

    pub fn limit(&self, n: u64) -> Self {
        self.with(|q| q.limit = Some(n))
    }

    pub fn offset(&self, n: u64) -> Self {
        self.with(|q| q.offset = Some(n))
    }

    /// Read as of a past timestamp; `None` clears the annotation.
    pub fn with_as_of(&self, time: impl Into<Option<DateTime<Utc>>>) -> Self {
        let time = time.into();
        self.with(|q| q.as_of = time)
    }

    /// Like `with_as_of`, from RFC 3339 text; empty text clears.
    pub fn with_as_of_text(&self, text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(self.with_as_of(None));
        }
        let time = DateTime::parse_from_rfc3339(text).map_err(|e| {
            AdapterError::InvalidArgument(format!("not a timestamp: {:?} ({})", text, e))
        })?;
        Ok(self.with_as_of(time.with_timezone(&Utc)))
    }

    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        self.query.as_of
    }

    /// Whether the FROM target can carry index hints.
    pub fn is_hintable(&self) -> bool {
        match self.query.from.as_slice() {
            [TableRef::Table { .. }] => true,
            [TableRef::Raw(text)] => is_bare_table_text(text),
            _ => false,
        }
    }

    /// Attach planner hint text; a no-op unless the source is a bare table.
    pub fn with_index_hint(&self, hint: &str) -> Self {
        if !self.is_hintable() || hint.trim().is_empty() {
            return self.clone();
        }
        let hint = hint.trim().to_string();
        self.with(|q| q.index_hints.hint = Some(hint))
    }

    /// Force a named index, optionally with a scan direction; a no-op unless
    /// the source is a bare table.
    pub fn with_forced_index(&self, index: &str, direction: Option<IndexDirection>) -> Self {
        if !self.is_hintable() || index.trim().is_empty() {
            return self.clone();
        }
        let forced = ForcedIndex {
            name: index.trim().to_string(),
            direction,
        };
        self.with(|q| q.index_hints.forced = Some(forced))
    }

    pub fn index_hints(&self) -> &IndexHints {
        &self.query.index_hints
    }

    /// Run the extension passes for the target and render SQL.
    pub fn to_sql(&self, caps: &CapabilityFlags) -> Result<String> {
        let query = Pipeline::standard().run((*self.query).clone(), caps)?;
        Ok(compile(&query))
    }
}
