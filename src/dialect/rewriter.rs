/// Dialect-correct SQL fragments.
///
/// Every fragment consults the capability table: syntax that is merely
/// meaningless on the target (CONCURRENTLY, operator classes) is dropped with
/// a warning, while features the caller explicitly asked for and the target
/// cannot provide are rejected with `AdapterError::Unsupported`.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlparser::keywords::ALL_KEYWORDS;
use tracing::warn;

use super::capability::{CapabilityFlags, IsolationLevel};
use crate::db::schema::{ColumnDefinition, IndexColumns, IndexDescriptor, SortOrder};
use crate::error::{AdapterError, Result};
use crate::interval::Duration;

/// A value to be embedded in SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Arbitrary-precision decimal in its textual form.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Interval(Duration),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Value::Interval(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Options that only matter when creating an index.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub concurrently: bool,
    pub if_not_exists: bool,
}

/// Object a comment is attached to.
#[derive(Debug, Clone)]
pub enum CommentTarget<'a> {
    Table(&'a str),
    Column { table: &'a str, column: &'a str },
    Index(&'a str),
}

/// Whether `word` is a SQL keyword in any dialect the parser knows.
pub fn is_keyword(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    ALL_KEYWORDS.binary_search(&upper.as_str()).is_ok()
}

/// Always-quoted identifier, embedded quotes doubled.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote each dot-separated part of a possibly schema-qualified name.
pub fn quote_table_name(name: &str) -> String {
    name.split('.')
        .map(|part| quote_identifier(part.trim_matches('"')))
        .collect::<Vec<_>>()
        .join(".")
}

/// Single-quoted string literal.
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Debug, Clone)]
pub struct SqlRewriter {
    caps: Arc<CapabilityFlags>,
}

impl SqlRewriter {
    pub fn new(caps: Arc<CapabilityFlags>) -> Self {
        Self { caps }
    }

    pub fn capabilities(&self) -> &CapabilityFlags {
        &self.caps
    }

    /// Maximum identifier length reported to migrations.
    pub fn identifier_length_limit(&self) -> usize {
        self.caps.max_identifier_length
    }

    /// Render a value as a SQL literal.
    ///
    /// Numbers are emitted as quoted strings when the target only narrows
    /// safely from string-typed input.
    pub fn quote_literal(&self, value: &Value) -> Result<String> {
        let numeric = |text: String| {
            if self.caps.quote_numeric_literals {
                format!("'{}'", text)
            } else {
                text
            }
        };

        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::Integer(i) => numeric(i.to_string()),
            Value::Float(f) if f.is_nan() => "'NaN'".to_string(),
            Value::Float(f) if f.is_infinite() => {
                if f.is_sign_positive() {
                    "'Infinity'".to_string()
                } else {
                    "'-Infinity'".to_string()
                }
            }
            Value::Float(f) => numeric(f.to_string()),
            Value::Decimal(d) => {
                if !is_decimal_text(d) {
                    return Err(AdapterError::InvalidArgument(format!(
                        "{:?} is not a decimal number",
                        d
                    )));
                }
                numeric(d.clone())
            }
            Value::Text(s) => quote_string(s),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
                format!("'\\x{}'", hex)
            }
            Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => {
                format!("'{}'", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Interval(d) => quote_string(&d.to_sql_text(None)),
        })
    }

    /// `CREATE INDEX` statement for a descriptor.
    pub fn render_index_creation(
        &self,
        index: &IndexDescriptor,
        options: &IndexOptions,
    ) -> Result<String> {
        if index.name.chars().count() > self.caps.max_identifier_length {
            return Err(AdapterError::InvalidArgument(format!(
                "Index name '{}' on table '{}' is too long; the limit is {} characters",
                index.name, index.table, self.caps.max_identifier_length
            )));
        }

        let mut sql = String::from("CREATE ");
        if index.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");

        if options.concurrently {
            if self.caps.supports_concurrent_index {
                sql.push_str("CONCURRENTLY ");
            } else {
                warn!(index = %index.name, "omitting CONCURRENTLY: not guaranteed by the target");
            }
        }
        if options.if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }

        sql.push_str(&format!(
            "{} ON {}",
            quote_identifier(&index.name),
            quote_table_name(&index.table)
        ));

        if let Some(using) = &index.using {
            if using.is_empty() || !using.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(AdapterError::InvalidArgument(format!(
                    "invalid index method: {:?}",
                    using
                )));
            }
            sql.push_str(&format!(" USING {}", using));
        }

        sql.push_str(&format!(" ({})", self.render_index_columns(index)?));

        if !index.include.is_empty() {
            if !self.caps.supports_index_include {
                return Err(AdapterError::Unsupported(format!(
                    "covering columns on index {}",
                    index.name
                )));
            }
            let cols: Vec<String> = index.include.iter().map(|c| quote_identifier(c)).collect();
            sql.push_str(&format!(" INCLUDE ({})", cols.join(", ")));
        }

        if let Some(predicate) = &index.predicate {
            if !self.caps.supports_partial_index {
                return Err(AdapterError::Unsupported(format!(
                    "partial index {} (WHERE {})",
                    index.name, predicate
                )));
            }
            sql.push_str(&format!(" WHERE {}", self.render_predicate(predicate)));
        }

        Ok(sql)
    }

    fn render_index_columns(&self, index: &IndexDescriptor) -> Result<String> {
        match &index.columns {
            IndexColumns::Expression(expr) => {
                if !self.caps.supports_expression_index {
                    return Err(AdapterError::Unsupported(format!(
                        "expression index {} ({})",
                        index.name, expr
                    )));
                }
                Ok(expr.clone())
            }
            IndexColumns::Names(columns) => {
                if columns.is_empty() {
                    return Err(AdapterError::InvalidArgument(format!(
                        "index {} has no columns",
                        index.name
                    )));
                }
                let parts: Vec<String> = columns
                    .iter()
                    .map(|col| {
                        let mut part = quote_identifier(&col.name);
                        if let Some(opclass) = &col.opclass {
                            if self.caps.supports_index_opclass {
                                part.push(' ');
                                part.push_str(opclass);
                            } else {
                                warn!(index = %index.name, column = %col.name, "omitting unsupported operator class {}", opclass);
                            }
                        }
                        if col.order == SortOrder::Desc {
                            part.push_str(" DESC");
                        }
                        part
                    })
                    .collect();
                Ok(parts.join(", "))
            }
        }
    }

    /// Wrap an index predicate in parentheses when the target needs it.
    ///
    /// Predicates starting with a keyword-named column are always wrapped.
    pub fn render_predicate(&self, predicate: &str) -> String {
        let trimmed = predicate.trim();
        if is_parenthesized(trimmed) {
            return trimmed.to_string();
        }
        let leading_keyword = trimmed
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .next()
            .is_some_and(|word| !word.is_empty() && is_keyword(word));
        if self.caps.parenthesize_index_predicates || leading_keyword {
            format!("({})", trimmed)
        } else {
            trimmed.to_string()
        }
    }

    /// `ALTER TABLE ... ADD COLUMN`.
    pub fn render_add_column(&self, table: &str, column: &ColumnDefinition) -> Result<String> {
        if column.name.chars().count() > self.caps.max_identifier_length {
            return Err(AdapterError::InvalidArgument(format!(
                "Column name '{}' is too long; the limit is {} characters",
                column.name, self.caps.max_identifier_length
            )));
        }
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_table_name(table),
            quote_identifier(&column.name),
            column.sql_type
        );
        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        Ok(sql)
    }

    /// `COMMENT ON ...`; a `None` comment removes it.
    pub fn render_comment(&self, target: &CommentTarget<'_>, comment: Option<&str>) -> Result<String> {
        if !self.caps.supports_comments {
            return Err(AdapterError::Unsupported("comments".into()));
        }
        let object = match target {
            CommentTarget::Table(table) => format!("TABLE {}", quote_table_name(table)),
            CommentTarget::Column { table, column } => {
                format!("COLUMN {}.{}", quote_table_name(table), quote_identifier(column))
            }
            CommentTarget::Index(index) => format!("INDEX {}", quote_table_name(index)),
        };
        let text = comment.map_or_else(|| "NULL".to_string(), quote_string);
        Ok(format!("COMMENT ON {} IS {}", object, text))
    }

    /// `SET TRANSACTION ISOLATION LEVEL` for the engine-side level.
    pub fn render_set_isolation(&self, requested: IsolationLevel) -> Result<String> {
        let level = self.caps.isolation_level(requested).ok_or_else(|| {
            AdapterError::Unsupported(format!("isolation level {}", requested))
        })?;
        Ok(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()))
    }

    /// Multi-row `INSERT` for fixture loading.
    ///
    /// Stops at the first column the table does not have. Columns missing
    /// from a row are filled with `DEFAULT`.
    pub fn render_bulk_insert(
        &self,
        table: &str,
        known_columns: &[String],
        rows: &[BTreeMap<String, Value>],
    ) -> Result<Option<String>> {
        if rows.is_empty() {
            return Ok(None);
        }

        let mut columns: Vec<&str> = Vec::new();
        for row in rows {
            for name in row.keys() {
                if !known_columns.iter().any(|c| c == name) {
                    return Err(AdapterError::InvalidArgument(format!(
                        "table \"{}\" has no column named \"{}\"",
                        table, name
                    )));
                }
                if !columns.contains(&name.as_str()) {
                    columns.push(name.as_str());
                }
            }
        }

        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            let values = columns
                .iter()
                .map(|col| match row.get(*col) {
                    Some(value) => self.quote_literal(value),
                    None => Ok("DEFAULT".to_string()),
                })
                .collect::<Result<Vec<_>>>()?;
            tuples.push(format!("({})", values.join(", ")));
        }

        let quoted: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
        Ok(Some(format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_table_name(table),
            quoted.join(", "),
            tuples.join(", ")
        )))
    }
}

fn is_decimal_text(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let int = parts.next().unwrap_or("");
    let frac = parts.next();
    !int.is_empty()
        && int.chars().all(|c| c.is_ascii_digit())
        && frac.map_or(true, |f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()))
}

/// True when the outermost parentheses enclose the whole text.
fn is_parenthesized(s: &str) -> bool {
    if !(s.starts_with('(') && s.ends_with(')')) {
        return false;
    }
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != s.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::IndexColumn;

    fn cockroach() -> SqlRewriter {
        SqlRewriter::new(Arc::new(CapabilityFlags::cockroachdb()))
    }

    fn postgres() -> SqlRewriter {
        SqlRewriter::new(Arc::new(CapabilityFlags::postgres()))
    }

    fn index(name: &str, columns: &[&str]) -> IndexDescriptor {
        IndexDescriptor::new(
            "accounts",
            name,
            IndexColumns::Names(columns.iter().map(|c| IndexColumn::new(*c)).collect()),
        )
    }

    #[test]
    fn test_numeric_literals_are_quoted() {
        let rw = cockroach();
        for v in [0i64, 7, -42, i64::MAX, i64::MIN, 1_000_000] {
            let quoted = rw.quote_literal(&Value::Integer(v)).unwrap();
            assert_eq!(quoted, format!("'{}'", v));
            let inner = &quoted[1..quoted.len() - 1];
            assert!(quoted.starts_with('\'') && quoted.ends_with('\''));
            assert!(inner.chars().all(|c| c.is_ascii_digit() || c == '-'));
        }
        assert_eq!(rw.quote_literal(&Value::Float(1.5)).unwrap(), "'1.5'");
        assert_eq!(
            rw.quote_literal(&Value::Decimal("-12.50".into())).unwrap(),
            "'-12.50'"
        );
    }

    #[test]
    fn test_postgres_keeps_bare_numbers() {
        assert_eq!(postgres().quote_literal(&Value::Integer(5)).unwrap(), "5");
    }

    #[test]
    fn test_quote_other_literals() {
        let rw = cockroach();
        assert_eq!(rw.quote_literal(&Value::Null).unwrap(), "NULL");
        assert_eq!(rw.quote_literal(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(rw.quote_literal(&"O'Brien".into()).unwrap(), "'O''Brien'");
        assert_eq!(rw.quote_literal(&Value::Bytes(vec![0xde, 0xad])).unwrap(), "'\\xdead'");
        assert_eq!(rw.quote_literal(&Value::Float(f64::NAN)).unwrap(), "'NaN'");
        assert_eq!(
            rw.quote_literal(&Value::Interval(Duration::new(0, 0, 1, 0, 0, 0.0))).unwrap(),
            "'0 years 0 mons 1 days 0 hours 0 minutes 0 seconds'"
        );
        assert!(rw.quote_literal(&Value::Decimal("1e10".into())).is_err());
        assert_eq!(rw.quote_literal(&Value::from(None::<i64>)).unwrap(), "NULL");
    }

    #[test]
    fn test_identifier_limit() {
        assert_eq!(cockroach().identifier_length_limit(), 63);
    }

    #[test]
    fn test_render_simple_index() {
        let sql = cockroach()
            .render_index_creation(&index("accounts_idx", &["firm_id"]), &IndexOptions::default())
            .unwrap();
        assert_eq!(sql, "CREATE INDEX \"accounts_idx\" ON \"accounts\" (\"firm_id\")");
    }

    #[test]
    fn test_render_drops_concurrently_and_opclass() {
        let mut idx = index("accounts_name_idx", &["name"]);
        if let IndexColumns::Names(cols) = &mut idx.columns {
            cols[0].opclass = Some("text_pattern_ops".into());
            cols[0].order = SortOrder::Desc;
        }
        idx.unique = true;
        let options = IndexOptions {
            concurrently: true,
            if_not_exists: true,
        };

        let sql = cockroach().render_index_creation(&idx, &options).unwrap();
        assert_eq!(
            sql,
            "CREATE UNIQUE INDEX IF NOT EXISTS \"accounts_name_idx\" ON \"accounts\" (\"name\" DESC)"
        );

        let sql = postgres().render_index_creation(&idx, &options).unwrap();
        assert!(sql.contains("CONCURRENTLY"));
        assert!(sql.contains("\"name\" text_pattern_ops DESC"));
    }

    #[test]
    fn test_render_partial_index_wraps_predicate() {
        let mut idx = index("active_idx", &["firm_id"]);
        idx.predicate = Some("deleted_at IS NULL".into());
        idx.include = vec!["balance".into()];
        let sql = cockroach()
            .render_index_creation(&idx, &IndexOptions::default())
            .unwrap();
        assert!(sql.ends_with("INCLUDE (\"balance\") WHERE (deleted_at IS NULL)"));

        let sql = postgres()
            .render_index_creation(&idx, &IndexOptions::default())
            .unwrap();
        assert!(sql.ends_with("WHERE deleted_at IS NULL"));
    }

    #[test]
    fn test_predicate_with_keyword_column_is_wrapped() {
        assert_eq!(postgres().render_predicate("user IS NOT NULL"), "(user IS NOT NULL)");
        assert_eq!(cockroach().render_predicate("(a > 1)"), "(a > 1)");
        assert_eq!(cockroach().render_predicate("(a > 1) OR (b > 1)"), "((a > 1) OR (b > 1))");
    }

    #[test]
    fn test_unsupported_features_are_rejected() {
        let caps = CapabilityFlags {
            supports_expression_index: false,
            supports_partial_index: false,
            ..CapabilityFlags::cockroachdb()
        };
        let rw = SqlRewriter::new(Arc::new(caps));

        let expr = IndexDescriptor::new(
            "accounts",
            "lower_name_idx",
            IndexColumns::Expression("lower(name)".into()),
        );
        let err = rw.render_index_creation(&expr, &IndexOptions::default()).unwrap_err();
        assert!(matches!(err, AdapterError::Unsupported(msg) if msg.contains("expression index")));

        let mut partial = index("p_idx", &["firm_id"]);
        partial.predicate = Some("firm_id > 0".into());
        let err = rw.render_index_creation(&partial, &IndexOptions::default()).unwrap_err();
        assert!(matches!(err, AdapterError::Unsupported(_)));
    }

    #[test]
    fn test_long_index_name_is_rejected() {
        let name = "i".repeat(64);
        let err = cockroach()
            .render_index_creation(&index(&name, &["firm_id"]), &IndexOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_add_column() {
        let col = ColumnDefinition {
            name: "credit_limit".into(),
            sql_type: "INT8".into(),
            nullable: false,
            default: Some("'0'".into()),
        };
        assert_eq!(
            cockroach().render_add_column("public.accounts", &col).unwrap(),
            "ALTER TABLE \"public\".\"accounts\" ADD COLUMN \"credit_limit\" INT8 DEFAULT '0' NOT NULL"
        );
    }

    #[test]
    fn test_comments() {
        let sql = cockroach()
            .render_comment(
                &CommentTarget::Column {
                    table: "accounts",
                    column: "firm_id",
                },
                Some("owning firm"),
            )
            .unwrap();
        assert_eq!(sql, "COMMENT ON COLUMN \"accounts\".\"firm_id\" IS 'owning firm'");

        let caps = CapabilityFlags {
            supports_comments: false,
            ..CapabilityFlags::cockroachdb()
        };
        let rw = SqlRewriter::new(Arc::new(caps));
        assert!(rw.render_comment(&CommentTarget::Table("accounts"), None).is_err());
    }

    #[test]
    fn test_isolation_level_mapping() {
        assert_eq!(
            cockroach()
                .render_set_isolation(IsolationLevel::ReadCommitted)
                .unwrap(),
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        );

        let mut caps = CapabilityFlags::cockroachdb();
        caps.isolation_level_map.remove(&IsolationLevel::ReadUncommitted);
        let rw = SqlRewriter::new(Arc::new(caps));
        assert!(matches!(
            rw.render_set_isolation(IsolationLevel::ReadUncommitted),
            Err(AdapterError::Unsupported(_))
        ));
    }

    #[test]
    fn test_bulk_insert() {
        let known = vec!["id".to_string(), "firm_id".to_string(), "name".to_string()];
        let rows = vec![
            BTreeMap::from([("id".to_string(), Value::Integer(1)), ("name".to_string(), "a".into())]),
            BTreeMap::from([("id".to_string(), Value::Integer(2)), ("firm_id".to_string(), Value::Integer(9))]),
        ];
        let sql = cockroach()
            .render_bulk_insert("accounts", &known, &rows)
            .unwrap()
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"accounts\" (\"id\", \"name\", \"firm_id\") VALUES ('1', 'a', DEFAULT), ('2', DEFAULT, '9')"
        );
        assert!(cockroach().render_bulk_insert("accounts", &known, &[]).unwrap().is_none());
    }

    #[test]
    fn test_bulk_insert_fails_on_first_unknown_column() {
        let known = vec!["id".to_string()];
        let rows = vec![BTreeMap::from([
            ("bogus".to_string(), Value::Integer(1)),
            ("id".to_string(), Value::Integer(1)),
            ("zzz".to_string(), Value::Integer(1)),
        ])];
        let err = cockroach()
            .render_bulk_insert("accounts", &known, &rows)
            .unwrap_err();
        assert!(err.to_string().contains("\"bogus\""));
        assert!(!err.to_string().contains("zzz"));
    }

    #[test]
    fn test_quote_table_name() {
        assert_eq!(quote_table_name("public.accounts"), "\"public\".\"accounts\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert!(is_keyword("select"));
        assert!(!is_keyword("firm_id"));
    }
}
