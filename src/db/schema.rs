use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use super::executor::{CatalogRow, Executor};
use crate::dialect::rewriter::{quote_string, quote_table_name};
use crate::dialect::CapabilityFlags;
use crate::error::{AdapterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One key column of an index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexColumn {
    pub name: String,
    pub order: SortOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opclass: Option<String>,
}

impl IndexColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Asc,
            opclass: None,
        }
    }

    pub fn desc(mut self) -> Self {
        self.order = SortOrder::Desc;
        self
    }
}

/// Key columns with their sort orders, or a single expression text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexColumns {
    Names(Vec<IndexColumn>),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDescriptor {
    pub table: String,
    pub name: String,
    pub unique: bool,
    pub columns: IndexColumns,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub using: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
    /// Non-key columns stored in the index.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl IndexDescriptor {
    pub fn new(table: impl Into<String>, name: impl Into<String>, columns: IndexColumns) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            unique: false,
            columns,
            using: None,
            predicate: None,
            include: Vec::new(),
            comment: None,
        }
    }

    /// Key column names; empty for expression indexes.
    pub fn column_names(&self) -> Vec<&str> {
        match &self.columns {
            IndexColumns::Names(cols) => cols.iter().map(|c| c.name.as_str()).collect(),
            IndexColumns::Expression(_) => Vec::new(),
        }
    }

    /// Columns sorted in non-default order.
    pub fn orders(&self) -> BTreeMap<&str, SortOrder> {
        match &self.columns {
            IndexColumns::Names(cols) => cols
                .iter()
                .filter(|c| c.order == SortOrder::Desc)
                .map(|c| (c.name.as_str(), c.order))
                .collect(),
            IndexColumns::Expression(_) => BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

impl ReferentialAction {
    /// Decode `pg_constraint.confupdtype`/`confdeltype`; `a` (no action)
    /// maps to `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Self::Cascade),
            "n" => Some(Self::SetNull),
            "d" => Some(Self::SetDefault),
            "r" => Some(Self::Restrict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKeyDescriptor {
    pub name: String,
    pub from_table: String,
    pub to_table: String,
    pub columns: Vec<String>,
    pub primary_keys: Vec<String>,
    pub on_update: Option<ReferentialAction>,
    pub on_delete: Option<ReferentialAction>,
    pub validated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckConstraint {
    pub name: String,
    pub expression: String,
    pub validated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: String,
    pub default: Option<String>,
    pub nullable: bool,
    pub comment: Option<String>,
    pub generated: bool,
    pub hidden: bool,
    /// Fractional-second precision of interval columns.
    pub interval_precision: Option<u32>,
}

/// A column to be added by DDL.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    /// Default as a SQL expression.
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeDescriptor {
    pub oid: u32,
    pub name: String,
    pub element_oid: u32,
    pub delimiter: String,
    pub input: String,
    pub range_subtype: Option<u32>,
    /// `pg_type.typtype`: b, c, d, e, p, r.
    pub kind: String,
    pub base_type: u32,
}

/// Pieces recovered from a rendered index definition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedIndexDefinition {
    pub using: Option<String>,
    /// The text between the key-list parentheses, untouched.
    pub expression: String,
    pub columns: Vec<IndexColumn>,
    pub predicate: Option<String>,
    pub storing: Vec<String>,
}

fn body_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((.+?)\)(?: WHERE (.+))?\z").expect("valid index body pattern"))
}

fn storing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s+(?:STORING|INCLUDE)\s*\(([^)]*)\)").expect("valid storing pattern")
    })
}

fn using_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\bUSING\s+|^\s*)(\w+)\s*\(").expect("valid using pattern"))
}

/// Parse an index definition as rendered by `pg_get_indexdef`.
///
/// Accepts both the full `CREATE INDEX ... USING method (...)` form and the
/// bare `method (...)` form. Returns `None` when no key list is found.
pub fn parse_index_definition(definition: &str) -> Option<ParsedIndexDefinition> {
    let definition = definition.trim();

    let storing = storing_regex()
        .captures(definition)
        .map(|caps| split_top_level(&caps[1]).into_iter().map(unquote_identifier).collect())
        .unwrap_or_default();
    let stripped = storing_regex().replace(definition, "");

    let using = using_regex()
        .captures(&stripped)
        .map(|caps| caps[1].to_ascii_lowercase());

    let caps = body_regex().captures(&stripped)?;
    let expression = caps[1].to_string();
    let predicate = caps.get(2).map(|m| m.as_str().trim().to_string());

    let columns = split_top_level(&expression)
        .into_iter()
        .map(parse_index_column)
        .collect();

    Some(ParsedIndexDefinition {
        using,
        expression,
        columns,
        predicate,
        storing,
    })
}

fn parse_index_column(part: &str) -> IndexColumn {
    let mut text = part.trim();
    for suffix in [" NULLS FIRST", " NULLS LAST"] {
        if let Some(rest) = strip_suffix_ignore_case(text, suffix) {
            text = rest.trim_end();
        }
    }

    let mut order = SortOrder::Asc;
    if let Some(rest) = strip_suffix_ignore_case(text, " DESC") {
        order = SortOrder::Desc;
        text = rest.trim_end();
    } else if let Some(rest) = strip_suffix_ignore_case(text, " ASC") {
        text = rest.trim_end();
    }

    let mut opclass = None;
    if !text.starts_with('"') && !text.contains('(') {
        if let Some((name, class)) = text.split_once(char::is_whitespace) {
            opclass = Some(class.trim().to_string());
            text = name;
        }
    } else if let Some(end) = closing_quote(text) {
        let rest = text[end + 1..].trim();
        if !rest.is_empty() && !rest.contains('(') {
            opclass = Some(rest.to_string());
            text = &text[..=end];
        }
    }

    IndexColumn {
        name: unquote_identifier(text),
        order,
        opclass,
    }
}

fn strip_suffix_ignore_case<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    let split = text.len().checked_sub(suffix.len())?;
    if !text.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = text.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

/// Byte offset of the quote closing a leading quoted identifier.
fn closing_quote(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if bytes.get(i + 1) == Some(&b'"') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

fn unquote_identifier(text: &str) -> String {
    let text = text.trim();
    match closing_quote(text) {
        Some(end) if end == text.len() - 1 => text[1..end].replace("\"\"", "\""),
        _ => text.to_string(),
    }
}

/// Split on commas outside parentheses and quotes.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_double = false;
    let mut in_single = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '"' if !in_single => in_double = !in_double,
            '\'' if !in_double => in_single = !in_single,
            '(' if !in_double && !in_single => depth += 1,
            ')' if !in_double && !in_single => depth -= 1,
            ',' if depth == 0 && !in_double && !in_single => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// Strip `CHECK (...)` and a trailing `NOT VALID` from a constraint definition.
fn check_expression(definition: &str) -> String {
    let mut text = definition.trim();
    if let Some(rest) = strip_suffix_ignore_case(text, " NOT VALID") {
        text = rest.trim_end();
    }
    if text.len() >= 5 && text[..5].eq_ignore_ascii_case("CHECK") {
        text = text[5..].trim_start();
    }
    if text.starts_with('(') && text.ends_with(')') {
        text = &text[1..text.len() - 1];
    }
    text.to_string()
}

/// Fractional-second precision declared on an interval type, e.g.
/// `interval(3)` or `INTERVAL SECOND(3)`.
fn interval_precision(sql_type: &str) -> Option<u32> {
    let lower = sql_type.to_ascii_lowercase();
    if !lower.starts_with("interval") {
        return None;
    }
    let open = lower.rfind('(')?;
    let close = lower[open..].find(')')? + open;
    lower[open + 1..close].trim().parse().ok()
}

fn parse_oid(row: &CatalogRow, column: &str) -> Result<u32> {
    let text = row.text(column);
    text.parse()
        .map_err(|_| AdapterError::Catalog(format!("invalid oid in column {}: {:?}", column, text)))
}

/// Catalog queries over a live connection.
///
/// Every call is a single query (plus one ordinal lookup per index); driver
/// errors propagate unchanged.
pub struct Introspector<E> {
    executor: Arc<E>,
    caps: Arc<CapabilityFlags>,
}

impl<E> Clone for Introspector<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            caps: Arc::clone(&self.caps),
        }
    }
}

impl<E: Executor> Introspector<E> {
    pub fn new(executor: Arc<E>, caps: Arc<CapabilityFlags>) -> Self {
        Self { executor, caps }
    }

    /// Filter on a relation name, qualified by schema when given as
    /// `schema.table`, otherwise by the search path.
    fn relation_filter(rel_col: &str, ns_col: &str, name: &str) -> String {
        match name.split_once('.') {
            Some((schema, table)) => format!(
                "{} = {} AND {} = {}",
                rel_col,
                quote_string(&unquote_identifier(table)),
                ns_col,
                quote_string(&unquote_identifier(schema))
            ),
            None => format!(
                "{} = {} AND {} = ANY (current_schemas(false))",
                rel_col,
                quote_string(&unquote_identifier(name)),
                ns_col
            ),
        }
    }

    fn bare_name(table: &str) -> String {
        let name = table.rsplit_once('.').map_or(table, |(_, t)| t);
        unquote_identifier(name)
    }

    pub async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        let schema_filter = match schema {
            Some(s) => format!("table_schema = {}", quote_string(s)),
            None => "table_schema = ANY (current_schemas(false))".to_string(),
        };
        let sql = format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' AND {} ORDER BY table_name",
            schema_filter
        );
        let rows = self.executor.query(&sql).await?;
        Ok(rows.iter().map(|row| row.text("table_name")).collect())
    }

    pub async fn list_indexes(&self, table: &str) -> Result<Vec<IndexDescriptor>> {
        let sql = format!(
            r#"SELECT DISTINCT i.relname AS name, d.indisunique AS is_unique, d.indkey AS indkey,
    pg_get_indexdef(d.indexrelid) AS definition, t.oid AS table_oid,
    obj_description(i.oid, 'pg_class') AS comment
FROM pg_class t
INNER JOIN pg_index d ON t.oid = d.indrelid
INNER JOIN pg_class i ON d.indexrelid = i.oid
LEFT JOIN pg_namespace n ON n.oid = t.relnamespace
WHERE i.relkind IN ('i', 'I')
  AND d.indisprimary = false
  AND {}
ORDER BY i.relname"#,
            Self::relation_filter("t.relname", "n.nspname", table)
        );

        let rows = self.executor.query(&sql).await?;
        let table_name = Self::bare_name(table);
        let mut indexes = Vec::with_capacity(rows.len());

        for row in &rows {
            let name = row.text("name");
            let definition = row.text("definition");
            let Some(parsed) = parse_index_definition(&definition) else {
                warn!(index = %name, "skipping index with unparseable definition: {}", definition);
                continue;
            };

            let indkey: Vec<i64> = row
                .text("indkey")
                .split_whitespace()
                .filter_map(|k| k.parse().ok())
                .collect();

            let columns = if indkey.contains(&0) {
                IndexColumns::Expression(parsed.expression.clone())
            } else {
                let names = self
                    .attribute_names(parse_oid(row, "table_oid")?, &indkey)
                    .await?;
                let columns: Vec<IndexColumn> = indkey
                    .iter()
                    .filter_map(|key| names.get(key))
                    .map(|attname| {
                        let parsed_col = parsed.columns.iter().find(|c| &c.name == attname);
                        IndexColumn {
                            name: attname.clone(),
                            order: parsed_col.map(|c| c.order).unwrap_or_default(),
                            opclass: parsed_col.and_then(|c| c.opclass.clone()),
                        }
                    })
                    .collect();
                if columns.is_empty() {
                    warn!(index = %name, "skipping index: no key column could be resolved");
                    continue;
                }
                IndexColumns::Names(columns)
            };

            indexes.push(IndexDescriptor {
                table: table_name.clone(),
                name,
                unique: row.flag("is_unique"),
                columns,
                using: parsed.using,
                predicate: parsed.predicate,
                include: parsed.storing,
                comment: row.get("comment").map(str::to_string),
            });
        }

        debug!(table = %table, count = indexes.len(), "loaded indexes");
        Ok(indexes)
    }

    async fn attribute_names(&self, table_oid: u32, keys: &[i64]) -> Result<BTreeMap<i64, String>> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let list: Vec<String> = keys.iter().map(i64::to_string).collect();
        let sql = format!(
            "SELECT a.attnum, a.attname FROM pg_attribute a WHERE a.attrelid = {} AND a.attnum IN ({})",
            table_oid,
            list.join(", ")
        );
        let rows = self.executor.query(&sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| Some((row.get("attnum")?.parse().ok()?, row.text("attname"))))
            .collect())
    }

    pub async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let sql = format!(
            r#"SELECT c.conname AS name, t2.relname AS to_table,
    a1.attname AS column_name, a2.attname AS primary_key,
    c.confupdtype AS on_update, c.confdeltype AS on_delete, c.convalidated AS valid
FROM pg_constraint c
JOIN pg_class t1 ON c.conrelid = t1.oid
JOIN pg_class t2 ON c.confrelid = t2.oid
JOIN pg_namespace n ON n.oid = t1.relnamespace
CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(conkey, confkey, ord)
JOIN pg_attribute a1 ON a1.attrelid = c.conrelid AND a1.attnum = k.conkey
JOIN pg_attribute a2 ON a2.attrelid = c.confrelid AND a2.attnum = k.confkey
WHERE c.contype = 'f'
  AND {}
ORDER BY c.conname, k.ord"#,
            Self::relation_filter("t1.relname", "n.nspname", table)
        );

        let rows = self.executor.query(&sql).await?;
        let from_table = Self::bare_name(table);
        let mut keys: Vec<ForeignKeyDescriptor> = Vec::new();

        for row in &rows {
            let name = row.text("name");
            match keys.last_mut() {
                Some(fk) if fk.name == name => {
                    fk.columns.push(row.text("column_name"));
                    fk.primary_keys.push(row.text("primary_key"));
                }
                _ => keys.push(ForeignKeyDescriptor {
                    name,
                    from_table: from_table.clone(),
                    to_table: row.text("to_table"),
                    columns: vec![row.text("column_name")],
                    primary_keys: vec![row.text("primary_key")],
                    on_update: ReferentialAction::from_code(&row.text("on_update")),
                    on_delete: ReferentialAction::from_code(&row.text("on_delete")),
                    validated: row.flag("valid"),
                }),
            }
        }

        Ok(keys)
    }

    pub async fn list_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let hidden = if self.caps.supports_hidden_columns {
            "JOIN information_schema.columns c ON c.table_schema = kcu.table_schema \
             AND c.table_name = kcu.table_name AND c.column_name = kcu.column_name \
             AND c.is_hidden = 'NO'\n"
        } else {
            ""
        };
        let sql = format!(
            r#"SELECT kcu.column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON tc.constraint_name = kcu.constraint_name
  AND tc.table_schema = kcu.table_schema
  AND tc.table_name = kcu.table_name
{}WHERE tc.constraint_type = 'PRIMARY KEY'
  AND {}
ORDER BY kcu.ordinal_position"#,
            hidden,
            Self::relation_filter("tc.table_name", "tc.table_schema", table)
        );
        let rows = self.executor.query(&sql).await?;
        Ok(rows.iter().map(|row| row.text("column_name")).collect())
    }

    pub async fn list_check_constraints(&self, table: &str) -> Result<Vec<CheckConstraint>> {
        let sql = format!(
            r#"SELECT c.conname AS name, pg_get_constraintdef(c.oid, true) AS definition,
    c.convalidated AS valid
FROM pg_constraint c
JOIN pg_class t ON c.conrelid = t.oid
JOIN pg_namespace n ON n.oid = t.relnamespace
WHERE c.contype = 'c'
  AND {}
ORDER BY c.conname"#,
            Self::relation_filter("t.relname", "n.nspname", table)
        );
        let rows = self.executor.query(&sql).await?;
        Ok(rows
            .iter()
            .map(|row| CheckConstraint {
                name: row.text("name"),
                expression: check_expression(&row.text("definition")),
                validated: row.flag("valid"),
            })
            .collect())
    }

    pub async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let (hidden_col, hidden_join) = if self.caps.supports_hidden_columns {
            (
                "ic.is_hidden AS hidden",
                "LEFT JOIN information_schema.columns ic ON ic.table_schema = n.nspname \
                 AND ic.table_name = t.relname AND ic.column_name = a.attname\n",
            )
        } else {
            ("'NO' AS hidden", "")
        };
        let sql = format!(
            r#"SELECT a.attname AS name, format_type(a.atttypid, a.atttypmod) AS sql_type,
    pg_get_expr(d.adbin, d.adrelid) AS default_value, a.attnotnull AS not_null,
    col_description(a.attrelid, a.attnum) AS comment, a.attgenerated AS generated, {}
FROM pg_attribute a
JOIN pg_class t ON t.oid = a.attrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
LEFT JOIN pg_attrdef d ON a.attrelid = d.adrelid AND a.attnum = d.adnum
{}WHERE a.attnum > 0 AND NOT a.attisdropped
  AND {}
ORDER BY a.attnum"#,
            hidden_col,
            hidden_join,
            Self::relation_filter("t.relname", "n.nspname", table)
        );
        let rows = self.executor.query(&sql).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let sql_type = row.text("sql_type");
                ColumnDescriptor {
                    name: row.text("name"),
                    interval_precision: interval_precision(&sql_type),
                    sql_type,
                    default: row.get("default_value").map(str::to_string),
                    nullable: !row.flag("not_null"),
                    comment: row.get("comment").map(str::to_string),
                    generated: row.get("generated").is_some_and(|g| !g.is_empty()),
                    hidden: row.get("hidden") == Some("YES"),
                }
            })
            .collect())
    }

    /// Type metadata for the driver's type map.
    ///
    /// Matches types whose name is in `known`, plus every range, enum,
    /// domain and array type.
    pub async fn list_type_oids(&self, known: &[&str]) -> Result<Vec<TypeDescriptor>> {
        let names: Vec<String> = known.iter().map(|n| quote_string(n)).collect();
        let mut predicates = Vec::new();
        if !names.is_empty() {
            predicates.push(format!("t.typname IN ({})", names.join(", ")));
        }
        predicates.push("t.typtype IN ('r', 'e', 'd')".to_string());
        if self.caps.supports_regprocedure_cast {
            predicates.push("t.typinput = 'array_in(cstring,oid,integer)'::regprocedure".to_string());
        } else {
            predicates.push("t.typcategory = 'A'".to_string());
        }
        predicates.push("t.typelem != 0".to_string());

        let sql = format!(
            r#"SELECT t.oid, t.typname, t.typelem, t.typdelim, t.typinput, r.rngsubtype, t.typtype, t.typbasetype
FROM pg_type AS t
LEFT JOIN pg_range AS r ON t.oid = r.rngtypid
WHERE {}"#,
            predicates.join(" OR ")
        );

        let rows = self.executor.query(&sql).await?;
        rows.iter()
            .map(|row| {
                Ok(TypeDescriptor {
                    oid: parse_oid(row, "oid")?,
                    name: row.text("typname"),
                    element_oid: parse_oid(row, "typelem")?,
                    delimiter: row.text("typdelim"),
                    input: row.text("typinput"),
                    range_subtype: row.get("rngsubtype").and_then(|s| s.parse().ok()),
                    kind: row.text("typtype"),
                    base_type: row.get("typbasetype").and_then(|s| s.parse().ok()).unwrap_or(0),
                })
            })
            .collect()
    }

    /// Engine-rendered DDL for a table.
    pub async fn show_create_table(&self, table: &str) -> Result<String> {
        if !self.caps.supports_show_create_table {
            return Err(AdapterError::Unsupported("SHOW CREATE TABLE".into()));
        }
        let sql = format!("SHOW CREATE TABLE {}", quote_table_name(table));
        let rows = self.executor.query(&sql).await?;
        rows.first()
            .and_then(|row| row.get("create_statement"))
            .map(str::to_string)
            .ok_or_else(|| AdapterError::Catalog(format!("no create statement returned for {}", table)))
    }
}
