/// Static capability table consulted by every other component.
///
/// A `CapabilityFlags` value is built once when the adapter is configured
/// (dialect defaults, then optional overrides from the config file) and is
/// never mutated afterwards; components hold it behind an `Arc`.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};

/// Identifier length kept for migration compatibility even though the
/// distributed engine accepts longer names.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Transaction isolation levels an ORM may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Typed capability keys. Code paths ask for a `Capability`, never for a
/// dialect name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Savepoints,
    MaxSavepointDepth,
    PartialIndex,
    ExpressionIndex,
    IndexOpclass,
    ConcurrentIndex,
    IndexInclude,
    Comments,
    AsOfSystemTime,
    IndexHints,
    ShowCreateTable,
    RegprocedureCast,
    HiddenColumns,
    QuoteNumericLiterals,
    ParenthesizeIndexPredicates,
    MaxIdentifierLength,
}

impl Capability {
    pub const ALL: [Capability; 16] = [
        Capability::Savepoints,
        Capability::MaxSavepointDepth,
        Capability::PartialIndex,
        Capability::ExpressionIndex,
        Capability::IndexOpclass,
        Capability::ConcurrentIndex,
        Capability::IndexInclude,
        Capability::Comments,
        Capability::AsOfSystemTime,
        Capability::IndexHints,
        Capability::ShowCreateTable,
        Capability::RegprocedureCast,
        Capability::HiddenColumns,
        Capability::QuoteNumericLiterals,
        Capability::ParenthesizeIndexPredicates,
        Capability::MaxIdentifierLength,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Savepoints => "supports_savepoints",
            Capability::MaxSavepointDepth => "max_savepoint_depth",
            Capability::PartialIndex => "supports_partial_index",
            Capability::ExpressionIndex => "supports_expression_index",
            Capability::IndexOpclass => "supports_index_opclass",
            Capability::ConcurrentIndex => "supports_concurrent_index",
            Capability::IndexInclude => "supports_index_include",
            Capability::Comments => "supports_comments",
            Capability::AsOfSystemTime => "supports_as_of_system_time",
            Capability::IndexHints => "supports_index_hints",
            Capability::ShowCreateTable => "supports_show_create_table",
            Capability::RegprocedureCast => "supports_regprocedure_cast",
            Capability::HiddenColumns => "supports_hidden_columns",
            Capability::QuoteNumericLiterals => "quote_numeric_literals",
            Capability::ParenthesizeIndexPredicates => "parenthesize_index_predicates",
            Capability::MaxIdentifierLength => "max_identifier_length",
        }
    }
}

impl FromStr for Capability {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self> {
        Capability::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| AdapterError::UnknownCapability(s.to_string()))
    }
}

/// Value of a single capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Flag(bool),
    Count(usize),
}

impl CapabilityValue {
    pub fn as_bool(&self) -> bool {
        match self {
            CapabilityValue::Flag(b) => *b,
            CapabilityValue::Count(n) => *n > 0,
        }
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityValue::Flag(b) => write!(f, "{}", b),
            CapabilityValue::Count(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityFlags {
    pub supports_savepoints: bool,
    /// Savepoints that may be open at once inside one transaction.
    pub max_savepoint_depth: usize,
    pub supports_partial_index: bool,
    pub supports_expression_index: bool,
    pub supports_index_opclass: bool,
    /// Whether `CREATE INDEX CONCURRENTLY` carries real semantics.
    pub supports_concurrent_index: bool,
    /// `STORING (...)` / `INCLUDE (...)` covering columns.
    pub supports_index_include: bool,
    pub supports_comments: bool,
    pub supports_as_of_system_time: bool,
    pub supports_index_hints: bool,
    pub supports_show_create_table: bool,
    pub supports_regprocedure_cast: bool,
    pub supports_hidden_columns: bool,
    /// Render numeric values as quoted strings.
    pub quote_numeric_literals: bool,
    pub parenthesize_index_predicates: bool,
    pub max_identifier_length: usize,
    pub isolation_level_map: BTreeMap<IsolationLevel, IsolationLevel>,
}

impl CapabilityFlags {
    /// Stock PostgreSQL behaviour of the driver being reused.
    pub fn postgres() -> Self {
        let isolation_level_map = [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
        ]
        .into_iter()
        .map(|level| (level, level))
        .collect();

        Self {
            supports_savepoints: true,
            max_savepoint_depth: usize::MAX,
            supports_partial_index: true,
            supports_expression_index: true,
            supports_index_opclass: true,
            supports_concurrent_index: true,
            supports_index_include: true,
            supports_comments: true,
            supports_as_of_system_time: false,
            supports_index_hints: false,
            supports_show_create_table: false,
            supports_regprocedure_cast: true,
            supports_hidden_columns: false,
            quote_numeric_literals: false,
            parenthesize_index_predicates: false,
            max_identifier_length: MAX_IDENTIFIER_LENGTH,
            isolation_level_map,
        }
    }

    /// The distributed engine's table, derived from the PostgreSQL one.
    pub fn cockroachdb() -> Self {
        // Every weaker level is upgraded to SERIALIZABLE.
        let isolation_level_map = [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
        ]
        .into_iter()
        .map(|level| (level, IsolationLevel::Serializable))
        .collect();

        Self {
            max_savepoint_depth: 1,
            supports_index_opclass: false,
            supports_concurrent_index: false,
            supports_as_of_system_time: true,
            supports_index_hints: true,
            supports_show_create_table: true,
            supports_regprocedure_cast: false,
            supports_hidden_columns: true,
            quote_numeric_literals: true,
            parenthesize_index_predicates: true,
            isolation_level_map,
            ..Self::postgres()
        }
    }

    /// Look up a capability by typed key.
    pub fn capability(&self, capability: Capability) -> CapabilityValue {
        use CapabilityValue::{Count, Flag};
        match capability {
            Capability::Savepoints => Flag(self.supports_savepoints),
            Capability::MaxSavepointDepth => Count(self.max_savepoint_depth),
            Capability::PartialIndex => Flag(self.supports_partial_index),
            Capability::ExpressionIndex => Flag(self.supports_expression_index),
            Capability::IndexOpclass => Flag(self.supports_index_opclass),
            Capability::ConcurrentIndex => Flag(self.supports_concurrent_index),
            Capability::IndexInclude => Flag(self.supports_index_include),
            Capability::Comments => Flag(self.supports_comments),
            Capability::AsOfSystemTime => Flag(self.supports_as_of_system_time),
            Capability::IndexHints => Flag(self.supports_index_hints),
            Capability::ShowCreateTable => Flag(self.supports_show_create_table),
            Capability::RegprocedureCast => Flag(self.supports_regprocedure_cast),
            Capability::HiddenColumns => Flag(self.supports_hidden_columns),
            Capability::QuoteNumericLiterals => Flag(self.quote_numeric_literals),
            Capability::ParenthesizeIndexPredicates => Flag(self.parenthesize_index_predicates),
            Capability::MaxIdentifierLength => Count(self.max_identifier_length),
        }
    }

    /// Look up a capability by its configuration name.
    pub fn capability_named(&self, name: &str) -> Result<CapabilityValue> {
        Ok(self.capability(name.parse()?))
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capability(capability).as_bool()
    }

    /// Engine-side level for a requested isolation level.
    pub fn isolation_level(&self, requested: IsolationLevel) -> Option<IsolationLevel> {
        self.isolation_level_map.get(&requested).copied()
    }

    /// Apply `[capabilities]` overrides from the configuration file.
    ///
    /// Unknown keys and mistyped values are configuration errors; the
    /// table is only ever changed here, before it is shared.
    pub fn with_overrides(mut self, overrides: &toml::Table) -> Result<Self> {
        for (key, value) in overrides {
            let capability: Capability = key.parse()?;
            match (capability, value) {
                (Capability::MaxSavepointDepth, toml::Value::Integer(n)) => {
                    self.max_savepoint_depth = non_negative(key, *n)?;
                }
                (Capability::MaxIdentifierLength, toml::Value::Integer(n)) => {
                    self.max_identifier_length = non_negative(key, *n)?;
                }
                (Capability::MaxSavepointDepth | Capability::MaxIdentifierLength, other) => {
                    return Err(AdapterError::Configuration(format!(
                        "capability {} expects an integer, got {}",
                        key, other
                    )));
                }
                (flag, toml::Value::Boolean(b)) => *self.flag_mut(flag) = *b,
                (_, other) => {
                    return Err(AdapterError::Configuration(format!(
                        "capability {} expects a boolean, got {}",
                        key, other
                    )));
                }
            }
        }
        Ok(self)
    }

    fn flag_mut(&mut self, capability: Capability) -> &mut bool {
        match capability {
            Capability::Savepoints => &mut self.supports_savepoints,
            Capability::PartialIndex => &mut self.supports_partial_index,
            Capability::ExpressionIndex => &mut self.supports_expression_index,
            Capability::IndexOpclass => &mut self.supports_index_opclass,
            Capability::ConcurrentIndex => &mut self.supports_concurrent_index,
            Capability::IndexInclude => &mut self.supports_index_include,
            Capability::Comments => &mut self.supports_comments,
            Capability::AsOfSystemTime => &mut self.supports_as_of_system_time,
            Capability::IndexHints => &mut self.supports_index_hints,
            Capability::ShowCreateTable => &mut self.supports_show_create_table,
            Capability::RegprocedureCast => &mut self.supports_regprocedure_cast,
            Capability::HiddenColumns => &mut self.supports_hidden_columns,
            Capability::QuoteNumericLiterals => &mut self.quote_numeric_literals,
            Capability::ParenthesizeIndexPredicates => &mut self.parenthesize_index_predicates,
            Capability::MaxSavepointDepth | Capability::MaxIdentifierLength => {
                unreachable!("numeric capabilities are handled by with_overrides")
            }
        }
    }
}

fn non_negative(key: &str, n: i64) -> Result<usize> {
    usize::try_from(n).map_err(|_| {
        AdapterError::Configuration(format!("capability {} must not be negative", key))
    })
}

impl Default for CapabilityFlags {
    fn default() -> Self {
        Self::cockroachdb()
    }
}
