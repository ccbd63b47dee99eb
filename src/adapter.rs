use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_postgres::Client;
use tracing::{debug, info};

use crate::ast::QueryBuilder;
use crate::db::{
    create_client, AdapterConfig, CatalogRow, Executor, IndexDescriptor, Introspector,
    TransactionManager,
};
use crate::dialect::rewriter::{CommentTarget, IndexOptions, Value};
use crate::dialect::{Capability, CapabilityFlags, Dialect, DialectRegistry, SqlRewriter};
use crate::error::Result;

/// One connection plus everything the dialect layers over it.
pub struct Adapter<E> {
    executor: Arc<E>,
    dialect: Arc<dyn Dialect>,
    rewriter: SqlRewriter,
    introspector: Introspector<E>,
    transactions: TransactionManager<E>,
}

impl Adapter<Client> {
    /// Resolve the configured dialect and open a connection.
    pub async fn connect(config: &AdapterConfig, registry: &DialectRegistry) -> Result<Self> {
        let dialect = registry.resolve_with(&config.dialect, &config.capabilities)?;
        let client = create_client(&config.connection).await?;
        info!(dialect = dialect.name(), "adapter ready");
        Ok(Self::new(Arc::new(client), dialect))
    }
}

impl<E: Executor> Adapter<E> {
    pub fn new(executor: Arc<E>, dialect: Arc<dyn Dialect>) -> Self {
        let caps = Arc::clone(dialect.capabilities());
        Self {
            rewriter: dialect.rewriter(),
            introspector: Introspector::new(Arc::clone(&executor), Arc::clone(&caps)),
            transactions: TransactionManager::new(Arc::clone(&executor), caps),
            executor,
            dialect,
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn capabilities(&self) -> &CapabilityFlags {
        self.dialect.capabilities()
    }

    pub fn rewriter(&self) -> &SqlRewriter {
        &self.rewriter
    }

    pub fn introspector(&self) -> &Introspector<E> {
        &self.introspector
    }

    pub fn transactions(&self) -> &TransactionManager<E> {
        &self.transactions
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().supports(capability)
    }

    pub fn supports_savepoints(&self) -> bool {
        self.supports(Capability::Savepoints)
    }

    pub fn supports_comments(&self) -> bool {
        self.supports(Capability::Comments)
    }

    pub fn supports_partial_index(&self) -> bool {
        self.supports(Capability::PartialIndex)
    }

    pub fn supports_expression_index(&self) -> bool {
        self.supports(Capability::ExpressionIndex)
    }

    pub fn supports_as_of_system_time(&self) -> bool {
        self.supports(Capability::AsOfSystemTime)
    }

    pub fn supports_index_hints(&self) -> bool {
        self.supports(Capability::IndexHints)
    }

    pub fn supports_show_create_table(&self) -> bool {
        self.supports(Capability::ShowCreateTable)
    }

    pub fn max_identifier_length(&self) -> usize {
        self.rewriter.identifier_length_limit()
    }

    pub fn quote(&self, value: &Value) -> Result<String> {
        self.rewriter.quote_literal(value)
    }

    /// Create an index, then attach its comment when the target allows.
    pub async fn add_index(&self, index: &IndexDescriptor, options: &IndexOptions) -> Result<()> {
        let sql = self.rewriter.render_index_creation(index, options)?;
        self.executor.execute(&sql).await?;
        if let Some(comment) = &index.comment {
            if self.supports_comments() {
                let sql = self
                    .rewriter
                    .render_comment(&CommentTarget::Index(&index.name), Some(comment))?;
                self.executor.execute(&sql).await?;
            } else {
                debug!(index = %index.name, "dropping index comment: comments unsupported");
            }
        }
        Ok(())
    }

    /// Bulk-load fixture rows, checking column names against the catalog.
    pub async fn insert_fixtures(&self, table: &str, rows: &[BTreeMap<String, Value>]) -> Result<u64> {
        let known: Vec<String> = self
            .introspector
            .list_columns(table)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        match self.rewriter.render_bulk_insert(table, &known, rows)? {
            Some(sql) => self.executor.execute(&sql).await,
            None => Ok(0),
        }
    }

    /// Render a query for this dialect and run it.
    pub async fn select(&self, query: &QueryBuilder) -> Result<Vec<CatalogRow>> {
        let sql = query.to_sql(self.capabilities())?;
        self.executor.query(&sql).await
    }

    /// Forget per-connection state after the driver reconnects.
    pub fn reset(&self) {
        self.transactions.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::mock::MockExecutor;
    use crate::db::{IndexColumn, IndexColumns, TransactionState};
    use crate::dialect::{CockroachDialect, PostgresDialect};
    use crate::error::AdapterError;

    fn cockroach(exec: MockExecutor) -> Adapter<MockExecutor> {
        Adapter::new(Arc::new(exec), Arc::new(CockroachDialect::new()))
    }

    #[test]
    fn test_capability_predicates() {
        let crdb = cockroach(MockExecutor::new());
        assert!(crdb.supports_savepoints());
        assert!(crdb.supports_as_of_system_time());
        assert!(crdb.supports_index_hints());
        assert_eq!(crdb.max_identifier_length(), 63);
        assert_eq!(crdb.quote(&Value::Integer(12)).unwrap(), "'12'");

        let pg = Adapter::new(Arc::new(MockExecutor::new()), Arc::new(PostgresDialect::new()));
        assert!(!pg.supports_as_of_system_time());
        assert!(!pg.supports_show_create_table());
    }

    #[tokio::test]
    async fn test_add_index_with_comment() {
        let adapter = cockroach(MockExecutor::new());
        let mut index = IndexDescriptor::new(
            "accounts",
            "accounts_idx",
            IndexColumns::Names(vec![IndexColumn::new("firm_id")]),
        );
        index.comment = Some("lookup by firm".into());
        adapter.add_index(&index, &IndexOptions::default()).await.unwrap();

        assert_eq!(
            adapter.executor().statements(),
            vec![
                "CREATE INDEX \"accounts_idx\" ON \"accounts\" (\"firm_id\")",
                "COMMENT ON INDEX \"accounts_idx\" IS 'lookup by firm'",
            ]
        );
    }

    #[tokio::test]
    async fn test_insert_fixtures_checks_columns() {
        let exec = MockExecutor::new().respond(
            "a.attisdropped",
            vec![
                CatalogRow::new().with("name", Some("id")),
                CatalogRow::new().with("name", Some("firm_id")),
            ],
        );
        let adapter = cockroach(exec);

        let good = vec![BTreeMap::from([("firm_id".to_string(), Value::Integer(4))])];
        adapter.insert_fixtures("accounts", &good).await.unwrap();
        assert!(adapter
            .executor()
            .statements()
            .contains(&"INSERT INTO \"accounts\" (\"firm_id\") VALUES ('4')".to_string()));

        let bad = vec![BTreeMap::from([("nope".to_string(), Value::Integer(1))])];
        let err = adapter.insert_fixtures("accounts", &bad).await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidArgument(msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn test_select_and_reset() {
        let adapter = cockroach(MockExecutor::new());
        adapter
            .select(&QueryBuilder::table("accounts").with_index_hint("NO_FULL_SCAN"))
            .await
            .unwrap();
        assert_eq!(
            adapter.executor().statements(),
            vec!["SELECT * FROM accounts@{NO_FULL_SCAN}"]
        );

        adapter.transactions().begin_transaction(None).await.unwrap();
        adapter.reset();
        assert_eq!(adapter.transactions().state(), TransactionState::NoTransaction);
    }
}
