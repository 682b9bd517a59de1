//! Entry points: a [`ScanClient`] bound to a storage service, and [`Table`]
//! handles used to build predicates, bounds and scans.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::bound::PartialRow;
use crate::builder::ScanBuilder;
use crate::config::ScanConfig;
use crate::error::{PredicateError, Result};
use crate::meta_cache::MetaCache;
use crate::predicate::{ColumnPredicate, Operand, Operator, encode_predicate};
use crate::rpc::{TableInfo, TabletLocator, TabletTransport};
use crate::scanner::Scanner;
use crate::schema::{ColumnSchema, Schema};
use crate::token::{ScanToken, ScanTokenBuilder};
use crate::value::Value;

/// A handle on a storage service. Cheap to clone; clones share the location
/// cache and transport.
#[derive(Clone)]
pub struct ScanClient {
    meta_cache: Arc<MetaCache>,
    locator: Arc<dyn TabletLocator>,
    transport: Arc<dyn TabletTransport>,
    config: Arc<ScanConfig>,
}

impl ScanClient {
    pub fn new(locator: Arc<dyn TabletLocator>, transport: Arc<dyn TabletTransport>) -> Self {
        Self::with_config(locator, transport, ScanConfig::default())
    }

    /// Locations from `locator` are cached in a [`MetaCache`].
    pub fn with_config(
        locator: Arc<dyn TabletLocator>,
        transport: Arc<dyn TabletTransport>,
        config: ScanConfig,
    ) -> Self {
        let meta_cache = Arc::new(MetaCache::new(locator));
        Self {
            locator: meta_cache.clone(),
            meta_cache,
            transport,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub(crate) fn locator(&self) -> &Arc<dyn TabletLocator> {
        &self.locator
    }

    pub(crate) fn meta_cache(&self) -> &Arc<MetaCache> {
        &self.meta_cache
    }

    pub(crate) fn transport(&self) -> &Arc<dyn TabletTransport> {
        &self.transport
    }

    pub async fn open_table(&self, name: &str) -> Result<Table> {
        let info = self.locator.lookup_table(name).await?;
        debug!(table = name, id = %info.id, "opened table");
        Ok(Table::from_info(self.clone(), Arc::new(info)))
    }

    /// Rebuild a scanner from a serialized [`ScanToken`]. The table is looked
    /// up again and every predicate re-validated against its live schema.
    /// The returned scanner still has to be opened.
    pub async fn deserialize_token_into_scanner(&self, bytes: &[u8]) -> Result<Scanner> {
        ScanToken::deserialize(bytes)?.into_scanner(self).await
    }
}

impl fmt::Debug for ScanClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// An opened table.
#[derive(Debug, Clone)]
pub struct Table {
    client: ScanClient,
    info: Arc<TableInfo>,
}

impl Table {
    pub(crate) fn from_info(client: ScanClient, info: Arc<TableInfo>) -> Self {
        Self { client, info }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.info.schema
    }

    pub fn info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    pub fn client(&self) -> &ScanClient {
        &self.client
    }

    /// A column handle for building predicates.
    pub fn column(&self, name: &str) -> std::result::Result<TableColumn<'_>, PredicateError> {
        let index = self
            .info
            .schema
            .find_column(name)
            .ok_or_else(|| PredicateError::UnknownColumn(name.to_string()))?;
        Ok(TableColumn {
            schema: &self.info.schema,
            index,
        })
    }

    pub fn column_at(&self, index: usize) -> std::result::Result<TableColumn<'_>, PredicateError> {
        if index >= self.info.schema.column_count() {
            return Err(PredicateError::UnknownColumn(format!("#{index}")));
        }
        Ok(TableColumn {
            schema: &self.info.schema,
            index,
        })
    }

    /// An empty key bound for this table.
    pub fn new_bound(&self) -> PartialRow {
        PartialRow::new(self.info.schema.clone())
    }

    pub fn scanner(&self) -> ScanBuilder {
        ScanBuilder::new(self.client.clone(), self.info.clone())
    }

    pub fn scan_token_builder(&self) -> ScanTokenBuilder {
        ScanTokenBuilder::new(self.scanner())
    }
}

/// One column of a table, used to build [`ColumnPredicate`]s.
#[derive(Debug, Clone, Copy)]
pub struct TableColumn<'a> {
    schema: &'a Schema,
    index: usize,
}

type PredicateResult = std::result::Result<ColumnPredicate, PredicateError>;

impl TableColumn<'_> {
    pub fn schema(&self) -> &ColumnSchema {
        &self.schema.columns()[self.index]
    }

    fn compare(&self, op: Operator, value: Value) -> PredicateResult {
        encode_predicate(self.schema, self.index, op, Operand::Value(value))
    }

    pub fn eq(&self, value: impl Into<Value>) -> PredicateResult {
        self.compare(Operator::Eq, value.into())
    }

    pub fn lt(&self, value: impl Into<Value>) -> PredicateResult {
        self.compare(Operator::Lt, value.into())
    }

    pub fn le(&self, value: impl Into<Value>) -> PredicateResult {
        self.compare(Operator::Le, value.into())
    }

    pub fn gt(&self, value: impl Into<Value>) -> PredicateResult {
        self.compare(Operator::Gt, value.into())
    }

    pub fn ge(&self, value: impl Into<Value>) -> PredicateResult {
        self.compare(Operator::Ge, value.into())
    }

    pub fn in_list<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> PredicateResult {
        let values = values.into_iter().map(Into::into).collect();
        encode_predicate(self.schema, self.index, Operator::InList, Operand::List(values))
    }

    pub fn is_null(&self) -> PredicateResult {
        encode_predicate(self.schema, self.index, Operator::IsNull, Operand::None)
    }

    pub fn is_not_null(&self) -> PredicateResult {
        encode_predicate(self.schema, self.index, Operator::IsNotNull, Operand::None)
    }
}
