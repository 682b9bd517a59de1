//! Scan tokens: one serializable scan per tablet, for parallel or remote
//! execution.
//!
//! A token carries the scan's descriptor narrowed to one tablet's partition.
//! Deserializing re-resolves the table by name and re-validates every
//! predicate against the live schema, so a token built against an older
//! schema fails instead of reading the wrong columns.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bound::PartialRow;
use crate::builder::ScanBuilder;
use crate::client::ScanClient;
use crate::descriptor::{DescriptorWire, ScanDescriptor};
use crate::error::{DecodeError, Error, Result, ScanError};
use crate::predicate::ColumnPredicate;
use crate::rpc::TabletLocation;
use crate::scanner::Scanner;
use crate::types::{OrderMode, ReadMode, ReplicaSelection};

/// Builds one [`ScanToken`] per tablet overlapping the scan's key range.
/// Accepts the same settings as [`ScanBuilder`].
#[derive(Debug, Clone)]
pub struct ScanTokenBuilder {
    inner: ScanBuilder,
}

macro_rules! forward_setters {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            pub fn $name(mut self, $($arg: $ty),*) -> Self {
                self.inner = self.inner.$name($($arg),*);
                self
            }
        )*
    };
}

impl ScanTokenBuilder {
    pub(crate) fn new(inner: ScanBuilder) -> Self {
        Self { inner }
    }

    forward_setters! {
        add_predicate(predicate: ColumnPredicate);
        set_projected_column_names(names: &[&str]);
        set_projected_column_indexes(indexes: &[usize]);
        set_fault_tolerant();
        set_read_mode(mode: ReadMode);
        set_snapshot_timestamp(timestamp: u64);
        set_order_mode(mode: OrderMode);
        set_replica_selection(selection: ReplicaSelection);
        set_batch_size_bytes(bytes: usize);
        set_batch_size_rows(rows: usize);
        set_timeout(timeout: Duration);
        add_lower_bound(bound: PartialRow);
        add_exclusive_upper_bound(bound: PartialRow);
    }

    /// Resolve the tablets in range and build a token for each. A scan that
    /// can match nothing yields no tokens.
    pub async fn build(&self) -> Result<Vec<ScanToken>> {
        let descriptor = self.inner.build()?;
        let range = descriptor.effective_range()?;
        if descriptor.predicates().matches_nothing() || range.is_empty() {
            return Ok(Vec::new());
        }

        let locator = self.inner.client().locator();
        let table_id = &descriptor.table().id;
        let mut tokens = Vec::new();
        let mut key = range.lower.clone().unwrap_or_default();
        loop {
            let tablet = locator.locate_tablet(table_id, &key).await?;
            let partition_range = tablet.partition.key_range();
            if !range.intersect(&partition_range).is_empty() {
                tokens.push(ScanToken {
                    descriptor: descriptor.restricted_to(&partition_range).to_wire(),
                    tablet: tablet.clone(),
                });
            }
            match tablet.partition.next_start_within(&range) {
                Some(next) => key = next,
                None => break,
            }
        }
        info!(
            table = %descriptor.table().name,
            tokens = tokens.len(),
            "built scan tokens"
        );
        Ok(tokens)
    }
}

/// A serializable scan restricted to one tablet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanToken {
    descriptor: DescriptorWire,
    tablet: TabletLocation,
}

impl ScanToken {
    /// Location of the tablet this token reads, as of token creation.
    pub fn tablet(&self) -> &TabletLocation {
        &self.tablet
    }

    pub fn descriptor(&self) -> &DescriptorWire {
        &self.descriptor
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::MalformedToken(e.to_string()).into())
    }

    /// Resolve the token's table on `client` and build an unopened scanner.
    pub async fn into_scanner(self, client: &ScanClient) -> Result<Scanner> {
        let table = client
            .meta_cache()
            .refresh_table(&self.descriptor.table_name)
            .await?;
        if table.id != self.descriptor.table_id {
            return Err(ScanError::TableMismatch {
                expected: self.descriptor.table_id,
                actual: table.id,
            }
            .into());
        }
        let descriptor = ScanDescriptor::from_wire(Arc::new(table), &self.descriptor)?;
        debug!(tablet = %self.tablet.tablet_id, "scanner built from token");
        Ok(Scanner::new(client.clone(), descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::encode_batch;
    use crate::rpc::ScanResponse;
    use crate::scanner::ScanState;
    use crate::scanner::tests::{Step, harness, harness_for, key, table_with_id};
    use crate::value::Value;

    #[tokio::test]
    async fn test_one_token_per_overlapping_tablet() {
        let h = harness(Vec::new());
        let tokens = h.table.scan_token_builder().build().await.unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].tablet().tablet_id, "t-0");
        assert_eq!(tokens[0].descriptor().upper_bound, Some(key(50)));
        assert_eq!(tokens[1].tablet().tablet_id, "t-1");
        assert_eq!(tokens[1].descriptor().lower_bound, Some(key(50)));

        let tokens = h
            .table
            .scan_token_builder()
            .add_predicate(h.table.column("key").unwrap().ge(60).unwrap())
            .build()
            .await
            .unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].tablet().tablet_id, "t-1");
        // The explicit bounds stay those of the partition; the predicate
        // narrows further when the scanner opens.
        assert_eq!(tokens[0].descriptor().lower_bound, Some(key(50)));
        assert_eq!(tokens[0].descriptor().predicates.len(), 1);

        let none = h
            .table
            .scan_token_builder()
            .add_predicate(h.table.column("key").unwrap().in_list(Vec::<i32>::new()).unwrap())
            .build()
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_token_round_trip_into_scanner() {
        let h = harness(Vec::new());
        let tokens = h
            .table
            .scan_token_builder()
            .set_projected_column_names(&["string_val", "key"])
            .add_predicate(h.table.column("key").unwrap().gt(60).unwrap())
            .build()
            .await
            .unwrap();
        let bytes = tokens[0].serialize().unwrap();

        let mut scanner = h.client.deserialize_token_into_scanner(&bytes).await.unwrap();
        assert_eq!(scanner.state(), ScanState::Closed);
        let names: Vec<&str> = scanner
            .projection_schema()
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, ["string_val", "key"]);

        let rows = vec![vec![Value::from("hello_61"), Value::Int32(61)]];
        h.transport.push(Step::Reply(Ok(ScanResponse {
            handle: None,
            data: encode_batch(scanner.projection_schema(), &rows).unwrap(),
            has_more: false,
            snapshot_timestamp: None,
            last_primary_key: Some(key(61)),
        })));
        scanner.open().await.unwrap();
        assert_eq!(scanner.read_all_tuples().await.unwrap(), rows);
        let opens = h.transport.opens();
        assert_eq!(opens.len(), 1);
        assert_eq!(opens[0].1.projection, vec![2, 0]);
        assert_eq!(opens[0].1.lower_bound, Some(key(61)));
    }

    #[tokio::test]
    async fn test_token_checks_live_table_not_cache() {
        let h = harness(Vec::new());
        let table = h.client.open_table("scan_test").await.unwrap();
        let bytes = table.scan_token_builder().build().await.unwrap()[0]
            .serialize()
            .unwrap();

        h.locator.replace_table(table_with_id("tbl-2"));
        let err = h
            .client
            .deserialize_token_into_scanner(&bytes)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::Scan(ScanError::TableMismatch {
                expected: "tbl-1".into(),
                actual: "tbl-2".into(),
            })
        );
        // The refreshed entry now serves plain lookups too.
        assert_eq!(h.client.open_table("scan_test").await.unwrap().id(), "tbl-2");
    }

    #[tokio::test]
    async fn test_token_rejects_other_table() {
        let built = harness_for(table_with_id("tbl-old"), Vec::new());
        let tokens = built.table.scan_token_builder().build().await.unwrap();
        let bytes = tokens[0].serialize().unwrap();

        let live = harness(Vec::new());
        let err = live
            .client
            .deserialize_token_into_scanner(&bytes)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::Scan(ScanError::TableMismatch {
                expected: "tbl-old".into(),
                actual: "tbl-1".into(),
            })
        );

        assert!(matches!(
            ScanToken::deserialize(b"not a token"),
            Err(Error::Decode(DecodeError::MalformedToken(_)))
        ));
    }
}
