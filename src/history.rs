//! Date-range serving over the persisted order table.
//!
//! Coverage is approximate: a range counts as already fetched when the table
//! holds at least one row inside it. A single stray row in an otherwise
//! unfetched range is enough to skip the brokerage.
//!
//! The raw snapshot is saved before it is normalized. A snapshot holding a
//! malformed order keeps failing every uncovered range until it is cleared
//! with `invalidate_snapshot` (CLI: `invalidate --snapshot`); dropping the
//! table alone does not help.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex as StdMutex},
};

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::cache::CacheStore;
use crate::error::HistoryError;
use crate::normalize::normalize;
use crate::session::{with_session, Brokerage};
use crate::types::{Credentials, NormalizedRecord, PersistedTable, RawOrder, RawSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSource {
    /// Served from the persisted table without touching the brokerage.
    Cache,
    /// Rebuilt from the stored raw snapshot.
    Snapshot,
    /// Fetched live from the brokerage.
    Network,
}

#[derive(Debug)]
pub struct RangeFetch {
    pub records: Vec<NormalizedRecord>,
    pub source: RowSource,
    /// Cache writes that failed; the records above are still correct.
    pub cache_errors: Vec<HistoryError>,
}

pub struct OrderHistory<B> {
    broker: B,
    store: CacheStore,
    key_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<B: Brokerage> OrderHistory<B> {
    pub fn new(broker: B, store: CacheStore) -> Self {
        Self {
            broker,
            store,
            key_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Rows with `start <= activity date <= end` for `key`, fetching and merging
    /// only when the table has nothing in that range.
    pub async fn fetch_range(
        &self,
        credentials: &Credentials,
        start: NaiveDate,
        end: NaiveDate,
        key: &str,
    ) -> Result<RangeFetch, HistoryError> {
        if start > end {
            return Err(HistoryError::InvalidRange { start, end });
        }
        // validate before taking a lock slot for it
        self.store.table_path(key)?;
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let existing = self.store.load_table(key)?;
        if existing.iter().any(|r| r.in_range(start, end)) {
            info!(key, %start, %end, "Data already exists in the specified date range.");
            return Ok(RangeFetch {
                records: slice(&existing, start, end),
                source: RowSource::Cache,
                cache_errors: Vec::new(),
            });
        }

        let mut cache_errors = Vec::new();
        let (orders, source) = match self.store.load_snapshot()? {
            Some(snapshot) => (snapshot.orders, RowSource::Snapshot),
            None => {
                let snapshot = RawSnapshot::new(self.fetch_live(credentials).await?);
                if let Err(e) = self.store.save_snapshot(&snapshot) {
                    error!(error = %e, "snapshot save failed");
                    cache_errors.push(e);
                }
                (snapshot.orders, RowSource::Network)
            }
        };

        let fresh: Vec<NormalizedRecord> = normalize(&orders)
            .map_err(|e| match e {
                HistoryError::MalformedRecord { field, reason } => HistoryError::MalformedRecord {
                    field,
                    reason: format!(
                        "{reason}; raw snapshot {} must be cleared (invalidate --snapshot)",
                        self.store.snapshot_path().display()
                    ),
                },
                other => other,
            })?
            .into_iter()
            .filter(|r| r.in_range(start, end))
            .collect();
        info!(key, %start, %end, fresh = fresh.len(), ?source, "Updating table.");

        let merged = merge(existing, fresh);
        if let Err(e) = self.store.save_table(key, &merged) {
            error!(key, error = %e, "table save failed");
            cache_errors.push(e);
        }

        Ok(RangeFetch {
            records: slice(&merged, start, end),
            source,
            cache_errors,
        })
    }

    /// Drop the persisted table for `key`. Absent tables are fine.
    pub async fn invalidate(&self, key: &str) -> Result<(), HistoryError> {
        self.store.table_path(key)?;
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.store.invalidate(key)
    }

    /// Forget the raw snapshot so the next uncovered range goes to the network.
    pub fn invalidate_snapshot(&self) -> Result<(), HistoryError> {
        self.store.invalidate_snapshot()
    }

    async fn fetch_live(&self, credentials: &Credentials) -> Result<Vec<RawOrder>, HistoryError> {
        let broker = &self.broker;
        let orders = with_session(broker, credentials, move |session| async move {
            info!("Fetching option orders from brokerage.");
            broker.option_orders(&session).await
        })
        .await?;
        info!(orders = orders.len(), "Fetched option orders.");
        Ok(orders)
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // entries nobody holds or waits on are idle
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

/// Existing rows then new ones, exact duplicates removed (first kept), stably
/// sorted by activity date.
pub fn merge(existing: PersistedTable, fresh: Vec<NormalizedRecord>) -> PersistedTable {
    let mut seen = HashSet::new();
    let mut merged: PersistedTable = existing
        .into_iter()
        .chain(fresh)
        .filter(|r| seen.insert(r.clone()))
        .collect();
    merged.sort_by_key(|r| r.activity_date);
    merged
}

fn slice(table: &[NormalizedRecord], start: NaiveDate, end: NaiveDate) -> Vec<NormalizedRecord> {
    table
        .iter()
        .filter(|r| r.in_range(start, end))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Execution, Leg, LegSide, TransCode};
    use rust_decimal_macros::dec;
    use std::cell::Cell;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn record(d: u32) -> NormalizedRecord {
        NormalizedRecord {
            activity_date: day(d),
            process_date: day(d),
            settle_date: Some(day(d)),
            instrument: "AAPL".into(),
            description: format!("AAPL 2024-01-{d:02} call 182.50"),
            trans_code: TransCode::BTO,
            quantity: Some(dec!(1)),
            price: Some(dec!(2.56)),
            amount: dec!(-256.03),
        }
    }

    fn order(d: u32) -> RawOrder {
        RawOrder {
            created_at: format!("2024-01-{d:02}T15:00:00.000000Z"),
            updated_at: format!("2024-01-{d:02}T15:00:00.000000Z"),
            chain_symbol: "AAPL".into(),
            legs: vec![Leg {
                expiration_date: format!("2024-01-{d:02}"),
                option_type: "call".into(),
                strike_price: "182.50".parse().unwrap(),
                side: Some(LegSide::Buy),
                executions: vec![Execution {
                    settlement_date: format!("2024-01-{d:02}"),
                    quantity: dec!(1),
                    price: dec!(2.56),
                }],
            }],
            processed_premium: dec!(-256.03),
        }
    }

    #[derive(Default)]
    struct StubBroker {
        orders: Vec<RawOrder>,
        forbid: bool,
        fail_fetch: bool,
        logins: Cell<usize>,
        fetches: Cell<usize>,
        logouts: Cell<usize>,
    }

    impl Brokerage for StubBroker {
        type Session = ();

        async fn login(&self, _: &Credentials) -> Result<(), HistoryError> {
            assert!(!self.forbid, "brokerage must not be contacted");
            self.logins.set(self.logins.get() + 1);
            Ok(())
        }

        async fn logout(&self, _: ()) -> Result<(), HistoryError> {
            self.logouts.set(self.logouts.get() + 1);
            Ok(())
        }

        async fn option_orders(&self, _: &()) -> Result<Vec<RawOrder>, HistoryError> {
            assert!(!self.forbid, "brokerage must not be contacted");
            self.fetches.set(self.fetches.get() + 1);
            if self.fail_fetch {
                return Err(HistoryError::Fetch("503 from upstream".into()));
            }
            Ok(self.orders.clone())
        }
    }

    fn creds() -> Credentials {
        Credentials::new("user", "pass")
    }

    fn days(records: &[NormalizedRecord]) -> Vec<u32> {
        use chrono::Datelike;
        records.iter().map(|r| r.activity_date.day()).collect()
    }

    #[test]
    fn merge_is_duplicate_free_and_sorted() {
        let existing: Vec<_> = (1..=5).map(record).collect();
        let fresh: Vec<_> = (3..=10).rev().map(record).collect();
        let merged = merge(existing, fresh);
        assert_eq!(days(&merged), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn merge_keeps_distinct_rows_on_same_day() {
        let mut other_leg = record(3);
        other_leg.trans_code = TransCode::STC;
        let merged = merge(vec![record(3)], vec![other_leg.clone(), record(3)]);
        assert_eq!(merged, vec![record(3), other_leg]);
    }

    #[tokio::test]
    async fn covered_range_never_contacts_brokerage() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store
            .save_table("orders.csv", &(1..=10).map(record).collect::<Vec<_>>())
            .unwrap();
        let history = OrderHistory::new(
            StubBroker {
                forbid: true,
                ..Default::default()
            },
            store,
        );

        let got = history
            .fetch_range(&creds(), day(3), day(6), "orders.csv")
            .await
            .unwrap();
        assert_eq!(got.source, RowSource::Cache);
        assert_eq!(days(&got.records), vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn repeat_fetch_is_idempotent_with_one_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let history = OrderHistory::new(
            StubBroker {
                orders: (1..=10).map(order).collect(),
                ..Default::default()
            },
            CacheStore::new(dir.path()),
        );

        let first = history
            .fetch_range(&creds(), day(2), day(4), "orders.csv")
            .await
            .unwrap();
        let second = history
            .fetch_range(&creds(), day(2), day(4), "orders.csv")
            .await
            .unwrap();

        assert_eq!(first.source, RowSource::Network);
        assert_eq!(second.source, RowSource::Cache);
        assert_eq!(first.records, second.records);
        assert_eq!(days(&first.records), vec![2, 3, 4]);
        assert_eq!(history.broker.fetches.get(), 1);
        assert_eq!(history.broker.logins.get(), 1);
        assert_eq!(history.broker.logouts.get(), 1);
    }

    #[tokio::test]
    async fn empty_range_is_served_from_snapshot_afterwards() {
        let dir = tempfile::tempdir().unwrap();
        let history = OrderHistory::new(
            StubBroker {
                orders: vec![order(1)],
                ..Default::default()
            },
            CacheStore::new(dir.path()),
        );

        for expected in [RowSource::Network, RowSource::Snapshot] {
            let got = history
                .fetch_range(&creds(), day(20), day(25), "orders.csv")
                .await
                .unwrap();
            assert_eq!(got.source, expected);
            assert!(got.records.is_empty());
        }
        assert_eq!(history.broker.fetches.get(), 1);
    }

    #[tokio::test]
    async fn uncovered_range_merges_into_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let existing: Vec<_> = (1..=5).map(record).collect();
        store.save_table("orders.csv", &existing).unwrap();
        // snapshot rows must normalize to exactly the records above
        store
            .save_snapshot(&RawSnapshot::new((3..=10).map(order).collect()))
            .unwrap();
        let history = OrderHistory::new(
            StubBroker {
                forbid: true,
                ..Default::default()
            },
            store,
        );

        let got = history
            .fetch_range(&creds(), day(6), day(10), "orders.csv")
            .await
            .unwrap();
        assert_eq!(got.source, RowSource::Snapshot);
        assert_eq!(days(&got.records), vec![6, 7, 8, 9, 10]);

        let table = history.store().load_table("orders.csv").unwrap();
        assert_eq!(days(&table), (1..=10).collect::<Vec<_>>());
        assert_eq!(table[..5], existing[..]);
    }

    #[tokio::test]
    async fn fetch_error_propagates_after_logout() {
        let dir = tempfile::tempdir().unwrap();
        let history = OrderHistory::new(
            StubBroker {
                fail_fetch: true,
                ..Default::default()
            },
            CacheStore::new(dir.path()),
        );

        let err = history
            .fetch_range(&creds(), day(1), day(31), "orders.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::Fetch(_)));
        assert_eq!(history.broker.logouts.get(), 1);
        assert!(history.store().load_snapshot().unwrap().is_none());
        assert!(!dir.path().join("orders.csv").exists());
    }

    #[tokio::test]
    async fn cache_write_failure_still_returns_records() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("blocker");
        std::fs::write(&not_a_dir, b"").unwrap();
        let history = OrderHistory::new(
            StubBroker {
                orders: vec![order(8)],
                ..Default::default()
            },
            CacheStore::new(&not_a_dir),
        );

        let got = history
            .fetch_range(&creds(), day(1), day(31), "orders.csv")
            .await
            .unwrap();
        assert_eq!(got.records, vec![record(8)]);
        assert_eq!(got.cache_errors.len(), 2);
        assert!(got
            .cache_errors
            .iter()
            .all(|e| matches!(e, HistoryError::CacheWrite { .. })));
    }

    #[tokio::test]
    async fn corrupt_table_stops_the_fetch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orders.csv"), "garbage\n").unwrap();
        let history = OrderHistory::new(
            StubBroker {
                forbid: true,
                ..Default::default()
            },
            CacheStore::new(dir.path()),
        );

        let err = history
            .fetch_range(&creds(), day(1), day(31), "orders.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::CacheCorruption { .. }));

        history.invalidate("orders.csv").await.unwrap();
        history.invalidate("orders.csv").await.unwrap();
    }

    #[tokio::test]
    async fn idle_key_locks_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let history = OrderHistory::new(
            StubBroker {
                orders: vec![order(8)],
                ..Default::default()
            },
            CacheStore::new(dir.path()),
        );
        for key in ["a.csv", "b.csv", "c.csv"] {
            history
                .fetch_range(&creds(), day(1), day(31), key)
                .await
                .unwrap();
        }
        history.invalidate("d.csv").await.unwrap();
        let locks = history.key_locks.lock().unwrap();
        assert_eq!(locks.keys().collect::<Vec<_>>(), vec!["d.csv"]);
    }

    #[tokio::test]
    async fn bad_snapshot_error_points_at_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let mut bad = order(8);
        bad.created_at = "not a timestamp".into();
        store.save_snapshot(&RawSnapshot::new(vec![bad])).unwrap();
        let history = OrderHistory::new(
            StubBroker {
                orders: vec![order(8)],
                ..Default::default()
            },
            store,
        );

        let err = history
            .fetch_range(&creds(), day(1), day(31), "orders.csv")
            .await
            .unwrap_err();
        match &err {
            HistoryError::MalformedRecord { field, reason } => {
                assert_eq!(field, "orders[0].created_at");
                assert!(reason.contains("invalidate --snapshot"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(history.broker.fetches.get(), 0);

        history.invalidate_snapshot().unwrap();
        let got = history
            .fetch_range(&creds(), day(1), day(31), "orders.csv")
            .await
            .unwrap();
        assert_eq!(got.source, RowSource::Network);
        assert_eq!(got.records, vec![record(8)]);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let history = OrderHistory::new(
            StubBroker {
                forbid: true,
                ..Default::default()
            },
            CacheStore::new(dir.path()),
        );
        let err = history
            .fetch_range(&creds(), day(9), day(1), "orders.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::InvalidRange { .. }));
    }
}
