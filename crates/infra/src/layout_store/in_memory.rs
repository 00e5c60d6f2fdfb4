use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use citylayout_core::{LayoutId, LayoutRecord, OwnerId};

use super::r#trait::{LayoutStore, StoreError};

#[derive(Debug, Clone)]
struct Row {
    /// Global insertion order; breaks ties between equal timestamps.
    seq: u64,
    record: LayoutRecord,
}

#[derive(Debug, Default)]
struct Tables {
    next_seq: u64,
    by_owner: HashMap<OwnerId, Vec<Row>>,
}

/// In-memory append-only layout store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryLayoutStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryLayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total number of stored rows, history included.
    pub fn row_count(&self) -> usize {
        self.tables
            .read()
            .map(|t| t.by_owner.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl LayoutStore for InMemoryLayoutStore {
    async fn insert(&self, record: &LayoutRecord) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        tables.next_seq += 1;
        let seq = tables.next_seq;
        tables.by_owner.entry(record.owner).or_default().push(Row {
            seq,
            record: record.clone(),
        });
        Ok(())
    }

    async fn delete_all(&self, owner: OwnerId, entity: LayoutId) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        let Some(rows) = tables.by_owner.get_mut(&owner) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| r.record.entity != entity);
        let removed = (before - rows.len()) as u64;

        if rows.is_empty() {
            tables.by_owner.remove(&owner);
        }
        Ok(removed)
    }

    async fn latest_per_entity(&self, owner: OwnerId) -> Result<Vec<LayoutRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.read().map_err(|_| poisoned())?;

        let Some(rows) = tables.by_owner.get(&owner) else {
            return Ok(vec![]);
        };

        // BTreeMap keeps the result ordered by entity.
        let mut latest: BTreeMap<LayoutId, &Row> = BTreeMap::new();
        for row in rows {
            latest
                .entry(row.record.entity)
                .and_modify(|best| {
                    if (row.record.recorded_at, row.seq) > (best.record.recorded_at, best.seq) {
                        *best = row;
                    }
                })
                .or_insert(row);
        }

        Ok(latest.into_values().map(|r| r.record.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use citylayout_core::Payload;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn record(owner: OwnerId, entity: LayoutId, secs: i64, body: &str) -> LayoutRecord {
        LayoutRecord::new(owner, entity, at(secs), Payload::from(body))
    }

    #[tokio::test]
    async fn latest_picks_newest_timestamp_not_newest_insert() {
        let store = InMemoryLayoutStore::new();
        let owner = OwnerId::new();
        let entity = LayoutId::new();

        store.insert(&record(owner, entity, 10, "new")).await.unwrap();
        store.insert(&record(owner, entity, 5, "old")).await.unwrap();

        let latest = store.latest_per_entity(owner).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].payload.as_bytes(), b"new");
        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test]
    async fn equal_timestamps_resolve_to_last_insert() {
        let store = InMemoryLayoutStore::new();
        let owner = OwnerId::new();
        let entity = LayoutId::new();

        store.insert(&record(owner, entity, 1, "first")).await.unwrap();
        store.insert(&record(owner, entity, 1, "second")).await.unwrap();

        let latest = store.latest_per_entity(owner).await.unwrap();
        assert_eq!(latest[0].payload.as_bytes(), b"second");
    }

    #[tokio::test]
    async fn owners_are_isolated_and_results_ordered_by_entity() {
        let store = InMemoryLayoutStore::new();
        let owner = OwnerId::new();
        let other = OwnerId::new();
        let mut entities = vec![LayoutId::new(), LayoutId::new(), LayoutId::new()];

        for (i, e) in entities.iter().rev().enumerate() {
            store.insert(&record(owner, *e, i as i64, "{}")).await.unwrap();
        }
        store.insert(&record(other, LayoutId::new(), 0, "{}")).await.unwrap();

        entities.sort();
        let got: Vec<_> = store
            .latest_per_entity(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.entity)
            .collect();
        assert_eq!(got, entities);
        assert!(store.latest_per_entity(OwnerId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_all_removes_history_of_one_pair_only() {
        let store = InMemoryLayoutStore::new();
        let owner = OwnerId::new();
        let gone = LayoutId::new();
        let kept = LayoutId::new();

        store.insert(&record(owner, gone, 1, "a")).await.unwrap();
        store.insert(&record(owner, gone, 2, "b")).await.unwrap();
        store.insert(&record(owner, kept, 1, "c")).await.unwrap();

        assert_eq!(store.delete_all(owner, gone).await.unwrap(), 2);
        assert_eq!(store.delete_all(owner, gone).await.unwrap(), 0);
        assert_eq!(store.delete_all(OwnerId::new(), gone).await.unwrap(), 0);

        let latest = store.latest_per_entity(owner).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].entity, kept);
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let store = InMemoryLayoutStore::new();
        let owner = OwnerId::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.insert(&record(owner, LayoutId::new(), 0, "{}")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.delete_all(owner, LayoutId::new()).await.is_err());
        assert!(store.latest_per_entity(owner).await.is_err());

        store.set_unavailable(false);
        assert!(store.latest_per_entity(owner).await.unwrap().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert { entity: usize, secs: i64 },
        Delete { entity: usize },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..4usize, 0..6i64).prop_map(|(entity, secs)| Op::Insert { entity, secs }),
            1 => (0..4usize).prop_map(|entity| Op::Delete { entity }),
        ]
    }

    proptest! {
        #[test]
        fn latest_matches_a_naive_model(ops in proptest::collection::vec(op(), 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = InMemoryLayoutStore::new();
            let owner = OwnerId::new();
            let entities: Vec<LayoutId> = (0..4).map(|_| LayoutId::new()).collect();

            // Model: per entity, the (secs, insertion index, body) of its newest write.
            let mut model: BTreeMap<LayoutId, (i64, usize, String)> = BTreeMap::new();

            rt.block_on(async {
                for (i, op) in ops.iter().enumerate() {
                    match *op {
                        Op::Insert { entity, secs } => {
                            let body = format!("{i}");
                            store.insert(&record(owner, entities[entity], secs, &body)).await.unwrap();
                            let slot = model.entry(entities[entity]).or_insert((secs, i, body.clone()));
                            if (secs, i) >= (slot.0, slot.1) {
                                *slot = (secs, i, body);
                            }
                        }
                        Op::Delete { entity } => {
                            store.delete_all(owner, entities[entity]).await.unwrap();
                            model.remove(&entities[entity]);
                        }
                    }
                }
            });

            let latest = rt.block_on(store.latest_per_entity(owner)).unwrap();
            let expected: Vec<(LayoutId, DateTime<Utc>, Vec<u8>)> = model
                .into_iter()
                .map(|(e, (secs, _, body))| (e, at(secs), body.into_bytes()))
                .collect();
            let actual: Vec<(LayoutId, DateTime<Utc>, Vec<u8>)> = latest
                .into_iter()
                .map(|r| (r.entity, r.recorded_at, r.payload.into_bytes()))
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
