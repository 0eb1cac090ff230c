use crate::models::{now_millis, KeyRange, KeyRecord, LeaseRecord};
use etcd_api_types::etcdserverpb::range_request::{SortOrder, SortTarget};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex;

const RECORD_COLUMNS: &str =
    "SELECT revision, key, value, create_revision, version, lease, tombstone FROM records";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("key is not provided")]
    EmptyKey,

    #[error("required revision {requested} is a future revision (current {current})")]
    FutureRevision { requested: i64, current: i64 },

    #[error("requested lease {0} not found")]
    LeaseNotFound(i64),

    #[error("lease {0} already exists")]
    LeaseExists(i64),

    #[error("lease TTL must be positive, got {0}")]
    InvalidTtl(i64),
}

/// Read parameters of a range request.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub range: KeyRange,
    pub revision: i64,
    pub limit: i64,
    pub sort_order: SortOrder,
    pub sort_target: SortTarget,
    pub keys_only: bool,
    pub count_only: bool,
}

impl RangeQuery {
    pub fn new(range: KeyRange) -> Self {
        Self {
            range,
            revision: 0,
            limit: 0,
            sort_order: SortOrder::None,
            sort_target: SortTarget::Key,
            keys_only: false,
            count_only: false,
        }
    }
}

#[derive(Debug)]
pub struct RangeResult {
    /// Current store revision, even for historical reads.
    pub revision: i64,
    pub kvs: Vec<KeyRecord>,
    pub count: i64,
    pub more: bool,
}

#[derive(Debug)]
pub struct LeaseStatus {
    pub lease: LeaseRecord,
    pub remaining: i64,
    pub keys: Vec<Vec<u8>>,
}

/// Multi-version key-value storage on top of an append-only sqlite table.
///
/// The store revision starts at 1 and grows by one per mutating request that
/// changes at least one key. Writers are serialized so that revision
/// assignment and the rows carrying it commit together.
pub struct Storage {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn revision(&self) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        Ok(current_revision(&mut conn).await?)
    }

    pub async fn range(&self, query: &RangeQuery) -> Result<RangeResult, StorageError> {
        if range_key(&query.range).is_empty() {
            return Err(StorageError::EmptyKey);
        }

        let mut conn = self.pool.acquire().await?;
        let current = current_revision(&mut conn).await?;
        if query.revision > current {
            return Err(StorageError::FutureRevision {
                requested: query.revision,
                current,
            });
        }
        let at = if query.revision > 0 {
            query.revision
        } else {
            current
        };

        let mut kvs = live_records(&mut conn, &query.range, at).await?;
        sort_records(&mut kvs, query.sort_target, query.sort_order);

        let count = kvs.len() as i64;
        let mut more = false;
        if query.limit > 0 && count > query.limit {
            kvs.truncate(query.limit as usize);
            more = true;
        }

        if query.count_only {
            kvs.clear();
        } else if query.keys_only {
            for kv in &mut kvs {
                kv.value.clear();
            }
        }

        Ok(RangeResult {
            revision: current,
            kvs,
            count,
            more,
        })
    }

    /// Writes `key` and returns the new revision with the previous live
    /// record, if any.
    pub async fn put(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        lease: i64,
    ) -> Result<(i64, Option<KeyRecord>), StorageError> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if lease != 0 {
            match find_lease(&mut tx, lease).await? {
                Some(found) if !found.is_expired(now_millis()) => {}
                _ => return Err(StorageError::LeaseNotFound(lease)),
            }
        }

        let current = current_revision(&mut tx).await?;
        let prev = live_records(&mut tx, &KeyRange::Single(key.clone()), current)
            .await?
            .pop();

        let revision = current + 1;
        let (create_revision, version) = match &prev {
            Some(p) => (p.create_revision, p.version + 1),
            None => (revision, 1),
        };

        sqlx::query(
            "INSERT INTO records (revision, key, value, create_revision, version, lease, tombstone)
             VALUES (?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(revision)
        .bind(&key)
        .bind(&value)
        .bind(create_revision)
        .bind(version)
        .bind(lease)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((revision, prev))
    }

    /// Deletes every live key in `range` under a single revision. Returns the
    /// resulting revision and the deleted records; the revision is unchanged
    /// when nothing matched.
    pub async fn delete_range(
        &self,
        range: &KeyRange,
    ) -> Result<(i64, Vec<KeyRecord>), StorageError> {
        if range_key(range).is_empty() {
            return Err(StorageError::EmptyKey);
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let current = current_revision(&mut tx).await?;
        let live = live_records(&mut tx, range, current).await?;
        if live.is_empty() {
            return Ok((current, live));
        }

        let revision = current + 1;
        insert_tombstones(&mut tx, &live, revision).await?;
        tx.commit().await?;

        Ok((revision, live))
    }

    /// Grants a lease. An `id` of zero lets the store pick one.
    pub async fn grant_lease(&self, id: i64, ttl: i64) -> Result<LeaseRecord, StorageError> {
        if ttl <= 0 {
            return Err(StorageError::InvalidTtl(ttl));
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let granted_at = now_millis();

        let id = if id != 0 {
            if find_lease(&mut tx, id).await?.is_some() {
                return Err(StorageError::LeaseExists(id));
            }
            sqlx::query("INSERT INTO leases (id, ttl, granted_at) VALUES (?, ?, ?)")
                .bind(id)
                .bind(ttl)
                .bind(granted_at)
                .execute(&mut *tx)
                .await?;
            id
        } else {
            sqlx::query("INSERT INTO leases (ttl, granted_at) VALUES (?, ?)")
                .bind(ttl)
                .bind(granted_at)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid()
        };

        tx.commit().await?;
        Ok(LeaseRecord {
            id,
            ttl,
            granted_at,
        })
    }

    /// Revokes a lease and deletes the keys attached to it. Returns the
    /// resulting revision.
    pub async fn revoke_lease(&self, id: i64) -> Result<i64, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if find_lease(&mut tx, id).await?.is_none() {
            return Err(StorageError::LeaseNotFound(id));
        }
        let revision = revoke_in(&mut tx, id).await?;

        tx.commit().await?;
        Ok(revision)
    }

    /// Status of a live lease. A lease past its TTL is reported as missing
    /// even before the reaper revokes it.
    pub async fn lease_status(&self, id: i64) -> Result<Option<LeaseStatus>, StorageError> {
        let now = now_millis();
        let mut conn = self.pool.acquire().await?;
        let lease = match find_lease(&mut conn, id).await? {
            Some(lease) if !lease.is_expired(now) => lease,
            _ => return Ok(None),
        };

        let keys = leased_records(&mut conn, id)
            .await?
            .into_iter()
            .map(|record| record.key)
            .collect();

        Ok(Some(LeaseStatus {
            remaining: lease.remaining(now),
            lease,
            keys,
        }))
    }

    /// Revokes every lease whose TTL elapsed at `now` (milliseconds since the
    /// epoch), returning the revoked ids.
    pub async fn expire_leases(&self, now: i64) -> Result<Vec<i64>, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let leases = sqlx::query_as::<_, LeaseRecord>("SELECT id, ttl, granted_at FROM leases")
            .fetch_all(&mut *tx)
            .await?;

        let mut expired = Vec::new();
        for lease in leases.into_iter().filter(|lease| lease.is_expired(now)) {
            revoke_in(&mut tx, lease.id).await?;
            expired.push(lease.id);
        }

        tx.commit().await?;
        Ok(expired)
    }

    /// History rows with `revision >= from` inside `range`, oldest first.
    pub async fn events_since(
        &self,
        from: i64,
        range: &KeyRange,
    ) -> Result<Vec<KeyRecord>, StorageError> {
        let mut conn = self.pool.acquire().await?;

        let mut builder = QueryBuilder::<Sqlite>::new(RECORD_COLUMNS);
        builder.push(" WHERE revision >= ");
        builder.push_bind(from);
        push_range(&mut builder, range);
        builder.push(" ORDER BY revision, id");

        Ok(builder
            .build_query_as::<KeyRecord>()
            .fetch_all(&mut *conn)
            .await?)
    }
}

fn range_key(range: &KeyRange) -> &[u8] {
    match range {
        KeyRange::Single(key) | KeyRange::From(key) | KeyRange::Between(key, _) => key,
    }
}

async fn current_revision(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COALESCE(MAX(revision), 1) FROM records")
        .fetch_one(conn)
        .await
}

async fn find_lease(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<LeaseRecord>, sqlx::Error> {
    sqlx::query_as::<_, LeaseRecord>("SELECT id, ttl, granted_at FROM leases WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

fn push_range(builder: &mut QueryBuilder<'_, Sqlite>, range: &KeyRange) {
    match range {
        KeyRange::Single(key) => {
            builder.push(" AND key = ");
            builder.push_bind(key.clone());
        }
        KeyRange::From(start) => {
            builder.push(" AND key >= ");
            builder.push_bind(start.clone());
        }
        KeyRange::Between(start, end) => {
            builder.push(" AND key >= ");
            builder.push_bind(start.clone());
            builder.push(" AND key < ");
            builder.push_bind(end.clone());
        }
    }
}

/// Live state of every key in `range` as of `revision`, ordered by key.
async fn live_records(
    conn: &mut SqliteConnection,
    range: &KeyRange,
    revision: i64,
) -> Result<Vec<KeyRecord>, sqlx::Error> {
    let mut builder = QueryBuilder::<Sqlite>::new(RECORD_COLUMNS);
    builder.push(" WHERE id IN (SELECT MAX(id) FROM records WHERE revision <= ");
    builder.push_bind(revision);
    push_range(&mut builder, range);
    builder.push(" GROUP BY key) AND tombstone = 0 ORDER BY key");

    builder
        .build_query_as::<KeyRecord>()
        .fetch_all(conn)
        .await
}

async fn leased_records(
    conn: &mut SqliteConnection,
    lease: i64,
) -> Result<Vec<KeyRecord>, sqlx::Error> {
    let sql = format!(
        "{} WHERE id IN (SELECT MAX(id) FROM records GROUP BY key) \
         AND tombstone = 0 AND lease = ? ORDER BY key",
        RECORD_COLUMNS
    );
    sqlx::query_as::<_, KeyRecord>(&sql)
        .bind(lease)
        .fetch_all(conn)
        .await
}

async fn insert_tombstones(
    conn: &mut SqliteConnection,
    records: &[KeyRecord],
    revision: i64,
) -> Result<(), sqlx::Error> {
    for record in records {
        sqlx::query(
            "INSERT INTO records (revision, key, value, create_revision, version, lease, tombstone)
             VALUES (?, ?, X'', 0, 0, 0, 1)",
        )
        .bind(revision)
        .bind(&record.key)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Deletes the lease row and its keys. Caller holds the write lock.
async fn revoke_in(conn: &mut SqliteConnection, id: i64) -> Result<i64, sqlx::Error> {
    let current = current_revision(conn).await?;
    let attached = leased_records(conn, id).await?;

    let revision = if attached.is_empty() {
        current
    } else {
        insert_tombstones(conn, &attached, current + 1).await?;
        current + 1
    };

    sqlx::query("DELETE FROM leases WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(revision)
}

fn sort_records(records: &mut [KeyRecord], target: SortTarget, order: SortOrder) {
    match target {
        SortTarget::Key => {}
        SortTarget::Version => records.sort_by_key(|r| r.version),
        SortTarget::Create => records.sort_by_key(|r| r.create_revision),
        SortTarget::Mod => records.sort_by_key(|r| r.revision),
        SortTarget::Value => records.sort_by(|a, b| a.value.cmp(&b.value)),
    }

    if order == SortOrder::Descend {
        records.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn storage() -> Storage {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        Storage::new(pool)
    }

    fn prefix(p: &str) -> KeyRange {
        let mut end = p.as_bytes().to_vec();
        *end.last_mut().unwrap() += 1;
        KeyRange::Between(p.as_bytes().to_vec(), end)
    }

    #[tokio::test]
    async fn revisions_start_at_one_and_grow_per_write() {
        let storage = storage().await;
        assert_eq!(storage.revision().await.unwrap(), 1);

        let (rev, prev) = storage.put(b"a".to_vec(), b"1".to_vec(), 0).await.unwrap();
        assert_eq!(rev, 2);
        assert!(prev.is_none());

        let (rev, prev) = storage.put(b"a".to_vec(), b"2".to_vec(), 0).await.unwrap();
        assert_eq!(rev, 3);
        let prev = prev.unwrap();
        assert_eq!(prev.value, b"1");
        assert_eq!(prev.create_revision, 2);
    }

    #[tokio::test]
    async fn historical_range_sees_old_value() {
        let storage = storage().await;
        let (first, _) = storage.put(b"k".to_vec(), b"A".to_vec(), 0).await.unwrap();
        storage.put(b"k".to_vec(), b"B".to_vec(), 0).await.unwrap();

        let mut query = RangeQuery::new(KeyRange::Single(b"k".to_vec()));
        let now = storage.range(&query).await.unwrap();
        assert_eq!(now.kvs[0].value, b"B");
        assert_eq!(now.kvs[0].version, 2);

        query.revision = first;
        let then = storage.range(&query).await.unwrap();
        assert_eq!(then.kvs[0].value, b"A");
        assert_eq!(then.revision, first + 1);

        query.revision = first + 10;
        assert!(matches!(
            storage.range(&query).await,
            Err(StorageError::FutureRevision { .. })
        ));
    }

    #[tokio::test]
    async fn delete_range_uses_one_revision() {
        let storage = storage().await;
        for key in ["key_a", "key_b", "other"] {
            storage
                .put(key.as_bytes().to_vec(), b"v".to_vec(), 0)
                .await
                .unwrap();
        }
        let before = storage.revision().await.unwrap();

        let (rev, deleted) = storage.delete_range(&prefix("key")).await.unwrap();
        assert_eq!(rev, before + 1);
        assert_eq!(deleted.len(), 2);

        let (rev, deleted) = storage.delete_range(&prefix("key")).await.unwrap();
        assert_eq!(rev, before + 1);
        assert!(deleted.is_empty());

        let rest = storage
            .range(&RangeQuery::new(KeyRange::From(vec![0])))
            .await
            .unwrap();
        assert_eq!(rest.kvs.len(), 1);
        assert_eq!(rest.kvs[0].key, b"other");
    }

    #[tokio::test]
    async fn limit_sort_and_count() {
        let storage = storage().await;
        for i in 0..5 {
            storage
                .put(format!("p{}", i).into_bytes(), vec![b'0' + i], 0)
                .await
                .unwrap();
        }

        let mut query = RangeQuery::new(prefix("p"));
        query.limit = 2;
        query.sort_order = SortOrder::Descend;
        let result = storage.range(&query).await.unwrap();
        assert_eq!(result.count, 5);
        assert!(result.more);
        let keys: Vec<_> = result.kvs.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec![b"p4".to_vec(), b"p3".to_vec()]);

        query.count_only = true;
        let result = storage.range(&query).await.unwrap();
        assert!(result.kvs.is_empty());
        assert_eq!(result.count, 5);
    }

    #[tokio::test]
    async fn lease_lifecycle() {
        let storage = storage().await;
        assert!(matches!(
            storage.put(b"k".to_vec(), b"v".to_vec(), 42).await,
            Err(StorageError::LeaseNotFound(42))
        ));

        let lease = storage.grant_lease(0, 1).await.unwrap();
        assert!(lease.id > 0);
        assert!(matches!(
            storage.grant_lease(lease.id, 5).await,
            Err(StorageError::LeaseExists(_))
        ));

        storage
            .put(b"k".to_vec(), b"v".to_vec(), lease.id)
            .await
            .unwrap();
        let status = storage.lease_status(lease.id).await.unwrap().unwrap();
        assert_eq!(status.keys, vec![b"k".to_vec()]);

        let expired = storage
            .expire_leases(lease.expires_at() - 1)
            .await
            .unwrap();
        assert!(expired.is_empty());

        let before = storage.revision().await.unwrap();
        let expired = storage.expire_leases(lease.expires_at()).await.unwrap();
        assert_eq!(expired, vec![lease.id]);
        assert_eq!(storage.revision().await.unwrap(), before + 1);
        assert!(storage.lease_status(lease.id).await.unwrap().is_none());

        let result = storage
            .range(&RangeQuery::new(KeyRange::Single(b"k".to_vec())))
            .await
            .unwrap();
        assert!(result.kvs.is_empty());

        let events = storage
            .events_since(before + 1, &KeyRange::Single(b"k".to_vec()))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].tombstone);
    }

    #[tokio::test]
    async fn lease_past_ttl_is_not_found_before_reaping() {
        let storage = storage().await;
        let lease = storage.grant_lease(0, 1).await.unwrap();
        storage
            .put(b"k".to_vec(), b"v".to_vec(), lease.id)
            .await
            .unwrap();
        assert!(storage.lease_status(lease.id).await.unwrap().is_some());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(now_millis() >= lease.expires_at());

        assert!(storage.lease_status(lease.id).await.unwrap().is_none());
        assert!(matches!(
            storage.put(b"k".to_vec(), b"w".to_vec(), lease.id).await,
            Err(StorageError::LeaseNotFound(_))
        ));
    }
}
