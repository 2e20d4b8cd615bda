use super::staged::{GroupLocks, GroupSlice, IdSequence, SliceBackend, StagedTransaction};
use crate::domain::group::{Group, GroupId, Member, MemberId, PaymentId};
use crate::domain::payment::Payment;
use crate::domain::ports::{LedgerStore, LedgerTransactionBox};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for group rows, keyed by group id.
pub const CF_GROUPS: &str = "groups";
/// Column Family for member rows, keyed by group id then member id.
pub const CF_MEMBERS: &str = "members";
/// Column Family for payment rows (payees included), keyed by group id then payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Member id to owning group id.
pub const CF_MEMBER_GROUPS: &str = "member_groups";
/// Payment id to owning group id.
pub const CF_PAYMENT_GROUPS: &str = "payment_groups";
/// Id high-water marks, so deleted ids are never handed out again.
pub const CF_META: &str = "meta";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_GROUPS,
    CF_MEMBERS,
    CF_PAYMENTS,
    CF_MEMBER_GROUPS,
    CF_PAYMENT_GROUPS,
    CF_META,
];

const LAST_GROUP_ID: &[u8] = b"last_group_id";
const LAST_MEMBER_ID: &[u8] = b"last_member_id";
const LAST_PAYMENT_ID: &[u8] = b"last_payment_id";

fn row_key(group_id: GroupId, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&group_id.0.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let head: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| LedgerError::internal("Malformed RocksDB key"))?;
    Ok(u64::from_be_bytes(head))
}

/// Slice storage on RocksDB. Every commit is a single atomic `WriteBatch`.
pub struct RocksDbBackend {
    db: DB,
    ids: IdSequence,
    // Orders commits so the stored high-water marks only ever grow.
    commit: Mutex<()>,
}

impl RocksDbBackend {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let mut backend = Self {
            db,
            ids: IdSequence::default(),
            commit: Mutex::new(()),
        };
        backend.ids = IdSequence::starting_after(
            backend.last_id(CF_GROUPS)?.max(backend.mark(LAST_GROUP_ID)?),
            backend.last_id(CF_MEMBER_GROUPS)?.max(backend.mark(LAST_MEMBER_ID)?),
            backend.last_id(CF_PAYMENT_GROUPS)?.max(backend.mark(LAST_PAYMENT_ID)?),
        );
        Ok(backend)
    }

    fn mark(&self, key: &[u8]) -> Result<u64> {
        match self.db.get_pinned_cf(self.cf(CF_META)?, key)? {
            Some(bytes) => decode_id(&bytes),
            None => Ok(0),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::internal(format!("{name} column family not found")))
    }

    /// Highest id stored in a column family keyed by a big-endian id.
    fn last_id(&self, name: &str) -> Result<u64> {
        let cf = self.cf(name)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                decode_id(&key)
            }
            None => Ok(0),
        }
    }

    fn scan_group<T: DeserializeOwned>(&self, name: &str, group_id: GroupId) -> Result<Vec<(Box<[u8]>, T)>> {
        let cf = self.cf(name)?;
        let prefix = group_id.0.to_be_bytes();
        let mut rows = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            rows.push((key, serde_json::from_slice(&value)?));
        }
        Ok(rows)
    }

    fn locate(&self, name: &str, id: u64) -> Result<Option<GroupId>> {
        let cf = self.cf(name)?;
        match self.db.get_pinned_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(GroupId(decode_id(&bytes)?))),
            None => Ok(None),
        }
    }

    /// Queues deletes for every stored row of the group, index entries included.
    fn clear_group(&self, batch: &mut WriteBatch, group_id: GroupId) -> Result<()> {
        let members = self.cf(CF_MEMBERS)?;
        let member_groups = self.cf(CF_MEMBER_GROUPS)?;
        for (key, member) in self.scan_group::<Member>(CF_MEMBERS, group_id)? {
            batch.delete_cf(members, key);
            batch.delete_cf(member_groups, member.id.0.to_be_bytes());
        }

        let payments = self.cf(CF_PAYMENTS)?;
        let payment_groups = self.cf(CF_PAYMENT_GROUPS)?;
        for (key, payment) in self.scan_group::<Payment>(CF_PAYMENTS, group_id)? {
            batch.delete_cf(payments, key);
            batch.delete_cf(payment_groups, payment.id.0.to_be_bytes());
        }

        batch.delete_cf(self.cf(CF_GROUPS)?, group_id.0.to_be_bytes());
        Ok(())
    }

    fn write_group(&self, batch: &mut WriteBatch, slice: &GroupSlice) -> Result<()> {
        let group_id = slice.group.id;
        let group_key = group_id.0.to_be_bytes();
        batch.put_cf(self.cf(CF_GROUPS)?, group_key, serde_json::to_vec(&slice.group)?);

        let members = self.cf(CF_MEMBERS)?;
        let member_groups = self.cf(CF_MEMBER_GROUPS)?;
        for member in slice.members.values() {
            batch.put_cf(members, row_key(group_id, member.id.0), serde_json::to_vec(member)?);
            batch.put_cf(member_groups, member.id.0.to_be_bytes(), group_key);
        }

        let payments = self.cf(CF_PAYMENTS)?;
        let payment_groups = self.cf(CF_PAYMENT_GROUPS)?;
        for payment in slice.payments.values() {
            batch.put_cf(payments, row_key(group_id, payment.id.0), serde_json::to_vec(payment)?);
            batch.put_cf(payment_groups, payment.id.0.to_be_bytes(), group_key);
        }
        Ok(())
    }
}

#[async_trait]
impl SliceBackend for RocksDbBackend {
    async fn load(&self, group_id: GroupId) -> Result<Option<GroupSlice>> {
        let Some(bytes) = self.db.get_pinned_cf(self.cf(CF_GROUPS)?, group_id.0.to_be_bytes())? else {
            return Ok(None);
        };
        let group: Group = serde_json::from_slice(&bytes)?;

        let mut slice = GroupSlice::new(group);
        for (_, member) in self.scan_group::<Member>(CF_MEMBERS, group_id)? {
            slice.members.insert(member.id, member);
        }
        for (_, payment) in self.scan_group::<Payment>(CF_PAYMENTS, group_id)? {
            slice.payments.insert(payment.id, payment);
        }
        Ok(Some(slice))
    }

    async fn group_ids(&self) -> Result<Vec<GroupId>> {
        let cf = self.cf(CF_GROUPS)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (key, _) = item?;
                Ok(GroupId(decode_id(&key)?))
            })
            .collect()
    }

    async fn locate_member(&self, member_id: MemberId) -> Result<Option<GroupId>> {
        self.locate(CF_MEMBER_GROUPS, member_id.0)
    }

    async fn locate_payment(&self, payment_id: PaymentId) -> Result<Option<GroupId>> {
        self.locate(CF_PAYMENT_GROUPS, payment_id.0)
    }

    async fn persist(&self, changes: Vec<(GroupId, Option<GroupSlice>)>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for (group_id, slice) in &changes {
            // Deletes queued first are overridden by later puts of the same key.
            self.clear_group(&mut batch, *group_id)?;
            if let Some(slice) = slice {
                self.write_group(&mut batch, slice)?;
            }
        }

        let _commit = self.commit.lock().await;
        let (groups, members, payments) = self.ids.high_water();
        let meta = self.cf(CF_META)?;
        batch.put_cf(meta, LAST_GROUP_ID, groups.to_be_bytes());
        batch.put_cf(meta, LAST_MEMBER_ID, members.to_be_bytes());
        batch.put_cf(meta, LAST_PAYMENT_ID, payments.to_be_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    fn ids(&self) -> &IdSequence {
        &self.ids
    }
}

/// A persistent ledger store implementation using RocksDB.
///
/// Groups, members and payments live in separate Column Families, with two
/// index families mapping member and payment ids back to their group. Writers
/// lock whole groups in-process, so the database must not be shared with
/// another process.
///
/// This struct is thread-safe (`Clone` shares the underlying backend and locks).
#[derive(Clone)]
pub struct RocksDBStore {
    backend: Arc<RocksDbBackend>,
    locks: Arc<GroupLocks>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Id sequences resume after the highest ids ever committed, deleted rows included.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(RocksDbBackend::open(path)?),
            locks: Arc::new(GroupLocks::default()),
        })
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn begin(&self) -> Result<LedgerTransactionBox> {
        Ok(Box::new(StagedTransaction::new(
            self.backend.clone(),
            self.locks.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Balance};
    use crate::domain::payment::NewPayment;
    use crate::domain::ports::LedgerTransaction;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.backend.db.cf_handle(name).is_some(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_rocksdb_round_trip() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut tx = store.begin().await.unwrap();
        let group = tx.insert_group("Trip").await.unwrap();
        let alice = tx.insert_member(group.id, "Alice").await.unwrap();
        let bob = tx.insert_member(group.id, "Bob").await.unwrap();
        let payment = tx
            .insert_payment(NewPayment {
                group_id: group.id,
                description: Some("Taxi".to_string()),
                amount: Amount::new(dec!(20)).unwrap(),
                payer: alice.id,
                payees: vec![bob.id],
            })
            .await
            .unwrap();
        tx.adjust_balance(alice.id, dec!(-20)).await.unwrap();
        tx.adjust_balance(bob.id, dec!(20)).await.unwrap();
        tx.commit().await.unwrap();

        let mut reader = store.begin().await.unwrap();
        assert_eq!(reader.payment(payment.id).await.unwrap(), Some(payment.clone()));
        let members = reader.members(group.id).await.unwrap();
        assert_eq!(members[0].balance, Balance::new(dec!(-20)));
        assert_eq!(members[1].balance, Balance::new(dec!(20)));
        assert_eq!(reader.groups().await.unwrap(), vec![group.clone()]);

        // Removed rows disappear from the column families and the indexes.
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.delete_payment(payment.id).await.unwrap(), 1);
        tx.commit().await.unwrap();
        let mut reader = store.begin().await.unwrap();
        assert!(reader.payment(payment.id).await.unwrap().is_none());
        assert!(reader.payments(group.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rocksdb_reopen_resumes_ids() {
        let dir = tempdir().unwrap();
        let (group, member) = {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let mut tx = store.begin().await.unwrap();
            let group = tx.insert_group("Trip").await.unwrap();
            let member = tx.insert_member(group.id, "Alice").await.unwrap();
            tx.commit().await.unwrap();
            (group, member)
        };

        let store = RocksDBStore::open(dir.path()).unwrap();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.member(member.id).await.unwrap(), Some(member.clone()));
        let next = tx.insert_member(group.id, "Bob").await.unwrap();
        assert_eq!(next.id, MemberId(member.id.0 + 1));
        assert_eq!(tx.insert_group("Other").await.unwrap().id, GroupId(group.id.0 + 1));
    }

    #[tokio::test]
    async fn test_rocksdb_deleted_ids_are_not_reused() {
        let dir = tempdir().unwrap();
        let (group, alice, deleted) = {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let mut tx = store.begin().await.unwrap();
            let group = tx.insert_group("Trip").await.unwrap();
            let alice = tx.insert_member(group.id, "Alice").await.unwrap();
            let bob = tx.insert_member(group.id, "Bob").await.unwrap();
            let payment = tx
                .insert_payment(NewPayment {
                    group_id: group.id,
                    description: None,
                    amount: Amount::new(dec!(5)).unwrap(),
                    payer: alice.id,
                    payees: vec![alice.id],
                })
                .await
                .unwrap();
            tx.commit().await.unwrap();

            // Drop the highest payment and member ids before closing.
            let mut tx = store.begin().await.unwrap();
            assert_eq!(tx.delete_payment(payment.id).await.unwrap(), 1);
            assert_eq!(tx.delete_member(bob.id).await.unwrap(), 1);
            tx.commit().await.unwrap();
            (group, alice, (payment.id, bob.id))
        };

        let store = RocksDBStore::open(dir.path()).unwrap();
        let mut tx = store.begin().await.unwrap();
        let payment = tx
            .insert_payment(NewPayment {
                group_id: group.id,
                description: None,
                amount: Amount::new(dec!(7)).unwrap(),
                payer: alice.id,
                payees: vec![alice.id],
            })
            .await
            .unwrap();
        let carol = tx.insert_member(group.id, "Carol").await.unwrap();
        assert!(payment.id > deleted.0, "payment id {} reused", payment.id);
        assert!(carol.id > deleted.1, "member id {} reused", carol.id);
    }

    #[tokio::test]
    async fn test_rocksdb_delete_group() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut tx = store.begin().await.unwrap();
        let group = tx.insert_group("Trip").await.unwrap();
        let alice = tx.insert_member(group.id, "Alice").await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.delete_group(group.id).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let mut reader = store.begin().await.unwrap();
        assert!(reader.group(group.id).await.unwrap().is_none());
        assert!(reader.member(alice.id).await.unwrap().is_none());
        assert!(store.backend.locate_member(alice.id).await.unwrap().is_none());
    }
}
