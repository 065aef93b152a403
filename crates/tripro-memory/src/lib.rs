use std::{
    collections::{BTreeMap, HashMap},
    ops::{Bound, RangeBounds},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use tripro_core::{
    Account, JournalEntry, JournalStatus, LedgerLine, Record, RecordKind, Settings,
};

pub use tripro_core::storage::{StorageBackend, StorageError, TransactionId};

#[derive(Clone)]
struct StoredRecord {
    position: u64,
    record: Record,
    deleted_at: Option<OffsetDateTime>,
}

#[derive(Clone, Default)]
struct BookData {
    accounts: BTreeMap<Arc<str>, Account>,
    codes: HashMap<Arc<str>, Arc<str>>,
    journals: HashMap<Uuid, JournalEntry>,
    references: HashMap<Arc<str>, Uuid>,
    ledgers: HashMap<Arc<str>, LedgerStore>,
    records: HashMap<(RecordKind, Uuid), StoredRecord>,
    record_position: u64,
    settings: Settings,
}

impl BookData {
    fn index_journal(&mut self, entry: &JournalEntry) {
        if !entry.affects_ledger() {
            return;
        }
        for line in &entry.lines {
            self.ledgers
                .entry(line.account_id.clone())
                .or_default()
                .add_posting(entry.date, entry.sequence, entry.id, line.debit, line.credit);
        }
    }

    fn unindex_journal(&mut self, entry: &JournalEntry) {
        for line in &entry.lines {
            if let Some(ledger) = self.ledgers.get_mut(&line.account_id) {
                ledger.remove_journal(entry.date, entry.id);
            }
        }
    }

    fn live_records(&self, kind: RecordKind, deleted: bool) -> Vec<&StoredRecord> {
        let mut found: Vec<&StoredRecord> = self
            .records
            .iter()
            .filter(|((k, _), stored)| *k == kind && stored.deleted_at.is_some() == deleted)
            .map(|(_, stored)| stored)
            .collect();
        found.sort_by_key(|stored| stored.position);
        found
    }
}

struct Snapshot {
    data: BookData,
    sequence_value: u64,
}

pub struct InMemoryStorage {
    data: RwLock<BookData>,
    sequence_counter: AtomicU64,
    tx_counter: AtomicU64,
    snapshots: RwLock<HashMap<TransactionId, Snapshot>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BookData::default()),
            sequence_counter: AtomicU64::new(1),
            tx_counter: AtomicU64::new(1),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BookData>, StorageError> {
        self.data
            .read()
            .map_err(|e| StorageError::Other(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BookData>, StorageError> {
        self.data
            .write()
            .map_err(|e| StorageError::Other(e.to_string()))
    }
}

impl StorageBackend for InMemoryStorage {
    fn create_account(&self, account: &Account) -> Result<(), StorageError> {
        let mut data = self.write()?;
        if data.accounts.contains_key(&account.id) {
            return Err(StorageError::DuplicateAccount(account.id.to_string()));
        }
        if data.codes.contains_key(&account.code) {
            return Err(StorageError::DuplicateAccountCode(account.code.to_string()));
        }
        if let Some(parent) = &account.parent_id {
            match data.accounts.get(parent) {
                Some(p) if p.deleted_at.is_none() => {}
                _ => return Err(StorageError::ParentNotFound(parent.to_string())),
            }
        }
        data.codes.insert(account.code.clone(), account.id.clone());
        data.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn update_account(&self, account: &Account) -> Result<(), StorageError> {
        let mut data = self.write()?;
        let existing = data
            .accounts
            .get(&account.id)
            .cloned()
            .ok_or_else(|| StorageError::AccountNotFound(account.id.to_string()))?;
        if existing.code != account.code {
            if data.codes.contains_key(&account.code) {
                return Err(StorageError::DuplicateAccountCode(account.code.to_string()));
            }
            data.codes.remove(&existing.code);
            data.codes.insert(account.code.clone(), account.id.clone());
        }
        if let Some(parent) = &account.parent_id {
            if parent == &account.id || !data.accounts.contains_key(parent) {
                return Err(StorageError::ParentNotFound(parent.to_string()));
            }
        }
        data.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn get_account(&self, id: &str) -> Result<Option<Account>, StorageError> {
        Ok(self.read()?.accounts.get(id).cloned())
    }

    fn find_account_by_code(&self, code: &str) -> Result<Option<Account>, StorageError> {
        let data = self.read()?;
        Ok(data
            .codes
            .get(code)
            .and_then(|id| data.accounts.get(id))
            .cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let data = self.read()?;
        let mut accounts: Vec<Account> = data
            .accounts
            .values()
            .filter(|a| a.deleted_at.is_none())
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }

    fn delete_account(&self, id: &str, at: OffsetDateTime) -> Result<(), StorageError> {
        let mut data = self.write()?;
        let code = match data.accounts.get(id) {
            Some(a) if a.deleted_at.is_none() => a.code.clone(),
            _ => return Err(StorageError::AccountNotFound(id.to_string())),
        };
        let has_children = data
            .accounts
            .values()
            .any(|a| a.deleted_at.is_none() && a.parent_id.as_deref() == Some(id));
        let has_lines = data
            .journals
            .values()
            .any(|j| j.lines.iter().any(|l| l.account_id.as_ref() == id));
        if has_children || has_lines {
            return Err(StorageError::AccountInUse(id.to_string()));
        }
        data.codes.remove(&code);
        if let Some(account) = data.accounts.get_mut(id) {
            account.deleted_at = Some(at);
        }
        Ok(())
    }

    fn insert_journal(&self, entry: &JournalEntry) -> Result<JournalEntry, StorageError> {
        let mut data = self.write()?;
        if data.references.contains_key(&entry.reference) {
            return Err(StorageError::DuplicateReference(entry.reference.to_string()));
        }
        for line in &entry.lines {
            if !data.accounts.contains_key(&line.account_id) {
                return Err(StorageError::AccountNotFound(line.account_id.to_string()));
            }
        }

        let mut stored = entry.clone();
        if stored.sequence == 0 {
            stored.sequence = self.next_sequence();
        } else {
            self.sequence_counter
                .fetch_max(stored.sequence + 1, Ordering::SeqCst);
        }

        data.references.insert(stored.reference.clone(), stored.id);
        data.index_journal(&stored);
        data.journals.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn get_journal(&self, id: Uuid) -> Result<Option<JournalEntry>, StorageError> {
        Ok(self.read()?.journals.get(&id).cloned())
    }

    fn find_journal_by_reference(&self, reference: &str) -> Result<Option<JournalEntry>, StorageError> {
        let data = self.read()?;
        Ok(data
            .references
            .get(reference)
            .and_then(|id| data.journals.get(id))
            .cloned())
    }

    fn list_journals(&self, from: Bound<Date>, to: Bound<Date>) -> Result<Vec<JournalEntry>, StorageError> {
        let data = self.read()?;
        let mut journals: Vec<JournalEntry> = data
            .journals
            .values()
            .filter(|j| (from, to).contains(&j.date))
            .cloned()
            .collect();
        journals.sort_by_key(|j| (j.date, j.sequence));
        Ok(journals)
    }

    fn set_journal_status(&self, id: Uuid, status: JournalStatus) -> Result<(), StorageError> {
        let mut data = self.write()?;
        let mut entry = data
            .journals
            .get(&id)
            .cloned()
            .ok_or(StorageError::JournalNotFound(id))?;
        data.unindex_journal(&entry);
        entry.status = status;
        data.index_journal(&entry);
        data.journals.insert(id, entry);
        Ok(())
    }

    fn set_journal_deleted(&self, id: Uuid, at: Option<OffsetDateTime>) -> Result<(), StorageError> {
        let mut data = self.write()?;
        let mut entry = data
            .journals
            .get(&id)
            .cloned()
            .ok_or(StorageError::JournalNotFound(id))?;
        data.unindex_journal(&entry);
        entry.deleted_at = at;
        data.index_journal(&entry);
        data.journals.insert(id, entry);
        Ok(())
    }

    fn ledger_lines(&self, account_ids: &[Arc<str>], from: Bound<Date>, to: Bound<Date>) -> Result<Vec<LedgerLine>, StorageError> {
        let data = self.read()?;
        let mut lines = Vec::new();
        let ledgers: Vec<(&Arc<str>, &LedgerStore)> = if account_ids.is_empty() {
            data.ledgers.iter().collect()
        } else {
            account_ids
                .iter()
                .filter_map(|id| data.ledgers.get_key_value(id))
                .collect()
        };

        for (account_id, ledger) in ledgers {
            for (date, posting) in ledger.postings(from, to) {
                if let Some(journal) = data.journals.get(&posting.journal_id) {
                    lines.push(LedgerLine {
                        journal_id: posting.journal_id,
                        sequence: posting.sequence,
                        date,
                        reference: journal.reference.clone(),
                        description: journal.description.clone(),
                        account_id: account_id.clone(),
                        debit: posting.debit,
                        credit: posting.credit,
                    });
                }
            }
        }

        lines.sort_by(|a, b| (a.date, a.sequence).cmp(&(b.date, b.sequence)));
        Ok(lines)
    }

    fn get_balance(&self, account_id: &str, to: Bound<Date>) -> Result<Decimal, StorageError> {
        let data = self.read()?;
        Ok(data
            .ledgers
            .get(account_id)
            .map(|ledger| ledger.get_balance(to))
            .unwrap_or(Decimal::ZERO))
    }

    fn put_record(&self, record: &Record) -> Result<(), StorageError> {
        let mut data = self.write()?;
        let key = (record.kind(), record.id());
        match data.records.get_mut(&key) {
            Some(stored) => stored.record = record.clone(),
            None => {
                data.record_position += 1;
                let position = data.record_position;
                data.records.insert(
                    key,
                    StoredRecord {
                        position,
                        record: record.clone(),
                        deleted_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    fn get_record(&self, kind: RecordKind, id: Uuid) -> Result<Option<Record>, StorageError> {
        let data = self.read()?;
        Ok(data
            .records
            .get(&(kind, id))
            .filter(|stored| stored.deleted_at.is_none())
            .map(|stored| stored.record.clone()))
    }

    fn list_records(&self, kind: RecordKind) -> Result<Vec<Record>, StorageError> {
        let data = self.read()?;
        Ok(data
            .live_records(kind, false)
            .into_iter()
            .map(|stored| stored.record.clone())
            .collect())
    }

    fn list_deleted_records(&self, kind: RecordKind) -> Result<Vec<(Record, OffsetDateTime)>, StorageError> {
        let data = self.read()?;
        Ok(data
            .live_records(kind, true)
            .into_iter()
            .filter_map(|stored| stored.deleted_at.map(|at| (stored.record.clone(), at)))
            .collect())
    }

    fn set_record_deleted(&self, kind: RecordKind, id: Uuid, at: Option<OffsetDateTime>) -> Result<(), StorageError> {
        let mut data = self.write()?;
        let stored = data
            .records
            .get_mut(&(kind, id))
            .ok_or(StorageError::RecordNotFound(kind, id))?;
        stored.deleted_at = at;
        Ok(())
    }

    fn purge_record(&self, kind: RecordKind, id: Uuid) -> Result<(), StorageError> {
        let mut data = self.write()?;
        data.records
            .remove(&(kind, id))
            .map(|_| ())
            .ok_or(StorageError::RecordNotFound(kind, id))
    }

    fn get_settings(&self) -> Result<Settings, StorageError> {
        Ok(self.read()?.settings.clone())
    }

    fn put_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        self.write()?.settings = settings.clone();
        Ok(())
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let snapshot = Snapshot {
            data: self.read()?.clone(),
            sequence_value: self.sequence_counter.load(Ordering::SeqCst),
        };
        self.snapshots
            .write()
            .map_err(|e| StorageError::Other(e.to_string()))?
            .insert(tx_id, snapshot);
        tracing::debug!(tx_id, "Transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        self.snapshots
            .write()
            .map_err(|e| StorageError::Other(e.to_string()))?
            .remove(&tx_id)
            .ok_or(StorageError::NoActiveTransaction)?;
        tracing::debug!(tx_id, "Transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let snapshot = self
            .snapshots
            .write()
            .map_err(|e| StorageError::Other(e.to_string()))?
            .remove(&tx_id)
            .ok_or(StorageError::NoActiveTransaction)?;
        *self.write()? = snapshot.data;
        self.sequence_counter
            .store(snapshot.sequence_value, Ordering::SeqCst);
        tracing::debug!(tx_id, "Transaction rolled back");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Posting {
    sequence: u64,
    journal_id: Uuid,
    debit: Decimal,
    credit: Decimal,
}

/// Per-account index of posted lines, bucketed by day.
#[derive(Clone, Default)]
struct LedgerStore {
    days: BTreeMap<Date, LedgerDay>,
}

impl LedgerStore {
    fn add_posting(&mut self, date: Date, sequence: u64, journal_id: Uuid, debit: Decimal, credit: Decimal) {
        let day = self.days.entry(date).or_default();
        day.total += debit - credit;
        day.postings.push(Posting {
            sequence,
            journal_id,
            debit,
            credit,
        });
    }

    fn remove_journal(&mut self, date: Date, journal_id: Uuid) {
        let emptied = match self.days.get_mut(&date) {
            Some(day) => {
                day.postings.retain(|p| p.journal_id != journal_id);
                day.total = day.postings.iter().map(|p| p.debit - p.credit).sum();
                day.postings.is_empty()
            }
            None => false,
        };
        if emptied {
            self.days.remove(&date);
        }
    }

    fn get_balance(&self, to: Bound<Date>) -> Decimal {
        self.days
            .range((Bound::Unbounded, to))
            .map(|(_, day)| day.total)
            .sum()
    }

    fn postings(&self, from: Bound<Date>, to: Bound<Date>) -> impl Iterator<Item = (Date, &Posting)> + '_ {
        let days = if is_empty_range(from, to) {
            None
        } else {
            Some(self.days.range((from, to)))
        };
        days.into_iter()
            .flatten()
            .flat_map(|(date, day)| day.postings.iter().map(move |p| (*date, p)))
    }
}

fn is_empty_range(from: Bound<Date>, to: Bound<Date>) -> bool {
    match (from, to) {
        (Bound::Included(a), Bound::Included(b)) => a > b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
        _ => false,
    }
}

#[derive(Debug, Clone, Default)]
struct LedgerDay {
    total: Decimal,
    postings: Vec<Posting>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::{date, datetime};
    use tripro_core::{models::records::Customer, AccountType, JournalLine, TypedRecord};

    fn storage_with_accounts() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        storage
            .create_account(&Account::new("cash", "1231", "Cash", AccountType::Asset))
            .unwrap();
        storage
            .create_account(&Account::new("sales", "411", "Sales", AccountType::Revenue))
            .unwrap();
        storage
    }

    fn entry(reference: &str, date: Date, amount: Decimal, status: JournalStatus) -> JournalEntry {
        JournalEntry {
            id: Uuid::new_v4(),
            sequence: 0,
            date,
            reference: Arc::from(reference),
            description: Arc::from("Cash sale"),
            status,
            lines: vec![
                JournalLine::debit("cash", amount),
                JournalLine::credit("sales", amount),
            ],
            related_document: None,
            created_at: datetime!(2024-01-01 0:00 UTC),
            deleted_at: None,
        }
    }

    #[test]
    fn balances_only_count_posted_live_entries() {
        let storage = storage_with_accounts();
        storage
            .insert_journal(&entry("JE-1", date!(2024 - 01 - 10), dec!(100), JournalStatus::Posted))
            .unwrap();
        let draft = storage
            .insert_journal(&entry("JE-2", date!(2024 - 01 - 11), dec!(50), JournalStatus::Draft))
            .unwrap();
        assert_eq!(storage.get_balance("cash", Bound::Unbounded).unwrap(), dec!(100));
        assert_eq!(storage.get_balance("sales", Bound::Unbounded).unwrap(), dec!(-100));

        storage.set_journal_status(draft.id, JournalStatus::Posted).unwrap();
        assert_eq!(storage.get_balance("cash", Bound::Unbounded).unwrap(), dec!(150));
        assert_eq!(
            storage.get_balance("cash", Bound::Included(date!(2024 - 01 - 10))).unwrap(),
            dec!(100)
        );

        storage
            .set_journal_deleted(draft.id, Some(datetime!(2024-02-01 0:00 UTC)))
            .unwrap();
        assert_eq!(storage.get_balance("cash", Bound::Unbounded).unwrap(), dec!(100));
        storage.set_journal_deleted(draft.id, None).unwrap();
        assert_eq!(storage.get_balance("cash", Bound::Unbounded).unwrap(), dec!(150));
    }

    #[test]
    fn sequences_increase_and_references_are_unique() {
        let storage = storage_with_accounts();
        let a = storage
            .insert_journal(&entry("JE-1", date!(2024 - 01 - 10), dec!(1), JournalStatus::Posted))
            .unwrap();
        let b = storage
            .insert_journal(&entry("JE-2", date!(2024 - 01 - 10), dec!(1), JournalStatus::Posted))
            .unwrap();
        assert!(b.sequence > a.sequence);

        let err = storage
            .insert_journal(&entry("JE-1", date!(2024 - 01 - 12), dec!(1), JournalStatus::Posted))
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateReference(_)));
    }

    #[test]
    fn ledger_lines_are_ordered_by_date_then_sequence() {
        let storage = storage_with_accounts();
        storage
            .insert_journal(&entry("JE-B", date!(2024 - 03 - 02), dec!(2), JournalStatus::Posted))
            .unwrap();
        storage
            .insert_journal(&entry("JE-A", date!(2024 - 03 - 01), dec!(1), JournalStatus::Posted))
            .unwrap();
        storage
            .insert_journal(&entry("JE-C", date!(2024 - 03 - 02), dec!(3), JournalStatus::Posted))
            .unwrap();

        let lines = storage
            .ledger_lines(&[Arc::from("cash")], Bound::Unbounded, Bound::Unbounded)
            .unwrap();
        let refs: Vec<&str> = lines.iter().map(|l| l.reference.as_ref()).collect();
        assert_eq!(refs, vec!["JE-A", "JE-B", "JE-C"]);

        let all = storage
            .ledger_lines(&[], Bound::Included(date!(2024 - 03 - 02)), Bound::Unbounded)
            .unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn account_with_lines_cannot_be_deleted() {
        let storage = storage_with_accounts();
        storage
            .insert_journal(&entry("JE-1", date!(2024 - 01 - 10), dec!(1), JournalStatus::Draft))
            .unwrap();
        let err = storage
            .delete_account("cash", datetime!(2024-02-01 0:00 UTC))
            .unwrap_err();
        assert!(matches!(err, StorageError::AccountInUse(_)));

        storage
            .create_account(&Account::new("bank", "1232", "Bank", AccountType::Asset))
            .unwrap();
        storage
            .delete_account("bank", datetime!(2024-02-01 0:00 UTC))
            .unwrap();
        assert!(storage.find_account_by_code("1232").unwrap().is_none());
        assert_eq!(storage.list_accounts().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_codes_are_rejected() {
        let storage = storage_with_accounts();
        let err = storage
            .create_account(&Account::new("cash2", "1231", "Cash 2", AccountType::Asset))
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateAccountCode(_)));
        let err = storage
            .create_account(&Account::new("x", "9", "X", AccountType::Asset).under("missing"))
            .unwrap_err();
        assert!(matches!(err, StorageError::ParentNotFound(_)));
    }

    #[test]
    fn records_soft_delete_and_purge() {
        let storage = InMemoryStorage::new();
        let customer = Customer {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            phone: None,
            email: None,
            address: None,
            tax_number: None,
            credit_limit: dec!(1000),
        };
        storage.put_record(&customer.clone().into_record()).unwrap();
        assert_eq!(storage.list_records(RecordKind::Customer).unwrap().len(), 1);

        storage
            .set_record_deleted(RecordKind::Customer, customer.id, Some(datetime!(2024-02-01 0:00 UTC)))
            .unwrap();
        assert!(storage.get_record(RecordKind::Customer, customer.id).unwrap().is_none());
        assert_eq!(storage.list_deleted_records(RecordKind::Customer).unwrap().len(), 1);

        storage.purge_record(RecordKind::Customer, customer.id).unwrap();
        assert!(storage.list_deleted_records(RecordKind::Customer).unwrap().is_empty());
    }

    #[test]
    fn rollback_restores_snapshot_and_sequence() {
        let storage = storage_with_accounts();
        let tx_id = storage.begin_transaction().unwrap();
        storage
            .insert_journal(&entry("JE-1", date!(2024 - 01 - 10), dec!(100), JournalStatus::Posted))
            .unwrap();
        storage.rollback_transaction(tx_id).unwrap();

        assert_eq!(storage.get_balance("cash", Bound::Unbounded).unwrap(), Decimal::ZERO);
        assert!(storage.find_journal_by_reference("JE-1").unwrap().is_none());
        let again = storage
            .insert_journal(&entry("JE-1", date!(2024 - 01 - 10), dec!(100), JournalStatus::Posted))
            .unwrap();
        assert_eq!(again.sequence, 1);
        assert!(matches!(
            storage.commit_transaction(tx_id),
            Err(StorageError::NoActiveTransaction)
        ));
    }
}
