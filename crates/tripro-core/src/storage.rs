use std::{ops::Bound, sync::Arc};

use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::models::{
    read::LedgerLine,
    records::{Record, RecordKind},
    Account, JournalEntry, JournalStatus, Settings,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("account already exists: {0}")]
    DuplicateAccount(String),
    #[error("account code already in use: {0}")]
    DuplicateAccountCode(String),
    #[error("parent account not found: {0}")]
    ParentNotFound(String),
    #[error("account is referenced by journal lines or child accounts: {0}")]
    AccountInUse(String),
    #[error("journal entry not found: {0}")]
    JournalNotFound(Uuid),
    #[error("journal reference already exists: {0}")]
    DuplicateReference(String),
    #[error("{0} record not found: {1}")]
    RecordNotFound(RecordKind, Uuid),
    #[error("no active transaction")]
    NoActiveTransaction,
}

pub type TransactionId = u64;

/// Persistence contract shared by every backend.
///
/// Backends store what they are given. Balancing, period locks and other
/// bookkeeping rules are enforced by the posting layer above this trait.
pub trait StorageBackend: Send + Sync {
    // Chart of accounts
    fn create_account(&self, account: &Account) -> Result<(), StorageError>;
    fn update_account(&self, account: &Account) -> Result<(), StorageError>;
    fn get_account(&self, id: &str) -> Result<Option<Account>, StorageError>;
    fn find_account_by_code(&self, code: &str) -> Result<Option<Account>, StorageError>;
    /// Accounts ordered by code, soft-deleted ones excluded.
    fn list_accounts(&self) -> Result<Vec<Account>, StorageError>;
    /// Soft delete. Fails with `AccountInUse` when lines or live children reference it.
    fn delete_account(&self, id: &str, at: OffsetDateTime) -> Result<(), StorageError>;

    // Journal
    /// Stores the entry, assigning the next sequence when `entry.sequence` is zero.
    fn insert_journal(&self, entry: &JournalEntry) -> Result<JournalEntry, StorageError>;
    fn get_journal(&self, id: Uuid) -> Result<Option<JournalEntry>, StorageError>;
    fn find_journal_by_reference(&self, reference: &str) -> Result<Option<JournalEntry>, StorageError>;
    /// Entries in the date range ordered by (date, sequence), soft-deleted included.
    fn list_journals(&self, from: Bound<Date>, to: Bound<Date>) -> Result<Vec<JournalEntry>, StorageError>;
    fn set_journal_status(&self, id: Uuid, status: JournalStatus) -> Result<(), StorageError>;
    fn set_journal_deleted(&self, id: Uuid, at: Option<OffsetDateTime>) -> Result<(), StorageError>;

    // Ledger
    /// Lines of posted, live entries touching the given accounts (all when empty),
    /// ordered by (date, sequence).
    fn ledger_lines(&self, account_ids: &[Arc<str>], from: Bound<Date>, to: Bound<Date>) -> Result<Vec<LedgerLine>, StorageError>;
    /// Sum of debit minus credit of posted, live lines up to `to`.
    fn get_balance(&self, account_id: &str, to: Bound<Date>) -> Result<Decimal, StorageError>;

    // Documents
    fn put_record(&self, record: &Record) -> Result<(), StorageError>;
    fn get_record(&self, kind: RecordKind, id: Uuid) -> Result<Option<Record>, StorageError>;
    fn list_records(&self, kind: RecordKind) -> Result<Vec<Record>, StorageError>;
    fn list_deleted_records(&self, kind: RecordKind) -> Result<Vec<(Record, OffsetDateTime)>, StorageError>;
    fn set_record_deleted(&self, kind: RecordKind, id: Uuid, at: Option<OffsetDateTime>) -> Result<(), StorageError>;
    fn purge_record(&self, kind: RecordKind, id: Uuid) -> Result<(), StorageError>;

    // Settings
    fn get_settings(&self) -> Result<Settings, StorageError>;
    fn put_settings(&self, settings: &Settings) -> Result<(), StorageError>;

    fn begin_transaction(&self) -> Result<TransactionId, StorageError>;
    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
}
