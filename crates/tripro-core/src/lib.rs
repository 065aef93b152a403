//! Core types and traits for TriPro Books storage backends.
//!
//! This crate provides the `StorageBackend` trait and the bookkeeping model
//! shared by the in-memory and SQLite backends and the service crate.

pub mod models;
pub mod storage;

pub use models::{
    Account, AccountType, DocumentRef, JournalEntry, JournalLine, JournalStatus, Settings, SubType,
    SystemAccount,
};
pub use models::read::LedgerLine;
pub use models::records::{Record, RecordKind, TypedRecord};
pub use models::write::NewJournalEntry;
pub use storage::{StorageBackend, StorageError, TransactionId};
