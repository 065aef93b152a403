//! TriPro Books: a double-entry bookkeeping engine over pluggable storage,
//! the reports computed from its ledger, the business documents that post
//! to it, and a JSON HTTP API in front of it.

pub mod api;
pub mod auth;
pub mod backup;
pub mod books;
pub mod config;
pub mod documents;
pub mod error;
pub mod ledger;
pub mod reports;
pub mod security;
pub mod tafqeet;
pub mod treasury;
pub mod validation;

pub use books::Books;
pub use error::BooksError;
pub use tripro_core::{
    Account, AccountType, JournalEntry, JournalLine, JournalStatus, NewJournalEntry, Settings,
    StorageBackend, StorageError, SystemAccount,
};
pub use tripro_memory::InMemoryStorage;
pub use tripro_sqlite::SqliteStorage;
