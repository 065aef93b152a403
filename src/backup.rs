//! Full JSON export of a book and restore into an empty one.

use std::{collections::HashMap, ops::Bound, sync::Arc};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use tripro_core::{Account, JournalEntry, Record, RecordKind, Settings};

use crate::{books::Books, error::BooksError};

pub const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub record: Record,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupFile {
    pub version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub settings: Settings,
    pub accounts: Vec<Account>,
    pub journals: Vec<JournalEntry>,
    pub records: Vec<BackupRecord>,
}

impl BackupFile {
    pub fn to_json(&self) -> Result<String, BooksError> {
        serde_json::to_string_pretty(self).map_err(|e| BooksError::Backup(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, BooksError> {
        let file: BackupFile =
            serde_json::from_str(json).map_err(|e| BooksError::Backup(format!("unreadable backup: {}", e)))?;
        if file.version != BACKUP_VERSION {
            return Err(BooksError::Backup(format!(
                "unsupported backup version {} (expected {})",
                file.version, BACKUP_VERSION
            )));
        }
        Ok(file)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub accounts: usize,
    pub journals: usize,
    pub records: usize,
}

/// Orders accounts so every parent comes before its children.
fn parents_first(accounts: Vec<Account>) -> Result<Vec<Account>, BooksError> {
    let by_id: HashMap<Arc<str>, &Account> = accounts.iter().map(|a| (a.id.clone(), a)).collect();
    let depth = |account: &Account| -> Result<usize, BooksError> {
        let mut depth = 0;
        let mut parent = account.parent_id.clone();
        while let Some(id) = parent {
            depth += 1;
            if depth > accounts.len() {
                return Err(BooksError::Backup(format!("account {} is part of a cycle", account.id)));
            }
            parent = by_id.get(&id).and_then(|p| p.parent_id.clone());
        }
        Ok(depth)
    };
    let mut ordered = Vec::with_capacity(accounts.len());
    for account in &accounts {
        ordered.push((depth(account)?, account.clone()));
    }
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.code.cmp(&b.1.code)));
    Ok(ordered.into_iter().map(|(_, a)| a).collect())
}

impl Books {
    /// Accounts, every journal (deleted ones included), every record with its
    /// deletion mark, and settings.
    pub fn export_backup(&self) -> Result<BackupFile, BooksError> {
        let storage = self.storage();
        let mut records = Vec::new();
        for kind in RecordKind::ALL {
            records.extend(storage.list_records(kind)?.into_iter().map(|record| BackupRecord {
                record,
                deleted_at: None,
            }));
            records.extend(
                storage
                    .list_deleted_records(kind)?
                    .into_iter()
                    .map(|(record, at)| BackupRecord {
                        record,
                        deleted_at: Some(at),
                    }),
            );
        }

        let file = BackupFile {
            version: BACKUP_VERSION,
            created_at: OffsetDateTime::now_utc(),
            settings: storage.get_settings()?,
            accounts: storage.list_accounts()?,
            journals: storage.list_journals(Bound::Unbounded, Bound::Unbounded)?,
            records,
        };
        tracing::info!(
            accounts = file.accounts.len(),
            journals = file.journals.len(),
            records = file.records.len(),
            "backup exported"
        );
        Ok(file)
    }

    fn is_empty_book(&self) -> Result<bool, BooksError> {
        let storage = self.storage();
        if !storage.list_accounts()?.is_empty()
            || !storage.list_journals(Bound::Unbounded, Bound::Unbounded)?.is_empty()
        {
            return Ok(false);
        }
        for kind in RecordKind::ALL {
            if !storage.list_records(kind)?.is_empty() || !storage.list_deleted_records(kind)?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Loads a backup into an empty book in one transaction. Journals keep
    /// their ids, sequences and deletion marks.
    pub fn restore_backup(&self, file: BackupFile) -> Result<RestoreSummary, BooksError> {
        if file.version != BACKUP_VERSION {
            return Err(BooksError::Backup(format!("unsupported backup version {}", file.version)));
        }
        if !self.is_empty_book()? {
            return Err(BooksError::BookNotEmpty);
        }
        let accounts = parents_first(file.accounts)?;

        self.atomic(|books| {
            let storage = books.storage();
            for account in &accounts {
                storage.create_account(account)?;
            }
            for journal in &file.journals {
                storage.insert_journal(journal)?;
            }
            for entry in &file.records {
                storage.put_record(&entry.record)?;
                if let Some(at) = entry.deleted_at {
                    storage.set_record_deleted(entry.record.kind(), entry.record.id(), Some(at))?;
                }
            }
            storage.put_settings(&file.settings)?;

            let summary = RestoreSummary {
                accounts: accounts.len(),
                journals: file.journals.len(),
                records: file.records.len(),
            };
            tracing::info!(?summary, "backup restored");
            Ok(summary)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::date;
    use tripro_core::{models::records::Employee, AccountType, JournalLine, NewJournalEntry};
    use tripro_memory::InMemoryStorage;

    use crate::validation::EmployeeInput;

    fn populated() -> Books {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        books.install_default_chart().unwrap();
        books
            .post_entry(NewJournalEntry::new(
                date!(2024 - 01 - 05),
                "Capital",
                vec![
                    JournalLine::debit("1231", dec!(1000)),
                    JournalLine::credit("3999", dec!(1000)),
                ],
            ))
            .unwrap();
        books
            .post_entry(NewJournalEntry::new(
                date!(2024 - 01 - 06),
                "Typo",
                vec![
                    JournalLine::debit("1231", dec!(5)),
                    JournalLine::credit("3999", dec!(5)),
                ],
            ))
            .and_then(|e| books.delete_entry(e.id))
            .unwrap();
        let employee = books
            .create_employee(EmployeeInput {
                full_name: "Sara Adel".to_string(),
                salary: dec!(3000),
                status: tripro_core::models::records::EmployeeStatus::Active,
            })
            .unwrap();
        books.delete_record(RecordKind::Employee, employee.id).unwrap();
        books
    }

    #[test]
    fn restore_reproduces_the_book() {
        let source = populated();
        let json = source.export_backup().unwrap().to_json().unwrap();

        let target = Books::new(Arc::new(InMemoryStorage::new()));
        let summary = target.restore_backup(BackupFile::from_json(&json).unwrap()).unwrap();
        assert_eq!(summary.journals, 2);
        assert_eq!(summary.records, 1);

        assert_eq!(
            target.storage().get_balance("1231", Bound::Unbounded).unwrap(),
            dec!(1000)
        );
        assert_eq!(target.deleted_journals().unwrap().len(), 1);
        assert!(target.records::<Employee>().unwrap().is_empty());
        assert_eq!(target.recycle_bin().unwrap().len(), 2);
        assert_eq!(target.accounts().unwrap().len(), source.accounts().unwrap().len());
    }

    #[test]
    fn restore_refuses_a_book_with_data() {
        let source = populated();
        let backup = source.export_backup().unwrap();
        let err = source.restore_backup(backup).unwrap_err();
        assert!(matches!(err, BooksError::BookNotEmpty));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let source = populated();
        let mut backup = source.export_backup().unwrap();
        backup.version = 7;
        let json = serde_json::to_string(&backup).unwrap();
        assert!(matches!(BackupFile::from_json(&json), Err(BooksError::Backup(_))));
        assert!(BackupFile::from_json("{not json").is_err());
    }

    #[test]
    fn children_are_created_after_parents() {
        let accounts = vec![
            Account::new("c", "111", "Child", AccountType::Asset).under("p"),
            Account::new("p", "11", "Parent", AccountType::Asset).group().under("r"),
            Account::new("r", "1", "Root", AccountType::Asset).group(),
        ];
        let ordered: Vec<String> = parents_first(accounts)
            .unwrap()
            .into_iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(ordered, vec!["r", "p", "c"]);
    }
}
