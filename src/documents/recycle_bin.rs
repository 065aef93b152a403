use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use tripro_core::{
    models::records::{InvoiceStatus, Record},
    RecordKind, StorageError,
};

use crate::{books::Books, error::BooksError};

/// Kind tag used for journal entries in the bin, next to record kinds.
pub const JOURNAL_ENTRY: &str = "journal_entry";

#[derive(Debug, Clone, Serialize)]
pub struct DeletedItem {
    pub kind: &'static str,
    pub id: Uuid,
    pub label: String,
    #[serde(with = "time::serde::rfc3339")]
    pub deleted_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecycleBin {
    pub items: Vec<DeletedItem>,
}

impl RecycleBin {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn label(record: &Record) -> String {
    match record {
        Record::Customer(r) => r.name.clone(),
        Record::Supplier(r) => r.name.clone(),
        Record::Product(r) => r.name.clone(),
        Record::Employee(r) => r.full_name.clone(),
        Record::EmployeeAdvance(r) => format!("Advance {} on {}", r.amount, r.date),
        Record::FixedAsset(r) => r.name.clone(),
        Record::Invoice(r) => r.number.clone(),
        Record::CashClosing(r) => format!("Cash closing {} {}", r.treasury_account_id, r.closing_date),
        Record::RejectedCashClosing(r) => format!("Rejected closing {}", r.treasury_account_id),
        Record::Payroll(r) => format!("Payroll {:02}/{}", r.month, r.year),
        Record::ReturnNote(r) => r.number.clone(),
    }
}

impl Books {
    /// Deleted records of every kind plus deleted journal entries, newest
    /// first.
    pub fn recycle_bin(&self) -> Result<RecycleBin, BooksError> {
        let mut items = Vec::new();
        for kind in RecordKind::ALL {
            for (record, deleted_at) in self.storage().list_deleted_records(kind)? {
                items.push(DeletedItem {
                    kind: kind.as_str(),
                    id: record.id(),
                    label: label(&record),
                    deleted_at,
                });
            }
        }
        for journal in self.deleted_journals()? {
            if let Some(deleted_at) = journal.deleted_at {
                items.push(DeletedItem {
                    kind: JOURNAL_ENTRY,
                    id: journal.id,
                    label: format!("{} {}", journal.reference, journal.description),
                    deleted_at,
                });
            }
        }
        items.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        Ok(RecycleBin { items })
    }

    /// Moves a record to the recycle bin. Documents that already reached the
    /// ledger stay; their journal entry is the thing to delete.
    pub fn delete_record(&self, kind: RecordKind, id: Uuid) -> Result<(), BooksError> {
        let record = self
            .storage()
            .get_record(kind, id)?
            .ok_or(BooksError::NotFound(kind, id))?;
        match &record {
            Record::Invoice(invoice) if invoice.status != InvoiceStatus::Draft => {
                return Err(BooksError::InvalidState(format!(
                    "invoice {} is posted and cannot be deleted",
                    invoice.number
                )));
            }
            Record::Payroll(_) | Record::CashClosing(_) | Record::ReturnNote(_) => {
                return Err(BooksError::InvalidState(format!("{} records cannot be deleted", kind)));
            }
            _ => {}
        }
        self.storage()
            .set_record_deleted(kind, id, Some(OffsetDateTime::now_utc()))?;
        tracing::info!(%kind, %id, label = %label(&record), "record deleted");
        Ok(())
    }

    pub fn restore_record(&self, kind: RecordKind, id: Uuid) -> Result<(), BooksError> {
        self.storage()
            .set_record_deleted(kind, id, None)
            .map_err(|e| match e {
                StorageError::RecordNotFound(kind, id) => BooksError::NotFound(kind, id),
                e => e.into(),
            })?;
        tracing::info!(%kind, %id, "record restored");
        Ok(())
    }

    /// Permanently removes a record that is already in the recycle bin.
    pub fn purge_record(&self, kind: RecordKind, id: Uuid) -> Result<(), BooksError> {
        let in_bin = self
            .storage()
            .list_deleted_records(kind)?
            .iter()
            .any(|(record, _)| record.id() == id);
        if !in_bin {
            return Err(BooksError::InvalidState(format!(
                "{} {} is not in the recycle bin",
                kind, id
            )));
        }
        self.storage().purge_record(kind, id)?;
        tracing::warn!(%kind, %id, "record purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use time::macros::date;
    use tripro_core::{models::records::Customer, JournalLine, NewJournalEntry};
    use tripro_memory::InMemoryStorage;

    use crate::validation::CustomerInput;

    fn books() -> Books {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        books.install_default_chart().unwrap();
        books
    }

    fn customer(books: &Books) -> Customer {
        books
            .create_customer(
                CustomerInput {
                    name: "Delta Trading".to_string(),
                    phone: None,
                    email: None,
                    address: None,
                    tax_number: None,
                    credit_limit: None,
                    opening_balance: None,
                },
                date!(2024 - 01 - 01),
            )
            .unwrap()
    }

    #[test]
    fn delete_restore_purge_cycle() {
        let books = books();
        let customer = customer(&books);

        books.delete_record(RecordKind::Customer, customer.id).unwrap();
        assert!(books.records::<Customer>().unwrap().is_empty());
        let bin = books.recycle_bin().unwrap();
        assert_eq!(bin.len(), 1);
        assert_eq!(bin.items[0].label, "Delta Trading");

        books.restore_record(RecordKind::Customer, customer.id).unwrap();
        assert_eq!(books.records::<Customer>().unwrap().len(), 1);
        assert!(books.recycle_bin().unwrap().is_empty());

        let err = books.purge_record(RecordKind::Customer, customer.id).unwrap_err();
        assert!(matches!(err, BooksError::InvalidState(_)));

        books.delete_record(RecordKind::Customer, customer.id).unwrap();
        books.purge_record(RecordKind::Customer, customer.id).unwrap();
        assert!(books.recycle_bin().unwrap().is_empty());
        assert!(books.find_record::<Customer>(customer.id).unwrap().is_none());
    }

    #[test]
    fn bin_lists_deleted_journals() {
        let books = books();
        let entry = books
            .post_entry(
                NewJournalEntry::new(
                    date!(2024 - 02 - 01),
                    "Owner funding",
                    vec![
                        JournalLine::debit("1231", dec!(500)),
                        JournalLine::credit("3999", dec!(500)),
                    ],
                )
                .with_reference("JE-OWNER"),
            )
            .unwrap();
        books.delete_entry(entry.id).unwrap();

        let bin = books.recycle_bin().unwrap();
        assert_eq!(bin.items[0].kind, JOURNAL_ENTRY);
        assert_eq!(bin.items[0].label, "JE-OWNER Owner funding");
    }

    #[test]
    fn unknown_record_is_not_found() {
        let books = books();
        let err = books.delete_record(RecordKind::Product, Uuid::new_v4()).unwrap_err();
        assert!(err.is_not_found());
        let err = books.restore_record(RecordKind::Product, Uuid::new_v4()).unwrap_err();
        assert!(err.is_not_found());
    }
}
