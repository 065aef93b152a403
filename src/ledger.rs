//! Posting engine. Every journal entry reaches storage through here.

use std::{ops::Bound, sync::Arc};

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use tripro_core::{JournalEntry, JournalLine, JournalStatus, NewJournalEntry, StorageError};

use crate::{
    books::{document_number, money, Books},
    error::BooksError,
};

const DEFAULT_DESCRIPTION: &str = "Journal entry";

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:null|undefined)\b").expect("placeholder pattern"));

/// Removes the literal `null`/`undefined` left behind by form serialization.
fn clean_text(text: Option<&str>) -> String {
    text.map(|t| PLACEHOLDER_RE.replace_all(t, "").trim().to_string())
        .unwrap_or_default()
}

impl Books {
    /// Validates, cleans and stores a journal entry.
    pub fn post_entry(&self, new_entry: NewJournalEntry) -> Result<JournalEntry, BooksError> {
        let description = match clean_text(new_entry.description.as_deref()) {
            d if d.is_empty() => DEFAULT_DESCRIPTION.to_string(),
            d => d,
        };
        let reference = match clean_text(new_entry.reference.as_deref()) {
            r if r.is_empty() => document_number("JE"),
            r => r,
        };

        if new_entry.lines.len() < 2 {
            return Err(BooksError::TooFewLines);
        }

        let mut lines = Vec::with_capacity(new_entry.lines.len());
        for (i, line) in new_entry.lines.into_iter().enumerate() {
            let account_id = line.account_id.trim();
            if account_id.is_empty() {
                return Err(BooksError::MissingAccount(i));
            }
            let debit = money(line.debit);
            let credit = money(line.credit);
            if debit < Decimal::ZERO || credit < Decimal::ZERO {
                return Err(BooksError::NegativeAmount(i));
            }
            if debit.is_zero() == credit.is_zero() {
                return Err(BooksError::OneSidedLine(i));
            }
            let line_description = match clean_text(line.description.as_deref()) {
                d if d.is_empty() => description.clone(),
                d => d,
            };
            lines.push(JournalLine {
                account_id: Arc::from(account_id),
                debit,
                credit,
                description: Some(Arc::from(line_description.as_str())),
                cost_center_id: line
                    .cost_center_id
                    .filter(|c| !c.trim().is_empty())
                    .map(|c| Arc::from(c.trim())),
            });
        }

        for line in &lines {
            match self.storage().get_account(&line.account_id)? {
                None => return Err(BooksError::UnknownAccount(line.account_id.to_string())),
                Some(account) if !account.is_postable() => {
                    return Err(BooksError::AccountNotPostable(line.account_id.to_string()))
                }
                Some(_) => {}
            }
        }

        let debit: Decimal = lines.iter().map(|l| l.debit).sum();
        let credit: Decimal = lines.iter().map(|l| l.credit).sum();
        if debit != credit {
            return Err(BooksError::Unbalanced { debit, credit });
        }

        self.check_period_open(new_entry.date)?;

        let mut entry = JournalEntry {
            id: Uuid::new_v4(),
            sequence: 0,
            date: new_entry.date,
            reference: Arc::from(reference.as_str()),
            description: Arc::from(description.as_str()),
            status: new_entry.status.unwrap_or(JournalStatus::Posted),
            lines,
            related_document: new_entry.related_document,
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };

        let stored = match self.storage().insert_journal(&entry) {
            Err(StorageError::DuplicateReference(_)) => {
                let retry = format!("{}-{:03}", reference, rand::thread_rng().gen_range(0..1000));
                tracing::warn!(reference = %reference, retry = %retry, "duplicate reference, retrying");
                entry.reference = Arc::from(retry.as_str());
                self.storage().insert_journal(&entry)?
            }
            other => other?,
        };

        metrics::increment_counter!("tripro_journal_entries_posted");
        tracing::info!(
            id = %stored.id,
            sequence = stored.sequence,
            reference = %stored.reference,
            date = %stored.date,
            amount = %debit,
            status = stored.status.as_str(),
            "journal entry stored"
        );
        Ok(stored)
    }

    /// Fails with `PeriodLocked` when `date` falls on or before the last
    /// closed date.
    pub fn check_period_open(&self, date: Date) -> Result<(), BooksError> {
        if let Some(closed) = self.storage().get_settings()?.last_closed_date {
            if date <= closed {
                return Err(BooksError::PeriodLocked { date, closed });
            }
        }
        Ok(())
    }

    pub fn journal(&self, id: Uuid) -> Result<JournalEntry, BooksError> {
        self.storage()
            .get_journal(id)?
            .ok_or_else(|| StorageError::JournalNotFound(id).into())
    }

    /// Live entries in the range, drafts included.
    pub fn journals(&self, from: Option<Date>, to: Option<Date>) -> Result<Vec<JournalEntry>, BooksError> {
        let from = from.map_or(Bound::Unbounded, Bound::Included);
        let to = to.map_or(Bound::Unbounded, Bound::Included);
        Ok(self
            .storage()
            .list_journals(from, to)?
            .into_iter()
            .filter(|j| j.deleted_at.is_none())
            .collect())
    }

    pub fn deleted_journals(&self) -> Result<Vec<JournalEntry>, BooksError> {
        Ok(self
            .storage()
            .list_journals(Bound::Unbounded, Bound::Unbounded)?
            .into_iter()
            .filter(|j| j.deleted_at.is_some())
            .collect())
    }

    /// Moves a draft to posted. The period lock is checked again.
    pub fn post_draft(&self, id: Uuid) -> Result<JournalEntry, BooksError> {
        let entry = self.journal(id)?;
        if entry.deleted_at.is_some() {
            return Err(BooksError::InvalidState(format!("journal entry {} is deleted", id)));
        }
        if entry.status == JournalStatus::Posted {
            return Err(BooksError::InvalidState(format!("journal entry {} is already posted", id)));
        }
        self.check_period_open(entry.date)?;
        self.storage().set_journal_status(id, JournalStatus::Posted)?;
        tracing::info!(id = %id, reference = %entry.reference, "draft posted");
        self.journal(id)
    }

    /// Soft delete. Entries inside a closed period stay, and so do entries
    /// whose source document is still live.
    pub fn delete_entry(&self, id: Uuid) -> Result<(), BooksError> {
        let entry = self.journal(id)?;
        if entry.deleted_at.is_some() {
            return Ok(());
        }
        self.check_period_open(entry.date)?;
        if let Some(document) = &entry.related_document {
            if self.storage().get_record(document.kind, document.id)?.is_some() {
                return Err(BooksError::InvalidState(format!(
                    "journal entry {} belongs to {} {}",
                    entry.reference, document.kind, document.id
                )));
            }
        }
        self.storage()
            .set_journal_deleted(id, Some(OffsetDateTime::now_utc()))?;
        tracing::info!(id = %id, reference = %entry.reference, "journal entry deleted");
        Ok(())
    }

    pub fn restore_entry(&self, id: Uuid) -> Result<JournalEntry, BooksError> {
        let entry = self.journal(id)?;
        if entry.deleted_at.is_none() {
            return Ok(entry);
        }
        self.check_period_open(entry.date)?;
        self.storage().set_journal_deleted(id, None)?;
        tracing::info!(id = %id, reference = %entry.reference, "journal entry restored");
        self.journal(id)
    }
}
