use rust_decimal::Decimal;
use thiserror::Error;
use time::Date;
use uuid::Uuid;

use tripro_core::{RecordKind, StorageError, SystemAccount};

use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum BooksError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("a journal entry needs at least two lines")]
    TooFewLines,
    #[error("line {0} has no account")]
    MissingAccount(usize),
    #[error("line {0} has a negative amount")]
    NegativeAmount(usize),
    #[error("line {0} must carry either a debit or a credit")]
    OneSidedLine(usize),
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    #[error("account {0} does not accept postings")]
    AccountNotPostable(String),
    #[error("entry is not balanced: debit {debit}, credit {credit}")]
    Unbalanced { debit: Decimal, credit: Decimal },
    #[error("period is closed through {closed}; cannot post on {date}")]
    PeriodLocked { date: Date, closed: Date },
    #[error("system account {} is not configured", .0.label())]
    MissingSystemAccount(SystemAccount),
    #[error("cash deficit {deficit} exceeds the allowed limit {limit}")]
    DeficitLimitExceeded { deficit: Decimal, limit: Decimal },
    #[error("insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: Decimal,
        requested: Decimal,
    },
    #[error("{0} not found: {1}")]
    NotFound(RecordKind, Uuid),
    #[error("asset {0} is fully depreciated")]
    FullyDepreciated(Uuid),
    #[error("asset {0} was already depreciated for {1}")]
    AlreadyDepreciated(Uuid, String),
    #[error("payroll for {month}/{year} has already been run")]
    DuplicatePayroll { month: u8, year: i32 },
    #[error("fiscal year {0} is already closed")]
    YearAlreadyClosed(i32),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("the book already contains data")]
    BookNotEmpty,
    #[error("backup error: {0}")]
    Backup(String),
}

impl BooksError {
    /// Stable machine-readable code, surfaced in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            BooksError::Storage(e) => match e {
                StorageError::AccountNotFound(_)
                | StorageError::JournalNotFound(_)
                | StorageError::RecordNotFound(..) => "NOT_FOUND",
                StorageError::DuplicateAccount(_)
                | StorageError::DuplicateAccountCode(_)
                | StorageError::DuplicateReference(_) => "DUPLICATE",
                StorageError::ParentNotFound(_) => "PARENT_NOT_FOUND",
                StorageError::AccountInUse(_) => "IN_USE",
                _ => "STORAGE_ERROR",
            },
            BooksError::Validation(_) => "VALIDATION_ERROR",
            BooksError::TooFewLines => "TOO_FEW_LINES",
            BooksError::MissingAccount(_) => "MISSING_ACCOUNT",
            BooksError::NegativeAmount(_) => "NEGATIVE_AMOUNT",
            BooksError::OneSidedLine(_) => "INVALID_LINE",
            BooksError::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            BooksError::AccountNotPostable(_) => "ACCOUNT_NOT_POSTABLE",
            BooksError::Unbalanced { .. } => "UNBALANCED",
            BooksError::PeriodLocked { .. } => "PERIOD_LOCKED",
            BooksError::MissingSystemAccount(_) => "MISSING_SYSTEM_ACCOUNT",
            BooksError::DeficitLimitExceeded { .. } => "DEFICIT_LIMIT_EXCEEDED",
            BooksError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            BooksError::NotFound(..) => "NOT_FOUND",
            BooksError::FullyDepreciated(_) => "FULLY_DEPRECIATED",
            BooksError::AlreadyDepreciated(..) => "ALREADY_DEPRECIATED",
            BooksError::DuplicatePayroll { .. } => "DUPLICATE_PAYROLL",
            BooksError::YearAlreadyClosed(_) => "YEAR_CLOSED",
            BooksError::InvalidState(_) => "INVALID_STATE",
            BooksError::BookNotEmpty => "BOOK_NOT_EMPTY",
            BooksError::Backup(_) => "BACKUP_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == "NOT_FOUND"
    }
}

/// Arabic user-facing text for an error raised while performing `operation`.
///
/// Duplicates, references from other data, authentication failures and
/// missing records get fixed phrasings; anything else falls back to the
/// error's own message.
pub fn friendly_message(error: &BooksError, operation: &str) -> String {
    match error.code() {
        "DUPLICATE" => return format!("هذا السجل موجود بالفعل في {}", operation),
        "IN_USE" => return "لا يمكن حذف هذا السجل لأنه مرتبط ببيانات أخرى".to_string(),
        "NOT_FOUND" => return "السجل المطلوب غير موجود".to_string(),
        _ => {}
    }
    friendly_text(&error.to_string(), operation)
}

/// Same taxonomy applied to a raw backend message.
pub fn friendly_text(message: &str, operation: &str) -> String {
    if message.contains("UNIQUE") {
        return format!("هذا السجل موجود بالفعل في {}", operation);
    }
    if message.contains("FOREIGN KEY") || message.contains("Foreign") {
        return "لا يمكن حذف هذا السجل لأنه مرتبط ببيانات أخرى".to_string();
    }
    if message.contains("auth") {
        return "خطأ في المصادقة، يرجى تسجيل الدخول مجدداً".to_string();
    }
    if message.contains("not found") {
        return "السجل المطلوب غير موجود".to_string();
    }
    if message.is_empty() {
        return format!("فشل في {}", operation);
    }
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_reference_reads_as_existing_record() {
        let err = BooksError::Storage(StorageError::DuplicateReference("JE-1".into()));
        assert_eq!(friendly_message(&err, "القيود"), "هذا السجل موجود بالفعل في القيود");
        assert_eq!(err.code(), "DUPLICATE");
    }

    #[test]
    fn account_in_use_reads_as_linked_record() {
        let err = BooksError::Storage(StorageError::AccountInUse("1231".into()));
        assert_eq!(
            friendly_message(&err, "الحسابات"),
            "لا يمكن حذف هذا السجل لأنه مرتبط ببيانات أخرى"
        );
    }

    #[test]
    fn raw_backend_messages_are_classified() {
        assert_eq!(
            friendly_text("UNIQUE constraint failed: accounts.code", "الحسابات"),
            "هذا السجل موجود بالفعل في الحسابات"
        );
        assert_eq!(
            friendly_text("invalid auth token", "الدخول"),
            "خطأ في المصادقة، يرجى تسجيل الدخول مجدداً"
        );
        assert_eq!(friendly_text("", "الحفظ"), "فشل في الحفظ");
        assert_eq!(friendly_text("disk full", "الحفظ"), "disk full");
    }

    #[test]
    fn missing_records_share_one_message() {
        let err = BooksError::NotFound(RecordKind::Invoice, Uuid::nil());
        assert_eq!(friendly_message(&err, "الفواتير"), "السجل المطلوب غير موجود");
        assert!(err.is_not_found());
    }
}
