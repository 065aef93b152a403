use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

/// One posted journal line joined with its journal header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub journal_id: Uuid,
    pub sequence: u64,
    pub date: Date,
    pub reference: Arc<str>,
    pub description: Arc<str>,
    pub account_id: Arc<str>,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl LedgerLine {
    pub fn net(&self) -> Decimal {
        self.debit - self.credit
    }
}
