//! Business documents and the journal entries they generate.

mod assets;
mod fiscal;
mod inventory;
mod invoicing;
mod parties;
mod payroll;
mod recycle_bin;
mod returns;

pub use assets::{AssetRegistration, DepreciationRun, SkippedAsset};
pub use fiscal::FiscalYearClosing;
pub use inventory::{StockAdjustment, StockAdjustmentLine, StockAdjustmentRequest, StockCount};
pub use invoicing::{compute_totals, ApprovedInvoice, InvoiceTotals};
pub use payroll::PayrollRequest;
pub use recycle_bin::{DeletedItem, RecycleBin, JOURNAL_ENTRY};
pub use returns::PostedReturn;

use rust_decimal::Decimal;

use tripro_core::JournalLine;

/// Appends a line unless both sides are zero.
pub(crate) fn push_line(lines: &mut Vec<JournalLine>, account_id: &str, debit: Decimal, credit: Decimal) {
    if debit > Decimal::ZERO {
        lines.push(JournalLine::debit(account_id, debit));
    } else if credit > Decimal::ZERO {
        lines.push(JournalLine::credit(account_id, credit));
    }
}
