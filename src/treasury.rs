//! Cash closing, receipt/payment and expense vouchers, and transfers
//! between treasury accounts.

use std::{ops::Bound, sync::Arc};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use tripro_core::{
    models::records::{
        CashClosing, Customer, Invoice, InvoiceKind, InvoiceStatus, RejectedCashClosing, Supplier,
    },
    Account, AccountType, DocumentRef, JournalEntry, JournalLine, NewJournalEntry, RecordKind,
    SystemAccount, TypedRecord,
};

use crate::{
    books::{document_number, money, Books},
    error::BooksError,
    validation::{ExpenseInput, TransferInput, ValidationError, VoucherInput},
};

const MIN_ADJUSTMENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone, Deserialize)]
pub struct CashClosingRequest {
    pub treasury_account_id: String,
    pub closing_date: Date,
    pub actual_balance: Decimal,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashClosingOutcome {
    pub closing: CashClosing,
    pub adjustment: Option<JournalEntry>,
}

/// Balance of a cash account and the movement on one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CashPosition {
    pub balance: Decimal,
    pub day_in: Decimal,
    pub day_out: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherKind {
    Receipt,
    Payment,
}

#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoucherOutcome {
    pub journal: JournalEntry,
    pub allocations: Vec<Allocation>,
}

impl Books {
    pub fn cash_position(&self, account_id: &str, day: Date) -> Result<CashPosition, BooksError> {
        self.account(account_id)?;
        let balance = self
            .storage()
            .get_balance(account_id, Bound::Included(day))?;
        let mut day_in = Decimal::ZERO;
        let mut day_out = Decimal::ZERO;
        let ids = [Arc::from(account_id)];
        for line in self
            .storage()
            .ledger_lines(&ids, Bound::Included(day), Bound::Included(day))?
        {
            day_in += line.debit;
            day_out += line.credit;
        }
        Ok(CashPosition {
            balance,
            day_in,
            day_out,
        })
    }

    /// Compares a counted balance with the ledger. Deficits beyond the
    /// configured limit are logged as rejected and refused; anything else is
    /// stored together with its adjustment entry.
    pub fn close_cash(&self, request: CashClosingRequest, user: Option<&str>) -> Result<CashClosingOutcome, BooksError> {
        let settings = self.settings()?;
        let account = self.account(&request.treasury_account_id)?;
        let system_balance = self
            .storage()
            .get_balance(&account.id, Bound::Included(request.closing_date))?;
        let actual_balance = money(request.actual_balance);
        let difference = actual_balance - system_balance;
        let limit = settings.max_cash_deficit_limit;

        if difference < Decimal::ZERO && -difference > limit {
            let rejected = RejectedCashClosing {
                id: Uuid::new_v4(),
                treasury_account_id: account.id.clone(),
                rejected_at: OffsetDateTime::now_utc(),
                system_balance,
                actual_balance,
                difference,
                max_allowed_deficit: limit,
                notes: format!("deficit above limit: {}", request.notes),
                rejected_by: user.map(str::to_string),
            };
            self.save(&rejected)?;
            tracing::warn!(
                account = %account.id,
                %system_balance,
                %actual_balance,
                %limit,
                "cash closing rejected"
            );
            metrics::increment_counter!("tripro_cash_closings_rejected");
            return Err(BooksError::DeficitLimitExceeded {
                deficit: -difference,
                limit,
            });
        }

        self.atomic(|books| {
            let mut closing = CashClosing {
                id: Uuid::new_v4(),
                treasury_account_id: account.id.clone(),
                closing_date: request.closing_date,
                system_balance,
                actual_balance,
                difference,
                notes: request.notes.clone(),
                created_by: user.map(str::to_string),
                journal_id: None,
            };

            let adjustment = if difference.abs() >= MIN_ADJUSTMENT {
                let amount = difference.abs();
                let lines = if difference > Decimal::ZERO {
                    let revenue = books.resolve_system_account(&settings, SystemAccount::OtherRevenue)?;
                    vec![
                        JournalLine::debit(&account.id, amount).with_description("Cash overage"),
                        JournalLine::credit(&revenue, amount),
                    ]
                } else {
                    let shortage = books.resolve_system_account(&settings, SystemAccount::CashShortage)?;
                    vec![
                        JournalLine::debit(&shortage, amount),
                        JournalLine::credit(&account.id, amount).with_description("Cash shortage"),
                    ]
                };
                let entry = books.post_entry(
                    NewJournalEntry::new(request.closing_date, "Cash closing adjustment", lines)
                        .with_reference(document_number("ADJ"))
                        .for_document(DocumentRef {
                            kind: RecordKind::CashClosing,
                            id: closing.id,
                        }),
                )?;
                closing.journal_id = Some(entry.id);
                Some(entry)
            } else {
                None
            };

            books.save(&closing)?;
            tracing::info!(account = %closing.treasury_account_id, %difference, "cash closed");
            Ok(CashClosingOutcome { closing, adjustment })
        })
    }

    pub fn cash_closings(&self, treasury_account_id: Option<&str>) -> Result<Vec<CashClosing>, BooksError> {
        Ok(self
            .records::<CashClosing>()?
            .into_iter()
            .filter(|c| treasury_account_id.map_or(true, |id| &*c.treasury_account_id == id))
            .collect())
    }

    pub fn rejected_cash_closings(&self) -> Result<Vec<RejectedCashClosing>, BooksError> {
        self.records::<RejectedCashClosing>()
    }

    /// Receipt: Dr treasury / Cr counter account. Payment: the reverse.
    /// With a party, the amount is applied to its open invoices oldest first.
    pub fn record_voucher(&self, kind: VoucherKind, input: VoucherInput) -> Result<VoucherOutcome, BooksError> {
        input.validate()?;
        let treasury = self.account(input.treasury_account_id.trim())?;
        let amount = money(input.amount);

        let (party_kind, invoice_kind, control, prefix) = match kind {
            VoucherKind::Receipt => (Customer::KIND, InvoiceKind::Sales, SystemAccount::Customers, "RV"),
            VoucherKind::Payment => (Supplier::KIND, InvoiceKind::Purchase, SystemAccount::Suppliers, "PV"),
        };

        if let Some(party_id) = input.party_id {
            if self.storage().get_record(party_kind, party_id)?.is_none() {
                return Err(BooksError::NotFound(party_kind, party_id));
            }
        }

        let counter = match input.target_account_id.as_deref().map(str::trim) {
            Some(target) if !target.is_empty() => self.account(target)?.id,
            _ => self.system_account(control)?,
        };

        let description = input.description.clone().unwrap_or_else(|| match kind {
            VoucherKind::Receipt => "Receipt voucher".to_string(),
            VoucherKind::Payment => "Payment voucher".to_string(),
        });
        let lines = match kind {
            VoucherKind::Receipt => vec![
                JournalLine::debit(&treasury.id, amount),
                JournalLine::credit(&counter, amount),
            ],
            VoucherKind::Payment => vec![
                JournalLine::debit(&counter, amount),
                JournalLine::credit(&treasury.id, amount),
            ],
        };

        self.atomic(|books| {
            let mut new_entry = NewJournalEntry::new(input.date, &description, lines)
                .with_reference(document_number(prefix));
            if let Some(party_id) = input.party_id {
                new_entry = new_entry.for_document(DocumentRef {
                    kind: party_kind,
                    id: party_id,
                });
            }
            let journal = books.post_entry(new_entry)?;

            let allocations = match input.party_id {
                Some(party_id) => books.allocate_to_invoices(invoice_kind, party_id, amount)?,
                None => Vec::new(),
            };
            metrics::increment_counter!("tripro_vouchers_recorded", "kind" => match kind {
                VoucherKind::Receipt => "receipt",
                VoucherKind::Payment => "payment",
            });
            Ok(VoucherOutcome { journal, allocations })
        })
    }

    pub(crate) fn allocate_to_invoices(&self, kind: InvoiceKind, party_id: Uuid, amount: Decimal) -> Result<Vec<Allocation>, BooksError> {
        let mut open: Vec<Invoice> = self
            .records::<Invoice>()?
            .into_iter()
            .filter(|i| {
                i.kind == kind
                    && i.party_id == party_id
                    && matches!(i.status, InvoiceStatus::Posted | InvoiceStatus::Partial)
                    && i.outstanding() > Decimal::ZERO
            })
            .collect();
        open.sort_by_key(|i| i.date);

        let mut left = amount;
        let mut allocations = Vec::new();
        for mut invoice in open {
            if left <= Decimal::ZERO {
                break;
            }
            let applied = left.min(invoice.outstanding());
            invoice.paid_amount += applied;
            invoice.status = if invoice.outstanding().is_zero() {
                InvoiceStatus::Paid
            } else {
                InvoiceStatus::Partial
            };
            left -= applied;
            self.save(&invoice)?;
            allocations.push(Allocation {
                invoice_id: invoice.id,
                invoice_number: invoice.number.clone(),
                amount: applied,
            });
        }
        Ok(allocations)
    }

    fn treasury_account(&self, id: &str, field: &str) -> Result<Account, BooksError> {
        let account = self.account(id.trim())?;
        if account.account_type != AccountType::Asset || account.is_group {
            return Err(ValidationError::single(field, "يجب اختيار حساب خزينة أو بنك.").into());
        }
        Ok(account)
    }

    /// Expense voucher: Dr expense / Cr treasury.
    pub fn record_expense(&self, input: ExpenseInput) -> Result<JournalEntry, BooksError> {
        input.validate()?;
        let treasury = self.treasury_account(&input.treasury_account_id, "treasury_account_id")?;
        let expense = self.account(input.expense_account_id.trim())?;
        if expense.account_type != AccountType::Expense {
            return Err(ValidationError::single("expense_account_id", "الحساب المختار ليس حساب مصروف.").into());
        }
        let amount = money(input.amount);
        let description = input
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Expense: {}", expense.name));

        let journal = self.post_entry(
            NewJournalEntry::new(
                input.date,
                &description,
                vec![
                    JournalLine::debit(&expense.id, amount),
                    JournalLine::credit(&treasury.id, amount),
                ],
            )
            .with_reference(document_number("EXP")),
        )?;
        metrics::increment_counter!("tripro_vouchers_recorded", "kind" => "expense");
        tracing::info!(expense = %expense.id, treasury = %treasury.id, %amount, "expense paid");
        Ok(journal)
    }

    /// Moves money between two treasury accounts: Dr destination / Cr source.
    pub fn transfer_funds(&self, input: TransferInput) -> Result<JournalEntry, BooksError> {
        input.validate()?;
        let source = self.treasury_account(&input.source_account_id, "source_account_id")?;
        let destination = self.treasury_account(&input.destination_account_id, "destination_account_id")?;
        let amount = money(input.amount);
        let description = input
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Transfer {} to {}", source.name, destination.name));

        let journal = self.post_entry(
            NewJournalEntry::new(
                input.date,
                &description,
                vec![
                    JournalLine::debit(&destination.id, amount),
                    JournalLine::credit(&source.id, amount),
                ],
            )
            .with_reference(document_number("TRN")),
        )?;
        metrics::increment_counter!("tripro_vouchers_recorded", "kind" => "transfer");
        tracing::info!(from = %source.id, to = %destination.id, %amount, "funds transferred");
        Ok(journal)
    }
}
