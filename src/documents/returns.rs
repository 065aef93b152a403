use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use tripro_core::{
    models::records::{
        Customer, Invoice, InvoiceItem, InvoiceKind, InvoiceStatus, Product, ReturnKind, ReturnNote,
        Supplier,
    },
    DocumentRef, JournalEntry, JournalLine, NewJournalEntry, RecordKind, Settings, SystemAccount,
};

use super::push_line;
use crate::{
    books::{document_number, money, today, Books},
    error::BooksError,
    treasury::Allocation,
    validation::{NoteInput, ReturnInput},
};

#[derive(Debug, Clone, Serialize)]
pub struct PostedReturn {
    pub note: ReturnNote,
    pub journal: JournalEntry,
    /// Open invoices the credit was applied to.
    pub allocations: Vec<Allocation>,
}

/// Everything a return or note needs once its amounts are known.
struct Draft {
    kind: ReturnKind,
    party_id: Uuid,
    party_name: String,
    invoice: Option<Invoice>,
    number: String,
    date: time::Date,
    warehouse_id: Option<Arc<str>>,
    items: Vec<InvoiceItem>,
    subtotal: Decimal,
    tax_amount: Decimal,
    notes: Option<String>,
}

fn label(kind: ReturnKind) -> &'static str {
    match kind {
        ReturnKind::SalesReturn => "Sales return",
        ReturnKind::PurchaseReturn => "Purchase return",
        ReturnKind::CreditNote => "Credit note",
        ReturnKind::DebitNote => "Debit note",
    }
}

/// VAT for a credit: the linked invoice's effective rate, otherwise the
/// current settings.
fn credit_tax(subtotal: Decimal, invoice: Option<&Invoice>, settings: &Settings) -> Decimal {
    match invoice {
        Some(invoice) => {
            let taxable = invoice.subtotal - invoice.discount_amount;
            if invoice.tax_amount.is_zero() || taxable <= Decimal::ZERO {
                Decimal::ZERO
            } else {
                money(subtotal * invoice.tax_amount / taxable)
            }
        }
        None if settings.enable_tax => money(subtotal * settings.vat_rate),
        None => Decimal::ZERO,
    }
}

impl Books {
    pub fn return_notes(&self, kind: Option<ReturnKind>) -> Result<Vec<ReturnNote>, BooksError> {
        let mut notes: Vec<ReturnNote> = self
            .records::<ReturnNote>()?
            .into_iter()
            .filter(|n| kind.map_or(true, |k| n.kind == k))
            .collect();
        notes.sort_by_key(|n| n.date);
        Ok(notes)
    }

    /// Posts goods coming back on a sales invoice (restocked at current
    /// cost) or going back to a supplier. With an invoice, quantities are
    /// capped at what it sold or bought less earlier returns.
    pub fn record_return(&self, input: ReturnInput) -> Result<PostedReturn, BooksError> {
        input.validate(today())?;
        let settings = self.settings()?;
        let kind = match input.kind {
            InvoiceKind::Sales => ReturnKind::SalesReturn,
            InvoiceKind::Purchase => ReturnKind::PurchaseReturn,
        };
        let party_name = self.party_name(input.kind, input.party_id)?;
        let invoice = self.credited_invoice(input.kind, input.party_id, input.invoice_id)?;

        let items: Vec<InvoiceItem> = input
            .items
            .into_iter()
            .map(|i| InvoiceItem {
                product_id: i.product_id,
                quantity: i.quantity,
                unit_price: money(i.unit_price),
            })
            .collect();
        for item in &items {
            self.record::<Product>(item.product_id)?;
        }
        if let Some(invoice) = &invoice {
            self.check_returnable(invoice, &items)?;
        }

        let subtotal = money(items.iter().map(InvoiceItem::total).sum());
        let tax_amount = credit_tax(subtotal, invoice.as_ref(), &settings);
        let number = input
            .number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(|| document_number(kind.prefix()), str::to_string);

        self.post_return(
            Draft {
                kind,
                party_id: input.party_id,
                party_name,
                invoice,
                number,
                date: input.date,
                warehouse_id: Some(Arc::from(input.warehouse_id.trim())),
                items,
                subtotal,
                tax_amount,
                notes: input.notes.filter(|n| !n.trim().is_empty()),
            },
            &settings,
        )
    }

    /// Posts a value-only credit: a credit note lowers what a customer owes,
    /// a debit note lowers what is owed to a supplier. No stock moves.
    pub fn issue_note(&self, input: NoteInput) -> Result<PostedReturn, BooksError> {
        input.validate(today())?;
        let settings = self.settings()?;
        let kind = match input.kind {
            InvoiceKind::Sales => ReturnKind::CreditNote,
            InvoiceKind::Purchase => ReturnKind::DebitNote,
        };
        let party_name = self.party_name(input.kind, input.party_id)?;
        let invoice = self.credited_invoice(input.kind, input.party_id, input.invoice_id)?;
        let subtotal = money(input.amount);
        let tax_amount = credit_tax(subtotal, invoice.as_ref(), &settings);
        let number = input
            .number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(|| document_number(kind.prefix()), str::to_string);

        self.post_return(
            Draft {
                kind,
                party_id: input.party_id,
                party_name,
                invoice,
                number,
                date: input.date,
                warehouse_id: None,
                items: Vec::new(),
                subtotal,
                tax_amount,
                notes: input.notes.filter(|n| !n.trim().is_empty()),
            },
            &settings,
        )
    }

    fn party_name(&self, kind: InvoiceKind, party_id: Uuid) -> Result<String, BooksError> {
        Ok(match kind {
            InvoiceKind::Sales => self.record::<Customer>(party_id)?.name,
            InvoiceKind::Purchase => self.record::<Supplier>(party_id)?.name,
        })
    }

    /// The invoice a credit refers to. It has to be posted and belong to the
    /// same party and side.
    fn credited_invoice(
        &self,
        kind: InvoiceKind,
        party_id: Uuid,
        invoice_id: Option<Uuid>,
    ) -> Result<Option<Invoice>, BooksError> {
        let id = match invoice_id {
            Some(id) => id,
            None => return Ok(None),
        };
        let invoice: Invoice = self.record(id)?;
        if invoice.kind != kind || invoice.party_id != party_id {
            return Err(BooksError::InvalidState(format!(
                "invoice {} does not belong to this party",
                invoice.number
            )));
        }
        if invoice.status == InvoiceStatus::Draft {
            return Err(BooksError::InvalidState(format!(
                "invoice {} is not approved",
                invoice.number
            )));
        }
        Ok(Some(invoice))
    }

    fn credits_against(&self, invoice_id: Uuid) -> Result<Vec<ReturnNote>, BooksError> {
        Ok(self
            .records::<ReturnNote>()?
            .into_iter()
            .filter(|n| n.invoice_id == Some(invoice_id))
            .collect())
    }

    fn check_returnable(&self, invoice: &Invoice, items: &[InvoiceItem]) -> Result<(), BooksError> {
        let earlier = self.credits_against(invoice.id)?;
        for item in items {
            let sold: Decimal = invoice
                .items
                .iter()
                .filter(|i| i.product_id == item.product_id)
                .map(|i| i.quantity)
                .sum();
            let returned: Decimal = earlier
                .iter()
                .flat_map(|n| n.items.iter())
                .chain(items.iter())
                .filter(|i| i.product_id == item.product_id)
                .map(|i| i.quantity)
                .sum();
            if returned > sold {
                return Err(BooksError::InvalidState(format!(
                    "return of {} exceeds the {} on invoice {}",
                    returned, sold, invoice.number
                )));
            }
        }
        Ok(())
    }

    fn post_return(&self, draft: Draft, settings: &Settings) -> Result<PostedReturn, BooksError> {
        let total_amount = draft.subtotal + draft.tax_amount;
        if let Some(invoice) = &draft.invoice {
            let credited: Decimal = self
                .credits_against(invoice.id)?
                .iter()
                .map(|n| n.total_amount)
                .sum();
            if credited + total_amount > invoice.total_amount {
                return Err(BooksError::InvalidState(format!(
                    "credits of {} exceed invoice {} total {}",
                    credited + total_amount,
                    invoice.number,
                    invoice.total_amount
                )));
            }
        }

        self.atomic(|books| {
            let id = Uuid::new_v4();
            let cost_amount = books.move_returned_stock(&draft, settings)?;
            let lines = books.return_lines(&draft, total_amount, cost_amount, settings)?;

            let journal = books.post_entry(
                NewJournalEntry::new(
                    draft.date,
                    &format!("{} {} - {}", label(draft.kind), draft.number, draft.party_name),
                    lines,
                )
                .with_reference(draft.number.as_str())
                .for_document(DocumentRef {
                    kind: RecordKind::ReturnNote,
                    id,
                }),
            )?;

            let invoice_kind = draft.kind.invoice_kind();
            let mut allocations = Vec::new();
            let mut left = total_amount;
            if let Some(invoice) = &draft.invoice {
                let mut invoice: Invoice = books.record(invoice.id)?;
                let applied = left.min(invoice.outstanding());
                if applied > Decimal::ZERO {
                    invoice.paid_amount += applied;
                    invoice.status = if invoice.outstanding().is_zero() {
                        InvoiceStatus::Paid
                    } else {
                        InvoiceStatus::Partial
                    };
                    books.save(&invoice)?;
                    left -= applied;
                    allocations.push(Allocation {
                        invoice_id: invoice.id,
                        invoice_number: invoice.number.clone(),
                        amount: applied,
                    });
                }
            }
            if left > Decimal::ZERO {
                allocations.extend(books.allocate_to_invoices(invoice_kind, draft.party_id, left)?);
            }

            let note = ReturnNote {
                id,
                kind: draft.kind,
                number: draft.number.clone(),
                party_id: draft.party_id,
                invoice_id: draft.invoice.as_ref().map(|i| i.id),
                date: draft.date,
                warehouse_id: draft.warehouse_id.clone(),
                items: draft.items.clone(),
                subtotal: draft.subtotal,
                tax_amount: draft.tax_amount,
                total_amount,
                cost_amount,
                journal_id: journal.id,
                notes: draft.notes.clone(),
            };
            books.save(&note)?;
            metrics::increment_counter!("tripro_returns_posted", "kind" => draft.kind.prefix());
            tracing::info!(
                id = %note.id,
                number = %note.number,
                kind = ?note.kind,
                total = %note.total_amount,
                "return posted"
            );
            Ok(PostedReturn {
                note,
                journal,
                allocations,
            })
        })
    }

    /// Restocks sales returns and takes purchase returns out of stock.
    /// Returns the cost value moved back into inventory.
    fn move_returned_stock(&self, draft: &Draft, settings: &Settings) -> Result<Decimal, BooksError> {
        let warehouse = match draft.warehouse_id.as_deref() {
            Some(warehouse) => warehouse,
            None => return Ok(Decimal::ZERO),
        };
        let mut cost = Decimal::ZERO;
        for item in &draft.items {
            let mut product: Product = self.record(item.product_id)?;
            if !product.tracks_stock() {
                continue;
            }
            match draft.kind {
                ReturnKind::SalesReturn => {
                    cost += item.quantity * product.cost;
                    product.adjust_stock(warehouse, item.quantity);
                }
                _ => {
                    let available = product.stock_in(warehouse);
                    if available < item.quantity && !settings.allow_negative_stock {
                        return Err(BooksError::InsufficientStock {
                            product: product.name,
                            available,
                            requested: item.quantity,
                        });
                    }
                    product.adjust_stock(warehouse, -item.quantity);
                }
            }
            self.save(&product)?;
        }
        Ok(money(cost))
    }

    fn return_lines(
        &self,
        draft: &Draft,
        total: Decimal,
        cost: Decimal,
        settings: &Settings,
    ) -> Result<Vec<JournalLine>, BooksError> {
        let account = |which| self.resolve_system_account(settings, which);
        let mut lines = Vec::new();
        match draft.kind {
            ReturnKind::SalesReturn | ReturnKind::CreditNote => {
                let reversed = if draft.kind == ReturnKind::SalesReturn {
                    SystemAccount::SalesRevenue
                } else {
                    SystemAccount::SalesDiscount
                };
                push_line(&mut lines, &account(reversed)?, draft.subtotal, Decimal::ZERO);
                if draft.tax_amount > Decimal::ZERO {
                    push_line(&mut lines, &account(SystemAccount::Vat)?, draft.tax_amount, Decimal::ZERO);
                }
                push_line(&mut lines, &account(SystemAccount::Customers)?, Decimal::ZERO, total);
                if cost > Decimal::ZERO {
                    push_line(&mut lines, &account(SystemAccount::Inventory)?, cost, Decimal::ZERO);
                    push_line(&mut lines, &account(SystemAccount::Cogs)?, Decimal::ZERO, cost);
                }
            }
            ReturnKind::PurchaseReturn | ReturnKind::DebitNote => {
                push_line(&mut lines, &account(SystemAccount::Suppliers)?, total, Decimal::ZERO);
                push_line(&mut lines, &account(SystemAccount::Inventory)?, Decimal::ZERO, draft.subtotal);
                if draft.tax_amount > Decimal::ZERO {
                    push_line(&mut lines, &account(SystemAccount::VatInput)?, Decimal::ZERO, draft.tax_amount);
                }
            }
        }
        Ok(lines)
    }
}
