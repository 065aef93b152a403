use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use tripro_core::{
    models::records::{
        Customer, Discount, Invoice, InvoiceItem, InvoiceKind, InvoiceStatus, Product, Supplier,
    },
    DocumentRef, JournalEntry, NewJournalEntry, RecordKind, Settings, SystemAccount, TypedRecord,
};

use super::push_line;
use crate::{
    books::{document_number, money, today, Books},
    error::BooksError,
    validation::InvoiceInput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Subtotal, discount capped at the subtotal, VAT on the discounted amount
/// when tax is enabled, and the grand total. All rounded to 2 places.
pub fn compute_totals(items: &[InvoiceItem], discount: Discount, settings: &Settings) -> InvoiceTotals {
    let subtotal = money(items.iter().map(InvoiceItem::total).sum());
    let discount_amount = match discount {
        Discount::None => Decimal::ZERO,
        Discount::Fixed(value) => money(value),
        Discount::Percentage(rate) => money(subtotal * rate / Decimal::ONE_HUNDRED),
    }
    .min(subtotal)
    .max(Decimal::ZERO);
    let tax_amount = if settings.enable_tax {
        money((subtotal - discount_amount) * settings.vat_rate)
    } else {
        Decimal::ZERO
    };
    InvoiceTotals {
        subtotal,
        discount_amount,
        tax_amount,
        total: subtotal - discount_amount + tax_amount,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovedInvoice {
    pub invoice: Invoice,
    pub journal: JournalEntry,
    /// Set when the customer's open balance now exceeds the credit limit.
    pub credit_limit_exceeded: bool,
}

/// Quantities summed per product, in first-seen order.
fn quantities(items: &[InvoiceItem]) -> Vec<(Uuid, Decimal)> {
    let mut totals: Vec<(Uuid, Decimal)> = Vec::new();
    for item in items {
        match totals.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, qty)) => *qty += item.quantity,
            None => totals.push((item.product_id, item.quantity)),
        }
    }
    totals
}

impl Books {
    /// Stores a draft invoice with computed totals. Nothing is posted yet.
    pub fn create_invoice(&self, input: InvoiceInput) -> Result<Invoice, BooksError> {
        input.validate(today())?;
        let settings = self.settings()?;

        let party_kind = match input.kind {
            InvoiceKind::Sales => Customer::KIND,
            InvoiceKind::Purchase => Supplier::KIND,
        };
        if self.storage().get_record(party_kind, input.party_id)?.is_none() {
            return Err(BooksError::NotFound(party_kind, input.party_id));
        }
        for item in &input.items {
            self.record::<Product>(item.product_id)?;
        }
        let treasury_account_id = match input.treasury_account_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Some(self.account(id)?.id),
            _ => None,
        };

        let items: Vec<InvoiceItem> = input
            .items
            .into_iter()
            .map(|i| InvoiceItem {
                product_id: i.product_id,
                quantity: i.quantity,
                unit_price: money(i.unit_price),
            })
            .collect();
        let totals = compute_totals(&items, input.discount, &settings);
        let paid_amount = money(input.paid_amount);
        if paid_amount > totals.total {
            return Err(BooksError::InvalidState(format!(
                "paid amount {} exceeds invoice total {}",
                paid_amount, totals.total
            )));
        }

        let number = match input.number.as_deref().map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => document_number(match input.kind {
                InvoiceKind::Sales => "INV",
                InvoiceKind::Purchase => "PINV",
            }),
        };

        let invoice = Invoice {
            id: Uuid::new_v4(),
            kind: input.kind,
            number,
            party_id: input.party_id,
            date: input.date,
            due_date: input.due_date,
            warehouse_id: Arc::from(input.warehouse_id.trim()),
            items,
            discount: input.discount,
            subtotal: totals.subtotal,
            discount_amount: totals.discount_amount,
            tax_amount: totals.tax_amount,
            total_amount: totals.total,
            paid_amount,
            treasury_account_id,
            status: InvoiceStatus::Draft,
            journal_id: None,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
        };
        self.save(&invoice)?;
        tracing::info!(id = %invoice.id, number = %invoice.number, total = %invoice.total_amount, "invoice drafted");
        Ok(invoice)
    }

    pub fn invoices(&self, kind: Option<InvoiceKind>) -> Result<Vec<Invoice>, BooksError> {
        Ok(self
            .records::<Invoice>()?
            .into_iter()
            .filter(|i| kind.map_or(true, |k| i.kind == k))
            .collect())
    }

    /// Posts a draft invoice: stock movement, the journal entry and the
    /// status change happen together or not at all.
    pub fn approve_invoice(&self, id: Uuid) -> Result<ApprovedInvoice, BooksError> {
        let invoice: Invoice = self.record(id)?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(BooksError::InvalidState(format!(
                "invoice {} is already approved",
                invoice.number
            )));
        }
        let settings = self.settings()?;

        let approved = self.atomic(|books| match invoice.kind {
            InvoiceKind::Sales => books.approve_sales(invoice.clone(), &settings),
            InvoiceKind::Purchase => books.approve_purchase(invoice.clone(), &settings),
        })?;
        metrics::increment_counter!("tripro_invoices_approved");
        Ok(approved)
    }

    fn approve_sales(&self, mut invoice: Invoice, settings: &Settings) -> Result<ApprovedInvoice, BooksError> {
        let customer: Customer = self.record(invoice.party_id)?;

        let mut cost = Decimal::ZERO;
        for (product_id, quantity) in quantities(&invoice.items) {
            let mut product: Product = self.record(product_id)?;
            if !product.tracks_stock() {
                continue;
            }
            let available = product.stock_in(&invoice.warehouse_id);
            if available < quantity && !settings.allow_negative_stock {
                return Err(BooksError::InsufficientStock {
                    product: product.name,
                    available,
                    requested: quantity,
                });
            }
            cost += quantity * product.cost;
            product.adjust_stock(&invoice.warehouse_id, -quantity);
            self.save(&product)?;
        }
        let cost = money(cost);

        let receivable = invoice.total_amount - invoice.paid_amount;
        let mut lines = Vec::new();
        push_line(
            &mut lines,
            &self.resolve_system_account(settings, SystemAccount::Customers)?,
            receivable,
            Decimal::ZERO,
        );
        if invoice.paid_amount > Decimal::ZERO {
            let treasury = self.paying_account(&invoice, settings)?;
            push_line(&mut lines, &treasury, invoice.paid_amount, Decimal::ZERO);
        }
        if invoice.discount_amount > Decimal::ZERO {
            let discount = self.resolve_system_account(settings, SystemAccount::SalesDiscount)?;
            push_line(&mut lines, &discount, invoice.discount_amount, Decimal::ZERO);
        }
        push_line(
            &mut lines,
            &self.resolve_system_account(settings, SystemAccount::SalesRevenue)?,
            Decimal::ZERO,
            invoice.subtotal,
        );
        if invoice.tax_amount > Decimal::ZERO {
            let vat = self.resolve_system_account(settings, SystemAccount::Vat)?;
            push_line(&mut lines, &vat, Decimal::ZERO, invoice.tax_amount);
        }
        if cost > Decimal::ZERO {
            let cogs = self.resolve_system_account(settings, SystemAccount::Cogs)?;
            let inventory = self.resolve_system_account(settings, SystemAccount::Inventory)?;
            push_line(&mut lines, &cogs, cost, Decimal::ZERO);
            push_line(&mut lines, &inventory, Decimal::ZERO, cost);
        }

        let open_balance: Decimal = self
            .invoices(Some(InvoiceKind::Sales))?
            .iter()
            .filter(|i| i.party_id == customer.id && i.id != invoice.id)
            .filter(|i| matches!(i.status, InvoiceStatus::Posted | InvoiceStatus::Partial))
            .map(Invoice::outstanding)
            .sum();
        let credit_limit_exceeded =
            customer.credit_limit > Decimal::ZERO && open_balance + receivable > customer.credit_limit;
        if credit_limit_exceeded {
            tracing::warn!(customer = %customer.name, limit = %customer.credit_limit, "credit limit exceeded");
        }

        let description = format!("Sales invoice {} - {}", invoice.number, customer.name);
        let journal = self.post_invoice_entry(&mut invoice, &description, lines)?;
        Ok(ApprovedInvoice {
            invoice,
            journal,
            credit_limit_exceeded,
        })
    }

    fn approve_purchase(&self, mut invoice: Invoice, settings: &Settings) -> Result<ApprovedInvoice, BooksError> {
        let supplier: Supplier = self.record(invoice.party_id)?;

        for item in &invoice.items {
            let mut product: Product = self.record(item.product_id)?;
            if !product.tracks_stock() {
                continue;
            }
            let on_hand = product.stock.max(Decimal::ZERO);
            let new_qty = on_hand + item.quantity;
            if new_qty > Decimal::ZERO {
                product.cost = money((on_hand * product.cost + item.quantity * item.unit_price) / new_qty);
            }
            product.adjust_stock(&invoice.warehouse_id, item.quantity);
            self.save(&product)?;
        }

        let net = invoice.subtotal - invoice.discount_amount;
        let mut lines = Vec::new();
        push_line(
            &mut lines,
            &self.resolve_system_account(settings, SystemAccount::Inventory)?,
            net,
            Decimal::ZERO,
        );
        if invoice.tax_amount > Decimal::ZERO {
            let vat_input = self.resolve_system_account(settings, SystemAccount::VatInput)?;
            push_line(&mut lines, &vat_input, invoice.tax_amount, Decimal::ZERO);
        }
        push_line(
            &mut lines,
            &self.resolve_system_account(settings, SystemAccount::Suppliers)?,
            Decimal::ZERO,
            invoice.total_amount - invoice.paid_amount,
        );
        if invoice.paid_amount > Decimal::ZERO {
            let treasury = self.paying_account(&invoice, settings)?;
            push_line(&mut lines, &treasury, Decimal::ZERO, invoice.paid_amount);
        }

        let description = format!("Purchase invoice {} - {}", invoice.number, supplier.name);
        let journal = self.post_invoice_entry(&mut invoice, &description, lines)?;
        Ok(ApprovedInvoice {
            invoice,
            journal,
            credit_limit_exceeded: false,
        })
    }

    fn paying_account(&self, invoice: &Invoice, settings: &Settings) -> Result<Arc<str>, BooksError> {
        match &invoice.treasury_account_id {
            Some(id) => Ok(self.account(id)?.id),
            None => self.resolve_system_account(settings, SystemAccount::Cash),
        }
    }

    fn post_invoice_entry(
        &self,
        invoice: &mut Invoice,
        description: &str,
        lines: Vec<tripro_core::JournalLine>,
    ) -> Result<JournalEntry, BooksError> {
        let journal = self.post_entry(
            NewJournalEntry::new(invoice.date, description, lines)
                .with_reference(invoice.number.as_str())
                .for_document(DocumentRef {
                    kind: RecordKind::Invoice,
                    id: invoice.id,
                }),
        )?;
        invoice.journal_id = Some(journal.id);
        invoice.status = if invoice.paid_amount >= invoice.total_amount {
            InvoiceStatus::Paid
        } else if invoice.paid_amount > Decimal::ZERO {
            InvoiceStatus::Partial
        } else {
            InvoiceStatus::Posted
        };
        self.save(invoice)?;
        tracing::info!(
            id = %invoice.id,
            number = %invoice.number,
            journal = %journal.id,
            status = ?invoice.status,
            "invoice approved"
        );
        Ok(journal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::ops::Bound;
    use time::macros::date;
    use tripro_core::models::records::ItemType;
    use tripro_memory::InMemoryStorage;

    use crate::validation::{CustomerInput, ProductInput, SupplierInput};

    struct Fixture {
        books: Books,
        customer: Uuid,
        supplier: Uuid,
        widget: Uuid,
    }

    fn fixture(enable_tax: bool) -> Fixture {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        books.install_default_chart().unwrap();
        let mut settings = books.settings().unwrap();
        settings.enable_tax = enable_tax;
        books.update_settings(settings).unwrap();

        let customer = books
            .create_customer(
                CustomerInput {
                    name: "Giza Market".to_string(),
                    phone: None,
                    email: None,
                    address: None,
                    tax_number: None,
                    credit_limit: Some(dec!(500)),
                    opening_balance: None,
                },
                date!(2024 - 01 - 01),
            )
            .unwrap();
        let supplier = books
            .create_supplier(
                SupplierInput {
                    name: "Delta Supply".to_string(),
                    phone: None,
                    email: None,
                    address: None,
                    tax_number: None,
                    contact_person: None,
                    opening_balance: None,
                },
                date!(2024 - 01 - 01),
            )
            .unwrap();
        let widget = books
            .create_product(ProductInput {
                name: "Widget".to_string(),
                sku: Some("W-1".to_string()),
                item_type: ItemType::Stock,
                price: dec!(15),
                cost: dec!(10),
                min_stock_level: dec!(2),
            })
            .unwrap();
        Fixture {
            books,
            customer: customer.id,
            supplier: supplier.id,
            widget: widget.id,
        }
    }

    fn input(kind: InvoiceKind, party_id: Uuid, product_id: Uuid, qty: Decimal, price: Decimal) -> InvoiceInput {
        InvoiceInput {
            kind,
            party_id,
            number: None,
            date: date!(2024 - 02 - 01),
            due_date: None,
            warehouse_id: "main".to_string(),
            items: vec![InvoiceItem {
                product_id,
                quantity: qty,
                unit_price: price,
            }],
            discount: Discount::None,
            paid_amount: Decimal::ZERO,
            treasury_account_id: None,
            notes: None,
        }
    }

    fn balance(books: &Books, account: &str) -> Decimal {
        books.storage().get_balance(account, Bound::Unbounded).unwrap()
    }

    #[test]
    fn totals_cap_discount_and_tax_the_net() {
        let items = vec![InvoiceItem {
            product_id: Uuid::nil(),
            quantity: dec!(4),
            unit_price: dec!(25),
        }];
        let mut settings = Settings::default();
        settings.enable_tax = true;

        let t = compute_totals(&items, Discount::Percentage(dec!(10)), &settings);
        assert_eq!(t.subtotal, dec!(100));
        assert_eq!(t.discount_amount, dec!(10));
        assert_eq!(t.tax_amount, dec!(12.60));
        assert_eq!(t.total, dec!(102.60));

        let capped = compute_totals(&items, Discount::Fixed(dec!(150)), &settings);
        assert_eq!(capped.discount_amount, dec!(100));
        assert_eq!(capped.total, Decimal::ZERO);

        settings.enable_tax = false;
        assert_eq!(compute_totals(&items, Discount::None, &settings).total, dec!(100));
    }

    #[test]
    fn purchase_then_sale_moves_stock_and_ledger() {
        let f = fixture(true);
        let purchase = f
            .books
            .create_invoice(input(InvoiceKind::Purchase, f.supplier, f.widget, dec!(10), dec!(10)))
            .unwrap();
        assert_eq!(purchase.status, InvoiceStatus::Draft);
        let approved = f.books.approve_invoice(purchase.id).unwrap();
        assert_eq!(approved.invoice.status, InvoiceStatus::Posted);
        assert_eq!(balance(&f.books, "121"), dec!(100));
        assert_eq!(balance(&f.books, "1241"), dec!(14));
        assert_eq!(balance(&f.books, "201"), dec!(-114));

        let mut sale_input = input(InvoiceKind::Sales, f.customer, f.widget, dec!(4), dec!(15));
        sale_input.paid_amount = dec!(20);
        let sale = f.books.create_invoice(sale_input).unwrap();
        let approved = f.books.approve_invoice(sale.id).unwrap();
        assert_eq!(approved.invoice.status, InvoiceStatus::Partial);
        assert!(!approved.credit_limit_exceeded);
        assert!(approved.journal.is_balanced());

        assert_eq!(balance(&f.books, "10201"), dec!(48.40));
        assert_eq!(balance(&f.books, "1231"), dec!(20));
        assert_eq!(balance(&f.books, "411"), dec!(-60));
        assert_eq!(balance(&f.books, "2231"), dec!(-8.40));
        assert_eq!(balance(&f.books, "511"), dec!(40));
        assert_eq!(balance(&f.books, "121"), dec!(60));

        let product: Product = f.books.record(f.widget).unwrap();
        assert_eq!(product.stock, dec!(6));
        assert_eq!(product.stock_in("main"), dec!(6));

        assert!(matches!(f.books.approve_invoice(sale.id), Err(BooksError::InvalidState(_))));
    }

    #[test]
    fn sale_without_stock_is_refused_and_rolled_back() {
        let f = fixture(false);
        let sale = f
            .books
            .create_invoice(input(InvoiceKind::Sales, f.customer, f.widget, dec!(3), dec!(15)))
            .unwrap();
        let err = f.books.approve_invoice(sale.id).unwrap_err();
        assert!(matches!(err, BooksError::InsufficientStock { .. }));
        let stored: Invoice = f.books.record(sale.id).unwrap();
        assert_eq!(stored.status, InvoiceStatus::Draft);
        assert_eq!(balance(&f.books, "411"), Decimal::ZERO);
    }

    #[test]
    fn negative_stock_allowed_when_configured() {
        let f = fixture(false);
        let mut settings = f.books.settings().unwrap();
        settings.allow_negative_stock = true;
        f.books.update_settings(settings).unwrap();

        let sale = f
            .books
            .create_invoice(input(InvoiceKind::Sales, f.customer, f.widget, dec!(40), dec!(15)))
            .unwrap();
        let approved = f.books.approve_invoice(sale.id).unwrap();
        assert!(approved.credit_limit_exceeded);
        let product: Product = f.books.record(f.widget).unwrap();
        assert_eq!(product.stock, dec!(-40));
    }

    #[test]
    fn unknown_party_is_rejected() {
        let f = fixture(false);
        let err = f
            .books
            .create_invoice(input(InvoiceKind::Sales, f.supplier, f.widget, dec!(1), dec!(15)))
            .unwrap_err();
        assert!(matches!(err, BooksError::NotFound(RecordKind::Customer, _)));
    }
}
