use std::sync::Arc;

use rust_decimal::Decimal;
use time::Date;
use uuid::Uuid;

use tripro_core::{
    models::records::{Customer, Discount, Invoice, InvoiceKind, InvoiceStatus, Supplier},
    DocumentRef, JournalLine, NewJournalEntry, RecordKind, SystemAccount,
};

use crate::{
    books::{document_number, money, Books},
    error::BooksError,
    validation::{CustomerInput, SupplierInput},
};

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Books {
    /// Stores a customer. A positive opening balance becomes a receivable:
    /// an opening entry plus an opening invoice that aging and vouchers see.
    pub fn create_customer(&self, input: CustomerInput, opening_date: Date) -> Result<Customer, BooksError> {
        input.validate()?;
        let customer = Customer {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            phone: clean(input.phone),
            email: clean(input.email),
            address: clean(input.address),
            tax_number: clean(input.tax_number),
            credit_limit: money(input.credit_limit.unwrap_or(Decimal::ZERO)),
        };
        let opening = money(input.opening_balance.unwrap_or(Decimal::ZERO));

        self.atomic(|books| {
            books.save(&customer)?;
            if opening > Decimal::ZERO {
                books.post_opening_balance(
                    InvoiceKind::Sales,
                    customer.id,
                    &customer.name,
                    opening,
                    opening_date,
                )?;
            }
            tracing::info!(id = %customer.id, name = %customer.name, "customer created");
            Ok(customer)
        })
    }

    pub fn update_customer(&self, id: Uuid, input: CustomerInput) -> Result<Customer, BooksError> {
        input.validate()?;
        let mut customer: Customer = self.record(id)?;
        customer.name = input.name.trim().to_string();
        customer.phone = clean(input.phone);
        customer.email = clean(input.email);
        customer.address = clean(input.address);
        customer.tax_number = clean(input.tax_number);
        customer.credit_limit = money(input.credit_limit.unwrap_or(customer.credit_limit));
        self.save(&customer)?;
        Ok(customer)
    }

    pub fn create_supplier(&self, input: SupplierInput, opening_date: Date) -> Result<Supplier, BooksError> {
        input.validate()?;
        let supplier = Supplier {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            phone: clean(input.phone),
            email: clean(input.email),
            address: clean(input.address),
            tax_number: clean(input.tax_number),
            contact_person: clean(input.contact_person),
        };
        let opening = money(input.opening_balance.unwrap_or(Decimal::ZERO));

        self.atomic(|books| {
            books.save(&supplier)?;
            if opening > Decimal::ZERO {
                books.post_opening_balance(
                    InvoiceKind::Purchase,
                    supplier.id,
                    &supplier.name,
                    opening,
                    opening_date,
                )?;
            }
            tracing::info!(id = %supplier.id, name = %supplier.name, "supplier created");
            Ok(supplier)
        })
    }

    pub fn update_supplier(&self, id: Uuid, input: SupplierInput) -> Result<Supplier, BooksError> {
        input.validate()?;
        let mut supplier: Supplier = self.record(id)?;
        supplier.name = input.name.trim().to_string();
        supplier.phone = clean(input.phone);
        supplier.email = clean(input.email);
        supplier.address = clean(input.address);
        supplier.tax_number = clean(input.tax_number);
        supplier.contact_person = clean(input.contact_person);
        self.save(&supplier)?;
        Ok(supplier)
    }

    fn post_opening_balance(
        &self,
        kind: InvoiceKind,
        party_id: Uuid,
        party_name: &str,
        amount: Decimal,
        date: Date,
    ) -> Result<(), BooksError> {
        let opening = self.system_account(SystemAccount::OpeningBalances)?;
        let (lines, party_kind) = match kind {
            InvoiceKind::Sales => {
                let customers = self.system_account(SystemAccount::Customers)?;
                (
                    vec![
                        JournalLine::debit(&customers, amount),
                        JournalLine::credit(&opening, amount),
                    ],
                    RecordKind::Customer,
                )
            }
            InvoiceKind::Purchase => {
                let suppliers = self.system_account(SystemAccount::Suppliers)?;
                (
                    vec![
                        JournalLine::debit(&opening, amount),
                        JournalLine::credit(&suppliers, amount),
                    ],
                    RecordKind::Supplier,
                )
            }
        };

        let number = document_number("OB");
        let journal = self.post_entry(
            NewJournalEntry::new(date, &format!("Opening balance - {}", party_name), lines)
                .with_reference(number.as_str())
                .for_document(DocumentRef {
                    kind: party_kind,
                    id: party_id,
                }),
        )?;

        let invoice = Invoice {
            id: Uuid::new_v4(),
            kind,
            number,
            party_id,
            date,
            due_date: None,
            warehouse_id: Arc::from(""),
            items: Vec::new(),
            discount: Discount::None,
            subtotal: amount,
            discount_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total_amount: amount,
            paid_amount: Decimal::ZERO,
            treasury_account_id: None,
            status: InvoiceStatus::Posted,
            journal_id: Some(journal.id),
            notes: Some("Opening balance".to_string()),
        };
        self.save(&invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::ops::Bound;
    use time::macros::date;
    use tripro_memory::InMemoryStorage;

    fn books() -> Books {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        books.install_default_chart().unwrap();
        books
    }

    fn customer_input(name: &str, opening: Option<Decimal>) -> CustomerInput {
        CustomerInput {
            name: name.to_string(),
            phone: Some(" ".to_string()),
            email: None,
            address: None,
            tax_number: None,
            credit_limit: Some(dec!(5000)),
            opening_balance: opening,
        }
    }

    #[test]
    fn customer_opening_balance_posts_receivable() {
        let books = books();
        let customer = books
            .create_customer(customer_input("Cairo Foods", Some(dec!(1500))), date!(2024 - 01 - 01))
            .unwrap();
        assert_eq!(customer.phone, None);
        assert_eq!(books.storage().get_balance("10201", Bound::Unbounded).unwrap(), dec!(1500));
        assert_eq!(books.storage().get_balance("3999", Bound::Unbounded).unwrap(), dec!(-1500));

        let invoices = books.records::<Invoice>().unwrap();
        assert_eq!(invoices.len(), 1);
        assert!(invoices[0].number.starts_with("OB-"));
        assert_eq!(invoices[0].outstanding(), dec!(1500));
    }

    #[test]
    fn supplier_opening_balance_posts_payable() {
        let books = books();
        let input = SupplierInput {
            name: "Alex Steel".to_string(),
            phone: None,
            email: None,
            address: None,
            tax_number: None,
            contact_person: Some("Omar".to_string()),
            opening_balance: Some(dec!(700)),
        };
        books.create_supplier(input, date!(2024 - 01 - 01)).unwrap();
        assert_eq!(books.storage().get_balance("201", Bound::Unbounded).unwrap(), dec!(-700));
    }

    #[test]
    fn invalid_customer_writes_nothing() {
        let books = books();
        let err = books
            .create_customer(customer_input("Al", None), date!(2024 - 01 - 01))
            .unwrap_err();
        assert!(matches!(err, BooksError::Validation(_)));
        assert!(books.records::<Customer>().unwrap().is_empty());
    }

    #[test]
    fn failed_opening_entry_rolls_back_customer() {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        let err = books
            .create_customer(customer_input("Cairo Foods", Some(dec!(10))), date!(2024 - 01 - 01))
            .unwrap_err();
        assert!(matches!(err, BooksError::MissingSystemAccount(_)));
        assert!(books.records::<Customer>().unwrap().is_empty());
    }

    #[test]
    fn update_keeps_id() {
        let books = books();
        let customer = books
            .create_customer(customer_input("Cairo Foods", None), date!(2024 - 01 - 01))
            .unwrap();
        let updated = books
            .update_customer(customer.id, customer_input("Cairo Foods Ltd", None))
            .unwrap();
        assert_eq!(updated.id, customer.id);
        assert_eq!(books.record::<Customer>(customer.id).unwrap().name, "Cairo Foods Ltd");
    }
}
