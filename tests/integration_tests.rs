use std::{ops::Bound, sync::Arc};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::macros::date;

use tripro::{
    backup::BackupFile,
    documents::PayrollRequest,
    treasury::{CashClosingRequest, VoucherKind},
    validation::{CustomerInput, EmployeeInput, InvoiceInput, ProductInput, VoucherInput},
    Books, BooksError, InMemoryStorage, JournalLine, NewJournalEntry, SqliteStorage, StorageBackend,
};
use tripro_core::models::records::{
    Discount, EmployeeStatus, InvoiceItem, InvoiceKind, InvoiceStatus, ItemType,
};

fn memory_books() -> Books {
    Books::new(Arc::new(InMemoryStorage::new()))
}

fn sqlite_books() -> Books {
    Books::new(Arc::new(SqliteStorage::new(":memory:").unwrap()))
}

fn balance(books: &Books, account: &str) -> Decimal {
    books.storage().get_balance(account, Bound::Unbounded).unwrap()
}

fn owner_funding(amount: Decimal) -> NewJournalEntry {
    NewJournalEntry::new(
        date!(2024 - 01 - 02),
        "Owner funding",
        vec![
            JournalLine::debit("1231", amount),
            JournalLine::credit("3999", amount),
        ],
    )
}

fn customer(books: &Books) -> uuid::Uuid {
    books
        .create_customer(
            CustomerInput {
                name: "Nile Traders".to_string(),
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
        .id
}

fn service(books: &Books) -> uuid::Uuid {
    books
        .create_product(ProductInput {
            name: "Consulting hour".to_string(),
            sku: None,
            item_type: ItemType::Service,
            price: dec!(200),
            cost: Decimal::ZERO,
            min_stock_level: Decimal::ZERO,
        })
        .unwrap()
        .id
}

fn sales_invoice(party_id: uuid::Uuid, product_id: uuid::Uuid, quantity: Decimal) -> InvoiceInput {
    InvoiceInput {
        kind: InvoiceKind::Sales,
        party_id,
        number: None,
        date: date!(2024 - 03 - 10),
        due_date: None,
        warehouse_id: "main".to_string(),
        items: vec![InvoiceItem {
            product_id,
            quantity,
            unit_price: dec!(200),
        }],
        discount: Discount::None,
        paid_amount: Decimal::ZERO,
        treasury_account_id: None,
        notes: None,
    }
}

fn test_posting_updates_balances(books: Books) {
    books.install_default_chart().unwrap();
    let entry = books.post_entry(owner_funding(dec!(5000))).unwrap();
    assert!(entry.is_balanced());
    assert!(entry.sequence > 0);

    assert_eq!(balance(&books, "1231"), dec!(5000));
    assert_eq!(balance(&books, "3999"), dec!(-5000));
    assert!(books.trial_balance(None).unwrap().is_balanced());
}

fn test_unbalanced_entry_is_rejected(books: Books) {
    books.install_default_chart().unwrap();
    let mut entry = owner_funding(dec!(100));
    entry.lines[1].credit = dec!(99.99);
    assert!(books.post_entry(entry).is_err());
    assert!(books.journals(None, None).unwrap().is_empty());
}

fn test_failed_operation_rolls_back(books: Books) {
    books.install_default_chart().unwrap();
    let result: Result<(), BooksError> = books.atomic(|books| {
        books.post_entry(owner_funding(dec!(750)))?;
        Err(BooksError::InvalidState("abort".to_string()))
    });
    assert!(result.is_err());
    assert!(books.journals(None, None).unwrap().is_empty());
    assert_eq!(balance(&books, "1231"), Decimal::ZERO);
}

fn test_invoice_and_receipt_settle_the_customer(books: Books) {
    books.install_default_chart().unwrap();
    let party = customer(&books);
    let product = service(&books);

    let invoice = books.create_invoice(sales_invoice(party, product, dec!(3))).unwrap();
    let approved = books.approve_invoice(invoice.id).unwrap();
    assert_eq!(approved.invoice.status, InvoiceStatus::Posted);
    assert_eq!(balance(&books, "10201"), dec!(600));

    let receipt = books
        .record_voucher(
            VoucherKind::Receipt,
            VoucherInput {
                amount: dec!(600),
                date: date!(2024 - 03 - 20),
                treasury_account_id: "1231".to_string(),
                description: None,
                party_id: Some(party),
                target_account_id: None,
            },
        )
        .unwrap();
    assert_eq!(receipt.allocations.len(), 1);
    assert_eq!(balance(&books, "10201"), Decimal::ZERO);
    assert_eq!(balance(&books, "1231"), dec!(600));

    let aging = books
        .aging(InvoiceKind::Sales, date!(2024 - 06 - 30))
        .unwrap();
    assert_eq!(aging.totals.total(), Decimal::ZERO);
}

fn test_payroll_posts_once_per_month(books: Books) {
    books.install_default_chart().unwrap();
    books.post_entry(owner_funding(dec!(20000))).unwrap();
    books
        .create_employee(EmployeeInput {
            full_name: "Mona Adel".to_string(),
            salary: dec!(6000),
            status: EmployeeStatus::Active,
        })
        .unwrap();

    let items = books.prepare_payroll(1, 2024).unwrap();
    assert_eq!(items.len(), 1);
    let request = PayrollRequest {
        month: 1,
        year: 2024,
        date: date!(2024 - 01 - 31),
        treasury_account_id: "1231".to_string(),
        items,
    };
    let payroll = books.run_payroll(request.clone()).unwrap();
    assert_eq!(payroll.total_net, dec!(6000));
    assert_eq!(balance(&books, "531"), dec!(6000));
    assert_eq!(balance(&books, "1231"), dec!(14000));

    let again = books.run_payroll(request).unwrap_err();
    assert!(matches!(again, BooksError::DuplicatePayroll { month: 1, year: 2024 }));
}

fn test_cash_closing_books_the_difference(books: Books) {
    books.install_default_chart().unwrap();
    books.post_entry(owner_funding(dec!(1000))).unwrap();
    let outcome = books
        .close_cash(
            CashClosingRequest {
                treasury_account_id: "1231".to_string(),
                closing_date: date!(2024 - 01 - 02),
                actual_balance: dec!(990),
                notes: String::new(),
            },
            Some("cashier"),
        )
        .unwrap();
    assert_eq!(outcome.closing.difference, dec!(-10));
    assert!(outcome.adjustment.is_some());
    assert_eq!(balance(&books, "1231"), dec!(990));
    assert_eq!(balance(&books, "541"), dec!(10));
}

fn test_fiscal_close_locks_the_year(books: Books) {
    books.install_default_chart().unwrap();
    let party = customer(&books);
    let product = service(&books);
    let invoice = books.create_invoice(sales_invoice(party, product, dec!(2))).unwrap();
    books.approve_invoice(invoice.id).unwrap();

    let closing = books.close_fiscal_year(2024).unwrap();
    assert_eq!(closing.net_income, dec!(400));
    assert_eq!(balance(&books, "411"), Decimal::ZERO);
    assert_eq!(balance(&books, "32"), dec!(-400));

    let late = books.post_entry(owner_funding(dec!(10)));
    assert!(matches!(late, Err(BooksError::PeriodLocked { .. })));
    assert!(matches!(
        books.close_fiscal_year(2024),
        Err(BooksError::YearAlreadyClosed(2024))
    ));
}

fn test_backup_restores_into_an_empty_book(books: Books) {
    books.install_default_chart().unwrap();
    books.post_entry(owner_funding(dec!(2500))).unwrap();
    customer(&books);

    let json = books.export_backup().unwrap().to_json().unwrap();
    let file = BackupFile::from_json(&json).unwrap();

    assert!(matches!(
        books.restore_backup(file.clone()),
        Err(BooksError::BookNotEmpty)
    ));

    let fresh = memory_books();
    let summary = fresh.restore_backup(file).unwrap();
    assert_eq!(summary.journals, 1);
    assert_eq!(summary.records, 1);
    assert_eq!(balance(&fresh, "1231"), dec!(2500));
    assert_eq!(fresh.accounts().unwrap().len(), books.accounts().unwrap().len());
}

fn test_deleted_journal_is_restorable(books: Books) {
    books.install_default_chart().unwrap();
    let entry = books.post_entry(owner_funding(dec!(300))).unwrap();
    books.delete_entry(entry.id).unwrap();
    assert_eq!(balance(&books, "1231"), Decimal::ZERO);
    assert_eq!(books.recycle_bin().unwrap().len(), 1);

    books.restore_entry(entry.id).unwrap();
    assert_eq!(balance(&books, "1231"), dec!(300));
    assert!(books.recycle_bin().unwrap().is_empty());
}

fn test_document_journal_cannot_be_deleted_alone(books: Books) {
    books.install_default_chart().unwrap();
    let party = customer(&books);
    let product = service(&books);
    let invoice = books.create_invoice(sales_invoice(party, product, dec!(1))).unwrap();
    let approved = books.approve_invoice(invoice.id).unwrap();
    let journal_id = approved.invoice.journal_id.unwrap();

    let err = books.delete_entry(journal_id).unwrap_err();
    assert!(matches!(err, BooksError::InvalidState(_)));
    assert_eq!(balance(&books, "10201"), dec!(200));
    assert!(books.recycle_bin().unwrap().is_empty());
}

macro_rules! backend_suite {
    ($($name:ident),* $(,)?) => {
        paste::paste! {
            $(
                #[test]
                fn [<memory_ $name>]() {
                    $name(memory_books());
                }

                #[test]
                fn [<sqlite_ $name>]() {
                    $name(sqlite_books());
                }
            )*
        }
    };
}

backend_suite!(
    test_posting_updates_balances,
    test_unbalanced_entry_is_rejected,
    test_failed_operation_rolls_back,
    test_invoice_and_receipt_settle_the_customer,
    test_payroll_posts_once_per_month,
    test_cash_closing_books_the_difference,
    test_fiscal_close_locks_the_year,
    test_backup_restores_into_an_empty_book,
    test_deleted_journal_is_restorable,
    test_document_journal_cannot_be_deleted_alone,
);
