//! Business documents kept alongside the ledger.
//!
//! Backends store these generically by `RecordKind`; callers work with the
//! concrete types through `TypedRecord`.

use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::Arc};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Customer,
    Supplier,
    Product,
    Employee,
    EmployeeAdvance,
    FixedAsset,
    Invoice,
    CashClosing,
    RejectedCashClosing,
    Payroll,
    ReturnNote,
}

impl RecordKind {
    pub const ALL: [RecordKind; 11] = [
        RecordKind::Customer,
        RecordKind::Supplier,
        RecordKind::Product,
        RecordKind::Employee,
        RecordKind::EmployeeAdvance,
        RecordKind::FixedAsset,
        RecordKind::Invoice,
        RecordKind::CashClosing,
        RecordKind::RejectedCashClosing,
        RecordKind::Payroll,
        RecordKind::ReturnNote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Customer => "customer",
            RecordKind::Supplier => "supplier",
            RecordKind::Product => "product",
            RecordKind::Employee => "employee",
            RecordKind::EmployeeAdvance => "employee_advance",
            RecordKind::FixedAsset => "fixed_asset",
            RecordKind::Invoice => "invoice",
            RecordKind::CashClosing => "cash_closing",
            RecordKind::RejectedCashClosing => "rejected_cash_closing",
            RecordKind::Payroll => "payroll",
            RecordKind::ReturnNote => "return_note",
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown record kind: {}", s))
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub tax_number: Option<String>,
    #[serde(default)]
    pub credit_limit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub tax_number: Option<String>,
    #[serde(default)]
    pub contact_person: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    Stock,
    Service,
    RawMaterial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub item_type: ItemType,
    pub price: Decimal,
    pub cost: Decimal,
    #[serde(default)]
    pub stock: Decimal,
    #[serde(default)]
    pub warehouse_stock: BTreeMap<Arc<str>, Decimal>,
    #[serde(default)]
    pub min_stock_level: Decimal,
}

impl Product {
    pub fn tracks_stock(&self) -> bool {
        self.item_type != ItemType::Service
    }

    pub fn stock_in(&self, warehouse_id: &str) -> Decimal {
        self.warehouse_stock.get(warehouse_id).copied().unwrap_or(Decimal::ZERO)
    }

    /// Moves `change` units in or out of a warehouse and the product total.
    pub fn adjust_stock(&mut self, warehouse_id: &str, change: Decimal) {
        self.stock += change;
        *self.warehouse_stock.entry(Arc::from(warehouse_id)).or_insert(Decimal::ZERO) += change;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: Uuid,
    pub full_name: String,
    pub salary: Decimal,
    pub status: EmployeeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceStatus {
    Pending,
    Paid,
    Deducted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeAdvance {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub amount: Decimal,
    pub date: Date,
    pub status: AdvanceStatus,
    #[serde(default)]
    pub payroll_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedAsset {
    pub id: Uuid,
    pub name: String,
    pub purchase_date: Date,
    pub purchase_cost: Decimal,
    #[serde(default)]
    pub salvage_value: Decimal,
    pub useful_life_years: Decimal,
    pub asset_account_id: Arc<str>,
    #[serde(default)]
    pub accumulated_depreciation_account_id: Option<Arc<str>>,
    #[serde(default)]
    pub depreciation_expense_account_id: Option<Arc<str>>,
    #[serde(default)]
    pub total_depreciation: Decimal,
    #[serde(default)]
    pub last_depreciation_date: Option<Date>,
}

impl FixedAsset {
    pub fn current_value(&self) -> Decimal {
        self.purchase_cost - self.total_depreciation
    }

    pub fn remaining_depreciable(&self) -> Decimal {
        self.current_value() - self.salvage_value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Sales,
    Purchase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Posted,
    Partial,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Discount {
    None,
    Fixed(Decimal),
    Percentage(Decimal),
}

impl Default for Discount {
    fn default() -> Self {
        Discount::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl InvoiceItem {
    pub fn total(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub kind: InvoiceKind,
    pub number: String,
    pub party_id: Uuid,
    pub date: Date,
    #[serde(default)]
    pub due_date: Option<Date>,
    pub warehouse_id: Arc<str>,
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub discount: Discount,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    #[serde(default)]
    pub paid_amount: Decimal,
    #[serde(default)]
    pub treasury_account_id: Option<Arc<str>>,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub journal_id: Option<Uuid>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Invoice {
    pub fn outstanding(&self) -> Decimal {
        (self.total_amount - self.paid_amount).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashClosing {
    pub id: Uuid,
    pub treasury_account_id: Arc<str>,
    pub closing_date: Date,
    pub system_balance: Decimal,
    pub actual_balance: Decimal,
    pub difference: Decimal,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub journal_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCashClosing {
    pub id: Uuid,
    pub treasury_account_id: Arc<str>,
    #[serde(with = "time::serde::rfc3339")]
    pub rejected_at: OffsetDateTime,
    pub system_balance: Decimal,
    pub actual_balance: Decimal,
    pub difference: Decimal,
    pub max_allowed_deficit: Decimal,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub rejected_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollItem {
    pub employee_id: Uuid,
    pub full_name: String,
    pub gross_salary: Decimal,
    #[serde(default)]
    pub additions: Decimal,
    #[serde(default)]
    pub advances_deducted: Decimal,
    #[serde(default)]
    pub other_deductions: Decimal,
    #[serde(default)]
    pub advance_ids: Vec<Uuid>,
}

impl PayrollItem {
    pub fn net_salary(&self) -> Decimal {
        self.gross_salary + self.additions - self.advances_deducted - self.other_deductions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payroll {
    pub id: Uuid,
    pub month: u8,
    pub year: i32,
    pub date: Date,
    pub treasury_account_id: Arc<str>,
    pub items: Vec<PayrollItem>,
    pub total_net: Decimal,
    pub journal_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    /// Goods back from a customer.
    SalesReturn,
    /// Goods back to a supplier.
    PurchaseReturn,
    /// Value-only credit to a customer.
    CreditNote,
    /// Value-only credit from a supplier.
    DebitNote,
}

impl ReturnKind {
    pub fn invoice_kind(&self) -> InvoiceKind {
        match self {
            ReturnKind::SalesReturn | ReturnKind::CreditNote => InvoiceKind::Sales,
            ReturnKind::PurchaseReturn | ReturnKind::DebitNote => InvoiceKind::Purchase,
        }
    }

    pub fn moves_stock(&self) -> bool {
        matches!(self, ReturnKind::SalesReturn | ReturnKind::PurchaseReturn)
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            ReturnKind::SalesReturn => "SR",
            ReturnKind::PurchaseReturn => "PR",
            ReturnKind::CreditNote => "CN",
            ReturnKind::DebitNote => "DN",
        }
    }
}

/// A posted return or credit/debit note against a customer or supplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnNote {
    pub id: Uuid,
    pub kind: ReturnKind,
    pub number: String,
    pub party_id: Uuid,
    #[serde(default)]
    pub invoice_id: Option<Uuid>,
    pub date: Date,
    #[serde(default)]
    pub warehouse_id: Option<Arc<str>>,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    /// Stock value moved back for sales returns.
    #[serde(default)]
    pub cost_amount: Decimal,
    pub journal_id: Uuid,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Record {
    Customer(Customer),
    Supplier(Supplier),
    Product(Product),
    Employee(Employee),
    EmployeeAdvance(EmployeeAdvance),
    FixedAsset(FixedAsset),
    Invoice(Invoice),
    CashClosing(CashClosing),
    RejectedCashClosing(RejectedCashClosing),
    Payroll(Payroll),
    ReturnNote(ReturnNote),
}

/// Typed access to one variant of `Record`.
pub trait TypedRecord: Sized {
    const KIND: RecordKind;

    fn id(&self) -> Uuid;
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Option<Self>;
}

macro_rules! typed_record {
    ($($ty:ident),* $(,)?) => {
        impl Record {
            pub fn kind(&self) -> RecordKind {
                match self {
                    $(Record::$ty(_) => RecordKind::$ty,)*
                }
            }

            pub fn id(&self) -> Uuid {
                match self {
                    $(Record::$ty(r) => r.id,)*
                }
            }
        }

        $(
            impl TypedRecord for $ty {
                const KIND: RecordKind = RecordKind::$ty;

                fn id(&self) -> Uuid {
                    self.id
                }

                fn into_record(self) -> Record {
                    Record::$ty(self)
                }

                fn from_record(record: Record) -> Option<Self> {
                    match record {
                        Record::$ty(r) => Some(r),
                        _ => None,
                    }
                }
            }
        )*
    };
}

typed_record!(
    Customer,
    Supplier,
    Product,
    Employee,
    EmployeeAdvance,
    FixedAsset,
    Invoice,
    CashClosing,
    RejectedCashClosing,
    Payroll,
    ReturnNote,
);
