//! Field validators and the input schemas checked before anything is written.
//!
//! Messages are the Arabic texts shown to end users; `code` values are stable
//! identifiers for clients.

use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use time::{macros::format_description, Date};
use uuid::Uuid;

use tripro_core::{
    models::records::{Discount, EmployeeStatus, InvoiceItem, InvoiceKind, ItemType},
    Account, AccountType, NewJournalEntry, SubType,
};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[\d\s\-()]{10,}$").expect("phone pattern"));
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern"));

/// A single rejected value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FieldError {
    pub code: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Every problem found in one input, keyed by field path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    pub errors: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.into());
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|(field, message)| format!("{}: {}", field, message))
            .collect();
        write!(f, "validation failed: {}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

#[derive(Default)]
struct Collector {
    errors: BTreeMap<String, String>,
}

impl Collector {
    fn check(&mut self, ok: bool, field: impl Into<String>, message: &str) {
        if !ok {
            self.errors.entry(field.into()).or_insert_with(|| message.to_string());
        }
    }

    fn field(&mut self, field: impl Into<String>, result: Result<(), FieldError>) {
        if let Err(e) = result {
            self.errors.entry(field.into()).or_insert(e.message);
        }
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                errors: self.errors,
            })
        }
    }
}

/// Parses a submitted amount and rejects non-numbers, negatives and zero.
pub fn validate_amount(raw: &str, field_name: &str) -> Result<Decimal, FieldError> {
    let amount = Decimal::from_str(raw.trim())
        .map_err(|_| FieldError::new("INVALID_AMOUNT", format!("{} يجب أن يكون رقم", field_name)))?;
    check_amount(amount, field_name)?;
    Ok(amount)
}

pub fn check_amount(amount: Decimal, field_name: &str) -> Result<(), FieldError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(FieldError::new(
            "NEGATIVE_AMOUNT",
            format!("{} لا يمكن أن يكون سالب", field_name),
        ));
    }
    if amount.is_zero() {
        return Err(FieldError::new(
            "ZERO_AMOUNT",
            format!("{} لا يمكن أن يكون صفر", field_name),
        ));
    }
    Ok(())
}

/// Parses a `YYYY-MM-DD` date and rejects dates after `today`.
pub fn validate_date(raw: &str, today: Date, field_name: &str) -> Result<Date, FieldError> {
    let invalid = || FieldError::new("INVALID_DATE", format!("{} غير صحيح", field_name));
    if !DATE_RE.is_match(raw.trim()) {
        return Err(invalid());
    }
    let date = Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| invalid())?;
    check_not_future(date, today, field_name)?;
    Ok(date)
}

pub fn check_not_future(date: Date, today: Date, field_name: &str) -> Result<(), FieldError> {
    if date > today {
        return Err(FieldError::new(
            "FUTURE_DATE",
            format!("{} لا يمكن أن يكون في المستقبل", field_name),
        ));
    }
    Ok(())
}

pub fn validate_required(value: Option<&str>, field_name: &str) -> Result<(), FieldError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(FieldError::new("REQUIRED_FIELD", format!("{} مطلوب", field_name))),
    }
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn is_valid_phone(value: &str) -> bool {
    PHONE_RE.is_match(value)
}

pub fn is_valid_date_format(value: &str) -> bool {
    DATE_RE.is_match(value)
}

pub fn is_valid_percent(value: Decimal) -> bool {
    value >= Decimal::ZERO && value <= Decimal::ONE_HUNDRED
}

/// Quantities are positive whole numbers.
pub fn is_valid_quantity(value: Decimal) -> bool {
    value > Decimal::ZERO && value.fract().is_zero()
}

fn optional_email_ok(email: &Option<String>) -> bool {
    match email.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(e) => is_valid_email(e),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInput {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sub_type: Option<SubType>,
}

impl AccountInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.check(!self.code.trim().is_empty(), "code", "رمز الحساب مطلوب.");
        c.check(self.name.trim().chars().count() >= 2, "name", "اسم الحساب مطلوب.");
        c.finish()
    }

    pub fn into_account(self, id: &str) -> Account {
        Account {
            id: Arc::from(id),
            code: Arc::from(self.code.trim()),
            name: Arc::from(self.name.trim()),
            account_type: self.account_type,
            parent_id: self
                .parent_id
                .filter(|p| !p.trim().is_empty())
                .map(|p| Arc::from(p.trim())),
            is_group: self.is_group,
            sub_type: self.sub_type,
            is_active: true,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerInput {
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
    pub credit_limit: Option<Decimal>,
    #[serde(default)]
    pub opening_balance: Option<Decimal>,
}

impl CustomerInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.check(
            self.name.trim().chars().count() >= 3,
            "name",
            "اسم العميل يجب أن يكون 3 أحرف على الأقل.",
        );
        c.check(optional_email_ok(&self.email), "email", "صيغة البريد الإلكتروني غير صحيحة.");
        c.check(
            self.credit_limit.map_or(true, |l| l >= Decimal::ZERO),
            "credit_limit",
            "حد الائتمان لا يمكن أن يكون سالباً.",
        );
        c.check(
            self.opening_balance.map_or(true, |b| b >= Decimal::ZERO),
            "opening_balance",
            "الرصيد الافتتاحي لا يمكن أن يكون سالباً.",
        );
        c.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupplierInput {
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
    #[serde(default)]
    pub opening_balance: Option<Decimal>,
}

impl SupplierInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.check(
            self.name.trim().chars().count() >= 3,
            "name",
            "اسم المورد يجب أن يكون 3 أحرف على الأقل.",
        );
        c.check(optional_email_ok(&self.email), "email", "صيغة البريد الإلكتروني غير صحيحة.");
        c.check(
            self.opening_balance.map_or(true, |b| b >= Decimal::ZERO),
            "opening_balance",
            "الرصيد الافتتاحي لا يمكن أن يكون سالباً.",
        );
        c.finish()
    }
}

/// Form-level checks on a submitted journal entry. The posting engine applies
/// the accounting rules again on the cleaned entry.
pub fn validate_journal_entry(entry: &NewJournalEntry) -> Result<(), ValidationError> {
    let mut c = Collector::default();
    c.check(
        entry.reference.as_deref().map_or(true, |r| r.chars().count() <= 50),
        "reference",
        "المرجع طويل جداً",
    );
    c.check(
        entry.description.as_deref().map_or(true, |d| d.chars().count() <= 500),
        "description",
        "الوصف طويل جداً",
    );
    c.check(entry.lines.len() >= 2, "lines", "القيد يجب أن يحتوي على طرفين على الأقل.");
    for (i, line) in entry.lines.iter().enumerate() {
        c.check(
            !line.account_id.trim().is_empty(),
            format!("lines.{}.account_id", i),
            "يجب اختيار حساب صحيح لكل طرف.",
        );
        c.check(
            line.debit >= Decimal::ZERO,
            format!("lines.{}.debit", i),
            "المدين لا يمكن أن يكون سالباً.",
        );
        c.check(
            line.credit >= Decimal::ZERO,
            format!("lines.{}.credit", i),
            "الدائن لا يمكن أن يكون سالباً.",
        );
    }
    let debit: Decimal = entry.lines.iter().map(|l| l.debit.round_dp(2)).sum();
    let credit: Decimal = entry.lines.iter().map(|l| l.credit.round_dp(2)).sum();
    c.check(
        debit == credit,
        "lines",
        "القيد غير متوازن. إجمالي المدين يجب أن يساوي إجمالي الدائن.",
    );
    c.finish()
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceInput {
    pub kind: InvoiceKind,
    pub party_id: Uuid,
    #[serde(default)]
    pub number: Option<String>,
    pub date: Date,
    #[serde(default)]
    pub due_date: Option<Date>,
    pub warehouse_id: String,
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub discount: Discount,
    #[serde(default)]
    pub paid_amount: Decimal,
    #[serde(default)]
    pub treasury_account_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl InvoiceInput {
    pub fn validate(&self, today: Date) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.field("date", check_not_future(self.date, today, "تاريخ الفاتورة"));
        c.check(
            self.due_date.map_or(true, |due| due >= self.date),
            "due_date",
            "تاريخ الاستحقاق يجب أن يكون بعد تاريخ الفاتورة",
        );
        c.check(!self.warehouse_id.trim().is_empty(), "warehouse_id", "يجب اختيار مستودع.");
        c.check(!self.items.is_empty(), "items", "يجب إضافة صنف واحد على الأقل في الفاتورة.");
        for (i, item) in self.items.iter().enumerate() {
            c.check(
                is_valid_quantity(item.quantity),
                format!("items.{}.quantity", i),
                "الكمية يجب أن تكون رقماً صحيحاً موجباً.",
            );
            c.check(
                item.unit_price > Decimal::ZERO,
                format!("items.{}.unit_price", i),
                "السعر يجب أن يكون أكبر من صفر.",
            );
        }
        match self.discount {
            Discount::Percentage(p) => {
                c.check(is_valid_percent(p), "discount", "النسبة يجب أن تكون بين 0 و 100")
            }
            Discount::Fixed(v) => c.check(v >= Decimal::ZERO, "discount", "الخصم لا يمكن أن يكون سالباً."),
            Discount::None => {}
        }
        c.check(self.paid_amount >= Decimal::ZERO, "paid_amount", "المبلغ المدفوع لا يمكن أن يكون سالباً.");
        c.check(
            self.paid_amount.is_zero()
                || self
                    .treasury_account_id
                    .as_deref()
                    .map_or(false, |t| !t.trim().is_empty()),
            "treasury_account_id",
            "يجب اختيار حساب الخزينة/البنك.",
        );
        c.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoucherInput {
    pub amount: Decimal,
    pub date: Date,
    pub treasury_account_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub party_id: Option<Uuid>,
    #[serde(default)]
    pub target_account_id: Option<String>,
}

impl VoucherInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.check(self.amount > Decimal::ZERO, "amount", "المبلغ يجب أن يكون أكبر من صفر.");
        c.check(
            !self.treasury_account_id.trim().is_empty(),
            "treasury_account_id",
            "يجب اختيار حساب الخزينة/البنك.",
        );
        let has_target = self
            .target_account_id
            .as_deref()
            .map_or(false, |t| !t.trim().is_empty());
        c.check(
            self.party_id.is_some() || has_target,
            "party_id",
            "يجب تحديد الطرف المستفيد (عميل/مورد) أو الحساب المقابل.",
        );
        c.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductInput {
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub item_type: ItemType,
    pub price: Decimal,
    #[serde(default)]
    pub cost: Decimal,
    #[serde(default)]
    pub min_stock_level: Decimal,
}

impl ProductInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.check(self.name.trim().chars().count() >= 2, "name", "اسم الصنف مطلوب.");
        c.check(self.price >= Decimal::ZERO, "price", "السعر لا يمكن أن يكون سالباً.");
        c.check(self.cost >= Decimal::ZERO, "cost", "التكلفة لا يمكن أن تكون سالبة.");
        c.check(
            self.min_stock_level >= Decimal::ZERO,
            "min_stock_level",
            "حد الطلب لا يمكن أن يكون سالباً.",
        );
        c.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmployeeInput {
    pub full_name: String,
    pub salary: Decimal,
    #[serde(default = "active")]
    pub status: EmployeeStatus,
}

fn active() -> EmployeeStatus {
    EmployeeStatus::Active
}

impl EmployeeInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.check(self.full_name.trim().chars().count() >= 3, "full_name", "اسم الموظف مطلوب.");
        c.check(self.salary >= Decimal::ZERO, "salary", "الراتب لا يمكن أن يكون سالباً.");
        c.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetInput {
    pub name: String,
    pub purchase_date: Date,
    pub purchase_cost: Decimal,
    #[serde(default)]
    pub salvage_value: Decimal,
    pub useful_life_years: Decimal,
    pub asset_account_id: String,
    #[serde(default)]
    pub accumulated_depreciation_account_id: Option<String>,
    #[serde(default)]
    pub depreciation_expense_account_id: Option<String>,
    /// Account credited by the purchase entry. Without one the asset is
    /// brought in against opening balances.
    #[serde(default)]
    pub payment_account_id: Option<String>,
    #[serde(default)]
    pub post_purchase_entry: bool,
}

impl AssetInput {
    pub fn validate(&self, today: Date) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.check(self.name.trim().chars().count() >= 2, "name", "اسم الأصل مطلوب.");
        c.field("purchase_date", check_not_future(self.purchase_date, today, "تاريخ الشراء"));
        c.field("purchase_cost", check_amount(self.purchase_cost, "تكلفة الشراء"));
        c.check(
            self.salvage_value >= Decimal::ZERO && self.salvage_value < self.purchase_cost,
            "salvage_value",
            "قيمة الخردة يجب أن تكون أقل من تكلفة الشراء.",
        );
        c.check(
            self.useful_life_years > Decimal::ZERO,
            "useful_life_years",
            "العمر الإنتاجي يجب أن يكون أكبر من صفر.",
        );
        c.check(
            !self.asset_account_id.trim().is_empty(),
            "asset_account_id",
            "يجب اختيار حساب الأصل.",
        );
        c.finish()
    }
}

/// Goods coming back on a sales or purchase invoice.
#[derive(Debug, Clone, Deserialize)]
pub struct ReturnInput {
    pub kind: InvoiceKind,
    pub party_id: Uuid,
    #[serde(default)]
    pub invoice_id: Option<Uuid>,
    #[serde(default)]
    pub number: Option<String>,
    pub date: Date,
    pub warehouse_id: String,
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ReturnInput {
    pub fn validate(&self, today: Date) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.field("date", check_not_future(self.date, today, "تاريخ المرتجع"));
        c.check(!self.warehouse_id.trim().is_empty(), "warehouse_id", "الرجاء اختيار المستودع");
        c.check(!self.items.is_empty(), "items", "يجب إضافة بند واحد على الأقل");
        for (i, item) in self.items.iter().enumerate() {
            c.check(
                item.quantity > Decimal::ZERO,
                format!("items.{}.quantity", i),
                "الكمية يجب أن تكون أكبر من 0",
            );
            c.check(
                item.unit_price >= Decimal::ZERO,
                format!("items.{}.unit_price", i),
                "السعر يجب أن يكون 0 أو أكثر",
            );
        }
        c.finish()
    }
}

/// A value-only credit: a credit note to a customer or a debit note from a
/// supplier. `amount` is before tax.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteInput {
    pub kind: InvoiceKind,
    pub party_id: Uuid,
    #[serde(default)]
    pub invoice_id: Option<Uuid>,
    #[serde(default)]
    pub number: Option<String>,
    pub date: Date,
    pub amount: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NoteInput {
    pub fn validate(&self, today: Date) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.field("date", check_not_future(self.date, today, "تاريخ الإشعار"));
        c.field("amount", check_amount(self.amount, "المبلغ"));
        c.finish()
    }
}

/// Operating expense paid out of a treasury account.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpenseInput {
    pub amount: Decimal,
    pub date: Date,
    pub treasury_account_id: String,
    pub expense_account_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ExpenseInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.field("amount", check_amount(self.amount, "المبلغ"));
        c.check(
            !self.treasury_account_id.trim().is_empty(),
            "treasury_account_id",
            "يجب اختيار حساب الخزينة/البنك.",
        );
        c.check(
            !self.expense_account_id.trim().is_empty(),
            "expense_account_id",
            "يجب اختيار حساب المصروف.",
        );
        c.finish()
    }
}

/// Money moved between two treasury accounts.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferInput {
    pub amount: Decimal,
    pub date: Date,
    pub source_account_id: String,
    pub destination_account_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl TransferInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Collector::default();
        c.field("amount", check_amount(self.amount, "المبلغ"));
        let source = self.source_account_id.trim();
        let destination = self.destination_account_id.trim();
        c.check(!source.is_empty(), "source_account_id", "يجب اختيار حساب المصدر.");
        c.check(!destination.is_empty(), "destination_account_id", "يجب اختيار حساب الوجهة.");
        c.check(
            source.is_empty() || source != destination,
            "destination_account_id",
            "لا يمكن التحويل لنفس الحساب",
        );
        c.finish()
    }
}
