use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::Arc};

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

pub mod read;
pub mod records;
pub mod write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    #[serde(alias = "INCOME")]
    Revenue,
    Expense,
}

#[derive(Debug, Error)]
#[error("unknown account type: {0}")]
pub struct UnknownAccountType(pub String);

impl AccountType {
    pub const ALL: [AccountType; 5] = [
        AccountType::Asset,
        AccountType::Liability,
        AccountType::Equity,
        AccountType::Revenue,
        AccountType::Expense,
    ];

    /// Assets and expenses grow on the debit side.
    pub fn is_debit_natured(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }

    /// Signs a raw `debit - credit` figure by the account's normal side.
    pub fn natural(&self, debit_minus_credit: Decimal) -> Decimal {
        if self.is_debit_natured() {
            debit_minus_credit
        } else {
            -debit_minus_credit
        }
    }

    pub fn is_profit_and_loss(&self) -> bool {
        matches!(self, AccountType::Revenue | AccountType::Expense)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Revenue => "REVENUE",
            AccountType::Expense => "EXPENSE",
        }
    }
}

impl FromStr for AccountType {
    type Err = UnknownAccountType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            "EQUITY" => Ok(AccountType::Equity),
            "REVENUE" | "INCOME" => Ok(AccountType::Revenue),
            "EXPENSE" => Ok(AccountType::Expense),
            _ => Err(UnknownAccountType(s.to_string())),
        }
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubType {
    Current,
    NonCurrent,
}

fn default_true() -> bool {
    true
}

/// A node of the chart of accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Arc<str>,
    pub code: Arc<str>,
    pub name: Arc<str>,
    pub account_type: AccountType,
    #[serde(default)]
    pub parent_id: Option<Arc<str>>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub sub_type: Option<SubType>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl Account {
    pub fn new(id: &str, code: &str, name: &str, account_type: AccountType) -> Self {
        Self {
            id: Arc::from(id),
            code: Arc::from(code),
            name: Arc::from(name),
            account_type,
            parent_id: None,
            is_group: false,
            sub_type: None,
            is_active: true,
            deleted_at: None,
        }
    }

    pub fn group(mut self) -> Self {
        self.is_group = true;
        self
    }

    pub fn under(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(Arc::from(parent_id));
        self
    }

    /// Whether journal lines may be posted against this account.
    pub fn is_postable(&self) -> bool {
        !self.is_group && self.is_active && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    Draft,
    Posted,
}

impl JournalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalStatus::Draft => "draft",
            JournalStatus::Posted => "posted",
        }
    }
}

impl FromStr for JournalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(JournalStatus::Draft),
            "posted" => Ok(JournalStatus::Posted),
            other => Err(format!("unknown journal status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: Arc<str>,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    #[serde(default)]
    pub description: Option<Arc<str>>,
    #[serde(default)]
    pub cost_center_id: Option<Arc<str>>,
}

impl JournalLine {
    pub fn debit(account_id: &str, amount: Decimal) -> Self {
        Self {
            account_id: Arc::from(account_id),
            debit: amount,
            credit: Decimal::ZERO,
            description: None,
            cost_center_id: None,
        }
    }

    pub fn credit(account_id: &str, amount: Decimal) -> Self {
        Self {
            account_id: Arc::from(account_id),
            debit: Decimal::ZERO,
            credit: amount,
            description: None,
            cost_center_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<Arc<str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn net(&self) -> Decimal {
        self.debit - self.credit
    }
}

/// Links a journal entry to the business document that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: records::RecordKind,
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    #[serde(default)]
    pub sequence: u64,
    pub date: Date,
    pub reference: Arc<str>,
    pub description: Arc<str>,
    pub status: JournalStatus,
    pub lines: Vec<JournalLine>,
    #[serde(default)]
    pub related_document: Option<DocumentRef>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl JournalEntry {
    pub fn total_debit(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    pub fn total_credit(&self) -> Decimal {
        self.lines.iter().map(|l| l.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debit() == self.total_credit()
    }

    /// Posted and not in the recycle bin; only these reach the ledger.
    pub fn affects_ledger(&self) -> bool {
        self.status == JournalStatus::Posted && self.deleted_at.is_none()
    }
}

impl Display for JournalEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Account", "Description", "Debit", "Credit"]);
        table.add_empty_row();
        for line in &self.lines {
            let description = line.description.as_deref().unwrap_or("");
            table.add_row(row![line.account_id, description, line.debit, line.credit]);
        }
        table.add_row(row!["", "Total", self.total_debit(), self.total_credit()]);

        write!(
            f,
            "{} {} [{}] {}\n{}",
            self.date,
            self.reference,
            self.status.as_str(),
            self.description,
            table
        )
    }
}

/// Accounts the document postings rely on, resolved through
/// `Settings::account_mappings` first and the default code second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemAccount {
    Cash,
    Customers,
    Inventory,
    AccumulatedDepreciation,
    Suppliers,
    Vat,
    VatInput,
    SalesRevenue,
    OtherRevenue,
    SalesDiscount,
    Cogs,
    InventoryAdjustments,
    SalariesExpense,
    DepreciationExpense,
    RetainedEarnings,
    EmployeeBonuses,
    EmployeeDeductions,
    EmployeeAdvances,
    CashShortage,
    OpeningBalances,
}

impl SystemAccount {
    pub const ALL: [SystemAccount; 20] = [
        SystemAccount::Cash,
        SystemAccount::Customers,
        SystemAccount::Inventory,
        SystemAccount::AccumulatedDepreciation,
        SystemAccount::Suppliers,
        SystemAccount::Vat,
        SystemAccount::VatInput,
        SystemAccount::SalesRevenue,
        SystemAccount::OtherRevenue,
        SystemAccount::SalesDiscount,
        SystemAccount::Cogs,
        SystemAccount::InventoryAdjustments,
        SystemAccount::SalariesExpense,
        SystemAccount::DepreciationExpense,
        SystemAccount::RetainedEarnings,
        SystemAccount::EmployeeBonuses,
        SystemAccount::EmployeeDeductions,
        SystemAccount::EmployeeAdvances,
        SystemAccount::CashShortage,
        SystemAccount::OpeningBalances,
    ];

    pub fn default_code(&self) -> &'static str {
        match self {
            SystemAccount::Cash => "1231",
            SystemAccount::Customers => "10201",
            SystemAccount::Inventory => "121",
            SystemAccount::AccumulatedDepreciation => "1119",
            SystemAccount::Suppliers => "201",
            SystemAccount::Vat => "2231",
            SystemAccount::VatInput => "1241",
            SystemAccount::SalesRevenue => "411",
            SystemAccount::OtherRevenue => "421",
            SystemAccount::SalesDiscount => "413",
            SystemAccount::Cogs => "511",
            SystemAccount::InventoryAdjustments => "512",
            SystemAccount::SalariesExpense => "531",
            SystemAccount::DepreciationExpense => "533",
            SystemAccount::RetainedEarnings => "32",
            SystemAccount::EmployeeBonuses => "5312",
            SystemAccount::EmployeeDeductions => "422",
            SystemAccount::EmployeeAdvances => "1223",
            SystemAccount::CashShortage => "541",
            SystemAccount::OpeningBalances => "3999",
        }
    }

    pub fn account_type(&self) -> AccountType {
        match self {
            SystemAccount::Cash
            | SystemAccount::Customers
            | SystemAccount::Inventory
            | SystemAccount::AccumulatedDepreciation
            | SystemAccount::VatInput
            | SystemAccount::EmployeeAdvances => AccountType::Asset,
            SystemAccount::Suppliers | SystemAccount::Vat => AccountType::Liability,
            SystemAccount::RetainedEarnings | SystemAccount::OpeningBalances => AccountType::Equity,
            SystemAccount::SalesRevenue
            | SystemAccount::OtherRevenue
            | SystemAccount::EmployeeDeductions => AccountType::Revenue,
            SystemAccount::SalesDiscount
            | SystemAccount::Cogs
            | SystemAccount::InventoryAdjustments
            | SystemAccount::SalariesExpense
            | SystemAccount::DepreciationExpense
            | SystemAccount::EmployeeBonuses
            | SystemAccount::CashShortage => AccountType::Expense,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SystemAccount::Cash => "Cash on hand",
            SystemAccount::Customers => "Customers",
            SystemAccount::Inventory => "Inventory",
            SystemAccount::AccumulatedDepreciation => "Accumulated depreciation",
            SystemAccount::Suppliers => "Suppliers",
            SystemAccount::Vat => "VAT output",
            SystemAccount::VatInput => "VAT input",
            SystemAccount::SalesRevenue => "Sales revenue",
            SystemAccount::OtherRevenue => "Other revenue",
            SystemAccount::SalesDiscount => "Sales discount",
            SystemAccount::Cogs => "Cost of goods sold",
            SystemAccount::InventoryAdjustments => "Inventory adjustments",
            SystemAccount::SalariesExpense => "Salaries and wages",
            SystemAccount::DepreciationExpense => "Depreciation expense",
            SystemAccount::RetainedEarnings => "Retained earnings",
            SystemAccount::EmployeeBonuses => "Bonuses and incentives",
            SystemAccount::EmployeeDeductions => "Employee deductions and penalties",
            SystemAccount::EmployeeAdvances => "Employee advances",
            SystemAccount::CashShortage => "Cash shortage",
            SystemAccount::OpeningBalances => "Opening balances",
        }
    }
}

fn default_currency() -> String {
    "EGP".to_string()
}

fn default_vat_rate() -> Decimal {
    Decimal::new(14, 2)
}

fn default_deficit_limit() -> Decimal {
    Decimal::from(500)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub tax_number: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_vat_rate")]
    pub vat_rate: Decimal,
    #[serde(default)]
    pub enable_tax: bool,
    #[serde(default = "default_deficit_limit")]
    pub max_cash_deficit_limit: Decimal,
    #[serde(default)]
    pub last_closed_date: Option<Date>,
    #[serde(default)]
    pub allow_negative_stock: bool,
    #[serde(default)]
    pub account_mappings: BTreeMap<SystemAccount, Arc<str>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            company_name: String::new(),
            tax_number: String::new(),
            currency: default_currency(),
            vat_rate: default_vat_rate(),
            enable_tax: false,
            max_cash_deficit_limit: default_deficit_limit(),
            last_closed_date: None,
            allow_negative_stock: false,
            account_mappings: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn natural_balance_follows_account_side() {
        assert_eq!(AccountType::Asset.natural(dec!(100)), dec!(100));
        assert_eq!(AccountType::Expense.natural(dec!(-5)), dec!(-5));
        assert_eq!(AccountType::Liability.natural(dec!(-100)), dec!(100));
        assert_eq!(AccountType::Revenue.natural(dec!(-40)), dec!(40));
    }

    #[test]
    fn account_type_parses_income_alias() {
        assert_eq!("income".parse::<AccountType>().unwrap(), AccountType::Revenue);
        assert_eq!(" asset ".parse::<AccountType>().unwrap(), AccountType::Asset);
        assert!("cash".parse::<AccountType>().is_err());
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"enable_tax": true}"#).unwrap();
        assert!(settings.enable_tax);
        assert_eq!(settings.currency, "EGP");
        assert_eq!(settings.vat_rate, dec!(0.14));
        assert_eq!(settings.max_cash_deficit_limit, dec!(500));
    }

    #[test]
    fn account_mappings_round_trip_as_json_keys() {
        let mut settings = Settings::default();
        settings.account_mappings.insert(SystemAccount::CashShortage, Arc::from("shortage"));
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"CASH_SHORTAGE\":\"shortage\""));
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn group_accounts_are_not_postable() {
        let account = Account::new("assets", "1", "Assets", AccountType::Asset).group();
        assert!(!account.is_postable());
        assert!(Account::new("cash", "1231", "Cash", AccountType::Asset).is_postable());
    }
}
