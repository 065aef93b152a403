use std::{collections::HashMap, fmt::Display, ops::Bound, sync::Arc};

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;

use tripro_core::{Account, AccountType};

use crate::{books::Books, error::BooksError};

use super::upto;

/// An account's balance signed by its normal side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementLine {
    pub account_id: Arc<str>,
    pub code: Arc<str>,
    pub name: Arc<str>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSheet {
    pub as_of: Option<Date>,
    pub assets: Vec<StatementLine>,
    pub liabilities: Vec<StatementLine>,
    pub equity: Vec<StatementLine>,
    pub net_income: Decimal,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    /// Equity accounts plus net income not yet closed.
    pub total_equity: Decimal,
}

impl BalanceSheet {
    pub fn is_balanced(&self) -> bool {
        self.total_assets == self.total_liabilities + self.total_equity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncomeStatement {
    pub from: Option<Date>,
    pub to: Option<Date>,
    pub revenue: Vec<StatementLine>,
    pub expenses: Vec<StatementLine>,
    pub total_revenue: Decimal,
    pub total_expenses: Decimal,
    pub net_income: Decimal,
}

fn section(
    accounts: &[Account],
    net: &HashMap<Arc<str>, Decimal>,
    account_type: AccountType,
) -> (Vec<StatementLine>, Decimal) {
    let mut total = Decimal::ZERO;
    let lines = accounts
        .iter()
        .filter(|a| a.account_type == account_type && !a.is_group)
        .filter_map(|a| {
            let amount = account_type.natural(net.get(&a.id).copied().unwrap_or(Decimal::ZERO));
            if amount.is_zero() {
                return None;
            }
            total += amount;
            Some(StatementLine {
                account_id: a.id.clone(),
                code: a.code.clone(),
                name: a.name.clone(),
                amount,
            })
        })
        .collect();
    (lines, total)
}

impl Books {
    pub fn balance_sheet(&self, as_of: Option<Date>) -> Result<BalanceSheet, BooksError> {
        let net = self.net_by_account(Bound::Unbounded, upto(as_of), false)?;
        let accounts = self.accounts()?;

        let (assets, total_assets) = section(&accounts, &net, AccountType::Asset);
        let (liabilities, total_liabilities) = section(&accounts, &net, AccountType::Liability);
        let (equity, equity_accounts) = section(&accounts, &net, AccountType::Equity);
        let (_, revenue) = section(&accounts, &net, AccountType::Revenue);
        let (_, expenses) = section(&accounts, &net, AccountType::Expense);
        let net_income = revenue - expenses;

        Ok(BalanceSheet {
            as_of,
            assets,
            liabilities,
            equity,
            net_income,
            total_assets,
            total_liabilities,
            total_equity: equity_accounts + net_income,
        })
    }

    /// Revenue and expenses for the range. Year-end closing entries are left
    /// out so a closed year still reports its result.
    pub fn income_statement(&self, from: Option<Date>, to: Option<Date>) -> Result<IncomeStatement, BooksError> {
        let net = self.net_by_account(from.map_or(Bound::Unbounded, Bound::Included), upto(to), true)?;
        let accounts = self.accounts()?;

        let (revenue, total_revenue) = section(&accounts, &net, AccountType::Revenue);
        let (expenses, total_expenses) = section(&accounts, &net, AccountType::Expense);

        Ok(IncomeStatement {
            from,
            to,
            revenue,
            expenses,
            total_revenue,
            total_expenses,
            net_income: total_revenue - total_expenses,
        })
    }
}

fn add_section(table: &mut Table, title: &str, lines: &[StatementLine], total: Decimal) {
    table.add_row(row![title, "", ""]);
    for l in lines {
        table.add_row(row![l.code, l.name, l.amount]);
    }
    table.add_row(row!["", format!("Total {}", title.to_lowercase()), total]);
    table.add_empty_row();
}

impl Display for BalanceSheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        add_section(&mut table, "Assets", &self.assets, self.total_assets);
        add_section(&mut table, "Liabilities", &self.liabilities, self.total_liabilities);
        table.add_row(row!["Equity", "", ""]);
        for l in &self.equity {
            table.add_row(row![l.code, l.name, l.amount]);
        }
        table.add_row(row!["", "Net income", self.net_income]);
        table.add_row(row!["", "Total equity", self.total_equity]);
        write!(f, "{}", table)
    }
}

impl Display for IncomeStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        add_section(&mut table, "Revenue", &self.revenue, self.total_revenue);
        add_section(&mut table, "Expenses", &self.expenses, self.total_expenses);
        table.add_row(row!["", "Net income", self.net_income]);
        write!(f, "{}", table)
    }
}
