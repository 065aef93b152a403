use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    ops::Bound,
    sync::Arc,
};

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;
use uuid::Uuid;

use tripro_core::{models::records::FixedAsset, Account, AccountType, SubType, SystemAccount};

use crate::{books::Books, error::BooksError};

use super::{upto, CLOSING_PREFIX};

/// Treasury accounts (cash on hand and banks) share this code prefix.
pub const CASH_CODE_PREFIX: &str = "123";

/// A non-cash account's movement, signed as its effect on cash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashFlowLine {
    pub account_id: Arc<str>,
    pub code: Arc<str>,
    pub name: Arc<str>,
    pub amount: Decimal,
}

/// Indirect-method cash flow for a period. Operating activity starts from
/// net income and adds back non-cash charges and working-capital changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashFlowStatement {
    pub from: Option<Date>,
    pub to: Option<Date>,
    pub net_income: Decimal,
    pub operating: Vec<CashFlowLine>,
    pub investing: Vec<CashFlowLine>,
    pub financing: Vec<CashFlowLine>,
    /// Net income plus the operating lines.
    pub total_operating: Decimal,
    pub total_investing: Decimal,
    pub total_financing: Decimal,
    pub net_change: Decimal,
    pub opening_cash: Decimal,
    pub closing_cash: Decimal,
    /// Money into and out of treasury accounts, transfers between them left
    /// out.
    pub cash_received: Decimal,
    pub cash_paid: Decimal,
}

enum Activity {
    Cash,
    Income,
    Operating,
    Investing,
    Financing,
}

impl Books {
    /// Postable asset accounts under the treasury code prefix, plus the
    /// mapped cash account wherever it sits.
    pub fn cash_accounts(&self) -> Result<Vec<Account>, BooksError> {
        let cash = match self.system_account(SystemAccount::Cash) {
            Ok(id) => Some(id),
            Err(BooksError::MissingSystemAccount(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(self
            .accounts()?
            .into_iter()
            .filter(|a| a.account_type == AccountType::Asset && !a.is_group)
            .filter(|a| a.code.starts_with(CASH_CODE_PREFIX) || cash.as_ref() == Some(&a.id))
            .collect())
    }

    pub fn cash_flow_statement(&self, from: Option<Date>, to: Option<Date>) -> Result<CashFlowStatement, BooksError> {
        let start = from.map_or(Bound::Unbounded, Bound::Included);
        let net = self.net_by_account(start, upto(to), true)?;
        let cash: HashSet<Arc<str>> = self.cash_accounts()?.into_iter().map(|a| a.id).collect();

        let assets = self.records::<FixedAsset>()?;
        let fixed: HashSet<Arc<str>> = assets.iter().map(|a| a.asset_account_id.clone()).collect();
        let mut contra: HashSet<Arc<str>> = assets
            .iter()
            .filter_map(|a| a.accumulated_depreciation_account_id.clone())
            .collect();
        match self.system_account(SystemAccount::AccumulatedDepreciation) {
            Ok(id) => {
                contra.insert(id);
            }
            Err(BooksError::MissingSystemAccount(_)) => {}
            Err(e) => return Err(e),
        }

        let classify = |account: &Account| {
            if cash.contains(&account.id) {
                return Activity::Cash;
            }
            match account.account_type {
                AccountType::Revenue | AccountType::Expense => Activity::Income,
                AccountType::Asset if contra.contains(&account.id) => Activity::Operating,
                AccountType::Asset
                    if fixed.contains(&account.id) || account.sub_type == Some(SubType::NonCurrent) =>
                {
                    Activity::Investing
                }
                AccountType::Asset => Activity::Operating,
                AccountType::Liability if account.sub_type == Some(SubType::NonCurrent) => Activity::Financing,
                AccountType::Liability => Activity::Operating,
                AccountType::Equity => Activity::Financing,
            }
        };

        let mut accounts = self.accounts()?;
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        let mut net_income = Decimal::ZERO;
        let (mut operating, mut investing, mut financing) = (Vec::new(), Vec::new(), Vec::new());
        for account in &accounts {
            let movement = net.get(&account.id).copied().unwrap_or(Decimal::ZERO);
            if movement.is_zero() {
                continue;
            }
            let line = || CashFlowLine {
                account_id: account.id.clone(),
                code: account.code.clone(),
                name: account.name.clone(),
                amount: -movement,
            };
            match classify(account) {
                Activity::Cash => {}
                Activity::Income => net_income -= movement,
                Activity::Operating => operating.push(line()),
                Activity::Investing => investing.push(line()),
                Activity::Financing => financing.push(line()),
            }
        }

        let sum = |lines: &[CashFlowLine]| lines.iter().map(|l| l.amount).sum::<Decimal>();
        let total_operating = net_income + sum(&operating);
        let total_investing = sum(&investing);
        let total_financing = sum(&financing);
        let net_change = total_operating + total_investing + total_financing;

        let mut opening_cash = Decimal::ZERO;
        if let Some(from) = from {
            for id in &cash {
                opening_cash += self.storage().get_balance(id, Bound::Excluded(from))?;
            }
        }

        let (cash_received, cash_paid) = self.cash_movements(&cash, start, upto(to))?;

        Ok(CashFlowStatement {
            from,
            to,
            net_income,
            operating,
            investing,
            financing,
            total_operating,
            total_investing,
            total_financing,
            net_change,
            opening_cash,
            closing_cash: opening_cash + net_change,
            cash_received,
            cash_paid,
        })
    }

    /// Per journal, the net effect on treasury accounts. Journals touching
    /// nothing but treasury accounts are internal and skipped.
    fn cash_movements(
        &self,
        cash: &HashSet<Arc<str>>,
        from: Bound<Date>,
        to: Bound<Date>,
    ) -> Result<(Decimal, Decimal), BooksError> {
        let mut journals: HashMap<Uuid, (Decimal, bool)> = HashMap::new();
        for line in self.storage().ledger_lines(&[], from, to)? {
            if line.reference.starts_with(CLOSING_PREFIX) {
                continue;
            }
            let entry = journals.entry(line.journal_id).or_insert((Decimal::ZERO, false));
            if cash.contains(&line.account_id) {
                entry.0 += line.net();
            } else {
                entry.1 = true;
            }
        }

        let (mut received, mut paid) = (Decimal::ZERO, Decimal::ZERO);
        for (cash_net, external) in journals.into_values() {
            if !external {
                continue;
            }
            if cash_net > Decimal::ZERO {
                received += cash_net;
            } else {
                paid -= cash_net;
            }
        }
        Ok((received, paid))
    }
}

fn add_activity(table: &mut Table, title: &str, lines: &[CashFlowLine], total: Decimal) {
    table.add_row(row![title, "", ""]);
    for l in lines {
        table.add_row(row![l.code, l.name, l.amount]);
    }
    table.add_row(row!["", format!("Net cash from {}", title.to_lowercase()), total]);
    table.add_empty_row();
}

impl Display for CashFlowStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Operating", "", ""]);
        table.add_row(row!["", "Net income", self.net_income]);
        for l in &self.operating {
            table.add_row(row![l.code, l.name, l.amount]);
        }
        table.add_row(row!["", "Net cash from operating", self.total_operating]);
        table.add_empty_row();
        add_activity(&mut table, "Investing", &self.investing, self.total_investing);
        add_activity(&mut table, "Financing", &self.financing, self.total_financing);
        table.add_row(row!["", "Net change in cash", self.net_change]);
        table.add_row(row!["", "Opening cash", self.opening_cash]);
        table.add_row(row!["", "Closing cash", self.closing_cash]);
        write!(f, "{}", table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::date;
    use tripro_core::{JournalLine, NewJournalEntry};
    use tripro_memory::InMemoryStorage;

    use crate::validation::{AssetInput, ExpenseInput, TransferInput};

    fn books() -> Books {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        books.install_default_chart().unwrap();
        let s = books.storage();
        s.create_account(&Account::new("1232", "1232", "Bank", AccountType::Asset).under("1"))
            .unwrap();
        s.create_account(&Account::new("vehicles", "111", "Vehicles", AccountType::Asset).under("1"))
            .unwrap();
        let mut loan = Account::new("loan", "221", "Bank loan", AccountType::Liability).under("2");
        loan.sub_type = Some(SubType::NonCurrent);
        s.create_account(&loan).unwrap();
        books
    }

    fn post(books: &Books, date: Date, debit: &str, credit: &str, amount: Decimal) {
        books
            .post_entry(NewJournalEntry::new(
                date,
                "entry",
                vec![JournalLine::debit(debit, amount), JournalLine::credit(credit, amount)],
            ))
            .unwrap();
    }

    #[test]
    fn activities_explain_the_change_in_cash() {
        let books = books();
        post(&books, date!(2024 - 01 - 02), "1231", "3999", dec!(10000));
        post(&books, date!(2024 - 02 - 10), "1231", "411", dec!(3000));
        books
            .record_expense(ExpenseInput {
                amount: dec!(500),
                date: date!(2024 - 02 - 20),
                treasury_account_id: "1231".to_string(),
                expense_account_id: "541".to_string(),
                description: None,
            })
            .unwrap();
        let asset = books
            .register_asset(AssetInput {
                name: "Delivery van".to_string(),
                purchase_date: date!(2024 - 03 - 01),
                purchase_cost: dec!(6000),
                salvage_value: Decimal::ZERO,
                useful_life_years: dec!(5),
                asset_account_id: "vehicles".to_string(),
                accumulated_depreciation_account_id: None,
                depreciation_expense_account_id: None,
                payment_account_id: Some("1231".to_string()),
                post_purchase_entry: true,
            })
            .unwrap()
            .asset;
        books.depreciate_asset(asset.id, date!(2024 - 03 - 31)).unwrap();
        post(&books, date!(2024 - 04 - 05), "10201", "411", dec!(1000));
        post(&books, date!(2024 - 05 - 01), "1231", "loan", dec!(2000));
        books
            .transfer_funds(TransferInput {
                amount: dec!(1500),
                date: date!(2024 - 05 - 02),
                source_account_id: "1231".to_string(),
                destination_account_id: "1232".to_string(),
                description: None,
            })
            .unwrap();

        let cf = books
            .cash_flow_statement(Some(date!(2024 - 02 - 01)), Some(date!(2024 - 12 - 31)))
            .unwrap();
        assert_eq!(cf.net_income, dec!(3400));
        let operating: Vec<(&str, Decimal)> = cf.operating.iter().map(|l| (l.code.as_ref(), l.amount)).collect();
        assert_eq!(operating, vec![("10201", dec!(-1000)), ("1119", dec!(100))]);
        assert_eq!(cf.total_operating, dec!(2500));
        assert_eq!(cf.total_investing, dec!(-6000));
        assert_eq!(cf.total_financing, dec!(2000));
        assert_eq!(cf.net_change, dec!(-1500));
        assert_eq!(cf.opening_cash, dec!(10000));
        assert_eq!(cf.closing_cash, dec!(8500));
        assert_eq!(cf.cash_received, dec!(5000));
        assert_eq!(cf.cash_paid, dec!(6500));

        let closing: Decimal = ["1231", "1232"]
            .iter()
            .map(|id| books.storage().get_balance(id, Bound::Unbounded).unwrap())
            .sum();
        assert_eq!(closing, cf.closing_cash);
        assert!(cf.to_string().contains("Net change in cash"));
    }

    #[test]
    fn whole_history_starts_from_zero() {
        let books = books();
        post(&books, date!(2024 - 01 - 02), "1231", "3999", dec!(750));
        let cf = books.cash_flow_statement(None, None).unwrap();
        assert_eq!(cf.opening_cash, Decimal::ZERO);
        assert_eq!(cf.financing.len(), 1);
        assert_eq!(cf.closing_cash, dec!(750));
    }
}
