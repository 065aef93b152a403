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

use tripro_core::{Account, AccountType};

use crate::{books::Books, error::BooksError};

use super::upto;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialBalanceRow {
    pub account_id: Arc<str>,
    pub code: Arc<str>,
    pub name: Arc<str>,
    pub account_type: AccountType,
    pub debit: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialBalance {
    pub as_of: Option<Date>,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

impl TrialBalance {
    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }
}

/// One account in the rolled-up chart. `own_balance` counts postings to the
/// account itself, `balance` adds every descendant. Both are `debit - credit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountNode {
    pub account: Account,
    pub own_balance: Decimal,
    pub balance: Decimal,
    pub children: Vec<AccountNode>,
}

impl AccountNode {
    pub fn natural_balance(&self) -> Decimal {
        self.account.account_type.natural(self.balance)
    }

    fn render(&self, depth: usize, table: &mut Table) {
        let name = format!("{}{}", "  ".repeat(depth), self.account.name);
        table.add_row(row![self.account.code, name, self.own_balance, self.balance]);
        for child in &self.children {
            child.render(depth + 1, table);
        }
    }
}

impl Books {
    /// Balances of postable accounts as of a date. Zero balances are left out.
    pub fn trial_balance(&self, as_of: Option<Date>) -> Result<TrialBalance, BooksError> {
        let net = self.net_by_account(Bound::Unbounded, upto(as_of), false)?;

        let mut rows = Vec::new();
        let mut total_debit = Decimal::ZERO;
        let mut total_credit = Decimal::ZERO;
        for account in self.accounts()?.into_iter().filter(|a| !a.is_group) {
            let balance = net.get(&account.id).copied().unwrap_or(Decimal::ZERO);
            if balance.is_zero() {
                continue;
            }
            let (debit, credit) = if balance > Decimal::ZERO {
                (balance, Decimal::ZERO)
            } else {
                (Decimal::ZERO, -balance)
            };
            total_debit += debit;
            total_credit += credit;
            rows.push(TrialBalanceRow {
                account_id: account.id,
                code: account.code,
                name: account.name,
                account_type: account.account_type,
                debit,
                credit,
            });
        }

        tracing::debug!(rows = rows.len(), %total_debit, %total_credit, "trial balance computed");
        Ok(TrialBalance {
            as_of,
            rows,
            total_debit,
            total_credit,
        })
    }

    /// The chart as a tree with balances summed into parent groups.
    pub fn account_tree(&self, as_of: Option<Date>) -> Result<Vec<AccountNode>, BooksError> {
        let net = self.net_by_account(Bound::Unbounded, upto(as_of), false)?;
        let accounts = self.accounts()?;
        let ids: HashSet<&str> = accounts.iter().map(|a| a.id.as_ref()).collect();

        let mut children: HashMap<&str, Vec<&Account>> = HashMap::new();
        let mut roots = Vec::new();
        for account in &accounts {
            match account.parent_id.as_deref() {
                Some(parent) if ids.contains(parent) => children.entry(parent).or_default().push(account),
                _ => roots.push(account),
            }
        }

        let mut visited = HashSet::new();
        Ok(roots
            .into_iter()
            .map(|root| build_node(root, &children, &net, &mut visited))
            .collect())
    }
}

fn build_node<'a>(
    account: &'a Account,
    children: &HashMap<&str, Vec<&'a Account>>,
    net: &HashMap<Arc<str>, Decimal>,
    visited: &mut HashSet<&'a str>,
) -> AccountNode {
    visited.insert(account.id.as_ref());
    let own_balance = net.get(&account.id).copied().unwrap_or(Decimal::ZERO);
    let mut nodes = Vec::new();
    for child in children.get(account.id.as_ref()).into_iter().flatten() {
        if !visited.contains(child.id.as_ref()) {
            nodes.push(build_node(child, children, net, visited));
        }
    }
    let balance = own_balance + nodes.iter().map(|n| n.balance).sum::<Decimal>();
    AccountNode {
        account: account.clone(),
        own_balance,
        balance,
        children: nodes,
    }
}

impl Display for TrialBalance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Code", "Account", "Debit", "Credit"]);
        table.add_empty_row();
        for r in &self.rows {
            let debit = if r.debit.is_zero() { String::new() } else { r.debit.to_string() };
            let credit = if r.credit.is_zero() { String::new() } else { r.credit.to_string() };
            table.add_row(row![r.code, r.name, debit, credit]);
        }
        table.add_row(row!["", "Total", self.total_debit, self.total_credit]);
        match self.as_of {
            Some(date) => write!(f, "Trial balance as of {}\n{}", date, table),
            None => write!(f, "Trial balance\n{}", table),
        }
    }
}

/// Renders a forest of account nodes as one indented table.
pub struct AccountTreeView<'a>(pub &'a [AccountNode]);

impl Display for AccountTreeView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Code", "Account", "Own", "Total"]);
        table.add_empty_row();
        for node in self.0 {
            node.render(0, &mut table);
        }
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

    fn books() -> Books {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        let s = books.storage();
        s.create_account(&Account::new("assets", "1", "Assets", AccountType::Asset).group()).unwrap();
        s.create_account(&Account::new("cash", "1231", "Cash", AccountType::Asset).under("assets")).unwrap();
        s.create_account(&Account::new("bank", "1232", "Bank", AccountType::Asset).under("assets")).unwrap();
        s.create_account(&Account::new("capital", "31", "Capital", AccountType::Equity)).unwrap();
        s.create_account(&Account::new("rent", "532", "Rent", AccountType::Expense)).unwrap();
        s.create_account(&Account::new("idle", "533", "Idle", AccountType::Expense)).unwrap();
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
    fn trial_balance_totals_match_and_skip_zero() {
        let books = books();
        post(&books, date!(2024 - 01 - 01), "cash", "capital", dec!(1000));
        post(&books, date!(2024 - 01 - 15), "rent", "cash", dec!(300));
        post(&books, date!(2024 - 02 - 01), "bank", "cash", dec!(200));

        let tb = books.trial_balance(None).unwrap();
        assert!(tb.is_balanced());
        assert_eq!(tb.total_debit, dec!(1000));
        let codes: Vec<&str> = tb.rows.iter().map(|r| r.code.as_ref()).collect();
        assert_eq!(codes, vec!["1231", "1232", "31", "532"]);
        let capital = tb.rows.iter().find(|r| &*r.account_id == "capital").unwrap();
        assert_eq!(capital.credit, dec!(1000));

        let early = books.trial_balance(Some(date!(2024 - 01 - 10))).unwrap();
        assert_eq!(early.rows.len(), 2);
        assert!(early.to_string().contains("Trial balance as of 2024-01-10"));
    }

    #[test]
    fn overdrawn_asset_shows_on_credit_side() {
        let books = books();
        post(&books, date!(2024 - 01 - 01), "rent", "cash", dec!(50));
        let tb = books.trial_balance(None).unwrap();
        let cash = tb.rows.iter().find(|r| &*r.account_id == "cash").unwrap();
        assert_eq!(cash.debit, Decimal::ZERO);
        assert_eq!(cash.credit, dec!(50));
    }

    #[test]
    fn tree_rolls_children_into_groups() {
        let books = books();
        post(&books, date!(2024 - 01 - 01), "cash", "capital", dec!(1000));
        post(&books, date!(2024 - 02 - 01), "bank", "cash", dec!(200));

        let tree = books.account_tree(None).unwrap();
        let assets = tree.iter().find(|n| &*n.account.id == "assets").unwrap();
        assert_eq!(assets.own_balance, Decimal::ZERO);
        assert_eq!(assets.balance, dec!(1000));
        assert_eq!(assets.children.len(), 2);

        let capital = tree.iter().find(|n| &*n.account.id == "capital").unwrap();
        assert_eq!(capital.natural_balance(), dec!(1000));
        assert!(AccountTreeView(&tree).to_string().contains("  Bank"));
    }
}
