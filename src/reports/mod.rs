//! Reports computed from posted, live ledger lines.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    ops::Bound,
    sync::Arc,
};

use rust_decimal::Decimal;
use time::Date;

use tripro_core::Account;

use crate::{books::Books, error::BooksError};

mod aging;
mod cash_flow;
mod general_ledger;
mod statements;
mod trial_balance;

pub use aging::{AgingBuckets, AgingReport, AgingRow};
pub use cash_flow::{CashFlowLine, CashFlowStatement, CASH_CODE_PREFIX};
pub use general_ledger::{GeneralLedger, GeneralLedgerRow};
pub use statements::{BalanceSheet, IncomeStatement, StatementLine};
pub use trial_balance::{AccountNode, AccountTreeView, TrialBalance, TrialBalanceRow};

/// Journals with this reference prefix carry year-end closing postings.
pub const CLOSING_PREFIX: &str = "CLOSE-";

pub(crate) fn upto(date: Option<Date>) -> Bound<Date> {
    date.map_or(Bound::Unbounded, Bound::Included)
}

impl Books {
    /// `debit - credit` per account over posted lines in the range.
    pub(crate) fn net_by_account(
        &self,
        from: Bound<Date>,
        to: Bound<Date>,
        skip_closing: bool,
    ) -> Result<HashMap<Arc<str>, Decimal>, BooksError> {
        let mut totals: HashMap<Arc<str>, Decimal> = HashMap::new();
        for line in self.storage().ledger_lines(&[], from, to)? {
            if skip_closing && line.reference.starts_with(CLOSING_PREFIX) {
                continue;
            }
            *totals.entry(line.account_id.clone()).or_insert(Decimal::ZERO) += line.net();
        }
        Ok(totals)
    }

    /// The account and every live descendant, breadth first.
    pub fn account_subtree(&self, id: &str) -> Result<Vec<Account>, BooksError> {
        let root = self.account(id)?;
        let accounts = self.accounts()?;
        let mut children: HashMap<&str, Vec<&Account>> = HashMap::new();
        for account in &accounts {
            if let Some(parent) = account.parent_id.as_deref() {
                children.entry(parent).or_default().push(account);
            }
        }

        let mut seen: HashSet<Arc<str>> = HashSet::new();
        seen.insert(root.id.clone());
        let mut queue = VecDeque::from([root.id.clone()]);
        let mut found = vec![root];
        while let Some(current) = queue.pop_front() {
            for child in children.get(current.as_ref()).into_iter().flatten() {
                if seen.insert(child.id.clone()) {
                    queue.push_back(child.id.clone());
                    found.push((*child).clone());
                }
            }
        }
        Ok(found)
    }
}
