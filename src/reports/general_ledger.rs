use std::{fmt::Display, ops::Bound, sync::Arc};

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;
use uuid::Uuid;

use crate::{books::Books, error::BooksError};

use super::upto;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralLedgerRow {
    pub journal_id: Uuid,
    pub sequence: u64,
    pub date: Date,
    pub reference: Arc<str>,
    pub description: Arc<str>,
    pub account_id: Arc<str>,
    pub debit: Decimal,
    pub credit: Decimal,
    pub balance: Decimal,
}

/// Account statement over an account and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralLedger {
    pub account_id: Arc<str>,
    pub account_name: Arc<str>,
    pub from: Option<Date>,
    pub to: Option<Date>,
    pub opening_balance: Decimal,
    pub rows: Vec<GeneralLedgerRow>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub closing_balance: Decimal,
}

impl Books {
    /// Opening balance is everything posted before `from`; rows follow in
    /// (date, sequence) order with a running `debit - credit` balance.
    pub fn general_ledger(
        &self,
        account_id: &str,
        from: Option<Date>,
        to: Option<Date>,
    ) -> Result<GeneralLedger, BooksError> {
        let subtree = self.account_subtree(account_id)?;
        let root = &subtree[0];
        let ids: Vec<Arc<str>> = subtree.iter().map(|a| a.id.clone()).collect();

        let opening_balance: Decimal = match from {
            Some(from) => self
                .storage()
                .ledger_lines(&ids, Bound::Unbounded, Bound::Excluded(from))?
                .iter()
                .map(|l| l.net())
                .sum(),
            None => Decimal::ZERO,
        };

        let lines = self
            .storage()
            .ledger_lines(&ids, from.map_or(Bound::Unbounded, Bound::Included), upto(to))?;

        let mut balance = opening_balance;
        let mut total_debit = Decimal::ZERO;
        let mut total_credit = Decimal::ZERO;
        let rows = lines
            .into_iter()
            .map(|line| {
                balance += line.net();
                total_debit += line.debit;
                total_credit += line.credit;
                GeneralLedgerRow {
                    journal_id: line.journal_id,
                    sequence: line.sequence,
                    date: line.date,
                    reference: line.reference,
                    description: line.description,
                    account_id: line.account_id,
                    debit: line.debit,
                    credit: line.credit,
                    balance,
                }
            })
            .collect();

        Ok(GeneralLedger {
            account_id: root.id.clone(),
            account_name: root.name.clone(),
            from,
            to,
            opening_balance,
            rows,
            total_debit,
            total_credit,
            closing_balance: balance,
        })
    }
}

impl Display for GeneralLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Date", "Reference", "Description", "Debit", "Credit", "Balance"]);
        table.add_empty_row();
        table.add_row(row!["", "", "Opening balance", "", "", self.opening_balance]);
        for r in &self.rows {
            table.add_row(row![r.date, r.reference, r.description, r.debit, r.credit, r.balance]);
        }
        table.add_row(row![
            "",
            "",
            "Closing balance",
            self.total_debit,
            self.total_credit,
            self.closing_balance
        ]);
        write!(f, "{} ({})\n{}", self.account_name, self.account_id, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::date;
    use tripro_core::{Account, AccountType, JournalLine, NewJournalEntry};
    use tripro_memory::InMemoryStorage;

    fn books() -> Books {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        let s = books.storage();
        s.create_account(&Account::new("cash-group", "123", "Cash and banks", AccountType::Asset).group())
            .unwrap();
        s.create_account(&Account::new("box", "1231", "Cash box", AccountType::Asset).under("cash-group"))
            .unwrap();
        s.create_account(&Account::new("bank", "1232", "Bank", AccountType::Asset).under("cash-group"))
            .unwrap();
        s.create_account(&Account::new("sales", "411", "Sales", AccountType::Revenue)).unwrap();
        books
    }

    fn post(books: &Books, date: Date, account: &str, amount: Decimal) {
        books
            .post_entry(NewJournalEntry::new(
                date,
                "sale",
                vec![
                    JournalLine::debit(account, amount),
                    JournalLine::credit("sales", amount),
                ],
            ))
            .unwrap();
    }

    #[test]
    fn running_balance_covers_descendants() {
        let books = books();
        post(&books, date!(2024 - 01 - 10), "box", dec!(100));
        post(&books, date!(2024 - 02 - 05), "bank", dec!(40));
        post(&books, date!(2024 - 02 - 05), "box", dec!(10));
        post(&books, date!(2024 - 03 - 01), "bank", dec!(5));

        let gl = books
            .general_ledger("cash-group", Some(date!(2024 - 02 - 01)), Some(date!(2024 - 02 - 28)))
            .unwrap();
        assert_eq!(gl.opening_balance, dec!(100));
        assert_eq!(gl.rows.len(), 2);
        assert_eq!(&*gl.rows[0].account_id, "bank");
        assert_eq!(gl.rows[0].balance, dec!(140));
        assert_eq!(gl.rows[1].balance, dec!(150));
        assert_eq!(gl.closing_balance, dec!(150));
        assert_eq!(gl.total_debit, dec!(50));
    }

    #[test]
    fn credit_side_accounts_run_negative() {
        let books = books();
        post(&books, date!(2024 - 01 - 10), "box", dec!(100));
        let gl = books.general_ledger("sales", None, None).unwrap();
        assert_eq!(gl.opening_balance, Decimal::ZERO);
        assert_eq!(gl.closing_balance, dec!(-100));
        assert!(gl.to_string().contains("Closing balance"));
    }

    #[test]
    fn unknown_account_is_not_found() {
        assert!(books().general_ledger("ghost", None, None).unwrap_err().is_not_found());
    }
}
