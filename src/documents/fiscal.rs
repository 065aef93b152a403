use std::{collections::HashMap, ops::Bound};

use rust_decimal::Decimal;
use serde::Serialize;
use time::{Date, Month};

use tripro_core::{JournalEntry, JournalLine, NewJournalEntry, SystemAccount};

use crate::{books::Books, error::BooksError, reports::CLOSING_PREFIX};

#[derive(Debug, Clone, Serialize)]
pub struct FiscalYearClosing {
    pub year: i32,
    pub net_income: Decimal,
    /// Absent when no revenue or expense account carried a balance.
    pub journal: Option<JournalEntry>,
}

impl Books {
    /// Zeroes every revenue and expense account into retained earnings as of
    /// 31 December and locks the year.
    pub fn close_fiscal_year(&self, year: i32) -> Result<FiscalYearClosing, BooksError> {
        let year_end = Date::from_calendar_date(year, Month::December, 31)
            .map_err(|e| BooksError::InvalidState(format!("invalid fiscal year {}: {}", year, e)))?;
        let reference = format!("{}{}", CLOSING_PREFIX, year);
        if self.storage().find_journal_by_reference(&reference)?.is_some() {
            return Err(BooksError::YearAlreadyClosed(year));
        }
        if let Some(closed) = self.settings()?.last_closed_date {
            if closed >= year_end {
                return Err(BooksError::YearAlreadyClosed(year));
            }
        }

        let types: HashMap<_, _> = self
            .accounts()?
            .into_iter()
            .map(|a| (a.id, a.account_type))
            .collect();
        // Earlier closings already zeroed prior years, so the all-time net
        // through year end is this year's result.
        let mut nets: Vec<_> = self
            .net_by_account(Bound::Unbounded, Bound::Included(year_end), false)?
            .into_iter()
            .filter(|(id, net)| {
                !net.is_zero() && types.get(id).map_or(false, |t| t.is_profit_and_loss())
            })
            .collect();
        nets.sort_by(|a, b| a.0.cmp(&b.0));

        let mut lines = Vec::with_capacity(nets.len() + 1);
        let mut total = Decimal::ZERO;
        for (account_id, net) in &nets {
            total += *net;
            if *net > Decimal::ZERO {
                lines.push(JournalLine::credit(account_id, *net));
            } else {
                lines.push(JournalLine::debit(account_id, -*net));
            }
        }
        let net_income = -total;

        self.atomic(|books| {
            let journal = if lines.is_empty() {
                None
            } else {
                let retained = books.system_account(SystemAccount::RetainedEarnings)?;
                if net_income > Decimal::ZERO {
                    lines.push(JournalLine::credit(&retained, net_income));
                } else if net_income < Decimal::ZERO {
                    lines.push(JournalLine::debit(&retained, -net_income));
                }
                Some(books.post_entry(
                    NewJournalEntry::new(year_end, &format!("Closing of fiscal year {}", year), lines)
                        .with_reference(reference.as_str()),
                )?)
            };

            let mut settings = books.settings()?;
            settings.last_closed_date = Some(year_end);
            books.storage().put_settings(&settings)?;
            tracing::info!(year, %net_income, "fiscal year closed");
            Ok(FiscalYearClosing {
                year,
                net_income,
                journal,
            })
        })
    }
}
