use std::{collections::BTreeMap, fmt::Display};

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;
use uuid::Uuid;

use tripro_core::models::records::{Customer, Invoice, InvoiceKind, InvoiceStatus, Supplier};

use crate::{books::Books, error::BooksError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AgingBuckets {
    pub days_0_30: Decimal,
    pub days_31_60: Decimal,
    pub days_61_90: Decimal,
    pub over_90: Decimal,
}

impl AgingBuckets {
    fn add(&mut self, days: i64, amount: Decimal) {
        match days {
            i64::MIN..=30 => self.days_0_30 += amount,
            31..=60 => self.days_31_60 += amount,
            61..=90 => self.days_61_90 += amount,
            _ => self.over_90 += amount,
        }
    }

    pub fn total(&self) -> Decimal {
        self.days_0_30 + self.days_31_60 + self.days_61_90 + self.over_90
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgingRow {
    pub party_id: Uuid,
    pub party_name: String,
    pub buckets: AgingBuckets,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgingReport {
    pub kind: InvoiceKind,
    pub as_of: Date,
    pub rows: Vec<AgingRow>,
    pub totals: AgingBuckets,
}

impl Books {
    /// Outstanding amounts of approved invoices by age in days since the
    /// invoice date. `kind` picks receivables (sales) or payables (purchase).
    pub fn aging(&self, kind: InvoiceKind, as_of: Date) -> Result<AgingReport, BooksError> {
        let names: BTreeMap<Uuid, String> = match kind {
            InvoiceKind::Sales => self
                .records::<Customer>()?
                .into_iter()
                .map(|c| (c.id, c.name))
                .collect(),
            InvoiceKind::Purchase => self
                .records::<Supplier>()?
                .into_iter()
                .map(|s| (s.id, s.name))
                .collect(),
        };

        let mut by_party: BTreeMap<Uuid, AgingBuckets> = BTreeMap::new();
        let mut totals = AgingBuckets::default();
        for invoice in self.records::<Invoice>()? {
            if invoice.kind != kind
                || !matches!(invoice.status, InvoiceStatus::Posted | InvoiceStatus::Partial)
                || invoice.date > as_of
            {
                continue;
            }
            let outstanding = invoice.outstanding();
            if outstanding <= Decimal::ZERO {
                continue;
            }
            let days = (as_of - invoice.date).whole_days();
            by_party.entry(invoice.party_id).or_default().add(days, outstanding);
            totals.add(days, outstanding);
        }

        let mut rows: Vec<AgingRow> = by_party
            .into_iter()
            .map(|(party_id, buckets)| AgingRow {
                party_id,
                party_name: names.get(&party_id).cloned().unwrap_or_else(|| party_id.to_string()),
                buckets,
            })
            .collect();
        rows.sort_by(|a, b| b.buckets.total().cmp(&a.buckets.total()));

        Ok(AgingReport {
            kind,
            as_of,
            rows,
            totals,
        })
    }
}

impl Display for AgingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Party", "0-30", "31-60", "61-90", "90+", "Total"]);
        table.add_empty_row();
        for r in &self.rows {
            let b = &r.buckets;
            table.add_row(row![r.party_name, b.days_0_30, b.days_31_60, b.days_61_90, b.over_90, b.total()]);
        }
        let t = &self.totals;
        table.add_row(row!["Total", t.days_0_30, t.days_31_60, t.days_61_90, t.over_90, t.total()]);
        write!(f, "Aging as of {}\n{}", self.as_of, table)
    }
}
