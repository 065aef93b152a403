use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;
use uuid::Uuid;

use tripro_core::{
    models::records::FixedAsset, AccountType, DocumentRef, JournalEntry, JournalLine,
    NewJournalEntry, RecordKind, SystemAccount,
};

use crate::{
    books::{document_number, money, today, Books},
    error::BooksError,
    validation::AssetInput,
};

/// Remaining depreciable values at or below this are treated as fully
/// depreciated.
const FULLY_DEPRECIATED: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

#[derive(Debug, Clone, Serialize)]
pub struct AssetRegistration {
    pub asset: FixedAsset,
    pub journal: Option<JournalEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedAsset {
    pub asset_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DepreciationRun {
    pub processed: Vec<JournalEntry>,
    pub skipped: Vec<SkippedAsset>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn month_key(date: Date) -> String {
    format!("{}-{:02}", date.year(), u8::from(date.month()))
}

impl Books {
    pub fn register_asset(&self, input: AssetInput) -> Result<AssetRegistration, BooksError> {
        input.validate(today())?;
        let asset_account = self.account(input.asset_account_id.trim())?;
        let accumulated = match non_empty(input.accumulated_depreciation_account_id) {
            Some(id) => Some(self.account(&id)?.id),
            None => None,
        };
        let expense = match non_empty(input.depreciation_expense_account_id) {
            Some(id) => Some(self.account(&id)?.id),
            None => None,
        };

        let asset = FixedAsset {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            purchase_date: input.purchase_date,
            purchase_cost: money(input.purchase_cost),
            salvage_value: money(input.salvage_value),
            useful_life_years: input.useful_life_years,
            asset_account_id: asset_account.id.clone(),
            accumulated_depreciation_account_id: accumulated,
            depreciation_expense_account_id: expense,
            total_depreciation: Decimal::ZERO,
            last_depreciation_date: None,
        };

        self.atomic(|books| {
            books.save(&asset)?;
            let journal = if input.post_purchase_entry {
                let counter = match non_empty(input.payment_account_id.clone()) {
                    Some(id) => books.account(&id)?.id,
                    None => books.system_account(SystemAccount::OpeningBalances)?,
                };
                Some(books.post_entry(
                    NewJournalEntry::new(
                        asset.purchase_date,
                        &format!("Asset purchase - {}", asset.name),
                        vec![
                            JournalLine::debit(&asset.asset_account_id, asset.purchase_cost),
                            JournalLine::credit(&counter, asset.purchase_cost),
                        ],
                    )
                    .with_reference(document_number("AST"))
                    .for_document(DocumentRef {
                        kind: RecordKind::FixedAsset,
                        id: asset.id,
                    }),
                )?)
            } else {
                None
            };
            tracing::info!(id = %asset.id, name = %asset.name, cost = %asset.purchase_cost, "asset registered");
            Ok(AssetRegistration {
                asset: asset.clone(),
                journal,
            })
        })
    }

    /// Monthly straight-line charge, capped so the book value never drops
    /// below salvage. One charge per asset per calendar month, and months
    /// are charged in order: nothing at or before the last charged month.
    pub fn depreciate_asset(&self, id: Uuid, date: Date) -> Result<JournalEntry, BooksError> {
        let mut asset: FixedAsset = self.record(id)?;
        let remaining = asset.remaining_depreciable();
        if remaining <= FULLY_DEPRECIATED {
            return Err(BooksError::FullyDepreciated(id));
        }
        if let Some(last) = asset.last_depreciation_date {
            if (date.year(), u8::from(date.month())) <= (last.year(), u8::from(last.month())) {
                return Err(BooksError::AlreadyDepreciated(id, month_key(date)));
            }
        }
        if date < asset.purchase_date {
            return Err(BooksError::InvalidState(format!(
                "asset {} was purchased after {}",
                asset.name, date
            )));
        }
        if asset.useful_life_years <= Decimal::ZERO {
            return Err(BooksError::InvalidState(format!(
                "asset {} has no useful life",
                asset.name
            )));
        }

        let monthly = money(
            (asset.purchase_cost - asset.salvage_value) / (asset.useful_life_years * Decimal::from(12)),
        );
        let amount = monthly.min(money(remaining));

        self.atomic(|books| {
            let expense = match &asset.depreciation_expense_account_id {
                Some(id) => id.clone(),
                None => books.system_account(SystemAccount::DepreciationExpense)?,
            };
            let accumulated = match &asset.accumulated_depreciation_account_id {
                Some(id) => id.clone(),
                None => books.system_account(SystemAccount::AccumulatedDepreciation)?,
            };
            let journal = books.post_entry(
                NewJournalEntry::new(
                    date,
                    &format!("Depreciation {} - {}", month_key(date), asset.name),
                    vec![
                        JournalLine::debit(&expense, amount),
                        JournalLine::credit(&accumulated, amount),
                    ],
                )
                .with_reference(document_number("DEP"))
                .for_document(DocumentRef {
                    kind: RecordKind::FixedAsset,
                    id: asset.id,
                }),
            )?;
            asset.total_depreciation += amount;
            asset.last_depreciation_date = Some(date);
            books.save(&asset)?;
            tracing::info!(id = %asset.id, %amount, book_value = %asset.current_value(), "asset depreciated");
            Ok(journal)
        })
    }

    /// Depreciates every asset for the month of `date`, one transaction per
    /// asset. Assets that cannot be charged are reported, not failed.
    pub fn run_depreciation(&self, date: Date) -> Result<DepreciationRun, BooksError> {
        let mut run = DepreciationRun::default();
        for asset in self.records::<FixedAsset>()? {
            if asset.purchase_date > date {
                continue;
            }
            match self.depreciate_asset(asset.id, date) {
                Ok(journal) => run.processed.push(journal),
                Err(
                    e @ (BooksError::FullyDepreciated(_)
                    | BooksError::AlreadyDepreciated(..)
                    | BooksError::InvalidState(_)),
                ) => run.skipped.push(SkippedAsset {
                    asset_id: asset.id,
                    reason: e.to_string(),
                }),
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            processed = run.processed.len(),
            skipped = run.skipped.len(),
            "depreciation run finished"
        );
        Ok(run)
    }

    /// Books the difference between `new_value` and the current book value
    /// against `counter_account_id` and moves the cost basis by the same
    /// amount.
    pub fn revalue_asset(
        &self,
        id: Uuid,
        new_value: Decimal,
        date: Date,
        counter_account_id: &str,
    ) -> Result<JournalEntry, BooksError> {
        let mut asset: FixedAsset = self.record(id)?;
        let counter = self.account(counter_account_id)?;
        if !matches!(
            counter.account_type,
            AccountType::Revenue | AccountType::Equity | AccountType::Expense
        ) {
            return Err(BooksError::InvalidState(
                "revaluation must be booked against revenue, equity or expense".to_string(),
            ));
        }
        let new_value = money(new_value);
        if new_value < Decimal::ZERO {
            return Err(BooksError::InvalidState("asset value cannot be negative".to_string()));
        }
        let difference = new_value - asset.current_value();
        if difference.is_zero() {
            return Err(BooksError::InvalidState("new value equals the book value".to_string()));
        }

        let amount = difference.abs();
        let lines = if difference > Decimal::ZERO {
            vec![
                JournalLine::debit(&asset.asset_account_id, amount),
                JournalLine::credit(&counter.id, amount),
            ]
        } else {
            vec![
                JournalLine::debit(&counter.id, amount),
                JournalLine::credit(&asset.asset_account_id, amount),
            ]
        };

        self.atomic(|books| {
            let journal = books.post_entry(
                NewJournalEntry::new(date, &format!("Asset revaluation - {}", asset.name), lines)
                    .with_reference(document_number("REV"))
                    .for_document(DocumentRef {
                        kind: RecordKind::FixedAsset,
                        id: asset.id,
                    }),
            )?;
            asset.purchase_cost += difference;
            books.save(&asset)?;
            tracing::info!(id = %asset.id, %difference, "asset revalued");
            Ok(journal)
        })
    }
}
