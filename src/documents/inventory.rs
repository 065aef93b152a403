use std::{collections::BTreeMap, sync::Arc};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

use tripro_core::{
    models::records::Product, JournalEntry, JournalLine, NewJournalEntry, SystemAccount,
};

use crate::{
    books::{document_number, money, Books},
    error::BooksError,
    validation::ProductInput,
};

#[derive(Debug, Clone, Deserialize)]
pub struct StockCount {
    pub product_id: Uuid,
    pub counted: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockAdjustmentRequest {
    pub warehouse_id: String,
    pub date: Date,
    pub counts: Vec<StockCount>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockAdjustmentLine {
    pub product_id: Uuid,
    pub system_quantity: Decimal,
    pub counted: Decimal,
    pub difference: Decimal,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockAdjustment {
    pub lines: Vec<StockAdjustmentLine>,
    pub journal: Option<JournalEntry>,
}

impl Books {
    pub fn create_product(&self, input: ProductInput) -> Result<Product, BooksError> {
        input.validate()?;
        let product = Product {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            sku: input.sku.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            item_type: input.item_type,
            price: money(input.price),
            cost: money(input.cost),
            stock: Decimal::ZERO,
            warehouse_stock: BTreeMap::new(),
            min_stock_level: input.min_stock_level,
        };
        self.save(&product)?;
        tracing::info!(id = %product.id, name = %product.name, "product created");
        Ok(product)
    }

    /// Catalogue fields only; stock moves through invoices and adjustments.
    pub fn update_product(&self, id: Uuid, input: ProductInput) -> Result<Product, BooksError> {
        input.validate()?;
        let mut product: Product = self.record(id)?;
        product.name = input.name.trim().to_string();
        product.sku = input.sku.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        product.item_type = input.item_type;
        product.price = money(input.price);
        product.cost = money(input.cost);
        product.min_stock_level = input.min_stock_level;
        self.save(&product)?;
        Ok(product)
    }

    /// Stock items at or below their reorder level.
    pub fn low_stock_products(&self) -> Result<Vec<Product>, BooksError> {
        Ok(self
            .records::<Product>()?
            .into_iter()
            .filter(|p| p.tracks_stock() && p.stock <= p.min_stock_level)
            .collect())
    }

    /// Sets warehouse quantities to the counted figures. Differences are
    /// valued at product cost: gains Dr inventory / Cr adjustments, losses
    /// the reverse.
    pub fn adjust_stock(&self, request: StockAdjustmentRequest) -> Result<StockAdjustment, BooksError> {
        let warehouse = request.warehouse_id.trim().to_string();
        if warehouse.is_empty() {
            return Err(BooksError::InvalidState("a warehouse is required".to_string()));
        }
        if request.counts.iter().any(|c| c.counted < Decimal::ZERO) {
            return Err(BooksError::InvalidState("counted quantity cannot be negative".to_string()));
        }

        self.atomic(|books| {
            let mut lines = Vec::new();
            let mut gain = Decimal::ZERO;
            let mut loss = Decimal::ZERO;
            for count in &request.counts {
                let mut product: Product = books.record(count.product_id)?;
                if !product.tracks_stock() {
                    continue;
                }
                let system_quantity = product.stock_in(&warehouse);
                let difference = count.counted - system_quantity;
                if difference.is_zero() {
                    continue;
                }
                let value = money(difference * product.cost);
                if value > Decimal::ZERO {
                    gain += value;
                } else {
                    loss -= value;
                }
                product.adjust_stock(&warehouse, difference);
                books.save(&product)?;
                lines.push(StockAdjustmentLine {
                    product_id: product.id,
                    system_quantity,
                    counted: count.counted,
                    difference,
                    value,
                });
            }

            let net = gain - loss;
            let journal = if net.is_zero() {
                None
            } else {
                let inventory = books.system_account(SystemAccount::Inventory)?;
                let adjustments = books.system_account(SystemAccount::InventoryAdjustments)?;
                let entry_lines = if net > Decimal::ZERO {
                    vec![
                        JournalLine::debit(&inventory, net),
                        JournalLine::credit(&adjustments, net),
                    ]
                } else {
                    vec![
                        JournalLine::debit(&adjustments, -net),
                        JournalLine::credit(&inventory, -net),
                    ]
                };
                let description = match request.notes.as_deref() {
                    Some(notes) if !notes.trim().is_empty() => format!("Stock adjustment - {}", notes.trim()),
                    _ => format!("Stock adjustment - {}", warehouse),
                };
                Some(books.post_entry(
                    NewJournalEntry::new(request.date, &description, entry_lines)
                        .with_reference(document_number("ADJ-INV")),
                )?)
            };

            tracing::info!(warehouse = %warehouse, items = lines.len(), %net, "stock adjusted");
            Ok(StockAdjustment { lines, journal })
        })
    }
}
