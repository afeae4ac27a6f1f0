//! Stock ledger: row-locked availability validation and signed stock
//! adjustment with optional audit-trail movements.
//!
//! Every function here runs inside the caller's transaction; nothing is
//! visible until the owning operation commits.

use crate::dtos::StockAdjustmentRequest;
use crate::models::{InventoryMovement, MovementType};
use crate::services::database::Database;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::{AppError, StockShortage};
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

/// Direction of a stock adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDirection {
    Add,
    Subtract,
}

/// One product/quantity pair demanded by a document line.
#[derive(Debug, Clone)]
pub struct StockDemand {
    pub product_id: Uuid,
    pub quantity: Decimal,
}

/// Audit metadata for an adjustment. When present, one movement row is
/// written per line; when absent only the numeric stock changes (pure
/// reversal during edits, where no audit entry should appear).
#[derive(Debug, Clone)]
pub struct MovementMeta {
    pub movement_type: MovementType,
    pub reference: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

/// Product state captured under a row lock.
#[derive(Debug, Clone, FromRow)]
pub struct LockedProduct {
    pub product_id: Uuid,
    pub name: String,
    pub stock: Decimal,
}

/// Lock the given products for the remainder of the transaction and return
/// their current state. Rows are locked in id order so concurrent ledger
/// operations acquire locks in a stable order.
pub async fn lock_products(
    tx: &mut Transaction<'_, Postgres>,
    product_ids: &[Uuid],
) -> Result<Vec<LockedProduct>, AppError> {
    let mut ids: Vec<Uuid> = product_ids.to_vec();
    ids.sort();
    ids.dedup();

    let products = sqlx::query_as::<_, LockedProduct>(
        r#"
        SELECT product_id, name, stock
        FROM products
        WHERE product_id = ANY($1)
        ORDER BY product_id
        FOR UPDATE
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock products: {}", e)))?;

    if products.len() != ids.len() {
        let found: Vec<Uuid> = products.iter().map(|p| p.product_id).collect();
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !found.contains(id))
            .map(|id| id.to_string())
            .collect();
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Product(s) not found: {}",
            missing.join(", ")
        )));
    }

    Ok(products)
}

/// Check that every demand can be served. Collects all offending lines into
/// a single error; nothing is partially applied.
pub fn validate_availability(
    products: &[LockedProduct],
    demands: &[StockDemand],
) -> Result<(), AppError> {
    let by_id: HashMap<Uuid, &LockedProduct> =
        products.iter().map(|p| (p.product_id, p)).collect();

    // Aggregate demand per product: two lines of the same product draw from
    // the same stock.
    let mut required: HashMap<Uuid, Decimal> = HashMap::new();
    for demand in demands {
        *required.entry(demand.product_id).or_insert(Decimal::ZERO) += demand.quantity;
    }

    let mut shortages: Vec<StockShortage> = Vec::new();
    for (product_id, quantity) in required {
        let Some(product) = by_id.get(&product_id) else {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Product {} not found",
                product_id
            )));
        };
        if product.stock < quantity {
            shortages.push(StockShortage {
                product_id,
                product_name: product.name.clone(),
                requested: quantity,
                available: product.stock,
            });
        }
    }

    if !shortages.is_empty() {
        shortages.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        return Err(AppError::InsufficientStock(shortages));
    }

    Ok(())
}

/// Apply a signed quantity delta per line, optionally appending one audit
/// movement per line. The caller is responsible for having validated
/// availability before any subtract that represents a new commitment.
pub async fn adjust(
    tx: &mut Transaction<'_, Postgres>,
    demands: &[StockDemand],
    direction: StockDirection,
    meta: Option<&MovementMeta>,
) -> Result<(), AppError> {
    for demand in demands {
        let signed = match direction {
            StockDirection::Add => demand.quantity,
            StockDirection::Subtract => -demand.quantity,
        };

        let product_name: String = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = stock + $1
            WHERE product_id = $2
            RETURNING name
            "#,
        )
        .bind(signed)
        .bind(demand.product_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to adjust stock for product {}: {}",
                demand.product_id,
                e
            ))
        })?;

        if let Some(meta) = meta {
            sqlx::query(
                r#"
                INSERT INTO inventory_movements (
                    movement_id, product_id, product_name, movement_type, quantity,
                    movement_date, reference, notes
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(demand.product_id)
            .bind(&product_name)
            .bind(meta.movement_type.as_str())
            .bind(demand.quantity)
            .bind(meta.date)
            .bind(&meta.reference)
            .bind(&meta.notes)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to record movement: {}", e))
            })?;
        }
    }

    Ok(())
}

/// Remove the audit rows tagged with a document reference. Used when the
/// owning document is edited (movements are regenerated) or deleted.
pub async fn remove_movements(
    tx: &mut Transaction<'_, Postgres>,
    reference: &str,
) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM inventory_movements WHERE reference = $1")
        .bind(reference)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to remove movements for '{}': {}",
                reference,
                e
            ))
        })?;

    Ok(result.rows_affected())
}

/// Manual restock or correction outside any document: ENTRADA adds,
/// SALIDA subtracts (availability-checked), AJUSTE sets the stock to the
/// given quantity. One audit movement is always written.
#[instrument(skip(db, input), fields(product_id = %input.product_id))]
pub async fn manual_adjustment(
    db: &Database,
    input: &StockAdjustmentRequest,
) -> Result<InventoryMovement, AppError> {
    let movement_type = match input.movement_type.as_str() {
        "ENTRADA" => MovementType::Entrada,
        "SALIDA" => MovementType::Salida,
        "AJUSTE" => MovementType::Ajuste,
        other => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Unknown movement type '{}'",
                other
            )))
        }
    };
    if movement_type != MovementType::Ajuste && input.quantity <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Quantity must be positive for {} movements",
            movement_type.as_str()
        )));
    }

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let locked = lock_products(&mut tx, &[input.product_id]).await?;
    let product = &locked[0];

    let reference = input
        .reference
        .clone()
        .unwrap_or_else(|| "AJUSTE MANUAL".to_string());
    let meta = MovementMeta {
        movement_type,
        reference,
        date: input.movement_date,
        notes: input.notes.clone(),
    };
    let demand = |quantity: Decimal| {
        vec![StockDemand {
            product_id: input.product_id,
            quantity,
        }]
    };

    match movement_type {
        MovementType::Entrada => {
            adjust(&mut tx, &demand(input.quantity), StockDirection::Add, Some(&meta)).await?;
        }
        MovementType::Salida => {
            validate_availability(&locked, &demand(input.quantity))?;
            adjust(
                &mut tx,
                &demand(input.quantity),
                StockDirection::Subtract,
                Some(&meta),
            )
            .await?;
        }
        MovementType::Ajuste => {
            // Correction to an absolute count: the movement records the
            // signed delta.
            let delta = input.quantity - product.stock;
            adjust(&mut tx, &demand(delta), StockDirection::Add, Some(&meta)).await?;
        }
    }

    let movement = sqlx::query_as::<_, InventoryMovement>(
        r#"
        SELECT movement_id, product_id, product_name, movement_type, quantity,
            movement_date, reference, notes, created_utc
        FROM inventory_movements
        WHERE product_id = $1
        ORDER BY created_utc DESC
        LIMIT 1
        "#,
    )
    .bind(input.product_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load movement: {}", e)))?;

    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    info!(
        product_id = %input.product_id,
        movement_type = movement_type.as_str(),
        quantity = %movement.quantity,
        "Manual stock adjustment applied"
    );

    Ok(movement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(id: Uuid, name: &str, stock: Decimal) -> LockedProduct {
        LockedProduct {
            product_id: id,
            name: name.to_string(),
            stock,
        }
    }

    #[test]
    fn availability_ok_when_stock_covers_demand() {
        let id = Uuid::new_v4();
        let products = vec![product(id, "Cemento", dec!(10))];
        let demands = vec![StockDemand {
            product_id: id,
            quantity: dec!(10),
        }];
        assert!(validate_availability(&products, &demands).is_ok());
    }

    #[test]
    fn availability_names_every_short_item() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let products = vec![
            product(a, "Arena", dec!(2)),
            product(b, "Bloques", dec!(100)),
        ];
        let demands = vec![
            StockDemand {
                product_id: a,
                quantity: dec!(5),
            },
            StockDemand {
                product_id: b,
                quantity: dec!(150),
            },
        ];

        match validate_availability(&products, &demands) {
            Err(AppError::InsufficientStock(shortages)) => {
                assert_eq!(shortages.len(), 2);
                assert_eq!(shortages[0].product_name, "Arena");
                assert_eq!(shortages[0].available, dec!(2));
                assert_eq!(shortages[1].requested, dec!(150));
            }
            other => panic!("expected InsufficientStock, got {:?}", other.err()),
        }
    }

    #[test]
    fn availability_aggregates_lines_of_same_product() {
        let id = Uuid::new_v4();
        let products = vec![product(id, "Varilla", dec!(10))];
        // Two lines of 6 each exceed the 10 in stock even though each line
        // alone would fit.
        let demands = vec![
            StockDemand {
                product_id: id,
                quantity: dec!(6),
            },
            StockDemand {
                product_id: id,
                quantity: dec!(6),
            },
        ];
        assert!(matches!(
            validate_availability(&products, &demands),
            Err(AppError::InsufficientStock(_))
        ));
    }

    #[test]
    fn availability_rejects_unknown_product() {
        let demands = vec![StockDemand {
            product_id: Uuid::new_v4(),
            quantity: dec!(1),
        }];
        assert!(matches!(
            validate_availability(&[], &demands),
            Err(AppError::NotFound(_))
        ));
    }
}
