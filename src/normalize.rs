//! Flatten raw option orders into one row per leg.
//!
//! The batch either normalizes completely or fails on the first bad field, so a
//! trade is never dropped silently.

use tracing::debug;

use crate::error::HistoryError;
use crate::types::{NormalizedRecord, RawOrder, TransCode};
use crate::utils::{parse_day, timestamp_date};

pub fn normalize(orders: &[RawOrder]) -> Result<Vec<NormalizedRecord>, HistoryError> {
    let mut out = Vec::with_capacity(orders.iter().map(|o| o.legs.len()).sum());

    for (i, order) in orders.iter().enumerate() {
        let activity_date = timestamp_date(&order.created_at).ok_or_else(|| {
            HistoryError::malformed(
                format!("orders[{i}].created_at"),
                format!("bad timestamp {:?}", order.created_at),
            )
        })?;
        let process_date = timestamp_date(&order.updated_at).ok_or_else(|| {
            HistoryError::malformed(
                format!("orders[{i}].updated_at"),
                format!("bad timestamp {:?}", order.updated_at),
            )
        })?;

        for (j, leg) in order.legs.iter().enumerate() {
            let (settle_date, quantity, price) = match leg.executions.first() {
                Some(exec) => {
                    let settle = parse_day(&exec.settlement_date).ok_or_else(|| {
                        HistoryError::malformed(
                            format!("orders[{i}].legs[{j}].executions[0].settlement_date"),
                            format!("bad date {:?}", exec.settlement_date),
                        )
                    })?;
                    (Some(settle), Some(exec.quantity), Some(exec.price))
                }
                None => (None, None, None),
            };

            out.push(NormalizedRecord {
                activity_date,
                process_date,
                settle_date,
                instrument: order.chain_symbol.clone(),
                description: format!(
                    "{} {} {} {}",
                    order.chain_symbol, leg.expiration_date, leg.option_type, leg.strike_price
                ),
                trans_code: TransCode::from(leg.side),
                quantity,
                price,
                // Premium is per order; every leg carries the full amount.
                amount: order.processed_premium,
            });
        }
        debug!(order = i, symbol = %order.chain_symbol, legs = order.legs.len(), "order normalized");
    }

    Ok(out)
}
