//! Price Query Endpoint
//!
//! `GET /stocks/{symbol}` reads the last cached price. It never fails: a
//! symbol with no tick yet, or one that is not tracked at all, reports a
//! `null` price.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::RelayState;
use crate::domain::pricing::Symbol;

/// Body of a price query response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceResponse {
    /// Upper-case symbol.
    pub symbol: String,
    /// Last known price, `null` if unknown.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
}

/// Look up the cached price for a symbol (case-insensitive).
pub async fn price_handler(
    Path(raw): Path<String>,
    State(state): State<Arc<RelayState>>,
) -> Json<PriceResponse> {
    let symbol = Symbol::new(&raw);
    let price = state.cache.get(&symbol);
    tracing::trace!(symbol = %symbol, price = ?price, "Price query");

    Json(PriceResponse {
        symbol: symbol.to_string(),
        price,
    })
}
