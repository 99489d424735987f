//! Price Cache Types
//!
//! Domain types for the latest-price table fed by the market data feed.
//!
//! # Design
//!
//! The cache holds one slot per symbol. Writers replace a slot wholesale
//! (last write wins); readers copy the slot out under a short read lock,
//! so a reader never observes a partially written price.
//!
//! Tracked symbols are pre-declared at construction and read back as
//! "unknown" (`None`) until their first tick arrives.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;

// =============================================================================
// Symbol
// =============================================================================

/// An upper-case ticker symbol (e.g. `AAPL`).
///
/// Construction trims surrounding whitespace and upper-cases the input, so
/// `Symbol::new(" aapl ")` and `Symbol::new("AAPL")` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a normalized symbol.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the normalized symbol is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

// =============================================================================
// Price Tick
// =============================================================================

/// One price observation for one symbol, decoded from a feed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTick {
    symbol: Symbol,
    price: Decimal,
}

impl PriceTick {
    /// Create a new tick.
    #[must_use]
    pub const fn new(symbol: Symbol, price: Decimal) -> Self {
        Self { symbol, price }
    }

    /// The symbol this tick prices.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// The observed price.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }
}

// =============================================================================
// Price Cache
// =============================================================================

/// Concurrency-safe latest-price table.
///
/// # Example
///
/// ```rust
/// use market_relay::domain::pricing::{PriceCache, Symbol};
/// use rust_decimal::Decimal;
///
/// let cache = PriceCache::new([Symbol::new("AAPL"), Symbol::new("NVDA")]);
/// assert_eq!(cache.get(&Symbol::new("aapl")), None);
///
/// cache.set(Symbol::new("AAPL"), Decimal::new(1502, 1));
/// assert_eq!(cache.get(&Symbol::new("aapl")), Some(Decimal::new(1502, 1)));
/// ```
#[derive(Debug, Default)]
pub struct PriceCache {
    tracked: Vec<Symbol>,
    prices: RwLock<HashMap<Symbol, Decimal>>,
}

impl PriceCache {
    /// Create a cache for a pre-declared set of symbols.
    ///
    /// Duplicates are collapsed; declaration order is kept.
    #[must_use]
    pub fn new(tracked: impl IntoIterator<Item = Symbol>) -> Self {
        let mut symbols: Vec<Symbol> = Vec::new();
        for symbol in tracked {
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }

        Self {
            prices: RwLock::new(HashMap::with_capacity(symbols.len())),
            tracked: symbols,
        }
    }

    /// Overwrite the price for a symbol.
    pub fn set(&self, symbol: Symbol, price: Decimal) {
        self.prices.write().insert(symbol, price);
    }

    /// Apply a decoded tick.
    pub fn apply(&self, tick: &PriceTick) {
        self.set(tick.symbol.clone(), tick.price);
    }

    /// Get the last known price, or `None` if no tick has arrived yet.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }

    /// The pre-declared tracked symbols, in declaration order.
    #[must_use]
    pub fn tracked(&self) -> &[Symbol] {
        &self.tracked
    }

    /// Check whether a symbol is in the tracked set.
    #[must_use]
    pub fn is_tracked(&self, symbol: &Symbol) -> bool {
        self.tracked.contains(symbol)
    }

    /// Number of tracked symbols with a known price.
    ///
    /// Prices set for symbols outside the tracked list are not counted.
    #[must_use]
    pub fn known_count(&self) -> usize {
        let prices = self.prices.read();
        self.tracked
            .iter()
            .filter(|symbol| prices.contains_key(*symbol))
            .count()
    }

    /// Copy out every tracked symbol with its current price.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Symbol, Option<Decimal>)> {
        let prices = self.prices.read();
        self.tracked
            .iter()
            .map(|symbol| (symbol.clone(), prices.get(symbol).copied()))
            .collect()
    }
}

/// Shared price cache reference.
pub type SharedPriceCache = std::sync::Arc<PriceCache>;

// =============================================================================
// Tests
// =============================================================================
