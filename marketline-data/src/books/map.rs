//! Price-ordered level maps for one side of an order book.
//!
//! Bids are kept sorted descending by price, asks ascending, without a
//! custom comparator type at every call site: bids are keyed by
//! `Reverse(price)` so the map's natural iteration order already is the
//! side's required order.

use crate::model::OrderBookLevel;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Bids(BTreeMap<Reverse<Decimal>, Decimal>);

#[derive(Debug, Clone, Default)]
pub struct Asks(BTreeMap<Decimal, Decimal>);

impl Bids {
    /// `quantity == 0` removes the level; otherwise the level is (re)set.
    pub fn apply(&mut self, price: Decimal, quantity: Decimal) {
        if quantity.is_zero() {
            self.0.remove(&Reverse(price));
        } else {
            self.0.insert(Reverse(price), quantity);
        }
    }

    pub fn best(&self) -> Option<(Decimal, Decimal)> {
        self.0.iter().next().map(|(Reverse(price), qty)| (*price, *qty))
    }

    pub fn top_n(&self, n: usize) -> Vec<OrderBookLevel> {
        self.0
            .iter()
            .take(n)
            .map(|(Reverse(price), qty)| OrderBookLevel::new(*price, *qty))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn replace_from(&mut self, levels: &[OrderBookLevel]) {
        self.0.clear();
        for level in levels {
            self.apply(level.price, level.quantity);
        }
    }
}

impl Asks {
    pub fn apply(&mut self, price: Decimal, quantity: Decimal) {
        if quantity.is_zero() {
            self.0.remove(&price);
        } else {
            self.0.insert(price, quantity);
        }
    }

    pub fn best(&self) -> Option<(Decimal, Decimal)> {
        self.0.iter().next().map(|(price, qty)| (*price, *qty))
    }

    pub fn top_n(&self, n: usize) -> Vec<OrderBookLevel> {
        self.0
            .iter()
            .take(n)
            .map(|(price, qty)| OrderBookLevel::new(*price, *qty))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn replace_from(&mut self, levels: &[OrderBookLevel]) {
        self.0.clear();
        for level in levels {
            self.apply(level.price, level.quantity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn bids_iterate_descending_by_price() {
        let mut bids = Bids::default();
        bids.apply(dec!(100), dec!(1));
        bids.apply(dec!(102), dec!(1));
        bids.apply(dec!(101), dec!(1));
        assert_eq!(bids.best(), Some((dec!(102), dec!(1))));
        let top = bids.top_n(3);
        assert_eq!(top[0].price, dec!(102));
        assert_eq!(top[2].price, dec!(100));
    }

    #[test]
    fn asks_iterate_ascending_by_price() {
        let mut asks = Asks::default();
        asks.apply(dec!(103), dec!(1));
        asks.apply(dec!(101), dec!(1));
        assert_eq!(asks.best(), Some((dec!(101), dec!(1))));
    }

    #[test]
    fn zero_quantity_removes_level() {
        let mut bids = Bids::default();
        bids.apply(dec!(100), dec!(1));
        bids.apply(dec!(100), dec!(0));
        assert!(bids.is_empty());
    }

    #[test]
    fn zero_quantity_on_missing_level_is_a_noop() {
        let mut asks = Asks::default();
        asks.apply(dec!(100), dec!(0));
        assert!(asks.is_empty());
    }
}
