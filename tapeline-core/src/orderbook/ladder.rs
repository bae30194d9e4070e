//! Bounded Price Ladder
//!
//! One side of an L2 book, split into two regions:
//! - a contiguous *top region* of up to K levels, kept sorted best-first
//!   (descending for bids, ascending for asks) for O(K) access, and
//! - a *deep region* keyed by price for everything worse than the top.
//!
//! The invariant maintained after every single operation: the top region
//! holds the K best-priced non-zero levels across both regions, and every
//! deep price is worse than the last top price whenever the top is full.
//!
//! Removing a top level promotes the best deep level; inserting into a full
//! top demotes the now-worst top level into the deep region. The deep region
//! carries a hard entry ceiling so the ladder stays memory-bounded even on
//! pathological feeds; when the ceiling is hit the worst-priced deep level
//! is evicted and counted.

use crate::core::{BookSide, FixedDecimal, Level};
use std::collections::BTreeMap;

/// Default number of top-region levels per side.
pub const DEFAULT_MAX_LEVELS: usize = 20;

/// Default hard ceiling on deep-region entries per side.
pub const DEFAULT_DEEP_CEILING: usize = 10_000;

#[derive(Debug, Clone)]
pub struct BoundedLadder {
    side: BookSide,
    max_levels: usize,
    deep_ceiling: usize,
    /// Best-first sorted top region, at most `max_levels` entries.
    top: Vec<Level>,
    deep: BTreeMap<FixedDecimal, FixedDecimal>,
    /// Negative quantities coerced to removals.
    negative_coercions: u64,
    /// Deep levels evicted at the ceiling.
    deep_evictions: u64,
}

impl BoundedLadder {
    pub fn new(side: BookSide, max_levels: usize, deep_ceiling: usize) -> Self {
        BoundedLadder {
            side,
            max_levels: max_levels.max(1),
            deep_ceiling,
            top: Vec::with_capacity(max_levels.max(1)),
            deep: BTreeMap::new(),
            negative_coercions: 0,
            deep_evictions: 0,
        }
    }

    pub fn with_defaults(side: BookSide) -> Self {
        Self::new(side, DEFAULT_MAX_LEVELS, DEFAULT_DEEP_CEILING)
    }

    #[inline]
    pub fn side(&self) -> BookSide {
        self.side
    }

    /// `a` is strictly better-priced than `b` for this side.
    #[inline]
    fn better(&self, a: FixedDecimal, b: FixedDecimal) -> bool {
        match self.side {
            BookSide::Bid => a > b,
            BookSide::Ask => a < b,
        }
    }

    /// Insert or update a level. Quantity zero removes; negative quantity is
    /// coerced to a removal and counted.
    pub fn upsert(&mut self, price: FixedDecimal, quantity: FixedDecimal) {
        if quantity.is_negative() {
            self.negative_coercions += 1;
            tracing::warn!(
                side = %self.side,
                %price,
                %quantity,
                "negative quantity coerced to removal"
            );
            self.remove(price);
            return;
        }
        if quantity.is_zero() {
            self.remove(price);
            return;
        }

        // In-place update if the price is already tracked.
        if let Some(entry) = self.top.iter_mut().find(|(p, _)| *p == price) {
            entry.1 = quantity;
            return;
        }
        if let Some(q) = self.deep.get_mut(&price) {
            *q = quantity;
            return;
        }

        if self.belongs_in_top(price) {
            self.insert_in_top(price, quantity);
        } else {
            self.insert_in_deep(price, quantity);
        }
    }

    /// Remove a level if present. Removing from the top region promotes the
    /// best deep level.
    pub fn remove(&mut self, price: FixedDecimal) {
        if let Some(pos) = self.top.iter().position(|(p, _)| *p == price) {
            self.top.remove(pos);
            self.promote_from_deep();
            return;
        }
        self.deep.remove(&price);
    }

    /// Best level, or `None` when the side is empty.
    #[inline]
    pub fn best(&self) -> Option<Level> {
        self.top.first().copied()
    }

    /// Total number of tracked levels, top plus deep.
    #[inline]
    pub fn depth(&self) -> usize {
        self.top.len() + self.deep.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top.is_empty()
    }

    /// Top-region levels in rank order (element 0 is best).
    pub fn iter_top(&self) -> impl Iterator<Item = &Level> {
        self.top.iter()
    }

    /// All levels, best-first: the top region followed by the deep region in
    /// price rank order. Used for checkpoints and drift comparison.
    pub fn snapshot_levels(&self) -> Vec<Level> {
        let mut levels = self.top.clone();
        match self.side {
            BookSide::Bid => levels.extend(self.deep.iter().rev().map(|(p, q)| (*p, *q))),
            BookSide::Ask => levels.extend(self.deep.iter().map(|(p, q)| (*p, *q))),
        }
        levels
    }

    pub fn clear(&mut self) {
        self.top.clear();
        self.deep.clear();
    }

    pub fn negative_coercions(&self) -> u64 {
        self.negative_coercions
    }

    pub fn deep_evictions(&self) -> u64 {
        self.deep_evictions
    }

    /// Verify the region invariants. Cheap enough for debug assertions and
    /// post-mortem dumps; not called on the hot path.
    pub fn validate(&self) -> Result<(), String> {
        for pair in self.top.windows(2) {
            if !self.better(pair[0].0, pair[1].0) {
                return Err(format!(
                    "{} top region unsorted: {} then {}",
                    self.side, pair[0].0, pair[1].0
                ));
            }
        }
        if self.top.len() > self.max_levels {
            return Err(format!("{} top region over capacity", self.side));
        }
        if let Some(&(worst_top, _)) = self.top.last() {
            if self.top.len() == self.max_levels {
                for price in self.deep.keys() {
                    if !self.better(worst_top, *price) {
                        return Err(format!(
                            "{} deep level {} not worse than top tail {}",
                            self.side, price, worst_top
                        ));
                    }
                }
            }
        } else if !self.deep.is_empty() {
            return Err(format!("{} deep region non-empty with empty top", self.side));
        }
        let levels = self
            .top
            .iter()
            .copied()
            .chain(self.deep.iter().map(|(p, q)| (*p, *q)));
        for (price, quantity) in levels {
            if quantity.is_zero() || quantity.is_negative() {
                return Err(format!("{} zero/negative level at {}", self.side, price));
            }
        }
        Ok(())
    }

    fn belongs_in_top(&self, price: FixedDecimal) -> bool {
        if self.top.len() < self.max_levels {
            return true;
        }
        // Full: only if strictly better than the current worst top level.
        self.better(price, self.top[self.max_levels - 1].0)
    }

    fn insert_in_top(&mut self, price: FixedDecimal, quantity: FixedDecimal) {
        let pos = self
            .top
            .iter()
            .position(|(p, _)| self.better(price, *p))
            .unwrap_or(self.top.len());

        if self.top.len() == self.max_levels {
            let (demoted_price, demoted_qty) = self.top.pop().expect("top region full");
            self.insert_in_deep(demoted_price, demoted_qty);
        }
        self.top.insert(pos, (price, quantity));
    }

    fn insert_in_deep(&mut self, price: FixedDecimal, quantity: FixedDecimal) {
        if self.deep.len() >= self.deep_ceiling && !self.deep.contains_key(&price) {
            let worst = match self.side {
                BookSide::Bid => self.deep.keys().next().copied(),
                BookSide::Ask => self.deep.keys().next_back().copied(),
            };
            if let Some(worst_price) = worst {
                if self.better(price, worst_price) {
                    self.deep.remove(&worst_price);
                    self.deep_evictions += 1;
                } else {
                    // Incoming level is the worst of all; drop it instead.
                    self.deep_evictions += 1;
                    return;
                }
            }
        }
        self.deep.insert(price, quantity);
    }

    fn promote_from_deep(&mut self) {
        if self.top.len() >= self.max_levels {
            return;
        }
        let best = match self.side {
            BookSide::Bid => self.deep.keys().next_back().copied(),
            BookSide::Ask => self.deep.keys().next().copied(),
        };
        if let Some(price) = best {
            if let Some(quantity) = self.deep.remove(&price) {
                self.insert_in_top(price, quantity);
            }
        }
    }
}
