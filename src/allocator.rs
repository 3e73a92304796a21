//! UID/GID allocation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN: u32 = 2000;
pub const DEFAULT_MAX: u32 = 9000;

/// Every identifier of the range is already in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of identifiers in range {min}..={max}")]
pub struct RangeExhausted {
    pub min: u32,
    pub max: u32,
}

/// Closed interval numeric identifiers are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub min: u32,
    pub max: u32,
}

impl Default for IdRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
        }
    }
}

impl IdRange {
    pub fn contains(&self, id: u32) -> bool {
        (self.min..=self.max).contains(&id)
    }

    /// Next identifier above every in-range identifier of `existing`.
    ///
    /// Identifiers outside the range are ignored, so system accounts below
    /// `min` never push allocation around. A duplicate is only reported.
    pub fn next(
        &self,
        existing: impl IntoIterator<Item = u32>,
    ) -> Result<u32, RangeExhausted> {
        let mut seen = HashSet::new();
        let mut highest = None;

        for id in existing.into_iter().filter(|id| self.contains(*id)) {
            if !seen.insert(id) {
                tracing::warn!(id, "overlapping identifier in directory");
            }
            highest = highest.max(Some(id));
        }

        let next = match highest {
            Some(id) => id.saturating_add(1),
            None => self.min,
        };

        if next > self.max {
            return Err(RangeExhausted {
                min: self.min,
                max: self.max,
            });
        }
        Ok(next)
    }
}
