//! Percentage rounding policies.
//!
//! Run-level and request-level rates round differently. Both policies are
//! kept side by side and selected by name at each call site.

use serde::{Deserialize, Serialize};

/// How a `count / denominator` ratio is turned into a percentage with one
/// decimal digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// Round half up at the tenths digit.
    HalfUpTenths,
    /// Truncate to hundredths, then round half down to tenths.
    TruncateThenHalfDownTenths,
}

/// Policy used for a run's rates computed from its log records.
pub const RUN_RATE_ROUNDING: RoundingPolicy = RoundingPolicy::HalfUpTenths;

/// Policy used for execution-request rates and histograms.
pub const REQUEST_RATE_ROUNDING: RoundingPolicy = RoundingPolicy::TruncateThenHalfDownTenths;

impl RoundingPolicy {
    /// Percentage of `count` over `denominator`, or 0 when the denominator is 0.
    pub fn percentage(self, count: u64, denominator: u64) -> f64 {
        if denominator == 0 {
            return 0.0;
        }
        let tenths = match self {
            RoundingPolicy::HalfUpTenths => {
                // floor(count * 1000 / d + 1/2)
                (count * 2000 + denominator) / (2 * denominator)
            }
            RoundingPolicy::TruncateThenHalfDownTenths => {
                let hundredths = count * 10_000 / denominator;
                let (tenths, digit) = (hundredths / 10, hundredths % 10);
                if digit > 5 {
                    tenths + 1
                } else {
                    tenths
                }
            }
        };
        tenths as f64 / 10.0
    }
}
