//! Resource vectors used for ceilings, refill rates, availability and costs
//!
//! A `Capacity` always carries a request dimension and optionally a second
//! dimension (usually tokens). The same shape is used for every quantity the
//! regulator tracks so they can be compared dimension by dimension.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A two-dimensional resource quantity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Capacity {
    /// Request dimension
    pub requests: f64,

    /// Optional second dimension (e.g. tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<f64>,
}

impl Capacity {
    /// A capacity with only the request dimension
    pub const fn requests(requests: f64) -> Self {
        Self {
            requests,
            secondary: None,
        }
    }

    /// A capacity with both dimensions
    pub const fn with_secondary(requests: f64, secondary: f64) -> Self {
        Self {
            requests,
            secondary: Some(secondary),
        }
    }

    /// The cost of a single request carrying `tokens` units of the second dimension
    pub const fn single_request(tokens: f64) -> Self {
        Self::with_secondary(1.0, tokens)
    }

    /// Scales every dimension by `factor`
    pub fn scale(&self, factor: f64) -> Self {
        Self {
            requests: self.requests * factor,
            secondary: self.secondary.map(|s| s * factor),
        }
    }

    /// Converts a per-minute quantity into a per-second one
    pub fn per_second_from_per_minute(&self) -> Self {
        self.scale(1.0 / 60.0)
    }

    /// Adds `extra` to the second dimension, creating it if absent
    pub fn add_secondary(&self, extra: f64) -> Self {
        Self {
            requests: self.requests,
            secondary: Some(self.secondary.unwrap_or(0.0) + extra),
        }
    }

    /// Returns true if every dimension is finite and non-negative
    pub fn is_valid(&self) -> bool {
        let ok = |v: f64| v.is_finite() && v >= 0.0;
        ok(self.requests) && self.secondary.map_or(true, ok)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.secondary {
            Some(secondary) => write!(f, "{:.2} req / {:.0} tok", self.requests, secondary),
            None => write!(f, "{:.2} req", self.requests),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_minute_conversion() {
        let per_minute = Capacity::with_secondary(60.0, 6000.0);
        let per_second = per_minute.per_second_from_per_minute();
        assert!((per_second.requests - 1.0).abs() < 1e-9);
        assert!((per_second.secondary.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_add_secondary_creates_dimension() {
        let cost = Capacity::requests(1.0).add_secondary(42.0);
        assert_eq!(cost.secondary, Some(42.0));

        let cost = Capacity::single_request(10.0).add_secondary(5.5);
        assert_eq!(cost.secondary, Some(15.5));
    }

    #[test]
    fn test_is_valid() {
        assert!(Capacity::requests(0.0).is_valid());
        assert!(!Capacity::requests(-1.0).is_valid());
        assert!(!Capacity::with_secondary(1.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_display() {
        assert_eq!(Capacity::requests(2.0).to_string(), "2.00 req");
        assert_eq!(
            Capacity::with_secondary(1.0, 250.0).to_string(),
            "1.00 req / 250 tok"
        );
    }
}
