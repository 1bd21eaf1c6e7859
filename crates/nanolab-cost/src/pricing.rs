// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-image pricing and cost estimates shown before a generation.
//!
//! 1K:  $0.04 per image
//! 2K:  $0.08 per image
//! 4K:  $0.08 per image
//!
//! Unknown resolutions are priced as 1K.

use serde::Serialize;

const PRICE_TABLE: &[(&str, f64)] = &[("1K", 0.04), ("2K", 0.08), ("4K", 0.08)];

/// Estimated spend for a generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    pub resolution: String,
    pub count: u32,
    pub unit_cost: f64,
    pub total_cost: f64,
    pub currency: &'static str,
}

/// Price of one image at `resolution`, in USD.
pub fn unit_price(resolution: &str) -> f64 {
    PRICE_TABLE
        .iter()
        .find(|(res, _)| res.eq_ignore_ascii_case(resolution))
        .map(|(_, price)| *price)
        .unwrap_or(PRICE_TABLE[0].1)
}

pub fn estimate_cost(resolution: &str, count: u32) -> CostEstimate {
    let unit_cost = unit_price(resolution);
    CostEstimate {
        resolution: resolution.to_string(),
        count,
        unit_cost,
        total_cost: unit_cost * f64::from(count),
        currency: "USD",
    }
}

/// One-line display string, e.g. `Est. Cost: 4 x $0.040 = $0.160`.
pub fn format_cost(estimate: &CostEstimate) -> String {
    if estimate.count == 1 {
        format!("Est. Cost: ${:.3}", estimate.total_cost)
    } else {
        format!(
            "Est. Cost: {} x ${:.3} = ${:.3}",
            estimate.count, estimate.unit_cost, estimate.total_cost
        )
    }
}

/// Resolution and unit price pairs, in ascending resolution.
pub fn pricing_table() -> Vec<(&'static str, f64)> {
    PRICE_TABLE.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_resolutions() {
        assert!((unit_price("1K") - 0.04).abs() < f64::EPSILON);
        assert!((unit_price("2K") - 0.08).abs() < f64::EPSILON);
        assert!((unit_price("4k") - 0.08).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_resolution_uses_1k_rate() {
        let est = estimate_cost("8K", 2);
        assert!((est.unit_cost - 0.04).abs() < f64::EPSILON);
        assert_eq!(est.resolution, "8K");
        assert_eq!(est.currency, "USD");
    }

    #[test]
    fn single_image_format() {
        assert_eq!(format_cost(&estimate_cost("1K", 1)), "Est. Cost: $0.040");
    }

    #[test]
    fn batch_format() {
        assert_eq!(
            format_cost(&estimate_cost("1K", 4)),
            "Est. Cost: 4 x $0.040 = $0.160"
        );
        assert_eq!(
            format_cost(&estimate_cost("4K", 3)),
            "Est. Cost: 3 x $0.080 = $0.240"
        );
    }

    #[test]
    fn table_lists_three_resolutions() {
        let table = pricing_table();
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].0, "1K");
    }

    proptest! {
        #[test]
        fn total_is_unit_times_count(count in 0u32..10_000) {
            let est = estimate_cost("2K", count);
            prop_assert!((est.total_cost - est.unit_cost * f64::from(count)).abs() < 1e-9);
        }
    }
}
