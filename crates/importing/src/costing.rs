//! Landed-cost calculator.
//!
//! Turns a supplier price plus the order's costing policy into a per-unit
//! local-currency cost: converted base price, apportioned tax, apportioned
//! labour. Pure functions over `Decimal`; no state.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use shipstock_core::ValueObject;

/// How import tax is levied for an order.
///
/// `Total` is a lump sum for the whole order; it is apportioned over the
/// order's total planned quantity and from then on behaves like a per-item
/// amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TaxRule {
    PerItem(Decimal),
    PerCtn(Decimal),
    PerKg(Decimal),
    Total(Decimal),
}

/// Order-level costing policy: one per import order, applied to every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostingPolicy {
    /// RMB → local currency conversion rate.
    pub rmb_rate: Decimal,
    pub tax: TaxRule,
    /// Labour charged per carton, spread across the carton's units.
    pub labour_bill_per_ctn: Decimal,
}

impl ValueObject for CostingPolicy {}

/// Per-item inputs to the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostBasis {
    pub price_rmb: Decimal,
    pub quantity_per_ctn: i64,
    pub per_ctn_weight: Decimal,
}

/// Per-unit landed cost in local currency (unrounded).
///
/// ```text
/// base         = price_rmb * rmb_rate
/// tax_per_unit = per_item: v
///                per_kg:   (per_ctn_weight / quantity_per_ctn) * v
///                per_ctn:  v / quantity_per_ctn
///                total:    v / order_total_quantity
/// labour       = labour_bill_per_ctn / quantity_per_ctn
/// ```
/// Divisions guard their denominators: a zero carton size or zero order
/// quantity contributes nothing rather than poisoning the whole cost.
pub fn unit_cost(basis: &CostBasis, policy: &CostingPolicy, order_total_quantity: i64) -> Decimal {
    let base = basis.price_rmb * policy.rmb_rate;

    let per_ctn = |amount: Decimal| {
        if basis.quantity_per_ctn > 0 {
            amount / Decimal::from(basis.quantity_per_ctn)
        } else {
            Decimal::ZERO
        }
    };

    let tax_per_unit = match policy.tax {
        TaxRule::PerItem(v) => v,
        TaxRule::PerKg(v) => per_ctn(basis.per_ctn_weight) * v,
        TaxRule::PerCtn(v) => per_ctn(v),
        TaxRule::Total(v) => {
            if order_total_quantity > 0 {
                v / Decimal::from(order_total_quantity)
            } else {
                Decimal::ZERO
            }
        }
    };

    base + tax_per_unit + per_ctn(policy.labour_bill_per_ctn)
}

/// Cost as stored/displayed on shipment lines: 2 decimal places.
pub fn display_cost(cost: Decimal) -> Decimal {
    cost.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Cost as written to the product catalog's buying price: nearest integer.
///
/// The 2dp-vs-integer asymmetry between this and [`display_cost`] is
/// deliberate and load-bearing; both round the *raw* cost, not each other.
/// Returns `None` when the rounded cost does not fit an `i64`.
pub fn applied_price(cost: Decimal) -> Option<i64> {
    cost.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().expect("decimal literal")
    }

    fn policy(tax: TaxRule) -> CostingPolicy {
        CostingPolicy {
            rmb_rate: dec("17.5"),
            tax,
            labour_bill_per_ctn: dec("100"),
        }
    }

    fn basis() -> CostBasis {
        CostBasis {
            price_rmb: dec("10"),
            quantity_per_ctn: 50,
            per_ctn_weight: dec("25"),
        }
    }

    #[test]
    fn per_item_tax_formula() {
        // 10 * 17.5 + 5 + 100/50 = 182
        let cost = unit_cost(&basis(), &policy(TaxRule::PerItem(dec("5"))), 1000);
        assert_eq!(cost, dec("182"));
        assert_eq!(applied_price(cost), Some(182));
    }

    #[test]
    fn per_kg_tax_uses_unit_weight() {
        // tax = (25 / 50) * 4 = 2; 175 + 2 + 2 = 179
        let cost = unit_cost(&basis(), &policy(TaxRule::PerKg(dec("4"))), 1000);
        assert_eq!(cost, dec("179"));
    }

    #[test]
    fn per_ctn_tax_spreads_over_carton() {
        // tax = 60 / 50 = 1.2; 175 + 1.2 + 2 = 178.2
        let cost = unit_cost(&basis(), &policy(TaxRule::PerCtn(dec("60"))), 1000);
        assert_eq!(cost, dec("178.2"));
    }

    #[test]
    fn total_tax_apportions_over_order_quantity() {
        // tax = 500 / 1000 = 0.5; 175 + 0.5 + 2 = 177.5
        let cost = unit_cost(&basis(), &policy(TaxRule::Total(dec("500"))), 1000);
        assert_eq!(cost, dec("177.5"));
    }

    #[test]
    fn zero_carton_size_contributes_no_tax_or_labour() {
        let b = CostBasis {
            quantity_per_ctn: 0,
            ..basis()
        };
        let cost = unit_cost(&b, &policy(TaxRule::PerCtn(dec("60"))), 1000);
        assert_eq!(cost, dec("175"));

        let cost = unit_cost(&b, &policy(TaxRule::PerKg(dec("4"))), 1000);
        assert_eq!(cost, dec("175"));
    }

    #[test]
    fn zero_order_quantity_contributes_no_total_tax() {
        let cost = unit_cost(&basis(), &policy(TaxRule::Total(dec("500"))), 0);
        assert_eq!(cost, dec("177"));
    }

    #[test]
    fn display_and_applied_round_the_raw_cost_independently() {
        let cost = dec("181.495");
        assert_eq!(display_cost(cost), dec("181.50"));
        // Integer rounding works on the raw value, not the 2dp display value.
        assert_eq!(applied_price(cost), Some(181));

        assert_eq!(applied_price(dec("181.5")), Some(182));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: non-negative inputs never produce a negative cost.
            #[test]
            fn cost_is_non_negative(
                price in 0i64..1_000_000,
                rate_tenths in 0i64..1_000,
                tax in 0i64..10_000,
                labour in 0i64..10_000,
                qty_per_ctn in 0i64..10_000,
            ) {
                let basis = CostBasis {
                    price_rmb: Decimal::from(price),
                    quantity_per_ctn: qty_per_ctn,
                    per_ctn_weight: Decimal::from(20),
                };
                let policy = CostingPolicy {
                    rmb_rate: Decimal::new(rate_tenths, 1),
                    tax: TaxRule::PerCtn(Decimal::from(tax)),
                    labour_bill_per_ctn: Decimal::from(labour),
                };
                prop_assert!(unit_cost(&basis, &policy, 100) >= Decimal::ZERO);
            }

            /// Property: the calculator is deterministic.
            #[test]
            fn cost_is_deterministic(price in 0i64..1_000_000) {
                let basis = CostBasis {
                    price_rmb: Decimal::from(price),
                    quantity_per_ctn: 50,
                    per_ctn_weight: Decimal::from(25),
                };
                let policy = CostingPolicy {
                    rmb_rate: Decimal::new(175, 1),
                    tax: TaxRule::PerItem(Decimal::from(5)),
                    labour_bill_per_ctn: Decimal::from(100),
                };
                prop_assert_eq!(
                    unit_cost(&basis, &policy, 100),
                    unit_cost(&basis, &policy, 100)
                );
            }
        }
    }
}
