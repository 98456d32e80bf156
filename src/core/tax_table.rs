//! Holding-period tax tables.
//!
//! Both regressive tables are keyed by whole months of holding period and are
//! inclusive on the upper end of each tier: exactly 6 months is still taxed at
//! the first standard tier, exactly 120 months at the 15% withdrawal tier.

/// Regressive table for funds and fixed-income instruments.
pub fn standard_rate(months: u32) -> f64 {
    if months <= 6 {
        0.225
    } else if months <= 12 {
        0.20
    } else if months <= 24 {
        0.175
    } else {
        0.15
    }
}

/// Regressive table applied once at withdrawal from a deferred-tax wrapper.
pub fn deferred_withdrawal_rate(months: u32) -> f64 {
    let years = months as f64 / 12.0;
    if years <= 2.0 {
        0.35
    } else if years <= 4.0 {
        0.30
    } else if years <= 6.0 {
        0.25
    } else if years <= 8.0 {
        0.20
    } else if years <= 10.0 {
        0.15
    } else {
        0.10
    }
}

/// Rate schedule a regime levies tax with.
///
/// `Flat` ignores the holding period; it models the older single-rate
/// treatment (15% on fund anticipation, 10% on pension withdrawal).
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TaxTable {
    Standard,
    DeferredWithdrawal,
    Flat(f64),
}

impl TaxTable {
    pub fn rate(self, holding_months: u32) -> f64 {
        match self {
            TaxTable::Standard => standard_rate(holding_months),
            TaxTable::DeferredWithdrawal => deferred_withdrawal_rate(holding_months),
            TaxTable::Flat(rate) => rate,
        }
    }
}
