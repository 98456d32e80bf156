use serde::Serialize;

use super::tax_table::TaxTable;
use crate::error::{TaxLotError, TaxLotResult};

/// Longest projection accepted. Runs are quadratic in the horizon, since every
/// month touches every lot.
pub const MAX_HORIZON_YEARS: u32 = 100;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContributionFrequency {
    Monthly,
    Annual,
}

impl ContributionFrequency {
    /// Month 0 only ever holds the opening lot.
    pub fn contributes_at(self, month: u32) -> bool {
        match self {
            ContributionFrequency::Monthly => month > 0,
            ContributionFrequency::Annual => month > 0 && month % 12 == 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationInputs {
    pub opening_amount: f64,
    pub contribution_amount: f64,
    pub contribution_frequency: ContributionFrequency,
    pub annual_rate: f64,
    pub horizon_years: u32,
}

impl SimulationInputs {
    pub fn horizon_months(&self) -> u32 {
        self.horizon_years.saturating_mul(12)
    }

    pub fn with_annual_rate(&self, annual_rate: f64) -> Self {
        Self {
            annual_rate,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> TaxLotResult<()> {
        if !self.opening_amount.is_finite() || self.opening_amount < 0.0 {
            return Err(TaxLotError::invalid("opening_amount", "must be >= 0"));
        }
        if !self.contribution_amount.is_finite() || self.contribution_amount < 0.0 {
            return Err(TaxLotError::invalid("contribution_amount", "must be >= 0"));
        }
        if !self.annual_rate.is_finite() || self.annual_rate < -1.0 {
            return Err(TaxLotError::invalid("annual_rate", "must be >= -100%"));
        }
        if self.horizon_years == 0 {
            return Err(TaxLotError::invalid("horizon_years", "must be > 0"));
        }
        if self.horizon_years > MAX_HORIZON_YEARS {
            return Err(TaxLotError::invalid(
                "horizon_years",
                &format!("must be <= {MAX_HORIZON_YEARS}"),
            ));
        }
        Ok(())
    }
}

/// Open-ended fund taxed on a fixed calendar ("come-cotas").
#[derive(Debug, Clone, PartialEq)]
pub struct FundPolicy {
    /// Shifts the fiscal calendar: simulation month `m` falls on calendar
    /// month `((m - 1 + calendar_offset) % 12) + 1`.
    pub calendar_offset: u32,
    pub tax_months: Vec<u32>,
    pub reset_basis_on_periodic_tax: bool,
    pub levies_residual_terminal_tax: bool,
    pub table: TaxTable,
}

impl Default for FundPolicy {
    fn default() -> Self {
        Self {
            calendar_offset: 0,
            tax_months: vec![5, 11],
            reset_basis_on_periodic_tax: true,
            levies_residual_terminal_tax: false,
            table: TaxTable::Standard,
        }
    }
}

impl FundPolicy {
    pub fn calendar_month(&self, month: u32) -> u32 {
        ((month.saturating_sub(1) + self.calendar_offset) % 12) + 1
    }

    pub fn is_tax_month(&self, month: u32) -> bool {
        month > 0 && self.tax_months.contains(&self.calendar_month(month))
    }
}

/// Fixed-income instrument taxed each time a lot completes a reinvestment cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedIncomePolicy {
    pub cycle_years: u32,
    pub reset_basis_on_periodic_tax: bool,
    pub levies_residual_terminal_tax: bool,
    pub table: TaxTable,
}

impl FixedIncomePolicy {
    pub fn new(cycle_years: u32) -> Self {
        Self {
            cycle_years,
            reset_basis_on_periodic_tax: true,
            levies_residual_terminal_tax: true,
            table: TaxTable::Standard,
        }
    }

    pub fn cycle_months(&self) -> u32 {
        self.cycle_years.saturating_mul(12)
    }
}

/// Deferred-tax wrapper: nothing is taxed until withdrawal at the horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredPolicy {
    pub table: TaxTable,
}

impl Default for DeferredPolicy {
    fn default() -> Self {
        Self {
            table: TaxTable::DeferredWithdrawal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Regime {
    Fund(FundPolicy),
    FixedIncome(FixedIncomePolicy),
    DeferredWithdrawal(DeferredPolicy),
}

impl Regime {
    pub fn fund() -> Self {
        Regime::Fund(FundPolicy::default())
    }

    pub fn fixed_income(cycle_years: u32) -> Self {
        Regime::FixedIncome(FixedIncomePolicy::new(cycle_years))
    }

    pub fn deferred_withdrawal() -> Self {
        Regime::DeferredWithdrawal(DeferredPolicy::default())
    }

    pub fn kind(&self) -> RegimeKind {
        match self {
            Regime::Fund(_) => RegimeKind::Fund,
            Regime::FixedIncome(_) => RegimeKind::FixedIncome,
            Regime::DeferredWithdrawal(_) => RegimeKind::DeferredWithdrawal,
        }
    }

    pub fn validate(&self) -> TaxLotResult<()> {
        let table = match self {
            Regime::Fund(policy) => {
                if policy.tax_months.is_empty() {
                    return Err(TaxLotError::invalid(
                        "tax_months",
                        "at least one calendar month is required",
                    ));
                }
                if policy.tax_months.iter().any(|m| !(1..=12).contains(m)) {
                    return Err(TaxLotError::invalid(
                        "tax_months",
                        "calendar months must be between 1 and 12",
                    ));
                }
                policy.table
            }
            Regime::FixedIncome(policy) => {
                if policy.cycle_years == 0 {
                    return Err(TaxLotError::invalid("cycle_years", "must be > 0"));
                }
                policy.table
            }
            Regime::DeferredWithdrawal(policy) => policy.table,
        };
        if let TaxTable::Flat(rate) = table {
            if !(0.0..=1.0).contains(&rate) {
                return Err(TaxLotError::invalid(
                    "flat_tax_rate",
                    "must be between 0 and 100%",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegimeKind {
    Fund,
    FixedIncome,
    DeferredWithdrawal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub regime: RegimeKind,
    /// Total balance at months `0..=horizon`; the last entry is net of all tax.
    pub balances: Vec<f64>,
    pub final_net_value: f64,
    pub total_tax: f64,
    pub total_contributed: f64,
}
