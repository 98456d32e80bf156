use serde::Serialize;

use super::engine::run_validated;
use super::solver::{EquivalentRateConfig, find_equivalent_rate};
use super::types::{
    DeferredPolicy, FixedIncomePolicy, FundPolicy, Regime, RegimeKind, SimulationInputs,
    SimulationResult,
};
use crate::error::TaxLotResult;

/// Policies for the three regimes compared side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeSet {
    pub fund: FundPolicy,
    pub fixed_income: FixedIncomePolicy,
    pub deferred: DeferredPolicy,
}

impl RegimeSet {
    pub fn with_cycle_years(cycle_years: u32) -> Self {
        Self {
            fund: FundPolicy::default(),
            fixed_income: FixedIncomePolicy::new(cycle_years),
            deferred: DeferredPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeGap {
    pub regime: RegimeKind,
    /// Deferred net value minus this regime's net value at the same gross rate.
    pub deferred_advantage: f64,
    /// Gross annual rate this regime needs to match the deferred net value.
    pub equivalent_annual_rate: f64,
    pub equivalent_rate_converged: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeComparison {
    pub annual_rate: f64,
    pub fund: SimulationResult,
    pub fixed_income: SimulationResult,
    pub deferred_withdrawal: SimulationResult,
    pub gaps: Vec<RegimeGap>,
}

/// Runs every regime on the same inputs and measures each taxable regime
/// against the deferred wrapper.
pub fn compare_regimes(
    inputs: &SimulationInputs,
    regimes: &RegimeSet,
    solver: &EquivalentRateConfig,
) -> TaxLotResult<RegimeComparison> {
    let fund_regime = Regime::Fund(regimes.fund.clone());
    let fixed_regime = Regime::FixedIncome(regimes.fixed_income.clone());
    let deferred_regime = Regime::DeferredWithdrawal(regimes.deferred.clone());

    inputs.validate()?;
    for regime in [&fund_regime, &fixed_regime, &deferred_regime] {
        regime.validate()?;
    }
    solver.validate()?;

    let fund = run_validated(inputs, &fund_regime);
    let fixed_income = run_validated(inputs, &fixed_regime);
    let deferred_withdrawal = run_validated(inputs, &deferred_regime);
    let target = deferred_withdrawal.final_net_value;

    let mut gaps = Vec::with_capacity(2);
    for (regime, result) in [(&fund_regime, &fund), (&fixed_regime, &fixed_income)] {
        let equivalent = find_equivalent_rate(regime, inputs, target, solver)?;
        gaps.push(RegimeGap {
            regime: regime.kind(),
            deferred_advantage: target - result.final_net_value,
            equivalent_annual_rate: equivalent.annual_rate,
            equivalent_rate_converged: equivalent.converged,
        });
    }

    Ok(RegimeComparison {
        annual_rate: inputs.annual_rate,
        fund,
        fixed_income,
        deferred_withdrawal,
        gaps,
    })
}
