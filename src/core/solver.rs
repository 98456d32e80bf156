use serde::Serialize;
use tracing::{debug, trace, warn};

use super::engine::run_validated;
use super::types::{Regime, SimulationInputs};
use crate::error::{TaxLotError, TaxLotResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquivalentRateConfig {
    pub initial_low: f64,
    pub initial_high: f64,
    pub max_doublings: u32,
    pub max_iterations: u32,
    /// Absolute tolerance on net value, in currency units.
    pub value_tolerance: f64,
    /// Tolerance relative to the target, used when it is looser.
    pub relative_tolerance: f64,
}

impl Default for EquivalentRateConfig {
    fn default() -> Self {
        Self {
            initial_low: 0.0,
            initial_high: 1.0,
            max_doublings: 20,
            max_iterations: 100,
            value_tolerance: 1e-6,
            relative_tolerance: 1e-12,
        }
    }
}

impl EquivalentRateConfig {
    pub fn validate(&self) -> TaxLotResult<()> {
        if !self.initial_low.is_finite() || !self.initial_high.is_finite() {
            return Err(TaxLotError::invalid("initial_high", "search bounds must be finite"));
        }
        if self.initial_low < -1.0 {
            return Err(TaxLotError::invalid("initial_low", "must be >= -100%"));
        }
        if self.initial_high <= self.initial_low {
            return Err(TaxLotError::invalid(
                "initial_high",
                "must be greater than initial_low",
            ));
        }
        if self.max_iterations == 0 {
            return Err(TaxLotError::invalid("max_iterations", "must be > 0"));
        }
        if !self.value_tolerance.is_finite() || self.value_tolerance <= 0.0 {
            return Err(TaxLotError::invalid("value_tolerance", "must be > 0"));
        }
        if !self.relative_tolerance.is_finite() || self.relative_tolerance < 0.0 {
            return Err(TaxLotError::invalid("relative_tolerance", "must be >= 0"));
        }
        Ok(())
    }

    fn tolerance_for(&self, target: f64) -> f64 {
        self.value_tolerance
            .max(self.relative_tolerance * target.abs())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_rate: f64,
    pub net_value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EquivalentRateResult {
    pub annual_rate: f64,
    pub target: f64,
    pub achieved_net_value: f64,
    pub upper_bound_doublings: u32,
    pub iterations: Vec<SolveIteration>,
    pub bracketed: bool,
    pub converged: bool,
    pub message: String,
}

/// Gross annual rate at which `regime` reaches `target` net value, all other
/// inputs held fixed. `inputs.annual_rate` is ignored.
pub fn find_equivalent_rate(
    regime: &Regime,
    inputs: &SimulationInputs,
    target: f64,
    config: &EquivalentRateConfig,
) -> TaxLotResult<EquivalentRateResult> {
    inputs.validate()?;
    regime.validate()?;
    config.validate()?;
    if !target.is_finite() {
        return Err(TaxLotError::invalid("target", "must be finite"));
    }

    let result = bisect_rate(
        |rate| run_validated(&inputs.with_annual_rate(rate), regime).final_net_value,
        target,
        config,
    );
    debug!(
        regime = ?regime.kind(),
        target,
        annual_rate = result.annual_rate,
        iterations = result.iterations.len(),
        converged = result.converged,
        "equivalent rate solved"
    );
    Ok(result)
}

/// Bisection on a rate -> net value map that is non-decreasing in rate.
///
/// The upper bound is doubled until it brackets the target. Every loop is
/// capped, so an unreachable target still returns the best estimate. A
/// non-finite net value counts as above the target.
pub fn bisect_rate<F>(
    mut net_value_at: F,
    target: f64,
    config: &EquivalentRateConfig,
) -> EquivalentRateResult
where
    F: FnMut(f64) -> f64,
{
    let tolerance = config.tolerance_for(target);
    let mut lo = config.initial_low;
    let mut hi = config.initial_high;

    let low_value = net_value_at(lo);
    if low_value >= target - tolerance {
        let converged = (low_value - target).abs() <= tolerance;
        return EquivalentRateResult {
            annual_rate: lo,
            target,
            achieved_net_value: low_value,
            upper_bound_doublings: 0,
            iterations: Vec::new(),
            bracketed: converged,
            converged,
            message: if converged {
                "Target is met at the lower rate bound.".to_string()
            } else {
                "Target is below the net value at the lower rate bound; returning the bound."
                    .to_string()
            },
        };
    }

    let mut high_value = net_value_at(hi);
    let mut doublings = 0;
    while high_value < target && doublings < config.max_doublings {
        lo = hi;
        hi *= 2.0;
        high_value = net_value_at(hi);
        doublings += 1;
    }

    if high_value < target {
        warn!(
            target,
            upper_bound = hi,
            achieved = high_value,
            "equivalent rate target not reachable within expanded bound"
        );
        return EquivalentRateResult {
            annual_rate: hi,
            target,
            achieved_net_value: high_value,
            upper_bound_doublings: doublings,
            iterations: Vec::new(),
            bracketed: false,
            converged: false,
            message: "Target not reachable within the expanded rate bound; returning the bound."
                .to_string(),
        };
    }

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let mut best_rate = hi;
    let mut best_value = high_value;
    let mut converged = false;

    for iteration in 1..=config.max_iterations {
        let mid = (lo + hi) * 0.5;
        let value = net_value_at(mid);
        iterations.push(SolveIteration {
            iteration,
            lower_bound: lo,
            upper_bound: hi,
            candidate_rate: mid,
            net_value: value,
        });
        trace!(iteration, lo, hi, mid, value, "bisection step");

        best_rate = mid;
        best_value = value;
        if (value - target).abs() <= tolerance {
            converged = true;
            break;
        }
        if value < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    if !converged {
        warn!(
            target,
            annual_rate = best_rate,
            achieved = best_value,
            "equivalent rate solver hit its iteration cap"
        );
    }

    EquivalentRateResult {
        annual_rate: best_rate,
        target,
        achieved_net_value: best_value,
        upper_bound_doublings: doublings,
        iterations,
        bracketed: true,
        converged,
        message: if converged {
            "Solved equivalent gross rate.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        },
    }
}
