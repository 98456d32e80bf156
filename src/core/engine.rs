use tracing::debug;

use super::ledger::LotLedger;
use super::rates::monthly_rate;
use super::types::{Regime, SimulationInputs, SimulationResult};
use crate::error::TaxLotResult;

/// Runs one regime month by month over a fresh ledger.
///
/// Month 0 holds only the opening lot. Each later month first appends the
/// scheduled contribution, then compounds every lot, then applies whatever
/// periodic tax the regime levies that month. Terminal settlement happens
/// after the last month and is folded into the final balance.
pub fn simulate(inputs: &SimulationInputs, regime: &Regime) -> TaxLotResult<SimulationResult> {
    inputs.validate()?;
    regime.validate()?;
    Ok(run_validated(inputs, regime))
}

/// Final net value only; the function the equivalent-rate solver inverts.
pub fn final_net_value(inputs: &SimulationInputs, regime: &Regime) -> TaxLotResult<f64> {
    simulate(inputs, regime).map(|result| result.final_net_value)
}

pub(crate) fn run_validated(inputs: &SimulationInputs, regime: &Regime) -> SimulationResult {
    run_with_ledger(inputs, regime).0
}

fn run_with_ledger(inputs: &SimulationInputs, regime: &Regime) -> (SimulationResult, LotLedger) {
    let horizon = inputs.horizon_months();
    let rate = monthly_rate(inputs.annual_rate);

    let mut ledger = LotLedger::with_capacity(horizon as usize + 1);
    ledger.append_lot(inputs.opening_amount, 0);

    let mut balances = Vec::with_capacity(horizon as usize + 1);
    balances.push(ledger.total_value());
    let mut total_contributed = inputs.opening_amount;
    let mut total_tax = 0.0;

    for month in 1..=horizon {
        if inputs.contribution_frequency.contributes_at(month) {
            ledger.append_lot(inputs.contribution_amount, month);
            total_contributed += inputs.contribution_amount;
        }
        ledger.grow_all(rate);
        total_tax += apply_periodic_tax(regime, &mut ledger, month);
        balances.push(ledger.total_value());
    }

    total_tax += apply_terminal_tax(regime, &mut ledger, horizon);
    let final_net_value = ledger.total_value();
    if let Some(last) = balances.last_mut() {
        *last = final_net_value;
    }

    debug!(
        regime = ?regime.kind(),
        annual_rate = inputs.annual_rate,
        horizon_months = horizon,
        lots = ledger.len(),
        final_net_value,
        total_tax,
        "simulation complete"
    );

    let result = SimulationResult {
        regime: regime.kind(),
        balances,
        final_net_value,
        total_tax,
        total_contributed,
    };
    (result, ledger)
}

fn apply_periodic_tax(regime: &Regime, ledger: &mut LotLedger, month: u32) -> f64 {
    match regime {
        Regime::Fund(policy) => {
            if !policy.is_tax_month(month) {
                return 0.0;
            }
            // calendar event is global; the rate still follows each lot's age
            ledger.apply_tax(month, policy.table, policy.reset_basis_on_periodic_tax)
        }
        Regime::FixedIncome(policy) => {
            let cycle = policy.cycle_months();
            ledger.apply_tax_where(
                month,
                policy.table,
                policy.reset_basis_on_periodic_tax,
                |holding| completes_cycle(holding, cycle),
            )
        }
        Regime::DeferredWithdrawal(_) => 0.0,
    }
}

fn completes_cycle(holding: u32, cycle: u32) -> bool {
    holding > 0 && holding % cycle == 0
}

fn apply_terminal_tax(regime: &Regime, ledger: &mut LotLedger, horizon: u32) -> f64 {
    match regime {
        Regime::Fund(policy) if policy.levies_residual_terminal_tax => {
            ledger.apply_tax(horizon, policy.table, false)
        }
        Regime::Fund(_) => 0.0,
        Regime::FixedIncome(policy) if policy.levies_residual_terminal_tax => {
            let cycle = policy.cycle_months();
            // everything the periodic pass skipped this month, including a
            // lot that arrived at the horizon and grew for one month
            ledger.apply_tax_where(horizon, policy.table, false, |holding| {
                !completes_cycle(holding, cycle)
            })
        }
        Regime::FixedIncome(_) => 0.0,
        // basis was never reset, so the gain is measured against principal
        Regime::DeferredWithdrawal(policy) => ledger.apply_tax(horizon, policy.table, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tax_table::TaxTable;
    use crate::core::types::{ContributionFrequency, FixedIncomePolicy, FundPolicy};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn single_lot(opening_amount: f64, annual_rate: f64, horizon_years: u32) -> SimulationInputs {
        SimulationInputs {
            opening_amount,
            contribution_amount: 0.0,
            contribution_frequency: ContributionFrequency::Monthly,
            annual_rate,
            horizon_years,
        }
    }

    fn sample_inputs() -> SimulationInputs {
        SimulationInputs {
            opening_amount: 10_000.0,
            contribution_amount: 1_000.0,
            contribution_frequency: ContributionFrequency::Monthly,
            annual_rate: 0.08,
            horizon_years: 15,
        }
    }

    fn all_regimes() -> Vec<Regime> {
        vec![
            Regime::fund(),
            Regime::fixed_income(4),
            Regime::deferred_withdrawal(),
        ]
    }

    #[test]
    fn fund_taxes_single_lot_at_each_calendar_event() {
        let result = simulate(&single_lot(10_000.0, 0.12, 2), &Regime::fund()).expect("valid");

        // events at months 5, 11, 17, 23 with holdings taxed at 22.5/20/17.5/15%
        assert_approx(result.total_tax, 456.665226369533);
        assert_approx(result.final_net_value, 12_041.476740720935);
        assert_eq!(result.balances.len(), 25);
        assert_approx(result.balances[4], 10_384.98820370221);
        assert_approx(result.balances[5], 10_374.735134956303);
    }

    #[test]
    fn fund_events_aligned_to_half_years_use_six_and_twelve_month_tiers() {
        let policy = FundPolicy {
            calendar_offset: 11,
            ..FundPolicy::default()
        };
        // exactly two debits at holdings 6 and 12 need a one-year run; a
        // two-year run would add events at 18 and 24
        let result =
            simulate(&single_lot(10_000.0, 0.12, 1), &Regime::Fund(policy)).expect("valid");

        let half_year_growth = 1.12_f64.sqrt();
        let value_at_6 = 10_000.0 * half_year_growth;
        let first_tax = (value_at_6 - 10_000.0) * 0.225;
        let basis = value_at_6 - first_tax;
        let value_at_12 = basis * half_year_growth;
        let second_tax = (value_at_12 - basis) * 0.20;

        assert_approx(result.total_tax, first_tax + second_tax);
        assert_approx(result.final_net_value, value_at_12 - second_tax);
    }

    #[test]
    fn fund_residual_terminal_tax_settles_gain_since_last_event() {
        let inputs = single_lot(10_000.0, 0.12, 2);
        let plain = simulate(&inputs, &Regime::fund()).expect("valid");
        let settled = simulate(
            &inputs,
            &Regime::Fund(FundPolicy {
                levies_residual_terminal_tax: true,
                ..FundPolicy::default()
            }),
        )
        .expect("valid");

        assert_approx(settled.total_tax, 476.47261703927086);
        assert!(settled.final_net_value < plain.final_net_value);
        assert_approx(
            settled.final_net_value + settled.total_tax,
            plain.final_net_value + plain.total_tax,
        );
    }

    #[test]
    fn fund_without_basis_reset_taxes_old_gain_again() {
        let inputs = single_lot(10_000.0, 0.12, 2);
        let reset = simulate(&inputs, &Regime::fund()).expect("valid");
        let no_reset = simulate(
            &inputs,
            &Regime::Fund(FundPolicy {
                reset_basis_on_periodic_tax: false,
                ..FundPolicy::default()
            }),
        )
        .expect("valid");

        assert!(no_reset.total_tax > reset.total_tax);
    }

    #[test]
    fn fund_flat_table_ignores_holding_period() {
        let inputs = single_lot(10_000.0, 0.12, 3);
        let flat = simulate(
            &inputs,
            &Regime::Fund(FundPolicy {
                table: TaxTable::Flat(0.15),
                ..FundPolicy::default()
            }),
        )
        .expect("valid");
        let regressive = simulate(&inputs, &Regime::fund()).expect("valid");

        // regressive starts above 15% and only reaches it after two years
        assert!(flat.total_tax < regressive.total_tax);
    }

    #[test]
    fn deferred_single_lot_at_ten_years_uses_fifteen_percent_tier() {
        let result = simulate(
            &single_lot(100_000.0, 0.10, 10),
            &Regime::deferred_withdrawal(),
        )
        .expect("valid");

        let gross = 100_000.0 * 1.10_f64.powi(10);
        let gain = gross - 100_000.0;
        assert_approx(result.total_tax, gain * 0.15);
        assert_approx(result.final_net_value, gross - gain * 0.15);
        assert_approx(result.total_tax, 23_906.136901500122);
    }

    #[test]
    fn deferred_single_lot_past_ten_years_drops_to_ten_percent() {
        let result = simulate(
            &single_lot(100_000.0, 0.10, 11),
            &Regime::deferred_withdrawal(),
        )
        .expect("valid");

        let gain = 100_000.0 * 1.10_f64.powi(11) - 100_000.0;
        assert_approx(result.total_tax, gain * 0.10);
    }

    #[test]
    fn deferred_series_is_gross_until_final_month() {
        let result = simulate(&sample_inputs(), &Regime::deferred_withdrawal()).expect("valid");
        let n = result.balances.len();

        assert_eq!(n, 15 * 12 + 1);
        assert!(result.balances[n - 2] < result.balances[n - 1] + result.total_tax);
        assert_approx(result.balances[n - 1], result.final_net_value);
        assert_approx(result.final_net_value, 346_760.97247890604);
        assert_approx(result.total_tax, 24_739.190057556385);
    }

    #[test]
    fn fixed_income_without_residual_period_skips_terminal_tax() {
        let inputs = single_lot(10_000.0, 0.10, 4);
        let with_residual = simulate(&inputs, &Regime::fixed_income(2)).expect("valid");
        let without_residual = simulate(
            &inputs,
            &Regime::FixedIncome(FixedIncomePolicy {
                levies_residual_terminal_tax: false,
                ..FixedIncomePolicy::new(2)
            }),
        )
        .expect("valid");

        // 48 months is two full cycles
        assert_approx(with_residual.total_tax, without_residual.total_tax);
        assert_approx(with_residual.total_tax, 737.0737500000023);
    }

    #[test]
    fn fixed_income_residual_period_is_taxed_at_horizon() {
        let inputs = single_lot(10_000.0, 0.10, 5);
        let with_residual = simulate(&inputs, &Regime::fixed_income(2)).expect("valid");
        let without_residual = simulate(
            &inputs,
            &Regime::FixedIncome(FixedIncomePolicy {
                levies_residual_terminal_tax: false,
                ..FixedIncomePolicy::new(2)
            }),
        )
        .expect("valid");

        // 60 months leaves twelve months past the last cycle
        assert!(with_residual.total_tax > without_residual.total_tax);
        assert_approx(with_residual.total_tax, 944.4750187500031);
        assert_approx(without_residual.total_tax, 737.0737500000023);
        assert_approx(with_residual.final_net_value, 15_002.025106250017);
    }

    #[test]
    fn fixed_income_cycle_is_tracked_per_lot() {
        let inputs = SimulationInputs {
            contribution_frequency: ContributionFrequency::Annual,
            contribution_amount: 5_000.0,
            ..single_lot(10_000.0, 0.10, 3)
        };
        let result = simulate(&inputs, &Regime::fixed_income(1)).expect("valid");

        // Each lot is taxed on its own anniversaries: the opening lot at 12, 24
        // and 36; the month-12 lot at 24 and 36; the month-24 lot at 36. The
        // month-36 lot is settled at the horizon on its single month of growth.
        // A lot also compounds in the month it arrives.
        let month = 1.10_f64.powf(1.0 / 12.0);
        let mut tax = 0.0;
        let mut net = 0.0;

        let mut opening = 10_000.0;
        for rate in [0.20, 0.175, 0.15] {
            let gain = opening * 0.10;
            tax += gain * rate;
            opening += gain * (1.0 - rate);
        }
        net += opening;

        let mut second = 5_000.0;
        let gain = second * (1.10 * month - 1.0);
        tax += gain * 0.20;
        second += gain * 0.80;
        let gain = second * 0.10;
        tax += gain * 0.175;
        second += gain * 0.825;
        net += second;

        let third = 5_000.0;
        let gain = third * (1.10 * month - 1.0);
        tax += gain * 0.20;
        net += third + gain * 0.80;

        let last = 5_000.0;
        let gain = last * (month - 1.0);
        tax += gain * 0.225;
        net += last + gain * 0.775;

        assert_eq!(result.balances.len(), 37);
        assert_approx(result.total_tax, tax);
        assert_approx(result.final_net_value, net);
        assert_approx(result.total_tax, 885.9930257391319);
    }

    #[test]
    fn fixed_income_settles_lot_arriving_at_horizon() {
        let inputs = SimulationInputs {
            opening_amount: 0.0,
            contribution_amount: 1_000.0,
            contribution_frequency: ContributionFrequency::Annual,
            annual_rate: 0.12,
            horizon_years: 1,
        };
        let (result, ledger) = run_with_ledger(&inputs, &Regime::fixed_income(1));

        let gain = 1_000.0 * (1.12_f64.powf(1.0 / 12.0) - 1.0);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.lots()[0].holding_months(12), 0);
        assert_approx(result.total_tax, gain * 0.225);
        assert_approx(result.final_net_value, 1_000.0 + gain * 0.775);
        assert_approx(result.total_tax, 2.1349784102811724);
    }

    #[test]
    fn monthly_contributions_across_regimes_match_reference() {
        let inputs = sample_inputs();
        let fund = simulate(&inputs, &Regime::fund()).expect("valid");
        let fixed = simulate(&inputs, &Regime::fixed_income(4)).expect("valid");

        assert_approx(fund.final_net_value, 332_409.0799353891);
        assert_approx(fund.total_tax, 26_101.078170171553);
        assert_approx(fixed.final_net_value, 337_455.15013938636);
        assert_approx(fixed.total_tax, 26_109.323953026138);
        assert_approx(fund.total_contributed, 10_000.0 + 180.0 * 1_000.0);
    }

    #[test]
    fn annual_contributions_land_on_year_boundaries() {
        let inputs = SimulationInputs {
            contribution_amount: 12_000.0,
            contribution_frequency: ContributionFrequency::Annual,
            ..sample_inputs()
        };
        let result = simulate(&inputs, &Regime::deferred_withdrawal()).expect("valid");

        assert_approx(result.total_contributed, 10_000.0 + 15.0 * 12_000.0);
        assert_approx(result.final_net_value, 335_195.68439272256);
    }

    #[test]
    fn zero_cycle_is_rejected_before_running() {
        let err = simulate(&sample_inputs(), &Regime::fixed_income(0)).expect_err("must reject");
        assert!(err.to_string().contains("cycle_years"));
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let mut inputs = sample_inputs();
        inputs.horizon_years = 0;
        let err = simulate(&inputs, &Regime::fund()).expect_err("must reject");
        assert!(err.to_string().contains("horizon_years"));
    }

    #[test]
    fn negative_contribution_is_rejected() {
        let mut inputs = sample_inputs();
        inputs.contribution_amount = -1.0;
        assert!(simulate(&inputs, &Regime::deferred_withdrawal()).is_err());
    }

    #[test]
    fn out_of_range_tax_month_is_rejected() {
        let regime = Regime::Fund(FundPolicy {
            tax_months: vec![13],
            ..FundPolicy::default()
        });
        assert!(simulate(&sample_inputs(), &regime).is_err());
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_zero_rate_collects_no_tax_and_returns_contributions(
            opening in 0u32..200_000,
            contribution in 0u32..10_000,
            annual in proptest::bool::ANY,
            years in 1u32..20,
            cycle in 1u32..6
        ) {
            let inputs = SimulationInputs {
                opening_amount: opening as f64,
                contribution_amount: contribution as f64,
                contribution_frequency: if annual {
                    ContributionFrequency::Annual
                } else {
                    ContributionFrequency::Monthly
                },
                annual_rate: 0.0,
                horizon_years: years,
            };
            let contributions = if annual { years } else { years * 12 };
            let expected = opening as f64 + contributions as f64 * contribution as f64;

            let regimes = [
                Regime::fund(),
                Regime::fixed_income(cycle),
                Regime::deferred_withdrawal(),
            ];
            for regime in regimes {
                let result = simulate(&inputs, &regime).expect("valid");
                prop_assert_eq!(result.total_tax, 0.0);
                prop_assert_eq!(result.final_net_value, expected);
                prop_assert_eq!(result.total_contributed, expected);
            }
        }

        #[test]
        fn prop_lots_never_go_negative_and_basis_stays_below_value(
            opening in 0u32..200_000,
            contribution in 0u32..5_000,
            rate_bp in 0u32..3_000,
            years in 1u32..12,
            cycle in 1u32..5,
            residual in proptest::bool::ANY
        ) {
            let inputs = SimulationInputs {
                opening_amount: opening as f64,
                contribution_amount: contribution as f64,
                contribution_frequency: ContributionFrequency::Monthly,
                annual_rate: rate_bp as f64 / 10_000.0,
                horizon_years: years,
            };
            let regimes = [
                Regime::Fund(FundPolicy {
                    levies_residual_terminal_tax: residual,
                    ..FundPolicy::default()
                }),
                Regime::fixed_income(cycle),
                Regime::deferred_withdrawal(),
            ];
            for regime in regimes {
                let (result, ledger) = run_with_ledger(&inputs, &regime);
                prop_assert!(result.total_tax >= 0.0);
                for lot in ledger.lots() {
                    prop_assert!(lot.current_value >= 0.0);
                    prop_assert!(lot.tax_basis <= lot.current_value + 1e-9);
                }
            }
        }

        #[test]
        fn prop_final_net_value_is_non_decreasing_in_rate(
            opening in 0u32..100_000,
            contribution in 0u32..3_000,
            low_bp in 0u32..2_000,
            step_bp in 1u32..1_000,
            years in 1u32..15,
            cycle in 1u32..5
        ) {
            let inputs = SimulationInputs {
                opening_amount: opening as f64,
                contribution_amount: contribution as f64,
                contribution_frequency: ContributionFrequency::Monthly,
                annual_rate: low_bp as f64 / 10_000.0,
                horizon_years: years,
            };
            let higher = inputs.with_annual_rate((low_bp + step_bp) as f64 / 10_000.0);
            let regimes = [
                Regime::fund(),
                Regime::fixed_income(cycle),
                Regime::deferred_withdrawal(),
            ];
            for regime in regimes {
                let low = run_validated(&inputs, &regime).final_net_value;
                let high = run_validated(&higher, &regime).final_net_value;
                prop_assert!(high + 1e-9 >= low, "{regime:?}: {high} < {low}");
            }
        }

        #[test]
        fn prop_final_net_value_is_non_decreasing_in_horizon(
            opening in 0u32..100_000,
            contribution in 0u32..3_000,
            rate_bp in 0u32..2_500,
            years in 1u32..15,
            cycle in 1u32..5
        ) {
            let inputs = SimulationInputs {
                opening_amount: opening as f64,
                contribution_amount: contribution as f64,
                contribution_frequency: ContributionFrequency::Monthly,
                annual_rate: rate_bp as f64 / 10_000.0,
                horizon_years: years,
            };
            let longer = SimulationInputs {
                horizon_years: years + 1,
                ..inputs.clone()
            };
            let regimes = [
                Regime::fund(),
                Regime::fixed_income(cycle),
                Regime::deferred_withdrawal(),
            ];
            for regime in regimes {
                let short = run_validated(&inputs, &regime).final_net_value;
                let long = run_validated(&longer, &regime).final_net_value;
                prop_assert!(long + 1e-9 >= short, "{regime:?}: {long} < {short}");
            }
        }
    }

    #[test]
    fn every_regime_reports_one_balance_per_month() {
        for regime in all_regimes() {
            let result = simulate(&sample_inputs(), &regime).expect("valid");
            assert_eq!(result.balances.len(), 181);
            assert_approx(result.balances[0], 10_000.0);
            assert_eq!(result.regime, regime.kind());
        }
    }
}
