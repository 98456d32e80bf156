mod comparison;
mod engine;
mod ledger;
mod rates;
mod solver;
mod tax_table;
mod types;

pub use comparison::{RegimeComparison, RegimeGap, RegimeSet, compare_regimes};
pub use engine::{final_net_value, simulate};
pub use ledger::{Lot, LotLedger};
pub use rates::{annual_rate, monthly_rate};
pub use solver::{
    EquivalentRateConfig, EquivalentRateResult, SolveIteration, bisect_rate, find_equivalent_rate,
};
pub use tax_table::{TaxTable, deferred_withdrawal_rate, standard_rate};
pub use types::{
    ContributionFrequency, DeferredPolicy, FixedIncomePolicy, FundPolicy, MAX_HORIZON_YEARS,
    Regime, RegimeKind, SimulationInputs, SimulationResult,
};
