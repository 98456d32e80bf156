use std::net::{IpAddr, SocketAddr};

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::{
    ContributionFrequency, EquivalentRateConfig, EquivalentRateResult, MAX_HORIZON_YEARS, Regime,
    RegimeComparison, RegimeKind, RegimeSet, SimulationInputs, SimulationResult, TaxTable,
    compare_regimes, final_net_value, find_equivalent_rate, monthly_rate, simulate,
};
use crate::error::{TaxLotError, TaxLotResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliFrequency {
    Monthly,
    Annual,
}

impl From<CliFrequency> for ContributionFrequency {
    fn from(value: CliFrequency) -> Self {
        match value {
            CliFrequency::Monthly => ContributionFrequency::Monthly,
            CliFrequency::Annual => ContributionFrequency::Annual,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliRegime {
    Fund,
    FixedIncome,
    DeferredWithdrawal,
}

impl From<CliRegime> for RegimeKind {
    fn from(value: CliRegime) -> Self {
        match value {
            CliRegime::Fund => RegimeKind::Fund,
            CliRegime::FixedIncome => RegimeKind::FixedIncome,
            CliRegime::DeferredWithdrawal => RegimeKind::DeferredWithdrawal,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiFrequency {
    #[serde(alias = "Monthly")]
    Monthly,
    #[serde(alias = "Annual")]
    Annual,
}

impl From<ApiFrequency> for CliFrequency {
    fn from(value: ApiFrequency) -> Self {
        match value {
            ApiFrequency::Monthly => CliFrequency::Monthly,
            ApiFrequency::Annual => CliFrequency::Annual,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiRegime {
    Fund,
    #[serde(alias = "fixedIncome", alias = "fixed_income")]
    FixedIncome,
    #[serde(alias = "deferredWithdrawal", alias = "deferred_withdrawal", alias = "deferred")]
    DeferredWithdrawal,
}

impl From<ApiRegime> for CliRegime {
    fn from(value: ApiRegime) -> Self {
        match value {
            ApiRegime::Fund => CliRegime::Fund,
            ApiRegime::FixedIncome => CliRegime::FixedIncome,
            ApiRegime::DeferredWithdrawal => CliRegime::DeferredWithdrawal,
        }
    }
}

/// Simulation parameters shared by every subcommand. Rates are in percent.
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long, default_value_t = 10_000.0, help = "Opening balance")]
    pub opening_amount: f64,
    #[arg(long, default_value_t = 1_000.0, help = "Amount of each periodic contribution")]
    pub contribution_amount: f64,
    #[arg(long, value_enum, default_value_t = CliFrequency::Monthly)]
    pub contribution_frequency: CliFrequency,
    #[arg(long, default_value_t = 8.0, help = "Gross annual return in percent, e.g. 8")]
    pub annual_rate: f64,
    #[arg(long, default_value_t = 15, help = "Projection horizon in whole years")]
    pub horizon_years: u32,
    #[arg(
        long,
        default_value_t = 4,
        help = "Fixed-income reinvestment cycle in whole years"
    )]
    pub cycle_years: u32,
    #[arg(
        long,
        default_value_t = 0,
        help = "Shift of the fund tax calendar; month 1 falls on calendar month 1 + offset"
    )]
    pub fund_calendar_offset: u32,
    #[arg(
        long,
        default_value_t = false,
        help = "Tax the fund's gain accrued since the last calendar event at the horizon"
    )]
    pub fund_residual_tax: bool,
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Tax fixed-income lots that end the horizon mid-cycle"
    )]
    pub fixed_income_residual_tax: bool,
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Move a lot's tax basis to its post-tax value after each periodic tax event"
    )]
    pub reset_basis: bool,
    #[arg(
        long,
        help = "Flat tax rate in percent for fund and fixed income instead of the regressive table"
    )]
    pub flat_tax_rate: Option<f64>,
    #[arg(
        long,
        help = "Flat withdrawal tax rate in percent for the deferred wrapper instead of its table"
    )]
    pub deferred_flat_tax_rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub inputs: SimulationInputs,
    pub regimes: RegimeSet,
}

impl ModelRequest {
    pub fn regime(&self, kind: RegimeKind) -> Regime {
        match kind {
            RegimeKind::Fund => Regime::Fund(self.regimes.fund.clone()),
            RegimeKind::FixedIncome => Regime::FixedIncome(self.regimes.fixed_income.clone()),
            RegimeKind::DeferredWithdrawal => {
                Regime::DeferredWithdrawal(self.regimes.deferred.clone())
            }
        }
    }

    /// Net value of the deferred wrapper at the requested rate, the default
    /// target for equivalent-rate questions.
    pub fn deferred_target(&self) -> TaxLotResult<f64> {
        final_net_value(&self.inputs, &self.regime(RegimeKind::DeferredWithdrawal))
    }

    pub fn equivalent_rate(
        &self,
        kind: RegimeKind,
        target: Option<f64>,
        solver: &EquivalentRateConfig,
    ) -> TaxLotResult<EquivalentRateResult> {
        let target = match target {
            Some(target) => target,
            None => self.deferred_target()?,
        };
        find_equivalent_rate(&self.regime(kind), &self.inputs, target, solver)
    }
}

fn flat_table(flag: &str, percent: Option<f64>, fallback: TaxTable) -> TaxLotResult<TaxTable> {
    match percent {
        None => Ok(fallback),
        Some(rate) if (0.0..=100.0).contains(&rate) => Ok(TaxTable::Flat(rate / 100.0)),
        Some(_) => Err(TaxLotError::invalid(flag, "must be between 0 and 100")),
    }
}

pub fn build_inputs(args: SimulateArgs) -> TaxLotResult<ModelRequest> {
    if !args.opening_amount.is_finite() || args.opening_amount < 0.0 {
        return Err(TaxLotError::invalid("--opening-amount", "must be >= 0"));
    }
    if !args.contribution_amount.is_finite() || args.contribution_amount < 0.0 {
        return Err(TaxLotError::invalid("--contribution-amount", "must be >= 0"));
    }
    if !args.annual_rate.is_finite() || args.annual_rate < -100.0 {
        return Err(TaxLotError::invalid("--annual-rate", "must be >= -100"));
    }
    if args.horizon_years == 0 || args.horizon_years > MAX_HORIZON_YEARS {
        return Err(TaxLotError::invalid(
            "--horizon-years",
            &format!("must be between 1 and {MAX_HORIZON_YEARS}"),
        ));
    }
    if args.cycle_years == 0 {
        return Err(TaxLotError::invalid("--cycle-years", "must be > 0"));
    }
    if args.fund_calendar_offset > 11 {
        return Err(TaxLotError::invalid(
            "--fund-calendar-offset",
            "must be between 0 and 11",
        ));
    }

    let periodic_table = flat_table("--flat-tax-rate", args.flat_tax_rate, TaxTable::Standard)?;
    let deferred_table = flat_table(
        "--deferred-flat-tax-rate",
        args.deferred_flat_tax_rate,
        TaxTable::DeferredWithdrawal,
    )?;

    let mut regimes = RegimeSet::with_cycle_years(args.cycle_years);
    regimes.fund.calendar_offset = args.fund_calendar_offset;
    regimes.fund.levies_residual_terminal_tax = args.fund_residual_tax;
    regimes.fund.reset_basis_on_periodic_tax = args.reset_basis;
    regimes.fund.table = periodic_table;
    regimes.fixed_income.levies_residual_terminal_tax = args.fixed_income_residual_tax;
    regimes.fixed_income.reset_basis_on_periodic_tax = args.reset_basis;
    regimes.fixed_income.table = periodic_table;
    regimes.deferred.table = deferred_table;

    let inputs = SimulationInputs {
        opening_amount: args.opening_amount,
        contribution_amount: args.contribution_amount,
        contribution_frequency: args.contribution_frequency.into(),
        annual_rate: args.annual_rate / 100.0,
        horizon_years: args.horizon_years,
    };
    inputs.validate()?;

    Ok(ModelRequest { inputs, regimes })
}

pub fn default_args_for_api() -> SimulateArgs {
    SimulateArgs {
        opening_amount: 10_000.0,
        contribution_amount: 1_000.0,
        contribution_frequency: CliFrequency::Monthly,
        annual_rate: 8.0,
        horizon_years: 15,
        cycle_years: 4,
        fund_calendar_offset: 0,
        fund_residual_tax: false,
        fixed_income_residual_tax: true,
        reset_basis: true,
        flat_tax_rate: None,
        deferred_flat_tax_rate: None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    opening_amount: Option<f64>,
    contribution_amount: Option<f64>,
    contribution_frequency: Option<ApiFrequency>,
    annual_rate: Option<f64>,
    horizon_years: Option<u32>,
    cycle_years: Option<u32>,

    fund_calendar_offset: Option<u32>,
    fund_residual_tax: Option<bool>,
    fixed_income_residual_tax: Option<bool>,
    reset_basis: Option<bool>,
    flat_tax_rate: Option<f64>,
    deferred_flat_tax_rate: Option<f64>,

    regime: Option<ApiRegime>,
    target: Option<f64>,
}

#[derive(Debug)]
struct ApiRequest {
    model: ModelRequest,
    regime: RegimeKind,
    target: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    pub annual_rate: f64,
    pub monthly_rate: f64,
    #[serde(flatten)]
    pub result: SimulationResult,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub fn router(solver: EquivalentRateConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/compare",
            get(compare_get_handler).post(compare_post_handler),
        )
        .route(
            "/api/equivalent-rate",
            get(equivalent_rate_get_handler).post(equivalent_rate_post_handler),
        )
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(solver)
}

pub async fn run_http_server(config: ServerConfig) -> std::io::Result<()> {
    let host: IpAddr = config.host.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid host {:?}: {e}", config.host),
        )
    })?;
    let addr = SocketAddr::new(host, config.port);
    let app = router(config.solver.to_solver_config());

    let listener = TcpListener::bind(addr).await?;
    info!("tax-lot HTTP API listening on http://{addr}");
    info!("Local access: http://127.0.0.1:{}/api/simulate", config.port);

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

async fn compare_get_handler(
    State(solver): State<EquivalentRateConfig>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    compare_handler_impl(payload, &solver)
}

async fn compare_post_handler(
    State(solver): State<EquivalentRateConfig>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    compare_handler_impl(payload, &solver)
}

async fn equivalent_rate_get_handler(
    State(solver): State<EquivalentRateConfig>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    equivalent_rate_handler_impl(payload, &solver)
}

async fn equivalent_rate_post_handler(
    State(solver): State<EquivalentRateConfig>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    equivalent_rate_handler_impl(payload, &solver)
}

fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    match run_simulation(&request.model, request.regime) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn compare_handler_impl(payload: SimulatePayload, solver: &EquivalentRateConfig) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    match run_comparison(&request.model, solver) {
        Ok(comparison) => json_response(StatusCode::OK, comparison),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn equivalent_rate_handler_impl(
    payload: SimulatePayload,
    solver: &EquivalentRateConfig,
) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    match request
        .model
        .equivalent_rate(request.regime, request.target, solver)
    {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

pub fn run_simulation(model: &ModelRequest, kind: RegimeKind) -> TaxLotResult<SimulateResponse> {
    let result = simulate(&model.inputs, &model.regime(kind))?;
    Ok(SimulateResponse {
        annual_rate: model.inputs.annual_rate,
        monthly_rate: monthly_rate(model.inputs.annual_rate),
        result,
    })
}

pub fn run_comparison(
    model: &ModelRequest,
    solver: &EquivalentRateConfig,
) -> TaxLotResult<RegimeComparison> {
    compare_regimes(&model.inputs, &model.regimes, solver)
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> TaxLotResult<ApiRequest> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| TaxLotError::invalid("payload", &format!("invalid API JSON payload: {e}")))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> TaxLotResult<ApiRequest> {
    let mut args = default_args_for_api();
    let mut regime = CliRegime::Fund;

    if let Some(v) = payload.opening_amount {
        args.opening_amount = v;
    }
    if let Some(v) = payload.contribution_amount {
        args.contribution_amount = v;
    }
    if let Some(v) = payload.contribution_frequency {
        args.contribution_frequency = v.into();
    }
    if let Some(v) = payload.annual_rate {
        args.annual_rate = v;
    }
    if let Some(v) = payload.horizon_years {
        args.horizon_years = v;
    }
    if let Some(v) = payload.cycle_years {
        args.cycle_years = v;
    }

    if let Some(v) = payload.fund_calendar_offset {
        args.fund_calendar_offset = v;
    }
    if let Some(v) = payload.fund_residual_tax {
        args.fund_residual_tax = v;
    }
    if let Some(v) = payload.fixed_income_residual_tax {
        args.fixed_income_residual_tax = v;
    }
    if let Some(v) = payload.reset_basis {
        args.reset_basis = v;
    }
    if payload.flat_tax_rate.is_some() {
        args.flat_tax_rate = payload.flat_tax_rate;
    }
    if payload.deferred_flat_tax_rate.is_some() {
        args.deferred_flat_tax_rate = payload.deferred_flat_tax_rate;
    }

    if let Some(v) = payload.regime {
        regime = v.into();
    }
    if let Some(target) = payload.target {
        if !target.is_finite() || target < 0.0 {
            return Err(TaxLotError::invalid("target", "must be >= 0"));
        }
    }

    Ok(ApiRequest {
        model: build_inputs(args)?,
        regime: regime.into(),
        target: payload.target,
    })
}
