use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{Local, NaiveDate};
use clap::{Args, ValueEnum};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    CashflowStream, FlatRatePolicy, Horizon, MarginalBracketPolicy, Period, ProjectionInputs,
    ProjectionMode, RateConfig, Series, TaxBracket, TaxRule, ValueBasis, run_model,
};

const INDEX_HTML: &str = include_str!("../../web/index.html");
const STYLES_CSS: &str = include_str!("../../web/styles.css");
const APP_JS: &str = include_str!("../../web/app.js");

/// Route, content type and body of every bundled page asset.
const STATIC_ASSETS: [(&str, &str, &str); 4] = [
    ("/", "text/html; charset=utf-8", INDEX_HTML),
    ("/index.html", "text/html; charset=utf-8", INDEX_HTML),
    ("/styles.css", "text/css; charset=utf-8", STYLES_CSS),
    ("/app.js", "application/javascript; charset=utf-8", APP_JS),
];

/// Longest span a single request may project; keeps response bodies bounded.
pub const MAX_HORIZON_YEARS: u32 = 200;

/// Open-ended streams in the default scenario run until this year.
const OPEN_ENDED_YEAR: i32 = 2200;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliProjectionMode {
    SimpleAdditive,
    TaxedCompounding,
}

impl From<CliProjectionMode> for ProjectionMode {
    fn from(value: CliProjectionMode) -> Self {
        match value {
            CliProjectionMode::SimpleAdditive => ProjectionMode::SimpleAdditive,
            CliProjectionMode::TaxedCompounding => ProjectionMode::TaxedCompounding,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliTaxMode {
    Flat,
    Marginal,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliValueBasis {
    Nominal,
    Real,
}

impl From<CliValueBasis> for ValueBasis {
    fn from(value: CliValueBasis) -> Self {
        match value {
            CliValueBasis::Nominal => ValueBasis::Nominal,
            CliValueBasis::Real => ValueBasis::Real,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiProjectionMode {
    #[serde(alias = "simple", alias = "simpleAdditive", alias = "simple_additive")]
    SimpleAdditive,
    #[serde(alias = "taxed", alias = "taxedCompounding", alias = "taxed_compounding")]
    TaxedCompounding,
}

impl From<ApiProjectionMode> for CliProjectionMode {
    fn from(value: ApiProjectionMode) -> Self {
        match value {
            ApiProjectionMode::SimpleAdditive => CliProjectionMode::SimpleAdditive,
            ApiProjectionMode::TaxedCompounding => CliProjectionMode::TaxedCompounding,
        }
    }
}

impl From<ProjectionMode> for ApiProjectionMode {
    fn from(value: ProjectionMode) -> Self {
        match value {
            ProjectionMode::SimpleAdditive => ApiProjectionMode::SimpleAdditive,
            ProjectionMode::TaxedCompounding => ApiProjectionMode::TaxedCompounding,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiTaxMode {
    #[serde(alias = "flatRate", alias = "flat_rate")]
    Flat,
    #[serde(alias = "brackets", alias = "marginalBrackets", alias = "marginal_brackets")]
    Marginal,
}

impl From<ApiTaxMode> for CliTaxMode {
    fn from(value: ApiTaxMode) -> Self {
        match value {
            ApiTaxMode::Flat => CliTaxMode::Flat,
            ApiTaxMode::Marginal => CliTaxMode::Marginal,
        }
    }
}

impl From<&TaxRule> for ApiTaxMode {
    fn from(value: &TaxRule) -> Self {
        match value {
            TaxRule::Flat(_) => ApiTaxMode::Flat,
            TaxRule::Marginal(_) => ApiTaxMode::Marginal,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiValueBasis {
    Nominal,
    #[serde(alias = "inflation-adjusted", alias = "inflationAdjusted")]
    Real,
}

impl From<ApiValueBasis> for CliValueBasis {
    fn from(value: ApiValueBasis) -> Self {
        match value {
            ApiValueBasis::Nominal => CliValueBasis::Nominal,
            ApiValueBasis::Real => CliValueBasis::Real,
        }
    }
}

impl From<ValueBasis> for ApiValueBasis {
    fn from(value: ValueBasis) -> Self {
        match value {
            ValueBasis::Nominal => ApiValueBasis::Nominal,
            ValueBasis::Real => ApiValueBasis::Real,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiPeriod {
    #[serde(alias = "MONTHLY", alias = "month")]
    Monthly,
    #[serde(alias = "ANNUALLY", alias = "annual", alias = "yearly")]
    Annually,
}

impl From<ApiPeriod> for Period {
    fn from(value: ApiPeriod) -> Self {
        match value {
            ApiPeriod::Monthly => Period::Monthly,
            ApiPeriod::Annually => Period::Annually,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCashflow {
    amount: f64,
    period: ApiPeriod,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl From<ApiCashflow> for CashflowStream {
    fn from(value: ApiCashflow) -> Self {
        CashflowStream {
            amount: value.amount,
            period: value.period.into(),
            start_date: value.start_date,
            end_date: value.end_date,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ApiTaxBracket {
    rate: f64,
    ceiling: Option<f64>,
}

impl From<ApiTaxBracket> for TaxBracket {
    fn from(value: ApiTaxBracket) -> Self {
        TaxBracket {
            rate: value.rate / 100.0,
            ceiling: value.ceiling.unwrap_or(f64::INFINITY),
        }
    }
}

/// HTTP form of [`ProjectArgs`]; every field is optional.
///
/// `incomes` and `expenses` replace the default streams wholesale. Since
/// `retirementYear` only moves the default salary stream, sending it together
/// with custom `incomes` is rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectPayload {
    savings: Option<f64>,
    retirement: Option<f64>,
    annual_income: Option<f64>,
    annual_survival_expense: Option<f64>,
    rent: Option<f64>,
    inflation: Option<f64>,
    capital: Option<f64>,
    retirement_year: Option<i32>,

    horizon_start: Option<i32>,
    horizon_years: Option<u32>,

    mode: Option<ApiProjectionMode>,
    tax_mode: Option<ApiTaxMode>,
    flat_tax_rate: Option<f64>,
    tax_brackets: Option<Vec<ApiTaxBracket>>,
    value_basis: Option<ApiValueBasis>,

    incomes: Option<Vec<ApiCashflow>>,
    expenses: Option<Vec<ApiCashflow>>,
}

/// Scenario inputs for one projection, mirroring the calculator form.
///
/// Rates are given in percent and converted to fractions by `build_inputs`.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[arg(long, default_value_t = 0.0, help = "Total cash on hand")]
    savings: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Retirement holdings, added to savings for the starting balance"
    )]
    retirement: f64,
    #[arg(long, default_value_t = 70_000.0)]
    annual_income: f64,
    #[arg(long, default_value_t = 60_000.0, help = "Annual cost of living")]
    annual_survival_expense: f64,
    #[arg(long, default_value_t = 1_100.0, help = "Monthly rent")]
    rent: f64,
    #[arg(long, default_value_t = 2.0, help = "Annual inflation in percent")]
    inflation_rate: f64,
    #[arg(
        long,
        default_value_t = 6.0,
        help = "Nominal annual capital growth in percent, compounded monthly"
    )]
    capital_growth_rate: f64,
    #[arg(long, default_value_t = 2050, help = "Year the salary stream stops")]
    retirement_year: i32,
    #[arg(long, default_value_t = crate::core::DEFAULT_HORIZON_START_YEAR)]
    horizon_start: i32,
    #[arg(long, default_value_t = crate::core::DEFAULT_HORIZON_YEARS)]
    horizon_years: u32,
    #[arg(long, value_enum, default_value_t = CliProjectionMode::TaxedCompounding)]
    mode: CliProjectionMode,
    #[arg(long, value_enum, default_value_t = CliTaxMode::Flat)]
    tax_mode: CliTaxMode,
    #[arg(long, default_value_t = 30.0, help = "Flat income tax in percent")]
    flat_tax_rate: f64,
    #[arg(
        long = "tax-bracket",
        value_parser = parse_tax_bracket,
        help = "Marginal bracket as RATE[:CEILING], rate in percent, annual ceiling; repeatable"
    )]
    tax_brackets: Vec<TaxBracket>,
    #[arg(long, value_enum, default_value_t = CliValueBasis::Nominal)]
    value_basis: CliValueBasis,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionResponse {
    mode: ApiProjectionMode,
    tax_mode: ApiTaxMode,
    value_basis: ApiValueBasis,
    starting_balance: f64,
    horizon_start: i32,
    horizon_years: u32,
    months: usize,
    final_balance: Option<f64>,
    series: Series,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn parse_tax_bracket(raw: &str) -> Result<TaxBracket, String> {
    let (rate, ceiling) = match raw.split_once(':') {
        Some((rate, ceiling)) => (rate, Some(ceiling)),
        None => (raw, None),
    };
    let rate = rate
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid bracket rate '{rate}': {e}"))?;
    let ceiling = match ceiling.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => c
            .parse::<f64>()
            .map_err(|e| format!("invalid bracket ceiling '{c}': {e}"))?,
        None => f64::INFINITY,
    };
    Ok(TaxBracket {
        rate: rate / 100.0,
        ceiling,
    })
}

fn first_of_february(year: i32, flag: &str) -> Result<NaiveDate, String> {
    NaiveDate::from_ymd_opt(year, 2, 1).ok_or_else(|| format!("{flag} is out of range"))
}

fn build_inputs(args: ProjectArgs, today: NaiveDate) -> Result<ProjectionInputs, String> {
    if !(0.0..=100.0).contains(&args.flat_tax_rate) {
        return Err("--flat-tax-rate must be between 0 and 100".to_string());
    }

    let tax = match args.tax_mode {
        CliTaxMode::Flat => TaxRule::Flat(FlatRatePolicy::from_tax_rate(args.flat_tax_rate / 100.0)),
        CliTaxMode::Marginal => {
            if args.tax_brackets.is_empty() {
                return Err("--tax-bracket is required when --tax-mode is marginal".to_string());
            }
            let policy = MarginalBracketPolicy::new(args.tax_brackets)
                .map_err(|e| format!("--tax-bracket: {e}"))?;
            TaxRule::Marginal(policy)
        }
    };

    if args.horizon_years > MAX_HORIZON_YEARS {
        return Err(format!("--horizon-years must be <= {MAX_HORIZON_YEARS}"));
    }

    let horizon =
        Horizon::new(args.horizon_start, args.horizon_years).map_err(|e| e.to_string())?;

    let retirement_date = first_of_february(args.retirement_year, "--retirement-year")?;
    let open_end = first_of_february(OPEN_ENDED_YEAR, "open-ended stream end")?;

    Ok(ProjectionInputs {
        starting_balance: args.savings + args.retirement,
        incomes: vec![CashflowStream::annually(
            args.annual_income,
            today,
            retirement_date,
        )],
        expenses: vec![
            CashflowStream::annually(args.annual_survival_expense, today, open_end),
            CashflowStream::monthly(args.rent, today, open_end),
        ],
        rates: RateConfig {
            inflation: args.inflation_rate / 100.0,
            capital: args.capital_growth_rate / 100.0,
        },
        horizon,
        mode: args.mode.into(),
        tax,
        value_basis: args.value_basis.into(),
    })
}

/// Runs one projection from command-line arguments and renders the JSON body
/// the HTTP API would return.
pub fn run_projection_command(args: ProjectArgs) -> Result<String, String> {
    let today = Local::now().date_naive();
    let inputs = build_inputs(args, today)?;
    let series = run_model(&inputs).map_err(|e| e.to_string())?;
    let response = build_projection_response(&inputs, series);
    serde_json::to_string_pretty(&response).map_err(|e| format!("failed to encode projection: {e}"))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = static_routes()
        .route(
            "/api/projection",
            get(projection_get_handler).post(projection_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!("cashflow projection API listening on http://{addr}");
    info!("local access: http://127.0.0.1:{port}/");

    axum::serve(listener, app).await
}

fn static_routes() -> Router {
    STATIC_ASSETS
        .iter()
        .fold(Router::new(), |router, &(path, content_type, body)| {
            router.route(
                path,
                get(move || async move { static_asset(content_type, body) }),
            )
        })
}

fn static_asset(content_type: &'static str, body: &'static str) -> Response {
    with_cache_control(([(header::CONTENT_TYPE, content_type)], body))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn projection_get_handler(Query(payload): Query<ProjectPayload>) -> Response {
    projection_handler_impl(payload).await
}

async fn projection_post_handler(Json(payload): Json<ProjectPayload>) -> Response {
    projection_handler_impl(payload).await
}

async fn projection_handler_impl(payload: ProjectPayload) -> Response {
    let today = Local::now().date_naive();
    let inputs = match inputs_from_payload(payload, today) {
        Ok(inputs) => inputs,
        Err(msg) => {
            warn!("rejected projection request: {msg}");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    let series = match run_model(&inputs) {
        Ok(series) => series,
        Err(e) => {
            warn!("rejected projection request: {e}");
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    json_response(StatusCode::OK, build_projection_response(&inputs, series))
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
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
fn inputs_from_json(json: &str, today: NaiveDate) -> Result<ProjectionInputs, String> {
    let payload = serde_json::from_str::<ProjectPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    inputs_from_payload(payload, today)
}

fn inputs_from_payload(payload: ProjectPayload, today: NaiveDate) -> Result<ProjectionInputs, String> {
    if payload.incomes.is_some() && payload.retirement_year.is_some() {
        return Err(
            "retirementYear only applies to the default salary; set endDate on custom incomes"
                .to_string(),
        );
    }

    let mut args = default_args_for_api();

    if let Some(v) = payload.savings {
        args.savings = v;
    }
    if let Some(v) = payload.retirement {
        args.retirement = v;
    }
    if let Some(v) = payload.annual_income {
        args.annual_income = v;
    }
    if let Some(v) = payload.annual_survival_expense {
        args.annual_survival_expense = v;
    }
    if let Some(v) = payload.rent {
        args.rent = v;
    }
    if let Some(v) = payload.inflation {
        args.inflation_rate = v;
    }
    if let Some(v) = payload.capital {
        args.capital_growth_rate = v;
    }
    if let Some(v) = payload.retirement_year {
        args.retirement_year = v;
    }
    if let Some(v) = payload.horizon_start {
        args.horizon_start = v;
    }
    if let Some(v) = payload.horizon_years {
        args.horizon_years = v;
    }
    if let Some(v) = payload.mode {
        args.mode = v.into();
    }
    if let Some(v) = payload.tax_mode {
        args.tax_mode = v.into();
    }
    if let Some(v) = payload.flat_tax_rate {
        args.flat_tax_rate = v;
    }
    if let Some(v) = payload.tax_brackets {
        args.tax_brackets = v.into_iter().map(TaxBracket::from).collect();
    }
    if let Some(v) = payload.value_basis {
        args.value_basis = v.into();
    }

    let mut inputs = build_inputs(args, today)?;

    if let Some(incomes) = payload.incomes {
        inputs.incomes = incomes.into_iter().map(CashflowStream::from).collect();
    }
    if let Some(expenses) = payload.expenses {
        inputs.expenses = expenses.into_iter().map(CashflowStream::from).collect();
    }

    Ok(inputs)
}

fn default_args_for_api() -> ProjectArgs {
    ProjectArgs {
        savings: 0.0,
        retirement: 0.0,
        annual_income: 70_000.0,
        annual_survival_expense: 60_000.0,
        rent: 1_100.0,
        inflation_rate: 2.0,
        capital_growth_rate: 6.0,
        retirement_year: 2050,
        horizon_start: crate::core::DEFAULT_HORIZON_START_YEAR,
        horizon_years: crate::core::DEFAULT_HORIZON_YEARS,
        mode: CliProjectionMode::TaxedCompounding,
        tax_mode: CliTaxMode::Flat,
        flat_tax_rate: 30.0,
        tax_brackets: Vec::new(),
        value_basis: CliValueBasis::Nominal,
    }
}

fn build_projection_response(inputs: &ProjectionInputs, series: Series) -> ProjectionResponse {
    ProjectionResponse {
        mode: inputs.mode.into(),
        tax_mode: (&inputs.tax).into(),
        value_basis: inputs.value_basis.into(),
        starting_balance: inputs.starting_balance,
        horizon_start: inputs.horizon.start_year(),
        horizon_years: inputs.horizon.years(),
        months: series.len(),
        final_balance: series.last_value(),
        series,
    }
}
