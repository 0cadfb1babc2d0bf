use axum::{
    Router,
    extract::{
        Json, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AnnualLiability, BonusComparison, CombinedRepayment, InterestRule, LoanPlan, PayPeriod,
    PlanParameters, ProjectionInput, ProjectionResult, RepaymentEngine, RepaymentInput,
    RepaymentResult, SalaryTrajectory, TaxYear, convert_threshold_period,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
enum ApiLoanPlan {
    #[serde(rename = "plan-1", alias = "plan1", alias = "plan_1", alias = "1")]
    Plan1,
    #[serde(rename = "plan-2", alias = "plan2", alias = "plan_2", alias = "2")]
    Plan2,
    #[serde(rename = "plan-4", alias = "plan4", alias = "plan_4", alias = "4")]
    Plan4,
    #[serde(rename = "plan-5", alias = "plan5", alias = "plan_5", alias = "5")]
    Plan5,
    #[serde(
        rename = "postgraduate",
        alias = "pg",
        alias = "pgl",
        alias = "postgrad"
    )]
    Postgraduate,
}

impl From<ApiLoanPlan> for LoanPlan {
    fn from(value: ApiLoanPlan) -> Self {
        match value {
            ApiLoanPlan::Plan1 => LoanPlan::Plan1,
            ApiLoanPlan::Plan2 => LoanPlan::Plan2,
            ApiLoanPlan::Plan4 => LoanPlan::Plan4,
            ApiLoanPlan::Plan5 => LoanPlan::Plan5,
            ApiLoanPlan::Postgraduate => LoanPlan::Postgraduate,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiPayPeriod {
    #[serde(alias = "week")]
    Weekly,
    #[serde(alias = "two-weekly")]
    Fortnightly,
    #[serde(alias = "fourWeekly", alias = "four_weekly", alias = "4-weekly")]
    FourWeekly,
    #[serde(alias = "month")]
    Monthly,
    #[serde(alias = "annually", alias = "yearly")]
    Annual,
}

impl From<ApiPayPeriod> for PayPeriod {
    fn from(value: ApiPayPeriod) -> Self {
        match value {
            ApiPayPeriod::Weekly => PayPeriod::Weekly,
            ApiPayPeriod::Fortnightly => PayPeriod::Fortnightly,
            ApiPayPeriod::FourWeekly => PayPeriod::FourWeekly,
            ApiPayPeriod::Monthly => PayPeriod::Monthly,
            ApiPayPeriod::Annual => PayPeriod::Annual,
        }
    }
}

const DEFAULT_PLAN: LoanPlan = LoanPlan::Plan2;
const DEFAULT_PERIOD: PayPeriod = PayPeriod::Monthly;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlansQuery {
    tax_year: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RepaymentPayload {
    income: Option<Decimal>,
    plan: Option<ApiLoanPlan>,
    period: Option<ApiPayPeriod>,
    tax_year: Option<String>,
    unearned_income: Option<Decimal>,
    secondary_job: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AnnualPayload {
    total_income: Option<Decimal>,
    unearned_income: Option<Decimal>,
    paye_withheld: Option<Decimal>,
    plan: Option<ApiLoanPlan>,
    tax_year: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BonusPayload {
    regular_pay: Option<Decimal>,
    bonus: Option<Decimal>,
    plan: Option<ApiLoanPlan>,
    period: Option<ApiPayPeriod>,
    tax_year: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CombinedPayload {
    income: Option<Decimal>,
    plans: Vec<ApiLoanPlan>,
    period: Option<ApiPayPeriod>,
    tax_year: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectionPayload {
    opening_balance: Option<Decimal>,
    plan: Option<ApiLoanPlan>,
    tax_year: Option<String>,
    starting_salary: Option<Decimal>,
    salary_growth: Option<Decimal>,
    salaries: Option<Vec<Decimal>>,
    years: Option<u32>,
    years_already_repaying: Option<u32>,
    interest_rate: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WriteOffPayload {
    plan: Option<ApiLoanPlan>,
    first_due_year: Option<String>,
}

#[derive(Debug)]
struct AnnualRequest {
    total_income: Decimal,
    unearned_income: Decimal,
    paye_withheld: Option<Decimal>,
    plan: LoanPlan,
    tax_year: TaxYear,
}

#[derive(Debug)]
struct BonusRequest {
    regular_pay: Decimal,
    bonus: Decimal,
    plan: LoanPlan,
    period: PayPeriod,
    tax_year: TaxYear,
}

#[derive(Debug)]
struct CombinedRequest {
    income: Decimal,
    plans: Vec<LoanPlan>,
    period: PayPeriod,
    tax_year: TaxYear,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PeriodThreshold {
    period: PayPeriod,
    threshold: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanSummary {
    plan: LoanPlan,
    #[serde(flatten)]
    parameters: PlanParameters,
    period_thresholds: Vec<PeriodThreshold>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlansResponse {
    available_tax_years: Vec<TaxYear>,
    tax_year: TaxYear,
    unearned_income_limit: Decimal,
    plans: Vec<PlanSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnualResponse {
    #[serde(flatten)]
    liability: AnnualLiability,
    #[serde(skip_serializing_if = "Option::is_none")]
    paye_withheld: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    balancing_payment: Option<Decimal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteOffResponse {
    plan: LoanPlan,
    first_due_year: TaxYear,
    write_off_date: NaiveDate,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn require(value: Option<Decimal>, name: &str) -> Result<Decimal, String> {
    value.ok_or_else(|| format!("{name} is required"))
}

fn resolve_tax_year(engine: &RepaymentEngine, raw: Option<&str>) -> Result<TaxYear, String> {
    match raw {
        Some(raw) => raw.parse::<TaxYear>().map_err(|e| e.to_string()),
        None => Ok(engine.table().latest().tax_year),
    }
}

fn percent(value: Decimal) -> Decimal {
    value / Decimal::ONE_HUNDRED
}

fn repayment_input_from_payload(
    engine: &RepaymentEngine,
    payload: RepaymentPayload,
) -> Result<RepaymentInput, String> {
    Ok(RepaymentInput {
        income: require(payload.income, "income")?,
        plan: payload.plan.map(Into::into).unwrap_or(DEFAULT_PLAN),
        period: payload.period.map(Into::into).unwrap_or(DEFAULT_PERIOD),
        tax_year: resolve_tax_year(engine, payload.tax_year.as_deref())?,
        unearned_income: payload.unearned_income,
        secondary_job: payload.secondary_job.unwrap_or(false),
    })
}

fn annual_request_from_payload(
    engine: &RepaymentEngine,
    payload: AnnualPayload,
) -> Result<AnnualRequest, String> {
    Ok(AnnualRequest {
        total_income: require(payload.total_income, "totalIncome")?,
        unearned_income: payload.unearned_income.unwrap_or(Decimal::ZERO),
        paye_withheld: payload.paye_withheld,
        plan: payload.plan.map(Into::into).unwrap_or(DEFAULT_PLAN),
        tax_year: resolve_tax_year(engine, payload.tax_year.as_deref())?,
    })
}

fn bonus_request_from_payload(
    engine: &RepaymentEngine,
    payload: BonusPayload,
) -> Result<BonusRequest, String> {
    Ok(BonusRequest {
        regular_pay: require(payload.regular_pay, "regularPay")?,
        bonus: require(payload.bonus, "bonus")?,
        plan: payload.plan.map(Into::into).unwrap_or(DEFAULT_PLAN),
        period: payload.period.map(Into::into).unwrap_or(DEFAULT_PERIOD),
        tax_year: resolve_tax_year(engine, payload.tax_year.as_deref())?,
    })
}

fn combined_request_from_payload(
    engine: &RepaymentEngine,
    payload: CombinedPayload,
) -> Result<CombinedRequest, String> {
    if payload.plans.is_empty() {
        return Err("plans must list at least one loan plan".to_string());
    }
    let mut plans: Vec<LoanPlan> = payload.plans.into_iter().map(Into::into).collect();
    plans.sort();
    plans.dedup();

    Ok(CombinedRequest {
        income: require(payload.income, "income")?,
        plans,
        period: payload.period.map(Into::into).unwrap_or(DEFAULT_PERIOD),
        tax_year: resolve_tax_year(engine, payload.tax_year.as_deref())?,
    })
}

fn projection_input_from_payload(
    engine: &RepaymentEngine,
    payload: ProjectionPayload,
) -> Result<ProjectionInput, String> {
    let plan = payload.plan.map(Into::into).unwrap_or(DEFAULT_PLAN);
    let start_year = resolve_tax_year(engine, payload.tax_year.as_deref())?;
    let years_already_repaying = payload.years_already_repaying.unwrap_or(0);

    let salary = match (payload.salaries, payload.starting_salary) {
        (Some(_), Some(_)) => {
            return Err("provide either salaries or startingSalary, not both".to_string());
        }
        (Some(schedule), None) => SalaryTrajectory::Schedule(schedule),
        (None, Some(starting_salary)) => SalaryTrajectory::Growth {
            starting_salary,
            annual_growth: percent(payload.salary_growth.unwrap_or(Decimal::ZERO)),
        },
        (None, None) => return Err("startingSalary or salaries is required".to_string()),
    };

    let years = match payload.years {
        Some(years) => years,
        None => engine
            .plan_parameters(plan, start_year)
            .map_err(|e| e.to_string())?
            .write_off_years
            .saturating_sub(years_already_repaying),
    };

    Ok(ProjectionInput {
        opening_balance: require(payload.opening_balance, "openingBalance")?,
        plan,
        salary,
        start_year,
        years,
        years_already_repaying,
        interest_override: payload
            .interest_rate
            .map(|rate| InterestRule::Fixed { rate: percent(rate) }),
    })
}

fn build_plans_response(
    engine: &RepaymentEngine,
    query: PlansQuery,
) -> Result<PlansResponse, String> {
    let tax_year = resolve_tax_year(engine, query.tax_year.as_deref())?;
    let year = engine.year_parameters(tax_year).map_err(|e| e.to_string())?;
    let plans = LoanPlan::ALL
        .iter()
        .map(|&plan| {
            let parameters = year.plans.get(plan).clone();
            let period_thresholds = PayPeriod::ALL
                .iter()
                .map(|&period| PeriodThreshold {
                    period,
                    threshold: convert_threshold_period(parameters.threshold, period),
                })
                .collect();
            PlanSummary {
                plan,
                parameters,
                period_thresholds,
            }
        })
        .collect();

    Ok(PlansResponse {
        available_tax_years: engine.tax_years(),
        tax_year,
        unearned_income_limit: year.unearned_income_limit,
        plans,
    })
}

fn run_repayment(
    engine: &RepaymentEngine,
    payload: RepaymentPayload,
) -> Result<RepaymentResult, String> {
    let input = repayment_input_from_payload(engine, payload)?;
    engine.assess_period(&input).map_err(|e| e.to_string())
}

fn run_annual(engine: &RepaymentEngine, payload: AnnualPayload) -> Result<AnnualResponse, String> {
    let request = annual_request_from_payload(engine, payload)?;
    match request.paye_withheld {
        Some(withheld) => {
            let reconciliation = engine
                .reconcile_annual_liability(
                    request.total_income,
                    request.unearned_income,
                    withheld,
                    request.plan,
                    request.tax_year,
                )
                .map_err(|e| e.to_string())?;
            Ok(AnnualResponse {
                liability: reconciliation.liability,
                paye_withheld: Some(reconciliation.paye_withheld),
                balancing_payment: Some(reconciliation.balancing_payment),
            })
        }
        None => {
            let liability = engine
                .calculate_annual_liability(
                    request.total_income,
                    request.unearned_income,
                    request.plan,
                    request.tax_year,
                )
                .map_err(|e| e.to_string())?;
            Ok(AnnualResponse {
                liability,
                paye_withheld: None,
                balancing_payment: None,
            })
        }
    }
}

fn run_bonus(engine: &RepaymentEngine, payload: BonusPayload) -> Result<BonusComparison, String> {
    let request = bonus_request_from_payload(engine, payload)?;
    engine
        .compare_bonus_period(
            request.regular_pay,
            request.bonus,
            request.plan,
            request.period,
            request.tax_year,
        )
        .map_err(|e| e.to_string())
}

fn run_combined(
    engine: &RepaymentEngine,
    payload: CombinedPayload,
) -> Result<CombinedRepayment, String> {
    let request = combined_request_from_payload(engine, payload)?;
    engine
        .calculate_combined_period_repayment(
            request.income,
            &request.plans,
            request.period,
            request.tax_year,
        )
        .map_err(|e| e.to_string())
}

fn run_projection(
    engine: &RepaymentEngine,
    payload: ProjectionPayload,
) -> Result<ProjectionResult, String> {
    let input = projection_input_from_payload(engine, payload)?;
    engine.project_balance(&input).map_err(|e| e.to_string())
}

fn run_write_off(
    engine: &RepaymentEngine,
    payload: WriteOffPayload,
) -> Result<WriteOffResponse, String> {
    let plan = payload.plan.map(Into::into).unwrap_or(DEFAULT_PLAN);
    let first_due_year = resolve_tax_year(engine, payload.first_due_year.as_deref())?;
    let write_off_date = engine.estimate_write_off_date(plan, first_due_year);
    Ok(WriteOffResponse {
        plan,
        first_due_year,
        write_off_date,
    })
}

pub fn router(engine: RepaymentEngine) -> Router {
    Router::new()
        .route("/api/plans", get(plans_handler))
        .route(
            "/api/repayment",
            get(repayment_get_handler).post(repayment_post_handler),
        )
        .route(
            "/api/annual",
            get(annual_get_handler).post(annual_post_handler),
        )
        .route("/api/bonus", get(bonus_get_handler).post(bonus_post_handler))
        .route("/api/combined", axum::routing::post(combined_post_handler))
        .route(
            "/api/projection",
            get(projection_get_handler).post(projection_post_handler),
        )
        .route(
            "/api/write-off",
            get(write_off_get_handler).post(write_off_post_handler),
        )
        .fallback(not_found_handler)
        .with_state(engine)
}

pub async fn run_http_server(port: u16, engine: RepaymentEngine) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(engine);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "student loan API listening");
    info!("local access: http://127.0.0.1:{port}/api/plans");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn plans_handler(
    State(engine): State<RepaymentEngine>,
    query: Result<Query<PlansQuery>, QueryRejection>,
) -> Response {
    respond(
        "plans",
        query_payload(query).and_then(|query| build_plans_response(&engine, query)),
    )
}

async fn repayment_get_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Query<RepaymentPayload>, QueryRejection>,
) -> Response {
    respond(
        "repayment",
        query_payload(payload).and_then(|payload| run_repayment(&engine, payload)),
    )
}

async fn repayment_post_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Json<RepaymentPayload>, JsonRejection>,
) -> Response {
    respond(
        "repayment",
        json_payload(payload).and_then(|payload| run_repayment(&engine, payload)),
    )
}

async fn annual_get_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Query<AnnualPayload>, QueryRejection>,
) -> Response {
    respond(
        "annual",
        query_payload(payload).and_then(|payload| run_annual(&engine, payload)),
    )
}

async fn annual_post_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Json<AnnualPayload>, JsonRejection>,
) -> Response {
    respond(
        "annual",
        json_payload(payload).and_then(|payload| run_annual(&engine, payload)),
    )
}

async fn bonus_get_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Query<BonusPayload>, QueryRejection>,
) -> Response {
    respond(
        "bonus",
        query_payload(payload).and_then(|payload| run_bonus(&engine, payload)),
    )
}

async fn bonus_post_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Json<BonusPayload>, JsonRejection>,
) -> Response {
    respond(
        "bonus",
        json_payload(payload).and_then(|payload| run_bonus(&engine, payload)),
    )
}

async fn combined_post_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Json<CombinedPayload>, JsonRejection>,
) -> Response {
    respond(
        "combined",
        json_payload(payload).and_then(|payload| run_combined(&engine, payload)),
    )
}

async fn projection_get_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Query<ProjectionPayload>, QueryRejection>,
) -> Response {
    respond(
        "projection",
        query_payload(payload).and_then(|payload| run_projection(&engine, payload)),
    )
}

async fn projection_post_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Json<ProjectionPayload>, JsonRejection>,
) -> Response {
    respond(
        "projection",
        json_payload(payload).and_then(|payload| run_projection(&engine, payload)),
    )
}

async fn write_off_get_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Query<WriteOffPayload>, QueryRejection>,
) -> Response {
    respond(
        "write-off",
        query_payload(payload).and_then(|payload| run_write_off(&engine, payload)),
    )
}

async fn write_off_post_handler(
    State(engine): State<RepaymentEngine>,
    payload: Result<Json<WriteOffPayload>, JsonRejection>,
) -> Response {
    respond(
        "write-off",
        json_payload(payload).and_then(|payload| run_write_off(&engine, payload)),
    )
}

/// Malformed bodies and query strings get the same JSON error as a failed
/// calculation instead of axum's plain-text rejection.
fn json_payload<T>(extracted: Result<Json<T>, JsonRejection>) -> Result<T, String> {
    extracted
        .map(|Json(payload)| payload)
        .map_err(|rejection| rejection.body_text())
}

fn query_payload<T>(extracted: Result<Query<T>, QueryRejection>) -> Result<T, String> {
    extracted
        .map(|Query(payload)| payload)
        .map_err(|rejection| rejection.body_text())
}

fn respond<T: Serialize>(endpoint: &str, result: Result<T, String>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(msg) => {
            warn!(endpoint, error = %msg, "rejected calculation request");
            error_response(StatusCode::BAD_REQUEST, &msg)
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
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
