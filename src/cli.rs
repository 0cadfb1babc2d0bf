use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

use crate::core::{
    InterestRule, LoanPlan, ParameterTable, PayPeriod, ProjectionInput, RepaymentEngine,
    RepaymentInput, SalaryTrajectory, TaxYear, convert_threshold_period,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliLoanPlan {
    #[value(name = "plan-1", alias = "plan1", alias = "plan_1", alias = "1")]
    Plan1,
    #[value(name = "plan-2", alias = "plan2", alias = "plan_2", alias = "2")]
    Plan2,
    #[value(name = "plan-4", alias = "plan4", alias = "plan_4", alias = "4")]
    Plan4,
    #[value(name = "plan-5", alias = "plan5", alias = "plan_5", alias = "5")]
    Plan5,
    #[value(name = "postgraduate", alias = "pg", alias = "pgl", alias = "postgrad")]
    Postgraduate,
}

impl From<CliLoanPlan> for LoanPlan {
    fn from(value: CliLoanPlan) -> Self {
        match value {
            CliLoanPlan::Plan1 => LoanPlan::Plan1,
            CliLoanPlan::Plan2 => LoanPlan::Plan2,
            CliLoanPlan::Plan4 => LoanPlan::Plan4,
            CliLoanPlan::Plan5 => LoanPlan::Plan5,
            CliLoanPlan::Postgraduate => LoanPlan::Postgraduate,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliPayPeriod {
    #[value(alias = "week")]
    Weekly,
    #[value(alias = "two-weekly")]
    Fortnightly,
    #[value(alias = "fourWeekly", alias = "four_weekly", alias = "4-weekly")]
    FourWeekly,
    #[value(alias = "month")]
    Monthly,
    #[value(alias = "annually", alias = "yearly")]
    Annual,
}

impl From<CliPayPeriod> for PayPeriod {
    fn from(value: CliPayPeriod) -> Self {
        match value {
            CliPayPeriod::Weekly => PayPeriod::Weekly,
            CliPayPeriod::Fortnightly => PayPeriod::Fortnightly,
            CliPayPeriod::FourWeekly => PayPeriod::FourWeekly,
            CliPayPeriod::Monthly => PayPeriod::Monthly,
            CliPayPeriod::Annual => PayPeriod::Annual,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "studentloan",
    version,
    about = "UK student loan repayment calculator (Plans 1, 2, 4, 5 and Postgraduate)"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "STUDENTLOAN_PARAMETERS",
        help = "TOML parameter table to use instead of the built-in one"
    )]
    pub parameters: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the calculators as a JSON API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Deduction for a single pay period
    Repay(RepayArgs),
    /// Annual liability, optionally reconciled against PAYE already withheld
    Annual(AnnualArgs),
    /// Extra deduction taken in a pay period that includes a bonus
    Bonus(BonusArgs),
    /// Deduction for a borrower holding more than one plan
    Combined(CombinedArgs),
    /// Year-by-year balance projection until repayment or write-off
    Project(ProjectArgs),
    /// Date the remaining balance is written off
    WriteOff(WriteOffArgs),
    /// Thresholds and rates for a tax year
    Plans {
        #[arg(long, help = "Tax year, e.g. 2025-26; defaults to the latest in the table")]
        tax_year: Option<TaxYear>,
    },
}

#[derive(Args, Debug)]
pub struct RepayArgs {
    #[arg(long, help = "Gross pay for the period")]
    pub income: Decimal,
    #[arg(long, value_enum, default_value_t = CliLoanPlan::Plan2)]
    pub plan: CliLoanPlan,
    #[arg(long, value_enum, default_value_t = CliPayPeriod::Monthly)]
    pub period: CliPayPeriod,
    #[arg(long)]
    pub tax_year: Option<TaxYear>,
    #[arg(long, help = "Unearned income for the tax year (savings, dividends, rent)")]
    pub unearned_income: Option<Decimal>,
    #[arg(long, help = "This pay comes from a second job")]
    pub secondary_job: bool,
}

#[derive(Args, Debug)]
pub struct AnnualArgs {
    #[arg(long, help = "Earned income for the tax year, including self-employed profit")]
    pub income: Decimal,
    #[arg(long, default_value_t = Decimal::ZERO)]
    pub unearned_income: Decimal,
    #[arg(long, help = "Student loan deductions already taken through payroll")]
    pub paye_withheld: Option<Decimal>,
    #[arg(long, value_enum, default_value_t = CliLoanPlan::Plan2)]
    pub plan: CliLoanPlan,
    #[arg(long)]
    pub tax_year: Option<TaxYear>,
}

#[derive(Args, Debug)]
pub struct BonusArgs {
    #[arg(long, help = "Regular gross pay per period")]
    pub regular_pay: Decimal,
    #[arg(long)]
    pub bonus: Decimal,
    #[arg(long, value_enum, default_value_t = CliLoanPlan::Plan2)]
    pub plan: CliLoanPlan,
    #[arg(long, value_enum, default_value_t = CliPayPeriod::Monthly)]
    pub period: CliPayPeriod,
    #[arg(long)]
    pub tax_year: Option<TaxYear>,
}

#[derive(Args, Debug)]
pub struct CombinedArgs {
    #[arg(long)]
    pub income: Decimal,
    #[arg(long, value_enum, value_delimiter = ',', required = true)]
    pub plans: Vec<CliLoanPlan>,
    #[arg(long, value_enum, default_value_t = CliPayPeriod::Monthly)]
    pub period: CliPayPeriod,
    #[arg(long)]
    pub tax_year: Option<TaxYear>,
}

#[derive(Args, Debug)]
pub struct ProjectArgs {
    #[arg(long, help = "Outstanding balance at the start of the first projected year")]
    pub balance: Decimal,
    #[arg(long, value_enum, default_value_t = CliLoanPlan::Plan2)]
    pub plan: CliLoanPlan,
    #[arg(long, help = "First projected tax year; must be in the parameter table")]
    pub tax_year: Option<TaxYear>,
    #[arg(long, conflicts_with = "salaries", help = "Starting annual salary")]
    pub salary: Option<Decimal>,
    #[arg(
        long,
        default_value_t = Decimal::ZERO,
        help = "Annual salary growth in percent"
    )]
    pub growth: Decimal,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Explicit salary per year; the last value repeats"
    )]
    pub salaries: Option<Vec<Decimal>>,
    #[arg(long, help = "Years to project; defaults to the remaining write-off term")]
    pub years: Option<u32>,
    #[arg(long, default_value_t = 0)]
    pub years_already_repaying: u32,
    #[arg(long, help = "Fixed interest rate in percent, replacing the plan's rule")]
    pub interest_rate: Option<Decimal>,
}

#[derive(Args, Debug)]
pub struct WriteOffArgs {
    #[arg(long, value_enum, default_value_t = CliLoanPlan::Plan2)]
    pub plan: CliLoanPlan,
    #[arg(long, help = "Tax year repayments were first due")]
    pub first_due_year: TaxYear,
}

pub fn load_engine(cli: &Cli) -> anyhow::Result<RepaymentEngine> {
    let table = match &cli.parameters {
        Some(path) => Arc::new(
            ParameterTable::load(path)
                .with_context(|| format!("loading parameters from {}", path.display()))?,
        ),
        None => ParameterTable::builtin(),
    };
    Ok(RepaymentEngine::new(table))
}

fn year_or_latest(engine: &RepaymentEngine, tax_year: Option<TaxYear>) -> TaxYear {
    tax_year.unwrap_or_else(|| engine.table().latest().tax_year)
}

fn percent(value: Decimal) -> Decimal {
    value / Decimal::ONE_HUNDRED
}

fn pretty<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn build_projection_input(
    engine: &RepaymentEngine,
    args: &ProjectArgs,
) -> anyhow::Result<ProjectionInput> {
    let plan = LoanPlan::from(args.plan);
    let start_year = year_or_latest(engine, args.tax_year);

    let salary = match (&args.salaries, args.salary) {
        (Some(schedule), _) => SalaryTrajectory::Schedule(schedule.clone()),
        (None, Some(starting_salary)) => SalaryTrajectory::Growth {
            starting_salary,
            annual_growth: percent(args.growth),
        },
        (None, None) => bail!("--salary or --salaries is required"),
    };

    let years = match args.years {
        Some(years) => years,
        None => engine
            .plan_parameters(plan, start_year)?
            .write_off_years
            .saturating_sub(args.years_already_repaying),
    };

    Ok(ProjectionInput {
        opening_balance: args.balance,
        plan,
        salary,
        start_year,
        years,
        years_already_repaying: args.years_already_repaying,
        interest_override: args
            .interest_rate
            .map(|rate| InterestRule::Fixed { rate: percent(rate) }),
    })
}

/// Runs a calculation subcommand and renders the result as pretty JSON.
pub fn execute(engine: &RepaymentEngine, command: &Command) -> anyhow::Result<String> {
    match command {
        Command::Serve { .. } => bail!("serve is handled by the async entry point"),
        Command::Repay(args) => {
            let input = RepaymentInput {
                income: args.income,
                plan: args.plan.into(),
                period: args.period.into(),
                tax_year: year_or_latest(engine, args.tax_year),
                unearned_income: args.unearned_income,
                secondary_job: args.secondary_job,
            };
            pretty(&engine.assess_period(&input)?)
        }
        Command::Annual(args) => {
            let tax_year = year_or_latest(engine, args.tax_year);
            match args.paye_withheld {
                Some(withheld) => pretty(&engine.reconcile_annual_liability(
                    args.income,
                    args.unearned_income,
                    withheld,
                    args.plan.into(),
                    tax_year,
                )?),
                None => pretty(&engine.calculate_annual_liability(
                    args.income,
                    args.unearned_income,
                    args.plan.into(),
                    tax_year,
                )?),
            }
        }
        Command::Bonus(args) => pretty(&engine.compare_bonus_period(
            args.regular_pay,
            args.bonus,
            args.plan.into(),
            args.period.into(),
            year_or_latest(engine, args.tax_year),
        )?),
        Command::Combined(args) => {
            let plans: Vec<LoanPlan> = args.plans.iter().map(|&p| p.into()).collect();
            pretty(&engine.calculate_combined_period_repayment(
                args.income,
                &plans,
                args.period.into(),
                year_or_latest(engine, args.tax_year),
            )?)
        }
        Command::Project(args) => {
            let input = build_projection_input(engine, args)?;
            pretty(&engine.project_balance(&input)?)
        }
        Command::WriteOff(args) => {
            let plan = LoanPlan::from(args.plan);
            let date = engine.estimate_write_off_date(plan, args.first_due_year);
            pretty(&json!({
                "plan": plan,
                "firstDueYear": args.first_due_year,
                "writeOffDate": date,
            }))
        }
        Command::Plans { tax_year } => {
            let tax_year = year_or_latest(engine, *tax_year);
            let year = engine.year_parameters(tax_year)?;
            let plans: Vec<_> = LoanPlan::ALL
                .iter()
                .map(|&plan| {
                    let params = year.plans.get(plan);
                    let thresholds: serde_json::Map<String, serde_json::Value> = PayPeriod::ALL
                        .iter()
                        .map(|&period| {
                            (
                                period.to_string(),
                                json!(convert_threshold_period(params.threshold, period)),
                            )
                        })
                        .collect();
                    json!({
                        "plan": plan,
                        "parameters": params,
                        "periodThresholds": thresholds,
                    })
                })
                .collect();
            pretty(&json!({
                "taxYear": tax_year,
                "unearnedIncomeLimit": year.unearned_income_limit,
                "plans": plans,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn run(args: &[&str]) -> anyhow::Result<serde_json::Value> {
        let cli = Cli::try_parse_from(args)?;
        let engine = load_engine(&cli)?;
        let output = execute(&engine, &cli.command)?;
        Ok(serde_json::from_str(&output)?)
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn repay_prints_monthly_deduction() {
        let value = run(&[
            "studentloan",
            "repay",
            "--income",
            "2500",
            "--plan",
            "plan-2",
            "--period",
            "monthly",
            "--tax-year",
            "2025-26",
        ])
        .expect("runs");
        assert_eq!(value["repayment"], "11.48");
        assert_eq!(value["periodThreshold"], "2372.50");
    }

    #[test]
    fn annual_with_withheld_reports_balancing_payment() {
        let value = run(&[
            "studentloan",
            "annual",
            "--income",
            "35000",
            "--unearned-income",
            "2001",
            "--paye-withheld",
            "587.70",
            "--tax-year",
            "2025-26",
        ])
        .expect("runs");
        // 2,001 of unearned income counts in full: 9% of 2,001 is 180.09.
        assert_eq!(value["balancingPayment"], "180.09");
    }

    #[test]
    fn combined_accepts_comma_separated_plans() {
        let value = run(&[
            "studentloan",
            "combined",
            "--income",
            "35000",
            "--plans",
            "plan-2,postgraduate",
            "--period",
            "annual",
            "--tax-year",
            "2025-26",
        ])
        .expect("runs");
        assert_eq!(value["total"], "1427.70");
    }

    #[test]
    fn project_defaults_to_remaining_term() {
        let value = run(&[
            "studentloan",
            "project",
            "--balance",
            "50000",
            "--plan",
            "plan-2",
            "--salary",
            "20000",
            "--tax-year",
            "2025-26",
            "--years-already-repaying",
            "25",
        ])
        .expect("runs");
        let years = value["years"].as_array().expect("array");
        assert_eq!(years.len(), 5);
        assert_eq!(years[4]["writtenOff"], true);
    }

    #[test]
    fn project_past_the_term_reports_write_off() {
        let err = run(&[
            "studentloan",
            "project",
            "--balance",
            "50000",
            "--plan",
            "plan-2",
            "--salary",
            "40000",
            "--tax-year",
            "2025-26",
            "--years-already-repaying",
            "30",
        ])
        .expect_err("already written off");
        assert!(err.to_string().contains("written off after 30 years"));
    }

    #[test]
    fn plan_and_period_aliases_match_the_http_api() {
        let value = run(&[
            "studentloan",
            "repay",
            "--income",
            "2000",
            "--plan",
            "postgrad",
            "--period",
            "4-weekly",
            "--tax-year",
            "2025-26",
        ])
        .expect("runs");
        assert_eq!(value["plan"], "postgraduate");
        assert_eq!(value["period"], "four-weekly");

        let value = run(&["studentloan", "repay", "--income", "1", "--plan", "plan_4"])
            .expect("runs");
        assert_eq!(value["plan"], "plan-4");

        let unknown = ["studentloan", "repay", "--income", "1", "--plan", "plan-3"];
        assert!(Cli::try_parse_from(unknown).is_err());
    }

    #[test]
    fn project_rejects_salary_and_schedule_together() {
        let result = Cli::try_parse_from([
            "studentloan",
            "project",
            "--balance",
            "1",
            "--salary",
            "1",
            "--salaries",
            "1,2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn write_off_and_plans_render() {
        let value = run(&[
            "studentloan",
            "write-off",
            "--plan",
            "plan-5",
            "--first-due-year",
            "2026-27",
        ])
        .expect("runs");
        assert_eq!(value["writeOffDate"], "2066-04-06");

        let value = run(&["studentloan", "plans", "--tax-year", "2024-25"]).expect("runs");
        assert_eq!(value["plans"][1]["periodThresholds"]["weekly"], "524.90");
    }

    #[test]
    fn unsupported_year_is_an_error() {
        let err = run(&["studentloan", "repay", "--income", "100", "--tax-year", "2010-11"])
            .expect_err("not in table");
        assert!(err.to_string().contains("2010-11"));
    }

    #[test]
    fn missing_parameter_file_is_reported() {
        let err = run(&[
            "studentloan",
            "--parameters",
            "/nonexistent/table.toml",
            "plans",
        ])
        .expect_err("missing file");
        assert!(format!("{err:#}").contains("/nonexistent/table.toml"));
    }
}
