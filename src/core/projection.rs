use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use super::engine::{MAX_AMOUNT, RepaymentEngine, annual_liability, ensure_amount};
use super::error::{EngineError, EngineResult};
use super::types::{
    LoanPlan, ProjectionInput, ProjectionResult, ProjectionYear, SalaryTrajectory, TaxYear,
    round_penny,
};

impl RepaymentEngine {
    /// Year-by-year balance projection. Stops contributing once the balance is
    /// cleared and writes off whatever remains in the plan's final year.
    pub fn project_balance(&self, input: &ProjectionInput) -> EngineResult<ProjectionResult> {
        ensure_amount("opening balance", input.opening_balance)?;
        if let Some(rule) = &input.interest_override {
            rule.validate().map_err(EngineError::InvalidInput)?;
        }

        let table = self.table();
        let start = table.year(input.start_year)?;
        let write_off_years = start.plans.get(input.plan).write_off_years;
        if input.years_already_repaying >= write_off_years {
            return Err(EngineError::ProjectionDivergence(format!(
                "{} loans are written off after {write_off_years} years; {} years already elapsed",
                input.plan, input.years_already_repaying
            )));
        }
        if input.years == 0 {
            return Err(EngineError::ProjectionDivergence(
                "at least one year must be projected".to_string(),
            ));
        }

        let remaining = write_off_years - input.years_already_repaying;
        let horizon = input.years.min(remaining);
        let reaches_write_off = input.years >= remaining;
        let salaries = salary_path(&input.salary, horizon as usize)?;

        let mut balance = input.opening_balance;
        let mut years = Vec::with_capacity(horizon as usize);
        let mut total_repaid = Decimal::ZERO;
        let mut total_interest = Decimal::ZERO;
        let mut paid_off_in = None;
        let mut written_off_amount = Decimal::ZERO;

        for (offset, salary) in salaries.into_iter().enumerate() {
            let tax_year = input.start_year.plus_years(offset as u32);
            let params = table.year_or_latest_before(tax_year)?;
            let rule = input
                .interest_override
                .as_ref()
                .unwrap_or(&params.plans.get(input.plan).interest);
            let interest_rate = rule.rate_for(salary);

            if balance.is_zero() {
                years.push(ProjectionYear {
                    tax_year,
                    salary,
                    opening_balance: Decimal::ZERO,
                    interest_rate,
                    interest_accrued: Decimal::ZERO,
                    repayment: Decimal::ZERO,
                    closing_balance: Decimal::ZERO,
                    written_off: false,
                    written_off_amount: Decimal::ZERO,
                });
                continue;
            }

            let opening_balance = balance;
            let interest_accrued = round_penny(opening_balance * interest_rate);
            let due = annual_liability(params, input.plan, salary, Decimal::ZERO).liability;
            let owed = opening_balance.checked_add(interest_accrued).ok_or_else(|| {
                EngineError::ProjectionDivergence(format!("balance overflows in {tax_year}"))
            })?;
            let repayment = due.min(owed);
            let mut closing_balance = (owed - repayment).max(Decimal::ZERO);

            total_interest += interest_accrued;
            total_repaid += repayment;
            if closing_balance.is_zero() {
                paid_off_in = Some(tax_year);
            }

            let final_year = offset as u32 + 1 == horizon;
            let mut written_off = false;
            let mut year_written_off = Decimal::ZERO;
            if final_year && reaches_write_off && closing_balance > Decimal::ZERO {
                written_off = true;
                year_written_off = closing_balance;
                written_off_amount = closing_balance;
                closing_balance = Decimal::ZERO;
            }

            balance = closing_balance;
            years.push(ProjectionYear {
                tax_year,
                salary,
                opening_balance,
                interest_rate,
                interest_accrued,
                repayment,
                closing_balance,
                written_off,
                written_off_amount: year_written_off,
            });
        }

        let write_off_date = write_off_date(
            input.start_year.start_year() - input.years_already_repaying as i32,
            write_off_years,
        );

        debug!(
            plan = %input.plan,
            years = years.len(),
            paid_off_in = ?paid_off_in.map(|y: TaxYear| y.to_string()),
            written_off = %written_off_amount,
            "projection complete"
        );

        Ok(ProjectionResult {
            plan: input.plan,
            years,
            total_repaid,
            total_interest,
            paid_off_in,
            written_off_amount,
            write_off_date,
        })
    }

    /// Date the balance is cancelled: the April a fixed number of years after
    /// repayments first fell due.
    /// Years before the table starts use the earliest known term, so every
    /// tax year has an answer.
    pub fn estimate_write_off_date(&self, plan: LoanPlan, first_due_year: TaxYear) -> NaiveDate {
        let table = self.table();
        let params = table
            .year_or_latest_before(first_due_year)
            .unwrap_or_else(|_| table.earliest());
        let years = params.plans.get(plan).write_off_years;
        write_off_date(first_due_year.start_year(), years)
    }
}

fn write_off_date(first_due_start_year: i32, write_off_years: u32) -> NaiveDate {
    let year = first_due_start_year + write_off_years as i32;
    NaiveDate::from_ymd_opt(year, 4, 6).unwrap_or(NaiveDate::MAX)
}

fn salary_path(salary: &SalaryTrajectory, years: usize) -> EngineResult<Vec<Decimal>> {
    match salary {
        SalaryTrajectory::Growth {
            starting_salary,
            annual_growth,
        } => {
            ensure_amount("starting salary", *starting_salary)?;
            if *annual_growth <= -Decimal::ONE {
                return Err(EngineError::invalid(format!(
                    "annual salary growth must be > -100%, got {annual_growth}"
                )));
            }
            let factor = Decimal::ONE.checked_add(*annual_growth).ok_or_else(|| {
                EngineError::invalid(format!("annual salary growth {annual_growth} is too large"))
            })?;
            let mut current = *starting_salary;
            let mut path = Vec::with_capacity(years);
            for year in 0..years {
                path.push(current);
                if year + 1 == years {
                    break;
                }
                current = current
                    .checked_mul(factor)
                    .map(round_penny)
                    .filter(|next| *next <= MAX_AMOUNT)
                    .ok_or_else(|| {
                        EngineError::invalid(format!(
                            "salary growth of {annual_growth} exceeds {MAX_AMOUNT} within {} years",
                            year + 1
                        ))
                    })?;
            }
            Ok(path)
        }
        SalaryTrajectory::Schedule(schedule) => {
            let Some(last) = schedule.last().copied() else {
                return Err(EngineError::invalid("salary schedule must not be empty"));
            };
            for salary in schedule {
                ensure_amount("scheduled salary", *salary)?;
            }
            Ok((0..years)
                .map(|i| schedule.get(i).copied().unwrap_or(last))
                .collect())
        }
    }
}
