//! Worked examples from the calculator pages, driven through the public API.
use std::path::Path;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use studentloan::core::{
    EngineError, LoanPlan, ParameterTable, PayPeriod, ProjectionInput, RepaymentEngine,
    SalaryTrajectory, TaxYear,
};

fn year(s: &str) -> TaxYear {
    s.parse().expect("valid tax year")
}

#[test]
fn plan_2_monthly_faq_example() {
    let engine = RepaymentEngine::default();
    let repayment = engine
        .calculate_period_repayment(
            dec!(2500),
            LoanPlan::Plan2,
            PayPeriod::Monthly,
            year("2025-26"),
        )
        .expect("valid");
    assert_eq!(repayment.to_string(), "11.48");
}

#[test]
fn plan_2_annual_faq_example() {
    let engine = RepaymentEngine::default();
    let liability = engine
        .calculate_annual_liability(dec!(35000), Decimal::ZERO, LoanPlan::Plan2, year("2025-26"))
        .expect("valid");
    assert_eq!(liability.liability.to_string(), "587.70");
}

#[test]
fn unearned_income_either_side_of_two_thousand() {
    let engine = RepaymentEngine::default();
    let below = engine
        .calculate_annual_liability(dec!(40000), dec!(1999), LoanPlan::Plan1, year("2024-25"))
        .expect("valid");
    let above = engine
        .calculate_annual_liability(dec!(40000), dec!(2001), LoanPlan::Plan1, year("2024-25"))
        .expect("valid");
    assert_eq!(below.unearned_income_counted, Decimal::ZERO);
    assert_eq!(above.unearned_income_counted, dec!(2001));
    assert_eq!(above.liability - below.liability, dec!(180.09));
}

#[test]
fn plan_4_threshold_depends_on_tax_year() {
    let engine = RepaymentEngine::default();
    let older = engine
        .calculate_annual_liability(dec!(32000), Decimal::ZERO, LoanPlan::Plan4, year("2024-25"))
        .expect("valid");
    let newer = engine
        .calculate_annual_liability(dec!(32000), Decimal::ZERO, LoanPlan::Plan4, year("2025-26"))
        .expect("valid");
    // 9% of (32,000 - 31,395)
    assert_eq!(older.liability, dec!(54.45));
    assert_eq!(newer.liability, Decimal::ZERO);
}

#[test]
fn graduate_on_modest_salary_has_balance_written_off() {
    let engine = RepaymentEngine::default();
    let result = engine
        .project_balance(&ProjectionInput {
            opening_balance: dec!(45000),
            plan: LoanPlan::Plan2,
            salary: SalaryTrajectory::Growth {
                starting_salary: dec!(27000),
                annual_growth: dec!(0.02),
            },
            start_year: year("2025-26"),
            years: 40,
            years_already_repaying: 0,
            interest_override: None,
        })
        .expect("valid");

    assert_eq!(result.years.len(), 30);
    let last = result.years.last().expect("non-empty");
    assert!(last.written_off);
    assert!(result.written_off_amount > Decimal::ZERO);
    assert!(result.total_repaid > Decimal::ZERO);
    assert_eq!(result.paid_off_in, None);
}

#[test]
fn high_earner_clears_balance_early() {
    let engine = RepaymentEngine::default();
    let result = engine
        .project_balance(&ProjectionInput {
            opening_balance: dec!(20000),
            plan: LoanPlan::Plan5,
            salary: SalaryTrajectory::Schedule(vec![dec!(90000)]),
            start_year: year("2025-26"),
            years: 40,
            years_already_repaying: 0,
            interest_override: None,
        })
        .expect("valid");

    let paid_off = result.paid_off_in.expect("cleared before write-off");
    assert!(paid_off < year("2030-31"));
    assert_eq!(result.years.len(), 40);
    assert!(result.years.iter().all(|y| !y.written_off));
    assert_eq!(result.written_off_amount, Decimal::ZERO);
    assert_eq!(result.total_repaid, dec!(20000) + result.total_interest);
}

#[test]
fn custom_table_replaces_builtin_years() {
    let table = ParameterTable::load(Path::new("tests/fixtures/single_year.toml"))
        .expect("fixture loads");
    let engine = RepaymentEngine::new(Arc::new(table));
    assert_eq!(engine.tax_years(), vec![year("2026-27")]);

    let monthly = |tax_year| {
        engine.calculate_period_repayment(dec!(3000), LoanPlan::Plan2, PayPeriod::Monthly, tax_year)
    };
    let repayment = monthly(year("2026-27")).expect("valid");
    // 29,385 / 12 = 2,448.75; 9% of 551.25 = 49.6125
    assert_eq!(repayment, dec!(49.61));

    let err = monthly(year("2025-26")).expect_err("builtin years are not merged in");
    assert_eq!(err, EngineError::UnsupportedTaxYear(year("2025-26")));
}

#[test]
fn oversized_inputs_fail_with_errors_instead_of_panicking() {
    let engine = RepaymentEngine::default();
    let tax_year = year("2025-26");

    let err = engine
        .calculate_annual_liability(Decimal::MAX, dec!(3000), LoanPlan::Plan2, tax_year)
        .expect_err("income too large");
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let err = engine
        .compare_bonus_period(
            Decimal::MAX / dec!(10),
            dec!(1),
            LoanPlan::Plan2,
            PayPeriod::Weekly,
            tax_year,
        )
        .expect_err("regular pay too large");
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let err = engine
        .project_balance(&ProjectionInput {
            opening_balance: dec!(45000),
            plan: LoanPlan::Plan2,
            salary: SalaryTrajectory::Growth {
                starting_salary: dec!(30000),
                annual_growth: dec!(5),
            },
            start_year: tax_year,
            years: 40,
            years_already_repaying: 0,
            interest_override: None,
        })
        .expect_err("salary growth runs away");
    assert!(matches!(err, EngineError::InvalidInput(_)));
}
