use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::error::{EngineError, EngineResult};
use super::params::{ParameterTable, YearParameters};
use super::types::{
    AnnualLiability, BonusComparison, CombinedRepayment, LoanPlan, PayPeriod, PlanParameters,
    Reconciliation, RepaymentInput, RepaymentResult, TaxYear, round_penny,
};

/// Largest amount accepted for any income, payment or balance (one trillion
/// pounds). Keeps every sum and product the engine forms well inside
/// `Decimal`'s range.
pub const MAX_AMOUNT: Decimal = dec!(1000000000000);

/// Stateless calculator over a shared, immutable parameter table.
#[derive(Debug, Clone)]
pub struct RepaymentEngine {
    table: Arc<ParameterTable>,
}

impl Default for RepaymentEngine {
    fn default() -> Self {
        Self::new(ParameterTable::builtin())
    }
}

impl RepaymentEngine {
    pub fn new(table: Arc<ParameterTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ParameterTable {
        &self.table
    }

    pub fn tax_years(&self) -> Vec<TaxYear> {
        self.table.tax_years()
    }

    pub fn plan_parameters(
        &self,
        plan: LoanPlan,
        tax_year: TaxYear,
    ) -> EngineResult<&PlanParameters> {
        self.table.plan(plan, tax_year)
    }

    pub fn year_parameters(&self, tax_year: TaxYear) -> EngineResult<&YearParameters> {
        self.table.year(tax_year)
    }

    /// Deduction for a single pay period. Periods are assessed independently,
    /// so one high-income period can attract a deduction even when the year's
    /// income stays below the annual threshold.
    pub fn calculate_period_repayment(
        &self,
        income: Decimal,
        plan: LoanPlan,
        period: PayPeriod,
        tax_year: TaxYear,
    ) -> EngineResult<Decimal> {
        ensure_amount("income", income)?;
        let params = self.table.plan(plan, tax_year)?;
        let (_, _, repayment) = period_repayment(params, income, period);
        Ok(repayment)
    }

    pub fn assess_period(&self, input: &RepaymentInput) -> EngineResult<RepaymentResult> {
        ensure_amount("income", input.income)?;
        let unearned = input.unearned_income.unwrap_or(Decimal::ZERO);
        ensure_amount("unearned income", unearned)?;

        let year = self.table.year(input.tax_year)?;
        let params = year.plans.get(input.plan);
        let (period_threshold, income_over_threshold, repayment) =
            period_repayment(params, input.income, input.period);

        Ok(RepaymentResult {
            plan: input.plan,
            period: input.period,
            tax_year: input.tax_year,
            period_threshold,
            income_over_threshold,
            repayment_rate: params.repayment_rate,
            repayment,
            reconciliation_required: input.secondary_job
                || unearned > year.unearned_income_limit,
        })
    }

    pub fn calculate_annual_liability(
        &self,
        total_income: Decimal,
        unearned_income: Decimal,
        plan: LoanPlan,
        tax_year: TaxYear,
    ) -> EngineResult<AnnualLiability> {
        ensure_amount("total income", total_income)?;
        ensure_amount("unearned income", unearned_income)?;
        let year = self.table.year(tax_year)?;
        Ok(annual_liability(year, plan, total_income, unearned_income))
    }

    /// Balancing payment once the year's true liability is known. Self-employed
    /// income is assessed the same way with nothing withheld.
    pub fn reconcile_annual_liability(
        &self,
        total_income: Decimal,
        unearned_income: Decimal,
        paye_withheld: Decimal,
        plan: LoanPlan,
        tax_year: TaxYear,
    ) -> EngineResult<Reconciliation> {
        ensure_amount("PAYE withheld", paye_withheld)?;
        let liability =
            self.calculate_annual_liability(total_income, unearned_income, plan, tax_year)?;
        let balancing_payment = liability.liability - paye_withheld;
        Ok(Reconciliation {
            liability,
            paye_withheld,
            balancing_payment,
        })
    }

    pub fn compare_bonus_period(
        &self,
        regular_pay: Decimal,
        bonus: Decimal,
        plan: LoanPlan,
        period: PayPeriod,
        tax_year: TaxYear,
    ) -> EngineResult<BonusComparison> {
        ensure_amount("regular pay", regular_pay)?;
        ensure_amount("bonus", bonus)?;
        let year = self.table.year(tax_year)?;
        let params = year.plans.get(plan);

        let (period_threshold, _, regular_period_repayment) =
            period_repayment(params, regular_pay, period);
        let (_, _, bonus_period_repayment) = period_repayment(params, regular_pay + bonus, period);

        let annual_regular = regular_pay * Decimal::from(period.divisor());
        let without_bonus = annual_liability(year, plan, annual_regular, Decimal::ZERO);
        let with_bonus = annual_liability(year, plan, annual_regular + bonus, Decimal::ZERO);

        Ok(BonusComparison {
            period_threshold,
            regular_period_repayment,
            bonus_period_repayment,
            extra_from_bonus: bonus_period_repayment - regular_period_repayment,
            annual_liability_with_bonus: with_bonus.liability,
            annual_extra_from_bonus: with_bonus.liability - without_bonus.liability,
        })
    }

    /// A borrower with several undergraduate plans makes one deduction above
    /// the lowest of their thresholds; a postgraduate loan is deducted on top.
    pub fn calculate_combined_period_repayment(
        &self,
        income: Decimal,
        plans: &[LoanPlan],
        period: PayPeriod,
        tax_year: TaxYear,
    ) -> EngineResult<CombinedRepayment> {
        if plans.is_empty() {
            return Err(EngineError::invalid("at least one loan plan is required"));
        }
        ensure_amount("income", income)?;
        let year = self.table.year(tax_year)?;

        let undergraduate_plan = plans
            .iter()
            .copied()
            .filter(|plan| !plan.is_postgraduate())
            .min_by_key(|plan| year.plans.get(*plan).threshold);
        let undergraduate_repayment = undergraduate_plan
            .map(|plan| period_repayment(year.plans.get(plan), income, period).2)
            .unwrap_or(Decimal::ZERO);

        let postgraduate_repayment = if plans.contains(&LoanPlan::Postgraduate) {
            period_repayment(year.plans.get(LoanPlan::Postgraduate), income, period).2
        } else {
            Decimal::ZERO
        };

        Ok(CombinedRepayment {
            undergraduate_plan,
            undergraduate_repayment,
            postgraduate_repayment,
            total: undergraduate_repayment + postgraduate_repayment,
        })
    }
}

/// Annual threshold expressed per pay period, rounded half-up to the penny.
pub fn convert_threshold_period(annual_threshold: Decimal, period: PayPeriod) -> Decimal {
    round_penny(annual_threshold / Decimal::from(period.divisor()))
}

pub(crate) fn ensure_amount(label: &str, value: Decimal) -> EngineResult<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(EngineError::invalid(format!("{label} must be >= 0, got {value}")));
    }
    if value > MAX_AMOUNT {
        return Err(EngineError::invalid(format!(
            "{label} must not exceed {MAX_AMOUNT}, got {value}"
        )));
    }
    Ok(())
}

fn period_repayment(
    params: &PlanParameters,
    income: Decimal,
    period: PayPeriod,
) -> (Decimal, Decimal, Decimal) {
    let threshold = convert_threshold_period(params.threshold, period);
    let over = (income - threshold).max(Decimal::ZERO);
    (threshold, over, round_penny(over * params.repayment_rate))
}

/// Unearned income above the limit counts in full; at or below it, not at all.
pub(crate) fn counted_unearned_income(year: &YearParameters, unearned_income: Decimal) -> Decimal {
    if unearned_income > year.unearned_income_limit {
        unearned_income
    } else {
        Decimal::ZERO
    }
}

pub(crate) fn annual_liability(
    year: &YearParameters,
    plan: LoanPlan,
    total_income: Decimal,
    unearned_income: Decimal,
) -> AnnualLiability {
    let params = year.plans.get(plan);
    let unearned_income_counted = counted_unearned_income(year, unearned_income);
    let assessable_income = total_income + unearned_income_counted;
    let over = (assessable_income - params.threshold).max(Decimal::ZERO);

    AnnualLiability {
        plan,
        tax_year: year.tax_year,
        earned_income: total_income,
        unearned_income_counted,
        assessable_income,
        threshold: params.threshold,
        liability: round_penny(over * params.repayment_rate),
    }
}
