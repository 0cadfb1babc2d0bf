use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::error::EngineError;

/// Rounds a currency amount to the penny, halves away from zero. The result
/// always carries two decimal places.
pub fn round_penny(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub enum LoanPlan {
    #[serde(rename = "plan-1")]
    Plan1,
    #[serde(rename = "plan-2")]
    Plan2,
    #[serde(rename = "plan-4")]
    Plan4,
    #[serde(rename = "plan-5")]
    Plan5,
    #[serde(rename = "postgraduate")]
    Postgraduate,
}

impl LoanPlan {
    pub const ALL: [LoanPlan; 5] = [
        LoanPlan::Plan1,
        LoanPlan::Plan2,
        LoanPlan::Plan4,
        LoanPlan::Plan5,
        LoanPlan::Postgraduate,
    ];

    pub fn is_postgraduate(self) -> bool {
        matches!(self, LoanPlan::Postgraduate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoanPlan::Plan1 => "plan-1",
            LoanPlan::Plan2 => "plan-2",
            LoanPlan::Plan4 => "plan-4",
            LoanPlan::Plan5 => "plan-5",
            LoanPlan::Postgraduate => "postgraduate",
        }
    }
}

impl fmt::Display for LoanPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayPeriod {
    Weekly,
    Fortnightly,
    FourWeekly,
    Monthly,
    Annual,
}

impl PayPeriod {
    pub const ALL: [PayPeriod; 5] = [
        PayPeriod::Weekly,
        PayPeriod::Fortnightly,
        PayPeriod::FourWeekly,
        PayPeriod::Monthly,
        PayPeriod::Annual,
    ];

    /// Number of these periods in a tax year.
    pub fn divisor(self) -> u32 {
        match self {
            PayPeriod::Weekly => 52,
            PayPeriod::Fortnightly => 26,
            PayPeriod::FourWeekly => 13,
            PayPeriod::Monthly => 12,
            PayPeriod::Annual => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PayPeriod::Weekly => "weekly",
            PayPeriod::Fortnightly => "fortnightly",
            PayPeriod::FourWeekly => "four-weekly",
            PayPeriod::Monthly => "monthly",
            PayPeriod::Annual => "annual",
        }
    }
}

impl fmt::Display for PayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A UK tax year, identified by the calendar year in which it starts on 6 April.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxYear(i32);

impl TaxYear {
    const EARLIEST: i32 = 1990;
    const LATEST: i32 = 2200;

    pub fn new(start_year: i32) -> Result<Self, EngineError> {
        if !(Self::EARLIEST..=Self::LATEST).contains(&start_year) {
            return Err(EngineError::invalid(format!(
                "tax year start {start_year} is outside {}..={}",
                Self::EARLIEST,
                Self::LATEST
            )));
        }
        Ok(Self(start_year))
    }

    pub fn start_year(self) -> i32 {
        self.0
    }

    pub fn plus_years(self, years: u32) -> Self {
        Self(self.0 + years as i32)
    }

}

impl fmt::Display for TaxYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.0, (self.0 + 1).rem_euclid(100))
    }
}

impl FromStr for TaxYear {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let malformed = || EngineError::invalid(format!("malformed tax year '{s}'"));

        let (start, suffix) = match trimmed.split_once(['-', '/']) {
            Some((start, suffix)) => (start, Some(suffix)),
            None => (trimmed, None),
        };
        let start: i32 = start.parse().map_err(|_| malformed())?;
        if let Some(suffix) = suffix {
            let expected = (start + 1).rem_euclid(100);
            let matches = match suffix.len() {
                2 => suffix.parse::<i32>().ok() == Some(expected),
                4 => suffix.parse::<i32>().ok() == Some(start + 1),
                _ => false,
            };
            if !matches {
                return Err(malformed());
            }
        }
        TaxYear::new(start)
    }
}

impl TryFrom<String> for TaxYear {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaxYear> for String {
    fn from(value: TaxYear) -> Self {
        value.to_string()
    }
}

/// How a plan accrues interest over a year.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InterestRule {
    Fixed {
        rate: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    RpiLinked { rpi: Decimal, margin: Decimal },
    /// Sliding scale: `min_rate` up to `lower_income`, `max_rate` from
    /// `upper_income`, linear in between.
    #[serde(rename_all = "camelCase")]
    IncomeBanded {
        lower_income: Decimal,
        upper_income: Decimal,
        min_rate: Decimal,
        max_rate: Decimal,
    },
}

impl InterestRule {
    pub fn rate_for(&self, annual_income: Decimal) -> Decimal {
        match self {
            InterestRule::Fixed { rate } => *rate,
            InterestRule::RpiLinked { rpi, margin } => *rpi + *margin,
            InterestRule::IncomeBanded {
                lower_income,
                upper_income,
                min_rate,
                max_rate,
            } => {
                if annual_income <= *lower_income {
                    *min_rate
                } else if annual_income >= *upper_income {
                    *max_rate
                } else {
                    let span = *upper_income - *lower_income;
                    let position = (annual_income - *lower_income) / span;
                    *min_rate + (*max_rate - *min_rate) * position
                }
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let rate_ok = |r: Decimal| r >= Decimal::ZERO && r <= Decimal::ONE;
        match self {
            InterestRule::Fixed { rate } => {
                if !rate_ok(*rate) {
                    return Err(format!("fixed interest rate {rate} must be between 0 and 1"));
                }
            }
            InterestRule::RpiLinked { rpi, margin } => {
                if !rate_ok(*rpi + *margin) {
                    return Err(format!(
                        "RPI-linked rate {rpi} + {margin} must be between 0 and 1"
                    ));
                }
            }
            InterestRule::IncomeBanded {
                lower_income,
                upper_income,
                min_rate,
                max_rate,
            } => {
                if *lower_income < Decimal::ZERO || lower_income >= upper_income {
                    return Err(format!(
                        "income band {lower_income}..{upper_income} must be non-negative \
                         and ascending"
                    ));
                }
                if !rate_ok(*min_rate) || !rate_ok(*max_rate) || min_rate > max_rate {
                    return Err(format!(
                        "banded rates {min_rate}..{max_rate} must be ascending within 0 and 1"
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanParameters {
    /// Annual repayment threshold in GBP.
    pub threshold: Decimal,
    pub repayment_rate: Decimal,
    pub interest: InterestRule,
    pub write_off_years: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepaymentInput {
    pub income: Decimal,
    pub plan: LoanPlan,
    pub period: PayPeriod,
    pub tax_year: TaxYear,
    pub unearned_income: Option<Decimal>,
    pub secondary_job: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentResult {
    pub plan: LoanPlan,
    pub period: PayPeriod,
    pub tax_year: TaxYear,
    pub period_threshold: Decimal,
    pub income_over_threshold: Decimal,
    pub repayment_rate: Decimal,
    pub repayment: Decimal,
    /// The year's liability is settled through Self Assessment rather than payroll alone.
    pub reconciliation_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualLiability {
    pub plan: LoanPlan,
    pub tax_year: TaxYear,
    pub earned_income: Decimal,
    pub unearned_income_counted: Decimal,
    pub assessable_income: Decimal,
    pub threshold: Decimal,
    pub liability: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub liability: AnnualLiability,
    pub paye_withheld: Decimal,
    /// Positive when more is owed, negative when a refund is due.
    pub balancing_payment: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusComparison {
    pub period_threshold: Decimal,
    pub regular_period_repayment: Decimal,
    pub bonus_period_repayment: Decimal,
    pub extra_from_bonus: Decimal,
    pub annual_liability_with_bonus: Decimal,
    /// What the bonus adds to the year if the liability were assessed annually.
    pub annual_extra_from_bonus: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedRepayment {
    pub undergraduate_plan: Option<LoanPlan>,
    pub undergraduate_repayment: Decimal,
    pub postgraduate_repayment: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SalaryTrajectory {
    Growth {
        starting_salary: Decimal,
        annual_growth: Decimal,
    },
    Schedule(Vec<Decimal>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionInput {
    pub opening_balance: Decimal,
    pub plan: LoanPlan,
    pub salary: SalaryTrajectory,
    pub start_year: TaxYear,
    pub years: u32,
    pub years_already_repaying: u32,
    pub interest_override: Option<InterestRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionYear {
    pub tax_year: TaxYear,
    pub salary: Decimal,
    pub opening_balance: Decimal,
    pub interest_rate: Decimal,
    pub interest_accrued: Decimal,
    pub repayment: Decimal,
    pub closing_balance: Decimal,
    pub written_off: bool,
    pub written_off_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub plan: LoanPlan,
    pub years: Vec<ProjectionYear>,
    pub total_repaid: Decimal,
    pub total_interest: Decimal,
    pub paid_off_in: Option<TaxYear>,
    pub written_off_amount: Decimal,
    pub write_off_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tax_year_accepts_common_spellings() {
        for raw in ["2025-26", "2025/26", "2025", " 2025-2026 "] {
            let year: TaxYear = raw.parse().expect("valid");
            assert_eq!(year.start_year(), 2025, "{raw}");
            assert_eq!(year.to_string(), "2025-26");
        }
        assert_eq!("1999-00".parse::<TaxYear>().expect("valid").to_string(), "1999-00");
    }

    #[test]
    fn tax_year_rejects_mismatched_or_garbage() {
        for raw in ["2025-27", "2025-6", "twenty", "", "1800-01"] {
            let err = raw.parse::<TaxYear>().expect_err(raw);
            assert!(matches!(err, EngineError::InvalidInput(_)), "{raw}");
        }
    }

    #[test]
    fn tax_year_ordering_and_offsets() {
        let year: TaxYear = "2025-26".parse().expect("valid");
        assert!(year < year.plus_years(1));
        assert_eq!(year.plus_years(30).to_string(), "2055-56");
        assert_eq!(serde_json::to_string(&year).expect("serialize"), "\"2025-26\"");
    }

    #[test]
    fn round_penny_keeps_two_places() {
        assert_eq!(round_penny(dec!(11.475)).to_string(), "11.48");
        assert_eq!(round_penny(dec!(2372.5)).to_string(), "2372.50");
        assert_eq!(round_penny(dec!(524.903846)).to_string(), "524.90");
        assert_eq!(round_penny(dec!(-0.005)).to_string(), "-0.01");
    }

    #[test]
    fn interest_rules_deserialize_from_tagged_json() {
        let rule: InterestRule = serde_json::from_value(serde_json::json!({
            "kind": "income-banded",
            "lowerIncome": "28470",
            "upperIncome": "51245",
            "minRate": "0.032",
            "maxRate": "0.062",
        }))
        .expect("valid");
        assert_eq!(rule.rate_for(dec!(60000)), dec!(0.062));

        let rule: InterestRule =
            serde_json::from_str(r#"{ "kind": "rpi-linked", "rpi": "0.032", "margin": "0.03" }"#)
                .expect("valid");
        assert_eq!(rule.rate_for(Decimal::ZERO), dec!(0.062));
        assert!(rule.validate().is_ok());

        let bad = InterestRule::Fixed { rate: dec!(-0.01) };
        assert!(bad.validate().is_err());
    }
}
