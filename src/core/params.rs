use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{EngineError, EngineResult, TableError};
use super::types::{LoanPlan, PlanParameters, TaxYear};

const BUILTIN_TABLE: &str = include_str!("../../data/plan_parameters.toml");

static BUILTIN: OnceLock<Arc<ParameterTable>> = OnceLock::new();

fn default_unearned_income_limit() -> Decimal {
    dec!(2000)
}

#[derive(Debug, Deserialize)]
struct TableDocument {
    tax_year: Vec<YearParameters>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSet {
    pub plan_1: PlanParameters,
    pub plan_2: PlanParameters,
    pub plan_4: PlanParameters,
    pub plan_5: PlanParameters,
    pub postgraduate: PlanParameters,
}

impl PlanSet {
    pub fn get(&self, plan: LoanPlan) -> &PlanParameters {
        match plan {
            LoanPlan::Plan1 => &self.plan_1,
            LoanPlan::Plan2 => &self.plan_2,
            LoanPlan::Plan4 => &self.plan_4,
            LoanPlan::Plan5 => &self.plan_5,
            LoanPlan::Postgraduate => &self.postgraduate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearParameters {
    #[serde(rename = "year")]
    pub tax_year: TaxYear,
    /// Unearned income only counts once it exceeds this, and then counts in full.
    #[serde(default = "default_unearned_income_limit")]
    pub unearned_income_limit: Decimal,
    pub plans: PlanSet,
}

/// Repayment parameters keyed by tax year. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterTable {
    years: BTreeMap<TaxYear, YearParameters>,
}

impl ParameterTable {
    /// The table compiled into the binary.
    pub fn builtin() -> Arc<ParameterTable> {
        BUILTIN
            .get_or_init(|| {
                Arc::new(
                    ParameterTable::from_toml_str(BUILTIN_TABLE)
                        .expect("embedded parameter table is valid"),
                )
            })
            .clone()
    }

    pub fn load(path: &Path) -> Result<Self, TableError> {
        let content = fs::read_to_string(path)?;
        let table = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            years = table.years.len(),
            "loaded repayment parameter table"
        );
        Ok(table)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TableError> {
        let document: TableDocument = toml::from_str(content)?;
        Self::from_years(document.tax_year)
    }

    pub fn from_years(entries: Vec<YearParameters>) -> Result<Self, TableError> {
        if entries.is_empty() {
            return Err(TableError::Invalid(
                "table must contain at least one tax year".to_string(),
            ));
        }

        let mut years = BTreeMap::new();
        for entry in entries {
            validate_year(&entry)?;
            let tax_year = entry.tax_year;
            if years.insert(tax_year, entry).is_some() {
                return Err(TableError::Invalid(format!(
                    "tax year {tax_year} appears more than once"
                )));
            }
        }
        Ok(Self { years })
    }

    pub fn tax_years(&self) -> Vec<TaxYear> {
        self.years.keys().copied().collect()
    }

    pub fn latest(&self) -> &YearParameters {
        self.years
            .values()
            .next_back()
            .expect("table holds at least one year")
    }

    pub fn earliest(&self) -> &YearParameters {
        self.years
            .values()
            .next()
            .expect("table holds at least one year")
    }

    pub fn year(&self, tax_year: TaxYear) -> EngineResult<&YearParameters> {
        self.years
            .get(&tax_year)
            .ok_or(EngineError::UnsupportedTaxYear(tax_year))
    }

    pub fn plan(&self, plan: LoanPlan, tax_year: TaxYear) -> EngineResult<&PlanParameters> {
        Ok(self.year(tax_year)?.plans.get(plan))
    }

    /// Parameters for `tax_year`, or the most recent earlier year when the
    /// table has not been extended that far. Used for projections, which
    /// assume thresholds and rates stay frozen beyond the published years.
    pub fn year_or_latest_before(&self, tax_year: TaxYear) -> EngineResult<&YearParameters> {
        self.years
            .range(..=tax_year)
            .next_back()
            .map(|(_, params)| params)
            .ok_or(EngineError::UnsupportedTaxYear(tax_year))
    }
}

fn validate_year(entry: &YearParameters) -> Result<(), TableError> {
    let year = entry.tax_year;
    if entry.unearned_income_limit < Decimal::ZERO {
        return Err(TableError::Invalid(format!(
            "{year}: unearned income limit must be >= 0"
        )));
    }

    for plan in LoanPlan::ALL {
        let params = entry.plans.get(plan);
        if params.threshold < Decimal::ZERO {
            return Err(TableError::Invalid(format!(
                "{year} {plan}: threshold must be >= 0"
            )));
        }
        if params.repayment_rate < Decimal::ZERO || params.repayment_rate > Decimal::ONE {
            return Err(TableError::Invalid(format!(
                "{year} {plan}: repayment rate must be between 0 and 1"
            )));
        }
        if params.write_off_years == 0 {
            return Err(TableError::Invalid(format!(
                "{year} {plan}: write-off period must be > 0 years"
            )));
        }
        params
            .interest
            .validate()
            .map_err(|msg| TableError::Invalid(format!("{year} {plan}: {msg}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InterestRule;

    fn year(s: &str) -> TaxYear {
        s.parse().expect("valid tax year")
    }

    #[test]
    fn builtin_table_covers_published_years() {
        let table = ParameterTable::builtin();
        assert_eq!(table.tax_years(), vec![year("2024-25"), year("2025-26")]);
        assert_eq!(table.latest().tax_year, year("2025-26"));
    }

    #[test]
    fn builtin_thresholds_match_published_figures() {
        let table = ParameterTable::builtin();
        let plan2 = table.plan(LoanPlan::Plan2, year("2025-26")).expect("present");
        assert_eq!(plan2.threshold, dec!(28470));
        assert_eq!(plan2.repayment_rate, dec!(0.09));
        assert_eq!(plan2.write_off_years, 30);

        let plan4_old = table.plan(LoanPlan::Plan4, year("2024-25")).expect("present");
        let plan4_new = table.plan(LoanPlan::Plan4, year("2025-26")).expect("present");
        assert_eq!(plan4_old.threshold, dec!(31395));
        assert_eq!(plan4_new.threshold, dec!(32745));

        let pg = table.plan(LoanPlan::Postgraduate, year("2025-26")).expect("present");
        assert_eq!(pg.repayment_rate, dec!(0.06));
        assert_eq!(pg.interest.rate_for(dec!(100000)), dec!(0.062));
    }

    #[test]
    fn unknown_year_is_unsupported() {
        let table = ParameterTable::builtin();
        let err = table.year(year("2019-20")).expect_err("not in table");
        assert_eq!(err, EngineError::UnsupportedTaxYear(year("2019-20")));
    }

    #[test]
    fn later_years_roll_forward_from_latest_entry() {
        let table = ParameterTable::builtin();
        let resolved = table.year_or_latest_before(year("2031-32")).expect("rolls forward");
        assert_eq!(resolved.tax_year, year("2025-26"));

        let err = table.year_or_latest_before(year("2020-21")).expect_err("too early");
        assert_eq!(err, EngineError::UnsupportedTaxYear(year("2020-21")));
    }

    #[test]
    fn unearned_income_limit_defaults_when_omitted() {
        let toml = BUILTIN_TABLE.replace("unearnedIncomeLimit = \"2000\"\n", "");
        let table = ParameterTable::from_toml_str(&toml).expect("still valid");
        assert_eq!(table.latest().unearned_income_limit, dec!(2000));
    }

    #[test]
    fn rejects_duplicate_years() {
        let mut entries: Vec<YearParameters> = ParameterTable::builtin()
            .years
            .values()
            .cloned()
            .collect();
        entries.push(entries[0].clone());
        let err = ParameterTable::from_years(entries).expect_err("duplicate");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_out_of_range_repayment_rate() {
        let toml = BUILTIN_TABLE.replacen("repaymentRate = \"0.09\"", "repaymentRate = \"9\"", 1);
        let err = ParameterTable::from_toml_str(&toml).expect_err("rate above 1");
        assert!(err.to_string().contains("repayment rate"));
    }

    #[test]
    fn rejects_inverted_interest_band() {
        let mut entry = ParameterTable::builtin().latest().clone();
        entry.plans.plan_2.interest = InterestRule::IncomeBanded {
            lower_income: dec!(50000),
            upper_income: dec!(30000),
            min_rate: dec!(0.03),
            max_rate: dec!(0.06),
        };
        let err = ParameterTable::from_years(vec![entry]).expect_err("inverted band");
        assert!(err.to_string().contains("income band"));
    }

    #[test]
    fn rejects_empty_and_malformed_documents() {
        assert!(ParameterTable::from_years(Vec::new()).is_err());
        let err = ParameterTable::from_toml_str("tax_year = 3").expect_err("wrong shape");
        assert!(matches!(err, TableError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ParameterTable::load(Path::new("/nonexistent/plan_parameters.toml"))
            .expect_err("missing file");
        assert!(matches!(err, TableError::Io(_)));
    }
}
