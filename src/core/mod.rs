mod engine;
mod error;
mod params;
mod projection;
mod types;

pub use engine::{MAX_AMOUNT, RepaymentEngine, convert_threshold_period};
pub use error::{EngineError, EngineResult, TableError};
pub use params::{ParameterTable, PlanSet, YearParameters};
pub use types::{
    AnnualLiability, BonusComparison, CombinedRepayment, InterestRule, LoanPlan, PayPeriod,
    PlanParameters, ProjectionInput, ProjectionResult, ProjectionYear, Reconciliation,
    RepaymentInput, RepaymentResult, SalaryTrajectory, TaxYear, round_penny,
};
