use serde::{Deserialize, Serialize};

/// One of the two tracked asset pools.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    #[default]
    Portfolio,
    Super,
}

/// One-off cash applied to a bucket at a given age (inheritance, house sale, ...).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashEvent {
    pub age: u32,
    pub amount: f64,
    #[serde(default)]
    pub bucket: Bucket,
}

/// Spending guardrail thresholds, expressed in years of funding remaining.
///
/// `soft_years` triggers a `cut_pct` reduction of the target spend;
/// `hard_years` clamps spending to the floor. Both are re-evaluated from the
/// current funded ratio every year (no hysteresis).
#[derive(Copy, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailConfig {
    pub enabled: bool,
    pub soft_years: f64,
    pub hard_years: f64,
    /// Whole-number percent, e.g. 20 for a 20% cut.
    pub cut_pct: f64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            soft_years: 30.0,
            hard_years: 20.0,
            cut_pct: 20.0,
        }
    }
}

/// A one-time proportional balance drop at a configured age, followed by a
/// recovery window with an expected-return drag.
#[derive(Copy, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlackSwanConfig {
    pub age: u32,
    /// Portfolio drop, whole-number percent (e.g. 40 for -40%).
    pub drop_pct: f64,
    /// Scale of the super drop relative to the portfolio drop.
    pub super_multiplier: f64,
    /// Length of the recovery window in years.
    pub recovery_years: u32,
    /// Expected-return drag, whole-number percent, applied inside the window.
    pub recovery_drag_pct: f64,
    /// Extra haircut, whole-number percent, decaying linearly to zero across
    /// the recovery window.
    pub extra_haircut_pct: f64,
}

impl Default for BlackSwanConfig {
    fn default() -> Self {
        Self {
            age: 0,
            drop_pct: 0.0,
            super_multiplier: 0.6,
            recovery_years: 3,
            recovery_drag_pct: 3.0,
            extra_haircut_pct: 0.0,
        }
    }
}

/// Fully-typed simulation inputs.
///
/// Percentages are whole numbers (divided by 100 inside the engine) and
/// monetary contributions/spending are monthly figures (annualized inside the
/// engine), matching the upstream form contract. Optional fields have their
/// defaults applied once, at the simulation boundary.
#[derive(Clone, Debug)]
pub struct Inputs {
    pub birthdate: String,
    pub retirement_age: u32,
    pub life_expectancy: u32,

    pub portfolio_balance: f64,
    pub monthly_contribution: f64,
    pub contribution_growth: f64,
    pub portfolio_expected_return: f64,
    pub portfolio_sd: f64,
    pub portfolio_haircut_pct: f64,
    /// Age the post-retirement haircut starts; defaults to the retirement age.
    pub portfolio_haircut_age: Option<u32>,

    pub super_balance: f64,
    pub monthly_super_contribution: f64,
    pub super_growth: f64,
    pub super_blended_return: f64,
    /// Defaults to `portfolio_sd`.
    pub super_sd: Option<f64>,
    pub super_haircut_pct: f64,
    pub super_haircut_age: Option<u32>,

    /// Target spend, $/month.
    pub living_expenses: f64,
    /// Floor spend, $/month.
    pub floor_withdrawal: f64,
    pub inflation: f64,

    /// Cross-bucket return correlation, whole-number percent (-99..=99).
    pub correlation: f64,
    /// Age at which the super bucket becomes drawable.
    pub super_draw_age: u32,

    /// Defaults to an enabled 30/20/20 guardrail when absent.
    pub guardrail: Option<GuardrailConfig>,
    pub black_swan: Option<BlackSwanConfig>,
    pub cash_events: Vec<CashEvent>,

    pub remove_volatility: bool,
    pub contribute_after_retirement: bool,

    /// Persistence weight of the per-run macro regime draw (0..=1).
    pub regime_weight: f64,
    /// Directional error multiplier used by the representative-path selector.
    pub selector_penalty: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyState {
    Normal,
    Cut,
    Floor,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEventKind {
    Shock,
    Cut,
    Floor,
}

/// Marker emitted whenever a path deviates from normal policy or takes a shock.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvent {
    pub age: u32,
    pub kind: PolicyEventKind,
}

/// One row of one simulated path. Monetary fields are annual.
#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub age: u32,
    pub begin_portfolio: f64,
    pub begin_super: f64,
    pub irregular: f64,
    pub contrib_portfolio: f64,
    pub contrib_super: f64,
    pub target_spend: f64,
    pub floor_spend: f64,
    pub allowed_spend: f64,
    pub policy: PolicyState,
    pub withdraw_portfolio: f64,
    pub withdraw_super: f64,
    /// Signed; negative when a shock hit this year, zero otherwise.
    pub shock_amount: f64,
    pub r_portfolio: f64,
    pub r_super: f64,
    pub end_portfolio: f64,
    pub end_super: f64,
}

/// Per-age combined-wealth percentiles, rounded to whole currency units.
#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphPoint {
    pub age: u32,
    pub p20: f64,
    pub p50: f64,
    pub p80: f64,
}

#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtEnd {
    pub p20: f64,
    pub p50: f64,
    pub p80: f64,
    pub end_age: u32,
}

/// Implied annualized growth of each percentile balance since the start.
#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownRow {
    pub age: u32,
    pub ret20: f64,
    pub ret50: f64,
    pub ret80: f64,
    pub bal20: f64,
    pub bal50: f64,
    pub bal80: f64,
}

/// One advice-table row derived from a concrete simulated path.
#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceRow {
    pub age: u32,
    pub policy: PolicyState,
    pub target_spend: f64,
    pub actual_spend: f64,
    pub end_balance: f64,
    pub end_portfolio: f64,
    pub end_super: f64,
    pub r_portfolio: f64,
    /// Omitted once the super bucket has merged into the drawable pool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_super: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceTrack {
    pub p20: Vec<AdviceRow>,
    pub p50: Vec<AdviceRow>,
    pub p80: Vec<AdviceRow>,
}

/// Identity of a simulated run: its derived seed and persistent regime draw.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PathId {
    pub seed: u32,
    pub regime_z: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SelectedPaths {
    pub p20: PathId,
    pub p50: PathId,
    pub p80: PathId,
}

/// Aggregate result of a Monte Carlo run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResults {
    pub graph: Vec<GraphPoint>,
    pub at_end: AtEnd,
    pub breakdown: Vec<BreakdownRow>,
    /// Markers from the selected p20 path (most conservative).
    pub events: Vec<PolicyEvent>,
    pub advice_by_path: AdviceTrack,
    #[serde(skip)]
    pub selected: SelectedPaths,
}

/// Output of the mean-only deterministic run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterministicRun {
    pub rows: Vec<YearRecord>,
    pub events: Vec<PolicyEvent>,
}
