use std::collections::BTreeMap;
use std::f64::consts::PI;

use chrono::{Datelike, NaiveDate, Utc};

use super::types::{
    AdviceRow, AdviceTrack, AtEnd, BreakdownRow, Bucket, DeterministicRun, GraphPoint, Inputs,
    PathId, PolicyEvent, PolicyEventKind, PolicyState, SelectedPaths, SimulationResults,
    YearRecord,
};

/// Deterministic uniform(0,1) stream (mulberry32 over a 32-bit seed).
struct Rng {
    state: u32,
}

impl Rng {
    fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut r = self.state;
        r = (r ^ (r >> 15)).wrapping_mul(r | 1);
        r ^= r.wrapping_add((r ^ (r >> 7)).wrapping_mul(r | 61));
        (r ^ (r >> 14)) as f64 / 4_294_967_296.0
    }

    /// Box-Muller draw; re-draws on a zero uniform to avoid ln(0).
    fn standard_normal(&mut self) -> f64 {
        let mut u = 0.0;
        while u == 0.0 {
            u = self.next_f64();
        }
        let mut v = 0.0;
        while v == 0.0 {
            v = self.next_f64();
        }
        (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
    }
}

/// Lognormal-consistent annual return from an arithmetic mean, volatility and
/// a standard-normal shock.
fn annual_return(mu: f64, sigma: f64, z: f64) -> f64 {
    let m = (1.0 + mu).ln() - 0.5 * sigma * sigma;
    (m + sigma * z).exp() - 1.0
}

/// ROI sanity bands derived from long-run history. The advice tracks get
/// tighter bands than the raw Monte Carlo pass: a multi-decade extreme
/// percentile path should not realize single-year returns outside
/// historically plausible ranges for that band.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ScenarioBand {
    Global,
    P20,
    P50,
    P80,
}

impl ScenarioBand {
    fn limits(self) -> (f64, f64) {
        match self {
            ScenarioBand::Global => (-0.35, 0.35),
            ScenarioBand::P20 => (-0.12, 0.18),
            ScenarioBand::P50 => (-0.10, 0.25),
            ScenarioBand::P80 => (-0.05, 0.35),
        }
    }
}

/// Clamp a raw annual return to its scenario band. Applied after the
/// lognormal transform, never before.
fn clamp_roi(raw: f64, band: ScenarioBand) -> f64 {
    let (min, max) = band.limits();
    raw.clamp(min, max)
}

fn pct(x: f64) -> f64 {
    x / 100.0
}

/// Parse ISO (YYYY-MM-DD) or D/M/Y (or D-M-Y) birthdates. Unparseable input
/// is a hard error, never a silent "today".
pub fn parse_birthdate(s: &str) -> Result<NaiveDate, String> {
    let trimmed = s.trim();
    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(date);
        }
    }
    Err(format!("Invalid birthdate: \"{s}\""))
}

fn age_on(birthdate: NaiveDate, today: NaiveDate) -> u32 {
    let mut age = today.year() - birthdate.year();
    if (today.month(), today.day()) < (birthdate.month(), birthdate.day()) {
        age -= 1;
    }
    age.max(0) as u32
}

#[derive(Clone, Debug)]
struct BucketParams {
    balance: f64,
    contribution_yr: f64,
    contribution_growth: f64,
    mu: f64,
    sd: f64,
    haircut: f64,
    haircut_age: u32,
}

#[derive(Copy, Clone, Debug)]
struct GuardrailParams {
    enabled: bool,
    soft_years: f64,
    hard_years: f64,
    cut: f64,
}

#[derive(Copy, Clone, Debug)]
struct ShockParams {
    age: u32,
    drop: f64,
    super_multiplier: f64,
    recovery_years: u32,
    drag: f64,
    extra_haircut: f64,
}

impl ShockParams {
    fn years_since(&self, age: u32) -> Option<u32> {
        let dist = age.checked_sub(self.age)?;
        (dist >= 1 && dist <= self.recovery_years).then_some(dist)
    }

    /// Extra mean haircut, decaying linearly to zero across the recovery window.
    fn tapered_haircut(&self, age: u32) -> f64 {
        match self.years_since(age) {
            Some(dist) if self.extra_haircut > 0.0 => {
                self.extra_haircut * (self.recovery_years - dist) as f64
                    / self.recovery_years as f64
            }
            _ => 0.0,
        }
    }

    fn in_recovery(&self, age: u32) -> bool {
        self.years_since(age).is_some()
    }
}

/// All optional inputs resolved, percentages as decimals, monthly amounts
/// annualized. Built once per simulation call; the per-year loop reads only
/// this structure.
#[derive(Clone, Debug)]
struct PathParams {
    start_age: u32,
    end_age: u32,
    ret_age: u32,
    super_draw_age: u32,

    portfolio: BucketParams,
    super_fund: BucketParams,

    inflation: f64,
    want_start_yr: f64,
    floor_start_yr: f64,

    rho: f64,
    regime_weight: f64,
    selector_penalty: f64,

    guard: GuardrailParams,
    shock: Option<ShockParams>,

    irregular_portfolio: BTreeMap<u32, f64>,
    irregular_super: BTreeMap<u32, f64>,

    remove_vol: bool,
    contribute_after_retirement: bool,
}

impl PathParams {
    fn resolve(inputs: &Inputs) -> Result<Self, String> {
        Self::resolve_at(inputs, Utc::now().date_naive())
    }

    fn resolve_at(inputs: &Inputs, today: NaiveDate) -> Result<Self, String> {
        let birthdate = parse_birthdate(&inputs.birthdate)?;
        let start_age = age_on(birthdate, today);
        let end_age = inputs.life_expectancy.max(start_age);
        let ret_age = inputs.retirement_age;

        let guard_cfg = inputs.guardrail.unwrap_or_default();
        let guard = GuardrailParams {
            enabled: guard_cfg.enabled,
            soft_years: guard_cfg.soft_years,
            hard_years: guard_cfg.hard_years,
            cut: pct(guard_cfg.cut_pct),
        };

        let shock = inputs.black_swan.map(|cfg| ShockParams {
            age: cfg.age,
            drop: pct(cfg.drop_pct),
            super_multiplier: cfg.super_multiplier,
            recovery_years: cfg.recovery_years,
            drag: pct(cfg.recovery_drag_pct),
            extra_haircut: pct(cfg.extra_haircut_pct),
        });

        let mut irregular_portfolio = BTreeMap::new();
        let mut irregular_super = BTreeMap::new();
        for event in &inputs.cash_events {
            let map = match event.bucket {
                Bucket::Portfolio => &mut irregular_portfolio,
                Bucket::Super => &mut irregular_super,
            };
            *map.entry(event.age).or_insert(0.0) += event.amount;
        }

        Ok(Self {
            start_age,
            end_age,
            ret_age,
            super_draw_age: inputs.super_draw_age,
            portfolio: BucketParams {
                balance: inputs.portfolio_balance.max(0.0),
                contribution_yr: inputs.monthly_contribution * 12.0,
                contribution_growth: pct(inputs.contribution_growth),
                mu: pct(inputs.portfolio_expected_return),
                sd: pct(inputs.portfolio_sd),
                haircut: pct(inputs.portfolio_haircut_pct),
                haircut_age: inputs.portfolio_haircut_age.unwrap_or(ret_age),
            },
            super_fund: BucketParams {
                balance: inputs.super_balance.max(0.0),
                contribution_yr: inputs.monthly_super_contribution * 12.0,
                contribution_growth: pct(inputs.super_growth),
                mu: pct(inputs.super_blended_return),
                sd: pct(inputs.super_sd.unwrap_or(inputs.portfolio_sd)),
                haircut: pct(inputs.super_haircut_pct),
                haircut_age: inputs.super_haircut_age.unwrap_or(ret_age),
            },
            inflation: pct(inputs.inflation),
            want_start_yr: inputs.living_expenses * 12.0,
            floor_start_yr: inputs.floor_withdrawal * 12.0,
            rho: pct(inputs.correlation).clamp(-0.99, 0.99),
            regime_weight: inputs.regime_weight.clamp(0.0, 1.0),
            selector_penalty: inputs.selector_penalty.max(1.0),
            guard,
            shock,
            irregular_portfolio,
            irregular_super,
            remove_vol: inputs.remove_volatility,
            contribute_after_retirement: inputs.contribute_after_retirement,
        })
    }
}

#[derive(Copy, Clone, Debug)]
struct GuardrailDecision {
    policy: PolicyState,
    allowed: f64,
    funded_years: f64,
}

/// Stateless per-year spending decision. A zero target spend counts as
/// infinitely funded; a disabled guardrail always resolves to normal/target.
/// The allowed amount is capped at the drawable balance.
fn evaluate_guardrail(
    guard: &GuardrailParams,
    drawable: f64,
    want: f64,
    floor: f64,
) -> GuardrailDecision {
    let funded_years = if want > 0.0 {
        drawable / want
    } else {
        f64::INFINITY
    };

    let (policy, allowed) = if !guard.enabled {
        (PolicyState::Normal, want)
    } else if funded_years <= guard.hard_years {
        (PolicyState::Floor, floor)
    } else if funded_years <= guard.soft_years {
        (PolicyState::Cut, want * (1.0 - guard.cut))
    } else {
        (PolicyState::Normal, want)
    };

    GuardrailDecision {
        policy,
        allowed: allowed.min(drawable).max(0.0),
        funded_years,
    }
}

#[derive(Copy, Clone, Debug)]
struct PathOpts {
    seed: u32,
    /// Persistent macro tilt for the whole run; drawn from the path's own
    /// stream when absent (and stochastic).
    regime_z: Option<f64>,
    band: ScenarioBand,
    remove_vol: bool,
}

#[derive(Clone, Debug)]
struct PathOutcome {
    rows: Vec<YearRecord>,
    events: Vec<PolicyEvent>,
}

/// Advance one household's balances one simulated year at a time, from the
/// current age through the life-expectancy age inclusive. Never terminates
/// early: a depleted bucket withdraws zero and stays at zero.
fn simulate_path(params: &PathParams, opts: PathOpts) -> PathOutcome {
    let mut rng = Rng::new(opts.seed);
    let alpha = params.regime_weight;
    let regime_z = match opts.regime_z {
        Some(z) => z,
        None if opts.remove_vol => 0.0,
        None => rng.standard_normal(),
    };
    let orth_regime = (1.0 - alpha * alpha).sqrt();
    let orth_corr = (1.0 - params.rho * params.rho).sqrt();

    let mut bal_p = params.portfolio.balance;
    let mut bal_s = params.super_fund.balance;

    let years = (params.end_age - params.start_age + 1) as usize;
    let mut rows = Vec::with_capacity(years);
    let mut events = Vec::new();

    for age in params.start_age..=params.end_age {
        let begin_p = bal_p;
        let begin_s = bal_s;

        // One-off cash events first.
        let irr_p = params.irregular_portfolio.get(&age).copied().unwrap_or(0.0);
        let irr_s = params.irregular_super.get(&age).copied().unwrap_or(0.0);
        bal_p += irr_p;
        bal_s += irr_s;

        let retired = age >= params.ret_age;
        let can_draw_super = age >= params.super_draw_age;

        // Contributions, compounding from the simulation's start age.
        let mut contrib_p = 0.0;
        let mut contrib_s = 0.0;
        if !retired || params.contribute_after_retirement {
            let n = (age - params.start_age) as i32;
            contrib_p =
                params.portfolio.contribution_yr * (1.0 + params.portfolio.contribution_growth).powi(n);
            contrib_s = params.super_fund.contribution_yr
                * (1.0 + params.super_fund.contribution_growth).powi(n);
            bal_p += contrib_p;
            bal_s += contrib_s;
        }

        // Spending policy and withdrawals, portfolio-first.
        let mut want = 0.0;
        let mut floor = 0.0;
        let mut allowed = 0.0;
        let mut policy = PolicyState::Normal;
        let mut withdraw_p = 0.0;
        let mut withdraw_s = 0.0;
        if retired {
            let n = (age - params.ret_age) as i32;
            want = params.want_start_yr * (1.0 + params.inflation).powi(n);
            floor = params.floor_start_yr * (1.0 + params.inflation).powi(n);

            let drawable = if can_draw_super { bal_p + bal_s } else { bal_p };
            let decision = evaluate_guardrail(&params.guard, drawable, want, floor);
            policy = decision.policy;
            allowed = decision.allowed;
            match policy {
                PolicyState::Cut => events.push(PolicyEvent {
                    age,
                    kind: PolicyEventKind::Cut,
                }),
                PolicyState::Floor => events.push(PolicyEvent {
                    age,
                    kind: PolicyEventKind::Floor,
                }),
                PolicyState::Normal => {}
            }

            withdraw_p = allowed.min(bal_p);
            bal_p -= withdraw_p;
            if can_draw_super {
                withdraw_s = (allowed - withdraw_p).min(bal_s);
                bal_s -= withdraw_s;
            }
        }

        // Black-swan drop before growth; super scaled by its impact multiplier.
        let mut shock_amount = 0.0;
        if let Some(shock) = &params.shock {
            if shock.drop > 0.0 && age == shock.age {
                let drop_p = bal_p * shock.drop;
                let drop_s = bal_s * shock.drop * shock.super_multiplier;
                bal_p -= drop_p;
                bal_s -= drop_s;
                shock_amount = -(drop_p + drop_s);
                events.push(PolicyEvent {
                    age,
                    kind: PolicyEventKind::Shock,
                });
            }
        }

        // Mean returns: base, post-retirement haircut, tapering extra shock
        // haircut, then recovery drag.
        let mut mu_p = params.portfolio.mu;
        let mut mu_s = params.super_fund.mu;
        if age >= params.portfolio.haircut_age {
            mu_p = (mu_p - params.portfolio.haircut).max(-0.99);
        }
        if age >= params.super_fund.haircut_age {
            mu_s = (mu_s - params.super_fund.haircut).max(-0.99);
        }
        if let Some(shock) = &params.shock {
            let taper = shock.tapered_haircut(age);
            if taper > 0.0 {
                mu_p = (mu_p - taper).max(-0.99);
                mu_s = (mu_s - taper).max(-0.99);
            }
            if shock.in_recovery(age) {
                mu_p = (mu_p - shock.drag).max(-0.99);
                mu_s = (mu_s - shock.drag).max(-0.99);
            }
        }

        // Regime-tilted, correlated shocks.
        let (z_p, z_s) = if opts.remove_vol {
            (0.0, 0.0)
        } else {
            let eps_p = rng.standard_normal();
            let eps_s = rng.standard_normal();
            let base_p = alpha * regime_z + orth_regime * eps_p;
            let base_s = alpha * regime_z + orth_regime * eps_s;
            (base_p, params.rho * base_p + orth_corr * base_s)
        };

        let r_p = clamp_roi(annual_return(mu_p, params.portfolio.sd, z_p), opts.band);
        let r_s = clamp_roi(annual_return(mu_s, params.super_fund.sd, z_s), opts.band);

        bal_p = (bal_p * (1.0 + r_p)).max(0.0);
        bal_s = (bal_s * (1.0 + r_s)).max(0.0);

        rows.push(YearRecord {
            age,
            begin_portfolio: begin_p,
            begin_super: begin_s,
            irregular: irr_p + irr_s,
            contrib_portfolio: contrib_p,
            contrib_super: contrib_s,
            target_spend: want,
            floor_spend: floor,
            allowed_spend: allowed,
            policy,
            withdraw_portfolio: withdraw_p,
            withdraw_super: withdraw_s,
            shock_amount,
            r_portfolio: r_p,
            r_super: r_s,
            end_portfolio: bal_p,
            end_super: bal_s,
        });
    }

    PathOutcome { rows, events }
}

/// Linear interpolation between the two nearest order statistics;
/// `sorted` must be ascending, `p` in 0..=1.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (sorted.len() - 1) as f64 * p;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let w = rank - lo as f64;
        sorted[lo] * (1.0 - w) + sorted[hi] * w
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TrackDirection {
    Low,
    Median,
    High,
}

/// Pick the run whose full trajectory best matches a percentile curve.
/// The directional penalty multiplies the error of a run that ends on the
/// wrong side of the curve's final value (too lucky to represent the unlucky
/// band, or vice versa). Ties keep the earliest run index.
fn select_run(
    curve: &[f64],
    run_wealth: &[Vec<f64>],
    direction: TrackDirection,
    penalty: f64,
) -> usize {
    let last = curve.len() - 1;
    let mut best = 0;
    let mut best_err = f64::INFINITY;

    for (k, wealth) in run_wealth.iter().enumerate() {
        let mut err: f64 = curve
            .iter()
            .zip(wealth.iter())
            .map(|(c, w)| (w - c) * (w - c))
            .sum();

        let wrong_side = match direction {
            TrackDirection::Low => wealth[last] > curve[last],
            TrackDirection::High => wealth[last] < curve[last],
            TrackDirection::Median => false,
        };
        if wrong_side {
            err *= penalty;
        }

        if err < best_err {
            best_err = err;
            best = k;
        }
    }

    best
}

fn advice_rows(rows: &[YearRecord], super_draw_age: u32) -> Vec<AdviceRow> {
    rows.iter()
        .map(|r| AdviceRow {
            age: r.age,
            policy: r.policy,
            target_spend: r.target_spend,
            actual_spend: r.withdraw_portfolio + r.withdraw_super,
            end_balance: r.end_portfolio + r.end_super,
            end_portfolio: r.end_portfolio,
            end_super: r.end_super,
            r_portfolio: r.r_portfolio,
            r_super: (r.age < super_draw_age).then_some(r.r_super),
        })
        .collect()
}

/// Implied annualized growth (percent) of an end balance versus the starting
/// balance, over `years`.
fn implied_cagr(end: f64, start: f64, years: u32) -> f64 {
    let ratio = end.max(1.0) / start.max(1.0);
    let raw = (ratio.powf(1.0 / years.max(1) as f64) - 1.0) * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Full Monte Carlo run: `runs` independent paths, percentile graph, and one
/// representative advice track per band. Identical `(inputs, runs, seed)`
/// reproduce bit-identical results.
pub fn run_monte_carlo(inputs: &Inputs, runs: u32, seed: u32) -> Result<SimulationResults, String> {
    if runs == 0 {
        return Err("run count must be > 0".to_string());
    }
    let params = PathParams::resolve(inputs)?;
    monte_carlo_with_params(&params, runs, seed)
}

fn monte_carlo_with_params(
    params: &PathParams,
    runs: u32,
    seed: u32,
) -> Result<SimulationResults, String> {
    let ages: Vec<u32> = (params.start_age..=params.end_age).collect();
    let years = ages.len();

    let mut per_age: Vec<Vec<f64>> = (0..years).map(|_| Vec::with_capacity(runs as usize)).collect();
    let mut run_wealth: Vec<Vec<f64>> = Vec::with_capacity(runs as usize);
    let mut run_ids: Vec<PathId> = Vec::with_capacity(runs as usize);

    // One persistent macro-regime draw per run, from a stream keyed off the
    // base seed so run seeds and regime draws never alias.
    let mut regime_rng = Rng::new(seed.wrapping_mul(97).wrapping_add(7));

    for k in 0..runs {
        let regime_z = regime_rng.standard_normal();
        let run_seed = seed.wrapping_add(k);
        let outcome = simulate_path(
            params,
            PathOpts {
                seed: run_seed,
                regime_z: Some(regime_z),
                band: ScenarioBand::Global,
                remove_vol: params.remove_vol,
            },
        );

        let wealth: Vec<f64> = outcome
            .rows
            .iter()
            .map(|r| r.end_portfolio + r.end_super)
            .collect();
        for (i, w) in wealth.iter().enumerate() {
            if !w.is_finite() {
                return Err(format!(
                    "run {k} (seed {run_seed}) produced a non-finite balance at age {}",
                    ages[i]
                ));
            }
            per_age[i].push(*w);
        }
        run_wealth.push(wealth);
        run_ids.push(PathId {
            seed: run_seed,
            regime_z,
        });
    }

    for samples in &mut per_age {
        samples.sort_by(f64::total_cmp);
    }

    let curve20: Vec<f64> = per_age.iter().map(|s| percentile(s, 0.20)).collect();
    let curve50: Vec<f64> = per_age.iter().map(|s| percentile(s, 0.50)).collect();
    let curve80: Vec<f64> = per_age.iter().map(|s| percentile(s, 0.80)).collect();

    let graph: Vec<GraphPoint> = ages
        .iter()
        .enumerate()
        .map(|(i, &age)| GraphPoint {
            age,
            p20: curve20[i].round(),
            p50: curve50[i].round(),
            p80: curve80[i].round(),
        })
        .collect();

    let start_bal = params.portfolio.balance + params.super_fund.balance;
    let breakdown: Vec<BreakdownRow> = ages
        .iter()
        .enumerate()
        .map(|(i, &age)| {
            let yrs = (age - params.start_age).max(1);
            BreakdownRow {
                age,
                ret20: implied_cagr(curve20[i], start_bal, yrs),
                ret50: implied_cagr(curve50[i], start_bal, yrs),
                ret80: implied_cagr(curve80[i], start_bal, yrs),
                bal20: curve20[i].round(),
                bal50: curve50[i].round(),
                bal80: curve80[i].round(),
            }
        })
        .collect();

    let penalty = params.selector_penalty;
    let pick20 = select_run(&curve20, &run_wealth, TrackDirection::Low, penalty);
    let pick50 = select_run(&curve50, &run_wealth, TrackDirection::Median, penalty);
    let pick80 = select_run(&curve80, &run_wealth, TrackDirection::High, penalty);

    // Re-simulate each winner so the advice timeline comes from one
    // internally-consistent path, rendered with its band-specific clamp.
    let rematerialize = |id: PathId, band: ScenarioBand| {
        simulate_path(
            params,
            PathOpts {
                seed: id.seed,
                regime_z: Some(id.regime_z),
                band,
                remove_vol: params.remove_vol,
            },
        )
    };
    let unlucky = rematerialize(run_ids[pick20], ScenarioBand::P20);
    let median = rematerialize(run_ids[pick50], ScenarioBand::P50);
    let lucky = rematerialize(run_ids[pick80], ScenarioBand::P80);

    let last = graph[graph.len() - 1];
    Ok(SimulationResults {
        at_end: AtEnd {
            p20: last.p20,
            p50: last.p50,
            p80: last.p80,
            end_age: last.age,
        },
        graph,
        breakdown,
        events: unlucky.events.clone(),
        advice_by_path: AdviceTrack {
            p20: advice_rows(&unlucky.rows, params.super_draw_age),
            p50: advice_rows(&median.rows, params.super_draw_age),
            p80: advice_rows(&lucky.rows, params.super_draw_age),
        },
        selected: SelectedPaths {
            p20: run_ids[pick20],
            p50: run_ids[pick50],
            p80: run_ids[pick80],
        },
    })
}

/// Mean-only path for the "what happens on average" table: all shocks zero,
/// same year-by-year mechanics as the stochastic paths.
pub fn run_deterministic(inputs: &Inputs) -> Result<DeterministicRun, String> {
    let params = PathParams::resolve(inputs)?;
    let outcome = simulate_path(
        &params,
        PathOpts {
            seed: 42,
            regime_z: Some(0.0),
            band: ScenarioBand::Global,
            remove_vol: true,
        },
    );
    Ok(DeterministicRun {
        rows: outcome.rows,
        events: outcome.events,
    })
}
