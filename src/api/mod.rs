use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    BlackSwanConfig, Bucket, CashEvent, GuardrailConfig, Inputs, PolicyEvent, YearRecord,
    parse_birthdate, run_deterministic, run_monte_carlo,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiGuardrail {
    enabled: Option<bool>,
    soft_years: Option<f64>,
    hard_years: Option<f64>,
    #[serde(alias = "cutPercent")]
    cut_pct: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiBlackSwan {
    age: Option<u32>,
    #[serde(alias = "dropPercent")]
    drop_pct: Option<f64>,
    super_multiplier: Option<f64>,
    recovery_years: Option<u32>,
    #[serde(alias = "recoveryDragPercent")]
    recovery_drag_pct: Option<f64>,
    #[serde(alias = "extraHaircutPercent")]
    extra_haircut_pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCashEvent {
    age: u32,
    amount: f64,
    bucket: Option<Bucket>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    birthdate: Option<String>,
    retirement_age: Option<u32>,
    life_expectancy: Option<u32>,
    simulations: Option<u32>,
    seed: Option<u32>,

    portfolio_balance: Option<f64>,
    monthly_contribution: Option<f64>,
    contribution_growth: Option<f64>,
    #[serde(alias = "portfolioExpectedReturn")]
    portfolio_growth_rate: Option<f64>,
    #[serde(alias = "portfolioSD")]
    portfolio_sd: Option<f64>,
    #[serde(alias = "portfolioRecalibrationPercent")]
    portfolio_haircut_pct: Option<f64>,
    #[serde(alias = "portfolioRecalibrationAge")]
    portfolio_haircut_age: Option<u32>,

    super_balance: Option<f64>,
    monthly_super_contribution: Option<f64>,
    super_growth: Option<f64>,
    #[serde(alias = "superBlendedReturn")]
    super_growth_rate: Option<f64>,
    #[serde(alias = "superSD")]
    super_sd: Option<f64>,
    #[serde(alias = "superRecalibrationPercent")]
    super_haircut_pct: Option<f64>,
    #[serde(alias = "superRecalibrationAge")]
    super_haircut_age: Option<u32>,

    living_expenses: Option<f64>,
    floor_withdrawal: Option<f64>,
    #[serde(alias = "inflationRate")]
    inflation: Option<f64>,
    correlation: Option<f64>,
    super_draw_age: Option<u32>,

    guardrail: Option<ApiGuardrail>,
    black_swan: Option<ApiBlackSwan>,
    cash_events: Option<Vec<ApiCashEvent>>,

    remove_volatility: Option<bool>,
    contribute_after_retirement: Option<bool>,
    regime_weight: Option<f64>,
    selector_penalty: Option<f64>,
}

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Monte Carlo household wealth projector (portfolio + super, guardrail spending)"
)]
struct Cli {
    #[arg(long)]
    birthdate: String,
    #[arg(long, default_value_t = 60)]
    retirement_age: u32,
    #[arg(long, default_value_t = 90, help = "Age the projection runs through")]
    life_expectancy: u32,
    #[arg(long, default_value_t = 10000)]
    simulations: u32,
    #[arg(long, default_value_t = 1234)]
    seed: u32,

    #[arg(long, default_value_t = 250_000.0)]
    portfolio_balance: f64,
    #[arg(long, default_value_t = 3_000.0)]
    monthly_contribution: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Annual growth of contributions in percent (e.g. pay rises)"
    )]
    contribution_growth: f64,
    #[arg(long, default_value_t = 12.0, help = "Expected annual portfolio return in percent")]
    portfolio_growth_rate: f64,
    #[arg(long, default_value_t = 15.0, help = "Portfolio annual return volatility in percent")]
    portfolio_volatility: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Permanent cut to the portfolio mean return from the haircut age, in percent"
    )]
    portfolio_haircut: f64,
    #[arg(long, help = "Age the portfolio haircut starts; defaults to retirement age")]
    portfolio_haircut_age: Option<u32>,

    #[arg(long, default_value_t = 150_000.0)]
    super_balance: f64,
    #[arg(long, default_value_t = 2_000.0)]
    monthly_super_contribution: f64,
    #[arg(long, default_value_t = 3.0)]
    super_growth: f64,
    #[arg(long, default_value_t = 10.0, help = "Expected annual super return in percent")]
    super_growth_rate: f64,
    #[arg(long, help = "Super return volatility in percent, defaults to portfolio-volatility")]
    super_volatility: Option<f64>,
    #[arg(long, default_value_t = 0.0)]
    super_haircut: f64,
    #[arg(long, help = "Age the super haircut starts; defaults to retirement age")]
    super_haircut_age: Option<u32>,

    #[arg(long, default_value_t = 17_500.0, help = "Target monthly spending in retirement")]
    living_expenses: f64,
    #[arg(
        long,
        default_value_t = 10_000.0,
        help = "Monthly floor spending when the hard guardrail trips"
    )]
    floor_withdrawal: f64,
    #[arg(long, default_value_t = 3.0, help = "Expected annual inflation in percent")]
    inflation_rate: f64,
    #[arg(
        long,
        default_value_t = 30.0,
        help = "Correlation between portfolio and super returns in percent"
    )]
    return_correlation: f64,
    #[arg(long, default_value_t = 63, help = "Earliest age super can fund withdrawals")]
    super_draw_age: u32,

    #[arg(long, help = "Turn off the guardrail spending policy")]
    disable_guardrail: bool,
    #[arg(long, default_value_t = 30.0, help = "Funded-years level that trips the spending cut")]
    guardrail_soft_years: f64,
    #[arg(long, default_value_t = 20.0, help = "Funded-years level that trips the floor")]
    guardrail_hard_years: f64,
    #[arg(long, default_value_t = 20.0, help = "Spending cut at the soft guardrail in percent")]
    guardrail_cut: f64,

    #[arg(long, help = "Age a one-off market crash hits; no crash when omitted")]
    black_swan_age: Option<u32>,
    #[arg(long, default_value_t = 0.0, help = "Crash-year balance drop in percent")]
    black_swan_drop: f64,
    #[arg(
        long,
        default_value_t = 0.6,
        help = "How much of the crash the super balance takes (0..1)"
    )]
    black_swan_super_multiplier: f64,
    #[arg(long, default_value_t = 3)]
    black_swan_recovery_years: u32,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Mean-return drag during the recovery window in percent"
    )]
    black_swan_recovery_drag: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Extra mean haircut after the crash, tapering to zero, in percent"
    )]
    black_swan_extra_haircut: f64,

    #[arg(long, help = "Zero out all return shocks (mean-only projection)")]
    remove_volatility: bool,
    #[arg(long, help = "Keep contributing after the retirement age")]
    contribute_after_retirement: bool,
    #[arg(
        long,
        default_value_t = 0.6,
        help = "Weight of the persistent per-run regime draw in each year's shock (0..1)"
    )]
    regime_weight: f64,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Error multiplier for representative paths ending on the wrong side of their band"
    )]
    selector_penalty: f64,
}

#[derive(Debug)]
struct ApiRequest {
    inputs: Inputs,
    runs: u32,
    seed: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeterministicResponse {
    table: Vec<YearRecord>,
    events: Vec<PolicyEvent>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_inputs(cli: Cli) -> Result<Inputs, String> {
    parse_birthdate(&cli.birthdate)?;

    if cli.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    if cli.life_expectancy < cli.retirement_age {
        return Err("--life-expectancy must be >= --retirement-age".to_string());
    }

    for (name, value) in [
        ("--portfolio-balance", cli.portfolio_balance),
        ("--super-balance", cli.super_balance),
        ("--monthly-contribution", cli.monthly_contribution),
        ("--monthly-super-contribution", cli.monthly_super_contribution),
        ("--living-expenses", cli.living_expenses),
        ("--floor-withdrawal", cli.floor_withdrawal),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    for (name, value) in [
        ("--portfolio-volatility", Some(cli.portfolio_volatility)),
        ("--super-volatility", cli.super_volatility),
        ("--portfolio-haircut", Some(cli.portfolio_haircut)),
        ("--super-haircut", Some(cli.super_haircut)),
        ("--guardrail-cut", Some(cli.guardrail_cut)),
        ("--black-swan-drop", Some(cli.black_swan_drop)),
        ("--black-swan-extra-haircut", Some(cli.black_swan_extra_haircut)),
    ] {
        if let Some(v) = value {
            if !(0.0..=100.0).contains(&v) {
                return Err(format!("{name} must be between 0 and 100"));
            }
        }
    }

    if !(-100.0..=100.0).contains(&cli.return_correlation) {
        return Err("--return-correlation must be between -100 and 100".to_string());
    }

    if !cli.inflation_rate.is_finite() || cli.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    if !cli.contribution_growth.is_finite() || cli.contribution_growth <= -100.0 {
        return Err("--contribution-growth must be > -100".to_string());
    }

    if !cli.super_growth.is_finite() || cli.super_growth <= -100.0 {
        return Err("--super-growth must be > -100".to_string());
    }

    if cli.guardrail_soft_years < cli.guardrail_hard_years || cli.guardrail_hard_years < 0.0 {
        return Err(
            "--guardrail-soft-years must be >= --guardrail-hard-years, both >= 0".to_string(),
        );
    }

    if !cli.black_swan_super_multiplier.is_finite() || cli.black_swan_super_multiplier < 0.0 {
        return Err("--black-swan-super-multiplier must be >= 0".to_string());
    }

    if cli.black_swan_age.is_some() && cli.black_swan_recovery_years == 0 {
        return Err("--black-swan-recovery-years must be > 0".to_string());
    }

    if !(0.0..=100.0).contains(&cli.black_swan_recovery_drag) {
        return Err("--black-swan-recovery-drag must be between 0 and 100".to_string());
    }

    if !(0.0..=1.0).contains(&cli.regime_weight) {
        return Err("--regime-weight must be between 0 and 1".to_string());
    }

    if !cli.selector_penalty.is_finite() || cli.selector_penalty < 1.0 {
        return Err("--selector-penalty must be >= 1".to_string());
    }

    let black_swan = cli.black_swan_age.map(|age| BlackSwanConfig {
        age,
        drop_pct: cli.black_swan_drop,
        super_multiplier: cli.black_swan_super_multiplier,
        recovery_years: cli.black_swan_recovery_years,
        recovery_drag_pct: cli.black_swan_recovery_drag,
        extra_haircut_pct: cli.black_swan_extra_haircut,
    });

    Ok(Inputs {
        birthdate: cli.birthdate,
        retirement_age: cli.retirement_age,
        life_expectancy: cli.life_expectancy,
        portfolio_balance: cli.portfolio_balance,
        monthly_contribution: cli.monthly_contribution,
        contribution_growth: cli.contribution_growth,
        portfolio_expected_return: cli.portfolio_growth_rate,
        portfolio_sd: cli.portfolio_volatility,
        portfolio_haircut_pct: cli.portfolio_haircut,
        portfolio_haircut_age: cli.portfolio_haircut_age,
        super_balance: cli.super_balance,
        monthly_super_contribution: cli.monthly_super_contribution,
        super_growth: cli.super_growth,
        super_blended_return: cli.super_growth_rate,
        super_sd: cli.super_volatility,
        super_haircut_pct: cli.super_haircut,
        super_haircut_age: cli.super_haircut_age,
        living_expenses: cli.living_expenses,
        floor_withdrawal: cli.floor_withdrawal,
        inflation: cli.inflation_rate,
        correlation: cli.return_correlation,
        super_draw_age: cli.super_draw_age,
        guardrail: Some(GuardrailConfig {
            enabled: !cli.disable_guardrail,
            soft_years: cli.guardrail_soft_years,
            hard_years: cli.guardrail_hard_years,
            cut_pct: cli.guardrail_cut,
        }),
        black_swan,
        cash_events: Vec::new(),
        remove_volatility: cli.remove_volatility,
        contribute_after_retirement: cli.contribute_after_retirement,
        regime_weight: cli.regime_weight,
        selector_penalty: cli.selector_penalty,
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/simulate/deterministic", post(deterministic_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("nestegg HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/api/simulate");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match run_monte_carlo(&request.inputs, request.runs, request.seed) {
        Ok(results) => json_response(StatusCode::OK, results),
        Err(msg) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &msg),
    }
}

async fn deterministic_handler(Json(payload): Json<SimulatePayload>) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match run_deterministic(&request.inputs) {
        Ok(run) => json_response(
            StatusCode::OK,
            DeterministicResponse {
                table: run.rows,
                events: run.events,
            },
        ),
        Err(msg) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &msg),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
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

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.birthdate {
        cli.birthdate = v;
    }
    if let Some(v) = payload.retirement_age {
        cli.retirement_age = v;
    }
    if let Some(v) = payload.life_expectancy {
        cli.life_expectancy = v;
    }
    if let Some(v) = payload.simulations {
        cli.simulations = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }

    if let Some(v) = payload.portfolio_balance {
        cli.portfolio_balance = v;
    }
    if let Some(v) = payload.monthly_contribution {
        cli.monthly_contribution = v;
    }
    if let Some(v) = payload.contribution_growth {
        cli.contribution_growth = v;
    }
    if let Some(v) = payload.portfolio_growth_rate {
        cli.portfolio_growth_rate = v;
    }
    if let Some(v) = payload.portfolio_sd {
        cli.portfolio_volatility = v;
    }
    if let Some(v) = payload.portfolio_haircut_pct {
        cli.portfolio_haircut = v;
    }
    if let Some(v) = payload.portfolio_haircut_age {
        cli.portfolio_haircut_age = Some(v);
    }

    if let Some(v) = payload.super_balance {
        cli.super_balance = v;
    }
    if let Some(v) = payload.monthly_super_contribution {
        cli.monthly_super_contribution = v;
    }
    if let Some(v) = payload.super_growth {
        cli.super_growth = v;
    }
    if let Some(v) = payload.super_growth_rate {
        cli.super_growth_rate = v;
    }
    if let Some(v) = payload.super_sd {
        cli.super_volatility = Some(v);
    }
    if let Some(v) = payload.super_haircut_pct {
        cli.super_haircut = v;
    }
    if let Some(v) = payload.super_haircut_age {
        cli.super_haircut_age = Some(v);
    }

    if let Some(v) = payload.living_expenses {
        cli.living_expenses = v;
    }
    if let Some(v) = payload.floor_withdrawal {
        cli.floor_withdrawal = v;
    }
    if let Some(v) = payload.inflation {
        cli.inflation_rate = v;
    }
    if let Some(v) = payload.correlation {
        cli.return_correlation = v;
    }
    if let Some(v) = payload.super_draw_age {
        cli.super_draw_age = v;
    }

    if let Some(g) = &payload.guardrail {
        if let Some(v) = g.enabled {
            cli.disable_guardrail = !v;
        }
        if let Some(v) = g.soft_years {
            cli.guardrail_soft_years = v;
        }
        if let Some(v) = g.hard_years {
            cli.guardrail_hard_years = v;
        }
        if let Some(v) = g.cut_pct {
            cli.guardrail_cut = v;
        }
    }

    if let Some(bs) = &payload.black_swan {
        let Some(age) = bs.age else {
            return Err("blackSwan.age is required when blackSwan is present".to_string());
        };
        cli.black_swan_age = Some(age);
        if let Some(v) = bs.drop_pct {
            cli.black_swan_drop = v;
        }
        if let Some(v) = bs.super_multiplier {
            cli.black_swan_super_multiplier = v;
        }
        if let Some(v) = bs.recovery_years {
            cli.black_swan_recovery_years = v;
        }
        if let Some(v) = bs.recovery_drag_pct {
            cli.black_swan_recovery_drag = v;
        }
        if let Some(v) = bs.extra_haircut_pct {
            cli.black_swan_extra_haircut = v;
        }
    }

    if let Some(v) = payload.remove_volatility {
        cli.remove_volatility = v;
    }
    if let Some(v) = payload.contribute_after_retirement {
        cli.contribute_after_retirement = v;
    }
    if let Some(v) = payload.regime_weight {
        cli.regime_weight = v;
    }
    if let Some(v) = payload.selector_penalty {
        cli.selector_penalty = v;
    }

    let runs = cli.simulations;
    let seed = cli.seed;
    let mut inputs = build_inputs(cli)?;

    if let Some(events) = payload.cash_events {
        let mut cash_events = Vec::with_capacity(events.len());
        for event in events {
            if !event.amount.is_finite() {
                return Err(format!("cashEvents amount at age {} must be finite", event.age));
            }
            cash_events.push(CashEvent {
                age: event.age,
                amount: event.amount,
                bucket: event.bucket.unwrap_or_default(),
            });
        }
        inputs.cash_events = cash_events;
    }

    Ok(ApiRequest { inputs, runs, seed })
}

fn default_cli_for_api() -> Cli {
    Cli {
        birthdate: "1981-01-01".to_string(),
        retirement_age: 60,
        life_expectancy: 90,
        simulations: 10_000,
        seed: 1234,
        portfolio_balance: 250_000.0,
        monthly_contribution: 3_000.0,
        contribution_growth: 3.0,
        portfolio_growth_rate: 12.0,
        portfolio_volatility: 15.0,
        portfolio_haircut: 0.0,
        portfolio_haircut_age: None,
        super_balance: 150_000.0,
        monthly_super_contribution: 2_000.0,
        super_growth: 3.0,
        super_growth_rate: 10.0,
        super_volatility: None,
        super_haircut: 0.0,
        super_haircut_age: None,
        living_expenses: 17_500.0,
        floor_withdrawal: 10_000.0,
        inflation_rate: 3.0,
        return_correlation: 30.0,
        super_draw_age: 63,
        disable_guardrail: false,
        guardrail_soft_years: 30.0,
        guardrail_hard_years: 20.0,
        guardrail_cut: 20.0,
        black_swan_age: None,
        black_swan_drop: 0.0,
        black_swan_super_multiplier: 0.6,
        black_swan_recovery_years: 3,
        black_swan_recovery_drag: 3.0,
        black_swan_extra_haircut: 0.0,
        remove_volatility: false,
        contribute_after_retirement: false,
        regime_weight: 0.6,
        selector_penalty: 4.0,
    }
}
