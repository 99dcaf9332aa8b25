mod engine;
mod types;

pub use engine::{parse_birthdate, run_deterministic, run_monte_carlo};
pub use types::{
    AdviceRow, AdviceTrack, AtEnd, BlackSwanConfig, BreakdownRow, Bucket, CashEvent,
    DeterministicRun, GraphPoint, GuardrailConfig, Inputs, PathId, PolicyEvent, PolicyEventKind,
    PolicyState, SelectedPaths, SimulationResults, YearRecord,
};
