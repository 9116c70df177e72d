//! Pipeline engine
//!
//! # Overview
//!
//! - `Pipeline` - ingest, transform, gate and export in one run
//! - `Transformer` - builds curated tables (`SqlScriptTransform`, `CommandTransform`)
//! - `QualityGate` - approves or rejects curated data before export
//! - `CommandSpec` - external commands run with the warehouse detached

mod command;
mod gate;
mod pipeline;
mod transform;

pub use command::{CommandOutput, CommandSpec};
pub use gate::{build_gate, CommandGate, GateDecision, NoGate, QualityGate, SqlAssertionGate};
pub use pipeline::{DatasetFailure, Pipeline, RunReport};
pub use transform::{
    build_transformer, CommandTransform, NoTransform, SqlScriptTransform, TransformReport,
    Transformer,
};
