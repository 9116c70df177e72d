//! Quality gate
//!
//! Decides whether curated data may be exported. A rejection blocks both
//! exporters for the run.

use super::command::CommandSpec;
use crate::config::{QualityGateConfig, SqlAssertion};
use crate::error::{Error, Result};
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of a quality gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Exports may proceed
    Approved,
    /// Exports are blocked
    Rejected {
        /// Why the data was rejected
        reason: String,
    },
}

impl GateDecision {
    /// Check if exports may proceed
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Validates curated data before export
#[async_trait]
pub trait QualityGate: Send + Sync {
    /// Name for logs and reports
    fn name(&self) -> &str;

    /// Evaluate the curated data
    async fn evaluate(&self, warehouse: &Arc<Warehouse>) -> Result<GateDecision>;
}

/// Build the configured gate
pub fn build_gate(config: &QualityGateConfig) -> Box<dyn QualityGate> {
    match config {
        QualityGateConfig::None => Box::new(NoGate),
        QualityGateConfig::Sql { assertions } => Box::new(SqlAssertionGate::new(assertions.clone())),
        QualityGateConfig::Command {
            program,
            args,
            working_dir,
            env,
        } => Box::new(CommandGate::new(CommandSpec {
            program: program.clone(),
            args: args.clone(),
            working_dir: working_dir.clone(),
            env: env.clone(),
        })),
    }
}

/// Approves everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGate;

#[async_trait]
impl QualityGate for NoGate {
    fn name(&self) -> &str {
        "none"
    }

    async fn evaluate(&self, _warehouse: &Arc<Warehouse>) -> Result<GateDecision> {
        Ok(GateDecision::Approved)
    }
}

/// Each named query selects violating rows; any row rejects the run
#[derive(Debug, Clone)]
pub struct SqlAssertionGate {
    assertions: Vec<SqlAssertion>,
}

impl SqlAssertionGate {
    /// Create a gate from assertions
    pub fn new(assertions: Vec<SqlAssertion>) -> Self {
        Self { assertions }
    }
}

#[async_trait]
impl QualityGate for SqlAssertionGate {
    fn name(&self) -> &str {
        "sql"
    }

    async fn evaluate(&self, warehouse: &Arc<Warehouse>) -> Result<GateDecision> {
        let warehouse = Arc::clone(warehouse);
        let assertions = self.assertions.clone();

        let failures = tokio::task::spawn_blocking(move || {
            warehouse.with_conn(|conn| {
                let mut failures = Vec::new();
                for assertion in &assertions {
                    let sql = format!(
                        "SELECT COUNT(*) FROM ({}) AS violations",
                        assertion.sql.trim().trim_end_matches(';')
                    );
                    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                    if count > 0 {
                        tracing::warn!(assertion = %assertion.name, violations = count, "Assertion failed");
                        failures.push(format!("{}: {count} violating rows", assertion.name));
                    }
                }
                Ok(failures)
            })
        })
        .await
        .map_err(Error::task)??;

        if failures.is_empty() {
            Ok(GateDecision::Approved)
        } else {
            Ok(GateDecision::Rejected {
                reason: failures.join("; "),
            })
        }
    }
}

/// Approves when an external validator exits with status 0
#[derive(Debug, Clone)]
pub struct CommandGate {
    spec: CommandSpec,
}

impl CommandGate {
    /// Create a command gate
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl QualityGate for CommandGate {
    fn name(&self) -> &str {
        "command"
    }

    async fn evaluate(&self, warehouse: &Arc<Warehouse>) -> Result<GateDecision> {
        let output = self.spec.run_detached(warehouse).await?;
        if output.success {
            Ok(GateDecision::Approved)
        } else {
            Ok(GateDecision::Rejected {
                reason: format!("{} failed with {}", self.spec.display(), output.failure_summary()),
            })
        }
    }
}
