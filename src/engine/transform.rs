//! Transformation layer
//!
//! Turns staged tables into curated ones. The core only needs to know when
//! it finished and whether it failed.

use super::command::CommandSpec;
use crate::config::TransformConfig;
use crate::error::{Error, Result};
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a transformation did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformReport {
    /// Transformer name
    pub transformer: String,
    /// Scripts or commands executed, in order
    pub steps: Vec<String>,
}

/// Builds curated tables from staged ones
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Name for logs and reports
    fn name(&self) -> &str;

    /// Run the transformation to completion
    async fn run(&self, warehouse: &Arc<Warehouse>) -> Result<TransformReport>;
}

/// Build the configured transformer
pub fn build_transformer(config: &TransformConfig) -> Box<dyn Transformer> {
    match config {
        TransformConfig::None => Box::new(NoTransform),
        TransformConfig::Sql { dir } => Box::new(SqlScriptTransform::new(dir)),
        TransformConfig::Command {
            program,
            args,
            working_dir,
            env,
        } => Box::new(CommandTransform::new(CommandSpec {
            program: program.clone(),
            args: args.clone(),
            working_dir: working_dir.clone(),
            env: env.clone(),
        })),
    }
}

/// Leaves the warehouse untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransform;

#[async_trait]
impl Transformer for NoTransform {
    fn name(&self) -> &str {
        "none"
    }

    async fn run(&self, _warehouse: &Arc<Warehouse>) -> Result<TransformReport> {
        Ok(TransformReport {
            transformer: self.name().to_string(),
            steps: Vec::new(),
        })
    }
}

/// Runs every `*.sql` file in a directory, in lexical order, in one
/// transaction. A failing script rolls back all of them.
#[derive(Debug, Clone)]
pub struct SqlScriptTransform {
    dir: PathBuf,
}

impl SqlScriptTransform {
    /// Create a transform over a script directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Scripts in execution order
    pub fn scripts(&self) -> Result<Vec<PathBuf>> {
        list_scripts(&self.dir)
    }
}

fn list_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut scripts = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        let is_sql = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"));
        if is_sql && path.is_file() {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

#[async_trait]
impl Transformer for SqlScriptTransform {
    fn name(&self) -> &str {
        "sql"
    }

    async fn run(&self, warehouse: &Arc<Warehouse>) -> Result<TransformReport> {
        let scripts = self.scripts()?;
        let mut sources = Vec::with_capacity(scripts.len());
        for path in &scripts {
            let sql = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
            let name = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
            sources.push((name, sql));
        }

        let warehouse = Arc::clone(warehouse);
        let steps = tokio::task::spawn_blocking(move || {
            warehouse.transaction(|conn| {
                let mut steps = Vec::with_capacity(sources.len());
                for (name, sql) in sources {
                    tracing::debug!(script = %name, "Running transform script");
                    conn.execute_batch(&sql)
                        .map_err(|e| Error::command(&name, e.to_string()))?;
                    steps.push(name);
                }
                Ok(steps)
            })
        })
        .await
        .map_err(Error::task)??;

        tracing::info!(scripts = steps.len(), "Transformation finished");
        Ok(TransformReport {
            transformer: self.name().to_string(),
            steps,
        })
    }
}

/// Runs an external command (such as `dbt build`) against the warehouse
/// file while the pipeline's own connection is detached
#[derive(Debug, Clone)]
pub struct CommandTransform {
    spec: CommandSpec,
}

impl CommandTransform {
    /// Create a command transform
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Transformer for CommandTransform {
    fn name(&self) -> &str {
        "command"
    }

    async fn run(&self, warehouse: &Arc<Warehouse>) -> Result<TransformReport> {
        let output = self.spec.run_detached(warehouse).await?;
        if !output.success {
            return Err(Error::command(
                self.spec.display(),
                output.failure_summary(),
            ));
        }
        Ok(TransformReport {
            transformer: self.name().to_string(),
            steps: vec![self.spec.display()],
        })
    }
}
