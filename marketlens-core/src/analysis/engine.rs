//! Runs resolved analysis modules in order and aggregates their findings.
//!
//! Modules are CPU-bound, so `run` moves the whole pass onto the rayon pool and
//! awaits it through a oneshot channel. A module that errors or panics is
//! recorded as a completeness fault; the rest of the pass continues.

use super::bundle::ResultBundle;
use super::module::{AnalysisContext, AnalysisInput};
use super::registry::{AnalysisModuleRegistry, RegistryError, ResolvedModule};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no analysis modules to run")]
    NoModules,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("analysis worker stopped before returning a result")]
    WorkerLost,
}

#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    modules: Arc<[ResolvedModule]>,
}

impl AnalysisEngine {
    pub fn new(modules: Vec<ResolvedModule>) -> Result<Self, EngineError> {
        if modules.is_empty() {
            return Err(EngineError::NoModules);
        }
        Ok(Self {
            modules: modules.into(),
        })
    }

    pub fn from_registry(registry: &AnalysisModuleRegistry) -> Result<Self, EngineError> {
        Self::new(registry.resolve_order()?)
    }

    /// Module names in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.descriptor.name.as_str()).collect()
    }

    /// One pass on the current thread.
    pub fn run_blocking(&self, input: &AnalysisInput) -> ResultBundle {
        run_modules(&self.modules, input)
    }

    /// One pass on the rayon pool.
    pub async fn run(&self, input: Arc<AnalysisInput>) -> Result<ResultBundle, EngineError> {
        let modules = Arc::clone(&self.modules);
        let (tx, rx) = oneshot::channel();
        rayon::spawn(move || {
            let _ = tx.send(run_modules(&modules, &input));
        });
        rx.await.map_err(|_| EngineError::WorkerLost)
    }
}

fn run_modules(modules: &[ResolvedModule], input: &AnalysisInput) -> ResultBundle {
    let mut ctx = AnalysisContext::new();
    let mut bundle = ResultBundle::default();

    for m in modules {
        let name = m.descriptor.name.as_str();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| m.module.analyze(input, &ctx)));
        match outcome {
            Ok(Ok(output)) => {
                debug!(module = name, fields = output.fields.len(), "module finished");
                bundle.merge(name, &output);
                ctx.insert(name, output);
            }
            Ok(Err(e)) => {
                warn!(module = name, symbol = %input.symbol, error = %e, "module produced no output");
                bundle.fault(name, e.to_string());
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(module = name, symbol = %input.symbol, panic = %msg, "module panicked");
                bundle.fault(name, format!("panicked: {msg}"));
            }
        }
    }

    bundle.finish();
    bundle
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
