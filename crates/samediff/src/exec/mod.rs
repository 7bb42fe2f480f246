//! Numeric op execution interface and executor registry.
//!
//! The session interprets control flow itself and hands every other op to an
//! [`OpExecutor`]. Backends implement the trait in their own crate and
//! register under a name; callers can also pass an executor directly without
//! touching the registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::graph::OpKind;
use crate::tensor::NdArray;

/// Errors from backend op execution.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("op '{op}' ({kind}) is not supported by this executor")]
    Unsupported { op: String, kind: &'static str },
    #[error("op '{op}': {detail}")]
    ShapeMismatch { op: String, detail: String },
    #[error("op '{op}': {detail}")]
    DType { op: String, detail: String },
    #[error("{0}")]
    Execution(String),
}

/// A numeric backend: evaluates one op given its input arrays.
pub trait OpExecutor: Send + Sync {
    /// Backend name for logs and registry lookups.
    fn name(&self) -> &str;

    /// Evaluates `kind` on `inputs`, returning one array per op output.
    /// Control-flow kinds never reach this method.
    fn execute(
        &self,
        kind: &OpKind,
        op_name: &str,
        inputs: &[NdArray],
    ) -> Result<Vec<NdArray>, ExecError>;
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn OpExecutor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers an executor under `name`, replacing any previous entry.
pub fn register_executor(name: &str, executor: Arc<dyn OpExecutor>) {
    REGISTRY
        .write()
        .expect("executor registry lock poisoned")
        .insert(name.to_string(), executor);
}

/// Looks up a registered executor by name.
pub fn executor(name: &str) -> Option<Arc<dyn OpExecutor>> {
    REGISTRY
        .read()
        .expect("executor registry lock poisoned")
        .get(name)
        .cloned()
}

/// Names of all registered executors, unordered.
pub fn executor_names() -> Vec<String> {
    REGISTRY
        .read()
        .expect("executor registry lock poisoned")
        .keys()
        .cloned()
        .collect()
}
