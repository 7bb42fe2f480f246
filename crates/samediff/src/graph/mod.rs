//! Named dataflow graph of variables and operations.
//!
//! The graph is a DAG except for explicitly modeled control-flow subgraphs
//! (`Switch`/`Merge`/`Enter`/`Exit`/`NextIteration`), whose loop-back edges
//! the session resolves into an effectively unrolled execution order via
//! frame/iteration keys. The only permitted forward reference when building
//! is a `Merge` input naming a `NextIteration` output declared later.

mod def;
mod grad;
mod op;

pub use def::{GraphDef, GraphIoError, OpDef, VariableDef};
pub use op::{OpKind, VarSpec};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{DType, NdArray, Shape};
use crate::train::TrainingConfig;

/// Role of a variable within the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    /// Input bound at execution time.
    Placeholder,
    /// Fixed array, never trained.
    Constant,
    /// Trainable parameter array.
    Variable,
    /// Produced by an operation.
    OpOutput,
}

/// A named, typed, shaped graph variable.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub kind: VarKind,
    pub dtype: DType,
    pub shape: Shape,
    /// Backing array for constants and trainable variables.
    pub array: Option<NdArray>,
    /// Producing op, for `OpOutput` variables.
    pub producer: Option<String>,
    /// Ops consuming this variable as an input.
    pub consumers: Vec<String>,
}

/// A named operation with ordered input and output variable references.
#[derive(Debug, Clone)]
pub struct OpNode {
    pub name: String,
    pub kind: OpKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Errors raised during graph construction and validation.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("variable '{0}' already exists in this graph")]
    DuplicateVariable(String),
    #[error("op '{0}' already exists in this graph")]
    DuplicateOp(String),
    #[error("op '{op}' references unknown variable '{name}'")]
    UnknownVariable { op: String, name: String },
    #[error("op '{op}' ({kind}) expects {expected} inputs, got {actual}")]
    ArityMismatch {
        op: String,
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("op '{op}' ({kind}): {detail}")]
    InferenceShape {
        op: String,
        kind: &'static str,
        detail: String,
    },
    #[error("op '{op}' ({kind}): operand dtypes {lhs:?} and {rhs:?} differ")]
    InferenceDType {
        op: String,
        kind: &'static str,
        lhs: DType,
        rhs: DType,
    },
    #[error("gradient is not defined for op '{op}' ({kind})")]
    NonDifferentiable { op: String, kind: &'static str },
    #[error("no gradient path from the loss to variable '{0}'")]
    NoGradientPath(String),
    #[error("loss variable '{0}' must be a scalar")]
    NotScalarLoss(String),
    #[error("variable '{0}' does not exist in this graph")]
    MissingVariable(String),
}

/// A named, mutable dataflow graph (the SameDiff-style forward graph).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    name: String,
    variables: HashMap<String, Variable>,
    variable_order: Vec<String>,
    ops: HashMap<String, OpNode>,
    op_order: Vec<String>,
    training: Option<TrainingConfig>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Graph {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers an execution-time input.
    pub fn placeholder(
        &mut self,
        name: impl Into<String>,
        dtype: DType,
        shape: Shape,
    ) -> Result<String, GraphError> {
        self.insert_variable(name.into(), VarKind::Placeholder, dtype, shape, None)
    }

    /// Registers a fixed (non-trainable) array.
    pub fn constant(
        &mut self,
        name: impl Into<String>,
        array: NdArray,
    ) -> Result<String, GraphError> {
        let dtype = array.dtype();
        let shape = array.shape().clone();
        self.insert_variable(name.into(), VarKind::Constant, dtype, shape, Some(array))
    }

    /// Registers a trainable parameter array.
    pub fn var(&mut self, name: impl Into<String>, array: NdArray) -> Result<String, GraphError> {
        let dtype = array.dtype();
        let shape = array.shape().clone();
        self.insert_variable(name.into(), VarKind::Variable, dtype, shape, Some(array))
    }

    fn insert_variable(
        &mut self,
        name: String,
        kind: VarKind,
        dtype: DType,
        shape: Shape,
        array: Option<NdArray>,
    ) -> Result<String, GraphError> {
        if self.variables.contains_key(&name) {
            return Err(GraphError::DuplicateVariable(name));
        }
        self.variables.insert(
            name.clone(),
            Variable {
                name: name.clone(),
                kind,
                dtype,
                shape,
                array,
                producer: None,
                consumers: Vec::new(),
            },
        );
        self.variable_order.push(name.clone());
        Ok(name)
    }

    /// Adds an operation, creating its output variables. Single-output ops
    /// name their output after the op; `Switch` appends `:0` (false branch)
    /// and `:1` (true branch).
    ///
    /// All inputs must already exist, except that a `Merge` input may forward-
    /// reference a `NextIteration` output declared later; `validate` checks
    /// those references resolve.
    pub fn apply(
        &mut self,
        name: impl Into<String>,
        kind: OpKind,
        inputs: &[&str],
    ) -> Result<Vec<String>, GraphError> {
        let name = name.into();
        let outputs = default_output_names(&name, &kind);
        self.apply_with_outputs(name, kind, inputs, &outputs, true)?;
        Ok(outputs)
    }

    pub(crate) fn apply_with_outputs(
        &mut self,
        name: String,
        kind: OpKind,
        inputs: &[&str],
        outputs: &[String],
        infer: bool,
    ) -> Result<(), GraphError> {
        if self.ops.contains_key(&name) {
            return Err(GraphError::DuplicateOp(name));
        }
        let allow_forward = matches!(kind, OpKind::Merge);
        let mut known_specs = Vec::new();
        for input in inputs {
            match self.variables.get(*input) {
                Some(v) => known_specs.push((v.dtype, v.shape.clone())),
                None if allow_forward => {}
                None => {
                    return Err(GraphError::UnknownVariable {
                        op: name,
                        name: (*input).to_string(),
                    });
                }
            }
        }
        let out_specs = if infer {
            if allow_forward && known_specs.len() < kind.arity() {
                // Merge with a pending loop-back edge: both branches must
                // agree, so the available branch fixes the output spec.
                let first = known_specs.first().cloned().ok_or_else(|| {
                    GraphError::UnknownVariable {
                        op: name.clone(),
                        name: inputs.first().map(|s| s.to_string()).unwrap_or_default(),
                    }
                })?;
                if inputs.len() != kind.arity() {
                    return Err(GraphError::ArityMismatch {
                        op: name,
                        kind: kind.mnemonic(),
                        expected: kind.arity(),
                        actual: inputs.len(),
                    });
                }
                vec![first]
            } else {
                kind.infer(&name, &known_specs)?
            }
        } else {
            // Imported graphs carry output specs on the variables themselves.
            outputs
                .iter()
                .map(|o| {
                    self.variables
                        .get(o)
                        .map(|v| (v.dtype, v.shape.clone()))
                        .ok_or_else(|| GraphError::MissingVariable(o.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        if infer {
            debug_assert_eq!(out_specs.len(), outputs.len());
            for (out_name, (dtype, shape)) in outputs.iter().zip(out_specs) {
                if self.variables.contains_key(out_name) {
                    return Err(GraphError::DuplicateVariable(out_name.clone()));
                }
                self.variables.insert(
                    out_name.clone(),
                    Variable {
                        name: out_name.clone(),
                        kind: VarKind::OpOutput,
                        dtype,
                        shape,
                        array: None,
                        producer: Some(name.clone()),
                        consumers: Vec::new(),
                    },
                );
                self.variable_order.push(out_name.clone());
            }
        } else {
            for out_name in outputs {
                let var = self
                    .variables
                    .get_mut(out_name)
                    .expect("import outputs checked above");
                var.producer = Some(name.clone());
            }
        }
        for input in inputs {
            if let Some(v) = self.variables.get_mut(*input) {
                v.consumers.push(name.clone());
            }
        }
        self.ops.insert(
            name.clone(),
            OpNode {
                name: name.clone(),
                kind,
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                outputs: outputs.to_vec(),
            },
        );
        self.op_order.push(name);
        Ok(())
    }

    /// Resolves forward references recorded during building: every op input
    /// and every producer link must name an existing variable/op, and each
    /// consumer edge for late-declared variables is backfilled.
    pub fn validate(&mut self) -> Result<(), GraphError> {
        let op_names: Vec<String> = self.op_order.clone();
        for op_name in op_names {
            let inputs = self.ops[&op_name].inputs.clone();
            for input in inputs {
                match self.variables.get_mut(&input) {
                    Some(v) => {
                        if !v.consumers.iter().any(|c| c == &op_name) {
                            v.consumers.push(op_name.clone());
                        }
                    }
                    None => {
                        return Err(GraphError::UnknownVariable {
                            op: op_name,
                            name: input,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.get_mut(name)
    }

    pub fn op(&self, name: &str) -> Option<&OpNode> {
        self.ops.get(name)
    }

    /// Variables in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variable_order.iter().map(|n| &self.variables[n])
    }

    /// Ops in declaration order.
    pub fn ops(&self) -> impl Iterator<Item = &OpNode> {
        self.op_order.iter().map(|n| &self.ops[n])
    }

    /// Names of all placeholder variables.
    pub fn placeholders(&self) -> Vec<String> {
        self.variables()
            .filter(|v| v.kind == VarKind::Placeholder)
            .map(|v| v.name.clone())
            .collect()
    }

    /// Names of all trainable variables.
    pub fn trainable_variables(&self) -> Vec<String> {
        self.variables()
            .filter(|v| v.kind == VarKind::Variable)
            .map(|v| v.name.clone())
            .collect()
    }

    /// Binds optimizer, loss wiring and regularization for training.
    pub fn set_training_config(&mut self, config: TrainingConfig) {
        self.training = Some(config);
    }

    pub fn training_config(&self) -> Option<&TrainingConfig> {
        self.training.as_ref()
    }

    // Convenience op constructors. Each returns the output variable name.

    pub fn add(&mut self, name: &str, a: &str, b: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Add, &[a, b])?.remove(0))
    }

    pub fn sub(&mut self, name: &str, a: &str, b: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Sub, &[a, b])?.remove(0))
    }

    pub fn mul(&mut self, name: &str, a: &str, b: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Mul, &[a, b])?.remove(0))
    }

    pub fn div(&mut self, name: &str, a: &str, b: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Div, &[a, b])?.remove(0))
    }

    pub fn neg(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Neg, &[x])?.remove(0))
    }

    pub fn exp(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Exp, &[x])?.remove(0))
    }

    pub fn log(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Log, &[x])?.remove(0))
    }

    pub fn square(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Square, &[x])?.remove(0))
    }

    pub fn sigmoid(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Sigmoid, &[x])?.remove(0))
    }

    pub fn tanh(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Tanh, &[x])?.remove(0))
    }

    pub fn identity(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Identity, &[x])?.remove(0))
    }

    pub fn matmul(&mut self, name: &str, a: &str, b: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::MatMul, &[a, b])?.remove(0))
    }

    pub fn reduce_sum(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::ReduceSum, &[x])?.remove(0))
    }

    pub fn reduce_mean(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::ReduceMean, &[x])?.remove(0))
    }

    pub fn less(&mut self, name: &str, a: &str, b: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Less, &[a, b])?.remove(0))
    }

    /// Switch returns `(false_branch, true_branch)` output names.
    pub fn switch(
        &mut self,
        name: &str,
        data: &str,
        pred: &str,
    ) -> Result<(String, String), GraphError> {
        let mut outs = self.apply(name, OpKind::Switch, &[data, pred])?;
        let true_branch = outs.remove(1);
        let false_branch = outs.remove(0);
        Ok((false_branch, true_branch))
    }

    pub fn merge(&mut self, name: &str, a: &str, b: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Merge, &[a, b])?.remove(0))
    }

    pub fn enter(&mut self, name: &str, frame: &str, x: &str) -> Result<String, GraphError> {
        Ok(self
            .apply(
                name,
                OpKind::Enter {
                    frame: frame.to_string(),
                },
                &[x],
            )?
            .remove(0))
    }

    pub fn exit(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::Exit, &[x])?.remove(0))
    }

    pub fn next_iteration(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::NextIteration, &[x])?.remove(0))
    }

    pub fn loop_cond(&mut self, name: &str, x: &str) -> Result<String, GraphError> {
        Ok(self.apply(name, OpKind::LoopCond, &[x])?.remove(0))
    }
}

fn default_output_names(op_name: &str, kind: &OpKind) -> Vec<String> {
    match kind.num_outputs() {
        1 => vec![op_name.to_string()],
        n => (0..n).map(|i| format!("{op_name}:{i}")).collect(),
    }
}
