//! Closed set of operation kinds with per-kind shape/dtype inference.

use serde::{Deserialize, Serialize};

use crate::tensor::{DType, Shape};

use super::GraphError;

/// Declarative form of graph operations.
///
/// Control-flow kinds (`Switch`, `Merge`, `Enter`, `Exit`, `NextIteration`,
/// `LoopCond`) are interpreted by the session's frame/iteration machinery and
/// never reach the numeric executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    // Elementwise binary; operands must share shapes, or one side is a scalar
    // broadcast against the other.
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
    // Elementwise unary.
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Square,
    Sigmoid,
    Tanh,
    Relu,
    Identity,
    // Linear algebra (rank-2 operands).
    MatMul,
    Transpose,
    // Full reductions to a 0-d scalar.
    ReduceSum,
    ReduceMean,
    ReduceMax,
    // Comparisons produce Bool arrays of the broadcast shape.
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    // Control flow.
    Switch,
    Merge,
    Enter { frame: String },
    Exit,
    NextIteration,
    LoopCond,
}

/// Inferred dtype/shape pair for one op output.
pub type VarSpec = (DType, Shape);

impl OpKind {
    /// Stable lower-case mnemonic used in logs and errors.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Maximum => "maximum",
            OpKind::Minimum => "minimum",
            OpKind::Neg => "neg",
            OpKind::Abs => "abs",
            OpKind::Exp => "exp",
            OpKind::Log => "log",
            OpKind::Sqrt => "sqrt",
            OpKind::Square => "square",
            OpKind::Sigmoid => "sigmoid",
            OpKind::Tanh => "tanh",
            OpKind::Relu => "relu",
            OpKind::Identity => "identity",
            OpKind::MatMul => "matmul",
            OpKind::Transpose => "transpose",
            OpKind::ReduceSum => "reduce_sum",
            OpKind::ReduceMean => "reduce_mean",
            OpKind::ReduceMax => "reduce_max",
            OpKind::Less => "less",
            OpKind::LessEqual => "less_equal",
            OpKind::Greater => "greater",
            OpKind::GreaterEqual => "greater_equal",
            OpKind::Equal => "equal",
            OpKind::NotEqual => "not_equal",
            OpKind::Switch => "switch",
            OpKind::Merge => "merge",
            OpKind::Enter { .. } => "enter",
            OpKind::Exit => "exit",
            OpKind::NextIteration => "next_iteration",
            OpKind::LoopCond => "loop_cond",
        }
    }

    /// Returns `true` for ops the session interprets itself.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            OpKind::Switch
                | OpKind::Merge
                | OpKind::Enter { .. }
                | OpKind::Exit
                | OpKind::NextIteration
                | OpKind::LoopCond
        )
    }

    /// Number of input variables the op expects. `Merge` accepts two inputs
    /// of which only one is expected to arrive per iteration.
    pub fn arity(&self) -> usize {
        match self {
            OpKind::Add
            | OpKind::Sub
            | OpKind::Mul
            | OpKind::Div
            | OpKind::Maximum
            | OpKind::Minimum
            | OpKind::MatMul
            | OpKind::Less
            | OpKind::LessEqual
            | OpKind::Greater
            | OpKind::GreaterEqual
            | OpKind::Equal
            | OpKind::NotEqual
            | OpKind::Switch
            | OpKind::Merge => 2,
            _ => 1,
        }
    }

    /// Number of output variables. `Switch` routes to one of two outputs.
    pub fn num_outputs(&self) -> usize {
        match self {
            OpKind::Switch => 2,
            _ => 1,
        }
    }

    /// Shape/dtype inference. Input specs are in declaration order; the
    /// result has one spec per output.
    pub fn infer(&self, op_name: &str, inputs: &[VarSpec]) -> Result<Vec<VarSpec>, GraphError> {
        if inputs.len() != self.arity() {
            return Err(GraphError::ArityMismatch {
                op: op_name.to_string(),
                kind: self.mnemonic(),
                expected: self.arity(),
                actual: inputs.len(),
            });
        }
        match self {
            OpKind::Add
            | OpKind::Sub
            | OpKind::Mul
            | OpKind::Div
            | OpKind::Maximum
            | OpKind::Minimum => {
                let (dtype, shape) = broadcast_pair(op_name, self, &inputs[0], &inputs[1])?;
                Ok(vec![(dtype, shape)])
            }
            OpKind::Less
            | OpKind::LessEqual
            | OpKind::Greater
            | OpKind::GreaterEqual
            | OpKind::Equal
            | OpKind::NotEqual => {
                let (_, shape) = broadcast_pair(op_name, self, &inputs[0], &inputs[1])?;
                Ok(vec![(DType::Bool, shape)])
            }
            OpKind::Neg
            | OpKind::Abs
            | OpKind::Exp
            | OpKind::Log
            | OpKind::Sqrt
            | OpKind::Square
            | OpKind::Sigmoid
            | OpKind::Tanh
            | OpKind::Relu
            | OpKind::Identity => Ok(vec![inputs[0].clone()]),
            OpKind::MatMul => {
                let (da, sa) = &inputs[0];
                let (db, sb) = &inputs[1];
                if da != db {
                    return Err(GraphError::InferenceDType {
                        op: op_name.to_string(),
                        kind: self.mnemonic(),
                        lhs: *da,
                        rhs: *db,
                    });
                }
                if sa.rank() != 2 || sb.rank() != 2 || sa.dims()[1] != sb.dims()[0] {
                    return Err(GraphError::InferenceShape {
                        op: op_name.to_string(),
                        kind: self.mnemonic(),
                        detail: format!("cannot contract {sa} with {sb}"),
                    });
                }
                Ok(vec![(*da, Shape::new(vec![sa.dims()[0], sb.dims()[1]]))])
            }
            OpKind::Transpose => {
                let (dtype, shape) = &inputs[0];
                let dims: Vec<usize> = shape.dims().iter().rev().copied().collect();
                Ok(vec![(*dtype, Shape::new(dims))])
            }
            OpKind::ReduceSum | OpKind::ReduceMean | OpKind::ReduceMax => {
                Ok(vec![(inputs[0].0, Shape::scalar())])
            }
            OpKind::Switch => {
                let (pd, ps) = &inputs[1];
                if *pd != DType::Bool || ps.num_elements() != 1 {
                    return Err(GraphError::InferenceShape {
                        op: op_name.to_string(),
                        kind: self.mnemonic(),
                        detail: format!("predicate must be a Bool scalar, got {pd:?} {ps}"),
                    });
                }
                Ok(vec![inputs[0].clone(), inputs[0].clone()])
            }
            OpKind::Merge => {
                // Both branches must agree; only one will arrive at runtime.
                let (da, sa) = &inputs[0];
                let (db, sb) = &inputs[1];
                if da != db || sa != sb {
                    return Err(GraphError::InferenceShape {
                        op: op_name.to_string(),
                        kind: self.mnemonic(),
                        detail: format!("branches disagree: {da:?} {sa} vs {db:?} {sb}"),
                    });
                }
                Ok(vec![inputs[0].clone()])
            }
            OpKind::Enter { .. } | OpKind::Exit | OpKind::NextIteration => {
                Ok(vec![inputs[0].clone()])
            }
            OpKind::LoopCond => {
                let (dtype, shape) = &inputs[0];
                if *dtype != DType::Bool || shape.num_elements() != 1 {
                    return Err(GraphError::InferenceShape {
                        op: op_name.to_string(),
                        kind: self.mnemonic(),
                        detail: format!("loop condition must be a Bool scalar, got {dtype:?} {shape}"),
                    });
                }
                Ok(vec![inputs[0].clone()])
            }
        }
    }
}

/// Elementwise pairing: identical shapes pass through; a scalar on either
/// side broadcasts against the other operand.
fn broadcast_pair(
    op_name: &str,
    kind: &OpKind,
    lhs: &VarSpec,
    rhs: &VarSpec,
) -> Result<VarSpec, GraphError> {
    let (da, sa) = lhs;
    let (db, sb) = rhs;
    if da != db {
        return Err(GraphError::InferenceDType {
            op: op_name.to_string(),
            kind: kind.mnemonic(),
            lhs: *da,
            rhs: *db,
        });
    }
    let shape = if sa == sb {
        sa.clone()
    } else if sa.num_elements() == 1 {
        sb.clone()
    } else if sb.num_elements() == 1 {
        sa.clone()
    } else {
        return Err(GraphError::InferenceShape {
            op: op_name.to_string(),
            kind: kind.mnemonic(),
            detail: format!("incompatible shapes {sa} and {sb}"),
        });
    };
    Ok((*da, shape))
}
