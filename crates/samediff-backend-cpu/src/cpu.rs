//! Reference CPU kernels.
//!
//! Every kernel goes through the `f64` element path, which keeps the code
//! uniform across dtypes at the cost of peak throughput; this backend is the
//! semantic reference, not the fast path.

use samediff::exec::{ExecError, OpExecutor};
use samediff::graph::OpKind;
use samediff::tensor::{DType, NdArray, Shape};

/// The reference executor. Stateless; one instance serves any number of
/// sessions concurrently.
#[derive(Debug, Default)]
pub struct CpuExecutor;

impl CpuExecutor {
    pub fn new() -> Self {
        CpuExecutor
    }
}

impl OpExecutor for CpuExecutor {
    fn name(&self) -> &str {
        "cpu"
    }

    fn execute(
        &self,
        kind: &OpKind,
        op_name: &str,
        inputs: &[NdArray],
    ) -> Result<Vec<NdArray>, ExecError> {
        let out = match kind {
            OpKind::Add => binary(op_name, inputs, |a, b| a + b)?,
            OpKind::Sub => binary(op_name, inputs, |a, b| a - b)?,
            OpKind::Mul => binary(op_name, inputs, |a, b| a * b)?,
            OpKind::Div => binary(op_name, inputs, |a, b| a / b)?,
            OpKind::Maximum => binary(op_name, inputs, f64::max)?,
            OpKind::Minimum => binary(op_name, inputs, f64::min)?,
            OpKind::Neg => unary(op_name, inputs, |v| -v)?,
            OpKind::Abs => unary(op_name, inputs, f64::abs)?,
            OpKind::Exp => unary(op_name, inputs, f64::exp)?,
            OpKind::Log => unary(op_name, inputs, f64::ln)?,
            OpKind::Sqrt => unary(op_name, inputs, f64::sqrt)?,
            OpKind::Square => unary(op_name, inputs, |v| v * v)?,
            OpKind::Sigmoid => unary(op_name, inputs, |v| 1.0 / (1.0 + (-v).exp()))?,
            OpKind::Tanh => unary(op_name, inputs, f64::tanh)?,
            OpKind::Relu => unary(op_name, inputs, |v| v.max(0.0))?,
            OpKind::Identity => {
                let a = input(op_name, inputs, 0)?;
                a.clone()
            }
            OpKind::MatMul => matmul(op_name, inputs)?,
            OpKind::Transpose => input(op_name, inputs, 0)?.transpose(),
            OpKind::ReduceSum => reduce(op_name, inputs, Reduction::Sum)?,
            OpKind::ReduceMean => reduce(op_name, inputs, Reduction::Mean)?,
            OpKind::ReduceMax => reduce(op_name, inputs, Reduction::Max)?,
            OpKind::Less => compare(op_name, inputs, |a, b| a < b)?,
            OpKind::LessEqual => compare(op_name, inputs, |a, b| a <= b)?,
            OpKind::Greater => compare(op_name, inputs, |a, b| a > b)?,
            OpKind::GreaterEqual => compare(op_name, inputs, |a, b| a >= b)?,
            OpKind::Equal => compare(op_name, inputs, |a, b| a == b)?,
            OpKind::NotEqual => compare(op_name, inputs, |a, b| a != b)?,
            OpKind::Switch
            | OpKind::Merge
            | OpKind::Enter { .. }
            | OpKind::Exit
            | OpKind::NextIteration
            | OpKind::LoopCond => {
                return Err(ExecError::Unsupported {
                    op: op_name.to_string(),
                    kind: kind.mnemonic(),
                });
            }
        };
        Ok(vec![out])
    }
}

fn input<'a>(op: &str, inputs: &'a [NdArray], index: usize) -> Result<&'a NdArray, ExecError> {
    inputs.get(index).ok_or_else(|| ExecError::ShapeMismatch {
        op: op.to_string(),
        detail: format!("missing input {index}"),
    })
}

fn unary(op: &str, inputs: &[NdArray], f: impl Fn(f64) -> f64) -> Result<NdArray, ExecError> {
    let a = input(op, inputs, 0)?;
    let mut out = NdArray::zeros(a.shape().clone(), a.dtype());
    let values = a.to_f64_vec();
    let mut i = 0;
    out.map_values_inplace(|_| {
        let v = f(values[i]);
        i += 1;
        v
    });
    Ok(out)
}

/// Elementwise pairing: matching shapes, or a single-element operand
/// broadcast against the other side.
fn broadcast_values(
    op: &str,
    inputs: &[NdArray],
) -> Result<(Shape, DType, Vec<f64>, Vec<f64>), ExecError> {
    let a = input(op, inputs, 0)?;
    let b = input(op, inputs, 1)?;
    if a.dtype() != b.dtype() {
        return Err(ExecError::DType {
            op: op.to_string(),
            detail: format!("operand dtypes {:?} and {:?} differ", a.dtype(), b.dtype()),
        });
    }
    let av = a.to_f64_vec();
    let bv = b.to_f64_vec();
    let (shape, av, bv) = if a.shape() == b.shape() {
        (a.shape().clone(), av, bv)
    } else if a.len() == 1 {
        let n = b.len();
        (b.shape().clone(), vec![av[0]; n], bv)
    } else if b.len() == 1 {
        let n = a.len();
        (a.shape().clone(), av, vec![bv[0]; n])
    } else {
        return Err(ExecError::ShapeMismatch {
            op: op.to_string(),
            detail: format!("incompatible shapes {} and {}", a.shape(), b.shape()),
        });
    };
    Ok((shape, a.dtype(), av, bv))
}

fn binary(
    op: &str,
    inputs: &[NdArray],
    f: impl Fn(f64, f64) -> f64,
) -> Result<NdArray, ExecError> {
    let (shape, dtype, av, bv) = broadcast_values(op, inputs)?;
    let mut out = NdArray::zeros(shape, dtype);
    let mut i = 0;
    out.map_values_inplace(|_| {
        let v = f(av[i], bv[i]);
        i += 1;
        v
    });
    Ok(out)
}

fn compare(
    op: &str,
    inputs: &[NdArray],
    f: impl Fn(f64, f64) -> bool,
) -> Result<NdArray, ExecError> {
    let (shape, _, av, bv) = broadcast_values(op, inputs)?;
    let mut out = NdArray::zeros(shape, DType::Bool);
    let mut i = 0;
    out.map_values_inplace(|_| {
        let v = f64::from(f(av[i], bv[i]));
        i += 1;
        v
    });
    Ok(out)
}

fn matmul(op: &str, inputs: &[NdArray]) -> Result<NdArray, ExecError> {
    let a = input(op, inputs, 0)?;
    let b = input(op, inputs, 1)?;
    if a.dtype() != b.dtype() {
        return Err(ExecError::DType {
            op: op.to_string(),
            detail: format!("operand dtypes {:?} and {:?} differ", a.dtype(), b.dtype()),
        });
    }
    let (ad, bd) = (a.shape().dims(), b.shape().dims());
    if a.rank() != 2 || b.rank() != 2 || ad[1] != bd[0] {
        return Err(ExecError::ShapeMismatch {
            op: op.to_string(),
            detail: format!("cannot contract {} with {}", a.shape(), b.shape()),
        });
    }
    let (m, k, n) = (ad[0], ad[1], bd[1]);
    let av = a.to_f64_vec();
    let bv = b.to_f64_vec();
    let mut values = vec![0.0f64; m * n];
    for row in 0..m {
        for inner in 0..k {
            let lhs = av[row * k + inner];
            if lhs == 0.0 {
                continue;
            }
            for col in 0..n {
                values[row * n + col] += lhs * bv[inner * n + col];
            }
        }
    }
    let mut out = NdArray::zeros(Shape::new(vec![m, n]), a.dtype());
    let mut i = 0;
    out.map_values_inplace(|_| {
        let v = values[i];
        i += 1;
        v
    });
    Ok(out)
}

enum Reduction {
    Sum,
    Mean,
    Max,
}

fn reduce(op: &str, inputs: &[NdArray], reduction: Reduction) -> Result<NdArray, ExecError> {
    let a = input(op, inputs, 0)?;
    let values = a.to_f64_vec();
    let result = match reduction {
        Reduction::Sum => values.iter().sum(),
        Reduction::Mean => {
            if values.is_empty() {
                return Err(ExecError::Execution(format!(
                    "op '{op}': mean over an empty array"
                )));
            }
            values.iter().sum::<f64>() / values.len() as f64
        }
        Reduction::Max => {
            if values.is_empty() {
                return Err(ExecError::Execution(format!(
                    "op '{op}': max over an empty array"
                )));
            }
            values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        }
    };
    Ok(NdArray::scalar_of(a.dtype(), result))
}
