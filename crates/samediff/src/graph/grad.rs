//! Reverse-mode gradient construction.
//!
//! Gradients are ordinary graph ops appended to the forward graph, so a
//! single session run evaluates loss and gradients together. Emitted ops are
//! namespaced under `grad/` and the gradient of variable `v` is the variable
//! `grad/v`.

use std::collections::{HashMap, HashSet};

use crate::tensor::NdArray;

use super::{Graph, GraphError, OpKind};

impl Graph {
    /// Appends gradient ops for `d loss / d v` for every `v` in `wrt`,
    /// returning the map from variable name to its gradient variable name.
    ///
    /// The loss must be a scalar. Only the smooth op set is differentiable;
    /// control flow and non-smooth ops on the path raise
    /// [`GraphError::NonDifferentiable`].
    pub fn calculate_gradients(
        &mut self,
        loss: &str,
        wrt: &[&str],
    ) -> Result<HashMap<String, String>, GraphError> {
        let loss_var = self
            .variable(loss)
            .ok_or_else(|| GraphError::MissingVariable(loss.to_string()))?;
        if loss_var.shape.num_elements() != 1 {
            return Err(GraphError::NotScalarLoss(loss.to_string()));
        }
        for v in wrt {
            if self.variable(v).is_none() {
                return Err(GraphError::MissingVariable(v.to_string()));
            }
        }

        // Variables that actually contribute to the loss; ops outside this
        // set are skipped entirely.
        let on_path = self.backward_reachable(loss);

        // grads: variable name -> name of its (accumulated) gradient variable.
        let mut grads: HashMap<String, String> = HashMap::new();
        let seed_dtype = self.variable(loss).expect("checked above").dtype;
        let seed = self.constant(
            format!("grad/{loss}_seed"),
            NdArray::scalar_of(seed_dtype, 1.0),
        )?;
        grads.insert(loss.to_string(), seed);

        // op_order is topological for the forward DAG; walk it backwards.
        let forward_ops: Vec<String> = self.op_order.clone();
        for op_name in forward_ops.into_iter().rev() {
            let op = self.ops[&op_name].clone();
            let output_grad = op
                .outputs
                .iter()
                .find_map(|o| grads.get(o).cloned());
            let gy = match output_grad {
                Some(g) => g,
                None => continue,
            };
            if !op.outputs.iter().any(|o| on_path.contains(o)) {
                continue;
            }
            let input_grads = self.op_input_grads(&op_name, &op.kind, &op.inputs, &gy)?;
            for (input, grad) in op.inputs.iter().zip(input_grads) {
                let grad = match grad {
                    Some(g) => g,
                    None => continue,
                };
                if !on_path.contains(input) {
                    continue;
                }
                // A scalar broadcast in the forward pass sums in the
                // backward pass.
                let input_len = self
                    .variable(input)
                    .map(|v| v.shape.num_elements())
                    .unwrap_or(0);
                let grad_len = self
                    .variable(&grad)
                    .map(|v| v.shape.num_elements())
                    .unwrap_or(0);
                let grad = if input_len == 1 && grad_len > 1 {
                    self.reduce_sum(&format!("grad/red/{}_{}", input, self.op_order.len()), &grad)?
                } else {
                    grad
                };
                match grads.get(input).cloned() {
                    // Fan-out in the forward graph sums in the backward pass.
                    Some(existing) => {
                        let acc = self.add(
                            &format!("grad/acc/{}_{}", input, self.op_order.len()),
                            &existing,
                            &grad,
                        )?;
                        grads.insert(input.clone(), acc);
                    }
                    None => {
                        grads.insert(input.clone(), grad);
                    }
                }
            }
        }

        let mut result = HashMap::new();
        for v in wrt {
            let grad = grads
                .get(*v)
                .cloned()
                .ok_or_else(|| GraphError::NoGradientPath(v.to_string()))?;
            // Stable public name for downstream lookups.
            let named = format!("grad/{v}");
            let alias = if grad == named {
                grad
            } else {
                self.identity(&named, &grad)?
            };
            result.insert(v.to_string(), alias);
        }
        Ok(result)
    }

    /// All variables from which `target` is reachable along forward edges.
    fn backward_reachable(&self, target: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![target.to_string()];
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(producer) = self
                .variable(&name)
                .and_then(|v| v.producer.as_ref())
            {
                if let Some(op) = self.op(producer) {
                    for input in &op.inputs {
                        stack.push(input.clone());
                    }
                }
            }
        }
        seen
    }

    /// Emits the gradient ops for one forward op, returning per-input
    /// gradient variable names (`None` for inputs with no gradient, such as
    /// the denominator count of a mean over a fixed shape).
    fn op_input_grads(
        &mut self,
        op: &str,
        kind: &OpKind,
        inputs: &[String],
        gy: &str,
    ) -> Result<Vec<Option<String>>, GraphError> {
        let y = self.ops[op].outputs[0].clone();
        let p = |suffix: &str| format!("grad/{op}/{suffix}");
        match kind {
            OpKind::Add => Ok(vec![Some(gy.to_string()), Some(gy.to_string())]),
            OpKind::Sub => {
                let gb = self.neg(&p("gb"), gy)?;
                Ok(vec![Some(gy.to_string()), Some(gb)])
            }
            OpKind::Mul => {
                let ga = self.mul(&p("ga"), gy, &inputs[1])?;
                let gb = self.mul(&p("gb"), gy, &inputs[0])?;
                Ok(vec![Some(ga), Some(gb)])
            }
            OpKind::Div => {
                // d(a/b)/da = 1/b, d(a/b)/db = -y/b
                let ga = self.div(&p("ga"), gy, &inputs[1])?;
                let t = self.mul(&p("gb_num"), gy, &y)?;
                let t = self.div(&p("gb_over"), &t, &inputs[1])?;
                let gb = self.neg(&p("gb"), &t)?;
                Ok(vec![Some(ga), Some(gb)])
            }
            OpKind::Neg => {
                let ga = self.neg(&p("ga"), gy)?;
                Ok(vec![Some(ga)])
            }
            OpKind::Exp => {
                let ga = self.mul(&p("ga"), gy, &y)?;
                Ok(vec![Some(ga)])
            }
            OpKind::Log => {
                let ga = self.div(&p("ga"), gy, &inputs[0])?;
                Ok(vec![Some(ga)])
            }
            OpKind::Sqrt => {
                // dy/da = 1/(2*sqrt(a)) = 1/(y + y)
                let two_y = self.add(&p("two_y"), &y, &y)?;
                let ga = self.div(&p("ga"), gy, &two_y)?;
                Ok(vec![Some(ga)])
            }
            OpKind::Square => {
                let two_a = self.add(&p("two_a"), &inputs[0], &inputs[0])?;
                let ga = self.mul(&p("ga"), gy, &two_a)?;
                Ok(vec![Some(ga)])
            }
            OpKind::Sigmoid => {
                // dy/da = y * (1 - y)
                let yy = self.mul(&p("yy"), &y, &y)?;
                let d = self.sub(&p("d"), &y, &yy)?;
                let ga = self.mul(&p("ga"), gy, &d)?;
                Ok(vec![Some(ga)])
            }
            OpKind::Tanh => {
                // dy/da = 1 - y^2
                let dtype = self.variable(&y).expect("output exists").dtype;
                let one = self.constant(p("one"), NdArray::scalar_of(dtype, 1.0))?;
                let yy = self.mul(&p("yy"), &y, &y)?;
                let d = self.sub(&p("d"), &one, &yy)?;
                let ga = self.mul(&p("ga"), gy, &d)?;
                Ok(vec![Some(ga)])
            }
            OpKind::Identity => Ok(vec![Some(gy.to_string())]),
            OpKind::MatMul => {
                let bt = self
                    .apply(p("bt"), OpKind::Transpose, &[inputs[1].as_str()])?
                    .remove(0);
                let at = self
                    .apply(p("at"), OpKind::Transpose, &[inputs[0].as_str()])?
                    .remove(0);
                let ga = self.matmul(&p("ga"), gy, &bt)?;
                let gb = self.matmul(&p("gb"), &at, gy)?;
                Ok(vec![Some(ga), Some(gb)])
            }
            OpKind::Transpose => {
                let ga = self
                    .apply(p("ga"), OpKind::Transpose, &[gy])?
                    .remove(0);
                Ok(vec![Some(ga)])
            }
            OpKind::ReduceSum => {
                let (dtype, shape) = {
                    let v = self.variable(&inputs[0]).expect("input exists");
                    (v.dtype, v.shape.clone())
                };
                let ones = self.constant(p("ones"), NdArray::ones(shape, dtype))?;
                let ga = self.mul(&p("ga"), &ones, gy)?;
                Ok(vec![Some(ga)])
            }
            OpKind::ReduceMean => {
                let (dtype, shape) = {
                    let v = self.variable(&inputs[0]).expect("input exists");
                    (v.dtype, v.shape.clone())
                };
                let n = shape.num_elements().max(1) as f64;
                let scale = self.constant(p("scale"), NdArray::full(shape, dtype, 1.0 / n))?;
                let ga = self.mul(&p("ga"), &scale, gy)?;
                Ok(vec![Some(ga)])
            }
            other => Err(GraphError::NonDifferentiable {
                op: op.to_string(),
                kind: other.mnemonic(),
            }),
        }
    }
}
