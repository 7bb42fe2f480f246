//! Graph execution with TensorFlow-style frames and iterations.
//!
//! The session walks backward from the requested outputs to find the ops that
//! actually matter, seeds the leaf values, then propagates forward: each newly
//! available value wakes the ops consuming it, and an op fires once all of its
//! inputs are present at one frame coordinate. Control flow is interpreted
//! here; everything else goes to the configured [`OpExecutor`].
//!
//! Values are keyed by [`VarId`], so a loop body produces a fresh value per
//! iteration without the graph ever being unrolled.

mod frame;

pub use frame::{FrameIter, VarId, OUTER_FRAME};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use crate::exec::{ExecError, OpExecutor};
use crate::graph::{Graph, OpKind, VarKind};
use crate::tensor::NdArray;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("requested output '{0}' does not exist in the graph")]
    UnknownOutput(String),
    #[error("placeholder '{0}' is required by the requested outputs but was not provided")]
    MissingPlaceholder(String),
    #[error("op '{op}' failed")]
    OpExecution {
        op: String,
        #[source]
        source: ExecError,
    },
    #[error("op '{op}' returned {actual} outputs, expected {expected}")]
    OutputCount {
        op: String,
        expected: usize,
        actual: usize,
    },
    #[error("session has already been run; call reset() before running again")]
    SessionReused,
    #[error("op '{op}': {detail}")]
    MalformedControlFlow { op: String, detail: String },
    #[error("execution stalled; outputs never became available: {missing:?}")]
    ExecutionStalled { missing: Vec<String> },
}

/// Single-use forward execution over a graph.
///
/// A session owns all intermediate values it computed; after `run` they stay
/// inspectable through [`InferenceSession::node_outputs`] until `reset`.
pub struct InferenceSession<'g> {
    graph: &'g Graph,
    executor: Arc<dyn OpExecutor>,
    /// All values computed so far, keyed by name and frame coordinate.
    node_outputs: HashMap<VarId, NdArray>,
    /// Executions per op name, across all frames and iterations.
    exec_counts: HashMap<String, usize>,
    /// (op, frame coordinate) pairs that already fired.
    executed: HashSet<(String, FrameIter)>,
    /// Input variable -> consuming op names, including loop-back edges.
    consumers: HashMap<String, Vec<String>>,
    used: bool,
}

impl<'g> InferenceSession<'g> {
    pub fn new(graph: &'g Graph, executor: Arc<dyn OpExecutor>) -> Self {
        // Build the consumer index locally so loop-back (Merge) edges are
        // present whether or not the graph was validated after building.
        let mut consumers: HashMap<String, Vec<String>> = HashMap::new();
        for op in graph.ops() {
            for input in &op.inputs {
                consumers
                    .entry(input.clone())
                    .or_default()
                    .push(op.name.clone());
            }
        }
        InferenceSession {
            graph,
            executor,
            node_outputs: HashMap::new(),
            exec_counts: HashMap::new(),
            executed: HashSet::new(),
            consumers,
            used: false,
        }
    }

    /// Executes the graph for the requested outputs, resolving each at the
    /// outer frame. Placeholder bindings are `(name, array)` pairs.
    pub fn run(
        &mut self,
        outputs: &[&str],
        placeholders: &[(&str, NdArray)],
    ) -> Result<Vec<NdArray>, SessionError> {
        if self.used {
            return Err(SessionError::SessionReused);
        }
        self.used = true;
        log::debug!(
            "session run: {} output(s) requested on graph '{}'",
            outputs.len(),
            self.graph.name()
        );

        for name in outputs {
            if self.graph.variable(name).is_none() {
                return Err(SessionError::UnknownOutput(name.to_string()));
            }
        }
        let bound: HashMap<&str, &NdArray> =
            placeholders.iter().map(|(n, a)| (*n, a)).collect();

        // Backward resolution: only ops contributing to a requested output
        // run. Merge pulls both of its branches so loops stay intact.
        let (required_ops, required_vars) = self.required_subgraph(outputs);

        // Every required placeholder must be bound before anything executes.
        for name in &required_vars {
            let var = self.graph.variable(name).expect("collected from graph");
            if var.kind == VarKind::Placeholder && !bound.contains_key(name.as_str()) {
                return Err(SessionError::MissingPlaceholder(name.clone()));
            }
        }

        // Seed leaves at the outer frame. Constants, trainable variables and
        // placeholders are frame-free: consumers in any frame read the outer
        // copy.
        let mut queue: VecDeque<VarId> = VecDeque::new();
        for name in &required_vars {
            let var = self.graph.variable(name).expect("collected from graph");
            let seeded = match var.kind {
                VarKind::Placeholder => bound.get(name.as_str()).map(|a| (*a).clone()),
                VarKind::Constant | VarKind::Variable => var.array.clone(),
                VarKind::OpOutput => None,
            };
            if let Some(array) = seeded {
                let id = VarId::outer(name.clone());
                self.node_outputs.insert(id.clone(), array);
                queue.push_back(id);
            }
        }

        // Forward propagation: each new value wakes its consumers at the
        // frame coordinate it arrived in.
        while let Some(arrived) = queue.pop_front() {
            let consumer_ops = match self.consumers.get(&arrived.name) {
                Some(ops) => ops.clone(),
                None => continue,
            };
            for op_name in consumer_ops {
                if !required_ops.contains(&op_name) {
                    continue;
                }
                let produced = self.try_fire(&op_name, &arrived.frame_iter)?;
                queue.extend(produced);
            }
        }

        let mut results = Vec::with_capacity(outputs.len());
        let mut missing = Vec::new();
        for name in outputs {
            match self.node_outputs.get(&VarId::outer(*name)) {
                Some(array) => results.push(array.clone()),
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(SessionError::ExecutionStalled { missing });
        }
        log::debug!("session run complete: {} op execution(s)", self.executed.len());
        Ok(results)
    }

    /// Walks producers backward from the requested outputs.
    fn required_subgraph(&self, outputs: &[&str]) -> (HashSet<String>, HashSet<String>) {
        let mut ops = HashSet::new();
        let mut vars = HashSet::new();
        let mut stack: Vec<String> = outputs.iter().map(|s| s.to_string()).collect();
        while let Some(name) = stack.pop() {
            if !vars.insert(name.clone()) {
                continue;
            }
            let producer = self
                .graph
                .variable(&name)
                .and_then(|v| v.producer.clone());
            if let Some(op_name) = producer {
                if ops.insert(op_name.clone()) {
                    if let Some(op) = self.graph.op(&op_name) {
                        for input in &op.inputs {
                            stack.push(input.clone());
                        }
                        // The taken Switch branch may feed ops reachable only
                        // through the untaken one's sibling; both outputs
                        // belong to the same op, nothing extra to pull.
                    }
                }
            }
        }
        (ops, vars)
    }

    /// Attempts to execute `op` at the candidate frame coordinate. Returns
    /// the produced value ids, or empty when the op is not yet ready or has
    /// already fired here.
    fn try_fire(
        &mut self,
        op_name: &str,
        candidate: &FrameIter,
    ) -> Result<Vec<VarId>, SessionError> {
        let op = self.graph.op(op_name).expect("consumer index names real ops");

        // A frame-free arrival (outer coordinate) only drives ops whose
        // inputs are all frame-free; frame-bound ops fire off their
        // frame-bound arrivals instead.
        let key = (op_name.to_string(), candidate.clone());
        if self.executed.contains(&key) {
            return Ok(Vec::new());
        }

        // Gather inputs: frame-bound values at the candidate coordinate,
        // frame-free ones at the outer frame. Merge is ready on the first
        // arriving branch.
        let mut inputs = Vec::with_capacity(op.inputs.len());
        if matches!(op.kind, OpKind::Merge) {
            let mut found = None;
            for input in &op.inputs {
                let id = self.value_id(input, candidate);
                if let Some(array) = self.node_outputs.get(&id) {
                    found = Some(array.clone());
                    break;
                }
            }
            match found {
                Some(array) => inputs.push(array),
                None => return Ok(Vec::new()),
            }
        } else {
            for input in &op.inputs {
                let id = self.value_id(input, candidate);
                match self.node_outputs.get(&id) {
                    Some(array) => inputs.push(array.clone()),
                    None => return Ok(Vec::new()),
                }
            }
        }

        self.executed.insert(key);
        *self.exec_counts.entry(op_name.to_string()).or_insert(0) += 1;
        log::trace!("executing op '{op_name}' ({}) at {candidate}", op.kind.mnemonic());

        let produced: Vec<(VarId, NdArray)> = match &op.kind {
            OpKind::Switch => {
                // Store only the taken branch; the other output never
                // materializes, which prunes its consumers for free.
                let pred = inputs[1].scalar_bool().map_err(|e| {
                    SessionError::MalformedControlFlow {
                        op: op_name.to_string(),
                        detail: format!("switch predicate: {e}"),
                    }
                })?;
                let taken = &op.outputs[usize::from(pred)];
                vec![(
                    VarId::new(taken.clone(), candidate.clone()),
                    inputs[0].clone(),
                )]
            }
            OpKind::Merge => {
                vec![(
                    VarId::new(op.outputs[0].clone(), candidate.clone()),
                    inputs.remove(0),
                )]
            }
            OpKind::Enter { frame } => {
                vec![(
                    VarId::new(op.outputs[0].clone(), candidate.child(frame)),
                    inputs.remove(0),
                )]
            }
            OpKind::Exit => {
                let parent = candidate.parent().cloned().ok_or_else(|| {
                    SessionError::MalformedControlFlow {
                        op: op_name.to_string(),
                        detail: "exit in the outer frame has no parent".to_string(),
                    }
                })?;
                vec![(VarId::new(op.outputs[0].clone(), parent), inputs.remove(0))]
            }
            OpKind::NextIteration => {
                vec![(
                    VarId::new(op.outputs[0].clone(), candidate.next_iteration()),
                    inputs.remove(0),
                )]
            }
            OpKind::LoopCond => {
                vec![(
                    VarId::new(op.outputs[0].clone(), candidate.clone()),
                    inputs.remove(0),
                )]
            }
            kind => {
                let arrays = self
                    .executor
                    .execute(kind, op_name, &inputs)
                    .map_err(|source| SessionError::OpExecution {
                        op: op_name.to_string(),
                        source,
                    })?;
                if arrays.len() != op.outputs.len() {
                    return Err(SessionError::OutputCount {
                        op: op_name.to_string(),
                        expected: op.outputs.len(),
                        actual: arrays.len(),
                    });
                }
                op.outputs
                    .iter()
                    .zip(arrays)
                    .map(|(name, array)| {
                        (VarId::new(name.clone(), candidate.clone()), array)
                    })
                    .collect()
            }
        };

        let mut ids = Vec::with_capacity(produced.len());
        for (id, array) in produced {
            ids.push(id.clone());
            self.node_outputs.insert(id, array);
        }
        Ok(ids)
    }

    /// Coordinate a consuming op reads `input` at: frame-free variables live
    /// at the outer frame, op outputs at the candidate coordinate.
    fn value_id(&self, input: &str, candidate: &FrameIter) -> VarId {
        let frame_free = self
            .graph
            .variable(input)
            .map(|v| {
                matches!(
                    v.kind,
                    VarKind::Placeholder | VarKind::Constant | VarKind::Variable
                )
            })
            .unwrap_or(false);
        if frame_free {
            VarId::outer(input)
        } else {
            VarId::new(input, candidate.clone())
        }
    }

    /// All values computed by the last run.
    pub fn node_outputs(&self) -> &HashMap<VarId, NdArray> {
        &self.node_outputs
    }

    /// Number of times `op` executed across all frames and iterations.
    pub fn exec_count(&self, op: &str) -> usize {
        self.exec_counts.get(op).copied().unwrap_or(0)
    }

    /// Names of ops that executed at least once.
    pub fn executed_ops(&self) -> HashSet<String> {
        self.exec_counts.keys().cloned().collect()
    }

    /// Clears all computed state so the session can run again.
    pub fn reset(&mut self) {
        self.node_outputs.clear();
        self.exec_counts.clear();
        self.executed.clear();
        self.used = false;
    }
}
