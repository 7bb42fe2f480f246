//! Serializable graph definition and on-disk persistence.
//!
//! `GraphDef` is the flat, ordered form of a [`Graph`]: variables first, ops
//! second, each in declaration order. Constant and trainable variable data
//! travels as little-endian bytes so a definition round-trips bit-exactly.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{DataBuffer, DType, NdArray, Order, Shape};
use crate::train::TrainingConfig;

use super::{Graph, GraphError, OpKind, VarKind, Variable};

#[derive(Debug, Error)]
pub enum GraphIoError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("variable '{name}': payload is {actual} bytes, shape implies {expected}")]
    PayloadLength {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Flat serialized form of one variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    pub kind: VarKind,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Row-major little-endian element bytes, for constants and trainables.
    /// Always serialized, even when `None`: bincode is not self-describing,
    /// so skipping the field would desynchronize the binary decoder.
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

/// Flat serialized form of one op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpDef {
    pub name: String,
    pub kind: OpKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Serializable snapshot of a full graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDef {
    pub name: String,
    pub variables: Vec<VariableDef>,
    pub ops: Vec<OpDef>,
    #[serde(default)]
    pub training: Option<TrainingConfig>,
}

impl Graph {
    /// Snapshots the graph into its serializable form.
    pub fn to_def(&self) -> GraphDef {
        let variables = self
            .variables()
            .map(|v| VariableDef {
                name: v.name.clone(),
                kind: v.kind,
                dtype: v.dtype,
                shape: v.shape.dims().to_vec(),
                data: v.array.as_ref().map(|a| {
                    let dense = if a.is_contiguous() && a.order() == Order::C {
                        a.clone()
                    } else {
                        a.dup_ordered(Order::C)
                    };
                    dense.buffer().bytes().to_vec()
                }),
            })
            .collect();
        let ops = self
            .ops()
            .map(|op| OpDef {
                name: op.name.clone(),
                kind: op.kind.clone(),
                inputs: op.inputs.clone(),
                outputs: op.outputs.clone(),
            })
            .collect();
        GraphDef {
            name: self.name().to_string(),
            variables,
            ops,
            training: self.training_config().cloned(),
        }
    }

    /// Rebuilds a graph from its serialized form. Declared output specs are
    /// trusted over re-inference so imported graphs with loop-back edges
    /// reconstruct as written.
    pub fn from_def(def: &GraphDef) -> Result<Graph, GraphIoError> {
        let mut graph = Graph::new(def.name.clone());
        for v in &def.variables {
            let shape = Shape::new(v.shape.clone());
            let array = match &v.data {
                Some(bytes) => {
                    let expected = shape.num_elements() * v.dtype.size_in_bytes();
                    if bytes.len() != expected {
                        return Err(GraphIoError::PayloadLength {
                            name: v.name.clone(),
                            expected,
                            actual: bytes.len(),
                        });
                    }
                    let buffer = DataBuffer::from_le_bytes(bytes.clone(), v.dtype)
                        .expect("payload length was checked against the dtype size");
                    Some(
                        NdArray::from_buffer(buffer, shape.clone(), Order::C)
                            .expect("payload length was checked against the shape"),
                    )
                }
                None => None,
            };
            if graph.variables.contains_key(&v.name) {
                return Err(GraphError::DuplicateVariable(v.name.clone()).into());
            }
            graph.variables.insert(
                v.name.clone(),
                Variable {
                    name: v.name.clone(),
                    kind: v.kind,
                    dtype: v.dtype,
                    shape,
                    array,
                    producer: None,
                    consumers: Vec::new(),
                },
            );
            graph.variable_order.push(v.name.clone());
        }
        for op in &def.ops {
            let inputs: Vec<&str> = op.inputs.iter().map(|s| s.as_str()).collect();
            graph.apply_with_outputs(
                op.name.clone(),
                op.kind.clone(),
                &inputs,
                &op.outputs,
                false,
            )?;
        }
        graph.validate()?;
        graph.training = def.training.clone();
        Ok(graph)
    }

    /// Writes the graph as pretty-printed JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), GraphIoError> {
        let json = serde_json::to_string_pretty(&self.to_def())?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Graph, GraphIoError> {
        let json = fs::read_to_string(path)?;
        let def: GraphDef = serde_json::from_str(&json)?;
        Graph::from_def(&def)
    }

    /// Writes the graph in the compact binary encoding.
    pub fn save_bin(&self, path: impl AsRef<Path>) -> Result<(), GraphIoError> {
        let bytes = bincode::serialize(&self.to_def())?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_bin(path: impl AsRef<Path>) -> Result<Graph, GraphIoError> {
        let bytes = fs::read(path)?;
        let def: GraphDef = bincode::deserialize(&bytes)?;
        Graph::from_def(&def)
    }
}
