//! Graph-based tensor inference and training.
//!
//! The core pieces: a shared-buffer array model ([`tensor`]), an arena
//! allocator for transient buffers ([`memory`]), a named dataflow graph with
//! TensorFlow-style control flow ([`graph`]), a frame/iteration-aware
//! execution session ([`session`]), gradient updaters and a training driver
//! ([`train`]), NumPy-format persistence ([`io`]), periodic checkpoints
//! ([`checkpoint`]), test resource resolution ([`resources`]) and background
//! data prefetch ([`prefetch`]).
//!
//! Numeric kernels live behind the [`exec::OpExecutor`] trait; backends are
//! separate crates.

pub mod checkpoint;
pub mod exec;
pub mod graph;
pub mod io;
pub mod memory;
pub mod prefetch;
pub mod resources;
pub mod session;
pub mod tensor;
pub mod train;

pub use graph::{Graph, OpKind};
pub use session::InferenceSession;
pub use tensor::{DType, NdArray, Shape};
