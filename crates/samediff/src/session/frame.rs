//! Frame/iteration addressing for control-flow execution.
//!
//! Every runtime value is keyed by the variable name plus the frame and
//! iteration it was produced in. Nested loops chain frames through the
//! parent link, so the same variable name can hold distinct values per
//! `(frame, iteration, parent)` coordinate.

use std::fmt;
use std::sync::Arc;

/// Name of the implicit outermost frame.
pub const OUTER_FRAME: &str = "main";

/// A frame name, iteration number and parent coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameIter {
    frame: Arc<str>,
    iteration: u64,
    parent: Option<Arc<FrameIter>>,
}

impl FrameIter {
    /// The outermost coordinate: frame "main", iteration 0, no parent.
    pub fn outer() -> Self {
        FrameIter {
            frame: Arc::from(OUTER_FRAME),
            iteration: 0,
            parent: None,
        }
    }

    /// Enters a named child frame at iteration 0, with `self` as parent.
    pub fn child(&self, frame: &str) -> Self {
        FrameIter {
            frame: Arc::from(frame),
            iteration: 0,
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Same frame and parent, iteration advanced by one.
    pub fn next_iteration(&self) -> Self {
        FrameIter {
            frame: Arc::clone(&self.frame),
            iteration: self.iteration + 1,
            parent: self.parent.clone(),
        }
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn parent(&self) -> Option<&FrameIter> {
        self.parent.as_deref()
    }

    pub fn is_outer(&self) -> bool {
        self.parent.is_none() && &*self.frame == OUTER_FRAME
    }
}

impl fmt::Display for FrameIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}/")?;
        }
        write!(f, "{}:{}", self.frame, self.iteration)
    }
}

/// A runtime value identifier: variable name at a frame coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarId {
    pub name: String,
    pub frame_iter: FrameIter,
}

impl VarId {
    pub fn new(name: impl Into<String>, frame_iter: FrameIter) -> Self {
        VarId {
            name: name.into(),
            frame_iter,
        }
    }

    /// Shorthand for a value in the outer frame.
    pub fn outer(name: impl Into<String>) -> Self {
        Self::new(name, FrameIter::outer())
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.frame_iter)
    }
}
