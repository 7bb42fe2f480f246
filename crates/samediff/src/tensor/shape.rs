//! Shape, ordering and stride bookkeeping for strided array views.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element layout order of a dense array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    /// Row-major ('c'): last axis varies fastest.
    C,
    /// Column-major ('f'): first axis varies fastest.
    F,
}

impl Order {
    pub fn as_char(self) -> char {
        match self {
            Order::C => 'c',
            Order::F => 'f',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'c' | 'C' => Some(Order::C),
            'f' | 'F' => Some(Order::F),
            _ => None,
        }
    }
}

/// Stores the logical dimensions of an array. Rank 0 (empty dims) is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Constructs a new shape from the provided dimensions. An empty dimension
    /// list denotes a 0-d scalar.
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    /// The 0-d scalar shape.
    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    /// A scalar has one element; any zero-sized axis yields zero.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns `true` for the 0-d scalar shape.
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Computes dense strides (in elements) for this shape in the given order.
    pub fn strides(&self, order: Order) -> Vec<isize> {
        let mut strides = vec![0isize; self.dims.len()];
        match order {
            Order::C => {
                let mut acc = 1isize;
                for (i, &d) in self.dims.iter().enumerate().rev() {
                    strides[i] = acc;
                    acc *= d as isize;
                }
            }
            Order::F => {
                let mut acc = 1isize;
                for (i, &d) in self.dims.iter().enumerate() {
                    strides[i] = acc;
                    acc *= d as isize;
                }
            }
        }
        strides
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

/// Visits every index tuple of `shape` in row-major order.
pub(crate) fn for_each_index(shape: &Shape, mut f: impl FnMut(&[usize])) {
    let dims = shape.dims();
    if shape.num_elements() == 0 {
        return;
    }
    let mut idx = vec![0usize; dims.len()];
    loop {
        f(&idx);
        // Advance the odometer; rank 0 visits the single scalar element once.
        let mut axis = dims.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            idx[axis] += 1;
            if idx[axis] < dims[axis] {
                break;
            }
            idx[axis] = 0;
        }
    }
}
