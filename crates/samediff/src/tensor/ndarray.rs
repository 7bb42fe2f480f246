//! Shaped, strided array views over shared data buffers.

use rand::Rng;

use super::shape::for_each_index;
use super::{DType, DataBuffer, Element, NdArrayError, Order, Shape};

/// A shaped, typed, strided view over a [`DataBuffer`].
///
/// Clones, reshapes, permutes and transposes alias the same buffer; mutation
/// through any alias is visible through all others. Use [`NdArray::dup`] for
/// an independent copy.
#[derive(Debug, Clone)]
pub struct NdArray {
    buffer: DataBuffer,
    shape: Shape,
    strides: Vec<isize>,
    order: Order,
}

impl NdArray {
    /// Wraps a buffer with explicit layout metadata. The element count implied
    /// by the shape must not exceed the buffer length.
    pub fn from_buffer(
        buffer: DataBuffer,
        shape: Shape,
        order: Order,
    ) -> Result<Self, NdArrayError> {
        if shape.num_elements() > buffer.len() {
            return Err(NdArrayError::LengthMismatch {
                expected: shape.num_elements(),
                actual: buffer.len(),
            });
        }
        let strides = shape.strides(order);
        Ok(NdArray {
            buffer,
            shape,
            strides,
            order,
        })
    }

    /// Zero-initialized array of the requested shape and dtype, c-ordered.
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let buffer = DataBuffer::allocate(shape.num_elements(), dtype);
        let strides = shape.strides(Order::C);
        NdArray {
            buffer,
            shape,
            strides,
            order: Order::C,
        }
    }

    /// Array of the requested shape filled with `value` (converted per dtype).
    pub fn full(shape: Shape, dtype: DType, value: f64) -> Self {
        let mut out = Self::zeros(shape, dtype);
        out.fill(value);
        out
    }

    /// One-filled array.
    pub fn ones(shape: Shape, dtype: DType) -> Self {
        Self::full(shape, dtype, 1.0)
    }

    /// Constructs an array from raw values, validating length against shape.
    pub fn from_vec<E: Element>(shape: Shape, data: Vec<E>) -> Result<Self, NdArrayError> {
        if data.len() != shape.num_elements() {
            return Err(NdArrayError::LengthMismatch {
                expected: shape.num_elements(),
                actual: data.len(),
            });
        }
        let buffer = DataBuffer::from_vec(data);
        let strides = shape.strides(Order::C);
        Ok(NdArray {
            buffer,
            shape,
            strides,
            order: Order::C,
        })
    }

    /// A 0-d scalar.
    pub fn scalar<E: Element>(value: E) -> Self {
        Self::from_vec(Shape::scalar(), vec![value]).expect("scalar shape matches one element")
    }

    /// A 0-d scalar of the given dtype, from an `f64` value.
    pub fn scalar_of(dtype: DType, value: f64) -> Self {
        Self::full(Shape::scalar(), dtype, value)
    }

    /// Samples from `N(0, std^2)` using the Box-Muller transform.
    pub fn randn(shape: Shape, std: f64, rng: &mut impl Rng) -> Self {
        let len = shape.num_elements();
        let mut values = Vec::with_capacity(len);
        while values.len() < len {
            let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
            let u2: f64 = rng.gen::<f64>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f64::consts::PI * u2;
            values.push(r * theta.cos() * std);
            if values.len() < len {
                values.push(r * theta.sin() * std);
            }
        }
        Self::from_vec(shape, values).expect("sampled length matches shape")
            .cast(DType::F32)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buffer(&self) -> &DataBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut DataBuffer {
        &mut self.buffer
    }

    /// Returns `true` when this view and `other` alias the same allocation.
    pub fn aliases(&self, other: &NdArray) -> bool {
        self.buffer.same_allocation(other.buffer())
    }

    /// Linear element offset for a (bounds-checked) index tuple.
    fn offset_of(&self, index: &[usize]) -> Result<usize, NdArrayError> {
        if index.len() != self.shape.rank() {
            return Err(NdArrayError::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.shape.dims().to_vec(),
            });
        }
        let mut offset = 0isize;
        for (axis, (&i, &d)) in index.iter().zip(self.shape.dims()).enumerate() {
            if i >= d {
                return Err(NdArrayError::IndexOutOfBounds {
                    index: index.to_vec(),
                    shape: self.shape.dims().to_vec(),
                });
            }
            offset += i as isize * self.strides[axis];
        }
        Ok(offset as usize)
    }

    /// Reads one element at the given index tuple.
    pub fn get<E: Element>(&self, index: &[usize]) -> Result<E, NdArrayError> {
        let offset = self.offset_of(index)?;
        self.buffer.get(offset)
    }

    /// Writes one element at the given index tuple.
    pub fn put<E: Element>(&mut self, index: &[usize], value: E) -> Result<(), NdArrayError> {
        let offset = self.offset_of(index)?;
        self.buffer.put(offset, value)
    }

    /// Reads a 0-d or single-element array as `f64`.
    pub fn scalar_value(&self) -> Result<f64, NdArrayError> {
        if self.len() != 1 {
            return Err(NdArrayError::ShapeMismatch {
                expected: vec![],
                actual: self.shape.dims().to_vec(),
            });
        }
        let mut out = 0.0;
        self.for_each_value(|v| out = v);
        Ok(out)
    }

    /// Reads a boolean scalar (dtype `Bool`, one element).
    pub fn scalar_bool(&self) -> Result<bool, NdArrayError> {
        if self.dtype() != DType::Bool {
            return Err(NdArrayError::DTypeMismatch {
                expected: DType::Bool,
                actual: self.dtype(),
            });
        }
        Ok(self.scalar_value()? != 0.0)
    }

    /// Dense layout check: strides match the natural strides of this view's
    /// order and the buffer window starts at the view base.
    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.strides(self.order)
    }

    /// Reinterprets the array with a new shape conserving the element count.
    /// Aliases the buffer when the source is contiguous; copies otherwise.
    pub fn reshape(&self, new_shape: Shape) -> Result<NdArray, NdArrayError> {
        self.reshape_ordered(new_shape, self.order)
    }

    /// Reshape with an explicit target ordering.
    pub fn reshape_ordered(
        &self,
        new_shape: Shape,
        order: Order,
    ) -> Result<NdArray, NdArrayError> {
        if new_shape.num_elements() != self.len() {
            return Err(NdArrayError::ReshapeCount {
                from: self.shape.dims().to_vec(),
                from_len: self.len(),
                to: new_shape.dims().to_vec(),
                to_len: new_shape.num_elements(),
            });
        }
        let source = if self.is_contiguous() && self.order == order {
            self.clone()
        } else {
            self.dup_ordered(order)
        };
        let strides = new_shape.strides(order);
        Ok(NdArray {
            buffer: source.buffer,
            shape: new_shape,
            strides,
            order,
        })
    }

    /// Permutes the axes, producing an aliasing view.
    pub fn permute(&self, perm: &[usize]) -> Result<NdArray, NdArrayError> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        if perm.len() != rank || {
            for &p in perm {
                if p >= rank || seen[p] {
                    break;
                }
                seen[p] = true;
            }
            seen.iter().any(|s| !s)
        } {
            return Err(NdArrayError::InvalidPermutation {
                perm: perm.to_vec(),
                rank,
            });
        }
        let dims: Vec<usize> = perm.iter().map(|&p| self.shape.dims()[p]).collect();
        let strides: Vec<isize> = perm.iter().map(|&p| self.strides[p]).collect();
        Ok(NdArray {
            buffer: self.buffer.clone(),
            shape: Shape::new(dims),
            strides,
            order: self.order,
        })
    }

    /// Reverses all axes (matrix transpose for rank 2), as an aliasing view.
    pub fn transpose(&self) -> NdArray {
        let perm: Vec<usize> = (0..self.rank()).rev().collect();
        self.permute(&perm).expect("reversed axes are a valid permutation")
    }

    /// Deep copy into a fresh contiguous buffer with this view's order.
    pub fn dup(&self) -> NdArray {
        self.dup_ordered(self.order)
    }

    /// Deep copy into a fresh contiguous buffer with the requested order.
    pub fn dup_ordered(&self, order: Order) -> NdArray {
        let mut out = NdArray::zeros(self.shape.clone(), self.dtype());
        out.order = order;
        out.strides = out.shape.strides(order);
        let elem = self.dtype().size_in_bytes();
        let out_strides = out.strides.clone();
        for_each_index(&self.shape, |idx| {
            let src = self
                .offset_of(idx)
                .expect("iterated index is in bounds");
            let mut dst = 0isize;
            for (axis, &i) in idx.iter().enumerate() {
                dst += i as isize * out_strides[axis];
            }
            let dst = dst as usize;
            let src_bytes = &self.buffer.bytes()[src * elem..(src + 1) * elem];
            out.buffer.bytes_mut()[dst * elem..(dst + 1) * elem].copy_from_slice(src_bytes);
        });
        out
    }

    /// Copies `other` into this array elementwise; shapes must match.
    pub fn assign(&mut self, other: &NdArray) -> Result<(), NdArrayError> {
        if self.shape != *other.shape() {
            return Err(NdArrayError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                actual: other.shape().dims().to_vec(),
            });
        }
        let values = other.to_f64_vec();
        let mut i = 0;
        self.map_values_inplace(|_| {
            let v = values[i];
            i += 1;
            v
        });
        Ok(())
    }

    /// Fills the array with a constant value (converted per dtype).
    pub fn fill(&mut self, value: f64) {
        self.map_values_inplace(|_| value);
    }

    /// Rank-1 contiguous window of this array, aliasing the buffer. Used for
    /// carving flat state views.
    pub fn subrange(&self, start: usize, len: usize) -> Result<NdArray, NdArrayError> {
        if !self.is_contiguous() {
            return Err(NdArrayError::ShapeMismatch {
                expected: vec![self.len()],
                actual: self.shape.dims().to_vec(),
            });
        }
        let buffer = self.buffer.view(start, len)?;
        NdArray::from_buffer(buffer, Shape::new(vec![len]), self.order)
    }

    /// Copies the elements out in row-major order.
    pub fn to_vec<E: Element>(&self) -> Result<Vec<E>, NdArrayError> {
        if E::DTYPE != self.dtype() {
            return Err(NdArrayError::DTypeMismatch {
                expected: self.dtype(),
                actual: E::DTYPE,
            });
        }
        let mut out = Vec::with_capacity(self.len());
        for_each_index(&self.shape, |idx| {
            let offset = self.offset_of(idx).expect("iterated index is in bounds");
            out.push(self.buffer.get::<E>(offset).expect("offset within buffer"));
        });
        Ok(out)
    }

    /// Copies the elements out as `f64`, row-major, regardless of dtype.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each_value(|v| out.push(v));
        out
    }

    /// Visits every element as `f64` in row-major order.
    pub fn for_each_value(&self, mut f: impl FnMut(f64)) {
        for_each_index(&self.shape, |idx| {
            let offset = self.offset_of(idx).expect("iterated index is in bounds");
            f(self.read_f64(offset));
        });
    }

    /// Applies `f` over every element in place, via the `f64` round-trip.
    pub fn map_values_inplace(&mut self, mut f: impl FnMut(f64) -> f64) {
        let dims = self.shape.clone();
        for_each_index(&dims, |idx| {
            let offset = self.offset_of(idx).expect("iterated index is in bounds");
            let v = f(self.read_f64(offset));
            self.write_f64(offset, v);
        });
    }

    fn read_f64(&self, offset: usize) -> f64 {
        match self.dtype() {
            DType::F16 => self.buffer.get::<half::f16>(offset).map(|v| v.to_f64()),
            DType::F32 => self.buffer.get::<f32>(offset).map(f64::from),
            DType::F64 => self.buffer.get::<f64>(offset),
            DType::I32 => self.buffer.get::<i32>(offset).map(f64::from),
            DType::I64 => self.buffer.get::<i64>(offset).map(|v| v as f64),
            DType::Bool => self.buffer.get::<u8>(offset).map(f64::from),
        }
        .expect("offset within buffer")
    }

    fn write_f64(&mut self, offset: usize, value: f64) {
        match self.dtype() {
            DType::F16 => self.buffer.put(offset, half::f16::from_f64(value)),
            DType::F32 => self.buffer.put(offset, value as f32),
            DType::F64 => self.buffer.put(offset, value),
            DType::I32 => self.buffer.put(offset, value as i32),
            DType::I64 => self.buffer.put(offset, value as i64),
            DType::Bool => self.buffer.put(offset, u8::from(value != 0.0)),
        }
        .expect("offset within buffer")
    }

    /// Copies into a fresh array of the requested dtype.
    pub fn cast(&self, dtype: DType) -> NdArray {
        if dtype == self.dtype() {
            return self.dup();
        }
        let mut out = NdArray::zeros(self.shape.clone(), dtype);
        let values = self.to_f64_vec();
        let mut i = 0;
        out.map_values_inplace(|_| {
            let v = values[i];
            i += 1;
            v
        });
        out
    }

    /// Elementwise equality within `tol` on the `f64` view of both arrays.
    pub fn all_close(&self, other: &NdArray, tol: f64) -> bool {
        if self.shape != *other.shape() {
            return false;
        }
        let a = self.to_f64_vec();
        let b = other.to_f64_vec();
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tol)
    }
}
