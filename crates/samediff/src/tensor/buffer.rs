//! Reference-counted typed memory regions underlying array views.

use std::cell::UnsafeCell;
use std::sync::{Arc, Mutex};

use crate::memory::WorkspaceCore;

use super::{DType, Element, NdArrayError};

/// How a buffer's memory is owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    /// The buffer owns its allocation; freed when the last reference drops.
    Owned,
    /// A window into another buffer's allocation.
    View,
    /// Carved out of a workspace arena; invalid once the owning scope closes.
    Workspace,
}

/// Hook invoked when the last reference to an owned allocation drops.
pub type Deallocator = Box<dyn FnOnce() + Send>;

pub(crate) enum Storage {
    Owned {
        /// Backing store kept as u64 words so the base pointer is aligned for
        /// every supported element type.
        words: UnsafeCell<Box<[u64]>>,
        byte_len: usize,
        deallocator: Mutex<Option<Deallocator>>,
    },
    Workspace {
        core: Arc<WorkspaceCore>,
        /// Id of the workspace scope the buffer was carved under; access
        /// panics once that scope has closed.
        scope_id: u64,
        region_offset: usize,
        byte_len: usize,
    },
}

// Mutation through aliased buffers is part of the memory model (see the module
// docs on `DataBuffer`); concurrent mutation from multiple threads is the
// caller's responsibility, as with the workspace-per-thread pattern.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

fn alloc_words(byte_len: usize) -> UnsafeCell<Box<[u64]>> {
    let words = byte_len.div_ceil(8);
    UnsafeCell::new(vec![0u64; words].into_boxed_slice())
}

impl Storage {
    fn owned(byte_len: usize, deallocator: Option<Deallocator>) -> Self {
        Storage::Owned {
            words: alloc_words(byte_len),
            byte_len,
            deallocator: Mutex::new(deallocator),
        }
    }

    fn byte_len(&self) -> usize {
        match self {
            Storage::Owned { byte_len, .. } => *byte_len,
            Storage::Workspace { byte_len, .. } => *byte_len,
        }
    }

    /// Base pointer of the allocation. Panics if a workspace allocation has
    /// been invalidated by its scope closing.
    fn base_ptr(&self) -> *mut u8 {
        match self {
            Storage::Owned { words, .. } => unsafe { (*words.get()).as_mut_ptr() as *mut u8 },
            Storage::Workspace {
                core,
                scope_id,
                region_offset,
                ..
            } => core.ptr_at(*scope_id, *region_offset),
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Storage::Owned { deallocator, .. } = self {
            let hook = deallocator.lock().ok().and_then(|mut g| g.take());
            if let Some(hook) = hook {
                hook();
            }
        }
    }
}

/// A typed, contiguous, fixed-length memory region.
///
/// Buffers are cheap to clone; clones and views alias the same allocation, so
/// mutation through any alias is visible through all others. Callers needing
/// value semantics must duplicate explicitly.
#[derive(Clone)]
pub struct DataBuffer {
    storage: Arc<Storage>,
    /// Offset of this view from the allocation base, in bytes.
    byte_offset: usize,
    /// Length in elements.
    len: usize,
    dtype: DType,
    kind: AllocationKind,
}

impl DataBuffer {
    /// Allocates a zero-initialized buffer of `len` elements.
    pub fn allocate(len: usize, dtype: DType) -> Self {
        Self::allocate_with_deallocator(len, dtype, None)
    }

    /// Allocates a zero-initialized buffer with an optional deallocation hook
    /// fired when the last reference drops.
    pub fn allocate_with_deallocator(
        len: usize,
        dtype: DType,
        deallocator: Option<Deallocator>,
    ) -> Self {
        DataBuffer {
            storage: Arc::new(Storage::owned(len * dtype.size_in_bytes(), deallocator)),
            byte_offset: 0,
            len,
            dtype,
            kind: AllocationKind::Owned,
        }
    }

    /// Builds an owned buffer from a typed vector.
    pub fn from_vec<E: Element>(data: Vec<E>) -> Self {
        let mut buffer = Self::allocate(data.len(), E::DTYPE);
        let elem = E::DTYPE.size_in_bytes();
        let bytes = buffer.bytes_mut();
        for (i, v) in data.into_iter().enumerate() {
            bytes[i * elem..(i + 1) * elem].copy_from_slice(&v.to_le_bytes_vec());
        }
        buffer
    }

    /// Builds an owned buffer directly from little-endian bytes.
    pub fn from_le_bytes(bytes: Vec<u8>, dtype: DType) -> Result<Self, NdArrayError> {
        let elem = dtype.size_in_bytes();
        if bytes.len() % elem != 0 {
            return Err(NdArrayError::LengthMismatch {
                expected: (bytes.len() / elem) * elem,
                actual: bytes.len(),
            });
        }
        let mut buffer = Self::allocate(bytes.len() / elem, dtype);
        buffer.bytes_mut().copy_from_slice(&bytes);
        Ok(buffer)
    }

    pub(crate) fn from_workspace(
        core: Arc<WorkspaceCore>,
        scope_id: u64,
        region_offset: usize,
        len: usize,
        dtype: DType,
    ) -> Self {
        DataBuffer {
            storage: Arc::new(Storage::Workspace {
                core,
                scope_id,
                region_offset,
                byte_len: len * dtype.size_in_bytes(),
            }),
            byte_offset: 0,
            len,
            dtype,
            kind: AllocationKind::Workspace,
        }
    }

    /// A window of `len` elements starting at `offset`, sharing this
    /// buffer's allocation. The window must lie within this view.
    pub fn view(&self, offset: usize, len: usize) -> Result<Self, NdArrayError> {
        if offset + len > self.len {
            return Err(NdArrayError::ViewOutOfBounds {
                offset,
                len,
                buffer_len: self.len,
            });
        }
        Ok(DataBuffer {
            storage: Arc::clone(&self.storage),
            byte_offset: self.byte_offset + offset * self.dtype.size_in_bytes(),
            len,
            dtype: self.dtype,
            kind: AllocationKind::View,
        })
    }

    /// Length in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn kind(&self) -> AllocationKind {
        self.kind
    }

    /// Returns `true` when both buffers alias the same allocation.
    pub fn same_allocation(&self, other: &DataBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    fn check_dtype<E: Element>(&self) -> Result<(), NdArrayError> {
        if E::DTYPE != self.dtype {
            return Err(NdArrayError::DTypeMismatch {
                expected: self.dtype,
                actual: E::DTYPE,
            });
        }
        Ok(())
    }

    fn data_ptr(&self) -> *mut u8 {
        let base = self.storage.base_ptr();
        debug_assert!(
            self.byte_offset + self.len * self.dtype.size_in_bytes() <= self.storage.byte_len()
        );
        unsafe { base.add(self.byte_offset) }
    }

    /// Reads a single element, bounds- and dtype-checked.
    pub fn get<E: Element>(&self, index: usize) -> Result<E, NdArrayError> {
        self.check_dtype::<E>()?;
        if index >= self.len {
            return Err(NdArrayError::IndexOutOfBounds {
                index: vec![index],
                shape: vec![self.len],
            });
        }
        let elem = self.dtype.size_in_bytes();
        let ptr = unsafe { self.data_ptr().add(index * elem) };
        let bytes = unsafe { std::slice::from_raw_parts(ptr, elem) };
        Ok(E::from_le_slice(bytes))
    }

    /// Writes a single element, bounds- and dtype-checked.
    pub fn put<E: Element>(&mut self, index: usize, value: E) -> Result<(), NdArrayError> {
        self.check_dtype::<E>()?;
        if index >= self.len {
            return Err(NdArrayError::IndexOutOfBounds {
                index: vec![index],
                shape: vec![self.len],
            });
        }
        let elem = self.dtype.size_in_bytes();
        let bytes = value.to_le_bytes_vec();
        unsafe {
            let ptr = self.data_ptr().add(index * elem);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, elem);
        }
        Ok(())
    }

    /// Borrows the elements as a typed slice.
    ///
    /// Panics on dtype mismatch. Only meaningful on little-endian hosts for
    /// multi-byte dtypes; all supported platforms qualify.
    pub fn as_slice<E: Element>(&self) -> &[E] {
        self.check_dtype::<E>()
            .unwrap_or_else(|e| panic!("buffer access: {e}"));
        unsafe { std::slice::from_raw_parts(self.data_ptr() as *const E, self.len) }
    }

    /// Mutably borrows the elements as a typed slice.
    ///
    /// Mutation is visible through every aliasing view; callers must not hold
    /// overlapping slices from aliased buffers across this call.
    pub fn as_slice_mut<E: Element>(&mut self) -> &mut [E] {
        self.check_dtype::<E>()
            .unwrap_or_else(|e| panic!("buffer access: {e}"));
        unsafe { std::slice::from_raw_parts_mut(self.data_ptr() as *mut E, self.len) }
    }

    /// Raw little-endian bytes of this view.
    pub fn bytes(&self) -> &[u8] {
        let byte_len = self.len * self.dtype.size_in_bytes();
        unsafe { std::slice::from_raw_parts(self.data_ptr(), byte_len) }
    }

    /// Mutable raw bytes of this view.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let byte_len = self.len * self.dtype.size_in_bytes();
        unsafe { std::slice::from_raw_parts_mut(self.data_ptr(), byte_len) }
    }

    /// Zero-fills the view.
    pub fn zero(&mut self) {
        self.bytes_mut().fill(0);
    }
}

impl std::fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBuffer")
            .field("dtype", &self.dtype)
            .field("len", &self.len)
            .field("kind", &self.kind)
            .field("byte_offset", &self.byte_offset)
            .finish()
    }
}
