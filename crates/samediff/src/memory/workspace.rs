//! Scoped arena allocator for array buffers.
//!
//! A workspace hands out buffers from a pre-sized region by advancing an
//! offset; closing a scope rewinds the offset and invalidates the buffers
//! allocated inside it. Requests that do not fit the region spill to ordinary
//! heap allocations, tracked separately so under-provisioning is observable.
//!
//! Workspaces are deliberately single-threaded: the documented pattern is one
//! workspace per execution thread. The type is neither `Send` nor `Sync`.

use std::cell::{Cell, UnsafeCell};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::tensor::{DType, DataBuffer};

/// Debug policies controlling where allocations come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    /// Normal operation: arena first, spill when the region is exhausted.
    #[default]
    Disabled,
    /// Force every allocation to spill. Running a workload in this mode and
    /// comparing spill counters against `Disabled` exposes an under-sized
    /// region configuration.
    SpillEverything,
    /// Do not use the arena at all; every buffer is an ordinary heap
    /// allocation. Useful for isolating memory bugs from workspace reuse.
    BypassEverything,
}

/// Sizing and policy configuration for a workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Arena region size in bytes.
    pub initial_size: usize,
    /// Upper bound on total bytes (arena plus spill) before allocation panics.
    /// Zero means unbounded.
    pub max_size: usize,
    pub debug_mode: DebugMode,
}

impl WorkspaceConfig {
    pub fn new(initial_size: usize) -> Self {
        WorkspaceConfig {
            initial_size,
            max_size: 0,
            debug_mode: DebugMode::Disabled,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_debug_mode(mut self, mode: DebugMode) -> Self {
        self.debug_mode = mode;
        self
    }
}

/// Shared arena state referenced by workspace-allocated buffers.
///
/// Buffers are stamped with the id of the scope they were carved under.
/// Closing a scope retires that id, so a stale buffer access fails loudly
/// instead of reading recycled bytes, while buffers belonging to still-open
/// outer scopes stay valid.
pub(crate) struct WorkspaceCore {
    region: UnsafeCell<Box<[u64]>>,
    byte_len: usize,
    retired_scopes: Mutex<HashSet<u64>>,
}

unsafe impl Send for WorkspaceCore {}
unsafe impl Sync for WorkspaceCore {}

impl WorkspaceCore {
    fn new(byte_len: usize) -> Self {
        WorkspaceCore {
            region: UnsafeCell::new(vec![0u64; byte_len.div_ceil(8)].into_boxed_slice()),
            byte_len,
            retired_scopes: Mutex::new(HashSet::new()),
        }
    }

    fn retire(&self, scope_id: u64) {
        self.retired_scopes
            .lock()
            .expect("workspace scope bookkeeping poisoned")
            .insert(scope_id);
    }

    pub(crate) fn ptr_at(&self, scope_id: u64, byte_offset: usize) -> *mut u8 {
        let retired = self
            .retired_scopes
            .lock()
            .expect("workspace scope bookkeeping poisoned")
            .contains(&scope_id);
        if retired {
            panic!(
                "workspace buffer used after its scope closed \
                 (allocation scope {scope_id} has been left)"
            );
        }
        assert!(byte_offset <= self.byte_len, "workspace offset out of range");
        unsafe { ((*self.region.get()).as_mut_ptr() as *mut u8).add(byte_offset) }
    }
}

/// An arena allocator with explicit enter/leave scoping.
pub struct Workspace {
    core: Arc<WorkspaceCore>,
    config: WorkspaceConfig,
    offset: Cell<usize>,
    depth: Cell<usize>,
    // Innermost open scope; 0 is the workspace root until the first reset.
    current_scope: Cell<u64>,
    next_scope_id: Cell<u64>,
    arena_allocated: Cell<usize>,
    spilled: Cell<usize>,
    peak: Cell<usize>,
    // One workspace per thread; !Send + !Sync.
    _not_threadsafe: PhantomData<*const ()>,
}

impl Workspace {
    /// Opens a workspace with the given configuration.
    pub fn open(config: WorkspaceConfig) -> Self {
        Workspace {
            core: Arc::new(WorkspaceCore::new(config.initial_size)),
            config,
            offset: Cell::new(0),
            depth: Cell::new(0),
            current_scope: Cell::new(0),
            next_scope_id: Cell::new(1),
            arena_allocated: Cell::new(0),
            spilled: Cell::new(0),
            peak: Cell::new(0),
            _not_threadsafe: PhantomData,
        }
    }

    /// Enters a new allocation scope. Scopes are strict LIFO: the returned
    /// guard must be dropped before any guard obtained earlier.
    pub fn scope(&self) -> WorkspaceScope<'_> {
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        let id = self.next_scope_id.get();
        self.next_scope_id.set(id + 1);
        let parent = self.current_scope.get();
        self.current_scope.set(id);
        WorkspaceScope {
            workspace: self,
            entry_offset: self.offset.get(),
            depth,
            id,
            parent,
        }
    }

    /// Allocates a zeroed buffer of `len` elements, from the arena when it
    /// fits and policy allows, spilling to the heap otherwise.
    ///
    /// Panics when the configured `max_size` would be exceeded: exhausting a
    /// bounded workspace is a programmer error, not a recoverable condition.
    pub fn allocate(&self, len: usize, dtype: DType) -> DataBuffer {
        let byte_len = len * dtype.size_in_bytes();
        self.enforce_max(byte_len);
        match self.config.debug_mode {
            DebugMode::BypassEverything => DataBuffer::allocate(len, dtype),
            DebugMode::SpillEverything => self.spill(len, dtype, byte_len),
            DebugMode::Disabled => {
                // Keep every carve 8-byte aligned so typed access stays valid.
                let offset = self.offset.get();
                let aligned = byte_len.div_ceil(8) * 8;
                if offset + aligned <= self.config.initial_size {
                    self.offset.set(offset + aligned);
                    self.arena_allocated.set(self.arena_allocated.get() + byte_len);
                    self.peak.set(self.peak.get().max(offset + aligned));
                    let mut buffer = DataBuffer::from_workspace(
                        Arc::clone(&self.core),
                        self.current_scope.get(),
                        offset,
                        len,
                        dtype,
                    );
                    buffer.zero();
                    buffer
                } else {
                    log::debug!(
                        "workspace region exhausted ({} of {} bytes used), spilling {} bytes",
                        offset,
                        self.config.initial_size,
                        byte_len
                    );
                    self.spill(len, dtype, byte_len)
                }
            }
        }
    }

    fn spill(&self, len: usize, dtype: DType, byte_len: usize) -> DataBuffer {
        self.spilled.set(self.spilled.get() + byte_len);
        DataBuffer::allocate(len, dtype)
    }

    fn enforce_max(&self, byte_len: usize) {
        if self.config.max_size > 0 {
            let total = self.arena_allocated.get() + self.spilled.get() + byte_len;
            if total > self.config.max_size {
                panic!(
                    "workspace exceeded max_size: {total} bytes requested, \
                     limit {}",
                    self.config.max_size
                );
            }
        }
    }

    /// Bytes handed out from the arena region since open (or last reset).
    pub fn arena_allocated_bytes(&self) -> usize {
        self.arena_allocated.get()
    }

    /// Bytes that fell back to external heap allocations.
    pub fn spilled_bytes(&self) -> usize {
        self.spilled.get()
    }

    /// High-water mark of arena usage in bytes.
    pub fn peak_bytes(&self) -> usize {
        self.peak.get()
    }

    /// Current arena offset in bytes.
    pub fn current_offset(&self) -> usize {
        self.offset.get()
    }

    /// Rewinds the workspace to empty and invalidates all outstanding
    /// workspace-allocated buffers.
    pub fn reset(&self) {
        if self.depth.get() != 0 {
            panic!("workspace reset while {} scope(s) still open", self.depth.get());
        }
        self.offset.set(0);
        self.arena_allocated.set(0);
        self.spilled.set(0);
        // Retire the current root so buffers allocated outside any scope go
        // stale too, and start a fresh root for later allocations.
        self.core.retire(self.current_scope.get());
        self.current_scope.set(self.next_scope_id.get());
        self.next_scope_id.set(self.next_scope_id.get() + 1);
    }
}

/// RAII guard for a workspace scope. Dropping the guard rewinds the arena to
/// the state at scope entry and invalidates the buffers allocated inside it;
/// buffers belonging to still-open enclosing scopes are untouched.
pub struct WorkspaceScope<'w> {
    workspace: &'w Workspace,
    entry_offset: usize,
    depth: usize,
    id: u64,
    parent: u64,
}

impl Drop for WorkspaceScope<'_> {
    fn drop(&mut self) {
        let current = self.workspace.depth.get();
        if current != self.depth {
            // LIFO violation corrupts the offset bookkeeping; fail loudly.
            panic!(
                "workspace scopes closed out of order: closing depth {} while at depth {current}",
                self.depth
            );
        }
        self.workspace.depth.set(current - 1);
        self.workspace.offset.set(self.entry_offset);
        self.workspace.current_scope.set(self.parent);
        self.workspace.core.retire(self.id);
    }
}
