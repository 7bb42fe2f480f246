use samediff::memory::{DebugMode, Workspace, WorkspaceConfig};
use samediff::tensor::{AllocationKind, DType};

#[test]
fn allocations_advance_the_offset() {
    let ws = Workspace::open(WorkspaceConfig::new(1024));
    let _scope = ws.scope();
    let a = ws.allocate(4, DType::F32); // 16 bytes
    let b = ws.allocate(3, DType::F64); // 24 bytes
    assert_eq!(a.kind(), AllocationKind::Workspace);
    assert_eq!(b.kind(), AllocationKind::Workspace);
    assert_eq!(ws.current_offset(), 40);
    assert_eq!(ws.arena_allocated_bytes(), 40);
    assert_eq!(ws.spilled_bytes(), 0);
}

#[test]
fn carves_are_eight_byte_aligned() {
    let ws = Workspace::open(WorkspaceConfig::new(1024));
    let _scope = ws.scope();
    let _a = ws.allocate(1, DType::Bool); // 1 byte, padded to 8
    assert_eq!(ws.current_offset(), 8);
    let _b = ws.allocate(1, DType::F64);
    assert_eq!(ws.current_offset(), 16);
}

#[test]
fn workspace_buffers_are_zeroed() {
    let ws = Workspace::open(WorkspaceConfig::new(256));
    {
        let _scope = ws.scope();
        let mut buf = ws.allocate(8, DType::F32);
        for i in 0..8 {
            buf.put(i, 1.0f32).unwrap();
        }
    }
    let _scope = ws.scope();
    let buf = ws.allocate(8, DType::F32);
    for i in 0..8 {
        assert_eq!(buf.get::<f32>(i).unwrap(), 0.0);
    }
}

#[test]
fn closing_a_scope_rewinds_the_offset() {
    let ws = Workspace::open(WorkspaceConfig::new(1024));
    {
        let _outer = ws.scope();
        let _a = ws.allocate(4, DType::F64);
        let entry = ws.current_offset();
        {
            let _inner = ws.scope();
            let _b = ws.allocate(16, DType::F64);
            assert!(ws.current_offset() > entry);
        }
        assert_eq!(ws.current_offset(), entry);
    }
    assert_eq!(ws.current_offset(), 0);
}

#[test]
fn exhausted_region_spills_to_heap() {
    let ws = Workspace::open(WorkspaceConfig::new(32));
    let _scope = ws.scope();
    let a = ws.allocate(4, DType::F64); // fills the region
    let b = ws.allocate(4, DType::F64); // must spill
    assert_eq!(a.kind(), AllocationKind::Workspace);
    assert_eq!(b.kind(), AllocationKind::Owned);
    assert_eq!(ws.spilled_bytes(), 32);
}

#[test]
fn spill_everything_mode_never_uses_the_arena() {
    let ws = Workspace::open(
        WorkspaceConfig::new(1024).with_debug_mode(DebugMode::SpillEverything),
    );
    let _scope = ws.scope();
    let a = ws.allocate(4, DType::F32);
    assert_eq!(a.kind(), AllocationKind::Owned);
    assert_eq!(ws.arena_allocated_bytes(), 0);
    assert_eq!(ws.spilled_bytes(), 16);
}

#[test]
fn bypass_mode_allocates_plainly() {
    let ws = Workspace::open(
        WorkspaceConfig::new(1024).with_debug_mode(DebugMode::BypassEverything),
    );
    let _scope = ws.scope();
    let a = ws.allocate(4, DType::F32);
    assert_eq!(a.kind(), AllocationKind::Owned);
    assert_eq!(ws.arena_allocated_bytes(), 0);
}

#[test]
fn peak_tracks_high_water_mark() {
    let ws = Workspace::open(WorkspaceConfig::new(1024));
    {
        let _scope = ws.scope();
        let _a = ws.allocate(32, DType::F64);
    }
    {
        let _scope = ws.scope();
        let _b = ws.allocate(4, DType::F64);
    }
    assert_eq!(ws.peak_bytes(), 256);
}

#[test]
fn outer_scope_buffers_survive_inner_scope_close() {
    let ws = Workspace::open(WorkspaceConfig::new(256));
    let _outer = ws.scope();
    let mut buf = ws.allocate(4, DType::F32);
    buf.put(0, 3.5f32).unwrap();
    {
        let _inner = ws.scope();
        let _tmp = ws.allocate(4, DType::F32);
    }
    // Only the inner scope's allocations went stale.
    assert_eq!(buf.get::<f32>(0).unwrap(), 3.5);
}

#[test]
#[should_panic(expected = "used after its scope closed")]
fn inner_scope_buffer_goes_stale_while_outer_stays_open() {
    let ws = Workspace::open(WorkspaceConfig::new(256));
    let _outer = ws.scope();
    let inner_buf = {
        let _inner = ws.scope();
        ws.allocate(4, DType::F32)
    };
    let _ = inner_buf.get::<f32>(0);
}

#[test]
#[should_panic(expected = "used after its scope closed")]
fn stale_buffer_access_panics() {
    let ws = Workspace::open(WorkspaceConfig::new(256));
    let buf = {
        let _scope = ws.scope();
        ws.allocate(4, DType::F32)
    };
    let _ = buf.get::<f32>(0);
}

#[test]
#[should_panic(expected = "closed out of order")]
fn out_of_order_scope_close_panics() {
    let ws = Workspace::open(WorkspaceConfig::new(256));
    let outer = ws.scope();
    let _inner = ws.scope();
    drop(outer);
}

#[test]
#[should_panic(expected = "exceeded max_size")]
fn bounded_workspace_panics_when_exhausted() {
    let ws = Workspace::open(WorkspaceConfig::new(64).with_max_size(64));
    let _scope = ws.scope();
    let _a = ws.allocate(8, DType::F64);
    let _b = ws.allocate(8, DType::F64);
}

#[test]
#[should_panic(expected = "used after its scope closed")]
fn reset_invalidates_outstanding_buffers() {
    let ws = Workspace::open(WorkspaceConfig::new(256));
    let buf = {
        let _scope = ws.scope();
        ws.allocate(4, DType::F32)
    };
    ws.reset();
    assert_eq!(buf.len(), 4); // metadata stays readable
    let _ = buf.get::<f32>(0);
}
