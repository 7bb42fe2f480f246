//! Arena-style workspace memory management.

mod workspace;

pub use workspace::{DebugMode, Workspace, WorkspaceConfig, WorkspaceScope};

pub(crate) use workspace::WorkspaceCore;
