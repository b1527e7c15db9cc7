//! Orchestration above the engine: backend selection, the single-operation
//! guard, events and user guidance.

pub mod backend;
pub mod credentials;
pub mod guidance;
pub mod manager;

pub use backend::{Backend, BackendKind, BackendStatus, LocalBackend, RemoteBackend};
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use guidance::{Guidance, RecoveryAction};
pub use manager::{ConnectRequest, Event, InstallerManager, ManagerStatus, UploadRequest};
