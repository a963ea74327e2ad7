//! Agenda Core Synchronization Layer
//!
//! This crate is the state engine of the Agenda team task manager: it owns
//! the client's working set, applies every mutation optimistically with
//! targeted rollback, and folds the backend's realtime change feed back in.
//!
//! # Architecture
//!
//! - **Optimistic mutations**: apply locally, confirm remotely, roll back
//!   the captured pre-images on failure ([`store`])
//! - **Backend as a seam**: all persistence, realtime, and atomic server
//!   procedures behind the [`backend::Backend`] trait; an in-memory
//!   implementation with failure injection backs the tests
//! - **Pure rules**: permissions, reporting-forest traversal, recurrence
//!   math, and visibility are side-effect-free functions ([`rules`])
//! - **Wire discipline**: camelCase models, snake_case rows, and every
//!   timestamp encoding normalized at one boundary ([`models::wire`])
//!
//! # Modules
//!
//! - [`models`] - Domain entities (tasks, team, notifications, content)
//! - [`rules`] - Permission, hierarchy, recurrence, and visibility rules
//! - [`backend`] - The persistence/realtime seam and [`backend::MemoryBackend`]
//! - [`store`] - The synchronization store and its mutation surface
//! - [`triage`] - AI triage seam turning free text into task drafts

pub mod backend;
pub mod models;
pub mod rules;
pub mod store;
pub mod triage;

// Re-export commonly used types
pub use backend::{Backend, BackendError, MemoryBackend};
pub use models::*;
pub use store::{AppState, StateChange, Store, StoreConfig, StoreError};
pub use triage::{TaskSuggestion, TriageContext, TriageError, TriageProvider};
