//! Structured session record and auth-event reporting.

pub mod events;
pub mod manager;
pub mod model;

pub use events::{AuthEvent, EventSeverity};
pub use manager::SessionManager;
pub use model::{SessionMetadata, SessionStats, UserData, UserSession};
