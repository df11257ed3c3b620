//! Remote authentication API collaborator.
//!
//! Tokens are issued, validated and revoked by a remote service. This module
//! holds the [`AuthApi`] seam, an HTTP implementation, and the flows that
//! keep the local session in step with the server's answers.

pub mod client;
pub mod error;
pub mod flow;

pub use client::{AuthApi, HttpAuthApi, RefreshResponse, ValidateResponse};
pub use error::{ApiError, AuthFlowError};
pub use flow::{logout, refresh_session, validate_session};
