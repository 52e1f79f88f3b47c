//! Error handling.
//!
//! This module provides the error taxonomy:
//! - **Transport errors**: dial, handshake and interception failures, never retried internally
//! - **Step errors**: retryable failures and terminal declines reported by pipeline steps
//! - **Proxy errors**: proxy list parsing failures
//! - **Challenge errors**: cancelled or exhausted challenge polling
//! - **Engine errors**: unknown or duplicate groups and workers, invalid run state
//!
//! Errors travel between workers as data (status strings on the event bus), never
//! as cross-worker panics.

mod types;

// Re-export public API
pub use types::{
    ChallengeError, EngineError, InitializationError, ProxyError, StepError, TransportError,
};
