//! # Error Module
//!
//! Defines `CrawlError`, the single error type returned by every fallible
//! operation in the crawl engine.
//!
//! Errors fall into two groups. Unit-of-work errors (`TransientFetch`,
//! `MissingField`) only affect the id being processed and are handled inside
//! the worker according to the configured `FailurePolicy`. Run-level errors
//! (`CallBudgetExceeded`, `StoreUnavailable`) are reported to the supervisor
//! and stop the whole crawl.

use crate::record::{EntityId, EntityKind};
use thiserror::Error;

/// Errors produced by the crawl engine.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The content service failed while fetching an entity.
    #[error("transient fetch error for {kind} {id}: {source:#}")]
    TransientFetch {
        kind: EntityKind,
        id: EntityId,
        #[source]
        source: anyhow::Error,
    },

    /// A fetched record lacks a field required to persist it.
    #[error("{kind} {id} is missing required field '{field}'")]
    MissingField {
        kind: EntityKind,
        id: EntityId,
        field: &'static str,
    },

    /// The run's call budget is spent; no further outbound calls are allowed.
    #[error("call budget of {budget} calls exceeded")]
    CallBudgetExceeded { budget: usize },

    /// A record or queue store rejected an operation.
    #[error("store '{store}' unavailable: {message}")]
    StoreUnavailable { store: String, message: String },

    /// Invalid crawler configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Checkpoint encode/decode or file I/O failure.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CrawlError {
    pub(crate) fn store(store: impl Into<String>, message: impl std::fmt::Display) -> Self {
        CrawlError::StoreUnavailable {
            store: store.into(),
            message: message.to_string(),
        }
    }

    /// Returns true for errors that must stop the whole crawl.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlError::CallBudgetExceeded { .. } | CrawlError::StoreUnavailable { .. }
        )
    }
}
