//! Error types for the custody ledger.

use crate::quantity::{ParseQuantityError, Quantity};
use crate::types::{ChainId, EventId, ProductType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Chain not found: {0}")]
    ChainNotFound(String),

    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Insufficient quantity on {chain}: requested {requested}, available {available}")]
    InsufficientQuantity {
        chain: String,
        requested: Quantity,
        available: Quantity,
    },

    #[error("Product type mismatch: expected {expected}, found {found}")]
    ProductTypeMismatch {
        expected: ProductType,
        found: ProductType,
    },

    #[error("Expected at least {required} chains, got {got}")]
    EmptySet { required: usize, got: usize },

    #[error("Lineage graph too large: limit {limit}, visited {visited}")]
    GraphTooLarge { limit: usize, visited: usize },

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Ledger is locked by another process")]
    Locked,

    #[error("Invalid ledger format: {0}")]
    InvalidFormat(String),
}

impl LedgerError {
    pub(crate) fn chain_not_found(id: ChainId) -> Self {
        LedgerError::ChainNotFound(id.to_string())
    }

    /// Stable classification of this error, as surfaced through the API.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::ChainNotFound(_) | LedgerError::EventNotFound(_) => ErrorKind::NotFound,
            LedgerError::InvalidEvent(_) => ErrorKind::InvalidEvent,
            LedgerError::InsufficientQuantity { .. } => ErrorKind::InsufficientQuantity,
            LedgerError::ProductTypeMismatch { .. } => ErrorKind::ProductTypeMismatch,
            LedgerError::EmptySet { .. } => ErrorKind::EmptySet,
            LedgerError::GraphTooLarge { .. } => ErrorKind::GraphTooLarge,
            LedgerError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            LedgerError::Cancelled => ErrorKind::Cancelled,
            LedgerError::Io(_)
            | LedgerError::Serialization(_)
            | LedgerError::Deserialization(_)
            | LedgerError::Corruption(_)
            | LedgerError::Locked
            | LedgerError::InvalidFormat(_) => ErrorKind::Storage,
        }
    }

    /// Only lock contention is worth retrying with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict(_))
    }
}

/// Error classification shared with API clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidEvent,
    InsufficientQuantity,
    ProductTypeMismatch,
    EmptySet,
    GraphTooLarge,
    ConcurrencyConflict,
    Cancelled,
    Storage,
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LedgerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<ParseQuantityError> for LedgerError {
    fn from(e: ParseQuantityError) -> Self {
        LedgerError::Validation(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LedgerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LedgerError::Deserialization(e.to_string())
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
