//! Error types surfaced by the transport layer

use crate::address::{Address, AddressError};
use crate::native::NativeError;
use crate::notification::PropertyKind;
use thiserror::Error;

/// Errors returned synchronously by entity, factory and dispatcher operations
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Native operation '{operation}' failed: {source}")]
    Native {
        operation: &'static str,
        #[source]
        source: NativeError,
    },
    #[error("Entity {0} has been disposed")]
    Disposed(Address),
    #[error("Native stack reported an unusable identifier: {0}")]
    InvalidNativeIdentifier(#[from] AddressError),
    #[error("Notification runtime error: {0}")]
    Runtime(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    pub(crate) fn native(operation: &'static str, source: NativeError) -> Self {
        TransportError::Native { operation, source }
    }

    /// The native error behind this failure, if the native stack raised one
    pub fn native_error(&self) -> Option<&NativeError> {
        match self {
            TransportError::Native { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Check if the entity handle can no longer be used
    pub fn is_disposed(&self) -> bool {
        matches!(self, TransportError::Disposed(_))
    }
}

/// A listener failed while a notification was being delivered.
///
/// Never returned to callers: the dispatcher logs it and keeps delivering.
#[derive(Error, Debug, Clone)]
#[error("Listener for {property} notifications of {address} failed: {reason}")]
pub struct ListenerExecutionError {
    pub address: Address,
    pub property: PropertyKind,
    pub reason: String,
}

impl ListenerExecutionError {
    pub fn new(address: Address, property: PropertyKind, reason: impl Into<String>) -> Self {
        Self {
            address,
            property,
            reason: reason.into(),
        }
    }
}
