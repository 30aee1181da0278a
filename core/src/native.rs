//! Native stack collaborator contract
//!
//! A binding for a concrete platform Bluetooth library implements these traits.
//! Handles are shared (`Arc`) and their lifecycle belongs to the native stack;
//! the transport layer only wraps them. Every call may block for the duration
//! of the underlying native or radio operation.
//!
//! Callbacks registered through `enable_*_notifications` may be invoked on any
//! thread owned by the native library, possibly re-entrantly.

use std::sync::Arc;
use thiserror::Error;

/// Callback registered with the native stack for one observable property
pub type NativeCallback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Error raised by the native stack.
///
/// Native libraries typically report failures as free-form text (D-Bus error
/// names followed by a message), so the message is all this layer can inspect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct NativeError {
    message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Entry point of a native stack: enumerates and looks up adapters and devices
#[cfg_attr(test, mockall::automock)]
pub trait NativeManager: Send + Sync {
    /// Protocol name used as the scheme of every address this stack produces
    fn protocol_name(&self) -> String;

    /// All adapters currently known to the stack
    fn adapters(&self) -> Result<Vec<Arc<dyn NativeAdapter>>, NativeError>;

    /// All devices currently known to the stack, across adapters
    fn devices(&self) -> Result<Vec<Arc<dyn NativeDevice>>, NativeError>;

    /// Look up an adapter by its id
    fn find_adapter(&self, adapter_id: &str) -> Result<Option<Arc<dyn NativeAdapter>>, NativeError>;
}

/// Native local radio controller
#[cfg_attr(test, mockall::automock)]
pub trait NativeAdapter: Send + Sync {
    fn address(&self) -> Result<String, NativeError>;
    fn name(&self) -> Result<String, NativeError>;
    fn alias(&self) -> Result<String, NativeError>;
    fn set_alias(&self, alias: &str) -> Result<(), NativeError>;

    fn is_powered(&self) -> Result<bool, NativeError>;
    fn set_powered(&self, powered: bool) -> Result<(), NativeError>;
    fn is_discovering(&self) -> Result<bool, NativeError>;

    /// Restrict discovery results to devices at or above the given RSSI (dBm)
    fn set_rssi_discovery_filter(&self, rssi: i16) -> Result<(), NativeError>;
    fn start_discovery(&self) -> Result<bool, NativeError>;
    fn stop_discovery(&self) -> Result<bool, NativeError>;

    fn devices(&self) -> Result<Vec<Arc<dyn NativeDevice>>, NativeError>;
    fn find_device(&self, device_id: &str) -> Result<Option<Arc<dyn NativeDevice>>, NativeError>;

    fn enable_powered_notifications(&self, callback: NativeCallback<bool>) -> Result<(), NativeError>;
    fn disable_powered_notifications(&self) -> Result<(), NativeError>;
    fn enable_discovering_notifications(&self, callback: NativeCallback<bool>) -> Result<(), NativeError>;
    fn disable_discovering_notifications(&self) -> Result<(), NativeError>;
}

/// Native remote peer
#[cfg_attr(test, mockall::automock)]
pub trait NativeDevice: Send + Sync {
    fn address(&self) -> Result<String, NativeError>;
    /// Address of the adapter this device was discovered through
    fn adapter_address(&self) -> Result<String, NativeError>;
    fn name(&self) -> Result<String, NativeError>;
    fn alias(&self) -> Result<String, NativeError>;
    fn set_alias(&self, alias: &str) -> Result<(), NativeError>;
    fn bluetooth_class(&self) -> Result<u32, NativeError>;

    fn is_blocked(&self) -> Result<bool, NativeError>;
    fn set_blocked(&self, blocked: bool) -> Result<(), NativeError>;
    fn rssi(&self) -> Result<i16, NativeError>;
    fn tx_power(&self) -> Result<i16, NativeError>;

    fn is_connected(&self) -> Result<bool, NativeError>;
    fn connect(&self) -> Result<bool, NativeError>;
    fn disconnect(&self) -> Result<bool, NativeError>;
    fn is_services_resolved(&self) -> Result<bool, NativeError>;

    fn services(&self) -> Result<Vec<Arc<dyn NativeService>>, NativeError>;
    fn find_service(&self, uuid: &str) -> Result<Option<Arc<dyn NativeService>>, NativeError>;

    fn enable_blocked_notifications(&self, callback: NativeCallback<bool>) -> Result<(), NativeError>;
    fn disable_blocked_notifications(&self) -> Result<(), NativeError>;
    fn enable_rssi_notifications(&self, callback: NativeCallback<i16>) -> Result<(), NativeError>;
    fn disable_rssi_notifications(&self) -> Result<(), NativeError>;
    fn enable_connected_notifications(&self, callback: NativeCallback<bool>) -> Result<(), NativeError>;
    fn disable_connected_notifications(&self) -> Result<(), NativeError>;
    fn enable_services_resolved_notifications(
        &self,
        callback: NativeCallback<bool>,
    ) -> Result<(), NativeError>;
    fn disable_services_resolved_notifications(&self) -> Result<(), NativeError>;
}

/// Native GATT service
#[cfg_attr(test, mockall::automock)]
pub trait NativeService: Send + Sync {
    fn uuid(&self) -> Result<String, NativeError>;
    fn characteristics(&self) -> Result<Vec<Arc<dyn NativeCharacteristic>>, NativeError>;
    fn find_characteristic(
        &self,
        uuid: &str,
    ) -> Result<Option<Arc<dyn NativeCharacteristic>>, NativeError>;
}

/// Native GATT characteristic
#[cfg_attr(test, mockall::automock)]
pub trait NativeCharacteristic: Send + Sync {
    fn uuid(&self) -> Result<String, NativeError>;
    /// Advertised property flags, e.g. `"read"`, `"write-without-response"`
    fn flags(&self) -> Result<Vec<String>, NativeError>;
    fn is_notifying(&self) -> Result<bool, NativeError>;
    fn read_value(&self) -> Result<Vec<u8>, NativeError>;
    fn write_value(&self, value: &[u8]) -> Result<bool, NativeError>;

    fn enable_value_notifications(&self, callback: NativeCallback<Vec<u8>>) -> Result<(), NativeError>;
    fn disable_value_notifications(&self) -> Result<(), NativeError>;
}
