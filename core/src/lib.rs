// BlueBridge Core: uniform Bluetooth LE transport
//
// Names every Bluetooth object with a stable hierarchical address and turns
// native property callbacks into an ordered, failure-isolated notification stream.
// The native stack itself is a collaborator behind the traits in `native`.

pub mod address;
pub mod config;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod factory;
pub mod memory;
pub mod native;
pub mod notification;
pub mod quirks;

pub use address::{Address, AddressError, Level};
pub use config::{DispatcherConfig, TransportConfig};
pub use dispatch::{Dispatcher, LaneKey, ShutdownMode};
pub use entity::{
    AccessType, Adapter, BluetoothObject, Characteristic, Device, Entity, HasFlags, Service,
};
pub use error::{ListenerExecutionError, TransportError};
pub use factory::{AdapterSummary, DeviceSummary, Factory};
pub use native::{NativeCallback, NativeError};
pub use notification::{from_fn, Notification, PropertyKind};

/// Install a `tracing` subscriber for the transport layer.
///
/// `RUST_LOG` wins over `default_directive`. Does nothing if a global subscriber is
/// already installed.
pub fn init_logging(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .try_init();
}
