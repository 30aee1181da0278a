//! Entity adapters over native Bluetooth handles
//!
//! Each entity binds one native handle to its [`Address`] and translates property
//! access and callback registration into the uniform address + notification contract.
//! Entities never own the native object's lifecycle: disposing (or dropping) an entity
//! deregisters its active subscriptions and forgets the handle.

mod adapter;
mod characteristic;
mod device;
mod service;

pub use adapter::Adapter;
pub use characteristic::{AccessType, Characteristic};
pub use device::Device;
pub use service::Service;

use crate::address::{Address, Level};
use crate::config::TransportConfig;
use crate::dispatch::Dispatcher;
use crate::error::TransportError;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Behaviour shared by every entity variant
pub trait BluetoothObject: Send + Sync {
    /// Address this entity is bound to
    fn address(&self) -> &Address;

    /// Deregister all active subscriptions and release the native handle.
    ///
    /// Idempotent and infallible. Later calls on the entity fail with
    /// [`TransportError::Disposed`].
    fn dispose(&self);
}

/// Entities advertising GATT access capabilities
pub trait HasFlags {
    fn flags(&self) -> Result<BTreeSet<AccessType>, TransportError>;
}

/// Any entity the factory can resolve
pub enum Entity {
    Adapter(Adapter),
    Device(Device),
    Service(Service),
    Characteristic(Characteristic),
}

impl Entity {
    pub fn level(&self) -> Level {
        match self {
            Entity::Adapter(_) => Level::Adapter,
            Entity::Device(_) => Level::Device,
            Entity::Service(_) => Level::Service,
            Entity::Characteristic(_) => Level::Characteristic,
        }
    }

    pub fn into_adapter(self) -> Option<Adapter> {
        match self {
            Entity::Adapter(adapter) => Some(adapter),
            _ => None,
        }
    }

    pub fn into_device(self) -> Option<Device> {
        match self {
            Entity::Device(device) => Some(device),
            _ => None,
        }
    }

    pub fn into_service(self) -> Option<Service> {
        match self {
            Entity::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn into_characteristic(self) -> Option<Characteristic> {
        match self {
            Entity::Characteristic(characteristic) => Some(characteristic),
            _ => None,
        }
    }

    fn as_object(&self) -> &dyn BluetoothObject {
        match self {
            Entity::Adapter(adapter) => adapter,
            Entity::Device(device) => device,
            Entity::Service(service) => service,
            Entity::Characteristic(characteristic) => characteristic,
        }
    }
}

impl BluetoothObject for Entity {
    fn address(&self) -> &Address {
        self.as_object().address()
    }

    fn dispose(&self) {
        self.as_object().dispose()
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Entity")
            .field(&self.level())
            .field(self.address())
            .finish()
    }
}

/// State shared by all entities created through one factory
pub(crate) struct EntityContext {
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) config: TransportConfig,
}

impl EntityContext {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, config: TransportConfig) -> Arc<Self> {
        Arc::new(Self { dispatcher, config })
    }
}

#[cfg(test)]
pub(crate) fn test_context(config: TransportConfig) -> Arc<EntityContext> {
    let dispatcher =
        Dispatcher::new(&config.dispatcher).expect("Dispatcher for entity tests");
    EntityContext::new(Arc::new(dispatcher), config)
}

/// Native handle slot, emptied on disposal
pub(crate) struct NativeHandle<T: ?Sized> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> NativeHandle<T> {
    pub(crate) fn new(native: Arc<T>) -> Self {
        Self {
            slot: RwLock::new(Some(native)),
        }
    }

    /// Clone the handle out for a single native call
    pub(crate) fn get(&self, address: &Address) -> Result<Arc<T>, TransportError> {
        self.slot
            .read()
            .clone()
            .ok_or_else(|| TransportError::Disposed(address.clone()))
    }

    /// Run `f` with the handle held, so disposal cannot interleave with a
    /// subscription change
    pub(crate) fn pinned<R, F>(&self, address: &Address, f: F) -> Result<R, TransportError>
    where
        F: FnOnce(&T) -> Result<R, TransportError>,
    {
        let slot = self.slot.read();
        match slot.as_deref() {
            Some(native) => f(native),
            None => Err(TransportError::Disposed(address.clone())),
        }
    }

    /// Take the handle out and pass it to `release`; false if already released.
    ///
    /// The slot stays write-locked while `release` runs.
    pub(crate) fn take_with<F>(&self, release: F) -> bool
    where
        F: FnOnce(&T),
    {
        let mut slot = self.slot.write();
        match slot.take() {
            Some(native) => {
                release(native.as_ref());
                true
            }
            None => false,
        }
    }
}

/// Children that failed to answer during an enumeration are left out of the snapshot
pub(crate) fn skip_stale<T>(parent: &Address, child: Result<T, TransportError>) -> Option<T> {
    match child {
        Ok(child) => Some(child),
        Err(e) => {
            tracing::debug!("Skipping stale child of {}: {}", parent, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address::adapter("tinyb", "11:22:33:44:55:66").expect("Valid")
    }

    #[test]
    fn test_released_handle_reports_disposed() {
        let handle = NativeHandle::new(Arc::new(7u32));

        assert_eq!(*handle.get(&address()).expect("Live"), 7);
        assert!(handle.take_with(|value| assert_eq!(*value, 7)));
        assert!(!handle.take_with(|_| panic!("released twice")));

        let err = handle.get(&address()).expect_err("Disposed");
        assert!(err.is_disposed());
        assert!(handle.pinned(&address(), |_| Ok(())).is_err());
    }

    #[test]
    fn test_skip_stale_drops_failed_children() {
        let failed: Result<u8, TransportError> = Err(TransportError::Disposed(address()));

        assert_eq!(skip_stale(&address(), Ok(1u8)), Some(1));
        assert_eq!(skip_stale(&address(), failed), None);
    }
}
