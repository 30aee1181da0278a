//! GATT service

use super::{skip_stale, BluetoothObject, Characteristic, EntityContext, NativeHandle};
use crate::address::Address;
use crate::error::TransportError;
use crate::native::{NativeCharacteristic, NativeService};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub struct Service {
    address: Address,
    native: NativeHandle<dyn NativeService>,
    context: Arc<EntityContext>,
}

impl Service {
    pub(crate) fn new(
        address: Address,
        native: Arc<dyn NativeService>,
        context: Arc<EntityContext>,
    ) -> Self {
        Self {
            address,
            native: NativeHandle::new(native),
            context,
        }
    }

    /// Canonical UUID, taken from the address
    pub fn uuid(&self) -> Option<&str> {
        self.address.service_uuid()
    }

    /// Snapshot of the service characteristics, ordered by address
    pub fn characteristics(&self) -> Result<Vec<Characteristic>, TransportError> {
        let natives = self
            .native
            .get(&self.address)?
            .characteristics()
            .map_err(|e| TransportError::native("list service characteristics", e))?;

        let mut characteristics: Vec<Characteristic> = natives
            .into_iter()
            .filter_map(|native| skip_stale(&self.address, self.wrap_characteristic(native)))
            .collect();
        characteristics.sort_by(|a, b| a.address().cmp(b.address()));
        Ok(characteristics)
    }

    fn wrap_characteristic(
        &self,
        native: Arc<dyn NativeCharacteristic>,
    ) -> Result<Characteristic, TransportError> {
        let uuid = native
            .uuid()
            .map_err(|e| TransportError::native("read characteristic UUID", e))?;
        let address = self.address.with_characteristic(&uuid)?;
        Ok(Characteristic::new(address, native, Arc::clone(&self.context)))
    }
}

impl BluetoothObject for Service {
    fn address(&self) -> &Address {
        &self.address
    }

    fn dispose(&self) {
        if self.native.take_with(|_| {}) {
            debug!("Disposed service {}", self.address);
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
