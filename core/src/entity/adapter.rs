//! Local radio controller

use super::{skip_stale, BluetoothObject, Device, EntityContext, NativeHandle};
use crate::address::Address;
use crate::error::TransportError;
use crate::native::{NativeAdapter, NativeDevice};
use crate::notification::{Notification, PropertyKind, Subscription};
use crate::quirks::Quirk;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Adapter {
    address: Address,
    native: NativeHandle<dyn NativeAdapter>,
    context: Arc<EntityContext>,
    powered: Subscription,
    discovering: Subscription,
}

impl Adapter {
    pub(crate) fn new(
        address: Address,
        native: Arc<dyn NativeAdapter>,
        context: Arc<EntityContext>,
    ) -> Self {
        Self {
            powered: Subscription::new(address.clone(), PropertyKind::Powered),
            discovering: Subscription::new(address.clone(), PropertyKind::Discovering),
            native: NativeHandle::new(native),
            address,
            context,
        }
    }

    fn native(&self) -> Result<Arc<dyn NativeAdapter>, TransportError> {
        self.native.get(&self.address)
    }

    pub fn name(&self) -> Result<String, TransportError> {
        self.native()?
            .name()
            .map_err(|e| TransportError::native("read adapter name", e))
    }

    pub fn alias(&self) -> Result<String, TransportError> {
        self.native()?
            .alias()
            .map_err(|e| TransportError::native("read adapter alias", e))
    }

    pub fn set_alias(&self, alias: &str) -> Result<(), TransportError> {
        self.native()?
            .set_alias(alias)
            .map_err(|e| TransportError::native("set adapter alias", e))
    }

    pub fn is_powered(&self) -> Result<bool, TransportError> {
        self.native()?
            .is_powered()
            .map_err(|e| TransportError::native("read powered state", e))
    }

    pub fn set_powered(&self, powered: bool) -> Result<(), TransportError> {
        self.native()?
            .set_powered(powered)
            .map_err(|e| TransportError::native("set powered state", e))
    }

    pub fn is_discovering(&self) -> Result<bool, TransportError> {
        self.native()?
            .is_discovering()
            .map_err(|e| TransportError::native("read discovering state", e))
    }

    /// Start device discovery.
    ///
    /// The configured RSSI discovery filter (if any) is applied first so that only
    /// devices in range are reported.
    pub fn start_discovery(&self) -> Result<bool, TransportError> {
        let native = self.native()?;
        if let Some(threshold) = self.context.config.discovery_rssi_threshold {
            native
                .set_rssi_discovery_filter(threshold)
                .map_err(|e| TransportError::native("set RSSI discovery filter", e))?;
        }
        let started = native
            .start_discovery()
            .map_err(|e| TransportError::native("start discovery", e))?;
        if started {
            info!("Discovery started on {}", self.address);
        }
        Ok(started)
    }

    /// Stop device discovery. Stopping an adapter that is not discovering succeeds.
    pub fn stop_discovery(&self) -> Result<bool, TransportError> {
        match self.native()?.stop_discovery() {
            Ok(stopped) => {
                if stopped {
                    info!("Discovery stopped on {}", self.address);
                }
                Ok(stopped)
            }
            Err(e) if Quirk::NoDiscoveryStarted.matches(&e) => {
                warn!("Stop discovery on {}: {} (treated as stopped)", self.address, e);
                Ok(true)
            }
            Err(e) => Err(TransportError::native("stop discovery", e)),
        }
    }

    /// Snapshot of the devices known to this adapter, ordered by address.
    ///
    /// Devices whose RSSI reads 0 have not been seen by the current discovery and are
    /// left out unless `include_silent_devices` is configured.
    pub fn devices(&self) -> Result<Vec<Device>, TransportError> {
        let natives = self
            .native()?
            .devices()
            .map_err(|e| TransportError::native("list adapter devices", e))?;

        let mut devices: Vec<Device> = natives
            .into_iter()
            .filter_map(|native| skip_stale(&self.address, self.wrap_device(native)).flatten())
            .collect();
        devices.sort_by(|a, b| a.address().cmp(b.address()));
        Ok(devices)
    }

    fn wrap_device(&self, native: Arc<dyn NativeDevice>) -> Result<Option<Device>, TransportError> {
        if !self.context.config.include_silent_devices {
            let rssi = native
                .rssi()
                .map_err(|e| TransportError::native("read device RSSI", e))?;
            if rssi == 0 {
                return Ok(None);
            }
        }
        let id = native
            .address()
            .map_err(|e| TransportError::native("read device address", e))?;
        let address = self.address.with_device(&id)?;
        Ok(Some(Device::new(address, native, Arc::clone(&self.context))))
    }

    pub fn enable_powered_notifications<L>(&self, listener: L) -> Result<(), TransportError>
    where
        L: Notification<bool>,
    {
        self.native.pinned(&self.address, |native| {
            self.powered.enable(
                &self.context.dispatcher,
                listener,
                |callback| native.enable_powered_notifications(callback),
                || native.disable_powered_notifications(),
            )
        })
    }

    pub fn disable_powered_notifications(&self) -> Result<(), TransportError> {
        self.native.pinned(&self.address, |native| {
            self.powered.disable(|| native.disable_powered_notifications())
        })
    }

    pub fn enable_discovering_notifications<L>(&self, listener: L) -> Result<(), TransportError>
    where
        L: Notification<bool>,
    {
        self.native.pinned(&self.address, |native| {
            self.discovering.enable(
                &self.context.dispatcher,
                listener,
                |callback| native.enable_discovering_notifications(callback),
                || native.disable_discovering_notifications(),
            )
        })
    }

    pub fn disable_discovering_notifications(&self) -> Result<(), TransportError> {
        self.native.pinned(&self.address, |native| {
            self.discovering
                .disable(|| native.disable_discovering_notifications())
        })
    }
}

impl BluetoothObject for Adapter {
    fn address(&self) -> &Address {
        &self.address
    }

    fn dispose(&self) {
        let released = self.native.take_with(|native| {
            self.powered.release(|| native.disable_powered_notifications());
            self.discovering
                .release(|| native.disable_discovering_notifications());
        });
        if released {
            debug!("Disposed adapter {}", self.address);
        }
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
