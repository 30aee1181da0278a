//! Remote peer

use super::{skip_stale, BluetoothObject, EntityContext, NativeHandle, Service};
use crate::address::Address;
use crate::error::TransportError;
use crate::native::{NativeDevice, NativeService};
use crate::notification::{Notification, PropertyKind, Subscription};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Device {
    address: Address,
    native: NativeHandle<dyn NativeDevice>,
    context: Arc<EntityContext>,
    blocked: Subscription,
    rssi: Subscription,
    connected: Subscription,
    services_resolved: Subscription,
}

impl Device {
    pub(crate) fn new(
        address: Address,
        native: Arc<dyn NativeDevice>,
        context: Arc<EntityContext>,
    ) -> Self {
        Self {
            blocked: Subscription::new(address.clone(), PropertyKind::Blocked),
            rssi: Subscription::new(address.clone(), PropertyKind::Rssi),
            connected: Subscription::new(address.clone(), PropertyKind::Connected),
            services_resolved: Subscription::new(address.clone(), PropertyKind::ServicesResolved),
            native: NativeHandle::new(native),
            address,
            context,
        }
    }

    fn native(&self) -> Result<Arc<dyn NativeDevice>, TransportError> {
        self.native.get(&self.address)
    }

    pub fn name(&self) -> Result<String, TransportError> {
        self.native()?
            .name()
            .map_err(|e| TransportError::native("read device name", e))
    }

    pub fn alias(&self) -> Result<String, TransportError> {
        self.native()?
            .alias()
            .map_err(|e| TransportError::native("read device alias", e))
    }

    pub fn set_alias(&self, alias: &str) -> Result<(), TransportError> {
        self.native()?
            .set_alias(alias)
            .map_err(|e| TransportError::native("set device alias", e))
    }

    pub fn bluetooth_class(&self) -> Result<u32, TransportError> {
        self.native()?
            .bluetooth_class()
            .map_err(|e| TransportError::native("read bluetooth class", e))
    }

    /// Whether the device looks like a Low Energy peripheral.
    ///
    /// Heuristic: BLE-only devices advertise no class of device, so a class of 0 is
    /// taken to mean BLE. Dual-mode devices are reported as not BLE.
    pub fn is_ble_enabled(&self) -> Result<bool, TransportError> {
        Ok(self.bluetooth_class()? == 0)
    }

    pub fn is_blocked(&self) -> Result<bool, TransportError> {
        self.native()?
            .is_blocked()
            .map_err(|e| TransportError::native("read blocked state", e))
    }

    pub fn set_blocked(&self, blocked: bool) -> Result<(), TransportError> {
        self.native()?
            .set_blocked(blocked)
            .map_err(|e| TransportError::native("set blocked state", e))
    }

    /// Signal strength in dBm, 0 when the device was not seen by the current discovery
    pub fn rssi(&self) -> Result<i16, TransportError> {
        self.native()?
            .rssi()
            .map_err(|e| TransportError::native("read RSSI", e))
    }

    pub fn tx_power(&self) -> Result<i16, TransportError> {
        self.native()?
            .tx_power()
            .map_err(|e| TransportError::native("read TX power", e))
    }

    pub fn is_connected(&self) -> Result<bool, TransportError> {
        self.native()?
            .is_connected()
            .map_err(|e| TransportError::native("read connected state", e))
    }

    /// Connect to the device; blocks for the duration of the native connection attempt
    pub fn connect(&self) -> Result<bool, TransportError> {
        let connected = self
            .native()?
            .connect()
            .map_err(|e| TransportError::native("connect", e))?;
        if connected {
            info!("Connected to {}", self.address);
        }
        Ok(connected)
    }

    pub fn disconnect(&self) -> Result<bool, TransportError> {
        let disconnected = self
            .native()?
            .disconnect()
            .map_err(|e| TransportError::native("disconnect", e))?;
        if disconnected {
            info!("Disconnected from {}", self.address);
        }
        Ok(disconnected)
    }

    pub fn is_services_resolved(&self) -> Result<bool, TransportError> {
        self.native()?
            .is_services_resolved()
            .map_err(|e| TransportError::native("read services resolved state", e))
    }

    /// Snapshot of the GATT services, ordered by address.
    ///
    /// Empty until service discovery has completed.
    pub fn services(&self) -> Result<Vec<Service>, TransportError> {
        let native = self.native()?;
        let resolved = native
            .is_services_resolved()
            .map_err(|e| TransportError::native("read services resolved state", e))?;
        if !resolved {
            debug!("Services of {} are not resolved yet", self.address);
            return Ok(Vec::new());
        }

        let natives = native
            .services()
            .map_err(|e| TransportError::native("list device services", e))?;
        let mut services: Vec<Service> = natives
            .into_iter()
            .filter_map(|native| skip_stale(&self.address, self.wrap_service(native)))
            .collect();
        services.sort_by(|a, b| a.address().cmp(b.address()));
        Ok(services)
    }

    fn wrap_service(&self, native: Arc<dyn NativeService>) -> Result<Service, TransportError> {
        let uuid = native
            .uuid()
            .map_err(|e| TransportError::native("read service UUID", e))?;
        let address = self.address.with_service(&uuid)?;
        Ok(Service::new(address, native, Arc::clone(&self.context)))
    }

    pub fn enable_blocked_notifications<L>(&self, listener: L) -> Result<(), TransportError>
    where
        L: Notification<bool>,
    {
        self.native.pinned(&self.address, |native| {
            self.blocked.enable(
                &self.context.dispatcher,
                listener,
                |callback| native.enable_blocked_notifications(callback),
                || native.disable_blocked_notifications(),
            )
        })
    }

    pub fn disable_blocked_notifications(&self) -> Result<(), TransportError> {
        self.native.pinned(&self.address, |native| {
            self.blocked.disable(|| native.disable_blocked_notifications())
        })
    }

    pub fn enable_rssi_notifications<L>(&self, listener: L) -> Result<(), TransportError>
    where
        L: Notification<i16>,
    {
        self.native.pinned(&self.address, |native| {
            self.rssi.enable(
                &self.context.dispatcher,
                listener,
                |callback| native.enable_rssi_notifications(callback),
                || native.disable_rssi_notifications(),
            )
        })
    }

    pub fn disable_rssi_notifications(&self) -> Result<(), TransportError> {
        self.native.pinned(&self.address, |native| {
            self.rssi.disable(|| native.disable_rssi_notifications())
        })
    }

    pub fn enable_connected_notifications<L>(&self, listener: L) -> Result<(), TransportError>
    where
        L: Notification<bool>,
    {
        self.native.pinned(&self.address, |native| {
            self.connected.enable(
                &self.context.dispatcher,
                listener,
                |callback| native.enable_connected_notifications(callback),
                || native.disable_connected_notifications(),
            )
        })
    }

    pub fn disable_connected_notifications(&self) -> Result<(), TransportError> {
        self.native.pinned(&self.address, |native| {
            self.connected.disable(|| native.disable_connected_notifications())
        })
    }

    pub fn enable_services_resolved_notifications<L>(&self, listener: L) -> Result<(), TransportError>
    where
        L: Notification<bool>,
    {
        self.native.pinned(&self.address, |native| {
            self.services_resolved.enable(
                &self.context.dispatcher,
                listener,
                |callback| native.enable_services_resolved_notifications(callback),
                || native.disable_services_resolved_notifications(),
            )
        })
    }

    pub fn disable_services_resolved_notifications(&self) -> Result<(), TransportError> {
        self.native.pinned(&self.address, |native| {
            self.services_resolved
                .disable(|| native.disable_services_resolved_notifications())
        })
    }
}

impl BluetoothObject for Device {
    fn address(&self) -> &Address {
        &self.address
    }

    fn dispose(&self) {
        let released = self.native.take_with(|native| {
            self.blocked.release(|| native.disable_blocked_notifications());
            self.rssi.release(|| native.disable_rssi_notifications());
            self.connected.release(|| native.disable_connected_notifications());
            self.services_resolved
                .release(|| native.disable_services_resolved_notifications());
        });
        if released {
            debug!("Disposed device {}", self.address);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::entity::test_context;
    use crate::native::{MockNativeDevice, MockNativeService, NativeCallback};
    use crate::notification::from_fn;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    const SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";

    fn device(native: MockNativeDevice) -> Device {
        let address = Address::adapter("tinyb", "11:22:33:44:55:66")
            .and_then(|a| a.with_device("12:34:56:78:90:12"))
            .expect("Valid");
        Device::new(address, Arc::new(native), test_context(TransportConfig::default()))
    }

    #[test]
    fn test_ble_heuristic_uses_class_of_device() {
        let mut native = MockNativeDevice::new();
        native.expect_bluetooth_class().returning(|| Ok(0));

        assert!(device(native).is_ble_enabled().expect("Class"));

        let mut native = MockNativeDevice::new();
        native.expect_bluetooth_class().returning(|| Ok(0x240404));

        assert!(!device(native).is_ble_enabled().expect("Class"));
    }

    #[test]
    fn test_unresolved_device_has_no_services() {
        let mut native = MockNativeDevice::new();
        native.expect_is_services_resolved().returning(|| Ok(false));
        native.expect_services().never();

        assert!(device(native).services().expect("Services").is_empty());
    }

    #[test]
    fn test_services_are_addressed_under_device() {
        let mut native = MockNativeDevice::new();
        native.expect_is_services_resolved().returning(|| Ok(true));
        native.expect_services().returning(|| {
            let mut service = MockNativeService::new();
            service
                .expect_uuid()
                .returning(|| Ok(SERVICE.to_uppercase()));
            let service: Arc<dyn NativeService> = Arc::new(service);
            Ok(vec![service])
        });

        let device = device(native);
        let services = device.services().expect("Services");

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].address().parent().as_ref(), Some(device.address()));
        assert_eq!(services[0].address().service_uuid(), Some(SERVICE));
    }

    #[test]
    fn test_rssi_notifications_delivered() {
        let slot: Arc<Mutex<Option<NativeCallback<i16>>>> = Arc::new(Mutex::new(None));
        let mut native = MockNativeDevice::new();
        let register_slot = Arc::clone(&slot);
        native
            .expect_enable_rssi_notifications()
            .times(1)
            .returning(move |callback| {
                *register_slot.lock() = Some(callback);
                Ok(())
            });
        native
            .expect_disable_rssi_notifications()
            .times(1)
            .returning(|| Ok(()));

        let device = device(native);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        device
            .enable_rssi_notifications(from_fn(move |rssi: i16| {
                tx.lock().send(rssi)?;
                Ok(())
            }))
            .expect("Enable");
        if let Some(callback) = slot.lock().as_ref() {
            callback(-67);
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(-67));
        device.disable_rssi_notifications().expect("Disable");
        device.dispose();
    }
}
