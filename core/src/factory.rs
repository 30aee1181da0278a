//! Address resolution and discovery snapshots
//!
//! The factory walks the native object hierarchy one level at a time (adapter, device,
//! service, characteristic). A missing level ends the walk with `None`; deeper levels
//! are never looked up.

use crate::address::{normalize_protocol, Address, Level};
use crate::config::TransportConfig;
use crate::dispatch::{Dispatcher, ShutdownMode};
use crate::entity::{Adapter, Characteristic, Device, Entity, EntityContext, Service};
use crate::error::TransportError;
use crate::native::{
    NativeAdapter, NativeCharacteristic, NativeDevice, NativeManager, NativeService,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable view of an adapter, detached from the native stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSummary {
    pub address: Address,
    pub name: String,
    pub alias: String,
}

/// Immutable view of a device, detached from the native stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub address: Address,
    pub name: String,
    pub alias: String,
    pub rssi: i16,
    pub device_class: u32,
    /// `device_class == 0`; dual-mode devices are reported as not low energy
    pub is_low_energy: bool,
}

/// Entry point of the transport layer for one native stack
pub struct Factory {
    manager: Arc<dyn NativeManager>,
    protocol: String,
    context: Arc<EntityContext>,
}

impl Factory {
    /// Create a factory with its own notification dispatcher
    pub fn new(manager: Arc<dyn NativeManager>, config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(&config.dispatcher)?);
        Self::with_dispatcher(manager, config, dispatcher)
    }

    /// Create a factory delivering notifications through an existing dispatcher
    pub fn with_dispatcher(
        manager: Arc<dyn NativeManager>,
        config: TransportConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let protocol = normalize_protocol(&manager.protocol_name())?;
        info!("Transport factory ready for protocol '{}'", protocol);
        Ok(Self {
            manager,
            protocol,
            context: EntityContext::new(dispatcher, config),
        })
    }

    /// Protocol name every address produced by this factory carries
    pub fn protocol_name(&self) -> &str {
        &self.protocol
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.context.dispatcher
    }

    /// Stop notification delivery. Entities created by this factory stay usable for
    /// synchronous calls; their notifications are dropped.
    pub fn shutdown(&self, mode: ShutdownMode) {
        info!("Shutting down transport factory for '{}'", self.protocol);
        self.context.dispatcher.shutdown(mode);
    }

    /// Apply named options. None are recognised by the base transport.
    pub fn configure(&self, options: &HashMap<String, String>) -> Result<(), TransportError> {
        for (key, value) in options {
            debug!("Ignoring unrecognised transport option {}={}", key, value);
        }
        Ok(())
    }

    /// Resolve an address to the entity it names.
    ///
    /// `Ok(None)` when any level of the hierarchy is missing, when the address belongs
    /// to another protocol, and for descriptor addresses.
    pub fn resolve(&self, address: &Address) -> Result<Option<Entity>, TransportError> {
        match address.level() {
            Level::Adapter => Ok(self.adapter(address)?.map(Entity::Adapter)),
            Level::Device => Ok(self.device(address)?.map(Entity::Device)),
            Level::Service => Ok(self.service(address)?.map(Entity::Service)),
            Level::Characteristic => Ok(self.characteristic(address)?.map(Entity::Characteristic)),
            Level::Descriptor => {
                debug!("Descriptors are not exposed, cannot resolve {}", address);
                Ok(None)
            }
        }
    }

    /// Look up the adapter of `address` (any address at or below adapter level)
    pub fn adapter(&self, address: &Address) -> Result<Option<Adapter>, TransportError> {
        Ok(self
            .find_adapter(address)?
            .map(|(address, native)| Adapter::new(address, native, Arc::clone(&self.context))))
    }

    /// Look up the device of `address` (any address at or below device level)
    pub fn device(&self, address: &Address) -> Result<Option<Device>, TransportError> {
        Ok(self
            .find_device(address)?
            .map(|(address, native)| Device::new(address, native, Arc::clone(&self.context))))
    }

    /// Look up the service of `address` (any address at or below service level)
    pub fn service(&self, address: &Address) -> Result<Option<Service>, TransportError> {
        Ok(self
            .find_service(address)?
            .map(|(address, native)| Service::new(address, native, Arc::clone(&self.context))))
    }

    /// Look up the characteristic of `address` (any address at or below characteristic level)
    pub fn characteristic(&self, address: &Address) -> Result<Option<Characteristic>, TransportError> {
        Ok(self.find_characteristic(address)?.map(|(address, native)| {
            Characteristic::new(address, native, Arc::clone(&self.context))
        }))
    }

    /// Snapshot of all adapters; adapters that go stale while being read are left out
    pub fn list_adapters(&self) -> Result<Vec<AdapterSummary>, TransportError> {
        let adapters = self
            .manager
            .adapters()
            .map_err(|e| TransportError::native("list adapters", e))?;

        Ok(adapters
            .iter()
            .filter_map(|native| match self.summarize_adapter(native.as_ref()) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("Skipping adapter during enumeration: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Snapshot of all devices across adapters; devices that go stale while being read
    /// are left out
    pub fn list_devices(&self) -> Result<Vec<DeviceSummary>, TransportError> {
        let devices = self
            .manager
            .devices()
            .map_err(|e| TransportError::native("list devices", e))?;

        Ok(devices
            .iter()
            .filter_map(|native| match self.summarize_device(native.as_ref()) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("Skipping device during enumeration: {}", e);
                    None
                }
            })
            .collect())
    }

    fn summarize_adapter(&self, native: &dyn NativeAdapter) -> Result<AdapterSummary, TransportError> {
        let id = native
            .address()
            .map_err(|e| TransportError::native("read adapter address", e))?;
        Ok(AdapterSummary {
            address: Address::adapter(&self.protocol, &id)?,
            name: native
                .name()
                .map_err(|e| TransportError::native("read adapter name", e))?,
            alias: native
                .alias()
                .map_err(|e| TransportError::native("read adapter alias", e))?,
        })
    }

    fn summarize_device(&self, native: &dyn NativeDevice) -> Result<DeviceSummary, TransportError> {
        let adapter_id = native
            .adapter_address()
            .map_err(|e| TransportError::native("read device adapter address", e))?;
        let id = native
            .address()
            .map_err(|e| TransportError::native("read device address", e))?;
        let device_class = native
            .bluetooth_class()
            .map_err(|e| TransportError::native("read bluetooth class", e))?;
        Ok(DeviceSummary {
            address: Address::adapter(&self.protocol, &adapter_id)?.with_device(&id)?,
            name: native
                .name()
                .map_err(|e| TransportError::native("read device name", e))?,
            alias: native
                .alias()
                .map_err(|e| TransportError::native("read device alias", e))?,
            rssi: native
                .rssi()
                .map_err(|e| TransportError::native("read RSSI", e))?,
            device_class,
            is_low_energy: device_class == 0,
        })
    }

    fn speaks(&self, address: &Address) -> bool {
        if address.protocol() != self.protocol {
            debug!(
                "Address {} belongs to another protocol than '{}'",
                address, self.protocol
            );
            return false;
        }
        true
    }

    fn find_adapter(
        &self,
        address: &Address,
    ) -> Result<Option<(Address, Arc<dyn NativeAdapter>)>, TransportError> {
        let Some(target) = address.at_level(Level::Adapter) else {
            return Ok(None);
        };
        if !self.speaks(&target) {
            return Ok(None);
        }
        match self
            .manager
            .find_adapter(target.adapter_id())
            .map_err(|e| TransportError::native("find adapter", e))?
        {
            Some(native) => Ok(Some((target, native))),
            None => {
                debug!("Adapter {} not found", target);
                Ok(None)
            }
        }
    }

    fn find_device(
        &self,
        address: &Address,
    ) -> Result<Option<(Address, Arc<dyn NativeDevice>)>, TransportError> {
        let Some(target) = address.at_level(Level::Device) else {
            return Ok(None);
        };
        let (Some((_, adapter)), Some(id)) = (self.find_adapter(&target)?, target.device_id())
        else {
            return Ok(None);
        };
        match adapter
            .find_device(id)
            .map_err(|e| TransportError::native("find device", e))?
        {
            Some(native) => Ok(Some((target, native))),
            None => {
                debug!("Device {} not found", target);
                Ok(None)
            }
        }
    }

    fn find_service(
        &self,
        address: &Address,
    ) -> Result<Option<(Address, Arc<dyn NativeService>)>, TransportError> {
        let Some(target) = address.at_level(Level::Service) else {
            return Ok(None);
        };
        let (Some((_, device)), Some(uuid)) = (self.find_device(&target)?, target.service_uuid())
        else {
            return Ok(None);
        };
        match device
            .find_service(uuid)
            .map_err(|e| TransportError::native("find service", e))?
        {
            Some(native) => Ok(Some((target, native))),
            None => {
                debug!("Service {} not found", target);
                Ok(None)
            }
        }
    }

    fn find_characteristic(
        &self,
        address: &Address,
    ) -> Result<Option<(Address, Arc<dyn NativeCharacteristic>)>, TransportError> {
        let Some(target) = address.at_level(Level::Characteristic) else {
            return Ok(None);
        };
        let (Some((_, service)), Some(uuid)) =
            (self.find_service(&target)?, target.characteristic_uuid())
        else {
            return Ok(None);
        };
        match service
            .find_characteristic(uuid)
            .map_err(|e| TransportError::native("find characteristic", e))?
        {
            Some(native) => Ok(Some((target, native))),
            None => {
                debug!("Characteristic {} not found", target);
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::BluetoothObject;
    use crate::native::{MockNativeAdapter, MockNativeDevice, MockNativeManager, NativeError};
    use mockall::predicate::eq;

    const ADAPTER: &str = "00:1A:7D:DA:71:13";
    const DEVICE: &str = "D4:CA:6E:01:02:03";
    const SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
    const CHARACTERISTIC: &str = "00002a19-0000-1000-8000-00805f9b34fb";

    fn manager() -> MockNativeManager {
        let mut manager = MockNativeManager::new();
        manager
            .expect_protocol_name()
            .returning(|| "TinyB".to_string());
        manager
    }

    fn factory(manager: MockNativeManager) -> Factory {
        Factory::new(Arc::new(manager), TransportConfig::default()).expect("Factory")
    }

    fn characteristic_address() -> Address {
        format!("tinyb://{}/{}/{}/{}", ADAPTER, DEVICE, SERVICE, CHARACTERISTIC)
            .parse()
            .expect("Valid")
    }

    #[test]
    fn test_missing_device_short_circuits() {
        let mut adapter = MockNativeAdapter::new();
        adapter
            .expect_find_device()
            .with(eq(DEVICE))
            .times(2)
            .returning(|_| Ok(None));
        let adapter: Arc<dyn NativeAdapter> = Arc::new(adapter);

        let mut manager = manager();
        manager
            .expect_find_adapter()
            .with(eq(ADAPTER))
            .times(2)
            .returning(move |_| Ok(Some(Arc::clone(&adapter))));
        let factory = factory(manager);

        let device_address = characteristic_address()
            .at_level(Level::Device)
            .expect("Device level");
        assert!(factory.resolve(&device_address).expect("Resolve").is_none());
        assert!(factory
            .resolve(&characteristic_address())
            .expect("Resolve")
            .is_none());
    }

    #[test]
    fn test_missing_adapter_short_circuits() {
        let mut manager = manager();
        manager
            .expect_find_adapter()
            .times(1)
            .returning(|_| Ok(None));
        let factory = factory(manager);

        assert!(factory
            .resolve(&characteristic_address())
            .expect("Resolve")
            .is_none());
    }

    #[test]
    fn test_resolve_device_projects_address() {
        let mut device = MockNativeDevice::new();
        device.expect_find_service().never();
        let device: Arc<dyn NativeDevice> = Arc::new(device);

        let mut adapter = MockNativeAdapter::new();
        adapter
            .expect_find_device()
            .returning(move |_| Ok(Some(Arc::clone(&device))));
        let adapter: Arc<dyn NativeAdapter> = Arc::new(adapter);

        let mut manager = manager();
        manager
            .expect_find_adapter()
            .returning(move |_| Ok(Some(Arc::clone(&adapter))));
        let factory = factory(manager);

        let device = factory
            .device(&characteristic_address())
            .expect("Lookup")
            .expect("Device");

        assert_eq!(
            device.address().to_string(),
            format!("tinyb://{}/{}", ADAPTER, DEVICE)
        );
    }

    #[test]
    fn test_foreign_protocol_and_descriptor_resolve_to_none() {
        let mut manager = manager();
        manager.expect_find_adapter().never();
        let factory = factory(manager);

        let foreign = Address::adapter("bluegiga", ADAPTER).expect("Valid");
        let descriptor = characteristic_address()
            .with_descriptor("00002902-0000-1000-8000-00805f9b34fb")
            .expect("Valid");

        assert!(factory.resolve(&foreign).expect("Resolve").is_none());
        assert!(factory.resolve(&descriptor).expect("Resolve").is_none());
        assert_eq!(factory.protocol_name(), "tinyb");
    }

    #[test]
    fn test_lookup_failure_surfaces() {
        let mut manager = manager();
        manager
            .expect_find_adapter()
            .returning(|_| Err(NativeError::new("org.freedesktop.DBus.Error.NoReply")));
        let factory = factory(manager);

        let err = factory
            .resolve(&characteristic_address())
            .expect_err("Native failure");

        assert!(matches!(err, TransportError::Native { operation: "find adapter", .. }));
    }

    #[test]
    fn test_list_devices_skips_stale_entries() {
        let mut live = MockNativeDevice::new();
        live.expect_adapter_address()
            .returning(|| Ok(ADAPTER.to_string()));
        live.expect_address().returning(|| Ok(DEVICE.to_string()));
        live.expect_bluetooth_class().returning(|| Ok(0));
        live.expect_name().returning(|| Ok("Thermometer".to_string()));
        live.expect_alias().returning(|| Ok("Kitchen".to_string()));
        live.expect_rssi().returning(|| Ok(-58));

        let mut stale = MockNativeDevice::new();
        stale
            .expect_adapter_address()
            .returning(|| Err(NativeError::new("org.freedesktop.DBus.Error.UnknownObject")));

        let devices: Vec<Arc<dyn NativeDevice>> = vec![Arc::new(stale), Arc::new(live)];
        let mut manager = manager();
        manager
            .expect_devices()
            .return_once(move || Ok(devices));
        let factory = factory(manager);

        let summaries = factory.list_devices().expect("Devices");

        assert_eq!(
            summaries,
            vec![DeviceSummary {
                address: format!("tinyb://{}/{}", ADAPTER, DEVICE).parse().expect("Valid"),
                name: "Thermometer".to_string(),
                alias: "Kitchen".to_string(),
                rssi: -58,
                device_class: 0,
                is_low_energy: true,
            }]
        );
    }

    #[test]
    fn test_enumeration_failure_surfaces() {
        let mut manager = manager();
        manager
            .expect_adapters()
            .returning(|| Err(NativeError::new("org.bluez.Error.NotReady")));
        let factory = factory(manager);

        assert!(factory.list_adapters().is_err());
    }

    #[test]
    fn test_configure_ignores_options() {
        let factory = factory(manager());
        let options = HashMap::from([("linux.gattTimeout".to_string(), "30".to_string())]);

        assert!(factory.configure(&options).is_ok());
    }

    #[test]
    fn test_invalid_protocol_name_rejected() {
        let mut manager = MockNativeManager::new();
        manager
            .expect_protocol_name()
            .returning(|| "tiny b".to_string());

        assert!(matches!(
            Factory::new(Arc::new(manager), TransportConfig::default()),
            Err(TransportError::InvalidNativeIdentifier(_))
        ));
    }
}
