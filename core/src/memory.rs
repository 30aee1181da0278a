//! In-memory native stack
//!
//! A thread-safe, in-process implementation of the native collaborator traits. It keeps
//! an adapter/device/service/characteristic tree, invokes registered callbacks when a
//! property is fired, counts native calls and callback (de)registrations, and can inject
//! failures or mark objects as removed to simulate stale handles.
//!
//! Failures use the same message texts BlueZ reports, so the known quirks are
//! recognised exactly as they would be on a real stack.

use crate::native::{
    NativeAdapter, NativeCallback, NativeCharacteristic, NativeDevice, NativeError,
    NativeManager, NativeService,
};
use crate::notification::PropertyKind;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicUsize, Ordering};
use std::sync::Arc;

/// Reported by every call on an object that has been removed
pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject: Object does not exist";

/// Reported by `stop_discovery` on an adapter that is not discovering
pub const NO_DISCOVERY_STARTED: &str = "org.bluez.Error.Failed: No discovery started";

// ============================================================================
// SHARED STATE
// ============================================================================

/// Removal flag, injected faults and call counters of one native object
#[derive(Default)]
struct ObjectState {
    removed: AtomicBool,
    faults: Mutex<HashMap<String, String>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ObjectState {
    /// Record a call and fail it if the object is gone or a fault is injected
    fn check(&self, operation: &str) -> Result<(), NativeError> {
        *self.calls.lock().entry(operation.to_string()).or_insert(0) += 1;
        if self.removed.load(Ordering::Acquire) {
            return Err(NativeError::new(UNKNOWN_OBJECT));
        }
        match self.faults.lock().get(operation) {
            Some(message) => Err(NativeError::new(message.clone())),
            None => Ok(()),
        }
    }

    fn inject_fault(&self, operation: &str, message: &str) {
        self.faults
            .lock()
            .insert(operation.to_string(), message.to_string());
    }

    fn clear_fault(&self, operation: &str) {
        self.faults.lock().remove(operation);
    }

    fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    fn remove(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

/// Registration history of one observable property
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackStats {
    /// A callback is currently registered
    pub registered: bool,
    /// Number of `enable_*_notifications` calls that succeeded
    pub registrations: usize,
    /// Number of `disable_*_notifications` calls that succeeded
    pub deregistrations: usize,
}

/// Callback registered for one property; a new registration replaces the old one
struct CallbackSlot<T> {
    callback: Mutex<Option<Arc<dyn Fn(T) + Send + Sync>>>,
    registrations: AtomicUsize,
    deregistrations: AtomicUsize,
}

impl<T> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self {
            callback: Mutex::new(None),
            registrations: AtomicUsize::new(0),
            deregistrations: AtomicUsize::new(0),
        }
    }
}

impl<T> CallbackSlot<T> {
    fn register(&self, callback: NativeCallback<T>) {
        *self.callback.lock() = Some(Arc::from(callback));
        self.registrations.fetch_add(1, Ordering::SeqCst);
    }

    fn deregister(&self) {
        self.callback.lock().take();
        self.deregistrations.fetch_add(1, Ordering::SeqCst);
    }

    /// Invoke the registered callback on the calling thread; false when none is registered
    fn fire(&self, value: T) -> bool {
        // cloned out so the callback may re-enter the slot
        let callback = self.callback.lock().clone();
        match callback {
            Some(callback) => {
                callback(value);
                true
            }
            None => false,
        }
    }

    fn stats(&self) -> CallbackStats {
        CallbackStats {
            registered: self.callback.lock().is_some(),
            registrations: self.registrations.load(Ordering::SeqCst),
            deregistrations: self.deregistrations.load(Ordering::SeqCst),
        }
    }
}

fn find_by_id<T: ?Sized>(
    items: &[Arc<T>],
    id: &str,
    id_of: impl Fn(&T) -> &str,
) -> Option<Arc<T>> {
    items
        .iter()
        .find(|item| {
            let item: &T = item;
            id_of(item).eq_ignore_ascii_case(id)
        })
        .cloned()
}

// ============================================================================
// MANAGER
// ============================================================================

/// Root of the in-memory stack
pub struct MemoryManager {
    protocol: String,
    adapters: RwLock<Vec<Arc<MemoryAdapter>>>,
    state: ObjectState,
}

impl MemoryManager {
    pub fn new(protocol: &str) -> Arc<Self> {
        Arc::new(Self {
            protocol: protocol.to_string(),
            adapters: RwLock::new(Vec::new()),
            state: ObjectState::default(),
        })
    }

    pub fn add_adapter(&self, adapter: MemoryAdapter) -> Arc<MemoryAdapter> {
        let adapter = Arc::new(adapter);
        self.adapters.write().push(Arc::clone(&adapter));
        adapter
    }

    /// Take an adapter out of the tree; existing handles become stale
    pub fn detach_adapter(&self, address: &str) -> Option<Arc<MemoryAdapter>> {
        let mut adapters = self.adapters.write();
        let index = adapters
            .iter()
            .position(|a| a.address.eq_ignore_ascii_case(address))?;
        let adapter = adapters.remove(index);
        adapter.remove();
        Some(adapter)
    }

    pub fn inject_fault(&self, operation: &str, message: &str) {
        self.state.inject_fault(operation, message);
    }

    pub fn clear_fault(&self, operation: &str) {
        self.state.clear_fault(operation);
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state.call_count(operation)
    }
}

impl NativeManager for MemoryManager {
    fn protocol_name(&self) -> String {
        self.protocol.clone()
    }

    fn adapters(&self) -> Result<Vec<Arc<dyn NativeAdapter>>, NativeError> {
        self.state.check("adapters")?;
        Ok(self
            .adapters
            .read()
            .iter()
            .map(|a| Arc::clone(a) as Arc<dyn NativeAdapter>)
            .collect())
    }

    fn devices(&self) -> Result<Vec<Arc<dyn NativeDevice>>, NativeError> {
        self.state.check("devices")?;
        Ok(self
            .adapters
            .read()
            .iter()
            .flat_map(|a| a.devices.read().clone())
            .map(|d| d as Arc<dyn NativeDevice>)
            .collect())
    }

    fn find_adapter(&self, adapter_id: &str) -> Result<Option<Arc<dyn NativeAdapter>>, NativeError> {
        self.state.check("find_adapter")?;
        Ok(find_by_id(self.adapters.read().as_slice(), adapter_id, |a| a.address.as_str())
            .map(|a| a as Arc<dyn NativeAdapter>))
    }
}

// ============================================================================
// ADAPTER
// ============================================================================

pub struct MemoryAdapter {
    address: String,
    name: String,
    alias: RwLock<String>,
    powered: AtomicBool,
    discovering: AtomicBool,
    rssi_filter: Mutex<Option<i16>>,
    devices: RwLock<Vec<Arc<MemoryDevice>>>,
    powered_callback: CallbackSlot<bool>,
    discovering_callback: CallbackSlot<bool>,
    state: ObjectState,
}

impl MemoryAdapter {
    /// A powered adapter that is not discovering
    pub fn new(address: &str, name: &str) -> Self {
        Self {
            address: address.to_string(),
            name: name.to_string(),
            alias: RwLock::new(name.to_string()),
            powered: AtomicBool::new(true),
            discovering: AtomicBool::new(false),
            rssi_filter: Mutex::new(None),
            devices: RwLock::new(Vec::new()),
            powered_callback: CallbackSlot::default(),
            discovering_callback: CallbackSlot::default(),
            state: ObjectState::default(),
        }
    }

    pub fn add_device(&self, mut device: MemoryDevice) -> Arc<MemoryDevice> {
        device.adapter_address = self.address.clone();
        let device = Arc::new(device);
        self.devices.write().push(Arc::clone(&device));
        device
    }

    /// Take a device out of the tree; existing handles become stale
    pub fn detach_device(&self, address: &str) -> Option<Arc<MemoryDevice>> {
        let mut devices = self.devices.write();
        let index = devices
            .iter()
            .position(|d| d.address.eq_ignore_ascii_case(address))?;
        let device = devices.remove(index);
        device.remove();
        Some(device)
    }

    /// Mark this adapter as gone while leaving it listed by its parent
    pub fn remove(&self) {
        self.state.remove();
    }

    /// RSSI discovery filter last applied
    pub fn rssi_filter(&self) -> Option<i16> {
        *self.rssi_filter.lock()
    }

    pub fn fire_powered(&self, powered: bool) -> bool {
        self.powered_callback.fire(powered)
    }

    pub fn fire_discovering(&self, discovering: bool) -> bool {
        self.discovering_callback.fire(discovering)
    }

    pub fn callback_stats(&self, property: PropertyKind) -> CallbackStats {
        match property {
            PropertyKind::Powered => self.powered_callback.stats(),
            PropertyKind::Discovering => self.discovering_callback.stats(),
            _ => CallbackStats::default(),
        }
    }

    pub fn inject_fault(&self, operation: &str, message: &str) {
        self.state.inject_fault(operation, message);
    }

    pub fn clear_fault(&self, operation: &str) {
        self.state.clear_fault(operation);
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state.call_count(operation)
    }
}

impl NativeAdapter for MemoryAdapter {
    fn address(&self) -> Result<String, NativeError> {
        self.state.check("address")?;
        Ok(self.address.clone())
    }

    fn name(&self) -> Result<String, NativeError> {
        self.state.check("name")?;
        Ok(self.name.clone())
    }

    fn alias(&self) -> Result<String, NativeError> {
        self.state.check("alias")?;
        Ok(self.alias.read().clone())
    }

    fn set_alias(&self, alias: &str) -> Result<(), NativeError> {
        self.state.check("set_alias")?;
        *self.alias.write() = alias.to_string();
        Ok(())
    }

    fn is_powered(&self) -> Result<bool, NativeError> {
        self.state.check("is_powered")?;
        Ok(self.powered.load(Ordering::SeqCst))
    }

    fn set_powered(&self, powered: bool) -> Result<(), NativeError> {
        self.state.check("set_powered")?;
        if self.powered.swap(powered, Ordering::SeqCst) != powered {
            self.powered_callback.fire(powered);
        }
        Ok(())
    }

    fn is_discovering(&self) -> Result<bool, NativeError> {
        self.state.check("is_discovering")?;
        Ok(self.discovering.load(Ordering::SeqCst))
    }

    fn set_rssi_discovery_filter(&self, rssi: i16) -> Result<(), NativeError> {
        self.state.check("set_rssi_discovery_filter")?;
        *self.rssi_filter.lock() = Some(rssi);
        Ok(())
    }

    fn start_discovery(&self) -> Result<bool, NativeError> {
        self.state.check("start_discovery")?;
        if !self.discovering.swap(true, Ordering::SeqCst) {
            self.discovering_callback.fire(true);
        }
        Ok(true)
    }

    fn stop_discovery(&self) -> Result<bool, NativeError> {
        self.state.check("stop_discovery")?;
        if !self.discovering.swap(false, Ordering::SeqCst) {
            return Err(NativeError::new(NO_DISCOVERY_STARTED));
        }
        self.discovering_callback.fire(false);
        Ok(true)
    }

    fn devices(&self) -> Result<Vec<Arc<dyn NativeDevice>>, NativeError> {
        self.state.check("devices")?;
        Ok(self
            .devices
            .read()
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn NativeDevice>)
            .collect())
    }

    fn find_device(&self, device_id: &str) -> Result<Option<Arc<dyn NativeDevice>>, NativeError> {
        self.state.check("find_device")?;
        Ok(find_by_id(self.devices.read().as_slice(), device_id, |d| d.address.as_str())
            .map(|d| d as Arc<dyn NativeDevice>))
    }

    fn enable_powered_notifications(&self, callback: NativeCallback<bool>) -> Result<(), NativeError> {
        self.state.check("enable_powered_notifications")?;
        self.powered_callback.register(callback);
        Ok(())
    }

    fn disable_powered_notifications(&self) -> Result<(), NativeError> {
        self.state.check("disable_powered_notifications")?;
        self.powered_callback.deregister();
        Ok(())
    }

    fn enable_discovering_notifications(
        &self,
        callback: NativeCallback<bool>,
    ) -> Result<(), NativeError> {
        self.state.check("enable_discovering_notifications")?;
        self.discovering_callback.register(callback);
        Ok(())
    }

    fn disable_discovering_notifications(&self) -> Result<(), NativeError> {
        self.state.check("disable_discovering_notifications")?;
        self.discovering_callback.deregister();
        Ok(())
    }
}

// ============================================================================
// DEVICE
// ============================================================================

pub struct MemoryDevice {
    address: String,
    adapter_address: String,
    name: String,
    alias: RwLock<String>,
    bluetooth_class: u32,
    blocked: AtomicBool,
    rssi: AtomicI16,
    tx_power: i16,
    connected: AtomicBool,
    services_resolved: AtomicBool,
    services: RwLock<Vec<Arc<MemoryService>>>,
    blocked_callback: CallbackSlot<bool>,
    rssi_callback: CallbackSlot<i16>,
    connected_callback: CallbackSlot<bool>,
    services_resolved_callback: CallbackSlot<bool>,
    state: ObjectState,
}

impl MemoryDevice {
    /// A BLE device (class 0) in range at -60 dBm, disconnected
    pub fn new(address: &str, name: &str) -> Self {
        Self {
            address: address.to_string(),
            adapter_address: String::new(),
            name: name.to_string(),
            alias: RwLock::new(name.to_string()),
            bluetooth_class: 0,
            blocked: AtomicBool::new(false),
            rssi: AtomicI16::new(-60),
            tx_power: 0,
            connected: AtomicBool::new(false),
            services_resolved: AtomicBool::new(false),
            services: RwLock::new(Vec::new()),
            blocked_callback: CallbackSlot::default(),
            rssi_callback: CallbackSlot::default(),
            connected_callback: CallbackSlot::default(),
            services_resolved_callback: CallbackSlot::default(),
            state: ObjectState::default(),
        }
    }

    pub fn with_bluetooth_class(mut self, class: u32) -> Self {
        self.bluetooth_class = class;
        self
    }

    pub fn with_rssi(self, rssi: i16) -> Self {
        self.rssi.store(rssi, Ordering::SeqCst);
        self
    }

    pub fn with_tx_power(mut self, tx_power: i16) -> Self {
        self.tx_power = tx_power;
        self
    }

    /// Start with service discovery already completed
    pub fn resolved(self) -> Self {
        self.services_resolved.store(true, Ordering::SeqCst);
        self
    }

    pub fn add_service(&self, service: MemoryService) -> Arc<MemoryService> {
        let service = Arc::new(service);
        self.services.write().push(Arc::clone(&service));
        service
    }

    pub fn set_rssi(&self, rssi: i16) {
        self.rssi.store(rssi, Ordering::SeqCst);
    }

    pub fn set_services_resolved(&self, resolved: bool) {
        if self.services_resolved.swap(resolved, Ordering::SeqCst) != resolved {
            self.services_resolved_callback.fire(resolved);
        }
    }

    /// Mark this device as gone while leaving it listed by its adapter
    pub fn remove(&self) {
        self.state.remove();
    }

    pub fn fire_blocked(&self, blocked: bool) -> bool {
        self.blocked_callback.fire(blocked)
    }

    pub fn fire_rssi(&self, rssi: i16) -> bool {
        self.rssi_callback.fire(rssi)
    }

    pub fn fire_connected(&self, connected: bool) -> bool {
        self.connected_callback.fire(connected)
    }

    pub fn fire_services_resolved(&self, resolved: bool) -> bool {
        self.services_resolved_callback.fire(resolved)
    }

    pub fn callback_stats(&self, property: PropertyKind) -> CallbackStats {
        match property {
            PropertyKind::Blocked => self.blocked_callback.stats(),
            PropertyKind::Rssi => self.rssi_callback.stats(),
            PropertyKind::Connected => self.connected_callback.stats(),
            PropertyKind::ServicesResolved => self.services_resolved_callback.stats(),
            _ => CallbackStats::default(),
        }
    }

    pub fn inject_fault(&self, operation: &str, message: &str) {
        self.state.inject_fault(operation, message);
    }

    pub fn clear_fault(&self, operation: &str) {
        self.state.clear_fault(operation);
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state.call_count(operation)
    }
}

impl NativeDevice for MemoryDevice {
    fn address(&self) -> Result<String, NativeError> {
        self.state.check("address")?;
        Ok(self.address.clone())
    }

    fn adapter_address(&self) -> Result<String, NativeError> {
        self.state.check("adapter_address")?;
        Ok(self.adapter_address.clone())
    }

    fn name(&self) -> Result<String, NativeError> {
        self.state.check("name")?;
        Ok(self.name.clone())
    }

    fn alias(&self) -> Result<String, NativeError> {
        self.state.check("alias")?;
        Ok(self.alias.read().clone())
    }

    fn set_alias(&self, alias: &str) -> Result<(), NativeError> {
        self.state.check("set_alias")?;
        *self.alias.write() = alias.to_string();
        Ok(())
    }

    fn bluetooth_class(&self) -> Result<u32, NativeError> {
        self.state.check("bluetooth_class")?;
        Ok(self.bluetooth_class)
    }

    fn is_blocked(&self) -> Result<bool, NativeError> {
        self.state.check("is_blocked")?;
        Ok(self.blocked.load(Ordering::SeqCst))
    }

    fn set_blocked(&self, blocked: bool) -> Result<(), NativeError> {
        self.state.check("set_blocked")?;
        if self.blocked.swap(blocked, Ordering::SeqCst) != blocked {
            self.blocked_callback.fire(blocked);
        }
        Ok(())
    }

    fn rssi(&self) -> Result<i16, NativeError> {
        self.state.check("rssi")?;
        Ok(self.rssi.load(Ordering::SeqCst))
    }

    fn tx_power(&self) -> Result<i16, NativeError> {
        self.state.check("tx_power")?;
        Ok(self.tx_power)
    }

    fn is_connected(&self) -> Result<bool, NativeError> {
        self.state.check("is_connected")?;
        Ok(self.connected.load(Ordering::SeqCst))
    }

    fn connect(&self) -> Result<bool, NativeError> {
        self.state.check("connect")?;
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.connected_callback.fire(true);
        }
        self.set_services_resolved(true);
        Ok(true)
    }

    fn disconnect(&self) -> Result<bool, NativeError> {
        self.state.check("disconnect")?;
        if self.connected.swap(false, Ordering::SeqCst) {
            self.connected_callback.fire(false);
        }
        self.set_services_resolved(false);
        Ok(true)
    }

    fn is_services_resolved(&self) -> Result<bool, NativeError> {
        self.state.check("is_services_resolved")?;
        Ok(self.services_resolved.load(Ordering::SeqCst))
    }

    fn services(&self) -> Result<Vec<Arc<dyn NativeService>>, NativeError> {
        self.state.check("services")?;
        Ok(self
            .services
            .read()
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn NativeService>)
            .collect())
    }

    fn find_service(&self, uuid: &str) -> Result<Option<Arc<dyn NativeService>>, NativeError> {
        self.state.check("find_service")?;
        Ok(find_by_id(self.services.read().as_slice(), uuid, |s| s.uuid.as_str())
            .map(|s| s as Arc<dyn NativeService>))
    }

    fn enable_blocked_notifications(&self, callback: NativeCallback<bool>) -> Result<(), NativeError> {
        self.state.check("enable_blocked_notifications")?;
        self.blocked_callback.register(callback);
        Ok(())
    }

    fn disable_blocked_notifications(&self) -> Result<(), NativeError> {
        self.state.check("disable_blocked_notifications")?;
        self.blocked_callback.deregister();
        Ok(())
    }

    fn enable_rssi_notifications(&self, callback: NativeCallback<i16>) -> Result<(), NativeError> {
        self.state.check("enable_rssi_notifications")?;
        self.rssi_callback.register(callback);
        Ok(())
    }

    fn disable_rssi_notifications(&self) -> Result<(), NativeError> {
        self.state.check("disable_rssi_notifications")?;
        self.rssi_callback.deregister();
        Ok(())
    }

    fn enable_connected_notifications(
        &self,
        callback: NativeCallback<bool>,
    ) -> Result<(), NativeError> {
        self.state.check("enable_connected_notifications")?;
        self.connected_callback.register(callback);
        Ok(())
    }

    fn disable_connected_notifications(&self) -> Result<(), NativeError> {
        self.state.check("disable_connected_notifications")?;
        self.connected_callback.deregister();
        Ok(())
    }

    fn enable_services_resolved_notifications(
        &self,
        callback: NativeCallback<bool>,
    ) -> Result<(), NativeError> {
        self.state.check("enable_services_resolved_notifications")?;
        self.services_resolved_callback.register(callback);
        Ok(())
    }

    fn disable_services_resolved_notifications(&self) -> Result<(), NativeError> {
        self.state.check("disable_services_resolved_notifications")?;
        self.services_resolved_callback.deregister();
        Ok(())
    }
}

// ============================================================================
// GATT
// ============================================================================

pub struct MemoryService {
    uuid: String,
    characteristics: RwLock<Vec<Arc<MemoryCharacteristic>>>,
    state: ObjectState,
}

impl MemoryService {
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            characteristics: RwLock::new(Vec::new()),
            state: ObjectState::default(),
        }
    }

    pub fn add_characteristic(&self, characteristic: MemoryCharacteristic) -> Arc<MemoryCharacteristic> {
        let characteristic = Arc::new(characteristic);
        self.characteristics.write().push(Arc::clone(&characteristic));
        characteristic
    }

    /// Mark this service as gone while leaving it listed by its device
    pub fn remove(&self) {
        self.state.remove();
    }

    pub fn inject_fault(&self, operation: &str, message: &str) {
        self.state.inject_fault(operation, message);
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state.call_count(operation)
    }
}

impl NativeService for MemoryService {
    fn uuid(&self) -> Result<String, NativeError> {
        self.state.check("uuid")?;
        Ok(self.uuid.clone())
    }

    fn characteristics(&self) -> Result<Vec<Arc<dyn NativeCharacteristic>>, NativeError> {
        self.state.check("characteristics")?;
        Ok(self
            .characteristics
            .read()
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn NativeCharacteristic>)
            .collect())
    }

    fn find_characteristic(
        &self,
        uuid: &str,
    ) -> Result<Option<Arc<dyn NativeCharacteristic>>, NativeError> {
        self.state.check("find_characteristic")?;
        Ok(find_by_id(self.characteristics.read().as_slice(), uuid, |c| c.uuid.as_str())
            .map(|c| c as Arc<dyn NativeCharacteristic>))
    }
}

pub struct MemoryCharacteristic {
    uuid: String,
    flags: Vec<String>,
    value: Mutex<Vec<u8>>,
    notifying: AtomicBool,
    value_callback: CallbackSlot<Vec<u8>>,
    state: ObjectState,
}

impl MemoryCharacteristic {
    pub fn new(uuid: &str, flags: &[&str]) -> Self {
        Self {
            uuid: uuid.to_string(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
            value: Mutex::new(Vec::new()),
            notifying: AtomicBool::new(false),
            value_callback: CallbackSlot::default(),
            state: ObjectState::default(),
        }
    }

    pub fn with_value(self, value: &[u8]) -> Self {
        *self.value.lock() = value.to_vec();
        self
    }

    /// Current value as last written
    pub fn value(&self) -> Vec<u8> {
        self.value.lock().clone()
    }

    /// Mark this characteristic as gone while leaving it listed by its service
    pub fn remove(&self) {
        self.state.remove();
    }

    pub fn fire_value(&self, value: &[u8]) -> bool {
        self.value_callback.fire(value.to_vec())
    }

    pub fn callback_stats(&self) -> CallbackStats {
        self.value_callback.stats()
    }

    pub fn inject_fault(&self, operation: &str, message: &str) {
        self.state.inject_fault(operation, message);
    }

    pub fn clear_fault(&self, operation: &str) {
        self.state.clear_fault(operation);
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state.call_count(operation)
    }
}

impl NativeCharacteristic for MemoryCharacteristic {
    fn uuid(&self) -> Result<String, NativeError> {
        self.state.check("uuid")?;
        Ok(self.uuid.clone())
    }

    fn flags(&self) -> Result<Vec<String>, NativeError> {
        self.state.check("flags")?;
        Ok(self.flags.clone())
    }

    fn is_notifying(&self) -> Result<bool, NativeError> {
        self.state.check("is_notifying")?;
        Ok(self.notifying.load(Ordering::SeqCst))
    }

    fn read_value(&self) -> Result<Vec<u8>, NativeError> {
        self.state.check("read_value")?;
        Ok(self.value.lock().clone())
    }

    fn write_value(&self, value: &[u8]) -> Result<bool, NativeError> {
        self.state.check("write_value")?;
        *self.value.lock() = value.to_vec();
        Ok(true)
    }

    fn enable_value_notifications(&self, callback: NativeCallback<Vec<u8>>) -> Result<(), NativeError> {
        self.state.check("enable_value_notifications")?;
        self.value_callback.register(callback);
        self.notifying.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable_value_notifications(&self) -> Result<(), NativeError> {
        self.state.check("disable_value_notifications")?;
        self.value_callback.deregister();
        self.notifying.store(false, Ordering::SeqCst);
        Ok(())
    }
}
