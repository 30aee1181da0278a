// Integration tests for address resolution and discovery snapshots
//
// Runs the factory over the in-memory native stack.

use bluebridge_core::memory::{
    MemoryAdapter, MemoryCharacteristic, MemoryDevice, MemoryManager, MemoryService,
};
use bluebridge_core::native::NativeAdapter;
use bluebridge_core::{
    Address, BluetoothObject, DeviceSummary, Entity, Factory, Level, TransportConfig,
    TransportError,
};
use std::collections::HashMap;
use std::sync::Arc;

const ADAPTER: &str = "00:1A:7D:DA:71:13";
const SENSOR: &str = "D4:CA:6E:01:02:03";
const HEADSET: &str = "00:1B:66:AA:BB:CC";
const SERVICE: &str = "0000180F-0000-1000-8000-00805F9B34FB";
const BATTERY_LEVEL: &str = "00002A19-0000-1000-8000-00805F9B34FB";

struct Stack {
    manager: Arc<MemoryManager>,
    adapter: Arc<MemoryAdapter>,
    sensor: Arc<MemoryDevice>,
    headset: Arc<MemoryDevice>,
}

fn stack() -> Stack {
    let manager = MemoryManager::new("tinyb");
    let adapter = manager.add_adapter(MemoryAdapter::new(ADAPTER, "hci0"));
    let sensor = adapter.add_device(
        MemoryDevice::new(SENSOR, "Sensor")
            .with_rssi(-72)
            .with_tx_power(4),
    );
    let headset = adapter.add_device(
        MemoryDevice::new(HEADSET, "Headset")
            .with_bluetooth_class(0x240404)
            .with_rssi(0),
    );
    let service = sensor.add_service(MemoryService::new(SERVICE));
    service.add_characteristic(MemoryCharacteristic::new(BATTERY_LEVEL, &["read", "notify"]));

    Stack {
        manager,
        adapter,
        sensor,
        headset,
    }
}

fn factory(stack: &Stack) -> Factory {
    Factory::new(stack.manager.clone(), TransportConfig::default()).expect("Factory")
}

fn battery_level_address() -> Address {
    format!("tinyb://{}/{}/{}/{}", ADAPTER, SENSOR, SERVICE, BATTERY_LEVEL)
        .parse()
        .expect("Valid")
}

#[test]
fn test_resolve_every_level() {
    let stack = stack();
    let factory = factory(&stack);
    let characteristic = battery_level_address();

    let mut address = Some(characteristic.clone());
    while let Some(current) = address {
        let entity = factory
            .resolve(&current)
            .expect("Resolve")
            .expect("Entity exists");
        assert_eq!(entity.address(), &current);
        assert_eq!(entity.level(), current.level());
        address = current.parent();
    }
}

#[test]
fn test_missing_device_stops_the_walk() {
    let stack = stack();
    let factory = factory(&stack);
    let missing = Address::adapter("tinyb", ADAPTER)
        .and_then(|a| a.with_device("11:11:11:11:11:11"))
        .and_then(|a| a.with_service(SERVICE))
        .expect("Valid");

    assert!(factory.resolve(&missing).expect("Resolve").is_none());
    assert_eq!(stack.adapter.call_count("find_device"), 1);
    assert_eq!(stack.sensor.call_count("find_service"), 0);
    assert_eq!(stack.headset.call_count("find_service"), 0);
}

#[test]
fn test_typed_lookup_projects_deeper_addresses() {
    let stack = stack();
    let factory = factory(&stack);

    let device = factory
        .device(&battery_level_address())
        .expect("Lookup")
        .expect("Device");

    assert_eq!(device.address().level(), Level::Device);
    assert_eq!(device.name().expect("Name"), "Sensor");
    assert_eq!(device.tx_power().expect("TX power"), 4);
    assert!(factory
        .characteristic(device.address())
        .expect("Lookup")
        .is_none());
}

#[test]
fn test_resolve_returns_matching_variant() {
    let stack = stack();
    let factory = factory(&stack);

    let entity = factory
        .resolve(&battery_level_address())
        .expect("Resolve")
        .expect("Characteristic");

    assert!(matches!(entity, Entity::Characteristic(_)));
    assert!(entity.into_device().is_none());
}

#[test]
fn test_list_adapters() {
    let stack = stack();
    stack.adapter.set_alias("Living room").expect("Alias");
    let factory = factory(&stack);

    let adapters = factory.list_adapters().expect("Adapters");

    assert_eq!(adapters.len(), 1);
    assert_eq!(adapters[0].address.to_string(), format!("tinyb://{}", ADAPTER));
    assert_eq!(adapters[0].name, "hci0");
    assert_eq!(adapters[0].alias, "Living room");
}

#[test]
fn test_list_devices_reports_low_energy_heuristic() {
    let stack = stack();
    let factory = factory(&stack);

    let devices: HashMap<String, DeviceSummary> = factory
        .list_devices()
        .expect("Devices")
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect();

    assert_eq!(devices.len(), 2);
    assert!(devices["Sensor"].is_low_energy);
    assert_eq!(devices["Sensor"].rssi, -72);
    assert!(!devices["Headset"].is_low_energy);
    assert_eq!(devices["Headset"].device_class, 0x240404);
    assert_eq!(
        devices["Headset"].address.parent().map(|a| a.to_string()),
        Some(format!("tinyb://{}", ADAPTER))
    );
}

#[test]
fn test_list_devices_skips_removed_device() {
    let stack = stack();
    let factory = factory(&stack);
    stack.headset.remove();

    let devices = factory.list_devices().expect("Devices");

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "Sensor");
}

#[test]
fn test_enumeration_failure_is_an_error() {
    let stack = stack();
    let factory = factory(&stack);
    stack
        .manager
        .inject_fault("devices", "org.bluez.Error.NotReady: Resource Not Ready");

    assert!(matches!(
        factory.list_devices(),
        Err(TransportError::Native { .. })
    ));
}

#[test]
fn test_summaries_serialize_with_canonical_addresses() {
    let stack = stack();
    let factory = factory(&stack);

    let adapters = factory.list_adapters().expect("Adapters");
    let json = serde_json::to_value(&adapters).expect("Serialize");

    assert_eq!(json[0]["address"], format!("tinyb://{}", ADAPTER));
}

#[test]
fn test_adapter_devices_hide_silent_devices() {
    let stack = stack();
    let factory = factory(&stack);
    let adapter = factory
        .adapter(&Address::adapter("tinyb", ADAPTER).expect("Valid"))
        .expect("Lookup")
        .expect("Adapter");

    let devices = adapter.devices().expect("Devices");

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address().device_id(), Some(SENSOR));
}

#[test]
fn test_discovery_uses_configured_filter() {
    let stack = stack();
    let factory = factory(&stack);
    let adapter = factory
        .adapter(&Address::adapter("tinyb", ADAPTER).expect("Valid"))
        .expect("Lookup")
        .expect("Adapter");

    assert!(adapter.stop_discovery().expect("Not discovering is fine"));
    assert!(adapter.start_discovery().expect("Start"));
    assert_eq!(stack.adapter.rssi_filter(), Some(-100));
    assert!(adapter.is_discovering().expect("Discovering"));
    assert!(adapter.stop_discovery().expect("Stop"));
}

#[test]
fn test_stale_entity_reports_native_error() {
    let stack = stack();
    let factory = factory(&stack);
    let device = factory
        .device(&battery_level_address())
        .expect("Lookup")
        .expect("Device");

    stack.adapter.detach_device(SENSOR);

    let err = device.name().expect_err("Stale");
    assert!(err.native_error().is_some());
    assert!(factory
        .device(&battery_level_address())
        .expect("Lookup")
        .is_none());
}

#[test]
fn test_services_resolve_after_connect() {
    let stack = stack();
    let factory = factory(&stack);
    let device = factory
        .device(&battery_level_address())
        .expect("Lookup")
        .expect("Device");

    assert!(device.services().expect("Services").is_empty());
    assert!(device.connect().expect("Connect"));

    let services = device.services().expect("Services");
    assert_eq!(services.len(), 1);
    let characteristics = services[0].characteristics().expect("Characteristics");
    assert_eq!(characteristics.len(), 1);
    assert_eq!(characteristics[0].address(), &battery_level_address());
}
