//! GATT characteristic and its access capabilities

use super::{BluetoothObject, EntityContext, HasFlags, NativeHandle};
use crate::address::Address;
use crate::error::TransportError;
use crate::native::NativeCharacteristic;
use crate::notification::{Notification, PropertyKind, Subscription};
use crate::quirks::Quirk;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Characteristic properties defined by the GATT characteristic declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessType {
    /// Value may be broadcast in advertising data
    Broadcast,
    /// Value may be read
    Read,
    /// Value may be written without an acknowledgement
    WriteWithoutResponse,
    /// Value may be written with an acknowledgement
    Write,
    /// Value changes are pushed without acknowledgement
    Notify,
    /// Value changes are pushed and acknowledged
    Indicate,
    /// Value may be written with a signed write command
    AuthenticatedSignedWrites,
}

/// Extended and security flags some stacks report next to the declaration
/// properties. They have no `AccessType` and are dropped.
const UNMAPPED_FLAGS: &[&str] = &[
    "reliable-write",
    "writable-auxiliaries",
    "encrypt-read",
    "encrypt-write",
    "encrypt-authenticated-read",
    "encrypt-authenticated-write",
    "secure-read",
    "secure-write",
    "authorize",
    "extended-properties",
];

impl AccessType {
    /// Map a native flag string (case-insensitive, `-` or `_` separated)
    pub fn from_native_flag(flag: &str) -> Option<AccessType> {
        let flag = flag.trim().to_ascii_lowercase().replace('_', "-");
        match flag.as_str() {
            "broadcast" => Some(AccessType::Broadcast),
            "read" => Some(AccessType::Read),
            "write-without-response" => Some(AccessType::WriteWithoutResponse),
            "write" => Some(AccessType::Write),
            "notify" => Some(AccessType::Notify),
            "indicate" => Some(AccessType::Indicate),
            "authenticated-signed-writes" => Some(AccessType::AuthenticatedSignedWrites),
            known if UNMAPPED_FLAGS.contains(&known) => None,
            unknown => {
                debug!("Ignoring unrecognised characteristic flag '{}'", unknown);
                None
            }
        }
    }

    /// Lossy mapping of native flags to the access capability set
    pub fn from_native_flags<S: AsRef<str>>(flags: &[S]) -> BTreeSet<AccessType> {
        flags
            .iter()
            .filter_map(|flag| AccessType::from_native_flag(flag.as_ref()))
            .collect()
    }
}

pub struct Characteristic {
    address: Address,
    native: NativeHandle<dyn NativeCharacteristic>,
    context: Arc<EntityContext>,
    value: Subscription,
}

impl Characteristic {
    pub(crate) fn new(
        address: Address,
        native: Arc<dyn NativeCharacteristic>,
        context: Arc<EntityContext>,
    ) -> Self {
        Self {
            value: Subscription::new(address.clone(), PropertyKind::Value),
            native: NativeHandle::new(native),
            address,
            context,
        }
    }

    fn native(&self) -> Result<Arc<dyn NativeCharacteristic>, TransportError> {
        self.native.get(&self.address)
    }

    /// Canonical UUID, taken from the address
    pub fn uuid(&self) -> Option<&str> {
        self.address.characteristic_uuid()
    }

    pub fn is_notifying(&self) -> Result<bool, TransportError> {
        self.native()?
            .is_notifying()
            .map_err(|e| TransportError::native("read notifying state", e))
    }

    /// Read the current value.
    ///
    /// A characteristic holding zero bytes is returned as an empty vector even on
    /// stacks that fail to read it.
    pub fn read_value(&self) -> Result<Vec<u8>, TransportError> {
        match self.native()?.read_value() {
            Ok(value) => Ok(value),
            Err(e) if Quirk::EmptyValue.matches(&e) => {
                warn!("Read of {} returned '{}', treating as empty value", self.address, e);
                Ok(Vec::new())
            }
            Err(e) => Err(TransportError::native("read value", e)),
        }
    }

    pub fn write_value(&self, value: &[u8]) -> Result<bool, TransportError> {
        self.native()?
            .write_value(value)
            .map_err(|e| TransportError::native("write value", e))
    }

    pub fn enable_value_notifications<L>(&self, listener: L) -> Result<(), TransportError>
    where
        L: Notification<Vec<u8>>,
    {
        self.native.pinned(&self.address, |native| {
            self.value.enable(
                &self.context.dispatcher,
                listener,
                |callback| native.enable_value_notifications(callback),
                || native.disable_value_notifications(),
            )
        })
    }

    pub fn disable_value_notifications(&self) -> Result<(), TransportError> {
        self.native.pinned(&self.address, |native| {
            self.value.disable(|| native.disable_value_notifications())
        })
    }
}

impl HasFlags for Characteristic {
    fn flags(&self) -> Result<BTreeSet<AccessType>, TransportError> {
        let flags = self
            .native()?
            .flags()
            .map_err(|e| TransportError::native("read characteristic flags", e))?;
        Ok(AccessType::from_native_flags(&flags))
    }
}

impl BluetoothObject for Characteristic {
    fn address(&self) -> &Address {
        &self.address
    }

    fn dispose(&self) {
        let released = self.native.take_with(|native| {
            self.value.release(|| native.disable_value_notifications());
        });
        if released {
            debug!("Disposed characteristic {}", self.address);
        }
    }
}

impl Drop for Characteristic {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
