//! Hierarchical Bluetooth object addressing
//!
//! Every object exposed by the transport layer is named by an [`Address`]:
//!
//! ```text
//! <protocol>://<adapter>/<device>/<service-uuid>/<characteristic-uuid>[/<descriptor-uuid>]
//! ```
//!
//! Segments are optional but only in strict hierarchical order. Identifiers are
//! normalised on construction (MAC-like ids upper-case, UUIDs lower-case), so equality,
//! hashing and ordering are plain structural comparisons.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Separator between the protocol name and the path
const SCHEME_SEPARATOR: &str = "://";

/// Length of a canonical hyphenated 128-bit UUID
const CANONICAL_UUID_LEN: usize = 36;

/// Errors for address construction and parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),
}

/// Depth of an address in the Bluetooth object hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Adapter,
    Device,
    Service,
    Characteristic,
    Descriptor,
}

impl Level {
    /// The level directly above this one, `None` for adapters
    pub fn parent(&self) -> Option<Level> {
        match self {
            Level::Adapter => None,
            Level::Device => Some(Level::Adapter),
            Level::Service => Some(Level::Device),
            Level::Characteristic => Some(Level::Service),
            Level::Descriptor => Some(Level::Characteristic),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Adapter => write!(f, "adapter"),
            Level::Device => write!(f, "device"),
            Level::Service => write!(f, "service"),
            Level::Characteristic => write!(f, "characteristic"),
            Level::Descriptor => write!(f, "descriptor"),
        }
    }
}

/// Immutable, hierarchical identifier of a Bluetooth object.
///
/// Field order matters: the derived ordering compares level by level (adapter first),
/// and an absent segment sorts before a present one, so a parent always sorts before
/// its children and siblings sort by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    protocol: String,
    adapter: String,
    device: Option<String>,
    service: Option<String>,
    characteristic: Option<String>,
    descriptor: Option<String>,
}

impl Address {
    /// Create a root (adapter level) address
    pub fn adapter(protocol: &str, adapter_id: &str) -> Result<Self, AddressError> {
        Ok(Self {
            protocol: normalize_protocol(protocol)?,
            adapter: normalize_mac(adapter_id, Level::Adapter)?,
            device: None,
            service: None,
            characteristic: None,
            descriptor: None,
        })
    }

    /// Derive the address of a device attached to this adapter
    pub fn with_device(&self, device_id: &str) -> Result<Self, AddressError> {
        self.expect_level(Level::Device)?;
        let mut child = self.clone();
        child.device = Some(normalize_mac(device_id, Level::Device)?);
        Ok(child)
    }

    /// Derive the address of a GATT service of this device
    pub fn with_service(&self, uuid: &str) -> Result<Self, AddressError> {
        self.expect_level(Level::Service)?;
        let mut child = self.clone();
        child.service = Some(normalize_uuid(uuid, Level::Service)?);
        Ok(child)
    }

    /// Derive the address of a characteristic of this service
    pub fn with_characteristic(&self, uuid: &str) -> Result<Self, AddressError> {
        self.expect_level(Level::Characteristic)?;
        let mut child = self.clone();
        child.characteristic = Some(normalize_uuid(uuid, Level::Characteristic)?);
        Ok(child)
    }

    /// Derive the address of a descriptor of this characteristic
    pub fn with_descriptor(&self, uuid: &str) -> Result<Self, AddressError> {
        self.expect_level(Level::Descriptor)?;
        let mut child = self.clone();
        child.descriptor = Some(normalize_uuid(uuid, Level::Descriptor)?);
        Ok(child)
    }

    /// The address one level shallower, `None` for an adapter address
    pub fn parent(&self) -> Option<Self> {
        self.level().parent().and_then(|level| self.at_level(level))
    }

    /// Project this address onto one of its ancestors (or itself).
    ///
    /// Returns `None` when the address is shallower than `level`.
    pub fn at_level(&self, level: Level) -> Option<Self> {
        if level > self.level() {
            return None;
        }
        let keep = |wanted: Level, value: &Option<String>| {
            if wanted <= level {
                value.clone()
            } else {
                None
            }
        };
        Some(Self {
            protocol: self.protocol.clone(),
            adapter: self.adapter.clone(),
            device: keep(Level::Device, &self.device),
            service: keep(Level::Service, &self.service),
            characteristic: keep(Level::Characteristic, &self.characteristic),
            descriptor: keep(Level::Descriptor, &self.descriptor),
        })
    }

    /// Whether `other` lives strictly below this address
    pub fn is_ancestor_of(&self, other: &Address) -> bool {
        other.level() > self.level() && other.at_level(self.level()).as_ref() == Some(self)
    }

    /// Depth of this address
    pub fn level(&self) -> Level {
        if self.descriptor.is_some() {
            Level::Descriptor
        } else if self.characteristic.is_some() {
            Level::Characteristic
        } else if self.service.is_some() {
            Level::Service
        } else if self.device.is_some() {
            Level::Device
        } else {
            Level::Adapter
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn service_uuid(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn characteristic_uuid(&self) -> Option<&str> {
        self.characteristic.as_deref()
    }

    pub fn descriptor_uuid(&self) -> Option<&str> {
        self.descriptor.as_deref()
    }

    fn expect_level(&self, child: Level) -> Result<(), AddressError> {
        // child.parent() is always Some for the non-root levels passed in here
        if Some(self.level()) != child.parent() {
            return Err(AddressError::InvalidHierarchy(format!(
                "cannot derive a {} address from {} address {}",
                child,
                self.level(),
                self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.protocol, SCHEME_SEPARATOR, self.adapter)?;
        let segments = [
            &self.device,
            &self.service,
            &self.characteristic,
            &self.descriptor,
        ];
        for segment in segments.into_iter().map_while(|s| s.as_deref()) {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, path) = s.split_once(SCHEME_SEPARATOR).ok_or_else(|| {
            AddressError::InvalidAddress(format!("missing protocol separator in '{}'", s))
        })?;

        let path = path.strip_suffix('/').unwrap_or(path);
        let mut segments = path.split('/');

        // split always yields at least one item; an empty path fails MAC validation
        let mut address = Address::adapter(protocol, segments.next().unwrap_or_default())?;
        let derivations: [fn(&Address, &str) -> Result<Address, AddressError>; 4] = [
            Address::with_device,
            Address::with_service,
            Address::with_characteristic,
            Address::with_descriptor,
        ];
        for derive in derivations {
            match segments.next() {
                Some(segment) => address = derive(&address, segment)?,
                None => return Ok(address),
            }
        }

        if segments.next().is_some() {
            return Err(AddressError::InvalidAddress(format!(
                "too many path segments in '{}'",
                s
            )));
        }
        Ok(address)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

pub(crate) fn normalize_protocol(protocol: &str) -> Result<String, AddressError> {
    let mut chars = protocol.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return Err(AddressError::InvalidAddress(format!(
            "invalid protocol name '{}'",
            protocol
        )));
    }
    Ok(protocol.to_ascii_lowercase())
}

fn normalize_mac(id: &str, level: Level) -> Result<String, AddressError> {
    let octets: Vec<&str> = id.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return Err(AddressError::InvalidAddress(format!(
            "invalid {} id '{}' (expected XX:XX:XX:XX:XX:XX)",
            level, id
        )));
    }
    Ok(id.to_ascii_uppercase())
}

fn normalize_uuid(uuid: &str, level: Level) -> Result<String, AddressError> {
    // Uuid::try_parse also accepts simple, braced and URN forms; only the
    // hyphenated form is 36 characters long.
    let parsed = if uuid.len() == CANONICAL_UUID_LEN {
        Uuid::try_parse(uuid).ok()
    } else {
        None
    };
    parsed
        .map(|parsed| parsed.hyphenated().to_string())
        .ok_or_else(|| {
            AddressError::InvalidAddress(format!(
                "invalid {} uuid '{}' (expected canonical 128-bit form)",
                level, uuid
            ))
        })
}
