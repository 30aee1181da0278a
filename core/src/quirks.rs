//! Known benign native failures
//!
//! Some native stacks report ordinary states as errors. Only the patterns listed
//! here are intercepted; anything else still surfaces as a `TransportError`.

use crate::native::NativeError;

/// BlueZ answers `StopDiscovery` with `org.bluez.Error.Failed: No discovery started`
/// when the adapter is not discovering, which is the state the caller asked for.
const NO_DISCOVERY_STARTED: &[&str] = &["No discovery started"];

/// Reading a characteristic that holds zero bytes fails in the native bindings
/// because the empty D-Bus byte array cannot be converted to a native buffer.
/// An empty value is a legitimate characteristic state.
const EMPTY_VALUE: &[&str] = &[
    "Invalid value length",
    "empty value",
];

/// Benign failure categories recognised by the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quirk {
    /// Stopping discovery while none was running
    NoDiscoveryStarted,
    /// Reading a characteristic whose value is empty
    EmptyValue,
}

impl Quirk {
    fn patterns(&self) -> &'static [&'static str] {
        match self {
            Quirk::NoDiscoveryStarted => NO_DISCOVERY_STARTED,
            Quirk::EmptyValue => EMPTY_VALUE,
        }
    }

    /// Check whether a native error is this known benign failure
    pub fn matches(&self, error: &NativeError) -> bool {
        let message = error.message();
        self.patterns().iter().any(|pattern| message.contains(pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_discovery_started_matches_bluez_message() {
        let error = NativeError::new("org.bluez.Error.Failed: No discovery started");

        assert!(Quirk::NoDiscoveryStarted.matches(&error));
        assert!(!Quirk::EmptyValue.matches(&error));
    }

    #[test]
    fn test_empty_value_patterns() {
        assert!(Quirk::EmptyValue.matches(&NativeError::new("Invalid value length")));
        assert!(Quirk::EmptyValue.matches(&NativeError::new("Failed to read: empty value")));
    }

    #[test]
    fn test_unrelated_errors_do_not_match() {
        let error = NativeError::new("org.bluez.Error.NotConnected: Not Connected");

        assert!(!Quirk::NoDiscoveryStarted.matches(&error));
        assert!(!Quirk::EmptyValue.matches(&error));
    }
}
