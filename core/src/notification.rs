//! Listener contract and native subscription bookkeeping

use crate::address::Address;
use crate::dispatch::{Dispatcher, LaneKey};
use crate::error::TransportError;
use crate::native::{NativeCallback, NativeError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Observable native properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Adapter radio power state
    Powered,
    /// Adapter discovery state
    Discovering,
    /// Device blocked by the local stack
    Blocked,
    /// Received signal strength of a device, in dBm
    Rssi,
    /// Device connection state
    Connected,
    /// Device GATT services have been resolved
    ServicesResolved,
    /// Characteristic value bytes
    Value,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Powered => write!(f, "powered"),
            PropertyKind::Discovering => write!(f, "discovering"),
            PropertyKind::Blocked => write!(f, "blocked"),
            PropertyKind::Rssi => write!(f, "rssi"),
            PropertyKind::Connected => write!(f, "connected"),
            PropertyKind::ServicesResolved => write!(f, "services-resolved"),
            PropertyKind::Value => write!(f, "value"),
        }
    }
}

/// Receiver of property change notifications.
///
/// Returning an error (or panicking) is contained by the dispatcher: it is logged
/// and later notifications are still delivered.
pub trait Notification<T>: Send + Sync + 'static {
    fn notify(&self, value: T) -> anyhow::Result<()>;
}

impl<T, F> Notification<T> for F
where
    F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn notify(&self, value: T) -> anyhow::Result<()> {
        self(value)
    }
}

/// Build a listener from a closure.
///
/// Pins the closure signature so its argument and `?` conversions need no annotations.
pub fn from_fn<T, F>(f: F) -> F
where
    F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    f
}

/// The native registration currently backing a subscription
struct Registration {
    /// Cleared on disable so a late native callback is not forwarded
    live: Arc<AtomicBool>,
}

/// At most one native registration for one `(entity, property)` pair
pub(crate) struct Subscription {
    lane: LaneKey,
    active: Mutex<Option<Registration>>,
}

impl Subscription {
    pub(crate) fn new(address: Address, property: PropertyKind) -> Self {
        Self {
            lane: LaneKey::new(address, property),
            active: Mutex::new(None),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Register `listener`, replacing any previous registration.
    ///
    /// The previous native callback is removed before the new one is installed,
    /// both under the subscription lock.
    pub(crate) fn enable<T, L, R, U>(
        &self,
        dispatcher: &Arc<Dispatcher>,
        listener: L,
        register: R,
        unregister: U,
    ) -> Result<(), TransportError>
    where
        T: Send + 'static,
        L: Notification<T>,
        R: FnOnce(NativeCallback<T>) -> Result<(), NativeError>,
        U: FnOnce() -> Result<(), NativeError>,
    {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.live.store(false, Ordering::Release);
            if let Err(e) = unregister() {
                debug!("Replacing {} registration: native deregistration failed: {}", self.lane, e);
            }
        }

        let live = Arc::new(AtomicBool::new(true));
        let callback = forwarder(
            Arc::clone(dispatcher),
            self.lane.clone(),
            Arc::new(listener),
            Arc::clone(&live),
        );
        register(callback).map_err(|e| TransportError::native("enable notifications", e))?;

        *active = Some(Registration { live });
        debug!("Enabled {} notifications", self.lane);
        Ok(())
    }

    /// Remove the native registration; no-op when not enabled
    pub(crate) fn disable<U>(&self, unregister: U) -> Result<(), TransportError>
    where
        U: FnOnce() -> Result<(), NativeError>,
    {
        let mut active = self.active.lock();
        let Some(registration) = active.take() else {
            return Ok(());
        };
        registration.live.store(false, Ordering::Release);
        unregister().map_err(|e| TransportError::native("disable notifications", e))?;
        debug!("Disabled {} notifications", self.lane);
        Ok(())
    }

    /// Like `disable`, but never fails; used on disposal
    pub(crate) fn release<U>(&self, unregister: U)
    where
        U: FnOnce() -> Result<(), NativeError>,
    {
        if let Err(e) = self.disable(unregister) {
            debug!("Ignoring failure while releasing {}: {}", self.lane, e);
        }
    }
}

/// Build the native callback that hands each value to the dispatcher
fn forwarder<T, L>(
    dispatcher: Arc<Dispatcher>,
    lane: LaneKey,
    listener: Arc<L>,
    live: Arc<AtomicBool>,
) -> NativeCallback<T>
where
    T: Send + 'static,
    L: Notification<T>,
{
    Box::new(move |value: T| {
        if !live.load(Ordering::Acquire) {
            return;
        }
        let listener = Arc::clone(&listener);
        dispatcher.dispatch(lane.clone(), move || listener.notify(value));
    })
}
