//! Device notifications and their delivery
//!
//! Events are produced on the reader and classifier threads but never
//! delivered there. `EventBus::publish` only enqueues; a dedicated notifier
//! thread drains the queue and calls observers, so an observer may call back
//! into the driver without deadlocking the threads that feed it.

use crate::state::{BearerProfile, NetworkRegistrationState, PowerStatus, SimCardStatus};
use chrono::NaiveDateTime;
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Supply or temperature alarm reported by the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCondition {
    UnderVoltageWarning,
    UnderVoltagePowerDown,
    OverVoltageWarning,
    OverVoltagePowerDown,
    TemperatureWarning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
    Delete,
}

impl HttpMethod {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Get),
            1 => Some(Self::Post),
            2 => Some(Self::Head),
            3 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Outcome of a network time synchronization (`+CNTP`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    Success,
    NetworkError,
    DnsResolutionError,
    ConnectionError,
    ServiceResponseError,
    ServiceResponseTimeout,
    Unknown(i32),
}

impl SyncResult {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Success,
            61 => Self::NetworkError,
            62 => Self::DnsResolutionError,
            63 => Self::ConnectionError,
            64 => Self::ServiceResponseError,
            65 => Self::ServiceResponseTimeout,
            other => Self::Unknown(other),
        }
    }
}

/// Delivery report for a sent SMS (`+CDS`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsStatusReport {
    pub reference: u32,
    pub recipient: String,
    pub service_center_time: Option<NaiveDateTime>,
    pub delivered_time: Option<NaiveDateTime>,
    pub status: u8,
}

/// Something observers may want to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    GsmRegistrationChanged(NetworkRegistrationState),
    GprsRegistrationChanged(NetworkRegistrationState),
    SimCardStatusChanged(SimCardStatus),
    Warning(WarningCondition),
    SmsReceived { index: u32 },
    SmsSentReference { reference: u32 },
    SmsStatusReport(SmsStatusReport),
    HttpActionReceived {
        method: HttpMethod,
        status: u16,
        length: usize,
    },
    BearerStateChanged { profile: BearerProfile, open: bool },
    PowerStatusChanged(PowerStatus),
    CallReady,
    SmsReady,
    NetworkTimeSync(SyncResult),
    SocketConnected { handle: usize },
    SocketClosed { handle: usize },
    SocketDataReceived { handle: usize },
}

/// Callback registered with [`EventBus::subscribe`]
pub type Observer = Arc<dyn Fn(&Event) + Send + Sync>;

enum Dispatch {
    Event(Event),
    Stop,
}

pub struct EventBus {
    tx: UnboundedSender<Dispatch>,
    rx: Mutex<Option<UnboundedReceiver<Dispatch>>>,
    observers: Arc<RwLock<Vec<Observer>>>,
    subscribers: Arc<Mutex<Vec<UnboundedSender<Event>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            observers: Arc::new(RwLock::new(Vec::new())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue an event for delivery
    pub fn publish(&self, event: Event) {
        debug!(?event, "event");
        // only fails once the notifier is gone, i.e. during shutdown
        let _ = self.tx.send(Dispatch::Event(event));
    }

    pub fn subscribe(&self, observer: impl Fn(&Event) + Send + Sync + 'static) {
        self.observers.write().push(Arc::new(observer));
    }

    /// A receiver that gets a copy of every event from now on
    pub fn channel(&self) -> UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Hand out the delivery loop; only the first call gets it
    pub fn take_dispatcher(&self) -> Option<Dispatcher> {
        let rx = self.rx.lock().take()?;
        Some(Dispatcher {
            rx,
            observers: self.observers.clone(),
            subscribers: self.subscribers.clone(),
        })
    }

    /// Ask the dispatcher to return after the events already queued
    pub fn stop(&self) {
        let _ = self.tx.send(Dispatch::Stop);
    }
}

/// Delivery loop run by the notifier thread
pub struct Dispatcher {
    rx: UnboundedReceiver<Dispatch>,
    observers: Arc<RwLock<Vec<Observer>>>,
    subscribers: Arc<Mutex<Vec<UnboundedSender<Event>>>>,
}

impl Dispatcher {
    pub fn run(mut self) {
        while let Some(Dispatch::Event(event)) = self.rx.blocking_recv() {
            self.deliver(&event);
        }
        debug!("notifier stopped");
    }

    fn deliver(&self, event: &Event) {
        // snapshot so observers may subscribe from inside a callback
        let observers: Vec<Observer> = self.observers.read().clone();
        for observer in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                warn!(?event, "observer panicked");
            }
        }
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_event_bus_delivers_to_observers_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |e| sink.lock().push(e.clone()));

        let dispatcher = bus.take_dispatcher().unwrap();
        bus.publish(Event::CallReady);
        bus.publish(Event::SmsReceived { index: 4 });
        bus.stop();
        dispatcher.run();

        assert_eq!(
            *seen.lock(),
            vec![Event::CallReady, Event::SmsReceived { index: 4 }]
        );
    }

    #[test]
    fn test_event_bus_channel_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.channel();
        let dispatcher = bus.take_dispatcher().unwrap();
        bus.publish(Event::SocketClosed { handle: 1 });
        bus.stop();
        dispatcher.run();
        assert_eq!(rx.try_recv().unwrap(), Event::SocketClosed { handle: 1 });
    }

    #[test]
    fn test_event_bus_survives_panicking_observer() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe(|_| panic!("observer failure"));
        let counter = calls.clone();
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let dispatcher = bus.take_dispatcher().unwrap();
        bus.publish(Event::SmsReady);
        bus.publish(Event::CallReady);
        bus.stop();
        dispatcher.run();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_bus_dispatcher_taken_once() {
        let bus = EventBus::new();
        assert!(bus.take_dispatcher().is_some());
        assert!(bus.take_dispatcher().is_none());
    }

    #[test]
    fn test_sync_result_codes() {
        assert_eq!(SyncResult::from_code(1), SyncResult::Success);
        assert_eq!(SyncResult::from_code(63), SyncResult::ConnectionError);
        assert_eq!(SyncResult::from_code(7), SyncResult::Unknown(7));
    }

    #[test]
    fn test_http_method_codes() {
        assert_eq!(HttpMethod::from_code(1), Some(HttpMethod::Post));
        assert_eq!(HttpMethod::from_code(9), None);
    }
}
