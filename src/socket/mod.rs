//! Socket channel manager
//!
//! The modem multiplexes up to six TCP connections over the command channel.
//! Each connection is a [`SocketEntry`] in a fixed-size [`SocketTable`],
//! indexed by its handle. Status changes come from the modem's unsolicited
//! lines, never from the commands that provoke them.

pub mod buffer;
pub mod gprs_socket;

pub use buffer::ByteBuffer;
pub use gprs_socket::{GprsSocket, Protocol};

use crate::constants::MAX_SOCKETS_LIMIT;
use crate::error::{ModemError, Result};
use crate::events::{Event, EventBus};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Connection state as the modem reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Unknown = -1,
    Initial = 0,
    Connecting = 1,
    Connected = 2,
    RemoteClosing = 3,
    Closing = 4,
    Closed = 5,
}

impl ConnectionStatus {
    /// Map the state field of `+CIPSTATUS`
    pub fn from_cipstatus(text: &str) -> Self {
        match text.trim().trim_matches('"') {
            "INITIAL" => Self::Initial,
            "CONNECTING" => Self::Connecting,
            "CONNECTED" => Self::Connected,
            "REMOTE CLOSING" => Self::RemoteClosing,
            "CLOSING" => Self::Closing,
            "CLOSED" => Self::Closed,
            _ => Self::Unknown,
        }
    }
}

/// One virtual connection
pub struct SocketEntry {
    handle: usize,
    ssl: bool,
    status: Mutex<ConnectionStatus>,
    status_changed: Condvar,
    buffer: ByteBuffer,
    disposed: AtomicBool,
}

impl SocketEntry {
    fn new(handle: usize, ssl: bool) -> Self {
        Self {
            handle,
            ssl,
            status: Mutex::new(ConnectionStatus::Initial),
            status_changed: Condvar::new(),
            buffer: ByteBuffer::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> usize {
        self.handle
    }

    pub fn ssl(&self) -> bool {
        self.ssl
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Store `status`, returning the previous one
    fn set_status(&self, status: ConnectionStatus) -> ConnectionStatus {
        let mut current = self.status.lock();
        let previous = std::mem::replace(&mut *current, status);
        self.status_changed.notify_all();
        previous
    }

    /// Wait until the status equals `target` or `budget` elapses
    ///
    /// Re-checks at least every `poll`. Gives up early once disposed.
    pub fn wait_for_status(
        &self,
        target: ConnectionStatus,
        poll: Duration,
        budget: Duration,
    ) -> bool {
        let deadline = Instant::now() + budget;
        let mut status = self.status.lock();
        loop {
            if *status == target {
                return true;
            }
            let now = Instant::now();
            if now >= deadline || self.is_disposed() {
                return false;
            }
            self.status_changed
                .wait_for(&mut status, poll.min(deadline - now));
        }
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.buffer.close();
        self.status_changed.notify_all();
    }
}

/// Fixed-size table of live sockets, indexed by handle
pub struct SocketTable {
    slots: Mutex<Vec<Option<Arc<SocketEntry>>>>,
}

impl SocketTable {
    pub fn new(max_sockets: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; max_sockets.clamp(1, MAX_SOCKETS_LIMIT)]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Claim the lowest free handle
    pub fn allocate(&self, ssl: bool) -> Result<Arc<SocketEntry>> {
        let mut slots = self.slots.lock();
        let handle = slots
            .iter()
            .position(Option::is_none)
            .ok_or(ModemError::TooManyOpenSockets)?;
        let entry = Arc::new(SocketEntry::new(handle, ssl));
        slots[handle] = Some(entry.clone());
        debug!(handle, ssl, "socket allocated");
        Ok(entry)
    }

    pub fn get(&self, handle: usize) -> Option<Arc<SocketEntry>> {
        self.slots.lock().get(handle).cloned().flatten()
    }

    /// Free the slot held by `entry`
    ///
    /// A slot already reused by a newer socket is left alone.
    pub fn release(&self, entry: &Arc<SocketEntry>) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(entry.handle) {
            if slot.as_ref().is_some_and(|live| Arc::ptr_eq(live, entry)) {
                *slot = None;
                debug!(handle = entry.handle, "socket released");
            }
        }
        entry.dispose();
    }

    /// Discard the table and start over with `max_sockets` slots
    ///
    /// Sockets still open become disposed.
    pub fn resize(&self, max_sockets: usize) -> Result<()> {
        if !(1..=MAX_SOCKETS_LIMIT).contains(&max_sockets) {
            return Err(ModemError::ConfigValidation {
                field: "max_sockets",
                reason: format!("must be between 1 and {}", MAX_SOCKETS_LIMIT),
            });
        }
        let orphans = std::mem::replace(&mut *self.slots.lock(), vec![None; max_sockets]);
        for entry in orphans.into_iter().flatten() {
            entry.dispose();
        }
        Ok(())
    }

    /// Append socket payload bytes; false if no live socket has `handle`
    pub fn deliver(&self, handle: usize, data: &[u8]) -> bool {
        match self.get(handle) {
            Some(entry) => {
                entry.buffer.append(data);
                true
            }
            None => false,
        }
    }

    /// Apply a status reported by the modem
    ///
    /// Entering `Connected` publishes `SocketConnected`. Entering `Closed`
    /// publishes `SocketClosed`, then frees the handle and its buffer.
    pub fn set_status(&self, handle: usize, status: ConnectionStatus, bus: &EventBus) {
        let Some(entry) = self.get(handle) else {
            warn!(handle, ?status, "status for unknown socket");
            return;
        };
        let previous = entry.set_status(status);
        debug!(handle, ?previous, ?status, "socket status");
        match status {
            ConnectionStatus::Connected if previous != status => {
                bus.publish(Event::SocketConnected { handle });
            }
            ConnectionStatus::Closed => {
                bus.publish(Event::SocketClosed { handle });
                self.release(&entry);
            }
            _ => {}
        }
    }
}
