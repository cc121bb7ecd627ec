//! Physical link abstraction for byte-level I/O
//!
//! Separates the wire from the protocol logic:
//! - **Link**: how bytes flow (UART, or an in-memory script in tests)
//! - **Demux / engine**: what the bytes mean (handled separately)
//!
//! A link is shared by the reader thread and every writer, so all methods
//! take `&self` and implementations synchronize internally.
//!
//! # Adding a new link
//!
//! 1. Create `transport/my_link.rs`
//! 2. Implement the `Link` trait
//! 3. Add `pub mod my_link;` here

pub mod memory;
pub mod serial;

pub use memory::MemoryLink;
pub use serial::SerialLink;

use std::io;

/// Byte pipe to the modem
///
/// `read` must return within a short timeout (`ErrorKind::TimedOut` when no
/// byte arrived) so the reader thread can notice shutdown and payload
/// stalls.
pub trait Link: Send + Sync + 'static {
    /// Read whatever arrived, blocking at most the link's read timeout
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write every byte of `data`
    fn write_all(&self, data: &[u8]) -> io::Result<()>;

    /// Bytes received but not read yet
    fn bytes_to_read(&self) -> io::Result<usize>;

    /// Drop everything received but not read yet
    fn clear_input(&self) -> io::Result<()>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}
