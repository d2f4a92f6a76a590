//! EK-TAKT - Hardware Abstraction Layer
//!
//! HAL provides the platform-independent interface for:
//! - Monotonic time and coarse sleeping
//! - Beacon broadcast transmit/receive on the discovery channel
//! - The factory-programmed unique device id
//! - An entropy word for seeding the exchange primitive
//!
//! # Implementing a HAL
//!
//! ```ignore
//! struct MyHal;
//!
//! impl Hal for MyHal {
//!     fn time_us(&self) -> TimeUs {
//!         // Read hardware timer
//!     }
//!
//!     fn send_beacon(&mut self, frame: &[u8]) -> Result<()> {
//!         // Blocking transmit on the discovery channel
//!     }
//!
//!     // ... implement other methods
//! }
//! ```
//!
//! Reception is asynchronous on real hardware (interrupt fills a buffer);
//! [`Hal::recv_beacon`] drains at most one pending frame per call. How many
//! frames an implementation buffers between calls is its own concern - a
//! single-slot buffer means a burst can overwrite an undrained frame.

use crate::types::*;

// ============================================================================
// Received Frame
// ============================================================================

/// Metadata for one received beacon frame
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct RxFrame {
    /// Frame length written into the caller's buffer
    pub len: usize,
    /// Signal strength of the reception (dBm)
    pub rssi: i8,
}

// ============================================================================
// HAL Trait
// ============================================================================

/// Hardware Abstraction Layer trait
///
/// Implement this for your target platform (nRF52840, STM32, etc.)
pub trait Hal {
    /// Get current time in microseconds
    ///
    /// Must be monotonically increasing.
    fn time_us(&self) -> TimeUs;

    /// Get current time in milliseconds
    fn time_ms(&self) -> u32 {
        (self.time_us() / 1000) as u32
    }

    /// Coarse sleep, used only between discovery polling passes
    fn sleep_ms(&self, ms: u32);

    /// Get the factory-programmed unique device id
    fn device_id(&self) -> DeviceId;

    /// Broadcast a beacon frame on the discovery channel (fire-and-forget)
    fn send_beacon(&mut self, frame: &[u8]) -> Result<()>;

    /// Drain at most one pending received frame into `buf`
    ///
    /// Returns `None` if nothing is pending.
    fn recv_beacon(&mut self, buf: &mut [u8]) -> Option<RxFrame>;

    /// Read one word from the platform entropy source
    fn entropy(&mut self) -> u32;

    /// Emit one line of status text (optional)
    fn debug_print(&self, _line: &str) {}

    /// Get platform name
    fn platform_name(&self) -> &'static str;
}

// ============================================================================
// Deadline Spinning
// ============================================================================

/// Busy-wait until the monotonic clock reaches `deadline`
///
/// Round timing needs sub-millisecond precision that a coarse sleep cannot
/// provide, so this is a tight spin on the tick comparison.
pub fn spin_until<H: Hal + ?Sized>(hal: &H, deadline: TimeUs) {
    while hal.time_us() < deadline {
        core::hint::spin_loop();
    }
}

// ============================================================================
// Status Lines
// ============================================================================

/// Largest status line the kernel emits (rank-up listings dominate)
pub const LOG_LINE_MAX: usize = 1024;

/// Format one status line into a bounded buffer and emit it
///
/// Output that would overflow the buffer is truncated, never dropped.
pub fn log_line<H: Hal + ?Sized>(hal: &H, args: core::fmt::Arguments<'_>) {
    let mut line: heapless::String<LOG_LINE_MAX> = heapless::String::new();
    let _ = core::fmt::Write::write_fmt(&mut line, args);
    hal.debug_print(&line);
}

// ============================================================================
// Test HAL
// ============================================================================

/// Deterministic HAL for tests and simulation
///
/// The clock is virtual: it advances by the full amount on `sleep_ms` and
/// by one microsecond per `time_us` query, so spin loops always terminate.
/// Received frames are served from an internal queue in FIFO order.
#[cfg(any(test, feature = "std"))]
pub struct TestHal {
    time: core::sync::atomic::AtomicU64,
    device_id: DeviceId,
    rng_state: u32,
    queued: heapless::Deque<(heapless::Vec<u8, MAX_PAYLOAD>, i8), 16>,
    /// Beacon frames passed to `send_beacon`, in order
    pub sent: heapless::Vec<heapless::Vec<u8, MAX_PAYLOAD>, 64>,
}

#[cfg(any(test, feature = "std"))]
impl TestHal {
    /// Create a test HAL with the given device id
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            time: core::sync::atomic::AtomicU64::new(0),
            device_id,
            rng_state: (device_id as u32) | 1,
            queued: heapless::Deque::new(),
            sent: heapless::Vec::new(),
        }
    }

    /// Advance the virtual clock
    pub fn advance_time(&self, us: u64) {
        self.time.fetch_add(us, core::sync::atomic::Ordering::SeqCst);
    }

    /// Queue a frame to be served by the next `recv_beacon` call
    pub fn push_frame(&mut self, frame: &[u8], rssi: i8) {
        let mut stored = heapless::Vec::new();
        stored.extend_from_slice(frame).unwrap();
        self.queued.push_back((stored, rssi)).unwrap();
    }
}

#[cfg(any(test, feature = "std"))]
impl Hal for TestHal {
    fn time_us(&self) -> TimeUs {
        self.time.fetch_add(1, core::sync::atomic::Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u32) {
        self.advance_time(ms as u64 * 1000);
    }

    fn device_id(&self) -> DeviceId {
        self.device_id
    }

    fn send_beacon(&mut self, frame: &[u8]) -> Result<()> {
        let mut stored = heapless::Vec::new();
        stored.extend_from_slice(frame).map_err(|_| Error::NoMemory)?;
        let _ = self.sent.push(stored);
        Ok(())
    }

    fn recv_beacon(&mut self, buf: &mut [u8]) -> Option<RxFrame> {
        let (frame, rssi) = self.queued.pop_front()?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Some(RxFrame { len, rssi })
    }

    fn entropy(&mut self) -> u32 {
        // xorshift32
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng_state = x;
        x
    }

    fn debug_print(&self, line: &str) {
        #[cfg(feature = "std")]
        println!("{}", line);
        #[cfg(not(feature = "std"))]
        let _ = line;
    }

    fn platform_name(&self) -> &'static str {
        "test"
    }
}
