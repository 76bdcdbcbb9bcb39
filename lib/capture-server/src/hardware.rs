//! The boundary standing in for the hardware register read/write primitives and the
//! `hw_read_streamed_data` drain call the hardware team owns: a trait so
//! [`crate::coordinator::CaptureCoordinator`] can be driven against a real
//! implementation later without touching its state machine, plus one software
//! implementation for tests and local runs.

use std::time::{Duration, Instant};

use rand::RngCore;

/// The outcome of one `read_streamed_data` poll.
pub enum HwReadResult {
    /// `n` bytes were written into the caller's buffer.
    Data(usize),
    /// The hardware has no more data for this capture.
    Eof,
    /// No data arrived within the poll window; the caller should re-check its own
    /// shutdown flag and poll again. Lets the drain loop stay responsive to shutdown
    /// without the hardware call itself being cancellation-aware.
    Timeout,
}

/// Hardware register read/write and streamed-data drain primitives.
///
/// Implementations must not block for longer than the `poll` duration passed to
/// [`HwCapture::read_streamed_data`]; the coordinator relies on that bound to remain
/// responsive to shutdown.
pub trait HwCapture: Send + Sync {
    fn arm(&self);
    fn disarm(&self);
    fn read_streamed_data(&self, into: &mut [u8], poll: Duration) -> HwReadResult;
}

/// A software-simulated capture source: generates pseudo-random sample bytes at a
/// configurable rate, optionally for a bounded total length so a capture can reach
/// `Eof` on its own (exercising the `Capturing -> Idle` transition in tests without a
/// real disarm).
pub struct SimulatedHardware {
    bytes_per_second: u64,
    total_bytes: Option<u64>,
    emitted: parking_lot::Mutex<u64>,
    armed: parking_lot::Mutex<bool>,
}

impl SimulatedHardware {
    pub fn new(bytes_per_second: u64, total_bytes: Option<u64>) -> Self {
        SimulatedHardware {
            bytes_per_second,
            total_bytes,
            emitted: parking_lot::Mutex::new(0),
            armed: parking_lot::Mutex::new(false),
        }
    }
}

impl HwCapture for SimulatedHardware {
    fn arm(&self) {
        *self.emitted.lock() = 0;
        *self.armed.lock() = true;
    }

    fn disarm(&self) {
        *self.armed.lock() = false;
    }

    fn read_streamed_data(&self, into: &mut [u8], poll: Duration) -> HwReadResult {
        if !*self.armed.lock() {
            return HwReadResult::Eof;
        }

        let mut emitted = self.emitted.lock();
        if let Some(total) = self.total_bytes {
            if *emitted >= total {
                return HwReadResult::Eof;
            }
        }

        let budget = self
            .total_bytes
            .map(|total| total.saturating_sub(*emitted))
            .unwrap_or(u64::MAX);
        let wanted = (self.bytes_per_second as f64 * poll.as_secs_f64()) as u64;
        let n = wanted.min(budget).min(into.len() as u64) as usize;

        if n == 0 {
            drop(emitted);
            let start = Instant::now();
            while start.elapsed() < poll {
                std::thread::yield_now();
            }
            return HwReadResult::Timeout;
        }

        rand::rng().fill_bytes(&mut into[..n]);
        *emitted += n as u64;
        HwReadResult::Data(n)
    }
}
