//! Links hardware arm/disarm/reset to [`capture_buffer::CircularBuffer`] start/end,
//! and admits new arms only from compatible states.

use std::sync::Arc;
use std::time::Duration;

use capture_buffer::CircularBuffer;
use parking_lot::{Condvar, Mutex};
use snafu::Snafu;

use crate::hardware::{HwCapture, HwReadResult};
use crate::internal_events::{AdmissionRejected, CaptureArmed, CaptureDisarmed, CaptureEnded, CaptureReset, CaptureStarted};

/// How long the capture worker blocks on one hardware poll before re-checking its own
/// shutdown flag. Matches a "small polling interval (e.g. 100ms)" cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The coordinator's externally-visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Armed,
    Capturing,
}

/// Why `arm()` was refused.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ArmError {
    #[snafu(display("BusyCapture"))]
    BusyCapture,
    #[snafu(display("ClientsActive"))]
    ClientsActive,
}

struct Inner {
    state: CaptureState,
    thread_running: bool,
}

/// Owns the single `{Idle, Armed, Capturing}` state machine bridging hardware
/// arm/disarm to the shared buffer's start/end of capture. One coordinator exists per
/// server; callers reach it through `Arc<CaptureCoordinator>` rather than a process
/// global; no hidden globals.
pub struct CaptureCoordinator {
    buffer: Arc<CircularBuffer>,
    hw: Arc<dyn HwCapture>,
    poll_interval: Duration,
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl CaptureCoordinator {
    pub fn new(buffer: Arc<CircularBuffer>, hw: Arc<dyn HwCapture>) -> Arc<Self> {
        Self::with_poll_interval(buffer, hw, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(buffer: Arc<CircularBuffer>, hw: Arc<dyn HwCapture>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(CaptureCoordinator {
            buffer,
            hw,
            poll_interval,
            inner: Mutex::new(Inner { state: CaptureState::Idle, thread_running: true }),
            condvar: Condvar::new(),
        })
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    /// Spawn the worker thread that turns `Armed` into an actual running capture.
    ///
    /// Returns the join handle so the caller (ordinarily the server's `main`) can
    /// join it after calling [`CaptureCoordinator::shutdown`].
    pub fn spawn_worker(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let this = Arc::clone(self);
        std::thread::spawn(move || this.worker_loop())
    }

    /// Drives `Armed -> Capturing -> Idle`. Every transition that touches the buffer's
    /// `active` flag (`start_write`/`end_write`) happens while holding `self.inner`, the
    /// same lock [`CaptureCoordinator::disarm`]/[`CaptureCoordinator::reset`] take. That
    /// rules out a TOCTOU between "check whether a capture is active" and "act on it"
    /// across two threads. The buffer calls themselves are metadata-only (no hardware
    /// or socket I/O), so holding this lock across them does not violate the "mutex
    /// must not be held during I/O" rule.
    fn worker_loop(self: Arc<Self>) {
        loop {
            {
                let mut inner = self.inner.lock();
                while inner.thread_running && inner.state != CaptureState::Armed {
                    self.condvar.wait(&mut inner);
                }
                if !inner.thread_running {
                    return;
                }
                inner.state = CaptureState::Capturing;
                self.buffer.start_write();
            }
            CaptureStarted.emit();

            self.drain_until_eof_or_shutdown();

            let mut inner = self.inner.lock();
            if inner.state == CaptureState::Capturing {
                self.buffer.end_write();
                inner.state = CaptureState::Idle;
            }
            drop(inner);
            CaptureEnded { lost_bytes: 0 }.emit();
        }
    }

    fn drain_until_eof_or_shutdown(&self) {
        let mut scratch = vec![0u8; self.buffer.block_size()];
        loop {
            if !self.inner.lock().thread_running {
                return;
            }

            let mut wb = self.buffer.get_write_block();
            match self.hw.read_streamed_data(&mut scratch, self.poll_interval) {
                HwReadResult::Data(n) if n > 0 => {
                    wb.as_mut_slice()[..n].copy_from_slice(&scratch[..n]);
                    wb.release(n);
                }
                HwReadResult::Data(_) => {
                    // Zero-byte reads carry no data; drop the write block unreleased
                    // and poll again (`release_write_block` requires `n > 0`).
                }
                HwReadResult::Eof => return,
                HwReadResult::Timeout => {}
            }
        }
    }

    /// Arm the hardware and signal the worker to start capturing.
    ///
    /// Refuses with [`ArmError::BusyCapture`] if a capture is already running, and
    /// [`ArmError::ClientsActive`] if readers from a previous generation are still
    /// attached to the buffer.
    pub fn arm(&self) -> Result<(), ArmError> {
        let (active, reader_count) = self.buffer.read_buffer_status();

        let mut inner = self.inner.lock();
        if inner.state != CaptureState::Idle || active {
            AdmissionRejected { state: inner.state }.emit();
            return Err(ArmError::BusyCapture);
        }
        if reader_count > 0 {
            AdmissionRejected { state: inner.state }.emit();
            return Err(ArmError::ClientsActive);
        }

        self.hw.arm();
        inner.state = CaptureState::Armed;
        self.condvar.notify_all();
        drop(inner);
        CaptureArmed.emit();
        Ok(())
    }

    /// Disarm the hardware. If a capture is already in flight, the buffer drains
    /// naturally: the worker observes EOF from the now-disarmed hardware and ends the
    /// write itself. Only an `Armed` (not yet `Capturing`) state is stepped down to
    /// `Idle` here directly.
    pub fn disarm(&self) {
        self.hw.disarm();
        let mut inner = self.inner.lock();
        if inner.state == CaptureState::Armed {
            inner.state = CaptureState::Idle;
        }
        drop(inner);
        CaptureDisarmed.emit();
    }

    /// Disarm and forcibly reset the buffer, stranding any attached readers into
    /// `Reset`. Holds `self.inner` across the whole check-then-act sequence so it
    /// can't race the worker's own `start_write`/`end_write` pair in
    /// [`CaptureCoordinator::worker_loop`]. Without that, a worker transition landing
    /// in the gap between the active check and `reset_buffer()` could hand the buffer
    /// an active write it doesn't know about, and `reset_buffer()` would panic.
    pub fn reset(&self) {
        self.hw.disarm();
        let mut inner = self.inner.lock();
        if inner.state == CaptureState::Capturing {
            self.buffer.end_write();
        }
        inner.state = CaptureState::Idle;
        self.buffer.reset_buffer();
        drop(inner);
        CaptureReset.emit();
    }

    /// `*CAPTURE.STATUS?`: `Busy|Idle <readers> <active>`.
    pub fn status_line(&self) -> String {
        let (active, reader_count) = self.buffer.read_buffer_status();
        let busy = if self.state() == CaptureState::Idle { "Idle" } else { "Busy" };
        format!("{busy} {reader_count} {active}\n")
    }

    /// Stop the worker thread. Safe to call whether or not a capture is in flight;
    /// the worker observes this between polls.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.thread_running = false;
        self.condvar.notify_all();
    }
}
