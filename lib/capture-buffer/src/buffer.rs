use std::cell::UnsafeCell;
use std::slice;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::BufferBuildError;
use crate::reader::{Reader, ReaderStatus};

/// Raw byte storage for the ring, kept outside the buffer's mutex.
///
/// The writer fills a slot without holding the lock ("the mutex must not be held
/// while doing I/O"), and readers copy a slot's bytes after releasing the lock they
/// used to snapshot its metadata. Both sides reach the bytes through `UnsafeCell` so
/// that this is a deliberate, documented exception to Rust's aliasing rules rather than
/// an accidental one:
///
/// - There is at most one writer at a time, by construction (one capture worker thread
///   owns the sole [`WriteBlock`] in existence for a given buffer).
/// - A reader's unlocked copy of a slot races with the writer only in the overrun case
///   — the writer would have to lap the entire ring while that one slot is being
///   copied. [`CircularBuffer::get_read_block`] re-validates the reader's position
///   against the buffer immediately after the copy and discards the result if that
///   happened, so a torn read is only ever detected and dropped, never observed.
struct Storage {
    bytes: Box<[UnsafeCell<u8>]>,
}

// Safety: `Storage` is shared across the single writer thread and any number of reader
// threads. All access goes through raw pointers derived from `UnsafeCell`, gated by the
// single-writer invariant and the overrun re-check described above.
unsafe impl Sync for Storage {}

impl Storage {
    fn new(len: usize) -> Self {
        let bytes = (0..len).map(|_| UnsafeCell::new(0u8)).collect();
        Storage { bytes }
    }

    /// # Safety
    /// Caller must ensure no other thread is concurrently writing to this exact byte
    /// range through [`Storage::slot_ptr`].
    unsafe fn slot_slice(&self, offset: usize, len: usize) -> &[u8] {
        let ptr = self.bytes[offset].get() as *const u8;
        slice::from_raw_parts(ptr, len)
    }

    fn slot_ptr(&self, offset: usize) -> *mut u8 {
        self.bytes[offset].get()
    }
}

/// Buffer-internal state, mutated only while holding [`CircularBuffer::state`]'s lock.
struct State {
    in_ptr: usize,
    cycle_count: u64,
    capture_count: u64,
    active: bool,
    reader_count: usize,
    lost_bytes: u64,
    written: Vec<usize>,
}

/// A fixed-size ring of equal-sized blocks with one producer and any number of
/// independent, rate-decoupled consumers.
///
/// See the crate-level docs for the concurrency contract. In short: all metadata
/// (`in_ptr`, `cycle_count`, `capture_count`, `reader_count`, `lost_bytes`, `written`,
/// `active`) lives behind one [`parking_lot::Mutex`] and is signalled through one
/// [`parking_lot::Condvar`]; the byte storage itself lives outside both so that the
/// writer can fill a block, and readers can copy one out, without holding the lock
/// across the actual memory traffic.
pub struct CircularBuffer {
    block_size: usize,
    block_count: usize,
    storage: Storage,
    state: Mutex<State>,
    condvar: Condvar,
}

/// A handle to the slot the sole writer is currently allowed to fill.
///
/// Borrowed from [`CircularBuffer::get_write_block`]; dropping it without calling
/// [`WriteBlock::release`] simply abandons the write (the slot keeps whatever bytes
/// were already in it from its previous occupant, as `written` was never updated).
pub struct WriteBlock<'a> {
    buffer: &'a CircularBuffer,
    slot: usize,
}

impl<'a> WriteBlock<'a> {
    /// The exclusive, mutable byte region for this slot. Valid for `block_size` bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: the capture worker is the only thread that ever holds a `WriteBlock`,
        // and `CircularBuffer::get_write_block` only ever hands out one at a time.
        unsafe { slice::from_raw_parts_mut(self.buffer.storage.slot_ptr(self.byte_offset()), self.buffer.block_size) }
    }

    fn byte_offset(&self) -> usize {
        self.slot * self.buffer.block_size
    }

    /// Publish `n` bytes as the content of this slot and advance the writer cursor.
    ///
    /// `n` must be greater than zero; see [`CircularBuffer::release_write_block`].
    pub fn release(self, n: usize) {
        self.buffer.release_write_block(self.slot, n);
    }
}

/// The outcome of [`CircularBuffer::get_read_block`].
pub enum ReadOutcome {
    /// A block's worth of bytes, copied out of the ring.
    Data(Vec<u8>),
    /// The reader reached one of its terminal states; it should be closed.
    Done(ReaderStatus),
}

impl CircularBuffer {
    /// Create a buffer of `block_count` blocks, each `block_size` bytes.
    pub fn create(block_size: usize, block_count: usize) -> Result<Self, BufferBuildError> {
        if block_size == 0 {
            return Err(BufferBuildError::ZeroBlockSize);
        }
        if block_count < 2 {
            return Err(BufferBuildError::TooFewBlocks { block_count });
        }

        Ok(CircularBuffer {
            block_size,
            block_count,
            storage: Storage::new(block_size * block_count),
            state: Mutex::new(State {
                in_ptr: 0,
                cycle_count: 0,
                capture_count: 0,
                active: false,
                reader_count: 0,
                lost_bytes: 0,
                written: vec![0; block_count],
            }),
            condvar: Condvar::new(),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Begin a new capture.
    ///
    /// # Panics
    /// Panics if a capture is already active or a reader is still attached to the
    /// previous generation; both are programmer-contract violations.
    pub fn start_write(&self) {
        let mut st = self.state.lock();
        assert!(!st.active, "start_write called while a capture is already active");
        assert_eq!(st.reader_count, 0, "start_write called with readers still attached");

        st.cycle_count = 0;
        st.in_ptr = 0;
        st.lost_bytes = 0;
        st.written.iter_mut().for_each(|w| *w = 0);
        st.active = true;
        debug!(block_size = self.block_size, block_count = self.block_count, "capture started");
    }

    /// Obtain the slot the writer may now fill. Non-blocking.
    ///
    /// # Panics
    /// Panics if no capture is active.
    pub fn get_write_block(&self) -> WriteBlock<'_> {
        let st = self.state.lock();
        assert!(st.active, "get_write_block called while no capture is active");
        WriteBlock { buffer: self, slot: st.in_ptr }
    }

    /// Publish `n` bytes written into `slot` and advance the writer cursor.
    ///
    /// # Panics
    /// Panics if `n == 0` or no capture is active — both are programmer errors, not
    /// recoverable conditions.
    fn release_write_block(&self, slot: usize, n: usize) {
        assert!(n > 0, "release_write_block called with a zero byte count");

        let mut st = self.state.lock();
        assert!(st.active, "release_write_block called while no capture is active");
        assert_eq!(slot, st.in_ptr, "release_write_block called for a stale slot");

        st.lost_bytes += st.written[st.in_ptr] as u64;
        st.written[st.in_ptr] = n;

        st.in_ptr += 1;
        if st.in_ptr == self.block_count {
            st.in_ptr = 0;
            st.cycle_count += 1;
        }

        self.condvar.notify_all();
    }

    /// End the current capture.
    ///
    /// If no readers remain attached, the generation is recycled immediately;
    /// otherwise attached readers observe end-of-stream on their next wake.
    pub fn end_write(&self) {
        let mut st = self.state.lock();
        st.active = false;
        if st.reader_count == 0 {
            st.capture_count += 1;
        }
        self.condvar.notify_all();
        debug!(lost_bytes = st.lost_bytes, "capture ended");
    }

    /// Reset the buffer to its idle state.
    ///
    /// # Panics
    /// Panics if a capture is active — callers must `end_write` (or let it run to
    /// completion) first.
    pub fn reset_buffer(&self) {
        let mut st = self.state.lock();
        assert!(!st.active, "reset_buffer called while a capture is active");
        if st.reader_count > 0 {
            st.reader_count = 0;
            st.capture_count += 1;
            self.condvar.notify_all();
            warn!("buffer reset with readers still attached; they will observe Reset");
        }
    }

    /// A snapshot of `(active, reader_count)` for observability.
    pub fn read_buffer_status(&self) -> (bool, usize) {
        let st = self.state.lock();
        (st.active, st.reader_count)
    }

    /// Attach a new reader, `read_margin + 1` slots behind the current write position.
    ///
    /// Returns the reader and the number of bytes it has already missed.
    pub fn open_reader(&self, read_margin: usize) -> (Reader, u64) {
        let mut st = self.state.lock();

        let (cycle_count, out_ptr, lost_bytes_at_open) =
            if st.cycle_count == 0 && st.in_ptr + read_margin + 1 < self.block_count {
                (0, 0, 0)
            } else {
                let candidate = st.in_ptr + read_margin + 1;
                // A candidate that falls within bounds without wrapping is, perhaps
                // counter-intuitively, data from the *previous* lap: the writer has not
                // yet passed this index again during its current revolution. A
                // candidate that wraps past `block_count` has already been written
                // during the current revolution.
                let (cycle_count, out_ptr) = if candidate >= self.block_count {
                    (st.cycle_count, candidate - self.block_count)
                } else {
                    (st.cycle_count - 1, candidate)
                };

                let mut missed = st.lost_bytes;
                let mut s = st.in_ptr;
                while s != out_ptr {
                    missed += st.written[s] as u64;
                    s = (s + 1) % self.block_count;
                }
                (cycle_count, out_ptr, missed)
            };

        st.reader_count += 1;
        let reader = Reader {
            cycle_count,
            out_ptr,
            capture_count: st.capture_count,
            status: ReaderStatus::Closed,
        };

        info!(reader_count = st.reader_count, lost_bytes_at_open, "reader attached");
        metrics::gauge!("capture_buffer_readers").set(st.reader_count as f64);

        (reader, lost_bytes_at_open)
    }

    fn reader_is_safe(rc: u64, ro: usize, bc: u64, bi: usize) -> bool {
        if bi == ro {
            return false;
        }
        if bi > ro {
            bc == rc
        } else {
            bc == rc + 1
        }
    }

    /// Confirm that the slot `reader` is about to consume has not been overrun, and
    /// that the capture generation it was opened against still matches the buffer's.
    /// Updates `reader.status` on failure.
    pub fn check_read_block(&self, reader: &mut Reader) -> bool {
        let st = self.state.lock();
        self.check_locked(reader, &st)
    }

    fn check_locked(&self, reader: &mut Reader, st: &State) -> bool {
        if reader.capture_count != st.capture_count {
            reader.status = ReaderStatus::Reset;
            return false;
        }
        if !Self::reader_is_safe(reader.cycle_count, reader.out_ptr, st.cycle_count, st.in_ptr) {
            reader.status = ReaderStatus::Overrun;
            return false;
        }
        true
    }

    /// Wait for (and consume) the next block this reader hasn't seen yet.
    ///
    /// Blocks while the buffer is active and the reader is caught up to the writer.
    /// Returns `Done(AllRead)` once the capture has ended and the reader has consumed
    /// everything; `Done(Overrun)` / `Done(Reset)` if the writer lapped the reader or
    /// the buffer's generation moved on, either before or immediately after the copy.
    pub fn get_read_block(&self, reader: &mut Reader) -> ReadOutcome {
        let (slot, len) = {
            let mut st = self.state.lock();
            loop {
                if reader.capture_count != st.capture_count {
                    reader.status = ReaderStatus::Reset;
                    return ReadOutcome::Done(ReaderStatus::Reset);
                }

                let caught_up = reader.out_ptr == st.in_ptr && reader.cycle_count == st.cycle_count;
                if !caught_up {
                    break;
                }
                if !st.active {
                    reader.status = ReaderStatus::AllRead;
                    return ReadOutcome::Done(ReaderStatus::AllRead);
                }
                self.condvar.wait(&mut st);
            }

            if !self.check_locked(reader, &st) {
                return ReadOutcome::Done(reader.status);
            }

            let slot = reader.out_ptr;
            let len = st.written[slot];

            reader.out_ptr += 1;
            if reader.out_ptr == self.block_count {
                reader.out_ptr = 0;
                reader.cycle_count += 1;
            }

            (slot, len)
        };

        // Safety: the lock above established that slot `slot` holds `len` published
        // bytes; we've released the lock, so the copy below races only with the
        // pathological full-lap-during-one-block-copy overrun case, which the
        // re-check immediately after catches and discards.
        let data = unsafe { self.storage.slot_slice(slot * self.block_size, len) }.to_vec();

        {
            let st = self.state.lock();
            if !self.check_locked(reader, &st) {
                return ReadOutcome::Done(reader.status);
            }
        }

        ReadOutcome::Data(data)
    }

    /// Detach `reader`. Returns its terminal status.
    pub fn close_reader(&self, reader: Reader) -> ReaderStatus {
        let mut st = self.state.lock();
        if reader.capture_count == st.capture_count {
            st.reader_count -= 1;
            if st.reader_count == 0 && !st.active {
                st.capture_count += 1;
            }
        }
        metrics::gauge!("capture_buffer_readers").set(st.reader_count as f64);
        debug!(status = ?reader.status, "reader closed");
        reader.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_zero_block_size() {
        assert_eq!(CircularBuffer::create(0, 4).unwrap_err(), BufferBuildError::ZeroBlockSize);
    }

    #[test]
    fn create_rejects_too_few_blocks() {
        assert_eq!(
            CircularBuffer::create(16, 1).unwrap_err(),
            BufferBuildError::TooFewBlocks { block_count: 1 }
        );
    }

    #[test]
    fn write_then_read_round_trips_bytes() {
        let buf = CircularBuffer::create(4, 3).unwrap();
        buf.start_write();

        let mut wb = buf.get_write_block();
        wb.as_mut_slice().copy_from_slice(b"abcd");
        wb.release(4);
        buf.end_write();

        let (mut reader, missed) = buf.open_reader(0);
        assert_eq!(missed, 0);
        match buf.get_read_block(&mut reader) {
            ReadOutcome::Data(bytes) => assert_eq!(bytes, b"abcd"),
            ReadOutcome::Done(status) => panic!("expected data, got {status:?}"),
        }
        assert!(matches!(buf.get_read_block(&mut reader), ReadOutcome::Done(ReaderStatus::AllRead)));
        assert_eq!(buf.close_reader(reader), ReaderStatus::AllRead);
    }

    /// A reader opened against a buffer that has already lapped (`in_ptr` has wrapped
    /// once) lands behind the writer without wrapping itself. Traced by hand against a
    /// 4-block buffer after five 16-byte writes: `in_ptr=1, cycle_count=1,
    /// lost_bytes=16, written=[16,16,16,16]`; `open_reader(read_margin=1)` computes
    /// `candidate = in_ptr + read_margin + 1 = 3`, which is `< block_count`, so the
    /// reader starts one cycle behind the writer's.
    #[test]
    fn open_reader_lands_safely_without_wrapping() {
        let buf = CircularBuffer::create(16, 4).unwrap();
        buf.start_write();
        for _ in 0..5 {
            let mut wb = buf.get_write_block();
            wb.as_mut_slice().fill(0xAB);
            wb.release(16);
        }

        let (mut reader, missed) = buf.open_reader(1);
        assert_eq!(reader.out_ptr, 3);
        assert_eq!(reader.cycle_count, 0);
        // Every byte the writer has laid down since the buffer's own `lost_bytes`
        // baseline, up to (but not including) the reader's landing slot, counts as
        // missed: the buffer's own 16 plus the two full blocks between `in_ptr` and
        // `out_ptr`.
        assert_eq!(missed, 48);
        assert!(buf.check_read_block(&mut reader));
    }

    /// Mirrors the non-wrapping case above but with a `read_margin` that pushes the
    /// candidate slot past `block_count`, landing the reader in the writer's current
    /// cycle instead of the previous one.
    #[test]
    fn open_reader_lands_safely_while_wrapping() {
        let buf = CircularBuffer::create(16, 4).unwrap();
        buf.start_write();
        for _ in 0..7 {
            let mut wb = buf.get_write_block();
            wb.as_mut_slice().fill(0xCD);
            wb.release(16);
        }
        // Seven writes into a 4-block ring: in_ptr = 7 % 4 = 3, cycle_count = 1.
        let (mut reader, _missed) = buf.open_reader(1);
        assert_eq!(reader.out_ptr, 1);
        assert_eq!(reader.cycle_count, 1);
        assert!(buf.check_read_block(&mut reader));
    }

    #[test]
    fn writer_lapping_reader_is_an_overrun() {
        let buf = CircularBuffer::create(8, 3).unwrap();
        buf.start_write();

        let (mut reader, _) = buf.open_reader(0);

        for _ in 0..3 {
            let mut wb = buf.get_write_block();
            wb.as_mut_slice().fill(1);
            wb.release(8);
        }
        // The reader is still at slot 0, cycle 0; the writer has wrapped exactly once
        // and is back at slot 0, cycle 1 — `reader_is_safe` calls that an overrun.
        assert!(!buf.check_read_block(&mut reader));
        assert_eq!(reader.status(), ReaderStatus::Overrun);

        assert!(matches!(buf.get_read_block(&mut reader), ReadOutcome::Done(ReaderStatus::Overrun)));
    }

    #[test]
    fn reset_buffer_marks_attached_readers_reset() {
        let buf = CircularBuffer::create(8, 2).unwrap();
        buf.start_write();
        buf.end_write();

        let (mut reader, _) = buf.open_reader(0);
        buf.reset_buffer();

        assert!(matches!(buf.get_read_block(&mut reader), ReadOutcome::Done(ReaderStatus::Reset)));
        assert_eq!(buf.close_reader(reader), ReaderStatus::Reset);
    }

    #[test]
    fn closing_last_reader_after_capture_ends_recycles_generation() {
        let buf = CircularBuffer::create(8, 2).unwrap();
        buf.start_write();
        let (reader, _) = buf.open_reader(0);
        buf.end_write();

        let before = buf.state.lock().capture_count;
        buf.close_reader(reader);
        let after = buf.state.lock().capture_count;
        assert_eq!(after, before + 1);

        // A fresh capture is now free to start even though the old reader never
        // formally observed AllRead.
        buf.start_write();
        buf.end_write();
    }

    #[test]
    #[should_panic(expected = "already active")]
    fn start_write_twice_panics() {
        let buf = CircularBuffer::create(8, 2).unwrap();
        buf.start_write();
        buf.start_write();
    }

    #[test]
    #[should_panic(expected = "readers still attached")]
    fn start_write_with_attached_readers_panics() {
        let buf = CircularBuffer::create(8, 2).unwrap();
        buf.start_write();
        let (_reader, _) = buf.open_reader(0);
        buf.end_write();
        buf.start_write();
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    const BLOCK_SIZE: usize = 8;

    proptest! {
        /// Universal property: after any sequence of `release_write_block(n_i)`,
        /// `lost_bytes` equals the sum of every `n_j` for a slot written earlier but
        /// since overwritten. `open_reader` with `read_margin = block_count - 1` lands
        /// `out_ptr` exactly on `in_ptr`, so its `lost_bytes_at_open` (buffer `lost_bytes`
        /// plus slots strictly between `in_ptr` and `out_ptr`, which is none here) is
        /// the buffer's own `lost_bytes` with nothing added — the one way to observe it
        /// through the public API without a test-only accessor.
        #[test]
        fn lost_bytes_matches_sum_of_overwritten_slots(
            block_count in 2usize..6,
            lens in prop::collection::vec(1usize..=BLOCK_SIZE, 1..40),
        ) {
            let buf = CircularBuffer::create(BLOCK_SIZE, block_count).unwrap();
            buf.start_write();

            let mut written = vec![0usize; block_count];
            let mut in_ptr = 0usize;
            let mut expected_lost: u64 = 0;

            for &len in &lens {
                let mut wb = buf.get_write_block();
                wb.as_mut_slice()[..len].fill(0xAB);
                wb.release(len);

                expected_lost += written[in_ptr] as u64;
                written[in_ptr] = len;
                in_ptr = (in_ptr + 1) % block_count;
            }

            buf.end_write();

            let (reader, lost_bytes) = buf.open_reader(block_count - 1);
            prop_assert_eq!(lost_bytes, expected_lost);
            buf.close_reader(reader);
        }
    }
}
