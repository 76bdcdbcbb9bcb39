/// Terminal status of a [`Reader`].
///
/// A reader starts `Closed` (meaning: not yet terminated) and transitions to exactly
/// one of the other three states before it is dropped. None of these transitions are
/// reversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderStatus {
    /// No terminal condition has been observed yet; the reader may still be read from.
    Closed,
    /// The writer ended the capture and the reader has consumed every block it wrote.
    AllRead,
    /// The writer lapped this reader before it could consume a block.
    Overrun,
    /// The buffer was reset (or the capture's generation otherwise moved on) while this
    /// reader was still attached.
    Reset,
}

impl ReaderStatus {
    /// The `completion string` a [`crate`] consumer sends back to its client, per the
    /// capture-server wire protocol.
    pub fn completion_message(self) -> &'static str {
        match self {
            ReaderStatus::Closed | ReaderStatus::AllRead => "OK\n",
            ReaderStatus::Overrun => "ERR Data overrun\n",
            ReaderStatus::Reset => "ERR Connection reset\n",
        }
    }
}

/// A subscription into a [`crate::CircularBuffer`].
///
/// A `Reader` carries its own cursor (`cycle_count`, `out_ptr`) and the generation
/// (`capture_count`) it was opened against. It does not hold a reference back to its
/// buffer: every operation that needs one takes both the buffer and the reader
/// explicitly (`buffer.get_read_block(&mut reader)`, and so on), mirroring the
/// non-owning, generation-checked handle described for this type in the design notes.
#[derive(Debug, Clone, Copy)]
pub struct Reader {
    pub(crate) cycle_count: u64,
    pub(crate) out_ptr: usize,
    pub(crate) capture_count: u64,
    pub(crate) status: ReaderStatus,
}

impl Reader {
    /// The reader's terminal status as of the last operation performed on it.
    pub fn status(&self) -> ReaderStatus {
        self.status
    }

    /// `true` if the reader has reached one of its terminal states and must be closed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, ReaderStatus::Closed)
    }
}
