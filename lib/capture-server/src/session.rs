//! Per-client handler for the data-streaming protocol: parse one options line,
//! wait for a capture to attach a reader to, send a header, drain the reader, and emit
//! one completion string. Repeats until the client disconnects.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use capture_buffer::{CircularBuffer, ReadOutcome, ReaderStatus};

use crate::error::{CommandError, TransportError};
use crate::internal_events::{SessionEnded, SessionStarted};

/// How a drained sample block is re-encoded before it goes out on the wire.
///
/// `Ascii` is a minimal format/transform stage: one
/// decimal little-endian `u32` sample per line, the same kind of human-readable
/// fallback the control protocol's `name?` replies already use elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Raw,
    Ascii,
}

/// The two option keys a client may send on its request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataOptions {
    pub format: DataFormat,
    pub no_header: bool,
}

impl Default for DataOptions {
    fn default() -> Self {
        DataOptions { format: DataFormat::Raw, no_header: false }
    }
}

/// Parse a client's options line (space-separated `key=value` pairs and bare flags).
pub fn parse_options(line: &str) -> Result<DataOptions, CommandError> {
    let mut options = DataOptions::default();

    for token in line.split_whitespace() {
        match token.split_once('=') {
            Some(("format", "raw")) => options.format = DataFormat::Raw,
            Some(("format", "ascii")) => options.format = DataFormat::Ascii,
            Some(("format", _)) => return Err(CommandError::BadFormat { text: token.to_owned() }),
            None if token == "no_header" => options.no_header = true,
            _ => return Err(CommandError::UnknownOption { key: token.to_owned() }),
        }
    }

    Ok(options)
}

/// Re-encode one drained sample block per `options.format`.
pub fn compute_output_data(format: DataFormat, block: &[u8]) -> Vec<u8> {
    match format {
        DataFormat::Raw => block.to_vec(),
        DataFormat::Ascii => {
            let mut out = String::new();
            for chunk in block.chunks_exact(4) {
                let sample = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                out.push_str(&sample.to_string());
                out.push('\n');
            }
            out.into_bytes()
        }
    }
}

/// The socket operations [`run_session`] needs. Abstracted so the session logic can be
/// driven against an in-memory double in tests without a real TCP connection.
pub trait ClientSocket {
    /// Read one newline-terminated line, with the trailing newline stripped.
    /// `Ok(None)` means the peer closed the connection cleanly.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// A non-blocking receive of a small number of bytes, discarding whatever it
    /// reads (stray client bytes, e.g. keepalives). Returns `true` if the
    /// connection is still alive.
    fn probe_liveness(&mut self) -> bool;
}

/// A [`ClientSocket`] backed by a real [`TcpStream`].
pub struct TcpClient {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl TcpClient {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        Ok(TcpClient { stream, pending: Vec::new() })
    }
}

impl ClientSocket for TcpClient {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let rest = self.pending.split_off(pos + 1);
                let mut line = std::mem::replace(&mut self.pending, rest);
                line.pop(); // trailing '\n'
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            let mut tmp = [0u8; 512];
            match self.stream.read(&mut tmp) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&tmp[..n]),
                Err(e) => return Err(e),
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)
    }

    fn probe_liveness(&mut self) -> bool {
        let _ = self.stream.set_nonblocking(true);
        let mut tmp = [0u8; 256];
        let alive = match self.stream.read(&mut tmp) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        };
        let _ = self.stream.set_nonblocking(false);
        alive
    }
}

/// How long to sleep between liveness probes while waiting for a capture to start
/// (a small polling interval, e.g. 100ms).
pub const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Run the full per-client protocol loop against `socket` until the client
/// disconnects or a transport error occurs.
pub fn run_session<S: ClientSocket>(
    socket: &mut S,
    buffer: &Arc<CircularBuffer>,
    read_margin: usize,
) -> Result<(), TransportError> {
    SessionStarted.emit();
    let outcome = run_loop(socket, buffer, read_margin);
    SessionEnded { outcome: if outcome.is_ok() { "disconnected" } else { "transport_error" } }.emit();
    outcome
}

fn run_loop<S: ClientSocket>(
    socket: &mut S,
    buffer: &Arc<CircularBuffer>,
    read_margin: usize,
) -> Result<(), TransportError> {
    loop {
        let line = match socket.read_line()? {
            Some(line) => line,
            None => return Ok(()),
        };

        let options = match parse_options(&line) {
            Ok(options) => {
                socket.write_all(b"OK\n")?;
                options
            }
            Err(e) => {
                socket.write_all(e.completion_message().as_bytes())?;
                continue;
            }
        };

        if !wait_for_capture_or_disconnect(socket, buffer) {
            // Client left before a capture ever attached a reader; best-effort reply,
            // ignore any write failure since the peer is already gone.
            let _ = socket.write_all(CommandError::EarlyDisconnect.completion_message().as_bytes());
            continue;
        }

        let (mut reader, lost_bytes_at_open) = buffer.open_reader(read_margin);

        if !options.no_header {
            send_data_header(socket, lost_bytes_at_open, options)?;
        }

        let status = drain_reader(socket, buffer, &mut reader, options)?;
        let final_status = buffer.close_reader(reader);
        debug_assert_eq!(status, final_status);
        socket.write_all(final_status.completion_message().as_bytes())?;
    }
}

/// Poll-wait for a capture to be active, interleaving liveness probes so a client that
/// vanishes before anything ever starts doesn't pin a thread forever.
fn wait_for_capture_or_disconnect<S: ClientSocket>(socket: &mut S, buffer: &Arc<CircularBuffer>) -> bool {
    loop {
        let (active, _reader_count) = buffer.read_buffer_status();
        if active {
            return true;
        }
        if !socket.probe_liveness() {
            return false;
        }
        std::thread::sleep(PROBE_INTERVAL);
    }
}

fn send_data_header<S: ClientSocket>(
    socket: &mut S,
    lost_bytes_at_open: u64,
    options: DataOptions,
) -> Result<(), TransportError> {
    let format = match options.format {
        DataFormat::Raw => "raw",
        DataFormat::Ascii => "ascii",
    };
    socket.write_all(format!("missed: {lost_bytes_at_open}\nformat: {format}\n.\n").as_bytes())?;
    Ok(())
}

fn drain_reader<S: ClientSocket>(
    socket: &mut S,
    buffer: &Arc<CircularBuffer>,
    reader: &mut capture_buffer::Reader,
    options: DataOptions,
) -> Result<ReaderStatus, TransportError> {
    loop {
        match buffer.get_read_block(reader) {
            ReadOutcome::Data(block) => {
                let out = compute_output_data(options.format, &block);
                socket.write_all(&out)?;
            }
            ReadOutcome::Done(status) => return Ok(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MockSocket {
        lines: VecDeque<String>,
        written: Vec<u8>,
        connected: bool,
    }

    impl MockSocket {
        fn new(lines: Vec<&str>) -> Self {
            MockSocket { lines: lines.into_iter().map(str::to_owned).collect(), written: Vec::new(), connected: true }
        }
    }

    impl ClientSocket for MockSocket {
        fn read_line(&mut self) -> io::Result<Option<String>> {
            Ok(self.lines.pop_front())
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.written.extend_from_slice(buf);
            Ok(())
        }

        fn probe_liveness(&mut self) -> bool {
            self.connected
        }
    }

    #[test]
    fn parse_options_defaults_to_raw_with_header() {
        assert_eq!(parse_options("").unwrap(), DataOptions { format: DataFormat::Raw, no_header: false });
    }

    #[test]
    fn parse_options_accepts_format_and_no_header() {
        let opts = parse_options("format=ascii no_header").unwrap();
        assert_eq!(opts, DataOptions { format: DataFormat::Ascii, no_header: true });
    }

    #[test]
    fn parse_options_rejects_unknown_key() {
        assert_eq!(parse_options("bogus=1").unwrap_err(), CommandError::UnknownOption { key: "bogus=1".to_owned() });
    }

    #[test]
    fn parse_options_rejects_bad_format_value() {
        assert_eq!(
            parse_options("format=weird").unwrap_err(),
            CommandError::BadFormat { text: "format=weird".to_owned() }
        );
    }

    #[test]
    fn compute_output_data_raw_is_identity() {
        assert_eq!(compute_output_data(DataFormat::Raw, &[1, 2, 3, 4]), vec![1, 2, 3, 4]);
    }

    #[test]
    fn compute_output_data_ascii_decodes_little_endian_samples() {
        let block = 42u32.to_le_bytes();
        assert_eq!(compute_output_data(DataFormat::Ascii, &block), b"42\n".to_vec());
    }

    #[test]
    fn session_completes_a_full_capture_and_reports_ok() {
        let buffer = Arc::new(CircularBuffer::create(8, 2).unwrap());
        buffer.start_write();
        {
            let mut wb = buffer.get_write_block();
            wb.as_mut_slice().copy_from_slice(b"ABCDEFGH");
            wb.release(8);
        }

        // The session attaches while the capture is still active (session waits only
        // for `active`, never for stale generations) and blocks, caught up, until a
        // second thread ends the capture, mirroring how a live client actually races
        // against the capture worker.
        let ender = Arc::clone(&buffer);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            ender.end_write();
        });

        let mut socket = MockSocket::new(vec!["no_header"]);
        run_session(&mut socket, &buffer, 0).unwrap();
        handle.join().unwrap();

        assert_eq!(socket.written, b"OK\nABCDEFGHOK\n".to_vec());
    }

    #[test]
    fn drain_reader_surfaces_overrun_as_the_reader_status() {
        let buffer = Arc::new(CircularBuffer::create(8, 2).unwrap());
        buffer.start_write();
        let (mut reader, _) = buffer.open_reader(0);

        // Three releases into a 2-block ring, with the reader never consuming
        // anything: the writer wraps and laps the reader before it reads a byte.
        for _ in 0..3 {
            let mut wb = buffer.get_write_block();
            wb.as_mut_slice().fill(1);
            wb.release(8);
        }

        let mut socket = MockSocket::new(vec![]);
        let status = drain_reader(&mut socket, &buffer, &mut reader, DataOptions::default()).unwrap();
        assert_eq!(status, ReaderStatus::Overrun);
    }

    #[test]
    fn unknown_option_gets_an_err_reply_and_the_session_continues() {
        let buffer = Arc::new(CircularBuffer::create(8, 2).unwrap());
        let mut socket = MockSocket::new(vec!["bogus", ""]);
        socket.connected = false; // second iteration's wait-for-capture bails out fast
        run_session(&mut socket, &buffer, 0).unwrap();
        assert!(String::from_utf8_lossy(&socket.written).starts_with("ERR unknown option 'bogus'\n"));
    }
}
