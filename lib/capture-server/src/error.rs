use snafu::Snafu;

/// Errors reported back to the originating client as `ERR <message>\n`.
///
/// Kept strictly apart from [`TransportError`] per the two error domains named in the
/// design: a command error never closes the session, and a transport error is never
/// shown to the client that triggered it (it may not even be the client whose socket
/// failed, if the failure surfaces while draining a reader for someone else).
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum CommandError {
    #[snafu(display("unknown option '{key}'"))]
    UnknownOption { key: String },

    #[snafu(display("malformed option '{text}'"))]
    BadFormat { text: String },

    #[snafu(display("Early disconnect"))]
    EarlyDisconnect,
}

impl CommandError {
    /// The completion line this error maps to on the data-streaming wire protocol. The
    /// overrun/reset completion strings are not built from this type — they come from
    /// [`capture_buffer::ReaderStatus::completion_message`], the reader's own terminal
    /// status, since those two outcomes originate in the buffer, not in option parsing
    /// or the pre-capture wait.
    pub fn completion_message(&self) -> String {
        format!("ERR {self}\n")
    }
}

/// Errors arising from socket or file I/O. These close the affected session only; they
/// are logged, never sent to a client (the client may already be gone).
#[derive(Debug, Snafu)]
pub enum TransportError {
    #[snafu(display("transport error: {source}"))]
    Io { source: std::io::Error },
}

impl From<std::io::Error> for TransportError {
    fn from(source: std::io::Error) -> Self {
        TransportError::Io { source }
    }
}
