//! The glue around [`capture_buffer`] and [`lut_compiler`] that turns them into a
//! runnable server: a [`coordinator::CaptureCoordinator`] driving the buffer from a
//! [`hardware::HwCapture`] source, per-client [`session::run_session`] handling of the
//! data protocol, and a minimal [`control`] verb dispatcher.

pub mod config;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod hardware;
pub mod internal_events;
pub mod session;

pub use config::{Cli, ConfigLoadError, ServerConfig};
pub use coordinator::{ArmError, CaptureCoordinator, CaptureState};
pub use error::{CommandError, TransportError};
pub use hardware::{HwCapture, HwReadResult, SimulatedHardware};
