//! Accept loop binary: parses [`ServerConfig`], builds the shared buffer and
//! coordinator, and runs one thread per connected client on each of the two listening
//! ports (control and data); the thread-per-connection counterpart of this workspace's
//! usual `#[tokio::main]` accept loops, written with OS threads as this subsystem
//! requires.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use anyhow::Context;
use capture_buffer::CircularBuffer;
use capture_server::config::Cli;
use capture_server::control::{self, Registry};
use capture_server::coordinator::CaptureCoordinator;
use capture_server::hardware::SimulatedHardware;
use capture_server::session::{self, TcpClient};
use capture_server::TransportError;
use clap::Parser;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = cli.resolve().context("failed to resolve server configuration")?;

    let buffer = Arc::new(
        CircularBuffer::create(config.block_size, config.block_count).context("invalid buffer configuration")?,
    );
    let hw = Arc::new(SimulatedHardware::new(config.hw_bytes_per_second, None));
    let coordinator = CaptureCoordinator::new(Arc::clone(&buffer), hw);
    let registry = Arc::new(Registry::new());
    let worker = coordinator.spawn_worker();

    let control_listener = TcpListener::bind(config.control_bind)
        .with_context(|| format!("failed to bind control listener on {}", config.control_bind))?;
    let data_listener = TcpListener::bind(config.data_bind)
        .with_context(|| format!("failed to bind data listener on {}", config.data_bind))?;

    tracing::info!(
        control_bind = %config.control_bind,
        data_bind = %config.data_bind,
        block_size = config.block_size,
        block_count = config.block_count,
        "capture server listening.",
    );

    let read_margin = config.read_margin;
    let data_buffer = Arc::clone(&buffer);
    let data_thread = std::thread::spawn(move || {
        for stream in data_listener.incoming().flatten() {
            let buffer = Arc::clone(&data_buffer);
            std::thread::spawn(move || {
                if let Err(error) = handle_data_connection(stream, buffer, read_margin) {
                    tracing::warn!(%error, "data session ended with a transport error.");
                }
            });
        }
    });

    for stream in control_listener.incoming().flatten() {
        let coordinator = Arc::clone(&coordinator);
        let registry = Arc::clone(&registry);
        std::thread::spawn(move || {
            if let Err(error) = handle_control_connection(stream, coordinator, registry) {
                tracing::warn!(%error, "control session ended with a transport error.");
            }
        });
    }

    coordinator.shutdown();
    let _ = worker.join();
    let _ = data_thread.join();
    Ok(())
}

fn handle_control_connection(
    stream: TcpStream,
    coordinator: Arc<CaptureCoordinator>,
    registry: Arc<Registry>,
) -> Result<(), TransportError> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let reply = control::dispatch(&coordinator, &registry, line.trim_end());
        writer.write_all(reply.as_bytes())?;
    }
}

fn handle_data_connection(
    stream: TcpStream,
    buffer: Arc<CircularBuffer>,
    read_margin: usize,
) -> Result<(), TransportError> {
    let mut client = TcpClient::new(stream)?;
    session::run_session(&mut client, &buffer, read_margin)
}
