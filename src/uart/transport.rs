// Serial transport to the motor microcontroller
//
// A dedicated reader thread pulls bytes off the port (blocking reads with a
// short timeout) and hands chunks to an async read loop, which frames lines
// and dispatches them. Writes are newline-terminated and serialized by a
// mutex around the writer so concurrent callers never interleave a line.

use serde::Serialize;
use serialport::{DataBits, Parity, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dispatcher::Dispatcher;
use super::error::{LinkError, Result};
use super::framer::LineFramer;
use crate::config::{Config, ConfigError, KEY_UART_BAUDRATE, KEY_UART_PORT, READ_TIMEOUT};

/// Bytes requested per read call
const READ_CHUNK_SIZE: usize = 256;

/// Chunks buffered between the reader thread and the read loop
const CHUNK_QUEUE_LEN: usize = 64;

/// Sink for outbound protocol lines
pub trait LineWriter: Send + Sync {
    /// Write one line; the newline terminator is appended by the writer
    fn write_line(&self, line: &str) -> Result<()>;

    /// Fire-and-forget write: failures are logged and never returned
    fn send(&self, line: &str) {
        if let Err(e) = self.write_line(line) {
            warn!("Unable to send {:?}: {}", line, e);
        }
    }
}

/// Serial port settings. Framing is always 8N1.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl LinkConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(
            config.get_str(KEY_UART_PORT)?,
            config.get_u32(KEY_UART_BAUDRATE)?,
        ))
    }
}

/// Connection state as seen by the owner of the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum LinkState {
    Closed,
    Open,
    /// Read loop stopped on its own (peer gone, I/O or framing error)
    Lost(String),
}

/// Traffic counters of a transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub lines_received: u64,
    pub lines_written: u64,
    pub write_failures: u64,
}

#[derive(Default)]
struct Counters {
    lines_received: AtomicU64,
    lines_written: AtomicU64,
    write_failures: AtomicU64,
}

struct ReadSession {
    cancel: Arc<AtomicBool>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

type Chunk = std::io::Result<Vec<u8>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SerialTransport {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    session: Mutex<Option<ReadSession>>,
    state: watch::Sender<LinkState>,
    counters: Counters,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Closed);
        Self {
            writer: Mutex::new(None),
            session: Mutex::new(None),
            state,
            counters: Counters::default(),
        }
    }

    /// Open the serial device and start the read loop.
    ///
    /// Must be called from within a Tokio runtime. Calling it again while
    /// the link is open does nothing.
    pub fn open(
        self: &Arc<Self>,
        config: &LinkConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<()> {
        let mut session = lock(&self.session);
        if session.is_some() {
            debug!("Serial link already open, ignoring open({})", config.port);
            return Ok(());
        }

        info!(
            "Opening serial link on {} at {} baud (8N1)",
            config.port, config.baud_rate
        );
        let connection_error = |source: serialport::Error| LinkError::Connection {
            port: config.port.clone(),
            source,
        };
        let mut port = serialport::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(config.read_timeout)
            .open()
            .map_err(connection_error)?;

        // The microcontroller treats RTS as a reset line
        if let Err(e) = port.write_request_to_send(false) {
            warn!("Unable to clear RTS on {}: {}", config.port, e);
        }

        let reader = port.try_clone().map_err(connection_error)?;
        self.attach_locked(&mut session, Box::new(port), Box::new(reader), dispatcher)
    }

    /// Run the link over an already open byte stream.
    ///
    /// `reader` should time out periodically (`ErrorKind::TimedOut`) so the
    /// reader thread notices `close()`. End of stream counts as a lost peer.
    pub fn attach(
        self: &Arc<Self>,
        writer: Box<dyn Write + Send>,
        reader: Box<dyn Read + Send>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<()> {
        let mut session = lock(&self.session);
        if session.is_some() {
            debug!("Serial link already open, ignoring attach");
            return Ok(());
        }
        self.attach_locked(&mut session, writer, reader, dispatcher)
    }

    fn attach_locked(
        self: &Arc<Self>,
        session: &mut Option<ReadSession>,
        writer: Box<dyn Write + Send>,
        reader: Box<dyn Read + Send>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<()> {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_LEN);
        let cancel = Arc::new(AtomicBool::new(false));

        let thread_cancel = Arc::clone(&cancel);
        std::thread::Builder::new()
            .name("uart-reader".to_string())
            .spawn(move || pump_reads(reader, chunk_tx, thread_cancel))?;

        *lock(&self.writer) = Some(writer);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let transport = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = transport.read_loop(chunk_rx, shutdown_rx, &dispatcher).await;
            transport.on_read_loop_exit(result);
        });

        *session = Some(ReadSession {
            cancel,
            shutdown: shutdown_tx,
            task,
        });
        self.state.send_replace(LinkState::Open);
        info!("Serial link open");
        Ok(())
    }

    /// Frame inbound chunks and dispatch every complete line.
    /// Returns `Ok` only when shut down through `close()`.
    async fn read_loop(
        &self,
        mut chunks: mpsc::Receiver<Chunk>,
        mut shutdown: oneshot::Receiver<()>,
        dispatcher: &Dispatcher,
    ) -> Result<()> {
        let mut framer = LineFramer::new();

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => return Ok(()),
                chunk = chunks.recv() => match chunk {
                    Some(Ok(bytes)) => {
                        for line in framer.push(&bytes) {
                            self.counters.lines_received.fetch_add(1, Ordering::Relaxed);
                            debug!("<- {}", line);
                            dispatcher.dispatch(&line);
                        }
                        framer.take_overflow()?;
                    }
                    Some(Err(e)) => return Err(LinkError::Disconnected(e.to_string())),
                    None => {
                        return Err(LinkError::Disconnected("reader thread stopped".to_string()));
                    }
                },
            }
        }
    }

    fn on_read_loop_exit(&self, result: Result<()>) {
        let Err(e) = result else {
            return;
        };

        error!("Serial read loop stopped: {}", e);
        if let Some(session) = lock(&self.session).take() {
            session.cancel.store(true, Ordering::Relaxed);
        }
        lock(&self.writer).take();
        self.state.send_replace(LinkState::Lost(e.to_string()));
    }

    /// Stop the read loop and drop the port. In-flight writes may be lost.
    pub async fn close(&self) {
        let session = lock(&self.session).take();
        lock(&self.writer).take();

        if let Some(session) = session {
            session.cancel.store(true, Ordering::Relaxed);
            let _ = session.shutdown.send(());
            if let Err(e) = session.task.await {
                warn!("Serial read loop ended abnormally: {}", e);
            }
            info!("Serial link closed");
        }
        self.state.send_replace(LinkState::Closed);
    }

    pub fn is_open(&self) -> bool {
        lock(&self.session).is_some()
    }

    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    /// Watch link state changes (used by the owner to decide on reconnects)
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            lines_received: self.counters.lines_received.load(Ordering::Relaxed),
            lines_written: self.counters.lines_written.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
        }
    }
}

impl LineWriter for SerialTransport {
    fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = lock(&self.writer);
        let Some(port) = writer.as_mut() else {
            self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
            return Err(LinkError::Closed);
        };

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');

        match port.write_all(&frame).and_then(|()| port.flush()) {
            Ok(()) => {
                self.counters.lines_written.fetch_add(1, Ordering::Relaxed);
                debug!("-> {}", line);
                Ok(())
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                Err(LinkError::Io(e))
            }
        }
    }
}

/// Reader thread body: forward chunks until cancelled, EOF or an I/O error
fn pump_reads(
    mut reader: Box<dyn Read + Send>,
    chunks: mpsc::Sender<Chunk>,
    cancel: Arc<AtomicBool>,
) {
    let mut buf = [0u8; READ_CHUNK_SIZE];

    while !cancel.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => {
                let eof =
                    std::io::Error::new(ErrorKind::UnexpectedEof, "serial port closed by peer");
                let _ = chunks.blocking_send(Err(eof));
                break;
            }
            Ok(n) => {
                if chunks.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    break; // read loop is gone
                }
            }
            Err(e) if matches!(
                e.kind(),
                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
            ) => {}
            Err(e) => {
                let _ = chunks.blocking_send(Err(e));
                break;
            }
        }
    }
    debug!("Serial reader thread exiting");
}
