//! Framed serial I/O: one owned port, an RX thread feeding an incremental
//! parser, and a TX thread draining a bounded frame FIFO.
//!
//! The port is shared between the two threads through a slot guarded by a
//! mutex; the RX side owns reconnection. Every error class is counted, no
//! thread ever aborts on I/O or parse errors.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rover_proto::{MotorParser, ParserStats, UbxParser, UnicoreParser};
use serialport::SerialPort;

/// Incremental parser plugged into a [`SerialLink`]'s RX thread.
pub trait StreamParser: Send + 'static {
    fn consume(&mut self, chunk: &[u8]) -> Vec<Vec<u8>>;
    fn stats(&self) -> ParserStats;
}

impl StreamParser for UbxParser {
    fn consume(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        UbxParser::consume(self, chunk)
    }

    fn stats(&self) -> ParserStats {
        UbxParser::stats(self)
    }
}

impl StreamParser for MotorParser {
    fn consume(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        MotorParser::consume(self, chunk)
    }

    fn stats(&self) -> ParserStats {
        MotorParser::stats(self)
    }
}

impl StreamParser for UnicoreParser {
    fn consume(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        UnicoreParser::consume(self, chunk)
    }

    fn stats(&self) -> ParserStats {
        UnicoreParser::stats(self)
    }
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub device: String,
    pub baud: u32,
    pub read_timeout: Duration,
    pub read_chunk: usize,
    pub rx_fifo: usize,
    pub tx_fifo: usize,
    pub reconnect_delay: Duration,
    /// When set, every received byte is appended to this file for offline
    /// replay.
    pub capture_path: Option<PathBuf>,
}

impl SerialConfig {
    pub fn new(device: impl Into<String>, baud: u32) -> Self {
        Self {
            device: device.into(),
            baud,
            read_timeout: Duration::from_millis(20),
            read_chunk: 4096,
            rx_fifo: 256,
            tx_fifo: 256,
            reconnect_delay: Duration::from_millis(500),
            capture_path: None,
        }
    }
}

/// A validated frame with its receive timestamp.
#[derive(Debug, Clone)]
pub struct RxFrame {
    pub raw: Vec<u8>,
    pub rx_time: Instant,
}

/// Counter snapshot of a link.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub rx_overflows: u64,
    pub tx_overflows: u64,
    pub open_failures: u64,
    pub io_errors: u64,
    pub parser: ParserStats,
}

#[derive(Default)]
struct Counters {
    rx_bytes: u64,
    tx_bytes: u64,
    rx_frames: u64,
    tx_frames: u64,
    rx_overflows: u64,
    tx_overflows: u64,
    open_failures: u64,
    io_errors: u64,
    parser: ParserStats,
}

struct PortSlot {
    handle: Option<Box<dyn SerialPort>>,
    generation: u64,
}

struct Shared {
    cfg: SerialConfig,
    stop: AtomicBool,
    port: Mutex<PortSlot>,
    tx_queue: Mutex<VecDeque<Vec<u8>>>,
    tx_wake: Condvar,
    counters: Mutex<Counters>,
}

impl Shared {
    /// Opens the device and stores a writer clone in the slot. Returns the
    /// reader handle.
    fn open_port(&self) -> Option<Box<dyn SerialPort>> {
        let opened = open_serial(&self.cfg);
        match opened {
            Ok(reader) => match reader.try_clone() {
                Ok(writer) => {
                    let mut slot = self.port.lock().unwrap();
                    slot.handle = Some(writer);
                    slot.generation += 1;
                    info!("serial {}: open at {} baud", self.cfg.device, self.cfg.baud);
                    Some(reader)
                },
                Err(err) => {
                    warn!("serial {}: clone failed: {err}", self.cfg.device);
                    self.counters.lock().unwrap().open_failures += 1;
                    None
                },
            },
            Err(err) => {
                debug!("serial {}: open failed: {err}", self.cfg.device);
                self.counters.lock().unwrap().open_failures += 1;
                None
            },
        }
    }

    fn drop_port(&self) {
        let mut slot = self.port.lock().unwrap();
        slot.handle = None;
        slot.generation += 1;
    }
}

fn open_serial(cfg: &SerialConfig) -> serialport::Result<Box<dyn SerialPort>> {
    let builder = serialport::new(cfg.device.as_str(), cfg.baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(cfg.read_timeout);
    #[cfg(unix)]
    {
        let mut port = builder.open_native()?;
        // Serial devices are exclusively owned by their link; a second
        // opener indicates a deployment error.
        if let Err(err) = port.set_exclusive(true) {
            warn!("serial {}: exclusive open not available: {err}", cfg.device);
        }
        Ok(Box::new(port))
    }
    #[cfg(not(unix))]
    {
        builder.open()
    }
}

/// Handle to a running serial link.
pub struct SerialLink {
    shared: Arc<Shared>,
    rx_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
}

impl SerialLink {
    /// Spawns the RX/TX threads. Opening the device happens on the RX
    /// thread with retries, so a missing device delays rather than fails.
    /// Returns the link handle and the validated-frame receiver.
    pub fn start<P: StreamParser>(cfg: SerialConfig, parser: P) -> (SerialLink, Receiver<RxFrame>) {
        let (frame_tx, frame_rx) = std::sync::mpsc::sync_channel(cfg.rx_fifo);
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            port: Mutex::new(PortSlot {
                handle: None,
                generation: 0,
            }),
            tx_queue: Mutex::new(VecDeque::new()),
            tx_wake: Condvar::new(),
            counters: Mutex::new(Counters::default()),
            cfg,
        });

        let rx_shared = Arc::clone(&shared);
        let rx_thread = std::thread::Builder::new()
            .name("serial-rx".into())
            .spawn(move || rx_loop(rx_shared, parser, frame_tx))
            .ok();

        let tx_shared = Arc::clone(&shared);
        let tx_thread = std::thread::Builder::new()
            .name("serial-tx".into())
            .spawn(move || tx_loop(tx_shared))
            .ok();

        (
            SerialLink {
                shared,
                rx_thread,
                tx_thread,
            },
            frame_rx,
        )
    }

    /// Non-blocking enqueue of a raw frame; false when the TX FIFO is full.
    pub fn send_frame(&self, frame: Vec<u8>) -> bool {
        let mut queue = self.shared.tx_queue.lock().unwrap();
        if queue.len() >= self.shared.cfg.tx_fifo {
            drop(queue);
            self.shared.counters.lock().unwrap().tx_overflows += 1;
            return false;
        }
        queue.push_back(frame);
        drop(queue);
        self.shared.tx_wake.notify_one();
        true
    }

    pub fn stats(&self) -> LinkStats {
        let c = self.shared.counters.lock().unwrap();
        LinkStats {
            rx_bytes: c.rx_bytes,
            tx_bytes: c.tx_bytes,
            rx_frames: c.rx_frames,
            tx_frames: c.tx_frames,
            rx_overflows: c.rx_overflows,
            tx_overflows: c.tx_overflows,
            open_failures: c.open_failures,
            io_errors: c.io_errors,
            parser: c.parser,
        }
    }

    /// Idempotent; joins both threads. They observe the stop flag within
    /// one read timeout / condvar wait.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.tx_wake.notify_all();
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.tx_thread.take() {
            let _ = handle.join();
        }
        self.shared.drop_port();
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn rx_loop<P: StreamParser>(shared: Arc<Shared>, mut parser: P, frames: SyncSender<RxFrame>) {
    let mut port: Option<Box<dyn SerialPort>> = None;
    let mut chunk = vec![0u8; shared.cfg.read_chunk];
    let mut capture = shared.cfg.capture_path.as_ref().and_then(|path| {
        File::create(path)
            .map_err(|err| warn!("serial {}: capture disabled: {err}", shared.cfg.device))
            .ok()
    });

    while !shared.stop.load(Ordering::SeqCst) {
        if port.is_none() {
            port = shared.open_port();
            if port.is_none() {
                std::thread::sleep(shared.cfg.reconnect_delay);
                continue;
            }
        }
        let Some(handle) = port.as_mut() else {
            continue;
        };

        match handle.read(&mut chunk) {
            Ok(0) => {},
            Ok(n) => {
                if let Some(file) = capture.as_mut() {
                    let _ = file.write_all(&chunk[..n]);
                }
                let emitted = parser.consume(&chunk[..n]);
                let mut counters = shared.counters.lock().unwrap();
                counters.rx_bytes += n as u64;
                counters.parser = parser.stats();
                for raw in emitted {
                    match frames.try_send(RxFrame {
                        raw,
                        rx_time: Instant::now(),
                    }) {
                        Ok(()) => counters.rx_frames += 1,
                        Err(TrySendError::Full(_)) => counters.rx_overflows += 1,
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            },
            Err(err)
                if err.kind() == std::io::ErrorKind::TimedOut
                    || err.kind() == std::io::ErrorKind::Interrupted => {},
            Err(err) => {
                warn!("serial {}: read error: {err}", shared.cfg.device);
                shared.counters.lock().unwrap().io_errors += 1;
                port = None;
                shared.drop_port();
                std::thread::sleep(shared.cfg.reconnect_delay);
            },
        }
    }
}

fn tx_loop(shared: Arc<Shared>) {
    let mut handle: Option<Box<dyn SerialPort>> = None;
    let mut generation = 0u64;

    loop {
        // Wait for pending frames or stop.
        let mut pending: Vec<Vec<u8>> = {
            let mut queue = shared.tx_queue.lock().unwrap();
            while queue.is_empty() && !shared.stop.load(Ordering::SeqCst) {
                let (guard, _) = shared
                    .tx_wake
                    .wait_timeout(queue, Duration::from_millis(100))
                    .unwrap();
                queue = guard;
            }
            if shared.stop.load(Ordering::SeqCst) {
                return;
            }
            queue.drain(..).collect()
        };

        // Refresh our writer clone when the RX side reopened the port.
        {
            let slot = shared.port.lock().unwrap();
            if slot.generation != generation {
                generation = slot.generation;
                handle = slot.handle.as_ref().and_then(|h| h.try_clone().ok());
            }
        }

        let Some(port) = handle.as_mut() else {
            // No device; requeue and let the RX side reconnect.
            let mut queue = shared.tx_queue.lock().unwrap();
            for frame in pending.drain(..).rev() {
                if queue.len() < shared.cfg.tx_fifo {
                    queue.push_front(frame);
                }
            }
            drop(queue);
            std::thread::sleep(Duration::from_millis(10));
            continue;
        };

        let mut broken = false;
        for frame in pending {
            match port.write_all(&frame) {
                Ok(()) => {
                    let mut counters = shared.counters.lock().unwrap();
                    counters.tx_bytes += frame.len() as u64;
                    counters.tx_frames += 1;
                },
                Err(err) => {
                    warn!("serial {}: write error: {err}", shared.cfg.device);
                    shared.counters.lock().unwrap().io_errors += 1;
                    broken = true;
                    break;
                },
            }
        }
        if broken {
            handle = None;
            shared.drop_port();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_counts_open_failures_and_stops_cleanly() {
        let mut cfg = SerialConfig::new("/dev/nonexistent-rover-port", 921_600);
        cfg.reconnect_delay = Duration::from_millis(10);
        let (mut link, rx) = SerialLink::start(cfg, UbxParser::default());
        std::thread::sleep(Duration::from_millis(80));
        assert!(link.stats().open_failures > 0);
        assert!(rx.try_recv().is_err());
        link.stop();
        // stop() twice is fine
        link.stop();
    }

    #[test]
    fn tx_fifo_overflows_are_counted() {
        let mut cfg = SerialConfig::new("/dev/nonexistent-rover-port", 921_600);
        cfg.tx_fifo = 2;
        cfg.reconnect_delay = Duration::from_millis(50);
        let (mut link, _rx) = SerialLink::start(cfg, MotorParser::new());
        // Without a device the queue fills up quickly.
        let mut accepted = 0;
        for _ in 0..10 {
            if link.send_frame(vec![0xFB, 0, 0, 0, 0, 0, 0xFC, 0, 0, 0, 0, 0, 0xFD]) {
                accepted += 1;
            }
        }
        assert!(accepted <= 4, "accepted = {accepted}");
        assert!(link.stats().tx_overflows > 0);
        link.stop();
    }
}
