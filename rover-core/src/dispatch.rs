//! Single-threaded router from a link's RX queue to per-code handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};
use rover_proto::motor::routing_code;
use rover_proto::ubx::{SYNC_CHAR_1, SYNC_CHAR_2};

use crate::link::RxFrame;

/// Routing key of a validated frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    /// UBX class and message id.
    Ubx(u8, u8),
    /// ASCII code: the characters between the start delimiter and the
    /// first `,` or `*`.
    Ascii(String),
}

impl DispatchKey {
    pub fn ascii(code: &str) -> Self {
        DispatchKey::Ascii(code.to_string())
    }

    /// Extracts the key of a raw frame, if it has a recognizable shape.
    pub fn of(frame: &[u8]) -> Option<DispatchKey> {
        match frame.first() {
            Some(&SYNC_CHAR_1) => {
                if frame.len() >= 6 && frame[1] == SYNC_CHAR_2 {
                    Some(DispatchKey::Ubx(frame[2], frame[3]))
                } else {
                    None
                }
            },
            Some(&b'$') | Some(&b'#') => routing_code(frame).map(DispatchKey::ascii),
            _ => None,
        }
    }
}

/// A message handler. Errors are counted by the dispatcher and never stop
/// the routing loop.
pub trait FrameHandler: Send {
    fn handle(&mut self, frame: &RxFrame) -> Result<(), HandlerError>;
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

impl<F> FrameHandler for F
where
    F: FnMut(&RxFrame) -> Result<(), HandlerError> + Send,
{
    fn handle(&mut self, frame: &RxFrame) -> Result<(), HandlerError> {
        self(frame)
    }
}

#[derive(Debug, Default, Clone)]
pub struct DispatchStats {
    pub processed: u64,
    pub unhandled: u64,
    pub handler_errors: u64,
    pub per_code: HashMap<String, u64>,
    pub last_error: Option<String>,
}

/// Registry of handlers; becomes a routing thread on [`Dispatcher::start`].
#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<(DispatchKey, Box<dyn FrameHandler>)>,
    default_handler: Option<Box<dyn FrameHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: DispatchKey, handler: Box<dyn FrameHandler>) {
        self.handlers.push((key, handler));
    }

    pub fn set_default(&mut self, handler: Box<dyn FrameHandler>) {
        self.default_handler = Some(handler);
    }

    /// Consumes the registry and spawns the routing thread.
    pub fn start(self, rx: Receiver<RxFrame>) -> DispatcherHandle {
        let stats = Arc::new(Mutex::new(DispatchStats::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let loop_stats = Arc::clone(&stats);
        let loop_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("dispatch".into())
            .spawn(move || dispatch_loop(self, rx, loop_stats, loop_stop))
            .ok();

        DispatcherHandle {
            stats,
            stop,
            thread,
        }
    }
}

pub struct DispatcherHandle {
    stats: Arc<Mutex<DispatchStats>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().unwrap().clone()
    }

    /// Idempotent; the loop observes the flag within one poll timeout.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(
    mut registry: Dispatcher,
    rx: Receiver<RxFrame>,
    stats: Arc<Mutex<DispatchStats>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        let frame = match rx.recv_timeout(Duration::from_millis(20)) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        dispatch_one(&mut registry, &frame, &stats);
    }
    debug!("dispatch: loop exit");
}

fn dispatch_one(registry: &mut Dispatcher, frame: &RxFrame, stats: &Mutex<DispatchStats>) {
    let key = DispatchKey::of(&frame.raw);
    let code_label = match &key {
        Some(DispatchKey::Ubx(class, id)) => format!("{class:02X}-{id:02X}"),
        Some(DispatchKey::Ascii(code)) => code.clone(),
        None => "?".to_string(),
    };

    let handler = key
        .as_ref()
        .and_then(|k| {
            registry
                .handlers
                .iter_mut()
                .find(|(key, _)| key == k)
                .map(|(_, h)| h)
        })
        .or(registry.default_handler.as_mut());

    let mut stats = stats.lock().unwrap();
    *stats.per_code.entry(code_label.clone()).or_insert(0) += 1;
    stats.processed += 1;
    match handler {
        Some(handler) => {
            if let Err(err) = handler.handle(frame) {
                stats.handler_errors += 1;
                stats.last_error = Some(format!("handler[{code_label}]: {err}"));
                warn!("dispatch: handler for {code_label} failed: {err}");
            }
        },
        None => {
            stats.unhandled += 1;
        },
    }
}
