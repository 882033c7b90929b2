//! Loopback peers: pushing labeled payloads into fusion, publishing and
//! consuming binary solution streams, and commanding the drive service.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rover_core::navigator::{DriveCommander, Snapshot, SolutionSource};
use rover_proto::records::NavFusion;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Push-only client toward the fusion ingest socket.
///
/// Each payload is prefixed by its label line. The socket stays open across
/// messages; on any error it is closed and reopened on the next send, so a
/// restarting fusion service heals without intervention.
pub struct FusionTx {
    addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
}

impl FusionTx {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            stream: Mutex::new(None),
        }
    }

    /// Label line plus a line-terminated ASCII payload.
    pub fn send_line(&self, label: &str, payload: &str) {
        let mut message = Vec::with_capacity(label.len() + payload.len() + 2);
        message.extend_from_slice(label.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(payload.as_bytes());
        message.push(b'\n');
        self.send(&message);
    }

    /// Label line plus a fixed-length binary payload.
    pub fn send_binary(&self, label: &str, payload: &[u8]) {
        let mut message = Vec::with_capacity(label.len() + payload.len() + 1);
        message.extend_from_slice(label.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(payload);
        self.send(&message);
    }

    fn send(&self, message: &[u8]) {
        let mut slot = self.stream.lock().unwrap();
        if slot.is_none() {
            match TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    stream.set_write_timeout(Some(CONNECT_TIMEOUT)).ok();
                    info!("fusion-tx: connected to {}", self.addr);
                    *slot = Some(stream);
                },
                Err(err) => {
                    debug!("fusion-tx: cannot reach {}: {err}", self.addr);
                    return;
                },
            }
        }
        if let Some(stream) = slot.as_mut() {
            if let Err(err) = stream.write_all(message) {
                warn!("fusion-tx: send failed: {err}");
                *slot = None;
            }
        }
    }
}

/// Latest-solution slot with a change counter, feeding any number of
/// binary-stream subscribers.
#[derive(Default)]
pub struct Publisher {
    state: Mutex<(u64, Option<NavFusion>)>,
    changed: Condvar,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, record: NavFusion) {
        let mut state = self.state.lock().unwrap();
        state.0 += 1;
        state.1 = Some(record);
        drop(state);
        self.changed.notify_all();
    }

    pub fn latest(&self) -> Option<NavFusion> {
        self.state.lock().unwrap().1
    }

    /// Blocks until the sequence number moves past `seen`, then returns the
    /// new record. `None` on timeout.
    pub fn wait_next(&self, seen: &mut u64, timeout: Duration) -> Option<NavFusion> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.0 != *seen {
                *seen = state.0;
                return state.1;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.changed.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    /// Streams every new record to the socket until the client goes away.
    pub fn stream_to(&self, stream: &mut TcpStream) -> io::Result<()> {
        let mut seen = 0u64;
        loop {
            if let Some(record) = self.wait_next(&mut seen, Duration::from_secs(1)) {
                stream.write_all(&record.to_bytes())?;
            }
        }
    }
}

/// Background consumer of a `GET_BINARY_STREAM` solution feed, keeping the
/// latest record for the navigator.
pub struct SolutionClient {
    addr: SocketAddr,
    latest: Mutex<Option<Snapshot>>,
}

impl SolutionClient {
    /// Spawns the reader thread and returns the shared handle.
    pub fn spawn(addr: SocketAddr) -> Arc<SolutionClient> {
        let client = Arc::new(SolutionClient {
            addr,
            latest: Mutex::new(None),
        });
        let worker = Arc::clone(&client);
        std::thread::Builder::new()
            .name("solution-rx".into())
            .spawn(move || worker.run())
            .ok();
        client
    }

    pub fn latest(&self) -> Option<Snapshot> {
        *self.latest.lock().unwrap()
    }

    fn run(&self) {
        loop {
            if let Err(err) = self.stream_once() {
                debug!("solution-rx: stream to {} ended: {err}", self.addr);
            }
            std::thread::sleep(Duration::from_millis(500));
        }
    }

    fn stream_once(&self) -> io::Result<()> {
        let stream = TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
        let mut writer = stream.try_clone()?;
        writer.write_all(b"GET_BINARY_STREAM\n")?;

        let mut reader = BufReader::new(stream);
        let mut ready = String::new();
        reader.read_line(&mut ready)?;
        if ready.trim() != "STREAM_READY" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected stream handshake: {}", ready.trim()),
            ));
        }
        info!("solution-rx: streaming from {}", self.addr);

        let mut buf = [0u8; NavFusion::SIZE];
        loop {
            reader.read_exact(&mut buf)?;
            match NavFusion::from_bytes(&buf) {
                Ok(record) => {
                    *self.latest.lock().unwrap() = Some(Snapshot {
                        record,
                        rx: Instant::now(),
                    });
                },
                Err(err) => {
                    // A framing slip is unrecoverable mid-stream.
                    return Err(io::Error::new(io::ErrorKind::InvalidData, err.to_string()));
                },
            }
        }
    }
}

impl SolutionSource for SolutionClient {
    fn latest(&self) -> Option<Snapshot> {
        SolutionClient::latest(self)
    }
}

/// Persistent line-protocol client commanding the drive service.
pub struct DriveClient {
    addr: SocketAddr,
    conn: Option<BufReader<TcpStream>>,
}

impl DriveClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, conn: None }
    }

    fn ensure_connected(&mut self) -> io::Result<()> {
        if self.conn.is_none() {
            let stream = TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT)?;
            stream.set_nodelay(true).ok();
            stream.set_read_timeout(Some(Duration::from_secs(1))).ok();
            self.conn = Some(BufReader::new(stream));
        }
        Ok(())
    }

    /// Sends one command line and reads the single-line response.
    pub fn command(&mut self, line: &str) -> io::Result<String> {
        self.ensure_connected()?;
        let result = match self.conn.as_mut() {
            Some(reader) => Self::round_trip(reader, line),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no connection")),
        };
        if result.is_err() {
            self.conn = None;
        }
        result
    }

    fn round_trip(reader: &mut BufReader<TcpStream>, line: &str) -> io::Result<String> {
        reader.get_mut().write_all(line.as_bytes())?;
        reader.get_mut().write_all(b"\n")?;
        let mut response = String::new();
        if reader.read_line(&mut response)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"));
        }
        Ok(response.trim_end().to_string())
    }
}

impl DriveCommander for DriveClient {
    fn pwm(&mut self, left: i32, right: i32) -> bool {
        match self.command(&format!("PWM {left} {right}")) {
            Ok(response) => {
                if !response.starts_with("OK") {
                    warn!("drive: PWM {left} {right} rejected: {response}");
                }
                response.starts_with("OK")
            },
            Err(err) => {
                warn!("drive: PWM {left} {right} not delivered: {err}");
                false
            },
        }
    }
}
