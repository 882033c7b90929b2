//! The shared loopback line protocol.
//!
//! Text commands terminated by `\n`, ASCII responses terminated by `\n`.
//! Common verbs are handled here; everything else is routed to the service.
//! A handler may take over the socket entirely (binary streams), in which
//! case it reports `Verdict::Handled` and the loop writes nothing.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use log::{debug, info, warn};

/// One client connection: buffered line reader plus the raw stream for
/// binary payloads and stream takeover.
pub struct ClientConn {
    reader: BufReader<TcpStream>,
    stream: TcpStream,
}

impl ClientConn {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true).ok();
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { reader, stream })
    }

    /// Next line without the terminator; `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Exactly `n` bytes of binary payload following a label line.
    pub fn read_exact(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\n")
    }

    /// The raw stream, for handlers that switch the socket to binary.
    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

/// What to do after a service verb.
pub enum Verdict {
    /// Write this line back.
    Reply(String),
    /// The handler already dealt with the socket (stream or silent ingest).
    Handled,
    /// Drop this client.
    Close,
}

/// A service behind the line protocol.
pub trait LineService: Send + Sync + 'static {
    /// Uppercase service name used in `PONG <NAME>`.
    fn name(&self) -> &'static str;

    /// `START` verb; returns `OK` or `ALREADY_RUNNING`.
    fn start_cmd(&self) -> String;

    /// `STOP` verb; returns `OK` or `NOT_RUNNING`.
    fn stop_cmd(&self) -> String;

    /// `STATE` verb; single-line JSON.
    fn state_json(&self) -> String;

    /// Service-specific verbs. `args` is the remainder after the verb,
    /// trimmed.
    fn command(&self, verb: &str, args: &str, conn: &mut ClientConn) -> io::Result<Verdict>;

    /// Called once on `EXIT`, before the process terminates.
    fn on_exit(&self) {}
}

/// Binds 127.0.0.1:`port` and serves clients, one thread each. Blocks
/// forever; `EXIT` terminates the process with code 0.
pub fn serve(port: u16, service: Arc<dyn LineService>) -> io::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    serve_listener(listener, service)
}

/// [`serve`] on an already-bound listener.
pub fn serve_listener(listener: TcpListener, service: Arc<dyn LineService>) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("{}: listening on {addr}", service.name());
    }
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!("{}: accept failed: {err}", service.name());
                continue;
            },
        };
        let service = Arc::clone(&service);
        std::thread::Builder::new()
            .name(format!("{}-client", service.name().to_lowercase()))
            .spawn(move || {
                let peer = stream.peer_addr().ok();
                debug!("{}: client connected: {peer:?}", service.name());
                if let Err(err) = client_loop(stream, &*service) {
                    debug!("{}: client {peer:?} dropped: {err}", service.name());
                }
            })
            .ok();
    }
    Ok(())
}

fn client_loop(stream: TcpStream, service: &dyn LineService) -> io::Result<()> {
    let mut conn = ClientConn::new(stream)?;
    while let Some(line) = conn.read_line()? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (verb, args) = match line.split_once(' ') {
            Some((verb, args)) => (verb, args.trim()),
            None => (line, ""),
        };

        let verdict = match verb {
            "PING" => Verdict::Reply(format!("PONG {}", service.name())),
            "START" => Verdict::Reply(service.start_cmd()),
            "STOP" => Verdict::Reply(service.stop_cmd()),
            "STATE" => Verdict::Reply(service.state_json()),
            "EXIT" => {
                conn.write_line("BYE")?;
                service.on_exit();
                info!("{}: exit requested", service.name());
                std::process::exit(0);
            },
            _ => match service.command(verb, args, &mut conn) {
                Ok(verdict) => verdict,
                Err(err) => {
                    // A failed verb must not take the client down.
                    Verdict::Reply(format!("ERR {err}"))
                },
            },
        };

        match verdict {
            Verdict::Reply(reply) => conn.write_line(&reply)?,
            Verdict::Handled => {},
            Verdict::Close => break,
        }
    }
    Ok(())
}

/// Splits `args` into exactly `n` whitespace-separated fields.
pub fn split_args(args: &str, n: usize) -> Option<Vec<&str>> {
    let fields: Vec<&str> = args.split_whitespace().collect();
    (fields.len() == n).then_some(fields)
}
