//! Heading service: owns the Unicore dual-antenna receiver and forwards
//! UNIHEADINGA short forms to fusion.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use log::info;
use serde::Serialize;

use rover_core::dispatch::{DispatchKey, Dispatcher, DispatcherHandle};
use rover_core::link::{SerialConfig, SerialLink};
use rover_proto::unicore::UNIHEADINGA_CODE;
use rover_proto::UnicoreParser;

use crate::handlers::{latest_slot, Latest, UniHeadingHandler};
use crate::lineproto::{ClientConn, LineService, Verdict};
use crate::net::FusionTx;

#[derive(Debug, Clone)]
pub struct HeadingConfig {
    pub device: String,
    pub baud: u32,
    pub fusion_addr: SocketAddr,
}

struct LinkBundle {
    link: SerialLink,
    dispatcher: DispatcherHandle,
}

pub struct HeadingService {
    cfg: HeadingConfig,
    bundle: Mutex<Option<LinkBundle>>,
    latest: Latest<Vec<u8>>,
    fusion: Arc<FusionTx>,
}

impl HeadingService {
    pub fn new(cfg: HeadingConfig) -> Arc<Self> {
        let fusion = Arc::new(FusionTx::new(cfg.fusion_addr));
        Arc::new(Self {
            cfg,
            bundle: Mutex::new(None),
            latest: latest_slot(),
            fusion,
        })
    }

    fn open(&self) -> LinkBundle {
        let serial = SerialConfig::new(self.cfg.device.clone(), self.cfg.baud);
        let (link, rx) = SerialLink::start(serial, UnicoreParser::new());

        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            DispatchKey::ascii(UNIHEADINGA_CODE),
            Box::new(UniHeadingHandler::new(
                Arc::clone(&self.latest),
                Arc::clone(&self.fusion),
            )),
        );

        LinkBundle {
            dispatcher: dispatcher.start(rx),
            link,
        }
    }
}

#[derive(Serialize)]
struct HeadingState {
    service: &'static str,
    status: &'static str,
    device: String,
    rx_frames: u64,
    rx_bytes: u64,
    checksum_errors: u64,
    bad_char: u64,
    junk: u64,
    dispatched: u64,
    unhandled: u64,
    last_heading: Option<String>,
}

impl LineService for HeadingService {
    fn name(&self) -> &'static str {
        "HEADING"
    }

    fn start_cmd(&self) -> String {
        let mut bundle = self.bundle.lock().unwrap();
        if bundle.is_some() {
            return "ALREADY_RUNNING".into();
        }
        *bundle = Some(self.open());
        info!("heading: started on {}", self.cfg.device);
        "OK".into()
    }

    fn stop_cmd(&self) -> String {
        let mut bundle = self.bundle.lock().unwrap();
        match bundle.take() {
            Some(mut running) => {
                running.dispatcher.stop();
                running.link.stop();
                info!("heading: stopped");
                "OK".into()
            },
            None => "NOT_RUNNING".into(),
        }
    }

    fn state_json(&self) -> String {
        let bundle = self.bundle.lock().unwrap();
        let (status, link_stats, dispatch_stats) = match bundle.as_ref() {
            Some(bundle) => ("RUNNING", bundle.link.stats(), bundle.dispatcher.stats()),
            None => ("STOPPED", Default::default(), Default::default()),
        };
        let state = HeadingState {
            service: "HEADING",
            status,
            device: self.cfg.device.clone(),
            rx_frames: link_stats.rx_frames,
            rx_bytes: link_stats.rx_bytes,
            checksum_errors: link_stats.parser.checksum_errors,
            bad_char: link_stats.parser.bad_char,
            junk: link_stats.parser.junk,
            dispatched: dispatch_stats.processed,
            unhandled: dispatch_stats.unhandled,
            last_heading: self
                .latest
                .lock()
                .unwrap()
                .as_ref()
                .map(|short| String::from_utf8_lossy(short).into_owned()),
        };
        serde_json::to_string(&state).unwrap_or_else(|_| "{}".into())
    }

    fn command(&self, _verb: &str, _args: &str, _conn: &mut ClientConn) -> io::Result<Verdict> {
        Ok(Verdict::Reply("ERR UNKNOWN_COMMAND".into()))
    }

    fn on_exit(&self) {
        let _ = self.stop_cmd();
    }
}
