//! Dispatcher handlers: decode one message class each, keep the latest
//! record under a mutex and forward selected records to their consumers.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::info;
use rover_core::dispatch::{FrameHandler, HandlerError};
use rover_core::link::RxFrame;
use rover_proto::motor::{self, Odm};
use rover_proto::records::NavFusion;
use rover_proto::ubx::{self, EsfRaw, NavPvat};
use rover_proto::unicore;

use crate::net::{FusionTx, Publisher};
use crate::runlog::RunLog;

/// Shared latest-value slot; readers copy the value out.
pub type Latest<T> = Arc<Mutex<Option<T>>>;

pub fn latest_slot<T>() -> Latest<T> {
    Arc::new(Mutex::new(None))
}

/// Builds the navigation record the GNSS service publishes for each
/// NAV-PVAT: position and attitude straight from the receiver, quality
/// flags from the fix state.
pub fn pvat_to_fusion(pvat: &NavPvat, ts_mono: f64) -> NavFusion {
    NavFusion {
        ts_mono,
        lat: pvat.lat_deg,
        lon: pvat.lon_deg,
        h_acc: pvat.h_acc_m as f32,
        heading: pvat.veh_heading_deg as f32,
        heading_acc: pvat.acc_heading_deg as f32,
        speed: pvat.g_speed_mps as f32,
        s_acc: pvat.s_acc_mps as f32,
        gyro_z: 0.0,
        gyro_z_acc: 1.0,
        gnss_fix_ok: pvat.fix_ok(),
        dr_used: pvat.dr_used(),
        veh_heading: pvat.veh_heading_deg as f32,
        mot_heading: pvat.mot_heading_deg as f32,
        last_gyro_z: 0.0,
        g_speed: pvat.g_speed_mps as f32,
    }
}

/// NAV-PVAT: decode, publish, forward to fusion, and log a 1 Hz summary.
pub struct NavPvatHandler {
    pub latest: Latest<NavPvat>,
    pub publisher: Arc<Publisher>,
    pub fusion: Option<Arc<FusionTx>>,
    log: Option<RunLog>,
    epoch: Instant,
    last_summary_s: Option<u32>,
}

impl NavPvatHandler {
    pub const LOG_HEADER: [&'static str; 8] = [
        "itow_ms", "fix_type", "num_sv", "lat", "lon", "h_acc", "veh_heading", "acc_heading",
    ];

    pub fn new(
        latest: Latest<NavPvat>,
        publisher: Arc<Publisher>,
        fusion: Option<Arc<FusionTx>>,
        log: Option<RunLog>,
    ) -> Self {
        Self {
            latest,
            publisher,
            fusion,
            log,
            epoch: Instant::now(),
            last_summary_s: None,
        }
    }
}

impl FrameHandler for NavPvatHandler {
    fn handle(&mut self, frame: &RxFrame) -> Result<(), HandlerError> {
        let (_, _, payload) = ubx::split(&frame.raw)?;
        let pvat = NavPvat::parse(payload)?;

        let record = pvat_to_fusion(&pvat, self.epoch.elapsed().as_secs_f64());
        self.publisher.publish(record);
        if let Some(fusion) = &self.fusion {
            fusion.send_binary("GNSS", &record.to_bytes());
        }
        *self.latest.lock().unwrap() = Some(pvat);
        if let Some(log) = self.log.as_mut() {
            log.write_row(&[
                pvat.itow_ms.to_string(),
                pvat.fix_type.to_string(),
                pvat.num_sv.to_string(),
                format!("{:.7}", pvat.lat_deg),
                format!("{:.7}", pvat.lon_deg),
                format!("{:.3}", pvat.h_acc_m),
                format!("{:.2}", pvat.veh_heading_deg),
                format!("{:.2}", pvat.acc_heading_deg),
            ])?;
        }

        // Once per receiver second, not per message.
        let itow_s = pvat.itow_ms / 1000;
        if self.last_summary_s != Some(itow_s) {
            self.last_summary_s = Some(itow_s);
            info!(
                "nav-pvat: fix={} sv={} carr={:?} lat={:.7} lon={:.7} hAcc={:.3} hdg={:.2} hdgAcc={:.2} spd={:.3}",
                pvat.fix_type,
                pvat.num_sv,
                pvat.carr_soln,
                pvat.lat_deg,
                pvat.lon_deg,
                pvat.h_acc_m,
                pvat.veh_heading_deg,
                pvat.acc_heading_deg,
                pvat.g_speed_mps,
            );
        }
        Ok(())
    }
}

/// ESF-RAW: decode the IMU burst and keep the latest sample set.
pub struct EsfRawHandler {
    pub latest: Latest<EsfRaw>,
}

impl EsfRawHandler {
    pub fn new(latest: Latest<EsfRaw>) -> Self {
        Self { latest }
    }
}

impl FrameHandler for EsfRawHandler {
    fn handle(&mut self, frame: &RxFrame) -> Result<(), HandlerError> {
        let (_, _, payload) = ubx::split(&frame.raw)?;
        let raw = EsfRaw::parse(payload)?;
        *self.latest.lock().unwrap() = Some(raw);
        Ok(())
    }
}

/// ODM telemetry: decode, keep the latest, forward the bare line to fusion
/// and append it to the run log.
pub struct OdmHandler {
    pub latest: Latest<Odm>,
    fusion: Arc<FusionTx>,
    log: Option<RunLog>,
}

impl OdmHandler {
    pub const LOG_HEADER: [&'static str; 5] =
        ["ts_mono_ms", "gyro_z_raw", "accum_angle_raw", "left_mm_s", "right_mm_s"];

    pub fn new(latest: Latest<Odm>, fusion: Arc<FusionTx>, log: Option<RunLog>) -> Self {
        Self { latest, fusion, log }
    }
}

impl FrameHandler for OdmHandler {
    fn handle(&mut self, frame: &RxFrame) -> Result<(), HandlerError> {
        let sentence = motor::parse_sentence(&frame.raw)?;
        let odm = Odm::from_sentence(&sentence)?;

        *self.latest.lock().unwrap() = Some(odm);
        self.fusion.send_line("DRIVE", &odm.to_line());
        if let Some(log) = self.log.as_mut() {
            log.write_row(&[
                odm.ts_mono_ms.to_string(),
                odm.gyro_z_raw.to_string(),
                odm.accum_angle_raw.to_string(),
                odm.left_mm_s.to_string(),
                odm.right_mm_s.to_string(),
            ])?;
        }
        Ok(())
    }
}

/// UNIHEADINGA: truncate to the short form, keep the latest and forward it
/// to fusion.
pub struct UniHeadingHandler {
    pub latest: Latest<Vec<u8>>,
    fusion: Arc<FusionTx>,
}

impl UniHeadingHandler {
    pub fn new(latest: Latest<Vec<u8>>, fusion: Arc<FusionTx>) -> Self {
        Self { latest, fusion }
    }
}

impl FrameHandler for UniHeadingHandler {
    fn handle(&mut self, frame: &RxFrame) -> Result<(), HandlerError> {
        let short = unicore::short_form(&frame.raw)?;
        let text = core::str::from_utf8(short)?;
        *self.latest.lock().unwrap() = Some(short.to_vec());
        self.fusion.send_line("HEADING", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_proto::checksum::{unicore_crc32, xor8};

    fn rx(raw: Vec<u8>) -> RxFrame {
        RxFrame {
            raw,
            rx_time: Instant::now(),
        }
    }

    #[test]
    fn nav_pvat_handler_publishes_solution() {
        let mut payload = vec![0u8; ubx::NAV_PVAT_PAYLOAD_LEN];
        payload[25] = 0b1000_0001; // fixOK, carrier fixed
        payload[28..32].copy_from_slice(&140_000_000i32.to_le_bytes());
        payload[32..36].copy_from_slice(&500_000_000i32.to_le_bytes());
        payload[44..48].copy_from_slice(&42u32.to_le_bytes());
        let frame = ubx::frame(ubx::CLS_NAV, ubx::ID_NAV_PVAT, &payload);

        let latest = latest_slot();
        let publisher = Arc::new(Publisher::new());
        let mut handler =
            NavPvatHandler::new(Arc::clone(&latest), Arc::clone(&publisher), None, None);
        handler.handle(&rx(frame)).unwrap();

        let pvat = latest.lock().unwrap().unwrap();
        assert!((pvat.lat_deg - 50.0).abs() < 1e-9);
        let record = publisher.latest().unwrap();
        assert!(record.gnss_fix_ok);
        assert!((record.lon - 14.0).abs() < 1e-9);
        assert!((f64::from(record.h_acc) - 0.042).abs() < 1e-6);
    }

    #[test]
    fn nav_pvat_handler_rejects_short_payload() {
        let frame = ubx::frame(ubx::CLS_NAV, ubx::ID_NAV_PVAT, &[0u8; 92]);
        let latest = latest_slot();
        let mut handler = NavPvatHandler::new(latest, Arc::new(Publisher::new()), None, None);
        assert!(handler.handle(&rx(frame)).is_err());
    }

    #[test]
    fn odm_handler_keeps_latest() {
        let payload = "ODM,123456,-10,456789,120,-130";
        let mut frame = vec![b'$'];
        frame.extend_from_slice(payload.as_bytes());
        frame.extend_from_slice(format!("*{:02X}\r\n", xor8(payload.as_bytes())).as_bytes());

        let latest = latest_slot();
        let fusion = Arc::new(FusionTx::new("127.0.0.1:1".parse().unwrap()));
        let mut handler = OdmHandler::new(Arc::clone(&latest), fusion, None);
        handler.handle(&rx(frame)).unwrap();

        let odm = latest.lock().unwrap().unwrap();
        assert_eq!(odm.ts_mono_ms, 123_456);
        assert_eq!(odm.left_mm_s, 120);
    }

    #[test]
    fn uniheading_handler_truncates() {
        let payload = b"UNIHEADINGA,92,GPS,FINE,2392,519230000,0,0,18,8;SOL_COMPUTED,NARROW_INT,\
            0.5502,281.1182,-1.5835,0.0000,0.3914,0.6025,\"999\",31,21,21,18,3,01,3,f3";
        let mut frame = vec![b'#'];
        frame.extend_from_slice(payload);
        frame.extend_from_slice(format!("*{:08x}\r\n", unicore_crc32(payload)).as_bytes());

        let latest = latest_slot();
        let fusion = Arc::new(FusionTx::new("127.0.0.1:1".parse().unwrap()));
        let mut handler = UniHeadingHandler::new(Arc::clone(&latest), fusion);
        handler.handle(&rx(frame)).unwrap();

        let short = latest.lock().unwrap().clone().unwrap();
        assert_eq!(
            short,
            b"SOL_COMPUTED,NARROW_INT,0.5502,281.1182,-1.5835,0.0000,0.3914,0.6025"
        );
    }
}
