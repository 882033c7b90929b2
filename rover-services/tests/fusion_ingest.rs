//! End-to-end exercise of the fusion service over real loopback sockets:
//! labeled ingest in, binary solution stream out.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use rover_core::angles::norm_deg;
use rover_core::fusion::IMU_ANGLE_DIV;
use rover_proto::motor::Odm;
use rover_proto::records::NavFusion;
use rover_services::lineproto::{self, LineService};
use rover_services::net::FusionTx;
use rover_services::services::{FusionConfig, FusionService};

fn spawn_fusion() -> (std::net::SocketAddr, Arc<FusionService>) {
    let service = FusionService::new(FusionConfig::default());
    assert_eq!(service.start_cmd(), "OK");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let svc: Arc<dyn LineService> = service.clone();
    std::thread::spawn(move || {
        let _ = lineproto::serve_listener(listener, svc);
    });
    (addr, service)
}

fn gnss_record(lat: f64, lon: f64) -> [u8; NavFusion::SIZE] {
    NavFusion {
        ts_mono: 0.0,
        lat,
        lon,
        h_acc: 0.05,
        heading: 0.0,
        heading_acc: 2.0,
        speed: 0.0,
        s_acc: 0.02,
        gyro_z: 0.0,
        gyro_z_acc: 1.0,
        gnss_fix_ok: true,
        dr_used: false,
        veh_heading: 0.0,
        mot_heading: 0.0,
        last_gyro_z: 0.0,
        g_speed: 0.0,
    }
    .to_bytes()
}

#[test]
fn labeled_ingest_feeds_the_binary_stream() {
    let (addr, _service) = spawn_fusion();

    // Subscribe to the solution stream first.
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream.write_all(b"GET_BINARY_STREAM\n").unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut ready = String::new();
    reader.read_line(&mut ready).unwrap();
    assert_eq!(ready.trim(), "STREAM_READY");

    // Feed the service the way the device services do.
    let tx = FusionTx::new(addr);
    tx.send_binary("GNSS", &gnss_record(50.0, 14.0));

    // Local heading constant at 40 deg cw, global reads 65 deg: the fused
    // heading must converge to the global one.
    let angle_raw = (-40.0 * IMU_ANGLE_DIV) as i32;
    for i in 0..30u32 {
        tx.send_line(
            "HEADING",
            "SOL_COMPUTED,NARROW_INT,0.5500,65.0000,-1.5,0.0,0.39,0.60",
        );
        let odm = Odm {
            ts_mono_ms: i * 100,
            gyro_z_raw: 0,
            accum_angle_raw: angle_raw,
            left_mm_s: 300,
            right_mm_s: 300,
        };
        tx.send_line("DRIVE", &odm.to_line());
        // Labels are one-way; give the single-threaded ingest a moment so
        // heading and drive samples interleave with distinct timestamps.
        std::thread::sleep(Duration::from_millis(2));
    }
    // Stubs must be accepted too.
    tx.send_binary("LIDAR", &[0]);
    tx.send_binary("CAMERA", &[1]);

    let mut buf = [0u8; NavFusion::SIZE];
    reader.read_exact(&mut buf).unwrap();
    let solution = NavFusion::from_bytes(&buf).unwrap();
    assert!((solution.lat - 50.0).abs() < 1e-9);
    assert!((norm_deg(f64::from(solution.heading)) - 65.0).abs() < 0.5);
    assert!((f64::from(solution.speed) - 0.3).abs() < 1e-6);

    // The common verbs answer on a second connection while streaming.
    let mut control = TcpStream::connect(addr).unwrap();
    control
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    control.write_all(b"PING\n").unwrap();
    let mut line = String::new();
    BufReader::new(control.try_clone().unwrap())
        .read_line(&mut line)
        .unwrap();
    assert_eq!(line.trim(), "PONG FUSION");
}
