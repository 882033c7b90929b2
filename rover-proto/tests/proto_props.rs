use proptest::prelude::*;

use rover_proto::motor::{self, Odm};
use rover_proto::records::NavFusion;
use rover_proto::{MotorParser, UbxParser};

proptest! {
    #[test]
    fn nav_fusion_round_trips(
        ts_mono in 0.0f64..1.0e9,
        lat in -90.0f64..90.0,
        lon in -180.0f64..180.0,
        h_acc in 0.0f32..1.0e4,
        heading in 0.0f32..360.0,
        heading_acc in 0.0f32..180.0,
        speed in -10.0f32..10.0,
        s_acc in 0.0f32..10.0,
        gyro_z in -500.0f32..500.0,
        gyro_z_acc in 0.0f32..10.0,
        gnss_fix_ok in any::<bool>(),
        dr_used in any::<bool>(),
        veh_heading in 0.0f32..360.0,
        mot_heading in 0.0f32..360.0,
        last_gyro_z in -500.0f32..500.0,
        g_speed in -10.0f32..10.0,
    ) {
        let rec = NavFusion {
            ts_mono, lat, lon, h_acc, heading, heading_acc, speed, s_acc,
            gyro_z, gyro_z_acc, gnss_fix_ok, dr_used,
            veh_heading, mot_heading, last_gyro_z, g_speed,
        };
        let bytes = rec.to_bytes();
        prop_assert_eq!(bytes.len(), NavFusion::SIZE);
        prop_assert_eq!(NavFusion::from_bytes(&bytes).unwrap(), rec);
    }

    #[test]
    fn odm_record_round_trips(
        ts_mono_ms in any::<u32>(),
        gyro_z_raw in any::<i16>(),
        accum_angle_raw in any::<i32>(),
        left_mm_s in any::<i16>(),
        right_mm_s in any::<i16>(),
    ) {
        let odm = Odm { ts_mono_ms, gyro_z_raw, accum_angle_raw, left_mm_s, right_mm_s };
        prop_assert_eq!(Odm::from_bytes(&odm.to_bytes()).unwrap(), odm);
        prop_assert_eq!(Odm::from_line(&odm.to_line()).unwrap(), odm);
    }

    #[test]
    fn base251_digits_round_trip(value in any::<u32>()) {
        let digits = motor::base251_encode(value);
        for d in digits {
            prop_assert!(d <= motor::PARAM_MAX);
        }
        let decoded = motor::base251_decode(digits).unwrap();
        prop_assert_eq!(u64::from(decoded), u64::from(value) % 3_969_126_001);
    }

    /// Chunking must never change what a parser emits.
    #[test]
    fn ubx_parser_chunking_is_irrelevant(split in 1usize..115) {
        let frame = rover_proto::ubx::frame(0x01, 0x17, &[0xA5; 108]);
        let mut whole = UbxParser::default();
        let expect = whole.consume(&frame);

        let mut parted = UbxParser::default();
        let mut got = parted.consume(&frame[..split]);
        got.extend(parted.consume(&frame[split..]));
        prop_assert_eq!(expect, got);
    }

    #[test]
    fn motor_parser_survives_noise(noise in proptest::collection::vec(any::<u8>(), 0..64)) {
        let good = motor::sentence_frame("ODM,1000,5,-3,120,118");
        let mut stream = noise.clone();
        stream.extend_from_slice(&good);

        let mut parser = MotorParser::new();
        let frames = parser.consume(&stream);
        // The valid sentence must come through regardless of the noise; noise
        // containing `$` may legitimately abort into it, never past it.
        prop_assert_eq!(frames.last(), Some(&good));
    }
}
