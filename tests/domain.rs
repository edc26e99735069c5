use assert_matches::assert_matches;

use skyfetch::domain::{Archive, FrameType, Instrument, TargetName};
use skyfetch::error::SkyError;
use skyfetch::region::{AngleUnit, SkyRegion, TimeWindow, parse_sexagesimal};

#[test]
fn target_names_need_three_characters() {
    let target: TargetName = "  M31 ".parse().unwrap();
    assert_eq!(target.as_str(), "M31");
    let err = "M1".parse::<TargetName>().unwrap_err();
    assert_matches!(err, SkyError::InvalidTarget(_));
    assert!(err.is_fatal());
}

#[test]
fn target_dir_name_is_folder_safe() {
    let target: TargetName = "IC 348/core".parse().unwrap();
    assert_eq!(target.dir_name(), "IC_348_core");
}

#[test]
fn archives_parse_and_own_their_instruments() {
    assert_eq!("eso".parse::<Archive>().unwrap(), Archive::Eso);
    assert_matches!("hubble".parse::<Archive>(), Err(SkyError::InvalidArchive(_)));
    for archive in Archive::all() {
        for instrument in archive.instruments() {
            assert_eq!(instrument.archive(), archive);
            assert_eq!(instrument.as_str().parse::<Instrument>().unwrap(), instrument);
        }
    }
}

#[test]
fn calibration_frame_types() {
    assert!(FrameType::Bias.is_calibration());
    assert!(FrameType::Flat.is_calibration());
    assert!(!FrameType::Science.is_calibration());
    assert!(!FrameType::Unknown.is_calibration());
}

#[test]
fn sexagesimal_coordinates() {
    let ra = parse_sexagesimal("05:34:31.94", AngleUnit::Hours).unwrap();
    assert!((ra - 83.633083).abs() < 1e-5);
    let dec = parse_sexagesimal("-05 23 28", AngleUnit::Degrees).unwrap();
    assert!((dec + 5.391111).abs() < 1e-5);
    assert_eq!(parse_sexagesimal("12.5", AngleUnit::Degrees).unwrap(), 12.5);
    assert_matches!(
        parse_sexagesimal("12:ab", AngleUnit::Hours),
        Err(SkyError::InvalidCoordinate(_))
    );
}

#[test]
fn region_center_is_validated() {
    assert_matches!(SkyRegion::circle(400.0, 0.0, 1.0), Err(SkyError::InvalidCoordinate(_)));
    assert_matches!(SkyRegion::circle(10.0, 95.0, 1.0), Err(SkyError::InvalidCoordinate(_)));
    assert_matches!(
        SkyRegion::rectangle(10.0, 0.0, 0.1, f64::NAN),
        Err(SkyError::InvalidExtent(_))
    );
}

#[test]
fn time_window_is_closed() {
    let window = TimeWindow::centered(100.0, 10.0);
    assert!(window.contains(95.0));
    assert!(window.contains(105.0));
    assert!(!window.contains(105.01));
}
