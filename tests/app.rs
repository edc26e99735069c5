use std::collections::BTreeMap;

use camino::Utf8Path;

use skyfetch::app::{App, FetchOptions};
use skyfetch::config::ResolvedConfig;
use skyfetch::domain::{Archive, Instrument, TargetName};
use skyfetch::output::JsonOutput;
use skyfetch::providers::smoka::{SmokaBackend, parse_obslog};
use skyfetch::region::SkyRegion;
use skyfetch::search::DeliveryMode;
use skyfetch::store::Store;
use skyfetch::warning::{MatchIssue, RunWarning};

const OBSLOG: &str = "\
# FRAME_ID DATE_OBS OBJECT FILTER RA2000 DEC2000 UT_STR EXPTIME DATA_TYP
SUPA00400001 2004-01-10 NGC1333 W-C-RC 03:29:02.0 +31:20:54 10:00:00.0 300 OBJECT
SUPA00400002 2004-01-10 NGC1333 W-C-RC 03:29:04.0 +31:21:10 10:06:00.0 300 OBJECT
SUPA00400003 2004-01-10 BIAS W-C-RC 00:00:00.0 +00:00:00 06:00:00.0 0 BIAS
SUPA00400004 2004-01-12 DOMEFLAT W-C-RC 00:00:00.0 +00:00:00 18:00:00.0 5 DOMEFLAT
SUPA00400006 2004-01-10 M42 W-C-RC 05:35:17.3 -05:23:28 11:00:00.0 60 OBJECT
";

fn smoka_app(root: &Utf8Path) -> App {
    let mut config = ResolvedConfig::default();
    config.restrict_to(&[Archive::Smoka]);
    for settings in &mut config.archives {
        settings.instruments = vec![Instrument::SuprimeCam];
        settings.calibrate = vec![Instrument::SuprimeCam];
    }
    let store = Store::new_with_paths(root.join("out"), root.join("cache"));
    let settings = config.settings(Archive::Smoka).unwrap().clone();
    let backend = SmokaBackend::new(&settings, store.obslog_cache_dir())
        .unwrap()
        .with_rows(Instrument::SuprimeCam, parse_obslog(OBSLOG));
    App::new(store, config, vec![Box::new(backend)])
}

#[test]
fn smoka_run_writes_mail_requests_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap();
    let app = smoka_app(root);
    let target: TargetName = "NGC 1333".parse().unwrap();
    let region = SkyRegion::circle(52.26, 31.35, 0.05).unwrap();

    let summary = app
        .fetch(&target, &region, &BTreeMap::new(), &FetchOptions::default(), &JsonOutput)
        .unwrap();

    assert!(app.archives_requiring_credentials().is_empty());
    let archive = &summary.archives[0];
    assert_eq!(archive.archive, Archive::Smoka);
    assert_eq!(archive.delivery, DeliveryMode::MailRequest);
    assert_eq!(archive.unique_artifacts, 4);

    let counts = archive.instruments[0].counts;
    assert_eq!((counts.science, counts.bias, counts.dark, counts.flat), (2, 1, 0, 1));

    assert_eq!(archive.request_files.len(), 2);
    assert!(archive.request_files[0].ends_with("NGC_1333/SMOKA/SuprimeCam/NGC_1333_SUP_mail_1.txt"));
    let mail = std::fs::read_to_string(&archive.request_files[0]).unwrap();
    assert_eq!(mail.lines().filter(|line| line.starts_with("SUPA")).count(), 4);

    assert!(summary.warnings.iter().any(|warning| matches!(
        warning,
        RunWarning::DataQuality {
            issue: MatchIssue::NoneFound,
            ..
        }
    )));

    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(app.store().manifest_path(&target, Archive::Smoka)).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["target"], "NGC 1333");
    assert_eq!(manifest["instruments"][0]["science_ids"].as_array().unwrap().len(), 2);
    assert_eq!(manifest["instruments"][0]["calibration_sets"][0]["bias"][0], "SUPA00400003");
}

#[test]
fn smoka_dry_run_writes_no_mail() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap();
    let app = smoka_app(root);
    let target: TargetName = "NGC 1333".parse().unwrap();
    let region = SkyRegion::circle(52.26, 31.35, 0.05).unwrap();

    let summary = app
        .fetch(
            &target,
            &region,
            &BTreeMap::new(),
            &FetchOptions { dry_run: true },
            &JsonOutput,
        )
        .unwrap();

    assert!(summary.archives[0].request_files.is_empty());
    let instrument_dir = app
        .store()
        .instrument_dir(&target, Archive::Smoka, Instrument::SuprimeCam);
    assert!(!instrument_dir.as_std_path().exists());
    assert!(app.store().manifest_path(&target, Archive::Smoka).as_std_path().exists());
}
