use std::sync::Mutex;

use skyfetch::config::ArchiveSettings;
use skyfetch::domain::{Archive, FrameCategory, FrameType, Instrument};
use skyfetch::error::SkyError;
use skyfetch::orchestrator::{ArchiveSearchOrchestrator, SearchPhase};
use skyfetch::record::RawObservation;
use skyfetch::region::SkyRegion;
use skyfetch::search::{MetadataSearch, SearchRequest};
use skyfetch::warning::{MatchIssue, RunWarning};

struct MockSearch {
    failing: Vec<Instrument>,
    extra_science: Vec<RawObservation>,
    requests: Mutex<Vec<SearchRequest>>,
}

impl MockSearch {
    fn new(failing: Vec<Instrument>) -> Self {
        Self {
            failing,
            extra_science: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_science(mut self, rows: Vec<RawObservation>) -> Self {
        self.extra_science = rows;
        self
    }

    fn calibration_requests(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.category == FrameCategory::Calib)
            .count()
    }
}

fn science(id: &str, product: &str, mjd: f64, filter: &str, name: &str) -> RawObservation {
    RawObservation {
        id: Some(id.to_string()),
        product_id: Some(product.to_string()),
        timestamp: Some(mjd),
        filter: Some(filter.to_string()),
        frame_type: Some("OBJECT".to_string()),
        object_name: Some(name.to_string()),
        ..RawObservation::default()
    }
}

fn calib(id: &str, kind: &str, mjd: f64, filter: &str) -> RawObservation {
    RawObservation {
        id: Some(id.to_string()),
        product_id: Some(format!("{id}o")),
        timestamp: Some(mjd),
        filter: Some(filter.to_string()),
        frame_type: Some(kind.to_string()),
        object_name: Some(kind.to_string()),
        ..RawObservation::default()
    }
}

impl MetadataSearch for MockSearch {
    fn archive(&self) -> Archive {
        Archive::Cfht
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<RawObservation>, SkyError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.contains(&request.instrument) {
            return Err(SkyError::ArchiveStatus {
                archive: "CFHT".to_string(),
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(match request.category {
            FrameCategory::Science => [
                science("1001", "1001p", 52000.0, "R", "NGC 1333"),
                science("1002", "1002p", 52000.0, "R", "NGC 1333"),
                science("1003", "1003p", 52001.0, "R", "NGC 1333"),
                science("1004", "1004o", 52001.0, "R", "NGC 1333"),
                science("1005", "1005p", 52001.0, "R", "flat field test"),
                RawObservation {
                    quality_flag: Some("junk".to_string()),
                    ..science("1006", "1006p", 52001.0, "R", "NGC 1333")
                },
            ]
            .into_iter()
            .chain(self.extra_science.iter().cloned())
            .collect::<Vec<_>>(),
            FrameCategory::Calib if request.kinds.contains(&FrameType::Flat) => vec![
                calib("2001", "FLAT", 51990.0, "R"),
                calib("2002", "FLAT", 51500.0, "R"),
                calib("2003", "FLAT", 52000.5, "I"),
            ],
            FrameCategory::Calib => vec![
                calib("3001", "BIAS", 52000.1, "R"),
                calib("3002", "BIAS", 52000.2, "R"),
                calib("3003", "DARK", 52003.0, "R"),
            ],
        })
    }
}

fn settings(instruments: Vec<Instrument>) -> ArchiveSettings {
    let mut settings = ArchiveSettings::defaults(Archive::Cfht);
    settings.calibrate = instruments.clone();
    settings.instruments = instruments;
    settings
}

fn region() -> SkyRegion {
    SkyRegion::circle(52.27, 31.31, 0.3).unwrap()
}

#[test]
fn science_is_filtered_and_calibrated() {
    let search = MockSearch::new(Vec::new());
    let settings = settings(vec![Instrument::Cfh12k]);
    let orchestrator = ArchiveSearchOrchestrator::new(&search, &settings, 4);

    let result = orchestrator.run(&region());
    let cfh12k = &result.instruments[0];

    assert_eq!(cfh12k.phase, SearchPhase::Aggregated);
    let science_ids: Vec<&str> = cfh12k.science.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(science_ids, vec!["1001", "1002", "1003"]);
    assert_eq!(cfh12k.excluded, 3);

    let set = &cfh12k.calibration_sets[0];
    assert_eq!(set.bias, vec!["3001", "3002"]);
    assert_eq!(set.dark, vec!["3003"]);
    assert_eq!(set.flat, vec!["2001", "2002"]);

    let counts = cfh12k.counts();
    assert_eq!(counts.science, 3);
    assert_eq!(counts.bias, 2);
    assert_eq!(counts.flat, 2);
    assert_eq!(counts.unique, 3 + 2 + 1 + 2);

    let manifest = result.manifest();
    assert_eq!(manifest.len(), counts.unique);
}

#[test]
fn identical_calibration_queries_run_once() {
    let search = MockSearch::new(Vec::new());
    let settings = settings(vec![Instrument::Cfh12k]);
    let orchestrator = ArchiveSearchOrchestrator::new(&search, &settings, 2);

    orchestrator.run(&region());

    // two distinct epochs, each with one bias/dark and one flat query
    assert_eq!(search.calibration_requests(), 4);
}

#[test]
fn data_quality_issues_become_warnings() {
    let search = MockSearch::new(Vec::new());
    let settings = settings(vec![Instrument::Cfh12k]);
    let orchestrator = ArchiveSearchOrchestrator::new(&search, &settings, 1);

    let result = orchestrator.run(&region());
    let warnings: Vec<&RunWarning> = result.warnings().collect();
    assert!(warnings.iter().any(|warning| matches!(
        warning,
        RunWarning::DataQuality {
            frame: FrameType::Flat,
            issue: MatchIssue::OutsideWindow { .. },
            ..
        }
    )));
    assert!(warnings.iter().any(|warning| matches!(
        warning,
        RunWarning::DataQuality {
            frame: FrameType::Bias,
            issue: MatchIssue::BelowMinimum { found: 2, min: 5 },
            ..
        }
    )));
}

#[test]
fn one_failing_instrument_does_not_stop_others() {
    let search = MockSearch::new(vec![Instrument::Uh8k]);
    let settings = settings(vec![Instrument::Uh8k, Instrument::Cfh12k]);
    let orchestrator = ArchiveSearchOrchestrator::new(&search, &settings, 4);

    let result = orchestrator.run(&region());
    assert_eq!(result.instruments.len(), 2);

    let uh8k = &result.instruments[0];
    assert_eq!(uh8k.instrument, Instrument::Uh8k);
    assert_eq!(uh8k.phase, SearchPhase::SearchingScience);
    assert!(uh8k.science.is_empty());
    assert!(uh8k.error.as_deref().unwrap_or_default().contains("503"));

    let cfh12k = &result.instruments[1];
    assert_eq!(cfh12k.phase, SearchPhase::Aggregated);
    assert_eq!(cfh12k.science.len(), 3);

    assert!(result.warnings().any(|warning| matches!(
        warning,
        RunWarning::Provider {
            instrument: Some(Instrument::Uh8k),
            ..
        }
    )));
}

#[test]
fn uncalibrated_instruments_skip_matching() {
    let search = MockSearch::new(Vec::new());
    let mut settings = settings(vec![Instrument::MegaPrime]);
    settings.calibrate.clear();
    let orchestrator = ArchiveSearchOrchestrator::new(&search, &settings, 4);

    let result = orchestrator.run(&region());
    assert!(result.instruments[0].calibration_sets.is_empty());
    assert_eq!(search.calibration_requests(), 0);
    assert_eq!(result.instruments[0].unique_ids.len(), 3);
}

#[test]
fn science_search_uses_padded_region() {
    let search = MockSearch::new(Vec::new());
    let mut settings = settings(vec![Instrument::MegaPrime]);
    settings.calibrate.clear();
    let orchestrator = ArchiveSearchOrchestrator::new(&search, &settings, 1);

    orchestrator.run(&region());
    let requests = search.requests.lock().unwrap();
    let padded = requests[0].region.unwrap();
    assert_eq!(padded, region().padded(Instrument::MegaPrime.fov_padding()));
}

#[test]
fn untimed_or_unfiltered_science_is_kept_without_calibrations() {
    let search = MockSearch::new(Vec::new()).with_science(vec![
        RawObservation {
            timestamp: None,
            ..science("1007", "1007p", 0.0, "R", "NGC 1333")
        },
        RawObservation {
            filter: None,
            ..science("1008", "1008p", 52002.0, "R", "NGC 1333")
        },
    ]);
    let settings = settings(vec![Instrument::Cfh12k]);
    let orchestrator = ArchiveSearchOrchestrator::new(&search, &settings, 2);

    let result = orchestrator.run(&region());
    let cfh12k = &result.instruments[0];

    let science_ids: Vec<&str> = cfh12k.science.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(science_ids, vec!["1001", "1002", "1003", "1007", "1008"]);
    let calibrated: Vec<&str> = cfh12k
        .calibration_sets
        .iter()
        .map(|set| set.science_id.as_str())
        .collect();
    assert_eq!(calibrated, vec!["1001", "1002", "1003"]);
    assert!(cfh12k.unique_ids.contains("1007"));
    assert!(cfh12k.unique_ids.contains("1008"));
    assert_eq!(search.calibration_requests(), 4);
}
