use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ArchiveSettings, ResolvedConfig};
use crate::dedup::{DownloadManifest, ManifestEntry};
use crate::domain::{Archive, Credentials, Instrument, TargetName};
use crate::error::SkyError;
use crate::matcher::CalibrationSet;
use crate::orchestrator::{ArchiveResult, ArchiveSearchOrchestrator, InstrumentCounts, SearchPhase};
use crate::region::SkyRegion;
use crate::search::{ArchiveBackend, Artifact, DeliveryMode, SubmittedRequest};
use crate::store::Store;
use crate::transfer::{CancelFlag, TransferCoordinator, TransferSummary};
use crate::warning::RunWarning;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Search, match and write manifests without submitting or downloading.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentSummary {
    pub instrument: Instrument,
    pub phase: SearchPhase,
    #[serde(flatten)]
    pub counts: InstrumentCounts,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub archive: Archive,
    pub delivery: DeliveryMode,
    pub instruments: Vec<InstrumentSummary>,
    pub unique_artifacts: usize,
    pub batches: usize,
    pub requests: Vec<String>,
    pub request_files: Vec<String>,
    pub transfers: TransferSummary,
    pub manifest_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub target: String,
    pub region: SkyRegion,
    pub dry_run: bool,
    pub archives: Vec<ArchiveSummary>,
    pub warnings: Vec<RunWarning>,
}

impl RunSummary {
    pub fn downloaded(&self) -> usize {
        self.archives
            .iter()
            .map(|archive| archive.transfers.downloaded)
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.archives.iter().map(|archive| archive.transfers.failed).sum()
    }
}

/// Written to `<root>/<target>/<ARCHIVE>/manifest.json` after every run.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub tool: String,
    pub generated_at: String,
    pub target: String,
    pub archive: Archive,
    pub region: SkyRegion,
    pub instruments: Vec<InstrumentManifest>,
    pub artifacts: DownloadManifest,
    pub batches: Vec<Vec<String>>,
    pub requests: Vec<SubmittedRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentManifest {
    pub instrument: Instrument,
    pub science_ids: Vec<String>,
    pub calibration_sets: Vec<CalibrationSet>,
    pub unique_ids: BTreeSet<String>,
}

pub struct App {
    store: Store,
    config: ResolvedConfig,
    backends: Vec<Box<dyn ArchiveBackend>>,
    cancel: CancelFlag,
}

impl App {
    pub fn new(store: Store, config: ResolvedConfig, backends: Vec<Box<dyn ArchiveBackend>>) -> Self {
        Self {
            store,
            config,
            backends,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Archives that will need an account for this run.
    pub fn archives_requiring_credentials(&self) -> Vec<Archive> {
        self.backends
            .iter()
            .filter(|backend| backend.requires_credentials())
            .map(|backend| backend.archive())
            .filter(|archive| self.enabled(*archive).is_some())
            .collect()
    }

    /// Archives whose downloads use an account when one is available.
    pub fn archives_accepting_credentials(&self) -> Vec<Archive> {
        self.backends
            .iter()
            .filter(|backend| backend.delivery() != DeliveryMode::MailRequest)
            .map(|backend| backend.archive())
            .filter(|archive| self.enabled(*archive).is_some())
            .collect()
    }

    pub fn fetch(
        &self,
        target: &TargetName,
        region: &SkyRegion,
        credentials: &BTreeMap<Archive, Credentials>,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, SkyError> {
        let mut archives = Vec::new();
        let mut warnings = Vec::new();

        for backend in &self.backends {
            let Some(settings) = self.enabled(backend.archive()) else {
                continue;
            };
            let started = Instant::now();
            sink.event(ProgressEvent {
                message: format!("phase=Search; archive {}", settings.archive),
                elapsed: None,
            });
            let (summary, archive_warnings) = self.fetch_archive(
                backend.as_ref(),
                settings,
                target,
                region,
                credentials.get(&settings.archive),
                options,
                sink,
            )?;
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Done; archive {} unique={} downloaded={}",
                    settings.archive, summary.unique_artifacts, summary.transfers.downloaded
                ),
                elapsed: Some(started.elapsed()),
            });
            archives.push(summary);
            warnings.extend(archive_warnings);
        }

        if !warnings.is_empty() {
            info!("{} warnings raised during the run", warnings.len());
        }
        Ok(RunSummary {
            target: target.to_string(),
            region: *region,
            dry_run: options.dry_run,
            archives,
            warnings,
        })
    }

    fn enabled(&self, archive: Archive) -> Option<&ArchiveSettings> {
        self.config
            .settings(archive)
            .filter(|settings| settings.enabled)
    }

    #[allow(clippy::too_many_arguments)]
    fn fetch_archive(
        &self,
        backend: &dyn ArchiveBackend,
        settings: &ArchiveSettings,
        target: &TargetName,
        region: &SkyRegion,
        credentials: Option<&Credentials>,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<(ArchiveSummary, Vec<RunWarning>), SkyError> {
        let archive = settings.archive;
        let orchestrator =
            ArchiveSearchOrchestrator::new(backend, settings, self.config.max_parallel_requests);
        let result = orchestrator.run(region);
        let mut warnings = result.warnings().cloned().collect::<Vec<_>>();

        let manifest = result.manifest();
        let batches = manifest.batches(settings.batch_limit)?;
        info!(
            "{archive}: {} unique artifacts in {} batches",
            manifest.len(),
            batches.len()
        );

        let mut requests = Vec::new();
        let mut request_files = Vec::new();
        let mut transfers = TransferSummary::default();

        if options.dry_run {
            sink.event(ProgressEvent {
                message: format!("phase=Deliver; archive {archive} skipped (dry run)"),
                elapsed: None,
            });
        } else if !manifest.is_empty() {
            sink.event(ProgressEvent {
                message: format!("phase=Deliver; archive {archive}"),
                elapsed: None,
            });
            let coordinator =
                TransferCoordinator::new(backend, self.config.integrity_policy, self.cancel.clone());
            match backend.delivery() {
                DeliveryMode::Direct => {
                    let items = self.locate_all(backend, target, &manifest.entries, None, credentials);
                    transfers.merge(coordinator.fetch_all(&items, credentials));
                }
                DeliveryMode::Submission => match credentials {
                    Some(creds) => {
                        for entries in &batches {
                            let ids = entries.iter().map(|entry| entry.id.clone()).collect::<Vec<_>>();
                            match backend.submit(&ids, creds) {
                                Ok(request) => {
                                    let items = self.locate_all(
                                        backend,
                                        target,
                                        entries,
                                        Some(&request),
                                        Some(creds),
                                    );
                                    transfers.merge(coordinator.fetch_all(&items, Some(creds)));
                                    requests.push(request);
                                }
                                Err(err) => {
                                    warn!("{archive}: request submission failed: {err}");
                                    warnings.push(RunWarning::Provider {
                                        archive,
                                        instrument: None,
                                        message: err.to_string(),
                                    });
                                }
                            }
                        }
                    }
                    None => {
                        let err = SkyError::MissingCredentials(archive.label().to_string());
                        warn!("{archive}: {err}; skipping submission");
                        warnings.push(RunWarning::Provider {
                            archive,
                            instrument: None,
                            message: err.to_string(),
                        });
                    }
                },
                DeliveryMode::MailRequest => {
                    let mut by_instrument: BTreeMap<Instrument, Vec<ManifestEntry>> = BTreeMap::new();
                    for entry in &manifest.entries {
                        by_instrument
                            .entry(entry.instrument)
                            .or_default()
                            .push(entry.clone());
                    }
                    for (instrument, entries) in by_instrument {
                        let dir = self.store.instrument_dir(target, archive, instrument);
                        match backend.write_requests(&dir, target, instrument, &entries, settings.batch_limit) {
                            Ok(paths) => request_files.extend(paths.iter().map(|path| path.to_string())),
                            Err(err) => {
                                warn!("{archive} {instrument}: {err}");
                                warnings.push(RunWarning::Provider {
                                    archive,
                                    instrument: Some(instrument),
                                    message: err.to_string(),
                                });
                            }
                        }
                    }
                }
            }
            warnings.extend(transfers.warnings.iter().cloned());
        }

        let manifest_path = self.store.manifest_path(target, archive);
        let run_manifest = build_run_manifest(target, region, &result, &manifest, &batches, &requests);
        let manifest_path = match Store::write_json_atomic(&manifest_path, &run_manifest) {
            Ok(()) => Some(manifest_path.to_string()),
            Err(err) => {
                warn!("{archive}: manifest not written: {err}");
                warnings.push(RunWarning::Provider {
                    archive,
                    instrument: None,
                    message: format!("manifest not written: {err}"),
                });
                None
            }
        };

        let summary = ArchiveSummary {
            archive,
            delivery: backend.delivery(),
            instruments: result
                .instruments
                .iter()
                .map(|instrument| InstrumentSummary {
                    instrument: instrument.instrument,
                    phase: instrument.phase,
                    counts: instrument.counts(),
                    error: instrument.error.clone(),
                })
                .collect(),
            unique_artifacts: manifest.len(),
            batches: batches.len(),
            requests: requests.iter().map(|request| request.request_id.clone()).collect(),
            request_files,
            transfers,
            manifest_path,
        };
        Ok((summary, warnings))
    }

    fn locate_all(
        &self,
        backend: &dyn ArchiveBackend,
        target: &TargetName,
        entries: &[ManifestEntry],
        request: Option<&SubmittedRequest>,
        credentials: Option<&Credentials>,
    ) -> Vec<(Artifact, Utf8PathBuf)> {
        entries
            .iter()
            .map(|entry| {
                let artifact = backend.locate(entry, request, credentials);
                let destination = self.store.artifact_path(
                    target,
                    backend.archive(),
                    artifact.instrument,
                    &artifact.file_name,
                );
                (artifact, destination)
            })
            .collect()
    }
}

fn build_run_manifest(
    target: &TargetName,
    region: &SkyRegion,
    result: &ArchiveResult,
    manifest: &DownloadManifest,
    batches: &[Vec<ManifestEntry>],
    requests: &[SubmittedRequest],
) -> RunManifest {
    RunManifest {
        tool: format!("skyfetch/{}", env!("CARGO_PKG_VERSION")),
        generated_at: iso_timestamp(),
        target: target.to_string(),
        archive: result.archive,
        region: *region,
        instruments: result
            .instruments
            .iter()
            .map(|instrument| InstrumentManifest {
                instrument: instrument.instrument,
                science_ids: instrument.science.iter().map(|record| record.id.clone()).collect(),
                calibration_sets: instrument.calibration_sets.clone(),
                unique_ids: instrument.unique_ids.clone(),
            })
            .collect(),
        artifacts: manifest.clone(),
        batches: batches
            .iter()
            .map(|entries| entries.iter().map(|entry| entry.id.clone()).collect())
            .collect(),
        requests: requests.to_vec(),
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;
    use crate::output::JsonOutput;
    use crate::record::RawObservation;
    use crate::search::{MetadataSearch, SearchRequest};
    use crate::transfer::{TransferProvider, TransferStream};
    use camino::Utf8Path;

    struct MockBackend {
        archive: Archive,
        delivery: DeliveryMode,
        searches: Mutex<usize>,
        opens: Mutex<usize>,
    }

    impl MockBackend {
        fn new(archive: Archive, delivery: DeliveryMode) -> Self {
            Self {
                archive,
                delivery,
                searches: Mutex::new(0),
                opens: Mutex::new(0),
            }
        }
    }

    impl MetadataSearch for MockBackend {
        fn archive(&self) -> Archive {
            self.archive
        }

        fn search(&self, request: &SearchRequest) -> Result<Vec<RawObservation>, SkyError> {
            *self.searches.lock().unwrap() += 1;
            let row = |id: &str| RawObservation {
                id: Some(id.to_string()),
                product_id: Some(format!("{id}p")),
                timestamp: Some(58000.0),
                filter: Some("r".to_string()),
                object_name: Some("NGC 1333".to_string()),
                ..RawObservation::default()
            };
            Ok(match request.instrument {
                Instrument::MegaPrime => vec![row("100"), row("101")],
                _ => Vec::new(),
            })
        }
    }

    impl TransferProvider for MockBackend {
        fn open(
            &self,
            artifact: &Artifact,
            _credentials: Option<&Credentials>,
        ) -> Result<TransferStream, SkyError> {
            *self.opens.lock().unwrap() += 1;
            let body = format!("data for {}", artifact.id).into_bytes();
            Ok(TransferStream {
                status: 200,
                content_length: Some(body.len() as u64),
                body: Box::new(Cursor::new(body)),
            })
        }
    }

    impl ArchiveBackend for MockBackend {
        fn delivery(&self) -> DeliveryMode {
            self.delivery
        }

        fn locate(
            &self,
            entry: &ManifestEntry,
            _request: Option<&SubmittedRequest>,
            _credentials: Option<&Credentials>,
        ) -> Artifact {
            Artifact {
                id: entry.id.clone(),
                instrument: entry.instrument,
                file_name: format!("{}.fits", entry.id),
                url: format!("mock://{}", entry.id),
            }
        }
    }

    fn config_for(archive: Archive) -> ResolvedConfig {
        let mut config = ResolvedConfig::default();
        config.restrict_to(&[archive]);
        for settings in &mut config.archives {
            settings.instruments = vec![Instrument::MegaPrime, Instrument::WirCam];
            settings.calibrate.clear();
        }
        config
    }

    fn make_app(
        dir: &tempfile::TempDir,
        archive: Archive,
        backend: MockBackend,
    ) -> App {
        let root = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();
        let store = Store::new_with_paths(root.join("out"), root.join("cache"));
        App::new(store, config_for(archive), vec![Box::new(backend)])
    }

    fn region() -> SkyRegion {
        SkyRegion::circle(52.27, 31.31, 0.2).unwrap()
    }

    #[test]
    fn dry_run_writes_manifest_without_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_app(&dir, Archive::Cfht, MockBackend::new(Archive::Cfht, DeliveryMode::Direct));
        let target: TargetName = "NGC 1333".parse().unwrap();

        let summary = app
            .fetch(
                &target,
                &region(),
                &BTreeMap::new(),
                &FetchOptions { dry_run: true },
                &JsonOutput,
            )
            .unwrap();

        assert_eq!(summary.archives.len(), 1);
        let archive = &summary.archives[0];
        assert_eq!(archive.unique_artifacts, 2);
        assert_eq!(archive.batches, 1);
        assert_eq!(archive.transfers.downloaded, 0);

        let manifest_path = app.store().manifest_path(&target, Archive::Cfht);
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(manifest_path).unwrap()).unwrap();
        assert_eq!(written["archive"], "cfht");
        assert_eq!(written["batches"][0].as_array().unwrap().len(), 2);
    }

    #[test]
    fn direct_delivery_downloads_every_artifact_once() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_app(&dir, Archive::Cfht, MockBackend::new(Archive::Cfht, DeliveryMode::Direct));
        let target: TargetName = "NGC 1333".parse().unwrap();

        let first = app
            .fetch(&target, &region(), &BTreeMap::new(), &FetchOptions::default(), &JsonOutput)
            .unwrap();
        assert_eq!(first.downloaded(), 2);
        assert_eq!(first.failed(), 0);

        let path = app
            .store()
            .artifact_path(&target, Archive::Cfht, Instrument::MegaPrime, "100.fits");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "data for 100");

        let second = app
            .fetch(&target, &region(), &BTreeMap::new(), &FetchOptions::default(), &JsonOutput)
            .unwrap();
        assert_eq!(second.downloaded(), 0);
        assert_eq!(second.archives[0].transfers.already_present, 2);
    }

    #[test]
    fn submission_without_credentials_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_app(&dir, Archive::Eso, MockBackend::new(Archive::Eso, DeliveryMode::Submission));
        let target: TargetName = "NGC 1333".parse().unwrap();

        assert_eq!(app.archives_requiring_credentials(), vec![Archive::Eso]);
        let summary = app
            .fetch(&target, &region(), &BTreeMap::new(), &FetchOptions::default(), &JsonOutput)
            .unwrap();

        assert_eq!(summary.downloaded(), 0);
        assert!(summary.warnings.iter().any(|warning| matches!(
            warning,
            RunWarning::Provider { archive: Archive::Eso, instrument: None, .. }
        )));
    }

    #[test]
    fn manifest_write_failure_does_not_stop_later_archives() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();
        let store = Store::new_with_paths(root.join("out"), root.join("cache"));
        let mut config = config_for(Archive::Cfht);
        config.restrict_to(&[Archive::Cfht, Archive::Eso]);
        let backends: Vec<Box<dyn ArchiveBackend>> = vec![
            Box::new(MockBackend::new(Archive::Cfht, DeliveryMode::Direct)),
            Box::new(MockBackend::new(Archive::Eso, DeliveryMode::Direct)),
        ];
        let app = App::new(store, config, backends);
        let target: TargetName = "NGC 1333".parse().unwrap();

        let blocked = app.store().archive_dir(&target, Archive::Cfht);
        std::fs::create_dir_all(blocked.parent().unwrap()).unwrap();
        std::fs::write(&blocked, "not a directory").unwrap();

        let summary = app
            .fetch(
                &target,
                &region(),
                &BTreeMap::new(),
                &FetchOptions { dry_run: true },
                &JsonOutput,
            )
            .unwrap();

        assert_eq!(summary.archives.len(), 2);
        assert_eq!(summary.archives[0].manifest_path, None);
        assert!(summary.warnings.iter().any(|warning| matches!(
            warning,
            RunWarning::Provider { archive: Archive::Cfht, instrument: None, .. }
        )));
        let eso_manifest = app.store().manifest_path(&target, Archive::Eso);
        assert_eq!(summary.archives[1].manifest_path, Some(eso_manifest.to_string()));
        assert!(eso_manifest.as_std_path().exists());
    }

    #[test]
    fn cancelled_run_downloads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelFlag::new();
        let app = make_app(&dir, Archive::Cfht, MockBackend::new(Archive::Cfht, DeliveryMode::Direct))
            .with_cancel(cancel.clone());
        let target: TargetName = "NGC 1333".parse().unwrap();
        cancel.cancel();

        let summary = app
            .fetch(&target, &region(), &BTreeMap::new(), &FetchOptions::default(), &JsonOutput)
            .unwrap();

        assert_eq!(summary.downloaded(), 0);
        assert_eq!(summary.failed(), 2);
        let path = app
            .store()
            .artifact_path(&target, Archive::Cfht, Instrument::MegaPrime, "100.fits");
        assert!(!path.as_std_path().exists());
    }

    #[test]
    fn disabled_archives_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new(Archive::Smoka, DeliveryMode::MailRequest);
        let app = make_app(&dir, Archive::Cfht, backend);
        let target: TargetName = "NGC 1333".parse().unwrap();

        let summary = app
            .fetch(&target, &region(), &BTreeMap::new(), &FetchOptions::default(), &JsonOutput)
            .unwrap();
        assert!(summary.archives.is_empty());
    }
}
