use std::fs;
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::Credentials;
use crate::error::SkyError;
use crate::search::Artifact;
use crate::warning::RunWarning;

/// An open download. `status` is the HTTP status of the response; a zero
/// `content_length` counts as undeclared.
pub struct TransferStream {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

pub trait TransferProvider: Send + Sync {
    fn open(
        &self,
        artifact: &Artifact,
        credentials: Option<&Credentials>,
    ) -> Result<TransferStream, SkyError>;
}

/// What to do with a file whose written size differs from the declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum IntegrityPolicy {
    #[default]
    Keep,
    Delete,
    Retry { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum TransferOutcome {
    Downloaded,
    AlreadyPresent,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub outcome: TransferOutcome,
    pub warnings: Vec<RunWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferSummary {
    pub downloaded: usize,
    pub already_present: usize,
    pub failed: usize,
    pub outcomes: Vec<(String, TransferOutcome)>,
    #[serde(skip)]
    pub warnings: Vec<RunWarning>,
}

impl TransferSummary {
    fn record(&mut self, id: &str, report: FetchReport) {
        match &report.outcome {
            TransferOutcome::Downloaded => self.downloaded += 1,
            TransferOutcome::AlreadyPresent => self.already_present += 1,
            TransferOutcome::Failed(_) => self.failed += 1,
        }
        self.outcomes.push((id.to_string(), report.outcome));
        self.warnings.extend(report.warnings);
    }

    pub fn merge(&mut self, other: TransferSummary) {
        self.downloaded += other.downloaded;
        self.already_present += other.already_present;
        self.failed += other.failed;
        self.outcomes.extend(other.outcomes);
        self.warnings.extend(other.warnings);
    }
}

pub struct TransferCoordinator<'a> {
    provider: &'a dyn TransferProvider,
    policy: IntegrityPolicy,
    cancel: CancelFlag,
}

enum Attempt {
    Complete,
    Short { expected: u64, written: u64 },
}

impl<'a> TransferCoordinator<'a> {
    pub fn new(provider: &'a dyn TransferProvider, policy: IntegrityPolicy, cancel: CancelFlag) -> Self {
        Self {
            provider,
            policy,
            cancel,
        }
    }

    /// Downloads one artifact unless `destination` already exists. Bytes land
    /// in a temp file beside the destination and are renamed into place only
    /// once the policy accepts them.
    pub fn fetch(
        &self,
        artifact: &Artifact,
        destination: &Utf8Path,
        credentials: Option<&Credentials>,
    ) -> FetchReport {
        let mut warnings = Vec::new();
        if destination.as_std_path().exists() {
            debug!("{} already present at {}", artifact.id, destination);
            return FetchReport {
                outcome: TransferOutcome::AlreadyPresent,
                warnings,
            };
        }

        let attempts = match self.policy {
            IntegrityPolicy::Retry { attempts } => attempts.saturating_add(1),
            _ => 1,
        };

        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            let (temp, result) = match self.download_to_temp(artifact, destination, credentials) {
                Ok(pair) => pair,
                Err(reason) => {
                    warn!("{}: {}", artifact.id, reason);
                    return FetchReport {
                        outcome: TransferOutcome::Failed(reason),
                        warnings,
                    };
                }
            };

            match result {
                Attempt::Complete => {
                    return self.persist(temp, artifact, destination, warnings);
                }
                Attempt::Short { expected, written } => {
                    warn!(
                        "{}: expected {} bytes but wrote {} (attempt {}/{})",
                        artifact.id, expected, written, attempt, attempts
                    );
                    warnings.push(RunWarning::Integrity {
                        id: artifact.id.clone(),
                        expected,
                        written,
                    });
                    match self.policy {
                        IntegrityPolicy::Keep => {
                            return self.persist(temp, artifact, destination, warnings);
                        }
                        IntegrityPolicy::Delete => {
                            return FetchReport {
                                outcome: TransferOutcome::Failed(format!(
                                    "incomplete download: {written} of {expected} bytes"
                                )),
                                warnings,
                            };
                        }
                        IntegrityPolicy::Retry { .. } => {
                            last_failure =
                                format!("incomplete download: {written} of {expected} bytes");
                        }
                    }
                }
            }
        }

        FetchReport {
            outcome: TransferOutcome::Failed(last_failure),
            warnings,
        }
    }

    /// Fetches every artifact in order. Failures never stop the batch; a
    /// cancellation marks the remaining artifacts as failed.
    pub fn fetch_all(
        &self,
        items: &[(Artifact, Utf8PathBuf)],
        credentials: Option<&Credentials>,
    ) -> TransferSummary {
        let mut summary = TransferSummary::default();
        for (artifact, destination) in items {
            if self.cancel.is_cancelled() {
                summary.record(
                    &artifact.id,
                    FetchReport {
                        outcome: TransferOutcome::Failed(SkyError::Cancelled.to_string()),
                        warnings: Vec::new(),
                    },
                );
                continue;
            }
            let report = self.fetch(artifact, destination, credentials);
            summary.record(&artifact.id, report);
        }
        info!(
            "transfers: {} downloaded, {} already present, {} failed",
            summary.downloaded, summary.already_present, summary.failed
        );
        summary
    }

    fn download_to_temp(
        &self,
        artifact: &Artifact,
        destination: &Utf8Path,
        credentials: Option<&Credentials>,
    ) -> Result<(tempfile::NamedTempFile, Attempt), String> {
        let mut stream = self
            .provider
            .open(artifact, credentials)
            .map_err(|err| err.to_string())?;
        if !(200..300).contains(&stream.status) {
            return Err(format!("HTTP status {}", stream.status));
        }

        let parent = destination
            .parent()
            .ok_or_else(|| format!("invalid destination path {destination}"))?;
        fs::create_dir_all(parent.as_std_path()).map_err(|err| err.to_string())?;
        let mut temp = tempfile::Builder::new()
            .prefix(".skyfetch-part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| err.to_string())?;
        let written = io::copy(&mut stream.body, temp.as_file_mut()).map_err(|err| err.to_string())?;

        let attempt = match stream.content_length {
            Some(expected) if expected > 0 && expected != written => {
                Attempt::Short { expected, written }
            }
            _ => Attempt::Complete,
        };
        Ok((temp, attempt))
    }

    fn persist(
        &self,
        temp: tempfile::NamedTempFile,
        artifact: &Artifact,
        destination: &Utf8Path,
        warnings: Vec<RunWarning>,
    ) -> FetchReport {
        match temp.persist(destination.as_std_path()) {
            Ok(_) => {
                info!("{} -> {}", artifact.id, destination);
                FetchReport {
                    outcome: TransferOutcome::Downloaded,
                    warnings,
                }
            }
            Err(err) => FetchReport {
                outcome: TransferOutcome::Failed(err.to_string()),
                warnings,
            },
        }
    }
}
