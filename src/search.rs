use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::dedup::ManifestEntry;
use crate::domain::{Archive, Credentials, FrameCategory, FrameType, Instrument, TargetName};
use crate::error::SkyError;
use crate::record::RawObservation;
use crate::region::{SkyRegion, TimeWindow};
use crate::transfer::TransferProvider;

/// One metadata query against an archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub region: Option<SkyRegion>,
    pub instrument: Instrument,
    pub category: FrameCategory,
    /// Calibration frame types wanted; empty for science queries.
    pub kinds: Vec<FrameType>,
    pub filter: Option<String>,
    pub window: Option<TimeWindow>,
    pub row_limit: usize,
}

impl SearchRequest {
    /// Science frames inside `region`, which callers pass already padded.
    pub fn science(region: SkyRegion, instrument: Instrument, row_limit: usize) -> Self {
        Self {
            region: Some(region),
            instrument,
            category: FrameCategory::Science,
            kinds: Vec::new(),
            filter: None,
            window: None,
            row_limit,
        }
    }

    pub fn bias_dark(instrument: Instrument, window: TimeWindow, row_limit: usize) -> Self {
        Self {
            region: None,
            instrument,
            category: FrameCategory::Calib,
            kinds: vec![FrameType::Bias, FrameType::Dark],
            filter: None,
            window: Some(window),
            row_limit,
        }
    }

    pub fn flat(
        instrument: Instrument,
        filter: &str,
        window: TimeWindow,
        row_limit: usize,
    ) -> Self {
        Self {
            region: None,
            instrument,
            category: FrameCategory::Calib,
            kinds: vec![FrameType::Flat],
            filter: Some(filter.to_string()),
            window: Some(window),
            row_limit,
        }
    }

    /// Frame type assigned to rows whose type column is missing or unknown.
    pub fn default_frame_type(&self) -> FrameType {
        match self.category {
            FrameCategory::Science => FrameType::Science,
            FrameCategory::Calib => match self.kinds.as_slice() {
                [only] => *only,
                _ => FrameType::Unknown,
            },
        }
    }
}

pub trait MetadataSearch: Send + Sync {
    fn archive(&self) -> Archive;
    fn search(&self, request: &SearchRequest) -> Result<Vec<RawObservation>, SkyError>;
}

/// A downloadable file and where the archive serves it from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub id: String,
    pub instrument: Instrument,
    pub file_name: String,
    pub url: String,
}

/// An archive-side request that groups a batch of ids for retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedRequest {
    pub request_id: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Files are downloaded straight from their archive URL.
    Direct,
    /// Batches are submitted as requests first, then downloaded per request.
    Submission,
    /// Batches are written out as request files for the user to mail.
    MailRequest,
}

pub trait ArchiveBackend: MetadataSearch + TransferProvider {
    fn delivery(&self) -> DeliveryMode;

    fn locate(
        &self,
        entry: &ManifestEntry,
        request: Option<&SubmittedRequest>,
        credentials: Option<&Credentials>,
    ) -> Artifact;

    fn submit(
        &self,
        _ids: &[String],
        _credentials: &Credentials,
    ) -> Result<SubmittedRequest, SkyError> {
        Err(SkyError::Unsupported {
            archive: self.archive().label().to_string(),
            operation: "request submission".to_string(),
        })
    }

    /// Writes request files for archives that deliver by mail, returning the
    /// paths written.
    fn write_requests(
        &self,
        _dir: &Utf8Path,
        _target: &TargetName,
        _instrument: Instrument,
        _entries: &[ManifestEntry],
        _batch_limit: usize,
    ) -> Result<Vec<Utf8PathBuf>, SkyError> {
        Err(SkyError::Unsupported {
            archive: self.archive().label().to_string(),
            operation: "mail requests".to_string(),
        })
    }

    /// Whether downloads need an account.
    fn requires_credentials(&self) -> bool {
        matches!(self.delivery(), DeliveryMode::Submission)
    }
}
