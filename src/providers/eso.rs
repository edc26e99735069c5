//! ESO archive: wdb query form, request handler and data portal downloads.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::ACCEPT;
use tracing::{debug, info};

use crate::config::{ArchiveSettings, ESO_DOWNLOAD_URL, ESO_REQUEST_URL};
use crate::dedup::ManifestEntry;
use crate::domain::{Archive, Credentials, FrameCategory, FrameType, Instrument};
use crate::error::SkyError;
use crate::providers::http::{ArchiveHttp, with_auth};
use crate::record::RawObservation;
use crate::region::Extent;
use crate::search::{
    ArchiveBackend, Artifact, DeliveryMode, MetadataSearch, SearchRequest, SubmittedRequest,
};
use crate::table::{ColumnMap, parse_csv};
use crate::transfer::{TransferProvider, TransferStream};

static REQUEST_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d+)\b").unwrap());

pub const COLUMNS: ColumnMap = ColumnMap {
    id: &["Dataset ID"],
    product_id: &[],
    timestamp: &["MJD-OBS"],
    filter: &["Filter"],
    frame_type: &["Type", "DPR TYPE"],
    object_name: &["OBJECT"],
    file_name: &["Orig Name"],
    quality_flag: &[],
    ra: &["RA"],
    dec: &["DEC"],
    exposure: &["Exptime", "EXPTIME"],
};

pub fn instrument_name(instrument: Instrument) -> Result<&'static str, SkyError> {
    match instrument {
        Instrument::OmegaCam => Ok("OMEGACAM"),
        other if other.archive() == Archive::Eso => Ok(other.as_str()),
        other => Err(SkyError::InvalidInstrument(format!(
            "{other} is not served by ESO"
        ))),
    }
}

/// Query-form parameters for a science or calibration request. `dp_type`
/// repeats once per wanted calibration type.
pub fn query_params(request: &SearchRequest) -> Result<Vec<(&'static str, String)>, SkyError> {
    let mut params = vec![("instrument", instrument_name(request.instrument)?.to_string())];
    params.push(("degrees_or_hours", "degrees".to_string()));
    match request.category {
        FrameCategory::Science => {
            let region = request.region.ok_or_else(|| {
                SkyError::InvalidExtent("science query without a region".to_string())
            })?;
            match region.extent {
                Extent::Radius { radius } => {
                    params.push(("ra", region.ra_deg.to_string()));
                    params.push(("dec", region.dec_deg.to_string()));
                    // `box` is the full side length
                    params.push(("box", (2.0 * radius).to_string()));
                }
                Extent::Box { .. } => {
                    let bounds = region.bounds();
                    params.push(("ra", format!("{}..{}", bounds.ra_min, bounds.ra_max)));
                    params.push(("dec", format!("{}..{}", bounds.dec_min, bounds.dec_max)));
                }
            }
            params.push(("dp_cat", "SCIENCE".to_string()));
        }
        FrameCategory::Calib => {
            let window = request.window.ok_or_else(|| {
                SkyError::InvalidSetting("calibration query without a time window".to_string())
            })?;
            params.push(("dp_cat", "CALIB".to_string()));
            params.push(("mjd_obs", format!("{}..{}", window.start, window.end)));
            for kind in &request.kinds {
                params.push(("dp_type", kind.label().to_string()));
            }
            if request.kinds.contains(&FrameType::Flat) {
                let filter = request.filter.as_deref().ok_or_else(|| {
                    SkyError::InvalidSetting("flat query without a filter".to_string())
                })?;
                params.push(("filter_path", filter.to_string()));
            }
            params.push(("tab_dp_type", "on".to_string()));
        }
    }
    params.push(("dp_tech", "IMAGE".to_string()));
    params.push(("tab_origfile", "on".to_string()));
    params.push(("wdbo", "csv".to_string()));
    params.push(("top", request.row_limit.to_string()));
    Ok(params)
}

/// Form body for a request submission: `SAF+<id>` joined by commas.
pub fn submission_dataset(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("SAF+{id}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// The request handler answers a submission with the new request number.
pub fn parse_request_id(body: &str) -> Option<String> {
    REQUEST_NUMBER
        .captures(body)
        .map(|caps| caps[1].to_string())
}

/// `recentRequests` lists one request per entry, newest last.
pub fn parse_recent_requests(body: &str) -> Option<String> {
    body.split([',', '\n'])
        .filter_map(|entry| entry.split_whitespace().next())
        .filter(|token| token.chars().all(|ch| ch.is_ascii_digit()))
        .last()
        .map(str::to_string)
}

pub struct EsoBackend {
    http: ArchiveHttp,
    query_url: String,
    request_url: String,
    download_url: String,
}

impl EsoBackend {
    pub fn new(settings: &ArchiveSettings) -> Result<Self, SkyError> {
        Ok(Self {
            http: ArchiveHttp::new(Archive::Eso)?,
            query_url: settings.query_url.clone(),
            request_url: settings
                .request_url
                .clone()
                .unwrap_or_else(|| ESO_REQUEST_URL.to_string()),
            download_url: settings
                .download_url
                .clone()
                .unwrap_or_else(|| ESO_DOWNLOAD_URL.to_string()),
        })
    }

    pub fn artifact_for(
        download_url: &str,
        entry: &ManifestEntry,
        request_id: &str,
        username: &str,
    ) -> Artifact {
        let id = &entry.id;
        let file_name = match entry.file_name.as_deref() {
            Some(orig) => format!("{orig}.Z"),
            None => format!("{id}.fits.Z"),
        };
        Artifact {
            id: id.clone(),
            instrument: entry.instrument,
            file_name,
            url: format!("{download_url}{username}/{request_id}/SAF/{id}/{id}.fits.Z"),
        }
    }

    fn recent_request(&self, credentials: &Credentials) -> Result<Option<String>, SkyError> {
        let url = format!("{}{}/recentRequests", self.request_url, credentials.username);
        let response = self.http.send_with_retries(|| {
            with_auth(self.http.client().get(&url), Some(credentials)).header(ACCEPT, "text/plain")
        })?;
        let body = self
            .http
            .handle_status(response)?
            .text()
            .map_err(|err| self.http.http_error(err))?;
        Ok(parse_recent_requests(&body))
    }
}

impl MetadataSearch for EsoBackend {
    fn archive(&self) -> Archive {
        Archive::Eso
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<RawObservation>, SkyError> {
        let params = query_params(request)?;
        debug!("ESO query: {params:?}");
        let body = self.http.get_text(&self.query_url, &params)?;
        parse_csv(&body, &COLUMNS, Archive::Eso.label())
    }
}

impl TransferProvider for EsoBackend {
    fn open(
        &self,
        artifact: &Artifact,
        credentials: Option<&Credentials>,
    ) -> Result<TransferStream, SkyError> {
        self.http.open(&artifact.url, credentials)
    }
}

impl ArchiveBackend for EsoBackend {
    fn delivery(&self) -> DeliveryMode {
        DeliveryMode::Submission
    }

    fn locate(
        &self,
        entry: &ManifestEntry,
        request: Option<&SubmittedRequest>,
        credentials: Option<&Credentials>,
    ) -> Artifact {
        let request_id = request.map(|req| req.request_id.as_str()).unwrap_or_default();
        let username = credentials
            .map(|creds| creds.username.as_str())
            .unwrap_or_default();
        Self::artifact_for(&self.download_url, entry, request_id, username)
    }

    fn submit(
        &self,
        ids: &[String],
        credentials: &Credentials,
    ) -> Result<SubmittedRequest, SkyError> {
        let url = format!("{}{}/submission", self.request_url, credentials.username);
        let dataset = submission_dataset(ids);
        let response = self.http.send_with_retries(|| {
            with_auth(self.http.client().post(&url), Some(credentials))
                .header(ACCEPT, "text/plain")
                .form(&[("dataset", dataset.as_str())])
        })?;
        let body = self
            .http
            .handle_status(response)?
            .text()
            .map_err(|err| self.http.http_error(err))?;

        let request_id = match parse_request_id(&body) {
            Some(id) => id,
            None => self.recent_request(credentials)?.ok_or_else(|| SkyError::ArchiveHttp {
                archive: Archive::Eso.label().to_string(),
                message: "submission response carried no request number".to_string(),
            })?,
        };
        info!("ESO request {} submitted with {} datasets", request_id, ids.len());
        Ok(SubmittedRequest {
            request_id,
            ids: ids.to_vec(),
        })
    }
}
