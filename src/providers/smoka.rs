//! SMOKA (Subaru) yearly observation logs, searched locally. SMOKA has no
//! download API; frames are requested by mailing the generated request files.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Datelike, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use crate::batch::batch;
use crate::config::{ArchiveSettings, SMOKA_OBSLOG_URL};
use crate::dedup::ManifestEntry;
use crate::domain::{Archive, Credentials, FrameCategory, FrameType, Instrument, TargetName};
use crate::error::SkyError;
use crate::providers::http::ArchiveHttp;
use crate::record::RawObservation;
use crate::region::{AngleUnit, parse_sexagesimal};
use crate::search::{
    ArchiveBackend, Artifact, DeliveryMode, MetadataSearch, SearchRequest, SubmittedRequest,
};
use crate::store::Store;
use crate::transfer::{TransferProvider, TransferStream};

const MJD_UNIX_EPOCH: f64 = 40587.0;
const MAIL_HEADER: &str = "SMOKAID \t \n \nPURPOSE \t Research(star formation)\n \n";

/// Column positions used when an obslog carries no usable header.
const FALLBACK_COLUMNS: ObslogColumns = ObslogColumns {
    frame_id: 0,
    date_obs: 1,
    object: Some(2),
    filter: 4,
    ra: 5,
    dec: 6,
    ut: 14,
    exptime: 15,
    data_type: 17,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ObslogColumns {
    frame_id: usize,
    date_obs: usize,
    object: Option<usize>,
    filter: usize,
    ra: usize,
    dec: usize,
    ut: usize,
    exptime: usize,
    data_type: usize,
}

impl ObslogColumns {
    fn from_header(header: &[&str]) -> Option<Self> {
        let find = |name: &str| header.iter().position(|col| col.eq_ignore_ascii_case(name));
        Some(Self {
            frame_id: find("FRAME_ID")?,
            date_obs: find("DATE_OBS")?,
            object: find("OBJECT"),
            filter: find("FILTER")?,
            ra: find("RA2000")?,
            dec: find("DEC2000")?,
            ut: find("UT_STR")?,
            exptime: find("EXPTIME")?,
            data_type: find("DATA_TYP")?,
        })
    }
}

/// One frame from a SMOKA observation log.
#[derive(Debug, Clone, PartialEq)]
pub struct ObslogRow {
    pub frame_id: String,
    pub date_obs: String,
    pub object: Option<String>,
    pub filter: String,
    pub ra: String,
    pub dec: String,
    pub ut: String,
    pub exptime: String,
    pub data_type: String,
    pub mjd: Option<f64>,
}

impl ObslogRow {
    pub fn frame_type(&self) -> FrameType {
        match self.data_type.trim().to_ascii_uppercase().as_str() {
            "BIAS" | "ZERO" => FrameType::Bias,
            "FLAT" | "DOMEFLAT" | "SKYFLAT" => FrameType::Flat,
            "DARK" => FrameType::Dark,
            _ => FrameType::Science,
        }
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        let ra = parse_sexagesimal(&self.ra, AngleUnit::Hours).ok()?;
        let dec = parse_sexagesimal(&self.dec, AngleUnit::Degrees).ok()?;
        Some((ra, dec))
    }

    fn to_raw(&self) -> RawObservation {
        let position = self.position();
        RawObservation {
            id: Some(self.frame_id.clone()),
            product_id: None,
            timestamp: self.mjd,
            filter: Some(self.filter.clone()),
            frame_type: Some(self.frame_type().label().to_string()),
            object_name: self.object.clone(),
            file_name: None,
            quality_flag: None,
            ra_deg: position.map(|(ra, _)| ra),
            dec_deg: position.map(|(_, dec)| dec),
            exposure: self.exptime.parse().ok(),
        }
    }
}

/// Modified Julian date of `DATE_OBS` + `UT_STR`.
pub fn mjd_from_date_time(date: &str, ut: &str) -> Option<f64> {
    let stamp = format!("{}T{}", date.trim(), ut.trim());
    let parsed = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    let utc = parsed.and_utc();
    let seconds = utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) * 1e-9;
    Some(seconds / 86_400.0 + MJD_UNIX_EPOCH)
}

/// Parses a whitespace-separated obslog. The last `#` line is the header; the
/// documented column positions apply when it lacks a required column.
pub fn parse_obslog(text: &str) -> Vec<ObslogRow> {
    let mut columns = FALLBACK_COLUMNS;
    let mut rows = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            let header = trimmed
                .trim_start_matches('#')
                .split_whitespace()
                .collect::<Vec<_>>();
            columns = ObslogColumns::from_header(&header).unwrap_or(FALLBACK_COLUMNS);
            continue;
        }
        let cells = trimmed.split_whitespace().collect::<Vec<_>>();
        let cell = |idx: usize| cells.get(idx).map(|value| value.to_string());
        let (Some(frame_id), Some(date_obs), Some(data_type)) = (
            cell(columns.frame_id),
            cell(columns.date_obs),
            cell(columns.data_type),
        ) else {
            continue;
        };
        let ut = cell(columns.ut).unwrap_or_default();
        rows.push(ObslogRow {
            mjd: mjd_from_date_time(&date_obs, &ut),
            frame_id,
            date_obs,
            object: columns.object.and_then(cell),
            filter: cell(columns.filter).unwrap_or_default(),
            ra: cell(columns.ra).unwrap_or_default(),
            dec: cell(columns.dec).unwrap_or_default(),
            ut,
            exptime: cell(columns.exptime).unwrap_or_default(),
            data_type,
        });
    }
    rows
}

/// Serves a metadata request from already loaded obslog rows.
pub fn search_rows(rows: &[ObslogRow], request: &SearchRequest) -> Vec<RawObservation> {
    let matches = rows.iter().filter(|row| match request.category {
        FrameCategory::Science => {
            if row.frame_type().is_calibration() {
                return false;
            }
            match (request.region, row.position()) {
                (Some(region), Some((ra, dec))) => region.contains(ra, dec),
                _ => false,
            }
        }
        FrameCategory::Calib => {
            if !request.kinds.contains(&row.frame_type()) {
                return false;
            }
            let in_window = match (request.window, row.mjd) {
                (Some(window), Some(mjd)) => window.contains(mjd),
                (None, _) => true,
                (Some(_), None) => false,
            };
            in_window
                && request
                    .filter
                    .as_deref()
                    .map(|filter| row.filter == filter)
                    .unwrap_or(true)
        }
    });
    matches
        .take(request.row_limit)
        .map(ObslogRow::to_raw)
        .collect()
}

pub fn obslog_prefix(instrument: Instrument) -> Result<&'static str, SkyError> {
    match instrument {
        Instrument::SuprimeCam => Ok("SUP"),
        Instrument::HyperSuprimeCam => Ok("HSC"),
        other => Err(SkyError::InvalidInstrument(format!(
            "{other} is not served by SMOKA"
        ))),
    }
}

fn commissioning_year(instrument: Instrument) -> i32 {
    match instrument {
        Instrument::HyperSuprimeCam => 2014,
        _ => 1999,
    }
}

/// Mail request bodies of at most `limit` frames each.
pub fn mail_requests(rows: &[&ObslogRow], limit: usize) -> Result<Vec<String>, SkyError> {
    batch(rows, limit).map(|batches| {
        batches
            .into_iter()
            .map(|chunk| {
                let mut body = String::from(MAIL_HEADER);
                body.push_str("#FRAME_ID DATE_OBS\n");
                for row in chunk {
                    let _ = writeln!(body, "{} {}", row.frame_id, row.date_obs);
                }
                body
            })
            .collect()
    })
}

pub fn frame_list(rows: &[&ObslogRow]) -> String {
    let mut body = String::from("#FRAME_ID DATE_OBS FILTER RA2000 DEC2000 UT_STR EXPTIME DATA_TYP\n");
    for row in rows {
        let _ = writeln!(
            body,
            "{} {} {} {} {} {} {} {}",
            row.frame_id,
            row.date_obs,
            row.filter,
            row.ra,
            row.dec,
            row.ut,
            row.exptime,
            row.data_type
        );
    }
    body
}

type TableCache = Mutex<HashMap<Instrument, Arc<Vec<ObslogRow>>>>;

pub struct SmokaBackend {
    http: ArchiveHttp,
    obslog_url: String,
    cache_dir: Utf8PathBuf,
    first_year: Option<i32>,
    tables: TableCache,
}

impl SmokaBackend {
    pub fn new(settings: &ArchiveSettings, cache_dir: Utf8PathBuf) -> Result<Self, SkyError> {
        let obslog_url = if settings.query_url.is_empty() {
            SMOKA_OBSLOG_URL.to_string()
        } else {
            settings.query_url.clone()
        };
        Ok(Self {
            http: ArchiveHttp::new(Archive::Smoka)?,
            obslog_url,
            cache_dir,
            first_year: settings.first_year,
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Preloads an instrument's table, bypassing the network.
    pub fn with_rows(mut self, instrument: Instrument, rows: Vec<ObslogRow>) -> Self {
        self.tables
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instrument, Arc::new(rows));
        self
    }

    fn table(&self, instrument: Instrument) -> Result<Arc<Vec<ObslogRow>>, SkyError> {
        let cached = self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instrument)
            .cloned();
        if let Some(table) = cached {
            return Ok(table);
        }
        let rows = Arc::new(self.load_obslogs(instrument)?);
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instrument, rows.clone());
        Ok(rows)
    }

    /// Walks back from the current year, stopping at the first missing year
    /// once any log was found. Past years come from the cache when present.
    fn load_obslogs(&self, instrument: Instrument) -> Result<Vec<ObslogRow>, SkyError> {
        let prefix = obslog_prefix(instrument)?;
        let current = Utc::now().year();
        let floor = self
            .first_year
            .unwrap_or_else(|| commissioning_year(instrument));
        let mut rows = Vec::new();
        let mut found_any = false;
        for year in (floor..=current).rev() {
            let cache_path = self.cache_dir.join(format!("{prefix}_{year}.txt"));
            let cached = cache_path.as_std_path().exists();
            let text = if cached && year < current {
                std::fs::read_to_string(cache_path.as_std_path())
                    .map_err(|err| SkyError::Filesystem(err.to_string()))?
            } else {
                match self.fetch_year(prefix, year) {
                    Ok(Some(text)) => {
                        Store::write_bytes_atomic(&cache_path, text.as_bytes())?;
                        text
                    }
                    Ok(None) if found_any => break,
                    Ok(None) => continue,
                    Err(err) if cached => {
                        warn!("SMOKA {prefix} {year}: {err}; using cached log");
                        std::fs::read_to_string(cache_path.as_std_path())
                            .map_err(|err| SkyError::Filesystem(err.to_string()))?
                    }
                    Err(err) => return Err(err),
                }
            };
            found_any = true;
            let parsed = parse_obslog(&text);
            debug!("SMOKA {prefix} {year}: {} frames", parsed.len());
            rows.extend(parsed);
        }
        info!("SMOKA {prefix}: {} frames in observation logs", rows.len());
        Ok(rows)
    }

    fn fetch_year(&self, prefix: &str, year: i32) -> Result<Option<String>, SkyError> {
        let url = format!("{}{prefix}_{year}.txt", self.obslog_url);
        let response = self.http.send_with_retries(|| self.http.client().get(&url))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = self.http.handle_status(response)?;
        response
            .text()
            .map(Some)
            .map_err(|err| self.http.http_error(err))
    }
}

impl MetadataSearch for SmokaBackend {
    fn archive(&self) -> Archive {
        Archive::Smoka
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<RawObservation>, SkyError> {
        let table = self.table(request.instrument)?;
        Ok(search_rows(&table, request))
    }
}

impl TransferProvider for SmokaBackend {
    fn open(
        &self,
        _artifact: &Artifact,
        _credentials: Option<&Credentials>,
    ) -> Result<TransferStream, SkyError> {
        Err(SkyError::Unsupported {
            archive: Archive::Smoka.label().to_string(),
            operation: "direct download".to_string(),
        })
    }
}

impl ArchiveBackend for SmokaBackend {
    fn delivery(&self) -> DeliveryMode {
        DeliveryMode::MailRequest
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
            url: String::new(),
        }
    }

    fn write_requests(
        &self,
        dir: &Utf8Path,
        target: &TargetName,
        instrument: Instrument,
        entries: &[ManifestEntry],
        batch_limit: usize,
    ) -> Result<Vec<Utf8PathBuf>, SkyError> {
        let prefix = obslog_prefix(instrument)?;
        let table = self.table(instrument)?;
        let by_id = table
            .iter()
            .map(|row| (row.frame_id.as_str(), row))
            .collect::<HashMap<_, _>>();
        let rows = entries
            .iter()
            .filter_map(|entry| by_id.get(entry.id.as_str()).copied())
            .collect::<Vec<_>>();

        let stem = target.dir_name();
        let mut written = Vec::new();
        for (idx, body) in mail_requests(&rows, batch_limit)?.into_iter().enumerate() {
            let path = dir.join(format!("{stem}_{prefix}_mail_{}.txt", idx + 1));
            Store::write_bytes_atomic(&path, body.as_bytes())?;
            written.push(path);
        }
        let list_path = dir.join(format!("{stem}_{prefix}_list.txt"));
        Store::write_bytes_atomic(&list_path, frame_list(&rows).as_bytes())?;
        written.push(list_path);
        info!(
            "SMOKA {instrument}: {} frames in {} mail requests",
            rows.len(),
            written.len() - 1
        );
        Ok(written)
    }
}
