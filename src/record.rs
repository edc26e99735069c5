use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{FrameType, Instrument};

static FILTER_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filter_name\s*=\s*"([^"]*)""#).unwrap());
static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// One metadata row as an archive returned it, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawObservation {
    pub id: Option<String>,
    pub product_id: Option<String>,
    pub timestamp: Option<f64>,
    pub filter: Option<String>,
    pub frame_type: Option<String>,
    pub object_name: Option<String>,
    pub file_name: Option<String>,
    pub quality_flag: Option<String>,
    pub ra_deg: Option<f64>,
    pub dec_deg: Option<f64>,
    pub exposure: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRecord {
    pub id: String,
    pub product_id: Option<String>,
    /// Modified Julian date of the exposure start.
    pub timestamp: Option<f64>,
    pub filter_name: Option<String>,
    pub instrument: Instrument,
    pub frame_type: FrameType,
    /// Target name, or an `unnamed_obj_<n>` placeholder.
    pub original_name: String,
    /// File name the archive knows the artifact by, used for output naming.
    pub file_name: Option<String>,
    pub calibration_quality_flag: Option<String>,
    pub ra_deg: Option<f64>,
    pub dec_deg: Option<f64>,
    pub exposure: Option<f64>,
}

impl ObservationRecord {
    pub fn is_junk(&self) -> bool {
        self.calibration_quality_flag
            .as_deref()
            .map(|flag| flag.trim().eq_ignore_ascii_case("junk"))
            .unwrap_or(false)
    }

    /// Calibration frames that were tagged as OBJECT still carry the frame
    /// kind in their target name.
    pub fn name_suggests_calibration(&self) -> bool {
        let upper = self.original_name.to_ascii_uppercase();
        upper.contains("BIAS") || upper.contains("FLAT") || upper.contains("DARK")
    }

    pub fn distance_to(&self, t0: f64) -> Option<f64> {
        self.timestamp
            .filter(|t| t.is_finite())
            .map(|t| (t - t0).abs())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub records: Vec<ObservationRecord>,
    pub unnamed: usize,
    pub repaired_filters: usize,
    pub dropped: usize,
}

/// Turns one response table into records. Rows without an identifier are
/// dropped, missing target names become `unnamed_obj_<n>` (counting from 1
/// within this table) and filter labels are reduced to their bare value.
pub fn ingest(rows: Vec<RawObservation>, instrument: Instrument, default_type: FrameType) -> Ingested {
    let mut out = Ingested::default();
    for row in rows {
        let Some(id) = row.id.as_deref().and_then(clean_cell) else {
            out.dropped += 1;
            continue;
        };
        let original_name = match row.object_name.as_deref().and_then(clean_cell) {
            Some(name) => name,
            None => {
                out.unnamed += 1;
                format!("unnamed_obj_{}", out.unnamed)
            }
        };
        let (filter_name, repaired) = match row.filter.as_deref() {
            Some(raw) => normalize_filter(raw),
            None => (None, false),
        };
        if repaired {
            out.repaired_filters += 1;
        }
        let frame_type = row
            .frame_type
            .as_deref()
            .map(FrameType::classify)
            .filter(|kind| *kind != FrameType::Unknown)
            .unwrap_or(default_type);

        out.records.push(ObservationRecord {
            id,
            product_id: row.product_id.as_deref().and_then(clean_cell),
            timestamp: row.timestamp.filter(|t| t.is_finite()),
            filter_name,
            instrument,
            frame_type,
            original_name,
            file_name: row.file_name.as_deref().and_then(clean_cell),
            calibration_quality_flag: row.quality_flag.as_deref().and_then(clean_cell),
            ra_deg: row.ra_deg,
            dec_deg: row.dec_deg,
            exposure: row.exposure,
        });
    }

    if out.unnamed > 0 {
        info!("{}: {} unnamed images have been named", instrument, out.unnamed);
    }
    if out.repaired_filters > 0 {
        info!(
            "{}: {} errors in filter name have been found and corrected",
            instrument, out.repaired_filters
        );
    }
    if out.dropped > 0 {
        debug!("{}: dropped {} rows without identifier", instrument, out.dropped);
    }
    out
}

/// Returns the bare filter label and whether the raw value had to be repaired.
pub fn normalize_filter(raw: &str) -> (Option<String>, bool) {
    if let Some(caps) = FILTER_ATTR.captures(raw) {
        let inner = MARKUP.replace_all(&caps[1], "");
        return (clean_cell(&inner), true);
    }
    if MARKUP.is_match(raw) {
        let stripped = MARKUP.replace_all(raw, "");
        return (clean_cell(&stripped), true);
    }
    (clean_cell(raw), false)
}

fn clean_cell(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_matches('"').trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("none")
    {
        return None;
    }
    Some(trimmed.to_string())
}
