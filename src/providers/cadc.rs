//! CFHT archive through the CADC TAP service.

use tracing::debug;

use crate::config::ArchiveSettings;
use crate::dedup::ManifestEntry;
use crate::domain::{Archive, Credentials, FrameCategory, FrameType, Instrument};
use crate::error::SkyError;
use crate::providers::http::ArchiveHttp;
use crate::record::RawObservation;
use crate::search::{
    ArchiveBackend, Artifact, DeliveryMode, MetadataSearch, SearchRequest, SubmittedRequest,
};
use crate::table::{ColumnMap, parse_csv};
use crate::transfer::{TransferProvider, TransferStream};

pub const COLUMNS: ColumnMap = ColumnMap {
    id: &["Plane URI"],
    product_id: &["Product ID"],
    timestamp: &["Start Date"],
    filter: &["Filter"],
    frame_type: &["Obs. Type"],
    object_name: &["Target Name"],
    file_name: &[],
    quality_flag: &["Quality Flag"],
    ra: &[],
    dec: &[],
    exposure: &["Int. Time"],
};

const SELECT_COLUMNS: &str = "Plane.planeURI AS \"Plane URI\", \
Plane.productID AS \"Product ID\", \
Observation.instrument_name AS \"Instrument\", \
Plane.time_bounds_lower AS \"Start Date\", \
Plane.time_exposure AS \"Int. Time\", \
Plane.energy_bandpassName AS \"Filter\", \
Plane.quality_flag AS \"Quality Flag\"";

const FROM_JOIN: &str = "FROM caom2.Plane AS Plane \
JOIN caom2.Observation AS Observation ON Plane.obsID = Observation.obsID";

const NOT_JUNK: &str = "( Plane.quality_flag IS NULL OR Plane.quality_flag != 'junk' )";

/// Names the instrument is recorded under in CAOM.
pub fn instrument_names(instrument: Instrument) -> Result<&'static [&'static str], SkyError> {
    let names: &'static [&'static str] = match instrument {
        Instrument::MegaPrime => &["MegaPrime"],
        Instrument::WirCam => &["WIRCam"],
        Instrument::Uh8k => &["UH8K", "UH8K MOSAIC CAMERA"],
        Instrument::Cfh12k => &["CFH12K MOSAIC"],
        other => {
            return Err(SkyError::InvalidInstrument(format!(
                "{other} is not served by CFHT"
            )));
        }
    };
    Ok(names)
}

fn sql_list(values: &[&str]) -> String {
    let quoted = values
        .iter()
        .map(|value| format!("'{}'", value.replace('\'', "''")))
        .collect::<Vec<_>>();
    format!("( {} )", quoted.join(","))
}

/// Builds the ADQL query for a science or calibration request.
pub fn build_query(request: &SearchRequest) -> Result<String, SkyError> {
    let instruments = sql_list(instrument_names(request.instrument)?);
    match request.category {
        FrameCategory::Science => {
            let region = request.region.ok_or_else(|| {
                SkyError::InvalidExtent("science query without a region".to_string())
            })?;
            let bounds = region.bounds();
            Ok(format!(
                "SELECT TOP {top} {SELECT_COLUMNS}, \
Observation.target_name AS \"Target Name\", \
Plane.dataProductType AS \"Data Type\" \
{FROM_JOIN} \
WHERE ( INTERSECTS( RANGE_S2D({ra_min},{ra_max},{dec_min},{dec_max}), Plane.position_bounds ) = 1 \
AND Observation.instrument_name IN {instruments} \
AND Observation.type = 'OBJECT' \
AND {NOT_JUNK} )",
                top = request.row_limit,
                ra_min = bounds.ra_min,
                ra_max = bounds.ra_max,
                dec_min = bounds.dec_min,
                dec_max = bounds.dec_max,
            ))
        }
        FrameCategory::Calib => {
            let window = request.window.ok_or_else(|| {
                SkyError::InvalidSetting("calibration query without a time window".to_string())
            })?;
            let mut clauses = vec![
                format!(
                    "INTERSECTS( INTERVAL({},{}), Plane.time_bounds_samples ) = 1",
                    window.start, window.end
                ),
                format!("Observation.instrument_name IN {instruments}"),
            ];
            if request.kinds.contains(&FrameType::Flat) {
                let filter = request.filter.as_deref().ok_or_else(|| {
                    SkyError::InvalidSetting("flat query without a filter".to_string())
                })?;
                clauses.push(format!(
                    "Plane.energy_bandpassName = '{}'",
                    filter.replace('\'', "''")
                ));
                let flat_types: &[&str] = match request.instrument {
                    Instrument::Uh8k => &["FLAT", "FLATFIELD"],
                    _ => &["FLAT"],
                };
                clauses.push(format!("Observation.type IN {}", sql_list(flat_types)));
            } else {
                clauses.push(format!(
                    "Observation.type IN {}",
                    sql_list(&["BIAS", "DARK"])
                ));
            }
            clauses.push(NOT_JUNK.to_string());
            Ok(format!(
                "SELECT TOP {top} {SELECT_COLUMNS}, \
Observation.type AS \"Obs. Type\" \
{FROM_JOIN} \
WHERE ( {clauses} )",
                top = request.row_limit,
                clauses = clauses.join(" AND "),
            ))
        }
    }
}

/// `caom:CFHT/1234567/1234567p` becomes `(CFHT, 1234567p.fits.fz)`.
pub fn split_plane_uri(plane_uri: &str) -> Option<(&str, String)> {
    let path = plane_uri.split_once(':').map(|(_, rest)| rest)?;
    let mut parts = path.split('/');
    let collection = parts.next().filter(|part| !part.is_empty())?;
    let file = parts.last().filter(|part| !part.is_empty())?;
    Some((collection, format!("{file}.fits.fz")))
}

pub struct CadcBackend {
    http: ArchiveHttp,
    query_url: String,
    download_url: String,
}

impl CadcBackend {
    pub fn new(settings: &ArchiveSettings) -> Result<Self, SkyError> {
        Ok(Self {
            http: ArchiveHttp::new(Archive::Cfht)?,
            query_url: settings.query_url.clone(),
            download_url: settings
                .download_url
                .clone()
                .unwrap_or_else(|| crate::config::CADC_DOWNLOAD_URL.to_string()),
        })
    }

    pub fn artifact_for(download_url: &str, entry: &ManifestEntry) -> Artifact {
        let (url, file_name) = match split_plane_uri(&entry.id) {
            Some((collection, file)) => (format!("{download_url}{collection}/{file}"), file),
            None => {
                let file = entry.id.replace([':', '/'], "_");
                (format!("{download_url}{}", entry.id), file)
            }
        };
        Artifact {
            id: entry.id.clone(),
            instrument: entry.instrument,
            file_name,
            url,
        }
    }
}

impl MetadataSearch for CadcBackend {
    fn archive(&self) -> Archive {
        Archive::Cfht
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<RawObservation>, SkyError> {
        let query = build_query(request)?;
        debug!("CFHT ADQL: {query}");
        let params = [
            ("REQUEST", "doQuery".to_string()),
            ("LANG", "ADQL".to_string()),
            ("FORMAT", "CSV".to_string()),
            ("QUERY", query),
        ];
        let body = self.http.get_text(&self.query_url, &params)?;
        parse_csv(&body, &COLUMNS, Archive::Cfht.label())
    }
}

impl TransferProvider for CadcBackend {
    fn open(
        &self,
        artifact: &Artifact,
        credentials: Option<&Credentials>,
    ) -> Result<TransferStream, SkyError> {
        self.http.open(&artifact.url, credentials)
    }
}

impl ArchiveBackend for CadcBackend {
    fn delivery(&self) -> DeliveryMode {
        DeliveryMode::Direct
    }

    fn locate(
        &self,
        entry: &ManifestEntry,
        _request: Option<&SubmittedRequest>,
        _credentials: Option<&Credentials>,
    ) -> Artifact {
        Self::artifact_for(&self.download_url, entry)
    }
}
