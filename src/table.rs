use csv::{ReaderBuilder, StringRecord, Trim};

use crate::error::SkyError;
use crate::record::RawObservation;

/// Header names an archive uses for each observation field. Each field lists
/// accepted aliases; the first header matching any of them is used.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub id: &'static [&'static str],
    pub product_id: &'static [&'static str],
    pub timestamp: &'static [&'static str],
    pub filter: &'static [&'static str],
    pub frame_type: &'static [&'static str],
    pub object_name: &'static [&'static str],
    pub file_name: &'static [&'static str],
    pub quality_flag: &'static [&'static str],
    pub ra: &'static [&'static str],
    pub dec: &'static [&'static str],
    pub exposure: &'static [&'static str],
}

struct Resolved {
    id: usize,
    product_id: Option<usize>,
    timestamp: Option<usize>,
    filter: Option<usize>,
    frame_type: Option<usize>,
    object_name: Option<usize>,
    file_name: Option<usize>,
    quality_flag: Option<usize>,
    ra: Option<usize>,
    dec: Option<usize>,
    exposure: Option<usize>,
}

/// Parses a CSV metadata response. An empty body is an empty table; a body
/// whose header lacks the identifier column is malformed.
pub fn parse_csv(
    text: &str,
    columns: &ColumnMap,
    archive: &str,
) -> Result<Vec<RawObservation>, SkyError> {
    if text.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    }) {
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| malformed(archive, err.to_string()))?
        .iter()
        .map(normalize_header)
        .collect::<Vec<_>>();

    let resolved = Resolved {
        id: find(&headers, columns.id).ok_or_else(|| {
            malformed(
                archive,
                format!("missing identifier column (one of {:?})", columns.id),
            )
        })?,
        product_id: find(&headers, columns.product_id),
        timestamp: find(&headers, columns.timestamp),
        filter: find(&headers, columns.filter),
        frame_type: find(&headers, columns.frame_type),
        object_name: find(&headers, columns.object_name),
        file_name: find(&headers, columns.file_name),
        quality_flag: find(&headers, columns.quality_flag),
        ra: find(&headers, columns.ra),
        dec: find(&headers, columns.dec),
        exposure: find(&headers, columns.exposure),
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| malformed(archive, err.to_string()))?;
        rows.push(RawObservation {
            id: text_at(&record, Some(resolved.id)),
            product_id: text_at(&record, resolved.product_id),
            timestamp: number_at(&record, resolved.timestamp),
            filter: text_at(&record, resolved.filter),
            frame_type: text_at(&record, resolved.frame_type),
            object_name: text_at(&record, resolved.object_name),
            file_name: text_at(&record, resolved.file_name),
            quality_flag: text_at(&record, resolved.quality_flag),
            ra_deg: number_at(&record, resolved.ra),
            dec_deg: number_at(&record, resolved.dec),
            exposure: number_at(&record, resolved.exposure),
        });
    }
    Ok(rows)
}

fn normalize_header(value: &str) -> String {
    value.trim().trim_matches('"').trim().to_ascii_lowercase()
}

fn find(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| {
        let alias = alias.to_ascii_lowercase();
        headers.iter().position(|header| *header == alias)
    })
}

fn text_at(record: &StringRecord, idx: Option<usize>) -> Option<String> {
    let value = record.get(idx?)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn number_at(record: &StringRecord, idx: Option<usize>) -> Option<f64> {
    record
        .get(idx?)?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn malformed(archive: &str, message: String) -> SkyError {
    SkyError::MalformedTable {
        archive: archive.to_string(),
        message,
    }
}
