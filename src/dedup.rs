use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::batch::batch;
use crate::domain::Instrument;
use crate::error::SkyError;
use crate::record::ObservationRecord;

/// Concatenates the lists, drops missing entries and returns the unique ids.
pub fn dedupe<'a, I, L>(lists: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = L>,
    L: IntoIterator<Item = &'a Option<String>>,
{
    lists
        .into_iter()
        .flatten()
        .filter_map(|id| id.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub id: String,
    pub instrument: Instrument,
    pub file_name: Option<String>,
}

/// Accumulates ids from science and calibration results. The first record
/// seen for an id decides its file name and instrument.
#[derive(Debug, Default)]
pub struct ResultDeduplicator {
    entries: BTreeMap<String, ManifestEntry>,
}

impl ResultDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, record: &ObservationRecord) {
        self.entries
            .entry(record.id.clone())
            .or_insert_with(|| ManifestEntry {
                id: record.id.clone(),
                instrument: record.instrument,
                file_name: record.file_name.clone(),
            });
    }

    pub fn add_records<'a>(&mut self, records: impl IntoIterator<Item = &'a ObservationRecord>) {
        for record in records {
            self.add_record(record);
        }
    }

    /// Adds a bare id, e.g. a calibration id whose record is unavailable.
    pub fn add_id(&mut self, id: &str, instrument: Instrument) {
        self.entries
            .entry(id.to_string())
            .or_insert_with(|| ManifestEntry {
                id: id.to_string(),
                instrument,
                file_name: None,
            });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> DownloadManifest {
        DownloadManifest {
            entries: self.entries.into_values().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadManifest {
    pub entries: Vec<ManifestEntry>,
}

impl DownloadManifest {
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn batches(&self, limit: usize) -> Result<Vec<Vec<ManifestEntry>>, SkyError> {
        batch(&self.entries, limit)
    }
}
