use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ArchiveSettings;
use crate::dedup::{DownloadManifest, ResultDeduplicator, dedupe};
use crate::domain::{Archive, FrameType, Instrument};
use crate::error::SkyError;
use crate::matcher::CalibrationSet;
use crate::pool::map_bounded;
use crate::record::{ObservationRecord, ingest};
use crate::region::SkyRegion;
use crate::search::{MetadataSearch, SearchRequest};
use crate::warning::RunWarning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Init,
    SearchingScience,
    Classifying,
    MatchingCalibration,
    Aggregated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstrumentCounts {
    pub science: usize,
    pub bias: usize,
    pub dark: usize,
    pub flat: usize,
    pub unique: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentResult {
    pub instrument: Instrument,
    /// Last phase reached; anything short of `Aggregated` means the search failed.
    pub phase: SearchPhase,
    pub science: Vec<ObservationRecord>,
    pub excluded: usize,
    pub calibration_sets: Vec<CalibrationSet>,
    #[serde(skip)]
    pub calibration_records: BTreeMap<String, ObservationRecord>,
    pub unique_ids: BTreeSet<String>,
    pub warnings: Vec<RunWarning>,
    pub error: Option<String>,
}

impl InstrumentResult {
    fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            phase: SearchPhase::Init,
            science: Vec::new(),
            excluded: 0,
            calibration_sets: Vec::new(),
            calibration_records: BTreeMap::new(),
            unique_ids: BTreeSet::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn counts(&self) -> InstrumentCounts {
        let sets = &self.calibration_sets;
        InstrumentCounts {
            science: self.science.len(),
            bias: unique_count(sets.iter().flat_map(|set| &set.bias)),
            dark: unique_count(sets.iter().flat_map(|set| &set.dark)),
            flat: unique_count(sets.iter().flat_map(|set| &set.flat)),
            unique: self.unique_ids.len(),
        }
    }
}

fn unique_count<'s>(ids: impl Iterator<Item = &'s String>) -> usize {
    ids.collect::<BTreeSet<_>>().len()
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveResult {
    pub archive: Archive,
    pub instruments: Vec<InstrumentResult>,
}

impl ArchiveResult {
    /// Deduplicated artifacts across every instrument of the archive.
    pub fn manifest(&self) -> DownloadManifest {
        let mut dedup = ResultDeduplicator::new();
        for result in &self.instruments {
            dedup.add_records(&result.science);
            dedup.add_records(result.calibration_records.values());
            for id in &result.unique_ids {
                dedup.add_id(id, result.instrument);
            }
        }
        dedup.finish()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &RunWarning> {
        self.instruments.iter().flat_map(|result| &result.warnings)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CalibrationQuery {
    BiasDark { t0: f64 },
    Flat { t0: f64, filter: String },
}

impl CalibrationQuery {
    fn key(&self) -> (u64, Option<&str>) {
        match self {
            CalibrationQuery::BiasDark { t0 } => (t0.to_bits(), None),
            CalibrationQuery::Flat { t0, filter } => (t0.to_bits(), Some(filter.as_str())),
        }
    }
}

/// Runs the per-instrument pipeline for one archive: science search,
/// classification, calibration matching and aggregation.
pub struct ArchiveSearchOrchestrator<'a> {
    search: &'a dyn MetadataSearch,
    settings: &'a ArchiveSettings,
    max_parallel: usize,
}

impl<'a> ArchiveSearchOrchestrator<'a> {
    pub fn new(
        search: &'a dyn MetadataSearch,
        settings: &'a ArchiveSettings,
        max_parallel: usize,
    ) -> Self {
        Self {
            search,
            settings,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn run(&self, region: &SkyRegion) -> ArchiveResult {
        let instruments = &self.settings.instruments;
        let inner = (self.max_parallel / instruments.len().max(1)).max(1);
        let results = map_bounded(instruments, self.max_parallel, |instrument| {
            self.run_instrument(*instrument, region, inner)
        });
        ArchiveResult {
            archive: self.settings.archive,
            instruments: results,
        }
    }

    pub fn run_instrument(
        &self,
        instrument: Instrument,
        region: &SkyRegion,
        parallel: usize,
    ) -> InstrumentResult {
        let archive = self.settings.archive;
        let mut result = InstrumentResult::new(instrument);

        result.phase = SearchPhase::SearchingScience;
        info!("{archive}: searching in {instrument}");
        let request = SearchRequest::science(
            region.padded(instrument.fov_padding()),
            instrument,
            self.settings.row_limit,
        );
        let rows = match self.search.search(&request) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("{archive} {instrument}: science search failed: {err}");
                result.warnings.push(RunWarning::Provider {
                    archive,
                    instrument: Some(instrument),
                    message: err.to_string(),
                });
                result.error = Some(err.to_string());
                return result;
            }
        };

        result.phase = SearchPhase::Classifying;
        let ingested = ingest(rows, instrument, FrameType::Science);
        let total = ingested.records.len();
        result.science = ingested
            .records
            .into_iter()
            .filter(|record| self.is_usable_science(record))
            .collect();
        result.excluded = total - result.science.len();
        info!("{instrument} images: {}", result.science.len());
        if result.excluded > 0 {
            debug!("{instrument}: excluded {} frames", result.excluded);
        }

        if self.settings.calibrates(instrument) && !result.science.is_empty() {
            result.phase = SearchPhase::MatchingCalibration;
            self.match_calibrations(&mut result, parallel);
        }

        result.phase = SearchPhase::Aggregated;
        let science_ids = result
            .science
            .iter()
            .map(|record| Some(record.id.clone()))
            .collect::<Vec<_>>();
        let calibration_ids = result
            .calibration_sets
            .iter()
            .flat_map(|set| set.all_ids().cloned().map(Some))
            .collect::<Vec<_>>();
        result.unique_ids = dedupe([&science_ids, &calibration_ids]);
        result
    }

    fn is_usable_science(&self, record: &ObservationRecord) -> bool {
        if record.name_suggests_calibration() || record.frame_type.is_calibration() {
            return false;
        }
        if record.is_junk() {
            return false;
        }
        match self.settings.product_suffix.as_deref() {
            Some(suffix) => record
                .product_id
                .as_deref()
                .map(|pid| pid.ends_with(suffix))
                .unwrap_or(false),
            None => true,
        }
    }

    fn match_calibrations(&self, result: &mut InstrumentResult, parallel: usize) {
        let archive = self.settings.archive;
        let instrument = result.instrument;
        let matcher = self.settings.matcher();

        let mut queries: Vec<CalibrationQuery> = Vec::new();
        for record in &result.science {
            let (Some(t0), Some(filter)) = (record.timestamp, record.filter_name.as_deref()) else {
                continue;
            };
            for query in [
                CalibrationQuery::BiasDark { t0 },
                CalibrationQuery::Flat {
                    t0,
                    filter: filter.to_string(),
                },
            ] {
                if !queries.iter().any(|known| known.key() == query.key()) {
                    queries.push(query);
                }
            }
        }
        info!(
            "{instrument}: searching BIAS, DARK and FLAT with {} unique queries",
            queries.len()
        );

        let responses = map_bounded(&queries, parallel, |query| {
            let request = match query {
                CalibrationQuery::BiasDark { t0 } => SearchRequest::bias_dark(
                    instrument,
                    matcher.bias_dark_window(*t0),
                    self.settings.row_limit,
                ),
                CalibrationQuery::Flat { t0, filter } => SearchRequest::flat(
                    instrument,
                    filter,
                    matcher.flat_window(*t0),
                    self.settings.row_limit,
                ),
            };
            self.search
                .search(&request)
                .map(|rows| ingest(rows, instrument, request.default_frame_type()).records)
        });

        let mut candidates: HashMap<(u64, Option<String>), Vec<ObservationRecord>> = HashMap::new();
        for (query, response) in queries.iter().zip(responses) {
            let (bits, filter) = query.key();
            let records = match response {
                Ok(records) => records,
                Err(err) => {
                    warn!("{archive} {instrument}: calibration search failed: {err}");
                    result.warnings.push(provider_warning(archive, instrument, &err));
                    Vec::new()
                }
            };
            candidates.insert((bits, filter.map(str::to_string)), records);
        }

        let mut sets = Vec::new();
        let mut selected_records = BTreeMap::new();
        for record in &result.science {
            let (Some(t0), Some(filter)) = (record.timestamp, record.filter_name.as_deref()) else {
                continue;
            };
            let empty = Vec::new();
            let bias_dark_pool = candidates.get(&(t0.to_bits(), None)).unwrap_or(&empty);
            let flat_pool = candidates
                .get(&(t0.to_bits(), Some(filter.to_string())))
                .unwrap_or(&empty);

            let bias_dark = matcher.match_bias_dark(t0, instrument, bias_dark_pool);
            let flat = matcher.match_flat(t0, filter, instrument, flat_pool);

            for (frame, selected) in [
                (FrameType::Bias, &bias_dark.bias),
                (FrameType::Dark, &bias_dark.dark),
                (FrameType::Flat, &flat),
            ] {
                for issue in &selected.issues {
                    result.warnings.push(RunWarning::DataQuality {
                        archive,
                        instrument,
                        science_id: record.id.clone(),
                        frame,
                        issue: issue.clone(),
                    });
                }
            }

            collect_selected(
                &mut selected_records,
                bias_dark_pool,
                bias_dark.bias.ids.iter().chain(&bias_dark.dark.ids),
            );
            collect_selected(&mut selected_records, flat_pool, flat.ids.iter());
            sets.push(CalibrationSet::new(&record.id, &bias_dark, &flat));
        }
        result.calibration_sets = sets;
        result.calibration_records = selected_records;
    }
}

fn provider_warning(archive: Archive, instrument: Instrument, err: &SkyError) -> RunWarning {
    RunWarning::Provider {
        archive,
        instrument: Some(instrument),
        message: err.to_string(),
    }
}

fn collect_selected<'i>(
    out: &mut BTreeMap<String, ObservationRecord>,
    pool: &[ObservationRecord],
    ids: impl Iterator<Item = &'i String>,
) {
    let wanted = ids.collect::<BTreeSet<_>>();
    for record in pool {
        if wanted.contains(&record.id) {
            out.entry(record.id.clone())
                .or_insert_with(|| record.clone());
        }
    }
}
