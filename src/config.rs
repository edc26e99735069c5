use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{Archive, Instrument};
use crate::error::SkyError;
use crate::matcher::{CalibrationMatcher, MatchPolicy};
use crate::transfer::IntegrityPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "skyfetch.json";
pub const DEFAULT_MAX_PARALLEL_REQUESTS: usize = 4;

pub const CADC_TAP_URL: &str = "http://www.cadc-ccda.hia-iha.nrc-cnrc.gc.ca/tap/sync";
pub const CADC_DOWNLOAD_URL: &str = "http://www.cadc-ccda.hia-iha.nrc-cnrc.gc.ca/data/pub/";
pub const ESO_QUERY_URL: &str = "http://archive.eso.org/wdb/wdb/eso/eso_archive_main/query";
pub const ESO_REQUEST_URL: &str = "https://dataportal.eso.org/rh/api/requests/";
pub const ESO_DOWNLOAD_URL: &str = "https://dataportal.eso.org/dataPortal/api/requests/";
pub const SMOKA_OBSLOG_URL: &str = "https://smoka.nao.ac.jp/status/obslog/";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub output_root: Option<String>,
    #[serde(default)]
    pub max_parallel_requests: Option<usize>,
    #[serde(default)]
    pub integrity_policy: Option<IntegrityPolicy>,
    #[serde(default)]
    pub archives: ArchivesConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ArchivesConfig {
    #[serde(default)]
    pub cfht: Option<ArchiveEntry>,
    #[serde(default)]
    pub eso: Option<ArchiveEntry>,
    #[serde(default)]
    pub smoka: Option<ArchiveEntry>,
}

/// Per-archive overrides. Anything left out keeps the archive default.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ArchiveEntry {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub query_url: Option<String>,
    #[serde(default)]
    pub request_url: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub instruments: Option<Vec<String>>,
    #[serde(default)]
    pub calibrate: Option<Vec<String>>,
    #[serde(default)]
    pub bias_dark_window: Option<f64>,
    #[serde(default)]
    pub flat_window: Option<f64>,
    #[serde(default)]
    pub min_calibrations: Option<usize>,
    #[serde(default)]
    pub max_calibrations: Option<usize>,
    #[serde(default)]
    pub row_limit: Option<usize>,
    #[serde(default)]
    pub batch_limit: Option<usize>,
    #[serde(default)]
    pub product_suffix: Option<String>,
    #[serde(default)]
    pub first_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveSettings {
    pub archive: Archive,
    pub enabled: bool,
    pub query_url: String,
    pub request_url: Option<String>,
    pub download_url: Option<String>,
    pub instruments: Vec<Instrument>,
    /// Instruments whose science frames get calibration matching.
    pub calibrate: Vec<Instrument>,
    pub policy: MatchPolicy,
    pub row_limit: usize,
    /// Most ids per submitted request (or per mail file for SMOKA).
    pub batch_limit: usize,
    /// Suffix a product id must carry to count as a usable science product.
    pub product_suffix: Option<String>,
    /// Oldest observation log year to fetch; `None` uses the instrument's
    /// commissioning year.
    pub first_year: Option<i32>,
}

impl ArchiveSettings {
    pub fn defaults(archive: Archive) -> Self {
        match archive {
            Archive::Cfht => Self {
                archive,
                enabled: true,
                query_url: CADC_TAP_URL.to_string(),
                request_url: None,
                download_url: Some(CADC_DOWNLOAD_URL.to_string()),
                instruments: archive.instruments(),
                calibrate: vec![Instrument::Cfh12k, Instrument::Uh8k],
                policy: MatchPolicy::default(),
                row_limit: 10_000,
                batch_limit: 10_000,
                product_suffix: Some("p".to_string()),
                first_year: None,
            },
            Archive::Eso => Self {
                archive,
                enabled: true,
                query_url: ESO_QUERY_URL.to_string(),
                request_url: Some(ESO_REQUEST_URL.to_string()),
                download_url: Some(ESO_DOWNLOAD_URL.to_string()),
                instruments: archive.instruments(),
                calibrate: archive.instruments(),
                policy: MatchPolicy::default(),
                row_limit: 20_000,
                batch_limit: 10_000,
                product_suffix: None,
                first_year: None,
            },
            Archive::Smoka => Self {
                archive,
                enabled: true,
                query_url: SMOKA_OBSLOG_URL.to_string(),
                request_url: None,
                download_url: None,
                instruments: archive.instruments(),
                calibrate: archive.instruments(),
                policy: MatchPolicy::default(),
                row_limit: usize::MAX,
                batch_limit: 1_000,
                product_suffix: None,
                first_year: None,
            },
        }
    }

    pub fn calibrates(&self, instrument: Instrument) -> bool {
        self.calibrate.contains(&instrument)
    }

    pub fn matcher(&self) -> CalibrationMatcher {
        CalibrationMatcher::new(self.policy)
    }

    fn apply(mut self, entry: ArchiveEntry) -> Result<Self, SkyError> {
        if let Some(enabled) = entry.enabled {
            self.enabled = enabled;
        }
        if let Some(url) = entry.query_url {
            self.query_url = url;
        }
        if let Some(url) = entry.request_url {
            self.request_url = Some(url);
        }
        if let Some(url) = entry.download_url {
            self.download_url = Some(url);
        }
        if let Some(names) = entry.instruments {
            self.instruments = parse_instruments(self.archive, &names)?;
        }
        if let Some(names) = entry.calibrate {
            self.calibrate = parse_instruments(self.archive, &names)?;
        }
        if let Some(window) = entry.bias_dark_window {
            self.policy.bias_dark_window = positive_window("bias_dark_window", window)?;
        }
        if let Some(window) = entry.flat_window {
            self.policy.flat_window = positive_window("flat_window", window)?;
        }
        if let Some(min) = entry.min_calibrations {
            self.policy.min_calibrations = min;
        }
        if let Some(max) = entry.max_calibrations {
            if max == 0 {
                return Err(SkyError::InvalidSetting(
                    "max_calibrations must be at least 1".to_string(),
                ));
            }
            self.policy.max_calibrations = max;
        }
        if let Some(limit) = entry.row_limit {
            if limit == 0 {
                return Err(SkyError::InvalidSetting(
                    "row_limit must be at least 1".to_string(),
                ));
            }
            self.row_limit = limit;
        }
        if let Some(limit) = entry.batch_limit {
            if limit == 0 {
                return Err(SkyError::InvalidBatchLimit(limit));
            }
            self.batch_limit = limit;
        }
        if let Some(suffix) = entry.product_suffix {
            let suffix = suffix.trim().to_string();
            self.product_suffix = (!suffix.is_empty()).then_some(suffix);
        }
        if let Some(year) = entry.first_year {
            self.first_year = Some(year);
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub output_root: Option<Utf8PathBuf>,
    pub max_parallel_requests: usize,
    pub integrity_policy: IntegrityPolicy,
    pub archives: Vec<ArchiveSettings>,
}

impl ResolvedConfig {
    pub fn settings(&self, archive: Archive) -> Option<&ArchiveSettings> {
        self.archives
            .iter()
            .find(|settings| settings.archive == archive)
    }

    pub fn enabled_archives(&self) -> impl Iterator<Item = &ArchiveSettings> {
        self.archives.iter().filter(|settings| settings.enabled)
    }

    /// Disables every archive not listed. An empty list keeps the file's choice.
    pub fn restrict_to(&mut self, archives: &[Archive]) {
        if archives.is_empty() {
            return;
        }
        for settings in &mut self.archives {
            settings.enabled = archives.contains(&settings.archive);
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            output_root: None,
            max_parallel_requests: DEFAULT_MAX_PARALLEL_REQUESTS,
            integrity_policy: IntegrityPolicy::default(),
            archives: Archive::all()
                .into_iter()
                .map(ArchiveSettings::defaults)
                .collect(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `skyfetch.json` in the working directory when present.
    /// Without either, the defaults are used.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SkyError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SkyError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SkyError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SkyError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let max_parallel_requests = config
            .max_parallel_requests
            .unwrap_or(DEFAULT_MAX_PARALLEL_REQUESTS);
        if max_parallel_requests == 0 {
            return Err(SkyError::InvalidSetting(
                "max_parallel_requests must be at least 1".to_string(),
            ));
        }

        let ArchivesConfig { cfht, eso, smoka } = config.archives;
        let archives = [
            (Archive::Smoka, smoka),
            (Archive::Cfht, cfht),
            (Archive::Eso, eso),
        ]
        .into_iter()
        .map(|(archive, entry)| {
            let defaults = ArchiveSettings::defaults(archive);
            match entry {
                Some(entry) => defaults.apply(entry),
                None => Ok(defaults),
            }
        })
        .collect::<Result<Vec<_>, SkyError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            output_root: config
                .output_root
                .filter(|root| !root.trim().is_empty())
                .map(Utf8PathBuf::from),
            max_parallel_requests,
            integrity_policy: config.integrity_policy.unwrap_or_default(),
            archives,
        })
    }
}

fn parse_instruments(archive: Archive, names: &[String]) -> Result<Vec<Instrument>, SkyError> {
    let mut instruments = Vec::new();
    for name in names {
        let instrument: Instrument = name.parse()?;
        if instrument.archive() != archive {
            return Err(SkyError::InvalidInstrument(format!(
                "{name} is not served by {archive}"
            )));
        }
        if !instruments.contains(&instrument) {
            instruments.push(instrument);
        }
    }
    Ok(instruments)
}

fn positive_window(name: &str, value: f64) -> Result<f64, SkyError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(SkyError::InvalidSetting(format!(
            "{name} must be a positive number of days, got {value}"
        )));
    }
    Ok(value)
}
