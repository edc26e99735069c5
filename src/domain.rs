use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SkyError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Archive {
    Cfht,
    Eso,
    Smoka,
}

impl Archive {
    pub fn all() -> [Archive; 3] {
        [Archive::Smoka, Archive::Cfht, Archive::Eso]
    }

    /// Directory name used under the target folder.
    pub fn label(self) -> &'static str {
        match self {
            Archive::Cfht => "CFHT",
            Archive::Eso => "ESO",
            Archive::Smoka => "SMOKA",
        }
    }

    pub fn env_prefix(self) -> &'static str {
        match self {
            Archive::Cfht => "SKYFETCH_CFHT",
            Archive::Eso => "SKYFETCH_ESO",
            Archive::Smoka => "SKYFETCH_SMOKA",
        }
    }

    pub fn instruments(self) -> Vec<Instrument> {
        Instrument::all()
            .into_iter()
            .filter(|inst| inst.archive() == self)
            .collect()
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Archive {
    type Err = SkyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cfht" | "cadc" => Ok(Archive::Cfht),
            "eso" => Ok(Archive::Eso),
            "smoka" => Ok(Archive::Smoka),
            _ => Err(SkyError::InvalidArchive(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Instrument {
    MegaPrime,
    WirCam,
    Uh8k,
    Cfh12k,
    Sofi,
    Wfi,
    Vircam,
    OmegaCam,
    Vimos,
    Fors1,
    Fors2,
    Hawki,
    SuprimeCam,
    HyperSuprimeCam,
}

impl Instrument {
    pub fn all() -> Vec<Instrument> {
        vec![
            Instrument::MegaPrime,
            Instrument::WirCam,
            Instrument::Uh8k,
            Instrument::Cfh12k,
            Instrument::Sofi,
            Instrument::Wfi,
            Instrument::Vircam,
            Instrument::OmegaCam,
            Instrument::Vimos,
            Instrument::Fors1,
            Instrument::Fors2,
            Instrument::Hawki,
            Instrument::SuprimeCam,
            Instrument::HyperSuprimeCam,
        ]
    }

    pub fn archive(self) -> Archive {
        match self {
            Instrument::MegaPrime | Instrument::WirCam | Instrument::Uh8k | Instrument::Cfh12k => {
                Archive::Cfht
            }
            Instrument::SuprimeCam | Instrument::HyperSuprimeCam => Archive::Smoka,
            _ => Archive::Eso,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Instrument::MegaPrime => "MegaPrime",
            Instrument::WirCam => "WIRCam",
            Instrument::Uh8k => "UH8K",
            Instrument::Cfh12k => "CFH12K",
            Instrument::Sofi => "SOFI",
            Instrument::Wfi => "WFI",
            Instrument::Vircam => "VIRCAM",
            Instrument::OmegaCam => "OmegaCAM",
            Instrument::Vimos => "VIMOS",
            Instrument::Fors1 => "FORS1",
            Instrument::Fors2 => "FORS2",
            Instrument::Hawki => "HAWKI",
            Instrument::SuprimeCam => "SuprimeCam",
            Instrument::HyperSuprimeCam => "HyperSuprimeCam",
        }
    }

    /// Field-of-view padding in degrees added to every half-width of the
    /// search region, so frames that only partially overlap are still found.
    pub fn fov_padding(self) -> f64 {
        match self {
            Instrument::MegaPrime => 0.95,
            Instrument::WirCam => 0.36,
            Instrument::Uh8k => 0.48,
            Instrument::Cfh12k => 0.7,
            Instrument::Sofi => 0.082,
            Instrument::Wfi => 0.56,
            Instrument::Vircam => 1.15,
            Instrument::OmegaCam => 1.0,
            Instrument::Vimos => 0.5,
            Instrument::Fors1 | Instrument::Fors2 => 0.11,
            Instrument::Hawki => 0.125,
            // 2000" and 5400" detector widths, halved.
            Instrument::SuprimeCam => 1000.0 / 3600.0,
            Instrument::HyperSuprimeCam => 2700.0 / 3600.0,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Instrument {
    type Err = SkyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        let alias = match normalized.as_str() {
            "UH8K MOSAIC CAMERA" => Some(Instrument::Uh8k),
            "CFH12K MOSAIC" => Some(Instrument::Cfh12k),
            "SUP" | "SUPRIME-CAM" => Some(Instrument::SuprimeCam),
            "HSC" | "HYPER SUPRIME-CAM" => Some(Instrument::HyperSuprimeCam),
            _ => None,
        };
        if let Some(instrument) = alias {
            return Ok(instrument);
        }
        Instrument::all()
            .into_iter()
            .find(|inst| inst.as_str().to_ascii_uppercase() == normalized)
            .ok_or_else(|| SkyError::InvalidInstrument(value.to_string()))
    }
}

impl Serialize for Instrument {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Instrument {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Science,
    Bias,
    Dark,
    Flat,
    Unknown,
}

impl FrameType {
    /// Maps an archive observation-type label onto a frame type.
    pub fn classify(label: &str) -> FrameType {
        let upper = label.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return FrameType::Unknown;
        }
        if upper.contains("BIAS") || upper == "ZERO" {
            FrameType::Bias
        } else if upper.contains("DARK") {
            FrameType::Dark
        } else if upper.contains("FLAT") {
            FrameType::Flat
        } else if matches!(upper.as_str(), "OBJECT" | "SCIENCE" | "OBJ") {
            FrameType::Science
        } else {
            FrameType::Unknown
        }
    }

    pub fn is_calibration(self) -> bool {
        matches!(self, FrameType::Bias | FrameType::Dark | FrameType::Flat)
    }

    pub fn label(self) -> &'static str {
        match self {
            FrameType::Science => "SCIENCE",
            FrameType::Bias => "BIAS",
            FrameType::Dark => "DARK",
            FrameType::Flat => "FLAT",
            FrameType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameCategory {
    Science,
    Calib,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetName(String);

impl TargetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Folder-safe form of the name.
    pub fn dir_name(&self) -> String {
        self.0
            .chars()
            .map(|ch| {
                if ch.is_whitespace() || matches!(ch, '/' | '\\' | ':') {
                    '_'
                } else {
                    ch
                }
            })
            .collect()
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TargetName {
    type Err = SkyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.chars().count() < 3 {
            return Err(SkyError::InvalidTarget(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Reads `<PREFIX>_USER` and `<PREFIX>_PASSWORD` for the archive.
    pub fn from_env(archive: Archive) -> Option<Self> {
        let prefix = archive.env_prefix();
        let username = std::env::var(format!("{prefix}_USER")).ok()?;
        let password = std::env::var(format!("{prefix}_PASSWORD")).ok()?;
        if username.trim().is_empty() {
            return None;
        }
        Some(Self::new(username.trim(), password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_instrument_aliases() {
        assert_eq!("wircam".parse::<Instrument>().unwrap(), Instrument::WirCam);
        assert_eq!(
            "UH8K MOSAIC CAMERA".parse::<Instrument>().unwrap(),
            Instrument::Uh8k
        );
        assert_eq!("hsc".parse::<Instrument>().unwrap(), Instrument::HyperSuprimeCam);
    }

    #[test]
    fn parse_instrument_invalid() {
        let err = "Hubble".parse::<Instrument>().unwrap_err();
        assert_matches!(err, SkyError::InvalidInstrument(_));
    }

    #[test]
    fn classify_frame_types() {
        assert_eq!(FrameType::classify("ZERO"), FrameType::Bias);
        assert_eq!(FrameType::classify("FLAT,SKY"), FrameType::Flat);
        assert_eq!(FrameType::classify("DOMEFLAT"), FrameType::Flat);
        assert_eq!(FrameType::classify("dark"), FrameType::Dark);
        assert_eq!(FrameType::classify("OBJECT"), FrameType::Science);
        assert_eq!(FrameType::classify("STD"), FrameType::Unknown);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("astro", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
