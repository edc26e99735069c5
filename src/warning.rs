use std::fmt;

use serde::Serialize;

use crate::domain::{Archive, FrameType, Instrument};

/// A calibration selection that is usable but not ideal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum MatchIssue {
    NoneFound,
    BelowMinimum { found: usize, min: usize },
    OutsideWindow { max_distance: f64, window: f64 },
}

impl fmt::Display for MatchIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchIssue::NoneFound => write!(f, "no frames found"),
            MatchIssue::BelowMinimum { found, min } => {
                write!(f, "only {found} frames found (minimum {min})")
            }
            MatchIssue::OutsideWindow {
                max_distance,
                window,
            } => write!(
                f,
                "frames up to {max_distance:.2} days away (window {window} days)"
            ),
        }
    }
}

/// Non-fatal conditions collected over a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    DataQuality {
        archive: Archive,
        instrument: Instrument,
        science_id: String,
        frame: FrameType,
        issue: MatchIssue,
    },
    Integrity {
        id: String,
        expected: u64,
        written: u64,
    },
    Provider {
        archive: Archive,
        instrument: Option<Instrument>,
        message: String,
    },
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunWarning::DataQuality {
                archive,
                instrument,
                science_id,
                frame,
                issue,
            } => write!(f, "{archive} {instrument} {science_id}: {frame} {issue}"),
            RunWarning::Integrity {
                id,
                expected,
                written,
            } => write!(
                f,
                "{id}: expected {expected} bytes but wrote {written}"
            ),
            RunWarning::Provider {
                archive,
                instrument: Some(instrument),
                message,
            } => write!(f, "{archive} {instrument}: {message}"),
            RunWarning::Provider {
                archive,
                instrument: None,
                message,
            } => write!(f, "{archive}: {message}"),
        }
    }
}
