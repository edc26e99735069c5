use serde::Serialize;
use tracing::warn;

use crate::domain::{FrameType, Instrument};
use crate::record::ObservationRecord;
use crate::region::TimeWindow;
use crate::warning::MatchIssue;

/// Time windows and count policy for one instrument's calibrations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchPolicy {
    /// Width in days of the bias/dark search window around the science frame.
    pub bias_dark_window: f64,
    pub flat_window: f64,
    pub max_calibrations: usize,
    pub min_calibrations: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            bias_dark_window: 15.0,
            flat_window: 365.0,
            max_calibrations: 10,
            min_calibrations: 5,
        }
    }
}

/// Selected frames of one calibration type, closest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationMatch {
    pub ids: Vec<String>,
    pub distances: Vec<f64>,
    pub issues: Vec<MatchIssue>,
}

impl CalibrationMatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn max_distance(&self) -> Option<f64> {
        self.distances.iter().copied().reduce(f64::max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BiasDarkMatch {
    pub bias: CalibrationMatch,
    pub dark: CalibrationMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationSet {
    pub science_id: String,
    pub bias: Vec<String>,
    pub dark: Vec<String>,
    pub flat: Vec<String>,
}

impl CalibrationSet {
    pub fn new(science_id: &str, bias_dark: &BiasDarkMatch, flat: &CalibrationMatch) -> Self {
        Self {
            science_id: science_id.to_string(),
            bias: bias_dark.bias.ids.clone(),
            dark: bias_dark.dark.ids.clone(),
            flat: flat.ids.clone(),
        }
    }

    pub fn all_ids(&self) -> impl Iterator<Item = &String> {
        self.bias.iter().chain(&self.dark).chain(&self.flat)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationMatcher {
    policy: MatchPolicy,
}

impl CalibrationMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    pub fn bias_dark_window(&self, t0: f64) -> TimeWindow {
        TimeWindow::centered(t0, self.policy.bias_dark_window)
    }

    pub fn flat_window(&self, t0: f64) -> TimeWindow {
        TimeWindow::centered(t0, self.policy.flat_window)
    }

    /// Picks the closest bias and dark frames to `t0`. Never fails; an absent
    /// type yields an empty match with a [`MatchIssue::NoneFound`].
    pub fn match_bias_dark(
        &self,
        t0: f64,
        instrument: Instrument,
        candidates: &[ObservationRecord],
    ) -> BiasDarkMatch {
        let bias = self.select(
            t0,
            instrument,
            FrameType::Bias,
            self.policy.bias_dark_window,
            candidates
                .iter()
                .filter(|record| record.frame_type == FrameType::Bias),
        );
        let dark = self.select(
            t0,
            instrument,
            FrameType::Dark,
            self.policy.bias_dark_window,
            candidates
                .iter()
                .filter(|record| record.frame_type == FrameType::Dark),
        );
        BiasDarkMatch { bias, dark }
    }

    /// Same selection over flats whose filter equals `filter_name` exactly.
    pub fn match_flat(
        &self,
        t0: f64,
        filter_name: &str,
        instrument: Instrument,
        candidates: &[ObservationRecord],
    ) -> CalibrationMatch {
        self.select(
            t0,
            instrument,
            FrameType::Flat,
            self.policy.flat_window,
            candidates.iter().filter(|record| {
                record.frame_type == FrameType::Flat
                    && record.filter_name.as_deref() == Some(filter_name)
            }),
        )
    }

    fn select<'a>(
        &self,
        t0: f64,
        instrument: Instrument,
        kind: FrameType,
        window: f64,
        candidates: impl Iterator<Item = &'a ObservationRecord>,
    ) -> CalibrationMatch {
        let mut scored = candidates
            .filter_map(|record| record.distance_to(t0).map(|d| (d, record.id.as_str())))
            .collect::<Vec<_>>();
        // stable: equal distances keep input order
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(self.policy.max_calibrations);

        let mut selected = CalibrationMatch {
            ids: scored.iter().map(|(_, id)| id.to_string()).collect(),
            distances: scored.iter().map(|(d, _)| *d).collect(),
            issues: Vec::new(),
        };

        if selected.is_empty() {
            warn!("{instrument}: no {kind} frames found near MJD {t0:.5}");
            selected.issues.push(MatchIssue::NoneFound);
            return selected;
        }
        if selected.len() < self.policy.min_calibrations {
            warn!(
                "{instrument}: only {} {kind} frames found near MJD {t0:.5} (minimum {})",
                selected.len(),
                self.policy.min_calibrations
            );
            selected.issues.push(MatchIssue::BelowMinimum {
                found: selected.len(),
                min: self.policy.min_calibrations,
            });
        }
        if let Some(max_distance) = selected.max_distance()
            && max_distance > window
        {
            warn!(
                "{instrument}: {kind} frames up to {max_distance:.2} days from MJD {t0:.5} exceed the {window} day window"
            );
            selected.issues.push(MatchIssue::OutsideWindow {
                max_distance,
                window,
            });
        }
        selected
    }
}
