use serde::Serialize;

use crate::error::SkyError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum Extent {
    Radius { radius: f64 },
    Box { ra_half: f64, dec_half: f64 },
}

/// A search area on the sky in ICRS degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SkyRegion {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub extent: Extent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub ra_min: f64,
    pub ra_max: f64,
    pub dec_min: f64,
    pub dec_max: f64,
}

impl SkyRegion {
    pub fn circle(ra_deg: f64, dec_deg: f64, radius: f64) -> Result<Self, SkyError> {
        check_center(ra_deg, dec_deg)?;
        check_extent("radius", radius)?;
        Ok(Self {
            ra_deg,
            dec_deg,
            extent: Extent::Radius { radius },
        })
    }

    pub fn rectangle(
        ra_deg: f64,
        dec_deg: f64,
        ra_half: f64,
        dec_half: f64,
    ) -> Result<Self, SkyError> {
        check_center(ra_deg, dec_deg)?;
        check_extent("ra half-width", ra_half)?;
        check_extent("dec half-width", dec_half)?;
        Ok(Self {
            ra_deg,
            dec_deg,
            extent: Extent::Box { ra_half, dec_half },
        })
    }

    /// Grows every half-width by `padding` degrees. Negative padding is
    /// treated as zero so the result always contains `self`.
    pub fn padded(&self, padding: f64) -> SkyRegion {
        let pad = if padding.is_finite() {
            padding.max(0.0)
        } else {
            0.0
        };
        let extent = match self.extent {
            Extent::Radius { radius } => Extent::Radius {
                radius: radius + pad,
            },
            Extent::Box { ra_half, dec_half } => Extent::Box {
                ra_half: ra_half + pad,
                dec_half: dec_half + pad,
            },
        };
        SkyRegion { extent, ..*self }
    }

    pub fn half_widths(&self) -> (f64, f64) {
        match self.extent {
            Extent::Radius { radius } => (radius, radius),
            Extent::Box { ra_half, dec_half } => (ra_half, dec_half),
        }
    }

    pub fn bounds(&self) -> Bounds {
        let (ra_half, dec_half) = self.half_widths();
        Bounds {
            ra_min: self.ra_deg - ra_half,
            ra_max: self.ra_deg + ra_half,
            dec_min: (self.dec_deg - dec_half).max(-90.0),
            dec_max: (self.dec_deg + dec_half).min(90.0),
        }
    }

    /// Circles test the great-circle distance; boxes compare offsets, with RA
    /// taken across the 0/360 seam.
    pub fn contains(&self, ra_deg: f64, dec_deg: f64) -> bool {
        match self.extent {
            Extent::Radius { radius } => {
                angular_separation(self.ra_deg, self.dec_deg, ra_deg, dec_deg) <= radius
            }
            Extent::Box { ra_half, dec_half } => {
                let d_ra = (ra_deg - self.ra_deg + 540.0).rem_euclid(360.0) - 180.0;
                d_ra.abs() <= ra_half && (dec_deg - self.dec_deg).abs() <= dec_half
            }
        }
    }
}

/// Great-circle distance in degrees (haversine).
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (dec1, dec2) = (dec1.to_radians(), dec2.to_radians());
    let half_d_dec = 0.5 * (dec2 - dec1);
    let half_d_ra = 0.5 * (ra2 - ra1).to_radians();
    let h = half_d_dec.sin().powi(2) + dec1.cos() * dec2.cos() * half_d_ra.sin().powi(2);
    (2.0 * h.sqrt().min(1.0).asin()).to_degrees()
}

fn check_center(ra_deg: f64, dec_deg: f64) -> Result<(), SkyError> {
    if !ra_deg.is_finite() || !(0.0..360.0).contains(&ra_deg) {
        return Err(SkyError::InvalidCoordinate(format!("ra {ra_deg}")));
    }
    if !dec_deg.is_finite() || !(-90.0..=90.0).contains(&dec_deg) {
        return Err(SkyError::InvalidCoordinate(format!("dec {dec_deg}")));
    }
    Ok(())
}

fn check_extent(name: &str, value: f64) -> Result<(), SkyError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SkyError::InvalidExtent(format!("{name} = {value}")));
    }
    Ok(())
}

/// Closed MJD interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    /// `[t0 - width/2, t0 + width/2]`
    pub fn centered(t0: f64, width: f64) -> Self {
        Self {
            start: t0 - 0.5 * width,
            end: t0 + 0.5 * width,
        }
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleUnit {
    Hours,
    Degrees,
}

/// Parses `hh:mm:ss.s`, `dd mm ss` or a plain decimal, returning degrees.
pub fn parse_sexagesimal(value: &str, unit: AngleUnit) -> Result<f64, SkyError> {
    let trimmed = value.trim();
    let invalid = || SkyError::InvalidCoordinate(value.to_string());
    if trimmed.is_empty() {
        return Err(invalid());
    }
    let negative = trimmed.starts_with('-');
    let parts = trimmed
        .trim_start_matches(['+', '-'])
        .split(|ch: char| ch == ':' || ch.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f64>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid());
    }
    let mut magnitude = 0.0;
    for (idx, part) in parts.iter().enumerate() {
        magnitude += part / 60f64.powi(idx as i32);
    }
    let signed = if negative { -magnitude } else { magnitude };
    Ok(match unit {
        AngleUnit::Hours => signed * 15.0,
        AngleUnit::Degrees => signed,
    })
}
