//! Noise report: classification, legal limits and exposure risk for a
//! finished measurement.
//!
//! ```text
//! level (dB) ──▶ NoiseCategory
//!            ──▶ NoiseContext limit (day 07:00–22:00 / night) ──▶ LegalStatus
//!            ──▶ NIOSH dose over duration ──▶ ExposureRisk
//!                                  └──────────▶ recommendations + conclusion
//! ```
//!
//! Exposure follows the NIOSH recommended limit: 85 dB for 8 hours with a
//! 3 dB exchange rate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Timelike};
use serde::Serialize;

/// NIOSH recommended exposure limit over an 8-hour shift.
pub const NIOSH_REL_DB: f32 = 85.0;
/// Level change that halves or doubles the allowed exposure time.
pub const NIOSH_EXCHANGE_RATE_DB: f32 = 3.0;
const SHIFT_MINUTES: f32 = 480.0;
/// Below this level exposure is not a hearing risk at any duration.
const NEGLIGIBLE_BELOW_DB: f32 = 70.0;
/// Headroom above a legal limit still reported as marginal.
const MARGINAL_HEADROOM_DB: f32 = 5.0;

// ---------------------------------------------------------------------------
// NoiseCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseCategory {
    /// Below 45 dB.
    Quiet,
    /// 45 to 55 dB.
    Moderate,
    /// 55 to 70 dB.
    Noisy,
    /// 70 to 85 dB.
    Loud,
    /// 85 to 100 dB.
    VeryLoud,
    /// 100 dB and above.
    Dangerous,
}

impl NoiseCategory {
    pub fn classify(db: f32) -> Self {
        match db {
            d if d < 45.0 => Self::Quiet,
            d if d < 55.0 => Self::Moderate,
            d if d < 70.0 => Self::Noisy,
            d if d < 85.0 => Self::Loud,
            d if d < 100.0 => Self::VeryLoud,
            _ => Self::Dangerous,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Quiet => "Quiet",
            Self::Moderate => "Moderate",
            Self::Noisy => "Noisy",
            Self::Loud => "Loud",
            Self::VeryLoud => "Very loud",
            Self::Dangerous => "Dangerous",
        }
    }
}

impl fmt::Display for NoiseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// NoiseContext
// ---------------------------------------------------------------------------

/// Kind of place a measurement was taken in; selects the legal limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseContext {
    #[default]
    Residential,
    Commercial,
    Industrial,
    Hospital,
    School,
    Outdoor,
}

impl NoiseContext {
    pub const ALL: [NoiseContext; 6] = [
        Self::Residential,
        Self::Commercial,
        Self::Industrial,
        Self::Hospital,
        Self::School,
        Self::Outdoor,
    ];

    /// `(day, night)` limits in dB.
    pub fn limits(&self) -> (f32, f32) {
        match self {
            Self::Residential => (55.0, 45.0),
            Self::Commercial => (65.0, 55.0),
            Self::Industrial => (75.0, 70.0),
            Self::Hospital => (45.0, 35.0),
            Self::School => (50.0, 45.0),
            Self::Outdoor => (70.0, 60.0),
        }
    }

    pub fn limit(&self, period: Period) -> f32 {
        let (day, night) = self.limits();
        match period {
            Period::Day => day,
            Period::Night => night,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Residential => "residential",
            Self::Commercial => "commercial",
            Self::Industrial => "industrial",
            Self::Hospital => "hospital",
            Self::School => "school",
            Self::Outdoor => "outdoor",
        }
    }
}

impl fmt::Display for NoiseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NoiseContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|c| c.name()).collect();
                format!("unknown context '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// Day runs 07:00 to 22:00 local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Night,
}

impl Period {
    pub fn at(time: &DateTime<Local>) -> Self {
        if (7..22).contains(&time.hour()) {
            Period::Day
        } else {
            Period::Night
        }
    }
}

// ---------------------------------------------------------------------------
// LegalStatus / ExposureRisk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalStatus {
    /// At or below the limit.
    Compliant,
    /// Up to 5 dB over the limit.
    Marginal,
    Exceeds,
}

impl LegalStatus {
    pub fn assess(db: f32, limit: f32) -> Self {
        if db <= limit {
            Self::Compliant
        } else if db <= limit + MARGINAL_HEADROOM_DB {
            Self::Marginal
        } else {
            Self::Exceeds
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureRisk {
    Negligible,
    Low,
    Moderate,
    High,
    Severe,
}

/// Noise dose for `duration_minutes` at `db`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Exposure {
    /// Minutes at this level that add up to a full daily dose.
    pub allowed_minutes: f32,
    /// Fraction of the daily dose used (1.0 = limit reached).
    pub dose: f32,
    pub risk: ExposureRisk,
}

impl Exposure {
    pub fn assess(db: f32, duration_minutes: f32) -> Self {
        let allowed_minutes =
            SHIFT_MINUTES / 2f32.powf((db - NIOSH_REL_DB) / NIOSH_EXCHANGE_RATE_DB);
        let dose = duration_minutes.max(0.0) / allowed_minutes;

        let risk = if db < NEGLIGIBLE_BELOW_DB {
            ExposureRisk::Negligible
        } else if dose < 0.25 {
            ExposureRisk::Low
        } else if dose < 0.5 {
            ExposureRisk::Moderate
        } else if dose < 1.0 {
            ExposureRisk::High
        } else {
            ExposureRisk::Severe
        };

        Self {
            allowed_minutes,
            dose,
            risk,
        }
    }
}

// ---------------------------------------------------------------------------
// NoiseReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct NoiseReport {
    pub generated_at: DateTime<Local>,
    pub decibels: f32,
    pub duration_minutes: f32,
    pub category: NoiseCategory,
    pub context: NoiseContext,
    pub period: Period,
    pub limit_db: f32,
    pub legal_status: LegalStatus,
    pub exposure: Exposure,
    pub recommendations: Vec<String>,
    pub conclusion: String,
}

/// Report for a reading taken now.
pub fn generate_report(decibels: f32, duration_minutes: f32, context: NoiseContext) -> NoiseReport {
    generate_report_at(decibels, duration_minutes, context, Local::now())
}

/// Report for a reading taken at `at` (selects the day or night limit).
pub fn generate_report_at(
    decibels: f32,
    duration_minutes: f32,
    context: NoiseContext,
    at: DateTime<Local>,
) -> NoiseReport {
    let category = NoiseCategory::classify(decibels);
    let period = Period::at(&at);
    let limit_db = context.limit(period);
    let legal_status = LegalStatus::assess(decibels, limit_db);
    let exposure = Exposure::assess(decibels, duration_minutes);

    let recommendations = recommendations(category, exposure.risk, legal_status);
    let conclusion = conclusion(decibels, category, context, period, limit_db, legal_status, &exposure);

    NoiseReport {
        generated_at: at,
        decibels,
        duration_minutes,
        category,
        context,
        period,
        limit_db,
        legal_status,
        exposure,
        recommendations,
        conclusion,
    }
}

fn recommendations(
    category: NoiseCategory,
    risk: ExposureRisk,
    legal: LegalStatus,
) -> Vec<String> {
    let mut out = Vec::new();

    match category {
        NoiseCategory::Quiet | NoiseCategory::Moderate => {}
        NoiseCategory::Noisy => {
            out.push("Prolonged noise at this level can disturb concentration and sleep.".into())
        }
        NoiseCategory::Loud => {
            out.push("Limit time spent at this level and take regular quiet breaks.".into())
        }
        NoiseCategory::VeryLoud => {
            out.push("Wear hearing protection (earplugs or earmuffs).".into())
        }
        NoiseCategory::Dangerous => {
            out.push("Hearing protection is required; leave the area if possible.".into())
        }
    }

    match risk {
        ExposureRisk::Negligible | ExposureRisk::Low => {}
        ExposureRisk::Moderate => {
            out.push("Over half of the daily noise dose remains; keep exposure short.".into())
        }
        ExposureRisk::High => {
            out.push("The daily noise dose is nearly reached; reduce exposure now.".into())
        }
        ExposureRisk::Severe => out.push(
            "The daily noise dose has been exceeded; stop exposure and consider a hearing check."
                .into(),
        ),
    }

    match legal {
        LegalStatus::Compliant => {}
        LegalStatus::Marginal => {
            out.push("Level is slightly over the legal limit; monitor for persistence.".into())
        }
        LegalStatus::Exceeds => out.push(
            "Level exceeds the legal limit; document it and report to the local authority.".into(),
        ),
    }

    if out.is_empty() {
        out.push("No action needed.".into());
    }
    out
}

fn conclusion(
    decibels: f32,
    category: NoiseCategory,
    context: NoiseContext,
    period: Period,
    limit_db: f32,
    legal: LegalStatus,
    exposure: &Exposure,
) -> String {
    let period = match period {
        Period::Day => "daytime",
        Period::Night => "night-time",
    };
    let legal = match legal {
        LegalStatus::Compliant => "within",
        LegalStatus::Marginal => "marginally above",
        LegalStatus::Exceeds => "above",
    };
    let mut text = format!(
        "{} at {decibels:.0} dB, {legal} the {period} {context} limit of {limit_db:.0} dB.",
        category.label(),
    );
    if exposure.risk >= ExposureRisk::Moderate {
        text.push_str(&format!(
            " {:.0}% of the daily noise dose used.",
            exposure.dose * 100.0
        ));
    }
    text
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
