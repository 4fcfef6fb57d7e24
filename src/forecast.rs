//! Fishing forecast scoring.
//!
//! The forecast is computed locally, without any weather feed. Astronomical
//! inputs (moon phase, sunrise and sunset) come from closed-form
//! approximations of the date and coordinates. Weather-like inputs (sky,
//! pressure, water temperature jitter) are drawn from a generator seeded by
//! the location name and the day, so a location gets one stable outlook per
//! day.

use std::{f64::consts::TAU, fmt::Display};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize, Serializer};

use crate::models::ValidationError;

/// Length of a lunar cycle in days.
const SYNODIC_MONTH: f64 = 29.530_588_853;
/// 2000-01-06 18:14 UTC, a new moon.
const REFERENCE_NEW_MOON: i64 = 947_182_440;

/// Solar hours used when no latitude is given.
const DEFAULT_SUNRISE: f64 = 6.5;
const DEFAULT_SUNSET: f64 = 20.0;
const DEFAULT_LATITUDE: f64 = 40.0;

const BASE_SCORE: f64 = 4.0;

/// Sky descriptions and their effect on the bite.
const SKIES: [(&str, f64); 6] = [
    ("Overcast with light winds", 1.0),
    ("Partly cloudy with light winds", 0.5),
    ("Light rain with calm winds", 0.5),
    ("Clear skies with a gentle breeze", 0.0),
    ("Sunny and calm", -0.5),
    ("Gusty winds with scattered showers", -1.0),
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForecastRequest {
    #[serde(default)]
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub location: String,
    pub forecast_date: NaiveDate,
    pub bite_score: f64,
    pub activity_level: ActivityLevel,
    pub conditions: String,
    pub moon_phase: MoonPhase,
    pub best_times: [String; 2],
    pub recommendations: String,
    pub water_temp: String,
    pub barometric_pressure: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ActivityLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Self::Excellent
        } else if score >= 6.0 {
            Self::Good
        } else if score >= 4.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Self::Excellent => "Prime fishing conditions! Fish are likely to be very active.",
            Self::Good => "Good fishing conditions. Expect steady action around structure.",
            Self::Fair => "Fair conditions. Slow down your presentation and work the edges.",
            Self::Poor => "Tough conditions. Fish deeper water and be patient.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoonPhase {
    New,
    WaxingCrescent,
    FirstQuarter,
    WaxingGibbous,
    Full,
    WaningGibbous,
    LastQuarter,
    WaningCrescent,
}

impl MoonPhase {
    const ALL: [Self; 8] = [
        Self::New,
        Self::WaxingCrescent,
        Self::FirstQuarter,
        Self::WaxingGibbous,
        Self::Full,
        Self::WaningGibbous,
        Self::LastQuarter,
        Self::WaningCrescent,
    ];

    /// Days since the last new moon.
    pub fn age(at: DateTime<Utc>) -> f64 {
        let days = (at.timestamp() - REFERENCE_NEW_MOON) as f64 / 86_400.0;
        days.rem_euclid(SYNODIC_MONTH)
    }

    pub fn at(at: DateTime<Utc>) -> Self {
        let eighth = (Self::age(at) / SYNODIC_MONTH * 8.0).round() as usize;
        Self::ALL[eighth % 8]
    }

    /// Feeding bonus: strongest around new and full moon.
    fn factor(self) -> f64 {
        match self {
            Self::New | Self::Full => 1.5,
            Self::FirstQuarter | Self::LastQuarter => 0.0,
            _ => 0.5,
        }
    }
}

impl Display for MoonPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "New Moon",
            Self::WaxingCrescent => "Waxing Crescent",
            Self::FirstQuarter => "First Quarter",
            Self::WaxingGibbous => "Waxing Gibbous",
            Self::Full => "Full Moon",
            Self::WaningGibbous => "Waning Gibbous",
            Self::LastQuarter => "Last Quarter",
            Self::WaningCrescent => "Waning Crescent",
        };
        f.write_str(name)
    }
}

impl Serialize for MoonPhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A span of solar hours, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Window {
    start: f64,
    end: f64,
}

impl Window {
    fn contains(&self, hour: f64) -> bool {
        (self.start..self.end).contains(&hour)
    }
}

/// Formats as `6:00-8:00 AM`, or `11:30 AM-1:30 PM` across noon.
impl Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (start_hour, start_minute, start_meridiem) = clock(self.start);
        let (end_hour, end_minute, end_meridiem) = clock(self.end);

        write!(f, "{start_hour}:{start_minute:02}")?;
        if start_meridiem != end_meridiem {
            write!(f, " {start_meridiem}")?;
        }
        write!(f, "-{end_hour}:{end_minute:02} {end_meridiem}")
    }
}

/// Twelve-hour clock reading of a fractional hour, rounded to five minutes.
fn clock(hours: f64) -> (i64, i64, &'static str) {
    let minutes = ((hours * 12.0).round() as i64 * 5).rem_euclid(24 * 60);
    let (hour, minute) = (minutes / 60, minutes % 60);
    let meridiem = if hour < 12 { "AM" } else { "PM" };
    let hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    (hour, minute, meridiem)
}

/// Daylight length in hours from the solar declination, kept within 4..20
/// hours so polar days still yield two distinct windows.
fn daylight_hours(latitude: f64, day_of_year: u32) -> f64 {
    let declination = (-23.44f64).to_radians() * (TAU / 365.0 * (day_of_year as f64 + 10.0)).cos();
    let cos_hour_angle = -latitude.to_radians().tan() * declination.tan();
    let hour_angle = cos_hour_angle.clamp(-1.0, 1.0).acos();
    (2.0 * hour_angle.to_degrees() / 15.0).clamp(4.0, 20.0)
}

fn sun_times(latitude: Option<f64>, day_of_year: u32) -> (f64, f64) {
    match latitude {
        Some(latitude) => {
            let half = daylight_hours(latitude, day_of_year) / 2.0;
            (12.0 - half, 12.0 + half)
        }
        None => (DEFAULT_SUNRISE, DEFAULT_SUNSET),
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Seasonal surface temperature in °F before jitter.
fn seasonal_water_temp(latitude: Option<f64>, day_of_year: u32) -> f64 {
    let latitude = latitude.unwrap_or(DEFAULT_LATITUDE);
    // seasons are flipped south of the equator
    let day = if latitude < 0.0 {
        (day_of_year + 182) % 365
    } else {
        day_of_year
    };
    55.0 + 17.0 * (TAU * (day as f64 - 105.0) / 365.0).sin() - (latitude.abs() - 40.0) * 0.4
}

fn pressure_factor(pressure: f64) -> f64 {
    if pressure < 29.9 {
        // falling ahead of a front
        0.5
    } else if pressure <= 30.2 {
        1.0
    } else if pressure > 30.3 {
        -0.5
    } else {
        0.0
    }
}

fn water_factor(temp: f64) -> f64 {
    if (55.0..=75.0).contains(&temp) {
        1.0
    } else if !(45.0..=85.0).contains(&temp) {
        -1.0
    } else {
        0.0
    }
}

fn check_coordinate(
    field: &'static str,
    value: Option<f64>,
    limit: f64,
    reason: &'static str,
) -> Result<Option<f64>, ValidationError> {
    match value {
        Some(v) if !v.is_finite() || v.abs() > limit => Err(ValidationError::new(field, reason)),
        _ => Ok(value),
    }
}

/// Stateless forecast calculator; see the module docs for the model.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForecastEngine;

impl ForecastEngine {
    pub fn new() -> Self {
        Self
    }

    /// Forecast for `location` as of now.
    ///
    /// The clock is shifted to local solar time by `longitude`. Without a
    /// longitude the hour, the date and both `best_times` windows are read
    /// in UTC.
    pub fn score(
        &self,
        location: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<ForecastResult, ValidationError> {
        self.score_at(location, latitude, longitude, Utc::now())
    }

    pub fn forecast(&self, request: &ForecastRequest) -> Result<ForecastResult, ValidationError> {
        self.score(&request.location, request.latitude, request.longitude)
    }

    /// Forecast for `location` as of `now`.
    pub fn score_at(
        &self,
        location: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<ForecastResult, ValidationError> {
        let location = location.trim();
        if location.is_empty() {
            return Err(ValidationError::new("location", "must not be empty"));
        }
        let latitude =
            check_coordinate("latitude", latitude, 90.0, "must be between -90 and 90")?;
        let longitude =
            check_coordinate("longitude", longitude, 180.0, "must be between -180 and 180")?;

        // Local solar time: one hour per 15° east of Greenwich.
        let solar = now + Duration::seconds((longitude.unwrap_or(0.0) * 240.0) as i64);
        let forecast_date = solar.date_naive();
        let day_of_year = solar.ordinal();
        let hour = solar.hour() as f64 + solar.minute() as f64 / 60.0;

        let (sunrise, sunset) = sun_times(latitude, day_of_year);
        let dawn = Window {
            start: sunrise - 0.5,
            end: sunrise + 1.5,
        };
        let dusk = Window {
            start: sunset - 1.5,
            end: sunset + 0.5,
        };

        let hour_factor = if dawn.contains(hour) || dusk.contains(hour) {
            2.0
        } else if (11.0..15.0).contains(&hour) {
            -1.0
        } else if hour < dawn.start || hour >= dusk.end {
            -0.5
        } else {
            0.0
        };

        let moon_phase = MoonPhase::at(now);

        let seed = fnv1a(&location.to_lowercase())
            ^ (forecast_date.num_days_from_ce() as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let mut rng = StdRng::seed_from_u64(seed);
        let (conditions, sky_factor) = SKIES[rng.gen_range(0..SKIES.len())];
        let pressure = (rng.gen_range(29.70..30.40) * 100.0f64).round() / 100.0;
        let water_temp = (seasonal_water_temp(latitude, day_of_year) + rng.gen_range(-3.0..=3.0))
            .round();

        let raw = BASE_SCORE
            + moon_phase.factor()
            + hour_factor
            + sky_factor
            + pressure_factor(pressure)
            + water_factor(water_temp);
        let bite_score = (raw.clamp(0.0, 10.0) * 10.0).round() / 10.0;
        let activity_level = ActivityLevel::from_score(bite_score);

        let best_times = [dawn.to_string(), dusk.to_string()];
        let recommendations = format!(
            "{} Best window: {}.",
            activity_level.advice(),
            best_times[0]
        );

        Ok(ForecastResult {
            location: location.to_string(),
            forecast_date,
            bite_score,
            activity_level,
            conditions: conditions.to_string(),
            moon_phase,
            best_times,
            recommendations,
            water_temp: format!("{water_temp}°F"),
            barometric_pressure: format!("{pressure:.2} inHg"),
        })
    }
}
