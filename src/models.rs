use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Rejected caller input, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ValidationError {
    pub const fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

/// A catch as submitted by a caller, before validation.
///
/// Missing or null text fields are kept as `None` so that they are reported
/// by [`NewCatch::try_from`] with their field name instead of a generic
/// decoding failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatchInput {
    pub species: Option<String>,
    pub bait: Option<String>,
    pub location: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub notes: Option<String>,
    pub weight: Option<Measure>,
    pub length: Option<Measure>,
    pub weather: Option<String>,
}

/// A measurement as sent by clients, which sometimes quote their numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Measure {
    Number(f64),
    Text(String),
}

/// A validated catch, ready to be appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCatch {
    pub species: String,
    pub bait: String,
    pub location: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub notes: String,
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub weather: Option<String>,
}

impl NewCatch {
    pub fn into_record(self, id: i64, logged_at: DateTime<Utc>) -> CatchRecord {
        CatchRecord {
            id,
            species: self.species,
            bait: self.bait,
            location: self.location,
            date: self.date,
            time: self.time,
            notes: self.notes,
            weight: self.weight,
            length: self.length,
            weather: self.weather,
            logged_at,
        }
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed.to_string()),
        _ => Err(ValidationError::new(field, "must not be empty")),
    }
}

fn positive(field: &'static str, value: Option<Measure>) -> Result<Option<f64>, ValidationError> {
    let invalid = ValidationError::new(field, "must be a positive number");
    let value = match value {
        None => return Ok(None),
        Some(Measure::Number(value)) => value,
        Some(Measure::Text(text)) if text.trim().is_empty() => return Ok(None),
        Some(Measure::Text(text)) => text.trim().parse::<f64>().map_err(|_| invalid.clone())?,
    };

    if !value.is_finite() || value <= 0.0 {
        return Err(invalid);
    }
    Ok(Some(value))
}

fn parse_date(value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ValidationError::new("date", "must be a date like 2024-05-01"))
}

fn parse_time(value: &str) -> Result<NaiveTime, ValidationError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| ValidationError::new("time", "must be a time like 07:00"))
}

impl TryFrom<CatchInput> for NewCatch {
    type Error = ValidationError;

    fn try_from(input: CatchInput) -> Result<Self, Self::Error> {
        let species = required("species", input.species)?;
        let bait = required("bait", input.bait)?;
        let location = required("location", input.location)?;
        let date = parse_date(&required("date", input.date)?)?;
        let time = parse_time(&required("time", input.time)?)?;

        Ok(Self {
            species,
            bait,
            location,
            date,
            time,
            notes: input
                .notes
                .map(|notes| notes.trim().to_string())
                .unwrap_or_default(),
            weight: positive("weight", input.weight)?,
            length: positive("length", input.length)?,
            weather: input
                .weather
                .map(|weather| weather.trim().to_string())
                .filter(|weather| !weather.is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CatchRecord {
    pub id: i64,
    pub species: String,
    pub bait: String,
    pub location: String,
    #[sqlx(rename = "catch_date")]
    pub date: NaiveDate,
    #[sqlx(rename = "catch_time")]
    #[serde(serialize_with = "serialize_time")]
    pub time: NaiveTime,
    pub notes: String,
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub weather: Option<String>,
    pub logged_at: DateTime<Utc>,
}

// 07:00 rather than chrono's 07:00:00 unless seconds were given.
fn serialize_time<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    let format = if time.second() == 0 { "%H:%M" } else { "%H:%M:%S" };
    serializer.collect_str(&time.format(format))
}
