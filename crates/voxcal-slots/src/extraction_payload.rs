use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use thiserror::Error;

use crate::slot_context::{PartialSlot, SlotField};

const FALLBACK_GUIDANCE: &str = "I couldn't understand that";

#[derive(Debug, Error)]
pub enum ExtractionPayloadError {
    #[error("extraction payload is empty")]
    Empty,
    #[error("extraction payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
/// Structured answer from the extraction oracle for one utterance.
pub struct ExtractionPayload {
    #[serde(default)]
    pub title: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub date: Option<String>,
    /// `HH:MM`
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
}

impl ExtractionPayload {
    pub fn parse(raw: &str) -> Result<Self, ExtractionPayloadError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ExtractionPayloadError::Empty);
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    pub fn is_partial(&self) -> bool {
        self.partial || self.error.is_some()
    }

    /// Field the oracle asked about, if it named a known one.
    pub fn focus_field(&self) -> Option<SlotField> {
        self.field.as_deref().and_then(normalize_field)
    }

    /// Decodes into fields; times combine with the payload date, else `known_date`.
    ///
    /// Values that do not parse are dropped.
    pub fn to_partial_slot(&self, known_date: Option<NaiveDate>) -> PartialSlot {
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string);
        let date = self.date.as_deref().and_then(parse_date);
        let anchor = date.or(known_date);
        let at = |raw: Option<&str>| {
            let time = raw.and_then(parse_time)?;
            anchor.map(|day| day.and_time(time))
        };
        PartialSlot {
            title,
            date,
            start: at(self.start_time.as_deref()),
            end: at(self.end_time.as_deref()),
        }
    }
}

/// Lowercases and reduces `a|b` lists to the first of `title`, `date`, `time`.
pub fn normalize_field(raw: &str) -> Option<SlotField> {
    raw.to_ascii_lowercase()
        .split('|')
        .map(str::trim)
        .find_map(|candidate| match candidate {
            "title" => Some(SlotField::Title),
            "date" => Some(SlotField::Date),
            "time" => Some(SlotField::Time),
            _ => None,
        })
}

/// User-facing prompt for the fields still missing.
pub fn guidance_for_missing(missing: &[SlotField]) -> String {
    let mut phrases: Vec<&str> = Vec::new();
    for field in missing {
        let phrase = match field {
            SlotField::Title => "what the event is about",
            SlotField::Date => "the date",
            SlotField::Time => "the time",
        };
        if !phrases.contains(&phrase) {
            phrases.push(phrase);
        }
    }
    if phrases.is_empty() || phrases.len() == 3 {
        return FALLBACK_GUIDANCE.to_string();
    }
    format!("Please provide {}", phrases.join(" and "))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .ok()
}
