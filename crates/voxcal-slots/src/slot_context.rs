use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// A scheduling field the user can be asked about.
pub enum SlotField {
    Title,
    Date,
    Time,
}

impl SlotField {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotField::Title => "title",
            SlotField::Date => "date",
            SlotField::Time => "time",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleRequestError {
    #[error("event title cannot be empty")]
    EmptyTitle,
    #[error("end {end} must be after start {start}")]
    EndNotAfterStart {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("date {date} does not match start {start}")]
    DateMismatch { date: NaiveDate, start: NaiveDateTime },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// A complete scheduling request ready for the calendar session.
pub struct ScheduleRequest {
    pub title: String,
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ScheduleRequest {
    /// Builds a validated request; `date` is taken from `start`.
    pub fn new(
        title: impl Into<String>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Self, ScheduleRequestError> {
        let request = Self {
            title: title.into(),
            date: start.date(),
            start,
            end,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), ScheduleRequestError> {
        if self.title.trim().is_empty() {
            return Err(ScheduleRequestError::EmptyTitle);
        }
        if self.start >= self.end {
            return Err(ScheduleRequestError::EndNotAfterStart {
                start: self.start,
                end: self.end,
            });
        }
        if self.date != self.start.date() {
            return Err(ScheduleRequestError::DateMismatch {
                date: self.date,
                start: self.start,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// Fields known so far; every field is optional.
pub struct PartialSlot {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub start: Option<NaiveDateTime>,
    #[serde(default)]
    pub end: Option<NaiveDateTime>,
}

impl PartialSlot {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_times(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.date.is_none() && self.start.is_none() && self.end.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Accumulates one scheduling request across conversation turns.
pub struct SlotFillingContext {
    pending: PartialSlot,
}

impl SlotFillingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &PartialSlot {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Folds `incoming` over the stored fields and returns the request once
    /// title, start, and end are all known.
    ///
    /// Absent or blank incoming values never erase stored ones.
    pub fn merge(&mut self, incoming: PartialSlot) -> Option<ScheduleRequest> {
        let title = incoming
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());
        if let Some(title) = title {
            self.pending.title = Some(title);
        }
        if let Some(date) = incoming.date {
            self.pending.date = Some(date);
        }
        if let Some(start) = incoming.start {
            self.pending.start = Some(start);
        }
        if let Some(end) = incoming.end {
            self.pending.end = Some(end);
        }

        let (Some(title), Some(start), Some(end)) = (
            self.pending.title.as_ref(),
            self.pending.start,
            self.pending.end,
        ) else {
            tracing::debug!(missing = ?self.missing_fields(), "slot context still incomplete");
            return None;
        };
        Some(ScheduleRequest {
            title: title.clone(),
            date: start.date(),
            start,
            end,
        })
    }

    pub fn clear(&mut self) {
        self.pending = PartialSlot::default();
    }

    /// Forgets the times after a conflict; title and date carry into the next turn.
    pub fn clear_for_reschedule(&mut self) {
        self.pending.start = None;
        self.pending.end = None;
    }

    /// Fields the user still has to provide, in asking order.
    pub fn missing_fields(&self) -> Vec<SlotField> {
        let mut missing = Vec::new();
        if self.pending.title.is_none() {
            missing.push(SlotField::Title);
        }
        if self.pending.date.is_none() && self.pending.start.is_none() {
            missing.push(SlotField::Date);
        }
        if self.pending.start.is_none() || self.pending.end.is_none() {
            missing.push(SlotField::Time);
        }
        missing
    }

    /// Date the conversation is about, stated or implied by a known start.
    pub fn known_date(&self) -> Option<NaiveDate> {
        self.pending
            .date
            .or_else(|| self.pending.start.map(|start| start.date()))
    }

    /// Grounding text for the extraction oracle, e.g.
    /// `Pending event: title: "Sync", date: 2024-01-05, time: 14:00.`
    pub fn describe_for_extraction_hint(&self) -> String {
        let mut parts = Vec::new();
        if let Some(title) = self.pending.title.as_deref() {
            parts.push(format!("title: \"{title}\""));
        }
        if let Some(date) = self.known_date() {
            parts.push(format!("date: {}", date.format("%Y-%m-%d")));
        }
        if let Some(start) = self.pending.start {
            parts.push(format!("time: {}", start.format("%H:%M")));
        }
        if parts.is_empty() {
            return String::new();
        }
        format!("Pending event: {}.", parts.join(", "))
    }
}
