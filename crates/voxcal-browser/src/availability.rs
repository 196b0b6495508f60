use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::overlap::overlaps;
use crate::time_locale::TimeLocaleRegistry;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Result of a conflict check for one proposed slot.
pub struct Availability {
    pub available: bool,
    pub conflicting_label: Option<String>,
}

impl Availability {
    pub fn free() -> Self {
        Self {
            available: true,
            conflicting_label: None,
        }
    }

    pub fn conflict(label: impl Into<String>) -> Self {
        Self {
            available: false,
            conflicting_label: Some(label.into()),
        }
    }
}

/// Trait contract for deciding whether scraped events block a proposed slot.
///
/// Implementations must honor half-open overlap semantics: an event ending
/// exactly when the proposal starts is not a conflict.
#[async_trait]
pub trait AvailabilityJudge: Send + Sync {
    async fn judge(
        &self,
        events: &[String],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Availability>;
}

#[derive(Debug, Clone, Default)]
/// Parses event times locally with the locale strategies and checks overlap.
pub struct LocalOverlapJudge {
    registry: TimeLocaleRegistry,
    language: Option<String>,
}

impl LocalOverlapJudge {
    pub fn new(registry: TimeLocaleRegistry, language: Option<String>) -> Self {
        Self { registry, language }
    }

    pub fn with_language(language: impl Into<String>) -> Self {
        Self::new(TimeLocaleRegistry::default(), Some(language.into()))
    }

    /// First event whose parsed range overlaps the proposal; unparsable events are skipped.
    pub fn find_conflict(
        &self,
        events: &[String],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Option<String> {
        events.iter().find_map(|raw| {
            let located = self.registry.find_range(
                raw,
                start.date(),
                start.time(),
                self.language.as_deref(),
            )?;
            if !overlaps(located.start, located.end, start, end) {
                return None;
            }
            Some(conflict_label(raw, located.span))
        })
    }
}

#[async_trait]
impl AvailabilityJudge for LocalOverlapJudge {
    async fn judge(
        &self,
        events: &[String],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Availability> {
        Ok(match self.find_conflict(events, start, end) {
            Some(label) => Availability::conflict(label),
            None => Availability::free(),
        })
    }
}

/// Event text with its time range removed, or the whole text when nothing else remains.
fn conflict_label(raw: &str, span: std::ops::Range<usize>) -> String {
    let is_filler = |ch: char| ch.is_whitespace() || matches!(ch, ',' | ';' | '|' | '·' | '，' | '、');
    let before = raw.get(..span.start).unwrap_or_default().trim_matches(is_filler);
    let after = raw.get(span.end..).unwrap_or_default().trim_matches(is_filler);
    match (before.is_empty(), after.is_empty()) {
        (false, false) => format!("{before} {after}"),
        (false, true) => before.to_string(),
        (true, false) => after.to_string(),
        (true, true) => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::{Availability, AvailabilityJudge, LocalOverlapJudge};

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 5)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("timestamp")
    }

    #[tokio::test]
    async fn functional_overlapping_event_reports_conflict_label() {
        let judge = LocalOverlapJudge::default();
        let events = vec!["2:00 – 3:00 Team Sync".to_string()];
        let availability = judge
            .judge(&events, at(14, 30), at(15, 30))
            .await
            .expect("judge");
        assert!(!availability.available);
        assert!(availability
            .conflicting_label
            .as_deref()
            .is_some_and(|label| label.contains("Team Sync")));
    }

    #[tokio::test]
    async fn functional_touching_and_unparsable_events_stay_available() {
        let judge = LocalOverlapJudge::default();
        let events = vec![
            "2pm to 3pm, Team Sync".to_string(),
            "All day: Company offsite".to_string(),
        ];
        let availability = judge
            .judge(&events, at(15, 0), at(16, 0))
            .await
            .expect("judge");
        assert_eq!(availability, Availability::free());
    }

    #[test]
    fn unit_conflict_label_strips_range_and_separators() {
        let judge = LocalOverlapJudge::with_language("zh-TW");
        let label = judge
            .find_conflict(&["下午2點至3點，團隊會議".to_string()], at(14, 30), at(15, 0))
            .expect("conflict");
        assert_eq!(label, "團隊會議");

        let label = LocalOverlapJudge::default()
            .find_conflict(&["2pm to 3pm".to_string()], at(14, 0), at(14, 30))
            .expect("conflict");
        assert_eq!(label, "2pm to 3pm");
    }

    #[test]
    fn unit_first_overlapping_event_in_render_order_wins() {
        let events = vec![
            "9am to 10am, Standup".to_string(),
            "1pm to 3pm, Design review".to_string(),
            "2pm to 4pm, Interview".to_string(),
        ];
        let label = LocalOverlapJudge::default()
            .find_conflict(&events, at(14, 0), at(14, 30))
            .expect("conflict");
        assert_eq!(label, "Design review");
    }
}
