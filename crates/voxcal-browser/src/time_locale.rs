//! Locale strategies that recover an event's time range from scraped text.
//!
//! Each supported conversation language gets one [`TimeLocale`]; the
//! [`TimeLocaleRegistry`] picks the strategy for the detected language first
//! and falls back to the others.

use std::ops::Range;
use std::sync::{Arc, OnceLock};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::{Captures, Regex};

const MINUTES_PER_HALF_DAY: u32 = 12 * 60;
const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A time range found inside scraped text, anchored to a calendar date.
pub struct LocatedRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Byte span of the matched range inside the source text.
    pub span: Range<usize>,
}

/// Trait contract for one locale's time-range recognition.
pub trait TimeLocale: Send + Sync {
    /// Primary language subtag, e.g. `en`.
    fn tag(&self) -> &'static str;

    /// Finds the first time range in `text` on `on_date`.
    ///
    /// `near` disambiguates readings without an AM/PM marker.
    fn find_range(&self, text: &str, on_date: NaiveDate, near: NaiveTime) -> Option<LocatedRange>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

impl Meridiem {
    fn flip(self) -> Self {
        match self {
            Meridiem::Am => Meridiem::Pm,
            Meridiem::Pm => Meridiem::Am,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClockReading {
    hour: u32,
    minute: u32,
    meridiem: Option<Meridiem>,
    /// Written with minutes, a marker, or an hour suffix rather than a bare number.
    explicit: bool,
}

fn clock_minutes(reading: ClockReading, meridiem: Meridiem) -> Option<u32> {
    if reading.hour > 23 || reading.minute > 59 {
        return None;
    }
    if reading.hour == 0 || reading.hour > 12 {
        return Some(reading.hour * 60 + reading.minute);
    }
    let hour = reading.hour % 12 + if meridiem == Meridiem::Pm { 12 } else { 0 };
    Some(hour * 60 + reading.minute)
}

/// Resolves two clock readings into minutes after midnight of the anchor date.
fn resolve_range(start: ClockReading, end: ClockReading, near_minutes: u32) -> Option<(u32, u32)> {
    if start.hour > 23 || end.hour > 23 || start.minute > 59 || end.minute > 59 {
        return None;
    }
    if !start.explicit && !end.explicit {
        return None;
    }
    let (start_minutes, mut end_minutes) = match (start.meridiem, end.meridiem) {
        (Some(first), Some(second)) => (clock_minutes(start, first)?, clock_minutes(end, second)?),
        (None, Some(second)) => {
            let end_minutes = clock_minutes(end, second)?;
            let same = clock_minutes(start, second)?;
            let start_minutes = if same < end_minutes || start.hour > 12 {
                same
            } else {
                clock_minutes(start, second.flip())?
            };
            (start_minutes, end_minutes)
        }
        (Some(first), None) => {
            let start_minutes = clock_minutes(start, first)?;
            let same = clock_minutes(end, first)?;
            let end_minutes = if same > start_minutes || end.hour > 12 {
                same
            } else {
                clock_minutes(end, first.flip())?
            };
            (start_minutes, end_minutes)
        }
        (None, None) if start.hour > 12 || end.hour > 12 || start.hour == 0 || end.hour == 0 => (
            start.hour * 60 + start.minute,
            end.hour * 60 + end.minute,
        ),
        (None, None) => {
            let morning_start = (start.hour % 12) * 60 + start.minute;
            let mut morning_end = (end.hour % 12) * 60 + end.minute;
            if morning_end <= morning_start {
                morning_end += MINUTES_PER_HALF_DAY;
            }
            let evening_start = morning_start + MINUTES_PER_HALF_DAY;
            if morning_start.abs_diff(near_minutes) <= evening_start.abs_diff(near_minutes) {
                (morning_start, morning_end)
            } else {
                (evening_start, morning_end + MINUTES_PER_HALF_DAY)
            }
        }
    };
    if end_minutes <= start_minutes {
        end_minutes += MINUTES_PER_DAY;
    }
    Some((start_minutes, end_minutes))
}

fn anchor(date: NaiveDate, minutes: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(minutes))
}

fn minutes_of(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

fn capture_u32(captures: &Captures<'_>, name: &str) -> Option<u32> {
    captures
        .name(name)
        .and_then(|value| value.as_str().trim().parse::<u32>().ok())
}

fn locate(
    captures: &Captures<'_>,
    start: ClockReading,
    end: ClockReading,
    on_date: NaiveDate,
    near: NaiveTime,
) -> Option<LocatedRange> {
    let (start_minutes, end_minutes) = resolve_range(start, end, minutes_of(near))?;
    let span = captures.get(0)?.range();
    Some(LocatedRange {
        start: anchor(on_date, start_minutes),
        end: anchor(on_date, end_minutes),
        span,
    })
}

/// Compiles once per process; a failure disables the locale and is logged.
fn compile_range_pattern(locale: &'static str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(error) => {
            tracing::warn!(locale, error = %error, "time range pattern failed to compile");
            None
        }
    }
}

fn english_range_regex() -> Option<&'static Regex> {
    static RANGE: OnceLock<Option<Regex>> = OnceLock::new();
    RANGE
        .get_or_init(|| {
            compile_range_pattern(
                "en",
                r"(?i)\b(?P<h1>\d{1,2})(?::(?P<m1>\d{2}))?\s*(?P<ap1>[ap]\.?\s?m\b\.?)?\s*(?P<sep>-|–|—|~|\bto\b|\buntil\b)\s*(?P<h2>\d{1,2})(?::(?P<m2>\d{2}))?\s*(?P<ap2>[ap]\.?\s?m\b\.?)?",
            )
        })
        .as_ref()
}

fn english_meridiem(raw: &str) -> Option<Meridiem> {
    match raw.trim().chars().next()?.to_ascii_lowercase() {
        'a' => Some(Meridiem::Am),
        'p' => Some(Meridiem::Pm),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// `2pm`, `2:30 PM`, `14:00`; ranges joined by dashes, `to`, or `until`.
pub struct EnglishTimeLocale;

impl TimeLocale for EnglishTimeLocale {
    fn tag(&self) -> &'static str {
        "en"
    }

    fn find_range(&self, text: &str, on_date: NaiveDate, near: NaiveTime) -> Option<LocatedRange> {
        let regex = english_range_regex()?;
        regex.captures_iter(text).find_map(|captures| {
            let word_separator = captures
                .name("sep")
                .is_some_and(|sep| sep.as_str().chars().all(|ch| ch.is_ascii_alphabetic()));
            let reading = |hour: &str, minute: &str, meridiem: &str| {
                let meridiem = captures
                    .name(meridiem)
                    .and_then(|value| english_meridiem(value.as_str()));
                Some(ClockReading {
                    hour: capture_u32(&captures, hour)?,
                    minute: capture_u32(&captures, minute).unwrap_or(0),
                    meridiem,
                    explicit: word_separator
                        || meridiem.is_some()
                        || captures.name(minute).is_some(),
                })
            };
            let start = reading("h1", "m1", "ap1")?;
            let end = reading("h2", "m2", "ap2")?;
            locate(&captures, start, end, on_date, near)
        })
    }
}

fn chinese_range_regex() -> Option<&'static Regex> {
    static RANGE: OnceLock<Option<Regex>> = OnceLock::new();
    RANGE
        .get_or_init(|| {
            compile_range_pattern(
                "zh",
                r"(?P<p1>上午|早上|凌晨|中午|下午|晚上)?\s*(?P<h1>\d{1,2})\s*(?:[:：]\s*(?P<m1>\d{2})|(?P<d1>[點点時时])\s*(?:(?P<half1>半)|(?P<mm1>\d{1,2})\s*分?)?)?\s*(?:-|–|—|~|～|至|到)\s*(?P<p2>上午|早上|凌晨|中午|下午|晚上)?\s*(?P<h2>\d{1,2})\s*(?:[:：]\s*(?P<m2>\d{2})|(?P<d2>[點点時时])\s*(?:(?P<half2>半)|(?P<mm2>\d{1,2})\s*分?)?)?",
            )
        })
        .as_ref()
}

fn chinese_meridiem(marker: &str, hour: u32) -> Option<Meridiem> {
    match marker {
        "上午" | "早上" | "凌晨" => Some(Meridiem::Am),
        "中午" if hour == 11 => Some(Meridiem::Am),
        "中午" | "下午" | "晚上" => Some(Meridiem::Pm),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// `下午2點`, `上午10:30`, `3点半`; ranges joined by `至`, `到`, or dashes.
pub struct ChineseTimeLocale;

impl TimeLocale for ChineseTimeLocale {
    fn tag(&self) -> &'static str {
        "zh"
    }

    fn find_range(&self, text: &str, on_date: NaiveDate, near: NaiveTime) -> Option<LocatedRange> {
        let regex = chinese_range_regex()?;
        regex.captures_iter(text).find_map(|captures| {
            let reading = |side: &str| {
                let hour = capture_u32(&captures, &format!("h{side}"))?;
                let minute = capture_u32(&captures, &format!("m{side}"))
                    .or_else(|| capture_u32(&captures, &format!("mm{side}")))
                    .or_else(|| captures.name(&format!("half{side}")).map(|_| 30))
                    .unwrap_or(0);
                let meridiem = captures
                    .name(&format!("p{side}"))
                    .and_then(|marker| chinese_meridiem(marker.as_str(), hour));
                Some(ClockReading {
                    hour,
                    minute,
                    meridiem,
                    explicit: meridiem.is_some()
                        || captures.name(&format!("m{side}")).is_some()
                        || captures.name(&format!("d{side}")).is_some(),
                })
            };
            let start = reading("1")?;
            let end = reading("2")?;
            locate(&captures, start, end, on_date, near)
        })
    }
}

/// Language guess from script: any CJK ideograph means Chinese.
pub fn detect_language(text: &str) -> &'static str {
    let has_cjk = text
        .chars()
        .any(|ch| matches!(ch, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}'));
    if has_cjk {
        "zh"
    } else {
        "en"
    }
}

fn primary_subtag(tag: &str) -> String {
    tag.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[derive(Clone)]
/// Ordered set of locale strategies.
pub struct TimeLocaleRegistry {
    locales: Vec<Arc<dyn TimeLocale>>,
}

impl Default for TimeLocaleRegistry {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(EnglishTimeLocale),
            Arc::new(ChineseTimeLocale),
        ])
    }
}

impl std::fmt::Debug for TimeLocaleRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_list()
            .entries(self.locales.iter().map(|locale| locale.tag()))
            .finish()
    }
}

impl TimeLocaleRegistry {
    pub fn new(locales: Vec<Arc<dyn TimeLocale>>) -> Self {
        Self { locales }
    }

    /// Strategies with the one for `language` (or the language detected in `text`) first.
    pub fn ordered_for(&self, language: Option<&str>, text: &str) -> Vec<&dyn TimeLocale> {
        let preferred = language
            .map(primary_subtag)
            .filter(|tag| !tag.is_empty())
            .unwrap_or_else(|| detect_language(text).to_string());
        let (mut selected, rest): (Vec<&dyn TimeLocale>, Vec<&dyn TimeLocale>) = self
            .locales
            .iter()
            .map(|locale| locale.as_ref())
            .partition(|locale| locale.tag() == preferred);
        selected.extend(rest);
        selected
    }

    pub fn find_range(
        &self,
        text: &str,
        on_date: NaiveDate,
        near: NaiveTime,
        language: Option<&str>,
    ) -> Option<LocatedRange> {
        self.ordered_for(language, text)
            .into_iter()
            .find_map(|locale| locale.find_range(text, on_date, near))
    }
}
