use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

const GOOGLE_CALENDAR_BASE_URL: &str = "https://calendar.google.com/calendar";
const GOOGLE_CALENDAR_HOST: &str = "calendar.google.com";
const GOOGLE_ACCOUNTS_HOST: &str = "accounts.google.com";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
/// One step of the draft confirmation chain.
pub enum ConfirmTrigger {
    Selector(String),
    Key(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// URLs, selectors, and login heuristics of the rendered calendar.
pub struct CalendarTarget {
    pub base_url: String,
    pub authenticated_host: String,
    pub login_host: String,
    /// Ordered fallbacks; the first selector with matches wins.
    pub event_selectors: Vec<String>,
    pub event_label_attribute: String,
    /// Ordered fallbacks; the first trigger that can be exercised wins.
    pub confirm_triggers: Vec<ConfirmTrigger>,
}

impl Default for CalendarTarget {
    fn default() -> Self {
        let confirm_selectors = [
            r#"button:has-text("Save")"#,
            r#"button:has-text("儲存")"#,
            r#"button:has-text("保存")"#,
            r#"[aria-label="Save"]"#,
            r#"[aria-label="儲存"]"#,
            r#"[aria-label="保存"]"#,
            r#"[data-mdc-dialog-action="save"]"#,
        ];
        let mut confirm_triggers = confirm_selectors
            .iter()
            .map(|selector| ConfirmTrigger::Selector((*selector).to_string()))
            .collect::<Vec<_>>();
        confirm_triggers.push(ConfirmTrigger::Key("Control+s".to_string()));

        Self {
            base_url: GOOGLE_CALENDAR_BASE_URL.to_string(),
            authenticated_host: GOOGLE_CALENDAR_HOST.to_string(),
            login_host: GOOGLE_ACCOUNTS_HOST.to_string(),
            event_selectors: vec![
                "[data-eventid]".to_string(),
                "[data-eventchip]".to_string(),
                r#"div[role="button"][data-opens-details]"#.to_string(),
            ],
            event_label_attribute: "aria-label".to_string(),
            confirm_triggers,
        }
    }
}

impl CalendarTarget {
    pub fn home_url(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }

    pub fn day_view_url(&self, date: NaiveDate) -> String {
        format!("{}/r/day/{}", self.home_url(), date.format("%Y/%m/%d"))
    }

    /// Deep link that opens a prefilled event draft.
    pub fn event_template_url(
        &self,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> String {
        let encoded_title = url::form_urlencoded::byte_serialize(title.as_bytes()).collect::<String>();
        format!(
            "{}/render?action=TEMPLATE&text={}&dates={}/{}",
            self.home_url(),
            encoded_title,
            compact_timestamp(start),
            compact_timestamp(end)
        )
    }

    /// True when `raw_url` shows the signed-in calendar rather than a login surface.
    pub fn is_authenticated_url(&self, raw_url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(raw_url.trim()) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        if host == self.login_host || host.ends_with(&format!(".{}", self.login_host)) {
            return false;
        }
        host == self.authenticated_host && !raw_url.contains(&self.login_host)
    }
}

/// `YYYYMMDDTHHMMSS`, the deep-link timestamp format.
pub fn compact_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format("%Y%m%dT%H%M%S").to_string()
}
