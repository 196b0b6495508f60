use serde::Deserialize;

use crate::browser_executor::{BrowserAction, BrowserExecutor};
use crate::calendar_target::CalendarTarget;
use crate::error::{CalendarSessionError, CalendarSessionResult};

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
/// One element as reported by the driver for a `query_texts` action.
pub struct ScrapedElement {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl ScrapedElement {
    /// Accessible label when present, visible text otherwise; blank values yield nothing.
    pub fn description(&self) -> Option<String> {
        [self.label.as_deref(), self.text.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Default, Deserialize)]
struct QueryTextsBody {
    #[serde(default)]
    elements: Vec<ScrapedElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Extracts event descriptions from the rendered day view.
pub struct EventLocator {
    strategies: Vec<String>,
    label_attribute: Option<String>,
}

impl EventLocator {
    pub fn new(strategies: Vec<String>, label_attribute: Option<String>) -> Self {
        Self {
            strategies,
            label_attribute: label_attribute.filter(|value| !value.trim().is_empty()),
        }
    }

    pub fn from_target(target: &CalendarTarget) -> Self {
        Self::new(
            target.event_selectors.clone(),
            Some(target.event_label_attribute.clone()),
        )
    }

    pub fn strategies(&self) -> &[String] {
        &self.strategies
    }

    /// Runs the strategies in order and returns the first non-empty result set.
    ///
    /// Later strategies are fallbacks, never merged. `ScrapeEmpty` means every
    /// strategy came back empty; retryable driver failures surface as errors.
    pub async fn locate<E>(
        &self,
        executor: &mut E,
        date: chrono::NaiveDate,
    ) -> CalendarSessionResult<Vec<String>>
    where
        E: BrowserExecutor + ?Sized,
    {
        for selector in &self.strategies {
            let action = BrowserAction::QueryTexts {
                selector: selector.clone(),
                label_attribute: self.label_attribute.clone(),
            };
            let result = executor
                .execute(&action)
                .await
                .map_err(CalendarSessionError::executor)?;
            if !result.is_success() {
                if result.is_retryable() {
                    return Err(CalendarSessionError::Executor(format!(
                        "event query '{selector}' failed with status {}",
                        result.status_code
                    )));
                }
                tracing::debug!(
                    selector = selector.as_str(),
                    status_code = result.status_code,
                    "event selector rejected; trying next strategy"
                );
                continue;
            }

            let body = serde_json::from_value::<QueryTextsBody>(result.response_body)
                .unwrap_or_default();
            let descriptions = body
                .elements
                .iter()
                .filter_map(ScrapedElement::description)
                .collect::<Vec<_>>();
            if descriptions.is_empty() {
                continue;
            }
            tracing::debug!(
                selector = selector.as_str(),
                events = descriptions.len(),
                "located rendered events"
            );
            return Ok(descriptions);
        }
        Err(CalendarSessionError::ScrapeEmpty { date })
    }
}
