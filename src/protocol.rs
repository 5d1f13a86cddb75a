use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `error_type` the backend uses when the very first probe found no price.
pub const INVALID_LINK: &str = "invalid_link";

// -------------------------
// Request / Response Types
// -------------------------

#[derive(Debug, Serialize)]
pub struct ScrapeRequest<'a> {
    pub url: &'a str,
    pub step: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub price: String,
    #[serde(default)]
    pub context: String,
}

/// One probe's outcome as produced by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: usize,
    pub cid_name: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub url: String,
    pub is_search_phase: bool,
    #[serde(default)]
    pub search_phase_completed: bool,
    #[serde(default)]
    pub base_price: Option<f64>,
    #[serde(default)]
    pub prices: Vec<PriceEntry>,
    #[serde(default)]
    pub discount_percentage: Option<f64>,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub found_count: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

impl StepResult {
    /// How many prices the backend reported for this probe.
    pub fn found(&self) -> usize {
        self.found_count.unwrap_or(self.prices.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub step: Option<usize>,
}

impl ErrorReply {
    /// Only a failure on the first probe means the link itself is bad; the
    /// same error type later in the run is an ordinary scrape failure.
    pub fn is_invalid_link(&self, requested_step: usize) -> bool {
        self.error_type.as_deref() == Some(INVALID_LINK)
            && self.step.unwrap_or(requested_step) == 0
    }

    /// Error replies are read field by field: an odd `step` or `error_type`
    /// must not turn a scrape failure into a protocol error.
    fn lenient(error: String, value: &Value) -> Self {
        let step = value.get("step").and_then(|s| match s {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        Self {
            error,
            error_type: value
                .get("error_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            step: step.and_then(|s| usize::try_from(s).ok()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeReply {
    Step(StepResult),
    Failed(ErrorReply),
}

impl ScrapeReply {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .map(str::to_string);
        match error {
            Some(error) => Ok(ScrapeReply::Failed(ErrorReply::lenient(error, &value))),
            None => Ok(ScrapeReply::Step(serde_json::from_value(value)?)),
        }
    }
}

/// Intra-step progress of a long-running backend operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub pct: f64,
    pub msg: Option<String>,
}

impl ProgressUpdate {
    /// `None` when the payload carries no numeric `pct`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let pct = value.get("pct").and_then(Value::as_f64)?;
        let msg = value
            .get("msg")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        Some(Self { pct, msg })
    }
}

pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_full_step_result() {
        let body = json!({
            "step": 3,
            "cid_name": "Google Maps C",
            "cid": "1833981",
            "url": "https://example.com/hotel?cid=1833981",
            "is_search_phase": true,
            "search_phase_completed": false,
            "base_price": null,
            "prices": [{"price": "₩ 123,456", "context": "per night"}],
            "discount_percentage": 4.5,
            "has_next": true,
            "found_count": 7
        });
        let reply = ScrapeReply::from_slice(body.to_string().as_bytes()).unwrap();
        let ScrapeReply::Step(result) = reply else {
            panic!("expected a step result");
        };
        assert_eq!(result.step, 3);
        assert_eq!(result.prices[0].price, "₩ 123,456");
        assert_eq!(result.found(), 7);
        assert!(result.has_next);
    }

    #[test]
    fn error_field_selects_error_reply() {
        let body = json!({"error": "no price on page", "error_type": "invalid_link", "step": 0});
        let reply = ScrapeReply::from_value(body).unwrap();
        assert_eq!(
            reply,
            ScrapeReply::Failed(ErrorReply {
                error: "no price on page".into(),
                error_type: Some("invalid_link".into()),
                step: Some(0),
            })
        );
    }

    #[test]
    fn null_or_empty_error_is_not_a_failure() {
        let body = json!({
            "step": 0, "cid_name": "Incognito", "is_search_phase": true,
            "error": null, "has_next": true
        });
        assert!(matches!(ScrapeReply::from_value(body).unwrap(), ScrapeReply::Step(_)));

        let body = json!({"step": 1, "cid_name": "x", "is_search_phase": true, "error": ""});
        assert!(matches!(ScrapeReply::from_value(body).unwrap(), ScrapeReply::Step(_)));
    }

    #[test]
    fn invalid_link_only_at_first_step() {
        let reply = ErrorReply {
            error: "bad".into(),
            error_type: Some(INVALID_LINK.into()),
            step: None,
        };
        assert!(reply.is_invalid_link(0));
        assert!(!reply.is_invalid_link(5));

        let later = ErrorReply { step: Some(5), ..reply.clone() };
        assert!(!later.is_invalid_link(0));

        let other = ErrorReply { error_type: Some("timeout".into()), ..reply };
        assert!(!other.is_invalid_link(0));
    }

    #[test]
    fn error_reply_tolerates_odd_step_values() {
        let reply = ScrapeReply::from_value(json!({
            "error": "no price", "error_type": "invalid_link", "step": -1
        }))
        .unwrap();
        let ScrapeReply::Failed(failure) = reply else {
            panic!("expected an error reply");
        };
        assert_eq!(failure.step, None);
        assert!(failure.is_invalid_link(0));
        assert!(!failure.is_invalid_link(3));

        let reply = ScrapeReply::from_value(json!({
            "error": "no price", "error_type": "invalid_link", "step": "0"
        }))
        .unwrap();
        assert!(matches!(reply, ScrapeReply::Failed(ErrorReply { step: Some(0), .. })));

        let reply = ScrapeReply::from_value(json!({"error": "boom", "error_type": 7, "step": 2.5}))
            .unwrap();
        assert_eq!(
            reply,
            ScrapeReply::Failed(ErrorReply {
                error: "boom".into(),
                error_type: None,
                step: None,
            })
        );
    }

    #[test]
    fn malformed_step_result_is_an_error() {
        assert!(ScrapeReply::from_slice(br#"{"step": "zero"}"#).is_err());
        assert!(ScrapeReply::from_slice(b"<html>").is_err());
    }

    #[test]
    fn progress_requires_numeric_pct() {
        let update = ProgressUpdate::from_value(&json!({"pct": 42.5, "msg": "rendering"})).unwrap();
        assert_eq!(update.pct, 42.5);
        assert_eq!(update.msg.as_deref(), Some("rendering"));

        assert!(ProgressUpdate::from_value(&json!({"pct": "42"})).is_none());
        assert!(ProgressUpdate::from_value(&json!({"msg": "idle"})).is_none());
        assert_eq!(ProgressUpdate::from_value(&json!({"pct": 3})).unwrap().msg, None);
    }

    #[test]
    fn content_type_check() {
        assert!(is_json_content_type(Some("application/json")));
        assert!(is_json_content_type(Some("Application/JSON; charset=utf-8")));
        assert!(!is_json_content_type(Some("text/html; charset=utf-8")));
        assert!(!is_json_content_type(None));
    }
}
