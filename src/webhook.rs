use crate::protocol::ScanReport;
use crate::session::UserAnswers;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(not(feature = "mock-webhook"))]
use reqwest::Client;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("webhook answered with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("webhook response is not JSON: {0}")]
    Decode(String),
    #[error("webhook did not answer within {0}ms")]
    Timeout(u32),
}

/// HTTP seam to the remote workflow engine.
#[async_trait(?Send)]
pub trait WorkflowTransport {
    async fn post(&self, url: &str, payload: &Value) -> Result<Value, TransportError>;
}

/// Body of the first request, sent once the intake survey is complete.
pub fn initialization_payload(session_id: &str, answers: &UserAnswers) -> Value {
    json!({
        "type": "SURVEY_INITIALIZATION",
        "id_session": session_id,
        "userAnswers": answers,
    })
}

/// Body of every later request: the phase just finished plus the page scan, whose
/// fields are spliced in at the top level.
pub fn page_scan_payload(
    completed_phase: Option<&str>,
    scan: Option<&ScanReport>,
    session_id: &str,
    answers: &UserAnswers,
) -> Value {
    let mut body = Map::new();
    body.insert("type".to_string(), json!("PAGE_SCAN"));
    body.insert("completed_phase".to_string(), json!(completed_phase));
    if let Some(Value::Object(fields)) = scan.map(|s| json!(s)) {
        body.extend(fields);
    }
    body.insert("id_session".to_string(), json!(session_id));
    body.insert("userAnswers".to_string(), json!(answers));
    Value::Object(body)
}

/// Whether the raw response declares the workflow finished.
pub fn reports_finished(data: &Value) -> bool {
    data.get("status").and_then(Value::as_str) == Some("finished")
}

/// The `type` tag of an outgoing payload, for logging.
pub fn payload_kind(payload: &Value) -> &str {
    payload.get("type").and_then(Value::as_str).unwrap_or("?")
}

/// `fetch`-backed client on wasm32, hyper elsewhere.
pub struct WebhookClient {
    #[cfg(not(feature = "mock-webhook"))]
    client: Client,
    timeout_ms: Option<u32>,
}

impl WebhookClient {
    pub fn new(timeout_ms: Option<u32>) -> Self {
        WebhookClient {
            #[cfg(not(feature = "mock-webhook"))]
            client: Client::new(),
            timeout_ms,
        }
    }
}

#[cfg(not(feature = "mock-webhook"))]
impl WebhookClient {
    async fn send(&self, url: &str, payload: &Value) -> Result<Value, TransportError> {
        let kind = payload_kind(payload);
        debug!("POST {} ({})", url, kind);

        let res = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Request { url: url.to_string(), message: e.to_string() })?;

        let status = res.status();
        debug!("webhook response status: {}", status);

        if !status.is_success() {
            let body = res.text().await.unwrap_or_else(|_| "Failed to get error text".to_string());
            warn!("webhook error {}: {}", status, body);
            return Err(TransportError::Status { status: status.as_u16(), body });
        }

        let body: Value = res.json().await.map_err(|e| TransportError::Decode(e.to_string()))?;
        debug!("webhook response body: {}", body);
        Ok(body)
    }
}

#[cfg(feature = "mock-webhook")]
impl WebhookClient {
    /// Offline responder: one phase with a single click, then "finished" on the first
    /// page scan.
    async fn send(&self, url: &str, payload: &Value) -> Result<Value, TransportError> {
        debug!("POST {} (MOCK): {}", url, payload);
        match payload_kind(payload) {
            "SURVEY_INITIALIZATION" => Ok(json!({
                "status": "continue",
                "current_phase": "MOCK_PHASE",
                "guide_message": "Mocked phase: the assistant will press the first button.",
                "actions": [{"step_id": 1, "selector": "button", "action": "click", "description": "Press the first button"}]
            })),
            "PAGE_SCAN" => Ok(json!({"status": "finished"})),
            other => Err(TransportError::Request {
                url: url.to_string(),
                message: format!("mock webhook has no answer for '{}'", other),
            }),
        }
    }
}

#[async_trait(?Send)]
impl WorkflowTransport for WebhookClient {
    async fn post(&self, url: &str, payload: &Value) -> Result<Value, TransportError> {
        crate::timer::with_timeout(self.send(url, payload), self.timeout_ms)
            .await
            .map_err(|elapsed| TransportError::Timeout(elapsed.0))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ScannedButton, ScannedInput};

    #[test]
    fn test_initialization_payload() {
        let payload = initialization_payload("sess_abc123def", &UserAnswers::default());
        assert_eq!(payload["type"], "SURVEY_INITIALIZATION");
        assert_eq!(payload["id_session"], "sess_abc123def");
        assert_eq!(payload["userAnswers"]["documentType"], "CCCD");
        assert_eq!(payload["userAnswers"]["deliveryMethod"], "APP");
    }

    #[test]
    fn test_page_scan_payload_splices_scan_fields() {
        let scan = ScanReport {
            url: "https://dichvucong.gov.vn/p/home".to_string(),
            inputs: vec![ScannedInput { tag: "input".to_string(), id: Some("hoTen".to_string()), label: Some("Ho ten".to_string()) }],
            buttons: vec![ScannedButton { text: "Tiep tuc".to_string() }],
        };
        let payload = page_scan_payload(Some("LOGIN"), Some(&scan), "sess_1", &UserAnswers::default());
        assert_eq!(payload["type"], "PAGE_SCAN");
        assert_eq!(payload["completed_phase"], "LOGIN");
        assert_eq!(payload["url"], "https://dichvucong.gov.vn/p/home");
        assert_eq!(payload["inputs"][0]["id"], "hoTen");
        assert_eq!(payload["buttons"][0]["text"], "Tiep tuc");
        assert_eq!(payload["id_session"], "sess_1");
    }

    #[test]
    fn test_page_scan_payload_without_scan() {
        let payload = page_scan_payload(None, None, "sess_1", &UserAnswers::default());
        assert_eq!(payload["completed_phase"], Value::Null);
        assert!(payload.get("url").is_none());
        assert!(payload.get("userAnswers").is_some());
    }

    #[test]
    fn test_payload_kind() {
        let payload = initialization_payload("sess_1", &UserAnswers::default());
        assert_eq!(payload_kind(&payload), "SURVEY_INITIALIZATION");
        let scan = page_scan_payload(None, None, "sess_1", &UserAnswers::default());
        assert_eq!(payload_kind(&scan), "PAGE_SCAN");
        assert_eq!(payload_kind(&json!({"type": 3})), "?");
        assert_eq!(payload_kind(&json!([])), "?");
    }

    #[test]
    fn test_reports_finished_reads_top_level_only() {
        assert!(reports_finished(&json!({"status": "finished"})));
        assert!(!reports_finished(&json!({"status": "continue"})));
        assert!(!reports_finished(&json!([{"status": "finished"}])));
    }
}
