//! Messages exchanged between the widget frame and the host page.

use crate::session::ActionStep;
use serde::{Deserialize, Serialize};
use wasm_bindgen::JsValue;

pub type RequestId = u64;

/// One interactive field found by a page scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedInput {
    pub tag: String,
    pub id: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedButton {
    pub text: String,
}

/// Lightweight structural summary of the host page, sent to the webhook as feedback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub url: String,
    #[serde(default)]
    pub inputs: Vec<ScannedInput>,
    #[serde(default)]
    pub buttons: Vec<ScannedButton>,
}

/// Wire messages, tagged by `type`.
///
/// `requestId` is optional on replies so a host agent that does not echo it still
/// resolves the oldest request of the matching kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "DVC_REQUEST_SCAN")]
    RequestScan {
        #[serde(rename = "requestId", default)]
        request_id: Option<RequestId>,
    },
    #[serde(rename = "DVC_SCAN_RESULT")]
    ScanResult {
        #[serde(rename = "requestId", default)]
        request_id: Option<RequestId>,
        #[serde(default)]
        data: Option<ScanReport>,
    },
    #[serde(rename = "DVC_REQUEST_STEP")]
    RequestStep {
        #[serde(rename = "requestId", default)]
        request_id: Option<RequestId>,
        step: ActionStep,
    },
    #[serde(rename = "DVC_STEP_RESULT")]
    StepResult {
        #[serde(rename = "requestId", default)]
        request_id: Option<RequestId>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "DVC_CLOSE_WIDGET")]
    CloseWidget,
}

impl BridgeMessage {
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        let encoded = serde_json::to_string(self).map_err(|e| JsValue::from_str(&e.to_string()))?;
        js_sys::JSON::parse(&encoded)
    }

    /// Decodes a `MessageEvent::data` payload. Anything that is not one of ours (pages
    /// post all kinds of messages) is `None`.
    pub fn from_js(value: &JsValue) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let encoded = js_sys::JSON::stringify(value).ok()?.as_string()?;
        Self::from_json(&encoded)
    }

    pub fn from_json(encoded: &str) -> Option<Self> {
        serde_json::from_str(encoded).ok()
    }
}
