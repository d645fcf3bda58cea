use serde::Deserialize;
use thiserror::Error;
use wasm_bindgen::JsValue;

/// Webhook used when the user has not configured one.
pub const DEFAULT_WEBHOOK_URL: &str = "https://wf.antoan.site/webhook/dvc-assistant";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration could not be read: {0}")]
    Js(String),
}

impl From<ConfigError> for JsValue {
    fn from(err: ConfigError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

/// Tunables for both sides of the extension. Every field has a default, so the JS
/// shell only passes what it wants to change.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssistantConfig {
    /// Default webhook; a URL saved by the user takes precedence.
    pub webhook_url: String,
    /// Pause between two steps of a phase.
    pub execution_delay_ms: u32,
    /// Time given to the smooth scroll and highlight before the action fires.
    pub settle_delay_ms: u32,
    /// How long the highlight stays on an element after the action.
    pub highlight_hold_ms: u32,
    pub highlight_color: String,
    pub highlight_tint: String,
    /// Round-trip limits. `0` waits forever.
    pub scan_timeout_ms: u32,
    pub step_timeout_ms: u32,
    pub request_timeout_ms: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        AssistantConfig {
            webhook_url: DEFAULT_WEBHOOK_URL.to_string(),
            execution_delay_ms: 1200,
            settle_delay_ms: 600,
            highlight_hold_ms: 1000,
            highlight_color: "#d4af37".to_string(),
            highlight_tint: "rgba(212, 175, 55, 0.1)".to_string(),
            scan_timeout_ms: 15_000,
            step_timeout_ms: 30_000,
            request_timeout_ms: 60_000,
        }
    }
}

impl AssistantConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads an optional JS object; `undefined` and `null` give the defaults.
    pub fn from_js(value: &JsValue) -> Result<Self, ConfigError> {
        if value.is_undefined() || value.is_null() {
            return Ok(Self::default());
        }
        let raw = js_sys::JSON::stringify(value)
            .map_err(|e| ConfigError::Js(format!("{:?}", e)))?
            .as_string()
            .ok_or_else(|| ConfigError::Js("configuration is not an object".to_string()))?;
        Self::from_json(&raw)
    }
}

/// `0` disables a timeout.
pub fn timeout(ms: u32) -> Option<u32> {
    (ms > 0).then_some(ms)
}
