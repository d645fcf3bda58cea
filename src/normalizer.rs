//! Turns whatever the workflow webhook sends back into one canonical shape.
//!
//! The server's schema has drifted over time: plural and singular field names, bare
//! arrays, arrays wrapped in an object, a single step object standing in for a list.
//! Every variant is absorbed here so nothing downstream has to look at raw JSON.

use crate::session::{ActionKind, ActionStep, PhaseInfo, DEFAULT_GUIDE};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Canonical phase response.
///
/// Serializes with the same field names the normalizer reads, so running a serialized
/// result back through [`normalize_response`] reproduces it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResponse {
    #[serde(rename = "guide_message")]
    pub guide: String,
    #[serde(rename = "require_confirmation")]
    pub require_confirm: bool,
    #[serde(rename = "current_phase")]
    pub phase: Option<String>,
    #[serde(rename = "actions")]
    pub steps: Vec<ActionStep>,
}

impl NormalizedResponse {
    pub fn phase_info(&self) -> PhaseInfo {
        PhaseInfo {
            guide_text: self.guide.clone(),
            require_confirmation: self.require_confirm,
            current_phase_name: self.phase.clone(),
        }
    }

    pub fn into_parts(self) -> (PhaseInfo, Vec<ActionStep>) {
        let phase = self.phase_info();
        (phase, self.steps)
    }
}

/// Field names that may hold the step list, in priority order.
const STEP_FIELDS: [&str; 3] = ["actions", "action", "steps"];

/// JavaScript truthiness, which is what the server's clients have always relied on.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text of a truthy scalar. `0`, `""` and `false` count as absent.
fn text_of(value: Option<&Value>) -> Option<String> {
    match value.filter(|v| is_truthy(v))? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Picks the step candidates out of the working value.
///
/// A bare string under `action` is an action kind belonging to a single implicit step,
/// not a step container, so it is skipped.
fn candidate_steps(root: &Value) -> Vec<Value> {
    if let Value::Object(map) = root {
        let found = STEP_FIELDS
            .iter()
            .filter_map(|field| map.get(*field))
            .find(|value| is_truthy(value) && (value.is_array() || value.is_object()));
        return match found {
            Some(Value::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => Vec::new(),
        };
    }
    match root {
        Value::Array(items) => items.clone(),
        _ => Vec::new(),
    }
}

fn step_from_object(map: &Map<String, Value>) -> Option<ActionStep> {
    let selector = match map.get("selector") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => return None,
    };
    let action = map
        .get("action")
        .and_then(Value::as_str)
        .map(ActionKind::parse)
        .unwrap_or_default();
    let description = map
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Some(ActionStep {
        selector,
        action,
        value: match map.get("value") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        },
        description,
        step_id: map.get("step_id").and_then(Value::as_i64),
        ui_type: map.get("ui_type").and_then(Value::as_str).map(str::to_string),
        audio_script: map.get("audio_script").and_then(Value::as_str).map(str::to_string),
    })
}

/// Maps an arbitrary webhook payload onto [`NormalizedResponse`]. Never fails: an
/// unrecognized shape yields the defaults and an empty step list.
pub fn normalize_response(data: &Value) -> NormalizedResponse {
    let root = match data {
        Value::Array(items) if !items.is_empty() => &items[0],
        other => other,
    };

    let mut normalized = NormalizedResponse {
        guide: DEFAULT_GUIDE.to_string(),
        require_confirm: false,
        phase: None,
        steps: Vec::new(),
    };

    let object = root.as_object();
    if object.is_none() && !root.is_array() {
        debug!("webhook payload is not an object or array; using defaults");
        return normalized;
    }

    if let Some(map) = object {
        normalized.phase = text_of(map.get("current_phase"));
        normalized.guide = text_of(map.get("guide_message"))
            .or_else(|| text_of(map.get("guide")))
            .unwrap_or_else(|| DEFAULT_GUIDE.to_string());
        normalized.require_confirm = map.get("require_confirmation") == Some(&Value::Bool(true));
    }

    let mut candidates = candidate_steps(root);
    if candidates.is_empty() {
        if let Some(map) = object {
            if map.get("selector").map(is_truthy).unwrap_or(false) {
                candidates.push(root.clone());
            }
        }
    }

    let total = candidates.len();
    normalized.steps = candidates
        .iter()
        .filter_map(Value::as_object)
        .filter_map(step_from_object)
        .collect();

    if normalized.steps.len() != total {
        debug!(
            "dropped {} of {} step candidates without a usable selector",
            total - normalized.steps.len(),
            total
        );
    }
    normalized
}
