//! Session data model and its durable store.
//!
//! A [`Session`] is everything the widget needs to pick up where it left off after the
//! host page navigates or reloads: the workflow status, the intake answers, the current
//! phase and its step list, and the step cursor.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Storage key for the serialized session.
pub const SESSION_KEY: &str = "dvc_session_state";
/// Storage key for the user-configured webhook URL.
pub const WEBHOOK_URL_KEY: &str = "dvc_webhook_url";

/// Guide text shown when the server does not provide one.
pub const DEFAULT_GUIDE: &str = "Please follow the instructions below.";

/// Workflow status. Exactly one is current at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Idle,
    Survey,
    InitSending,
    Scanning,
    ReadyExecute,
    Executing,
    ActionDone,
    WaitingConfirm,
    Success,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Idle => "IDLE",
            Status::Survey => "SURVEY",
            Status::InitSending => "INIT_SENDING",
            Status::Scanning => "SCANNING",
            Status::ReadyExecute => "READY_EXECUTE",
            Status::Executing => "EXECUTING",
            Status::ActionDone => "ACTION_DONE",
            Status::WaitingConfirm => "WAITING_CONFIRM",
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    Cmnd,
    Cccd,
}

/// Whether the citizen files for themselves or on someone else's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestTarget {
    #[serde(rename = "SELF")]
    Own,
    #[serde(rename = "BEHALF")]
    Behalf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgencyLevel {
    Province,
    Commune,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryMethod {
    App,
    Direct,
    Post,
}

/// Intake survey answers. The four categorical fields are required before the
/// workflow may be initialized; the rest travel to the server untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswers {
    pub document_type: Option<DocumentType>,
    pub target: Option<RequestTarget>,
    pub agency_level: Option<AgencyLevel>,
    pub delivery_method: Option<DeliveryMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behalf_relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behalf_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_address: Option<String>,
}

impl Default for UserAnswers {
    fn default() -> Self {
        UserAnswers {
            document_type: Some(DocumentType::Cccd),
            target: Some(RequestTarget::Own),
            agency_level: Some(AgencyLevel::Commune),
            delivery_method: Some(DeliveryMethod::App),
            id_number: None,
            behalf_relation: None,
            behalf_name: None,
            post_address: None,
        }
    }
}

impl UserAnswers {
    /// Wire names of required fields that are still unanswered.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.document_type.is_none() {
            missing.push("documentType");
        }
        if self.target.is_none() {
            missing.push("target");
        }
        if self.agency_level.is_none() {
            missing.push("agencyLevel");
        }
        if self.delivery_method.is_none() {
            missing.push("deliveryMethod");
        }
        missing
    }
}

/// The DOM interaction a step asks for. Decoding goes through [`ActionKind::parse`], so
/// the wire accepts the same spellings the normalizer does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ActionKind {
    Click,
    Fill,
    /// Anything the executor does not recognize. Executes as a no-op.
    #[default]
    #[serde(rename = "none")]
    Unspecified,
}

impl From<String> for ActionKind {
    fn from(raw: String) -> Self {
        ActionKind::parse(&raw)
    }
}

impl ActionKind {
    /// Maps the server's free-form action name, ignoring case.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "click" => ActionKind::Click,
            "fill" | "type" | "input" | "value" => ActionKind::Fill,
            _ => ActionKind::Unspecified,
        }
    }
}

/// One atomic DOM instruction received from the workflow server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub selector: String,
    #[serde(default)]
    pub action: ActionKind,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_script: Option<String>,
}

impl ActionStep {
    pub fn new(selector: impl Into<String>, action: ActionKind, description: impl Into<String>) -> Self {
        ActionStep {
            selector: selector.into(),
            action,
            value: None,
            description: description.into(),
            step_id: None,
            ui_type: None,
            audio_script: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Phase metadata. Always replaced as a whole, together with the step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseInfo {
    pub guide_text: String,
    pub require_confirmation: bool,
    pub current_phase_name: Option<String>,
}

impl Default for PhaseInfo {
    fn default() -> Self {
        PhaseInfo {
            guide_text: DEFAULT_GUIDE.to_string(),
            require_confirmation: false,
            current_phase_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub status: Status,
    #[serde(default)]
    pub answers: UserAnswers,
    #[serde(default)]
    pub steps: Vec<ActionStep>,
    #[serde(default)]
    pub current_step_index: usize,
    #[serde(default)]
    pub phase: PhaseInfo,
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Session {
            session_id: new_session_id(),
            status: Status::Idle,
            answers: UserAnswers::default(),
            steps: Vec::new(),
            current_step_index: 0,
            phase: PhaseInfo::default(),
        }
    }

    /// Accepts a new phase: steps and phase info are swapped in one assignment and the
    /// cursor goes back to the first step.
    pub fn replace_phase(&mut self, phase: PhaseInfo, steps: Vec<ActionStep>) {
        self.phase = phase;
        self.steps = steps;
        self.current_step_index = 0;
    }

    /// Adjusts a session read back from storage. Automation cannot resume mid-loop
    /// because the page may have changed under it.
    pub fn restored(mut self) -> Self {
        if self.status == Status::Executing {
            self.status = Status::ActionDone;
        }
        if self.current_step_index >= self.steps.len() {
            self.current_step_index = 0;
        }
        self
    }
}

/// `sess_` followed by nine lowercase alphanumerics.
pub fn new_session_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("sess_{}", &raw[..9])
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage is not available: {0}")]
    Unavailable(String),
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage write failed for key '{key}': {message}")]
    Write { key: String, message: String },
}

/// Durable key-value persistence for the session and the webhook URL.
///
/// Reads are infallible from the caller's point of view: a missing or corrupt entry is
/// simply absent.
pub trait SessionStore {
    fn load_session(&self) -> Option<Session>;
    fn save_session(&self, session: &Session) -> Result<(), StoreError>;
    fn clear_session(&self) -> Result<(), StoreError>;
    fn load_webhook_url(&self) -> Option<String>;
    fn save_webhook_url(&self, url: &str) -> Result<(), StoreError>;
}

fn decode_session(raw: &str) -> Option<Session> {
    match serde_json::from_str::<Session>(raw) {
        Ok(session) => Some(session),
        Err(e) => {
            debug!("discarding unreadable persisted session: {}", e);
            None
        }
    }
}

/// Store backed by the widget document's `localStorage`.
pub struct WebStorageStore {
    storage: web_sys::Storage,
}

impl WebStorageStore {
    pub fn from_window() -> Result<Self, StoreError> {
        let window = web_sys::window().ok_or_else(|| StoreError::Unavailable("no window object".to_string()))?;
        let storage = window
            .local_storage()
            .map_err(|e| StoreError::Unavailable(format!("{:?}", e)))?
            .ok_or_else(|| StoreError::Unavailable("localStorage is disabled".to_string()))?;
        Ok(WebStorageStore { storage })
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.storage.set_item(key, value).map_err(|e| StoreError::Write {
            key: key.to_string(),
            message: e.as_string().unwrap_or_else(|| "quota exceeded or access denied".to_string()),
        })
    }
}

impl SessionStore for WebStorageStore {
    fn load_session(&self) -> Option<Session> {
        let raw = self.storage.get_item(SESSION_KEY).ok().flatten()?;
        decode_session(&raw)
    }

    fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(session)?;
        self.write(SESSION_KEY, &encoded)
    }

    fn clear_session(&self) -> Result<(), StoreError> {
        self.storage.remove_item(SESSION_KEY).map_err(|e| StoreError::Write {
            key: SESSION_KEY.to_string(),
            message: e.as_string().unwrap_or_else(|| "remove failed".to_string()),
        })
    }

    fn load_webhook_url(&self) -> Option<String> {
        self.storage.get_item(WEBHOOK_URL_KEY).ok().flatten().filter(|url| !url.trim().is_empty())
    }

    fn save_webhook_url(&self, url: &str) -> Result<(), StoreError> {
        self.write(WEBHOOK_URL_KEY, url)
    }
}

/// In-memory store. Holds the same encoded strings the browser store would, so a
/// session round-trips through JSON exactly as it does in production.
#[derive(Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }
}

impl SessionStore for MemoryStore {
    fn load_session(&self) -> Option<Session> {
        let raw = self.raw(SESSION_KEY)?;
        decode_session(&raw)
    }

    fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(session)?;
        self.entries.borrow_mut().insert(SESSION_KEY.to_string(), encoded);
        Ok(())
    }

    fn clear_session(&self) -> Result<(), StoreError> {
        self.entries.borrow_mut().remove(SESSION_KEY);
        Ok(())
    }

    fn load_webhook_url(&self) -> Option<String> {
        self.raw(WEBHOOK_URL_KEY).filter(|url| !url.trim().is_empty())
    }

    fn save_webhook_url(&self, url: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().insert(WEBHOOK_URL_KEY.to_string(), url.to_string());
        Ok(())
    }
}

impl<S: SessionStore + ?Sized> SessionStore for std::rc::Rc<S> {
    fn load_session(&self) -> Option<Session> {
        (**self).load_session()
    }

    fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        (**self).save_session(session)
    }

    fn clear_session(&self) -> Result<(), StoreError> {
        (**self).clear_session()
    }

    fn load_webhook_url(&self) -> Option<String> {
        (**self).load_webhook_url()
    }

    fn save_webhook_url(&self, url: &str) -> Result<(), StoreError> {
        (**self).save_webhook_url(url)
    }
}
