//! Phase-driven state machine behind the widget.
//!
//! The [`Orchestrator`] owns the session and is the only thing that changes it. The
//! presentation layer reads [`WidgetView`] snapshots (pushed to an observer after every
//! transition) and drives the workflow through the command methods. Network and
//! host-page failures never escape: they become transitions into `ERROR` with a
//! user-facing message.
//!
//! State lives behind a `RefCell` that is only borrowed between await points, so the
//! view can be read while a request or a step is in flight.

use crate::config::AssistantConfig;
use crate::messenger::{BridgeError, HostBridge};
use crate::normalizer::normalize_response;
use crate::session::{ActionStep, PhaseInfo, Session, SessionStore, Status, UserAnswers};
use crate::timer::Pause;
use crate::webhook::{initialization_payload, page_scan_payload, reports_finished, WorkflowTransport};
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use thiserror::Error;
use tracing::{debug, info, warn};
use wasm_bindgen::JsValue;

pub const CONNECTIVITY_FAILED: &str = "Could not reach the assistant server.";
pub const NOTHING_ACTIONABLE: &str = "No actionable fields found on page.";
pub const FEEDBACK_SCAN_FAILED: &str = "Feedback scan failed.";

/// Reasons a command is refused. None of them change state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("please answer every question before continuing (missing: {})", .missing.join(", "))]
    IncompleteAnswers { missing: Vec<&'static str> },
    #[error("cannot {command} while the assistant is {status}")]
    InvalidTransition { command: &'static str, status: Status },
    #[error("webhook URL must not be empty")]
    EmptyWebhookUrl,
}

impl From<FlowError> for JsValue {
    fn from(err: FlowError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

/// Read-only snapshot handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetView {
    pub status: Status,
    pub session_id: String,
    pub answers: UserAnswers,
    pub steps: Vec<ActionStep>,
    pub current_step_index: usize,
    pub phase: PhaseInfo,
    pub error_message: Option<String>,
    pub webhook_url: String,
}

struct WidgetState {
    session: Session,
    error_message: Option<String>,
    webhook_url: String,
}

type Observer = Box<dyn Fn(&WidgetView)>;

pub struct Orchestrator<W, H, S, P> {
    transport: W,
    bridge: H,
    store: S,
    pause: P,
    execution_delay_ms: u32,
    state: RefCell<WidgetState>,
    observer: RefCell<Option<Observer>>,
}

impl<W, H, S, P> Orchestrator<W, H, S, P>
where
    W: WorkflowTransport,
    H: HostBridge,
    S: SessionStore,
    P: Pause,
{
    /// Builds the orchestrator, restoring a persisted session if there is one.
    pub fn new(config: &AssistantConfig, transport: W, bridge: H, store: S, pause: P) -> Self {
        let session = match store.load_session() {
            Some(saved) => {
                let session = saved.restored();
                info!("restored session {} in {}", session.session_id, session.status);
                session
            }
            None => Session::new(),
        };
        let webhook_url = store.load_webhook_url().unwrap_or_else(|| config.webhook_url.clone());

        Orchestrator {
            transport,
            bridge,
            store,
            pause,
            execution_delay_ms: config.execution_delay_ms,
            state: RefCell::new(WidgetState { session, error_message: None, webhook_url }),
            observer: RefCell::new(None),
        }
    }

    pub fn view(&self) -> WidgetView {
        let state = self.state.borrow();
        WidgetView {
            status: state.session.status,
            session_id: state.session.session_id.clone(),
            answers: state.session.answers.clone(),
            steps: state.session.steps.clone(),
            current_step_index: state.session.current_step_index,
            phase: state.session.phase.clone(),
            error_message: state.error_message.clone(),
            webhook_url: state.webhook_url.clone(),
        }
    }

    pub fn status(&self) -> Status {
        self.state.borrow().session.status
    }

    pub fn session(&self) -> Session {
        self.state.borrow().session.clone()
    }

    /// Registers the callback that receives a fresh view after every transition.
    pub fn set_observer(&self, observer: impl Fn(&WidgetView) + 'static) {
        *self.observer.borrow_mut() = Some(Box::new(observer));
    }

    fn notify(&self) {
        let view = self.view();
        if let Some(observer) = self.observer.borrow().as_ref() {
            observer(&view);
        }
    }

    /// Applies a mutation, persists the result and tells the observer.
    fn update(&self, mutate: impl FnOnce(&mut WidgetState)) {
        {
            let mut state = self.state.borrow_mut();
            mutate(&mut state);
            if state.session.status != Status::Error {
                state.error_message = None;
            }
        }
        self.persist();
        self.notify();
    }

    fn transition(&self, status: Status) {
        debug!("-> {}", status);
        self.update(|state| state.session.status = status);
    }

    fn fail(&self, message: &str) {
        warn!("{}", message);
        self.update(|state| {
            state.session.status = Status::Error;
            state.error_message = Some(message.to_string());
        });
    }

    /// Fire-and-forget write; an idle session is not stored.
    fn persist(&self) {
        let state = self.state.borrow();
        if state.session.status == Status::Idle {
            return;
        }
        if let Err(e) = self.store.save_session(&state.session) {
            warn!("could not persist session: {}", e);
        }
    }

    fn require(&self, command: &'static str, allowed: &[Status]) -> Result<Status, FlowError> {
        let status = self.status();
        if allowed.contains(&status) {
            Ok(status)
        } else {
            Err(FlowError::InvalidTransition { command, status })
        }
    }

    /// Whether the session that started an operation is still the live one. A reset
    /// while a request or step is in flight abandons that operation's result.
    fn still_current(&self, session_id: &str) -> bool {
        let current = self.state.borrow().session.session_id == session_id;
        if !current {
            info!("session {} was reset; discarding late result", session_id);
        }
        current
    }

    /// Swaps in a normalized response and returns how many steps it carried.
    fn accept_response(&self, data: &Value) -> usize {
        let (phase, steps) = normalize_response(data).into_parts();
        let count = steps.len();
        info!(
            "phase {:?}: {} step(s), confirmation {}",
            phase.current_phase_name, count, phase.require_confirmation
        );
        self.state.borrow_mut().session.replace_phase(phase, steps);
        count
    }

    /// `IDLE → SURVEY`.
    pub fn start(&self) -> Result<(), FlowError> {
        self.require("start", &[Status::Idle])?;
        self.transition(Status::Survey);
        Ok(())
    }

    /// `SURVEY → INIT_SENDING → READY_EXECUTE | ACTION_DONE | ERROR`.
    pub async fn submit_survey(&self, answers: UserAnswers) -> Result<(), FlowError> {
        self.require("submit the survey", &[Status::Survey])?;
        let missing = answers.missing_fields();
        if !missing.is_empty() {
            return Err(FlowError::IncompleteAnswers { missing });
        }

        self.update(|state| {
            state.session.answers = answers;
            state.session.status = Status::InitSending;
        });

        let (session_id, url, payload) = {
            let state = self.state.borrow();
            (
                state.session.session_id.clone(),
                state.webhook_url.clone(),
                initialization_payload(&state.session.session_id, &state.session.answers),
            )
        };

        let response = self.transport.post(&url, &payload).await;
        if !self.still_current(&session_id) {
            return Ok(());
        }
        match response {
            Ok(data) => {
                let next = if self.accept_response(&data) > 0 { Status::ReadyExecute } else { Status::ActionDone };
                self.transition(next);
            }
            Err(e) => {
                warn!("initialization failed: {}", e);
                self.fail(CONNECTIVITY_FAILED);
            }
        }
        Ok(())
    }

    /// `READY_EXECUTE → EXECUTING → WAITING_CONFIRM | ACTION_DONE`.
    ///
    /// Steps go out one at a time; a failed step ends the phase early but is not an
    /// error.
    pub async fn run_automation(&self) -> Result<(), FlowError> {
        self.require("run the automation", &[Status::ReadyExecute])?;
        let (session_id, steps) = {
            let state = self.state.borrow();
            (state.session.session_id.clone(), state.session.steps.clone())
        };
        self.transition(Status::Executing);

        for (index, step) in steps.iter().enumerate() {
            if !self.still_current(&session_id) {
                return Ok(());
            }
            self.update(|state| state.session.current_step_index = index);

            let result = self.bridge.request_step(step).await;
            if !self.still_current(&session_id) {
                return Ok(());
            }
            let succeeded = match result {
                Ok(report) => {
                    if let Some(reason) = &report.reason {
                        debug!("step {} reported: {}", index, reason);
                    }
                    report.success
                }
                Err(e) => {
                    warn!("step {} did not complete: {}", index, e);
                    false
                }
            };
            if !succeeded {
                info!("step {} of {} failed; ending phase early", index + 1, steps.len());
                break;
            }
            self.pause.pause(self.execution_delay_ms).await;
        }
        if !self.still_current(&session_id) {
            return Ok(());
        }

        let require_confirm = self.state.borrow().session.phase.require_confirmation;
        self.transition(if require_confirm { Status::WaitingConfirm } else { Status::ActionDone });
        Ok(())
    }

    /// `ACTION_DONE | WAITING_CONFIRM | ERROR → SCANNING → READY_EXECUTE | SUCCESS | ERROR`.
    pub async fn request_next_phase(&self) -> Result<(), FlowError> {
        self.require(
            "request the next phase",
            &[Status::ActionDone, Status::WaitingConfirm, Status::Error],
        )?;
        self.transition(Status::Scanning);
        let session_id = self.state.borrow().session.session_id.clone();

        let scan = self.bridge.request_scan().await;
        if !self.still_current(&session_id) {
            return Ok(());
        }
        let scan = match scan {
            Ok(scan) => scan,
            Err(e) => {
                self.scan_failed(e);
                return Ok(());
            }
        };

        let (url, payload) = {
            let state = self.state.borrow();
            let session = &state.session;
            (
                state.webhook_url.clone(),
                page_scan_payload(
                    session.phase.current_phase_name.as_deref(),
                    scan.as_ref(),
                    &session.session_id,
                    &session.answers,
                ),
            )
        };

        let response = self.transport.post(&url, &payload).await;
        if !self.still_current(&session_id) {
            return Ok(());
        }
        match response {
            Ok(data) => {
                if self.accept_response(&data) > 0 {
                    self.transition(Status::ReadyExecute);
                } else if reports_finished(&data) {
                    info!("workflow finished");
                    self.transition(Status::Success);
                } else {
                    self.fail(NOTHING_ACTIONABLE);
                }
            }
            Err(e) => {
                warn!("feedback request failed: {}", e);
                self.fail(FEEDBACK_SCAN_FAILED);
            }
        }
        Ok(())
    }

    fn scan_failed(&self, err: BridgeError) {
        warn!("page scan failed: {}", err);
        self.fail(FEEDBACK_SCAN_FAILED);
    }

    /// `ERROR → SURVEY`.
    pub fn back_to_survey(&self) -> Result<(), FlowError> {
        self.require("return to the survey", &[Status::Error])?;
        self.transition(Status::Survey);
        Ok(())
    }

    /// Any state `→ IDLE` with a fresh session id and nothing persisted.
    pub fn reset(&self) {
        if let Err(e) = self.store.clear_session() {
            warn!("could not clear persisted session: {}", e);
        }
        let session = Session::new();
        info!("session reset; new id {}", session.session_id);
        self.update(|state| state.session = session);
    }

    pub fn webhook_url(&self) -> String {
        self.state.borrow().webhook_url.clone()
    }

    pub fn set_webhook_url(&self, url: &str) -> Result<(), FlowError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(FlowError::EmptyWebhookUrl);
        }
        if let Err(e) = self.store.save_webhook_url(url) {
            warn!("could not persist webhook URL: {}", e);
        }
        self.state.borrow_mut().webhook_url = url.to_string();
        self.notify();
        Ok(())
    }

    /// Hides the widget. In-flight work carries on.
    pub fn close_widget(&self) {
        if let Err(e) = self.bridge.close_widget() {
            warn!("close request not delivered: {}", e);
        }
    }
}
