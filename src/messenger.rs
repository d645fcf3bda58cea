//! Widget-side half of the cross-context messenger.
//!
//! The widget runs in its own frame and can reach the host page only through
//! `postMessage`. Every outbound request is registered in a [`PendingRequests`] table
//! under a fresh id and completed when the matching reply arrives.

use crate::config::{timeout, AssistantConfig};
use crate::protocol::{BridgeMessage, RequestId, ScanReport};
use crate::session::ActionStep;
use crate::timer::with_timeout;
use async_trait::async_trait;
use futures::channel::oneshot;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Scan,
    Step,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Scan => f.write_str("scan"),
            RequestKind::Step => f.write_str("step"),
        }
    }
}

/// Result of one step as reported by the host page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub success: bool,
    pub reason: Option<String>,
}

#[derive(Debug)]
pub enum Reply {
    Scan(Option<ScanReport>),
    Step(StepReport),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("host page did not answer the {kind} request within {ms}ms")]
    Timeout { kind: RequestKind, ms: u32 },
    #[error("{0} request was dropped before a reply arrived")]
    Dropped(RequestKind),
    #[error("could not post message to the host page: {0}")]
    Post(String),
    #[error("widget frame has no parent window")]
    NoParent,
    #[error("unexpected reply for {0} request")]
    UnexpectedReply(RequestKind),
}

/// In-flight requests keyed by id.
#[derive(Default)]
pub struct PendingRequests {
    next_id: RequestId,
    waiting: BTreeMap<RequestId, (RequestKind, oneshot::Sender<Reply>)>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: RequestKind) -> (RequestId, oneshot::Receiver<Reply>) {
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(self.next_id, (kind, tx));
        (self.next_id, rx)
    }

    pub fn cancel(&mut self, id: RequestId) {
        self.waiting.remove(&id);
    }

    pub fn in_flight(&self, kind: RequestKind) -> usize {
        self.waiting.values().filter(|(k, _)| *k == kind).count()
    }

    /// Completes the request a reply belongs to. Returns `false` for requests and for
    /// replies nobody is waiting on.
    pub fn resolve(&mut self, message: BridgeMessage) -> bool {
        let (kind, request_id, reply) = match message {
            BridgeMessage::ScanResult { request_id, data } => (RequestKind::Scan, request_id, Reply::Scan(data)),
            BridgeMessage::StepResult { request_id, success, reason } => {
                (RequestKind::Step, request_id, Reply::Step(StepReport { success, reason }))
            }
            _ => return false,
        };

        let id = match request_id {
            Some(id) => id,
            None => match self.waiting.iter().find(|(_, (k, _))| *k == kind) {
                Some((id, _)) => *id,
                None => return false,
            },
        };

        match self.waiting.remove(&id) {
            Some((expected, tx)) if expected == kind => tx.send(reply).is_ok(),
            Some(entry) => {
                warn!("reply kind {} does not match pending request {} ({})", kind, id, entry.0);
                self.waiting.insert(id, entry);
                false
            }
            None => {
                debug!("ignoring {} reply for unknown request {}", kind, id);
                false
            }
        }
    }
}

/// What the orchestrator needs from the host page.
#[async_trait(?Send)]
pub trait HostBridge {
    async fn request_scan(&self) -> Result<Option<ScanReport>, BridgeError>;
    async fn request_step(&self, step: &ActionStep) -> Result<StepReport, BridgeError>;
    fn close_widget(&self) -> Result<(), BridgeError>;
}

/// `postMessage` transport to `window.parent`.
pub struct PostMessageBridge {
    target: Window,
    pending: Rc<RefCell<PendingRequests>>,
    scan_timeout_ms: Option<u32>,
    step_timeout_ms: Option<u32>,
    _listener: Closure<dyn FnMut(MessageEvent)>,
}

impl PostMessageBridge {
    pub fn connect(config: &AssistantConfig) -> Result<Self, BridgeError> {
        let window = web_sys::window().ok_or(BridgeError::NoParent)?;
        let target = window.parent().map_err(|e| BridgeError::Post(format!("{:?}", e)))?.ok_or(BridgeError::NoParent)?;

        let pending = Rc::new(RefCell::new(PendingRequests::new()));
        let table = Rc::clone(&pending);
        let listener = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(message) = BridgeMessage::from_js(&event.data()) {
                table.borrow_mut().resolve(message);
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        window
            .add_event_listener_with_callback("message", listener.as_ref().unchecked_ref())
            .map_err(|e| BridgeError::Post(format!("{:?}", e)))?;

        Ok(PostMessageBridge {
            target,
            pending,
            scan_timeout_ms: timeout(config.scan_timeout_ms),
            step_timeout_ms: timeout(config.step_timeout_ms),
            _listener: listener,
        })
    }

    fn post(&self, message: &BridgeMessage) -> Result<(), BridgeError> {
        let value = message.to_js().map_err(|e| BridgeError::Post(format!("{:?}", e)))?;
        self.target
            .post_message(&value, "*")
            .map_err(|e| BridgeError::Post(format!("{:?}", e)))
    }

    async fn round_trip(&self, kind: RequestKind, build: impl FnOnce(RequestId) -> BridgeMessage) -> Result<Reply, BridgeError> {
        let (id, rx) = self.pending.borrow_mut().register(kind);
        if let Err(e) = self.post(&build(id)) {
            self.pending.borrow_mut().cancel(id);
            return Err(e);
        }
        let limit = match kind {
            RequestKind::Scan => self.scan_timeout_ms,
            RequestKind::Step => self.step_timeout_ms,
        };
        match with_timeout(rx, limit).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BridgeError::Dropped(kind)),
            Err(elapsed) => {
                self.pending.borrow_mut().cancel(id);
                Err(BridgeError::Timeout { kind, ms: elapsed.0 })
            }
        }
    }
}

#[async_trait(?Send)]
impl HostBridge for PostMessageBridge {
    async fn request_scan(&self) -> Result<Option<ScanReport>, BridgeError> {
        match self.round_trip(RequestKind::Scan, |id| BridgeMessage::RequestScan { request_id: Some(id) }).await? {
            Reply::Scan(data) => Ok(data),
            Reply::Step(_) => Err(BridgeError::UnexpectedReply(RequestKind::Scan)),
        }
    }

    async fn request_step(&self, step: &ActionStep) -> Result<StepReport, BridgeError> {
        let step = step.clone();
        match self
            .round_trip(RequestKind::Step, move |id| BridgeMessage::RequestStep { request_id: Some(id), step })
            .await?
        {
            Reply::Step(report) => Ok(report),
            Reply::Scan(_) => Err(BridgeError::UnexpectedReply(RequestKind::Step)),
        }
    }

    fn close_widget(&self) -> Result<(), BridgeError> {
        self.post(&BridgeMessage::CloseWidget)
    }
}
