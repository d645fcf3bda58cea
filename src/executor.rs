//! Host-page half of the extension: runs steps against the live document, scans the
//! page, and answers the widget's messages.

use crate::config::AssistantConfig;
use crate::protocol::{BridgeMessage, ScanReport, ScannedButton, ScannedInput};
use crate::session::{ActionKind, ActionStep};
use gloo_timers::future::TimeoutFuture;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Document, Element, Event, EventInit, HtmlElement, MessageEvent, ScrollBehavior, ScrollIntoViewOptions,
    ScrollLogicalPosition, Window,
};

const INPUT_SELECTOR: &str = r#"input:not([type="hidden"]), select, textarea"#;
const BUTTON_SELECTOR: &str = r#"button, .btn, [role="button"]"#;
const LABEL_CONTAINER_SELECTOR: &str = ".form-group, label, .ant-form-item, .row, .col-md-12";
const LABEL_SELECTOR: &str = "label, .label-text, .title, b";
/// Events a reactive page listens for after a value changes, in dispatch order.
const FILL_EVENTS: [&str; 3] = ["input", "change", "blur"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomError {
    #[error("ElementNotFound: No element found for selector '{selector}'")]
    ElementNotFound { selector: String },
    #[error("InvalidSelector: Invalid selector '{selector}'. Details: {error}")]
    InvalidSelector { selector: String, error: String },
    #[error("ElementTypeError: Element for selector '{selector}' is not of expected type '{expected_type}'")]
    ElementTypeError { selector: String, expected_type: String },
    #[error("JsError: {message}")]
    JsError { message: String },
}

impl From<JsValue> for DomError {
    fn from(value: JsValue) -> Self {
        DomError::JsError {
            message: value.as_string().unwrap_or_else(|| format!("{:?}", value)),
        }
    }
}

impl From<DomError> for JsValue {
    fn from(err: DomError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

/// How a step ended. The widget only sees `success`, the rest goes into `reason`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    TargetMissing,
    Failed(String),
}

impl StepOutcome {
    pub fn success(&self) -> bool {
        matches!(self, StepOutcome::Completed)
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            StepOutcome::Completed => None,
            StepOutcome::TargetMissing => Some("target element not found".to_string()),
            StepOutcome::Failed(message) => Some(message.clone()),
        }
    }
}

impl From<Result<(), DomError>> for StepOutcome {
    fn from(result: Result<(), DomError>) -> Self {
        match result {
            Ok(()) => StepOutcome::Completed,
            Err(DomError::ElementNotFound { .. }) => StepOutcome::TargetMissing,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }
}

fn get_window_document() -> Result<(Window, Document), DomError> {
    let window = web_sys::window().ok_or_else(|| DomError::JsError { message: "Failed to get window object".to_string() })?;
    let document = window.document().ok_or_else(|| DomError::JsError { message: "Failed to get document object".to_string() })?;
    Ok((window, document))
}

fn get_element_by_xpath(document: &Document, xpath: &str, original_selector: &str) -> Result<Element, DomError> {
    let result = document.evaluate(xpath, document).map_err(|e| DomError::InvalidSelector {
        selector: original_selector.to_string(),
        error: e.as_string().unwrap_or_else(|| "Unknown XPath error".to_string()),
    })?;

    match result.single_node_value() {
        Ok(Some(node)) => node.dyn_into::<Element>().map_err(|_| DomError::ElementTypeError {
            selector: original_selector.to_string(),
            expected_type: "Element".to_string(),
        }),
        Ok(None) => Err(DomError::ElementNotFound { selector: original_selector.to_string() }),
        Err(e) => Err(DomError::from(e)),
    }
}

/// Resolves a selector. `xpath:` and `css:` prefixes pick the engine; bare selectors
/// are CSS.
fn get_element(document: &Document, original_selector: &str) -> Result<Element, DomError> {
    if let Some(xpath) = original_selector.strip_prefix("xpath:") {
        return get_element_by_xpath(document, xpath, original_selector);
    }
    let css = original_selector.strip_prefix("css:").unwrap_or(original_selector);
    document
        .query_selector(css)
        .map_err(|e| DomError::InvalidSelector {
            selector: original_selector.to_string(),
            error: e.as_string().unwrap_or_else(|| "Unknown querySelector error".to_string()),
        })?
        .ok_or_else(|| DomError::ElementNotFound { selector: original_selector.to_string() })
}

fn as_html_element(element: Element, selector: &str) -> Result<HtmlElement, DomError> {
    element.dyn_into::<HtmlElement>().map_err(|_| DomError::ElementTypeError {
        selector: selector.to_string(),
        expected_type: "HtmlElement".to_string(),
    })
}

/// Sets `value` on whatever the element is (input, textarea, select, custom element)
/// and fires the events frameworks watch.
fn fill_element(element: &HtmlElement, value: &str) -> Result<(), DomError> {
    js_sys::Reflect::set(element, &JsValue::from_str("value"), &JsValue::from_str(value))?;
    for name in FILL_EVENTS {
        let init = EventInit::new();
        init.set_bubbles(true);
        let event = Event::new_with_event_init_dict(name, &init)?;
        element.dispatch_event(&event)?;
    }
    Ok(())
}

/// Inline styles replaced by the highlight, restored afterwards.
struct Highlight {
    element: HtmlElement,
    outline: String,
    background: String,
}

impl Highlight {
    fn apply(element: &HtmlElement, color: &str, tint: &str) -> Result<Self, DomError> {
        let style = element.style();
        let saved = Highlight {
            element: element.clone(),
            outline: style.get_property_value("outline")?,
            background: style.get_property_value("background-color")?,
        };
        style.set_property("outline", &format!("5px solid {}", color))?;
        style.set_property("background-color", tint)?;
        Ok(saved)
    }

    fn revert_after(self, ms: u32) {
        wasm_bindgen_futures::spawn_local(async move {
            TimeoutFuture::new(ms).await;
            let style = self.element.style();
            let _ = style.set_property("outline", &self.outline);
            let _ = style.set_property("background-color", &self.background);
        });
    }
}

/// Performs steps against the document it runs in.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    settle_delay_ms: u32,
    highlight_hold_ms: u32,
    highlight_color: String,
    highlight_tint: String,
}

impl StepExecutor {
    pub fn new(config: &AssistantConfig) -> Self {
        StepExecutor {
            settle_delay_ms: config.settle_delay_ms,
            highlight_hold_ms: config.highlight_hold_ms,
            highlight_color: config.highlight_color.clone(),
            highlight_tint: config.highlight_tint.clone(),
        }
    }

    /// Runs one step. Never fails: every problem is folded into the outcome.
    pub async fn execute_step(&self, step: &ActionStep) -> StepOutcome {
        let outcome = StepOutcome::from(self.try_execute(step).await);
        match &outcome {
            StepOutcome::Completed => debug!("step '{}' on {} completed", step.description, step.selector),
            other => warn!("step '{}' on {} failed: {:?}", step.description, step.selector, other),
        }
        outcome
    }

    async fn try_execute(&self, step: &ActionStep) -> Result<(), DomError> {
        let (_window, document) = get_window_document()?;
        let element = as_html_element(get_element(&document, &step.selector)?, &step.selector)?;

        let options = ScrollIntoViewOptions::new();
        options.set_behavior(ScrollBehavior::Smooth);
        options.set_block(ScrollLogicalPosition::Center);
        element.scroll_into_view_with_scroll_into_view_options(&options);

        let highlight = Highlight::apply(&element, &self.highlight_color, &self.highlight_tint)?;
        if self.settle_delay_ms > 0 {
            TimeoutFuture::new(self.settle_delay_ms).await;
        }

        let result = match step.action {
            ActionKind::Click => {
                element.click();
                Ok(())
            }
            ActionKind::Fill => fill_element(&element, step.value.as_deref().unwrap_or_default()),
            ActionKind::Unspecified => Ok(()),
        };

        highlight.revert_after(self.highlight_hold_ms);
        result
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn visible_text(element: &Element) -> String {
    let text = match element.dyn_ref::<HtmlElement>() {
        Some(html) => html.inner_text(),
        None => element.text_content().unwrap_or_default(),
    };
    text.trim().to_string()
}

/// Best-effort label: the nearest form container's label text, then `placeholder`,
/// then `aria-label`.
fn find_label(element: &Element) -> Option<String> {
    if let Ok(Some(container)) = element.closest(LABEL_CONTAINER_SELECTOR) {
        if let Ok(Some(label)) = container.query_selector(LABEL_SELECTOR) {
            return Some(visible_text(&label));
        }
    }
    element
        .get_attribute("placeholder")
        .and_then(non_empty)
        .or_else(|| element.get_attribute("aria-label").and_then(non_empty))
}

fn collect(document: &Document, selector: &str) -> Result<Vec<Element>, DomError> {
    let nodes = document.query_selector_all(selector)?;
    Ok((0..nodes.length())
        .filter_map(|i| nodes.item(i))
        .filter_map(|node| node.dyn_into::<Element>().ok())
        .collect())
}

/// Summarizes the page's interactive elements for the webhook.
pub fn scan_page() -> Result<ScanReport, DomError> {
    let (window, document) = get_window_document()?;
    let url = window.location().href()?;

    let inputs = collect(&document, INPUT_SELECTOR)?
        .iter()
        .map(|el| ScannedInput {
            tag: el.tag_name().to_lowercase(),
            id: non_empty(el.id()),
            label: find_label(el),
        })
        .collect();

    let buttons = collect(&document, BUTTON_SELECTOR)?
        .iter()
        .map(|el| {
            let text = non_empty(visible_text(el))
                .or_else(|| js_sys::Reflect::get(el, &JsValue::from_str("value")).ok()?.as_string())
                .unwrap_or_default();
            ScannedButton { text }
        })
        .collect();

    Ok(ScanReport { url, inputs, buttons })
}

fn reply(source: &Window, message: &BridgeMessage) {
    let sent = message.to_js().and_then(|value| source.post_message(&value, "*"));
    if let Err(e) = sent {
        warn!("could not reply to widget: {:?}", e);
    }
}

/// Host-page message loop: answers scan and step requests and forwards close requests
/// to the bootstrap's callback.
pub struct HostAgent {
    _listener: Closure<dyn FnMut(MessageEvent)>,
}

impl HostAgent {
    pub fn install(config: &AssistantConfig, on_close: Option<js_sys::Function>) -> Result<Self, DomError> {
        let (window, _document) = get_window_document()?;
        let executor = Rc::new(StepExecutor::new(config));

        let listener = Closure::wrap(Box::new(move |event: MessageEvent| {
            let Some(message) = BridgeMessage::from_js(&event.data()) else {
                return;
            };
            let source = event.source().and_then(|s| s.dyn_into::<Window>().ok());

            match message {
                BridgeMessage::RequestScan { request_id } => {
                    let data = match scan_page() {
                        Ok(report) => Some(report),
                        Err(e) => {
                            warn!("page scan failed: {}", e);
                            None
                        }
                    };
                    if let Some(source) = source {
                        reply(&source, &BridgeMessage::ScanResult { request_id, data });
                    }
                }
                BridgeMessage::RequestStep { request_id, step } => {
                    let executor = Rc::clone(&executor);
                    wasm_bindgen_futures::spawn_local(async move {
                        let outcome = executor.execute_step(&step).await;
                        if let Some(source) = source {
                            reply(
                                &source,
                                &BridgeMessage::StepResult { request_id, success: outcome.success(), reason: outcome.reason() },
                            );
                        }
                    });
                }
                BridgeMessage::CloseWidget => {
                    if let Some(callback) = &on_close {
                        if let Err(e) = callback.call0(&JsValue::NULL) {
                            warn!("close callback threw: {:?}", e);
                        }
                    }
                }
                BridgeMessage::ScanResult { .. } | BridgeMessage::StepResult { .. } => {}
            }
        }) as Box<dyn FnMut(MessageEvent)>);

        window.add_event_listener_with_callback("message", listener.as_ref().unchecked_ref())?;
        info!("host agent listening on {}", window.location().href().unwrap_or_default());
        Ok(HostAgent { _listener: listener })
    }
}
