use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use std::rc::Rc;

use crate::config::AssistantConfig;
use crate::executor::HostAgent;
use crate::messenger::PostMessageBridge;
use crate::orchestrator::Orchestrator;
use crate::session::{UserAnswers, WebStorageStore};
use crate::timer::TimerPause;
use crate::webhook::WebhookClient;

pub mod config;
pub mod executor;
pub mod logging;
pub mod messenger;
pub mod normalizer;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod timer;
pub mod webhook;

type BrowserOrchestrator = Orchestrator<WebhookClient, PostMessageBridge, WebStorageStore, TimerPause>;

fn to_js<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let encoded = serde_json::to_string(value).map_err(|e| JsValue::from_str(&e.to_string()))?;
    js_sys::JSON::parse(&encoded)
}

fn from_js<T: serde::de::DeserializeOwned>(value: &JsValue) -> Result<T, JsValue> {
    let encoded = js_sys::JSON::stringify(value)?
        .as_string()
        .ok_or_else(|| JsValue::from_str("expected a JSON-serializable object"))?;
    serde_json::from_str(&encoded).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Widget-side entry point. Lives in the extension frame; every method that talks to
/// the server or the page returns a `Promise`.
#[wasm_bindgen]
pub struct DvcAssistant {
    inner: Rc<BrowserOrchestrator>,
}

#[wasm_bindgen]
impl DvcAssistant {
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<DvcAssistant, JsValue> {
        let config = AssistantConfig::from_js(&config)?;
        let store = WebStorageStore::from_window().map_err(|e| JsValue::from_str(&e.to_string()))?;
        let bridge = PostMessageBridge::connect(&config).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let transport = WebhookClient::new(config::timeout(config.request_timeout_ms));
        Ok(DvcAssistant {
            inner: Rc::new(Orchestrator::new(&config, transport, bridge, store, TimerPause)),
        })
    }

    /// Current state as a plain object.
    pub fn view(&self) -> Result<JsValue, JsValue> {
        to_js(&self.inner.view())
    }

    /// Calls `callback(view)` after every transition.
    #[wasm_bindgen(js_name = onChange)]
    pub fn on_change(&self, callback: js_sys::Function) {
        self.inner.set_observer(move |view| {
            match to_js(view) {
                Ok(value) => {
                    if let Err(e) = callback.call1(&JsValue::NULL, &value) {
                        tracing::warn!("view listener threw: {:?}", e);
                    }
                }
                Err(e) => tracing::warn!("could not encode view: {:?}", e),
            }
        });
    }

    pub fn start(&self) -> Result<(), JsValue> {
        Ok(self.inner.start()?)
    }

    #[wasm_bindgen(js_name = submitSurvey)]
    pub fn submit_survey(&self, answers: JsValue) -> js_sys::Promise {
        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            let answers: UserAnswers = from_js(&answers)?;
            inner.submit_survey(answers).await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = runAutomation)]
    pub fn run_automation(&self) -> js_sys::Promise {
        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            inner.run_automation().await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = requestNextPhase)]
    pub fn request_next_phase(&self) -> js_sys::Promise {
        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            inner.request_next_phase().await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = backToSurvey)]
    pub fn back_to_survey(&self) -> Result<(), JsValue> {
        Ok(self.inner.back_to_survey()?)
    }

    pub fn reset(&self) {
        self.inner.reset();
    }

    #[wasm_bindgen(js_name = webhookUrl)]
    pub fn webhook_url(&self) -> String {
        self.inner.webhook_url()
    }

    #[wasm_bindgen(js_name = setWebhookUrl)]
    pub fn set_webhook_url(&self, url: &str) -> Result<(), JsValue> {
        Ok(self.inner.set_webhook_url(url)?)
    }

    #[wasm_bindgen(js_name = closeWidget)]
    pub fn close_widget(&self) {
        self.inner.close_widget();
    }
}

/// Host-page entry point, called by the content script once the widget frame exists.
/// The returned handle keeps the message listener alive.
#[wasm_bindgen]
pub struct HostAgentHandle {
    _agent: HostAgent,
}

#[wasm_bindgen(js_name = installHostAgent)]
pub fn install_host_agent(config: JsValue, on_close: Option<js_sys::Function>) -> Result<HostAgentHandle, JsValue> {
    let config = AssistantConfig::from_js(&config)?;
    let agent = HostAgent::install(&config, on_close)?;
    Ok(HostAgentHandle { _agent: agent })
}

// Initialize WASM module and log to console
#[wasm_bindgen(start)]
pub fn run() -> Result<(), JsValue> {
    #[cfg(debug_assertions)]
    console_error_panic_hook::set_once(); // Better panic messages in browser
    let level = if cfg!(debug_assertions) { tracing::Level::DEBUG } else { tracing::Level::INFO };
    logging::init(level);
    web_sys::console::log_1(&"DVC assistant initialized!".into());
    Ok(())
}
