// tests/host_page.rs
//
// Browser-only: `wasm-pack test --headless --firefox`.
#![cfg(target_arch = "wasm32")]

use dvc_assistant::config::AssistantConfig;
use dvc_assistant::executor::{scan_page, StepExecutor, StepOutcome};
use dvc_assistant::protocol::BridgeMessage;
use dvc_assistant::session::{ActionKind, ActionStep};
use wasm_bindgen::JsCast;
use wasm_bindgen_test::*;
use web_sys::{Document, Element, HtmlInputElement};

wasm_bindgen_test_configure!(run_in_browser);

fn document() -> Document {
    web_sys::window().unwrap().document().unwrap()
}

fn mount(html: &str) -> Element {
    let container = document().create_element("div").unwrap();
    container.set_inner_html(html);
    document().body().unwrap().append_child(&container).unwrap();
    container
}

fn unmount(container: Element) {
    container.remove();
}

fn executor() -> StepExecutor {
    StepExecutor::new(&AssistantConfig { settle_delay_ms: 0, highlight_hold_ms: 0, ..AssistantConfig::default() })
}

#[wasm_bindgen_test]
async fn test_login_form_is_filled_and_submitted() {
    let container = mount(
        r#"<form id="hp-login" onsubmit="return false">
             <input id="hp-user" type="text">
             <button id="hp-submit" type="button" onclick="this.dataset.pressed = 'yes'">Dang nhap</button>
           </form>"#,
    );
    let exec = executor();

    let fill = ActionStep::new("#hp-user", ActionKind::Fill, "Enter ID number").with_value("001099012345");
    assert_eq!(exec.execute_step(&fill).await, StepOutcome::Completed);
    let input = document().get_element_by_id("hp-user").unwrap().dyn_into::<HtmlInputElement>().unwrap();
    assert_eq!(input.value(), "001099012345");

    let click = ActionStep::new("xpath://button[@id='hp-submit']", ActionKind::Click, "Log in");
    assert_eq!(exec.execute_step(&click).await, StepOutcome::Completed);
    let button = document().get_element_by_id("hp-submit").unwrap();
    assert_eq!(button.get_attribute("data-pressed").as_deref(), Some("yes"));

    unmount(container);
}

#[wasm_bindgen_test]
async fn test_missing_target_reports_failure() {
    let step = ActionStep::new("css:#hp-nowhere", ActionKind::Click, "Press a ghost");
    let outcome = executor().execute_step(&step).await;
    assert_eq!(outcome, StepOutcome::TargetMissing);
    assert!(!outcome.success());
    assert!(outcome.reason().is_some());
}

#[wasm_bindgen_test]
fn test_scan_reports_inputs_and_buttons() {
    let container = mount(
        r#"<div class="form-group"><label>So dien thoai</label><input id="hp-phone" type="tel"></div>
           <input id="hp-secret" type="hidden">
           <textarea id="hp-note" placeholder="Ghi chu"></textarea>
           <span role="button">Quay lai</span>"#,
    );

    let report = scan_page().unwrap();
    assert_eq!(report.url, web_sys::window().unwrap().location().href().unwrap());

    let phone = report.inputs.iter().find(|i| i.id.as_deref() == Some("hp-phone")).unwrap();
    assert_eq!(phone.tag, "input");
    assert_eq!(phone.label.as_deref(), Some("So dien thoai"));
    let note = report.inputs.iter().find(|i| i.id.as_deref() == Some("hp-note")).unwrap();
    assert_eq!(note.label.as_deref(), Some("Ghi chu"));
    assert!(report.inputs.iter().all(|i| i.id.as_deref() != Some("hp-secret")));
    assert!(report.buttons.iter().any(|b| b.text == "Quay lai"));

    unmount(container);
}

#[wasm_bindgen_test]
fn test_bridge_messages_survive_js_conversion() {
    let step = ActionStep::new("#hp-user", ActionKind::Fill, "Enter name").with_value("Nguyen Van A");
    let message = BridgeMessage::RequestStep { request_id: Some(7), step };

    let value = message.to_js().unwrap();
    let kind = js_sys::Reflect::get(&value, &"type".into()).unwrap();
    assert_eq!(kind.as_string().as_deref(), Some("DVC_REQUEST_STEP"));
    assert_eq!(BridgeMessage::from_js(&value), Some(message));

    assert_eq!(BridgeMessage::from_js(&"DVC_CLOSE_WIDGET".into()), None);
    let foreign = js_sys::JSON::parse(r#"{"type":"webpackOk"}"#).unwrap();
    assert_eq!(BridgeMessage::from_js(&foreign), None);
}
