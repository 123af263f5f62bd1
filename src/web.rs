//! Browser side: `web_sys::Document` adapter and the module start hook

use crate::core::{stamp_generated_at, Document, DocumentError, StampError};
use crate::time::SystemClock;
use tracing::{debug, info};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{AddEventListenerOptions, Element, Event};

/// `Document` backed by the live page
pub struct WebDocument {
    document: web_sys::Document,
}

impl WebDocument {
    pub fn new(document: web_sys::Document) -> Self {
        Self { document }
    }
}

fn host_error(value: JsValue) -> DocumentError {
    DocumentError::Host(value.as_string().unwrap_or_else(|| format!("{value:?}")))
}

impl Document for WebDocument {
    type Node = Element;

    fn create_element(&mut self, tag: &str) -> Result<Element, DocumentError> {
        self.document.create_element(tag).map_err(host_error)
    }

    fn set_class_name(&mut self, node: &Element, class: &str) -> Result<(), DocumentError> {
        node.set_class_name(class);
        Ok(())
    }

    fn set_text_content(&mut self, node: &Element, text: &str) -> Result<(), DocumentError> {
        node.set_text_content(Some(text));
        Ok(())
    }

    fn get_element_by_id(&self, id: &str) -> Option<Element> {
        self.document.get_element_by_id(id)
    }

    fn append_child(&mut self, parent: &Element, child: &Element) -> Result<(), DocumentError> {
        parent.append_child(child).map(|_| ()).map_err(host_error)
    }
}

impl From<StampError> for JsValue {
    fn from(e: StampError) -> Self {
        js_sys::Error::new(&e.to_string()).into()
    }
}

/// DOMContentLoaded handler body; a missing mount point is thrown to the host
fn on_content_loaded(document: &web_sys::Document) -> Result<(), JsValue> {
    let mut doc = WebDocument::new(document.clone());
    stamp_generated_at(&mut doc, &SystemClock)?;
    Ok(())
}

#[cfg_attr(not(test), wasm_bindgen(start))]
pub fn start() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();

    // Initialize tracing for browser console
    tracing_wasm::set_as_global_default();

    let document = web_sys::window()
        .and_then(|w| w.document())
        .ok_or_else(|| JsValue::from_str("no document"))?;

    // Async-loaded wasm can start after parsing is over; the event has
    // already fired by then.
    if document.ready_state() != "loading" {
        debug!(ready_state = %document.ready_state(), "Document already parsed");
        return on_content_loaded(&document);
    }

    let target = document.clone();
    let on_loaded = Closure::<dyn FnMut(Event) -> Result<(), JsValue>>::new(move |_: Event| {
        on_content_loaded(&target)
    });

    let options = AddEventListenerOptions::new();
    options.set_once(true);
    document.add_event_listener_with_callback_and_add_event_listener_options(
        "DOMContentLoaded",
        on_loaded.as_ref().unchecked_ref(),
        &options,
    )?;
    // Lives as long as the page
    on_loaded.forget();

    info!("Waiting for DOMContentLoaded");
    Ok(())
}
