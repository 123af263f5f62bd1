//! generated-at - stamps a page with the moment it finished loading
//!
//! On page load the WASM module appends
//! `<p class="generated-at">Generated at <ISO-8601></p>` to `#container`.
//! The `cli` feature adds `generated-at-serve`, a small HTTP/1.0 server that
//! delivers the page.

pub mod core;
pub mod time;

#[cfg(feature = "cli")]
pub mod serve;

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
pub mod web;
