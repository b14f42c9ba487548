//! Headless Chromium backend driven over CDP.

pub mod backend;
pub mod cdp;
mod inject;

pub use backend::ChromiumBackend;
