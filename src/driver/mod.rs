//! Browser automation primitives

#[cfg(test)]
pub mod fake;
pub mod traits;
pub mod web;

pub use traits::{BrowserDriver, DriverFactory, ElementInfo, LaunchProfile};
