pub mod driver;

pub use driver::{PlaywrightFactory, WebDriver};
