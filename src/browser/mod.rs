pub mod chrome;

pub use chrome::{ChromeDriver, LaunchSettings};
