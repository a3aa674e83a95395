pub mod cdp;
pub mod chrome;
pub mod page;

pub use chrome::{BrowserConfig, ChromeLauncher};
pub use page::CdpPage;
