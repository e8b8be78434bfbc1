pub mod client;
pub mod error;
pub mod panel_input;
pub mod translate;

pub use error::{FrontPanelError, Result};
