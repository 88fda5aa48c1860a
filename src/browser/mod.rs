pub mod playwright;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::HarnessResult;

pub use playwright::{Browser, PlaywrightPage};

/// Element state a wait resolves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

/// One browser tab on the device web UI.
///
/// Every wait carries an explicit timeout. A selector that never reaches the
/// requested state yields `ElementNotFound` or `Timeout`; nothing is retried
/// at this level.
#[async_trait]
pub trait PageDriver: Send {
    async fn goto(&mut self, url: &str) -> HarnessResult<()>;

    async fn wait_for(
        &mut self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> HarnessResult<()>;

    /// Waits until the page URL contains `fragment`.
    async fn wait_for_url(&mut self, fragment: &str, timeout: Duration) -> HarnessResult<()>;

    async fn click(&mut self, selector: &str, force: bool) -> HarnessResult<()>;

    async fn fill(&mut self, selector: &str, value: &str) -> HarnessResult<()>;

    /// Keyboard press on the focused element, e.g. `Control+A`.
    async fn press(&mut self, key: &str) -> HarnessResult<()>;

    async fn type_text(&mut self, text: &str) -> HarnessResult<()>;

    async fn get_attribute(&mut self, selector: &str, name: &str) -> HarnessResult<Option<String>>;

    async fn inner_text(&mut self, selector: &str) -> HarnessResult<String>;

    async fn set_input_files(&mut self, selector: &str, file: &Path) -> HarnessResult<()>;

    /// Clicks the listbox option whose accessible name equals `name`.
    async fn click_role_option(&mut self, name: &str) -> HarnessResult<()>;

    async fn pause(&mut self, duration: Duration) -> HarnessResult<()>;

    async fn close(&mut self) -> HarnessResult<()>;
}
