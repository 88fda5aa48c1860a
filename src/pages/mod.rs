//! Page objects for the device web UI.

pub mod broker;
pub mod data_sender;
pub mod login;

use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::browser::{PageDriver, WaitState};
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::base_name;

pub use broker::BrokerPage;
pub use data_sender::DataSenderPage;
pub use login::LoginPage;

pub const SPINNER: &str = ".loading-spinner";
/// Text shown by an upload control that holds no file yet.
pub const DEFAULT_UPLOAD_LABEL: &str = "drag and drop your file here";

const SPINNER_APPEAR: Duration = Duration::from_secs(1);
const SPINNER_GONE: Duration = Duration::from_secs(30);
const SWITCH_SETTLE: Duration = Duration::from_secs(1);
const DROPDOWN_SETTLE: Duration = Duration::from_secs(1);
const UPLOAD_SETTLE: Duration = Duration::from_secs(1);

pub fn test_id(id: &str) -> String {
    format!("[test-id=\"{}\"]", id)
}

/// A toggle: the element to click and the container carrying `aria-checked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    pub control: String,
    pub state: String,
}

impl Switch {
    /// Broker page switch addressed by its `mosquitto.mqtt.mqtt.mqtt_*` id.
    pub fn broker(key: &str) -> Self {
        Self {
            control: format!("[id=\"mosquitto.mqtt.mqtt.mqtt_{}\"]", key),
            state: format!("div[test-id=\"switch-{}\"]", key),
        }
    }

    /// Modal switch addressed by test id; the focusable child is clicked.
    pub fn modal(key: &str) -> Self {
        let state = format!("div[test-id=\"switch-{}\"] >> visible=true", key);
        Self {
            control: format!("{} >> div[tabindex=\"0\"]", state),
            state,
        }
    }
}

/// A hidden file input plus the label that shows what it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub input: String,
    pub label: String,
}

impl UploadTarget {
    pub fn new(input_id: &str, label: impl Into<String>) -> Self {
        Self {
            input: test_id(&format!("upload-input-{}", input_id)),
            label: label.into(),
        }
    }
}

pub fn is_default_upload_label(text: &str) -> bool {
    text.to_lowercase().contains(DEFAULT_UPLOAD_LABEL)
}

/// Waits for the loading spinner to come and go. A spinner that never shows is fine.
pub async fn wait_for_spinner(page: &mut dyn PageDriver) -> HarnessResult<()> {
    if page
        .wait_for(SPINNER, WaitState::Attached, SPINNER_APPEAR)
        .await
        .is_err()
    {
        debug!("No loading spinner appeared");
        return Ok(());
    }
    if let Err(e) = page.wait_for(SPINNER, WaitState::Detached, SPINNER_GONE).await {
        debug!("Spinner wait ended: {}", e);
    }
    Ok(())
}

/// Brings a switch to `desired`, clicking only when its rendered state differs.
/// Returns whether a click happened.
pub async fn handle_switch(
    page: &mut dyn PageDriver,
    switch: &Switch,
    desired: bool,
    description: &str,
    timeout: Duration,
) -> HarnessResult<bool> {
    page.wait_for(&switch.control, WaitState::Visible, timeout)
        .await?;

    let current = page
        .get_attribute(&switch.state, "aria-checked")
        .await?
        .as_deref()
        == Some("true");

    if current == desired {
        info!("{} already in desired state: {}", description, desired);
        return Ok(false);
    }

    info!("Setting {} to {}", description, desired);
    page.click(&switch.control, true).await?;
    page.pause(SWITCH_SETTLE).await?;
    Ok(true)
}

/// Replaces an input's content by keyboard: click, select all, delete, type.
pub async fn clear_and_type(
    page: &mut dyn PageDriver,
    selector: &str,
    value: &str,
) -> HarnessResult<()> {
    page.click(selector, false).await?;
    page.press("ControlOrMeta+A").await?;
    page.press("Backspace").await?;
    page.type_text(value).await
}

/// Waits for an input and fills it.
pub async fn fill_visible(
    page: &mut dyn PageDriver,
    selector: &str,
    value: &str,
    timeout: Duration,
) -> HarnessResult<()> {
    page.wait_for(selector, WaitState::Visible, timeout).await?;
    page.fill(selector, value).await
}

/// Opens a dropdown and picks the option whose text is exactly `option`.
pub async fn select_option(
    page: &mut dyn PageDriver,
    dropdown: &str,
    option: &str,
    timeout: Duration,
) -> HarnessResult<()> {
    page.wait_for(dropdown, WaitState::Visible, timeout).await?;
    page.click(dropdown, false).await?;
    page.pause(DROPDOWN_SETTLE).await?;
    page.click_role_option(option).await?;
    page.pause(DROPDOWN_SETTLE).await
}

/// Picks a device-side file from a dropdown by the base name of `path`.
pub async fn select_by_basename(
    page: &mut dyn PageDriver,
    dropdown: &str,
    path: &str,
    timeout: Duration,
) -> HarnessResult<()> {
    let target = base_name(path);
    info!("Selecting {} from {}", target, dropdown);
    select_option(page, dropdown, target, timeout).await
}

/// Uploads `file` unless the control's label shows one is already there.
/// Returns whether an upload happened.
pub async fn upload_file(
    page: &mut dyn PageDriver,
    target: &UploadTarget,
    file: &Path,
    timeout: Duration,
) -> HarnessResult<bool> {
    page.wait_for(&target.label, WaitState::Attached, timeout)
        .await?;
    let label = page.inner_text(&target.label).await?;

    if !is_default_upload_label(&label) {
        info!("{} already holds '{}', skipping upload", target.input, label.trim());
        return Ok(false);
    }

    if !file.exists() {
        return Err(HarnessError::Scenario(format!(
            "Upload file not found: {:?}",
            file
        )));
    }

    info!("Uploading {:?} to {}", file, target.input);
    page.set_input_files(&target.input, file).await?;
    page.pause(UPLOAD_SETTLE).await?;
    Ok(true)
}
