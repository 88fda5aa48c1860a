use std::time::Duration;
use tracing::info;

use super::{fill_visible, test_id, wait_for_spinner};
use crate::browser::{PageDriver, WaitState};
use crate::config::DeviceConfig;
use crate::error::{HarnessError, HarnessResult};

const LOGIN_REDIRECT: Duration = Duration::from_secs(10);

pub struct LoginPage<'a> {
    page: &'a mut dyn PageDriver,
    device: &'a DeviceConfig,
    timeout: Duration,
}

impl<'a> LoginPage<'a> {
    pub fn new(page: &'a mut dyn PageDriver, device: &'a DeviceConfig, timeout: Duration) -> Self {
        Self {
            page,
            device,
            timeout,
        }
    }

    /// Logs in with the device web credentials and waits for the overview page.
    pub async fn login(&mut self) -> HarnessResult<()> {
        let url = self.device.web_url("login");
        info!("Navigating to {}", url);
        self.page
            .goto(&url)
            .await
            .map_err(|e| HarnessError::ConnectionFailure(format!("Cannot reach {}: {}", url, e)))?;

        let credentials = &self.device.device.credentials;
        fill_visible(
            self.page,
            &test_id("input-username"),
            &credentials.username,
            self.timeout,
        )
        .await?;
        self.page
            .fill(&test_id("input-password"), &credentials.password)
            .await?;
        self.page.click(&test_id("button-login"), false).await?;

        self.page
            .wait_for_url("/status/overview", LOGIN_REDIRECT)
            .await
            .map_err(|_| {
                HarnessError::AuthenticationFailure(format!(
                    "Web login as {} did not reach the overview page",
                    credentials.username
                ))
            })?;
        info!("Login successful");
        wait_for_spinner(self.page).await
    }

    pub async fn logout(&mut self) -> HarnessResult<()> {
        self.page
            .click(&test_id("header-main-expand-dropdown"), false)
            .await?;
        self.page.pause(Duration::from_secs(1)).await?;
        self.page.click(&test_id("header-logout"), false).await?;
        self.page
            .wait_for("input[name=\"username\"]", WaitState::Visible, LOGIN_REDIRECT)
            .await?;
        info!("Logged out");
        Ok(())
    }
}
