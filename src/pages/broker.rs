use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::{
    clear_and_type, fill_visible, handle_switch, select_by_basename, test_id, upload_file,
    wait_for_spinner, Switch, UploadTarget,
};
use crate::browser::{PageDriver, WaitState};
use crate::certs::CertificateManager;
use crate::config::DeviceConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::files;
use crate::scenario::broker::{
    BrokerConfig, CertificateConfig, MiscConfig, SecurityConfig,
};
use crate::scenario::{CertificateFiles, CertificateSource};

const TAB_SETTLE: Duration = Duration::from_secs(1);
const OPTION_SETTLE: Duration = Duration::from_millis(500);

/// Dropdown test id, upload input id and label for each certificate slot.
const CERTIFICATE_SLOTS: [(&str, &str, &str); 3] = [
    ("input-ca_file", "ca_file", "#mqtt_ca_file-label"),
    ("input-cert_file", "cert_file", "#mqtt_cert_file-label"),
    ("input-key_file", "key_file", "#mqtt_key_file-label"),
];

fn slot_files(files: &CertificateFiles) -> [Option<&str>; 3] {
    [files.ca.as_deref(), files.cert.as_deref(), files.key.as_deref()]
}

/// MQTT broker settings screen.
///
/// Each `configure_*` method covers one tab; `configure_broker` runs them in
/// order and saves. Dependent fields are only touched after the switch that
/// reveals them has been set.
pub struct BrokerPage<'a> {
    page: &'a mut dyn PageDriver,
    device: &'a DeviceConfig,
    certs: &'a CertificateManager,
    timeout: Duration,
}

impl<'a> BrokerPage<'a> {
    pub fn new(
        page: &'a mut dyn PageDriver,
        device: &'a DeviceConfig,
        certs: &'a CertificateManager,
        timeout: Duration,
    ) -> Self {
        Self {
            page,
            device,
            certs,
            timeout,
        }
    }

    pub async fn navigate(&mut self) -> HarnessResult<()> {
        let url = self.device.web_url("services/mqtt/broker");
        self.page.goto(&url).await?;
        self.page
            .wait_for(&test_id("button-add"), WaitState::Visible, self.timeout)
            .await?;
        info!("MQTT Broker page loaded");
        Ok(())
    }

    async fn switch(&mut self, key: &str, desired: bool, description: &str) -> HarnessResult<bool> {
        handle_switch(
            self.page,
            &Switch::broker(key),
            desired,
            description,
            self.timeout,
        )
        .await
    }

    pub async fn configure_basic_settings(&mut self, config: &BrokerConfig) -> HarnessResult<()> {
        self.switch("enabled", true, "MQTT Broker").await?;

        if let Some(port) = &config.port {
            info!("Setting local port to {}", port);
            clear_and_type(self.page, &test_id("input-local_port_0"), port).await?;
        }

        if let Some(remote) = config.remote_access {
            self.switch("allow_ra", remote, "remote access").await?;
        }
        Ok(())
    }

    pub async fn configure_security(&mut self, security: &SecurityConfig) -> HarnessResult<()> {
        if security.is_empty() {
            info!("No security settings, skipping security tab");
            return Ok(());
        }

        self.page
            .click(&test_id("selected-tab-security"), false)
            .await?;
        self.page.pause(TAB_SETTLE).await?;

        if let Some(enabled) = security.tls_enabled {
            self.switch("use_tls_ssl", enabled, "TLS/SSL").await?;
        }

        if !security.tls_allowed() {
            return Ok(());
        }

        if let Some(certificates) = &security.certificates {
            self.configure_certificates(certificates).await?;
        }

        if let Some(version) = &security.tls_version {
            info!("Setting TLS version to {}", version);
            self.page.click(&test_id("input-tls_version"), false).await?;
            self.page.pause(OPTION_SETTLE).await?;
            self.page
                .click(
                    &test_id(&format!("selectoption-{}", version.to_lowercase())),
                    false,
                )
                .await?;
            self.page.pause(TAB_SETTLE).await?;
        }
        Ok(())
    }

    pub async fn configure_certificates(&mut self, config: &CertificateConfig) -> HarnessResult<()> {
        let Some(tls_type) = &config.tls_type else {
            return Ok(());
        };

        info!("Setting TLS type to {}", tls_type);
        self.page.click(&test_id("input-tls_type"), false).await?;
        self.page.pause(OPTION_SETTLE).await?;

        let option = if config.is_psk() {
            "selectoption-psk"
        } else {
            "selectoption-cert"
        };
        self.page.click(&test_id(option), false).await?;

        if !config.is_psk() {
            if let Some(required) = config.require_certificate {
                self.switch("require_certificate", required, "require certificate")
                    .await?;
            }
            match config.certificate_files_from_device {
                Some(from_device) => {
                    self.switch("device_sec_files", from_device, "device certificates")
                        .await?;
                }
                None => return Ok(()),
            }
        }

        self.apply_certificate_source(&config.source()).await
    }

    /// Applies one certificate source variant to the security tab.
    pub async fn apply_certificate_source(&mut self, source: &CertificateSource) -> HarnessResult<()> {
        match source {
            CertificateSource::Psk { key, identity } => {
                self.page.fill(&test_id("input-psk"), key).await?;
                self.page.fill(&test_id("input-identity"), identity).await?;
                self.page.pause(OPTION_SETTLE).await
            }
            CertificateSource::FromDevice(files) => {
                for ((dropdown, _, _), file) in CERTIFICATE_SLOTS.iter().zip(slot_files(files)) {
                    if let Some(file) = file {
                        select_by_basename(self.page, &test_id(dropdown), file, self.timeout)
                            .await?;
                    }
                }
                Ok(())
            }
            CertificateSource::Upload(files) => {
                if files.is_empty() {
                    warn!("No certificate files configured for upload");
                    return Ok(());
                }
                let prepared = self
                    .certs
                    .prepare_broker_certificates(files)
                    .map_err(|e| HarnessError::Certificate(format!("{:#}", e)))?;

                for ((_, input, label), file) in CERTIFICATE_SLOTS.iter().zip(slot_files(&prepared)) {
                    if let Some(file) = file {
                        let target = UploadTarget::new(input, *label);
                        upload_file(self.page, &target, Path::new(file), self.timeout).await?;
                    }
                }
                Ok(())
            }
        }
    }

    pub async fn configure_miscellaneous(&mut self, misc: &MiscConfig) -> HarnessResult<()> {
        if misc.is_empty() {
            info!("No miscellaneous settings, skipping miscellaneous tab");
            return Ok(());
        }

        self.page.click(&test_id("tab-miscellaneous"), false).await?;
        self.page.pause(TAB_SETTLE).await?;

        if let Some(acl) = &misc.acl_file {
            let path = files::create_acl_file(Path::new(&acl.acl_file_location), &acl.rules)?;
            let target = UploadTarget::new("acl_file_path", "label[id=\"mqtt_acl_file_path-label\"]");
            upload_file(self.page, &target, &path, self.timeout).await?;
        }

        if let Some(passwords) = &misc.password_file {
            let path = files::create_password_file(
                Path::new(&passwords.password_file_location),
                &passwords.users,
            )?;
            let target = UploadTarget::new("password_file", "label[id=\"mqtt_password_file-label\"]");
            upload_file(self.page, &target, &path, self.timeout).await?;
        }

        if let Some(persistence) = misc.persistence {
            self.switch("persistence", persistence, "persistence").await?;
        }
        if let Some(anonymous) = misc.allow_anonymous {
            self.switch("anonymous_access", anonymous, "anonymous access")
                .await?;
        }

        if let Some(value) = &misc.max_queued_messages {
            fill_visible(self.page, &test_id("input-max_queued_messages"), value, self.timeout)
                .await?;
            info!("Set max queued messages to {}", value);
        }
        if let Some(value) = &misc.maximum_packet_size {
            fill_visible(self.page, &test_id("input-max_packet_size"), value, self.timeout)
                .await?;
            info!("Set max packet size to {}", value);
        }
        Ok(())
    }

    /// Runs every tab for `config`, then saves and applies.
    pub async fn configure_broker(&mut self, config: &BrokerConfig) -> HarnessResult<()> {
        self.configure_basic_settings(config).await?;

        if let Some(security) = &config.security {
            self.configure_security(security).await?;
        }
        if let Some(misc) = &config.miscellaneous {
            self.configure_miscellaneous(misc).await?;
        }

        info!("Saving broker configuration");
        self.page.click(&test_id("button-saveandapply"), true).await?;
        wait_for_spinner(self.page).await
    }
}
