//! MQTT broker scenario through each channel.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::options::{device_store_paths, DeviceOptions};
use super::uci;
use crate::api::DeviceApi;
use crate::browser::PageDriver;
use crate::certs::CertificateManager;
use crate::config::DeviceConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::files;
use crate::pages::{BrokerPage, LoginPage};
use crate::scenario::broker::{BrokerConfig, MiscConfig};
use crate::scenario::lenient::{value_text, value_truthy};
use crate::scenario::{CertificateFiles, CertificateSource};
use crate::ssh::RemoteShell;

pub const UCI_SECTION: &str = "mosquitto.mqtt";
pub const API_PATH: &str = "mqtt/broker/config";
const DEFAULT_SECTION_ID: &str = "mqtt";

/// Local files generated for the miscellaneous tab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedFiles {
    pub acl_file: Option<PathBuf>,
    pub password_file: Option<PathBuf>,
}

/// Writes the ACL and password files the scenario asks for.
pub fn generate_misc_files(misc: Option<&MiscConfig>) -> HarnessResult<GeneratedFiles> {
    let mut generated = GeneratedFiles::default();
    let Some(misc) = misc else {
        return Ok(generated);
    };
    if let Some(acl) = &misc.acl_file {
        generated.acl_file = Some(files::create_acl_file(
            Path::new(&acl.acl_file_location),
            &acl.rules,
        )?);
    }
    if let Some(passwords) = &misc.password_file {
        generated.password_file = Some(files::create_password_file(
            Path::new(&passwords.password_file_location),
            &passwords.users,
        )?);
    }
    Ok(generated)
}

/// Certificate paths the SSH and API channels reference for a source.
pub fn certificate_paths(
    source: &CertificateSource,
    certs: &CertificateManager,
) -> HarnessResult<Option<CertificateFiles>> {
    match source {
        CertificateSource::FromDevice(files) => Ok(Some(device_store_paths(files))),
        CertificateSource::Upload(files) if files.is_empty() => Ok(None),
        CertificateSource::Upload(files) => certs
            .prepare_broker_certificates(files)
            .map(Some)
            .map_err(|e| HarnessError::Certificate(format!("{:#}", e))),
        CertificateSource::Psk { .. } => Ok(None),
    }
}

/// Broker options shared by the SSH and API encoders.
pub fn broker_options(
    config: &BrokerConfig,
    certificate_paths: Option<&CertificateFiles>,
    generated: &GeneratedFiles,
) -> DeviceOptions {
    let mut options = DeviceOptions::new();
    options.set("enabled", "1");
    options.set_list("local_port", vec![config.expected_port()]);
    options.set_flag("anonymous_access", config.anonymous_access().unwrap_or(false));
    options.set_flag("allow_ra", config.remote_access.unwrap_or(false));
    options.set_flag("use_tls_ssl", config.tls_enabled());

    if let Some(misc) = &config.miscellaneous {
        if let Some(persistence) = misc.persistence {
            options.set_flag("persistence", persistence);
        }
        if let Some(v) = &misc.max_queued_messages {
            options.set("max_queued_messages", v.as_str());
        }
        if let Some(v) = &misc.maximum_packet_size {
            options.set("max_packet_size", v.as_str());
        }
    }
    if let Some(path) = &generated.acl_file {
        options.set("acl_file_path", path.display().to_string());
    }
    if let Some(path) = &generated.password_file {
        options.set("password_file", path.display().to_string());
    }

    if let Some(certificates) = config.certificates() {
        if certificates.tls_type.is_some() {
            match certificates.source() {
                CertificateSource::Psk { key, identity } => {
                    options.set("tls_type", "psk");
                    options.set("psk", key);
                    options.set("identity", identity);
                }
                _ => {
                    options.set("tls_type", "cert");
                    if let Some(required) = certificates.require_certificate {
                        options.set_flag("require_certificate", required);
                    }
                    if let Some(from_device) = certificates.certificate_files_from_device {
                        options.set_flag("device_sec_files", from_device);
                    }
                }
            }
        }
        if let Some(paths) = certificate_paths {
            let slots = [("ca_file", &paths.ca), ("cert_file", &paths.cert), ("key_file", &paths.key)];
            for (key, path) in slots {
                if let Some(path) = path {
                    options.set(key, path.as_str());
                }
            }
        }
    }

    if let Some(version) = config.tls_version() {
        options.set("tls_version", version.to_lowercase());
    }
    options
}

fn prepare(
    config: &BrokerConfig,
    certs: &CertificateManager,
) -> HarnessResult<(Option<CertificateFiles>, GeneratedFiles)> {
    let paths = match config.certificates() {
        Some(certificates) if certificates.tls_type.is_some() => {
            certificate_paths(&certificates.source(), certs)?
        }
        _ => None,
    };
    let generated = generate_misc_files(config.miscellaneous.as_ref())?;
    Ok((paths, generated))
}

/// Web UI: login, broker page tabs, save, logout.
pub async fn configure_via_gui(
    page: &mut dyn PageDriver,
    device: &DeviceConfig,
    certs: &CertificateManager,
    timeout: Duration,
    config: &BrokerConfig,
) -> HarnessResult<()> {
    LoginPage::new(&mut *page, device, timeout).login().await?;

    let result = async {
        let mut broker = BrokerPage::new(&mut *page, device, certs, timeout);
        broker.navigate().await?;
        broker.configure_broker(config).await
    }
    .await;

    if let Err(e) = LoginPage::new(&mut *page, device, timeout).logout().await {
        warn!("Logout failed: {}", e);
    }
    result
}

/// `uci` commands for the broker section, before commit.
pub fn ssh_commands(options: &DeviceOptions) -> Vec<String> {
    uci::option_commands(UCI_SECTION, options)
}

/// SSH: `uci set` every option, commit, restart and require a running service.
pub async fn configure_via_ssh(
    shell: &mut dyn RemoteShell,
    certs: &CertificateManager,
    config: &BrokerConfig,
) -> HarnessResult<()> {
    let (paths, generated) = prepare(config, certs)?;
    let options = broker_options(config, paths.as_ref(), &generated);

    for command in ssh_commands(&options) {
        shell.execute(&command).await?;
    }
    shell.execute(&uci::commit("mosquitto")).await?;
    info!("Restarting mosquitto");
    shell.execute("/etc/init.d/mosquitto restart").await?;

    let status = shell.execute("/etc/init.d/mosquitto status").await?;
    if !status.contains("running") {
        return Err(HarnessError::ValidationFailed(vec![format!(
            "mosquitto not running after restart: {}",
            status.trim()
        )]));
    }
    info!("Broker configured over SSH");
    Ok(())
}

/// Broker section id from a `mqtt/broker/config` read.
pub fn section_id(current: &Value) -> String {
    let first = match current {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    first
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_SECTION_ID)
        .to_string()
}

/// Checks a broker section read back from the API.
pub fn verify_section(section: &Value, config: &BrokerConfig) -> Vec<String> {
    let mut failures = Vec::new();

    let enabled = section.get("enabled");
    if !matches!(enabled, Some(Value::Bool(true))) && enabled.and_then(Value::as_str) != Some("1") {
        failures.push(format!("broker not enabled (enabled = {:?})", enabled));
    }

    let port = config.expected_port();
    let ports: Vec<String> = match section.get("local_port") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_text)
            .collect(),
        Some(other) => value_text(other).into_iter().collect(),
        None => Vec::new(),
    };
    if !ports.contains(&port) {
        failures.push(format!("port {} not in local_port {:?}", port, ports));
    }

    if let Some(expected) = config.anonymous_access() {
        let actual = section
            .get("anonymous_access")
            .map(value_truthy)
            .unwrap_or(false);
        if actual != expected {
            failures.push(format!(
                "anonymous_access is {}, expected {}",
                actual, expected
            ));
        }
    }
    failures
}

fn find_section<'a>(current: &'a Value, id: &str) -> Option<&'a Value> {
    match current {
        Value::Array(items) => items
            .iter()
            .find(|s| s.get("id").and_then(Value::as_str) == Some(id))
            .or_else(|| items.first()),
        Value::Null => None,
        other => Some(other),
    }
}

/// API: set the broker section, restart mosquitto and read the result back.
pub async fn configure_via_api(
    api: &mut dyn DeviceApi,
    certs: &CertificateManager,
    config: &BrokerConfig,
) -> HarnessResult<()> {
    let current = api.get_config(API_PATH).await?;
    let id = section_id(&current);

    let (paths, generated) = prepare(config, certs)?;
    let mut fields = broker_options(config, paths.as_ref(), &generated).to_json();
    fields.insert("id".to_string(), Value::String(id.clone()));

    info!("Applying broker configuration to section {}", id);
    if let Err(e) = api
        .set_config(API_PATH, json!({ "data": [Value::Object(fields.clone())] }))
        .await
    {
        warn!("Bulk broker update failed ({}), retrying on section endpoint", e);
        fields.remove("id");
        api.set_config(
            &format!("{}/{}", API_PATH, id),
            json!({ "data": Value::Object(fields) }),
        )
        .await?;
    }

    api.restart_service("mosquitto").await?;

    let applied = api.get_config(API_PATH).await?;
    let failures = match find_section(&applied, &id) {
        Some(section) => verify_section(section, config),
        None => vec![format!("broker section {} missing after update", id)],
    };
    if !failures.is_empty() {
        return Err(HarnessError::ValidationFailed(failures));
    }
    info!("Broker configured over API");
    Ok(())
}
