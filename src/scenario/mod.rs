pub mod broker;
pub mod data_sender;
pub mod lenient;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::DeviceConfig;

pub use broker::BrokerConfig;
pub use data_sender::DtsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioKind {
    MqttBroker,
    DataToServer,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::MqttBroker => "mqtt_broker",
            ScenarioKind::DataToServer => "data_to_server",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum ScenarioConfig {
    Broker(BrokerConfig),
    DataToServer(DtsConfig),
}

/// A loaded, typed scenario. Read-only for the whole run.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub kind: ScenarioKind,
    pub config: ScenarioConfig,
}

impl Scenario {
    pub fn broker(&self) -> Option<&BrokerConfig> {
        match &self.config {
            ScenarioConfig::Broker(config) => Some(config),
            ScenarioConfig::DataToServer(_) => None,
        }
    }

    pub fn data_sender(&self) -> Option<&DtsConfig> {
        match &self.config {
            ScenarioConfig::DataToServer(config) => Some(config),
            ScenarioConfig::Broker(_) => None,
        }
    }

    /// Parses a scenario document. The configuration tree is read from
    /// `config` when present, otherwise from the document root.
    pub fn from_json(fallback_name: &str, kind: ScenarioKind, document: &Value) -> Result<Self> {
        let name = document
            .get("scenario_name")
            .and_then(Value::as_str)
            .unwrap_or(fallback_name)
            .to_string();
        let description = document
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        let tree = match document.get("config") {
            Some(config @ Value::Object(_)) => config.clone(),
            _ => document.clone(),
        };

        let config = match kind {
            ScenarioKind::MqttBroker => ScenarioConfig::Broker(
                BrokerConfig::deserialize(&tree)
                    .with_context(|| format!("Invalid MQTT broker scenario '{}'", name))?,
            ),
            ScenarioKind::DataToServer => ScenarioConfig::DataToServer(
                DtsConfig::from_tree(&tree)
                    .with_context(|| format!("Invalid data-to-server scenario '{}'", name))?,
            ),
        };

        Ok(Self {
            name,
            description,
            kind,
            config,
        })
    }

    pub fn load_from_file(path: &Path, kind: ScenarioKind) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {:?}", path))?;
        let document: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scenario file: {:?}", path))?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scenario");
        Self::from_json(stem, kind, &document)
    }
}

/// Loads every scenario named by the device configuration, broker list first.
/// Scenarios that fail to load are logged and skipped.
pub fn load_scenarios(device: &DeviceConfig, scenario_dir: &Path) -> Vec<Scenario> {
    let named = device
        .mqtt_scenarios
        .iter()
        .map(|n| (n, ScenarioKind::MqttBroker))
        .chain(
            device
                .dts_scenarios
                .iter()
                .map(|n| (n, ScenarioKind::DataToServer)),
        );

    let mut scenarios = Vec::new();
    for (name, kind) in named {
        let path = scenario_dir.join(format!("{}.json", name));
        match Scenario::load_from_file(&path, kind) {
            Ok(scenario) => {
                info!("Loaded {} scenario: {}", kind, scenario.name);
                scenarios.push(scenario);
            }
            Err(e) => error!("Failed to load scenario {}: {:#}", name, e),
        }
    }

    if scenarios.is_empty() {
        warn!("No scenarios loaded from {:?}", scenario_dir);
    }
    scenarios
}

/// File names for a certificate bundle. Any member may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateFiles {
    pub ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
}

impl CertificateFiles {
    pub fn is_empty(&self) -> bool {
        self.ca.is_none() && self.cert.is_none() && self.key.is_none()
    }
}

/// Where the TLS material for a connection comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// Files already stored on the device; chosen from UI dropdowns by base name.
    FromDevice(CertificateFiles),
    /// Local files uploaded by the harness.
    Upload(CertificateFiles),
    /// Pre-shared key; no certificate files apply.
    Psk { key: String, identity: String },
}

/// Final path component, accepting both `/` and `\` separators.
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
