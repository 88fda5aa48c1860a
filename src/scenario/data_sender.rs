use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::lenient;
use super::{CertificateFiles, CertificateSource};

pub const DEFAULT_INSTANCE_NAME: &str = "test_instance";

/// Desired data-to-server instance: one input, one collection timer, one MQTT output.
#[derive(Debug, Clone)]
pub struct DtsConfig {
    pub instance_name: String,
    /// Key the active data configuration was taken from.
    pub data_key: Option<String>,
    pub data: Option<DataConfig>,
    pub collection: CollectionTiming,
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct DataConfig {
    pub name: Option<String>,
    pub data_type: String,
    pub type_settings: TypeSettings,
    pub format_type: String,
    pub format_string: Option<String>,
    pub empty_value: Option<String>,
    pub delimiter: Option<String>,
    pub lua_format_script: Option<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum TypeSettings {
    Mqtt(MqttInputSettings),
    Generic(Map<String, Value>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MqttInputSettings {
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub port: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub keepalive: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub client_id: Option<String>,
    #[serde(rename = "QoS", default, deserialize_with = "lenient::opt_text")]
    pub qos: Option<String>,
    #[serde(default)]
    pub enable_secure_connection: bool,
    #[serde(default)]
    pub secure_connection: Option<SecureConnection>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl MqttInputSettings {
    pub fn certificate_source(&self) -> Option<CertificateSource> {
        if !self.enable_secure_connection {
            return None;
        }
        self.secure_connection.as_ref().map(SecureConnection::source)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecureConnection {
    #[serde(default)]
    pub allow_insecure_connection: bool,
    #[serde(default)]
    pub certificate_files_from_device: bool,
    #[serde(default)]
    pub device_certificates: Option<DtsCertificateFiles>,
    #[serde(default)]
    pub certificate_authority_file: Option<String>,
    #[serde(default)]
    pub client_certificate: Option<String>,
    #[serde(default)]
    pub client_private_keyfile: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DtsCertificateFiles {
    #[serde(default)]
    pub certificate_authority_file: Option<String>,
    #[serde(default)]
    pub client_certificate: Option<String>,
    #[serde(default)]
    pub client_private_keyfile: Option<String>,
}

impl SecureConnection {
    pub fn source(&self) -> CertificateSource {
        if self.certificate_files_from_device {
            let files = self
                .device_certificates
                .as_ref()
                .map(|d| CertificateFiles {
                    ca: d.certificate_authority_file.clone(),
                    cert: d.client_certificate.clone(),
                    key: d.client_private_keyfile.clone(),
                })
                .unwrap_or_default();
            CertificateSource::FromDevice(files)
        } else {
            CertificateSource::Upload(CertificateFiles {
                ca: self.certificate_authority_file.clone(),
                cert: self.client_certificate.clone(),
                key: self.client_private_keyfile.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionTiming {
    Period {
        period: String,
        retry: bool,
        retry_count: String,
        timeout: String,
    },
    Scheduler(SchedulerConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub day_time: String,
    pub interval_type: String,
    pub month_day: Vec<String>,
    pub weekdays: Vec<String>,
    pub force_last_day: bool,
    pub retry: bool,
    pub retry_count: String,
    pub timeout: String,
}

impl SchedulerConfig {
    /// Device-side `day_mode` for the human-readable interval type.
    pub fn day_mode(&self) -> &'static str {
        match self.interval_type.as_str() {
            "Week days" => "week",
            "Month days" => "month",
            _ => "day",
        }
    }
}

impl CollectionTiming {
    pub fn retry(&self) -> bool {
        match self {
            CollectionTiming::Period { retry, .. } => *retry,
            CollectionTiming::Scheduler(s) => s.retry,
        }
    }

    pub fn retry_count(&self) -> &str {
        match self {
            CollectionTiming::Period { retry_count, .. } => retry_count,
            CollectionTiming::Scheduler(s) => &s.retry_count,
        }
    }

    pub fn timeout(&self) -> &str {
        match self {
            CollectionTiming::Period { timeout, .. } => timeout,
            CollectionTiming::Scheduler(s) => &s.timeout,
        }
    }

    pub fn timer(&self) -> &'static str {
        match self {
            CollectionTiming::Period { .. } => "period",
            CollectionTiming::Scheduler(_) => "scheduler",
        }
    }
}

impl Default for CollectionTiming {
    fn default() -> Self {
        CollectionTiming::Period {
            period: "5".to_string(),
            retry: true,
            retry_count: "3".to_string(),
            timeout: "10".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub server_address: String,
    pub port: String,
    pub keepalive: String,
    pub topic: String,
    pub client_id: String,
    pub qos: String,
    pub enable_secure_connection: bool,
    pub secure_connection: Option<SecureConnectionSnapshot>,
    pub use_credentials: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Comparable copy of the output's TLS options.
#[derive(Debug, Clone, PartialEq)]
pub struct SecureConnectionSnapshot {
    pub allow_insecure_connection: bool,
    pub source: CertificateSource,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_address: "test.mosquitto.org".to_string(),
            port: "1883".to_string(),
            keepalive: "30".to_string(),
            topic: "test/topic".to_string(),
            client_id: "test_client".to_string(),
            qos: "2".to_string(),
            enable_secure_connection: false,
            secure_connection: None,
            use_credentials: false,
            username: None,
            password: None,
        }
    }
}

impl ServerConfig {
    pub fn certificate_source(&self) -> Option<&CertificateSource> {
        if !self.enable_secure_connection {
            return None;
        }
        self.secure_connection.as_ref().map(|s| &s.source)
    }
}

#[derive(Deserialize)]
struct RawDataConfig {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    data_type: Option<String>,
    #[serde(default)]
    type_settings: Map<String, Value>,
    #[serde(default)]
    format_type: Option<String>,
    #[serde(default)]
    format_string: Option<String>,
    #[serde(default)]
    empty_value: Option<String>,
    #[serde(default)]
    delimiter: Option<String>,
    #[serde(default)]
    lua_format_script: Option<String>,
    #[serde(default, deserialize_with = "lenient::text_list")]
    values: Vec<String>,
}

#[derive(Deserialize)]
struct RawCollection {
    #[serde(default)]
    timer: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    period: Option<String>,
    #[serde(default)]
    retry: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    retry_count: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    timeout: Option<String>,
    #[serde(default)]
    day_time: Option<String>,
    #[serde(default)]
    interval_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::text_list")]
    month_day: Vec<String>,
    #[serde(default, deserialize_with = "lenient::text_list")]
    weekdays: Vec<String>,
    #[serde(default)]
    force_last_day: bool,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default)]
    server_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    port: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    keepalive: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    client_id: Option<String>,
    #[serde(rename = "QoS", default, deserialize_with = "lenient::opt_text")]
    qos: Option<String>,
    #[serde(default)]
    enable_secure_connection: bool,
    #[serde(default)]
    secure_connection: Option<SecureConnection>,
    #[serde(default)]
    use_credentials: bool,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    username: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    password: Option<String>,
}

/// Device plugin identifier for a UI data type name.
pub fn plugin_name(data_type: &str) -> String {
    match data_type.to_lowercase().as_str() {
        "impulse counter" | "impulse_counter" => "impulse_counter".to_string(),
        "lua script" => "lua".to_string(),
        "mobile usage" => "mdcollect".to_string(),
        "mnf info" => "mnfinfo".to_string(),
        "modbus alarms" => "modbus_alarm".to_string(),
        "wifi scanner" => "wifiscan".to_string(),
        other => other.to_string(),
    }
}

fn sorted_prefixed<'a>(tree: &'a Map<String, Value>, prefix: &str) -> Vec<&'a String> {
    let dashed = format!("{}-", prefix);
    let mut keys: Vec<&String> = tree.keys().filter(|k| k.starts_with(&dashed)).collect();
    keys.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    keys
}

/// Picks the active data configuration key.
///
/// A `data_config-<type>` entry matching the `type` declared by the plain
/// `data_config` wins (exact case first, then case-insensitive); otherwise
/// the plain `data_config`; otherwise the shortest `data_config-*` key.
pub fn select_data_config_key(tree: &Map<String, Value>) -> Option<String> {
    let prefixed = sorted_prefixed(tree, "data_config");
    let declared = tree
        .get("data_config")
        .and_then(|d| d.get("type"))
        .and_then(Value::as_str);

    if let Some(declared) = declared {
        let exact = format!("data_config-{}", declared);
        if tree.contains_key(&exact) {
            return Some(exact);
        }
        if let Some(key) = prefixed.iter().find(|k| {
            k.split_once('-')
                .map(|(_, suffix)| suffix.eq_ignore_ascii_case(declared))
                .unwrap_or(false)
        }) {
            return Some((*key).clone());
        }
    }

    if tree.contains_key("data_config") {
        return Some("data_config".to_string());
    }

    prefixed.first().map(|k| (*k).clone())
}

/// Plain key first, then the shortest prefixed variant.
pub fn select_prefixed_key(tree: &Map<String, Value>, prefix: &str) -> Option<String> {
    if tree.contains_key(prefix) {
        return Some(prefix.to_string());
    }
    sorted_prefixed(tree, prefix).first().map(|k| (*k).clone())
}

impl DtsConfig {
    pub fn from_tree(tree: &Value) -> Result<Self> {
        let tree = tree
            .as_object()
            .ok_or_else(|| anyhow!("data-to-server configuration must be a JSON object"))?;

        let instance_name = tree
            .get("instanceName")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_INSTANCE_NAME)
            .to_string();

        let data_key = select_data_config_key(tree);
        let data = match &data_key {
            Some(key) => Some(Self::parse_data(tree, key)?),
            None => None,
        };
        debug!("Active data configuration key: {:?}", data_key);

        let collection = match select_prefixed_key(tree, "collection_config") {
            Some(key) => Self::parse_collection(&key, &tree[&key])?,
            None => CollectionTiming::default(),
        };

        let server = match select_prefixed_key(tree, "server_config") {
            Some(key) => Self::parse_server(&tree[&key])
                .with_context(|| format!("Invalid {}", key))?,
            None => Self::legacy_server(tree),
        };

        Ok(Self {
            instance_name,
            data_key,
            data,
            collection,
            server,
        })
    }

    fn parse_data(tree: &Map<String, Value>, key: &str) -> Result<DataConfig> {
        let raw: RawDataConfig = serde_json::from_value(tree[key].clone())
            .with_context(|| format!("Invalid {}", key))?;

        let data_type = raw
            .data_type
            .or_else(|| {
                tree.get("data_config")
                    .and_then(|d| d.get("type"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .or_else(|| key.split_once('-').map(|(_, suffix)| suffix.to_string()))
            .unwrap_or_else(|| "Base".to_string());

        let type_settings = if data_type.eq_ignore_ascii_case("mqtt") {
            TypeSettings::Mqtt(
                serde_json::from_value(Value::Object(raw.type_settings))
                    .with_context(|| format!("Invalid MQTT type_settings in {}", key))?,
            )
        } else {
            TypeSettings::Generic(raw.type_settings)
        };

        Ok(DataConfig {
            name: raw.name,
            data_type,
            type_settings,
            format_type: raw.format_type.unwrap_or_else(|| "JSON".to_string()),
            format_string: raw.format_string,
            empty_value: raw.empty_value,
            delimiter: raw.delimiter,
            lua_format_script: raw.lua_format_script,
            values: raw.values,
        })
    }

    fn parse_collection(key: &str, value: &Value) -> Result<CollectionTiming> {
        let raw: RawCollection =
            serde_json::from_value(value.clone()).with_context(|| format!("Invalid {}", key))?;
        let defaults = CollectionTiming::default();

        let is_scheduler = raw.timer.as_deref() == Some("scheduler")
            || key.ends_with("-scheduler")
            || raw.day_time.is_some();

        let retry = raw.retry.unwrap_or(defaults.retry());
        let retry_count = raw
            .retry_count
            .unwrap_or_else(|| defaults.retry_count().to_string());
        let timeout = raw.timeout.unwrap_or_else(|| defaults.timeout().to_string());

        if is_scheduler {
            Ok(CollectionTiming::Scheduler(SchedulerConfig {
                day_time: raw.day_time.unwrap_or_default(),
                interval_type: raw.interval_type.unwrap_or_else(|| "Day".to_string()),
                month_day: raw.month_day,
                weekdays: raw.weekdays,
                force_last_day: raw.force_last_day,
                retry,
                retry_count,
                timeout,
            }))
        } else {
            Ok(CollectionTiming::Period {
                period: raw.period.unwrap_or_else(|| "5".to_string()),
                retry,
                retry_count,
                timeout,
            })
        }
    }

    fn parse_server(value: &Value) -> Result<ServerConfig> {
        let raw: RawServer = serde_json::from_value(value.clone())?;
        let defaults = ServerConfig::default();

        Ok(ServerConfig {
            server_address: raw.server_address.unwrap_or(defaults.server_address),
            port: raw.port.unwrap_or(defaults.port),
            keepalive: raw.keepalive.unwrap_or(defaults.keepalive),
            topic: raw.topic.unwrap_or(defaults.topic),
            client_id: raw.client_id.unwrap_or(defaults.client_id),
            qos: raw.qos.unwrap_or(defaults.qos),
            enable_secure_connection: raw.enable_secure_connection,
            secure_connection: raw.secure_connection.map(|s| SecureConnectionSnapshot {
                allow_insecure_connection: s.allow_insecure_connection,
                source: s.source(),
            }),
            use_credentials: raw.use_credentials,
            username: raw.username,
            password: raw.password,
        })
    }

    fn legacy_server(tree: &Map<String, Value>) -> ServerConfig {
        let mut server = ServerConfig::default();
        let text = |key: &str| tree.get(key).and_then(Value::as_str).map(str::to_string);

        if let (Some(host), Some(topic), Some(client_id)) =
            (text("mqttServer"), text("mqttTopic"), text("clientID"))
        {
            server.server_address = host;
            server.topic = topic;
            server.client_id = client_id;
        }
        server
    }

    /// The data configuration to apply, with a Base/JSON default when none is given.
    pub fn data_or_default(&self) -> DataConfig {
        self.data.clone().unwrap_or_else(|| DataConfig {
            name: None,
            data_type: "Base".to_string(),
            type_settings: TypeSettings::Generic(Map::new()),
            format_type: "JSON".to_string(),
            format_string: None,
            empty_value: None,
            delimiter: None,
            lua_format_script: None,
            values: ["time", "local_time", "fw", "name", "id"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
    }
}

impl DataConfig {
    pub fn plugin(&self) -> String {
        plugin_name(&self.data_type)
    }

    pub fn mqtt_settings(&self) -> Option<&MqttInputSettings> {
        match &self.type_settings {
            TypeSettings::Mqtt(settings) => Some(settings),
            TypeSettings::Generic(_) => None,
        }
    }

    pub fn generic_settings(&self) -> Option<&Map<String, Value>> {
        match &self.type_settings {
            TypeSettings::Generic(map) => Some(map),
            TypeSettings::Mqtt(_) => None,
        }
    }

    /// Format identifier used by the device (`json`, `custom`, `lua`).
    pub fn device_format(&self) -> String {
        match self.format_type.to_lowercase().as_str() {
            "lua script" => "lua".to_string(),
            other => other.to_string(),
        }
    }
}
