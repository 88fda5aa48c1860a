//! Device-side option names for a data-to-server input.
//!
//! The SSH and API channels write the same options, one through `uci` and
//! one as JSON fields, so both build them here.

use serde_json::{Map, Value};

use crate::scenario::base_name;
use crate::scenario::lenient::{value_text as text, value_texts as texts, value_truthy as truthy};
use crate::scenario::data_sender::{DataConfig, MqttInputSettings};
use crate::scenario::{CertificateFiles, CertificateSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Single(String),
    List(Vec<String>),
}

impl OptionValue {
    pub fn to_json(&self) -> Value {
        match self {
            OptionValue::Single(s) => Value::String(s.clone()),
            OptionValue::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

/// Ordered option list. Setting a key twice replaces the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceOptions {
    entries: Vec<(String, OptionValue)>,
}

impl DeviceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&mut self, key: &str, value: OptionValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.put(key, OptionValue::Single(value.into()));
    }

    pub fn set_list(&mut self, key: &str, values: Vec<String>) {
        self.put(key, OptionValue::List(values));
    }

    pub fn set_flag(&mut self, key: &str, on: bool) {
        self.set(key, if on { "1" } else { "0" });
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn single(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(OptionValue::Single(s)) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: DeviceOptions) {
        for (key, value) in other.entries {
            self.put(&key, value);
        }
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

/// Maps a UI pin label such as `Input (3)` to its device name.
pub fn impulse_pin(label: &str) -> String {
    match label {
        "Input (3)" => "din1",
        "Input (4)" => "din2",
        "Output (3)" => "dout1",
        "Output (4)" => "dout2",
        other => other,
    }
    .to_string()
}

/// Digits of a SIM label, e.g. `SIM 2` -> `2`.
pub fn sim_number(label: &str) -> String {
    label.chars().filter(char::is_ascii_digit).collect()
}

/// Type-specific options for every input type except MQTT and Lua script.
pub fn type_options(plugin: &str, settings: &Map<String, Value>) -> DeviceOptions {
    let mut options = DeviceOptions::new();
    let get = |key: &str| settings.get(key);
    let filtering = get("data_filtering")
        .and_then(text)
        .map(|f| f.to_lowercase())
        .unwrap_or_default();

    match plugin {
        "bluetooth" => {
            if filtering.contains("mac") {
                options.set("bl_filter", "mac");
            } else if filtering.contains("name") {
                options.set("bl_filter", "name");
            }
            if let Some(v) = get("MAC_address") {
                options.set_list("bl_filter_mac", texts(v));
            }
            if let Some(v) = get("device_name") {
                options.set_list("bl_filter_name", texts(v));
            }
            if let Some(v) = get("segment_count").and_then(text) {
                options.set("bl_segments", v);
            }
            if let Some(v) = get("send_as_object") {
                options.set_flag("bl_object", truthy(v));
            }
        }
        "impulse_counter" => {
            if filtering.contains("pin") {
                options.set("impulse_counter_filter", "pin");
            }
            if let Some(v) = get("impulse_counter_pin") {
                let pins = texts(v).iter().map(|p| impulse_pin(p)).collect();
                options.set_list("impulse_counter_filter_pin", pins);
            }
            if let Some(v) = get("invert_filter") {
                options.set_flag("impulse_counter_filter_invert", truthy(v));
            }
            if let Some(v) = get("max_segment_count").and_then(text) {
                options.set("impulse_counter_segments", v);
            }
            if let Some(v) = get("send_as_object") {
                options.set_flag("impulse_counter_object", truthy(v));
            }
        }
        "mdcollect" => {
            if let Some(v) = get("data_period").and_then(text) {
                options.set("mdc_period", v.to_lowercase());
            }
            if let Some(v) = get("current") {
                options.set_flag("mdc_current", truthy(v));
            }
            if let Some(v) = get("SIM_number").and_then(text) {
                options.set("mdc_sim", sim_number(&v));
            }
        }
        "modbus" => {
            if filtering.contains("server") && filtering.contains("ip") {
                options.set("modbus_filter", "ip");
            } else if filtering.contains("server") && filtering.contains("id") {
                options.set("modbus_filter", "id");
            } else if filtering.contains("request") {
                options.set("modbus_filter", "name");
            }
            if let Some(v) = get("server_ip") {
                options.set_list("modbus_filter_server_ip", texts(v));
            }
            if let Some(v) = get("server_id") {
                options.set_list("modbus_filter_server_id", texts(v));
            }
            if let Some(v) = get("request_name") {
                options.set_list("modbus_filter_request", texts(v));
            }
            if let Some(v) = get("segment_count").and_then(text) {
                options.set("modbus_segments", v);
            }
            if let Some(v) = get("send_as_object") {
                options.set_flag("modbus_object", truthy(v));
            }
        }
        "modbus_alarm" => {
            if filtering.contains("server") && filtering.contains("id") {
                options.set("modbus_alarm_filter", "server_id");
            }
            if let Some(v) = get("server_id") {
                options.set_list("modbus_alarm_filter_server_id", texts(v));
            }
            if let Some(v) = get("alarm_id") {
                options.set_list("modbus_alarm_filter_alarm_id", texts(v));
            }
            if let Some(v) = get("register_number") {
                options.set_list("modbus_alarm_filter_register", texts(v));
            }
        }
        "wifiscan" => {
            if filtering.contains("signal") {
                options.set("wifi_filter", "signal");
            } else if filtering.contains("mac") {
                options.set("wifi_filter", "mac");
            } else if filtering.contains("name") {
                options.set("wifi_filter", "name");
            }
            if let Some(v) = get("signal_strength") {
                let range = texts(v);
                if range.len() >= 2 {
                    let mut signal = range[..2].to_vec();
                    signal.extend(["-10".to_string(), "-1".to_string()]);
                    options.set_list("wifi_filter_signal", signal);
                }
            }
            if let Some(v) = get("MAC_address").or_else(|| get("mac_address")) {
                options.set_list("wifi_filter_mac", texts(v));
            }
            if let Some(v) = get("hostname") {
                options.set_list("wifi_filter_name", texts(v));
            }
            if let Some(v) = get("segment_count").and_then(text) {
                options.set("wifi_segments", v);
            }
            if let Some(v) = get("send_as_object") {
                options.set_flag("wifi_object", truthy(v));
            }
        }
        _ => {}
    }
    options
}

/// Plugin, format and member options shared by every input type.
pub fn input_base_options(data: &DataConfig) -> DeviceOptions {
    let mut options = DeviceOptions::new();
    options.set("plugin", data.plugin());

    let format = data.device_format();
    options.set("format", format.as_str());
    match format.as_str() {
        "custom" => {
            if let Some(v) = &data.format_string {
                options.set("format_str", v.as_str());
            }
            if let Some(v) = &data.empty_value {
                options.set("na_str", v.as_str());
            }
            if let Some(v) = &data.delimiter {
                options.set("delimiter", v.as_str());
            }
        }
        "lua" => {
            if let Some(v) = &data.lua_format_script {
                options.set("format_script", v.as_str());
            }
        }
        _ => {}
    }

    options.set_list("members", data.values.clone());
    options
}

/// Certificate paths as the device stores them after a UI upload.
pub fn device_store_paths(files: &CertificateFiles) -> CertificateFiles {
    CertificateFiles {
        ca: files
            .ca
            .as_deref()
            .map(|p| format!("/etc/certificates/{}", base_name(p))),
        cert: files
            .cert
            .as_deref()
            .map(|p| format!("/etc/ssl/certs/{}", base_name(p))),
        key: files
            .key
            .as_deref()
            .map(|p| format!("/etc/certificates/{}", base_name(p))),
    }
}

/// `mqtt_in_*` options. `paths` are the certificate paths to reference,
/// already resolved by the channel.
pub fn mqtt_input_options(
    settings: &MqttInputSettings,
    paths: Option<&CertificateFiles>,
) -> DeviceOptions {
    let mut options = DeviceOptions::new();
    let fields = [
        ("mqtt_in_host", &settings.server_address),
        ("mqtt_in_port", &settings.port),
        ("mqtt_in_keepalive", &settings.keepalive),
        ("mqtt_in_topic", &settings.topic),
        ("mqtt_in_client_id", &settings.client_id),
        ("mqtt_in_qos", &settings.qos),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            options.set(key, value.as_str());
        }
    }

    options.set_flag("mqtt_in_tls", settings.enable_secure_connection);
    if let Some(source) = settings.certificate_source() {
        let insecure = settings
            .secure_connection
            .as_ref()
            .map(|s| s.allow_insecure_connection)
            .unwrap_or(false);
        options.set_flag("mqtt_in_insecure", insecure);
        options.set("mqtt_in_tls_type", "cert");
        options.set_flag(
            "mqtt_device_files",
            matches!(source, CertificateSource::FromDevice(_)),
        );
        if let Some(paths) = paths {
            let slots = [
                ("mqtt_in_cafile", &paths.ca),
                ("mqtt_in_certfile", &paths.cert),
                ("mqtt_in_keyfile", &paths.key),
            ];
            for (key, path) in slots {
                if let Some(path) = path {
                    options.set(key, path.as_str());
                }
            }
        }
    }

    if let Some((username, password)) = settings.credentials() {
        options.set("mqtt_in_username", username);
        options.set("mqtt_in_password", password);
    }
    options
}
