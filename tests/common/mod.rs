#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::Method;
use router_harness::api::DeviceApi;
use router_harness::browser::{PageDriver, WaitState};
use router_harness::config::{DeviceConfig, HarnessSettings};
use router_harness::error::{HarnessError, HarnessResult};
use router_harness::runner::Backends;
use router_harness::scenario::data_sender::ServerConfig;
use router_harness::scenario::{Scenario, ScenarioKind};
use router_harness::ssh::RemoteShell;
use router_harness::validator::MessageProbe;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Device configuration pointing at a router that never answers.
pub fn create_test_device() -> DeviceConfig {
    serde_json::from_value(json!({
        "device": {
            "name": "RUTX11",
            "firmware": "RUTX_R_00.07.06",
            "ip": "192.0.2.1",
            "credentials": {"username": "admin", "password": "admin01"},
            "ssh": {"username": "root", "password": "admin01"}
        },
        "mqtt_scenarios": ["basic"],
        "dts_scenarios": ["dts"]
    }))
    .unwrap()
}

/// Default settings with certificates and results kept in `temp_dir`.
pub fn create_test_settings(temp_dir: &TempDir) -> HarnessSettings {
    let mut settings = HarnessSettings::default();
    settings.output.certificate_dir = temp_dir.path().join("certs");
    settings.output.results_dir = temp_dir.path().join("results");
    settings
}

pub fn broker_scenario(name: &str, config: Value) -> Scenario {
    Scenario::from_json(name, ScenarioKind::MqttBroker, &json!({ "config": config })).unwrap()
}

pub fn dts_scenario(name: &str, config: Value) -> Scenario {
    Scenario::from_json(name, ScenarioKind::DataToServer, &json!({ "config": config })).unwrap()
}

/// Plain broker on 1883 with anonymous access and TLS off.
pub fn plain_broker() -> Value {
    json!({
        "port": 1883,
        "security": {"TLS/SSL": false},
        "miscellaneous": {"allow_anonymous": true}
    })
}

/// MQTT-to-MQTT forwarding towards test.mosquitto.org:1338 with local certificate paths.
pub fn mqtt_forwarding() -> Value {
    json!({
        "instanceName": "harness_dts",
        "data_config": {"type": "MQTT"},
        "data_config-MQTT": {
            "name": "harness_input",
            "type_settings": {
                "server_address": "127.0.0.1",
                "port": 1883,
                "topic": "router/data",
                "QoS": 0
            }
        },
        "collection_config": {"timer": "period", "period": 5},
        "server_config": {
            "server_address": "test.mosquitto.org",
            "port": 1338,
            "topic": "router-harness/out",
            "client_id": "router_harness",
            "QoS": 1,
            "enable_secure_connection": true,
            "secure_connection": {
                "allow_insecure_connection": true,
                "certificate_files_from_device": false,
                "certificate_authority_file": "/etc/certificates/ca.cert.pem",
                "client_certificate": "/etc/certificates/client.cert.pem",
                "client_private_keyfile": "/etc/certificates/client.key.pem"
            }
        }
    })
}

// ---- remote shell ----

/// In-memory `uci` store plus the command log of every session opened on it.
#[derive(Debug)]
pub struct DeviceState {
    pub entries: Vec<(String, String)>,
    pub configs: HashSet<String>,
    pub commands: Vec<String>,
    pub commits: Vec<String>,
    pub broker_service_down: bool,
    pub sessions_closed: usize,
}

impl Default for DeviceState {
    fn default() -> Self {
        let mut state = Self {
            entries: Vec::new(),
            configs: ["mosquitto", "data_sender"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            commands: Vec::new(),
            commits: Vec::new(),
            broker_service_down: false,
            sessions_closed: 0,
        };
        state.put("mosquitto.mqtt", "mosquitto");
        state.put("mosquitto.mqtt.enabled", "0");
        state
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    let inner = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value);
    inner.replace("'\\''", "'")
}

impl DeviceState {
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == path)
            .map(|(_, v)| v.as_str())
    }

    pub fn put(&mut self, path: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == path) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((path.to_string(), value.to_string())),
        }
    }

    fn add_list(&mut self, path: &str, value: &str) {
        let rendered = format!("'{}'", value);
        match self.entries.iter_mut().find(|(k, _)| k == path) {
            Some(entry) => entry.1 = format!("{} {}", entry.1, rendered),
            None => self.entries.push((path.to_string(), rendered)),
        }
    }

    fn delete(&mut self, path: &str) {
        let nested = format!("{}.", path);
        self.entries
            .retain(|(k, _)| k != path && !k.starts_with(&nested));
    }

    fn is_section(path: &str) -> bool {
        path.matches('.').count() == 1
    }

    fn show(&self, path: &str) -> Option<String> {
        let nested = format!("{}.", path);
        let lines: Vec<String> = self
            .entries
            .iter()
            .filter(|(k, _)| k == path || k.starts_with(&nested))
            .map(|(k, v)| {
                if Self::is_section(k) || v.starts_with('\'') {
                    format!("{}={}", k, v)
                } else {
                    format!("{}='{}'", k, v)
                }
            })
            .collect();
        if lines.is_empty() && !self.configs.contains(path) {
            return None;
        }
        Some(lines.join("\n"))
    }

    /// Stores a JSON section body as uci options, the way the device keeps
    /// what its REST API and web UI save.
    pub fn store_section(&mut self, config: &str, id: &str, kind: &str, fields: &Value) {
        self.configs.insert(config.to_string());
        let section = format!("{}.{}", config, id);
        self.put(&section, kind);
        let Some(fields) = fields.as_object() else {
            return;
        };
        for (key, value) in fields {
            if key.starts_with('.') || key == "id" {
                continue;
            }
            let path = format!("{}.{}", section, key);
            match value {
                Value::String(text) => self.put(&path, text),
                Value::Number(number) => self.put(&path, &number.to_string()),
                Value::Array(items) => {
                    self.delete(&path);
                    for item in items {
                        let text = item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string());
                        self.add_list(&path, &text);
                    }
                }
                _ => {}
            }
        }
    }

    /// Removes a data_sender collection with the input and output it references.
    pub fn drop_instance(&mut self, collection: &str) {
        let section = format!("data_sender.{}", collection);
        let linked: Vec<String> = ["output", "input"]
            .iter()
            .filter_map(|key| self.get(&format!("{}.{}", section, key)))
            .map(|id| format!("data_sender.{}", id))
            .collect();
        for path in linked {
            self.delete(&path);
        }
        self.delete(&section);
    }

    /// Number of sections of `kind` in `config`.
    pub fn count_sections(&self, config: &str, kind: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, v)| {
                Self::is_section(k) && k.starts_with(&format!("{}.", config)) && v == kind
            })
            .count()
    }

    fn run(&mut self, command: &str) -> HarnessResult<String> {
        self.commands.push(command.to_string());

        if let Some(path) = command.strip_prefix("uci show ") {
            return self.show(path.trim()).ok_or_else(|| HarnessError::CommandFailed {
                command: command.to_string(),
                output: "uci: Entry not found".to_string(),
            });
        }
        if let Some(rest) = command.strip_prefix("uci set ") {
            let (path, value) = rest.split_once('=').unwrap_or((rest, ""));
            self.put(path, &unquote(value));
            return Ok(String::new());
        }
        if let Some(rest) = command.strip_prefix("uci add_list ") {
            let (path, value) = rest.split_once('=').unwrap_or((rest, ""));
            self.add_list(path, &unquote(value));
            return Ok(String::new());
        }
        if let Some(rest) = command.strip_prefix("uci -q delete ") {
            let path = rest.split_whitespace().next().unwrap_or_default();
            self.delete(path);
            return Ok(String::new());
        }
        if let Some(config) = command.strip_prefix("uci commit ") {
            self.commits.push(config.trim().to_string());
            return Ok(String::new());
        }
        if command == "/etc/init.d/mosquitto status" {
            return Ok(if self.broker_service_down {
                "inactive".to_string()
            } else {
                "running".to_string()
            });
        }
        if command == "ps | grep mosquitto" {
            let mut listing = String::new();
            if self.get("mosquitto.mqtt.enabled") == Some("1") && !self.broker_service_down {
                listing.push_str(" 2101 root  3012 S    /usr/sbin/mosquitto -c /var/etc/mosquitto.conf\n");
            }
            listing.push_str(" 2188 root  1104 S    grep mosquitto");
            return Ok(listing);
        }
        Ok(String::new())
    }
}

pub struct FakeShell {
    pub state: Arc<Mutex<DeviceState>>,
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn execute(&mut self, command: &str) -> HarnessResult<String> {
        self.state.lock().unwrap().run(command)
    }

    async fn close(&mut self) -> HarnessResult<()> {
        self.state.lock().unwrap().sessions_closed += 1;
        Ok(())
    }
}

// ---- device API ----

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<Value>,
}

#[derive(Debug)]
pub struct ApiState {
    pub broker: Value,
    pub collections: Vec<Value>,
    pub requests: Vec<RecordedRequest>,
    pub uploads: Vec<(String, String, String)>,
    /// uci store the device keeps behind its API.
    pub device: Option<Arc<Mutex<DeviceState>>>,
    next_collection: u32,
}

impl Default for ApiState {
    fn default() -> Self {
        Self {
            broker: json!({"id": "mqtt", "enabled": "0", "local_port": ["1883"]}),
            collections: Vec::new(),
            requests: Vec::new(),
            uploads: Vec::new(),
            device: None,
            next_collection: 1,
        }
    }
}

const COLLECTIONS: &str = "data_to_server/collections/config";

fn merge(target: &mut Value, fields: &Value) {
    if let (Some(target), Some(fields)) = (target.as_object_mut(), fields.as_object()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl ApiState {
    fn with_device(&self, apply: impl FnOnce(&mut DeviceState)) {
        if let Some(device) = &self.device {
            apply(&mut device.lock().unwrap());
        }
    }

    fn store_broker(&self) {
        self.with_device(|d| d.store_section("mosquitto", "mqtt", "mosquitto", &self.broker));
    }

    /// `{collection}`, `{collection}/servers/{id}` or `{collection}/data/{id}`.
    fn store_collection_part(&self, rest: &str, data: &Value) {
        let parts: Vec<&str> = rest.split('/').collect();
        self.with_device(|d| match parts.as_slice() {
            [collection] => d.store_section("data_sender", collection, "collection", data),
            [collection, "servers", id] => {
                d.store_section("data_sender", id, "output", data);
                d.put(&format!("data_sender.{}.output", collection), id);
            }
            [collection, "data", id] => {
                d.store_section("data_sender", id, "input", data);
                d.put(&format!("data_sender.{}.input", collection), id);
            }
            _ => {}
        });
    }

    /// Requests sent as entries of `bulk` calls, flattened.
    pub fn bulk_entries(&self) -> Vec<Value> {
        self.requests
            .iter()
            .filter(|r| r.endpoint == "bulk")
            .filter_map(|r| r.body.as_ref())
            .filter_map(|b| b.get("data").and_then(Value::as_array))
            .flatten()
            .cloned()
            .collect()
    }

    fn handle(&mut self, method: &Method, endpoint: &str, body: Option<&Value>) -> Value {
        let endpoint = endpoint.trim_start_matches('/').trim_start_matches("api/");
        let data = body.and_then(|b| b.get("data")).cloned().unwrap_or(Value::Null);

        match (method.as_str(), endpoint) {
            ("GET", "mqtt/broker/config") => json!({ "data": [self.broker.clone()] }),
            ("PUT", "mqtt/broker/config") => {
                if let Some(fields) = data.as_array().and_then(|items| items.first()) {
                    merge(&mut self.broker, fields);
                }
                self.store_broker();
                json!({ "success": true })
            }
            ("PUT", path) if path.starts_with("mqtt/broker/config/") => {
                merge(&mut self.broker, &data);
                self.store_broker();
                json!({ "success": true })
            }
            ("POST", path) if path.starts_with("services/") => json!({ "success": true }),
            ("GET", COLLECTIONS) => json!({ "data": self.collections.clone() }),
            ("POST", COLLECTIONS) => {
                let id = self.next_collection;
                self.next_collection += 3;
                let mut collection = json!({ "id": id.to_string() });
                merge(&mut collection, &data);
                self.collections.push(collection);
                json!({ "data": { "id": id.to_string() } })
            }
            ("DELETE", COLLECTIONS) => {
                let ids: Vec<Value> = data.as_array().cloned().unwrap_or_default();
                self.collections
                    .retain(|c| !ids.contains(c.get("id").unwrap_or(&Value::Null)));
                self.with_device(|d| {
                    for id in ids.iter().filter_map(Value::as_str) {
                        d.drop_instance(id);
                    }
                });
                json!({ "success": true })
            }
            ("POST", "bulk") => {
                let entries = data.as_array().cloned().unwrap_or_default();
                let results: Vec<Value> = entries
                    .iter()
                    .map(|entry| {
                        let method = entry
                            .get("method")
                            .and_then(Value::as_str)
                            .and_then(|m| m.parse::<Method>().ok())
                            .unwrap_or(Method::GET);
                        let endpoint = entry.get("endpoint").and_then(Value::as_str).unwrap_or("");
                        let payload = entry.get("data").map(|d| json!({ "data": d }));
                        let response = self.handle(&method, endpoint, payload.as_ref());
                        json!({
                            "success": true,
                            "data": response.get("data").cloned().unwrap_or(json!([]))
                        })
                    })
                    .collect();
                json!({ "data": results })
            }
            ("PUT", path) if path.starts_with(COLLECTIONS) => {
                let rest = path[COLLECTIONS.len()..].trim_start_matches('/');
                self.store_collection_part(rest, &data);
                if !rest.contains('/') {
                    if let Some(collection) = self
                        .collections
                        .iter_mut()
                        .find(|c| c.get("id").and_then(Value::as_str) == Some(rest))
                    {
                        merge(collection, &data);
                    }
                }
                json!({ "success": true, "data": data })
            }
            _ => json!({ "data": [] }),
        }
    }
}

pub struct FakeApi {
    pub state: Arc<Mutex<ApiState>>,
}

#[async_trait]
impl DeviceApi for FakeApi {
    async fn request(
        &mut self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> HarnessResult<Value> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(RecordedRequest {
            method: method.clone(),
            endpoint: endpoint.to_string(),
            body: body.clone(),
        });
        Ok(state.handle(&method, endpoint, body.as_ref()))
    }

    async fn upload(
        &mut self,
        endpoint: &str,
        option: &str,
        file_name: &str,
        _content: Vec<u8>,
    ) -> HarnessResult<Value> {
        self.state.lock().unwrap().uploads.push((
            endpoint.to_string(),
            option.to_string(),
            file_name.to_string(),
        ));
        Ok(json!({ "data": {} }))
    }

    fn restart_grace(&self) -> Duration {
        Duration::ZERO
    }
}

// ---- web UI ----

/// DOM stand-in. Every selector exists unless it contains one of `absent`.
#[derive(Debug)]
pub struct PageState {
    pub url: String,
    pub visits: Vec<String>,
    pub values: HashMap<String, String>,
    pub checked: HashMap<String, bool>,
    pub labels: HashMap<String, String>,
    pub absent: Vec<String>,
    pub clicks: Vec<String>,
    pub options: Vec<String>,
    pub uploads: Vec<(String, PathBuf)>,
    pub reject_login: bool,
    pub closed: bool,
    /// Option picked per dropdown.
    pub selected: HashMap<String, String>,
    /// uci store the device writes when a page is saved.
    pub device: Option<Arc<Mutex<DeviceState>>>,
    focused: Option<String>,
    selected_all: bool,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            url: String::new(),
            visits: Vec::new(),
            values: HashMap::new(),
            checked: HashMap::new(),
            labels: HashMap::new(),
            absent: vec![
                ".loading-spinner".to_string(),
                "button-delete".to_string(),
            ],
            clicks: Vec::new(),
            options: Vec::new(),
            uploads: Vec::new(),
            reject_login: false,
            closed: false,
            selected: HashMap::new(),
            device: None,
            focused: None,
            selected_all: false,
        }
    }
}

const BROKER_PAGE: &str = "services/mqtt/broker";
const DATA_SENDER_PAGE: &str = "services/data_sender";
const BROKER_SAVE: &str = "button-saveandapply";
const WIZARD_NEXT: &str = "div[test-id=\"modal-container\"] button[test-id=\"button-next\"]";
const SERVER_SECTION: &str = "#section-server-configuration";

const BROKER_SWITCH_PREFIX: &str = "[id=\"mosquitto.mqtt.mqtt.mqtt_";
const MODAL_SWITCH_SUFFIX: &str = " >> div[tabindex=\"0\"]";

impl PageState {
    /// State element a switch control toggles, if `control` is a switch.
    fn switch_state(control: &str) -> Option<String> {
        if let Some(key) = control
            .strip_prefix(BROKER_SWITCH_PREFIX)
            .and_then(|rest| rest.strip_suffix("\"]"))
        {
            return Some(format!("div[test-id=\"switch-{}\"]", key));
        }
        control.strip_suffix(MODAL_SWITCH_SUFFIX).map(str::to_string)
    }

    pub fn is_checked(&self, state: &str) -> bool {
        self.checked.get(state).copied().unwrap_or(false)
    }

    pub fn clicked(&self, fragment: &str) -> bool {
        self.clicks.iter().any(|c| c.contains(fragment))
    }

    fn flag(&self, switch: &str) -> &'static str {
        if self.is_checked(&format!("div[test-id=\"switch-{}\"]", switch)) {
            "1"
        } else {
            "0"
        }
    }

    /// Broker form as the device stores it after save and apply.
    fn save_broker(&self) {
        let Some(device) = &self.device else {
            return;
        };
        let mut fields = json!({
            "enabled": self.flag("enabled"),
            "anonymous_access": self.flag("anonymous_access"),
            "use_tls_ssl": self.flag("use_tls_ssl"),
        });
        if let Some(port) = self.values.get("[test-id=\"input-local_port_0\"]") {
            fields["local_port"] = json!([port]);
        }
        device
            .lock()
            .unwrap()
            .store_section("mosquitto", "mqtt", "mosquitto", &fields);
    }

    /// Data to Server wizard as the device stores it; each step saves.
    fn save_instance(&self) {
        let (Some(device), Some(name)) = (&self.device, self.values.get("[test-id=\"input-name\"]"))
        else {
            return;
        };
        let server = |input: &str| {
            self.values
                .get(&format!("{} [test-id=\"{}\"]", SERVER_SECTION, input))
                .cloned()
                .unwrap_or_default()
        };
        let qos = self
            .selected
            .get(&format!("{} [test-id=\"input-mqtt_qos\"]", SERVER_SECTION))
            .cloned()
            .unwrap_or_default();
        let timer = if self.clicked("selectoption-scheduler") {
            "scheduler"
        } else {
            "period"
        };

        let mut device = device.lock().unwrap();
        device.store_section(
            "data_sender",
            "gui1",
            "collection",
            &json!({"name": name, "enabled": "1", "timer": timer, "output": "gui2", "input": "gui3"}),
        );
        device.store_section(
            "data_sender",
            "gui2",
            "output",
            &json!({
                "mqtt_host": server("input-mqtt_host"),
                "mqtt_topic": server("input-mqtt_topic"),
                "mqtt_client_id": server("input-mqtt_client_id"),
                "mqtt_qos": qos,
            }),
        );
        device.store_section("data_sender", "gui3", "input", &json!({}));
    }
}

pub struct FakePage {
    pub state: Arc<Mutex<PageState>>,
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&mut self, url: &str) -> HarnessResult<()> {
        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.visits.push(url.to_string());
        Ok(())
    }

    async fn wait_for(
        &mut self,
        selector: &str,
        _state: WaitState,
        _timeout: Duration,
    ) -> HarnessResult<()> {
        let state = self.state.lock().unwrap();
        if state.absent.iter().any(|a| selector.contains(a.as_str())) {
            return Err(HarnessError::element(selector));
        }
        Ok(())
    }

    async fn wait_for_url(&mut self, fragment: &str, timeout: Duration) -> HarnessResult<()> {
        let state = self.state.lock().unwrap();
        if state.reject_login {
            return Err(HarnessError::timeout(fragment, timeout));
        }
        Ok(())
    }

    async fn click(&mut self, selector: &str, _force: bool) -> HarnessResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.absent.iter().any(|a| selector.contains(a.as_str())) {
            return Err(HarnessError::element(selector));
        }
        state.clicks.push(selector.to_string());
        state.focused = Some(selector.to_string());
        state.selected_all = false;
        if let Some(target) = PageState::switch_state(selector) {
            let on = state.is_checked(&target);
            state.checked.insert(target, !on);
        }
        if selector.contains(BROKER_SAVE) && state.url.ends_with(BROKER_PAGE) {
            state.save_broker();
        }
        if selector == WIZARD_NEXT && state.url.ends_with(DATA_SENDER_PAGE) {
            state.save_instance();
        }
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> HarnessResult<()> {
        self.state
            .lock()
            .unwrap()
            .values
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn press(&mut self, key: &str) -> HarnessResult<()> {
        let mut state = self.state.lock().unwrap();
        match key {
            "ControlOrMeta+A" => state.selected_all = true,
            "Backspace" if state.selected_all => {
                if let Some(focused) = state.focused.clone() {
                    state.values.insert(focused, String::new());
                }
                state.selected_all = false;
            }
            _ => {}
        }
        Ok(())
    }

    async fn type_text(&mut self, text: &str) -> HarnessResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(focused) = state.focused.clone() {
            state.values.entry(focused).or_default().push_str(text);
        }
        Ok(())
    }

    async fn get_attribute(&mut self, selector: &str, name: &str) -> HarnessResult<Option<String>> {
        let state = self.state.lock().unwrap();
        if name != "aria-checked" {
            return Ok(None);
        }
        Ok(Some(state.is_checked(selector).to_string()))
    }

    async fn inner_text(&mut self, selector: &str) -> HarnessResult<String> {
        let state = self.state.lock().unwrap();
        Ok(state
            .labels
            .get(selector)
            .cloned()
            .unwrap_or_else(|| "Browse or drag and drop your file here".to_string()))
    }

    async fn set_input_files(&mut self, selector: &str, file: &Path) -> HarnessResult<()> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .push((selector.to_string(), file.to_path_buf()));
        Ok(())
    }

    async fn click_role_option(&mut self, name: &str) -> HarnessResult<()> {
        let mut state = self.state.lock().unwrap();
        state.options.push(name.to_string());
        if let Some(dropdown) = state.focused.clone() {
            state.selected.insert(dropdown, name.to_string());
        }
        Ok(())
    }

    async fn pause(&mut self, _duration: Duration) -> HarnessResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> HarnessResult<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

// ---- probe and backends ----

pub struct FakeProbe {
    pub message: Option<Vec<u8>>,
    pub waits: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MessageProbe for FakeProbe {
    async fn wait_for_message(
        &mut self,
        server: &ServerConfig,
        _wait: Duration,
    ) -> HarnessResult<Option<Vec<u8>>> {
        self.waits
            .lock()
            .unwrap()
            .push(format!("{}:{}/{}", server.server_address, server.port, server.topic));
        Ok(self.message.clone())
    }
}

/// Shared fake device. Sessions opened through it all see the same state.
#[derive(Clone)]
pub struct FakeBackends {
    pub device: Arc<Mutex<DeviceState>>,
    pub api: Arc<Mutex<ApiState>>,
    pub page: Arc<Mutex<PageState>>,
    pub probe_waits: Arc<Mutex<Vec<String>>>,
    pub message: Option<Vec<u8>>,
    pub refuse_ssh: bool,
}

impl Default for FakeBackends {
    fn default() -> Self {
        let device: Arc<Mutex<DeviceState>> = Arc::default();
        let api = ApiState {
            device: Some(device.clone()),
            ..ApiState::default()
        };
        let page = PageState {
            device: Some(device.clone()),
            ..PageState::default()
        };
        Self {
            api: Arc::new(Mutex::new(api)),
            page: Arc::new(Mutex::new(page)),
            device,
            probe_waits: Arc::default(),
            message: Some(br#"{"temperature": 21}"#.to_vec()),
            refuse_ssh: false,
        }
    }
}

#[async_trait]
impl Backends for FakeBackends {
    async fn shell(&mut self) -> HarnessResult<Box<dyn RemoteShell>> {
        if self.refuse_ssh {
            return Err(HarnessError::ConnectionFailure(
                "ssh: connect to host 192.0.2.1 port 22: Connection refused".to_string(),
            ));
        }
        Ok(Box::new(FakeShell {
            state: self.device.clone(),
        }))
    }

    async fn api(&mut self) -> HarnessResult<Box<dyn DeviceApi>> {
        Ok(Box::new(FakeApi {
            state: self.api.clone(),
        }))
    }

    async fn page(&mut self) -> HarnessResult<Box<dyn PageDriver>> {
        Ok(Box::new(FakePage {
            state: self.page.clone(),
        }))
    }

    fn probe(&mut self) -> Box<dyn MessageProbe> {
        Box::new(FakeProbe {
            message: self.message.clone(),
            waits: self.probe_waits.clone(),
        })
    }
}
