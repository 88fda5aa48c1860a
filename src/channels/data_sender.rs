//! Data-to-server scenario through each channel.

use reqwest::Method;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::options::{
    device_store_paths, input_base_options, mqtt_input_options, type_options, DeviceOptions,
};
use super::uci;
use crate::api::{bulk_entry, BulkRequest, DeviceApi};
use crate::browser::PageDriver;
use crate::config::DeviceConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::pages::{DataSenderPage, LoginPage};
use crate::scenario::base_name;
use crate::scenario::data_sender::{
    CollectionTiming, DataConfig, DtsConfig, ServerConfig, TypeSettings,
};
use crate::scenario::lenient::value_text;
use crate::scenario::{CertificateFiles, CertificateSource};
use crate::ssh::{shell_quote, RemoteShell};

pub const UCI_CONFIG: &str = "data_sender";
pub const API_COLLECTIONS: &str = "data_to_server/collections/config";
const UPLOAD_DIR: &str = "/etc/vuci-uploads";
const HEREDOC_MARKER: &str = "ROUTER_HARNESS_EOF";
const LUA_SETTING: &str = "lua_script_location";

/// Option names for the output's TLS files, which differ between `uci` and the API.
#[derive(Debug, Clone, Copy)]
pub struct ServerKeys {
    pub ca: &'static str,
    pub cert: &'static str,
    pub key: &'static str,
    pub device_files: &'static str,
    pub set_tls_type: bool,
}

pub const SSH_SERVER_KEYS: ServerKeys = ServerKeys {
    ca: "mqtt_cafile",
    cert: "mqtt_certfile",
    key: "mqtt_keyfile",
    device_files: "mqtt_device_files",
    set_tls_type: true,
};

pub const API_SERVER_KEYS: ServerKeys = ServerKeys {
    ca: "mqtt_ca_file",
    cert: "mqtt_cert_file",
    key: "mqtt_key_file",
    device_files: "mqtt_certificates_from_device",
    set_tls_type: false,
};

pub fn input_name(config: &DtsConfig, data: &DataConfig) -> String {
    data.name
        .clone()
        .unwrap_or_else(|| config.instance_name.clone())
}

pub fn output_name(config: &DtsConfig) -> String {
    format!("{}_output", config.instance_name)
}

/// Where the device keeps an uploaded Lua script for input `data_id`.
pub fn lua_upload_path(data_id: &str, script: &str) -> String {
    format!(
        "{}/cbid.data_sender.{}.lua_script{}",
        UPLOAD_DIR,
        data_id,
        base_name(script)
    )
}

fn lua_script(data: &DataConfig) -> Option<String> {
    data.generic_settings()
        .and_then(|s| s.get(LUA_SETTING))
        .and_then(value_text)
}

/// Every option of the input section. `cert_paths` and `lua_path` are the
/// device-side paths the channel resolved.
pub fn input_options(
    data: &DataConfig,
    cert_paths: Option<&CertificateFiles>,
    lua_path: Option<&str>,
) -> DeviceOptions {
    let mut options = input_base_options(data);
    match &data.type_settings {
        TypeSettings::Mqtt(settings) => options.extend(mqtt_input_options(settings, cert_paths)),
        TypeSettings::Generic(settings) => {
            let plugin = data.plugin();
            if plugin == "lua" {
                if let Some(path) = lua_path {
                    options.set("lua_script", path);
                }
            } else {
                options.extend(type_options(&plugin, settings));
            }
        }
    }
    options
}

/// MQTT output options.
pub fn server_options(
    server: &ServerConfig,
    paths: Option<&CertificateFiles>,
    keys: &ServerKeys,
) -> DeviceOptions {
    let mut options = DeviceOptions::new();
    options.set("plugin", "mqtt");
    options.set("mqtt_host", server.server_address.as_str());
    options.set("mqtt_port", server.port.as_str());
    options.set("mqtt_keepalive", server.keepalive.as_str());
    options.set("mqtt_topic", server.topic.as_str());
    options.set("mqtt_client_id", server.client_id.as_str());
    options.set("mqtt_qos", server.qos.as_str());

    if let Some(source) = server.certificate_source() {
        options.set_flag("mqtt_tls", true);
        let insecure = server
            .secure_connection
            .as_ref()
            .map(|s| s.allow_insecure_connection)
            .unwrap_or(false);
        options.set_flag("mqtt_insecure", insecure);
        options.set_flag(
            keys.device_files,
            matches!(source, CertificateSource::FromDevice(_)),
        );
        if keys.set_tls_type {
            options.set("mqtt_tls_type", "cert");
        }
        if let Some(paths) = paths {
            let slots = [(keys.ca, &paths.ca), (keys.cert, &paths.cert), (keys.key, &paths.key)];
            for (key, path) in slots {
                if let Some(path) = path {
                    options.set(key, path.as_str());
                }
            }
        }
    } else {
        options.set_flag("mqtt_tls", false);
    }

    if server.use_credentials {
        options.set_flag("mqtt_use_credentials", true);
        if let Some(username) = &server.username {
            options.set("mqtt_username", username.as_str());
        }
        if let Some(password) = &server.password {
            options.set("mqtt_password", password.as_str());
        }
    }
    options
}

fn input_certificate_source(data: &DataConfig) -> Option<CertificateSource> {
    data.mqtt_settings().and_then(|s| s.certificate_source())
}

// ---- web UI ----

/// Web UI: login, instance wizard, logout.
pub async fn configure_via_gui(
    page: &mut dyn PageDriver,
    device: &DeviceConfig,
    timeout: Duration,
    config: &DtsConfig,
) -> HarnessResult<()> {
    LoginPage::new(&mut *page, device, timeout).login().await?;

    let result = async {
        let mut dts = DataSenderPage::new(&mut *page, device, timeout);
        dts.open().await?;
        dts.configure_dts(config).await
    }
    .await;

    if let Err(e) = LoginPage::new(&mut *page, device, timeout).logout().await {
        warn!("Logout failed: {}", e);
    }
    result
}

// ---- SSH ----

/// Section ids used for one instance, plus the sections that must be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UciSections {
    pub collection: String,
    pub output: String,
    pub input: String,
    pub created: Vec<(String, &'static str)>,
}

/// Reuses the sections of an existing collection named `instance`, otherwise
/// allocates fresh ids (collection, output, input) after the highest one.
pub fn plan_sections(show: &str, instance: &str) -> UciSections {
    let declared = uci::sections(show, UCI_CONFIG);
    let entries = uci::entries(show);
    let option = |id: &str, key: &str| {
        uci::lookup(&entries, &format!("{}.{}.{}", UCI_CONFIG, id, key)).map(str::to_string)
    };
    let exists = |id: &str| declared.iter().any(|(d, _)| d == id);

    let existing = declared
        .iter()
        .find(|(id, kind)| kind == "collection" && option(id, "name").as_deref() == Some(instance))
        .map(|(id, _)| id.clone());

    let mut next = declared
        .iter()
        .filter_map(|(id, _)| id.parse::<u32>().ok())
        .max()
        .map(|max| max + 1)
        .unwrap_or(1);
    let mut allocate = || {
        let id = next.to_string();
        next += 1;
        id
    };

    let collection = existing.clone().unwrap_or_else(&mut allocate);
    let output = existing
        .as_deref()
        .and_then(|c| option(c, "output"))
        .filter(|id| exists(id))
        .unwrap_or_else(&mut allocate);
    let input = existing
        .as_deref()
        .and_then(|c| option(c, "input"))
        .filter(|id| exists(id))
        .unwrap_or_else(&mut allocate);

    let created = [
        (&collection, "collection"),
        (&output, "output"),
        (&input, "input"),
    ]
    .into_iter()
    .filter(|(id, _)| !exists(id))
    .map(|(id, kind)| (id.clone(), kind))
    .collect();

    UciSections {
        collection,
        output,
        input,
        created,
    }
}

/// One more than the highest `sender_id` in the listing.
pub fn next_sender_id(show: &str) -> u32 {
    uci::entries(show)
        .iter()
        .filter(|(path, _)| path.ends_with(".sender_id"))
        .filter_map(|(_, value)| value.parse::<u32>().ok())
        .max()
        .map(|max| max + 1)
        .unwrap_or(1)
}

/// Timing options of the collection section.
pub fn ssh_timing_options(timing: &CollectionTiming) -> DeviceOptions {
    let mut options = DeviceOptions::new();
    options.set("timer", timing.timer());
    match timing {
        CollectionTiming::Period { period, retry, .. } => {
            options.set("period", period.as_str());
            options.set_flag("retry", *retry);
        }
        CollectionTiming::Scheduler(s) => {
            options.set("day_time", s.day_time.as_str());
            options.set("day_mode", s.day_mode());
            match s.day_mode() {
                "month" => options.set_list("month_days", s.month_day.clone()),
                "week" => options.set(
                    "weekdays",
                    s.weekdays
                        .iter()
                        .map(|d| d.to_lowercase())
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                _ => {}
            }
            options.set_flag("last_day", s.force_last_day);
            options.set_flag("retry", s.retry);
            options.set(
                "time",
                format!("{}:{}:", s.day_time, s.month_day.join(",")),
            );
        }
    }
    options.set("retry_count", timing.retry_count());
    options.set("retry_timeout", timing.timeout());
    options
}

/// Writes `content` to `path` on the device.
pub fn heredoc_command(path: &str, content: &str) -> String {
    let dir = path.rsplit_once('/').map(|(d, _)| d).unwrap_or(".");
    format!(
        "mkdir -p {} && cat > {} <<'{}'\n{}\n{}",
        shell_quote(dir),
        shell_quote(path),
        HEREDOC_MARKER,
        content.trim_end_matches('\n'),
        HEREDOC_MARKER
    )
}

/// Copies local certificate files to the device store. Returns the device paths.
fn install_certificates(
    files: &CertificateFiles,
    commands: &mut Vec<String>,
) -> HarnessResult<CertificateFiles> {
    let device = device_store_paths(files);
    let pairs = [
        (&files.ca, &device.ca),
        (&files.cert, &device.cert),
        (&files.key, &device.key),
    ];
    for (local, remote) in pairs {
        if let (Some(local), Some(remote)) = (local, remote) {
            let content = fs::read_to_string(local)
                .map_err(|e| HarnessError::Scenario(format!("Cannot read {}: {}", local, e)))?;
            commands.push(heredoc_command(remote, &content));
        }
    }
    Ok(device)
}

fn ssh_certificate_paths(
    source: Option<&CertificateSource>,
    commands: &mut Vec<String>,
) -> HarnessResult<Option<CertificateFiles>> {
    match source {
        Some(CertificateSource::FromDevice(files)) => Ok(Some(device_store_paths(files))),
        Some(CertificateSource::Upload(files)) => install_certificates(files, commands).map(Some),
        _ => Ok(None),
    }
}

/// Every command for the instance, up to and including commit and restart.
pub fn ssh_commands(
    config: &DtsConfig,
    sections: &UciSections,
    sender_id: u32,
) -> HarnessResult<Vec<String>> {
    let mut commands: Vec<String> = sections
        .created
        .iter()
        .map(|(id, kind)| format!("uci set {}.{}={}", UCI_CONFIG, id, kind))
        .collect();
    let section = |id: &str| format!("{}.{}", UCI_CONFIG, id);

    let data = config.data_or_default();
    let input_source = input_certificate_source(&data);
    let input_paths = ssh_certificate_paths(input_source.as_ref(), &mut commands)?;

    let lua_path = match lua_script(&data) {
        Some(script) => {
            let content = fs::read_to_string(&script)
                .map_err(|e| HarnessError::Scenario(format!("Cannot read {}: {}", script, e)))?;
            let remote = lua_upload_path(&sections.input, &script);
            commands.push(heredoc_command(&remote, &content));
            Some(remote)
        }
        None => None,
    };

    let mut input = DeviceOptions::new();
    input.set("name", input_name(config, &data));
    input.extend(input_options(&data, input_paths.as_ref(), lua_path.as_deref()));
    commands.extend(uci::option_commands(&section(&sections.input), &input));

    let server_paths = ssh_certificate_paths(config.server.certificate_source(), &mut commands)?;
    let mut output = DeviceOptions::new();
    output.set("name", output_name(config));
    output.extend(server_options(&config.server, server_paths.as_ref(), &SSH_SERVER_KEYS));
    commands.extend(uci::option_commands(&section(&sections.output), &output));

    let mut collection = DeviceOptions::new();
    collection.set("enabled", "1");
    collection.set("name", config.instance_name.as_str());
    collection.set("format", "json");
    collection.set("input", sections.input.as_str());
    collection.set("output", sections.output.as_str());
    collection.set("sender_id", sender_id.to_string());
    collection.extend(ssh_timing_options(&config.collection));
    commands.extend(uci::option_commands(&section(&sections.collection), &collection));

    commands.push(uci::commit(UCI_CONFIG));
    commands.push("/etc/init.d/data_sender restart".to_string());
    Ok(commands)
}

/// SSH: discover sections, write every option, commit, restart, verify.
pub async fn configure_via_ssh(
    shell: &mut dyn RemoteShell,
    config: &DtsConfig,
) -> HarnessResult<UciSections> {
    let show = shell.execute(&format!("uci show {}", UCI_CONFIG)).await?;
    let sections = plan_sections(&show, &config.instance_name);
    info!(
        "Using data_sender sections collection={} output={} input={}",
        sections.collection, sections.output, sections.input
    );

    for command in ssh_commands(config, &sections, next_sender_id(&show))? {
        shell.execute(&command).await?;
    }

    let path = format!("{}.{}", UCI_CONFIG, sections.collection);
    let enabled = uci::value(&shell.execute(&format!("uci show {}.enabled", path)).await?);
    let name = uci::value(&shell.execute(&format!("uci show {}.name", path)).await?);

    let mut failures = Vec::new();
    if enabled.as_deref() != Some("1") {
        failures.push(format!("collection {} not enabled", sections.collection));
    }
    if name.as_deref() != Some(config.instance_name.as_str()) {
        failures.push(format!(
            "collection name is {:?}, expected {}",
            name, config.instance_name
        ));
    }
    if !failures.is_empty() {
        return Err(HarnessError::ValidationFailed(failures));
    }
    info!("Data to Server configured over SSH");
    Ok(sections)
}

// ---- REST API ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiIds {
    pub collection: u32,
    pub data: u32,
    pub server: u32,
}

impl ApiIds {
    /// Ids derived from a collection id: server follows it, data after that.
    /// `None` when the ids would not fit in `u32`.
    pub fn for_collection(collection: u32) -> Option<Self> {
        Some(Self {
            collection,
            data: collection.checked_add(2)?,
            server: collection.checked_add(1)?,
        })
    }

    pub fn collection_endpoint(&self) -> String {
        format!("/api/{}/{}", API_COLLECTIONS, self.collection)
    }

    pub fn data_endpoint(&self) -> String {
        format!("/api/{}/{}/data/{}", API_COLLECTIONS, self.collection, self.data)
    }

    pub fn server_endpoint(&self) -> String {
        format!("/api/{}/{}/servers/{}", API_COLLECTIONS, self.collection, self.server)
    }
}

/// Next free ids given the existing collection ids. Collections are
/// allocated in steps of three starting from 1.
pub fn next_api_ids(existing: &[u32]) -> Option<ApiIds> {
    let Some(max) = existing.iter().copied().max() else {
        return ApiIds::for_collection(1);
    };
    let mut collection = max.checked_add(3)?;
    if collection % 3 != 1 {
        collection = (collection / 3 + 1).checked_mul(3)? - 2;
    }
    ApiIds::for_collection(collection)
}

fn ids_of(items: Option<&Value>) -> Vec<u32> {
    items
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("id").and_then(value_text))
                .filter_map(|id| id.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Collection section body.
pub fn api_collection_body(config: &DtsConfig) -> Value {
    let timing = &config.collection;
    let mut body = json!({
        ".type": "collection",
        "name": config.instance_name,
        "format": "json",
        "enabled": "1",
        "retry": if timing.retry() { "1" } else { "0" },
        "retry_count": timing.retry_count(),
        "retry_timeout": timing.timeout(),
    });

    match timing {
        CollectionTiming::Period { period, .. } => {
            body["timer"] = json!("period");
            body["period"] = json!(period);
        }
        CollectionTiming::Scheduler(s) => {
            body["timer"] = json!("scheduler");
            body["period"] = json!("");
            body["time"] = json!([s.day_time]);
            body["day_mode"] = json!(s.day_mode());
            match s.day_mode() {
                "week" => {
                    let days: Vec<String> = s.weekdays.iter().map(|d| d.to_lowercase()).collect();
                    body["week_days"] = json!(days);
                }
                "month" => body["month_days"] = json!(s.month_day),
                _ => {}
            }
            body["last_day"] = json!(if s.force_last_day { "1" } else { "0" });
        }
    }
    body
}

/// Output section body. Certificate paths are passed through as given.
pub fn api_server_body(config: &DtsConfig) -> Value {
    let server = &config.server;
    let paths = server.certificate_source().and_then(|source| match source {
        CertificateSource::FromDevice(files) => Some(device_store_paths(files)),
        CertificateSource::Upload(files) => Some(files.clone()),
        CertificateSource::Psk { .. } => None,
    });
    let mut body: Map<String, Value> = server_options(server, paths.as_ref(), &API_SERVER_KEYS).to_json();
    body.insert(".type".to_string(), json!("output"));
    body.insert("name".to_string(), json!(output_name(config)));
    for key in ["http_tls", "http_host", "http_header"] {
        body.insert(key.to_string(), json!(""));
    }
    Value::Object(body)
}

/// Input section body.
pub fn api_data_body(config: &DtsConfig, data: &DataConfig, lua_path: Option<&str>) -> Value {
    let paths = input_certificate_source(data).and_then(|source| match source {
        CertificateSource::FromDevice(files) => Some(device_store_paths(&files)),
        CertificateSource::Upload(files) => Some(files),
        CertificateSource::Psk { .. } => None,
    });
    let mut body = DeviceOptions::new();
    body.set("name", input_name(config, data));
    body.extend(input_options(data, paths.as_ref(), lua_path));
    Value::Object(body.to_json())
}

async fn upload_local(
    api: &mut dyn DeviceApi,
    endpoint: &str,
    option: &str,
    path: &str,
) -> HarnessResult<Value> {
    let content = fs::read(Path::new(path))
        .map_err(|e| HarnessError::Scenario(format!("Cannot read {}: {}", path, e)))?;
    info!("Uploading {} as {}", path, option);
    api.upload(endpoint, option, base_name(path), content).await
}

/// API: create the collection, upload files, submit all three sections in one bulk call.
pub async fn configure_via_api(api: &mut dyn DeviceApi, config: &DtsConfig) -> HarnessResult<ApiIds> {
    let current = api
        .bulk(vec![
            BulkRequest::get(format!("/api/{}", API_COLLECTIONS)),
            BulkRequest::get("/api/data_to_server/data/config"),
            BulkRequest::get("/api/data_to_server/servers/config"),
        ])
        .await?;
    let predicted = next_api_ids(&ids_of(bulk_entry(&current, 0)));

    let created = api
        .request(
            Method::POST,
            API_COLLECTIONS,
            Some(json!({ "data": { "name": config.instance_name } })),
        )
        .await?;
    let ids = created
        .pointer("/data/id")
        .and_then(value_text)
        .and_then(|id| id.parse().ok())
        .and_then(ApiIds::for_collection)
        .or(predicted)
        .ok_or_else(|| {
            HarnessError::Scenario("No free Data to Server collection id left on the device".to_string())
        })?;
    info!(
        "Data to Server ids: collection={} data={} server={}",
        ids.collection, ids.data, ids.server
    );

    let data = config.data_or_default();
    let upload_endpoint = format!("{}/{}/data/{}", API_COLLECTIONS, ids.collection, ids.data);

    if let Some(CertificateSource::Upload(files)) = input_certificate_source(&data) {
        let slots = [
            ("mqtt_in_cafile", &files.ca),
            ("mqtt_in_certfile", &files.cert),
            ("mqtt_in_keyfile", &files.key),
        ];
        for (option, path) in slots {
            if let Some(path) = path {
                upload_local(api, &upload_endpoint, option, path).await?;
            }
        }
    }

    let lua_path = match lua_script(&data) {
        Some(script) => {
            let response = upload_local(api, &upload_endpoint, "lua_script", &script).await?;
            Some(
                response
                    .pointer("/data/path")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| lua_upload_path(&ids.data.to_string(), &script)),
            )
        }
        None => None,
    };

    api.bulk(vec![
        BulkRequest::put(ids.data_endpoint(), api_data_body(config, &data, lua_path.as_deref())),
        BulkRequest::put(ids.server_endpoint(), api_server_body(config)),
        BulkRequest::put(ids.collection_endpoint(), api_collection_body(config)),
    ])
    .await?;

    let collections = api.get_config(API_COLLECTIONS).await?;
    let present = collections
        .as_array()
        .map(|items| {
            items
                .iter()
                .any(|c| c.get("name").and_then(Value::as_str) == Some(config.instance_name.as_str()))
        })
        .unwrap_or(false);
    if present {
        info!("Collection {} present after update", config.instance_name);
    } else {
        warn!(
            "Collection {} not found in collection list after update",
            config.instance_name
        );
    }
    Ok(ids)
}

/// Deletes the collection created by an API run.
pub async fn cleanup_via_api(api: &mut dyn DeviceApi, ids: &ApiIds) -> HarnessResult<()> {
    info!("Deleting collection {}", ids.collection);
    api.request(
        Method::DELETE,
        API_COLLECTIONS,
        Some(json!({ "data": [ids.collection.to_string()] })),
    )
    .await?;
    Ok(())
}
