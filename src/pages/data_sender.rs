use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::{
    clear_and_type, fill_visible, handle_switch, select_by_basename, select_option, test_id,
    upload_file, wait_for_spinner, Switch, UploadTarget,
};
use crate::browser::{PageDriver, WaitState};
use crate::config::DeviceConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::data_sender::{
    CollectionTiming, DataConfig, DtsConfig, MqttInputSettings, SchedulerConfig, ServerConfig,
    TypeSettings,
};
use crate::scenario::lenient::{value_text, value_texts, value_truthy};
use crate::scenario::CertificateSource;

const DATA_SECTION: &str = "#section-data-configuration";
const COLLECTION_SECTION: &str = "#section-collection-configuration";
const SERVER_SECTION: &str = "#section-server-configuration";
const MODAL_NEXT: &str = "div[test-id=\"modal-container\"] button[test-id=\"button-next\"]";
const COLLECTION_EDIT_ID: &str = "data_sender.collection.1.edit.1";

const OPEN_ATTEMPTS: u32 = 3;
const OPEN_RETRY_PAUSE: Duration = Duration::from_secs(5);
const EXISTING_LOOKUP: Duration = Duration::from_secs(3);
const SHORT_SETTLE: Duration = Duration::from_millis(500);
const STEP_SETTLE: Duration = Duration::from_secs(1);
const SAVE_SETTLE: Duration = Duration::from_secs(5);

/// One type-specific control in the data section, keyed by scenario setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuiField {
    /// Dropdown opened by `dropdown`; the option text is the setting value.
    Select { setting: &'static str, dropdown: &'static str },
    Fill { setting: &'static str, input: &'static str },
    Toggle { setting: &'static str, switch: &'static str },
    /// Dynamic list: `{input}_{i}` per item, `listadd-{input}_{i}` between items.
    List { setting: &'static str, input: &'static str },
    Upload { setting: &'static str, input: &'static str },
}

/// Controls for each input plugin, in the order they are filled.
pub fn gui_fields(plugin: &str) -> &'static [GuiField] {
    use GuiField::*;
    match plugin {
        "bluetooth" => &[
            Select {
                setting: "data_filtering",
                dropdown: "[test-id=\"selectstate-bl_filter selectedid-all\"]",
            },
            Fill { setting: "MAC_address", input: "input-bl_filter_mac_0" },
            Fill { setting: "device_name", input: "input-bl_filter_name_0" },
            Fill { setting: "segment_count", input: "input-bl_segments" },
            Toggle { setting: "send_as_object", switch: "bl_object" },
        ],
        "impulse_counter" => &[
            Select {
                setting: "data_filtering",
                dropdown: "[test-id=\"input-impulse_counter_filter\"]",
            },
            Select {
                setting: "impulse_counter_pin",
                dropdown: "[test-id=\"multiselect-impulse_counter_filter_pin\"]",
            },
            Toggle { setting: "invert_filter", switch: "impulse_counter_filter_invert" },
            Fill { setting: "max_segment_count", input: "input-impulse_counter_segments" },
            Toggle { setting: "send_as_object", switch: "impulse_counter_object" },
        ],
        "lua" => &[Upload { setting: "lua_script_location", input: "lua_script" }],
        "mdcollect" => &[
            Select {
                setting: "data_period",
                dropdown: "[test-id=\"selectwrapper-mdc_period\"]",
            },
            Toggle { setting: "current", switch: "mdc_current" },
            Select {
                setting: "SIM_number",
                dropdown: "[test-id=\"selectwrapper-mdc_sim\"]",
            },
        ],
        "modbus" => &[
            Select {
                setting: "data_filtering",
                dropdown: "[test-id=\"input-modbus_filter\"]",
            },
            Fill { setting: "server_ip", input: "input-modbus_filter_server_ip_0" },
            Fill { setting: "server_id", input: "input-modbus_filter_server_id_0" },
            Fill { setting: "request_name", input: "input-modbus_filter_request_0" },
            Fill { setting: "segment_count", input: "input-modbus_segments" },
            Toggle { setting: "send_as_object", switch: "modbus_object" },
        ],
        "modbus_alarm" => &[
            Select {
                setting: "data_filtering",
                dropdown: "[test-id=\"input-modbus_alarm_filter\"]",
            },
            Fill { setting: "server_id", input: "input-modbus_alarm_filter_server_id_0" },
            Fill { setting: "alarm_id", input: "input-modbus_alarm_filter_alarm_id_0" },
            Fill { setting: "register_number", input: "input-modbus_alarm_filter_register_0" },
        ],
        "wifiscan" => &[
            Select {
                setting: "data_filtering",
                dropdown: "[test-id=\"input-wifi_filter\"]",
            },
            List { setting: "hostname", input: "wifi_filter_name" },
            List { setting: "mac_address", input: "wifi_filter_mac" },
            List { setting: "signal_strength", input: "wifi_filter_signal" },
            Fill { setting: "segment_count", input: "input-wifi_segments" },
            Toggle { setting: "send_as_object", switch: "wifi_object" },
        ],
        _ => &[],
    }
}

fn upload_target(input_id: &str) -> UploadTarget {
    UploadTarget::new(input_id, test_id(&format!("upload-file-{}", input_id)))
}

/// Selectors for one TLS block: device dropdowns and upload inputs per slot.
struct TlsControls {
    dropdowns: [&'static str; 3],
    uploads: [&'static str; 3],
}

const SERVER_TLS: TlsControls = TlsControls {
    dropdowns: [
        "[test-id=\"selectwrapper-mqtt_cafile\"]",
        "[test-id=\"selectwrapper-mqtt_certfile\"]",
        "[test-id=\"selectwrapper-mqtt_keyfile\"]",
    ],
    uploads: ["mqtt_cafile", "mqtt_certfile", "mqtt_keyfile"],
};

const INPUT_TLS: TlsControls = TlsControls {
    dropdowns: [
        "[test-id=\"input-mqtt_in_cafile\"]",
        "[test-id=\"input-mqtt_in_certfile\"]",
        "[test-id=\"input-mqtt_in_keyfile\"]",
    ],
    uploads: ["mqtt_in_cafile", "mqtt_in_certfile", "mqtt_in_keyfile"],
};

/// Data to Server instance editor: data, collection and server steps.
pub struct DataSenderPage<'a> {
    page: &'a mut dyn PageDriver,
    device: &'a DeviceConfig,
    timeout: Duration,
}

impl<'a> DataSenderPage<'a> {
    pub fn new(page: &'a mut dyn PageDriver, device: &'a DeviceConfig, timeout: Duration) -> Self {
        Self {
            page,
            device,
            timeout,
        }
    }

    /// Opens the Data to Server list, retrying a slow first load.
    pub async fn open(&mut self) -> HarnessResult<()> {
        let url = self.device.web_url("services/data_sender");
        let mut last_error = None;

        for attempt in 1..=OPEN_ATTEMPTS {
            let loaded = async {
                self.page.goto(&url).await?;
                self.page
                    .wait_for(&test_id("button-add"), WaitState::Visible, self.timeout)
                    .await
            }
            .await;

            match loaded {
                Ok(()) => {
                    info!("Data to Server page loaded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Data to Server page load attempt {}/{} failed: {}",
                        attempt, OPEN_ATTEMPTS, e
                    );
                    last_error = Some(e);
                    if attempt < OPEN_ATTEMPTS {
                        self.page.pause(OPEN_RETRY_PAUSE).await?;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| HarnessError::timeout(url, self.timeout)))
    }

    /// Deletes an instance with the same name. Failures are logged, not raised.
    pub async fn delete_existing_instance(&mut self, name: &str) -> bool {
        let row_delete = format!(
            "tr:has(span.truncate:text-is(\"{}\")) button[test-id=\"button-delete\"]",
            name
        );

        if self
            .page
            .wait_for(&row_delete, WaitState::Visible, EXISTING_LOOKUP)
            .await
            .is_err()
        {
            info!("No existing instance named '{}'", name);
            return false;
        }

        info!("Found existing instance '{}', deleting it", name);
        let deleted = async {
            self.page.click(&row_delete, false).await?;
            self.page.pause(SHORT_SETTLE).await?;
            self.page
                .click(
                    "button[test-id=\"button-ok\"], button[test-id=\"button-confirm-delete\"]",
                    false,
                )
                .await?;
            wait_for_spinner(self.page).await
        }
        .await;

        match deleted {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to delete existing instance '{}': {}", name, e);
                false
            }
        }
    }

    /// Creates the instance described by `config` and saves it.
    pub async fn configure_dts(&mut self, config: &DtsConfig) -> HarnessResult<()> {
        self.delete_existing_instance(&config.instance_name).await;

        info!("Creating instance {}", config.instance_name);
        self.page.click(&test_id("input-name"), false).await?;
        self.page.type_text(&config.instance_name).await?;
        self.page.pause(SHORT_SETTLE).await?;
        self.page
            .click("button[test-id=\"button-add\"].bg-primary-300", false)
            .await?;
        self.page.pause(SHORT_SETTLE).await?;

        let data = config.data_or_default();
        let input_name = data
            .name
            .clone()
            .unwrap_or_else(|| config.instance_name.clone());
        self.configure_data(&data, &input_name).await?;
        self.next_step().await?;

        self.configure_collection(&config.collection).await?;
        self.next_step().await?;

        self.configure_server(&config.server).await?;

        info!("Saving Data to Server configuration");
        self.page.click(MODAL_NEXT, false).await?;
        self.page.pause(SAVE_SETTLE).await
    }

    async fn next_step(&mut self) -> HarnessResult<()> {
        self.page.click(MODAL_NEXT, false).await?;
        self.page.pause(STEP_SETTLE).await
    }

    async fn modal_switch(&mut self, key: &str, desired: bool, description: &str) -> HarnessResult<bool> {
        handle_switch(self.page, &Switch::modal(key), desired, description, self.timeout).await
    }

    pub async fn configure_data(&mut self, data: &DataConfig, input_name: &str) -> HarnessResult<()> {
        info!("Configuring data input {} ({})", input_name, data.data_type);
        fill_visible(
            self.page,
            &format!("{} input[test-id=\"input-name\"]", DATA_SECTION),
            input_name,
            self.timeout,
        )
        .await?;

        let plugin = data.plugin();
        let dropdown = format!(
            "{} [test-id=\"selectwrapper-plugin\"] div[role=\"button\"]",
            DATA_SECTION
        );
        self.page.wait_for(&dropdown, WaitState::Visible, self.timeout).await?;
        self.page.click(&dropdown, false).await?;
        self.page.pause(STEP_SETTLE).await?;
        self.page
            .click(
                &format!("{} >> visible=true", test_id(&format!("selectoption-{}", plugin))),
                false,
            )
            .await?;
        self.page.pause(STEP_SETTLE).await?;

        match &data.type_settings {
            TypeSettings::Mqtt(settings) => self.configure_mqtt_input(settings).await?,
            TypeSettings::Generic(settings) => self.configure_type_fields(&plugin, settings).await?,
        }

        select_option(
            self.page,
            &format!("{} [test-id=\"selectwrapper-format\"]", DATA_SECTION),
            &data.format_type,
            self.timeout,
        )
        .await?;

        match data.device_format().as_str() {
            "custom" => {
                let fields = [
                    ("input-format_string", &data.format_string),
                    ("input-empty_value", &data.empty_value),
                    ("input-delimiter", &data.delimiter),
                ];
                for (input, value) in fields {
                    if let Some(value) = value {
                        fill_visible(self.page, &test_id(input), value, self.timeout).await?;
                    }
                }
            }
            "lua" => {
                if let Some(script) = &data.lua_format_script {
                    upload_file(
                        self.page,
                        &upload_target("lua_format_script"),
                        Path::new(script),
                        self.timeout,
                    )
                    .await?;
                }
            }
            _ => {}
        }

        if !data.values.is_empty() {
            self.select_members(&data.values).await?;
        }
        Ok(())
    }

    async fn select_members(&mut self, values: &[String]) -> HarnessResult<()> {
        let toggle = format!("{} [test-id=\"multiselect-members\"]", DATA_SECTION);
        self.page.click(&toggle, false).await?;
        self.page.pause(SHORT_SETTLE).await?;

        for value in values {
            let checkbox = format!(
                "[test-id$=\"_members-select-{}-checkbox\"]",
                value.to_lowercase()
            );
            self.page
                .wait_for(&checkbox, WaitState::Visible, self.timeout)
                .await?;
            self.page.click(&checkbox, false).await?;
        }

        self.page.click(&toggle, false).await?;
        self.page.pause(SHORT_SETTLE).await
    }

    /// Fills the type-specific controls of a non-MQTT input from its settings map.
    pub async fn configure_type_fields(
        &mut self,
        plugin: &str,
        settings: &Map<String, Value>,
    ) -> HarnessResult<()> {
        for field in gui_fields(plugin) {
            match *field {
                GuiField::Select { setting, dropdown } => {
                    if let Some(option) = settings.get(setting).and_then(first_text) {
                        select_option(self.page, dropdown, &option, self.timeout).await?;
                    }
                }
                GuiField::Fill { setting, input } => {
                    if let Some(value) = settings.get(setting).and_then(first_text) {
                        fill_visible(self.page, &test_id(input), &value, self.timeout).await?;
                    }
                }
                GuiField::Toggle { setting, switch } => {
                    if let Some(value) = settings.get(setting) {
                        self.modal_switch(switch, value_truthy(value), setting).await?;
                    }
                }
                GuiField::List { setting, input } => {
                    let items = settings.get(setting).map(value_texts).unwrap_or_default();
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            self.page
                                .click(&test_id(&format!("listadd-{}_{}", input, i - 1)), false)
                                .await?;
                        }
                        fill_visible(
                            self.page,
                            &test_id(&format!("input-{}_{}", input, i)),
                            item,
                            self.timeout,
                        )
                        .await?;
                    }
                }
                GuiField::Upload { setting, input } => {
                    if let Some(path) = settings.get(setting).and_then(value_text) {
                        upload_file(self.page, &upload_target(input), Path::new(&path), self.timeout)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn configure_mqtt_input(&mut self, settings: &MqttInputSettings) -> HarnessResult<()> {
        let fields = [
            ("input-mqtt_in_host", &settings.server_address),
            ("input-mqtt_in_port", &settings.port),
            ("input-mqtt_in_keepalive", &settings.keepalive),
            ("input-mqtt_in_topic", &settings.topic),
            ("input-mqtt_in_client_id", &settings.client_id),
        ];
        for (input, value) in fields {
            if let Some(value) = value {
                fill_visible(self.page, &test_id(input), value, self.timeout).await?;
            }
        }

        if let Some(qos) = &settings.qos {
            self.page.click(&test_id("input-mqtt_in_qos"), false).await?;
            self.page.pause(SHORT_SETTLE).await?;
            self.page
                .click(&test_id(&format!("selectoption-{}", qos)), false)
                .await?;
        }

        if let Some(source) = settings.certificate_source() {
            self.modal_switch("mqtt_in_tls", true, "MQTT input TLS").await?;
            self.page.click(&test_id("input-mqtt_in_tls_type"), false).await?;
            self.page.pause(SHORT_SETTLE).await?;
            self.page.click(&test_id("selectoption-cert"), false).await?;

            let insecure = settings
                .secure_connection
                .as_ref()
                .map(|s| s.allow_insecure_connection)
                .unwrap_or(false);
            self.modal_switch("mqtt_in_insecure", insecure, "MQTT input insecure connection")
                .await?;
            self.apply_tls_files(&source, &INPUT_TLS).await?;
        }

        if let Some((username, password)) = settings.credentials() {
            fill_visible(self.page, &test_id("input-mqtt_in_username"), username, self.timeout)
                .await?;
            self.page
                .fill(&test_id("input-mqtt_in_password"), password)
                .await?;
        }
        Ok(())
    }

    /// Device-file switch plus dropdown selections or uploads for one TLS block.
    async fn apply_tls_files(
        &mut self,
        source: &CertificateSource,
        controls: &TlsControls,
    ) -> HarnessResult<()> {
        let from_device = matches!(source, CertificateSource::FromDevice(_));
        self.modal_switch("mqtt_device_files", from_device, "certificate files from device")
            .await?;

        match source {
            CertificateSource::FromDevice(files) => {
                let slots = [&files.ca, &files.cert, &files.key];
                for (dropdown, file) in controls.dropdowns.iter().zip(slots) {
                    if let Some(file) = file {
                        select_by_basename(self.page, dropdown, file, self.timeout).await?;
                    }
                }
            }
            CertificateSource::Upload(files) => {
                let slots = [&files.ca, &files.cert, &files.key];
                for (input, file) in controls.uploads.iter().zip(slots) {
                    if let Some(file) = file {
                        upload_file(self.page, &upload_target(input), Path::new(file), self.timeout)
                            .await?;
                    }
                }
            }
            CertificateSource::Psk { .. } => {
                warn!("Pre-shared keys are not offered for Data to Server connections");
            }
        }
        Ok(())
    }

    pub async fn configure_collection(&mut self, timing: &CollectionTiming) -> HarnessResult<()> {
        match timing {
            CollectionTiming::Period { period, retry, .. } => {
                info!("Configuring period collection: {}s", period);
                clear_and_type(self.page, &test_id("input-period"), period).await?;
                self.modal_switch("retry", *retry, "retry").await?;
                Ok(())
            }
            CollectionTiming::Scheduler(scheduler) => self.configure_scheduler(scheduler).await,
        }
    }

    async fn configure_scheduler(&mut self, scheduler: &SchedulerConfig) -> HarnessResult<()> {
        info!("Configuring scheduler collection at {}", scheduler.day_time);
        self.page
            .click(
                &format!("{} [test-id=\"selectwrapper-timer\"]", COLLECTION_SECTION),
                false,
            )
            .await?;
        self.page.pause(SHORT_SETTLE).await?;
        self.page.click(&test_id("selectoption-scheduler"), false).await?;
        self.page.pause(SHORT_SETTLE).await?;

        let time_input = format!("{} input[test-id=\"input-time_0\"]", COLLECTION_SECTION);
        self.page
            .wait_for(&time_input, WaitState::Visible, self.timeout)
            .await?;
        self.page.click(&time_input, false).await?;
        self.page.press("ControlOrMeta+A").await?;
        self.page.press("Backspace").await?;
        self.page.fill(&time_input, &scheduler.day_time).await?;

        select_option(
            self.page,
            &format!("{} [test-id=\"selectwrapper-day_mode\"]", COLLECTION_SECTION),
            &scheduler.interval_type,
            self.timeout,
        )
        .await?;

        if scheduler.day_mode() == "week" {
            for day in &scheduler.weekdays {
                self.page
                    .click(&test_id(&format!("checkbox-{}", day.to_lowercase())), false)
                    .await?;
            }
        }

        if !scheduler.month_day.is_empty() {
            self.page
                .click(&test_id("multiselect-month_days"), false)
                .await?;
            self.page.pause(SHORT_SETTLE).await?;
            for day in &scheduler.month_day {
                let item = format!(
                    "#{}_month_days-select-{} label",
                    COLLECTION_EDIT_ID.replace('.', "\\."),
                    day
                );
                if let Err(e) = self.page.click(&item, false).await {
                    warn!("Could not select month day {}: {}", day, e);
                }
            }
            self.page
                .click("[test-id=\"multiselect-month_days\"] .tlt-input-icon-right", false)
                .await?;
            self.page.pause(STEP_SETTLE).await?;
        }

        if scheduler.force_last_day {
            self.page
                .click(&format!("[id=\"{}_last_day\"]", COLLECTION_EDIT_ID), true)
                .await?;
        }
        if scheduler.retry {
            self.page
                .click(&format!("[id=\"{}_retry\"]", COLLECTION_EDIT_ID), true)
                .await?;
        }

        clear_and_type(
            self.page,
            &format!("[id=\"{}_retry_count\"]", COLLECTION_EDIT_ID),
            &scheduler.retry_count,
        )
        .await?;
        clear_and_type(
            self.page,
            &format!("[id=\"{}_retry_timeout\"]", COLLECTION_EDIT_ID),
            &scheduler.timeout,
        )
        .await
    }

    pub async fn configure_server(&mut self, server: &ServerConfig) -> HarnessResult<()> {
        info!("Configuring MQTT server {}:{}", server.server_address, server.port);
        select_option(
            self.page,
            &format!("{} [test-id=\"input-plugin\"]", SERVER_SECTION),
            "MQTT",
            self.timeout,
        )
        .await?;

        let fields = [
            ("input-mqtt_host", &server.server_address),
            ("input-mqtt_port", &server.port),
            ("input-mqtt_keepalive", &server.keepalive),
            ("input-mqtt_topic", &server.topic),
            ("input-mqtt_client_id", &server.client_id),
        ];
        for (input, value) in fields {
            fill_visible(
                self.page,
                &format!("{} {}", SERVER_SECTION, test_id(input)),
                value,
                self.timeout,
            )
            .await?;
        }

        select_option(
            self.page,
            &format!("{} [test-id=\"input-mqtt_qos\"]", SERVER_SECTION),
            &server.qos,
            self.timeout,
        )
        .await?;

        if let Some(source) = server.certificate_source() {
            self.modal_switch("mqtt_tls", true, "server TLS").await?;
            self.page
                .click(&test_id("selectwrapper-mqtt_tls_type"), false)
                .await?;
            self.page.pause(SHORT_SETTLE).await?;
            self.page
                .click(
                    "[test-id=\"selectwrapper-mqtt_tls_type-listbox\"] [test-id=\"selectoption-cert\"]",
                    false,
                )
                .await?;

            let insecure = server
                .secure_connection
                .as_ref()
                .map(|s| s.allow_insecure_connection)
                .unwrap_or(false);
            self.modal_switch("mqtt_insecure", insecure, "server insecure connection")
                .await?;
            self.apply_tls_files(source, &SERVER_TLS).await?;
        }

        if server.use_credentials {
            self.modal_switch("mqtt_use_credentials", true, "server credentials")
                .await?;
            fill_visible(
                self.page,
                &test_id("input-mqtt_username"),
                server.username.as_deref().unwrap_or_default(),
                self.timeout,
            )
            .await?;
            self.page
                .fill(
                    &test_id("input-mqtt_password"),
                    server.password.as_deref().unwrap_or_default(),
                )
                .await?;
        }
        Ok(())
    }
}

fn first_text(value: &Value) -> Option<String> {
    value_texts(value).into_iter().next()
}
