//! Post-configuration checks: device state over SSH plus a live MQTT probe.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::data_sender::UCI_CONFIG;
use crate::channels::uci;
use crate::config::ValidationSettings;
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::broker::BrokerConfig;
use crate::scenario::data_sender::{DtsConfig, ServerConfig};
use crate::ssh::RemoteShell;

/// Section ids checked when no collection carries the instance name.
const FALLBACK_COLLECTION: &str = "2";
const FALLBACK_OUTPUT: &str = "3";
const FALLBACK_INPUT: &str = "5";

/// Observes messages on the forwarding target.
#[async_trait]
pub trait MessageProbe: Send {
    /// Subscribes to the server's topic and returns the first payload seen
    /// within `wait`, or `None`.
    async fn wait_for_message(
        &mut self,
        server: &ServerConfig,
        wait: Duration,
    ) -> HarnessResult<Option<Vec<u8>>>;
}

/// MQTT subscriber with a random client id.
#[derive(Debug, Default)]
pub struct MqttProbe;

#[async_trait]
impl MessageProbe for MqttProbe {
    async fn wait_for_message(
        &mut self,
        server: &ServerConfig,
        wait: Duration,
    ) -> HarnessResult<Option<Vec<u8>>> {
        let port: u16 = server
            .port
            .parse()
            .map_err(|_| HarnessError::Scenario(format!("Invalid MQTT port: {}", server.port)))?;
        let client_id = format!("router-harness-probe-{}", Uuid::new_v4());

        let mut mqtt_options = MqttOptions::new(&client_id, &server.server_address, port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(true);
        if server.use_credentials {
            if let (Some(username), Some(password)) = (&server.username, &server.password) {
                mqtt_options.set_credentials(username, password);
            }
        }
        if server.enable_secure_connection {
            warn!("Probe connects to {} without TLS", server.server_address);
        }

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, 10);
        client
            .subscribe(&server.topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| HarnessError::ConnectionFailure(format!("MQTT subscribe failed: {}", e)))?;
        info!(
            "Waiting up to {:?} for a message on {}:{} topic {}",
            wait, server.server_address, port, server.topic
        );

        let received = tokio::time::timeout(wait, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!("Probe received message on topic: {}", publish.topic);
                        return Ok(publish.payload.to_vec());
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        debug!("Probe connected to MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(HarnessError::ConnectionFailure(format!(
                            "MQTT connection error: {}",
                            e
                        )))
                    }
                }
            }
        })
        .await;

        if let Err(e) = client.disconnect().await {
            debug!("Probe disconnect failed: {}", e);
        }

        match received {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }
}

/// Data-to-server sections belonging to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedSections {
    pub collection: String,
    pub output: String,
    pub input: String,
    /// Whether a collection named after the instance was found.
    pub found: bool,
}

/// Finds the instance's collection by name and follows its input/output references.
pub fn locate_sections(show: &str, instance: &str) -> LocatedSections {
    let entries = uci::entries(show);
    let option = |id: &str, key: &str| {
        uci::lookup(&entries, &format!("{}.{}.{}", UCI_CONFIG, id, key)).map(str::to_string)
    };

    let collection = uci::sections(show, UCI_CONFIG)
        .into_iter()
        .find(|(id, kind)| kind == "collection" && option(id, "name").as_deref() == Some(instance))
        .map(|(id, _)| id);

    match collection {
        Some(id) => LocatedSections {
            output: option(&id, "output").unwrap_or_else(|| FALLBACK_OUTPUT.to_string()),
            input: option(&id, "input").unwrap_or_else(|| FALLBACK_INPUT.to_string()),
            collection: id,
            found: true,
        },
        None => LocatedSections {
            collection: FALLBACK_COLLECTION.to_string(),
            output: FALLBACK_OUTPUT.to_string(),
            input: FALLBACK_INPUT.to_string(),
            found: false,
        },
    }
}

/// Lines of a `ps | grep` listing that are not the grep itself.
pub fn process_running(ps_output: &str, name: &str) -> bool {
    ps_output
        .lines()
        .any(|line| line.contains(name) && !line.contains("grep"))
}

pub struct Validator<'a> {
    shell: &'a mut dyn RemoteShell,
    probe: &'a mut dyn MessageProbe,
    settings: &'a ValidationSettings,
}

impl<'a> Validator<'a> {
    pub fn new(
        shell: &'a mut dyn RemoteShell,
        probe: &'a mut dyn MessageProbe,
        settings: &'a ValidationSettings,
    ) -> Self {
        Self {
            shell,
            probe,
            settings,
        }
    }

    /// Runs every check within the overall time limit. Failed checks are
    /// collected into one `ValidationFailed`.
    pub async fn validate(&mut self, broker: &BrokerConfig, dts: &DtsConfig) -> HarnessResult<()> {
        let limit = Duration::from_secs(self.settings.overall_timeout_secs);
        let failures = tokio::time::timeout(limit, self.run_checks(broker, dts))
            .await
            .map_err(|_| HarnessError::timeout("validation", limit))??;

        if failures.is_empty() {
            info!("Validation passed");
            Ok(())
        } else {
            warn!("Validation failed: {}", failures.join("; "));
            Err(HarnessError::ValidationFailed(failures))
        }
    }

    async fn run_checks(&mut self, broker: &BrokerConfig, dts: &DtsConfig) -> HarnessResult<Vec<String>> {
        let mut failures = self.check_broker(broker).await?;
        failures.extend(self.check_data_sender(dts).await?);

        let wait = Duration::from_secs(self.settings.message_wait_secs);
        match self.probe.wait_for_message(&dts.server, wait).await {
            Ok(Some(payload)) => info!("Received MQTT message ({} bytes)", payload.len()),
            Ok(None) => failures.push("no MQTT message received".to_string()),
            Err(e) => failures.push(format!("MQTT probe failed: {}", e)),
        }
        Ok(failures)
    }

    /// `uci show` of one option; a missing entry is `None`.
    async fn show(&mut self, path: &str) -> HarnessResult<Option<String>> {
        match self.shell.execute(&format!("uci show {}", path)).await {
            Ok(output) => Ok(uci::value(&output)),
            Err(HarnessError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn check_broker(&mut self, broker: &BrokerConfig) -> HarnessResult<Vec<String>> {
        info!("Checking MQTT broker state");
        let mut failures = Vec::new();

        if self.show("mosquitto.mqtt.enabled").await?.as_deref() != Some("1") {
            failures.push("MQTT broker not enabled".to_string());
        }

        let expected_port = broker.expected_port();
        let port = self.show("mosquitto.mqtt.local_port").await?;
        if port.as_deref() != Some(expected_port.as_str()) {
            failures.push(format!(
                "broker port is {}, expected {}",
                port.unwrap_or_else(|| "unset".to_string()),
                expected_port
            ));
        }

        if let Some(anonymous) = broker.anonymous_access() {
            let expected = if anonymous { "1" } else { "0" };
            let actual = self.show("mosquitto.mqtt.anonymous_access").await?;
            if actual.as_deref().unwrap_or("0") != expected {
                failures.push(format!(
                    "anonymous_access is {}, expected {}",
                    actual.unwrap_or_else(|| "unset".to_string()),
                    expected
                ));
            }
        }

        let ps = match self.shell.execute("ps | grep mosquitto").await {
            Ok(output) => output,
            Err(HarnessError::CommandFailed { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        if !process_running(&ps, "mosquitto") {
            failures.push("mosquitto process not running".to_string());
        }
        Ok(failures)
    }

    pub async fn check_data_sender(&mut self, dts: &DtsConfig) -> HarnessResult<Vec<String>> {
        info!("Checking Data to Server instance {}", dts.instance_name);
        let show = self.shell.execute(&format!("uci show {}", UCI_CONFIG)).await?;
        let sections = locate_sections(&show, &dts.instance_name);
        if !sections.found {
            warn!(
                "No collection named {}, checking default sections",
                dts.instance_name
            );
        }

        let entries = uci::entries(&show);
        let get = |id: &str, key: &str| {
            uci::lookup(&entries, &format!("{}.{}.{}", UCI_CONFIG, id, key)).unwrap_or("")
        };

        let mut failures = Vec::new();
        let mut expect = |what: &str, actual: &str, expected: &str| {
            if actual != expected {
                failures.push(format!("{} is '{}', expected '{}'", what, actual, expected));
            }
        };

        let c = sections.collection.as_str();
        expect("collection name", get(c, "name"), &dts.instance_name);
        expect("collection enabled", get(c, "enabled"), "1");
        expect("collection timer", get(c, "timer"), dts.collection.timer());

        let o = sections.output.as_str();
        let server = &dts.server;
        expect("output host", get(o, "mqtt_host"), &server.server_address);
        expect("output topic", get(o, "mqtt_topic"), &server.topic);
        expect("output client id", get(o, "mqtt_client_id"), &server.client_id);
        expect("output QoS", get(o, "mqtt_qos"), &server.qos);

        Ok(failures)
    }

    /// Deletes the instance's sections and commits.
    pub async fn cleanup(&mut self, dts: &DtsConfig) -> HarnessResult<()> {
        let show = self.shell.execute(&format!("uci show {}", UCI_CONFIG)).await?;
        let sections = locate_sections(&show, &dts.instance_name);
        if !sections.found {
            info!("No sections to clean up for {}", dts.instance_name);
            return Ok(());
        }

        for id in [&sections.collection, &sections.input, &sections.output] {
            self.shell
                .execute(&format!("uci -q delete {}.{} || true", UCI_CONFIG, id))
                .await?;
        }
        self.shell.execute(&uci::commit(UCI_CONFIG)).await?;
        info!("Removed Data to Server instance {}", dts.instance_name);
        Ok(())
    }
}
