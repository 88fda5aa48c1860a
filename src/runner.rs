//! Drives scenarios through the requested channels and collects one result
//! row per attempt.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::api::{ApiClient, DeviceApi};
use crate::browser::{PageDriver, PlaywrightPage};
use crate::certs::CertificateManager;
use crate::channels::{broker, data_sender, Channel, TestResult};
use crate::config::{DeviceConfig, HarnessSettings};
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{BrokerConfig, DtsConfig, Scenario, ScenarioConfig, ScenarioKind};
use crate::ssh::{OpenSshShell, RemoteShell};
use crate::validator::{MessageProbe, MqttProbe, Validator};

const APPLIED: &str = "Configuration applied";

/// Opens device sessions. Each call yields a fresh session owned by the caller.
#[async_trait]
pub trait Backends: Send {
    async fn shell(&mut self) -> HarnessResult<Box<dyn RemoteShell>>;
    async fn api(&mut self) -> HarnessResult<Box<dyn DeviceApi>>;
    async fn page(&mut self) -> HarnessResult<Box<dyn PageDriver>>;
    fn probe(&mut self) -> Box<dyn MessageProbe>;
}

/// Sessions against the real device.
pub struct LiveBackends<'a> {
    device: &'a DeviceConfig,
    settings: &'a HarnessSettings,
}

impl<'a> LiveBackends<'a> {
    pub fn new(device: &'a DeviceConfig, settings: &'a HarnessSettings) -> Self {
        Self { device, settings }
    }
}

#[async_trait]
impl<'a> Backends for LiveBackends<'a> {
    async fn shell(&mut self) -> HarnessResult<Box<dyn RemoteShell>> {
        let shell = OpenSshShell::connect(self.device, &self.settings.ssh).await?;
        Ok(Box::new(shell))
    }

    async fn api(&mut self) -> HarnessResult<Box<dyn DeviceApi>> {
        let client = ApiClient::connect(self.device, &self.settings.api).await?;
        Ok(Box::new(client))
    }

    async fn page(&mut self) -> HarnessResult<Box<dyn PageDriver>> {
        let page = PlaywrightPage::launch(&self.settings.browser).await?;
        Ok(Box::new(page))
    }

    fn probe(&mut self) -> Box<dyn MessageProbe> {
        Box::new(MqttProbe)
    }
}

pub fn row_name(kind: ScenarioKind, channel: Channel, scenario: &str) -> String {
    format!("{}_{}_{}", kind, channel, scenario)
}

pub fn validation_row_name(broker: &str, dts: &str) -> String {
    format!("validation_{}_{}", broker, dts)
}

fn to_row(name: String, channel: Channel, result: HarnessResult<()>) -> TestResult {
    match result {
        Ok(()) => {
            info!("{} passed", name);
            TestResult::pass(name, channel.as_str(), APPLIED)
        }
        Err(e) => {
            error!("{} failed: {}", name, e);
            TestResult::fail(name, channel.as_str(), e.to_string())
        }
    }
}

/// Broker scenarios first, then data-to-server, each list in declaration order.
pub fn ordered(scenarios: &[Scenario]) -> Vec<&Scenario> {
    let brokers = scenarios.iter().filter(|s| s.kind == ScenarioKind::MqttBroker);
    let dts = scenarios.iter().filter(|s| s.kind == ScenarioKind::DataToServer);
    brokers.chain(dts).collect()
}

/// Last broker scenario in the run; validation is checked against it.
fn latest_broker(scenarios: &[Scenario]) -> Option<(&str, &BrokerConfig)> {
    scenarios
        .iter()
        .rev()
        .find_map(|s| s.broker().map(|b| (s.name.as_str(), b)))
}

/// Last data-to-server scenario in the run; validation rows carry its name.
fn latest_dts(scenarios: &[Scenario]) -> Option<&str> {
    scenarios
        .iter()
        .rev()
        .find(|s| s.kind == ScenarioKind::DataToServer)
        .map(|s| s.name.as_str())
}

pub struct Runner<'a, B: Backends> {
    device: &'a DeviceConfig,
    settings: &'a HarnessSettings,
    certs: CertificateManager,
    backends: B,
}

impl<'a, B: Backends> Runner<'a, B> {
    pub fn new(device: &'a DeviceConfig, settings: &'a HarnessSettings, backends: B) -> Self {
        let certs = CertificateManager::new(HarnessSettings::expand_path(
            &settings.output.certificate_dir,
        ));
        Self {
            device,
            settings,
            certs,
            backends,
        }
    }

    /// Runs every scenario on every channel, one channel after another.
    /// Failures become rows; nothing here aborts the run.
    pub async fn run(&mut self, scenarios: &[Scenario], channels: &[Channel]) -> Vec<TestResult> {
        let mut results = Vec::new();
        for &channel in channels {
            info!("=== {} channel ===", channel.as_str().to_uppercase());
            let rows = match channel {
                Channel::Ssh => self.run_ssh(scenarios).await,
                Channel::Api => self.run_api(scenarios).await,
                Channel::Gui => self.run_gui(scenarios).await,
            };
            results.extend(rows);
        }
        results
    }

    /// One failed row per scenario when the channel session cannot be opened.
    fn session_failed(&self, scenarios: &[Scenario], channel: Channel, err: &HarnessError) -> Vec<TestResult> {
        error!("{} session failed: {}", channel, err);
        ordered(scenarios)
            .into_iter()
            .map(|s| {
                TestResult::fail(
                    row_name(s.kind, channel, &s.name),
                    channel.as_str(),
                    err.to_string(),
                )
            })
            .collect()
    }

    async fn validate_on(
        &mut self,
        shell: &mut dyn RemoteShell,
        broker: &BrokerConfig,
        dts: &DtsConfig,
        cleanup: bool,
    ) -> HarnessResult<()> {
        let mut probe = self.backends.probe();
        let mut validator = Validator::new(shell, probe.as_mut(), &self.settings.validation);
        let result = validator.validate(broker, dts).await;
        if cleanup {
            if let Err(e) = validator.cleanup(dts).await {
                warn!("Cleanup of {} failed: {}", dts.instance_name, e);
            }
        }
        result
    }

    /// Validation on a fresh SSH session.
    async fn validate(&mut self, broker: &BrokerConfig, dts: &DtsConfig) -> HarnessResult<()> {
        let mut shell = self.backends.shell().await?;
        let result = self.validate_on(shell.as_mut(), broker, dts, false).await;
        if let Err(e) = shell.close().await {
            warn!("Failed to close validation SSH session: {}", e);
        }
        result
    }

    fn skipped_validation(name: String, channel: Channel) -> TestResult {
        warn!("{} skipped: configuration did not succeed", name);
        TestResult::fail(
            name,
            channel.as_str(),
            "Validation skipped: broker or data-to-server configuration failed",
        )
    }

    async fn run_ssh(&mut self, scenarios: &[Scenario]) -> Vec<TestResult> {
        let channel = Channel::Ssh;
        let mut shell = match self.backends.shell().await {
            Ok(shell) => shell,
            Err(e) => return self.session_failed(scenarios, channel, &e),
        };

        let latest = latest_broker(scenarios);
        let last_dts = latest_dts(scenarios).unwrap_or_default();
        let mut broker_ok = false;
        let mut results = Vec::new();

        for scenario in ordered(scenarios) {
            let name = row_name(scenario.kind, channel, &scenario.name);
            info!("Running {}", name);
            match &scenario.config {
                ScenarioConfig::Broker(config) => {
                    let result = broker::configure_via_ssh(shell.as_mut(), &self.certs, config).await;
                    broker_ok = result.is_ok();
                    results.push(to_row(name, channel, result));
                }
                ScenarioConfig::DataToServer(config) => {
                    let result = data_sender::configure_via_ssh(shell.as_mut(), config)
                        .await
                        .map(|_| ());
                    let dts_ok = result.is_ok();
                    results.push(to_row(name, channel, result));

                    if let Some((broker_name, broker)) = latest {
                        let row = validation_row_name(broker_name, last_dts);
                        if broker_ok && dts_ok {
                            let result = self.validate_on(shell.as_mut(), broker, config, true).await;
                            results.push(to_row(row, channel, result));
                        } else {
                            results.push(Self::skipped_validation(row, channel));
                        }
                    }
                }
            }
        }

        if let Err(e) = shell.close().await {
            warn!("Failed to close SSH session: {}", e);
        }
        results
    }

    async fn run_api(&mut self, scenarios: &[Scenario]) -> Vec<TestResult> {
        let channel = Channel::Api;
        let mut api = match self.backends.api().await {
            Ok(api) => api,
            Err(e) => return self.session_failed(scenarios, channel, &e),
        };

        let latest = latest_broker(scenarios);
        let last_dts = latest_dts(scenarios).unwrap_or_default();
        let mut broker_ok = false;
        let mut results = Vec::new();

        for scenario in ordered(scenarios) {
            let name = row_name(scenario.kind, channel, &scenario.name);
            info!("Running {}", name);
            match &scenario.config {
                ScenarioConfig::Broker(config) => {
                    let result = broker::configure_via_api(api.as_mut(), &self.certs, config).await;
                    broker_ok = result.is_ok();
                    results.push(to_row(name, channel, result));
                }
                ScenarioConfig::DataToServer(config) => {
                    let applied = data_sender::configure_via_api(api.as_mut(), config).await;
                    let ids = applied.as_ref().ok().copied();
                    results.push(to_row(name, channel, applied.map(|_| ())));

                    if let Some((broker_name, broker)) = latest {
                        let row = validation_row_name(broker_name, last_dts);
                        if broker_ok && ids.is_some() {
                            let result = self.validate(broker, config).await;
                            results.push(to_row(row, channel, result));
                        } else {
                            results.push(Self::skipped_validation(row, channel));
                        }
                    }

                    if let Some(ids) = ids {
                        if let Err(e) = data_sender::cleanup_via_api(api.as_mut(), &ids).await {
                            warn!("Failed to delete collection {}: {}", ids.collection, e);
                        }
                    }
                }
            }
        }
        results
    }

    async fn run_gui(&mut self, scenarios: &[Scenario]) -> Vec<TestResult> {
        let channel = Channel::Gui;
        let mut page = match self.backends.page().await {
            Ok(page) => page,
            Err(e) => return self.session_failed(scenarios, channel, &e),
        };
        let timeout = self.settings.element_timeout();

        let latest = latest_broker(scenarios);
        let mut broker_ok = false;
        let mut results = Vec::new();

        for scenario in ordered(scenarios) {
            let name = row_name(scenario.kind, channel, &scenario.name);
            info!("Running {}", name);
            match &scenario.config {
                ScenarioConfig::Broker(config) => {
                    let result = broker::configure_via_gui(
                        page.as_mut(),
                        self.device,
                        &self.certs,
                        timeout,
                        config,
                    )
                    .await;
                    broker_ok = result.is_ok();
                    results.push(to_row(name, channel, result));
                }
                ScenarioConfig::DataToServer(config) => {
                    let mut result =
                        data_sender::configure_via_gui(page.as_mut(), self.device, timeout, config)
                            .await;

                    // A GUI row covers the configuration and, with a broker loaded, its validation.
                    if let (true, Some((_, broker))) = (result.is_ok(), latest) {
                        result = if broker_ok {
                            self.validate(broker, config).await
                        } else {
                            Err(HarnessError::ValidationFailed(vec![
                                "broker configuration failed".to_string(),
                            ]))
                        };
                    }
                    results.push(to_row(name, channel, result));
                }
            }
        }

        if let Err(e) = page.close().await {
            warn!("Failed to close browser: {}", e);
        }
        results
    }
}
