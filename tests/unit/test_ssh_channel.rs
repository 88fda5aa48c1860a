use router_harness::channels::{broker, data_sender};
use router_harness::certs::CertificateManager;
use router_harness::error::HarnessError;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::common::{
    broker_scenario, dts_scenario, mqtt_forwarding, plain_broker, DeviceState, FakeShell,
};

fn fake_shell() -> (FakeShell, Arc<Mutex<DeviceState>>) {
    let state = Arc::new(Mutex::new(DeviceState::default()));
    (
        FakeShell {
            state: state.clone(),
        },
        state,
    )
}

fn plain_forwarding() -> serde_json::Value {
    let mut config = mqtt_forwarding();
    config["server_config"]["enable_secure_connection"] = json!(false);
    config
}

#[tokio::test]
async fn test_broker_over_ssh_commits_and_restarts() {
    let (mut shell, state) = fake_shell();
    let temp_dir = TempDir::new().unwrap();
    let certs = CertificateManager::new(temp_dir.path().to_path_buf());
    let scenario = broker_scenario("basic", plain_broker());

    broker::configure_via_ssh(&mut shell, &certs, scenario.broker().unwrap())
        .await
        .unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.get("mosquitto.mqtt.enabled"), Some("1"));
    assert_eq!(state.get("mosquitto.mqtt.local_port"), Some("'1883'"));
    assert_eq!(state.get("mosquitto.mqtt.anonymous_access"), Some("1"));
    assert_eq!(state.get("mosquitto.mqtt.use_tls_ssl"), Some("0"));
    assert_eq!(state.commits, vec!["mosquitto".to_string()]);
    assert!(state
        .commands
        .contains(&"/etc/init.d/mosquitto restart".to_string()));
}

#[tokio::test]
async fn test_broker_not_running_after_restart_fails() {
    let (mut shell, state) = fake_shell();
    state.lock().unwrap().broker_service_down = true;
    let temp_dir = TempDir::new().unwrap();
    let certs = CertificateManager::new(temp_dir.path().to_path_buf());
    let scenario = broker_scenario("basic", plain_broker());

    let err = broker::configure_via_ssh(&mut shell, &certs, scenario.broker().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::ValidationFailed(_)));
}

#[tokio::test]
async fn test_data_sender_over_ssh_creates_linked_sections() {
    let (mut shell, state) = fake_shell();
    let scenario = dts_scenario("dts", plain_forwarding());

    let sections = data_sender::configure_via_ssh(&mut shell, scenario.data_sender().unwrap())
        .await
        .unwrap();

    let state = state.lock().unwrap();
    let collection = format!("data_sender.{}", sections.collection);
    assert_eq!(state.get(&format!("{}.name", collection)), Some("harness_dts"));
    assert_eq!(state.get(&format!("{}.enabled", collection)), Some("1"));
    assert_eq!(
        state.get(&format!("{}.output", collection)),
        Some(sections.output.as_str())
    );
    assert_eq!(
        state.get(&format!("data_sender.{}.mqtt_host", sections.output)),
        Some("test.mosquitto.org")
    );
    assert_eq!(
        state.get(&format!("data_sender.{}.mqtt_port", sections.output)),
        Some("1338")
    );
    assert_eq!(
        state.get(&format!("data_sender.{}.name", sections.input)),
        Some("harness_input")
    );
    assert_eq!(state.commits, vec!["data_sender".to_string()]);
}

#[tokio::test]
async fn test_data_sender_rerun_reuses_sections() {
    let (mut shell, state) = fake_shell();
    let scenario = dts_scenario("dts", plain_forwarding());
    let config = scenario.data_sender().unwrap();

    let first = data_sender::configure_via_ssh(&mut shell, config).await.unwrap();
    let second = data_sender::configure_via_ssh(&mut shell, config).await.unwrap();

    assert_eq!(first.collection, second.collection);
    assert_eq!(first.output, second.output);
    assert_eq!(first.input, second.input);
    assert!(second.created.is_empty());
    assert_eq!(
        state.lock().unwrap().count_sections("data_sender", "collection"),
        1
    );
}
