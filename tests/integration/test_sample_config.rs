use router_harness::channels::Channel;
use router_harness::config::{DeviceConfig, HarnessSettings};
use router_harness::report;
use router_harness::runner::Runner;
use router_harness::scenario::{load_scenarios, ScenarioKind};
use std::path::PathBuf;
use tempfile::TempDir;

use crate::common::{create_test_device, create_test_settings, FakeBackends};

fn sample_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

#[test]
fn test_shipped_configuration_loads() {
    let device = DeviceConfig::load_from_file(&sample_dir().join("device_config.json")).unwrap();
    let settings = HarnessSettings::load_from_file(&sample_dir().join("harness.toml")).unwrap();
    assert_eq!(settings.browser.browser, "firefox");
    assert!(!settings
        .output
        .certificate_dir
        .to_string_lossy()
        .starts_with('~'));

    let scenarios = load_scenarios(&device, &sample_dir().join("test_scenarios"));
    assert_eq!(scenarios.len(), 2);
    assert_eq!(scenarios[0].kind, ScenarioKind::MqttBroker);
    assert_eq!(scenarios[0].broker().unwrap().expected_port(), "1883");

    let dts = scenarios[1].data_sender().unwrap();
    assert_eq!(dts.server.server_address, "test.mosquitto.org");
    assert_eq!(dts.server.port, "1338");
}

#[test]
fn test_missing_scenarios_are_skipped() {
    let device = create_test_device();
    let temp_dir = TempDir::new().unwrap();
    assert!(load_scenarios(&device, temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_run_results_become_report() {
    let temp_dir = TempDir::new().unwrap();
    let device = DeviceConfig::load_from_file(&sample_dir().join("device_config.json")).unwrap();
    let settings = create_test_settings(&temp_dir);
    let scenarios = load_scenarios(&device, &sample_dir().join("test_scenarios"));

    let mut runner = Runner::new(&device, &settings, FakeBackends::default());
    let results = runner.run(&scenarios, &[Channel::Api]).await;
    assert_eq!(results.len(), 3);

    let path = report::write_report(&results, &device, &settings.output.results_dir).unwrap();
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("RUTX11_"));
    assert!(name.ends_with("_EG06_RUTX_R_00.07.06.csv"));

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.trim_end().split("\r\n").collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "scenario,channel,status,details,timestamp");
    assert!(lines[1].starts_with("mqtt_broker_api_basic_broker,api,PASS,"));
    assert!(lines[2].starts_with("data_to_server_api_mqtt_forward,api,PASS,"));
    assert!(lines[3].starts_with("validation_basic_broker_mqtt_forward,api,PASS,"));
}

#[tokio::test]
async fn test_shipped_scenarios_pass_on_every_channel() {
    let temp_dir = TempDir::new().unwrap();
    let device = DeviceConfig::load_from_file(&sample_dir().join("device_config.json")).unwrap();
    let settings = create_test_settings(&temp_dir);
    let scenarios = load_scenarios(&device, &sample_dir().join("test_scenarios"));
    let backends = FakeBackends::default();

    let mut runner = Runner::new(&device, &settings, backends.clone());
    let results = runner
        .run(&scenarios, &Channel::parse_selection("all").unwrap())
        .await;

    let names: Vec<&str> = results.iter().map(|r| r.scenario.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "mqtt_broker_ssh_basic_broker",
            "data_to_server_ssh_mqtt_forward",
            "validation_basic_broker_mqtt_forward",
            "mqtt_broker_api_basic_broker",
            "data_to_server_api_mqtt_forward",
            "validation_basic_broker_mqtt_forward",
            "mqtt_broker_gui_basic_broker",
            "data_to_server_gui_mqtt_forward",
        ]
    );
    for row in &results {
        assert!(row.passed, "{} on {} failed: {}", row.scenario, row.channel, row.details);
    }

    // Certificates are picked from the device store, never read locally.
    let page = backends.page.lock().unwrap();
    assert!(page.uploads.is_empty());
    assert!(page.options.contains(&"ca.cert.pem".to_string()));
    assert!(page.options.contains(&"client.key.pem".to_string()));
}
