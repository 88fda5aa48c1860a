use reqwest::Method;
use router_harness::channels::{Channel, TestResult};
use router_harness::runner::Runner;
use router_harness::scenario::Scenario;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::common::{
    broker_scenario, create_test_device, create_test_settings, dts_scenario, mqtt_forwarding,
    plain_broker, FakeBackends,
};

fn plain_forwarding() -> Value {
    let mut config = mqtt_forwarding();
    config["server_config"]["enable_secure_connection"] = json!(false);
    config
}

async fn run(backends: FakeBackends, scenarios: &[Scenario], channels: &[Channel]) -> Vec<TestResult> {
    let temp_dir = TempDir::new().unwrap();
    let device = create_test_device();
    let settings = create_test_settings(&temp_dir);
    let mut runner = Runner::new(&device, &settings, backends);
    runner.run(scenarios, channels).await
}

fn row<'a>(results: &'a [TestResult], scenario: &str) -> &'a TestResult {
    results
        .iter()
        .find(|r| r.scenario == scenario)
        .unwrap_or_else(|| panic!("no result row named {}", scenario))
}

fn names(results: &[TestResult]) -> Vec<&str> {
    results.iter().map(|r| r.scenario.as_str()).collect()
}

#[tokio::test]
async fn test_ssh_run_orders_brokers_first_and_validates() {
    let backends = FakeBackends::default();
    let scenarios = vec![
        dts_scenario("dts", plain_forwarding()),
        broker_scenario("basic", plain_broker()),
    ];

    let results = run(backends.clone(), &scenarios, &[Channel::Ssh]).await;

    assert_eq!(
        names(&results),
        vec![
            "mqtt_broker_ssh_basic",
            "data_to_server_ssh_dts",
            "validation_basic_dts"
        ]
    );
    assert!(results.iter().all(|r| r.passed), "{:?}", results);
    assert!(results.iter().all(|r| r.channel == "ssh"));
    assert_eq!(
        backends.probe_waits.lock().unwrap().as_slice(),
        ["test.mosquitto.org:1338/router-harness/out".to_string()]
    );

    // Cleanup removes the instance after validation.
    let device = backends.device.lock().unwrap();
    assert_eq!(device.count_sections("data_sender", "collection"), 0);
    assert!(device.sessions_closed >= 1);
}

#[tokio::test]
async fn test_missing_message_fails_validation_only() {
    let backends = FakeBackends {
        message: None,
        ..FakeBackends::default()
    };
    let scenarios = vec![
        broker_scenario("basic", plain_broker()),
        dts_scenario("dts", plain_forwarding()),
    ];

    let results = run(backends.clone(), &scenarios, &[Channel::Ssh]).await;

    assert!(row(&results, "mqtt_broker_ssh_basic").passed);
    assert!(row(&results, "data_to_server_ssh_dts").passed);
    let validation = row(&results, "validation_basic_dts");
    assert!(!validation.passed);
    assert!(validation.details.contains("no MQTT message received"));
    assert_eq!(
        backends
            .device
            .lock()
            .unwrap()
            .count_sections("data_sender", "collection"),
        0
    );
}

#[tokio::test]
async fn test_failed_broker_skips_validation() {
    let backends = FakeBackends::default();
    backends.device.lock().unwrap().broker_service_down = true;
    let scenarios = vec![
        broker_scenario("basic", plain_broker()),
        dts_scenario("dts", plain_forwarding()),
    ];

    let results = run(backends.clone(), &scenarios, &[Channel::Ssh]).await;

    assert!(!row(&results, "mqtt_broker_ssh_basic").passed);
    assert!(row(&results, "data_to_server_ssh_dts").passed);
    let validation = row(&results, "validation_basic_dts");
    assert!(!validation.passed);
    assert!(validation.details.starts_with("Validation skipped"));
    assert!(backends.probe_waits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_validation_rows_name_the_latest_data_sender() {
    let backends = FakeBackends::default();
    let scenarios = vec![
        broker_scenario("basic", plain_broker()),
        dts_scenario("first", plain_forwarding()),
        dts_scenario("second", plain_forwarding()),
    ];

    let results = run(backends.clone(), &scenarios, &[Channel::Ssh]).await;

    assert_eq!(
        names(&results),
        vec![
            "mqtt_broker_ssh_basic",
            "data_to_server_ssh_first",
            "validation_basic_second",
            "data_to_server_ssh_second",
            "validation_basic_second"
        ]
    );
    assert!(results.iter().all(|r| r.passed), "{:?}", results);
    assert_eq!(backends.probe_waits.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_gui_data_sender_validates_saved_instance() {
    let backends = FakeBackends::default();
    let scenarios = vec![
        broker_scenario("basic", plain_broker()),
        dts_scenario("dts", plain_forwarding()),
    ];

    let results = run(backends.clone(), &scenarios, &[Channel::Gui]).await;

    assert_eq!(names(&results), vec!["mqtt_broker_gui_basic", "data_to_server_gui_dts"]);
    assert!(results.iter().all(|r| r.passed), "{:?}", results);

    let device = backends.device.lock().unwrap();
    assert_eq!(device.get("mosquitto.mqtt.enabled"), Some("1"));
    assert_eq!(device.count_sections("data_sender", "collection"), 1);
    assert_eq!(
        backends.probe_waits.lock().unwrap().as_slice(),
        ["test.mosquitto.org:1338/router-harness/out".to_string()]
    );
}

#[tokio::test]
async fn test_gui_broker_end_to_end() {
    let backends = FakeBackends::default();
    {
        let mut page = backends.page.lock().unwrap();
        page.values
            .insert("[test-id=\"input-local_port_0\"]".to_string(), "1884".to_string());
        page.checked
            .insert("div[test-id=\"switch-use_tls_ssl\"]".to_string(), true);
    }
    let scenarios = vec![broker_scenario("basic", plain_broker())];

    let results = run(backends.clone(), &scenarios, &[Channel::Gui]).await;

    assert_eq!(names(&results), vec!["mqtt_broker_gui_basic"]);
    assert!(results[0].passed, "{:?}", results[0]);
    assert_eq!(results[0].channel, "gui");

    let page = backends.page.lock().unwrap();
    assert_eq!(page.values["[test-id=\"input-local_port_0\"]"], "1883");
    assert!(page.is_checked("div[test-id=\"switch-enabled\"]"));
    assert!(!page.is_checked("div[test-id=\"switch-use_tls_ssl\"]"));
    assert!(page.is_checked("div[test-id=\"switch-anonymous_access\"]"));
    assert!(page.clicked("button-saveandapply"));
    assert!(page.clicked("header-logout"));
    assert!(page.visits.iter().any(|u| u.ends_with("/services/mqtt/broker")));
    assert!(page.closed);
}

#[tokio::test]
async fn test_gui_login_rejected_fails_row() {
    let backends = FakeBackends::default();
    backends.page.lock().unwrap().reject_login = true;
    let scenarios = vec![broker_scenario("basic", plain_broker())];

    let results = run(backends, &scenarios, &[Channel::Gui]).await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].passed);
    assert!(results[0].details.contains("Authentication failure"));
}

#[tokio::test]
async fn test_api_data_sender_passes_values_verbatim() {
    let backends = FakeBackends::default();
    let scenarios = vec![dts_scenario("dts", mqtt_forwarding())];

    let results = run(backends.clone(), &scenarios, &[Channel::Api]).await;

    assert_eq!(names(&results), vec!["data_to_server_api_dts"]);
    assert!(results[0].passed, "{:?}", results[0]);

    let api = backends.api.lock().unwrap();
    let server = api
        .bulk_entries()
        .into_iter()
        .find(|e| {
            e["method"] == "PUT"
                && e["endpoint"] == "/api/data_to_server/collections/config/1/servers/2"
        })
        .expect("server section submitted");
    let data = &server["data"];
    assert_eq!(data["mqtt_host"], "test.mosquitto.org");
    assert_eq!(data["mqtt_port"], "1338");
    assert_eq!(data["mqtt_tls"], "1");
    assert_eq!(data["mqtt_ca_file"], "/etc/certificates/ca.cert.pem");
    assert_eq!(data["mqtt_cert_file"], "/etc/certificates/client.cert.pem");
    assert_eq!(data["mqtt_key_file"], "/etc/certificates/client.key.pem");
    assert_eq!(data[".type"], "output");

    let delete = api
        .requests
        .iter()
        .find(|r| r.method == Method::DELETE)
        .expect("collection deleted after the run");
    assert_eq!(delete.body, Some(json!({ "data": ["1"] })));
    assert!(api.collections.is_empty());
}

#[tokio::test]
async fn test_all_channels_with_ssh_refused() {
    let backends = FakeBackends {
        refuse_ssh: true,
        ..FakeBackends::default()
    };
    let scenarios = vec![
        broker_scenario("basic", plain_broker()),
        dts_scenario("dts", plain_forwarding()),
    ];
    let channels = Channel::parse_selection("all").unwrap();

    let results = run(backends, &scenarios, &channels).await;

    let ssh: Vec<_> = results.iter().filter(|r| r.channel == "ssh").collect();
    assert_eq!(ssh.len(), 2);
    assert!(ssh.iter().all(|r| !r.passed && r.details.contains("Connection failure")));

    assert!(row(&results, "mqtt_broker_api_basic").passed);
    assert!(row(&results, "data_to_server_api_dts").passed);
    let api_validation = results
        .iter()
        .find(|r| r.channel == "api" && r.scenario == "validation_basic_dts")
        .expect("api validation row");
    assert!(!api_validation.passed);

    assert!(row(&results, "mqtt_broker_gui_basic").passed);
    // The GUI row carries its validation, which needs the refused SSH session.
    let gui_dts = row(&results, "data_to_server_gui_dts");
    assert!(!gui_dts.passed);
    assert!(gui_dts.details.contains("Connection failure"), "{}", gui_dts.details);

    let order: Vec<&str> = results.iter().map(|r| r.channel.as_str()).collect();
    let first_api = order.iter().position(|c| *c == "api").unwrap();
    let first_gui = order.iter().position(|c| *c == "gui").unwrap();
    assert!(order[..first_api].iter().all(|c| *c == "ssh"));
    assert!(order[first_api..first_gui].iter().all(|c| *c == "api"));
}
