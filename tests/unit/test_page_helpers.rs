use router_harness::certs::CertificateManager;
use router_harness::pages::{
    clear_and_type, handle_switch, select_by_basename, upload_file, BrokerPage, Switch,
    UploadTarget,
};
use router_harness::scenario::{CertificateFiles, CertificateSource};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use crate::common::{create_test_device, FakePage, PageState};

const TIMEOUT: Duration = Duration::from_secs(5);

fn fake_page() -> (FakePage, Arc<Mutex<PageState>>) {
    let state = Arc::new(Mutex::new(PageState::default()));
    (
        FakePage {
            state: state.clone(),
        },
        state,
    )
}

#[tokio::test]
async fn test_switch_is_clicked_only_when_state_differs() {
    let (mut page, state) = fake_page();
    let switch = Switch::broker("enabled");

    let clicked = handle_switch(&mut page, &switch, true, "MQTT Broker", TIMEOUT)
        .await
        .unwrap();
    assert!(clicked);
    assert!(state.lock().unwrap().is_checked(&switch.state));

    let clicked_again = handle_switch(&mut page, &switch, true, "MQTT Broker", TIMEOUT)
        .await
        .unwrap();
    assert!(!clicked_again);
    assert_eq!(state.lock().unwrap().clicks.len(), 1);
}

#[tokio::test]
async fn test_switch_already_off_stays_untouched() {
    let (mut page, state) = fake_page();
    let switch = Switch::modal("mqtt_tls");

    let clicked = handle_switch(&mut page, &switch, false, "server TLS", TIMEOUT)
        .await
        .unwrap();
    assert!(!clicked);
    assert!(state.lock().unwrap().clicks.is_empty());
}

#[tokio::test]
async fn test_missing_switch_is_element_not_found() {
    let (mut page, state) = fake_page();
    state.lock().unwrap().absent.push("mqtt_allow_ra".to_string());

    let err = handle_switch(&mut page, &Switch::broker("allow_ra"), true, "remote access", TIMEOUT)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Element not found"));
}

#[tokio::test]
async fn test_clear_and_type_replaces_previous_value() {
    let (mut page, state) = fake_page();
    let input = "[test-id=\"input-local_port_0\"]";
    state
        .lock()
        .unwrap()
        .values
        .insert(input.to_string(), "1884".to_string());

    clear_and_type(&mut page, input, "1883").await.unwrap();
    assert_eq!(state.lock().unwrap().values[input], "1883");
}

#[tokio::test]
async fn test_device_file_is_selected_by_base_name() {
    let (mut page, state) = fake_page();

    select_by_basename(
        &mut page,
        "[test-id=\"input-ca_file\"]",
        "/etc/certificates/ca.cert.pem",
        TIMEOUT,
    )
    .await
    .unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.options, vec!["ca.cert.pem".to_string()]);
    assert!(state.clicked("input-ca_file"));
}

#[tokio::test]
async fn test_broker_device_certificates_pick_each_slot() {
    let (mut page, state) = fake_page();
    let temp_dir = TempDir::new().unwrap();
    let device = create_test_device();
    let certs = CertificateManager::new(temp_dir.path().to_path_buf());

    let source = CertificateSource::FromDevice(CertificateFiles {
        ca: Some("/etc/certificates/ca.cert.pem".to_string()),
        cert: None,
        key: Some("/etc/certificates/server.key.pem".to_string()),
    });
    BrokerPage::new(&mut page, &device, &certs, TIMEOUT)
        .apply_certificate_source(&source)
        .await
        .unwrap();

    let state = state.lock().unwrap();
    assert_eq!(
        state.options,
        vec!["ca.cert.pem".to_string(), "server.key.pem".to_string()]
    );
    assert!(state.uploads.is_empty());
}

#[tokio::test]
async fn test_upload_skipped_when_label_shows_a_file() {
    let (mut page, state) = fake_page();
    let target = UploadTarget::new("acl_file_path", "label[id=\"mqtt_acl_file_path-label\"]");
    state
        .lock()
        .unwrap()
        .labels
        .insert(target.label.clone(), "acl.txt".to_string());

    let uploaded = assert_ok!(
        upload_file(&mut page, &target, std::path::Path::new("/nonexistent/acl.txt"), TIMEOUT).await
    );
    assert!(!uploaded);
    assert!(state.lock().unwrap().uploads.is_empty());
}

#[tokio::test]
async fn test_upload_happens_on_default_label() {
    let (mut page, state) = fake_page();
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("acl.txt");
    std::fs::write(&file, "topic readwrite #\n").unwrap();
    let target = UploadTarget::new("acl_file_path", "label[id=\"mqtt_acl_file_path-label\"]");

    let uploaded = upload_file(&mut page, &target, &file, TIMEOUT).await.unwrap();
    assert!(uploaded);
    assert_eq!(
        state.lock().unwrap().uploads,
        vec![("[test-id=\"upload-input-acl_file_path\"]".to_string(), file)]
    );
}

#[tokio::test]
async fn test_upload_of_missing_file_fails() {
    let (mut page, _state) = fake_page();
    let target = UploadTarget::new("password_file", "label[id=\"mqtt_password_file-label\"]");

    assert_err!(
        upload_file(&mut page, &target, std::path::Path::new("/nonexistent/passwd"), TIMEOUT).await
    );
}
