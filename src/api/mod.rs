//! Device REST API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ApiSettings, DeviceConfig};
use crate::error::{HarnessError, HarnessResult};

/// Authenticated access to the device configuration API.
///
/// Implementors provide raw requests and uploads; the configuration helpers
/// are built on top of them.
#[async_trait]
pub trait DeviceApi: Send {
    /// Sends one request to `endpoint` (relative to `/api`). A status outside
    /// 200..300 is `ApiRequestFailed`.
    async fn request(
        &mut self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> HarnessResult<Value>;

    /// Multipart upload with an `option` field naming the target option.
    async fn upload(
        &mut self,
        endpoint: &str,
        option: &str,
        file_name: &str,
        content: Vec<u8>,
    ) -> HarnessResult<Value>;

    /// Pause after a service restart before the device is used again.
    fn restart_grace(&self) -> Duration;

    /// Configuration subtree at `path`, without the `data` envelope.
    async fn get_config(&mut self, path: &str) -> HarnessResult<Value> {
        let response = self.request(Method::GET, path, None).await?;
        Ok(match response {
            Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        })
    }

    /// Applies `body` at `path`. A body without a `data` envelope is wrapped.
    async fn set_config(&mut self, path: &str, body: Value) -> HarnessResult<Value> {
        let body = match body {
            Value::Object(map) if map.contains_key("data") => Value::Object(map),
            other => json!({ "data": other }),
        };
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Restarts a service and waits the fixed grace period. No readiness polling.
    async fn restart_service(&mut self, name: &str) -> HarnessResult<Value> {
        info!("Restarting service {}", name);
        let response = self
            .request(Method::POST, &format!("services/{}/restart", name), None)
            .await?;
        tokio::time::sleep(self.restart_grace()).await;
        Ok(response)
    }

    /// Submits several requests in one `bulk` call.
    async fn bulk(&mut self, requests: Vec<BulkRequest>) -> HarnessResult<Value> {
        let data: Vec<Value> = requests.iter().map(BulkRequest::to_json).collect();
        self.request(Method::POST, "bulk", Some(json!({ "data": data })))
            .await
    }
}

/// One entry of a `bulk` call. Endpoints are absolute (`/api/...`).
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRequest {
    pub method: Method,
    pub endpoint: String,
    pub data: Option<Value>,
}

impl BulkRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            endpoint: endpoint.into(),
            data: None,
        }
    }

    pub fn put(endpoint: impl Into<String>, data: Value) -> Self {
        Self {
            method: Method::PUT,
            endpoint: endpoint.into(),
            data: Some(data),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut entry = json!({
            "method": self.method.as_str(),
            "endpoint": self.endpoint,
        });
        if let Some(data) = &self.data {
            entry["data"] = data.clone();
        }
        entry
    }
}

/// `data[index].data` of a bulk response when that entry succeeded.
pub fn bulk_entry(response: &Value, index: usize) -> Option<&Value> {
    let entry = response.get("data")?.get(index)?;
    if entry.get("success").and_then(Value::as_bool) == Some(true) {
        entry.get("data")
    } else {
        None
    }
}

/// HTTPS client holding the bearer token for one channel run.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
    restart_grace: Duration,
}

impl ApiClient {
    /// Logs in with the device credentials. Any non-200 answer is an
    /// authentication failure.
    pub async fn connect(device: &DeviceConfig, settings: &ApiSettings) -> HarnessResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        let base_url = device.api_base_url();
        let credentials = &device.device.credentials;

        info!("Authenticating to {} as {}", base_url, credentials.username);
        let response = client
            .post(format!("{}/login", base_url))
            .json(&json!({
                "username": credentials.username,
                "password": credentials.password,
            }))
            .send()
            .await
            .map_err(|e| HarnessError::ConnectionFailure(format!("{}: {}", base_url, e)))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status != StatusCode::OK {
            return Err(HarnessError::AuthenticationFailure(format!(
                "login returned {}",
                status.as_u16()
            )));
        }

        let token = body
            .pointer("/data/token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                HarnessError::AuthenticationFailure("login response carried no token".to_string())
            })?
            .to_string();
        info!("API authentication successful");

        Ok(Self {
            client,
            base_url,
            token,
            restart_grace: Duration::from_secs(settings.restart_grace_secs),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn read_response(response: reqwest::Response) -> HarnessResult<Value> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(HarnessError::ApiRequestFailed {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(parse_body(&text))
    }
}

/// JSON body, or `{"text": ...}` for anything else.
pub fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "text": text }))
}

#[async_trait]
impl DeviceApi for ApiClient {
    async fn request(
        &mut self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> HarnessResult<Value> {
        debug!("API {} {}", method, endpoint);
        let mut request = self
            .client
            .request(method, self.url(endpoint))
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        Self::read_response(response).await
    }

    async fn upload(
        &mut self,
        endpoint: &str,
        option: &str,
        file_name: &str,
        content: Vec<u8>,
    ) -> HarnessResult<Value> {
        debug!("API upload {} -> {} ({})", file_name, endpoint, option);
        let form = Form::new()
            .text("option", option.to_string())
            .part("file", Part::bytes(content).file_name(file_name.to_string()));
        let response = self
            .client
            .post(self.url(endpoint))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        Self::read_response(response).await
    }

    fn restart_grace(&self) -> Duration {
        self.restart_grace
    }
}
