use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Device under test plus the ordered scenario lists to run against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device: DeviceInfo,
    #[serde(default)]
    pub mqtt_scenarios: Vec<String>,
    #[serde(default)]
    pub dts_scenarios: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub modem: Option<String>,
    pub ip: String,
    pub credentials: Credentials,
    pub ssh: SshCredentials,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SshCredentials {
    pub username: String,
    pub password: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl std::fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

impl DeviceConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: DeviceConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.name.trim().is_empty() {
            anyhow::bail!("Device name cannot be empty");
        }

        if self.device.ip.trim().is_empty() {
            anyhow::bail!("Device IP cannot be empty");
        }

        if self.device.credentials.username.is_empty() || self.device.credentials.password.is_empty() {
            anyhow::bail!("Device web credentials require both username and password");
        }

        if self.device.ssh.username.is_empty() || self.device.ssh.password.is_empty() {
            anyhow::bail!("Device SSH credentials require both username and password");
        }

        if self.device.ssh.port == 0 {
            anyhow::bail!("SSH port cannot be zero");
        }

        Ok(())
    }

    pub fn web_url(&self, path: &str) -> String {
        format!("https://{}/{}", self.device.ip, path.trim_start_matches('/'))
    }

    pub fn api_base_url(&self) -> String {
        format!("https://{}/api", self.device.ip)
    }
}

/// Local harness settings (TOML). Everything has a default so the file is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HarnessSettings {
    pub browser: BrowserSettings,
    pub ssh: SshSettings,
    pub api: ApiSettings,
    pub validation: ValidationSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub node_binary: String,
    /// `node_modules` directory holding `playwright`. When unset, the
    /// `node_modules` of the working directory is used if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_path: Option<PathBuf>,
    pub browser: String,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub element_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub binary: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub request_timeout_secs: u64,
    pub restart_grace_secs: u64,
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub overall_timeout_secs: u64,
    pub message_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub results_dir: PathBuf,
    pub certificate_dir: PathBuf,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            node_path: None,
            browser: "firefox".to_string(),
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            element_timeout_secs: 30,
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            restart_grace_secs: 2,
            accept_invalid_certs: true,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            overall_timeout_secs: 120,
            message_wait_secs: 10,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        let certificate_dir = match dirs::home_dir() {
            Some(home) => home.join(".router-harness").join("certs"),
            None => {
                tracing::warn!("Home directory not available, using local certificate directory");
                PathBuf::from("certs")
            }
        };

        Self {
            results_dir: PathBuf::from("results"),
            certificate_dir,
        }
    }
}

impl HarnessSettings {
    /// Loads settings, falling back to defaults when the file does not exist.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Settings file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;

        let mut settings: HarnessSettings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))?;

        settings.output.results_dir = Self::expand_path(&settings.output.results_dir);
        settings.output.certificate_dir = Self::expand_path(&settings.output.certificate_dir);
        settings.browser.node_path = settings
            .browser
            .node_path
            .as_deref()
            .map(Self::expand_path);

        settings.validate()?;
        Ok(settings)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
        }

        let content =
            toml::to_string_pretty(self).context("Failed to serialize settings to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {:?}", path))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.browser.node_binary.is_empty() {
            anyhow::bail!("Browser node binary cannot be empty");
        }

        if !matches!(self.browser.browser.as_str(), "chromium" | "firefox" | "webkit") {
            anyhow::bail!(
                "Unsupported browser '{}': expected chromium, firefox or webkit",
                self.browser.browser
            );
        }

        if self.browser.element_timeout_secs == 0 {
            anyhow::bail!("Element timeout must be greater than zero");
        }

        if self.ssh.binary.is_empty() {
            anyhow::bail!("SSH binary cannot be empty");
        }

        if self.validation.overall_timeout_secs < self.validation.message_wait_secs {
            anyhow::bail!("Overall validation timeout must cover the message wait window");
        }

        Ok(())
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.browser.element_timeout_secs)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_secs(self.api.restart_grace_secs)
    }

    pub fn get_config_path() -> PathBuf {
        if let Ok(config_dir) = std::env::var("ROUTER_HARNESS_CONFIG_DIR") {
            PathBuf::from(config_dir).join("harness.toml")
        } else if let Some(home) = dirs::home_dir() {
            home.join(".router-harness").join("harness.toml")
        } else {
            PathBuf::from("harness.toml")
        }
    }

    /// Expands a path that may contain ~ to the user's home directory
    pub fn expand_path(path: &Path) -> PathBuf {
        if let Some(path_str) = path.to_str() {
            if let Some(rest) = path_str.strip_prefix("~/") {
                if let Some(home) = dirs::home_dir() {
                    return home.join(rest);
                }
            }
        }
        path.to_path_buf()
    }
}
