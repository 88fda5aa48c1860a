use serde::Deserialize;
use std::collections::BTreeMap;

use super::lenient;
use super::{CertificateFiles, CertificateSource};

pub const PSK_TLS_TYPE: &str = "Pre-Shared-Key based";

/// Desired MQTT broker state. Absent fields are left untouched on the device.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub port: Option<String>,
    #[serde(default)]
    pub remote_access: Option<bool>,
    #[serde(default)]
    pub security: Option<SecurityConfig>,
    #[serde(default)]
    pub miscellaneous: Option<MiscConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(rename = "TLS/SSL", default)]
    pub tls_enabled: Option<bool>,
    #[serde(default)]
    pub certificates: Option<CertificateConfig>,
    #[serde(rename = "TLS_version", default)]
    pub tls_version: Option<String>,
}

impl SecurityConfig {
    pub fn is_empty(&self) -> bool {
        self.tls_enabled.is_none() && self.certificates.is_none() && self.tls_version.is_none()
    }

    /// Certificate fields and the TLS version only apply unless TLS is explicitly off.
    pub fn tls_allowed(&self) -> bool {
        self.tls_enabled != Some(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificateConfig {
    #[serde(default)]
    pub tls_type: Option<String>,
    #[serde(rename = "pre-shared-key", default)]
    pub pre_shared_key: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub require_certificate: Option<bool>,
    #[serde(default)]
    pub certificate_files_from_device: Option<bool>,
    #[serde(default)]
    pub device_certificates: Option<BrokerCertificateFiles>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerCertificateFiles {
    #[serde(default)]
    pub ca_file: Option<String>,
    #[serde(default)]
    pub certificate_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
}

impl From<&BrokerCertificateFiles> for CertificateFiles {
    fn from(files: &BrokerCertificateFiles) -> Self {
        CertificateFiles {
            ca: files.ca_file.clone(),
            cert: files.certificate_file.clone(),
            key: files.key_file.clone(),
        }
    }
}

impl CertificateConfig {
    pub fn is_psk(&self) -> bool {
        self.tls_type.as_deref() == Some(PSK_TLS_TYPE)
    }

    pub fn source(&self) -> CertificateSource {
        if self.is_psk() {
            return CertificateSource::Psk {
                key: self.pre_shared_key.clone().unwrap_or_default(),
                identity: self.identity.clone().unwrap_or_default(),
            };
        }

        let files = self
            .device_certificates
            .as_ref()
            .map(CertificateFiles::from)
            .unwrap_or_default();

        if self.certificate_files_from_device == Some(true) {
            CertificateSource::FromDevice(files)
        } else {
            CertificateSource::Upload(files)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MiscConfig {
    #[serde(default)]
    pub acl_file: Option<AclFileConfig>,
    #[serde(default)]
    pub password_file: Option<PasswordFileConfig>,
    #[serde(default)]
    pub persistence: Option<bool>,
    #[serde(default)]
    pub allow_anonymous: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub max_queued_messages: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub maximum_packet_size: Option<String>,
}

impl MiscConfig {
    pub fn is_empty(&self) -> bool {
        self.acl_file.is_none()
            && self.password_file.is_none()
            && self.persistence.is_none()
            && self.allow_anonymous.is_none()
            && self.max_queued_messages.is_none()
            && self.maximum_packet_size.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AclFileConfig {
    pub acl_file_location: String,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordFileConfig {
    pub password_file_location: String,
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

impl BrokerConfig {
    pub fn anonymous_access(&self) -> Option<bool> {
        self.miscellaneous.as_ref().and_then(|m| m.allow_anonymous)
    }

    pub fn tls_enabled(&self) -> bool {
        self.security
            .as_ref()
            .and_then(|s| s.tls_enabled)
            .unwrap_or(false)
    }

    pub fn certificates(&self) -> Option<&CertificateConfig> {
        self.security
            .as_ref()
            .filter(|s| s.tls_allowed())
            .and_then(|s| s.certificates.as_ref())
    }

    pub fn tls_version(&self) -> Option<&str> {
        self.security
            .as_ref()
            .filter(|s| s.tls_allowed())
            .and_then(|s| s.tls_version.as_deref())
    }

    /// Port the broker is expected to listen on after configuration.
    pub fn expected_port(&self) -> String {
        self.port.clone().unwrap_or_else(|| "1883".to_string())
    }
}
