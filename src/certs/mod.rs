use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::scenario::CertificateFiles;

const CA_COMMON_NAME: &str = "MQTT Broker CA";
const SERVER_COMMON_NAME: &str = "mqtt.local";
const ORGANIZATION: &str = "Home MQTT Infrastructure";
const COUNTRY: &str = "LT";
const VALIDITY: std::time::Duration = std::time::Duration::from_secs(365 * 24 * 60 * 60);

/// 0600 for private keys, 0644 otherwise. No-op off unix.
fn set_secure_file_permissions(path: &Path, is_private_key: bool) -> Result<()> {
    #[cfg(unix)]
    {
        let mut perms = fs::metadata(path)?.permissions();
        let mode = if is_private_key { 0o600 } else { 0o644 };
        perms.set_mode(mode);
        fs::set_permissions(path, perms)?;
    }

    #[cfg(windows)]
    {
        let _ = (path, is_private_key);
    }

    Ok(())
}

/// Writes through a temporary sibling and renames into place.
fn write_file_securely(path: &Path, contents: &str, is_private_key: bool) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temporary file: {:?}", temp_path))?;
    set_secure_file_permissions(&temp_path, is_private_key)
        .with_context(|| format!("Failed to set permissions on {:?}", temp_path))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to move {:?} to final location", path))?;

    Ok(())
}

/// Moves a file, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    if fs::rename(from, to).is_err() {
        fs::copy(from, to).with_context(|| format!("Failed to copy {:?} to {:?}", from, to))?;
        fs::remove_file(from).with_context(|| format!("Failed to remove {:?}", from))?;
    }
    Ok(())
}

/// Paths of a freshly generated broker bundle.
#[derive(Debug, Clone)]
pub struct BrokerBundle {
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub serial_number: String,
    pub is_valid: bool,
    pub days_until_expiry: i64,
    pub sha256_fingerprint: String,
}

pub struct CertificateManager {
    cert_dir: PathBuf,
}

impl CertificateManager {
    pub fn new(cert_dir: PathBuf) -> Self {
        Self { cert_dir }
    }

    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    fn distinguished_name(common_name: &str) -> DistinguishedName {
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, common_name);
        name.push(DnType::OrganizationName, ORGANIZATION);
        name.push(DnType::CountryName, COUNTRY);
        name
    }

    fn validity(params: &mut CertificateParams) {
        let now = std::time::SystemTime::now();
        params.not_before = now.into();
        params.not_after = (now + VALIDITY).into();
    }

    /// Creates a CA and a `mqtt.local` server certificate signed by it.
    pub fn generate_broker_bundle(&self) -> Result<BrokerBundle> {
        info!("Generating MQTT broker certificates in {:?}", self.cert_dir);
        fs::create_dir_all(&self.cert_dir).context("Failed to create certificate directory")?;

        let mut ca_params = CertificateParams::new(Vec::<String>::new());
        ca_params.distinguished_name = Self::distinguished_name(CA_COMMON_NAME);
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        ca_params.key_pair = Some(KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?);
        Self::validity(&mut ca_params);
        let ca = Certificate::from_params(ca_params).context("Failed to generate CA certificate")?;

        let mut server_params = CertificateParams::new(vec![SERVER_COMMON_NAME.to_string()]);
        server_params.distinguished_name = Self::distinguished_name(SERVER_COMMON_NAME);
        server_params.subject_alt_names = vec![SanType::DnsName(SERVER_COMMON_NAME.to_string())];
        server_params.is_ca = IsCa::NoCa;
        server_params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        server_params.key_pair = Some(KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?);
        Self::validity(&mut server_params);
        let server = Certificate::from_params(server_params)
            .context("Failed to generate server certificate")?;

        let bundle = BrokerBundle {
            ca_file: self.cert_dir.join("ca.crt"),
            cert_file: self.cert_dir.join("server.crt"),
            key_file: self.cert_dir.join("server.key"),
        };

        let ca_pem = ca.serialize_pem().context("Failed to serialize CA certificate")?;
        write_file_securely(&bundle.ca_file, &ca_pem, false)?;

        let server_pem = server
            .serialize_pem_with_signer(&ca)
            .context("Failed to sign server certificate")?;
        write_file_securely(&bundle.cert_file, &server_pem, false)?;

        write_file_securely(&bundle.key_file, &server.serialize_private_key_pem(), true)?;

        info!("CA certificate saved to {:?}", bundle.ca_file);
        info!("Server certificate saved to {:?}", bundle.cert_file);
        info!("Server key saved to {:?}", bundle.key_file);
        Ok(bundle)
    }

    /// Returns usable certificate paths for an upload, generating a bundle when
    /// any configured file is missing or not a currently valid certificate.
    /// Generated files are moved onto the configured paths only when none of
    /// those paths holds a file; otherwise the bundle stays in the certificate
    /// directory and existing files are left untouched.
    pub fn prepare_broker_certificates(&self, files: &CertificateFiles) -> Result<CertificateFiles> {
        if Self::bundle_usable(files) {
            debug!("All certificate files already exist, no generation needed");
            return Ok(files.clone());
        }

        let bundle = self.generate_broker_bundle()?;
        let generated = |path: &Path| path.to_string_lossy().into_owned();

        let occupied: Vec<&str> = [&files.ca, &files.cert, &files.key]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|p| Path::new(p).exists())
            .collect();
        if !occupied.is_empty() {
            warn!(
                "Configured certificate files {:?} are incomplete; using generated bundle in {:?}",
                occupied, self.cert_dir
            );
            return Ok(CertificateFiles {
                ca: Some(generated(&bundle.ca_file)),
                cert: Some(generated(&bundle.cert_file)),
                key: Some(generated(&bundle.key_file)),
            });
        }

        let place = |configured: &Option<String>, from: &Path| -> Result<String> {
            match configured {
                Some(target) => {
                    move_file(from, Path::new(target))?;
                    Ok(target.clone())
                }
                None => Ok(generated(from)),
            }
        };

        Ok(CertificateFiles {
            ca: Some(place(&files.ca, &bundle.ca_file)?),
            cert: Some(place(&files.cert, &bundle.cert_file)?),
            key: Some(place(&files.key, &bundle.key_file)?),
        })
    }

    fn bundle_usable(files: &CertificateFiles) -> bool {
        let valid_cert = |path: &Option<String>| {
            path.as_deref()
                .map(|p| matches!(certificate_info(Path::new(p)), Ok(info) if info.is_valid))
                .unwrap_or(false)
        };
        let key_present = files
            .key
            .as_deref()
            .map(|p| Path::new(p).exists())
            .unwrap_or(false);

        valid_cert(&files.ca) && valid_cert(&files.cert) && key_present
    }
}

fn first_certificate_der(pem: &str) -> Result<Vec<u8>> {
    use rustls_pemfile::Item;

    let mut cursor = std::io::Cursor::new(pem.as_bytes());
    let item = rustls_pemfile::read_one(&mut cursor)
        .context("Failed to parse PEM data")?
        .ok_or_else(|| anyhow::anyhow!("No PEM data found"))?;

    match item {
        Item::X509Certificate(der) => Ok(der.to_vec()),
        _ => anyhow::bail!("PEM data is not a certificate"),
    }
}

pub fn parse_certificate_info(cert_pem: &str) -> Result<CertificateInfo> {
    use sha2::{Digest, Sha256};
    use x509_parser::prelude::*;

    let cert_der = first_certificate_der(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| anyhow::anyhow!("Failed to parse X.509 certificate: {}", e))?;

    let not_before = DateTime::<Utc>::from_timestamp(cert.validity().not_before.timestamp(), 0)
        .unwrap_or_else(Utc::now);
    let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .unwrap_or_else(Utc::now);
    let now = Utc::now();

    let mut hasher = Sha256::new();
    hasher.update(&cert_der);

    Ok(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        not_before,
        not_after,
        serial_number: cert.serial.to_string(),
        is_valid: now >= not_before && now <= not_after,
        days_until_expiry: (not_after - now).num_days(),
        sha256_fingerprint: format!("{:x}", hasher.finalize()),
    })
}

pub fn certificate_info(path: &Path) -> Result<CertificateInfo> {
    let pem = fs::read_to_string(path)
        .with_context(|| format!("Failed to read certificate file: {:?}", path))?;
    parse_certificate_info(&pem).with_context(|| format!("Invalid certificate: {:?}", path))
}

/// Logs a warning when a private key is readable by anyone but its owner.
pub fn check_private_key_permissions(path: &Path) -> Result<bool> {
    #[cfg(unix)]
    {
        let mode = fs::metadata(path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?
            .permissions()
            .mode();
        if mode & 0o777 != 0o600 {
            warn!("Private key file has insecure permissions: {:o}", mode & 0o777);
            return Ok(false);
        }
    }

    #[cfg(windows)]
    {
        let _ = path;
    }

    Ok(true)
}
