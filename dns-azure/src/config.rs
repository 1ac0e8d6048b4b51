//! certbot style INI configuration.

use std::path::{Path, PathBuf};

use fs_err as fs;
use regex::Regex;
use tracing::warn;

use crate::{
    credential::{CredentialOptions, Secret},
    environment::{AzureEnvironment, AZURE_ENVIRONMENT_VAR},
    error::{Error, Result},
    zone_resolver::ZoneMapping,
};

/// Prefix of every key, as used by the certbot plugin.
pub const KEY_PREFIX: &str = "dns_azure_";
const ZONE_KEY_PREFIX: &str = "zone";

/// Commented example configuration.
pub const CONFIG_TEMPLATE: &str = include_str!("../dns-azure.ini");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    pub credentials: CredentialOptions,
    pub environment: AzureEnvironment,
    pub zones: ZoneMapping,
}

impl AzureConfig {
    /// Load and validate a config file. `AZURE_ENVIRONMENT` is used when the
    /// file does not name a cloud.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        warn_if_unsafe_permissions(path);
        let content = fs::read_to_string(path)?;
        let default_environment = std::env::var(AZURE_ENVIRONMENT_VAR).ok();
        Self::parse(&content, default_environment.as_deref()).map_err(|err| match err {
            Error::Configuration(msg) => Error::Configuration(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn parse(content: &str, default_environment: Option<&str>) -> Result<Self> {
        let mut credentials = CredentialOptions::default();
        let mut environment = default_environment.map(str::to_string);
        let mut zones = vec![];

        for (key, value) in parse_ini(content)? {
            let Some(name) = key.strip_prefix(KEY_PREFIX) else {
                warn!("ignoring unknown config key: {key}");
                continue;
            };
            if name.starts_with(ZONE_KEY_PREFIX) {
                let Some((domain, resource_id)) = value.split_once(':') else {
                    return Err(Error::config(format!(
                        "DNS zone mapping {key} is not in the format of DOMAIN:DNS_ZONE_RESOURCE_GROUP_ID"
                    )));
                };
                zones.push((domain.trim().to_string(), resource_id.trim().to_string()));
                continue;
            }
            // Unset, like an absent key.
            if value.is_empty() {
                continue;
            }
            match name {
                "sp_client_id" => credentials.sp_client_id = Some(value),
                "sp_client_secret" => credentials.sp_client_secret = Some(Secret::new(value)),
                "sp_certificate_path" => {
                    credentials.sp_certificate_path = Some(PathBuf::from(value))
                }
                "tenant_id" => credentials.tenant_id = Some(value),
                "msi_client_id" => credentials.msi_client_id = Some(value),
                "msi_system_assigned" => credentials.msi_system_assigned = parse_bool(&key, &value)?,
                "use_cli_credentials" => credentials.use_cli_credentials = parse_bool(&key, &value)?,
                "use_workload_identity_credentials" => {
                    credentials.use_workload_identity_credentials = parse_bool(&key, &value)?
                }
                "environment" => environment = Some(value),
                _ => warn!("ignoring unknown config key: {key}"),
            }
        }

        if !credentials.has_auth_method() {
            return Err(Error::config(
                "No authentication methods have been configured for Azure DNS. \
                 Either configure a service principal, system/user assigned managed identity \
                 or configure the use of azure cli or workload identity credentials",
            ));
        }
        if zones.is_empty() {
            return Err(Error::config(format!(
                "At least one zone mapping needs to be provided, \
                 e.g {KEY_PREFIX}zone1 = DOMAIN:DNS_ZONE_RESOURCE_GROUP_ID"
            )));
        }
        let environment = match environment {
            Some(name) if !name.trim().is_empty() => name.parse()?,
            _ => AzureEnvironment::default(),
        };
        Ok(Self {
            credentials,
            environment,
            zones: ZoneMapping::new(zones)?,
        })
    }
}

/// `key = value` pairs in file order.
fn parse_ini(content: &str) -> Result<Vec<(String, String)>> {
    const KEY_REGEX: &str = r"^[a-zA-Z_][a-zA-Z0-9_]*$";
    let key_regex = Regex::new(KEY_REGEX)
        .map_err(|err| Error::config(format!("failed to compile key regex: {err}")))?;

    let mut pairs: Vec<(String, String)> = vec![];
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::config(format!(
                "line {}: expected `key = value`",
                lineno + 1
            )));
        };
        let key = key.trim();
        if !key_regex.is_match(key) {
            return Err(Error::config(format!(
                "line {}: invalid key {key:?}",
                lineno + 1
            )));
        }
        if pairs.iter().any(|(k, _)| k == key) {
            return Err(Error::config(format!(
                "line {}: duplicate key {key}",
                lineno + 1
            )));
        }
        pairs.push((key.to_string(), unquote(value.trim()).to_string()));
    }
    Ok(pairs)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::config(format!(
            "{key} must be true or false, got {value:?}"
        ))),
    }
}

#[cfg(unix)]
fn warn_if_unsafe_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = fs::metadata(path) {
        if metadata.permissions().mode() & 0o077 != 0 {
            warn!(
                "Unsafe permissions on configuration file: {}",
                path.display()
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_unsafe_permissions(_path: &Path) {}
