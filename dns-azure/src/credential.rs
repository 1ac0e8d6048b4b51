//! Azure credentials and bearer token retrieval.
//!
//! The token exchange itself is done by the Microsoft identity platform (or the
//! Azure CLI); this module only knows which request to send for each kind of
//! credential and caches the resulting token.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context, Result};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use fs_err as fs;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use ring::digest;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use x509_parser::prelude::Pem;

use crate::environment::Endpoints;

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// A string that is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Authentication related settings as they appear in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialOptions {
    pub sp_client_id: Option<String>,
    pub sp_client_secret: Option<Secret>,
    pub sp_certificate_path: Option<PathBuf>,
    pub tenant_id: Option<String>,
    pub msi_client_id: Option<String>,
    pub msi_system_assigned: bool,
    pub use_cli_credentials: bool,
    pub use_workload_identity_credentials: bool,
}

impl CredentialOptions {
    fn has_service_principal(&self) -> bool {
        self.sp_client_id.is_some()
            && self.tenant_id.is_some()
            && (self.sp_client_secret.is_some() || self.sp_certificate_path.is_some())
    }

    /// Whether any authentication method is configured.
    pub fn has_auth_method(&self) -> bool {
        self.has_service_principal()
            || self.msi_system_assigned
            || self.msi_client_id.is_some()
            || self.use_cli_credentials
            || self.use_workload_identity_credentials
    }

    /// Pick the credential to use. Falls back to the system assigned managed
    /// identity when nothing more specific is configured.
    pub fn select(&self) -> Credential {
        let tenant_id = self.tenant_id.clone();
        if self.use_cli_credentials {
            return Credential::Cli { tenant_id };
        }
        if self.use_workload_identity_credentials {
            return Credential::WorkloadIdentity { tenant_id };
        }
        if let (Some(client_id), Some(tenant_id)) = (&self.sp_client_id, &self.tenant_id) {
            if let Some(client_secret) = &self.sp_client_secret {
                return Credential::ClientSecret {
                    tenant_id: tenant_id.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                };
            }
            if let Some(certificate_path) = &self.sp_certificate_path {
                return Credential::ClientCertificate {
                    tenant_id: tenant_id.clone(),
                    client_id: client_id.clone(),
                    certificate_path: certificate_path.clone(),
                };
            }
        }
        Credential::ManagedIdentity {
            client_id: self.msi_client_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Reuse the login of the local `az` CLI.
    Cli { tenant_id: Option<String> },
    /// Federated token projected into the pod by AKS workload identity.
    WorkloadIdentity { tenant_id: Option<String> },
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: Secret,
    },
    /// Service principal authenticating with a certificate. The PEM file must
    /// hold the RSA private key (PKCS#1 or PKCS#8) and the certificate.
    ClientCertificate {
        tenant_id: String,
        client_id: String,
        certificate_path: PathBuf,
    },
    /// System assigned identity when `client_id` is `None`.
    ManagedIdentity { client_id: Option<String> },
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cli { .. } => "azure cli",
            Self::WorkloadIdentity { .. } => "workload identity",
            Self::ClientSecret { .. } => "service principal (secret)",
            Self::ClientCertificate { .. } => "service principal (certificate)",
            Self::ManagedIdentity { client_id: Some(_) } => "user assigned managed identity",
            Self::ManagedIdentity { client_id: None } => "system assigned managed identity",
        }
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: Instant,
}

impl AccessToken {
    fn new(token: String, expires_in: Duration) -> Self {
        Self {
            token,
            expires_at: Instant::now() + expires_in,
        }
    }

    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(deserialize_with = "number_or_string")]
    expires_in: u64,
}

/// IMDS reports `expires_in` as a string, the token endpoint as a number.
fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(u64),
        String(String),
    }
    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n),
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Hands out bearer tokens for the resource manager API.
#[derive(Debug)]
pub struct TokenProvider {
    credential: Credential,
    endpoints: Endpoints,
    http: Client,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(credential: Credential, endpoints: Endpoints) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to create http client")?;
        Ok(Self {
            credential,
            endpoints,
            http,
            cached: Mutex::new(None),
        })
    }

    /// Provider that always hands out `token`.
    #[cfg(test)]
    pub(crate) fn with_static_token(token: &str) -> Result<Self> {
        let provider = Self::new(
            Credential::ManagedIdentity { client_id: None },
            crate::environment::AzureEnvironment::default().endpoints(),
        )?;
        Ok(Self {
            cached: Mutex::new(Some(AccessToken::new(
                token.into(),
                Duration::from_secs(3600),
            ))),
            ..provider
        })
    }

    /// A valid bearer token, fetched again when the cached one is about to expire.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.token.clone());
        }
        debug!("requesting access token using {}", self.credential.kind());
        let token = self
            .fetch()
            .await
            .with_context(|| format!("failed to get access token ({})", self.credential.kind()))?;
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch(&self) -> Result<AccessToken> {
        let scope = self.endpoints.resource_manager_scope();
        match &self.credential {
            Credential::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => {
                self.request_token(
                    tenant_id,
                    &[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.expose()),
                        ("scope", scope.as_str()),
                    ],
                )
                .await
            }
            Credential::ClientCertificate {
                tenant_id,
                client_id,
                certificate_path,
            } => {
                let assertion = certificate_assertion(
                    certificate_path,
                    client_id,
                    &self.token_url(tenant_id),
                )?;
                self.request_token(
                    tenant_id,
                    &[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                        ("client_assertion", assertion.as_str()),
                        ("scope", scope.as_str()),
                    ],
                )
                .await
            }
            Credential::WorkloadIdentity { tenant_id } => {
                let tenant_id = match tenant_id {
                    Some(tenant_id) => tenant_id.clone(),
                    None => env_var("AZURE_TENANT_ID")?,
                };
                let client_id = env_var("AZURE_CLIENT_ID")?;
                let token_file = env_var("AZURE_FEDERATED_TOKEN_FILE")?;
                let assertion = fs::read_to_string(&token_file)?;
                self.request_token(
                    &tenant_id,
                    &[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                        ("client_assertion", assertion.trim()),
                        ("scope", scope.as_str()),
                    ],
                )
                .await
            }
            Credential::ManagedIdentity { client_id } => self.imds_token(client_id.as_deref()).await,
            Credential::Cli { tenant_id } => self.cli_token(tenant_id.as_deref()).await,
        }
    }

    fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}{tenant_id}/oauth2/v2.0/token",
            self.endpoints.active_directory
        )
    }

    async fn request_token(&self, tenant_id: &str, form: &[(&str, &str)]) -> Result<AccessToken> {
        let response = self
            .http
            .post(self.token_url(tenant_id))
            .form(form)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(
                "token endpoint returned {}: {}",
                response.status(),
                response.text().await?
            );
        }
        let response: TokenResponse = response
            .json()
            .await
            .context("failed to parse token response")?;
        Ok(AccessToken::new(
            response.access_token,
            Duration::from_secs(response.expires_in),
        ))
    }

    async fn imds_token(&self, client_id: Option<&str>) -> Result<AccessToken> {
        let mut query = vec![
            ("api-version", "2018-02-01"),
            ("resource", self.endpoints.resource_manager),
        ];
        if let Some(client_id) = client_id {
            query.push(("client_id", client_id));
        }
        let response = self
            .http
            .get(IMDS_TOKEN_URL)
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await
            .context("failed to reach the instance metadata service")?;
        if !response.status().is_success() {
            bail!(
                "instance metadata service returned {}: {}",
                response.status(),
                response.text().await?
            );
        }
        let response: TokenResponse = response
            .json()
            .await
            .context("failed to parse token response")?;
        Ok(AccessToken::new(
            response.access_token,
            Duration::from_secs(response.expires_in),
        ))
    }

    async fn cli_token(&self, tenant_id: Option<&str>) -> Result<AccessToken> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CliToken {
            access_token: String,
            #[serde(default, rename = "expires_on")]
            expires_on: Option<u64>,
        }

        let mut command = tokio::process::Command::new("az");
        command
            .args(["account", "get-access-token", "--output", "json"])
            .args(["--resource", self.endpoints.resource_manager]);
        if let Some(tenant_id) = tenant_id {
            command.args(["--tenant", tenant_id]);
        }
        let output = command.output().await.context("failed to run az")?;
        if !output.status.success() {
            bail!(
                "az account get-access-token failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let token: CliToken =
            serde_json::from_slice(&output.stdout).context("failed to parse az output")?;
        let expires_in = match token.expires_on {
            Some(expires_on) => {
                let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
                Duration::from_secs(expires_on.saturating_sub(now))
            }
            // Older CLI versions only report a local time string.
            None => EXPIRY_MARGIN * 2,
        };
        Ok(AccessToken::new(token.access_token, expires_in))
    }
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} is not set"))
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    sub: &'a str,
    jti: String,
    nbf: u64,
    exp: u64,
}

/// Build the signed JWT a service principal presents instead of a secret.
fn certificate_assertion(certificate_path: &Path, client_id: &str, audience: &str) -> Result<String> {
    let pem_data = fs::read(certificate_path)?;
    let mut key_pem = None;
    let mut cert_der = None;
    for pem in Pem::iter_from_buffer(&pem_data) {
        let pem = pem.context("invalid pem")?;
        match pem.label.as_str() {
            "PRIVATE KEY" | "RSA PRIVATE KEY" => {
                key_pem = Some(to_pem(&pem.label, &pem.contents))
            }
            "CERTIFICATE" if cert_der.is_none() => cert_der = Some(pem.contents),
            _ => {}
        }
    }
    let key_pem = key_pem.context("no RSA private key in certificate file")?;
    let cert_der = cert_der.context("no certificate in certificate file")?;
    let key = EncodingKey::from_rsa_pem(key_pem.as_bytes()).context("invalid RSA private key")?;

    let thumbprint = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &cert_der);
    let mut header = Header::new(Algorithm::RS256);
    header.x5t = Some(URL_SAFE_NO_PAD.encode(thumbprint.as_ref()));

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let claims = AssertionClaims {
        aud: audience,
        iss: client_id,
        sub: client_id,
        jti: format!("{:032x}", rand::random::<u128>()),
        nbf: now,
        exp: now + 600,
    };
    jsonwebtoken::encode(&header, &claims, &key).context("failed to sign client assertion")
}

fn to_pem(label: &str, der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}
