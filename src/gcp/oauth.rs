//! Installed-app OAuth 2.0 flow
//!
//! Credentials are kept in a JSON credential store. When the store is empty
//! or marked invalid, the user is sent through the browser consent screen and
//! the authorization code is captured on a loopback redirect. Access tokens
//! are refreshed with the stored refresh token before they expire.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use url::Url;
use uuid::Uuid;

/// Refresh this long before the recorded expiry
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// OAuth client identity from a downloaded `client_secrets.json`
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse the Cloud Console download format (`installed` or `web` section)
    pub fn from_json(content: &str) -> Result<Self> {
        let file: ClientSecretsFile =
            serde_json::from_str(content).context("Invalid client secrets JSON")?;

        file.installed
            .or(file.web)
            .context("Client secrets must contain an 'installed' or 'web' section")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client secrets {}", path.display()))?;
        Self::from_json(&content)
    }
}

/// Token material persisted between runs
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Set once the refresh token has been rejected
    #[serde(default)]
    pub invalid: bool,
}

impl StoredCredentials {
    /// Usable without a refresh at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.invalid && now + Duration::seconds(EXPIRY_BUFFER_SECS) < self.expires_at
    }

    /// Whether the grant includes `scope`; an unrecorded scope is trusted
    pub fn covers_scope(&self, scope: &str) -> bool {
        match &self.scope {
            Some(granted) => granted.split_whitespace().any(|s| s == scope),
            None => true,
        }
    }

    /// Reusable for `scope` without a new consent
    pub fn usable_for(&self, scope: &str) -> bool {
        !self.invalid && self.covers_scope(scope)
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("invalid", &self.invalid)
            .finish_non_exhaustive()
    }
}

/// File-backed credential store
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load stored credentials; a missing or unreadable file counts as empty
    pub fn load(&self) -> Option<StoredCredentials> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(creds) => Some(creds),
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable credential store {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    pub fn save(&self, creds: &StoredCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(creds)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        // `mode` only applies on creation; tighten an existing file before writing
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        tracing::debug!("Credentials saved to {}", self.path.display());
        Ok(())
    }
}

/// Error body returned by the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthError {
    pub fn is_invalid_grant(&self) -> bool {
        self.error == "invalid_grant"
    }
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token endpoint returned {}", self.error)?;
        if let Some(desc) = &self.error_description {
            write!(f, ": {}", desc)?;
        }
        Ok(())
    }
}

impl std::error::Error for OAuthError {}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_credentials(self, previous_refresh: Option<String>) -> StoredCredentials {
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        StoredCredentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: Utc::now() + Duration::seconds(expires_in),
            scope: self.scope,
            invalid: false,
        }
    }
}

/// Credentials obtained through the installed-app flow
pub struct InstalledAppCredentials {
    secrets: ClientSecrets,
    store: CredentialStore,
    scope: String,
    http: Client,
    current: RwLock<StoredCredentials>,
}

impl InstalledAppCredentials {
    pub fn new(
        secrets: ClientSecrets,
        store: CredentialStore,
        scope: &str,
        http: Client,
        credentials: StoredCredentials,
    ) -> Self {
        Self {
            secrets,
            store,
            scope: scope.to_string(),
            http,
            current: RwLock::new(credentials),
        }
    }

    /// Load credentials from the store, running the consent flow when the
    /// store is empty or its credentials were marked invalid
    pub async fn authorize(
        secrets: ClientSecrets,
        store: CredentialStore,
        scope: &str,
        http: Client,
    ) -> Result<Self> {
        let credentials = match store.load() {
            Some(creds) if creds.usable_for(scope) => {
                tracing::info!("Using stored credentials from {}", store.path().display());
                creds
            }
            stored => {
                match &stored {
                    Some(creds) if creds.invalid => {
                        tracing::info!("Stored credentials are invalid, requesting consent")
                    }
                    Some(_) => tracing::info!(
                        "Stored credentials do not grant {}, requesting consent",
                        scope
                    ),
                    None => {}
                }
                let creds = run_consent_flow(&secrets, scope, &http).await?;
                store.save(&creds)?;
                creds
            }
        };

        Ok(Self::new(secrets, store, scope, http, credentials))
    }

    /// Get an access token, refreshing and persisting it when it is close to expiry
    pub async fn token(&self) -> Result<String> {
        {
            let current = self.current.read().await;
            if current.is_fresh(Utc::now()) {
                return Ok(current.access_token.clone());
            }
        }

        let mut current = self.current.write().await;
        if current.is_fresh(Utc::now()) {
            return Ok(current.access_token.clone());
        }

        if current.invalid {
            bail!(
                "Stored credentials are invalid. Run again to sign in ({})",
                self.store.path().display()
            );
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            current.invalid = true;
            self.store.save(&current)?;
            bail!("Access token expired and no refresh token is stored");
        };

        tracing::debug!("Refreshing access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
        ];

        match exchange(&self.http, &self.secrets.token_uri, &form).await {
            Ok(response) => {
                *current = response.into_credentials(Some(refresh_token));
                self.store.save(&current)?;
                Ok(current.access_token.clone())
            }
            Err(err) => {
                let rejected = err
                    .downcast_ref::<OAuthError>()
                    .is_some_and(OAuthError::is_invalid_grant);
                if rejected {
                    tracing::warn!("Refresh token rejected, marking credentials invalid");
                    current.invalid = true;
                    self.store.save(&current)?;
                }
                Err(err.context("Failed to refresh access token"))
            }
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

/// POST a form to the token endpoint
async fn exchange(http: &Client, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
    let response = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .context("Failed to reach token endpoint")?;

    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read token response")?;

    if !status.is_success() {
        let error = serde_json::from_str::<OAuthError>(&body).unwrap_or(OAuthError {
            error: status.to_string(),
            error_description: None,
        });
        return Err(error.into());
    }

    serde_json::from_str(&body).context("Failed to parse token response")
}

/// Build the consent screen URL
pub fn authorization_url(
    secrets: &ClientSecrets,
    scope: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<Url> {
    Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )
    .context("Invalid auth_uri in client secrets")
}

/// Extract the authorization code from the redirect's HTTP request line
pub fn parse_redirect(request_line: &str, expected_state: &str) -> Result<String> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .context("Malformed redirect request")?;
    let url = Url::parse(&format!("http://127.0.0.1{}", target))
        .context("Malformed redirect target")?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => bail!("Authorization denied: {}", value),
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        bail!("Authorization response state mismatch");
    }
    code.context("Authorization response is missing the code")
}

async fn run_consent_flow(
    secrets: &ClientSecrets,
    scope: &str,
    http: &Client,
) -> Result<StoredCredentials> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("Failed to open loopback listener for the OAuth redirect")?;
    let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());
    let state = Uuid::new_v4().to_string();
    let auth_url = authorization_url(secrets, scope, &redirect_uri, &state)?;

    println!("Go to the following link in your browser:");
    println!();
    println!("    {}", auth_url);
    println!();
    tracing::info!("Waiting for OAuth redirect on {}", redirect_uri);

    let (mut stream, peer) = listener.accept().await?;
    tracing::debug!("OAuth redirect from {}", peer);

    let (read_half, mut write_half) = stream.split();
    let mut request_line = String::new();
    BufReader::new(read_half)
        .read_line(&mut request_line)
        .await
        .context("Failed to read OAuth redirect")?;

    let code = parse_redirect(&request_line, &state);
    let page = match &code {
        Ok(_) => "Authentication complete. You can close this window.",
        Err(_) => "Authentication failed. Check the terminal for details.",
    };
    let reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        page.len(),
        page
    );
    write_half.write_all(reply.as_bytes()).await?;
    write_half.shutdown().await.ok();

    let code = code?;
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", redirect_uri.as_str()),
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
    ];
    let response = exchange(http, &secrets.token_uri, &form)
        .await
        .context("Failed to exchange authorization code")?;

    println!("Authentication successful.");
    let mut creds = response.into_credentials(None);
    creds.scope.get_or_insert_with(|| scope.to_string());
    Ok(creds)
}
