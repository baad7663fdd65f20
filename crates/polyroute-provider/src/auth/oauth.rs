use std::sync::{Arc, OnceLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::sleep;

use super::store::{TokenFile, TokenStore};
use super::{AuthError, qwen};

/// Refresh this far ahead of the recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 300;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub provider_id: String,
    pub alias: String,
    pub device_authorization_url: String,
    pub token_url: String,
    pub client_id: String,
    pub scope: String,
    /// Post-authorize endpoints probed for a stable api key (qwen).
    pub user_info_urls: Vec<String>,
}

/// OAuth credential with device-flow provisioning and singleflight refresh.
pub struct OAuthAuth {
    config: OAuthConfig,
    store: TokenStore,
    cached: Mutex<Option<TokenFile>>,
    /// One in-flight refresh per token; waiters re-check under the lock and
    /// observe the refreshed value instead of refreshing again.
    refresh_gate: Mutex<()>,
}

impl OAuthAuth {
    pub fn new(config: OAuthConfig, store: TokenStore) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            cached: Mutex::new(None),
            refresh_gate: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Current usable token, refreshing if it is within the expiry margin.
    pub async fn current_token(&self) -> Result<TokenFile, AuthError> {
        {
            let mut cached = self.cached.lock().await;
            if cached.is_none() {
                *cached = Some(self.store.load().await?);
            }
            let token = cached.as_ref().expect("filled above");
            if !token.needs_refresh(EXPIRY_MARGIN_SECS) {
                return Ok(token.clone());
            }
        }
        self.refresh_inner(false).await
    }

    /// Refresh regardless of recorded expiry (after an upstream 401).
    pub async fn force_refresh(&self) -> Result<TokenFile, AuthError> {
        self.refresh_inner(true).await
    }

    async fn refresh_inner(&self, force: bool) -> Result<TokenFile, AuthError> {
        let _gate = self.refresh_gate.lock().await;

        // A concurrent caller may have refreshed while this task waited.
        {
            let cached = self.cached.lock().await;
            if let Some(token) = cached.as_ref()
                && !force
                && !token.needs_refresh(EXPIRY_MARGIN_SECS)
            {
                return Ok(token.clone());
            }
        }

        let current = match self.cached.lock().await.clone() {
            Some(token) => token,
            None => self.store.load().await?,
        };
        if current.is_norefresh() {
            return Ok(current);
        }
        let refresh_token = current.refresh_token.clone().ok_or(AuthError::OAuth {
            message: "no refresh token; re-run device authorization".to_string(),
        })?;

        let response = request_token(
            &self.config.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ],
        )
        .await?;

        let mut token = token_from_response(response, Some(&current));
        self.maybe_upgrade(&mut token).await;
        self.store.save(&token).await?;
        *self.cached.lock().await = Some(token.clone());
        tracing::info!(
            provider = %self.config.provider_id,
            alias = %self.config.alias,
            "oauth token refreshed"
        );
        Ok(token)
    }

    /// Provision a fresh credential via the device flow. Long-lived; the
    /// caller owns cancellation.
    pub async fn device_authorize(&self) -> Result<TokenFile, AuthError> {
        let verifier = pkce_verifier();
        let challenge = pkce_challenge(&verifier);

        let device: DeviceCodeResponse = post_form(
            &self.config.device_authorization_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .await?;

        tracing::info!(
            provider = %self.config.provider_id,
            url = %device
                .verification_uri_complete
                .as_deref()
                .unwrap_or(&device.verification_uri),
            code = %device.user_code,
            "visit the verification URL to authorize this device"
        );

        let deadline =
            OffsetDateTime::now_utc().unix_timestamp() + device.expires_in.unwrap_or(900);
        let mut interval = device.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        loop {
            if OffsetDateTime::now_utc().unix_timestamp() >= deadline {
                return Err(AuthError::OAuth {
                    message: "device authorization expired before approval".to_string(),
                });
            }
            sleep(Duration::from_secs(interval)).await;

            let poll = post_form_raw(
                &self.config.token_url,
                &[
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                    ("device_code", device.device_code.as_str()),
                    ("client_id", self.config.client_id.as_str()),
                    ("code_verifier", verifier.as_str()),
                ],
            )
            .await?;

            match poll {
                PollOutcome::Token(response) => {
                    let mut token = token_from_response(response, None);
                    self.maybe_upgrade(&mut token).await;
                    self.store.save(&token).await?;
                    *self.cached.lock().await = Some(token.clone());
                    return Ok(token);
                }
                PollOutcome::Pending => {}
                PollOutcome::SlowDown => interval += 5,
                PollOutcome::Denied(message) => {
                    return Err(AuthError::OAuth { message });
                }
            }
        }
    }

    /// Qwen: exchange the access token for a stable api key and pin the
    /// credential as norefresh.
    async fn maybe_upgrade(&self, token: &mut TokenFile) {
        if self.config.user_info_urls.is_empty() || token.api_key.is_some() {
            return;
        }
        if let Some(api_key) =
            qwen::fetch_stable_api_key(&self.config.user_info_urls, &token.access_token).await
        {
            token.api_key = Some(api_key);
            token.kind = Some("norefresh".to_string());
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

enum PollOutcome {
    Token(TokenResponse),
    Pending,
    SlowDown,
    Denied(String),
}

fn token_from_response(response: TokenResponse, previous: Option<&TokenFile>) -> TokenFile {
    let expires_at = response
        .expires_in
        .map(|secs| OffsetDateTime::now_utc().unix_timestamp() + secs);
    TokenFile {
        access_token: response.access_token,
        refresh_token: response
            .refresh_token
            .or_else(|| previous.and_then(|token| token.refresh_token.clone())),
        expires_at,
        token_type: response.token_type,
        scope: response.scope,
        api_key: previous.and_then(|token| token.api_key.clone()),
        kind: previous.and_then(|token| token.kind.clone()),
    }
}

pub(crate) fn oauth_http_client() -> &'static wreq::Client {
    static CLIENT: OnceLock<wreq::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        wreq::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("oauth http client")
    })
}

async fn request_token(url: &str, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
    match post_form_raw(url, form).await? {
        PollOutcome::Token(token) => Ok(token),
        PollOutcome::Pending | PollOutcome::SlowDown => Err(AuthError::OAuth {
            message: "unexpected pending response to refresh".to_string(),
        }),
        PollOutcome::Denied(message) => Err(AuthError::OAuth { message }),
    }
}

async fn post_form<T: serde::de::DeserializeOwned>(
    url: &str,
    form: &[(&str, &str)],
) -> Result<T, AuthError> {
    let body = serde_urlencoded::to_string(form).map_err(|err| AuthError::Http {
        message: err.to_string(),
    })?;
    let response = oauth_http_client()
        .post(url)
        .header("content-type", "application/x-www-form-urlencoded")
        .header("accept", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|err| AuthError::Http {
            message: err.to_string(),
        })?;
    let status = response.status().as_u16();
    let bytes = response.bytes().await.map_err(|err| AuthError::Http {
        message: err.to_string(),
    })?;
    if !(200..300).contains(&status) {
        return Err(AuthError::OAuth {
            message: format!("{url} returned {status}"),
        });
    }
    serde_json::from_slice(&bytes).map_err(|err| AuthError::Http {
        message: format!("invalid oauth response: {err}"),
    })
}

async fn post_form_raw(url: &str, form: &[(&str, &str)]) -> Result<PollOutcome, AuthError> {
    let body = serde_urlencoded::to_string(form).map_err(|err| AuthError::Http {
        message: err.to_string(),
    })?;
    let response = oauth_http_client()
        .post(url)
        .header("content-type", "application/x-www-form-urlencoded")
        .header("accept", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|err| AuthError::Http {
            message: err.to_string(),
        })?;
    let status = response.status().as_u16();
    let bytes = response.bytes().await.map_err(|err| AuthError::Http {
        message: err.to_string(),
    })?;

    if (200..300).contains(&status) {
        let token = serde_json::from_slice(&bytes).map_err(|err| AuthError::Http {
            message: format!("invalid token response: {err}"),
        })?;
        return Ok(PollOutcome::Token(token));
    }

    let error: OAuthErrorBody = serde_json::from_slice(&bytes).unwrap_or(OAuthErrorBody {
        error: None,
        error_description: None,
    });
    match error.error.as_deref() {
        Some("authorization_pending") => Ok(PollOutcome::Pending),
        Some("slow_down") => Ok(PollOutcome::SlowDown),
        Some(code) => Ok(PollOutcome::Denied(
            error
                .error_description
                .unwrap_or_else(|| format!("oauth error: {code}")),
        )),
        None => Ok(PollOutcome::Denied(format!(
            "token endpoint returned {status}"
        ))),
    }
}

fn pkce_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
