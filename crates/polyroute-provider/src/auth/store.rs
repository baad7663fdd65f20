use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::AuthError;

/// Persisted OAuth token material:
/// `auth/<provider>-oauth-<id>-<alias>.json` under the state directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFile {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Stable api key obtained post-authorize (qwen); preferred over the
    /// short-lived access token when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// `norefresh` marks credentials that must not be refreshed.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl TokenFile {
    pub fn is_norefresh(&self) -> bool {
        self.kind.as_deref() == Some("norefresh")
    }

    /// Expired or about to: refresh ahead of a ~5 minute margin.
    pub fn needs_refresh(&self, margin_secs: i64) -> bool {
        if self.is_norefresh() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => {
                OffsetDateTime::now_utc().unix_timestamp() + margin_secs >= expires_at
            }
            None => false,
        }
    }

    /// The value that goes into the Authorization header.
    pub fn bearer_token(&self) -> &str {
        self.api_key.as_deref().unwrap_or(&self.access_token)
    }
}

/// Token file storage with atomic persist (write-temp-then-rename).
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_alias(auth_dir: &Path, provider: &str, id: &str, alias: &str) -> Self {
        Self::new(auth_dir.join(format!("{provider}-oauth-{id}-{alias}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<TokenFile, AuthError> {
        let raw = tokio::fs::read(&self.path).await.map_err(|err| {
            AuthError::TokenFile {
                path: self.path.display().to_string(),
                message: err.to_string(),
            }
        })?;
        serde_json::from_slice(&raw).map_err(|err| AuthError::TokenFile {
            path: self.path.display().to_string(),
            message: format!("invalid token file: {err}"),
        })
    }

    pub async fn save(&self, token: &TokenFile) -> Result<(), AuthError> {
        let raw = serde_json::to_vec_pretty(token).map_err(|err| AuthError::TokenFile {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AuthError::TokenFile {
                    path: self.path.display().to_string(),
                    message: err.to_string(),
                })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .map_err(|err| AuthError::TokenFile {
                path: tmp.display().to_string(),
                message: err.to_string(),
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| AuthError::TokenFile {
                path: self.path.display().to_string(),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: i64) -> TokenFile {
        TokenFile {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(OffsetDateTime::now_utc().unix_timestamp() + expires_in),
            token_type: Some("Bearer".to_string()),
            scope: None,
            api_key: None,
            kind: None,
        }
    }

    #[test]
    fn refresh_margin_is_respected() {
        assert!(token(60).needs_refresh(300));
        assert!(!token(3600).needs_refresh(300));
    }

    #[test]
    fn norefresh_credentials_never_refresh() {
        let mut t = token(-10);
        t.kind = Some("norefresh".to_string());
        t.api_key = Some("sk-stable".to_string());
        assert!(!t.needs_refresh(300));
        assert_eq!(t.bearer_token(), "sk-stable");
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("polyroute-test-{}", std::process::id()));
        let store = TokenStore::for_alias(&dir, "qwen", "1", "k1");
        store.save(&token(3600)).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.access_token, "at");
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
