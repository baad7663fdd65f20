//! Per-request auth material. Three credential shapes: literal api keys,
//! OAuth device-flow tokens (with refresh), and plaintext key files.

pub mod oauth;
pub mod qwen;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

pub use oauth::{OAuthAuth, OAuthConfig};

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("token file {path}: {message}")]
    TokenFile { path: String, message: String },
    #[error("oauth http: {message}")]
    Http { message: String },
    #[error("oauth: {message}")]
    OAuth { message: String },
    #[error("auth file {path}: {message}")]
    AuthFile { path: String, message: String },
}

/// Literal api key with a configurable header name and value prefix.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    pub header: String,
    pub prefix: String,
    pub key: String,
}

impl ApiKeyAuth {
    pub fn bearer(key: impl Into<String>) -> Self {
        Self {
            header: "authorization".to_string(),
            prefix: "Bearer ".to_string(),
            key: key.into(),
        }
    }
}

/// Plaintext file whose contents are an api key.
#[derive(Debug, Clone)]
pub struct AuthFileAuth {
    pub path: PathBuf,
}

/// One credential binding, resolved from config.
#[derive(Clone)]
pub enum AuthProvider {
    ApiKey(ApiKeyAuth),
    OAuth(Arc<OAuthAuth>),
    AuthFile(AuthFileAuth),
}

impl AuthProvider {
    pub fn is_oauth(&self) -> bool {
        matches!(self, AuthProvider::OAuth(_))
    }

    /// Headers to merge into the outbound request.
    pub async fn build_headers(&self) -> Result<Vec<(String, String)>, AuthError> {
        match self {
            AuthProvider::ApiKey(auth) => Ok(vec![(
                auth.header.clone(),
                format!("{}{}", auth.prefix, auth.key),
            )]),
            AuthProvider::OAuth(auth) => {
                let token = auth.current_token().await?;
                Ok(vec![(
                    "authorization".to_string(),
                    format!("Bearer {}", token.bearer_token()),
                )])
            }
            AuthProvider::AuthFile(auth) => {
                let raw = tokio::fs::read_to_string(&auth.path).await.map_err(|err| {
                    AuthError::AuthFile {
                        path: auth.path.display().to_string(),
                        message: err.to_string(),
                    }
                })?;
                Ok(vec![(
                    "authorization".to_string(),
                    format!("Bearer {}", raw.trim()),
                )])
            }
        }
    }

    /// Refresh the credential after an upstream 401. Api keys and auth files
    /// only revalidate; OAuth forces a token refresh.
    pub async fn refresh_credentials(&self) -> Result<(), AuthError> {
        match self {
            AuthProvider::ApiKey(_) => Ok(()),
            AuthProvider::AuthFile(auth) => tokio::fs::metadata(&auth.path)
                .await
                .map(|_| ())
                .map_err(|err| AuthError::AuthFile {
                    path: auth.path.display().to_string(),
                    message: err.to_string(),
                }),
            AuthProvider::OAuth(auth) => auth.force_refresh().await.map(|_| ()),
        }
    }
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthProvider::ApiKey(auth) => f
                .debug_struct("ApiKey")
                .field("header", &auth.header)
                .finish_non_exhaustive(),
            AuthProvider::OAuth(auth) => f
                .debug_struct("OAuth")
                .field("provider", &auth.config().provider_id)
                .finish_non_exhaustive(),
            AuthProvider::AuthFile(auth) => f
                .debug_struct("AuthFile")
                .field("path", &auth.path)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_headers_use_prefix() {
        let auth = AuthProvider::ApiKey(ApiKeyAuth::bearer("sk-1"));
        let headers = auth.build_headers().await.unwrap();
        assert_eq!(
            headers,
            vec![("authorization".to_string(), "Bearer sk-1".to_string())]
        );
    }

    #[tokio::test]
    async fn auth_file_contents_become_bearer() {
        let path = std::env::temp_dir().join(format!("polyroute-authfile-{}", std::process::id()));
        tokio::fs::write(&path, "sk-from-file\n").await.unwrap();
        let auth = AuthProvider::AuthFile(AuthFileAuth { path: path.clone() });
        let headers = auth.build_headers().await.unwrap();
        assert_eq!(headers[0].1, "Bearer sk-from-file");
        tokio::fs::remove_file(&path).await.ok();
    }
}
