//! Qwen post-authorize credential upgrade.
//!
//! After the device flow, the user-info endpoint can hand back a stable
//! `api_key` that outlives the short-lived access token. Both published
//! hosts are probed; the first that answers with a key wins.

use serde_json::Value;

use super::oauth::oauth_http_client;

pub const QWEN_USER_INFO_URLS: &[&str] = &[
    "https://chat.qwen.ai/api/v1/oauth2/userinfo",
    "https://portal.qwen.ai/api/v1/oauth2/userinfo",
];

pub async fn fetch_stable_api_key(urls: &[String], access_token: &str) -> Option<String> {
    for url in urls {
        match probe(url, access_token).await {
            Some(api_key) => return Some(api_key),
            None => {
                tracing::debug!(url = %url, "user-info endpoint yielded no api key");
            }
        }
    }
    None
}

async fn probe(url: &str, access_token: &str) -> Option<String> {
    let response = oauth_http_client()
        .get(url)
        .header("authorization", format!("Bearer {access_token}"))
        .header("accept", "application/json")
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body: Value = serde_json::from_slice(&response.bytes().await.ok()?).ok()?;
    extract_api_key(&body)
}

fn extract_api_key(body: &Value) -> Option<String> {
    for candidate in [
        body.get("api_key"),
        body.get("data").and_then(|data| data.get("api_key")),
    ]
    .into_iter()
    .flatten()
    {
        if let Some(key) = candidate.as_str()
            && !key.is_empty()
        {
            return Some(key.to_string());
        }
    }
    None
}
