//! Discord OAuth2 client for website login (authorization-code grant, `identify` scope).

use serde::Deserialize;

use crate::config::OAuthConfig;

const SCOPE: &str = "identify";

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// `/users/@me` response (fields we keep).
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Thin client over the Discord OAuth endpoints.
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    api_base: String,
    client: reqwest::Client,
}

impl OAuthClient {
    /// Build from resolved OAuth config. Returns None when client id, secret or redirect URI is missing.
    pub fn from_config(oauth: &OAuthConfig) -> Option<Self> {
        Some(Self {
            client_id: oauth.client_id.clone()?,
            client_secret: oauth.client_secret.clone()?,
            redirect_uri: oauth.redirect_uri.clone()?,
            api_base: oauth.api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// URL of the Discord consent page for the given anti-forgery state.
    pub fn authorize_url(&self, state: &str) -> Result<String, String> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/oauth2/authorize", self.api_base),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", SCOPE),
                ("state", state),
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(url.into())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, String> {
        let url = format!("{}/oauth2/token", self.api_base);
        let res = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("token exchange failed: {} {}", status, body));
        }
        res.json().await.map_err(|e| e.to_string())
    }

    /// Fetch the user that authorized the token.
    pub async fn fetch_user(&self, access_token: &str) -> Result<DiscordUser, String> {
        let url = format!("{}/users/@me", self.api_base);
        let res = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("users/@me failed: {} {}", status, body));
        }
        res.json().await.map_err(|e| e.to_string())
    }
}
