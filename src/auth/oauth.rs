//! OAuth broker: provider authorization URLs, code exchange and normalized
//! user info for the closed {google, github} provider set.

use reqwest::Url;
use serde::Deserialize;

use crate::domain::OauthProvider;
use crate::infra::{GatewayError, Result};

const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const GOOGLE_SCOPES: &str = "https://www.googleapis.com/auth/userinfo.email \
                             https://www.googleapis.com/auth/userinfo.profile";

const GITHUB_AUTH_ENDPOINT: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_ENDPOINT: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_ENDPOINT: &str = "https://api.github.com/user";
const GITHUB_EMAILS_ENDPOINT: &str = "https://api.github.com/user/emails";
const GITHUB_SCOPES: &str = "user:email read:user";

/// GitHub rejects requests without a User-Agent.
const USER_AGENT: &str = concat!("osduth-gateway/", env!("CARGO_PKG_VERSION"));

/// Client credentials for one provider, as loaded from the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ProviderCredentials {
    fn configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// Normalized user info returned by every provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OauthUserInfo {
    pub provider_id: String,
    pub email: String,
    pub display_name: String,
}

/// Result of a code exchange. Refresh tokens are stored as a record only.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

struct ProviderClient {
    credentials: ProviderCredentials,
    redirect_url: String,
    auth_endpoint: String,
    token_endpoint: String,
    scopes: String,
}

pub struct OauthBroker {
    google: Option<ProviderClient>,
    github: Option<ProviderClient>,
    http: reqwest::Client,
}

impl OauthBroker {
    pub fn new(
        google: ProviderCredentials,
        github: ProviderCredentials,
        callback_base_url: &str,
    ) -> Self {
        let make = |creds: ProviderCredentials,
                    provider: OauthProvider,
                    auth: &str,
                    token: &str,
                    scopes: &str| {
            creds.configured().then(|| ProviderClient {
                credentials: creds,
                redirect_url: format!("{callback_base_url}/api/auth/callback/{provider}"),
                auth_endpoint: auth.to_string(),
                token_endpoint: token.to_string(),
                scopes: scopes.split_whitespace().collect::<Vec<_>>().join(" "),
            })
        };

        Self {
            google: make(
                google,
                OauthProvider::Google,
                GOOGLE_AUTH_ENDPOINT,
                GOOGLE_TOKEN_ENDPOINT,
                GOOGLE_SCOPES,
            ),
            github: make(
                github,
                OauthProvider::GitHub,
                GITHUB_AUTH_ENDPOINT,
                GITHUB_TOKEN_ENDPOINT,
                GITHUB_SCOPES,
            ),
            http: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self, provider: OauthProvider) -> bool {
        self.client(provider).is_ok()
    }

    fn client(&self, provider: OauthProvider) -> Result<&ProviderClient> {
        let client = match provider {
            OauthProvider::Google => self.google.as_ref(),
            OauthProvider::GitHub => self.github.as_ref(),
        };
        client.ok_or_else(|| GatewayError::ProviderNotConfigured(provider.to_string()))
    }

    /// Authorization URL the browser is redirected to.
    pub fn auth_url(&self, provider: OauthProvider, state: &str) -> Result<String> {
        let client = self.client(provider)?;
        let url = Url::parse_with_params(
            &client.auth_endpoint,
            &[
                ("client_id", client.credentials.client_id.as_str()),
                ("redirect_uri", client.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", client.scopes.as_str()),
                ("state", state),
                ("access_type", "offline"),
            ],
        )
        .map_err(|e| GatewayError::Internal(format!("auth url construction: {e}")))?;
        Ok(url.into())
    }

    /// Exchanges an authorization code for provider tokens.
    pub async fn exchange_code(
        &self,
        provider: OauthProvider,
        code: &str,
    ) -> Result<ExchangedToken> {
        let client = self.client(provider)?;

        let response = self
            .http
            .post(&client.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", client.credentials.client_id.as_str()),
                ("client_secret", client.credentials.client_secret.as_str()),
                ("redirect_uri", client.redirect_url.as_str()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::ProviderRequest(format!("token exchange: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::ProviderRequest(format!(
                "token exchange returned {status}: {body}"
            )));
        }

        response
            .json::<ExchangedToken>()
            .await
            .map_err(|e| GatewayError::ProviderRequest(format!("token response parse: {e}")))
    }

    /// Fetches user info and normalizes it per provider.
    pub async fn user_info(
        &self,
        provider: OauthProvider,
        access_token: &str,
    ) -> Result<OauthUserInfo> {
        // Fails early for unconfigured providers, before any network call.
        self.client(provider)?;

        match provider {
            OauthProvider::Google => self.google_user_info(access_token).await,
            OauthProvider::GitHub => self.github_user_info(access_token).await,
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| GatewayError::ProviderRequest(format!("userinfo fetch: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::ProviderRequest(format!(
                "userinfo returned {status}: {body}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::ProviderRequest(format!("userinfo parse: {e}")))
    }

    async fn google_user_info(&self, access_token: &str) -> Result<OauthUserInfo> {
        let info: GoogleUserInfo = self.fetch_json(GOOGLE_USERINFO_ENDPOINT, access_token).await?;
        normalize_google(info)
    }

    async fn github_user_info(&self, access_token: &str) -> Result<OauthUserInfo> {
        let user: GitHubUser = self.fetch_json(GITHUB_USER_ENDPOINT, access_token).await?;

        let emails = if user.email.as_deref().unwrap_or("").is_empty() {
            self.fetch_json::<Vec<GitHubEmail>>(GITHUB_EMAILS_ENDPOINT, access_token)
                .await?
        } else {
            Vec::new()
        };

        normalize_github(user, emails)
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    #[serde(default)]
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    #[serde(default)]
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    #[serde(default)]
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

fn normalize_google(info: GoogleUserInfo) -> Result<OauthUserInfo> {
    if info.email.is_empty() {
        return Err(GatewayError::ProviderUserDataInvalid(
            "email not provided by google".to_string(),
        ));
    }

    let display_name = if info.name.is_empty() {
        info.email.clone()
    } else {
        info.name
    };

    Ok(OauthUserInfo {
        provider_id: info.id,
        email: info.email,
        display_name,
    })
}

fn normalize_github(user: GitHubUser, emails: Vec<GitHubEmail>) -> Result<OauthUserInfo> {
    let email = match user.email.filter(|e| !e.is_empty()) {
        Some(email) => email,
        None => emails
            .iter()
            .find(|e| e.primary && e.verified)
            .or_else(|| emails.iter().find(|e| e.verified))
            .map(|e| e.email.clone())
            .ok_or_else(|| {
                GatewayError::ProviderUserDataInvalid("no verified email on github account".to_string())
            })?,
    };

    let display_name = match user.name.filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => user.login.clone(),
    };

    Ok(OauthUserInfo {
        // Provider ids are strings even when the provider sends integers.
        provider_id: user.id.to_string(),
        email,
        display_name,
    })
}
