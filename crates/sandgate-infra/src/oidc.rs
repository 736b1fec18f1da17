//! OIDC provider client for the authorization-code + PKCE flow.
//!
//! Discovers the provider's endpoints once, builds authorization URLs, and
//! exchanges authorization codes for access tokens. When the deployment
//! reaches the provider on an internal address but browsers use a public
//! one, the browser-facing authorization endpoint is rewritten onto
//! `public_domain` while token exchange stays on the internal address.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use sandgate_core::oidc::{AuthState, pkce_challenge};
use sandgate_types::config::OidcConfig;

use crate::crypto::cookie::random_token;

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";
const SCOPES: &str = "openid profile email";

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("OIDC is not configured")]
    NotConfigured,

    #[error("invalid OIDC URL: {0}")]
    InvalidUrl(String),

    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    #[error("OIDC request failed: {0}")]
    Transport(String),

    /// The provider rejected the code exchange.
    #[error("token exchange rejected with status {status}")]
    Exchange { status: u16 },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// The subset of the discovery document the gateway uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Values the gateway keeps between redirect and callback.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Where to send the browser.
    pub url: String,
    /// PKCE verifier, to be stored in a sealed cookie.
    pub code_verifier: String,
}

pub struct OidcClient {
    http: reqwest::Client,
    issuer: String,
    public_issuer: Option<String>,
    client_id: String,
    client_secret: SecretString,
    audience: Option<String>,
    metadata: OnceCell<ProviderMetadata>,
}

impl OidcClient {
    pub fn new(config: &OidcConfig) -> Result<Self, OidcError> {
        if config.domain.trim().is_empty() || config.client_id.trim().is_empty() {
            return Err(OidcError::NotConfigured);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| OidcError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            issuer: normalize_issuer(&config.domain),
            public_issuer: config
                .public_domain
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .map(normalize_issuer),
            client_id: config.client_id.clone(),
            client_secret: SecretString::from(config.client_secret.clone()),
            audience: config.audience.clone().filter(|a| !a.is_empty()),
            metadata: OnceCell::new(),
        })
    }

    /// Provider endpoints, fetched on first use and kept for the process lifetime.
    pub async fn metadata(&self) -> Result<&ProviderMetadata, OidcError> {
        self.metadata.get_or_try_init(|| self.discover()).await
    }

    async fn discover(&self) -> Result<ProviderMetadata, OidcError> {
        let url = format!("{}/{}", self.issuer, DISCOVERY_PATH);
        debug!(%url, "fetching OIDC discovery document");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OidcError::Discovery(format!("status {}", response.status())));
        }
        response
            .json::<ProviderMetadata>()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))
    }

    /// Rewrite an internal provider URL onto the public issuer domain.
    fn to_public(&self, endpoint: &str) -> String {
        match &self.public_issuer {
            Some(public) => match endpoint.strip_prefix(self.issuer.as_str()) {
                Some(rest) => format!("{public}{rest}"),
                None => endpoint.to_string(),
            },
            None => endpoint.to_string(),
        }
    }

    /// Build the provider redirect for a new login.
    pub async fn authorization_request(
        &self,
        redirect_uri: &str,
        state: &AuthState,
    ) -> Result<AuthorizationRequest, OidcError> {
        let metadata = self.metadata().await?;
        let code_verifier = generate_code_verifier();

        let mut url = Url::parse(&self.to_public(&metadata.authorization_endpoint))
            .map_err(|e| OidcError::InvalidUrl(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("scope", SCOPES)
                .append_pair("state", &state.encode())
                .append_pair("code_challenge", &pkce_challenge(&code_verifier))
                .append_pair("code_challenge_method", "S256");
            if let Some(audience) = &self.audience {
                query.append_pair("audience", audience);
            }
        }

        Ok(AuthorizationRequest {
            url: url.into(),
            code_verifier,
        })
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<SecretString, OidcError> {
        let metadata = self.metadata().await?;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(&metadata.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| OidcError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OidcError::Exchange {
                status: status.as_u16(),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| OidcError::InvalidResponse(e.to_string()))?;
        Ok(SecretString::from(token.access_token))
    }
}

/// RFC 7636 verifier: 32 random bytes, base64url (43 characters).
pub fn generate_code_verifier() -> String {
    random_token(32)
}

/// Random nonce for the `state` parameter.
pub fn generate_state_nonce() -> String {
    random_token(16)
}

fn normalize_issuer(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    }
}
