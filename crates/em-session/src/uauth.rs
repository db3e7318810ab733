//! Decentralized-identity login (Unstoppable Domains style OAuth2 + PKCE).
//!
//! The identity provider vouches for a wallet address through the
//! `wallet_address` claim of the id token; transactions are still signed by
//! the configured wallet endpoint.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use em_api_types::{BackendInfo, WalletAddress, WorkflowError};
use em_chain_client::JsonRpcTransport;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CachedSession;
use crate::{Connection, WalletBackend};

pub const UAUTH: &str = "uauth";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UAuthOptions {
    /// Identifies this app to the identity backend.
    pub client_id: String,
    /// Where the identity backend sends the user after login.
    pub redirect_uri: String,
    /// `openid wallet` grants identity and wallet claims.
    pub scope: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

impl Default for UAuthOptions {
    fn default() -> Self {
        Self {
            client_id: "ea424726-6d2b-40e5-bad8-d969a3f9183f".to_owned(),
            redirect_uri: "https://jvs-collection.netlify.app".to_owned(),
            scope: "openid wallet".to_owned(),
            authorization_endpoint: "https://auth.unstoppabledomains.com/oauth2/auth".to_owned(),
            token_endpoint: "https://auth.unstoppabledomains.com/oauth2/token".to_owned(),
        }
    }
}

/// Shows the login URL to the user and returns the URL they were redirected to,
/// or `None` if they gave up.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    async fn authorize(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
}

impl UAuthOptions {
    pub fn authorization_request(&self) -> Result<AuthorizationRequest, WorkflowError> {
        let state = Uuid::new_v4().to_string();
        let nonce = Uuid::new_v4().to_string();
        let code_verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let code_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));

        let url = Url::parse_with_params(
            &self.authorization_endpoint,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.scope.as_str()),
                ("state", state.as_str()),
                ("nonce", nonce.as_str()),
                ("code_challenge", code_challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|err| {
            WorkflowError::ProviderUnavailable(format!("invalid authorization endpoint: {err}"))
        })?;

        Ok(AuthorizationRequest {
            url: url.to_string(),
            state,
            nonce,
            code_verifier,
        })
    }
}

/// Extracts the authorization code from the redirect URL.
pub fn parse_callback(callback: &str, expected_state: &str) -> Result<String, WorkflowError> {
    let url = Url::parse(callback.trim())
        .map_err(|err| WorkflowError::UserRejected(format!("unrecognized redirect URL: {err}")))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let detail = error_description.unwrap_or_default();
        return Err(WorkflowError::UserRejected(format!("{error} {detail}").trim().to_owned()));
    }
    if state.as_deref() != Some(expected_state) {
        return Err(WorkflowError::ProviderUnavailable(
            "authorization response state mismatch".to_owned(),
        ));
    }
    code.ok_or_else(|| {
        WorkflowError::UserRejected("redirect carried no authorization code".to_owned())
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub wallet_address: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Reads the claims of an id token received straight from the token endpoint
/// over TLS; expiry and audience are enforced, the signature is not checked.
pub fn decode_id_token(token: &str, client_id: &str) -> Result<IdTokenClaims, WorkflowError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.set_audience(&[client_id]);

    decode::<IdTokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|err| WorkflowError::ProviderUnavailable(format!("invalid id token: {err}")))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
    #[allow(dead_code)]
    #[serde(default)]
    access_token: Option<String>,
}

pub struct UAuthBackend {
    options: UAuthOptions,
    prompt: Arc<dyn AuthorizationPrompt>,
    wallet: Arc<dyn JsonRpcTransport>,
    http: reqwest::Client,
}

impl UAuthBackend {
    pub fn new(
        options: UAuthOptions,
        prompt: Arc<dyn AuthorizationPrompt>,
        wallet: Arc<dyn JsonRpcTransport>,
    ) -> Self {
        Self {
            options,
            prompt,
            wallet,
            http: reqwest::Client::new(),
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<String, WorkflowError> {
        let response = self
            .http
            .post(&self.options.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.options.redirect_uri.as_str()),
                ("client_id", self.options.client_id.as_str()),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await
            .map_err(|err| WorkflowError::ProviderUnavailable(format!("token endpoint: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkflowError::ProviderUnavailable(format!(
                "token endpoint HTTP {status}: {text}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| WorkflowError::ProviderUnavailable(format!("token response: {err}")))?;
        Ok(body.id_token)
    }

    fn connection(
        &self,
        claims: &IdTokenClaims,
        id_token: String,
    ) -> Result<Connection, WorkflowError> {
        let claim = claims.wallet_address.as_deref().ok_or_else(|| {
            WorkflowError::ProviderUnavailable(format!(
                "identity '{}' carries no wallet claim; request the 'wallet' scope",
                claims.sub
            ))
        })?;
        let account = WalletAddress::parse(claim).ok_or_else(|| {
            WorkflowError::ProviderUnavailable(format!(
                "identity '{}' carries a malformed wallet address",
                claims.sub
            ))
        })?;
        Ok(Connection {
            transport: self.wallet.clone(),
            accounts: vec![account],
            id_token: Some(id_token),
        })
    }
}

#[async_trait]
impl WalletBackend for UAuthBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            id: UAUTH.to_owned(),
            name: "Unstoppable Domains".to_owned(),
            description: "Log in with your domain".to_owned(),
        }
    }

    async fn restore(&self, cached: &CachedSession) -> Result<Option<Connection>, WorkflowError> {
        let Some(token) = cached.id_token.clone() else {
            return Ok(None);
        };
        let restored = decode_id_token(&token, &self.options.client_id)
            .and_then(|claims| self.connection(&claims, token));
        match restored {
            Ok(connection) => Ok(Some(connection)),
            Err(err) => {
                debug!("cached identity not reusable: {err}");
                Ok(None)
            }
        }
    }

    async fn connect(&self) -> Result<Connection, WorkflowError> {
        let request = self.options.authorization_request()?;
        info!("opening decentralized identity login");

        let callback = self
            .prompt
            .authorize(&request.url)
            .await
            .ok_or_else(|| WorkflowError::UserRejected("login window closed".to_owned()))?;
        let code = parse_callback(&callback, &request.state)?;
        let id_token = self.exchange_code(&code, &request.code_verifier).await?;
        let claims = decode_id_token(&id_token, &self.options.client_id)?;

        if claims.nonce.as_deref().is_some_and(|nonce| nonce != request.nonce) {
            warn!("id token nonce does not match the login request");
            return Err(WorkflowError::ProviderUnavailable("id token nonce mismatch".to_owned()));
        }
        info!(domain = %claims.sub, "identity verified");
        self.connection(&claims, id_token)
    }
}
