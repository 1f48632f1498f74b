//! Authenticated HTTP client for Teams APIs
//!
//! Wraps reqwest::Client with per-audience credential injection. A missing
//! credential triggers one browser sign-in before giving up; a 401 marks the
//! audience's credential as rejected.

use anyhow::{bail, Context, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};

use crate::auth::{AuthError, Authenticator};
use crate::models::{
    Audience, ChatCredential, CredentialBundle, FavouritesCredential, MessagingCredential,
    RegionConfig, SearchCredential,
};

const TEAMS_API: &str = "https://teams.microsoft.com/api";

/// How a request proves who it is.
pub enum RequestAuth<'a> {
    /// `Authorization: Bearer <token>`
    Bearer(&'a str),
    /// `Authentication: skypetoken=<skype>` plus `Authorization: Bearer <auth>`
    Messaging(&'a MessagingCredential),
    /// Bearer favourites token plus the `X-Skypetoken` header
    Favourites(&'a FavouritesCredential),
}

/// Authenticated client for the internal Teams services.
pub struct TeamsClient {
    http: reqwest::Client,
    auth: Authenticator,
}

impl TeamsClient {
    pub fn new(auth: Authenticator) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("teams-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, auth })
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    /// Credential for `audience`, signing in once through the browser if
    /// none is available.
    pub async fn credential(&self, audience: Audience) -> Result<CredentialBundle> {
        match self.auth.get_credential(audience) {
            Ok(bundle) => Ok(bundle),
            Err(AuthError::AuthRequired { .. }) => {
                tracing::info!("No {} credential, signing in", audience);
                self.auth.ensure_authenticated().await?;
                Ok(self.auth.get_credential(audience)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Search credential without any browser fallback.
    pub fn cached_search_credential(&self) -> Option<SearchCredential> {
        match self.auth.get_credential(Audience::Search) {
            Ok(CredentialBundle::Search(cred)) => Some(cred),
            _ => None,
        }
    }

    pub async fn chat_credential(&self) -> Result<ChatCredential> {
        match self.credential(Audience::Chat).await? {
            CredentialBundle::Chat(cred) => Ok(cred),
            other => bail!("Unexpected {} credential for chat", other.audience()),
        }
    }

    pub async fn messaging_credential(&self) -> Result<MessagingCredential> {
        match self.credential(Audience::Messaging).await? {
            CredentialBundle::Messaging(cred) => Ok(cred),
            other => bail!("Unexpected {} credential for messaging", other.audience()),
        }
    }

    pub async fn favourites_credential(&self) -> Result<FavouritesCredential> {
        match self.credential(Audience::Favourites).await? {
            CredentialBundle::Favourites(cred) => Ok(cred),
            other => bail!("Unexpected {} credential for favourites", other.audience()),
        }
    }

    pub fn region(&self) -> RegionConfig {
        self.auth.region_config()
    }

    /// Regional chat service base, e.g. `https://teams.microsoft.com/api/chatsvc/amer`.
    pub fn chat_service_url(&self) -> String {
        chat_service_base(&self.region())
    }

    /// Regional chat service aggregator (CSA) base.
    pub fn csa_url(&self) -> String {
        format!("{}/csa/{}", TEAMS_API, self.region().region)
    }

    /// Send a request for `audience` and check its status.
    pub async fn send(
        &self,
        audience: Audience,
        method: Method,
        url: &str,
        auth: RequestAuth<'_>,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        tracing::debug!("{} {} ({})", method, url, audience);

        let mut req = self.http.request(method.clone(), url);
        req = apply_auth(req, &auth);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url))?;

        check_response(&self.auth, audience, resp, url).await
    }
}

fn apply_auth(req: RequestBuilder, auth: &RequestAuth<'_>) -> RequestBuilder {
    match auth {
        RequestAuth::Bearer(token) => req.bearer_auth(token),
        RequestAuth::Messaging(cred) => req
            .header("Authentication", format!("skypetoken={}", cred.skype_token))
            .bearer_auth(&cred.auth_token),
        RequestAuth::Favourites(cred) => req
            .bearer_auth(&cred.favourites_token)
            .header("X-Skypetoken", &cred.skype_token),
    }
}

pub(crate) fn chat_service_base(region: &RegionConfig) -> String {
    region
        .chat_service_url
        .as_deref()
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("{}/chatsvc/{}", TEAMS_API, region.region))
}

/// Check HTTP response status code and return a clear error on failure.
///
/// A 401 invalidates the audience and surfaces as [`AuthError::AuthExpired`],
/// which callers can downcast to decide on a retry.
async fn check_response(
    auth: &Authenticator,
    audience: Audience,
    resp: Response,
    url: &str,
) -> Result<Response> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        tracing::warn!("401 Unauthorized for {}", url);
        auth.invalidate(audience);
        return Err(AuthError::AuthExpired { audience }.into());
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

/// Whether `err` is a rejected credential for `audience`.
pub fn is_auth_expired(err: &anyhow::Error, audience: Audience) -> bool {
    matches!(
        err.downcast_ref::<AuthError>(),
        Some(AuthError::AuthExpired { audience: a }) if *a == audience
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_service_base_prefers_discovered_url() {
        let mut region = RegionConfig::default();
        assert_eq!(
            chat_service_base(&region),
            "https://teams.microsoft.com/api/chatsvc/amer"
        );

        region.chat_service_url = Some("https://teams.microsoft.com/api/chatsvc/emea/".into());
        assert_eq!(
            chat_service_base(&region),
            "https://teams.microsoft.com/api/chatsvc/emea"
        );
    }

    #[test]
    fn test_is_auth_expired_matches_audience() {
        let err: anyhow::Error = AuthError::AuthExpired {
            audience: Audience::Search,
        }
        .into();
        assert!(is_auth_expired(&err, Audience::Search));
        assert!(!is_auth_expired(&err, Audience::Chat));
        assert!(!is_auth_expired(&anyhow::anyhow!("boom"), Audience::Search));
    }

    #[test]
    fn test_messaging_headers() {
        let cred = MessagingCredential {
            skype_token: "skype".into(),
            auth_token: "bearer".into(),
            user: crate::models::UserIdentity::from_object_id("abc"),
        };
        let req = apply_auth(
            reqwest::Client::new().get("https://example.invalid/"),
            &RequestAuth::Messaging(&cred),
        )
        .build()
        .unwrap();
        assert_eq!(req.headers()["Authentication"], "skypetoken=skype");
        assert_eq!(req.headers()["Authorization"], "Bearer bearer");
    }
}
