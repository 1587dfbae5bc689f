//! The portal's scraped login sequence.
//!
//! The portal authenticates browsers through an Azure B2C sign-in policy
//! followed by a legacy portal-side login handshake. None of this is a
//! documented API; the sequence below replays, exchange by exchange, what
//! the web frontend does:
//!
//! 1. authorize: obtain transaction and csrf cookies, presenting a PKCE
//!    challenge;
//! 2. self-assert: post the credentials;
//! 3. confirm: follow the redirect whose fragment carries the
//!    authorization code;
//! 4. token exchange: trade code + verifier for an OAuth token pair;
//! 5. refresh: the portal requires one refresh round trip before the
//!    session is accepted downstream;
//! 6. portal link: seed account-site cookies and extract `state` and
//!    `id_token` from the sign-in redirect;
//! 7. portal login: post them back, then mark the session with the
//!    client-side `b2cAuthenticated` cookie.
//!
//! A headless-browser variant of this flow would also work, but driving a
//! real browser drags in a heavyweight dependency and is much harder to
//! exercise against recorded fixtures, so the protocol is replayed
//! directly. Any step failure is terminal for the attempt; callers retry
//! the whole sequence with fresh PKCE material, never a single step.

use crate::error::{AuthError, AuthStep};
use crate::portal::client::PortalHttp;
use crate::portal::pkce::PkceMaterial;
use reqwest::header::REFERER;
use scraper::{Html, Selector};
use serde_derive::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

// Endpoint casing varies between steps; it follows the portal exactly.
const AUTHORIZE_PATH: &str = "/b2c_1_tw_website_signin/oauth2/v2.0/authorize";
const SELF_ASSERTED_PATH: &str = "/B2C_1_tw_website_signin/SelfAsserted";
const CONFIRMED_PATH: &str = "/B2C_1_tw_website_signin/api/CombinedSigninAndSignup/confirmed";
const TOKEN_PATH: &str = "/b2c_1_tw_website_signin/oauth2/v2.0/token";
const SIGNIN_PATH: &str = "/twservice/Account/SignIn?useremail=";

const POLICY: &str = "B2C_1_tw_website_signin";
const SCOPE: &str = "openid profile offline_access";

const TRANSACTION_COOKIE: &str = "x-ms-cpim-trans";
const CSRF_COOKIE: &str = "x-ms-cpim-csrf";
const AUTHENTICATED_COOKIE: &str = "b2cAuthenticated";

/// The OAuth token pair obtained from the B2C token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// One login session against the portal.
///
/// Owns the HTTP layer (and with it the cookie jar) exclusively; other
/// components only ever see the session as an opaque authenticated
/// context. A session is authenticated at most once and then reused for
/// all usage fetches of a run; `invalidate` lets the caller force a fresh
/// login on the next use.
pub struct AuthSession {
    http: PortalHttp,
    tokens: Option<OAuthTokens>,
    authenticated: bool,
}

impl AuthSession {
    pub fn new(http: PortalHttp) -> Self {
        Self {
            http,
            tokens: None,
            authenticated: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn tokens(&self) -> Option<&OAuthTokens> {
        self.tokens.as_ref()
    }

    /// Drops the authenticated state so the next use logs in again.
    pub fn invalidate(&mut self) {
        self.authenticated = false;
        self.tokens = None;
    }

    /// The authenticated HTTP context for usage fetches.
    pub(crate) fn http(&self) -> &PortalHttp {
        &self.http
    }

    /// Runs the full login sequence.
    ///
    /// On success the session cookies and token pair are in place and
    /// `is_authenticated` turns true. On failure the returned error names
    /// the step that broke the sequence and nothing is retried.
    pub async fn authenticate(&mut self) -> Result<(), AuthError> {
        self.invalidate();
        let pkce = PkceMaterial::generate();
        tracing::debug!("starting portal login");

        let (trans_token, csrf_token) = self.authorize(&pkce).await?;
        self.self_assert(&trans_token, &csrf_token).await?;
        let code = self.confirm(&trans_token, &csrf_token).await?;
        let tokens = self.exchange_token(&pkce, &code).await?;
        let tokens = self.refresh(tokens).await?;
        let (state, id_token) = self.link_portal().await?;
        self.portal_login(&state, &id_token).await?;

        // The frontend marks itself signed in with a plain client-side cookie.
        self.http
            .set_cookie(
                &self.http.config().account_base_url,
                AUTHENTICATED_COOKIE,
                "true",
            )
            .map_err(|e| AuthError::new(AuthStep::PortalLogin, e))?;

        self.tokens = Some(tokens);
        self.authenticated = true;
        tracing::info!("portal login complete");
        Ok(())
    }

    /// `Init → Authorized`: present the PKCE challenge, collect the
    /// transaction and csrf cookies.
    async fn authorize(&self, pkce: &PkceMaterial) -> Result<(String, String), AuthError> {
        let config = self.http.config();
        let url = self.http.login_url(AUTHORIZE_PATH);
        let redirect_uri = config.redirect_uri();
        let nonce = Uuid::new_v4().to_string();
        let state = Uuid::new_v4().to_string();

        let response = self
            .http
            .get(&url)
            .query(&[
                ("client_id", config.client_id.as_str()),
                ("scope", SCOPE),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_mode", "fragment"),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("nonce", nonce.as_str()),
                ("state", state.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::Authorize, e))?;
        if !response.status().is_success() {
            return Err(AuthError::new(
                AuthStep::Authorize,
                format!("status {}", response.status()),
            ));
        }

        let login_base = &self.http.config().login_base_url;
        let trans_token = self
            .http
            .cookie_value(login_base, TRANSACTION_COOKIE)
            .ok_or_else(|| {
                AuthError::new(
                    AuthStep::Authorize,
                    format!("cookie '{}' not set", TRANSACTION_COOKIE),
                )
            })?;
        let csrf_token = self
            .http
            .cookie_value(login_base, CSRF_COOKIE)
            .ok_or_else(|| {
                AuthError::new(AuthStep::Authorize, format!("cookie '{}' not set", CSRF_COOKIE))
            })?;
        Ok((trans_token, csrf_token))
    }

    /// `Authorized → SelfAsserted`: post the credentials under the
    /// transaction/csrf tokens.
    async fn self_assert(&self, trans_token: &str, csrf_token: &str) -> Result<(), AuthError> {
        let config = self.http.config();
        let url = self.http.login_url(SELF_ASSERTED_PATH);
        let tx = format!("StateProperties={}", trans_token);

        let response = self
            .http
            .post(&url)
            .query(&[("tx", tx.as_str()), ("p", POLICY)])
            .header("x-csrf-token", csrf_token)
            .form(&[
                ("request_type", "RESPONSE"),
                ("email", config.email.as_str()),
                ("password", config.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::SelfAssert, e))?;
        if !response.status().is_success() {
            return Err(AuthError::new(
                AuthStep::SelfAssert,
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }

    /// `SelfAsserted → Confirmed`: the confirmation redirect's fragment
    /// carries either the authorization code or an error description.
    async fn confirm(&self, trans_token: &str, csrf_token: &str) -> Result<String, AuthError> {
        let url = self.http.login_url(CONFIRMED_PATH);
        let tx = format!("StateProperties={}", trans_token);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("rememberMe", "false"),
                ("tx", tx.as_str()),
                ("csrf_token", csrf_token),
                ("p", POLICY),
            ])
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::Confirm, e))?;
        if !response.status().is_success() {
            return Err(AuthError::new(
                AuthStep::Confirm,
                format!("status {}", response.status()),
            ));
        }

        let fragment = response
            .url()
            .fragment()
            .map(str::to_owned)
            .ok_or_else(|| AuthError::new(AuthStep::Confirm, "redirect target carried no fragment"))?;
        let fields: HashMap<&str, &str> = fragment
            .split('&')
            .filter_map(|item| item.split_once('='))
            .collect();

        if let Some(description) = fields.get("error_description") {
            return Err(AuthError::new(AuthStep::Confirm, description.replace('+', " ")));
        }
        if let Some(error) = fields.get("error") {
            return Err(AuthError::new(AuthStep::Confirm, *error));
        }
        fields
            .get("code")
            .map(|code| code.to_string())
            .ok_or_else(|| {
                AuthError::new(AuthStep::Confirm, "authorization code missing from fragment")
            })
    }

    /// `Confirmed → TokenExchanged`: trade the code and PKCE verifier for
    /// the token pair. The telemetry fields are fixed to what the
    /// portal's MSAL frontend sends.
    async fn exchange_token(
        &self,
        pkce: &PkceMaterial,
        code: &str,
    ) -> Result<OAuthTokens, AuthError> {
        let config = self.http.config();
        let url = self.http.login_url(TOKEN_PATH);
        let redirect_uri = config.redirect_uri();

        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("scope", "openid offline_access profile"),
                ("grant_type", "authorization_code"),
                ("client_info", "1"),
                ("x-client-SKU", "msal.js.browser"),
                ("x-client-VER", "3.1.0"),
                ("x-ms-lib-capability", "retry-after, h429"),
                ("x-client-current-telemetry", "5|865,0,,,|,"),
                ("x-client-last-telemetry", "5|0|||0,0"),
                ("code_verifier", pkce.verifier.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::TokenExchange, e))?;
        if !response.status().is_success() {
            return Err(AuthError::new(
                AuthStep::TokenExchange,
                format!("status {}", response.status()),
            ));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::new(AuthStep::TokenExchange, e))?;
        let access_token = body.access_token.ok_or_else(|| {
            AuthError::new(AuthStep::TokenExchange, "access token missing from response")
        })?;
        let refresh_token = body.refresh_token.ok_or_else(|| {
            AuthError::new(AuthStep::TokenExchange, "refresh token missing from response")
        })?;
        Ok(OAuthTokens {
            access_token,
            refresh_token,
        })
    }

    /// `TokenExchanged → Refreshed`: the portal only accepts the session
    /// downstream after one refresh round trip, issued as a GET with a
    /// form body exactly like the frontend does.
    async fn refresh(&self, tokens: OAuthTokens) -> Result<OAuthTokens, AuthError> {
        let config = self.http.config();
        let url = self.http.login_url(TOKEN_PATH);

        let response = self
            .http
            .get(&url)
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("scope", SCOPE),
                ("grant_type", "refresh_token"),
                ("client_info", "1"),
                ("x-client-SKU", "msal.js.browser"),
                ("x-client-VER", "3.1.0"),
                ("x-ms-lib-capability", "retry-after, h429"),
                ("x-client-current-telemetry", "5|61,0,,,|@azure/msal-react,2.0.3"),
                ("x-client-last-telemetry", "5|0|||0,0"),
                ("refresh_token", tokens.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::Refresh, e))?;
        if !response.status().is_success() {
            return Err(AuthError::new(
                AuthStep::Refresh,
                format!("status {}", response.status()),
            ));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::new(AuthStep::Refresh, e))?;
        let access_token = body
            .access_token
            .ok_or_else(|| AuthError::new(AuthStep::Refresh, "access token missing from response"))?;
        let refresh_token = body.refresh_token.unwrap_or(tokens.refresh_token);
        Ok(OAuthTokens {
            access_token,
            refresh_token,
        })
    }

    /// `Refreshed → PortalLinked`: warm up the account site, then pull
    /// `state` and `id_token` out of the sign-in redirect.
    async fn link_portal(&self) -> Result<(String, String), AuthError> {
        let config = self.http.config();
        let referer = self.http.account_url(SIGNIN_PATH);

        // The dashboard and usage pages seed the cookies the sign-in
        // redirect expects to find.
        self.http
            .get(&self.http.account_url("/mydashboard"))
            .header(REFERER, referer.as_str())
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::ExtractIdToken, e))?;
        let usage_page = self.http.account_url(&format!(
            "/mydashboard/my-meters-usage?contractAccountNumber={}",
            config.account_number
        ));
        self.http
            .get(&usage_page)
            .header(REFERER, referer.as_str())
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::ExtractIdToken, e))?;

        let response = self
            .http
            .get(&referer)
            .header(REFERER, referer.as_str())
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::ExtractIdToken, e))?;
        let final_url = response.url().to_string();

        let state = final_url
            .split("&state=")
            .nth(1)
            .and_then(|rest| rest.split("&nonce=").next())
            .map(|s| s.replace("%3d", "=").replace("%3D", "="))
            .ok_or_else(|| {
                AuthError::new(AuthStep::ExtractIdToken, "state missing from sign-in redirect URL")
            })?;

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::new(AuthStep::ExtractIdToken, e))?;
        let id_token = extract_id_token(&body).ok_or_else(|| {
            AuthError::new(AuthStep::ExtractIdToken, "id_token element missing from sign-in page")
        })?;

        // The browser loads the redirect target once more before posting
        // back; the extra GET seeds one last cookie.
        self.http
            .get(&final_url)
            .header(REFERER, referer.as_str())
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::ExtractIdToken, e))?;

        Ok((state, id_token))
    }

    /// `PortalLinked → Authenticated`: post `state` and `id_token` to the
    /// portal login endpoint.
    async fn portal_login(&self, state: &str, id_token: &str) -> Result<(), AuthError> {
        let url = self.http.account_url("/login");
        let response = self
            .http
            .post(&url)
            .form(&[("state", state), ("id_token", id_token)])
            .send()
            .await
            .map_err(|e| AuthError::new(AuthStep::PortalLogin, e))?;
        if !response.status().is_success() {
            return Err(AuthError::new(
                AuthStep::PortalLogin,
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }
}

fn extract_id_token(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("#id_token").ok()?;
    document
        .select(&selector)
        .next()?
        .value()
        .attr("value")
        .map(str::to_owned)
}
