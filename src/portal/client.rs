use crate::config::PortalConfig;
use anyhow::{Context, Result};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::USER_AGENT;
use reqwest::{Client as HttpClient, RequestBuilder, Url};
use std::sync::Arc;

/// The user agent the portal's frontend presents; the login endpoints
/// reject obviously non-browser clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36";

/// The portal HTTP layer: one client, one cookie jar.
///
/// Every exchange of the login sequence and every usage fetch goes
/// through this type, so the session cookies accumulated during login are
/// automatically presented on later requests. The jar is owned here and
/// never handed out; callers read or set individual cookies by name.
pub struct PortalHttp {
    http: HttpClient,
    jar: Arc<Jar>,
    config: PortalConfig,
}

impl PortalHttp {
    pub fn new(config: PortalConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = HttpClient::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()
            .context("Failed to build portal HTTP client")?;
        Ok(Self { http, jar, config })
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// URL under the B2C login host.
    pub fn login_url(&self, path: &str) -> String {
        format!("{}{}", self.config.login_base_url, path)
    }

    /// URL under the account portal host.
    pub fn account_url(&self, path: &str) -> String {
        format!("{}{}", self.config.account_base_url, path)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.http.get(url).header(USER_AGENT, BROWSER_USER_AGENT)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.http.post(url).header(USER_AGENT, BROWSER_USER_AGENT)
    }

    /// Reads a cookie by name as currently stored for the given URL.
    pub fn cookie_value(&self, url: &str, name: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let header = self.jar.cookies(&url)?;
        let cookies = header.to_str().ok()?.to_string();
        cookies.split("; ").find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    }

    /// Sets a client-side cookie for the given URL.
    pub fn set_cookie(&self, url: &str, name: &str, value: &str) -> Result<()> {
        let url = Url::parse(url).context("invalid cookie URL")?;
        self.jar.add_cookie_str(&format!("{}={}", name, value), &url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::config::test_portal_config;

    #[tokio::test]
    async fn test_requests_carry_browser_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/probe")
            .match_header("user-agent", BROWSER_USER_AGENT)
            .with_status(200)
            .create_async()
            .await;

        let http = PortalHttp::new(test_portal_config(server.url())).unwrap();
        let response = http.get(&http.account_url("/probe")).send().await.unwrap();

        assert!(response.status().is_success());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cookie_value_reads_server_cookies() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/set")
            .with_status(200)
            .with_header("set-cookie", "x-ms-cpim-trans=trans-1; Path=/")
            .with_header("set-cookie", "x-ms-cpim-csrf=csrf-1; Path=/")
            .create_async()
            .await;

        let base = server.url();
        let http = PortalHttp::new(test_portal_config(base.clone())).unwrap();
        http.get(&format!("{}/set", base)).send().await.unwrap();

        assert_eq!(
            http.cookie_value(&base, "x-ms-cpim-trans").as_deref(),
            Some("trans-1")
        );
        assert_eq!(
            http.cookie_value(&base, "x-ms-cpim-csrf").as_deref(),
            Some("csrf-1")
        );
        assert!(http.cookie_value(&base, "missing").is_none());
    }

    #[tokio::test]
    async fn test_set_cookie_is_sent_on_later_requests() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/check")
            .match_header("cookie", mockito::Matcher::Regex("b2cAuthenticated=true".to_string()))
            .with_status(200)
            .create_async()
            .await;

        let base = server.url();
        let http = PortalHttp::new(test_portal_config(base.clone())).unwrap();
        http.set_cookie(&base, "b2cAuthenticated", "true").unwrap();
        http.get(&format!("{}/check", base)).send().await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            http.cookie_value(&base, "b2cAuthenticated").as_deref(),
            Some("true")
        );
    }

    #[test]
    fn test_url_builders() {
        let mut config = test_portal_config("http://account.local".to_string());
        config.login_base_url = "http://login.local/identity".to_string();
        let http = PortalHttp::new(config).unwrap();

        assert_eq!(
            http.login_url("/policy/oauth2/v2.0/authorize"),
            "http://login.local/identity/policy/oauth2/v2.0/authorize"
        );
        assert_eq!(http.account_url("/mydashboard"), "http://account.local/mydashboard");
    }
}
