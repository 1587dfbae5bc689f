//! A mock Thames Water portal built on mockito.
//!
//! Serves the whole login sequence and the usage endpoint from one
//! server; tests compose the granular `mock_*` methods to break
//! individual steps, or call `mock_login_flow` for the happy path.

use crate::config::PortalConfig;
use crate::test_utils::config::test_portal_config;
use mockito::{Matcher, Mock, Server, ServerGuard};

pub struct MockPortal {
    server: ServerGuard,
    // keeps registered mocks alive for the lifetime of the portal
    mocks: Vec<Mock>,
}

impl MockPortal {
    pub async fn start() -> Self {
        Self {
            server: Server::new_async().await,
            mocks: Vec::new(),
        }
    }

    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Portal configuration with all base URLs pointed at this server.
    pub fn portal_config(&self) -> PortalConfig {
        test_portal_config(self.url())
    }

    /// Registers the complete happy-path login sequence.
    pub async fn mock_login_flow(&mut self) {
        self.mock_authorize().await;
        self.mock_self_asserted().await;
        self.mock_confirmed().await;
        self.mock_token_exchange().await;
        self.mock_refresh().await;
        self.mock_portal_pages().await;
        self.mock_signin_redirect().await;
        self.mock_portal_login().await;
    }

    /// Authorize endpoint handing out the transaction and csrf cookies.
    pub async fn mock_authorize(&mut self) {
        let mock = self
            .server
            .mock("GET", "/b2c_1_tw_website_signin/oauth2/v2.0/authorize")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("set-cookie", "x-ms-cpim-trans=trans-token-1; Path=/")
            .with_header("set-cookie", "x-ms-cpim-csrf=csrf-token-1; Path=/")
            .with_body("<html>sign in</html>")
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    /// Authorize endpoint that forgets to set the session cookies.
    pub async fn mock_authorize_without_cookies(&mut self) {
        let mock = self
            .server
            .mock("GET", "/b2c_1_tw_website_signin/oauth2/v2.0/authorize")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>sign in</html>")
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    pub async fn mock_self_asserted(&mut self) {
        self.mock_self_asserted_with_status(200).await;
    }

    pub async fn mock_self_asserted_with_status(&mut self, status: usize) {
        let mock = self
            .server
            .mock("POST", "/B2C_1_tw_website_signin/SelfAsserted")
            .match_query(Matcher::Any)
            .with_status(status)
            .with_body(r#"{"status":"200"}"#)
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    pub async fn mock_confirmed(&mut self) {
        self.mock_confirmed_with_fragment("code=auth-code-1&state=state-1")
            .await;
    }

    /// Confirmation endpoint redirecting to the website login page with
    /// the given URL fragment.
    pub async fn mock_confirmed_with_fragment(&mut self, fragment: &str) {
        let location = format!("{}/login#{}", self.url(), fragment);
        let mock = self
            .server
            .mock(
                "GET",
                "/B2C_1_tw_website_signin/api/CombinedSigninAndSignup/confirmed",
            )
            .match_query(Matcher::Any)
            .with_status(302)
            .with_header("location", &location)
            .create_async()
            .await;
        self.mocks.push(mock);
        // the redirect target the browser lands on
        let landing = self
            .server
            .mock("GET", "/login")
            .with_status(200)
            .with_body("<html>landing</html>")
            .create_async()
            .await;
        self.mocks.push(landing);
    }

    pub async fn mock_token_exchange(&mut self) {
        self.mock_token_exchange_with_body(
            r#"{"access_token":"access-1","refresh_token":"refresh-1","token_type":"Bearer"}"#,
        )
        .await;
    }

    pub async fn mock_token_exchange_with_body(&mut self, body: &str) {
        let mock = self
            .server
            .mock("POST", "/b2c_1_tw_website_signin/oauth2/v2.0/token")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    /// The extra refresh round trip; the portal issues it as a GET.
    pub async fn mock_refresh(&mut self) {
        let mock = self
            .server
            .mock("GET", "/b2c_1_tw_website_signin/oauth2/v2.0/token")
            .with_status(200)
            .with_body(
                r#"{"access_token":"access-2","refresh_token":"refresh-2","token_type":"Bearer"}"#,
            )
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    /// Dashboard and meters-usage pages that seed portal cookies.
    pub async fn mock_portal_pages(&mut self) {
        let dashboard = self
            .server
            .mock("GET", "/mydashboard")
            .with_status(200)
            .with_body("<html>dashboard</html>")
            .create_async()
            .await;
        self.mocks.push(dashboard);
        let usage_page = self
            .server
            .mock("GET", "/mydashboard/my-meters-usage")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>usage</html>")
            .create_async()
            .await;
        self.mocks.push(usage_page);
    }

    pub async fn mock_signin_redirect(&mut self) {
        self.mock_signin_redirect_with_landing(
            "<html><body><form><input id='id_token' value='id-token-1'/></form></body></html>",
        )
        .await;
    }

    /// Sign-in endpoint redirecting to a landing page whose URL carries
    /// `state` and `nonce` and whose body is the given HTML.
    pub async fn mock_signin_redirect_with_landing(&mut self, landing_body: &str) {
        let location = format!(
            "{}/signin-landing?flow=b2c&state=portal-state-1&nonce=nonce-1",
            self.url()
        );
        let mock = self
            .server
            .mock("GET", "/twservice/Account/SignIn")
            .match_query(Matcher::Any)
            .with_status(302)
            .with_header("location", &location)
            .create_async()
            .await;
        self.mocks.push(mock);
        let landing = self
            .server
            .mock("GET", "/signin-landing")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(landing_body)
            .create_async()
            .await;
        self.mocks.push(landing);
    }

    pub async fn mock_portal_login(&mut self) {
        let mock = self
            .server
            .mock("POST", "/login")
            .with_status(200)
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    /// Usage endpoint answering every day with the given body.
    pub async fn mock_usage(&mut self, body: Vec<u8>, gzip: bool) {
        let mut mock = self
            .server
            .mock("GET", "/ajax/waterMeter/getSmartWaterMeterConsumptions")
            .match_query(Matcher::Any)
            .with_status(200);
        if gzip {
            mock = mock.with_header("content-encoding", "gzip");
        }
        self.mocks.push(mock.with_body(body).create_async().await);
    }

    /// Usage endpoint answering every day with the given status.
    pub async fn mock_usage_with_status(&mut self, status: usize, body: Vec<u8>) {
        let mock = self
            .server
            .mock("GET", "/ajax/waterMeter/getSmartWaterMeterConsumptions")
            .match_query(Matcher::Any)
            .with_status(status)
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    /// Usage endpoint answering only the given `startDate` day.
    pub async fn mock_usage_for_day(&mut self, day: &str, body: Vec<u8>) {
        let mock = self
            .server
            .mock("GET", "/ajax/waterMeter/getSmartWaterMeterConsumptions")
            .match_query(Matcher::UrlEncoded("startDate".into(), day.into()))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    /// Usage endpoint failing only the given `startDate` day.
    pub async fn mock_usage_for_day_with_status(&mut self, day: &str, status: usize) {
        let mock = self
            .server
            .mock("GET", "/ajax/waterMeter/getSmartWaterMeterConsumptions")
            .match_query(Matcher::UrlEncoded("startDate".into(), day.into()))
            .with_status(status)
            .with_body("error")
            .create_async()
            .await;
        self.mocks.push(mock);
    }
}
