//! Thin client for the Robinhood endpoints the history needs: OAuth login,
//! token revocation and the paginated option-order listing.

use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::RobinhoodCfg;
use crate::error::HistoryError;
use crate::session::Brokerage;
use crate::types::{Credentials, RawOrder};
use crate::utils::mask_user;

pub struct RobinhoodClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    device_token: String,
    mfa_prompt: bool,
}

#[derive(Clone)]
pub struct RobinhoodSession {
    access_token: String,
    refresh_token: Option<String>,
}

impl fmt::Debug for RobinhoodSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RobinhoodSession")
            .field("access_token", &"****")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "****"))
            .finish()
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    expires_in: u64,
    grant_type: &'static str,
    scope: &'static str,
    username: &'a str,
    password: &'a str,
    device_token: &'a str,
    challenge_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mfa_code: Option<&'a str>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    mfa_required: bool,
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderPage {
    #[serde(default)]
    results: Vec<Value>,
    next: Option<String>,
}

enum LoginAttempt {
    Session(RobinhoodSession),
    MfaRequired,
}

impl RobinhoodClient {
    pub fn new(cfg: &RobinhoodCfg) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_sec))
            .build()
            .context("create http client")?;
        let device_token = match &cfg.device_token {
            Some(t) => t.clone(),
            None => {
                let t = uuid::Uuid::new_v4().to_string();
                warn!("No robinhood.device_token configured; this run uses a fresh device and may be challenged.");
                t
            }
        };
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client_id: cfg.client_id.clone(),
            device_token,
            mfa_prompt: cfg.mfa_prompt,
        })
    }

    /// Password grant with an MFA fallback.
    ///
    /// Flow:
    /// 1) Request a token with whatever MFA code the credentials carry.
    /// 2) If the server demands MFA and none was sent, prompt for one on the CLI
    ///    (only when `mfa_prompt` is enabled) and request again.
    async fn authenticate(&self, credentials: &Credentials) -> Result<RobinhoodSession, HistoryError> {
        info!(
            "Robinhood login attempt: user(partial)={}",
            mask_user(&credentials.username)
        );

        let sent_code = credentials.mfa_code.is_some();
        match self.token_request(credentials, credentials.mfa_code.as_deref()).await? {
            LoginAttempt::Session(s) => {
                info!("Robinhood login success.");
                return Ok(s);
            }
            LoginAttempt::MfaRequired if sent_code => {
                return Err(HistoryError::Authentication("MFA code rejected".into()));
            }
            LoginAttempt::MfaRequired => info!("MFA required by Robinhood."),
        }

        if !self.mfa_prompt {
            return Err(HistoryError::Authentication(
                "MFA required; set ROBINHOOD_MFA_CODE or enable robinhood.mfa_prompt".into(),
            ));
        }
        let code = prompt_mfa("Enter the Robinhood verification code: ")
            .await
            .map_err(|e| HistoryError::Authentication(format!("{e:#}")))?;
        match self.token_request(credentials, Some(code.trim())).await? {
            LoginAttempt::Session(s) => {
                info!("Robinhood login success (with MFA).");
                Ok(s)
            }
            LoginAttempt::MfaRequired => {
                error!("Robinhood login with MFA failed.");
                Err(HistoryError::Authentication("MFA code rejected".into()))
            }
        }
    }

    async fn token_request(
        &self,
        credentials: &Credentials,
        mfa_code: Option<&str>,
    ) -> Result<LoginAttempt, HistoryError> {
        let body = TokenRequest {
            client_id: &self.client_id,
            expires_in: 86_400,
            grant_type: "password",
            scope: "internal",
            username: &credentials.username,
            password: &credentials.password,
            device_token: &self.device_token,
            challenge_type: "sms",
            mfa_code,
        };
        let resp = self
            .http
            .post(format!("{}/oauth2/token/", self.base_url))
            .form(&body)
            .send()
            .await
            .map_err(|e| HistoryError::Authentication(format!("login request failed: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| HistoryError::Authentication(format!("login response unreadable: {e}")))?;
        let token: TokenResponse = serde_json::from_str(&text).unwrap_or_default();

        if token.mfa_required {
            return Ok(LoginAttempt::MfaRequired);
        }
        match token.access_token {
            Some(access_token) if status.is_success() => Ok(LoginAttempt::Session(RobinhoodSession {
                access_token,
                refresh_token: token.refresh_token,
            })),
            _ => {
                let detail = token.detail.unwrap_or_else(|| format!("HTTP {status}"));
                error!("Robinhood login rejected: {}", detail);
                Err(HistoryError::Authentication(detail))
            }
        }
    }

    async fn get_page(&self, session: &RobinhoodSession, url: &str) -> Result<OrderPage, HistoryError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| HistoryError::Fetch(format!("GET {url}: {e}")))?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(HistoryError::Fetch(format!(
                    "GET {url}: session rejected ({})",
                    resp.status()
                )))
            }
            s => return Err(HistoryError::Fetch(format!("GET {url}: HTTP {s}"))),
        }
        resp.json::<OrderPage>()
            .await
            .map_err(|e| HistoryError::Fetch(format!("GET {url}: bad page: {e}")))
    }
}

impl Brokerage for RobinhoodClient {
    type Session = RobinhoodSession;

    async fn login(&self, credentials: &Credentials) -> Result<RobinhoodSession, HistoryError> {
        self.authenticate(credentials).await
    }

    async fn logout(&self, session: RobinhoodSession) -> Result<(), HistoryError> {
        let Some(token) = session.refresh_token else {
            debug!("no refresh token to revoke");
            return Ok(());
        };
        let resp = self
            .http
            .post(format!("{}/oauth2/revoke_token/", self.base_url))
            .form(&[("client_id", self.client_id.as_str()), ("token", token.as_str())])
            .send()
            .await
            .map_err(|e| HistoryError::Fetch(format!("revoke token: {e}")))?;
        if !resp.status().is_success() {
            return Err(HistoryError::Fetch(format!(
                "revoke token: HTTP {}",
                resp.status()
            )));
        }
        info!("Robinhood session revoked.");
        Ok(())
    }

    async fn option_orders(&self, session: &RobinhoodSession) -> Result<Vec<RawOrder>, HistoryError> {
        let mut next = Some(format!("{}/options/orders/", self.base_url));
        let mut orders = Vec::new();
        let mut page_no = 0usize;

        while let Some(url) = next {
            let page = self.get_page(session, &url).await?;
            page_no += 1;
            debug!(page = page_no, results = page.results.len(), "option orders page");
            for v in page.results {
                let idx = orders.len();
                let order: RawOrder = serde_json::from_value(v)
                    .map_err(|e| HistoryError::malformed(format!("orders[{idx}]"), e))?;
                orders.push(order);
            }
            next = page.next.filter(|n| !n.is_empty());
        }
        Ok(orders)
    }
}

/// Prompt MFA code from CLI using a blocking read on a dedicated blocking thread.
async fn prompt_mfa(prompt: &str) -> Result<String> {
    use std::io::{self, Write};
    let prompt = prompt.to_string();
    let code = tokio::task::spawn_blocking(move || -> Result<String> {
        print!("{}", prompt);
        let _ = io::stdout().flush();
        let mut buf = String::new();
        io::stdin().read_line(&mut buf)?;
        let s = buf.trim().to_string();
        if s.is_empty() {
            anyhow::bail!("Empty MFA code");
        }
        Ok(s)
    })
    .await
    .context("spawn_blocking join error")??;
    Ok(code)
}
