//! OAuth consent driver.
//!
//! [`ChromeDriver`] launches a Chromium-family browser on the account's own
//! profile directory (so its existing provider session is used), speaks the
//! DevTools protocol over a websocket, opens the authorize URL, clicks the
//! consent button and waits for the callback page to carry the code.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Clicks the consent button once, then reports where the page is.
const CONSENT_SCRIPT: &str = r#"(() => {
  if (!window.__authmuxClicked) {
    const re = /^(authorize|allow|approve|accept)$/i;
    const btn = [...document.querySelectorAll('button, input[type=submit]')]
      .find(b => !b.disabled && re.test((b.innerText || b.value || '').trim()));
    if (btn) { btn.click(); window.__authmuxClicked = true; }
  }
  return location.href;
})()"#;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch {bin}: {source}")]
    Launch {
        bin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("browser exited before exposing a DevTools endpoint")]
    NoDevTools,
    #[error("devtools: {0}")]
    DevTools(String),
    #[error("devtools connection: {0}")]
    Connection(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("consent denied: {0}")]
    Denied(String),
    #[error("no authorization code within {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl From<tokio_tungstenite::tungstenite::Error> for BrowserError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

/// `code#state`, as the provider's paste prompt expects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCode {
    pub code: String,
}

pub type DriverFuture<'a> = Pin<Box<dyn Future<Output = Result<OAuthCode, BrowserError>> + Send + 'a>>;

/// Completes one OAuth consent flow as `account`.
pub trait OAuthDriver: Send + Sync {
    fn complete<'a>(&'a self, url: &'a str, account: &'a str) -> DriverFuture<'a>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// Still on the consent (or an intermediate) page.
    Pending,
    Code(String),
    Denied(String),
}

/// Inspect the page URL for an OAuth redirect result.
pub fn parse_callback(href: &str) -> Callback {
    let Ok(url) = url::Url::parse(href) else {
        return Callback::Pending;
    };
    // The authorize URL itself carries `code=true`.
    if url.path().ends_with("/authorize") {
        return Callback::Pending;
    }
    let (mut code, mut state, mut error) = (None, None, None);
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    if let Some(error) = error {
        return Callback::Denied(error);
    }
    match (code, state) {
        (Some(code), Some(state)) => Callback::Code(format!("{code}#{state}")),
        (Some(code), None) => Callback::Code(code),
        _ => Callback::Pending,
    }
}

/// Profile directory name for an account: `alice@example.com` → `alice_example.com`.
pub fn profile_name(account: &str) -> String {
    account
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Read browser stderr until the DevTools websocket URL is announced.
pub async fn read_devtools_url<R: AsyncRead + Unpin>(
    lines: &mut Lines<BufReader<R>>,
) -> Result<String, BrowserError> {
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| BrowserError::Connection(e.to_string()))?
    {
        if let Some(rest) = line.split_once(DEVTOOLS_PREFIX).map(|(_, r)| r) {
            return Ok(rest.trim().to_string());
        }
    }
    Err(BrowserError::NoDevTools)
}

#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub browser_bin: String,
    pub profile_root: PathBuf,
    pub headless: bool,
    pub timeout: Duration,
    pub poll: Duration,
}

pub struct ChromeDriver {
    config: ChromeConfig,
}

impl ChromeDriver {
    pub fn new(config: ChromeConfig) -> Self {
        Self { config }
    }

    async fn run(&self, url: &str, account: &str) -> Result<OAuthCode, BrowserError> {
        let profile = self.config.profile_root.join(profile_name(account));
        let mut cmd = tokio::process::Command::new(&self.config.browser_bin);
        cmd.arg(format!("--user-data-dir={}", profile.display()))
            .arg("--remote-debugging-port=0")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if self.config.headless {
            cmd.arg("--headless=new");
        }
        let mut child = cmd
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BrowserError::Launch {
                bin: self.config.browser_bin.clone(),
                source,
            })?;

        let stderr = child.stderr.take().ok_or(BrowserError::NoDevTools)?;
        let mut lines = BufReader::new(stderr).lines();
        let result: Result<OAuthCode, BrowserError> = async {
            let ws_url = tokio::time::timeout(LAUNCH_TIMEOUT, read_devtools_url(&mut lines))
                .await
                .map_err(|_| BrowserError::NoDevTools)??;
            tracing::debug!(account = %crate::redact::account(account), "devtools at {ws_url}");
            // Drain the rest of stderr.
            tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });
            tokio::time::timeout(self.config.timeout, drive(&ws_url, url, self.config.poll))
                .await
                .map_err(|_| BrowserError::Timeout(self.config.timeout))?
        }
        .await;

        if let Err(e) = child.kill().await {
            tracing::debug!("browser already gone: {e}");
        }
        result
    }
}

impl OAuthDriver for ChromeDriver {
    fn complete<'a>(&'a self, url: &'a str, account: &'a str) -> DriverFuture<'a> {
        Box::pin(self.run(url, account))
    }
}

/// Minimal DevTools protocol client: request/response by id, events skipped.
struct Cdp {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
}

impl Cdp {
    async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let (ws, _) = tokio_tungstenite::connect_async(ws_url).await?;
        Ok(Self { ws, next_id: 0 })
    }

    async fn call(&mut self, method: &str, params: Value, session: Option<&str>) -> Result<Value, BrowserError> {
        self.next_id += 1;
        let id = self.next_id;
        let mut msg = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = session {
            msg["sessionId"] = json!(session);
        }
        self.ws.send(Message::Text(msg.to_string())).await?;

        while let Some(frame) = self.ws.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let Ok(reply) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            if reply["id"].as_u64() != Some(id) {
                continue;
            }
            if let Some(err) = reply.get("error") {
                let message = err["message"].as_str().unwrap_or("unknown error");
                return Err(BrowserError::DevTools(format!("{method}: {message}")));
            }
            return Ok(reply["result"].clone());
        }
        Err(BrowserError::Connection("closed".to_string()))
    }
}

async fn drive(ws_url: &str, oauth_url: &str, poll: Duration) -> Result<OAuthCode, BrowserError> {
    let mut cdp = Cdp::connect(ws_url).await?;

    let target = cdp
        .call("Target.createTarget", json!({ "url": "about:blank" }), None)
        .await?;
    let target_id = target["targetId"]
        .as_str()
        .ok_or_else(|| BrowserError::DevTools("createTarget returned no targetId".to_string()))?
        .to_string();
    let attached = cdp
        .call(
            "Target.attachToTarget",
            json!({ "targetId": target_id, "flatten": true }),
            None,
        )
        .await?;
    let session = attached["sessionId"]
        .as_str()
        .ok_or_else(|| BrowserError::DevTools("attachToTarget returned no sessionId".to_string()))?
        .to_string();

    cdp.call("Page.enable", json!({}), Some(&session)).await?;
    let nav = cdp
        .call("Page.navigate", json!({ "url": oauth_url }), Some(&session))
        .await?;
    if let Some(err) = nav["errorText"].as_str().filter(|e| !e.is_empty()) {
        return Err(BrowserError::Navigation(err.to_string()));
    }

    let mut ticker = tokio::time::interval(poll);
    loop {
        ticker.tick().await;
        let evaluated = cdp
            .call(
                "Runtime.evaluate",
                json!({ "expression": CONSENT_SCRIPT, "returnByValue": true }),
                Some(&session),
            )
            .await;
        let href = match evaluated {
            Ok(v) => v["result"]["value"].as_str().unwrap_or_default().to_string(),
            // Context torn down mid-navigation; try again next poll.
            Err(BrowserError::DevTools(e)) => {
                tracing::debug!("evaluate failed: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };
        match parse_callback(&href) {
            Callback::Pending => {}
            Callback::Code(code) => {
                if let Err(e) = cdp.call("Browser.close", json!({}), None).await {
                    tracing::debug!("Browser.close: {e}");
                }
                return Ok(OAuthCode { code });
            }
            Callback::Denied(error) => return Err(BrowserError::Denied(error)),
        }
    }
}
