//! Page sessions: one isolated browser context and page target per audit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use network_tap_light::{config::TapConfig, NetworkSnapshot, NetworkTapLight, TapError, TapEvent};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commands::{ScreenshotOptions, WaitGate};
use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::{PageId, SessionId};
use crate::metrics;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Operations the audit layer performs against a page.
#[async_trait]
pub trait Cdp: Send + Sync {
    /// Load `url` and resolve once `gate` holds. Fails with a classified
    /// [`AdapterErrorKind`] when the page cannot be reached within `deadline`.
    async fn navigate(&self, url: &str, gate: WaitGate, deadline: Duration)
        -> Result<(), AdapterError>;

    async fn set_user_agent(
        &self,
        user_agent: &str,
        accept_language: Option<&str>,
        platform: Option<&str>,
    ) -> Result<(), AdapterError>;

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>)
        -> Result<(), AdapterError>;

    /// Register a script that runs before any page script on every new document.
    async fn add_init_script(&self, source: &str) -> Result<(), AdapterError>;

    /// Evaluate an expression in the page, awaiting promises, and return its JSON value.
    async fn evaluate_script(&self, expression: &str) -> Result<Value, AdapterError>;

    async fn screenshot(&self, options: &ScreenshotOptions) -> Result<Vec<u8>, AdapterError>;

    /// Release the page and its browser. Calling it again is a no-op.
    async fn close(&self) -> Result<(), AdapterError>;
}

/// Produces a fresh, isolated [`Cdp`] session per call.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Cdp>, AdapterError>;
}

/// Launches a dedicated Chromium per session.
#[derive(Clone, Debug, Default)]
pub struct ChromiumLauncher {
    cfg: CdpConfig,
    tap: TapConfig,
}

impl ChromiumLauncher {
    pub fn new(cfg: CdpConfig) -> Self {
        Self {
            cfg,
            tap: TapConfig::default(),
        }
    }

    pub fn with_tap_config(mut self, tap: TapConfig) -> Self {
        self.tap = tap;
        self
    }

    pub fn config(&self) -> &CdpConfig {
        &self.cfg
    }
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn Cdp>, AdapterError> {
        let transport = ChromiumTransport::connect(&self.cfg).await?;
        let session = CdpSession::open(Arc::new(transport), self.tap).await?;
        Ok(Box::new(session))
    }
}

pub struct CdpSession {
    id: SessionId,
    page: PageId,
    transport: Arc<dyn CdpTransport>,
    tap: Arc<NetworkTapLight>,
    target_id: String,
    session_id: String,
    browser_context_id: Option<String>,
    pump: JoinHandle<()>,
    closed: AtomicBool,
}

impl CdpSession {
    /// Create an isolated browser context with a blank page and attach to it.
    ///
    /// The transport is shut down if any step fails.
    pub async fn open(
        transport: Arc<dyn CdpTransport>,
        tap_config: TapConfig,
    ) -> Result<Self, AdapterError> {
        match Self::attach(transport.clone(), tap_config).await {
            Ok(session) => {
                metrics::record_session();
                info!(
                    target: "cdp-session",
                    session = %session.id.0,
                    target_id = %session.target_id,
                    "page session opened"
                );
                Ok(session)
            }
            Err(err) => {
                if let Err(shutdown_err) = transport.shutdown().await {
                    warn!(target: "cdp-session", ?shutdown_err, "failed to release browser after open error");
                }
                Err(err)
            }
        }
    }

    async fn attach(
        transport: Arc<dyn CdpTransport>,
        tap_config: TapConfig,
    ) -> Result<Self, AdapterError> {
        let context = dispatch(
            transport.as_ref(),
            CommandTarget::Browser,
            "Target.createBrowserContext",
            json!({}),
        )
        .await?;
        let browser_context_id = context
            .get("browserContextId")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut create = json!({ "url": "about:blank" });
        if let Some(context_id) = &browser_context_id {
            create["browserContextId"] = json!(context_id);
        }
        let created = dispatch(
            transport.as_ref(),
            CommandTarget::Browser,
            "Target.createTarget",
            create,
        )
        .await?;
        let target_id = required_str(&created, "targetId")?;

        let attached = dispatch(
            transport.as_ref(),
            CommandTarget::Browser,
            "Target.attachToTarget",
            json!({ "targetId": target_id, "flatten": true }),
        )
        .await?;
        let session_id = required_str(&attached, "sessionId")?;

        let page = PageId::new();
        let tap = Arc::new(NetworkTapLight::with_config(tap_config));
        tap.enable(page).await;
        let pump = spawn_event_pump(transport.clone(), tap.clone(), page, session_id.clone());

        let session = Self {
            id: SessionId::new(),
            page,
            transport,
            tap,
            target_id,
            session_id,
            browser_context_id,
            pump,
            closed: AtomicBool::new(false),
        };

        session.call("Page.enable", json!({})).await?;
        session.call("Network.enable", json!({})).await?;
        Ok(session)
    }


    pub async fn network_snapshot(&self) -> Option<NetworkSnapshot> {
        self.tap.current_snapshot(self.page).await
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        dispatch(
            self.transport.as_ref(),
            CommandTarget::Session(self.session_id.clone()),
            method,
            params,
        )
        .await
    }

    async fn call_before(
        &self,
        method: &str,
        params: Value,
        deadline_at: Instant,
    ) -> Result<Value, AdapterError> {
        let remaining = deadline_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timeout_error(method));
        }
        // A command stalled under the navigation deadline is a navigation timeout.
        match tokio::time::timeout(remaining, self.call(method, params)).await {
            Ok(Err(err)) if err.kind == AdapterErrorKind::CommandTimeout => {
                Err(timeout_error(method))
            }
            Ok(result) => result,
            Err(_) => Err(timeout_error(method)),
        }
    }

    async fn pause_until(&self, deadline_at: Instant, waiting_for: &str) -> Result<(), AdapterError> {
        if Instant::now() + POLL_INTERVAL >= deadline_at {
            return Err(timeout_error(waiting_for));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
        Ok(())
    }

    async fn wait_dom_ready(&self, deadline_at: Instant) -> Result<(), AdapterError> {
        loop {
            let probe = self
                .call_before(
                    "Runtime.evaluate",
                    json!({ "expression": "document.readyState", "returnByValue": true }),
                    deadline_at,
                )
                .await;
            match probe {
                Ok(value) => {
                    let state = value.pointer("/result/value").and_then(Value::as_str);
                    if matches!(state, Some("interactive") | Some("complete")) {
                        return Ok(());
                    }
                }
                Err(err) if err.kind == AdapterErrorKind::NavTimeout => return Err(err),
                // Context swaps mid-navigation make the probe fail transiently.
                Err(err) => debug!(target: "cdp-session", ?err, "readyState probe failed"),
            }
            self.pause_until(deadline_at, "dom ready").await?;
        }
    }

    async fn wait_network_quiet(&self, deadline_at: Instant) -> Result<(), AdapterError> {
        loop {
            if self.tap.is_quiet(self.page).await.map_err(tap_error)? {
                return Ok(());
            }
            self.pause_until(deadline_at, "network idle").await?;
        }
    }
}

#[async_trait]
impl Cdp for CdpSession {
    async fn navigate(
        &self,
        url: &str,
        gate: WaitGate,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let started = Instant::now();
        let deadline_at = started + deadline;
        self.tap.reset(self.page).await.map_err(tap_error)?;

        let response = self
            .call_before("Page.navigate", json!({ "url": url }), deadline_at)
            .await
            .map_err(|err| err.with_data(json!({ "url": url })))?;
        if let Some(error_text) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(AdapterError::navigation(error_text).with_data(json!({ "url": url })));
        }

        self.wait_dom_ready(deadline_at).await?;
        if gate == WaitGate::NetworkQuiet {
            self.wait_network_quiet(deadline_at).await?;
        }

        let snapshot = self.network_snapshot().await.unwrap_or_default();
        info!(
            target: "cdp-session",
            %url,
            ?gate,
            elapsed_ms = started.elapsed().as_millis() as u64,
            requests = snapshot.req,
            failed = snapshot.failed,
            "navigation settled"
        );
        Ok(())
    }

    async fn set_user_agent(
        &self,
        user_agent: &str,
        accept_language: Option<&str>,
        platform: Option<&str>,
    ) -> Result<(), AdapterError> {
        let mut params = json!({ "userAgent": user_agent });
        if let Some(language) = accept_language {
            params["acceptLanguage"] = json!(language);
        }
        if let Some(platform) = platform {
            params["platform"] = json!(platform);
        }
        self.call("Emulation.setUserAgentOverride", params).await?;
        Ok(())
    }

    async fn set_extra_headers(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), AdapterError> {
        if headers.is_empty() {
            return Ok(());
        }
        self.call("Network.setExtraHTTPHeaders", json!({ "headers": headers }))
            .await?;
        Ok(())
    }

    async fn add_init_script(&self, source: &str) -> Result<(), AdapterError> {
        self.call(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
        .await?;
        Ok(())
    }

    async fn evaluate_script(&self, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let hint = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("script threw")
                .to_string();
            return Err(AdapterError::new(AdapterErrorKind::ScriptException)
                .with_hint(hint)
                .with_data(details.clone()));
        }

        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn screenshot(&self, options: &ScreenshotOptions) -> Result<Vec<u8>, AdapterError> {
        let mut params = options.format.to_params();
        if options.full_page {
            let layout = self.call("Page.getLayoutMetrics", json!({})).await?;
            let size = layout
                .get("cssContentSize")
                .or_else(|| layout.get("contentSize"))
                .ok_or_else(|| {
                    AdapterError::new(AdapterErrorKind::Internal)
                        .with_hint("layout metrics missing content size")
                })?;
            let width = size.get("width").and_then(Value::as_f64).unwrap_or(0.0).ceil();
            let height = size.get("height").and_then(Value::as_f64).unwrap_or(0.0).ceil();
            if width > 0.0 && height > 0.0 {
                params.insert(
                    "clip".into(),
                    json!({ "x": 0, "y": 0, "width": width, "height": height, "scale": 1 }),
                );
            }
            params.insert("captureBeyondViewport".into(), json!(true));
        }

        let response = self
            .call("Page.captureScreenshot", Value::Object(params))
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal).with_hint("screenshot missing data")
            })?;
        BASE64.decode(data).map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("screenshot payload is not base64: {err}"))
        })
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pump.abort();

        if let Err(err) = dispatch(
            self.transport.as_ref(),
            CommandTarget::Browser,
            "Target.closeTarget",
            json!({ "targetId": self.target_id }),
        )
        .await
        {
            debug!(target: "cdp-session", ?err, "closeTarget failed");
        }
        if let Some(context_id) = &self.browser_context_id {
            if let Err(err) = dispatch(
                self.transport.as_ref(),
                CommandTarget::Browser,
                "Target.disposeBrowserContext",
                json!({ "browserContextId": context_id }),
            )
            .await
            {
                debug!(target: "cdp-session", ?err, "disposeBrowserContext failed");
            }
        }
        let _ = self.tap.disable(self.page).await;

        self.transport.shutdown().await?;
        debug!(target: "cdp-session", session = %self.id.0, "page session closed");
        Ok(())
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn dispatch(
    transport: &dyn CdpTransport,
    target: CommandTarget,
    method: &str,
    params: Value,
) -> Result<Value, AdapterError> {
    metrics::record_command(method);
    let started = Instant::now();
    let result = transport.send_command(target, method, params).await;
    match &result {
        Ok(_) => metrics::record_command_success(method, started.elapsed()),
        Err(err) => {
            metrics::record_command_failure(method);
            debug!(target: "cdp-session", method, ?err, "command failed");
        }
    }
    result
}

fn spawn_event_pump(
    transport: Arc<dyn CdpTransport>,
    tap: Arc<NetworkTapLight>,
    page: PageId,
    session_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = transport.next_event().await {
            if event.session_id.as_deref() != Some(session_id.as_str()) {
                continue;
            }
            metrics::record_event();
            if let Some(tap_event) = tap_event(&event) {
                if let Err(err) = tap.ingest(page, tap_event).await {
                    debug!(target: "cdp-session", ?err, "tap rejected event");
                    break;
                }
            }
        }
    })
}

fn tap_event(event: &TransportEvent) -> Option<TapEvent> {
    let request_id = || {
        event
            .params
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    match event.method.as_str() {
        "Network.requestWillBeSent" => Some(TapEvent::RequestWillBeSent {
            request_id: request_id()?,
        }),
        "Network.loadingFinished" => Some(TapEvent::LoadingFinished {
            request_id: request_id()?,
        }),
        "Network.loadingFailed" => Some(TapEvent::LoadingFailed {
            request_id: request_id()?,
        }),
        "Network.responseReceived" => {
            let status = event.params.pointer("/response/status")?;
            let status = status
                .as_i64()
                .or_else(|| status.as_f64().map(|value| value as i64))?;
            Some(TapEvent::ResponseReceived { status })
        }
        _ => None,
    }
}

fn required_str(value: &Value, key: &str) -> Result<String, AdapterError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("cdp response missing {key}"))
                .with_data(value.clone())
        })
}

fn timeout_error(waiting_for: &str) -> AdapterError {
    AdapterError::new(AdapterErrorKind::NavTimeout)
        .with_hint(format!("timed out waiting for {waiting_for}"))
        .retriable(true)
}

fn tap_error(err: TapError) -> AdapterError {
    AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string())
}
