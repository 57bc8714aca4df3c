use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

/// Flags every launched audit browser starts with.
pub(crate) const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-features=IsolateOrigins,site-per-process",
    "--disable-background-networking",
    "--disable-breakpad",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-first-run",
    "--no-default-browser-check",
    "--password-store=basic",
    "--remote-allow-origins=*",
    "--use-mock-keychain",
];

#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
    /// Release the browser behind this transport. Must be safe to call more than once.
    async fn shutdown(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("transport not available for method {method}")))
    }
}

/// Transport over a dedicated Chromium process (or a shared browser when
/// `websocket_url` is configured).
pub struct ChromiumTransport {
    runtime: RuntimeState,
    deadline: Duration,
}

impl ChromiumTransport {
    pub async fn connect(cfg: &CdpConfig) -> Result<Self, AdapterError> {
        let runtime = RuntimeState::start(cfg).await?;
        Ok(Self {
            runtime,
            deadline: Duration::from_millis(cfg.default_deadline_ms),
        })
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn next_event(&self) -> Option<TransportEvent> {
        self.runtime.next_event().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        if !self.runtime.is_alive() {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("browser connection closed before {method}")));
        }
        self.runtime
            .send_internal(target, method, params, self.deadline)
            .await
    }

    async fn shutdown(&self) -> Result<(), AdapterError> {
        self.runtime.shutdown(self.deadline).await
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, AdapterError>>,
}

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
    // Held until the runtime drops so the throwaway profile outlives the browser.
    _profile_dir: Option<TempDir>,
}

impl RuntimeState {
    async fn start(cfg: &CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url, profile_dir) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url, None)
        } else {
            let profile_dir = tempfile::Builder::new()
                .prefix("accessly-profile-")
                .tempdir()
                .map_err(|err| {
                    AdapterError::new(AdapterErrorKind::Internal)
                        .with_hint(format!("failed to create user-data-dir: {err}"))
                })?;
            let browser_cfg = Self::browser_config(cfg, &profile_dir)?;
            let (child, ws_url) = Self::launch_browser(browser_cfg, cfg.launch_timeout_ms).await?;
            (Some(child), ws_url, Some(profile_dir))
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(1024);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", ?err, "transport loop terminated with error");
            }
        });

        info!(
            target: "cdp-transport",
            url = %ws_url,
            owns_browser = child.is_some(),
            "chromium connection established"
        );

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            child: Mutex::new(child),
            alive,
            _profile_dir: profile_dir,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint("command response channel closed")),
            Err(_) => Err(command_timeout(method)),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), AdapterError> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };

        if self.is_alive() {
            let close_deadline = deadline.min(Duration::from_secs(5));
            if let Err(err) = self
                .send_internal(CommandTarget::Browser, "Browser.close", json!({}), close_deadline)
                .await
            {
                debug!(target: "cdp-transport", ?err, "Browser.close failed, killing process");
            }
        }
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();

        child.kill().await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("failed to kill chromium child: {err}"))
        })?;
        debug!(target: "cdp-transport", "chromium process released");
        Ok(())
    }

    fn browser_config(cfg: &CdpConfig, profile_dir: &TempDir) -> Result<BrowserConfig, AdapterError> {
        if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!(
                    "chrome executable not found at {}",
                    cfg.executable.display()
                ))
                .with_data(json!({
                    "expected": cfg.executable,
                    "hint": "Set ACCESSLY_CHROME to the full path of chrome/chromium."
                })));
        }

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
            .launch_timeout(Duration::from_millis(cfg.launch_timeout_ms));

        if !cfg.headless {
            builder = builder.with_head();
        }
        if cfg.no_sandbox {
            builder = builder.no_sandbox();
        }

        let mut args: Vec<String> = LAUNCH_ARGS.iter().map(|arg| arg.to_string()).collect();
        if cfg.headless {
            args.push("--headless=new".to_string());
            args.push("--hide-scrollbars".to_string());
            args.push("--mute-audio".to_string());
        }
        args.extend(cfg.extra_args.iter().cloned());
        builder = builder.args(args);

        if !cfg.executable.as_os_str().is_empty() {
            builder = builder.chrome_executable(cfg.executable.clone());
        }
        builder = builder.user_data_dir(profile_dir.path());

        builder.build().map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("browser config error: {err}"))
        })
    }

    async fn launch_browser(
        config: BrowserConfig,
        launch_timeout_ms: u64,
    ) -> Result<(Child, String), AdapterError> {
        let mut child = config.launch().map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("failed to launch chromium: {err}"))
        })?;

        match extract_ws_url(&mut child, Duration::from_millis(launch_timeout_ms)).await {
            Ok(ws_url) => Ok((child, ws_url)),
            Err(err) => {
                if let Err(kill_err) = child.kill().await {
                    warn!(target: "cdp-transport", ?kill_err, "failed to kill chromium after launch failure");
                }
                Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))
            }
        }
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        mut event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), AdapterError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::handle_command(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::handle_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            if let Err(err) = Self::handle_event(event, &mut event_tx).await {
                                warn!(target: "cdp-transport", ?err, "failed to forward event");
                            }
                        }
                        Some(Err(err)) => {
                            let adapter_err = Self::map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(adapter_err.clone()));
                            }
                            return Err(adapter_err);
                        }
                        None => {
                            let err = AdapterError::new(AdapterErrorKind::CdpIo)
                                .with_hint("cdp connection closed");
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_command(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>,
    ) -> Result<(), AdapterError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let adapter_err =
                    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string());
                let _ = cmd.responder.send(Err(adapter_err.clone()));
                Err(adapter_err)
            }
        }
    }

    fn handle_response(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = extract_payload(resp.result, resp.error.map(|e| (e.code, e.message)));

        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    async fn handle_event(
        event: CdpEventMessage,
        event_tx: &mut mpsc::Sender<TransportEvent>,
    ) -> Result<(), AdapterError> {
        let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("failed to decode cdp event: {err}"))
        })?;

        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        event_tx
            .send(payload)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string()))
    }

    fn map_cdp_error(err: CdpError) -> AdapterError {
        let hint = err.to_string();
        match err {
            CdpError::Timeout => AdapterError::new(AdapterErrorKind::CommandTimeout)
                .with_hint(hint)
                .retriable(true),
            CdpError::JavascriptException(_) => {
                AdapterError::new(AdapterErrorKind::ScriptException).with_hint(hint)
            }
            CdpError::FrameNotFound(_) | CdpError::Serde(_) => {
                AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
            }
            _ => AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(hint)
                .retriable(true),
        }
    }
}

fn command_timeout(method: &str) -> AdapterError {
    AdapterError::new(AdapterErrorKind::CommandTimeout).with_hint(format!("{method} timed out"))
}

fn extract_payload(
    result: Option<Value>,
    error: Option<(i64, String)>,
) -> Result<Value, AdapterError> {
    match (result, error) {
        (Some(result), _) => Ok(result),
        (None, Some((code, message))) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("cdp error {code}: {message}"))
            .retriable(code >= 500)),
        (None, None) => {
            Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("empty cdp response"))
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_transport_rejects_commands() {
        let transport = NoopTransport;
        let err = transport
            .send_command(CommandTarget::Browser, "Page.navigate", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Internal);
        assert!(transport.next_event().await.is_none());
        assert!(transport.shutdown().await.is_ok());
    }

    #[test]
    fn payload_prefers_result_over_error() {
        let ok = extract_payload(Some(json!({"a": 1})), None).unwrap();
        assert_eq!(ok["a"], 1);

        let err = extract_payload(None, Some((-32000, "Target closed".into()))).unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(!err.retriable);
        assert!(err.hint.unwrap().contains("Target closed"));

        let empty = extract_payload(None, None).unwrap_err();
        assert_eq!(empty.kind, AdapterErrorKind::Internal);
    }

    #[test]
    fn command_deadline_is_not_a_navigation_timeout() {
        let err = command_timeout("Runtime.evaluate");
        assert_eq!(err.kind, AdapterErrorKind::CommandTimeout);
        assert_eq!(err.to_string(), "cdp command timed out: Runtime.evaluate timed out");

        let mapped = RuntimeState::map_cdp_error(CdpError::Timeout);
        assert_eq!(mapped.kind, AdapterErrorKind::CommandTimeout);
        assert!(mapped.retriable);
    }

    #[test]
    fn launch_args_hide_automation() {
        assert!(LAUNCH_ARGS.contains(&"--disable-blink-features=AutomationControlled"));
        assert!(LAUNCH_ARGS.contains(&"--disable-features=IsolateOrigins,site-per-process"));
    }
}
