use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{AdapterError, AdapterErrorKind, Cdp, ScreenshotOptions, WaitGate};
use serde_json::Value;
use stealth::{StealthProfile, StealthRuntime};

#[derive(Default)]
struct RecordingPage {
    calls: Mutex<Vec<String>>,
    fail_headers: bool,
}

impl RecordingPage {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Cdp for RecordingPage {
    async fn navigate(&self, url: &str, _: WaitGate, _: Duration) -> Result<(), AdapterError> {
        self.record(format!("navigate {url}"));
        Ok(())
    }

    async fn set_user_agent(
        &self,
        user_agent: &str,
        accept_language: Option<&str>,
        _platform: Option<&str>,
    ) -> Result<(), AdapterError> {
        self.record(format!("ua {user_agent} {}", accept_language.unwrap_or("-")));
        Ok(())
    }

    async fn set_extra_headers(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), AdapterError> {
        if self.fail_headers {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("socket closed"));
        }
        for (name, value) in headers {
            self.record(format!("header {name}: {value}"));
        }
        Ok(())
    }

    async fn add_init_script(&self, source: &str) -> Result<(), AdapterError> {
        self.record(format!("init {source}"));
        Ok(())
    }

    async fn evaluate_script(&self, _: &str) -> Result<Value, AdapterError> {
        Ok(Value::Null)
    }

    async fn screenshot(&self, _: &ScreenshotOptions) -> Result<Vec<u8>, AdapterError> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[tokio::test]
async fn desktop_profile_sets_agent_language_and_hides_webdriver() {
    let page = RecordingPage::default();
    StealthRuntime::default()
        .configure_page(&page)
        .await
        .unwrap();

    let calls = page.calls();
    assert!(calls[0].starts_with("ua Mozilla/5.0 (Windows NT 10.0; Win64; x64)"));
    assert!(calls[0].contains("Chrome/124.0.0.0"));
    assert_eq!(calls[1], "header Accept-Language: en-US,en;q=0.9");
    assert!(calls[2].contains("navigator, 'webdriver'"));
    assert_eq!(calls.len(), 3);
}

#[tokio::test]
async fn custom_scripts_follow_builtin_ones() {
    let profile = StealthProfile {
        init_scripts: vec!["window.chrome = { runtime: {} };".into()],
        ..StealthProfile::desktop_chrome()
    };
    let runtime = StealthRuntime::new(profile);
    assert_eq!(runtime.init_scripts().len(), 2);

    let page = RecordingPage::default();
    runtime.configure_page(&page).await.unwrap();
    assert_eq!(
        page.calls().last().map(String::as_str),
        Some("init window.chrome = { runtime: {} };")
    );
}

#[tokio::test]
async fn adapter_failures_surface_as_stealth_errors() {
    let page = RecordingPage {
        fail_headers: true,
        ..Default::default()
    };
    let err = StealthRuntime::default()
        .configure_page(&page)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "cdp I/O failure: socket closed");
}

#[test]
fn bundle_file_is_loaded_by_name() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "profiles:\n  - name: plain\n    user_agent: \"Mozilla/5.0 Plain\"\n    hide_webdriver: false"
    )
    .unwrap();

    let runtime = StealthRuntime::from_bundle_path(file.path(), Some("plain")).unwrap();
    assert_eq!(runtime.profile().user_agent, "Mozilla/5.0 Plain");
    assert!(runtime.init_scripts().is_empty());

    assert!(StealthRuntime::from_bundle_path(file.path(), Some("other")).is_err());
}
