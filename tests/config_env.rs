use std::env;
use std::io::Write;

use accessly::cli::runtime::load_config;
use serial_test::serial;

struct EnvGuard(Vec<(&'static str, Option<String>)>);

impl EnvGuard {
    fn set(pairs: &[(&'static str, &str)]) -> Self {
        let saved = pairs
            .iter()
            .map(|(key, value)| {
                let previous = env::var(key).ok();
                env::set_var(key, value);
                (*key, previous)
            })
            .collect();
        Self(saved)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, previous) in &self.0 {
            match previous {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
    }
}

#[tokio::test]
#[serial]
async fn process_env_overrides_file_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "server:\n  port: 7000\nllm:\n  model: gpt-4o\n  api_keys: [sk-from-file]\n"
    )
    .unwrap();

    let _guard = EnvGuard::set(&[
        ("PORT", "9123"),
        ("OPENAI_API_KEY", "sk-one,sk-two"),
        ("ACCESSLY_ALLOWED_ORIGINS", "http://localhost:3000"),
    ]);
    let loaded = load_config(Some(file.path())).await.unwrap();

    assert_eq!(loaded.path, file.path());
    assert_eq!(loaded.config.server.port, 9123);
    assert_eq!(loaded.config.llm.api_keys, vec!["sk-one", "sk-two"]);
    assert_eq!(
        loaded.config.server.allowed_origins,
        vec!["http://localhost:3000"]
    );
}

#[tokio::test]
#[serial]
async fn invalid_port_env_fails_loading() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let _guard = EnvGuard::set(&[("PORT", "not-a-port")]);
    let err = load_config(Some(file.path())).await.unwrap_err();
    assert!(format!("{err:#}").contains("invalid value for PORT"));
}
