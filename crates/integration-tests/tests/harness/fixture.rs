//! Credential directory and dispatcher setup for integration tests

use std::path::Path;
use std::sync::{Arc, OnceLock};

use switchboard_keys::{KeyManager, RsaKeyManager};
use switchboard_llm::Dispatcher;
use tempfile::TempDir;

/// Key generation is slow, so every test shares one keypair
fn shared_keys() -> Arc<RsaKeyManager> {
    static KEYS: OnceLock<Arc<RsaKeyManager>> = OnceLock::new();

    Arc::clone(KEYS.get_or_init(|| Arc::new(RsaKeyManager::generate(2048).expect("key generation"))))
}

/// Temporary credential directory plus the keys its secrets are sealed with
pub struct Fixture {
    dir: TempDir,
    keys: Arc<RsaKeyManager>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            keys: shared_keys(),
        }
    }

    pub fn credentials_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Ciphertext for `plaintext`, as an operator would paste it into a credential file
    pub fn seal(&self, plaintext: &str) -> String {
        self.keys.encrypt(plaintext).expect("encrypt")
    }

    /// Write `<provider>.yaml`
    pub fn write(&self, provider: &str, yaml: &str) {
        std::fs::write(self.dir.path().join(format!("{provider}.yaml")), yaml).expect("write credential file");
    }

    /// One enabled `development` credential for an `OpenAI`-wire vendor at `base_url`
    pub fn openai_credential(&self, provider: &str, name: &str, api_key: &str, base_url: &str) {
        let key = self.seal(api_key);
        self.write(
            provider,
            &indoc::formatdoc! {r#"
                environments:
                  development:
                    credentials:
                      - name: {name}
                        api_key: "{key}"
                        base_url: "{base_url}"
                        enabled: true
                        weight: 1
                        timeout: 10
            "#},
        );
    }

    /// Dispatcher over this directory in `environment`
    pub fn dispatcher(&self, environment: &str) -> Dispatcher {
        Dispatcher::builder()
            .key_manager(Arc::clone(&self.keys) as Arc<dyn KeyManager>)
            .credentials_dir(self.dir.path())
            .environment(environment)
            .default_provider("openai")
            .build()
            .expect("dispatcher")
    }
}

/// Non-`[DONE]` frame payloads parsed as JSON, plus whether `[DONE]` was seen last
pub fn parse_sse(output: &[u8]) -> (Vec<serde_json::Value>, bool) {
    let text = String::from_utf8(output.to_vec()).expect("utf-8 output");
    let mut frames = Vec::new();
    let mut done = false;

    for frame in text.split_terminator("\n\n") {
        let data = frame.strip_prefix("data: ").expect("frame starts with data:");
        assert!(!done, "frame after [DONE]: {data}");
        if data == "[DONE]" {
            done = true;
        } else {
            frames.push(serde_json::from_str(data).expect("frame is JSON"));
        }
    }

    (frames, done)
}

/// Concatenated `delta.content` of every chunk
pub fn streamed_text(frames: &[serde_json::Value]) -> String {
    frames
        .iter()
        .filter_map(|frame| frame.pointer("/choices/0/delta/content").and_then(serde_json::Value::as_str))
        .collect()
}
