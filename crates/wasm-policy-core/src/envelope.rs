//! Layered transport: bytes -> JSON values -> `{request, settings}` envelope
//! with `{response, error}` reply. Mirrors
//! `original_source/pkg/wasm/internal/wasi/runner.go`'s `RawRunner` /
//! `JSONRunner` / `EnvelopeRunner` stack, translated into a small trait
//! object hierarchy instead of Go's closures-as-interfaces.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use thiserror::Error;
use tracing::{debug, warn};

/// A runner that transports raw bytes to and from a guest. Implemented by
/// [`crate::runtimes::wasi::WasiRuntime`] and
/// [`crate::runtimes::wapc::WapcRuntime`] (via
/// [`crate::runtimes::Runtime::raw_runner`]).
pub trait RawRunner: Send + Sync {
    fn run(&self, input: &[u8]) -> Result<Vec<u8>, anyhow::Error>;
}

impl RawRunner for Box<dyn RawRunner> {
    fn run(&self, input: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        (**self).run(input)
    }
}

/// Wraps a [`RawRunner`] so that every call's input/output/error is traced.
/// Enabled per-module by `ModuleConfig.debug` (spec.md §3).
pub struct DebugRawRunner<R: RawRunner> {
    inner: R,
    module_name: String,
}

impl<R: RawRunner> DebugRawRunner<R> {
    pub fn new(inner: R, module_name: impl Into<String>) -> Self {
        Self {
            inner,
            module_name: module_name.into(),
        }
    }
}

impl<R: RawRunner> RawRunner for DebugRawRunner<R> {
    fn run(&self, input: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        debug!(module = %self.module_name, in_bytes = input.len(), "in: {}", String::from_utf8_lossy(input));
        match self.inner.run(input) {
            Ok(out) => {
                debug!(module = %self.module_name, "out: {}", String::from_utf8_lossy(&out));
                Ok(out)
            }
            Err(err) => {
                warn!(module = %self.module_name, error = %err, "err");
                Err(err)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("cannot serialise request: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("cannot parse envelope reply: {0}")]
    Decoding(#[source] serde_json::Error),

    #[error("guest reported error: {0}")]
    Guest(String),
}

/// `run(ctx, value_in, &mut value_out)`: marshals `value_in` to JSON,
/// invokes a [`RawRunner`], and unmarshals into `value_out`. This is the
/// `JSONRunner` of spec.md §4.3.
pub struct JsonRunner<R: RawRunner> {
    raw: R,
}

impl<R: RawRunner> JsonRunner<R> {
    pub fn new(raw: R) -> Self {
        Self { raw }
    }

    pub fn run<I: Serialize, O: DeserializeOwned>(&self, input: &I) -> Result<O, EnvelopeError> {
        let request = serde_json::to_vec(input).map_err(EnvelopeError::Encoding)?;
        let response = self
            .raw
            .run(&request)
            .map_err(EnvelopeError::Transport)?;
        serde_json::from_slice(&response).map_err(EnvelopeError::Decoding)
    }
}

/// Wire shape sent to the guest: `{"request": T, "settings": S}`.
#[derive(Serialize)]
struct EnvelopeRequest<'a, T, S> {
    request: &'a T,
    settings: &'a S,
}

/// Wire shape read back from the guest: `{"response": U, "error": string |
/// null}`. `response` is kept as a boxed [`RawValue`] so that it is decoded
/// lazily — nested byte fields inside it (e.g. a base64-encoded admission
/// patch) reach the caller-chosen type untouched, satisfying the "envelope
/// purity" invariant of spec.md §8. Owned rather than borrowed so that the
/// whole reply can round-trip through [`JsonRunner::run`], which hands back
/// an owned value rather than one borrowing from its own local buffer.
#[derive(serde::Deserialize)]
struct EnvelopeReply {
    #[serde(default)]
    response: Option<Box<RawValue>>,
    #[serde(default)]
    error: Option<String>,
}

/// Constructed from a [`RawRunner`] plus static `settings`; see spec.md
/// §4.3.
pub struct EnvelopeRunner<R: RawRunner, S: Serialize> {
    json: JsonRunner<R>,
    settings: S,
}

impl<R: RawRunner, S: Serialize> EnvelopeRunner<R, S> {
    pub fn new(raw: R, settings: S) -> Self {
        Self {
            json: JsonRunner::new(raw),
            settings,
        }
    }

    /// Either `response` or `error` is meaningful; if `error` is a non-empty
    /// string the response is ignored, regardless of whether `response` was
    /// also set.
    pub fn run<I: Serialize, O: DeserializeOwned>(&self, input: &I) -> Result<O, EnvelopeError> {
        let envelope = EnvelopeRequest {
            request: input,
            settings: &self.settings,
        };
        let reply: EnvelopeReply = self.json.run(&envelope)?;

        if let Some(message) = reply.error.filter(|m| !m.is_empty()) {
            return Err(EnvelopeError::Guest(message));
        }

        let response = reply
            .response
            .ok_or_else(|| EnvelopeError::Guest("guest returned neither response nor error".into()))?;
        serde_json::from_str(response.get()).map_err(EnvelopeError::Decoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    struct FakeRunner {
        reply: Vec<u8>,
    }

    impl RawRunner for FakeRunner {
        fn run(&self, _input: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
            Ok(self.reply.clone())
        }
    }

    #[derive(Deserialize, Serialize, PartialEq, Debug)]
    struct Payload {
        patch: String,
        count: u32,
    }

    #[test]
    fn decodes_response_preserving_base64_fields() {
        let reply = serde_json::json!({
            "response": {"patch": "aGVsbG8=", "count": 3},
            "error": null
        });
        let runner = EnvelopeRunner::new(
            FakeRunner {
                reply: serde_json::to_vec(&reply).unwrap(),
            },
            serde_json::json!({}),
        );
        let out: Payload = runner.run(&serde_json::json!({"uid": "1"})).unwrap();
        assert_eq!(
            out,
            Payload {
                patch: "aGVsbG8=".to_string(),
                count: 3
            }
        );
    }

    #[test]
    fn non_empty_error_field_wins_over_response() {
        let reply = serde_json::json!({
            "response": {"patch": "x", "count": 1},
            "error": "boom"
        });
        let runner = EnvelopeRunner::new(
            FakeRunner {
                reply: serde_json::to_vec(&reply).unwrap(),
            },
            serde_json::json!({}),
        );
        let err = runner.run::<_, Payload>(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, EnvelopeError::Guest(msg) if msg == "boom"));
    }

    #[test]
    fn empty_error_string_is_treated_as_absent() {
        let reply = serde_json::json!({
            "response": {"patch": "x", "count": 1},
            "error": ""
        });
        let runner = EnvelopeRunner::new(
            FakeRunner {
                reply: serde_json::to_vec(&reply).unwrap(),
            },
            serde_json::json!({}),
        );
        let out: Payload = runner.run(&serde_json::json!({})).unwrap();
        assert_eq!(out.count, 1);
    }
}
