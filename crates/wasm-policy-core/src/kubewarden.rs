//! Wraps a [`WapcRuntime`] with the Kubewarden policy protocol: validate
//! settings once, then call `validate` per admission request, mapping the
//! guest's [`PolicyValidationResponse`] onto this core's [`AdmissionResponse`]
//! (spec.md §4.4). Grounded on the teacher's `runtimes::wasi_cli::Runtime`
//! and `runtimes::wapc::Runtime` `validate`/`validate_settings` methods,
//! generalized to synthesise the non-standard "Full" patch (see
//! `original_source/pkg/wasm/internal/wasi/kubewarden.go`) instead of the
//! teacher's own `json_patch::diff`-based `JSONPatch`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use kubewarden_policy_sdk::response::ValidationResponse as PolicyValidationResponse;
use kubewarden_policy_sdk::settings::SettingsValidationResponse;
use serde_json::json;
use thiserror::Error;

use crate::review::admission::{AdmissionResponse, AdmissionResponseStatus, PATCH_TYPE_FULL};
use crate::review::admission::{AdmissionReview, AdmissionRequest};
use crate::runtimes::wapc::WapcRuntime;

#[derive(Debug, Error)]
pub enum KubewardenError {
    #[error("settings rejected by policy: {0}")]
    InvalidSettings(String),

    #[error("admission review carries no request")]
    MissingRequest,

    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("cannot encode request: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("cannot decode policy response: {0}")]
    Decoding(#[source] serde_json::Error),
}

/// The subset of [`WapcRuntime`] this adapter needs: invoke a named guest
/// export with raw bytes. Generalised so tests can stand in a fake guest
/// without compiling real wasm bytes.
pub trait WapcCallable {
    fn run(&self, fn_name: &str, input: &[u8]) -> Result<Vec<u8>, anyhow::Error>;
}

impl WapcCallable for WapcRuntime {
    fn run(&self, fn_name: &str, input: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        WapcRuntime::run(self, fn_name, input).map_err(anyhow::Error::from)
    }
}

pub struct KubewardenAdapter<'a, C: WapcCallable = WapcRuntime> {
    runtime: &'a C,
    settings: serde_json::Value,
}

impl<'a, C: WapcCallable> KubewardenAdapter<'a, C> {
    pub fn new(runtime: &'a C, settings: serde_json::Value) -> Self {
        Self { runtime, settings }
    }

    /// Invokes `validate_settings` once. Kubewarden policies validate their
    /// own settings document; a `{valid: false}` reply fails with the
    /// guest-provided message.
    pub fn validate_settings(&self) -> Result<(), KubewardenError> {
        let input = serde_json::to_vec(&self.settings).map_err(KubewardenError::Encoding)?;
        let raw = self
            .runtime
            .run("validate_settings", &input)
            .map_err(KubewardenError::Transport)?;
        let response: SettingsValidationResponse =
            serde_json::from_slice(&raw).map_err(KubewardenError::Decoding)?;
        if response.valid {
            Ok(())
        } else {
            Err(KubewardenError::InvalidSettings(
                response.message.unwrap_or_default(),
            ))
        }
    }

    pub fn validate(&self, admission_review: &AdmissionReview) -> Result<AdmissionReview, KubewardenError> {
        let request = admission_review
            .request
            .as_ref()
            .ok_or(KubewardenError::MissingRequest)?;

        let params = json!({
            "request": request,
            "settings": self.settings,
        });
        let input = serde_json::to_vec(&params).map_err(KubewardenError::Encoding)?;
        let raw = self
            .runtime
            .run("validate", &input)
            .map_err(KubewardenError::Transport)?;
        let policy_response: PolicyValidationResponse =
            serde_json::from_slice(&raw).map_err(KubewardenError::Decoding)?;

        Ok(AdmissionReview::for_response(to_admission_response(
            request,
            policy_response,
        )))
    }
}

fn to_admission_response(
    request: &AdmissionRequest,
    policy_response: PolicyValidationResponse,
) -> AdmissionResponse {
    let status = if !policy_response.accepted && policy_response.message.is_some() {
        Some(AdmissionResponseStatus {
            message: policy_response.message,
            code: policy_response.code,
            reason: None,
        })
    } else if policy_response.code.is_some() {
        Some(AdmissionResponseStatus {
            message: None,
            code: policy_response.code,
            reason: None,
        })
    } else {
        None
    };

    let (patch, patch_type) = match policy_response.mutated_object.filter(|v| !v.is_null()) {
        Some(mutated) => match serde_json::to_vec(&mutated) {
            Ok(bytes) => (Some(BASE64.encode(bytes)), Some(PATCH_TYPE_FULL.to_string())),
            Err(_) => (None, None),
        },
        None => (None, None),
    };

    AdmissionResponse {
        uid: request.uid.clone(),
        allowed: policy_response.accepted,
        patch_type,
        patch,
        status,
        audit_annotations: policy_response.audit_annotations,
        warnings: policy_response.warnings,
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::authentication::v1::UserInfo;

    use super::*;
    use crate::admission::rejection_message;
    use crate::review::admission::{GroupVersionKind, GroupVersionResource};

    /// Dispatches on `fn_name` to a canned reply, standing in for a
    /// `WapcRuntime` backed by a real compiled guest.
    struct FakeWapc {
        validate_settings: serde_json::Value,
        validate: serde_json::Value,
    }

    impl WapcCallable for FakeWapc {
        fn run(&self, fn_name: &str, _input: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
            let reply = match fn_name {
                "validate_settings" => &self.validate_settings,
                "validate" => &self.validate,
                other => anyhow::bail!("unexpected export: {other}"),
            };
            Ok(serde_json::to_vec(reply)?)
        }
    }

    fn pod_request(uid: &str, object: serde_json::Value) -> AdmissionRequest {
        AdmissionRequest {
            uid: uid.to_string(),
            kind: GroupVersionKind {
                group: String::new(),
                version: "v1".to_string(),
                kind: "Pod".to_string(),
            },
            resource: GroupVersionResource {
                group: String::new(),
                version: "v1".to_string(),
                resource: "pods".to_string(),
            },
            sub_resource: None,
            name: Some("test-pod".to_string()),
            namespace: Some("default".to_string()),
            operation: "CREATE".to_string(),
            user_info: UserInfo::default(),
            object: Some(k8s_openapi::apimachinery::pkg::runtime::RawExtension(object)),
            old_object: None,
            dry_run: None,
        }
    }

    #[test]
    fn validate_settings_rejects_with_guest_message() {
        let runtime = FakeWapc {
            validate_settings: serde_json::json!({
                "valid": false,
                "message": "denied_annotations must not be empty",
            }),
            validate: serde_json::json!({}),
        };
        let adapter = KubewardenAdapter::new(
            &runtime,
            serde_json::json!({"denied_annotations": []}),
        );
        let err = adapter.validate_settings().unwrap_err();
        assert!(matches!(
            err,
            KubewardenError::InvalidSettings(ref message)
                if message == "denied_annotations must not be empty"
        ));
    }

    /// Mirrors a "safe-annotations" Kubewarden policy denying a pod that
    /// carries a disallowed annotation.
    #[test]
    fn validate_rejects_pod_with_denied_annotation() {
        let runtime = FakeWapc {
            validate_settings: serde_json::json!({"valid": true}),
            validate: serde_json::json!({
                "accepted": false,
                "message": "these annotations are not allowed: invalid-annotation",
            }),
        };
        let adapter = KubewardenAdapter::new(
            &runtime,
            serde_json::json!({"denied_annotations": ["invalid-annotation"]}),
        );

        let object = serde_json::json!({
            "metadata": {
                "name": "test-pod",
                "annotations": {"invalid-annotation": "true"},
            },
        });
        let review = AdmissionReview::for_request(pod_request("req-1", object));
        let result = adapter.validate(&review).expect("wire call succeeds");
        let response = result.response.expect("must carry a response");

        assert!(!response.allowed);
        let message = rejection_message("safe-annotations", response.status.as_ref());
        assert!(message.contains("\"safe-annotations\" denied the request"));
        assert!(message.contains("these annotations are not allowed: invalid-annotation"));
    }

    /// Mirrors a mutating Kubewarden policy (spec.md §8's "allow privilege
    /// escalation" scenario) forcing `allowPrivilegeEscalation` to `false`
    /// and replying with the whole mutated object.
    #[test]
    fn validate_mutating_policy_forces_allow_privilege_escalation_false() {
        let mutated_object = serde_json::json!({
            "metadata": {"name": "test-pod"},
            "spec": {
                "containers": [{
                    "name": "c",
                    "securityContext": {"allowPrivilegeEscalation": false},
                }],
            },
        });
        let runtime = FakeWapc {
            validate_settings: serde_json::json!({"valid": true}),
            validate: serde_json::json!({
                "accepted": true,
                "mutated_object": mutated_object,
            }),
        };
        let adapter = KubewardenAdapter::new(
            &runtime,
            serde_json::json!({"default_allow_privilege_escalation": false}),
        );

        let object = serde_json::json!({
            "metadata": {"name": "test-pod"},
            "spec": {
                "containers": [{
                    "name": "c",
                    "securityContext": {"allowPrivilegeEscalation": true},
                }],
            },
        });
        let review = AdmissionReview::for_request(pod_request("req-2", object));
        let result = adapter.validate(&review).expect("wire call succeeds");
        let response = result.response.expect("must carry a response");

        assert!(response.allowed);
        assert_eq!(response.patch_type.as_deref(), Some(PATCH_TYPE_FULL));
        let decoded = BASE64.decode(response.patch.expect("patch present")).unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(
            decoded["spec"]["containers"][0]["securityContext"]["allowPrivilegeEscalation"],
            serde_json::json!(false)
        );
    }
}
