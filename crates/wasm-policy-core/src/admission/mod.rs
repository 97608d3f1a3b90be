//! `AdmissionModule` + `MutationApplier` (C7): round-trips an
//! `AdmissionRequest` through a guest's `validate`/`mutate` export, gates
//! the call on rule matching and the module's `mutating` flag, and (for
//! mutating modules) applies the guest's "Full" patch back onto the
//! caller's versioned object. Grounded on the teacher's
//! `runtimes::wasi_cli::Runtime::validate`/`admission_response.rs`, adapted
//! to this spec's non-standard "Full" replace-whole-object patch semantics
//! (see [`crate::kubewarden`] for the sibling Kubewarden path, which
//! produces the same patch shape).

pub mod controller_chain;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use thiserror::Error;

use crate::envelope::{EnvelopeError, EnvelopeRunner, RawRunner};
use crate::review::admission::{
    AdmissionRequest, AdmissionResponse, AdmissionResponseStatus, AdmissionReview, PATCH_TYPE_FULL,
};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("transport error: {0}")]
    Transport(#[from] EnvelopeError),

    #[error("response uid '{got}' does not match request uid '{want}'")]
    UidMismatch { want: String, got: String },

    #[error("{message}")]
    Rejected { message: String },

    #[error("patch type not supported: {0:?}")]
    UnsupportedPatchType(Option<String>),

    #[error("cannot decode patch: {0}")]
    PatchDecode(#[source] serde_json::Error),

    #[error("cannot decode base64 patch: {0}")]
    PatchBase64(#[source] base64::DecodeError),

    #[error("cannot convert mutated object back to the internal type: {0}")]
    Conversion(String),

    #[error("admission review reply carries no response")]
    MissingResponse,
}

/// Getters consumed from the caller's request-attribute type (spec.md §6's
/// `Attributes` collaborator interface).
pub trait Attributes {
    fn group(&self) -> &str;
    fn version(&self) -> &str;
    fn resource(&self) -> &str;
    fn subresource(&self) -> &str;
    fn namespace(&self) -> &str;
    fn name(&self) -> &str;
    fn operation(&self) -> &str;
}

/// Per-rule match decision, consumed from the embedder (spec.md §6's
/// `RuleMatcher` collaborator interface). Implementations typically compare
/// `attr`'s (group, version, resource, subresource, namespace) against the
/// rule's selector lists.
pub trait RuleMatcher {
    fn matches(&self, attr: &dyn Attributes, rule: &RuleWithOperations) -> bool;
}

/// Projects the mutated, versioned JSON object back into the caller's
/// internal representation (spec.md §6's `ObjectConverter` collaborator
/// interface).
pub trait ObjectConverter {
    fn convert(&self, versioned: &serde_json::Value) -> Result<serde_json::Value, String>;
}

fn rule_matches_operation(rule: &RuleWithOperations, operation: &str) -> bool {
    rule.operations
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .any(|op| op == "*" || op == operation)
}

pub struct AdmissionModule<R: RawRunner> {
    name: String,
    mutating: bool,
    rules: Vec<RuleWithOperations>,
    runner: EnvelopeRunner<R, serde_json::Value>,
}

impl<R: RawRunner> AdmissionModule<R> {
    pub fn new(
        name: impl Into<String>,
        mutating: bool,
        rules: Vec<RuleWithOperations>,
        runner: R,
        settings: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            mutating,
            rules,
            runner: EnvelopeRunner::new(runner, settings),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_mutating(&self) -> bool {
        self.mutating
    }

    /// `true` if any configured rule has operation `"*"` or `operation`
    /// verbatim.
    pub fn handles(&self, operation: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule_matches_operation(rule, operation))
    }

    fn matches(&self, attr: &dyn Attributes, rule_matcher: &dyn RuleMatcher) -> bool {
        self.rules.iter().any(|rule| rule_matcher.matches(attr, rule))
    }

    /// No-op if this module is mutating, or if it does not match `attr`.
    /// Otherwise rejects with an error describing why the guest denied the
    /// request, or succeeds silently.
    pub fn validate(
        &self,
        attr: &dyn Attributes,
        rule_matcher: &dyn RuleMatcher,
        request: &AdmissionRequest,
    ) -> Result<(), AdmissionError> {
        if self.mutating || !self.matches(attr, rule_matcher) {
            return Ok(());
        }

        let response = self.call(request)?;
        if response.allowed {
            Ok(())
        } else {
            Err(self.reject(&response))
        }
    }

    /// No-op if this module is not mutating, or if it does not match
    /// `attr`. Otherwise, on an allowed response carrying a "Full" patch,
    /// zeroes `obj_interfaces`'s versioned object, decodes the patch into
    /// it, and converts it back into the caller's internal representation.
    pub fn admit(
        &self,
        attr: &dyn Attributes,
        rule_matcher: &dyn RuleMatcher,
        request: &AdmissionRequest,
        converter: &dyn ObjectConverter,
    ) -> Result<Option<serde_json::Value>, AdmissionError> {
        if !self.mutating || !self.matches(attr, rule_matcher) {
            return Ok(None);
        }

        let response = self.call(request)?;
        if !response.allowed {
            return Err(self.reject(&response));
        }

        if response.patch_type.as_deref() != Some(PATCH_TYPE_FULL) {
            return Err(AdmissionError::UnsupportedPatchType(response.patch_type));
        }

        let Some(patch) = response.patch else {
            return Ok(None);
        };

        let decoded = BASE64.decode(patch).map_err(AdmissionError::PatchBase64)?;
        // Decoding into a brand new `Value` rather than merging into the
        // pre-mutation object is the "zero then decode" step: no stale
        // field from the original object can leak through.
        let versioned_object: serde_json::Value =
            serde_json::from_slice(&decoded).map_err(AdmissionError::PatchDecode)?;

        let internal = converter
            .convert(&versioned_object)
            .map_err(AdmissionError::Conversion)?;
        Ok(Some(internal))
    }

    fn call(&self, request: &AdmissionRequest) -> Result<AdmissionResponse, AdmissionError> {
        // The wire carries the full `AdmissionReview`, not just the bare
        // `AdmissionResponse` (spec.md §3): a spec-compliant guest echoes
        // `apiVersion`/`kind` alongside `request`/`response`, and decoding
        // straight into `AdmissionResponse` would silently default every
        // field on such a reply.
        let review = AdmissionReview::for_request(request.clone());
        let reply: AdmissionReview = self.runner.run(&review)?;
        let response = reply.response.ok_or(AdmissionError::MissingResponse)?;
        verify_admission_response(&request.uid, &response)?;
        Ok(response)
    }

    fn reject(&self, response: &AdmissionResponse) -> AdmissionError {
        AdmissionError::Rejected {
            message: rejection_message(&self.name, response.status.as_ref()),
        }
    }
}

/// Composes the caller-facing rejection message for a denied admission
/// response: the module name plus either `status.message`, `status.reason`,
/// or "without explanation" (spec.md §4.7). Shared with
/// [`crate::kubewarden`], whose guest protocol produces the same
/// `AdmissionResponse` shape via a different wire format.
pub fn rejection_message(module_name: &str, status: Option<&AdmissionResponseStatus>) -> String {
    let detail = match status {
        Some(status) if status.message.is_some() => {
            format!(": {}", status.message.as_deref().unwrap())
        }
        Some(status) if status.reason.is_some() => {
            format!(": {}", status.reason.as_deref().unwrap())
        }
        _ => " without explanation".to_string(),
    };
    format!("admission WASM module \"{module_name}\" denied the request{detail}")
}

/// `response.uid` must echo `request.uid` (spec.md §8's UID-echo
/// invariant).
fn verify_admission_response(
    request_uid: &str,
    response: &AdmissionResponse,
) -> Result<(), AdmissionError> {
    if response.uid == request_uid {
        Ok(())
    } else {
        Err(AdmissionError::UidMismatch {
            want: request_uid.to_string(),
            got: response.uid.clone(),
        })
    }
}
