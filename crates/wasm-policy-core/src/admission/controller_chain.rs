//! `ControllerChain` (C8): splits a flat, configuration-ordered list of
//! [`AdmissionModule`]s into `validators` and `mutators` by each module's
//! `mutating` flag, then fans a single admission request out across the
//! matching list, short-circuiting on the first rejection (spec.md §4.8).
//! Grounded on the teacher's `admission_response_handler` module, which
//! keeps the same split-by-kind-then-iterate-in-order shape for composing
//! several policies into one admission decision.

use k8s_openapi::apimachinery::pkg::runtime::RawExtension;

use crate::envelope::RawRunner;
use crate::review::admission::AdmissionRequest;

use super::{AdmissionError, AdmissionModule, Attributes, ObjectConverter, RuleMatcher};

/// Owns its modules exclusively; its lifetime is the lifetime of the chain
/// (spec.md §3). Construction splits `modules` into `validators` and
/// `mutators`, preserving relative order within each list.
pub struct ControllerChain<R: RawRunner> {
    validators: Vec<AdmissionModule<R>>,
    mutators: Vec<AdmissionModule<R>>,
}

impl<R: RawRunner> ControllerChain<R> {
    pub fn new(modules: Vec<AdmissionModule<R>>) -> Self {
        let mut validators = Vec::new();
        let mut mutators = Vec::new();
        for module in modules {
            if module.is_mutating() {
                mutators.push(module);
            } else {
                validators.push(module);
            }
        }
        Self {
            validators,
            mutators,
        }
    }

    /// Always `true`: per-module rule filtering happens inside each module,
    /// not at the chain level (spec.md §4.8).
    pub fn handles(&self, _operation: &str) -> bool {
        true
    }

    /// Iterates `validators` in configuration order; returns the first
    /// non-nil error. A module with no matching rule, or whose `mutating`
    /// flag routed it out of this list, was never invoked for `request`.
    pub fn validate(
        &self,
        attr: &dyn Attributes,
        rule_matcher: &dyn RuleMatcher,
        request: &AdmissionRequest,
    ) -> Result<(), AdmissionError> {
        for module in &self.validators {
            module.validate(attr, rule_matcher, request)?;
        }
        Ok(())
    }

    /// Iterates `mutators` in configuration order. Each mutator that
    /// matches and returns a patch has its mutated object folded back into
    /// `request.object` before the next mutator runs, so later policies see
    /// earlier policies' mutations — the determinism spec.md §4.8's
    /// rationale calls for. Returns the last mutator's object, or `None` if
    /// no mutator in the chain changed anything.
    pub fn admit(
        &self,
        attr: &dyn Attributes,
        rule_matcher: &dyn RuleMatcher,
        request: &mut AdmissionRequest,
        converter: &dyn ObjectConverter,
    ) -> Result<Option<serde_json::Value>, AdmissionError> {
        let mut mutated = None;
        for module in &self.mutators {
            if let Some(object) = module.admit(attr, rule_matcher, request, converter)? {
                request.object = Some(RawExtension(object.clone()));
                mutated = Some(object);
            }
        }
        Ok(mutated)
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
    use k8s_openapi::api::authentication::v1::UserInfo;

    use super::*;
    use crate::review::admission::{GroupVersionKind, GroupVersionResource};

    struct FakeRunner(serde_json::Value);

    impl RawRunner for FakeRunner {
        fn run(&self, _input: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
            Ok(serde_json::to_vec(&self.0)?)
        }
    }

    struct AlwaysMatches;
    impl RuleMatcher for AlwaysMatches {
        fn matches(&self, _attr: &dyn Attributes, _rule: &RuleWithOperations) -> bool {
            true
        }
    }

    struct FixedAttributes;
    impl Attributes for FixedAttributes {
        fn group(&self) -> &str {
            ""
        }
        fn version(&self) -> &str {
            "v1"
        }
        fn resource(&self) -> &str {
            "pods"
        }
        fn subresource(&self) -> &str {
            ""
        }
        fn namespace(&self) -> &str {
            "default"
        }
        fn name(&self) -> &str {
            "foo"
        }
        fn operation(&self) -> &str {
            "CREATE"
        }
    }

    struct IdentityConverter;
    impl ObjectConverter for IdentityConverter {
        fn convert(&self, versioned: &serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(versioned.clone())
        }
    }

    fn request(uid: &str) -> AdmissionRequest {
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
            name: Some("foo".to_string()),
            namespace: Some("default".to_string()),
            operation: "CREATE".to_string(),
            user_info: UserInfo::default(),
            object: None,
            old_object: None,
            dry_run: None,
        }
    }

    fn rules() -> Vec<RuleWithOperations> {
        vec![RuleWithOperations {
            operations: Some(vec!["*".to_string()]),
            ..Default::default()
        }]
    }

    /// Wraps `response` the way a spec-compliant guest does: the whole
    /// `AdmissionReview`, `apiVersion`/`kind` included, not the bare
    /// response.
    fn envelope(response: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "response": {
                "apiVersion": "admission.k8s.io/v1",
                "kind": "AdmissionReview",
                "response": response,
            },
            "error": null,
        })
    }

    fn allow_module(name: &str, mutating: bool) -> AdmissionModule<FakeRunner> {
        let runner = FakeRunner(envelope(serde_json::json!({"uid": "req-1", "allowed": true})));
        AdmissionModule::new(name, mutating, rules(), runner, serde_json::json!({}))
    }

    #[test]
    fn validate_short_circuits_on_first_rejection() {
        let m1 = AdmissionModule::new(
            "m1",
            false,
            rules(),
            FakeRunner(envelope(serde_json::json!({
                "uid": "req-1",
                "allowed": false,
                "status": {"message": "no"},
            }))),
            serde_json::json!({}),
        );
        let m2 = allow_module("m2", false);
        let chain = ControllerChain::new(vec![m1, m2]);

        let err = chain
            .validate(&FixedAttributes, &AlwaysMatches, &request("req-1"))
            .unwrap_err();
        assert!(err.to_string().contains("m1"));
    }

    #[test]
    fn mutating_modules_are_not_invoked_by_validate() {
        let mutator = allow_module("mutator", true);
        let chain = ControllerChain::new(vec![mutator]);
        chain
            .validate(&FixedAttributes, &AlwaysMatches, &request("req-1"))
            .expect("validators list is empty, must be a no-op");
    }

    #[test]
    fn admit_folds_mutations_forward_through_the_chain() {
        let first_patch = serde_json::to_vec(&serde_json::json!({
            "metadata": {"name": "foo", "annotations": {"a": "1"}}
        }))
        .unwrap();
        let second_patch = serde_json::to_vec(&serde_json::json!({
            "metadata": {"name": "foo", "annotations": {"a": "1", "b": "2"}}
        }))
        .unwrap();

        use base64::Engine as _;
        let m1 = AdmissionModule::new(
            "m1",
            true,
            rules(),
            FakeRunner(envelope(serde_json::json!({
                "uid": "req-1",
                "allowed": true,
                "patchType": "Full",
                "patch": base64::engine::general_purpose::STANDARD.encode(first_patch),
            }))),
            serde_json::json!({}),
        );
        let m2 = AdmissionModule::new(
            "m2",
            true,
            rules(),
            FakeRunner(envelope(serde_json::json!({
                "uid": "req-1",
                "allowed": true,
                "patchType": "Full",
                "patch": base64::engine::general_purpose::STANDARD.encode(second_patch),
            }))),
            serde_json::json!({}),
        );
        let chain = ControllerChain::new(vec![m1, m2]);

        let mut req = request("req-1");
        let result = chain
            .admit(&FixedAttributes, &AlwaysMatches, &mut req, &IdentityConverter)
            .unwrap()
            .expect("second mutator's patch should win");
        assert_eq!(result["metadata"]["annotations"]["b"], serde_json::json!("2"));
        assert_eq!(
            req.object.unwrap().0["metadata"]["annotations"]["b"],
            serde_json::json!("2")
        );
    }
}
