//! `AuthorizerModule` (C6): round-trips a `SubjectAccessReview` through a
//! guest's `authz` export and maps `{allowed, denied}` onto a three-valued
//! [`Decision`]. Grounded on `original_source/pkg/wasm/authorizer/authz.go`'s
//! decision table; the envelope plumbing follows the same shape as
//! [`crate::authenticator::AuthenticatorModule`].

use std::collections::BTreeMap;

use k8s_openapi::api::authorization::v1::{
    ExtraValue, NonResourceAttributes, ResourceAttributes, SubjectAccessReview,
    SubjectAccessReviewSpec, SubjectAccessReviewStatus,
};
use thiserror::Error;

use crate::envelope::{EnvelopeError, EnvelopeRunner, RawRunner};

#[derive(Debug, Error)]
pub enum AuthorizerError {
    #[error("transport error: {0}")]
    Transport(#[from] EnvelopeError),

    #[error("policy returned both allow and deny")]
    Contradictory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    NoOpinion,
}

/// What the embedder hands in to describe the access being checked;
/// equivalent to Kubernetes' `authorizer.Attributes`.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
    pub user: String,
    pub uid: Option<String>,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
    pub is_resource_request: bool,
    pub verb: String,
    pub namespace: String,
    pub group: String,
    pub version: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
    pub path: String,
}

pub struct AuthorizerModule<R: RawRunner> {
    runner: EnvelopeRunner<R, serde_json::Value>,
    /// Decision returned when the transport itself fails (spec.md §4.6);
    /// `NoOpinion` by default.
    decision_on_error: Decision,
}

impl<R: RawRunner> AuthorizerModule<R> {
    pub fn new(runner: R, settings: serde_json::Value) -> Self {
        Self {
            runner: EnvelopeRunner::new(runner, settings),
            decision_on_error: Decision::NoOpinion,
        }
    }

    pub fn with_decision_on_error(mut self, decision: Decision) -> Self {
        self.decision_on_error = decision;
        self
    }

    pub fn authorize(&self, attr: &Attributes) -> (Decision, String, Option<AuthorizerError>) {
        let review = SubjectAccessReview {
            metadata: Default::default(),
            spec: build_subject_access_review(attr),
            status: None,
        };
        // The wire carries the full `SubjectAccessReview`, not just its
        // `status` (spec.md §3): decoding straight into
        // `SubjectAccessReviewStatus` would silently default every field on
        // a spec-compliant guest's reply, which also echoes `apiVersion`/
        // `kind`.
        match self.runner.run::<_, SubjectAccessReview>(&review) {
            Ok(reply) => interpret(reply.status.unwrap_or_default()),
            Err(err) => (self.decision_on_error, String::new(), Some(err.into())),
        }
    }

    /// Rule resolution is unsupported (spec.md §4.6, and Non-goals): the
    /// third element of the tuple always reports `incomplete = true`.
    pub fn rules_for(&self, _user: &str, _namespace: &str) -> (Vec<String>, Vec<String>, bool) {
        (Vec::new(), Vec::new(), true)
    }
}

fn interpret(status: SubjectAccessReviewStatus) -> (Decision, String, Option<AuthorizerError>) {
    let reason = status.reason.unwrap_or_default();
    let denied = status.denied.unwrap_or(false);
    match (denied, status.allowed) {
        (true, true) => (Decision::Deny, reason, Some(AuthorizerError::Contradictory)),
        (true, false) => (Decision::Deny, reason, None),
        (false, true) => (Decision::Allow, reason, None),
        (false, false) => (Decision::NoOpinion, reason, None),
    }
}

fn build_subject_access_review(attr: &Attributes) -> SubjectAccessReviewSpec {
    let extra = if attr.extra.is_empty() {
        None
    } else {
        Some(
            attr.extra
                .iter()
                .map(|(k, v)| (k.clone(), ExtraValue(v.clone())))
                .collect(),
        )
    };

    let mut spec = SubjectAccessReviewSpec {
        user: Some(attr.user.clone()),
        uid: attr.uid.clone(),
        groups: if attr.groups.is_empty() {
            None
        } else {
            Some(attr.groups.clone())
        },
        extra,
        resource_attributes: None,
        non_resource_attributes: None,
    };

    if attr.is_resource_request {
        spec.resource_attributes = Some(ResourceAttributes {
            namespace: non_empty(&attr.namespace),
            verb: non_empty(&attr.verb),
            group: non_empty(&attr.group),
            version: non_empty(&attr.version),
            resource: non_empty(&attr.resource),
            subresource: non_empty(&attr.subresource),
            name: non_empty(&attr.name),
            ..Default::default()
        });
    } else {
        spec.non_resource_attributes = Some(NonResourceAttributes {
            path: non_empty(&attr.path),
            verb: non_empty(&attr.verb),
        });
    }

    spec
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    struct FakeRunner(serde_json::Value);

    impl RawRunner for FakeRunner {
        fn run(&self, _input: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
            Ok(serde_json::to_vec(&self.0)?)
        }
    }

    /// Wraps `status` the way a spec-compliant guest does: the whole
    /// `SubjectAccessReview`, `apiVersion`/`kind` included, not the bare
    /// status.
    fn envelope(status: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "response": {
                "apiVersion": "authorization.k8s.io/v1",
                "kind": "SubjectAccessReview",
                "spec": {},
                "status": status,
            },
            "error": null,
        })
    }

    fn attrs(groups: Vec<&str>, name: &str) -> Attributes {
        Attributes {
            user: "alice".to_string(),
            groups: groups.into_iter().map(str::to_string).collect(),
            is_resource_request: true,
            name: name.to_string(),
            verb: "get".to_string(),
            resource: "pods".to_string(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case::allow(serde_json::json!({"allowed": true, "denied": false}), vec!["foo-group"], Decision::Allow, false)]
    #[case::wrong_group_no_opinion(serde_json::json!({"allowed": false, "denied": false}), vec!["wrong-group"], Decision::NoOpinion, false)]
    #[case::contradictory_is_deny(serde_json::json!({"allowed": true, "denied": true}), vec![], Decision::Deny, true)]
    fn decision_table(
        #[case] status: serde_json::Value,
        #[case] groups: Vec<&str>,
        #[case] expected: Decision,
        #[case] expect_error: bool,
    ) {
        let module = AuthorizerModule::new(FakeRunner(envelope(status)), serde_json::json!({}));
        let (decision, _, err) = module.authorize(&attrs(groups, "foo"));
        assert_eq!(decision, expected);
        if expect_error {
            assert!(matches!(err, Some(AuthorizerError::Contradictory)));
        } else {
            assert!(err.is_none());
        }
    }

    #[test]
    fn rules_for_is_always_incomplete() {
        let module = AuthorizerModule::new(
            FakeRunner(envelope(serde_json::json!({"allowed": false, "denied": false}))),
            serde_json::json!({}),
        );
        let (_, _, incomplete) = module.rules_for("alice", "default");
        assert!(incomplete);
    }
}
