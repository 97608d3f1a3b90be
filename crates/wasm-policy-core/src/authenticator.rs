//! `AuthenticatorModule` (C5): round-trips a bearer token through a
//! guest's `authn` export as a `TokenReview`, intersects the caller's
//! requested audiences against the guest's reply, and builds the caller-
//! facing authenticated-user value. Grounded on
//! `original_source/pkg/wasm/authenticator/authn.go` (the only Go file that
//! performs the audience intersection and union-authenticator composition
//! this spec describes); no teacher file covers TokenReview dispatch since
//! Kubewarden has no authentication concept, so the envelope/error-handling
//! shape is carried over from `runtimes/wasi_cli::Runtime::validate`.

use std::collections::BTreeMap;

use k8s_openapi::api::authentication::v1::UserInfo;
use thiserror::Error;

use crate::envelope::{EnvelopeError, EnvelopeRunner, RawRunner};
use crate::review::{TokenReview, new_token_review};

#[derive(Debug, Error)]
pub enum AuthenticatorError {
    #[error("transport error: {0}")]
    Transport(#[from] EnvelopeError),

    #[error("{0}")]
    Denied(String),
}

/// The audience set and whether it should be enforced against the guest's
/// reply, read from the ambient caller context (spec.md §4.5 step 1).
#[derive(Clone, Debug, Default)]
pub struct AudienceRequest {
    pub want_audiences: Vec<String>,
    pub check_audiences: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub name: Option<String>,
    pub uid: Option<String>,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthenticationResponse {
    pub user: AuthenticatedUser,
    pub audiences: Vec<String>,
}

/// A single WASI module exposing `authn`. `implicit_audiences` stands in
/// for the module's configured fallback audience list, used when the guest
/// omits `status.audiences` entirely.
pub struct AuthenticatorModule<R: RawRunner> {
    runner: EnvelopeRunner<R, serde_json::Value>,
    implicit_audiences: Vec<String>,
}

impl<R: RawRunner> AuthenticatorModule<R> {
    pub fn new(runner: R, settings: serde_json::Value, implicit_audiences: Vec<String>) -> Self {
        Self {
            runner: EnvelopeRunner::new(runner, settings),
            implicit_audiences,
        }
    }

    /// Returns `(Some(response), authenticated, error)` collapsed into a
    /// plain `Result`: `Ok(Some(_))` on success, `Ok(None)` on a
    /// non-authenticating-but-not-erroring outcome (wrong audience,
    /// `authenticated: false` with no error message), `Err(_)` otherwise.
    pub fn authenticate_token(
        &self,
        token: &str,
        audience: &AudienceRequest,
    ) -> Result<Option<AuthenticationResponse>, AuthenticatorError> {
        let review = new_token_review(token.to_string(), audience.want_audiences.clone());
        // The wire carries the full `TokenReview`, not just its `status`
        // (spec.md §3): a spec-compliant guest echoes `apiVersion`/`kind`
        // alongside `status`, and decoding straight into `TokenReviewStatus`
        // would silently default every field on such a reply.
        let reply: TokenReview = self
            .runner
            .run(&review)
            .map_err(AuthenticatorError::Transport)?;
        let status = reply.status.unwrap_or_default();

        let audiences = if audience.check_audiences {
            let got_audiences = status
                .audiences
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| self.implicit_audiences.clone());
            let intersected = intersect(&audience.want_audiences, &got_audiences);
            if intersected.is_empty() {
                return Ok(None);
            }
            intersected
        } else {
            Vec::new()
        };

        if !status.authenticated.unwrap_or(false) {
            return match status.error {
                Some(message) if !message.is_empty() => Err(AuthenticatorError::Denied(message)),
                _ => Ok(None),
            };
        }

        let user = build_authenticated_user(status.user);
        Ok(Some(AuthenticationResponse { user, audiences }))
    }
}

fn build_authenticated_user(user: Option<UserInfo>) -> AuthenticatedUser {
    let Some(user) = user else {
        return AuthenticatedUser::default();
    };

    // Allocate the destination map before copying into it: the source this
    // was distilled from builds `extra` into an uninitialised map and only
    // works by accident (see SPEC_FULL.md/DESIGN.md).
    let mut extra = BTreeMap::new();
    if let Some(source_extra) = user.extra {
        for (key, value) in source_extra {
            extra.insert(key, value.0);
        }
    }

    AuthenticatedUser {
        name: user.username,
        uid: user.uid,
        groups: user.groups.unwrap_or_default(),
        extra,
    }
}

fn intersect(want: &[String], got: &[String]) -> Vec<String> {
    want.iter().filter(|a| got.contains(a)).cloned().collect()
}

/// Composes multiple `AuthenticatorModule`s: returns the first module that
/// produces an authenticated response; otherwise the last transport error
/// observed, or `Ok(None)` if every module merely declined.
pub struct UnionAuthenticator<R: RawRunner> {
    modules: Vec<AuthenticatorModule<R>>,
}

impl<R: RawRunner> UnionAuthenticator<R> {
    pub fn new(modules: Vec<AuthenticatorModule<R>>) -> Self {
        Self { modules }
    }

    pub fn authenticate_token(
        &self,
        token: &str,
        audience: &AudienceRequest,
    ) -> Result<Option<AuthenticationResponse>, AuthenticatorError> {
        let mut last_err = None;
        for module in &self.modules {
            match module.authenticate_token(token, audience) {
                Ok(Some(response)) => return Ok(Some(response)),
                Ok(None) => continue,
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}
