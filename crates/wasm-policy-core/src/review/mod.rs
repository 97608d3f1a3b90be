//! The three native review objects this core round-trips through a guest:
//! `TokenReview` and `SubjectAccessReview` reuse the real `k8s-openapi`
//! generated types bit-exactly (spec.md §6); `AdmissionReview` is hand
//! rolled in [`admission`], following the teacher's own
//! `admission_request.rs`/`admission_response.rs`.

pub mod admission;

pub use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus, UserInfo};
pub use k8s_openapi::api::authorization::v1::{
    NonResourceAttributes, ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
    SubjectAccessReviewStatus,
};

pub fn new_token_review(token: String, audiences: Vec<String>) -> TokenReview {
    TokenReview {
        metadata: Default::default(),
        spec: TokenReviewSpec {
            token: Some(token),
            audiences: if audiences.is_empty() {
                None
            } else {
                Some(audiences)
            },
        },
        status: None,
    }
}
