//! Host callback wired into every `wapc::WapcHost`. Kubewarden policies can
//! invoke host capabilities (OCI digest lookups, Sigstore verification,
//! cluster resource listing, ...) through this channel; none of that is
//! implemented here; it is explicitly out of scope (see `SPEC_FULL.md`
//! §4). The callback still has to exist — `wapc::WapcHost::new` requires
//! one — so every binding fails with a clear, typed error instead of
//! panicking or silently returning empty bytes.

use tracing::warn;

pub(crate) fn host_callback(
    _policy_id: u64,
    binding: &str,
    namespace: &str,
    operation: &str,
    _payload: &[u8],
) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    warn!(
        binding,
        namespace, operation, "guest invoked an unsupported host capability"
    );
    Err(format!("no host capability bound for '{binding}::{namespace}::{operation}'").into())
}
