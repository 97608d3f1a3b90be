use std::time::Duration;

use tracing::{error, info};

use crate::runtimes::EpochDeadlines;
use crate::runtimes::wapc::errors::WapcRuntimeError;
use crate::runtimes::wapc::pool::Pool;
use crate::runtimes::wapc::stack_pre::StackPre;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Error message wasmtime_provider returns when guest execution is
/// interrupted because an epoch deadline was exceeded. wasmtime_provider
/// doesn't expose a typed error for this, so the text must be matched —
/// same approach as the teacher's `runtimes::wapc::runtime`.
const WAPC_EPOCH_INTERRUPTION_ERR_MSG: &str =
    "guest code interrupted, execution deadline exceeded";

/// Pool-backed WAPC host runtime (spec.md §4.2). Every `run` borrows one of
/// `pool_size` pre-warmed `wapc::WapcHost` instances for up to 30 seconds.
pub struct WapcRuntime {
    pool: Pool,
}

impl WapcRuntime {
    pub fn compile(
        engine: wasmtime::Engine,
        bytes: &[u8],
        epoch_deadlines: Option<EpochDeadlines>,
        pool_size: usize,
    ) -> Result<Self, WapcRuntimeError> {
        let module =
            wasmtime::Module::new(&engine, bytes).map_err(WapcRuntimeError::Compile)?;
        let stack_pre = StackPre::new(engine, module, epoch_deadlines)?;
        let pool = Pool::new(stack_pre, pool_size.max(1))?;
        Ok(Self { pool })
    }

    pub fn run(&self, fn_name: &str, input: &[u8]) -> Result<Vec<u8>, WapcRuntimeError> {
        let mut pooled = self.pool.acquire(ACQUIRE_TIMEOUT)?;
        match pooled.call(fn_name, input) {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                error!(error = %err, function = fn_name, "waPC call failed");
                if err.to_string().contains(WAPC_EPOCH_INTERRUPTION_ERR_MSG) {
                    if let Err(reset_err) = pooled.reset() {
                        error!(
                            error = %reset_err,
                            "cannot reset waPC host after epoch interruption; further calls may fail"
                        );
                    } else {
                        info!("waPC host reset after epoch deadline interruption");
                    }
                }
                Err(WapcRuntimeError::Call(err))
            }
        }
    }
}
