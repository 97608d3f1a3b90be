use crate::runtimes::EpochDeadlines;
use crate::runtimes::wapc::errors::WapcRuntimeError;

/// Builds the `WasmtimeEngineProviderPre` once per compiled module, mirroring
/// the teacher's `runtimes::wapc::StackPre`.
#[derive(Clone)]
pub(crate) struct StackPre {
    engine_provider_pre: wasmtime_provider::WasmtimeEngineProviderPre,
}

impl StackPre {
    pub(crate) fn new(
        engine: wasmtime::Engine,
        module: wasmtime::Module,
        epoch_deadlines: Option<EpochDeadlines>,
    ) -> Result<Self, WapcRuntimeError> {
        let mut builder = wasmtime_provider::WasmtimeEngineProviderBuilder::new()
            .engine(engine)
            .module(module);
        if let Some(deadlines) = epoch_deadlines {
            builder = builder.enable_epoch_interruptions(deadlines.init, deadlines.func);
        }

        let engine_provider_pre = builder.build_pre().map_err(WapcRuntimeError::Build)?;
        Ok(Self {
            engine_provider_pre,
        })
    }

    pub(crate) fn rehydrate(
        &self,
    ) -> Result<wasmtime_provider::WasmtimeEngineProvider, anyhow::Error> {
        self.engine_provider_pre.rehydrate()
    }
}
