use crate::runtimes::EpochDeadlines;
use crate::runtimes::wasi::errors::WasiRuntimeError;

pub(crate) struct Context {
    pub(crate) wasi_ctx: wasi_common::WasiCtx,
}

/// Builds the `wasmtime::Linker`/`InstancePre` once per compiled module, the
/// same "compile once, instantiate many" split as the teacher's
/// `wasi_cli::StackPre`.
#[derive(Clone)]
pub(crate) struct StackPre {
    engine: wasmtime::Engine,
    instance_pre: wasmtime::InstancePre<Context>,
    epoch_deadlines: Option<EpochDeadlines>,
}

impl StackPre {
    pub(crate) fn new(
        engine: wasmtime::Engine,
        module: wasmtime::Module,
        epoch_deadlines: Option<EpochDeadlines>,
    ) -> Result<Self, WasiRuntimeError> {
        let mut linker = wasmtime::Linker::<Context>::new(&engine);
        wasmtime_wasi::add_to_linker(&mut linker, |c: &mut Context| &mut c.wasi_ctx)
            .map_err(WasiRuntimeError::Link)?;

        let instance_pre = linker
            .instantiate_pre(&module)
            .map_err(WasiRuntimeError::Link)?;
        Ok(Self {
            engine,
            instance_pre,
            epoch_deadlines,
        })
    }

    pub(crate) fn build_store(&self, ctx: Context) -> wasmtime::Store<Context> {
        let mut store = wasmtime::Store::new(&self.engine, ctx);
        if let Some(deadline) = self.epoch_deadlines {
            store.set_epoch_deadline(deadline.func);
        }
        store
    }

    pub(crate) fn rehydrate(
        &self,
        store: &mut wasmtime::Store<Context>,
    ) -> Result<wasmtime::Instance, wasmtime::Error> {
        self.instance_pre.instantiate(store)
    }

    pub(crate) fn has_function(&self, name: &str) -> bool {
        self.instance_pre.module().get_export(name).is_some()
    }
}
