//! wasmtime guest adapter.
//!
//! [`GuestRuntime`] owns the wasmtime [`Engine`] and the [`BridgeConfig`].
//! It registers the `LoadFile` import on a [`Linker`] and instantiates
//! modules into [`WasmGuest`]s, which implement [`Guest`] on top of a
//! [`Store`].
//!
//! The guest memory is held as a [`Memory`] handle, never as a slice:
//! `data()` is called again for every access, so growth triggered by the
//! guest (including inside `allocate`) is always observed.

use tracing::{debug, info};
use wasmtime::{
    Caller, Engine, Extern, Instance, Linker, Memory, Module, Store, StoreLimits,
    StoreLimitsBuilder, TypedFunc,
};

use crate::bridge::BridgeHandle;
use crate::config::{BridgeConfig, GuestExports};
use crate::error::{BridgeError, LoadErrorCode, Result};
use crate::guest::{CallbackToken, ContextToken, Guest};

/// Per-instance state stored in the wasmtime [`Store`].
pub struct HostState {
    /// Where `LoadFile` calls are submitted.
    bridge: BridgeHandle,
    limits: StoreLimits,
}

impl HostState {
    /// The bridge this instance submits `LoadFile` requests to.
    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }
}

/// Compiles and instantiates guest modules wired to a bridge.
pub struct GuestRuntime {
    engine: Engine,
    config: BridgeConfig,
}

impl GuestRuntime {
    /// Create a runtime with the given configuration.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let mut wasm_config = wasmtime::Config::new();
        wasm_config.consume_fuel(true);
        wasm_config.wasm_memory64(false);

        let engine = Engine::new(&wasm_config)
            .map_err(|e| BridgeError::Compilation(format!("failed to create wasm engine: {e}")))?;

        info!(
            import_module = %config.import_module,
            import_name = %config.import_name,
            "guest runtime initialized"
        );

        Ok(Self { engine, config })
    }

    /// Create a runtime with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(BridgeConfig::default())
    }

    /// The wasmtime [`Engine`].
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Compile a module from `.wasm` (or, with wasmtime's `wat` feature,
    /// text) bytes.
    pub fn compile(&self, wasm_bytes: &[u8]) -> Result<Module> {
        Module::new(&self.engine, wasm_bytes).map_err(|e| BridgeError::Compilation(e.to_string()))
    }

    /// Compile and instantiate in one step.
    pub fn load(&self, wasm_bytes: &[u8], bridge: BridgeHandle) -> Result<WasmGuest> {
        let module = self.compile(wasm_bytes)?;
        self.instantiate(&module, bridge)
    }

    /// Register the `LoadFile` import on `linker`.
    ///
    /// Hosts that provide more imports can build their own linker and call
    /// this before instantiating.
    pub fn define_load_file(&self, linker: &mut Linker<HostState>) -> Result<()> {
        let memory_export = self.config.exports.memory.clone();

        linker
            .func_wrap(
                &self.config.import_module,
                &self.config.import_name,
                move |mut caller: Caller<'_, HostState>,
                      path_ptr: u32,
                      path_len: u32,
                      callback_token: u32| {
                    let bridge = caller.data().bridge.clone();
                    let token = CallbackToken(callback_token);

                    let Some(memory) = caller.get_export(&memory_export).and_then(Extern::into_memory)
                    else {
                        bridge.reject(
                            token,
                            LoadErrorCode::Internal,
                            format!("guest exports no memory named `{memory_export}`"),
                        );
                        return;
                    };

                    // Errors are already queued for the guest's failure path.
                    if let Err(err) = bridge.load_file(memory.data(&caller), path_ptr, path_len, token) {
                        debug!(callback_token, error = %err, "LoadFile rejected");
                    }
                },
            )
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;

        Ok(())
    }

    /// Instantiate `module` with a fresh store bound to `bridge`.
    pub fn instantiate(&self, module: &Module, bridge: BridgeHandle) -> Result<WasmGuest> {
        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        self.define_load_file(&mut linker)?;
        self.instantiate_with(&linker, module, bridge)
    }

    /// Instantiate `module` using a caller-supplied linker.
    pub fn instantiate_with(
        &self,
        linker: &Linker<HostState>,
        module: &Module,
        bridge: BridgeHandle,
    ) -> Result<WasmGuest> {
        let state = HostState {
            bridge,
            limits: StoreLimitsBuilder::new()
                .memory_size(self.config.max_memory)
                .build(),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(self.config.max_fuel)
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;

        let exports = &self.config.exports;
        let memory = instance
            .get_memory(&mut store, &exports.memory)
            .ok_or_else(|| BridgeError::MissingExport {
                name: exports.memory.clone(),
                reason: "no exported memory with this name".into(),
            })?;

        let current_context = typed_export(&instance, &mut store, &exports.current_execution_context)?;
        let allocate = typed_export(&instance, &mut store, &exports.allocate)?;
        let dispatch_callback = typed_export(&instance, &mut store, &exports.dispatch_callback)?;
        let dispatch_failure = match instance.get_func(&mut store, &exports.dispatch_failure) {
            Some(func) => Some(func.typed(&store).map_err(|e| BridgeError::MissingExport {
                name: exports.dispatch_failure.clone(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        info!(
            memory_bytes = memory.data_size(&store),
            failure_entry = dispatch_failure.is_some(),
            "guest instantiated"
        );

        Ok(WasmGuest {
            store,
            instance,
            memory,
            current_context,
            allocate,
            dispatch_callback,
            dispatch_failure,
            exports: exports.clone(),
            max_fuel: self.config.max_fuel,
        })
    }
}

fn typed_export<Params, Results>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> Result<TypedFunc<Params, Results>>
where
    Params: wasmtime::WasmParams,
    Results: wasmtime::WasmResults,
{
    instance
        .get_typed_func::<Params, Results>(store, name)
        .map_err(|e| BridgeError::MissingExport {
            name: name.to_owned(),
            reason: e.to_string(),
        })
}

/// A wasmtime instance the bridge can deliver into.
pub struct WasmGuest {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    current_context: TypedFunc<(), u32>,
    allocate: TypedFunc<(u32, u32), u32>,
    dispatch_callback: TypedFunc<(u32, u32, u32, u32), ()>,
    dispatch_failure: Option<TypedFunc<(u32, u32, u32), ()>>,
    exports: GuestExports,
    max_fuel: u64,
}

impl WasmGuest {
    /// Call a `() -> ()` export, e.g. the guest's entry point.
    pub fn call(&mut self, name: &str) -> Result<()> {
        let func = typed_export::<(), ()>(&self.instance, &mut self.store, name)?;
        self.refuel(name)?;
        func.call(&mut self.store, ())
            .map_err(|e| guest_error(name, e))
    }

    /// The underlying instance.
    pub fn instance(&self) -> Instance {
        self.instance
    }

    /// The underlying store.
    pub fn store(&self) -> &Store<HostState> {
        &self.store
    }

    /// The underlying store, mutably (for reading globals, extra calls).
    pub fn store_mut(&mut self) -> &mut Store<HostState> {
        &mut self.store
    }

    /// Whether the guest has a dedicated failure entry point.
    pub fn has_failure_entry(&self) -> bool {
        self.dispatch_failure.is_some()
    }

    /// Top the fuel tank back up before entering the guest.
    fn refuel(&mut self, export: &str) -> Result<()> {
        self.store
            .set_fuel(self.max_fuel)
            .map_err(|e| guest_error(export, e))
    }
}

fn guest_error(export: &str, err: wasmtime::Error) -> BridgeError {
    BridgeError::Guest {
        export: export.to_owned(),
        reason: err.to_string(),
    }
}

impl Guest for WasmGuest {
    fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }

    fn current_execution_context(&mut self) -> Result<ContextToken> {
        let export = self.exports.current_execution_context.clone();
        self.refuel(&export)?;
        self.current_context
            .call(&mut self.store, ())
            .map(ContextToken)
            .map_err(|e| guest_error(&export, e))
    }

    fn allocate(&mut self, len: u32, context: ContextToken) -> Result<u32> {
        let export = self.exports.allocate.clone();
        self.refuel(&export)?;
        self.allocate
            .call(&mut self.store, (len, context.0))
            .map_err(|e| guest_error(&export, e))
    }

    fn dispatch_callback(
        &mut self,
        address: u32,
        len: u32,
        token: CallbackToken,
        context: ContextToken,
    ) -> Result<()> {
        let export = self.exports.dispatch_callback.clone();
        self.refuel(&export)?;
        self.dispatch_callback
            .call(&mut self.store, (address, len, token.0, context.0))
            .map_err(|e| guest_error(&export, e))
    }

    fn dispatch_failure(
        &mut self,
        token: CallbackToken,
        code: LoadErrorCode,
        context: ContextToken,
    ) -> Result<()> {
        let Some(dispatch_failure) = self.dispatch_failure.clone() else {
            debug!(callback_token = %token, %code, "no failure entry point, sending sentinel callback");
            return self.dispatch_callback(code.as_u32(), 0, token, context);
        };
        let export = self.exports.dispatch_failure.clone();
        self.refuel(&export)?;
        dispatch_failure
            .call(&mut self.store, (token.0, code.as_u32(), context.0))
            .map_err(|e| guest_error(&export, e))
    }
}
