use crate::dispatch::CallArgs;
use crate::errors::{BindError, BindResult};
use crate::instance::Instance;
use crate::native::{NativeFunction, NativeLibrary, SymbolAddr, SymbolSource, SymbolTable};
use crate::value::{Overrides, Value};
use simbind_gen::{compile_class_spec, ClassMetadata};
use simbind_types::ClassSpec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub type CallOutcome = BindResult<Option<Value>>;

/// Replacement for a generated method. Receives the instance, the caller's
/// arguments and the generated implementation to delegate to.
pub type CallWrapper =
    Arc<dyn Fn(&mut Instance, CallArgs, &dyn Fn(&mut Instance, CallArgs) -> CallOutcome) -> CallOutcome + Send + Sync>;

/// A compiled class bound to its native symbols.
pub struct SimClass {
    meta: ClassMetadata,
    natives: HashMap<String, NativeFunction>,
    wrappers: HashMap<String, CallWrapper>,
    source: Arc<dyn SymbolSource>,
}

impl SimClass {
    pub fn builder(spec: ClassSpec) -> ClassBuilder {
        ClassBuilder { spec, source: None, wrappers: Vec::new() }
    }

    pub fn from_spec(spec: ClassSpec, source: Arc<dyn SymbolSource>) -> BindResult<Arc<SimClass>> {
        Self::builder(spec).symbols(source).build()
    }

    pub fn metadata(&self) -> &ClassMetadata {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn symbol_source(&self) -> &Arc<dyn SymbolSource> {
        &self.source
    }

    pub fn instantiate(self: &Arc<Self>, overrides: Overrides) -> BindResult<Instance> {
        Instance::new(self, overrides)
    }

    pub(crate) fn native(&self, concrete: &str) -> Option<&NativeFunction> {
        self.natives.get(concrete)
    }

    pub(crate) fn wrapper(&self, function: &str) -> Option<&CallWrapper> {
        self.wrappers.get(function)
    }
}

impl std::fmt::Debug for SimClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimClass")
            .field("name", &self.meta.name)
            .field("symbols", &self.natives.len())
            .field("source", &self.source.describe())
            .finish()
    }
}

pub struct ClassBuilder {
    spec: ClassSpec,
    source: Option<Arc<dyn SymbolSource>>,
    wrappers: Vec<(String, CallWrapper)>,
}

impl ClassBuilder {
    /// Resolve symbols here instead of opening the spec's library.
    pub fn symbols(mut self, source: Arc<dyn SymbolSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn wrap<F>(mut self, function: impl Into<String>, wrapper: F) -> Self
    where
        F: Fn(&mut Instance, CallArgs, &dyn Fn(&mut Instance, CallArgs) -> CallOutcome) -> CallOutcome
            + Send
            + Sync
            + 'static,
    {
        self.wrappers.push((function.into(), Arc::new(wrapper)));
        self
    }

    pub fn build(self) -> BindResult<Arc<SimClass>> {
        let meta = compile_class_spec(&self.spec)?;

        let source: Arc<dyn SymbolSource> = match (self.source, &meta.library) {
            (Some(source), _) => source,
            (None, Some(library)) => Arc::new(NativeLibrary::load_by_name(&library.name, library.dir.as_deref())?),
            (None, None) if meta.functions.is_empty() => Arc::new(SymbolTable::new()),
            (None, None) => return Err(BindError::NoSymbolSource { class: meta.name.clone() }),
        };

        let mut natives = HashMap::new();
        let mut missing = Vec::new();
        for function in meta.functions.values() {
            let arg_types = function.native_types();
            for concrete in function.symbols.keys() {
                let symbol = meta.native_symbol(concrete);
                match source.resolve(&symbol) {
                    Some(addr) => {
                        debug!(class = %meta.name, %symbol, "resolved native symbol");
                        natives.insert(
                            concrete.clone(),
                            NativeFunction { symbol, addr: SymbolAddr(addr), arg_types: arg_types.clone() },
                        );
                    }
                    None => missing.push(symbol),
                }
            }
        }
        if !missing.is_empty() {
            return Err(BindError::MissingSymbols { class: meta.name.clone(), symbols: missing });
        }

        let mut wrappers = HashMap::new();
        for (function, wrapper) in self.wrappers {
            if meta.function(&function).is_none() {
                return Err(BindError::UnknownWrapper { function });
            }
            wrappers.insert(function, wrapper);
        }

        info!(
            class = %meta.name,
            members = meta.members.len(),
            symbols = natives.len(),
            source = %source.describe(),
            "bound simulation class"
        );
        Ok(Arc::new(SimClass { meta, natives, wrappers, source }))
    }
}
