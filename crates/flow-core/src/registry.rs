//! Native registry: the host-facing registration table
//!
//! Host plugins publish callables here under a name; generated code
//! reaches them through [`flow_dispatch`] with the entry's numeric index
//! baked in. Entries must therefore keep their indices for as long as a
//! compiled unit is alive.

use std::ffi::c_void;

use thiserror::Error;

use crate::value::{FlowValue, ValueKind};

/// Registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("native '{0}' is already registered")]
    Duplicate(String),
}

/// The category of a native entry.
///
/// Setup and shared variants mirror the host server's configuration
/// scopes; the code generator only distinguishes variables (assignable),
/// handlers (short-circuit on true), and everything else (plain calls).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeKind {
    SetupFunction,
    SetupProperty,
    SharedFunction,
    SharedProperty,
    Function,
    Property,
    Variable,
    Handler,
}

impl NativeKind {
    /// Entries that may appear on the left of an assignment
    #[must_use]
    pub const fn is_variable(self) -> bool {
        matches!(self, NativeKind::Variable)
    }

    /// Entries whose true result consumes the request
    #[must_use]
    pub const fn is_handler(self) -> bool {
        matches!(self, NativeKind::Handler)
    }
}

/// Argument view handed to a native callback.
///
/// `values[0]` is the return slot (initialized to Void by generated
/// code); `values[1..]` are the marshalled arguments.
pub struct NativeCall<'a> {
    context: *mut c_void,
    values: &'a mut [FlowValue],
}

impl<'a> NativeCall<'a> {
    pub(crate) fn new(context: *mut c_void, values: &'a mut [FlowValue]) -> Self {
        Self { context, values }
    }

    /// The opaque per-request context pointer passed to `invoke`
    #[must_use]
    pub fn context(&self) -> *mut c_void {
        self.context
    }

    /// Number of arguments
    #[must_use]
    pub fn argc(&self) -> usize {
        self.values.len() - 1
    }

    /// The marshalled arguments
    #[must_use]
    pub fn args(&self) -> &[FlowValue] {
        &self.values[1..]
    }

    /// A single argument, 0-based
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&FlowValue> {
        self.values.get(index + 1)
    }

    /// The return slot
    pub fn ret(&mut self) -> &mut FlowValue {
        &mut self.values[0]
    }
}

/// Callback type for native entries.
///
/// The opaque `userdata` pointer of the C-era registration surface is
/// rendered as closure capture state.
pub type NativeCallback = Box<dyn Fn(&mut NativeCall<'_>)>;

/// Import hook invoked once per `import` declaration before codegen;
/// returning false fails the compile.
pub type ImportHook = Box<dyn FnMut(&str, Option<&str>) -> bool>;

/// One registered native
pub struct NativeEntry {
    name: String,
    kind: NativeKind,
    return_kind: ValueKind,
    callback: NativeCallback,
}

impl NativeEntry {
    /// The registered name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry category
    #[must_use]
    pub fn kind(&self) -> NativeKind {
        self.kind
    }

    /// The declared return kind
    #[must_use]
    pub fn return_kind(&self) -> ValueKind {
        self.return_kind
    }
}

/// The registration table generated code dispatches against
#[derive(Default)]
pub struct NativeRegistry {
    entries: Vec<NativeEntry>,
    import_hook: Option<ImportHook>,
}

impl NativeRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register an entry; the returned index is what generated code
    /// embeds and stays stable for the registry's lifetime
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: NativeKind,
        return_kind: ValueKind,
        callback: impl Fn(&mut NativeCall<'_>) + 'static,
    ) -> Result<usize, RegistryError> {
        let name = name.into();
        if self.find(&name).is_some() {
            return Err(RegistryError::Duplicate(name));
        }
        self.entries.push(NativeEntry {
            name,
            kind,
            return_kind,
            callback: Box::new(callback),
        });
        Ok(self.entries.len() - 1)
    }

    /// Register a request-scope function
    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        return_kind: ValueKind,
        callback: impl Fn(&mut NativeCall<'_>) + 'static,
    ) -> Result<usize, RegistryError> {
        self.register(name, NativeKind::Function, return_kind, callback)
    }

    /// Register a request-scope property
    pub fn register_property(
        &mut self,
        name: impl Into<String>,
        return_kind: ValueKind,
        callback: impl Fn(&mut NativeCall<'_>) + 'static,
    ) -> Result<usize, RegistryError> {
        self.register(name, NativeKind::Property, return_kind, callback)
    }

    /// Register a setup-scope function
    pub fn register_setup_function(
        &mut self,
        name: impl Into<String>,
        return_kind: ValueKind,
        callback: impl Fn(&mut NativeCall<'_>) + 'static,
    ) -> Result<usize, RegistryError> {
        self.register(name, NativeKind::SetupFunction, return_kind, callback)
    }

    /// Register a setup-scope property
    pub fn register_setup_property(
        &mut self,
        name: impl Into<String>,
        return_kind: ValueKind,
        callback: impl Fn(&mut NativeCall<'_>) + 'static,
    ) -> Result<usize, RegistryError> {
        self.register(name, NativeKind::SetupProperty, return_kind, callback)
    }

    /// Register a function available in both scopes
    pub fn register_shared_function(
        &mut self,
        name: impl Into<String>,
        return_kind: ValueKind,
        callback: impl Fn(&mut NativeCall<'_>) + 'static,
    ) -> Result<usize, RegistryError> {
        self.register(name, NativeKind::SharedFunction, return_kind, callback)
    }

    /// Register a property available in both scopes
    pub fn register_shared_property(
        &mut self,
        name: impl Into<String>,
        return_kind: ValueKind,
        callback: impl Fn(&mut NativeCall<'_>) + 'static,
    ) -> Result<usize, RegistryError> {
        self.register(name, NativeKind::SharedProperty, return_kind, callback)
    }

    /// Register an assignable variable; reads arrive with zero arguments,
    /// writes with the new value as the only argument
    pub fn register_variable(
        &mut self,
        name: impl Into<String>,
        return_kind: ValueKind,
        callback: impl Fn(&mut NativeCall<'_>) + 'static,
    ) -> Result<usize, RegistryError> {
        self.register(name, NativeKind::Variable, return_kind, callback)
    }

    /// Register a handler; its boolean result decides whether the
    /// request is consumed
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        callback: impl Fn(&mut NativeCall<'_>) + 'static,
    ) -> Result<usize, RegistryError> {
        self.register(name, NativeKind::Handler, ValueKind::Boolean, callback)
    }

    /// Look up an entry index by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// The entry at `index`
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&NativeEntry> {
        self.entries.get(index)
    }

    /// Install the import hook
    pub fn set_import_hook(&mut self, hook: impl FnMut(&str, Option<&str>) -> bool + 'static) {
        self.import_hook = Some(Box::new(hook));
    }

    /// Run the import hook for one `import` declaration
    pub(crate) fn import(&mut self, name: &str, path: Option<&str>) -> bool {
        match &mut self.import_hook {
            Some(hook) => hook(name, path),
            None => true,
        }
    }

    /// Invoke entry `id` against an argv block.
    ///
    /// # Safety
    /// `argv` must point at `argc + 1` valid `FlowValue` records.
    pub(crate) unsafe fn dispatch(
        &self,
        id: i32,
        context: *mut c_void,
        argc: i32,
        argv: *mut FlowValue,
    ) {
        let Some(entry) = self.entries.get(id as usize) else {
            debug_assert!(false, "dispatch with unknown native id {id}");
            return;
        };
        let values = std::slice::from_raw_parts_mut(argv, argc as usize + 1);
        let mut call = NativeCall::new(context, values);
        (entry.callback)(&mut call);
    }
}

/// The single ABI entry point generated code calls back through.
///
/// `self_` is the registry address the code generator embedded, `id` the
/// native entry index, `userdata` the opaque per-request context, and
/// `argv` a block of `argc + 1` value records whose first record is the
/// return slot.
///
/// # Safety
/// Called from JIT-compiled code; `self_` must be a live
/// `NativeRegistry` and `argv` a valid argv block.
pub unsafe extern "C" fn flow_dispatch(
    self_: u64,
    id: i32,
    userdata: *mut c_void,
    argc: i32,
    argv: *mut FlowValue,
) {
    let registry = &*(self_ as *const NativeRegistry);
    registry.dispatch(id, userdata, argc, argv);
}
