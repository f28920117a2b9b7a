//! JIT engine lifecycle
//!
//! Owns the Cranelift JIT module and the compilation contexts reused
//! across functions. The engine is built lazily: [`JitEngine::reinitialize`]
//! constructs the target ISA with the current optimization settings,
//! publishes the runtime helper and dispatch symbols, and declares the
//! helper imports generated code calls. `close` releases every compiled
//! function's machine code; `reset` is close followed by a fresh
//! reinitialize.

use std::collections::HashMap;

use cranelift_codegen::ir::{types, AbiParam, Signature};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::FunctionBuilderContext;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use thiserror::Error;

use crate::registry;
use crate::runtime;

/// Errors raised while building or driving the JIT engine
#[derive(Error, Debug, Clone)]
pub enum JitError {
    /// The host machine has no Cranelift backend
    #[error("host machine is not supported: {0}")]
    HostUnsupported(String),

    /// ISA construction failed
    #[error("failed to configure code generator: {0}")]
    Isa(String),

    /// A module-level operation failed (declare/define/finalize)
    #[error("jit module error: {0}")]
    Module(String),

    /// An operation needed a live engine
    #[error("jit engine is not initialized")]
    NotInitialized,
}

/// The runtime helpers generated code may call, keyed for FuncId lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Helper {
    Dispatch,
    Strlen,
    Strcasecmp,
    Strncasecmp,
    Strcasestr,
    Strcat,
    Endswith,
    Arraylen,
    Arrayadd,
    Arraycmp,
    Regexmatch,
    Regexmatch2,
    NumberInArray,
    StringInArray,
    Ipcmp,
    Ipstrcmp,
    Pow,
}

impl Helper {
    pub(crate) const ALL: [Helper; 17] = [
        Helper::Dispatch,
        Helper::Strlen,
        Helper::Strcasecmp,
        Helper::Strncasecmp,
        Helper::Strcasestr,
        Helper::Strcat,
        Helper::Endswith,
        Helper::Arraylen,
        Helper::Arrayadd,
        Helper::Arraycmp,
        Helper::Regexmatch,
        Helper::Regexmatch2,
        Helper::NumberInArray,
        Helper::StringInArray,
        Helper::Ipcmp,
        Helper::Ipstrcmp,
        Helper::Pow,
    ];

    /// The linker-visible symbol name
    pub(crate) const fn symbol(self) -> &'static str {
        match self {
            Helper::Dispatch => "flow_dispatch",
            Helper::Strlen => "flow_strlen",
            Helper::Strcasecmp => "flow_strcasecmp",
            Helper::Strncasecmp => "flow_strncasecmp",
            Helper::Strcasestr => "flow_strcasestr",
            Helper::Strcat => "flow_strcat",
            Helper::Endswith => "flow_endswith",
            Helper::Arraylen => "flow_arraylen",
            Helper::Arrayadd => "flow_arrayadd",
            Helper::Arraycmp => "flow_arraycmp",
            Helper::Regexmatch => "flow_regexmatch",
            Helper::Regexmatch2 => "flow_regexmatch2",
            Helper::NumberInArray => "flow_number_in_array",
            Helper::StringInArray => "flow_string_in_array",
            Helper::Ipcmp => "flow_ipcmp",
            Helper::Ipstrcmp => "flow_ipstrcmp",
            Helper::Pow => "flow_pow",
        }
    }

    /// The import signature; pointers travel as I64
    fn signature(self, module: &JITModule) -> Signature {
        let mut sig = module.make_signature();
        let (params, ret): (&[types::Type], Option<types::Type>) = match self {
            Helper::Dispatch => (
                &[types::I64, types::I32, types::I64, types::I32, types::I64],
                None,
            ),
            Helper::Strlen => (&[types::I64], Some(types::I64)),
            Helper::Strcasecmp => (&[types::I64, types::I64], Some(types::I32)),
            Helper::Strncasecmp => (&[types::I64, types::I64, types::I64], Some(types::I32)),
            Helper::Strcasestr => (
                &[types::I64, types::I64, types::I64, types::I64],
                Some(types::I32),
            ),
            Helper::Strcat => (
                &[types::I64, types::I64, types::I64, types::I64, types::I64],
                Some(types::I64),
            ),
            Helper::Endswith => (&[types::I64, types::I64], Some(types::I32)),
            Helper::Arraylen => (&[types::I64], Some(types::I32)),
            Helper::Arrayadd => (&[types::I64, types::I64, types::I64], None),
            Helper::Arraycmp => (&[types::I64, types::I64], Some(types::I32)),
            Helper::Regexmatch => (
                &[types::I64, types::I64, types::I64, types::I64],
                Some(types::I32),
            ),
            Helper::Regexmatch2 => (&[types::I64, types::I64, types::I64], Some(types::I32)),
            Helper::NumberInArray => (&[types::I64, types::I64], Some(types::I32)),
            Helper::StringInArray => (&[types::I64, types::I64, types::I64], Some(types::I32)),
            Helper::Ipcmp => (&[types::I64, types::I64], Some(types::I32)),
            Helper::Ipstrcmp => (&[types::I64, types::I64], Some(types::I32)),
            Helper::Pow => (&[types::F64, types::F64], Some(types::F64)),
        };
        for p in params {
            sig.params.push(AbiParam::new(*p));
        }
        if let Some(r) = ret {
            sig.returns.push(AbiParam::new(r));
        }
        sig
    }
}

/// The JIT engine owning module, contexts, and helper declarations
pub struct JitEngine {
    /// The Cranelift JIT module; None until reinitialized and after close
    pub(crate) module: Option<JITModule>,

    /// Compilation context (reused between functions)
    pub(crate) ctx: Context,

    /// Function builder context (reused between functions)
    pub(crate) builder_ctx: FunctionBuilderContext,

    /// Declared helper imports of the current module
    pub(crate) helpers: HashMap<Helper, FuncId>,

    /// Requested optimization level, clamped to [0, 4]
    opt_level: u8,
}

impl JitEngine {
    /// Create an engine with no live module; `reinitialize` builds one
    #[must_use]
    pub fn new() -> Self {
        Self {
            module: None,
            ctx: Context::new(),
            builder_ctx: FunctionBuilderContext::new(),
            helpers: HashMap::new(),
            opt_level: 0,
        }
    }

    /// The current optimization level
    #[must_use]
    pub fn optimization_level(&self) -> u8 {
        self.opt_level
    }

    /// Set the optimization level, clamped to [0, 4]. Takes effect at
    /// the next reinitialize because Cranelift bakes the setting into
    /// the target ISA.
    pub fn set_optimization_level(&mut self, level: i32) {
        self.opt_level = level.clamp(0, 4) as u8;
    }

    /// Returns true if a module is live
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.module.is_some()
    }

    /// Lazily construct the engine: ISA, JIT module, helper symbols and
    /// import declarations. Idempotent.
    pub fn reinitialize(&mut self) -> Result<(), JitError> {
        if self.module.is_some() {
            return Ok(());
        }

        let mut flag_builder = settings::builder();
        let opt = match self.opt_level {
            0 => "none",
            1 | 2 => "speed",
            _ => "speed_and_size",
        };
        flag_builder
            .set("opt_level", opt)
            .map_err(|e| JitError::Isa(e.to_string()))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| JitError::Isa(e.to_string()))?;

        let isa_builder =
            cranelift_native::builder().map_err(|msg| JitError::HostUnsupported(msg.to_string()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| JitError::Isa(e.to_string()))?;

        let mut jit_builder =
            JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        for (name, ptr) in runtime::symbols() {
            jit_builder.symbol(name, ptr);
        }
        jit_builder.symbol(
            Helper::Dispatch.symbol(),
            registry::flow_dispatch as *const u8,
        );

        let mut module = JITModule::new(jit_builder);
        for helper in Helper::ALL {
            let sig = helper.signature(&module);
            let id = module
                .declare_function(helper.symbol(), Linkage::Import, &sig)
                .map_err(|e| JitError::Module(e.to_string()))?;
            self.helpers.insert(helper, id);
        }

        self.module = Some(module);
        Ok(())
    }

    /// Release every compiled function's machine code and tear the
    /// engine down. Safe to call twice.
    pub fn close(&mut self) {
        if let Some(module) = self.module.take() {
            // Frees the code and data memory of every function compiled
            // into this module. Callers must not run pointers obtained
            // from it afterwards.
            unsafe { module.free_memory() };
        }
        self.helpers.clear();
        self.ctx = Context::new();
    }

    /// `close` + `reinitialize`: an empty engine ready for a fresh
    /// compile
    pub fn reset(&mut self) -> Result<(), JitError> {
        self.close();
        self.reinitialize()
    }

    /// Make every defined function executable
    pub fn finalize(&mut self) -> Result<(), JitError> {
        let module = self.module.as_mut().ok_or(JitError::NotInitialized)?;
        module
            .finalize_definitions()
            .map_err(|e| JitError::Module(e.to_string()))
    }

    /// Pointer to a finalized function's machine code
    #[must_use]
    pub(crate) fn func_ptr(&self, id: FuncId) -> Option<*const u8> {
        self.module.as_ref().map(|m| m.get_finalized_function(id))
    }
}

impl Default for JitEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimization_level_is_clamped() {
        let mut engine = JitEngine::new();
        engine.set_optimization_level(-3);
        assert_eq!(engine.optimization_level(), 0);
        engine.set_optimization_level(99);
        assert_eq!(engine.optimization_level(), 4);
        engine.set_optimization_level(2);
        assert_eq!(engine.optimization_level(), 2);
    }

    #[test]
    fn reinitialize_is_idempotent() {
        let mut engine = JitEngine::new();
        engine.reinitialize().unwrap();
        assert!(engine.is_ready());
        engine.reinitialize().unwrap();
        assert!(engine.is_ready());
        assert_eq!(engine.helpers.len(), Helper::ALL.len());
    }

    #[test]
    fn close_without_init_is_a_no_op() {
        let mut engine = JitEngine::new();
        engine.close();
        assert!(!engine.is_ready());
    }

    #[test]
    fn reset_yields_a_fresh_engine() {
        let mut engine = JitEngine::new();
        engine.reinitialize().unwrap();
        engine.reset().unwrap();
        assert!(engine.is_ready());
    }
}
