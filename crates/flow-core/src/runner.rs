//! The embedding facade
//!
//! [`Runtime`] ties the pieces together: it owns the native registry the
//! host populated, drives parse → codegen → JIT per compile, runs the
//! module initializer once, and exposes handler lookup and invocation.
//! All compile-time failures are reported through the installed error
//! handler and make `compile` return false.

use std::ffi::c_void;
use std::fs;
use std::path::Path;

use crate::codegen::{CodeGen, LiteralPool};
use crate::jit::JitEngine;
use crate::lexer::LineIndex;
use crate::parser::Parser;
use crate::registry::NativeRegistry;

/// A handle to one compiled handler.
///
/// Valid until the owning runtime is closed, reset, or recompiled.
#[derive(Debug, Clone)]
pub struct HandlerRef {
    name: String,
    ptr: *const u8,
}

impl HandlerRef {
    /// The handler's declared name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// State owned by one successful compile. The literal pools hold every
/// address the machine code embeds, so they are dropped only after the
/// engine has freed that code.
struct CompiledUnit {
    handlers: Vec<HandlerRef>,
    /// Keeps string/regex/IP literals and the concat arena alive for
    /// the machine code that points into them
    _pool: LiteralPool,
}

/// The Flow runtime: one registry, one JIT engine, at most one
/// compiled unit at a time
pub struct Runtime {
    registry: Box<NativeRegistry>,
    engine: JitEngine,
    error_handler: Option<Box<dyn Fn(&str)>>,
    unit: Option<CompiledUnit>,
}

impl Runtime {
    /// Create a runtime over a host-populated registry.
    ///
    /// The registry is boxed so the address generated code embeds stays
    /// stable; entries registered later keep their indices.
    #[must_use]
    pub fn new(registry: NativeRegistry) -> Self {
        Self {
            registry: Box::new(registry),
            engine: JitEngine::new(),
            error_handler: None,
            unit: None,
        }
    }

    /// The native registry
    #[must_use]
    pub fn registry(&self) -> &NativeRegistry {
        &self.registry
    }

    /// Mutable access for registering further natives. Entries must be
    /// added before the compile that references them.
    pub fn registry_mut(&mut self) -> &mut NativeRegistry {
        &mut self.registry
    }

    /// Install the error handler all compile diagnostics go through
    pub fn set_error_handler(&mut self, handler: impl Fn(&str) + 'static) {
        self.error_handler = Some(Box::new(handler));
    }

    /// Set the optimization level (clamped to 0..=4); applies from the
    /// next compile
    pub fn set_optimization_level(&mut self, level: i32) {
        self.engine.set_optimization_level(level);
    }

    /// The current optimization level
    #[must_use]
    pub fn optimization_level(&self) -> u8 {
        self.engine.optimization_level()
    }

    fn report(&self, message: &str) {
        if let Some(handler) = &self.error_handler {
            handler(message);
        }
    }

    /// Compile a Flow source file. Returns false on any failure, after
    /// reporting every collected error through the error handler.
    pub fn compile(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(source) => self.compile_source(&source),
            Err(e) => {
                self.report(&format!("cannot open '{}': {e}", path.display()));
                false
            }
        }
    }

    /// Compile Flow source text. A live unit is closed first.
    pub fn compile_source(&mut self, source: &str) -> bool {
        if self.unit.is_some() {
            self.engine.close();
            self.unit = None;
        }

        let unit = match Parser::parse_unit(source) {
            Ok(unit) => unit,
            Err(errors) => {
                let index = LineIndex::new(source);
                for e in errors {
                    self.report(&format!(
                        "parse error: {} (at {})",
                        e.kind,
                        index.location(e.span.start)
                    ));
                }
                return false;
            }
        };

        if let Err(e) = self.engine.reinitialize() {
            self.report(&e.to_string());
            return false;
        }

        for import in &unit.imports {
            if !self.registry.import(&import.name.name, import.path.as_deref()) {
                self.report(&format!("import of plugin '{}' failed", import.name.name));
                return false;
            }
        }

        let mut pool = LiteralPool::new();
        let registry_addr = std::ptr::addr_of!(*self.registry) as i64;
        let generated =
            CodeGen::new(&mut self.engine, &self.registry, &mut pool, registry_addr).run(&unit);

        let program = match generated {
            Ok(program) => program,
            Err(errors) => {
                for message in errors {
                    self.report(&format!("code generator error: {message}"));
                }
                // discard the partially built module so the next
                // compile starts from a fresh one
                self.engine.close();
                return false;
            }
        };

        if let Err(e) = self.engine.finalize() {
            self.report(&e.to_string());
            self.engine.close();
            return false;
        }

        // run global-scope initializers exactly once per compile
        if let Some(ptr) = self.engine.func_ptr(program.init) {
            let init: extern "C" fn() = unsafe { std::mem::transmute(ptr) };
            init();
        }

        let handlers = program
            .handlers
            .into_iter()
            .filter_map(|(name, id)| {
                self.engine.func_ptr(id).map(|ptr| HandlerRef { name, ptr })
            })
            .collect();

        self.unit = Some(CompiledUnit {
            handlers,
            _pool: pool,
        });
        true
    }

    /// Handlers of the current unit, in declaration order
    #[must_use]
    pub fn list_handlers(&self) -> &[HandlerRef] {
        self.unit.as_ref().map_or(&[][..], |u| &u.handlers)
    }

    /// Find a handler of the current unit by name
    #[must_use]
    pub fn find_handler(&self, name: &str) -> Option<HandlerRef> {
        self.list_handlers().iter().find(|h| h.name == name).cloned()
    }

    /// Invoke a handler with an opaque request context. True means the
    /// request was consumed. Returns false when no unit is live.
    #[must_use]
    pub fn invoke(&self, handler: &HandlerRef, userdata: *mut c_void) -> bool {
        if self.unit.is_none() || handler.ptr.is_null() {
            return false;
        }
        let entry: unsafe extern "C" fn(*mut c_void) -> bool =
            unsafe { std::mem::transmute(handler.ptr) };
        unsafe { entry(userdata) }
    }

    /// Release machine code, engine, and unit state
    pub fn close(&mut self) {
        // machine code first, then the pools its pointers target
        self.engine.close();
        self.unit = None;
    }

    /// `close` + reinitialize: ready for a fresh compile
    pub fn reset(&mut self) -> bool {
        self.close();
        match self.engine.reinitialize() {
            Ok(()) => true,
            Err(e) => {
                self.report(&e.to_string());
                false
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.close();
    }
}
