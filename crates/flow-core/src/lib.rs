//! Flow, an embedded configuration language compiled to native code
//!
//! Flow is the routing language of an HTTP server: configuration files
//! declare handlers whose statements match, branch, and call back into
//! host-registered natives. Nothing is interpreted; each handler is
//! JIT-compiled through Cranelift into a native function invoked once
//! per request, returning whether the request was consumed.
//!
//! This crate provides the language core:
//! - Lexer and parser for the Flow source surface
//! - The native registry host plugins publish callables into
//! - The type-directed code generator (AST → Cranelift IR)
//! - The JIT engine and the runtime helpers generated code calls
//! - The `dispatch` ABI and the fixed-layout [`FlowValue`] record
//!
//! ```no_run
//! use flow_core::{NativeRegistry, Runtime};
//!
//! let mut registry = NativeRegistry::new();
//! registry.register_handler("deny", |call| call.ret().set_boolean(true)).unwrap();
//!
//! let mut rt = Runtime::new(registry);
//! rt.set_error_handler(|msg| eprintln!("{msg}"));
//! if rt.compile("site.flow") {
//!     let main = rt.find_handler("main").unwrap();
//!     let consumed = rt.invoke(&main, std::ptr::null_mut());
//!     let _ = consumed;
//! }
//! ```

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lexer module - tokenization of Flow source code
pub mod lexer;

/// Abstract Syntax Tree - parsed representation of Flow source code
pub mod ast;

/// Parser module - converts tokens into AST
pub mod parser;

/// The host↔guest value ABI
pub mod value;

/// Native registry and the dispatch entry point
pub mod registry;

/// Runtime helpers called by generated code
pub mod runtime;

/// JIT engine lifecycle
pub mod jit;

mod codegen;
mod runner;

pub use jit::{JitEngine, JitError};
pub use registry::{
    NativeCall, NativeEntry, NativeKind, NativeRegistry, RegistryError,
};
pub use runner::{HandlerRef, Runtime};
pub use value::{FlowBuffer, FlowValue, ValueKind};
