//! Scope stack used during code generation
//!
//! A stack of name→binding maps: the bottom frame holds globals, one
//! frame is pushed per handler body, and one per nested compound
//! statement. `lookup` searches top-down; `insert` targets the top
//! frame; `insert_global` targets the bottom frame.

use std::collections::HashMap;

use cranelift_codegen::ir::StackSlot;
use cranelift_module::DataId;

use crate::value::ValueKind;

/// Where a Flow variable lives and how to interpret its payload
#[derive(Debug, Clone, Copy)]
pub(crate) enum Binding {
    /// A handler-local variable in a stack slot
    Local {
        kind: ValueKind,
        slot: StackSlot,
        /// Static element count for array-kind locals
        len: Option<u32>,
    },
    /// A global variable in a module data object written by the
    /// initializer function
    Global {
        kind: ValueKind,
        data: DataId,
        len: Option<u32>,
    },
}

/// The scope stack
pub(crate) struct ScopeStack {
    frames: Vec<HashMap<String, Binding>>,
}

impl ScopeStack {
    /// Create a stack holding only the global frame
    pub(crate) fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    /// Push a fresh frame
    pub(crate) fn enter(&mut self) {
        self.frames.push(HashMap::new());
    }

    /// Pop the top frame; the global frame is never popped
    pub(crate) fn leave(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot leave the global scope");
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Search all frames top-down
    pub(crate) fn lookup(&self, name: &str) -> Option<&Binding> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    /// Mutable lookup, top-down
    pub(crate) fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.frames.iter_mut().rev().find_map(|f| f.get_mut(name))
    }

    /// Bind in the top frame
    pub(crate) fn insert(&mut self, name: impl Into<String>, binding: Binding) {
        if let Some(top) = self.frames.last_mut() {
            top.insert(name.into(), binding);
        }
    }

    /// Bind in the bottom (global) frame
    pub(crate) fn insert_global(&mut self, name: impl Into<String>, binding: Binding) {
        self.frames[0].insert(name.into(), binding);
    }
}
