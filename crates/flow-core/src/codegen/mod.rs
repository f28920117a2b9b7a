//! Code generation: AST → Cranelift IR
//!
//! One pass over the unit. The module initializer is emitted first and
//! stores every global variable's value into a module data object; each
//! handler then lowers to a native function `fn(context) -> bool` with a
//! catch-all `return false`. Operator lowering is type-directed: every
//! generated value carries its Flow kind, and the kind pair selects the
//! instruction sequence, the runtime helper, or the compile error.
//!
//! Semantic errors do not stop the pass. The offending function is
//! poisoned and skipped at definition time, but the rest of the unit is
//! still generated so a single compile reports every error.

mod scope;

use std::collections::HashMap;
use std::ffi::CString;
use std::net::IpAddr;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    types, AbiParam, Block, InstBuilder, MemFlags, StackSlotData, StackSlotKind, UserFuncName,
    Value,
};
use cranelift_frontend::{FunctionBuilder, Variable};
use cranelift_jit::JITModule;
use cranelift_module::{DataDescription, FuncId, Linkage, Module};
use regex::{Regex, RegexBuilder};

use crate::ast::{BinOp, Expr, ExprKind, HandlerDecl, Stmt, StmtKind, UnaryOp, Unit, VarDecl};
use crate::jit::{Helper, JitEngine};
use crate::registry::NativeRegistry;
use crate::runtime::ScratchArena;
use crate::value::ValueKind;

use scope::{Binding, ScopeStack};

/// Size of one ABI value record in generated stack frames
const VALUE_SIZE: u32 = 24;
/// Offset of the number slot within a value record
const NUMBER_OFFSET: i32 = 8;
/// Offset of the buffer-pointer slot within a value record
const BUFFER_OFFSET: i32 = 16;

/// Literal pools owned by a compiled unit. Generated code embeds
/// addresses into these, so the pool must outlive the machine code and
/// be dropped only after it is freed.
pub(crate) struct LiteralPool {
    strings: Vec<CString>,
    regexes: Vec<Box<Regex>>,
    ips: Vec<Box<IpAddr>>,
    arena: Box<ScratchArena>,
}

impl LiteralPool {
    pub(crate) fn new() -> Self {
        Self {
            strings: Vec::new(),
            regexes: Vec::new(),
            ips: Vec::new(),
            arena: Box::new(ScratchArena::new()),
        }
    }

    /// Address of the concatenation arena, embedded into strcat calls
    pub(crate) fn arena_addr(&self) -> i64 {
        std::ptr::addr_of!(*self.arena) as i64
    }

    fn intern_string(&mut self, text: &str) -> i64 {
        let bytes: Vec<u8> = text.bytes().filter(|b| *b != 0).collect();
        let cstring = CString::new(bytes).unwrap_or_default();
        let ptr = cstring.as_ptr() as i64;
        self.strings.push(cstring);
        ptr
    }

    fn intern_regex(&mut self, pattern: &str) -> Result<i64, String> {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| format!("invalid regex /{pattern}/: {e}"))?;
        let boxed = Box::new(compiled);
        let ptr = std::ptr::addr_of!(*boxed) as i64;
        self.regexes.push(boxed);
        Ok(ptr)
    }

    fn intern_ip(&mut self, addr: IpAddr) -> i64 {
        let boxed = Box::new(addr);
        let ptr = std::ptr::addr_of!(*boxed) as i64;
        self.ips.push(boxed);
        ptr
    }
}

/// The functions produced by one codegen pass
pub(crate) struct CompiledProgram {
    /// The module initializer, run once after materialization
    pub init: FuncId,
    /// Handlers in declaration order
    pub handlers: Vec<(String, FuncId)>,
}

/// A generated value: the Flow kind drives operator dispatch, `len`
/// carries the static element count of array values
#[derive(Clone, Copy)]
struct CgValue {
    kind: ValueKind,
    ir: Value,
    len: Option<u32>,
}

impl CgValue {
    fn new(kind: ValueKind, ir: Value) -> Self {
        Self { kind, ir, len: None }
    }

    fn array(ir: Value, len: Option<u32>) -> Self {
        Self {
            kind: ValueKind::Array,
            ir,
            len,
        }
    }
}

/// One codegen pass over a unit
pub(crate) struct CodeGen<'a> {
    engine: &'a mut JitEngine,
    registry: &'a NativeRegistry,
    pool: &'a mut LiteralPool,
    registry_addr: i64,
    errors: Vec<String>,
    scope: ScopeStack,
    handler_ids: HashMap<String, FuncId>,
}

impl<'a> CodeGen<'a> {
    pub(crate) fn new(
        engine: &'a mut JitEngine,
        registry: &'a NativeRegistry,
        pool: &'a mut LiteralPool,
        registry_addr: i64,
    ) -> Self {
        Self {
            engine,
            registry,
            pool,
            registry_addr,
            errors: Vec::new(),
            scope: ScopeStack::new(),
            handler_ids: HashMap::new(),
        }
    }

    /// Generate the whole unit; on any error the collected messages are
    /// returned and nothing may be finalized
    pub(crate) fn run(mut self, unit: &Unit) -> Result<CompiledProgram, Vec<String>> {
        if self.engine.module.is_none() {
            return Err(vec!["jit engine is not initialized".to_string()]);
        }

        // Declare every handler up front so calls between handlers
        // resolve regardless of declaration order.
        let mut handlers = Vec::with_capacity(unit.handlers.len());
        {
            let module = self.engine.module.as_mut().unwrap_or_else(|| unreachable!());
            for decl in &unit.handlers {
                let mut sig = module.make_signature();
                sig.params.push(AbiParam::new(types::I64));
                sig.returns.push(AbiParam::new(types::I8));
                match module.declare_function(&decl.name.name, Linkage::Local, &sig) {
                    Ok(id) => {
                        self.handler_ids.insert(decl.name.name.clone(), id);
                        handlers.push((decl.name.name.clone(), id));
                    }
                    Err(e) => self
                        .errors
                        .push(format!("cannot declare handler '{}': {e}", decl.name.name)),
                }
            }
        }

        let init = {
            let module = self.engine.module.as_mut().unwrap_or_else(|| unreachable!());
            let sig = module.make_signature();
            match module.declare_function("__flow_init", Linkage::Local, &sig) {
                Ok(id) => id,
                Err(e) => {
                    self.errors.push(format!("cannot declare initializer: {e}"));
                    return Err(self.errors);
                }
            }
        };

        self.emit_initializer(init, &unit.vars);

        for decl in &unit.handlers {
            if let Some(&id) = self.handler_ids.get(&decl.name.name) {
                self.emit_handler(id, decl);
            }
        }

        if self.errors.is_empty() {
            Ok(CompiledProgram { init, handlers })
        } else {
            Err(self.errors)
        }
    }

    /// Emit the module initializer: evaluate every global-scope
    /// initializer and store the value into the global's data object
    fn emit_initializer(&mut self, id: FuncId, vars: &[VarDecl]) {
        let errors_before = self.errors.len();
        let engine = &mut *self.engine;
        let module = engine.module.as_mut().unwrap_or_else(|| unreachable!());

        engine.ctx.func.signature = module.make_signature();
        engine.ctx.func.name = UserFuncName::user(0, id.as_u32());

        {
            let builder = FunctionBuilder::new(&mut engine.ctx.func, &mut engine.builder_ctx);
            let mut emitter = FuncEmitter {
                builder,
                module,
                helpers: &engine.helpers,
                registry: self.registry,
                pool: &mut *self.pool,
                scope: &mut self.scope,
                errors: &mut self.errors,
                handler_ids: &self.handler_ids,
                registry_addr: self.registry_addr,
                udata: None,
                next_var: 0,
            };

            let entry = emitter.builder.create_block();
            emitter.builder.switch_to_block(entry);
            emitter.builder.seal_block(entry);

            for decl in vars {
                emitter.emit_global_decl(decl);
            }

            emitter.builder.ins().return_(&[]);
            emitter.builder.finalize();
        }

        self.define(id, "initializer", errors_before);
    }

    /// Emit one handler body
    fn emit_handler(&mut self, id: FuncId, decl: &HandlerDecl) {
        let errors_before = self.errors.len();
        let engine = &mut *self.engine;
        let module = engine.module.as_mut().unwrap_or_else(|| unreachable!());

        let mut sig = module.make_signature();
        sig.params.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::I8));
        engine.ctx.func.signature = sig;
        engine.ctx.func.name = UserFuncName::user(0, id.as_u32());

        self.scope.enter();
        {
            let builder = FunctionBuilder::new(&mut engine.ctx.func, &mut engine.builder_ctx);
            let mut emitter = FuncEmitter {
                builder,
                module,
                helpers: &engine.helpers,
                registry: self.registry,
                pool: &mut *self.pool,
                scope: &mut self.scope,
                errors: &mut self.errors,
                handler_ids: &self.handler_ids,
                registry_addr: self.registry_addr,
                udata: None,
                next_var: 0,
            };

            let entry = emitter.builder.create_block();
            emitter
                .builder
                .append_block_params_for_function_params(entry);
            emitter.builder.switch_to_block(entry);
            emitter.builder.seal_block(entry);
            emitter.udata = Some(emitter.builder.block_params(entry)[0]);

            let mut terminated = false;
            for stmt in &decl.body {
                if emitter.emit_stmt(stmt) {
                    terminated = true;
                    break;
                }
            }
            if !terminated {
                // catch-all fall-through: the request was not consumed
                let f = emitter.builder.ins().iconst(types::I8, 0);
                emitter.builder.ins().return_(&[f]);
            }
            emitter.builder.finalize();
        }
        self.scope.leave();

        self.define(id, &decl.name.name, errors_before);
    }

    /// Define the just-built function, or discard it when the body
    /// reported errors
    fn define(&mut self, id: FuncId, what: &str, errors_before: usize) {
        let engine = &mut *self.engine;
        let module = engine.module.as_mut().unwrap_or_else(|| unreachable!());
        if self.errors.len() == errors_before {
            if let Err(e) = module.define_function(id, &mut engine.ctx) {
                self.errors.push(format!("cannot define '{what}': {e}"));
            }
        }
        module.clear_context(&mut engine.ctx);
    }
}

/// Per-function emission state
struct FuncEmitter<'a, 'b> {
    builder: FunctionBuilder<'b>,
    module: &'a mut JITModule,
    helpers: &'a HashMap<Helper, FuncId>,
    registry: &'a NativeRegistry,
    pool: &'a mut LiteralPool,
    scope: &'a mut ScopeStack,
    errors: &'a mut Vec<String>,
    handler_ids: &'a HashMap<String, FuncId>,
    registry_addr: i64,
    /// The opaque context parameter; None inside the initializer
    udata: Option<Value>,
    /// Next frontend variable index
    next_var: u32,
}

impl FuncEmitter<'_, '_> {
    // ===== Small helpers =====

    fn error(&mut self, message: impl Into<String>) -> CgValue {
        self.errors.push(message.into());
        let zero = self.builder.ins().iconst(types::I64, 0);
        CgValue::new(ValueKind::Number, zero)
    }

    fn iconst(&mut self, value: i64) -> Value {
        self.builder.ins().iconst(types::I64, value)
    }

    fn bconst(&mut self, value: bool) -> Value {
        self.builder.ins().iconst(types::I8, i64::from(value))
    }

    fn new_var(&mut self, ty: types::Type) -> Variable {
        let var = Variable::from_u32(self.next_var);
        self.next_var += 1;
        self.builder.declare_var(var, ty);
        var
    }

    fn call_helper(&mut self, helper: Helper, args: &[Value]) -> Option<Value> {
        let func_id = self.helpers[&helper];
        let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
        let inst = self.builder.ins().call(func_ref, args);
        self.builder.inst_results(inst).first().copied()
    }

    fn alloc_slot(&mut self, size: u32) -> Value {
        let slot = self
            .builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size, 3));
        self.builder.ins().stack_addr(types::I64, slot, 0)
    }

    /// Allocate a 16-byte buffer record {len, data} on the stack
    fn alloc_buffer(&mut self, len: Value, data: Value) -> Value {
        let addr = self.alloc_slot(16);
        self.builder.ins().store(MemFlags::trusted(), len, addr, 0);
        self.builder.ins().store(MemFlags::trusted(), data, addr, 8);
        addr
    }

    /// Length and data pointer of a string-like value
    fn string_parts(&mut self, v: CgValue) -> (Value, Value) {
        match v.kind {
            ValueKind::Buffer => {
                let len = self
                    .builder
                    .ins()
                    .load(types::I64, MemFlags::trusted(), v.ir, 0);
                let data = self
                    .builder
                    .ins()
                    .load(types::I64, MemFlags::trusted(), v.ir, 8);
                (len, data)
            }
            _ => {
                let len = self
                    .call_helper(Helper::Strlen, &[v.ir])
                    .unwrap_or_else(|| unreachable!());
                (len, v.ir)
            }
        }
    }

    /// Coerce a value to an i8 boolean: non-zero number, non-empty
    /// string, non-empty array
    fn to_bool(&mut self, v: CgValue) -> Value {
        match v.kind {
            ValueKind::Boolean => v.ir,
            ValueKind::Number => self.builder.ins().icmp_imm(IntCC::NotEqual, v.ir, 0),
            ValueKind::String | ValueKind::Buffer => {
                let (len, _) = self.string_parts(v);
                self.builder.ins().icmp_imm(IntCC::NotEqual, len, 0)
            }
            ValueKind::Array => {
                let len = self
                    .call_helper(Helper::Arraylen, &[v.ir])
                    .unwrap_or_else(|| unreachable!());
                self.builder.ins().icmp_imm(IntCC::NotEqual, len, 0)
            }
            other => {
                self.error(format!("cannot use a {other} value as a condition"));
                self.bconst(false)
            }
        }
    }

    // ===== Statements =====

    /// Emit one statement; returns true when the statement terminated
    /// the current block (everything after it is unreachable)
    fn emit_stmt(&mut self, stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Compound(stmts) => {
                self.scope.enter();
                let mut terminated = false;
                for s in stmts {
                    if self.emit_stmt(s) {
                        terminated = true;
                        break;
                    }
                }
                self.scope.leave();
                terminated
            }
            StmtKind::Cond {
                condition,
                then_branch,
                else_branch,
            } => self.emit_cond(condition, then_branch, else_branch.as_deref()),
            StmtKind::Return => {
                // early fall-through: leave without consuming
                let f = self.bconst(false);
                self.builder.ins().return_(&[f]);
                true
            }
            StmtKind::Var(decl) => {
                self.emit_local_decl(decl);
                false
            }
            StmtKind::Expr(expr) => {
                self.emit_expr(expr);
                false
            }
        }
    }

    fn emit_cond(&mut self, condition: &Expr, then: &Stmt, else_: Option<&Stmt>) -> bool {
        let cond = self.emit_expr(condition);
        let cond = self.to_bool(cond);

        let then_block = self.builder.create_block();
        let mut cont: Option<Block> = None;
        let else_block = match else_ {
            Some(_) => Some(self.builder.create_block()),
            None => {
                let block = self.builder.create_block();
                cont = Some(block);
                None
            }
        };
        let false_target = else_block.or(cont).unwrap_or_else(|| unreachable!());
        self.builder
            .ins()
            .brif(cond, then_block, &[], false_target, &[]);

        self.builder.switch_to_block(then_block);
        self.builder.seal_block(then_block);
        if !self.emit_stmt(then) {
            let target = *cont.get_or_insert_with(|| self.builder.create_block());
            self.builder.ins().jump(target, &[]);
        }

        if let (Some(stmt), Some(block)) = (else_, else_block) {
            self.builder.switch_to_block(block);
            self.builder.seal_block(block);
            if !self.emit_stmt(stmt) {
                let target = *cont.get_or_insert_with(|| self.builder.create_block());
                self.builder.ins().jump(target, &[]);
            }
        }

        match cont {
            Some(block) => {
                self.builder.switch_to_block(block);
                self.builder.seal_block(block);
                false
            }
            // both branches returned; the statement terminates
            None => true,
        }
    }

    // ===== Variables =====

    /// Payload stored into an 8-byte variable slot
    fn payload(&mut self, v: CgValue) -> Value {
        match v.kind {
            ValueKind::Boolean => self.builder.ins().uextend(types::I64, v.ir),
            _ => v.ir,
        }
    }

    fn emit_local_decl(&mut self, decl: &VarDecl) {
        let value = self.emit_expr(&decl.value);
        let payload = self.payload(value);
        let slot = self
            .builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, 8, 3));
        self.builder.ins().stack_store(payload, slot, 0);
        self.scope.insert(
            decl.name.name.clone(),
            Binding::Local {
                kind: value.kind,
                slot,
                len: value.len,
            },
        );
    }

    /// Declare, define, and store one global; runs inside the
    /// initializer function. The binding is visible to the remaining
    /// initializers immediately.
    fn emit_global_decl(&mut self, decl: &VarDecl) {
        let value = self.emit_expr(&decl.value);

        let data = match self.module.declare_data(
            &format!("flow_global_{}", decl.name.name),
            Linkage::Local,
            true,
            false,
        ) {
            Ok(id) => id,
            Err(e) => {
                self.error(format!("cannot declare global '{}': {e}", decl.name.name));
                return;
            }
        };
        let mut desc = DataDescription::new();
        desc.define_zeroinit(16);
        if let Err(e) = self.module.define_data(data, &desc) {
            self.error(format!("cannot define global '{}': {e}", decl.name.name));
            return;
        }

        let gv = self.module.declare_data_in_func(data, self.builder.func);
        let addr = self.builder.ins().symbol_value(types::I64, gv);
        match value.kind {
            ValueKind::Buffer => {
                let (len, buf) = self.string_parts(value);
                self.builder.ins().store(MemFlags::trusted(), len, addr, 0);
                self.builder.ins().store(MemFlags::trusted(), buf, addr, 8);
            }
            ValueKind::Boolean | ValueKind::Number | ValueKind::Void => {
                let payload = self.payload(value);
                self.builder
                    .ins()
                    .store(MemFlags::trusted(), payload, addr, 0);
            }
            _ => {
                self.builder
                    .ins()
                    .store(MemFlags::trusted(), value.ir, addr, 8);
            }
        }

        self.scope.insert_global(
            decl.name.name.clone(),
            Binding::Global {
                kind: value.kind,
                data,
                len: value.len,
            },
        );
    }

    fn load_binding(&mut self, binding: Binding) -> CgValue {
        match binding {
            Binding::Local { kind, slot, len } => {
                let raw = self.builder.ins().stack_load(types::I64, slot, 0);
                let ir = match kind {
                    ValueKind::Boolean => self.builder.ins().ireduce(types::I8, raw),
                    _ => raw,
                };
                CgValue { kind, ir, len }
            }
            Binding::Global { kind, data, len } => {
                let gv = self.module.declare_data_in_func(data, self.builder.func);
                let addr = self.builder.ins().symbol_value(types::I64, gv);
                match kind {
                    ValueKind::Buffer => {
                        let blen =
                            self.builder
                                .ins()
                                .load(types::I64, MemFlags::trusted(), addr, 0);
                        let bdata =
                            self.builder
                                .ins()
                                .load(types::I64, MemFlags::trusted(), addr, 8);
                        let record = self.alloc_buffer(blen, bdata);
                        CgValue::new(ValueKind::Buffer, record)
                    }
                    ValueKind::Boolean | ValueKind::Number | ValueKind::Void => {
                        let raw =
                            self.builder
                                .ins()
                                .load(types::I64, MemFlags::trusted(), addr, 0);
                        let ir = match kind {
                            ValueKind::Boolean => self.builder.ins().ireduce(types::I8, raw),
                            _ => raw,
                        };
                        CgValue { kind, ir, len }
                    }
                    _ => {
                        let ir =
                            self.builder
                                .ins()
                                .load(types::I64, MemFlags::trusted(), addr, 8);
                        CgValue { kind, ir, len }
                    }
                }
            }
        }
    }

    // ===== Expressions =====

    fn emit_expr(&mut self, expr: &Expr) -> CgValue {
        match &expr.kind {
            ExprKind::Number(n) => {
                let ir = self.iconst(*n);
                CgValue::new(ValueKind::Number, ir)
            }
            ExprKind::Bool(b) => {
                let ir = self.bconst(*b);
                CgValue::new(ValueKind::Boolean, ir)
            }
            ExprKind::Str(s) => {
                let ptr = self.pool.intern_string(s);
                let ir = self.iconst(ptr);
                CgValue::new(ValueKind::String, ir)
            }
            ExprKind::Regex(pattern) => match self.pool.intern_regex(pattern) {
                Ok(ptr) => {
                    let ir = self.iconst(ptr);
                    CgValue::new(ValueKind::RegExp, ir)
                }
                Err(message) => self.error(message),
            },
            ExprKind::Ip(addr) => {
                let ptr = self.pool.intern_ip(*addr);
                let ir = self.iconst(ptr);
                CgValue::new(ValueKind::Ip, ir)
            }
            ExprKind::List(elements) => self.emit_list(elements),
            ExprKind::Ident(name) => self.emit_ident(name),
            ExprKind::Call { callee, args } => self.emit_call(callee, args),
            ExprKind::Unary { op, operand } => self.emit_unary(*op, operand),
            ExprKind::Binary { op, left, right } => self.emit_binary(*op, left, right),
        }
    }

    /// Expression in argument or list-element position: a bare name of
    /// a Flow handler becomes a function reference instead of a call
    fn emit_arg(&mut self, expr: &Expr) -> CgValue {
        if let ExprKind::Ident(name) = &expr.kind {
            if self.scope.lookup(name).is_none() && self.registry.find(name).is_none() {
                if let Some(&id) = self.handler_ids.get(name) {
                    let func_ref = self.module.declare_func_in_func(id, self.builder.func);
                    let ir = self.builder.ins().func_addr(types::I64, func_ref);
                    return CgValue::new(ValueKind::Handler, ir);
                }
            }
        }
        self.emit_expr(expr)
    }

    fn emit_ident(&mut self, name: &str) -> CgValue {
        if let Some(binding) = self.scope.lookup(name).copied() {
            return self.load_binding(binding);
        }
        if let Some(id) = self.registry.find(name) {
            return self.emit_native_call(id, &[]);
        }
        if self.handler_ids.contains_key(name) {
            return self.emit_handler_call(name, &[]);
        }
        self.error(format!("undefined symbol '{name}'"))
    }

    fn emit_call(&mut self, callee: &str, args: &[Expr]) -> CgValue {
        if self.scope.lookup(callee).is_some() {
            return self.error(format!("'{callee}' is a variable, not a function"));
        }
        if let Some(id) = self.registry.find(callee) {
            return self.emit_native_call(id, args);
        }
        if self.handler_ids.contains_key(callee) {
            return self.emit_handler_call(callee, args);
        }
        self.error(format!("undefined function '{callee}'"))
    }

    /// Direct call to another Flow handler: the context is forwarded
    /// and a true result consumes the request in the caller too
    fn emit_handler_call(&mut self, name: &str, args: &[Expr]) -> CgValue {
        if !args.is_empty() {
            return self.error(format!("handler '{name}' takes no arguments"));
        }
        let Some(udata) = self.udata else {
            return self.error(format!("cannot call handler '{name}' outside a handler"));
        };
        let id = self.handler_ids[name];
        let func_ref = self.module.declare_func_in_func(id, self.builder.func);
        let inst = self.builder.ins().call(func_ref, &[udata]);
        let result = self.builder.inst_results(inst)[0];
        self.emit_consumed_check(result);
        CgValue::new(ValueKind::Boolean, result)
    }

    /// Return true from the enclosing handler when `flag` is set,
    /// otherwise continue in a fresh block
    fn emit_consumed_check(&mut self, flag: Value) {
        if self.udata.is_none() {
            self.error("a handler result cannot be consumed outside a handler");
            return;
        }
        let done = self.builder.create_block();
        let cont = self.builder.create_block();
        self.builder.ins().brif(flag, done, &[], cont, &[]);

        self.builder.switch_to_block(done);
        self.builder.seal_block(done);
        let t = self.bconst(true);
        self.builder.ins().return_(&[t]);

        self.builder.switch_to_block(cont);
        self.builder.seal_block(cont);
    }

    /// Store one value record of an argv block or array
    fn store_value_record(&mut self, base: Value, index: u32, value: Option<CgValue>) {
        let offset = (index * VALUE_SIZE) as i32;
        let kind = match value {
            None => ValueKind::Void,
            Some(v) => {
                match v.kind {
                    ValueKind::Void => {}
                    ValueKind::Boolean => {
                        let n = self.builder.ins().uextend(types::I64, v.ir);
                        self.builder
                            .ins()
                            .store(MemFlags::trusted(), n, base, offset + NUMBER_OFFSET);
                    }
                    ValueKind::Number => {
                        self.builder
                            .ins()
                            .store(MemFlags::trusted(), v.ir, base, offset + NUMBER_OFFSET);
                    }
                    ValueKind::Buffer => {
                        let (len, data) = self.string_parts(v);
                        self.builder
                            .ins()
                            .store(MemFlags::trusted(), len, base, offset + NUMBER_OFFSET);
                        self.builder
                            .ins()
                            .store(MemFlags::trusted(), data, base, offset + BUFFER_OFFSET);
                    }
                    _ => {
                        self.builder
                            .ins()
                            .store(MemFlags::trusted(), v.ir, base, offset + BUFFER_OFFSET);
                    }
                }
                v.kind
            }
        };
        let tag = self.builder.ins().iconst(types::I32, kind as u32 as i64);
        self.builder
            .ins()
            .store(MemFlags::trusted(), tag, base, offset);
    }

    fn emit_list(&mut self, elements: &[Expr]) -> CgValue {
        let n = elements.len() as u32;
        let base = self.alloc_slot((n + 1) * VALUE_SIZE);
        for (i, element) in elements.iter().enumerate() {
            let value = self.emit_arg(element);
            self.store_value_record(base, i as u32, Some(value));
        }
        self.store_value_record(base, n, None);
        CgValue::array(base, Some(n))
    }

    /// The dispatch call-site protocol: stack argv whose first record
    /// is the Void-initialized return slot, marshalled arguments, one
    /// dispatch call, and a kind-directed read of the return slot
    fn emit_native_call(&mut self, id: usize, args: &[Expr]) -> CgValue {
        let entry = self
            .registry
            .entry(id)
            .unwrap_or_else(|| unreachable!("native id from find()"));
        let is_handler = entry.kind().is_handler();
        let return_kind = entry.return_kind();

        let argc = args.len() as u32;
        let base = self.alloc_slot((argc + 1) * VALUE_SIZE);
        self.store_value_record(base, 0, None);
        for (i, arg) in args.iter().enumerate() {
            let value = self.emit_arg(arg);
            self.store_value_record(base, i as u32 + 1, Some(value));
        }

        let self_arg = self.iconst(self.registry_addr);
        let id_arg = self.builder.ins().iconst(types::I32, id as i64);
        let udata = self.udata.unwrap_or_else(|| {
            self.builder.ins().iconst(types::I64, 0)
        });
        let argc_arg = self.builder.ins().iconst(types::I32, i64::from(argc));
        self.call_helper(Helper::Dispatch, &[self_arg, id_arg, udata, argc_arg, base]);

        if is_handler {
            let n = self
                .builder
                .ins()
                .load(types::I64, MemFlags::trusted(), base, NUMBER_OFFSET);
            let flag = self.builder.ins().icmp_imm(IntCC::NotEqual, n, 0);
            self.emit_consumed_check(flag);
            return CgValue::new(ValueKind::Boolean, flag);
        }

        match return_kind {
            ValueKind::Void => {
                let zero = self.iconst(0);
                CgValue::new(ValueKind::Void, zero)
            }
            ValueKind::Boolean => {
                let n = self
                    .builder
                    .ins()
                    .load(types::I64, MemFlags::trusted(), base, NUMBER_OFFSET);
                let b = self.builder.ins().icmp_imm(IntCC::NotEqual, n, 0);
                CgValue::new(ValueKind::Boolean, b)
            }
            ValueKind::Number => {
                let n = self
                    .builder
                    .ins()
                    .load(types::I64, MemFlags::trusted(), base, NUMBER_OFFSET);
                CgValue::new(ValueKind::Number, n)
            }
            ValueKind::Buffer => {
                let len = self
                    .builder
                    .ins()
                    .load(types::I64, MemFlags::trusted(), base, NUMBER_OFFSET);
                let data = self
                    .builder
                    .ins()
                    .load(types::I64, MemFlags::trusted(), base, BUFFER_OFFSET);
                let record = self.alloc_buffer(len, data);
                CgValue::new(ValueKind::Buffer, record)
            }
            other => {
                let ptr = self
                    .builder
                    .ins()
                    .load(types::I64, MemFlags::trusted(), base, BUFFER_OFFSET);
                CgValue::new(other, ptr)
            }
        }
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &Expr) -> CgValue {
        let value = self.emit_expr(operand);
        match op {
            UnaryOp::Not => match value.kind {
                ValueKind::Boolean | ValueKind::Number => {
                    let b = self.builder.ins().icmp_imm(IntCC::Equal, value.ir, 0);
                    CgValue::new(ValueKind::Boolean, b)
                }
                ValueKind::String | ValueKind::Buffer => {
                    let (len, _) = self.string_parts(value);
                    let b = self.builder.ins().icmp_imm(IntCC::Equal, len, 0);
                    CgValue::new(ValueKind::Boolean, b)
                }
                ValueKind::Array => {
                    let len = self
                        .call_helper(Helper::Arraylen, &[value.ir])
                        .unwrap_or_else(|| unreachable!());
                    let b = self.builder.ins().icmp_imm(IntCC::Equal, len, 0);
                    CgValue::new(ValueKind::Boolean, b)
                }
                other => self.error(format!("operator '!' cannot apply to a {other} value")),
            },
            UnaryOp::Neg => match value.kind {
                ValueKind::Number => {
                    let ir = self.builder.ins().ineg(value.ir);
                    CgValue::new(ValueKind::Number, ir)
                }
                other => self.error(format!("operator '-' cannot apply to a {other} value")),
            },
            UnaryOp::Plus => value,
        }
    }

    fn emit_binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> CgValue {
        match op {
            BinOp::Assign => return self.emit_assign(left, right),
            BinOp::Or => return self.emit_or(left, right),
            BinOp::And | BinOp::Xor => {
                let l = self.emit_expr(left);
                let l = self.to_bool(l);
                let r = self.emit_expr(right);
                let r = self.to_bool(r);
                let ir = if op == BinOp::And {
                    self.builder.ins().band(l, r)
                } else {
                    self.builder.ins().bxor(l, r)
                };
                return CgValue::new(ValueKind::Boolean, ir);
            }
            _ => {}
        }

        let l = self.emit_expr(left);
        let r = self.emit_expr(right);
        match op {
            BinOp::Add => self.emit_add(l, r),
            BinOp::Sub => self.emit_sub(l, r),
            BinOp::Mul => match (l.kind, r.kind) {
                (ValueKind::Number, ValueKind::Number) => {
                    let ir = self.builder.ins().imul(l.ir, r.ir);
                    CgValue::new(ValueKind::Number, ir)
                }
                _ => self.type_error(op, l, r),
            },
            BinOp::Div => match (l.kind, r.kind) {
                (ValueKind::Number, ValueKind::Number) => {
                    let ir = self.builder.ins().sdiv(l.ir, r.ir);
                    CgValue::new(ValueKind::Number, ir)
                }
                _ => self.type_error(op, l, r),
            },
            BinOp::Pow => match (l.kind, r.kind) {
                (ValueKind::Number, ValueKind::Number) => {
                    let lf = self.builder.ins().fcvt_from_sint(types::F64, l.ir);
                    let rf = self.builder.ins().fcvt_from_sint(types::F64, r.ir);
                    let p = self
                        .call_helper(Helper::Pow, &[lf, rf])
                        .unwrap_or_else(|| unreachable!());
                    let ir = self.builder.ins().fcvt_to_sint(types::I64, p);
                    CgValue::new(ValueKind::Number, ir)
                }
                _ => self.type_error(op, l, r),
            },
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                self.emit_comparison(op, l, r)
            }
            BinOp::PrefixMatch => match (l.kind.is_string(), r.kind.is_string()) {
                (true, true) => {
                    let ir = self.emit_affix_match(l, r, false);
                    CgValue::new(ValueKind::Boolean, ir)
                }
                _ => self.type_error(op, l, r),
            },
            BinOp::SuffixMatch => match (l.kind.is_string(), r.kind.is_string()) {
                (true, true) => {
                    let ir = self.emit_affix_match(l, r, true);
                    CgValue::new(ValueKind::Boolean, ir)
                }
                _ => self.type_error(op, l, r),
            },
            BinOp::RegexMatch => self.emit_regex_match(l, r),
            BinOp::In => self.emit_in(l, r),
            BinOp::Assign | BinOp::Or | BinOp::And | BinOp::Xor => unreachable!(),
        }
    }

    /// Short-circuit `||` with a block-parameter join
    fn emit_or(&mut self, left: &Expr, right: &Expr) -> CgValue {
        let l = self.emit_expr(left);
        let lb = self.to_bool(l);

        let rhs_block = self.builder.create_block();
        let cont = self.builder.create_block();
        self.builder.append_block_param(cont, types::I8);
        self.builder.ins().brif(lb, cont, &[lb], rhs_block, &[]);

        self.builder.switch_to_block(rhs_block);
        self.builder.seal_block(rhs_block);
        let r = self.emit_expr(right);
        let rb = self.to_bool(r);
        self.builder.ins().jump(cont, &[rb]);

        self.builder.switch_to_block(cont);
        self.builder.seal_block(cont);
        let merged = self.builder.block_params(cont)[0];
        CgValue::new(ValueKind::Boolean, merged)
    }

    fn emit_add(&mut self, l: CgValue, r: CgValue) -> CgValue {
        match (l.kind, r.kind) {
            (ValueKind::Number, ValueKind::Number) => {
                let ir = self.builder.ins().iadd(l.ir, r.ir);
                CgValue::new(ValueKind::Number, ir)
            }
            // advance into the string: "foobar" + 3 == "bar"
            (ValueKind::String, ValueKind::Number) => {
                let ir = self.builder.ins().iadd(l.ir, r.ir);
                CgValue::new(ValueKind::String, ir)
            }
            // window into the buffer, dropping the first n bytes
            (ValueKind::Buffer, ValueKind::Number) => {
                let (len, data) = self.string_parts(l);
                let new_len = self.builder.ins().isub(len, r.ir);
                let new_data = self.builder.ins().iadd(data, r.ir);
                let record = self.alloc_buffer(new_len, new_data);
                CgValue::new(ValueKind::Buffer, record)
            }
            (ValueKind::Array, ValueKind::Array) => match (l.len, r.len) {
                (Some(nl), Some(nr)) => {
                    let n = nl + nr;
                    let base = self.alloc_slot((n + 1) * VALUE_SIZE);
                    self.call_helper(Helper::Arrayadd, &[base, l.ir, r.ir]);
                    CgValue::array(base, Some(n))
                }
                _ => self.error("cannot concatenate arrays of unknown length"),
            },
            _ if l.kind.is_string() && r.kind.is_string() => {
                let arena = self.pool.arena_addr();
                let arena = self.iconst(arena);
                let (ll, lb) = self.string_parts(l);
                let (rl, rb) = self.string_parts(r);
                let ir = self
                    .call_helper(Helper::Strcat, &[arena, ll, lb, rl, rb])
                    .unwrap_or_else(|| unreachable!());
                CgValue::new(ValueKind::String, ir)
            }
            _ => self.type_error(BinOp::Add, l, r),
        }
    }

    fn emit_sub(&mut self, l: CgValue, r: CgValue) -> CgValue {
        match (l.kind, r.kind) {
            (ValueKind::Number, ValueKind::Number) => {
                let ir = self.builder.ins().isub(l.ir, r.ir);
                CgValue::new(ValueKind::Number, ir)
            }
            // the right-suffix window: keep the last n bytes
            (ValueKind::Buffer, ValueKind::Number) => {
                let (len, data) = self.string_parts(l);
                let offset = self.builder.ins().isub(len, r.ir);
                let new_data = self.builder.ins().iadd(data, offset);
                let record = self.alloc_buffer(r.ir, new_data);
                CgValue::new(ValueKind::Buffer, record)
            }
            (ValueKind::String, ValueKind::Number) => {
                let (len, data) = self.string_parts(l);
                let offset = self.builder.ins().isub(len, r.ir);
                let ir = self.builder.ins().iadd(data, offset);
                CgValue::new(ValueKind::String, ir)
            }
            _ => self.type_error(BinOp::Sub, l, r),
        }
    }

    fn emit_comparison(&mut self, op: BinOp, l: CgValue, r: CgValue) -> CgValue {
        let cc = match op {
            BinOp::Eq => IntCC::Equal,
            BinOp::Ne => IntCC::NotEqual,
            BinOp::Lt => IntCC::SignedLessThan,
            BinOp::Gt => IntCC::SignedGreaterThan,
            BinOp::Le => IntCC::SignedLessThanOrEqual,
            _ => IntCC::SignedGreaterThanOrEqual,
        };
        let equality = matches!(op, BinOp::Eq | BinOp::Ne);

        match (l.kind, r.kind) {
            (ValueKind::Number, ValueKind::Number) => {
                let b = self.builder.ins().icmp(cc, l.ir, r.ir);
                CgValue::new(ValueKind::Boolean, b)
            }
            (ValueKind::Boolean, ValueKind::Boolean) if equality => {
                let b = self.builder.ins().icmp(cc, l.ir, r.ir);
                CgValue::new(ValueKind::Boolean, b)
            }
            _ if l.kind.is_string() && r.kind.is_string() => {
                let (l1, b1) = self.string_parts(l);
                let (l2, b2) = self.string_parts(r);
                let d = self.emit_cmp_string(l1, b1, l2, b2);
                let b = self.builder.ins().icmp_imm(cc, d, 0);
                CgValue::new(ValueKind::Boolean, b)
            }
            // a string against a number compares the length
            _ if l.kind.is_string() && r.kind == ValueKind::Number => {
                let (len, _) = self.string_parts(l);
                let b = self.builder.ins().icmp(cc, len, r.ir);
                CgValue::new(ValueKind::Boolean, b)
            }
            (ValueKind::Array, ValueKind::Array) if equality => {
                let rv = self
                    .call_helper(Helper::Arraycmp, &[l.ir, r.ir])
                    .unwrap_or_else(|| unreachable!());
                let b = self.builder.ins().icmp_imm(cc, rv, 0);
                CgValue::new(ValueKind::Boolean, b)
            }
            (ValueKind::Ip, ValueKind::Ip) if equality => {
                let rv = self
                    .call_helper(Helper::Ipcmp, &[l.ir, r.ir])
                    .unwrap_or_else(|| unreachable!());
                let b = self.builder.ins().icmp_imm(cc, rv, 0);
                CgValue::new(ValueKind::Boolean, b)
            }
            (ValueKind::Ip, ValueKind::String) if equality => {
                let rv = self
                    .call_helper(Helper::Ipstrcmp, &[l.ir, r.ir])
                    .unwrap_or_else(|| unreachable!());
                let b = self.builder.ins().icmp_imm(cc, rv, 0);
                CgValue::new(ValueKind::Boolean, b)
            }
            _ => self.type_error(op, l, r),
        }
    }

    fn emit_regex_match(&mut self, l: CgValue, r: CgValue) -> CgValue {
        if !l.kind.is_string() {
            return self.type_error(BinOp::RegexMatch, l, r);
        }
        let (len, buf) = self.string_parts(l);
        let rv = match r.kind {
            ValueKind::RegExp => self
                .call_helper(Helper::Regexmatch2, &[len, buf, r.ir])
                .unwrap_or_else(|| unreachable!()),
            _ if r.kind.is_string() => {
                let (plen, pbuf) = self.string_parts(r);
                self.call_helper(Helper::Regexmatch, &[len, buf, plen, pbuf])
                    .unwrap_or_else(|| unreachable!())
            }
            _ => return self.type_error(BinOp::RegexMatch, l, r),
        };
        let b = self.builder.ins().icmp_imm(IntCC::NotEqual, rv, 0);
        CgValue::new(ValueKind::Boolean, b)
    }

    fn emit_in(&mut self, l: CgValue, r: CgValue) -> CgValue {
        let rv = match (l.kind, r.kind) {
            // substring: needle on the left, haystack on the right
            _ if l.kind.is_string() && r.kind.is_string() => {
                let (nlen, nbuf) = self.string_parts(l);
                let (hlen, hbuf) = self.string_parts(r);
                self.call_helper(Helper::Strcasestr, &[hlen, hbuf, nlen, nbuf])
                    .unwrap_or_else(|| unreachable!())
            }
            (ValueKind::Number, ValueKind::Array) => self
                .call_helper(Helper::NumberInArray, &[l.ir, r.ir])
                .unwrap_or_else(|| unreachable!()),
            _ if l.kind.is_string() && r.kind == ValueKind::Array => {
                let (len, buf) = self.string_parts(l);
                self.call_helper(Helper::StringInArray, &[len, buf, r.ir])
                    .unwrap_or_else(|| unreachable!())
            }
            _ => return self.type_error(BinOp::In, l, r),
        };
        let b = self.builder.ins().icmp_imm(IntCC::NotEqual, rv, 0);
        CgValue::new(ValueKind::Boolean, b)
    }

    fn emit_assign(&mut self, left: &Expr, right: &Expr) -> CgValue {
        let ExprKind::Ident(name) = &left.kind else {
            return self.error("left side of '=' must be a variable");
        };
        let name = name.clone();

        if let Some(binding) = self.scope.lookup(&name).copied() {
            let value = self.emit_expr(right);
            match binding {
                Binding::Local { kind, slot, .. } => {
                    let payload = self.payload(value);
                    self.builder.ins().stack_store(payload, slot, 0);
                    if kind == ValueKind::Array && value.kind == ValueKind::Array {
                        if let Some(Binding::Local { len, .. }) = self.scope.lookup_mut(&name) {
                            *len = value.len;
                        }
                    }
                }
                Binding::Global { kind, data, .. } => {
                    let gv = self.module.declare_data_in_func(data, self.builder.func);
                    let addr = self.builder.ins().symbol_value(types::I64, gv);
                    match kind {
                        ValueKind::Buffer if value.kind.is_string() => {
                            let (len, buf) = self.string_parts(value);
                            self.builder.ins().store(MemFlags::trusted(), len, addr, 0);
                            self.builder.ins().store(MemFlags::trusted(), buf, addr, 8);
                        }
                        ValueKind::Boolean | ValueKind::Number | ValueKind::Void => {
                            let payload = self.payload(value);
                            self.builder
                                .ins()
                                .store(MemFlags::trusted(), payload, addr, 0);
                        }
                        _ => {
                            self.builder
                                .ins()
                                .store(MemFlags::trusted(), value.ir, addr, 8);
                        }
                    }
                }
            }
            return value;
        }

        if let Some(id) = self.registry.find(&name) {
            let entry = self
                .registry
                .entry(id)
                .unwrap_or_else(|| unreachable!("native id from find()"));
            if !entry.kind().is_variable() {
                return self.error(format!(
                    "trying to assign a value to non-variable '{name}'"
                ));
            }
            return self.emit_native_call(id, std::slice::from_ref(right));
        }

        self.error(format!("assignment to undefined variable '{name}'"))
    }

    fn type_error(&mut self, op: BinOp, l: CgValue, r: CgValue) -> CgValue {
        self.error(format!(
            "operand types ({}, {}) not compatible with operator '{op}'",
            l.kind, r.kind
        ))
    }

    // ===== Inline string machinery =====

    /// ASCII tolower on an i32 character without branching
    fn to_lower(&mut self, ch: Value) -> Value {
        let off = self.builder.ins().iadd_imm(ch, -65);
        let lower = self.builder.ins().iadd_imm(ch, 32);
        let is_upper = self
            .builder
            .ins()
            .icmp_imm(IntCC::UnsignedLessThan, off, 26);
        self.builder.ins().select(is_upper, lower, ch)
    }

    /// The canonical case-insensitive comparator: a four-block loop
    /// yielding `len1 - len2` when either string runs out, otherwise
    /// the sign of the first differing byte pair
    fn emit_cmp_string(&mut self, len1: Value, buf1: Value, len2: Value, buf2: Value) -> Value {
        let vlen1 = self.new_var(types::I64);
        let vlen2 = self.new_var(types::I64);
        let vbuf1 = self.new_var(types::I64);
        let vbuf2 = self.new_var(types::I64);
        let vd = self.new_var(types::I64);

        self.builder.def_var(vlen1, len1);
        self.builder.def_var(vlen2, len2);
        self.builder.def_var(vbuf1, buf1);
        self.builder.def_var(vbuf2, buf2);
        let zero = self.iconst(0);
        self.builder.def_var(vd, zero);

        let cmp_len = self.builder.create_block();
        let cmp_byte = self.builder.create_block();
        let advance = self.builder.create_block();
        let done = self.builder.create_block();

        self.builder.ins().jump(cmp_len, &[]);

        // d = len1 - len2; stop when either length reaches zero
        self.builder.switch_to_block(cmp_len);
        let l1 = self.builder.use_var(vlen1);
        let l2 = self.builder.use_var(vlen2);
        let d1 = self.builder.ins().isub(l1, l2);
        self.builder.def_var(vd, d1);
        let both = self.builder.ins().band(l1, l2);
        let exhausted = self.builder.ins().icmp_imm(IntCC::Equal, both, 0);
        self.builder.ins().brif(exhausted, done, &[], cmp_byte, &[]);

        // d = tolower(*buf1) - tolower(*buf2); stop on difference
        self.builder.switch_to_block(cmp_byte);
        self.builder.seal_block(cmp_byte);
        let p1 = self.builder.use_var(vbuf1);
        let p2 = self.builder.use_var(vbuf2);
        let c1 = self.builder.ins().load(types::I8, MemFlags::trusted(), p1, 0);
        let c2 = self.builder.ins().load(types::I8, MemFlags::trusted(), p2, 0);
        let c1 = self.builder.ins().uextend(types::I32, c1);
        let c2 = self.builder.ins().uextend(types::I32, c2);
        let lc1 = self.to_lower(c1);
        let lc2 = self.to_lower(c2);
        let diff = self.builder.ins().isub(lc1, lc2);
        let d2 = self.builder.ins().sextend(types::I64, diff);
        self.builder.def_var(vd, d2);
        let unequal = self.builder.ins().icmp_imm(IntCC::NotEqual, diff, 0);
        self.builder.ins().brif(unequal, done, &[], advance, &[]);

        // advance both cursors, decrement both lengths
        self.builder.switch_to_block(advance);
        self.builder.seal_block(advance);
        let l1 = self.builder.use_var(vlen1);
        let l1 = self.builder.ins().iadd_imm(l1, -1);
        self.builder.def_var(vlen1, l1);
        let l2 = self.builder.use_var(vlen2);
        let l2 = self.builder.ins().iadd_imm(l2, -1);
        self.builder.def_var(vlen2, l2);
        let p1 = self.builder.use_var(vbuf1);
        let p1 = self.builder.ins().iadd_imm(p1, 1);
        self.builder.def_var(vbuf1, p1);
        let p2 = self.builder.use_var(vbuf2);
        let p2 = self.builder.ins().iadd_imm(p2, 1);
        self.builder.def_var(vbuf2, p2);
        self.builder.ins().jump(cmp_len, &[]);
        self.builder.seal_block(cmp_len);

        self.builder.switch_to_block(done);
        self.builder.seal_block(done);
        self.builder.use_var(vd)
    }

    /// Prefix (`=^`) and suffix (`=$`) matching: a length guard, then
    /// the inline comparator over the aligned window
    fn emit_affix_match(&mut self, l: CgValue, r: CgValue, suffix: bool) -> Value {
        let (l1, b1) = self.string_parts(l);
        let (l2, b2) = self.string_parts(r);

        let result = self.new_var(types::I8);
        let f = self.bconst(false);
        self.builder.def_var(result, f);

        let compare = self.builder.create_block();
        let matched = self.builder.create_block();
        let done = self.builder.create_block();

        // the pattern may not be longer than the subject
        let too_long = self
            .builder
            .ins()
            .icmp(IntCC::UnsignedGreaterThan, l2, l1);
        self.builder.ins().brif(too_long, done, &[], compare, &[]);

        self.builder.switch_to_block(compare);
        self.builder.seal_block(compare);
        let window = if suffix {
            let offset = self.builder.ins().isub(l1, l2);
            self.builder.ins().iadd(b1, offset)
        } else {
            b1
        };
        let d = self.emit_cmp_string(l2, window, l2, b2);
        let unequal = self.builder.ins().icmp_imm(IntCC::NotEqual, d, 0);
        self.builder.ins().brif(unequal, done, &[], matched, &[]);

        self.builder.switch_to_block(matched);
        self.builder.seal_block(matched);
        let t = self.bconst(true);
        self.builder.def_var(result, t);
        self.builder.ins().jump(done, &[]);

        self.builder.switch_to_block(done);
        self.builder.seal_block(done);
        self.builder.use_var(result)
    }
}
