//! Method dispatch, blocks and procs

use super::{Flow, Scope};
use crate::parser::{BlockNode, CallNode, MethodDef, Params, Program, Symbol};
use crate::vm::object::{Method, ObjectData, ProcBody, ProcData};
use crate::vm::state::{CallInfo, Vm};
use crate::vm::unwind::{catch_exit, ExitKind};
use crate::vm::value::{ObjRef, Value, ValueType};
use std::rc::Rc;
use tracing::trace;

impl Vm {
    pub(crate) fn eval_call(&self, call: &CallNode, scope: &Scope) -> super::EvalResult {
        if call.recv.is_none() && call.args.is_empty() && call.method == self.syms.block_given {
            return Ok(Value::bool(!scope.block.is_nil()));
        }

        let recv = match &call.recv {
            Some(node) => self.eval(node, scope)?,
            None => scope.self_value,
        };
        let args = self.eval_args(&call.args, scope)?;
        let block = match (&call.block, &call.block_arg) {
            (Some(block), _) => self.proc_new(block, scope),
            (None, Some(node)) => {
                let value = self.eval(node, scope)?;
                self.to_block(value)
            }
            (None, None) => Value::NIL,
        };

        let dispatch = || self.dispatch(recv, call.method, &args, block, call.vcall);
        if call.block.is_some() {
            // `break` inside the literal block ends this call
            Ok(catch_exit(
                self,
                ExitKind::Break,
                block.payload(),
                dispatch,
                |value| value,
            ))
        } else {
            Ok(dispatch())
        }
    }

    fn to_block(&self, value: Value) -> Value {
        match value.type_tag() {
            ValueType::Nil | ValueType::Proc => value,
            _ => {
                let message = format!(
                    "wrong argument type {} (expected Proc)",
                    self.obj_classname(value)
                );
                self.raise_error(self.core.get().type_error, &message)
            }
        }
    }

    /// Call a method by name. Raises (jumps) on failure.
    pub fn funcall(&self, recv: Value, name: &str, args: &[Value]) -> Value {
        let mid = self.intern(name);
        self.funcall_id(recv, mid, args, Value::NIL)
    }

    /// Call a method by name, passing a block
    pub fn funcall_with_block(&self, recv: Value, name: &str, args: &[Value], block: Value) -> Value {
        let mid = self.intern(name);
        self.funcall_id(recv, mid, args, block)
    }

    /// Call a method by symbol
    pub fn funcall_id(&self, recv: Value, mid: Symbol, args: &[Value], block: Value) -> Value {
        self.dispatch(recv, mid, args, block, false)
    }

    pub(crate) fn dispatch(
        &self,
        recv: Value,
        mid: Symbol,
        args: &[Value],
        block: Value,
        vcall: bool,
    ) -> Value {
        match self.find_method(self.class_of(recv), mid) {
            Some((method, owner)) => self.invoke(recv, mid, method, owner, args, block),
            None => self.method_missing(recv, mid, vcall),
        }
    }

    fn method_missing(&self, recv: Value, mid: Symbol, vcall: bool) -> ! {
        let core = self.core.get();
        let name = self.sym_name(mid);
        let target = self.describe_receiver(recv);
        if vcall {
            let message = format!("undefined local variable or method '{}' for {}", name, target);
            self.raise_error(core.name_error, &message)
        }
        let message = format!("undefined method '{}' for {}", name, target);
        self.raise_error(core.no_method_error, &message)
    }

    fn describe_receiver(&self, recv: Value) -> String {
        match recv.type_tag() {
            ValueType::Nil => "nil".to_string(),
            ValueType::True => "true".to_string(),
            ValueType::False => "false".to_string(),
            ValueType::Class | ValueType::Module => self.class_name(recv.as_pointer()),
            _ if recv == self.top_self.get() => "main".to_string(),
            _ => format!("an instance of {}", self.obj_classname(recv)),
        }
    }

    pub(crate) fn arity_error(&self, given: usize, expected: &str) -> ! {
        let message = format!(
            "wrong number of arguments (given {}, expected {})",
            given, expected
        );
        self.raise_error(self.core.get().argument_error, &message)
    }

    fn check_arity(&self, params: &Params, given: usize) {
        let (min, max) = params.arity();
        if given < min || max.is_some_and(|max| given > max) {
            let expected = match max {
                None => format!("{}+", min),
                Some(max) if max > min => format!("{}..{}", min, max),
                Some(_) => min.to_string(),
            };
            self.arity_error(given, &expected);
        }
    }

    fn check_depth(&self) -> usize {
        let depth = self.frames.borrow().len();
        if depth >= self.options().max_call_depth {
            trace!(depth, "call depth exceeded");
            self.raise_error(self.core.get().system_stack_error, "stack level too deep");
        }
        depth
    }

    fn invoke(
        &self,
        recv: Value,
        mid: Symbol,
        method: Method,
        owner: ObjRef,
        args: &[Value],
        block: Value,
    ) -> Value {
        let depth = self.check_depth();
        match method {
            Method::Native { func, aspec } => {
                if !aspec.accepts(args.len()) {
                    self.arity_error(args.len(), &aspec.expected());
                }
                let id = self.next_id();
                self.push_frame(CallInfo {
                    mid: Some(mid),
                    recv,
                    target_class: owner,
                    block,
                    args: args.to_vec(),
                    env: None,
                    id,
                });
                let ai = self.arena_save();
                let result = func(self, recv);
                self.arena_restore(ai);
                self.gc_protect(result);
                self.pop_frame(depth);
                result
            }
            Method::Script { def, cref } => {
                self.invoke_script(recv, mid, &def, cref, owner, args, block, depth)
            }
            Method::AttrReader(ivar) => {
                if !args.is_empty() {
                    self.arity_error(args.len(), "0");
                }
                self.iv_get(recv, ivar)
            }
            Method::AttrWriter(ivar) => {
                let [value] = args else {
                    self.arity_error(args.len(), "1")
                };
                self.iv_set(recv, ivar, *value);
                *value
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn invoke_script(
        &self,
        recv: Value,
        mid: Symbol,
        def: &Rc<MethodDef>,
        cref: ObjRef,
        owner: ObjRef,
        args: &[Value],
        block: Value,
        depth: usize,
    ) -> Value {
        self.check_arity(&def.params, args.len());

        let env = self.env_new(None);
        let id = self.next_id();
        self.push_frame(CallInfo {
            mid: Some(mid),
            recv,
            target_class: owner,
            block,
            args: args.to_vec(),
            env: Some(env),
            id,
        });
        let scope = Scope {
            self_value: recv,
            env,
            block,
            cref,
            target_class: owner,
            mid: Some(mid),
            home: id,
        };

        let result = catch_exit(
            self,
            ExitKind::Return,
            id,
            || {
                let body = self
                    .bind_params(&def.params, args, block, &scope)
                    .and_then(|_| self.eval_body(&def.body, &scope));
                match body {
                    Ok(value) => value,
                    Err(Flow::Return(value) | Flow::Break(value) | Flow::Next(value)) => value,
                }
            },
            |value| value,
        );
        self.pop_frame(depth);
        result
    }

    /// Bind positional arguments to parameters. Missing arguments become
    /// nil and extra ones are dropped; callers that need strict arity
    /// check it first.
    fn bind_params(
        &self,
        params: &Params,
        args: &[Value],
        block: Value,
        scope: &Scope,
    ) -> Result<(), Flow> {
        let mut rest = args.iter().copied();
        for name in &params.required {
            self.env_define(scope.env, *name, rest.next().unwrap_or(Value::NIL));
        }
        for (name, default) in &params.optional {
            let value = match rest.next() {
                Some(value) => value,
                None => self.eval(default, scope)?,
            };
            self.env_define(scope.env, *name, value);
        }
        if let Some(name) = params.rest {
            let items = self.ary_new(rest.collect());
            self.env_define(scope.env, name, items);
        }
        if let Some(name) = params.block {
            self.env_define(scope.env, name, block);
        }
        Ok(())
    }

    // ========================================================================
    // Procs
    // ========================================================================

    pub(crate) fn proc_new(&self, block: &Rc<BlockNode>, scope: &Scope) -> Value {
        self.alloc(
            ValueType::Proc,
            self.core.get().proc_class,
            ObjectData::Proc(ProcData {
                body: ProcBody::Block(Rc::clone(block)),
                env: Some(scope.env),
                self_value: scope.self_value,
                block: scope.block,
                target_class: scope.target_class,
                cref: scope.cref,
                mid: scope.mid,
                home: scope.home,
                lambda: false,
            }),
        )
    }

    pub(crate) fn proc_data(&self, proc: Value) -> Option<ProcData> {
        if proc.type_tag() != ValueType::Proc {
            return None;
        }
        self.with_object(proc.as_pointer(), |o| match &o.data {
            ObjectData::Proc(data) => Some(data.clone()),
            _ => None,
        })
        .flatten()
    }

    pub(crate) fn proc_modify(&self, proc: Value, f: impl FnOnce(&mut ProcData)) {
        self.with_object_mut(proc.as_pointer(), |o| {
            if let ObjectData::Proc(data) = &mut o.data {
                f(data);
            }
        });
    }

    /// Make `def` inside the proc define methods on `class`
    pub fn proc_set_target_class(&self, proc: Value, class: ObjRef) {
        self.proc_modify(proc, |data| data.target_class = class);
    }

    /// Call a block or proc with `args`
    pub fn yield_argv(&self, block: Value, args: &[Value]) -> Value {
        if block.is_nil() {
            self.raise_error(self.core.get().local_jump_error, "no block given (yield)");
        }
        self.call_proc(block, args, None)
    }

    /// Call a block or proc with `args` and `self` replaced
    pub fn yield_with_self(&self, block: Value, self_value: Value, args: &[Value]) -> Value {
        self.call_proc(block, args, Some(self_value))
    }

    pub(crate) fn call_proc(&self, proc: Value, args: &[Value], self_value: Option<Value>) -> Value {
        let Some(data) = self.proc_data(proc) else {
            let message = format!(
                "wrong argument type {} (expected Proc)",
                self.obj_classname(proc)
            );
            self.raise_error(self.core.get().type_error, &message)
        };
        self.check_depth();

        match &data.body {
            ProcBody::Block(node) => self.call_block(proc, &data, node, args, self_value),
            ProcBody::Program(program) => {
                self.run_program(program, &data, self_value.unwrap_or(data.self_value))
            }
        }
    }

    fn call_block(
        &self,
        proc: Value,
        data: &ProcData,
        node: &BlockNode,
        args: &[Value],
        self_value: Option<Value>,
    ) -> Value {
        let core = self.core.get();
        let args = if data.lambda {
            self.check_arity(&node.params, args.len());
            args.to_vec()
        } else {
            self.block_args(&node.params, args)
        };

        let env = self.env_new(data.env);
        let scope = Scope {
            self_value: self_value.unwrap_or(data.self_value),
            env,
            block: data.block,
            cref: data.cref,
            target_class: data.target_class,
            mid: data.mid,
            home: data.home,
        };

        let result = self
            .bind_params(&node.params, &args, Value::NIL, &scope)
            .and_then(|_| self.eval_body(&node.body, &scope));

        match result {
            Ok(value) | Err(Flow::Next(value)) => value,
            Err(Flow::Return(value) | Flow::Break(value)) if data.lambda => value,
            Err(Flow::Return(value)) => {
                if self.exit_live(ExitKind::Return, data.home) {
                    self.gc_protect(value);
                    self.non_local_exit(ExitKind::Return, data.home, value)
                }
                self.raise_error(core.local_jump_error, "unexpected return")
            }
            Err(Flow::Break(value)) => {
                let tag = proc.payload();
                if self.exit_live(ExitKind::Break, tag) {
                    self.gc_protect(value);
                    self.non_local_exit(ExitKind::Break, tag, value)
                }
                self.raise_error(core.local_jump_error, "break from proc-closure")
            }
        }
    }

    /// A single array passed to a block with several parameters is spread
    /// over them
    fn block_args(&self, params: &Params, args: &[Value]) -> Vec<Value> {
        let positional = params.required.len() + params.optional.len();
        if let [single] = args {
            if positional > 1 || (positional > 0 && params.rest.is_some()) {
                if let Some(items) = self.ary_items(*single) {
                    return items;
                }
            }
        }
        args.to_vec()
    }

    /// Run a top-level program in its own frame. `return` at the top level
    /// ends the program.
    pub(crate) fn run_program(&self, program: &Program, data: &ProcData, self_value: Value) -> Value {
        let env = data.env.unwrap_or_else(|| self.env_new(None));
        let id = self.next_id();
        let depth = self.push_frame(CallInfo {
            mid: None,
            recv: self_value,
            target_class: data.target_class,
            block: Value::NIL,
            args: Vec::new(),
            env: Some(env),
            id,
        });
        let scope = Scope {
            self_value,
            env,
            block: Value::NIL,
            cref: data.cref,
            target_class: data.target_class,
            mid: None,
            home: id,
        };

        let result = catch_exit(
            self,
            ExitKind::Return,
            id,
            || match self.eval_body(&program.body, &scope) {
                Ok(value) => value,
                Err(Flow::Return(value) | Flow::Break(value) | Flow::Next(value)) => value,
            },
            |value| value,
        );
        self.pop_frame(depth);
        result
    }

    // ========================================================================
    // Conversions
    // ========================================================================

    /// `to_s` of a value as a Rust string
    pub fn obj_as_string(&self, value: Value) -> String {
        if let Some(s) = self.string_of(value) {
            return s;
        }
        let s = self.funcall_id(value, self.syms.to_s, &[], Value::NIL);
        self.string_of(s)
            .unwrap_or_else(|| self.any_to_s(value))
    }

    /// `inspect` of a value as a Rust string
    pub fn inspect(&self, value: Value) -> String {
        let s = self.funcall_id(value, self.syms.inspect, &[], Value::NIL);
        self.string_of(s)
            .unwrap_or_else(|| self.any_to_s(value))
    }

    /// Default `to_s`: `#<ClassName>`
    pub fn any_to_s(&self, value: Value) -> String {
        format!("#<{}>", self.obj_classname(value))
    }

    /// Equality through the `==` method
    pub fn equal(&self, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        self.funcall_id(a, self.syms.eq, &[b], Value::NIL).is_truthy()
    }
}
