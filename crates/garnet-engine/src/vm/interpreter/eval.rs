//! Expression and statement evaluation

use super::{EvalResult, Flow, Scope};
use crate::parser::{BeginNode, Body, MethodDef, Node, RescueClause, StrPart, Symbol, Target};
use crate::vm::object::Method;
use crate::vm::state::Vm;
use crate::vm::unwind::Outcome;
use crate::vm::value::{ObjRef, Value, ValueType};
use std::panic::resume_unwind;
use std::rc::Rc;

/// A resolved assignment target; receivers and index arguments are
/// evaluated once
enum Place {
    Local(Symbol),
    IVar(Symbol),
    GVar(Symbol),
    Const(Symbol),
    Index(Value, Vec<Value>),
    Attr(Value, Symbol),
}

impl Vm {
    /// Evaluate a statement list. Temporaries of each statement are
    /// released from the arena once it completes; the last value stays
    /// protected.
    pub(crate) fn eval_body(&self, body: &Body, scope: &Scope) -> EvalResult {
        let ai = self.arena_save();
        let mut last = Value::NIL;
        for node in body {
            last = self.eval(node, scope)?;
            self.arena_restore(ai);
            self.gc_protect(last);
        }
        Ok(last)
    }

    pub(crate) fn eval(&self, node: &Node, scope: &Scope) -> EvalResult {
        match node {
            Node::Nil => Ok(Value::NIL),
            Node::True => Ok(Value::TRUE),
            Node::False => Ok(Value::FALSE),
            Node::SelfRef => Ok(scope.self_value),
            Node::Integer(i) => Ok(Value::fixnum(*i)),
            Node::Float(f) => Ok(Value::float(*f)),
            Node::Str(s) => Ok(self.str_new(s.as_str())),
            Node::Interpolated(parts) => self.eval_interpolated(parts, scope),
            Node::Symbol(sym) => Ok(Value::symbol(*sym)),
            Node::Array(items) => {
                let values = self.eval_args(items, scope)?;
                Ok(self.ary_new(values))
            }
            Node::Hash(pairs) => {
                let hash = self.hash_new();
                for (key, value) in pairs {
                    let key = self.eval(key, scope)?;
                    let value = self.eval(value, scope)?;
                    self.hash_set(hash, key, value);
                }
                Ok(hash)
            }

            Node::LocalVar(name) => Ok(self.env_get(scope.env, *name).unwrap_or(Value::NIL)),
            Node::IVar(name) => Ok(self.iv_get(scope.self_value, *name)),
            Node::GVar(name) => Ok(self.gv_get(*name)),
            Node::Const { scope: path, name } => self.eval_const(path.as_deref(), *name, scope),

            Node::Assign { target, value } => {
                let place = self.eval_place(target, scope)?;
                let value = self.eval(value, scope)?;
                self.place_set(&place, value, scope);
                Ok(value)
            }
            Node::OpAssign { target, op, value } => {
                let place = self.eval_place(target, scope)?;
                let current = self.place_get(&place, scope);
                let rhs = self.eval(value, scope)?;
                let result = self.funcall_id(current, *op, &[rhs], Value::NIL);
                self.place_set(&place, result, scope);
                Ok(result)
            }
            Node::OrAssign { target, value } => {
                let place = self.eval_place(target, scope)?;
                let current = self.place_get(&place, scope);
                if current.is_truthy() {
                    return Ok(current);
                }
                let value = self.eval(value, scope)?;
                self.place_set(&place, value, scope);
                Ok(value)
            }

            Node::Call(call) => self.eval_call(call, scope),
            Node::Splat(inner) => self.eval(inner, scope),

            Node::And(lhs, rhs) => {
                let lhs = self.eval(lhs, scope)?;
                if lhs.is_truthy() {
                    self.eval(rhs, scope)
                } else {
                    Ok(lhs)
                }
            }
            Node::Or(lhs, rhs) => {
                let lhs = self.eval(lhs, scope)?;
                if lhs.is_truthy() {
                    Ok(lhs)
                } else {
                    self.eval(rhs, scope)
                }
            }
            Node::Not(inner) => Ok(Value::bool(!self.eval(inner, scope)?.is_truthy())),

            Node::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval(cond, scope)?.is_truthy() {
                    self.eval_body(then_body, scope)
                } else {
                    self.eval_body(else_body, scope)
                }
            }
            Node::While { cond, body, negate } => self.eval_while(cond, body, *negate, scope),
            Node::Begin(begin) => self.eval_begin(begin, scope),
            Node::Seq(body) => self.eval_body(body, scope),

            Node::Def { singleton, def } => self.eval_def(*singleton, def, scope),
            Node::ClassDef {
                path,
                superclass,
                body,
            } => self.eval_class_def(path, superclass.as_deref(), body, scope),
            Node::ModuleDef { path, body } => {
                let (outer, name) = self.eval_class_path(path, scope)?;
                let module = self.define_module_id(outer, name);
                self.eval_class_body(module, body, scope)
            }

            Node::Return(value) => Err(Flow::Return(self.eval_opt(value.as_deref(), scope)?)),
            Node::Break(value) => Err(Flow::Break(self.eval_opt(value.as_deref(), scope)?)),
            Node::Next(value) => Err(Flow::Next(self.eval_opt(value.as_deref(), scope)?)),
            Node::Yield(args) => {
                let args = self.eval_args(args, scope)?;
                if scope.block.is_nil() {
                    self.raise_error(self.core.get().local_jump_error, "no block given (yield)");
                }
                Ok(self.call_proc(scope.block, &args, None))
            }
        }
    }

    fn eval_opt(&self, node: Option<&Node>, scope: &Scope) -> EvalResult {
        match node {
            Some(node) => self.eval(node, scope),
            None => Ok(Value::NIL),
        }
    }

    /// Evaluate an argument list, expanding `*splat` entries
    pub(crate) fn eval_args(&self, nodes: &[Node], scope: &Scope) -> Result<Vec<Value>, Flow> {
        let mut values = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::Splat(inner) => {
                    let value = self.eval(inner, scope)?;
                    match self.ary_items(value) {
                        Some(items) => values.extend(items),
                        None if value.is_nil() => {}
                        None => values.push(value),
                    }
                }
                _ => values.push(self.eval(node, scope)?),
            }
        }
        Ok(values)
    }

    fn eval_interpolated(&self, parts: &[StrPart], scope: &Scope) -> EvalResult {
        let mut out = String::new();
        for part in parts {
            match part {
                StrPart::Lit(text) => out.push_str(text),
                StrPart::Code(body) => {
                    let value = self.eval_body(body, scope)?;
                    out.push_str(&self.obj_as_string(value));
                }
            }
        }
        Ok(self.str_new(out))
    }

    // ========================================================================
    // Variables and constants
    // ========================================================================

    fn eval_place(&self, target: &Target, scope: &Scope) -> Result<Place, Flow> {
        Ok(match target {
            Target::Local(name) => Place::Local(*name),
            Target::IVar(name) => Place::IVar(*name),
            Target::GVar(name) => Place::GVar(*name),
            Target::Const(name) => Place::Const(*name),
            Target::Index { recv, args } => {
                let recv = self.eval(recv, scope)?;
                let args = self.eval_args(args, scope)?;
                Place::Index(recv, args)
            }
            Target::Attr { recv, name } => Place::Attr(self.eval(recv, scope)?, *name),
        })
    }

    fn place_get(&self, place: &Place, scope: &Scope) -> Value {
        match place {
            Place::Local(name) => self.env_get(scope.env, *name).unwrap_or(Value::NIL),
            Place::IVar(name) => self.iv_get(scope.self_value, *name),
            Place::GVar(name) => self.gv_get(*name),
            Place::Const(name) => self.const_lookup(scope.cref, *name).unwrap_or(Value::NIL),
            Place::Index(recv, args) => {
                let index = self.intern("[]");
                self.funcall_id(*recv, index, args, Value::NIL)
            }
            Place::Attr(recv, name) => self.funcall_id(*recv, *name, &[], Value::NIL),
        }
    }

    fn place_set(&self, place: &Place, value: Value, scope: &Scope) {
        match place {
            Place::Local(name) => self.env_set(scope.env, *name, value),
            Place::IVar(name) => self.iv_set(scope.self_value, *name, value),
            Place::GVar(name) => self.gv_set(*name, value),
            Place::Const(name) => self.const_set(scope.cref, *name, value),
            Place::Index(recv, args) => {
                let setter = self.intern("[]=");
                let mut args = args.clone();
                args.push(value);
                self.funcall_id(*recv, setter, &args, Value::NIL);
            }
            Place::Attr(recv, name) => {
                let setter = self.intern(&format!("{}=", self.sym_name(*name)));
                self.funcall_id(*recv, setter, &[value], Value::NIL);
            }
        }
    }

    /// Lexical constant lookup: `cref` and its enclosing classes, then the
    /// ancestors of `cref`, then `Object`
    pub(crate) fn const_lookup(&self, cref: ObjRef, name: Symbol) -> Option<Value> {
        let object = self.core.get().object;
        let mut current = Some(cref);
        // Object is searched last, after the ancestors of `cref`
        while let Some(class) = current.filter(|c| *c != object) {
            if let Some(value) = self.const_get_own(class, name) {
                return Some(value);
            }
            current = self.class_data(class, |data| data.outer).flatten();
        }
        self.const_lookup_in(cref, name)
    }

    fn eval_const(&self, path: Option<&Node>, name: Symbol, scope: &Scope) -> EvalResult {
        let Some(path) = path else {
            return match self.const_lookup(scope.cref, name) {
                Some(value) => Ok(value),
                None => {
                    let message = format!("uninitialized constant {}", self.sym_name(name));
                    self.raise_error(self.core.get().name_error, &message)
                }
            };
        };

        let outer = self.eval(path, scope)?;
        let outer = self.expect_class_like(outer);
        match self.const_lookup_in(outer, name) {
            Some(value) => Ok(value),
            None => {
                let message = format!(
                    "uninitialized constant {}::{}",
                    self.class_name(outer),
                    self.sym_name(name)
                );
                self.raise_error(self.core.get().name_error, &message)
            }
        }
    }

    fn expect_class_like(&self, value: Value) -> ObjRef {
        match value.type_tag() {
            ValueType::Class | ValueType::Module | ValueType::SClass => value.as_pointer(),
            _ => {
                let message = format!("{} is not a class/module", self.inspect(value));
                self.raise_error(self.core.get().type_error, &message)
            }
        }
    }

    // ========================================================================
    // Loops and exception handling
    // ========================================================================

    fn eval_while(&self, cond: &Node, body: &Body, negate: bool, scope: &Scope) -> EvalResult {
        let ai = self.arena_save();
        loop {
            self.arena_restore(ai);
            if self.eval(cond, scope)?.is_truthy() == negate {
                break;
            }
            match self.eval_body(body, scope) {
                Ok(_) | Err(Flow::Next(_)) => {}
                Err(Flow::Break(value)) => return Ok(value),
                Err(flow @ Flow::Return(_)) => return Err(flow),
            }
        }
        self.arena_restore(ai);
        Ok(Value::NIL)
    }

    fn eval_begin(&self, node: &BeginNode, scope: &Scope) -> EvalResult {
        let Some(ensure) = &node.ensure_body else {
            return self.eval_rescue(node, scope);
        };

        let outcome = self.protect_outcome(|| self.eval_rescue(node, scope));
        if let Outcome::Raised(exc) = &outcome {
            self.gc_protect(*exc);
        }

        // A jump out of the ensure clause replaces the pending one
        self.eval_body(ensure, scope)?;

        match outcome {
            Outcome::Done(result) => result,
            Outcome::Raised(exc) => self.raise(exc),
            Outcome::Other(payload) => resume_unwind(payload),
        }
    }

    fn eval_rescue(&self, node: &BeginNode, scope: &Scope) -> EvalResult {
        if node.rescues.is_empty() {
            let value = self.eval_body(&node.body, scope)?;
            return match &node.else_body {
                Some(else_body) => self.eval_body(else_body, scope),
                None => Ok(value),
            };
        }

        match self.protect_outcome(|| self.eval_body(&node.body, scope)) {
            Outcome::Done(Ok(value)) => match &node.else_body {
                Some(else_body) => self.eval_body(else_body, scope),
                None => Ok(value),
            },
            Outcome::Done(Err(flow)) => Err(flow),
            Outcome::Raised(exc) => {
                self.gc_protect(exc);
                for clause in &node.rescues {
                    if self.rescue_matches(clause, exc, scope)? {
                        if let Some(var) = clause.var {
                            self.env_set(scope.env, var, exc);
                        }
                        let errinfo = self.intern("$!");
                        self.gv_set(errinfo, exc);
                        return self.eval_body(&clause.body, scope);
                    }
                }
                self.raise(exc)
            }
            Outcome::Other(payload) => resume_unwind(payload),
        }
    }

    fn rescue_matches(&self, clause: &RescueClause, exc: Value, scope: &Scope) -> Result<bool, Flow> {
        let core = self.core.get();
        if clause.classes.is_empty() {
            return Ok(self.obj_is_kind_of(exc, core.standard_error));
        }

        for node in &clause.classes {
            let value = self.eval(node, scope)?;
            let candidates = self.ary_items(value).unwrap_or_else(|| vec![value]);
            for candidate in candidates {
                if !matches!(candidate.type_tag(), ValueType::Class | ValueType::Module) {
                    self.raise_error(core.type_error, "class or module required for rescue clause");
                }
                if self.obj_is_kind_of(exc, candidate.as_pointer()) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    fn eval_def(&self, singleton: bool, def: &Rc<MethodDef>, scope: &Scope) -> EvalResult {
        let target = if singleton {
            match self.singleton_class_of(scope.self_value) {
                Some(class) => class,
                None => {
                    let message = format!(
                        "can't define singleton method for {}",
                        self.obj_classname(scope.self_value)
                    );
                    self.raise_error(self.core.get().type_error, &message)
                }
            }
        } else {
            scope.target_class
        };

        self.add_method(
            target,
            def.name,
            Method::Script {
                def: Rc::clone(def),
                cref: scope.cref,
            },
        );
        Ok(Value::symbol(def.name))
    }

    fn eval_class_path(&self, path: &Node, scope: &Scope) -> Result<(ObjRef, Symbol), Flow> {
        match path {
            Node::Const {
                scope: Some(outer),
                name,
            } => {
                let outer = self.eval(outer, scope)?;
                Ok((self.expect_class_like(outer), *name))
            }
            Node::Const { scope: None, name } => Ok((scope.cref, *name)),
            _ => self.raise_error(self.core.get().type_error, "class path must be a constant"),
        }
    }

    fn eval_class_def(
        &self,
        path: &Node,
        superclass: Option<&Node>,
        body: &Body,
        scope: &Scope,
    ) -> EvalResult {
        let (outer, name) = self.eval_class_path(path, scope)?;
        let superclass = match superclass {
            Some(node) => {
                let value = self.eval(node, scope)?;
                if value.type_tag() != ValueType::Class {
                    self.raise_error(self.core.get().type_error, "superclass must be a Class");
                }
                Some(value.as_pointer())
            }
            None => None,
        };
        let class = self.define_class_id(outer, name, superclass);
        self.eval_class_body(class, body, scope)
    }

    fn eval_class_body(&self, class: ObjRef, body: &Body, scope: &Scope) -> EvalResult {
        let env = self.env_new(None);
        let inner = Scope {
            self_value: self.class_value(class),
            env,
            block: Value::NIL,
            cref: class,
            target_class: class,
            mid: None,
            home: scope.home,
        };
        self.eval_body(body, &inner)
    }
}
