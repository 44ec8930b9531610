//! Tree-walking evaluator for validated scripts.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use chrono::TimeDelta;

use super::api::LawApi;
use super::ast::{BinOp, CmpOp, Comprehension, Constant, Expr, ExprKind, FPart, Stmt, StmtKind, Target, UnaryOp};
use super::builtins::Builtin;
use super::error::RuntimeError;
use super::executor::Interrupt;
use super::format::{format_spec, repr, to_str};
use super::value::{
    loose_eq, loose_cmp, range_items, range_len, Dict, Function, Val, MAX_SEQUENCE_LEN,
};

/// A variable frame. Function calls get a child of the defining scope.
#[derive(Default)]
pub(crate) struct Scope {
    vars: RefCell<HashMap<String, Val>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub(crate) fn root() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::default(),
            parent: Some(parent.clone()),
        })
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Val> {
        match self.vars.borrow().get(name) {
            Some(v) => Some(v.clone()),
            None => self.parent.as_ref().and_then(|p| p.lookup(name)),
        }
    }

    pub(crate) fn get_local(&self, name: &str) -> Option<Val> {
        self.vars.borrow().get(name).cloned()
    }

    pub(crate) fn set(&self, name: &str, value: Val) {
        self.vars.borrow_mut().insert(name.to_owned(), value);
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Val),
}

pub(crate) struct Interpreter<'a> {
    pub(crate) api: &'a mut LawApi,
    interrupt: &'a Interrupt,
    depth: usize,
    max_depth: usize,
    held: Vec<Held>,
}

/// A shared allocation that may sit on a reference cycle: a scope captured by
/// a `def`, or a container another non-scalar value was stored into. Emptied
/// when the interpreter is dropped.
enum Held {
    Scope(Weak<Scope>),
    List(Weak<RefCell<Vec<Val>>>),
    Dict(Weak<RefCell<Dict>>),
}

impl Held {
    fn same(&self, other: &Held) -> bool {
        match (self, other) {
            (Held::Scope(a), Held::Scope(b)) => a.ptr_eq(b),
            (Held::List(a), Held::List(b)) => a.ptr_eq(b),
            (Held::Dict(a), Held::Dict(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        for held in self.held.drain(..) {
            match held {
                Held::Scope(scope) => {
                    if let Some(scope) = scope.upgrade() {
                        pending.extend(scope.vars.borrow_mut().drain().map(|(_, v)| v));
                    }
                }
                Held::List(items) => {
                    if let Some(items) = items.upgrade() {
                        pending.append(&mut items.borrow_mut());
                    }
                }
                Held::Dict(dict) => {
                    if let Some(dict) = dict.upgrade() {
                        pending.extend(dict.borrow_mut().take_entries().into_iter().map(|(_, v)| v));
                    }
                }
            }
        }
        release(pending);
    }
}

/// Empty every container, and every function's captured scope, reachable
/// from `pending`. Each is drained once, so cycles between them terminate.
fn release(mut pending: Vec<Val>) {
    while let Some(value) = pending.pop() {
        match value {
            Val::List(items) => pending.append(&mut items.borrow_mut()),
            Val::Dict(dict) => {
                pending.extend(dict.borrow_mut().take_entries().into_iter().map(|(_, v)| v));
            }
            Val::Tuple(items) => pending.extend(items.iter().cloned()),
            Val::Function(function) => {
                pending.extend(function.defaults.iter().flatten().cloned());
                pending.extend(function.closure.vars.borrow_mut().drain().map(|(_, v)| v));
            }
            Val::Method(method) => pending.push(method.receiver.clone()),
            Val::Object(object) => pending.extend(object.fields.iter().map(|(_, v)| v.clone())),
            _ => {}
        }
    }
}

fn type_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Type(message.into())
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(api: &'a mut LawApi, interrupt: &'a Interrupt, max_depth: usize) -> Self {
        Self {
            api,
            interrupt,
            depth: 0,
            max_depth,
            held: Vec::new(),
        }
    }

    pub(crate) fn tick(&self) -> Result<(), RuntimeError> {
        if self.interrupt.is_triggered() {
            return Err(RuntimeError::Interrupted);
        }
        Ok(())
    }

    fn hold(&mut self, held: Held) {
        if self.held.last().is_some_and(|last| last.same(&held)) {
            return;
        }
        self.held.push(held);
    }

    /// Record that `stored` is being placed inside `container`.
    pub(crate) fn note_stored(&mut self, container: &Val, stored: &[Val]) {
        if stored.iter().all(Val::is_leaf) {
            return;
        }
        match container {
            Val::List(items) => self.hold(Held::List(Rc::downgrade(items))),
            Val::Dict(dict) => self.hold(Held::Dict(Rc::downgrade(dict))),
            _ => {}
        }
    }

    /// Run a module body in `globals`.
    pub(crate) fn run(&mut self, program: &[Stmt], globals: &Rc<Scope>) -> Result<(), RuntimeError> {
        self.exec_block(program, globals).map(|_| ())
    }

    // -- Statements ---------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Result<Flow, RuntimeError> {
        for stmt in body {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow, RuntimeError> {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, scope)?,
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test, scope)?.truthy() {
                        return self.exec_block(body, scope);
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter, scope)?;
                if let Val::Range { start, step, .. } = iterable {
                    for i in 0..range_len(&iterable) as i64 {
                        self.tick()?;
                        self.assign(target, Val::Int(start + i * step), scope)?;
                        match self.exec_block(body, scope)? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                } else {
                    for item in self.iterate(&iterable)? {
                        self.tick()?;
                        self.assign(target, item, scope)?;
                        match self.exec_block(body, scope)? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                }
            }
            StmtKind::While { test, body } => loop {
                self.tick()?;
                if !self.eval(test, scope)?.truthy() {
                    break;
                }
                match self.exec_block(body, scope)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(e) => self.eval(e, scope)?,
                    None => Val::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Raise(value) => {
                let message = match value {
                    Some(e) => to_str(&self.eval(e, scope)?),
                    None => "no active exception to re-raise".to_owned(),
                };
                return Err(RuntimeError::Raised(message));
            }
            StmtKind::FunctionDef(def) => {
                let mut defaults = Vec::with_capacity(def.params.len());
                for param in &def.params {
                    defaults.push(match &param.default {
                        Some(e) => Some(self.eval(e, scope)?),
                        None => None,
                    });
                }
                let function = Function {
                    def: def.clone(),
                    defaults,
                    closure: scope.clone(),
                };
                self.hold(Held::Scope(Rc::downgrade(scope)));
                scope.set(&def.name, Val::Function(Rc::new(function)));
            }
            StmtKind::Import(_)
            | StmtKind::ImportFrom(_)
            | StmtKind::Delete(_)
            | StmtKind::Global(_)
            | StmtKind::Nonlocal(_) => {
                return Err(type_error(format!("statement at line {} is not permitted", stmt.line)));
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Target, value: Val, scope: &Rc<Scope>) -> Result<(), RuntimeError> {
        match target {
            Target::Name(name, _) => scope.set(name, value),
            Target::Subscript { value: object, index } => {
                let object = self.eval(object, scope)?;
                if matches!(index.kind, ExprKind::Slice { .. }) {
                    return Err(type_error("slice assignment is not supported"));
                }
                let index = self.eval(index, scope)?;
                self.note_stored(&object, std::slice::from_ref(&value));
                set_item(&object, index, value)?;
            }
            Target::Attribute { value: object, attr } => {
                let object = self.eval(object, scope)?;
                return Err(attribute_assignment(&object, attr));
            }
            Target::Tuple(targets) => {
                let items = self.iterate(&value)?;
                if items.len() < targets.len() {
                    return Err(RuntimeError::Value(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(RuntimeError::Value(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
            }
        }
        Ok(())
    }

    fn aug_assign(
        &mut self,
        target: &Target,
        op: BinOp,
        value: &Expr,
        scope: &Rc<Scope>,
    ) -> Result<(), RuntimeError> {
        match target {
            Target::Name(name, _) => {
                let current = self.lookup(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.inplace(op, current, &rhs)?;
                scope.set(name, updated);
            }
            Target::Subscript { value: object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                let current = get_item(&object, &index)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.inplace(op, current, &rhs)?;
                self.note_stored(&object, std::slice::from_ref(&updated));
                set_item(&object, index, updated)?;
            }
            Target::Attribute { value: object, attr } => {
                let object = self.eval(object, scope)?;
                return Err(attribute_assignment(&object, attr));
            }
            Target::Tuple(_) => {
                return Err(type_error("illegal expression for augmented assignment"));
            }
        }
        Ok(())
    }

    /// `a op= b`; lists extend in place.
    fn inplace(&mut self, op: BinOp, current: Val, rhs: &Val) -> Result<Val, RuntimeError> {
        if let (BinOp::Add, Val::List(items)) = (op, &current) {
            let extra = self.iterate(rhs)?;
            concat_len(items.borrow().len(), extra.len())?;
            self.note_stored(&current, &extra);
            items.borrow_mut().extend(extra);
            return Ok(current);
        }
        binop(op, &current, rhs)
    }

    // -- Expressions --------------------------------------------------------

    fn lookup(&self, name: &str, scope: &Rc<Scope>) -> Result<Val, RuntimeError> {
        scope
            .lookup(name)
            .or_else(|| Builtin::from_name(name).map(Val::Builtin))
            .ok_or_else(|| RuntimeError::Name(name.to_owned()))
    }

    fn eval_all(&mut self, items: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Val>, RuntimeError> {
        items.iter().map(|e| self.eval(e, scope)).collect()
    }

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Val, RuntimeError> {
        Ok(match &expr.kind {
            ExprKind::Const(c) => match c {
                Constant::None => Val::None,
                Constant::Bool(b) => Val::Bool(*b),
                Constant::Int(i) => Val::Int(*i),
                Constant::Float(f) => Val::Float(*f),
                Constant::Str(s) => Val::str(s.as_str()),
            },
            ExprKind::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Lit(text) => out.push_str(text),
                        FPart::Expr { expr, repr: as_repr, spec } => {
                            let value = self.eval(expr, scope)?;
                            let text = if *as_repr {
                                repr(&value)
                            } else {
                                format_spec(&value, spec.as_deref().unwrap_or(""))?
                            };
                            out.push_str(&text);
                        }
                    }
                }
                Val::str(out)
            }
            ExprKind::Name(name) => self.lookup(name, scope)?,
            ExprKind::List(items) => Val::list(self.eval_all(items, scope)?),
            ExprKind::Tuple(items) => Val::tuple(self.eval_all(items, scope)?),
            ExprKind::Set(items) => {
                let items = self.eval_all(items, scope)?;
                Val::list(unique(items))
            }
            ExprKind::Dict(entries) => {
                let mut dict = Dict::new();
                for (k, v) in entries {
                    let key = self.eval(k, scope)?;
                    let value = self.eval(v, scope)?;
                    dict.insert(key, value)?;
                }
                Val::dict(dict)
            }
            ExprKind::ListComp { elt, generators } => {
                let inner = Scope::child(scope);
                let mut out = Vec::new();
                self.comprehension(elt, generators, &inner, &mut out)?;
                Val::list(out)
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, scope)?;
                self.get_attr(&object, attr)?
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value, scope)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let mut bound = |b: &Option<Box<Expr>>| match b {
                        Some(e) => self.eval(e, scope).map(Some),
                        None => Ok(None),
                    };
                    let (lower, upper, step) = (bound(lower)?, bound(upper)?, bound(step)?);
                    slice(&object, lower, upper, step)?
                } else {
                    let index = self.eval(index, scope)?;
                    get_item(&object, &index)?
                }
            }
            ExprKind::Slice { .. } => {
                return Err(type_error("slice syntax is only valid inside brackets"));
            }
            ExprKind::Call { func, args, kwargs } => {
                let func = self.eval(func, scope)?;
                let args = self.eval_all(args, scope)?;
                let mut named = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    named.push((name.clone(), self.eval(value, scope)?));
                }
                self.call(&func, args, named)?
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                binop(*op, &left, &right)?
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                unary(*op, &value)?
            }
            ExprKind::And(left, right) => {
                let left = self.eval(left, scope)?;
                if left.truthy() {
                    self.eval(right, scope)?
                } else {
                    left
                }
            }
            ExprKind::Or(left, right) => {
                let left = self.eval(left, scope)?;
                if left.truthy() {
                    left
                } else {
                    self.eval(right, scope)?
                }
            }
            ExprKind::Compare { left, ops } => {
                let mut left = self.eval(left, scope)?;
                for (op, right) in ops {
                    let right = self.eval(right, scope)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Val::Bool(false));
                    }
                    left = right;
                }
                Val::Bool(true)
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(body, scope)?
                } else {
                    self.eval(orelse, scope)?
                }
            }
        })
    }

    fn comprehension(
        &mut self,
        elt: &Expr,
        generators: &[Comprehension],
        scope: &Rc<Scope>,
        out: &mut Vec<Val>,
    ) -> Result<(), RuntimeError> {
        let Some((first, rest)) = generators.split_first() else {
            out.push(self.eval(elt, scope)?);
            return Ok(());
        };
        let iterable = self.eval(&first.iter, scope)?;
        'items: for item in self.iterate(&iterable)? {
            self.tick()?;
            self.assign(&first.target, item, scope)?;
            for condition in &first.ifs {
                if !self.eval(condition, scope)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(elt, rest, scope, out)?;
        }
        Ok(())
    }

    // -- Calls --------------------------------------------------------------

    pub(crate) fn call(
        &mut self,
        func: &Val,
        args: Vec<Val>,
        kwargs: Vec<(String, Val)>,
    ) -> Result<Val, RuntimeError> {
        self.tick()?;
        match func {
            Val::Function(f) => self.call_function(f, args, kwargs),
            Val::Builtin(b) => self.call_builtin(*b, args, kwargs),
            Val::Method(m) => self.call_method(&m.receiver, m.name, args, kwargs),
            other => Err(type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Val>,
        kwargs: Vec<(String, Val)>,
    ) -> Result<Val, RuntimeError> {
        if self.depth >= self.max_depth {
            return Err(RuntimeError::RecursionLimit {
                limit: self.max_depth,
            });
        }
        let def = &function.def;
        let params = &def.params;
        if args.len() > params.len() {
            let plural = if params.len() == 1 { "" } else { "s" };
            return Err(type_error(format!(
                "{}() takes {} positional argument{plural} but {} were given",
                def.name,
                params.len(),
                args.len()
            )));
        }
        let mut slots: Vec<Option<Val>> = args.into_iter().map(Some).collect();
        slots.resize(params.len(), None);
        for (name, value) in kwargs {
            match params.iter().position(|p| p.name == name) {
                Some(i) if slots[i].is_none() => slots[i] = Some(value),
                Some(_) => {
                    return Err(type_error(format!(
                        "{}() got multiple values for argument '{name}'",
                        def.name
                    )));
                }
                None => {
                    return Err(type_error(format!(
                        "{}() got an unexpected keyword argument '{name}'",
                        def.name
                    )));
                }
            }
        }

        let frame = Scope::child(&function.closure);
        for ((param, slot), default) in params.iter().zip(slots).zip(&function.defaults) {
            let value = slot.or_else(|| default.clone()).ok_or_else(|| {
                type_error(format!(
                    "{}() missing required argument '{}'",
                    def.name, param.name
                ))
            })?;
            frame.set(&param.name, value);
        }

        self.depth += 1;
        let flow = self.exec_block(&def.body, &frame);
        self.depth -= 1;
        Ok(match flow? {
            Flow::Return(value) => value,
            Flow::Normal | Flow::Break | Flow::Continue => Val::None,
        })
    }

    // -- Iteration ----------------------------------------------------------

    pub(crate) fn iterate(&self, value: &Val) -> Result<Vec<Val>, RuntimeError> {
        Ok(match value {
            Val::List(items) => items.borrow().clone(),
            Val::Tuple(items) => items.to_vec(),
            Val::Str(s) => s.chars().map(|c| Val::str(c.to_string())).collect(),
            Val::Dict(d) => d.borrow().keys().cloned().collect(),
            Val::Range { .. } => range_items(value)?,
            other => {
                return Err(type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )));
            }
        })
    }
}

fn attribute_assignment(object: &Val, attr: &str) -> RuntimeError {
    match object {
        Val::Object(o) => RuntimeError::ReadOnly(o.type_name.to_owned()),
        other => RuntimeError::Attribute {
            type_name: other.type_name().to_owned(),
            attr: attr.to_owned(),
        },
    }
}

/// Order-preserving de-duplication used for set displays and `set()`.
pub(crate) fn unique(items: Vec<Val>) -> Vec<Val> {
    let mut out: Vec<Val> = Vec::with_capacity(items.len());
    for item in items {
        if !out.iter().any(|seen| loose_eq(seen, &item)) {
            out.push(item);
        }
    }
    out
}

// -- Operators ----------------------------------------------------------------

fn unsupported(op: &str, a: &Val, b: &Val) -> RuntimeError {
    type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

pub(crate) fn binop(op: BinOp, a: &Val, b: &Val) -> Result<Val, RuntimeError> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return int_op(op, x, y);
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return float_op(op, x, y).map(Val::Float);
    }
    match (op, a, b) {
        (BinOp::Add, Val::Str(x), Val::Str(y)) => {
            concat_len(x.len(), y.len())?;
            Ok(Val::str(format!("{x}{y}")))
        }
        (BinOp::Add, Val::List(x), Val::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            let mut items = Vec::with_capacity(concat_len(x.len(), y.len())?);
            items.extend(x.iter().cloned());
            items.extend(y.iter().cloned());
            Ok(Val::list(items))
        }
        (BinOp::Add, Val::Tuple(x), Val::Tuple(y)) => {
            concat_len(x.len(), y.len())?;
            Ok(Val::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        (BinOp::Mul, Val::Str(_) | Val::List(_) | Val::Tuple(_), n) if n.as_int().is_some() => {
            repeat(a, n.as_int().unwrap_or(0))
        }
        (BinOp::Mul, n, Val::Str(_) | Val::List(_) | Val::Tuple(_)) if n.as_int().is_some() => {
            repeat(b, n.as_int().unwrap_or(0))
        }
        (BinOp::Add, Val::DateTime(d), Val::TimeDelta(t))
        | (BinOp::Add, Val::TimeDelta(t), Val::DateTime(d)) => d
            .checked_add_signed(*t)
            .map(Val::DateTime)
            .ok_or(RuntimeError::Overflow),
        (BinOp::Sub, Val::DateTime(d), Val::TimeDelta(t)) => d
            .checked_sub_signed(*t)
            .map(Val::DateTime)
            .ok_or(RuntimeError::Overflow),
        (BinOp::Sub, Val::DateTime(x), Val::DateTime(y)) => {
            Ok(Val::TimeDelta(x.signed_duration_since(*y)))
        }
        (BinOp::Add, Val::TimeDelta(x), Val::TimeDelta(y)) => {
            x.checked_add(y).map(Val::TimeDelta).ok_or(RuntimeError::Overflow)
        }
        (BinOp::Sub, Val::TimeDelta(x), Val::TimeDelta(y)) => {
            x.checked_sub(y).map(Val::TimeDelta).ok_or(RuntimeError::Overflow)
        }
        (BinOp::Mul, Val::TimeDelta(t), n) | (BinOp::Mul, n, Val::TimeDelta(t)) if n.as_f64().is_some() => {
            scale_delta(*t, n, false)
        }
        (BinOp::Div, Val::TimeDelta(t), n) if n.as_f64().is_some() => scale_delta(*t, n, true),
        (BinOp::Div | BinOp::FloorDiv, Val::TimeDelta(x), Val::TimeDelta(y)) => {
            let (x, y) = (delta_micros(*x)?, delta_micros(*y)?);
            if y == 0 {
                return Err(RuntimeError::ZeroDivision);
            }
            if op == BinOp::Div {
                Ok(Val::Float(x as f64 / y as f64))
            } else {
                int_op(BinOp::FloorDiv, x, y)
            }
        }
        _ => Err(unsupported(op.symbol(), a, b)),
    }
}

fn delta_micros(t: TimeDelta) -> Result<i64, RuntimeError> {
    t.num_microseconds().ok_or(RuntimeError::Overflow)
}

fn scale_delta(t: TimeDelta, factor: &Val, divide: bool) -> Result<Val, RuntimeError> {
    let micros = delta_micros(t)? as f64;
    let factor = factor.as_f64().unwrap_or(1.0);
    if divide && factor == 0.0 {
        return Err(RuntimeError::ZeroDivision);
    }
    let scaled = if divide { micros / factor } else { micros * factor }.round();
    if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
        return Err(RuntimeError::Overflow);
    }
    Ok(Val::TimeDelta(TimeDelta::microseconds(scaled as i64)))
}

/// Length of `a + b`, refused past [`MAX_SEQUENCE_LEN`] like repetition is.
pub(crate) fn concat_len(a: usize, b: usize) -> Result<usize, RuntimeError> {
    a.checked_add(b)
        .filter(|&n| n <= MAX_SEQUENCE_LEN)
        .ok_or(RuntimeError::Overflow)
}

fn repeat(seq: &Val, times: i64) -> Result<Val, RuntimeError> {
    let times = usize::try_from(times).unwrap_or(0);
    let len = match seq {
        Val::Str(s) => s.len(),
        Val::List(items) => items.borrow().len(),
        Val::Tuple(items) => items.len(),
        _ => 0,
    };
    if len.checked_mul(times).map_or(true, |n| n > MAX_SEQUENCE_LEN) {
        return Err(RuntimeError::Overflow);
    }
    let cycle = |items: &[Val]| {
        let mut out = Vec::with_capacity(items.len() * times);
        for _ in 0..times {
            out.extend(items.iter().cloned());
        }
        out
    };
    Ok(match seq {
        Val::Str(s) => Val::str(s.repeat(times)),
        Val::List(items) => Val::list(cycle(&items.borrow()[..])),
        Val::Tuple(items) => Val::tuple(cycle(&items[..])),
        other => other.clone(),
    })
}

fn int_op(op: BinOp, x: i64, y: i64) -> Result<Val, RuntimeError> {
    let overflow = RuntimeError::Overflow;
    Ok(Val::Int(match op {
        BinOp::Add => x.checked_add(y).ok_or(overflow)?,
        BinOp::Sub => x.checked_sub(y).ok_or(overflow)?,
        BinOp::Mul => x.checked_mul(y).ok_or(overflow)?,
        BinOp::Div => {
            if y == 0 {
                return Err(RuntimeError::ZeroDivision);
            }
            return Ok(Val::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(RuntimeError::ZeroDivision);
            }
            let q = x.checked_div(y).ok_or(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(RuntimeError::ZeroDivision);
            }
            let r = x.wrapping_rem(y);
            if r != 0 && ((r < 0) != (y < 0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(RuntimeError::ZeroDivision);
                }
                return Ok(Val::Float((x as f64).powf(y as f64)));
            }
            u32::try_from(y)
                .ok()
                .and_then(|e| x.checked_pow(e))
                .ok_or(overflow)?
        }
    }))
}

fn float_op(op: BinOp, x: f64, y: f64) -> Result<f64, RuntimeError> {
    let needs_divisor = matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod);
    if needs_divisor && y == 0.0 {
        return Err(RuntimeError::ZeroDivision);
    }
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod => {
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(RuntimeError::ZeroDivision);
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(RuntimeError::Value(
                    "negative number cannot be raised to a fractional power".to_owned(),
                ));
            }
            x.powf(y)
        }
    };
    if result.is_infinite() && x.is_finite() && y.is_finite() {
        return Err(RuntimeError::Overflow);
    }
    Ok(result)
}

fn unary(op: UnaryOp, value: &Val) -> Result<Val, RuntimeError> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Val::Bool(!v.truthy())),
        (UnaryOp::Neg, Val::Float(f)) => Ok(Val::Float(-f)),
        (UnaryOp::Neg, Val::TimeDelta(t)) => TimeDelta::zero()
            .checked_sub(t)
            .map(Val::TimeDelta)
            .ok_or(RuntimeError::Overflow),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Val::Int)
            .ok_or(RuntimeError::Overflow),
        (UnaryOp::Pos, Val::Float(_) | Val::TimeDelta(_)) => Ok(value.clone()),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Val::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::Neg | UnaryOp::Pos, v) => Err(type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            v.type_name()
        ))),
    }
}

fn compare(op: CmpOp, a: &Val, b: &Val) -> Result<bool, RuntimeError> {
    use std::cmp::Ordering::{Equal, Greater, Less};
    Ok(match op {
        CmpOp::Eq => loose_eq(a, b),
        CmpOp::NotEq => !loose_eq(a, b),
        CmpOp::Lt => loose_cmp(a, b, "<")? == Some(Less),
        CmpOp::LtE => matches!(loose_cmp(a, b, "<=")?, Some(Less | Equal)),
        CmpOp::Gt => loose_cmp(a, b, ">")? == Some(Greater),
        CmpOp::GtE => matches!(loose_cmp(a, b, ">=")?, Some(Greater | Equal)),
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Is => is_same(a, b),
        CmpOp::IsNot => !is_same(a, b),
    })
}

fn is_same(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::None, Val::None) | (Val::Api, Val::Api) => true,
        (Val::Bool(x), Val::Bool(y)) => x == y,
        (Val::Int(x), Val::Int(y)) => x == y,
        (Val::Str(x), Val::Str(y)) => x == y,
        (Val::List(x), Val::List(y)) => Rc::ptr_eq(x, y),
        (Val::Dict(x), Val::Dict(y)) => Rc::ptr_eq(x, y),
        (Val::Tuple(x), Val::Tuple(y)) => Rc::ptr_eq(x, y),
        (Val::Function(x), Val::Function(y)) => Rc::ptr_eq(x, y),
        (Val::Object(x), Val::Object(y)) => Rc::ptr_eq(x, y),
        (Val::Builtin(x), Val::Builtin(y)) => x == y,
        _ => false,
    }
}

pub(crate) fn contains(container: &Val, item: &Val) -> Result<bool, RuntimeError> {
    Ok(match container {
        Val::Str(s) => match item {
            Val::Str(needle) => s.contains(&**needle),
            other => {
                return Err(type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )));
            }
        },
        Val::List(items) => items.borrow().iter().any(|v| loose_eq(v, item)),
        Val::Tuple(items) => items.iter().any(|v| loose_eq(v, item)),
        Val::Dict(d) => d.borrow().contains(item)?,
        Val::Range { start, stop, step } => match item.as_int() {
            Some(i) => {
                let inside = if *step > 0 {
                    *start <= i && i < *stop
                } else {
                    *stop < i && i <= *start
                };
                inside && (i128::from(i) - i128::from(*start)) % i128::from(*step) == 0
            }
            None => false,
        },
        other => {
            return Err(type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )));
        }
    })
}

// -- Subscripts -------------------------------------------------------------

fn index_of(index: &Val, len: usize, what: &str) -> Result<usize, RuntimeError> {
    let Some(i) = index.as_int() else {
        return Err(type_error(format!(
            "{what} indices must be integers, not '{}'",
            index.type_name()
        )));
    };
    let len = len as i64;
    let j = if i < 0 { i + len } else { i };
    if !(0..len).contains(&j) {
        return Err(RuntimeError::Index(format!("{what} index out of range")));
    }
    Ok(j as usize)
}

pub(crate) fn get_item(object: &Val, index: &Val) -> Result<Val, RuntimeError> {
    match object {
        Val::List(items) => {
            let items = items.borrow();
            Ok(items[index_of(index, items.len(), "list")?].clone())
        }
        Val::Tuple(items) => Ok(items[index_of(index, items.len(), "tuple")?].clone()),
        Val::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = index_of(index, chars.len(), "string")?;
            Ok(Val::str(chars[i].to_string()))
        }
        Val::Dict(d) => d
            .borrow()
            .get(index)?
            .cloned()
            .ok_or_else(|| RuntimeError::Key(repr(index))),
        Val::Range { start, step, .. } => {
            let i = index_of(index, range_len(object), "range object")?;
            Ok(Val::Int(start + i as i64 * step))
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(object: &Val, index: Val, value: Val) -> Result<(), RuntimeError> {
    match object {
        Val::List(items) => {
            let len = items.borrow().len();
            let i = index_of(&index, len, "list assignment")?;
            items.borrow_mut()[i] = value;
            Ok(())
        }
        Val::Dict(d) => d.borrow_mut().insert(index, value),
        other => Err(type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice(
    object: &Val,
    lower: Option<Val>,
    upper: Option<Val>,
    step: Option<Val>,
) -> Result<Val, RuntimeError> {
    let bound = |b: Option<Val>| match b {
        None | Some(Val::None) => Ok(None),
        Some(v) => v
            .as_int()
            .map(Some)
            .ok_or_else(|| type_error("slice indices must be integers or None")),
    };
    let (lower, upper, step) = (bound(lower)?, bound(upper)?, bound(step)?.unwrap_or(1));
    if step == 0 {
        return Err(RuntimeError::Value("slice step cannot be zero".to_owned()));
    }
    Ok(match object {
        Val::List(items) => {
            let items = items.borrow();
            Val::list(
                slice_indices(items.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect(),
            )
        }
        Val::Tuple(items) => Val::tuple(
            slice_indices(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        ),
        Val::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Val::str(
                slice_indices(chars.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| chars[i])
                    .collect::<String>(),
            )
        }
        Val::Range { .. } => {
            let items = range_items(object)?;
            Val::list(
                slice_indices(items.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect(),
            )
        }
        other => {
            return Err(type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            )));
        }
    })
}

fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |b: i64, lo: i64, hi: i64| {
        let b = if b < 0 { b.saturating_add(len) } else { b };
        b.clamp(lo, hi)
    };
    let mut out = Vec::new();
    let (mut i, stop) = if step > 0 {
        (
            lower.map_or(0, |b| clamp(b, 0, len)),
            upper.map_or(len, |b| clamp(b, 0, len)),
        )
    } else {
        (
            lower.map_or(len - 1, |b| clamp(b, -1, len - 1)),
            upper.map_or(-1, |b| clamp(b, -1, len - 1)),
        )
    };
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    out
}
