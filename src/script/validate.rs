//! Static safety gate run before any script is registered or executed.

use super::ast::{Comprehension, Expr, ExprKind, FPart, Stmt, StmtKind, Target};
use super::error::ValidationError;
use super::parser::parse_program;

/// Builtins and introspection hooks a law may never reference.
pub(crate) const FORBIDDEN_NAMES: &[&str] = &[
    "exec",
    "eval",
    "compile",
    "__import__",
    "open",
    "file",
    "input",
    "raw_input",
    "reload",
    "vars",
    "globals",
    "locals",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
];

const FORBIDDEN_CALLS: &[&str] = &["exec", "eval", "compile"];

/// Message returned by [`validate_code`] for an acceptable script.
pub const VALID_MESSAGE: &str = "OK";

/// Check a script and report `(is_valid, message)`.
///
/// ```
/// let (ok, message) = statute::validate_code("def apply():\n    return {'action': 'allow'}\n");
/// assert!(ok);
/// assert_eq!(message, "OK");
///
/// let (ok, message) = statute::validate_code("import os\n");
/// assert!(!ok);
/// assert_eq!(message, "forbidden statement 'import' at line 1");
/// ```
pub fn validate_code(text: &str) -> (bool, String) {
    match validate_script(text) {
        Ok(()) => (true, VALID_MESSAGE.to_owned()),
        Err(err) => (false, err.to_string()),
    }
}

/// Typed variant of [`validate_code`].
pub fn validate_script(text: &str) -> Result<(), ValidationError> {
    compile_script(text).map(|_| ())
}

/// Parse and vet `text`, yielding the program the interpreter runs.
pub(crate) fn compile_script(text: &str) -> Result<Vec<Stmt>, ValidationError> {
    let program = parse_program(text)?;
    block(&program)?;
    Ok(program)
}

fn block(stmts: &[Stmt]) -> Result<(), ValidationError> {
    stmts.iter().try_for_each(stmt)
}

fn forbidden(statement: &'static str, line: usize) -> Result<(), ValidationError> {
    Err(ValidationError::ForbiddenStatement { statement, line })
}

fn stmt(s: &Stmt) -> Result<(), ValidationError> {
    let line = s.line;
    match &s.kind {
        StmtKind::Import(_) => forbidden("import", line),
        StmtKind::ImportFrom(_) => forbidden("from import", line),
        StmtKind::Delete(_) => forbidden("del", line),
        StmtKind::Global(_) => forbidden("global", line),
        StmtKind::Nonlocal(_) => forbidden("nonlocal", line),
        StmtKind::Expr(e) => expr(e),
        StmtKind::Assign { targets, value } => {
            targets.iter().try_for_each(target)?;
            expr(value)
        }
        StmtKind::AugAssign { target: t, value, .. } => {
            target(t)?;
            expr(value)
        }
        StmtKind::If { branches, orelse } => {
            for (test, body) in branches {
                expr(test)?;
                block(body)?;
            }
            block(orelse)
        }
        StmtKind::For { target: t, iter, body } => {
            target(t)?;
            expr(iter)?;
            block(body)
        }
        StmtKind::While { test, body } => {
            expr(test)?;
            block(body)
        }
        StmtKind::Return(Some(e)) | StmtKind::Raise(Some(e)) => expr(e),
        StmtKind::FunctionDef(def) => {
            name(&def.name, def.line)?;
            for param in &def.params {
                name(&param.name, def.line)?;
                if let Some(default) = &param.default {
                    expr(default)?;
                }
            }
            block(&def.body)
        }
        StmtKind::Return(None)
        | StmtKind::Raise(None)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Pass => Ok(()),
    }
}

fn name(name: &str, line: usize) -> Result<(), ValidationError> {
    if FORBIDDEN_NAMES.contains(&name) {
        return Err(ValidationError::ForbiddenName {
            name: name.to_owned(),
            line,
        });
    }
    Ok(())
}

fn attribute(attr: &str, line: usize) -> Result<(), ValidationError> {
    if attr.starts_with('_') {
        return Err(ValidationError::PrivateAttribute {
            attr: attr.to_owned(),
            line,
        });
    }
    Ok(())
}

fn target(t: &Target) -> Result<(), ValidationError> {
    match t {
        Target::Name(n, line) => name(n, *line),
        Target::Subscript { value, index } => {
            expr(value)?;
            expr(index)
        }
        Target::Attribute { value, attr } => {
            attribute(attr, value.line)?;
            expr(value)
        }
        Target::Tuple(items) => items.iter().try_for_each(target),
    }
}

fn comprehension(c: &Comprehension) -> Result<(), ValidationError> {
    target(&c.target)?;
    expr(&c.iter)?;
    c.ifs.iter().try_for_each(expr)
}

fn expr(e: &Expr) -> Result<(), ValidationError> {
    let line = e.line;
    match &e.kind {
        ExprKind::Const(_) => Ok(()),
        ExprKind::Name(n) => name(n, line),
        ExprKind::FString(parts) => parts.iter().try_for_each(|part| match part {
            FPart::Lit(_) => Ok(()),
            FPart::Expr { expr: inner, .. } => expr(inner),
        }),
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
            items.iter().try_for_each(expr)
        }
        ExprKind::Dict(entries) => entries.iter().try_for_each(|(k, v)| {
            expr(k)?;
            expr(v)
        }),
        ExprKind::ListComp { elt, generators } => {
            expr(elt)?;
            generators.iter().try_for_each(comprehension)
        }
        ExprKind::Attribute { value, attr } => {
            attribute(attr, line)?;
            expr(value)
        }
        ExprKind::Subscript { value, index } => {
            expr(value)?;
            expr(index)
        }
        ExprKind::Slice { lower, upper, step } => [lower, upper, step]
            .into_iter()
            .flatten()
            .try_for_each(|e| expr(e)),
        ExprKind::Call { func, args, kwargs } => {
            if let ExprKind::Name(callee) = &func.kind {
                if FORBIDDEN_CALLS.contains(&callee.as_str()) {
                    return Err(ValidationError::ForbiddenCall {
                        name: callee.clone(),
                        line,
                    });
                }
            }
            expr(func)?;
            args.iter().try_for_each(expr)?;
            kwargs.iter().try_for_each(|(_, v)| expr(v))
        }
        ExprKind::BinOp { left, right, .. } | ExprKind::And(left, right) | ExprKind::Or(left, right) => {
            expr(left)?;
            expr(right)
        }
        ExprKind::Unary { operand, .. } => expr(operand),
        ExprKind::Compare { left, ops } => {
            expr(left)?;
            ops.iter().try_for_each(|(_, e)| expr(e))
        }
        ExprKind::IfExp { test, body, orelse } => {
            expr(test)?;
            expr(body)?;
            expr(orelse)
        }
    }
}
