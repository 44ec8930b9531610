use std::rc::Rc;

use super::ast::{
    BinOp, CmpOp, Comprehension, Constant, Expr, ExprKind, FPart, FunctionDef, Param, Stmt,
    StmtKind, Target, UnaryOp,
};
use super::error::ValidationError;
use super::lexer::{self, Spanned, Tok};

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Statements outside the sandbox instruction set.
const UNSUPPORTED: &[&str] = &[
    "class", "try", "except", "finally", "with", "assert", "async", "await", "yield", "lambda",
];

/// Bound on expression and block nesting while parsing.
const MAX_NESTING: usize = 100;

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Parse script source into a statement list.
pub(crate) fn parse_program(src: &str) -> Result<Vec<Stmt>, ValidationError> {
    let mut parser = Parser {
        tokens: lexer::tokenize(src)?,
        pos: 0,
        loops: 0,
        functions: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while parser.peek() != &Tok::Eof {
        body.extend(parser.statement()?);
    }
    Ok(body)
}

/// Parse an expression embedded in an f-string found on `line`.
fn parse_embedded(src: &str, line: usize) -> Result<Expr, ValidationError> {
    let src = src.trim();
    if src.is_empty() {
        return Err(ValidationError::syntax(line, "f-string: empty expression not allowed"));
    }
    let tokens = lexer::tokenize(src)
        .map_err(|_| ValidationError::syntax(line, "f-string: invalid expression"))?
        .into_iter()
        .map(|t| Spanned {
            line: line + t.line - 1,
            ..t
        })
        .collect();
    let mut parser = Parser {
        tokens,
        pos: 0,
        loops: 0,
        functions: 0,
        depth: 0,
    };
    let expr = parser.testlist()?;
    if parser.peek() == &Tok::Newline {
        parser.bump();
    }
    if parser.peek() != &Tok::Eof {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{n}'"),
        Tok::Int(_) | Tok::Float(_) => "number".to_owned(),
        Tok::Str(_) | Tok::FStr(_) => "string".to_owned(),
        Tok::Op(o) => format!("'{o}'"),
        Tok::Newline => "end of line".to_owned(),
        Tok::Indent => "indent".to_owned(),
        Tok::Dedent => "dedent".to_owned(),
        Tok::Eof => "end of input".to_owned(),
    }
}

fn to_target(expr: Expr) -> Result<Target, ValidationError> {
    let line = expr.line;
    match expr.kind {
        ExprKind::Name(name) => Ok(Target::Name(name, line)),
        ExprKind::Subscript { value, index } => Ok(Target::Subscript {
            value: *value,
            index: *index,
        }),
        ExprKind::Attribute { value, attr } => Ok(Target::Attribute {
            value: *value,
            attr,
        }),
        ExprKind::Tuple(items) | ExprKind::List(items) => Ok(Target::Tuple(
            items.into_iter().map(to_target).collect::<Result<_, _>>()?,
        )),
        _ => Err(ValidationError::syntax(line, "cannot assign to expression")),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    loops: usize,
    functions: usize,
    depth: usize,
}

impl Parser {
    // The lexer always terminates the stream with Eof and `bump` never moves past it.
    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).map_or(&Tok::Eof, |t| &t.tok)
    }

    fn peek_at(&self, n: usize) -> &Tok {
        self.tokens.get(self.pos + n).map_or(&Tok::Eof, |t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn bump(&mut self) -> Tok {
        let tok = self.peek().clone();
        if tok != Tok::Eof {
            self.pos += 1;
        }
        tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let found = self.at_op(op);
        if found {
            self.pos += 1;
        }
        found
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        let found = self.at_kw(kw);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ValidationError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}', found {}", describe(self.peek()))))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), ValidationError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}', found {}", describe(self.peek()))))
        }
    }

    fn error(&self, message: impl Into<String>) -> ValidationError {
        ValidationError::syntax(self.line(), message)
    }

    fn unexpected(&self) -> ValidationError {
        self.error(format!("unexpected {}", describe(self.peek())))
    }

    fn name(&mut self) -> Result<String, ValidationError> {
        match self.peek() {
            Tok::Name(n) if !is_keyword(n) => {
                let name = n.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn dotted_name(&mut self) -> Result<String, ValidationError> {
        let mut name = String::new();
        while self.eat_op(".") {
            name.push('.');
        }
        if !self.at_kw("import") {
            name.push_str(&self.name()?);
            while self.eat_op(".") {
                name.push('.');
                name.push_str(&self.name()?);
            }
        }
        Ok(name)
    }

    fn at_simple_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.at_op(";")
    }

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => {
                !is_keyword(n) || matches!(n.as_str(), "not" | "None" | "True" | "False" | "lambda")
            }
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(o) => matches!(*o, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    // -- Statements ---------------------------------------------------------

    fn statement(&mut self) -> Result<Vec<Stmt>, ValidationError> {
        let keyword = match self.peek() {
            Tok::Name(n) => n.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "if" => return Ok(vec![self.if_stmt()?]),
            "while" => return Ok(vec![self.while_stmt()?]),
            "for" => return Ok(vec![self.for_stmt()?]),
            "def" => return Ok(vec![self.def_stmt()?]),
            kw if UNSUPPORTED.contains(&kw) => {
                return Err(self.error(format!("unsupported statement '{kw}'")));
            }
            _ => {}
        }
        if self.peek() == &Tok::Indent {
            return Err(self.error("unexpected indent"));
        }
        self.simple_statements()
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>, ValidationError> {
        let mut stmts = vec![self.small_statement()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            stmts.push(self.small_statement()?);
        }
        match self.peek() {
            Tok::Newline => {
                self.bump();
                Ok(stmts)
            }
            Tok::Eof => Ok(stmts),
            _ => Err(self.unexpected()),
        }
    }

    fn small_statement(&mut self) -> Result<Stmt, ValidationError> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Name(n) => n.clone(),
            _ => String::new(),
        };
        let kind = match keyword.as_str() {
            "pass" => {
                self.bump();
                StmtKind::Pass
            }
            "break" | "continue" => {
                if self.loops == 0 {
                    return Err(self.error(format!("'{keyword}' outside loop")));
                }
                self.bump();
                if keyword == "break" {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            "return" => {
                if self.functions == 0 {
                    return Err(self.error("'return' outside function"));
                }
                self.bump();
                if self.at_simple_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist()?))
                }
            }
            "raise" => {
                self.bump();
                if self.at_simple_end() {
                    StmtKind::Raise(None)
                } else {
                    StmtKind::Raise(Some(self.test()?))
                }
            }
            "import" => {
                self.bump();
                let mut names = vec![self.dotted_name()?];
                if self.eat_kw("as") {
                    self.name()?;
                }
                while self.eat_op(",") {
                    names.push(self.dotted_name()?);
                    if self.eat_kw("as") {
                        self.name()?;
                    }
                }
                StmtKind::Import(names)
            }
            "from" => {
                self.bump();
                let module = self.dotted_name()?;
                self.expect_kw("import")?;
                if !self.eat_op("*") {
                    let parenthesized = self.eat_op("(");
                    loop {
                        self.name()?;
                        if self.eat_kw("as") {
                            self.name()?;
                        }
                        if !self.eat_op(",") || (parenthesized && self.at_op(")")) {
                            break;
                        }
                    }
                    if parenthesized {
                        self.expect_op(")")?;
                    }
                }
                StmtKind::ImportFrom(module)
            }
            "del" => {
                self.bump();
                let target = self.testlist()?;
                match target.kind {
                    ExprKind::Tuple(items) => StmtKind::Delete(items),
                    _ => StmtKind::Delete(vec![target]),
                }
            }
            "global" | "nonlocal" => {
                self.bump();
                let mut names = vec![self.name()?];
                while self.eat_op(",") {
                    names.push(self.name()?);
                }
                if keyword == "global" {
                    StmtKind::Global(names)
                } else {
                    StmtKind::Nonlocal(names)
                }
            }
            _ => self.expr_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn aug_op(&self) -> Option<BinOp> {
        let Tok::Op(op) = self.peek() else {
            return None;
        };
        Some(match *op {
            "+=" => BinOp::Add,
            "-=" => BinOp::Sub,
            "*=" => BinOp::Mul,
            "/=" => BinOp::Div,
            "//=" => BinOp::FloorDiv,
            "%=" => BinOp::Mod,
            "**=" => BinOp::Pow,
            _ => return None,
        })
    }

    fn expr_statement(&mut self) -> Result<StmtKind, ValidationError> {
        let first = self.testlist()?;
        if let Some(op) = self.aug_op() {
            self.bump();
            let target = to_target(first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }
        if !self.at_op("=") {
            return Ok(StmtKind::Expr(first));
        }
        let mut exprs = vec![first];
        while self.eat_op("=") {
            exprs.push(self.testlist()?);
        }
        let value = exprs.pop().ok_or_else(|| self.unexpected())?;
        let targets = exprs
            .into_iter()
            .map(to_target)
            .collect::<Result<_, _>>()?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ValidationError>,
    ) -> Result<T, ValidationError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("too many nested expressions or blocks"));
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ValidationError> {
        self.nested(Self::block_inner)
    }

    fn block_inner(&mut self) -> Result<Vec<Stmt>, ValidationError> {
        self.expect_op(":")?;
        if self.peek() != &Tok::Newline {
            return self.simple_statements();
        }
        self.bump();
        if self.peek() != &Tok::Indent {
            return Err(self.error("expected an indented block"));
        }
        self.bump();
        let mut body = Vec::new();
        while !matches!(self.peek(), Tok::Dedent | Tok::Eof) {
            body.extend(self.statement()?);
        }
        if self.peek() == &Tok::Dedent {
            self.bump();
        }
        Ok(body)
    }

    fn if_stmt(&mut self) -> Result<Stmt, ValidationError> {
        let line = self.line();
        self.bump();
        let test = self.test()?;
        let mut branches = vec![(test, self.block()?)];
        while self.eat_kw("elif") {
            let test = self.test()?;
            branches.push((test, self.block()?));
        }
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn loop_body(&mut self) -> Result<Vec<Stmt>, ValidationError> {
        self.loops += 1;
        let body = self.block();
        self.loops -= 1;
        body
    }

    fn no_loop_else(&self) -> Result<(), ValidationError> {
        if self.at_kw("else") {
            return Err(self.error("'else' after a loop is not supported"));
        }
        Ok(())
    }

    fn while_stmt(&mut self) -> Result<Stmt, ValidationError> {
        let line = self.line();
        self.bump();
        let test = self.test()?;
        let body = self.loop_body()?;
        self.no_loop_else()?;
        Ok(Stmt {
            kind: StmtKind::While { test, body },
            line,
        })
    }

    fn for_stmt(&mut self) -> Result<Stmt, ValidationError> {
        let line = self.line();
        self.bump();
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.loop_body()?;
        self.no_loop_else()?;
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line,
        })
    }

    fn def_stmt(&mut self) -> Result<Stmt, ValidationError> {
        let line = self.line();
        self.bump();
        let name = self.name()?;
        self.expect_op("(")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.at_op(")") {
            if self.at_op("*") || self.at_op("**") {
                return Err(self.error("variadic parameters are not supported"));
            }
            let param = self.name()?;
            if params.iter().any(|p| p.name == param) {
                return Err(self.error(format!("duplicate argument '{param}' in function definition")));
            }
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        let enclosing_loops = std::mem::take(&mut self.loops);
        self.functions += 1;
        let body = self.block();
        self.functions -= 1;
        self.loops = enclosing_loops;
        let body = body?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
                name,
                params,
                body,
                line,
            })),
            line,
        })
    }

    fn target_list(&mut self) -> Result<Target, ValidationError> {
        let first = self.arith()?;
        if !self.at_op(",") {
            return to_target(first);
        }
        let mut items = vec![to_target(first)?];
        while self.eat_op(",") {
            if self.at_kw("in") {
                break;
            }
            items.push(to_target(self.arith()?)?);
        }
        Ok(Target::Tuple(items))
    }

    // -- Expressions --------------------------------------------------------

    fn testlist(&mut self) -> Result<Expr, ValidationError> {
        let line = self.line();
        let first = self.test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn test(&mut self) -> Result<Expr, ValidationError> {
        self.nested(Self::test_inner)
    }

    fn test_inner(&mut self) -> Result<Expr, ValidationError> {
        let line = self.line();
        let body = self.or_test()?;
        if !self.eat_kw("if") {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_kw("else")?;
        let orelse = self.test()?;
        Ok(Expr::new(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            line,
        ))
    }

    fn or_test(&mut self) -> Result<Expr, ValidationError> {
        let mut left = self.and_test()?;
        while self.at_kw("or") {
            let line = self.line();
            self.bump();
            let right = self.and_test()?;
            left = Expr::new(ExprKind::Or(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, ValidationError> {
        let mut left = self.not_test()?;
        while self.at_kw("and") {
            let line = self.line();
            self.bump();
            let right = self.not_test()?;
            left = Expr::new(ExprKind::And(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, ValidationError> {
        let line = self.line();
        if self.eat_kw("not") {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                line,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ValidationError> {
        let line = self.line();
        let left = self.arith()?;
        let mut ops = Vec::new();
        while let Some((op, width)) = self.compare_op() {
            self.pos += width;
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            line,
        ))
    }

    /// The comparison operator at the cursor and how many tokens it spans.
    fn compare_op(&self) -> Option<(CmpOp, usize)> {
        let next_is = |kw: &str| matches!(self.peek_at(1), Tok::Name(n) if n == kw);
        Some(match self.peek() {
            Tok::Op("==") => (CmpOp::Eq, 1),
            Tok::Op("!=") => (CmpOp::NotEq, 1),
            Tok::Op("<") => (CmpOp::Lt, 1),
            Tok::Op("<=") => (CmpOp::LtE, 1),
            Tok::Op(">") => (CmpOp::Gt, 1),
            Tok::Op(">=") => (CmpOp::GtE, 1),
            Tok::Name(n) if n == "in" => (CmpOp::In, 1),
            Tok::Name(n) if n == "not" && next_is("in") => (CmpOp::NotIn, 2),
            Tok::Name(n) if n == "is" && next_is("not") => (CmpOp::IsNot, 2),
            Tok::Name(n) if n == "is" => (CmpOp::Is, 1),
            _ => return None,
        })
    }

    fn arith(&mut self) -> Result<Expr, ValidationError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.bump();
            let right = self.term()?;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ValidationError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            let line = self.line();
            self.bump();
            let right = self.factor()?;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ValidationError> {
        let line = self.line();
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.bump();
        let operand = self.nested(Self::factor)?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line,
        ))
    }

    fn power(&mut self) -> Result<Expr, ValidationError> {
        let base = self.primary()?;
        if !self.at_op("**") {
            return Ok(base);
        }
        let line = self.line();
        self.bump();
        let exponent = self.factor()?;
        Ok(Expr::new(
            ExprKind::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            },
            line,
        ))
    }

    fn primary(&mut self) -> Result<Expr, ValidationError> {
        let mut expr = self.atom()?;
        loop {
            let line = self.line();
            if self.eat_op("(") {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    },
                    line,
                );
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            } else if self.eat_op(".") {
                let attr = self.name()?;
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    line,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ValidationError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at_op(")") {
            if self.at_op("*") || self.at_op("**") {
                return Err(self.error("argument unpacking is not supported"));
            }
            let is_keyword_arg = matches!(self.peek(), Tok::Name(n) if !is_keyword(n))
                && matches!(self.peek_at(1), Tok::Op("="));
            if is_keyword_arg {
                let name = self.name()?;
                self.bump();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let line = self.line();
                let mut arg = self.test()?;
                if self.at_kw("for") {
                    let generators = self.comp_for()?;
                    arg = Expr::new(
                        ExprKind::ListComp {
                            elt: Box::new(arg),
                            generators,
                        },
                        line,
                    );
                }
                args.push(arg);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> Result<Expr, ValidationError> {
        let line = self.line();
        let lower = if self.at_op(":") {
            None
        } else {
            let index = self.testlist()?;
            if !self.at_op(":") {
                return Ok(index);
            }
            Some(Box::new(index))
        };
        self.expect_op(":")?;
        let upper = if self.at_op(":") || self.at_op("]") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !self.at_op("]") {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, line))
    }

    fn comp_for(&mut self) -> Result<Vec<Comprehension>, ValidationError> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    /// Comma-separated items up to `close`, after `first` has been parsed.
    fn rest_of_items(&mut self, first: Expr, close: &str) -> Result<Vec<Expr>, ValidationError> {
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(close) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op(close)?;
        Ok(items)
    }

    fn atom(&mut self) -> Result<Expr, ValidationError> {
        let line = self.line();
        if let Tok::Name(n) = self.peek() {
            if is_keyword(n) && !matches!(n.as_str(), "None" | "True" | "False") {
                return Err(if UNSUPPORTED.contains(&n.as_str()) {
                    self.error(format!("unsupported expression '{n}'"))
                } else {
                    self.unexpected()
                });
            }
        }
        let kind = match self.bump() {
            Tok::Int(i) => ExprKind::Const(Constant::Int(i)),
            Tok::Float(f) => ExprKind::Const(Constant::Float(f)),
            Tok::Str(mut s) => {
                while let Tok::Str(next) = self.peek() {
                    s.push_str(next);
                    self.pos += 1;
                }
                ExprKind::Const(Constant::Str(s))
            }
            Tok::FStr(body) => ExprKind::FString(fstring_parts(&body, line)?),
            Tok::Name(n) => match n.as_str() {
                "None" => ExprKind::Const(Constant::None),
                "True" => ExprKind::Const(Constant::Bool(true)),
                "False" => ExprKind::Const(Constant::Bool(false)),
                _ => ExprKind::Name(n),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let first = self.test()?;
                    if self.at_kw("for") {
                        let generators = self.comp_for()?;
                        self.expect_op(")")?;
                        ExprKind::ListComp {
                            elt: Box::new(first),
                            generators,
                        }
                    } else if self.at_op(",") {
                        ExprKind::Tuple(self.rest_of_items(first, ")")?)
                    } else {
                        self.expect_op(")")?;
                        return Ok(first);
                    }
                }
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    ExprKind::List(Vec::new())
                } else {
                    let first = self.test()?;
                    if self.at_kw("for") {
                        let generators = self.comp_for()?;
                        self.expect_op("]")?;
                        ExprKind::ListComp {
                            elt: Box::new(first),
                            generators,
                        }
                    } else {
                        ExprKind::List(self.rest_of_items(first, "]")?)
                    }
                }
            }
            Tok::Op("{") => {
                if self.eat_op("}") {
                    ExprKind::Dict(Vec::new())
                } else {
                    let first = self.test()?;
                    if self.eat_op(":") {
                        let value = self.test()?;
                        if self.at_kw("for") {
                            return Err(self.error("dict comprehensions are not supported"));
                        }
                        let mut entries = vec![(first, value)];
                        while self.eat_op(",") {
                            if self.at_op("}") {
                                break;
                            }
                            let key = self.test()?;
                            self.expect_op(":")?;
                            entries.push((key, self.test()?));
                        }
                        self.expect_op("}")?;
                        ExprKind::Dict(entries)
                    } else {
                        ExprKind::Set(self.rest_of_items(first, "}")?)
                    }
                }
            }
            other => {
                return Err(ValidationError::syntax(
                    line,
                    format!("unexpected {}", describe(&other)),
                ));
            }
        };
        Ok(Expr::new(kind, line))
    }
}

/// Split an f-string body into literal text and embedded expressions.
fn fstring_parts(body: &str, line: usize) -> Result<Vec<FPart>, ValidationError> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '{' if next == Some('{') => {
                literal.push('{');
                i += 2;
            }
            '}' if next == Some('}') => {
                literal.push('}');
                i += 2;
            }
            '}' => {
                return Err(ValidationError::syntax(
                    line,
                    "f-string: single '}' is not allowed",
                ));
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(FPart::Lit(std::mem::take(&mut literal)));
                }
                let (part, end) = fstring_field(&chars, i, line)?;
                parts.push(part);
                i = end + 1;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(FPart::Lit(literal));
    }
    Ok(parts)
}

/// Parse the replacement field opening at `open`; returns the part and the
/// index of its closing brace.
fn fstring_field(chars: &[char], open: usize, line: usize) -> Result<(FPart, usize), ValidationError> {
    let mut depth = 0_usize;
    let mut quote: Option<char> = None;
    let mut bang = None;
    let mut colon = None;
    let mut j = open + 1;

    let close = loop {
        let Some(&c) = chars.get(j) else {
            return Err(ValidationError::syntax(line, "f-string: expecting '}'"));
        };
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth == 0 => break j,
                '}' => depth -= 1,
                '!' if depth == 0 && colon.is_none() && chars.get(j + 1) != Some(&'=') => {
                    bang = Some(j);
                }
                ':' if depth == 0 && colon.is_none() => colon = Some(j),
                _ => {}
            },
        }
        j += 1;
    };

    let expr_end = bang.or(colon).unwrap_or(close);
    let source: String = chars[open + 1..expr_end].iter().collect();
    let repr = match bang {
        Some(b) => {
            let conversion: String = chars[b + 1..colon.unwrap_or(close)].iter().collect();
            match conversion.as_str() {
                "r" => true,
                "s" => false,
                _ => {
                    return Err(ValidationError::syntax(
                        line,
                        format!("f-string: invalid conversion character '{conversion}'"),
                    ));
                }
            }
        }
        None => false,
    };
    let spec = colon.map(|c| chars[c + 1..close].iter().collect::<String>());
    let expr = parse_embedded(&source, line)?;
    Ok((FPart::Expr { expr, repr, spec }, close))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Vec<Stmt> {
        parse_program(src).unwrap()
    }

    fn syntax_message(src: &str) -> String {
        match parse_program(src) {
            Err(ValidationError::Syntax { message, .. }) => message,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn function_with_defaults() {
        let program = parse_ok("def f(a, b=2):\n    return a + b\n");
        let StmtKind::FunctionDef(def) = &program[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].default.is_some());
    }

    #[test]
    fn if_elif_else() {
        let program = parse_ok("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let StmtKind::If { branches, orelse } = &program[0].kind else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(orelse.len(), 1);
    }

    #[test]
    fn chained_comparison_and_membership() {
        let program = parse_ok("x = 1 < y <= 3 and z not in items and w is not None\n");
        assert!(matches!(program[0].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn comprehension_and_generator_argument() {
        parse_ok("xs = [x * 2 for x in range(10) if x % 2 == 0]\n");
        parse_ok("total = sum(x for x in xs)\n");
        parse_ok("pairs = [(k, v) for k, v in d.items()]\n");
    }

    #[test]
    fn literals() {
        parse_ok("d = {'a': [1, 2.5, (3,)], 'b': {1, 2}, 'c': None}\n");
        parse_ok("s = 'con' 'cat'\n");
        parse_ok("t = x[1:], x[:2], x[::2], x[-1]\n");
    }

    #[test]
    fn fstring_fields() {
        let program = parse_ok("m = f\"{user['username']}: {n:.2f} {{ok}} {v!r}\"\n");
        let StmtKind::Assign { value, .. } = &program[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::FString(parts) = &value.kind else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 5);
        assert!(matches!(&parts[2], FPart::Expr { spec: Some(s), .. } if s == ".2f"));
        assert!(matches!(&parts[3], FPart::Lit(s) if s == " {ok} "));
        assert!(matches!(&parts[4], FPart::Expr { repr: true, .. }));
    }

    #[test]
    fn forbidden_statements_still_parse() {
        let program = parse_ok("import os, sys as s\nfrom a.b import (c, d)\ndel x\nglobal g\n");
        assert!(matches!(program[0].kind, StmtKind::Import(ref n) if n == &["os", "sys"]));
        assert!(matches!(program[1].kind, StmtKind::ImportFrom(ref m) if m == "a.b"));
        assert!(matches!(program[2].kind, StmtKind::Delete(_)));
        assert!(matches!(program[3].kind, StmtKind::Global(_)));
    }

    #[test]
    fn nested_import_parses_inside_function() {
        let program = parse_ok("def apply():\n    if True:\n        import os\n    return 1\n");
        assert_eq!(program.len(), 1);
    }

    #[test]
    fn unsupported_constructs() {
        assert_eq!(syntax_message("class A:\n    pass\n"), "unsupported statement 'class'");
        assert_eq!(syntax_message("f = lambda: 1\n"), "unsupported expression 'lambda'");
        assert!(syntax_message("while x:\n    pass\nelse:\n    pass\n").contains("'else'"));
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(syntax_message("1 = x\n"), "cannot assign to expression");
        assert_eq!(syntax_message("def f(a=1, b):\n    pass\n"), "non-default argument follows default argument");
        assert!(syntax_message("def apply()\n    pass\n").starts_with("expected ':'"));
        assert_eq!(syntax_message("if x:\nreturn 1\n"), "expected an indented block");
        assert_eq!(syntax_message("x = f'{}'\n"), "f-string: empty expression not allowed");
        assert_eq!(syntax_message("return 1\n"), "'return' outside function");
        assert_eq!(syntax_message("def f():\n    break\n"), "'break' outside loop");
        let deep = format!("x = {}1{}\n", "(".repeat(150), ")".repeat(150));
        assert_eq!(syntax_message(&deep), "too many nested expressions or blocks");
        parse_ok("def f():\n    for x in xs:\n        if x:\n            continue\n        return x\n");
    }
}
