//! Shared helpers for building untyped ASTs by hand, standing in for the
//! external parser.

#![allow(dead_code)]

use silex::ast::*;
use silex::error::SourceLoc;
use silex::types::Const;
use silex::{CompileError, Context, OptFlags, Options};

pub fn loc() -> SourceLoc {
    SourceLoc::new(1)
}

pub fn e(kind: ExprKind) -> Expr {
    Expr::new(kind, loc())
}

pub fn int(v: i32) -> Expr {
    e(ExprKind::Constant(Const::Int(v)))
}

pub fn long(v: i64) -> Expr {
    e(ExprKind::Constant(Const::Long(v)))
}

pub fn uint(v: u32) -> Expr {
    e(ExprKind::Constant(Const::UInt(v)))
}

pub fn ulong(v: u64) -> Expr {
    e(ExprKind::Constant(Const::ULong(v)))
}

pub fn dbl(v: f64) -> Expr {
    e(ExprKind::Constant(Const::Double(v)))
}

pub fn var(name: &str) -> Expr {
    e(ExprKind::Var(name.to_string()))
}

pub fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    e(ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn assign(lhs: Expr, rhs: Expr) -> Expr {
    e(ExprKind::Assignment {
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn cast(target: TypeSpec, expr: Expr) -> Expr {
    e(ExprKind::Cast {
        target,
        expr: Box::new(expr),
    })
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    e(ExprKind::Call {
        name: name.to_string(),
        args,
    })
}

pub fn ret(value: Expr) -> Statement {
    Statement::Return(Some(value), loc())
}

pub fn expr_stmt(value: Expr) -> Statement {
    Statement::Expression(value)
}

/// A local declaration with an optional initializer.
pub fn local(name: &str, ty: TypeSpec, init: Option<Expr>) -> BlockItem {
    BlockItem::Decl(Declaration::Var(VarDecl {
        name: name.to_string(),
        ty,
        init: init.map(Initializer::Single),
        storage: None,
        loc: loc(),
    }))
}

pub fn stmt(s: Statement) -> BlockItem {
    BlockItem::Stmt(s)
}

/// A function definition.
pub fn fun_def(
    name: &str,
    params: Vec<(&str, TypeSpec)>,
    ret_ty: TypeSpec,
    items: Vec<BlockItem>,
) -> Declaration {
    let (names, tys): (Vec<_>, Vec<_>) = params
        .into_iter()
        .map(|(n, t)| (n.to_string(), t))
        .unzip();
    Declaration::Fun(FunDecl {
        name: name.to_string(),
        params: names,
        ty: TypeSpec::Function {
            params: tys,
            ret: Box::new(ret_ty),
        },
        body: Some(Block { items }),
        storage: None,
        loc: loc(),
    })
}

/// A program whose `main` holds the given items.
pub fn main_program(items: Vec<BlockItem>) -> Program {
    Program {
        decls: vec![fun_def("main", vec![], TypeSpec::Int, items)],
    }
}

pub fn linux_options(opt: OptFlags) -> Options {
    let mut options = Options::new(
        "x86_64-unknown-linux-gnu"
            .parse()
            .expect("valid target triple"),
    );
    options.opt = opt;
    options
}

pub fn compile_with(program: &Program, opt: OptFlags) -> Result<String, CompileError> {
    let mut ctx = Context::new(linux_options(opt));
    ctx.compile(program)
}

pub fn compile(program: &Program) -> Result<String, CompileError> {
    compile_with(program, OptFlags::all())
}
