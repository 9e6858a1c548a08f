//! Type checking of statements and expressions.
//!
//! Every expression is rebuilt with its result type attached. Implicit
//! conversions (integer promotions, the usual arithmetic conversions, array
//! decay, assignment conversions) become explicit `Cast` nodes so that later
//! stages never have to rediscover them.

use super::{Analyzer, Breakable, SwitchFrame};
use crate::ast::{self, BinaryOp, UnaryOp};
use crate::error::{CompileResult, ErrorKind, SourceLoc};
use crate::sema::consteval;
use crate::sema::typed::{self, Expr, ExprKind};
use crate::types::{common_type, Const, Type};

impl Analyzer<'_> {
    /// Check a compound statement, opening a scope.
    pub(super) fn check_block(&mut self, block: &ast::Block) -> CompileResult<typed::Block> {
        self.vars.push_scope();
        self.tags.push_scope();
        let result = self.check_block_items(&block.items);
        self.vars.pop_scope();
        self.tags.pop_scope();
        result
    }

    /// Check a sequence of block items in the current scope.
    pub(super) fn check_block_items(
        &mut self,
        items: &[ast::BlockItem],
    ) -> CompileResult<typed::Block> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ast::BlockItem::Decl(ast::Declaration::Var(d)) => {
                    if let Some(def) = self.block_scope_var(d)? {
                        out.push(typed::BlockItem::Decl(def));
                    }
                }
                ast::BlockItem::Decl(ast::Declaration::Fun(d)) => {
                    self.fun_decl(d, true)?;
                }
                ast::BlockItem::Decl(ast::Declaration::Struct(d)) => {
                    self.struct_decl(d)?;
                }
                ast::BlockItem::Stmt(s) => {
                    out.push(typed::BlockItem::Stmt(self.check_statement(s)?));
                }
            }
        }
        Ok(typed::Block { items: out })
    }

    pub(super) fn check_statement(&mut self, s: &ast::Statement) -> CompileResult<typed::Statement> {
        use ast::Statement as S;
        Ok(match s {
            S::Return(value, loc) => {
                let ret = self
                    .current_ret
                    .clone()
                    .expect("return statement outside a function body");
                match (value, ret) {
                    (None, Type::Void) => typed::Statement::Return(None),
                    (Some(_), Type::Void) => {
                        return self.err(
                            ErrorKind::TypeMismatch,
                            *loc,
                            "returning a value from a void function",
                        );
                    }
                    (None, _) => {
                        return self.err(
                            ErrorKind::TypeMismatch,
                            *loc,
                            "return without a value in a non-void function",
                        );
                    }
                    (Some(e), ret) => {
                        let e = self.check_and_convert(e)?;
                        let e = self.convert_by_assignment(e, &ret, *loc)?;
                        typed::Statement::Return(Some(e))
                    }
                }
            }
            S::Expression(e) => typed::Statement::Expression(self.check_and_convert(e)?),
            S::If {
                cond,
                then,
                otherwise,
            } => typed::Statement::If {
                cond: self.cond_expr(cond)?,
                then: Box::new(self.check_statement(then)?),
                otherwise: match otherwise {
                    Some(s) => Some(Box::new(self.check_statement(s)?)),
                    None => None,
                },
            },
            S::Compound(b) => typed::Statement::Compound(self.check_block(b)?),
            S::Break(loc) => match self.breakable.last() {
                Some(Breakable::Loop(id)) => typed::Statement::Break(*id),
                Some(Breakable::Switch(f)) => typed::Statement::Break(f.id),
                None => {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        *loc,
                        "break statement outside a loop or switch",
                    );
                }
            },
            S::Continue(loc) => {
                let id = self.breakable.iter().rev().find_map(|b| match b {
                    Breakable::Loop(id) => Some(*id),
                    Breakable::Switch(_) => None,
                });
                match id {
                    Some(id) => typed::Statement::Continue(id),
                    None => {
                        return self.err(
                            ErrorKind::TypeMismatch,
                            *loc,
                            "continue statement outside a loop",
                        );
                    }
                }
            }
            S::While { cond, body } => {
                let cond = self.cond_expr(cond)?;
                let id = self.fresh_loop();
                self.breakable.push(Breakable::Loop(id));
                let body = self.check_statement(body)?;
                self.breakable.pop();
                typed::Statement::While {
                    cond,
                    body: Box::new(body),
                    id,
                }
            }
            S::DoWhile { body, cond } => {
                let id = self.fresh_loop();
                self.breakable.push(Breakable::Loop(id));
                let body = self.check_statement(body)?;
                self.breakable.pop();
                let cond = self.cond_expr(cond)?;
                typed::Statement::DoWhile {
                    body: Box::new(body),
                    cond,
                    id,
                }
            }
            S::For {
                init,
                cond,
                post,
                body,
            } => {
                self.vars.push_scope();
                self.tags.push_scope();
                let result = (|| {
                    let init = match init {
                        ast::ForInit::Decl(vd) => {
                            if vd.storage.is_some() {
                                return self.err(
                                    ErrorKind::TypeMismatch,
                                    vd.loc,
                                    "storage class not permitted in a for-loop declaration",
                                );
                            }
                            self.block_scope_var(vd)?.map(typed::ForInit::Decl)
                        }
                        ast::ForInit::Expr(Some(e)) => {
                            Some(typed::ForInit::Expr(self.check_and_convert(e)?))
                        }
                        ast::ForInit::Expr(None) => None,
                    };
                    let cond = match cond {
                        Some(c) => Some(self.cond_expr(c)?),
                        None => None,
                    };
                    let post = match post {
                        Some(p) => Some(self.check_and_convert(p)?),
                        None => None,
                    };
                    let id = self.fresh_loop();
                    self.breakable.push(Breakable::Loop(id));
                    let body = self.check_statement(body)?;
                    self.breakable.pop();
                    Ok(typed::Statement::For {
                        init,
                        cond,
                        post,
                        body: Box::new(body),
                        id,
                    })
                })();
                self.vars.pop_scope();
                self.tags.pop_scope();
                result?
            }
            S::Switch { ctrl, body } => {
                let ctrl = self.check_and_convert(ctrl)?;
                if !ctrl.ty.is_integer() {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        ctrl.loc,
                        "switch controlling expression must have integer type",
                    );
                }
                let ctrl_ty = ctrl.ty.promoted();
                let ctrl = self.convert_to(ctrl, &ctrl_ty);
                let id = self.fresh_loop();
                self.breakable.push(Breakable::Switch(SwitchFrame {
                    id,
                    ctrl_ty,
                    cases: Vec::new(),
                    has_default: false,
                }));
                let body = self.check_statement(body)?;
                let frame = match self.breakable.pop() {
                    Some(Breakable::Switch(f)) => f,
                    _ => panic!("switch frame mismatch"),
                };
                typed::Statement::Switch {
                    ctrl,
                    body: Box::new(body),
                    id,
                    cases: frame.cases,
                    has_default: frame.has_default,
                }
            }
            S::Case { value, body, loc } => {
                let value = self.check_and_convert(value)?;
                if !value.ty.is_integer() {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        *loc,
                        "case value must have integer type",
                    );
                }
                let Some(c) = consteval::fold(&value) else {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        *loc,
                        "case value is not an integer constant expression",
                    );
                };
                let Some(i) = self
                    .breakable
                    .iter()
                    .rposition(|b| matches!(b, Breakable::Switch(_)))
                else {
                    return self.err(ErrorKind::TypeMismatch, *loc, "case label outside a switch");
                };
                let (id, ctrl_ty) = match &self.breakable[i] {
                    Breakable::Switch(f) => (f.id, f.ctrl_ty.clone()),
                    Breakable::Loop(_) => unreachable!(),
                };
                let c = c.convert_to(&ctrl_ty);
                let index = match &mut self.breakable[i] {
                    Breakable::Switch(f) => {
                        if f.cases.contains(&c) {
                            return self.err(
                                ErrorKind::RedeclarationConflict,
                                *loc,
                                format!("duplicate case value {c}"),
                            );
                        }
                        f.cases.push(c);
                        f.cases.len() - 1
                    }
                    Breakable::Loop(_) => unreachable!(),
                };
                let body = self.check_statement(body)?;
                typed::Statement::Case {
                    id,
                    index,
                    body: Box::new(body),
                }
            }
            S::Default { body, loc } => {
                let Some(i) = self
                    .breakable
                    .iter()
                    .rposition(|b| matches!(b, Breakable::Switch(_)))
                else {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        *loc,
                        "default label outside a switch",
                    );
                };
                let id = match &mut self.breakable[i] {
                    Breakable::Switch(f) => {
                        if f.has_default {
                            return self.err(
                                ErrorKind::RedeclarationConflict,
                                *loc,
                                "multiple default labels in one switch",
                            );
                        }
                        f.has_default = true;
                        f.id
                    }
                    Breakable::Loop(_) => unreachable!(),
                };
                let body = self.check_statement(body)?;
                typed::Statement::Default {
                    id,
                    body: Box::new(body),
                }
            }
            S::Goto(label, loc) => {
                self.gotos.push((label.clone(), *loc));
                typed::Statement::Goto(label.clone())
            }
            S::Labeled { label, body, loc } => {
                if !self.labels.insert(label.clone()) {
                    return self.err(
                        ErrorKind::RedeclarationConflict,
                        *loc,
                        format!("duplicate label `{label}`"),
                    );
                }
                let body = self.check_statement(body)?;
                typed::Statement::Labeled(label.clone(), Box::new(body))
            }
            S::Null => typed::Statement::Null,
        })
    }

    /// Check a controlling expression: converted, and required to be scalar.
    pub(super) fn cond_expr(&mut self, e: &ast::Expr) -> CompileResult<Expr> {
        let t = self.check_and_convert(e)?;
        if !t.ty.is_scalar() {
            return self.err(
                ErrorKind::TypeMismatch,
                t.loc,
                "controlling expression must have scalar type",
            );
        }
        Ok(t)
    }

    /// Check an expression and apply array decay, rejecting values of
    /// incomplete structure type.
    pub(super) fn check_and_convert(&mut self, e: &ast::Expr) -> CompileResult<Expr> {
        let t = self.check_expr(e)?;
        if let Type::Struct(id) = t.ty {
            if self.types.layout(id).is_none() {
                return self.err(
                    ErrorKind::IncompleteType,
                    t.loc,
                    "invalid use of a value with incomplete structure type",
                );
            }
        }
        Ok(decay(t))
    }

    /// Insert a cast to `target` unless `e` already has that type.
    pub(super) fn convert_to(&self, e: Expr, target: &Type) -> Expr {
        if e.ty == *target {
            return e;
        }
        let loc = e.loc;
        Expr::new(
            ExprKind::Cast {
                target: target.clone(),
                expr: Box::new(e),
            },
            target.clone(),
            loc,
        )
    }

    /// Convert `e` to `target` as if by assignment.
    pub(super) fn convert_by_assignment(
        &self,
        e: Expr,
        target: &Type,
        loc: SourceLoc,
    ) -> CompileResult<Expr> {
        if e.ty == *target {
            return Ok(e);
        }
        let ok = (e.ty.is_arithmetic() && target.is_arithmetic())
            || (is_null_pointer_constant(&e) && target.is_pointer())
            || (e.ty == Type::Void.pointer_to() && target.is_pointer())
            || (target == &Type::Void.pointer_to() && e.ty.is_pointer());
        if ok {
            Ok(self.convert_to(e, target))
        } else {
            self.err(
                ErrorKind::TypeMismatch,
                loc,
                format!("cannot convert `{}` to `{}`", e.ty, target),
            )
        }
    }

    fn check_expr(&mut self, e: &ast::Expr) -> CompileResult<Expr> {
        let loc = e.loc;
        match &e.kind {
            ast::ExprKind::Constant(c) => Ok(Expr::new(ExprKind::Constant(*c), c.ty(), loc)),
            ast::ExprKind::String(bytes) => Ok(Expr::new(
                ExprKind::String(bytes.clone()),
                Type::Char.array_of(bytes.len() as u64 + 1),
                loc,
            )),
            ast::ExprKind::Var(name) => {
                let Some(binding) = self.vars.get(name).copied() else {
                    return self.err(
                        ErrorKind::Undeclared,
                        loc,
                        format!("use of undeclared identifier `{name}`"),
                    );
                };
                let ty = self.symbols.ty(binding.sym).clone();
                if matches!(ty, Type::Function(_)) {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        format!("function `{name}` used as a variable"),
                    );
                }
                Ok(Expr::new(ExprKind::Var(binding.sym), ty, loc))
            }
            ast::ExprKind::Cast { target, expr } => {
                let target = self.resolve_type(target, loc)?;
                let inner = self.check_and_convert(expr)?;
                if target == Type::Void {
                    return Ok(Expr::new(
                        ExprKind::Cast {
                            target: Type::Void,
                            expr: Box::new(inner),
                        },
                        Type::Void,
                        loc,
                    ));
                }
                if !target.is_scalar() {
                    return self.err(
                        ErrorKind::InvalidCast,
                        loc,
                        format!("cast to non-scalar type `{target}`"),
                    );
                }
                if !inner.ty.is_scalar() {
                    return self.err(
                        ErrorKind::InvalidCast,
                        loc,
                        format!("cast of non-scalar type `{}`", inner.ty),
                    );
                }
                if (target.is_pointer() && inner.ty == Type::Double)
                    || (target == Type::Double && inner.ty.is_pointer())
                {
                    return self.err(
                        ErrorKind::InvalidCast,
                        loc,
                        "cast between a pointer and a floating type",
                    );
                }
                Ok(Expr::new(
                    ExprKind::Cast {
                        target: target.clone(),
                        expr: Box::new(inner),
                    },
                    target,
                    loc,
                ))
            }
            ast::ExprKind::Unary { op, expr } => self.check_unary(*op, expr, loc),
            ast::ExprKind::IncDec { op, postfix, expr } => {
                let inner = self.check_expr(expr)?;
                if !inner.is_lvalue() || inner.ty.is_array() {
                    return self.err(
                        ErrorKind::NotAnLvalue,
                        loc,
                        "operand of `++`/`--` is not a modifiable lvalue",
                    );
                }
                let ok = inner.ty.is_arithmetic()
                    || matches!(&inner.ty, Type::Pointer(p) if p.is_complete(self.types));
                if !ok {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        format!("cannot increment or decrement `{}`", inner.ty),
                    );
                }
                let ty = inner.ty.clone();
                Ok(Expr::new(
                    ExprKind::IncDec {
                        op: *op,
                        postfix: *postfix,
                        expr: Box::new(inner),
                    },
                    ty,
                    loc,
                ))
            }
            ast::ExprKind::Binary { op, lhs, rhs } => self.check_binary(*op, lhs, rhs, loc),
            ast::ExprKind::Assignment { lhs, rhs } => {
                let l = self.check_and_convert(lhs)?;
                if !l.is_lvalue() {
                    return self.err(
                        ErrorKind::NotAnLvalue,
                        loc,
                        "left side of assignment is not an lvalue",
                    );
                }
                let r = self.check_and_convert(rhs)?;
                let r = self.convert_by_assignment(r, &l.ty, loc)?;
                let ty = l.ty.clone();
                Ok(Expr::new(
                    ExprKind::Assignment {
                        lhs: Box::new(l),
                        rhs: Box::new(r),
                    },
                    ty,
                    loc,
                ))
            }
            ast::ExprKind::CompoundAssignment { op, lhs, rhs } => {
                self.check_compound_assignment(*op, lhs, rhs, loc)
            }
            ast::ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => self.check_conditional(cond, then, otherwise, loc),
            ast::ExprKind::Call { name, args } => {
                let Some(binding) = self.vars.get(name).copied() else {
                    return self.err(
                        ErrorKind::Undeclared,
                        loc,
                        format!("call to undeclared function `{name}`"),
                    );
                };
                let ft = match self.symbols.ty(binding.sym) {
                    Type::Function(ft) => (**ft).clone(),
                    _ => {
                        return self.err(
                            ErrorKind::TypeMismatch,
                            loc,
                            format!("called object `{name}` is not a function"),
                        );
                    }
                };
                if ft.params.len() != args.len() {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        format!(
                            "`{name}` expects {} arguments, got {}",
                            ft.params.len(),
                            args.len()
                        ),
                    );
                }
                if ft.ret != Type::Void && !ft.ret.is_complete(self.types) {
                    return self.err(
                        ErrorKind::IncompleteType,
                        loc,
                        format!("call to `{name}` returning an incomplete type"),
                    );
                }
                let mut targs = Vec::with_capacity(args.len());
                for (arg, pty) in args.iter().zip(&ft.params) {
                    let a = self.check_and_convert(arg)?;
                    targs.push(self.convert_by_assignment(a, pty, loc)?);
                }
                Ok(Expr::new(
                    ExprKind::Call {
                        f: binding.sym,
                        args: targs,
                    },
                    ft.ret.clone(),
                    loc,
                ))
            }
            ast::ExprKind::Subscript { base, index } => {
                let a = self.check_and_convert(base)?;
                let b = self.check_and_convert(index)?;
                let (ptr, idx) = if a.ty.is_pointer() && b.ty.is_integer() {
                    (a, b)
                } else if b.ty.is_pointer() && a.ty.is_integer() {
                    (b, a)
                } else {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "subscript requires a pointer and an integer",
                    );
                };
                let pointee = ptr.ty.pointee().cloned().expect("pointer operand");
                if !pointee.is_complete(self.types) {
                    return self.err(
                        ErrorKind::IncompleteType,
                        loc,
                        "subscript of a pointer to an incomplete type",
                    );
                }
                let idx = self.convert_to(idx, &Type::Long);
                Ok(Expr::new(
                    ExprKind::Subscript {
                        base: Box::new(ptr),
                        index: Box::new(idx),
                    },
                    pointee,
                    loc,
                ))
            }
            ast::ExprKind::SizeOfExpr(inner) => {
                let t = self.check_expr(inner)?;
                if !t.ty.is_complete(self.types) {
                    return self.err(
                        ErrorKind::IncompleteType,
                        loc,
                        "sizeof applied to an incomplete type",
                    );
                }
                let size = t.ty.size(self.types);
                Ok(Expr::new(
                    ExprKind::Constant(Const::ULong(size)),
                    Type::ULong,
                    loc,
                ))
            }
            ast::ExprKind::SizeOfType(spec) => {
                let ty = self.resolve_type(spec, loc)?;
                if !ty.is_complete(self.types) {
                    return self.err(
                        ErrorKind::IncompleteType,
                        loc,
                        "sizeof applied to an incomplete type",
                    );
                }
                let size = ty.size(self.types);
                Ok(Expr::new(
                    ExprKind::Constant(Const::ULong(size)),
                    Type::ULong,
                    loc,
                ))
            }
            ast::ExprKind::Dot { base, member } => {
                let b = self.check_and_convert(base)?;
                let Type::Struct(id) = b.ty else {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        format!("member access on non-structure type `{}`", b.ty),
                    );
                };
                // check_and_convert already rejected incomplete struct values.
                let layout = self.types.layout(id).expect("complete structure");
                let Some(m) = layout.member(member) else {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        format!("`struct {}` has no member `{member}`", self.types.tag(id)),
                    );
                };
                let ty = m.ty.clone();
                Ok(Expr::new(
                    ExprKind::Dot {
                        base: Box::new(b),
                        member: member.clone(),
                    },
                    ty,
                    loc,
                ))
            }
            ast::ExprKind::Arrow { base, member } => {
                let b = self.check_and_convert(base)?;
                let id = match &b.ty {
                    Type::Pointer(p) => match **p {
                        Type::Struct(id) => id,
                        _ => {
                            return self.err(
                                ErrorKind::TypeMismatch,
                                loc,
                                format!("`->` applied to `{}`", b.ty),
                            );
                        }
                    },
                    _ => {
                        return self.err(
                            ErrorKind::TypeMismatch,
                            loc,
                            format!("`->` applied to non-pointer type `{}`", b.ty),
                        );
                    }
                };
                let Some(layout) = self.types.layout(id) else {
                    return self.err(
                        ErrorKind::IncompleteType,
                        loc,
                        "member access through a pointer to an incomplete structure",
                    );
                };
                let Some(m) = layout.member(member) else {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        format!("`struct {}` has no member `{member}`", self.types.tag(id)),
                    );
                };
                let ty = m.ty.clone();
                Ok(Expr::new(
                    ExprKind::Arrow {
                        base: Box::new(b),
                        member: member.clone(),
                    },
                    ty,
                    loc,
                ))
            }
            ast::ExprKind::AddrOf(inner) => {
                let t = self.check_expr(inner)?;
                if !t.is_lvalue() {
                    return self.err(
                        ErrorKind::NotAnLvalue,
                        loc,
                        "cannot take the address of an rvalue",
                    );
                }
                let ty = t.ty.clone().pointer_to();
                Ok(Expr::new(ExprKind::AddrOf(Box::new(t)), ty, loc))
            }
            ast::ExprKind::Deref(inner) => {
                let t = self.check_and_convert(inner)?;
                let pointee = match &t.ty {
                    Type::Pointer(p) => (**p).clone(),
                    _ => {
                        return self.err(
                            ErrorKind::TypeMismatch,
                            loc,
                            format!("dereference of non-pointer type `{}`", t.ty),
                        );
                    }
                };
                if pointee == Type::Void {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "dereference of a void pointer",
                    );
                }
                Ok(Expr::new(ExprKind::Deref(Box::new(t)), pointee, loc))
            }
            ast::ExprKind::Comma { lhs, rhs } => {
                let l = self.check_and_convert(lhs)?;
                let r = self.check_and_convert(rhs)?;
                let ty = r.ty.clone();
                Ok(Expr::new(
                    ExprKind::Comma {
                        lhs: Box::new(l),
                        rhs: Box::new(r),
                    },
                    ty,
                    loc,
                ))
            }
        }
    }

    fn check_unary(&mut self, op: UnaryOp, expr: &ast::Expr, loc: SourceLoc) -> CompileResult<Expr> {
        let inner = self.check_and_convert(expr)?;
        match op {
            UnaryOp::Not => {
                if !inner.ty.is_scalar() {
                    return self.err(ErrorKind::TypeMismatch, loc, "`!` requires a scalar operand");
                }
                Ok(Expr::new(
                    ExprKind::Unary {
                        op,
                        expr: Box::new(inner),
                    },
                    Type::Int,
                    loc,
                ))
            }
            UnaryOp::Negate => {
                if !inner.ty.is_arithmetic() {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "unary `-` requires an arithmetic operand",
                    );
                }
                let ty = inner.ty.promoted();
                let inner = self.convert_to(inner, &ty);
                Ok(Expr::new(
                    ExprKind::Unary {
                        op,
                        expr: Box::new(inner),
                    },
                    ty,
                    loc,
                ))
            }
            UnaryOp::Complement => {
                if !inner.ty.is_integer() {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "`~` requires an integer operand",
                    );
                }
                let ty = inner.ty.promoted();
                let inner = self.convert_to(inner, &ty);
                Ok(Expr::new(
                    ExprKind::Unary {
                        op,
                        expr: Box::new(inner),
                    },
                    ty,
                    loc,
                ))
            }
        }
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        loc: SourceLoc,
    ) -> CompileResult<Expr> {
        use BinaryOp::*;
        let l = self.check_and_convert(lhs)?;
        let r = self.check_and_convert(rhs)?;
        let binary = |op, l: Expr, r: Expr, ty| {
            Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(l),
                    rhs: Box::new(r),
                },
                ty,
                loc,
            )
        };
        match op {
            LogicalAnd | LogicalOr => {
                if !l.ty.is_scalar() || !r.ty.is_scalar() {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "logical operators require scalar operands",
                    );
                }
                Ok(binary(op, l, r, Type::Int))
            }
            Add => {
                if l.ty.is_arithmetic() && r.ty.is_arithmetic() {
                    let common = common_type(&l.ty, &r.ty);
                    let l = self.convert_to(l, &common);
                    let r = self.convert_to(r, &common);
                    Ok(binary(op, l, r, common))
                } else if l.ty.is_pointer() && r.ty.is_integer() {
                    self.pointer_arith(op, l, r, loc)
                } else if l.ty.is_integer() && r.ty.is_pointer() {
                    self.pointer_arith(op, r, l, loc)
                } else {
                    self.err(ErrorKind::TypeMismatch, loc, "invalid operands to `+`")
                }
            }
            Subtract => {
                if l.ty.is_arithmetic() && r.ty.is_arithmetic() {
                    let common = common_type(&l.ty, &r.ty);
                    let l = self.convert_to(l, &common);
                    let r = self.convert_to(r, &common);
                    Ok(binary(op, l, r, common))
                } else if l.ty.is_pointer() && r.ty.is_integer() {
                    self.pointer_arith(op, l, r, loc)
                } else if l.ty.is_pointer() && l.ty == r.ty {
                    self.complete_pointee(&l.ty, loc)?;
                    Ok(binary(op, l, r, Type::Long))
                } else {
                    self.err(ErrorKind::TypeMismatch, loc, "invalid operands to `-`")
                }
            }
            Multiply | Divide => {
                if !l.ty.is_arithmetic() || !r.ty.is_arithmetic() {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "operands must have arithmetic type",
                    );
                }
                let common = common_type(&l.ty, &r.ty);
                let l = self.convert_to(l, &common);
                let r = self.convert_to(r, &common);
                Ok(binary(op, l, r, common))
            }
            Remainder | BitAnd | BitOr | BitXor => {
                if !l.ty.is_integer() || !r.ty.is_integer() {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "operands must have integer type",
                    );
                }
                let common = common_type(&l.ty, &r.ty);
                let l = self.convert_to(l, &common);
                let r = self.convert_to(r, &common);
                Ok(binary(op, l, r, common))
            }
            ShiftLeft | ShiftRight => {
                if !l.ty.is_integer() || !r.ty.is_integer() {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "shift operands must have integer type",
                    );
                }
                // Shifts promote each operand independently; the result has
                // the promoted left operand's type.
                let lty = l.ty.promoted();
                let rty = r.ty.promoted();
                let l = self.convert_to(l, &lty);
                let r = self.convert_to(r, &rty);
                Ok(binary(op, l, r, lty))
            }
            Equal | NotEqual => {
                if l.ty.is_arithmetic() && r.ty.is_arithmetic() {
                    let common = common_type(&l.ty, &r.ty);
                    let l = self.convert_to(l, &common);
                    let r = self.convert_to(r, &common);
                    Ok(binary(op, l, r, Type::Int))
                } else if l.ty.is_pointer() || r.ty.is_pointer() {
                    let common = common_pointer_type(&l, &r).ok_or_else(|| {
                        crate::error::CompileError::new(
                            ErrorKind::TypeMismatch,
                            loc,
                            "comparison of incompatible pointer types",
                        )
                    })?;
                    let l = self.convert_to(l, &common);
                    let r = self.convert_to(r, &common);
                    Ok(binary(op, l, r, Type::Int))
                } else {
                    self.err(ErrorKind::TypeMismatch, loc, "invalid equality comparison")
                }
            }
            LessThan | LessOrEqual | GreaterThan | GreaterOrEqual => {
                if l.ty.is_arithmetic() && r.ty.is_arithmetic() {
                    let common = common_type(&l.ty, &r.ty);
                    let l = self.convert_to(l, &common);
                    let r = self.convert_to(r, &common);
                    Ok(binary(op, l, r, Type::Int))
                } else if l.ty.is_pointer() && l.ty == r.ty {
                    Ok(binary(op, l, r, Type::Int))
                } else {
                    self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "relational comparison of incompatible types",
                    )
                }
            }
        }
    }

    /// Build `ptr op index` after checking that the pointee is complete.
    fn pointer_arith(
        &mut self,
        op: BinaryOp,
        ptr: Expr,
        index: Expr,
        loc: SourceLoc,
    ) -> CompileResult<Expr> {
        self.complete_pointee(&ptr.ty, loc)?;
        let index = self.convert_to(index, &Type::Long);
        let ty = ptr.ty.clone();
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(ptr),
                rhs: Box::new(index),
            },
            ty,
            loc,
        ))
    }

    fn complete_pointee(&self, ty: &Type, loc: SourceLoc) -> CompileResult<()> {
        let ok = matches!(ty, Type::Pointer(p) if p.is_complete(self.types));
        if ok {
            Ok(())
        } else {
            self.err(
                ErrorKind::IncompleteType,
                loc,
                "pointer arithmetic on a pointer to an incomplete type",
            )
        }
    }

    fn check_compound_assignment(
        &mut self,
        op: BinaryOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        loc: SourceLoc,
    ) -> CompileResult<Expr> {
        let l = self.check_and_convert(lhs)?;
        if !l.is_lvalue() {
            return self.err(
                ErrorKind::NotAnLvalue,
                loc,
                "left side of compound assignment is not an lvalue",
            );
        }
        let r = self.check_and_convert(rhs)?;

        let (r, op_ty) = if op.is_shift() {
            if !l.ty.is_integer() || !r.ty.is_integer() {
                return self.err(
                    ErrorKind::TypeMismatch,
                    loc,
                    "shift operands must have integer type",
                );
            }
            let rty = r.ty.promoted();
            (self.convert_to(r, &rty), l.ty.promoted())
        } else if matches!(op, BinaryOp::Add | BinaryOp::Subtract) && l.ty.is_pointer() {
            self.complete_pointee(&l.ty, loc)?;
            if !r.ty.is_integer() {
                return self.err(
                    ErrorKind::TypeMismatch,
                    loc,
                    "pointer compound assignment requires an integer operand",
                );
            }
            (self.convert_to(r, &Type::Long), l.ty.clone())
        } else {
            let ok = if op.is_integer_only() {
                l.ty.is_integer() && r.ty.is_integer()
            } else {
                l.ty.is_arithmetic() && r.ty.is_arithmetic()
            };
            if !ok {
                return self.err(
                    ErrorKind::TypeMismatch,
                    loc,
                    "invalid operands to compound assignment",
                );
            }
            let common = common_type(&l.ty, &r.ty);
            (self.convert_to(r, &common), common)
        };

        let ty = l.ty.clone();
        Ok(Expr::new(
            ExprKind::CompoundAssignment {
                op,
                lhs: Box::new(l),
                rhs: Box::new(r),
                op_ty,
            },
            ty,
            loc,
        ))
    }

    fn check_conditional(
        &mut self,
        cond: &ast::Expr,
        then: &ast::Expr,
        otherwise: &ast::Expr,
        loc: SourceLoc,
    ) -> CompileResult<Expr> {
        let cond = self.cond_expr(cond)?;
        let t = self.check_and_convert(then)?;
        let o = self.check_and_convert(otherwise)?;
        let ty = if t.ty == Type::Void && o.ty == Type::Void {
            Type::Void
        } else if t.ty.is_arithmetic() && o.ty.is_arithmetic() {
            common_type(&t.ty, &o.ty)
        } else if t.ty == o.ty && matches!(t.ty, Type::Struct(_)) {
            t.ty.clone()
        } else if t.ty.is_pointer() || o.ty.is_pointer() {
            common_pointer_type(&t, &o).ok_or_else(|| {
                crate::error::CompileError::new(
                    ErrorKind::TypeMismatch,
                    loc,
                    "incompatible operand types in conditional expression",
                )
            })?
        } else {
            return self.err(
                ErrorKind::TypeMismatch,
                loc,
                "incompatible operand types in conditional expression",
            );
        };
        let (t, o) = if ty == Type::Void || matches!(ty, Type::Struct(_)) {
            (t, o)
        } else {
            (self.convert_to(t, &ty), self.convert_to(o, &ty))
        };
        Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(t),
                otherwise: Box::new(o),
            },
            ty,
            loc,
        ))
    }
}

/// Apply array-to-pointer decay: an array-typed expression becomes the
/// address of its first element.
fn decay(e: Expr) -> Expr {
    if let Type::Array(elem, _) = &e.ty {
        let ty = (**elem).clone().pointer_to();
        let loc = e.loc;
        return Expr::new(ExprKind::AddrOf(Box::new(e)), ty, loc);
    }
    e
}

/// Is this expression a null pointer constant (an integer constant with
/// value zero)?
fn is_null_pointer_constant(e: &Expr) -> bool {
    matches!(&e.kind, ExprKind::Constant(c) if c.ty().is_integer() && c.is_null_constant())
}

/// The common type of two pointer operands: identical types, a null pointer
/// constant combining with any pointer, or `void *` combining with any
/// object pointer.
fn common_pointer_type(a: &Expr, b: &Expr) -> Option<Type> {
    if a.ty == b.ty && a.ty.is_pointer() {
        Some(a.ty.clone())
    } else if is_null_pointer_constant(a) && b.ty.is_pointer() {
        Some(b.ty.clone())
    } else if is_null_pointer_constant(b) && a.ty.is_pointer() {
        Some(a.ty.clone())
    } else if a.ty == Type::Void.pointer_to() && b.ty.is_pointer() {
        Some(a.ty.clone())
    } else if b.ty == Type::Void.pointer_to() && a.ty.is_pointer() {
        Some(b.ty.clone())
    } else {
        None
    }
}
