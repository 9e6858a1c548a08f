//! Lowering from the typed AST to three-address code.
//!
//! Expressions lower to an [`ExpResult`]: a plain value, a dereferenced
//! pointer, or a sub-object of a named aggregate. Lvalue contexts store
//! through the result; rvalue contexts load it into a fresh temporary.
//! Short-circuit operators and the conditional operator become explicit
//! control flow; compound assignment re-reads nothing (the target is
//! evaluated once).

use super::{BinaryOp, Function, Instr, Label, Module, StaticVar, UnaryOp, Value};
use crate::ast;
use crate::fx::FxHashMap;
use crate::sema::typed::{self, LoopId};
use crate::symbols::{Attrs, InitValue, StaticInit, Sym, SymbolTable};
use crate::types::{Const, Type, TypeTable};

/// Lower a typed program. Static objects are collected from the symbol
/// table afterwards, so tentative definitions emit as zero.
pub fn lower(program: &typed::Program, symbols: &mut SymbolTable, types: &TypeTable) -> Module {
    let mut funcs = Vec::with_capacity(program.funcs.len());
    let next_label;
    {
        let mut lowerer = Lowerer {
            symbols: &mut *symbols,
            types,
            instrs: Vec::new(),
            next_label: 0,
            loop_labels: FxHashMap::default(),
            case_labels: FxHashMap::default(),
            default_labels: FxHashMap::default(),
            goto_labels: FxHashMap::default(),
        };
        for f in &program.funcs {
            funcs.push(lowerer.function(f));
        }
        next_label = lowerer.next_label;
    }

    let mut statics = Vec::new();
    for (sym, data) in symbols.iter() {
        if let Attrs::Static { init, global } = &data.attrs {
            let init = match init {
                InitValue::Initialized(v) => v.clone(),
                InitValue::Tentative => vec![StaticInit::Zero(data.ty.size(types))],
                InitValue::None => continue,
            };
            statics.push(StaticVar {
                sym,
                global: *global,
                ty: data.ty.clone(),
                init,
            });
        }
    }

    Module {
        funcs,
        statics,
        next_label,
    }
}

/// What evaluating an expression produced.
#[derive(Clone)]
enum ExpResult {
    /// An ordinary value.
    Plain(Value),
    /// An object designated through a pointer value.
    Deref(Value),
    /// A member or element of a named aggregate, at a byte offset.
    SubObject { base: Sym, offset: u64 },
}

struct Lowerer<'a> {
    symbols: &'a mut SymbolTable,
    types: &'a TypeTable,
    instrs: Vec<Instr>,
    next_label: u32,
    /// (break, continue) targets per loop or switch.
    loop_labels: FxHashMap<LoopId, (Label, Label)>,
    case_labels: FxHashMap<(LoopId, usize), Label>,
    default_labels: FxHashMap<LoopId, Label>,
    /// `goto` labels of the current function.
    goto_labels: FxHashMap<String, Label>,
}

impl Lowerer<'_> {
    fn emit(&mut self, i: Instr) {
        self.instrs.push(i);
    }

    fn fresh_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    fn temp(&mut self, ty: &Type) -> Value {
        Value::Var(self.symbols.make_temp(ty.clone()))
    }

    fn break_label(&mut self, id: LoopId) -> Label {
        self.loop_pair(id).0
    }

    fn continue_label(&mut self, id: LoopId) -> Label {
        self.loop_pair(id).1
    }

    fn loop_pair(&mut self, id: LoopId) -> (Label, Label) {
        if let Some(&pair) = self.loop_labels.get(&id) {
            return pair;
        }
        let pair = (self.fresh_label(), self.fresh_label());
        self.loop_labels.insert(id, pair);
        pair
    }

    fn case_label(&mut self, id: LoopId, index: usize) -> Label {
        if let Some(&l) = self.case_labels.get(&(id, index)) {
            return l;
        }
        let l = self.fresh_label();
        self.case_labels.insert((id, index), l);
        l
    }

    fn default_label(&mut self, id: LoopId) -> Label {
        if let Some(&l) = self.default_labels.get(&id) {
            return l;
        }
        let l = self.fresh_label();
        self.default_labels.insert(id, l);
        l
    }

    fn goto_label(&mut self, name: &str) -> Label {
        if let Some(&l) = self.goto_labels.get(name) {
            return l;
        }
        let l = self.fresh_label();
        self.goto_labels.insert(name.to_string(), l);
        l
    }

    fn function(&mut self, f: &typed::FunDef) -> Function {
        self.instrs.clear();
        self.goto_labels.clear();
        self.block(&f.body);

        // Fall-off-the-end: return zero where the value has a register
        // class, so `main` gets C's special rule for free.
        let ret = match self.symbols.ty(f.sym) {
            Type::Function(ft) => ft.ret.clone(),
            _ => Type::Void,
        };
        let value = if ret.is_arithmetic() || ret.is_pointer() {
            Some(Value::Constant(Const::Int(0).convert_to(&ret)))
        } else {
            None
        };
        self.emit(Instr::Return(value));

        Function {
            sym: f.sym,
            global: self.symbols[f.sym].is_global(),
            params: f.params.clone(),
            body: core::mem::take(&mut self.instrs),
        }
    }

    fn block(&mut self, b: &typed::Block) {
        for item in &b.items {
            match item {
                typed::BlockItem::Decl(d) => self.var_def(d),
                typed::BlockItem::Stmt(s) => self.statement(s),
            }
        }
    }

    fn statement(&mut self, s: &typed::Statement) {
        use typed::Statement as S;
        match s {
            S::Return(v) => {
                let value = v.as_ref().map(|e| self.expr_value(e));
                self.emit(Instr::Return(value));
            }
            S::Expression(e) => {
                self.expr(e);
            }
            S::If {
                cond,
                then,
                otherwise,
            } => {
                let cv = self.expr_value(cond);
                match otherwise {
                    None => {
                        let end = self.fresh_label();
                        self.emit(Instr::JumpIfZero {
                            cond: cv,
                            target: end,
                        });
                        self.statement(then);
                        self.emit(Instr::Label(end));
                    }
                    Some(otherwise) => {
                        let else_l = self.fresh_label();
                        let end = self.fresh_label();
                        self.emit(Instr::JumpIfZero {
                            cond: cv,
                            target: else_l,
                        });
                        self.statement(then);
                        self.emit(Instr::Jump(end));
                        self.emit(Instr::Label(else_l));
                        self.statement(otherwise);
                        self.emit(Instr::Label(end));
                    }
                }
            }
            S::Compound(b) => self.block(b),
            S::Break(id) => {
                let l = self.break_label(*id);
                self.emit(Instr::Jump(l));
            }
            S::Continue(id) => {
                let l = self.continue_label(*id);
                self.emit(Instr::Jump(l));
            }
            S::While { cond, body, id } => {
                let (break_l, continue_l) = self.loop_pair(*id);
                self.emit(Instr::Label(continue_l));
                let cv = self.expr_value(cond);
                self.emit(Instr::JumpIfZero {
                    cond: cv,
                    target: break_l,
                });
                self.statement(body);
                self.emit(Instr::Jump(continue_l));
                self.emit(Instr::Label(break_l));
            }
            S::DoWhile { body, cond, id } => {
                let (break_l, continue_l) = self.loop_pair(*id);
                let start = self.fresh_label();
                self.emit(Instr::Label(start));
                self.statement(body);
                self.emit(Instr::Label(continue_l));
                let cv = self.expr_value(cond);
                self.emit(Instr::JumpIfNotZero {
                    cond: cv,
                    target: start,
                });
                self.emit(Instr::Label(break_l));
            }
            S::For {
                init,
                cond,
                post,
                body,
                id,
            } => {
                match init {
                    Some(typed::ForInit::Decl(d)) => self.var_def(d),
                    Some(typed::ForInit::Expr(e)) => {
                        self.expr(e);
                    }
                    None => {}
                }
                let (break_l, continue_l) = self.loop_pair(*id);
                let start = self.fresh_label();
                self.emit(Instr::Label(start));
                if let Some(cond) = cond {
                    let cv = self.expr_value(cond);
                    self.emit(Instr::JumpIfZero {
                        cond: cv,
                        target: break_l,
                    });
                }
                self.statement(body);
                self.emit(Instr::Label(continue_l));
                if let Some(post) = post {
                    self.expr(post);
                }
                self.emit(Instr::Jump(start));
                self.emit(Instr::Label(break_l));
            }
            S::Switch {
                ctrl,
                body,
                id,
                cases,
                has_default,
            } => {
                let cv = self.expr_value(ctrl);
                let ctrl_ty = ctrl.ty.clone();
                for (index, case) in cases.iter().enumerate() {
                    let cmp = self.temp(&Type::Int);
                    self.emit(Instr::Binary {
                        op: BinaryOp::Equal,
                        lhs: cv.clone(),
                        rhs: Value::Constant(case.convert_to(&ctrl_ty)),
                        dst: cmp.clone(),
                    });
                    let target = self.case_label(*id, index);
                    self.emit(Instr::JumpIfNotZero { cond: cmp, target });
                }
                let fallback = if *has_default {
                    self.default_label(*id)
                } else {
                    self.break_label(*id)
                };
                self.emit(Instr::Jump(fallback));
                self.statement(body);
                let break_l = self.break_label(*id);
                self.emit(Instr::Label(break_l));
            }
            S::Case { id, index, body } => {
                let l = self.case_label(*id, *index);
                self.emit(Instr::Label(l));
                self.statement(body);
            }
            S::Default { id, body } => {
                let l = self.default_label(*id);
                self.emit(Instr::Label(l));
                self.statement(body);
            }
            S::Goto(name) => {
                let l = self.goto_label(name);
                self.emit(Instr::Jump(l));
            }
            S::Labeled(name, body) => {
                let l = self.goto_label(name);
                self.emit(Instr::Label(l));
                self.statement(body);
            }
            S::Null => {}
        }
    }

    fn var_def(&mut self, d: &typed::VarDef) {
        match &d.init {
            typed::Initializer::Single(e) => {
                if let (Type::Array(_, n), typed::ExprKind::String(bytes)) = (&e.ty, &e.kind) {
                    self.string_into(d.sym, 0, bytes, *n);
                } else {
                    let v = self.expr_value(e);
                    self.emit(Instr::Copy {
                        src: v,
                        dst: Value::Var(d.sym),
                    });
                }
            }
            init @ typed::Initializer::Compound { .. } => self.compound_init(d.sym, 0, init),
        }
    }

    /// Copy string-literal bytes into an aggregate at `offset`, zero-filling
    /// up to the array length (which also supplies the NUL).
    fn string_into(&mut self, base: Sym, offset: u64, bytes: &[u8], len: u64) {
        for i in 0..len {
            let b = bytes.get(i as usize).copied().unwrap_or(0) as i8;
            self.emit(Instr::CopyToOffset {
                src: Value::Constant(Const::Char(b)),
                dst: base,
                offset: offset + i,
            });
        }
    }

    fn compound_init(&mut self, base: Sym, offset: u64, init: &typed::Initializer) {
        match init {
            typed::Initializer::Single(e) => {
                if let (Type::Array(_, n), typed::ExprKind::String(bytes)) = (&e.ty, &e.kind) {
                    self.string_into(base, offset, bytes, *n);
                } else {
                    let v = self.expr_value(e);
                    self.emit(Instr::CopyToOffset {
                        src: v,
                        dst: base,
                        offset,
                    });
                }
            }
            typed::Initializer::Compound { ty, items } => match ty {
                Type::Array(elem, n) => {
                    let esize = elem.size(self.types);
                    for (i, item) in items.iter().enumerate() {
                        self.compound_init(base, offset + i as u64 * esize, item);
                    }
                    for i in items.len() as u64..*n {
                        let elem = (**elem).clone();
                        self.zero_fill(base, offset + i * esize, &elem);
                    }
                }
                Type::Struct(id) => {
                    let members = self
                        .types
                        .layout(*id)
                        .expect("layout of initialized structure")
                        .members
                        .clone();
                    for (item, m) in items.iter().zip(&members) {
                        self.compound_init(base, offset + m.offset, item);
                    }
                    for m in &members[items.len()..] {
                        self.zero_fill(base, offset + m.offset, &m.ty);
                    }
                }
                _ => {
                    debug_assert_eq!(items.len(), 1);
                    if let Some(item) = items.first() {
                        self.compound_init(base, offset, item);
                    }
                }
            },
        }
    }

    /// Store zeros over an omitted element or member.
    fn zero_fill(&mut self, base: Sym, offset: u64, ty: &Type) {
        match ty {
            Type::Array(elem, n) => {
                let esize = elem.size(self.types);
                for i in 0..*n {
                    self.zero_fill(base, offset + i * esize, elem);
                }
            }
            Type::Struct(id) => {
                let members = self
                    .types
                    .layout(*id)
                    .expect("layout of initialized structure")
                    .members
                    .clone();
                for m in &members {
                    self.zero_fill(base, offset + m.offset, &m.ty);
                }
            }
            _ => {
                let zero = Const::Int(0).convert_to(ty);
                self.emit(Instr::CopyToOffset {
                    src: Value::Constant(zero),
                    dst: base,
                    offset,
                });
            }
        }
    }

    /// Evaluate an expression for its value.
    fn expr_value(&mut self, e: &typed::Expr) -> Value {
        let r = self.expr(e);
        self.read(r, &e.ty)
    }

    /// Load an [`ExpResult`] into a value.
    fn read(&mut self, r: ExpResult, ty: &Type) -> Value {
        match r {
            ExpResult::Plain(v) => v,
            ExpResult::Deref(ptr) => {
                let dst = self.temp(ty);
                self.emit(Instr::Load {
                    ptr,
                    dst: dst.clone(),
                });
                dst
            }
            ExpResult::SubObject { base, offset } => {
                let dst = self.temp(ty);
                self.emit(Instr::CopyFromOffset {
                    src: base,
                    offset,
                    dst: dst.clone(),
                });
                dst
            }
        }
    }

    /// Store `value` into the object `lval` designates; the result of an
    /// assignment expression.
    fn store(&mut self, lval: ExpResult, value: Value) -> Value {
        match lval {
            ExpResult::Plain(dst) => {
                self.emit(Instr::Copy {
                    src: value,
                    dst: dst.clone(),
                });
                dst
            }
            ExpResult::Deref(ptr) => {
                self.emit(Instr::Store {
                    src: value.clone(),
                    ptr,
                });
                value
            }
            ExpResult::SubObject { base, offset } => {
                self.emit(Instr::CopyToOffset {
                    src: value.clone(),
                    dst: base,
                    offset,
                });
                value
            }
        }
    }

    /// Emit the conversion from `src_ty` to `target`, if any.
    fn cast(&mut self, src: Value, src_ty: &Type, target: &Type) -> Value {
        if src_ty == target || *target == Type::Void {
            return src;
        }
        let dst = self.temp(target);
        let src_size = src_ty.size(self.types);
        let dst_size = target.size(self.types);
        let instr = match (src_ty == &Type::Double, *target == Type::Double) {
            (true, false) => {
                if target.is_signed() {
                    Instr::DoubleToInt {
                        src,
                        dst: dst.clone(),
                    }
                } else {
                    Instr::DoubleToUInt {
                        src,
                        dst: dst.clone(),
                    }
                }
            }
            (false, true) => {
                if src_ty.is_signed() {
                    Instr::IntToDouble {
                        src,
                        dst: dst.clone(),
                    }
                } else {
                    Instr::UIntToDouble {
                        src,
                        dst: dst.clone(),
                    }
                }
            }
            _ => {
                // Integer and pointer conversions preserve or resize bits.
                if src_size == dst_size {
                    Instr::Copy {
                        src,
                        dst: dst.clone(),
                    }
                } else if dst_size < src_size {
                    Instr::Truncate {
                        src,
                        dst: dst.clone(),
                    }
                } else if src_ty.is_signed() {
                    Instr::SignExtend {
                        src,
                        dst: dst.clone(),
                    }
                } else {
                    Instr::ZeroExtend {
                        src,
                        dst: dst.clone(),
                    }
                }
            }
        };
        self.emit(instr);
        dst
    }

    fn expr(&mut self, e: &typed::Expr) -> ExpResult {
        use typed::ExprKind as K;
        match &e.kind {
            K::Constant(c) => ExpResult::Plain(Value::Constant(*c)),
            K::String(bytes) => {
                let sym = self.symbols.string_constant(bytes);
                ExpResult::Plain(Value::Var(sym))
            }
            K::Var(sym) => ExpResult::Plain(Value::Var(*sym)),
            K::Cast { target, expr } => {
                let v = self.expr_value(expr);
                ExpResult::Plain(self.cast(v, &expr.ty, target))
            }
            K::Unary { op, expr } => {
                let src = self.expr_value(expr);
                let dst = self.temp(&e.ty);
                let op = match op {
                    ast::UnaryOp::Negate => UnaryOp::Negate,
                    ast::UnaryOp::Complement => UnaryOp::Complement,
                    ast::UnaryOp::Not => UnaryOp::Not,
                };
                self.emit(Instr::Unary {
                    op,
                    src,
                    dst: dst.clone(),
                });
                ExpResult::Plain(dst)
            }
            K::IncDec { op, postfix, expr } => {
                let lval = self.expr(expr);
                let cur = self.read(lval.clone(), &expr.ty);
                let old = if *postfix {
                    let old = self.temp(&expr.ty);
                    self.emit(Instr::Copy {
                        src: cur.clone(),
                        dst: old.clone(),
                    });
                    Some(old)
                } else {
                    None
                };
                let new = self.temp(&expr.ty);
                if let Type::Pointer(pointee) = &expr.ty {
                    let step: i64 = match op {
                        ast::IncDecOp::Inc => 1,
                        ast::IncDecOp::Dec => -1,
                    };
                    self.emit(Instr::AddPtr {
                        ptr: cur,
                        index: Value::Constant(Const::Long(step)),
                        scale: pointee.size(self.types),
                        dst: new.clone(),
                    });
                } else {
                    let one = if expr.ty == Type::Double {
                        Const::Double(1.0)
                    } else {
                        Const::Int(1).convert_to(&expr.ty)
                    };
                    let op = match op {
                        ast::IncDecOp::Inc => BinaryOp::Add,
                        ast::IncDecOp::Dec => BinaryOp::Subtract,
                    };
                    self.emit(Instr::Binary {
                        op,
                        lhs: cur,
                        rhs: Value::Constant(one),
                        dst: new.clone(),
                    });
                }
                self.store(lval, new.clone());
                ExpResult::Plain(old.unwrap_or(new))
            }
            K::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, e),
            K::Assignment { lhs, rhs } => {
                let lval = self.expr(lhs);
                let rv = self.expr_value(rhs);
                ExpResult::Plain(self.store(lval, rv))
            }
            K::CompoundAssignment {
                op,
                lhs,
                rhs,
                op_ty,
            } => {
                let lval = self.expr(lhs);
                let cur = self.read(lval.clone(), &lhs.ty);
                let rv = self.expr_value(rhs);
                let result = if let Type::Pointer(pointee) = op_ty {
                    // Pointer += / -= lowers to add-pointer.
                    let index = if *op == ast::BinaryOp::Subtract {
                        let neg = self.temp(&Type::Long);
                        self.emit(Instr::Unary {
                            op: UnaryOp::Negate,
                            src: rv,
                            dst: neg.clone(),
                        });
                        neg
                    } else {
                        rv
                    };
                    let dst = self.temp(op_ty);
                    self.emit(Instr::AddPtr {
                        ptr: cur,
                        index,
                        scale: pointee.size(self.types),
                        dst: dst.clone(),
                    });
                    dst
                } else {
                    let widened = self.cast(cur, &lhs.ty, op_ty);
                    let dst = self.temp(op_ty);
                    self.emit(Instr::Binary {
                        op: strict_op(*op),
                        lhs: widened,
                        rhs: rv,
                        dst: dst.clone(),
                    });
                    self.cast(dst, op_ty, &lhs.ty)
                };
                ExpResult::Plain(self.store(lval, result))
            }
            K::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let else_l = self.fresh_label();
                let end = self.fresh_label();
                let cv = self.expr_value(cond);
                self.emit(Instr::JumpIfZero {
                    cond: cv,
                    target: else_l,
                });
                if e.ty == Type::Void {
                    self.expr(then);
                    self.emit(Instr::Jump(end));
                    self.emit(Instr::Label(else_l));
                    self.expr(otherwise);
                    self.emit(Instr::Label(end));
                    ExpResult::Plain(Value::Constant(Const::Int(0)))
                } else {
                    let result = self.temp(&e.ty);
                    let tv = self.expr_value(then);
                    self.emit(Instr::Copy {
                        src: tv,
                        dst: result.clone(),
                    });
                    self.emit(Instr::Jump(end));
                    self.emit(Instr::Label(else_l));
                    let ov = self.expr_value(otherwise);
                    self.emit(Instr::Copy {
                        src: ov,
                        dst: result.clone(),
                    });
                    self.emit(Instr::Label(end));
                    ExpResult::Plain(result)
                }
            }
            K::Call { f, args } => {
                let args = args.iter().map(|a| self.expr_value(a)).collect();
                let dst = if e.ty == Type::Void {
                    None
                } else {
                    Some(self.temp(&e.ty))
                };
                self.emit(Instr::Call {
                    f: *f,
                    args,
                    dst: dst.clone(),
                });
                ExpResult::Plain(dst.unwrap_or(Value::Constant(Const::Int(0))))
            }
            K::Subscript { base, index } => {
                let ptr = self.expr_value(base);
                let idx = self.expr_value(index);
                let dst = self.temp(&base.ty);
                self.emit(Instr::AddPtr {
                    ptr,
                    index: idx,
                    scale: e.ty.size(self.types),
                    dst: dst.clone(),
                });
                ExpResult::Deref(dst)
            }
            K::Dot { base, member } => {
                let offset = self.member_offset(&base.ty, member);
                match self.expr(base) {
                    ExpResult::SubObject {
                        base: b,
                        offset: o,
                    } => ExpResult::SubObject {
                        base: b,
                        offset: o + offset,
                    },
                    ExpResult::Plain(Value::Var(sym)) => ExpResult::SubObject {
                        base: sym,
                        offset,
                    },
                    ExpResult::Plain(Value::Constant(_)) => {
                        unreachable!("constant of structure type")
                    }
                    ExpResult::Deref(ptr) => self.offset_pointer(ptr, offset, &e.ty),
                }
            }
            K::Arrow { base, member } => {
                let pointee = base.ty.pointee().expect("arrow through pointer").clone();
                let offset = self.member_offset(&pointee, member);
                let ptr = self.expr_value(base);
                self.offset_pointer(ptr, offset, &e.ty)
            }
            K::AddrOf(inner) => match self.expr(inner) {
                ExpResult::Plain(Value::Var(sym)) => {
                    let dst = self.temp(&e.ty);
                    self.emit(Instr::GetAddress {
                        src: sym,
                        dst: dst.clone(),
                    });
                    ExpResult::Plain(dst)
                }
                ExpResult::Plain(Value::Constant(_)) => unreachable!("address of a constant"),
                ExpResult::Deref(ptr) => ExpResult::Plain(ptr),
                ExpResult::SubObject { base, offset } => {
                    let addr = self.temp(&e.ty);
                    self.emit(Instr::GetAddress {
                        src: base,
                        dst: addr.clone(),
                    });
                    if offset == 0 {
                        ExpResult::Plain(addr)
                    } else {
                        let dst = self.temp(&e.ty);
                        self.emit(Instr::AddPtr {
                            ptr: addr,
                            index: Value::Constant(Const::Long(offset as i64)),
                            scale: 1,
                            dst: dst.clone(),
                        });
                        ExpResult::Plain(dst)
                    }
                }
            },
            K::Deref(inner) => {
                let ptr = self.expr_value(inner);
                ExpResult::Deref(ptr)
            }
            K::Comma { lhs, rhs } => {
                self.expr(lhs);
                ExpResult::Plain(self.expr_value(rhs))
            }
        }
    }

    /// Point `ptr` at a member `offset` bytes in, yielding a dereferenced
    /// result.
    fn offset_pointer(&mut self, ptr: Value, offset: u64, member_ty: &Type) -> ExpResult {
        if offset == 0 {
            return ExpResult::Deref(ptr);
        }
        let dst = self.temp(&member_ty.clone().pointer_to());
        self.emit(Instr::AddPtr {
            ptr,
            index: Value::Constant(Const::Long(offset as i64)),
            scale: 1,
            dst: dst.clone(),
        });
        ExpResult::Deref(dst)
    }

    fn member_offset(&self, struct_ty: &Type, member: &str) -> u64 {
        let Type::Struct(id) = struct_ty else {
            unreachable!("member access on non-structure");
        };
        self.types
            .layout(*id)
            .and_then(|l| l.member(member))
            .map(|m| m.offset)
            .expect("member resolved during type checking")
    }

    fn binary(
        &mut self,
        op: ast::BinaryOp,
        lhs: &typed::Expr,
        rhs: &typed::Expr,
        e: &typed::Expr,
    ) -> ExpResult {
        use ast::BinaryOp as B;
        match op {
            B::LogicalAnd => {
                let false_l = self.fresh_label();
                let end = self.fresh_label();
                let result = self.temp(&Type::Int);
                let lv = self.expr_value(lhs);
                self.emit(Instr::JumpIfZero {
                    cond: lv,
                    target: false_l,
                });
                let rv = self.expr_value(rhs);
                self.emit(Instr::JumpIfZero {
                    cond: rv,
                    target: false_l,
                });
                self.emit(Instr::Copy {
                    src: Value::Constant(Const::Int(1)),
                    dst: result.clone(),
                });
                self.emit(Instr::Jump(end));
                self.emit(Instr::Label(false_l));
                self.emit(Instr::Copy {
                    src: Value::Constant(Const::Int(0)),
                    dst: result.clone(),
                });
                self.emit(Instr::Label(end));
                ExpResult::Plain(result)
            }
            B::LogicalOr => {
                let true_l = self.fresh_label();
                let end = self.fresh_label();
                let result = self.temp(&Type::Int);
                let lv = self.expr_value(lhs);
                self.emit(Instr::JumpIfNotZero {
                    cond: lv,
                    target: true_l,
                });
                let rv = self.expr_value(rhs);
                self.emit(Instr::JumpIfNotZero {
                    cond: rv,
                    target: true_l,
                });
                self.emit(Instr::Copy {
                    src: Value::Constant(Const::Int(0)),
                    dst: result.clone(),
                });
                self.emit(Instr::Jump(end));
                self.emit(Instr::Label(true_l));
                self.emit(Instr::Copy {
                    src: Value::Constant(Const::Int(1)),
                    dst: result.clone(),
                });
                self.emit(Instr::Label(end));
                ExpResult::Plain(result)
            }
            B::Add | B::Subtract if e.ty.is_pointer() => {
                // ptr ± integer.
                let pointee_size = e
                    .ty
                    .pointee()
                    .expect("pointer arithmetic")
                    .size(self.types);
                let ptr = self.expr_value(lhs);
                let idx = self.expr_value(rhs);
                let idx = if op == B::Subtract {
                    let neg = self.temp(&Type::Long);
                    self.emit(Instr::Unary {
                        op: UnaryOp::Negate,
                        src: idx,
                        dst: neg.clone(),
                    });
                    neg
                } else {
                    idx
                };
                let dst = self.temp(&e.ty);
                self.emit(Instr::AddPtr {
                    ptr,
                    index: idx,
                    scale: pointee_size,
                    dst: dst.clone(),
                });
                ExpResult::Plain(dst)
            }
            B::Subtract if lhs.ty.is_pointer() && rhs.ty.is_pointer() => {
                // Pointer difference: byte difference divided by the
                // referenced size.
                let size = lhs
                    .ty
                    .pointee()
                    .expect("pointer difference")
                    .size(self.types);
                let lv = self.expr_value(lhs);
                let rv = self.expr_value(rhs);
                let diff = self.temp(&Type::Long);
                self.emit(Instr::Binary {
                    op: BinaryOp::Subtract,
                    lhs: lv,
                    rhs: rv,
                    dst: diff.clone(),
                });
                let dst = self.temp(&Type::Long);
                self.emit(Instr::Binary {
                    op: BinaryOp::Divide,
                    lhs: diff,
                    rhs: Value::Constant(Const::Long(size as i64)),
                    dst: dst.clone(),
                });
                ExpResult::Plain(dst)
            }
            _ => {
                let lv = self.expr_value(lhs);
                let rv = self.expr_value(rhs);
                let dst = self.temp(&e.ty);
                self.emit(Instr::Binary {
                    op: strict_op(op),
                    lhs: lv,
                    rhs: rv,
                    dst: dst.clone(),
                });
                ExpResult::Plain(dst)
            }
        }
    }
}

/// Map a strict AST operator to its TAC counterpart.
fn strict_op(op: ast::BinaryOp) -> BinaryOp {
    use ast::BinaryOp as B;
    match op {
        B::Add => BinaryOp::Add,
        B::Subtract => BinaryOp::Subtract,
        B::Multiply => BinaryOp::Multiply,
        B::Divide => BinaryOp::Divide,
        B::Remainder => BinaryOp::Remainder,
        B::BitAnd => BinaryOp::BitAnd,
        B::BitOr => BinaryOp::BitOr,
        B::BitXor => BinaryOp::BitXor,
        B::ShiftLeft => BinaryOp::ShiftLeft,
        B::ShiftRight => BinaryOp::ShiftRight,
        B::Equal => BinaryOp::Equal,
        B::NotEqual => BinaryOp::NotEqual,
        B::LessThan => BinaryOp::LessThan,
        B::LessOrEqual => BinaryOp::LessOrEqual,
        B::GreaterThan => BinaryOp::GreaterThan,
        B::GreaterOrEqual => BinaryOp::GreaterOrEqual,
        B::LogicalAnd | B::LogicalOr => unreachable!("short-circuit operators lower to jumps"),
    }
}
