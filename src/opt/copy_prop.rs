//! Copy propagation.
//!
//! A forward dataflow over the set of `dst = src` copies reaching each
//! point; the meet is set intersection. A copy generates itself and kills
//! every copy mentioning its destination. Calls and stores kill every copy
//! involving a variable reachable through memory (aliased or static). Uses
//! are rewritten to the copy source while it is available, and copies that
//! are already satisfied are deleted.
//!
//! Copies are only tracked between values of identical type — propagating
//! across a same-size reinterpreting copy would change the signedness of
//! later operations. Double constants participate by bit pattern, which
//! keeps 0.0 and -0.0 apart (they compare equal but divide differently) and
//! lets NaN propagate.

use super::cfg::{Cfg, NodeId};
use crate::fx::FxHashSet;
use crate::symbols::{Sym, SymbolTable};
use crate::tac::{Instr, Value};

/// One reaching copy: `dst` currently holds the same value as `src`.
#[derive(Clone, PartialEq, Eq, Hash)]
struct CopyPair {
    src: Value,
    dst: Sym,
}

type Copies = FxHashSet<CopyPair>;

/// Propagate copies through `cfg`.
pub fn run(cfg: &mut Cfg<Instr>, symbols: &SymbolTable, aliased: &FxHashSet<Sym>) {
    // Universe of copies, for the optimistic initial annotation.
    let mut all = Copies::default();
    for b in &cfg.blocks {
        for instr in &b.instrs {
            if let Instr::Copy {
                src,
                dst: Value::Var(d),
            } = instr
            {
                if eligible(src, *d, symbols) {
                    all.insert(CopyPair {
                        src: src.clone(),
                        dst: *d,
                    });
                }
            }
        }
    }
    if all.is_empty() {
        return;
    }

    let n = cfg.blocks.len();
    let mut block_in: Vec<Copies> = vec![all.clone(); n];
    let mut block_out: Vec<Copies> = vec![all.clone(); n];

    // Iterate to a fixed point; the lattice is finite and transfer is
    // monotone, so this terminates.
    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..n {
            let mut incoming: Option<Copies> = None;
            for &p in cfg.predecessors(NodeId::Block(i)) {
                let pset: Copies = match p {
                    NodeId::Entry => Copies::default(),
                    NodeId::Block(j) => block_out[j].clone(),
                    NodeId::Exit => continue,
                };
                incoming = Some(match incoming {
                    None => pset,
                    Some(acc) => acc.intersection(&pset).cloned().collect(),
                });
            }
            let input = incoming.unwrap_or_default();
            let mut out = input.clone();
            for instr in &cfg.blocks[i].instrs {
                transfer(instr, &mut out, symbols, aliased);
            }
            if input != block_in[i] {
                block_in[i] = input;
                changed = true;
            }
            if out != block_out[i] {
                block_out[i] = out;
                changed = true;
            }
        }
    }

    // Rewrite, tracking the reaching set through each block.
    for i in 0..n {
        let mut set = block_in[i].clone();
        let instrs = core::mem::take(&mut cfg.blocks[i].instrs);
        let mut kept = Vec::with_capacity(instrs.len());
        for mut instr in instrs {
            if let Instr::Copy {
                src: Value::Var(s),
                dst: Value::Var(d),
            } = &instr
            {
                // `x = x`, a copy that still reaches, or the reverse of one
                // all leave the destination unchanged.
                let same = s == d
                    || set.contains(&CopyPair {
                        src: Value::Var(*s),
                        dst: *d,
                    })
                    || set.contains(&CopyPair {
                        src: Value::Var(*d),
                        dst: *s,
                    });
                if same {
                    continue;
                }
            }
            rewrite_uses(&mut instr, &set);
            transfer(&instr, &mut set, symbols, aliased);
            kept.push(instr);
        }
        cfg.blocks[i].instrs = kept;
    }
}

/// Copies are tracked only between identically typed values.
fn eligible(src: &Value, dst: Sym, symbols: &SymbolTable) -> bool {
    src.ty(symbols) == *symbols.ty(dst)
}

fn involves(pair: &CopyPair, sym: Sym) -> bool {
    pair.dst == sym || pair.src == Value::Var(sym)
}

fn transfer(instr: &Instr, set: &mut Copies, symbols: &SymbolTable, aliased: &FxHashSet<Sym>) {
    match instr {
        Instr::Copy {
            src,
            dst: Value::Var(d),
        } => {
            set.retain(|p| !involves(p, *d));
            if eligible(src, *d, symbols) && *src != Value::Var(*d) {
                set.insert(CopyPair {
                    src: src.clone(),
                    dst: *d,
                });
            }
        }
        Instr::Call { dst, .. } => {
            set.retain(|p| {
                !involves_any(p, aliased)
                    && match dst {
                        Some(Value::Var(d)) => !involves(p, *d),
                        _ => true,
                    }
            });
        }
        Instr::Store { .. } => {
            set.retain(|p| !involves_any(p, aliased));
        }
        Instr::CopyToOffset { dst, .. } => {
            let d = *dst;
            set.retain(|p| !involves(p, d));
        }
        other => {
            if let Some(Value::Var(d)) = other.dst() {
                let d = *d;
                set.retain(|p| !involves(p, d));
            }
        }
    }
}

fn involves_any(pair: &CopyPair, syms: &FxHashSet<Sym>) -> bool {
    if syms.contains(&pair.dst) {
        return true;
    }
    matches!(&pair.src, Value::Var(s) if syms.contains(s))
}

/// Replace each read of a copy destination with the copy's source.
fn rewrite_uses(instr: &mut Instr, set: &Copies) {
    let replace = |v: &mut Value| {
        if let Value::Var(sym) = v {
            if let Some(p) = set.iter().find(|p| p.dst == *sym) {
                *v = p.src.clone();
            }
        }
    };
    use Instr::*;
    match instr {
        Return(Some(v)) => replace(v),
        Return(None) => {}
        SignExtend { src, .. }
        | Truncate { src, .. }
        | ZeroExtend { src, .. }
        | DoubleToInt { src, .. }
        | DoubleToUInt { src, .. }
        | IntToDouble { src, .. }
        | UIntToDouble { src, .. }
        | Unary { src, .. }
        | Copy { src, .. }
        | CopyToOffset { src, .. } => replace(src),
        Binary { lhs, rhs, .. } => {
            replace(lhs);
            replace(rhs);
        }
        Load { ptr, .. } => replace(ptr),
        Store { src, ptr } => {
            replace(src);
            replace(ptr);
        }
        AddPtr { ptr, index, .. } => {
            replace(ptr);
            replace(index);
        }
        Call { args, .. } => {
            for a in args {
                replace(a);
            }
        }
        JumpIfZero { cond, .. } | JumpIfNotZero { cond, .. } => replace(cond),
        GetAddress { .. } | CopyFromOffset { .. } | Jump(_) | Label(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tac::BinaryOp;
    use crate::types::{Const, Type};

    fn setup() -> (SymbolTable, FxHashSet<Sym>) {
        (SymbolTable::new(), FxHashSet::default())
    }

    #[test]
    fn propagates_constants_into_uses() {
        let (mut symbols, aliased) = setup();
        let x = symbols.make_temp(Type::Int);
        let y = symbols.make_temp(Type::Int);
        let mut cfg = Cfg::build(vec![
            Instr::Copy {
                src: Value::Constant(Const::Int(4)),
                dst: Value::Var(x),
            },
            Instr::Binary {
                op: BinaryOp::Add,
                lhs: Value::Var(x),
                rhs: Value::Constant(Const::Int(1)),
                dst: Value::Var(y),
            },
            Instr::Return(Some(Value::Var(y))),
        ]);
        run(&mut cfg, &symbols, &aliased);
        let out = cfg.to_instructions();
        match &out[1] {
            Instr::Binary { lhs, .. } => {
                assert_eq!(*lhs, Value::Constant(Const::Int(4)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn call_kills_copies_of_aliased_vars() {
        let (mut symbols, mut aliased) = setup();
        let f = symbols.make_temp(Type::Int); // stands in for a function sym
        let x = symbols.make_temp(Type::Int);
        let y = symbols.make_temp(Type::Int);
        aliased.insert(x);
        let body = vec![
            Instr::Copy {
                src: Value::Var(x),
                dst: Value::Var(y),
            },
            Instr::Call {
                f,
                args: vec![],
                dst: None,
            },
            Instr::Return(Some(Value::Var(y))),
        ];
        let mut cfg = Cfg::build(body);
        run(&mut cfg, &symbols, &aliased);
        let out = cfg.to_instructions();
        // The return must still read y, not the killed copy source x.
        assert_eq!(out[2], Instr::Return(Some(Value::Var(y))));
    }

    #[test]
    fn redundant_copy_deleted() {
        let (mut symbols, aliased) = setup();
        let x = symbols.make_temp(Type::Int);
        let y = symbols.make_temp(Type::Int);
        let mut cfg = Cfg::build(vec![
            Instr::Copy {
                src: Value::Var(x),
                dst: Value::Var(y),
            },
            Instr::Copy {
                src: Value::Var(y),
                dst: Value::Var(x),
            },
            Instr::Return(Some(Value::Var(x))),
        ]);
        run(&mut cfg, &symbols, &aliased);
        let out = cfg.to_instructions();
        // `x = y` after `y = x` is a no-op and is removed; the return then
        // reads the propagated source.
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], Instr::Return(Some(Value::Var(x))));
    }

    #[test]
    fn signed_zero_copies_are_distinct() {
        let (mut symbols, aliased) = setup();
        let x = symbols.make_temp(Type::Double);
        let y = symbols.make_temp(Type::Double);
        let mut cfg = Cfg::build(vec![
            Instr::Copy {
                src: Value::Constant(Const::Double(0.0)),
                dst: Value::Var(x),
            },
            Instr::Copy {
                src: Value::Constant(Const::Double(-0.0)),
                dst: Value::Var(x),
            },
            Instr::Copy {
                src: Value::Var(x),
                dst: Value::Var(y),
            },
            Instr::Return(Some(Value::Var(y))),
        ]);
        run(&mut cfg, &symbols, &aliased);
        let out = cfg.to_instructions();
        // The second store of -0.0 is not "already satisfied" by the first:
        // bitwise they differ, so it must survive.
        assert!(out.contains(&Instr::Copy {
            src: Value::Constant(Const::Double(-0.0)),
            dst: Value::Var(x),
        }));
    }
}
