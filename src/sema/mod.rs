//! Semantic analysis.
//!
//! One forward walk over the untyped AST that resolves identifiers and
//! structure tags through lexically scoped environments, enforces the
//! storage-class and linkage rules, checks and annotates types (inserting
//! implicit conversions as explicit casts), and flattens initializers. It
//! produces the typed AST and fills the symbol and type tables that every
//! later stage reads.
//!
//! Analysis stops at the first error; there is no recovery.

pub mod typed;

pub(crate) mod consteval;
mod init;
mod resolve;
mod typecheck;

use crate::ast;
use crate::error::{CompileError, CompileResult, ErrorKind, SourceLoc};
use crate::fx::{FxHashMap, FxHashSet};
use crate::scoped_map::ScopedMap;
use crate::symbols::{Sym, SymbolTable};
use crate::types::{Const, StructId, Type, TypeTable};
use typed::LoopId;

/// Analyze `program`, populating `symbols` and `types`.
pub fn analyze(
    program: &ast::Program,
    symbols: &mut SymbolTable,
    types: &mut TypeTable,
) -> CompileResult<typed::Program> {
    let mut an = Analyzer::new(symbols, types);
    let mut funcs = Vec::new();
    for decl in &program.decls {
        match decl {
            ast::Declaration::Var(d) => an.file_scope_var(d)?,
            ast::Declaration::Fun(d) => {
                if let Some(f) = an.fun_decl(d, false)? {
                    funcs.push(f);
                }
            }
            ast::Declaration::Struct(d) => an.struct_decl(d)?,
        }
    }
    Ok(typed::Program { funcs })
}

/// What a name is bound to in the ordinary-identifier environment.
#[derive(Clone, Copy)]
struct VarBinding {
    /// The symbol the name currently refers to.
    sym: Sym,
    /// Whether the binding has linkage (so a block-scope `extern` may
    /// legally rebind it).
    has_linkage: bool,
}

/// The enclosing constructs a `break` can target.
enum Breakable {
    Loop(LoopId),
    Switch(SwitchFrame),
}

/// Per-switch state accumulated while checking its body.
struct SwitchFrame {
    id: LoopId,
    /// The promoted type of the controlling expression; case values convert
    /// to it.
    ctrl_ty: Type,
    cases: Vec<Const>,
    has_default: bool,
}

/// The single pass that performs semantic analysis. Split across the
/// submodules by concern: declarations and scopes in `resolve`, expressions
/// and statements in `typecheck`, initializers in `init` and `consteval`.
struct Analyzer<'a> {
    symbols: &'a mut SymbolTable,
    types: &'a mut TypeTable,
    /// Ordinary identifiers, lexically scoped.
    vars: ScopedMap<String, VarBinding>,
    /// Structure tags, lexically scoped.
    tags: ScopedMap<String, StructId>,
    /// Every identifier with linkage, across all scopes; declarations of the
    /// same linked name resolve to one symbol.
    linked: FxHashMap<String, Sym>,
    /// Return type of the function body being checked.
    current_ret: Option<Type>,
    /// Innermost-last stack of loops and switches.
    breakable: Vec<Breakable>,
    next_loop: u32,
    /// Labels defined in the current function.
    labels: FxHashSet<String>,
    /// `goto`s seen in the current function, validated at its end.
    gotos: Vec<(String, SourceLoc)>,
}

impl<'a> Analyzer<'a> {
    fn new(symbols: &'a mut SymbolTable, types: &'a mut TypeTable) -> Self {
        Self {
            symbols,
            types,
            vars: ScopedMap::new(),
            tags: ScopedMap::new(),
            linked: FxHashMap::default(),
            current_ret: None,
            breakable: Vec::new(),
            next_loop: 0,
            labels: FxHashSet::default(),
            gotos: Vec::new(),
        }
    }

    fn fresh_loop(&mut self) -> LoopId {
        let id = LoopId(self.next_loop);
        self.next_loop += 1;
        id
    }

    fn err<T>(&self, kind: ErrorKind, loc: SourceLoc, msg: impl Into<String>) -> CompileResult<T> {
        Err(CompileError::new(kind, loc, msg))
    }
}
