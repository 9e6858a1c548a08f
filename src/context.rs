//! Compilation context and main entry point.
//!
//! The `Context` owns the process-wide state of one compilation: the symbol
//! table, the structure type table, and the options. Stages run strictly in
//! order, each consuming the previous stage's representation; the first
//! error aborts the pipeline with no partial output.

use crate::asm;
use crate::ast;
use crate::emit;
use crate::error::CompileResult;
use crate::fixup;
use crate::opt;
use crate::options::Options;
use crate::regalloc;
use crate::sema;
use crate::symbols::SymbolTable;
use crate::tac;
use crate::types::TypeTable;

/// Per-compilation state and the compilation pipeline.
pub struct Context {
    /// The symbol table, populated during semantic analysis (plus
    /// temporaries and literal-pool constants added by later stages).
    pub symbols: SymbolTable,
    /// The structure type table, read-only after semantic analysis.
    pub types: TypeTable,
    /// Target and pass selection.
    pub options: Options,
}

impl Context {
    /// Create a fresh context. A context compiles one translation unit;
    /// nothing carries over between compilations.
    pub fn new(options: Options) -> Self {
        Self {
            symbols: SymbolTable::new(),
            types: TypeTable::new(),
            options,
        }
    }

    /// Run the whole pipeline on a parsed translation unit, producing
    /// assembly text.
    pub fn compile(&mut self, program: &ast::Program) -> CompileResult<String> {
        let typed = sema::analyze(program, &mut self.symbols, &mut self.types)?;
        log::debug!("semantic analysis: {} function(s)", typed.funcs.len());

        let mut tac = tac::lower::lower(&typed, &mut self.symbols, &self.types);
        log::debug!(
            "lowered to TAC: {} function(s), {} static object(s)",
            tac.funcs.len(),
            tac.statics.len()
        );

        for f in &mut tac.funcs {
            opt::optimize(f, &self.symbols, &self.options.opt);
        }

        let (mut module, asm_syms) = asm::lower::lower(&tac, &mut self.symbols, &self.types);
        let aliased = module.aliased.clone();
        for f in &mut module.funcs {
            regalloc::run(f, &asm_syms, &aliased);
            fixup::run(f);
        }

        emit::emit(
            &module,
            &self.symbols,
            &asm_syms,
            &self.types,
            &self.options.target,
        )
    }
}
