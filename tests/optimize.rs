//! Optimizer and register-allocator behavior, observed through the emitted
//! assembly.

mod common;

use common::*;
use silex::ast::*;
use silex::OptFlags;

/// `int x = 10; x = x + 1; return 5;` compiles, with every pass on, to a
/// body with no arithmetic: just the constant return.
#[test]
fn dead_arithmetic_disappears() {
    let program = main_program(vec![
        local("x", TypeSpec::Int, Some(int(10))),
        stmt(expr_stmt(assign(
            var("x"),
            bin(BinaryOp::Add, var("x"), int(1)),
        ))),
        stmt(ret(int(5))),
    ]);
    let asm = compile(&program).unwrap();
    assert!(asm.contains("movl\t$5, %eax"));
    assert!(!asm.contains("addl"));
    assert!(!asm.contains("$10"));

    // Without optimization the addition is still there.
    let unopt = compile_with(&program, OptFlags::none()).unwrap();
    assert!(unopt.contains("addl"));
}

/// Constant conditions fold and the untaken arm vanishes entirely.
#[test]
fn constant_branch_folds_away() {
    let program = main_program(vec![stmt(Statement::If {
        cond: int(0),
        then: Box::new(ret(int(11))),
        otherwise: Some(Box::new(ret(int(22)))),
    })]);
    let asm = compile(&program).unwrap();
    assert!(asm.contains("$22"));
    assert!(!asm.contains("$11"));
    assert!(!asm.contains("jmp"));
}

/// Copies propagate through straight-line code until nothing is left but
/// the folded result.
#[test]
fn copy_propagation_feeds_folding() {
    // int a = 4; int b = a; return b + 3;  ->  return 7.
    let program = main_program(vec![
        local("a", TypeSpec::Int, Some(int(4))),
        local("b", TypeSpec::Int, Some(var("a"))),
        stmt(ret(bin(BinaryOp::Add, var("b"), int(3)))),
    ]);
    let asm = compile(&program).unwrap();
    assert!(asm.contains("movl\t$7, %eax"));
    assert!(!asm.contains("addl"));
}

/// Every subset of passes produces assembly (soundness is checked by the
/// execution corpus; here each combination must at least agree on the
/// folded return path being present).
#[test]
fn pass_combinations_all_compile() {
    let program = main_program(vec![
        local("x", TypeSpec::Int, Some(int(10))),
        stmt(Statement::If {
            cond: bin(BinaryOp::GreaterThan, var("x"), int(5)),
            then: Box::new(ret(bin(BinaryOp::Multiply, var("x"), int(3)))),
            otherwise: None,
        }),
        stmt(ret(int(1))),
    ]);
    for mask in 0u32..16 {
        let flags = OptFlags {
            fold_constants: mask & 1 != 0,
            eliminate_unreachable_code: mask & 2 != 0,
            propagate_copies: mask & 4 != 0,
            eliminate_dead_stores: mask & 8 != 0,
        };
        let asm = compile_with(&program, flags).unwrap();
        assert!(asm.contains("ret"), "no ret under flags {flags:?}");
    }
}

/// Twelve pseudoregisters interfering in a clique still color with K = 12:
/// no spill slots, so no stack frame and no memory operands on the
/// function's temporaries.
#[test]
fn clique_of_twelve_colors_without_spills() {
    let names = [
        "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l",
    ];
    let mut items: Vec<BlockItem> = names
        .iter()
        .enumerate()
        .map(|(i, n)| local(n, TypeSpec::Int, Some(int(i as i32 + 1))))
        .collect();
    // Sum them all so every variable is live across every other's
    // definition.
    let mut sum = var(names[0]);
    for n in &names[1..] {
        sum = bin(BinaryOp::Add, sum, var(n));
    }
    items.push(stmt(ret(sum)));
    let program = main_program(items);
    // Disable the optimizer so the variables actually survive to the
    // allocator.
    let asm = compile_with(&program, OptFlags::none()).unwrap();
    // No memory operands on the function's temporaries: every value stays
    // in a register. (Callee-saved saves and frame alignment may still
    // touch the stack.)
    assert!(
        !asm.contains("(%rbp"),
        "temporaries spilled to the stack:\n{asm}"
    );
}

/// Move-related pseudos coalesce away: a chain of copies comes out as a
/// single register with no intermediate moves.
#[test]
fn copy_chain_coalesces() {
    let program = Program {
        decls: vec![fun_def(
            "chain",
            vec![("x", TypeSpec::Int)],
            TypeSpec::Int,
            vec![
                local("a", TypeSpec::Int, Some(var("x"))),
                local("b", TypeSpec::Int, Some(var("a"))),
                stmt(ret(var("b"))),
            ],
        )],
    };
    // With the optimizer off, coalescing alone must erase the moves: the
    // argument arrives in %edi and leaves in %eax, so at most that one
    // move remains.
    let asm = compile_with(&program, OptFlags::none()).unwrap();
    let moves = asm
        .lines()
        .filter(|l| l.trim_start().starts_with("movl"))
        .count();
    assert!(moves <= 2, "copy chain left {moves} moves:\n{asm}");
    assert!(!asm.contains("(%rbp"), "copy chain spilled:\n{asm}");
}

/// Statics are never cached across calls by copy propagation.
#[test]
fn static_reload_after_call() {
    // static int g = 1; int bump(void); int main() { g = 7; bump(); return g; }
    let program = Program {
        decls: vec![
            Declaration::Var(VarDecl {
                name: "g".to_string(),
                ty: TypeSpec::Int,
                init: Some(Initializer::Single(int(1))),
                storage: Some(StorageClass::Static),
                loc: loc(),
            }),
            Declaration::Fun(FunDecl {
                name: "bump".to_string(),
                params: vec![],
                ty: TypeSpec::Function {
                    params: vec![],
                    ret: Box::new(TypeSpec::Int),
                },
                body: None,
                storage: None,
                loc: loc(),
            }),
            fun_def(
                "main",
                vec![],
                TypeSpec::Int,
                vec![
                    stmt(expr_stmt(assign(var("g"), int(7)))),
                    stmt(expr_stmt(call("bump", vec![]))),
                    stmt(ret(var("g"))),
                ],
            ),
        ],
    };
    let asm = compile(&program).unwrap();
    // The return must read g from memory after the call, not reuse 7.
    let after_call = asm.split("call").nth(1).expect("has a call");
    assert!(after_call.contains("g(%rip)"));
}

/// The NaN double-equality path survives optimization (constants are kept
/// apart from the comparison so nothing folds it away).
#[test]
fn nan_comparison_not_folded_to_true() {
    // double n = 0.0 / zero; return n == n;
    let program = Program {
        decls: vec![fun_def(
            "nan_eq",
            vec![("zero", TypeSpec::Double)],
            TypeSpec::Int,
            vec![
                local(
                    "n",
                    TypeSpec::Double,
                    Some(bin(BinaryOp::Divide, dbl(0.0), var("zero"))),
                ),
                stmt(ret(bin(BinaryOp::Equal, var("n"), var("n")))),
            ],
        )],
    };
    let asm = compile(&program).unwrap();
    // n == n must still be computed at run time, with the parity check.
    assert!(asm.contains("comisd"));
    assert!(asm.contains("jp"));
}
