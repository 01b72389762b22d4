use std::collections::HashSet;

use super::*;
use crate::{
    ir::{BinOp, Function, LValue, Program, RValue, RelOp},
    lex::Lexer,
    source,
};

fn lower(text: &str) -> Semantic<Program> {
    let (start, stream) = source::consume(text.as_bytes(), "test.sy");
    let tokens = Lexer::new(start, stream)
        .try_exhaustive()
        .expect("lexer failed");

    parse::parse(tokens.iter()).expect("parser failed").resolve()
}

fn program(text: &str) -> Program {
    match lower(text) {
        Ok(program) => program,
        Err(error) => panic!("unexpected error: {}", error.val()),
    }
}

fn error(text: &str) -> SemanticError {
    lower(text).err().expect("expected an error").into_inner()
}

fn function<'a>(program: &'a Program, name: &str) -> &'a Function {
    program
        .code
        .iter()
        .find(|function| function.name == name)
        .expect("no such function")
}

fn var(id: u32) -> RValue {
    RValue::Symbol(Symbol::var(id))
}

fn temp(id: u32) -> RValue {
    RValue::Symbol(Symbol::temp(id))
}

fn store(symbol: Symbol, index: Option<RValue>, value: RValue) -> Instruction {
    Instruction::Assign {
        target: LValue { symbol, index },
        value,
    }
}

#[test]
fn constant_expressions_fold() {
    let program = program(
        "int main() {
             return (7 / -2) * 3 + -7 % 3 - (2147483647 + 1 == -2147483647 - 1)
                 + !5 + (3 <= 3) * 10 + (1 || 0) * 100;
         }",
    );

    assert_eq!(
        function(&program, "main").body,
        vec![Instruction::Return(Some(RValue::Const(99)))]
    );
}

#[test]
fn short_circuit_never_evaluates_skipped_operand() {
    let program = program(
        "int f() { putint(1); return 1; }
         int main() {
             int a = 0 && f();
             if (1 || f()) a = 2;
             while (0 && f()) a = 3;
             return a || 0 && f();
         }",
    );

    let calls = function(&program, "main")
        .body
        .iter()
        .filter(|instruction| matches!(instruction, Instruction::Call { .. }))
        .count();

    assert_eq!(calls, 0);
}

#[test]
fn conditions_become_fused_branches() {
    let program = program(
        "int main() {
             int a = getint();
             if (a > 1 && a < 5) return 1;
             return 0;
         }",
    );

    let main = function(&program, "main");
    assert_eq!(
        main.body,
        vec![
            Instruction::Call {
                target: String::from("getint"),
                arguments: vec![],
                output: Some(Symbol::temp(0)),
            },
            store(Symbol::var(0), None, temp(0)),
            Instruction::Branch {
                lhs: var(0),
                rel: RelOp::Le,
                rhs: RValue::Const(1),
                target: Label(1),
            },
            Instruction::Branch {
                lhs: var(0),
                rel: RelOp::Ge,
                rhs: RValue::Const(5),
                target: Label(1),
            },
            Instruction::Return(Some(RValue::Const(1))),
            Instruction::SetLabel(Label(1)),
            Instruction::Return(Some(RValue::Const(0))),
        ]
    );

    let decls: Vec<_> = main.decls.iter().map(|decl| decl.symbol).collect();
    assert_eq!(decls, vec![Symbol::var(0), Symbol::temp(0)]);
}

#[test]
fn labels_are_unique_and_resolved() {
    let program = program(
        "int g;
         int f(int n) {
             while (n > 0 && !(n == 3 || g)) {
                 if (n % 2) { n = n - 1; continue; } else n = n / 2;
                 if (n == 7) break;
             }
             return n || g;
         }
         int main() {
             int i = 0;
             while (i < 10) { if (f(i) && i) g = g + 1; i = i + 1; }
             int z[8] = {};
             return g;
         }",
    );

    let mut defined = HashSet::new();
    for function in &program.code {
        let local: HashSet<_> = function
            .body
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::SetLabel(label) => Some(*label),
                _ => None,
            })
            .collect();

        for instruction in &function.body {
            if let Instruction::SetLabel(label) = instruction {
                assert!(defined.insert(*label), "{} defined twice", label);
            }

            if let Some(target) = instruction.jump_target() {
                assert!(local.contains(&target), "{} is not defined", target);
            }
        }
    }
}

#[test]
fn array_round_trip_lowering() {
    let program = program("int main(){int a[3]; a[0]=1; a[1]=2; a[2]=a[0]+a[1]; return a[2];}");
    let a = Symbol::var(0);

    assert_eq!(
        function(&program, "main").body,
        vec![
            store(a, Some(RValue::Const(0)), RValue::Const(1)),
            store(a, Some(RValue::Const(4)), RValue::Const(2)),
            Instruction::Load {
                dest: Symbol::temp(0),
                array: a,
                index: RValue::Const(0),
            },
            Instruction::Load {
                dest: Symbol::temp(1),
                array: a,
                index: RValue::Const(4),
            },
            Instruction::Binary {
                dest: Symbol::temp(2),
                op: BinOp::Add,
                lhs: temp(0),
                rhs: temp(1),
            },
            store(a, Some(RValue::Const(8)), temp(2)),
            Instruction::Load {
                dest: Symbol::temp(3),
                array: a,
                index: RValue::Const(8),
            },
            Instruction::Return(Some(temp(3))),
        ]
    );
}

#[test]
fn nested_initializers_align_to_subarrays() {
    let program = program(
        "int g[2][3] = {{1}, 4, 5};
         int main() { return g[1][1]; }",
    );

    let g = Symbol::var(0);
    assert_eq!(
        program.globals,
        vec![Decl {
            symbol: g,
            size: Some(6)
        }]
    );

    assert_eq!(
        function(&program, "main").body[..4],
        [
            store(g, Some(RValue::Const(0)), RValue::Const(1)),
            store(g, Some(RValue::Const(12)), RValue::Const(4)),
            store(g, Some(RValue::Const(16)), RValue::Const(5)),
            Instruction::Load {
                dest: Symbol::temp(0),
                array: g,
                index: RValue::Const(16),
            },
        ]
    );
}

#[test]
fn long_zero_runs_become_loops() {
    let program = program("int main() { int a[10] = {1, 0, 0, 2}; return a[9]; }");
    let a = Symbol::var(0);
    let cursor = Symbol::temp(0);

    assert_eq!(
        function(&program, "main").body,
        vec![
            store(a, Some(RValue::Const(0)), RValue::Const(1)),
            store(a, Some(RValue::Const(4)), RValue::Const(0)),
            store(a, Some(RValue::Const(8)), RValue::Const(0)),
            store(a, Some(RValue::Const(12)), RValue::Const(2)),
            store(cursor, None, RValue::Const(16)),
            Instruction::SetLabel(Label(1)),
            store(a, Some(temp(0)), RValue::Const(0)),
            Instruction::Binary {
                dest: cursor,
                op: BinOp::Add,
                lhs: temp(0),
                rhs: RValue::Const(4),
            },
            Instruction::Branch {
                lhs: temp(0),
                rel: RelOp::Lt,
                rhs: RValue::Const(40),
                target: Label(1),
            },
            Instruction::Load {
                dest: Symbol::temp(1),
                array: a,
                index: RValue::Const(36),
            },
            Instruction::Return(Some(temp(1))),
        ]
    );
}

#[test]
fn constant_arrays_fold_constant_indices() {
    let program = program(
        "const int c[3] = {1, 2, 3};
         int main() { return c[2] + c[0]; }",
    );

    let main = function(&program, "main");
    assert_eq!(main.body.len(), 4);
    assert_eq!(main.body[3], Instruction::Return(Some(RValue::Const(4))));
}

#[test]
fn global_initialization_moves_to_main() {
    let program = program(
        "int a = 1;
         int b = a + 1;
         int main() { return b * 2; }",
    );

    let main = function(&program, "main");
    assert_eq!(
        main.body,
        vec![
            store(Symbol::var(0), None, RValue::Const(1)),
            Instruction::Binary {
                dest: Symbol::temp(1),
                op: BinOp::Add,
                lhs: var(0),
                rhs: RValue::Const(1),
            },
            store(Symbol::var(1), None, temp(1)),
            Instruction::Binary {
                dest: Symbol::temp(0),
                op: BinOp::Mul,
                lhs: var(1),
                rhs: RValue::Const(2),
            },
            Instruction::Return(Some(temp(0))),
        ]
    );

    let decls: Vec<_> = main.decls.iter().map(|decl| decl.symbol).collect();
    assert_eq!(decls, vec![Symbol::temp(0), Symbol::temp(1)]);

    let globals: Vec<_> = program.globals.iter().map(|decl| decl.symbol).collect();
    assert_eq!(globals, vec![Symbol::var(0), Symbol::var(1)]);
}

#[test]
fn partial_indexing_yields_pointers() {
    let program = program(
        "int sum(int a[][2], int n) { return a[n][1]; }
         int first(int v[]) { return v[0]; }
         int main() { int m[3][2]; return sum(m, 1) + first(m[1]); }",
    );

    let p = |id| RValue::Symbol(Symbol::param(id));
    assert_eq!(
        function(&program, "sum").body,
        vec![
            Instruction::Binary {
                dest: Symbol::temp(0),
                op: BinOp::Mul,
                lhs: p(1),
                rhs: RValue::Const(2),
            },
            Instruction::Binary {
                dest: Symbol::temp(1),
                op: BinOp::Add,
                lhs: temp(0),
                rhs: RValue::Const(1),
            },
            Instruction::Binary {
                dest: Symbol::temp(2),
                op: BinOp::Mul,
                lhs: temp(1),
                rhs: RValue::Const(4),
            },
            Instruction::Load {
                dest: Symbol::temp(3),
                array: Symbol::param(0),
                index: temp(2),
            },
            Instruction::Return(Some(temp(3))),
        ]
    );

    let main = function(&program, "main");
    assert!(main.body.contains(&Instruction::Binary {
        dest: Symbol::temp(1),
        op: BinOp::Add,
        lhs: var(0),
        rhs: RValue::Const(8),
    }));

    assert!(main.body.contains(&Instruction::Call {
        target: String::from("sum"),
        arguments: vec![var(0), RValue::Const(1)],
        output: Some(Symbol::temp(0)),
    }));
}

#[test]
fn timing_calls_carry_line_and_are_hidden() {
    let program = program("int main() {\n  starttime();\n  stoptime();\n  return 0;\n}");
    let main = function(&program, "main");

    assert_eq!(
        main.body[0],
        Instruction::Call {
            target: String::from("starttime"),
            arguments: vec![RValue::Const(2)],
            output: None,
        }
    );

    assert!(!main.to_string().contains("time"));
}

#[test]
fn void_functions_get_implicit_return() {
    let program = program("void f(int x) { if (x) return; putint(x); } int main() { f(1); return 0; }");
    let f = function(&program, "f");

    assert_eq!(f.body.last(), Some(&Instruction::Return(None)));
    assert!(function(&program, "main")
        .body
        .iter()
        .any(|instruction| matches!(instruction, Instruction::Call { output: None, .. })));
}

#[test]
fn user_errors() {
    use SemanticError::*;

    let cases: [(&str, fn(&SemanticError) -> bool); 13] = [
        ("int main() { return x; }", |e| matches!(e, Undefined(_))),
        ("int main() { int a; int a; return 0; }", |e| matches!(e, Redefinition(_))),
        ("int main() { break; return 0; }", |e| matches!(e, BreakOutsideLoop)),
        ("int main() { continue; }", |e| matches!(e, ContinueOutsideLoop)),
        ("const int n = 1; int main() { n = 2; return 0; }", |e| matches!(e, AssignToConst(_))),
        ("int main() { int a[2]; a = 1; return 0; }", |e| matches!(e, AssignToArray(_))),
        ("int a[2] = {1, 2, 3}; int main() { return 0; }", |e| matches!(e, TooManyInitializers)),
        ("int main() { return 1 / (2 - 2); }", |e| matches!(e, DivisionByZero)),
        ("int f() { return 0; }", |e| matches!(e, NoMain)),
        ("int main() { int n = 2; int a[n]; return 0; }", |e| matches!(e, NotConstant)),
        ("const int c[2] = {1, 2}; int main() { return c[2]; }", |e| {
            matches!(e, IndexOutOfBounds(_, 2))
        }),
        ("int main() { putint(); return 0; }", |e| matches!(e, Arity(_, 1, 0))),
        ("void f() {} int main() { f(); return f(); }", |e| matches!(e, VoidValue(_))),
    ];

    for (source, check) in cases {
        let error = error(source);
        assert!(check(&error), "unexpected error for `{}`: {}", source, error);
    }
}
