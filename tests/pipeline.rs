mod common;

use common::{compile, resolve, run, Outcome};
use sysyc::{
    ir::{BinOp, Instruction},
    opt,
};

fn exit(text: &str, input: &[i32]) -> i32 {
    run(text, input).exit
}

#[test]
fn array_round_trip() {
    let text = "int main() { int a[4]; a[1] = 3; return a[1]; }";
    assert_eq!(exit(text, &[]), 3);
}

#[test]
fn arithmetic_follows_c_semantics() {
    let text = "int main() {
                    int x = getint(), y = getint();
                    putint(x / 4); putch(32);
                    putint(x % 4); putch(32);
                    putint(x * 8); putch(32);
                    putint(x / y); putch(32);
                    putint(x % y); putch(32);
                    putint(-x); putch(32);
                    putint(!x);
                    return x < y;
                }";

    let outcome = run(text, &[-7, 2]);
    assert_eq!(
        outcome,
        Outcome {
            exit: 1,
            output: String::from("-1 -3 -56 -3 -1 7 0"),
        }
    );
}

#[test]
fn common_subexpressions_are_computed_once() {
    let text = "int main() {
                    int x = getint(), y = getint();
                    int a = x * y + 1;
                    int b = x * y + 2;
                    return a + b;
                }";

    assert_eq!(exit(text, &[3, 4]), 27);

    let products = |program: &sysyc::ir::Program| {
        program.code[0]
            .body
            .iter()
            .filter(|instruction| {
                matches!(
                    instruction,
                    Instruction::Binary {
                        op: BinOp::Mul,
                        ..
                    }
                )
            })
            .count()
    };

    let program = resolve(text);
    assert_eq!(products(&program), 2);
    assert_eq!(products(&opt::optimize(program)), 1);
}

#[test]
fn swapped_arguments_reach_the_callee() {
    let text = "int f(int a, int b) { return a * 10 + b; }
                int g(int a, int b, int c) { return f(c, a) * 100 + f(b, c); }
                int main() {
                    int x = getint(), y = getint();
                    return f(y, x) + g(x, y, 5) * 1000;
                }";

    // f(2, 1) = 21; g(1, 2, 5) = 51 * 100 + 25
    assert_eq!(exit(text, &[1, 2]), 21 + 5125 * 1000);
}

#[test]
fn values_survive_register_pressure() {
    let count = 40;
    let mut text = String::from("int main() {\n");

    for index in 0..count {
        text.push_str(&format!("  int v{0} = getint() + {0};\n", index));
    }

    text.push_str("  int i = 0, sum = 0;\n  while (i < 3) {\n");
    for index in 0..count {
        text.push_str(&format!("    sum = sum + v{} * {};\n", index, index + 1));
    }

    text.push_str("    i = i + 1;\n  }\n  putint(sum);\n  return 0;\n}\n");

    let input: Vec<i32> = (0..count).map(|index| index * 3 - 7).collect();
    let expected: i32 = 3 * (0..count)
        .map(|index| (input[index as usize] + index) * (index + 1))
        .sum::<i32>();

    assert_eq!(run(&text, &input).output, expected.to_string());

    let program = compile(&text, true);
    assert!(program.code[0].frame > 0);
}

#[test]
fn recursion_and_callee_saved_registers() {
    let text = "int fib(int n) {
                    if (n < 2) return n;
                    return fib(n - 1) + fib(n - 2);
                }

                int fact(int n) {
                    int acc = 1;
                    while (n > 1) { acc = acc * n; n = n - 1; }
                    return acc;
                }

                int main() { return fib(15) + fact(6); }";

    assert_eq!(exit(text, &[]), 610 + 720);
}

#[test]
fn calls_observe_global_writes() {
    let text = "int g;
                void bump() { g = g + 1; }
                int main() {
                    g = 1;
                    int a = g;
                    bump();
                    int b = g;
                    bump();
                    return a * 100 + b * 10 + g;
                }";

    assert_eq!(exit(text, &[]), 123);
}

#[test]
fn global_initializers_run_before_main() {
    let text = "int g = 5;
                int table[2][3] = {{1, 2}, {3}};
                const int c[3] = {10, 20, 30};
                int main() {
                    int i = getint();
                    return g + table[0][1] + table[1][0] + c[i] + c[0];
                }";

    assert_eq!(exit(text, &[2]), 5 + 2 + 3 + 30 + 10);
}

#[test]
fn arrays_decay_to_pointers() {
    let text = "void fill(int a[], int n) {
                    int i = 0;
                    while (i < n) { a[i] = i * i; i = i + 1; }
                }

                int total(int m[][3], int rows) {
                    int i = 0, s = 0;
                    while (i < rows) {
                        s = s + m[i][0] + m[i][1] + m[i][2];
                        i = i + 1;
                    }
                    return s;
                }

                int main() {
                    int grid[2][3];
                    fill(grid[0], 3);
                    fill(grid[1], 3);
                    int before = grid[1][2];
                    grid[1][2] = 100;
                    return before + total(grid, 2);
                }";

    // Cada fila: 0 + 1 + 4; la última celda se reemplaza por 100
    assert_eq!(exit(text, &[]), 4 + 5 + 101);
}

#[test]
fn short_circuit_skips_side_effects() {
    let text = "int calls;
                int touch(int v) { calls = calls + 1; return v; }
                int main() {
                    int x = getint();
                    if (x > 0 && touch(x) > 5) putch(65);
                    if (x > 0 || touch(1)) putch(66);
                    int both = touch(0) || touch(2);
                    putint(both);
                    return calls;
                }";

    assert_eq!(
        run(text, &[-1]),
        Outcome {
            exit: 3,
            output: String::from("B1"),
        }
    );
}

#[test]
fn loops_with_break_and_continue() {
    let text = "int main() {
                    int i = 0, s = 0;
                    while (1) {
                        i = i + 1;
                        if (i % 2 == 0) continue;
                        if (i > 9) break;
                        s = s + i;
                    }
                    return s;
                }";

    assert_eq!(exit(text, &[]), 1 + 3 + 5 + 7 + 9);
}

#[test]
fn sorting_runtime_arrays() {
    let text = "int main() {
                    int a[16];
                    int n = getarray(a);
                    int i = 0;
                    while (i < n) {
                        int j = 0;
                        while (j < n - i - 1) {
                            if (a[j] > a[j + 1]) {
                                int t = a[j];
                                a[j] = a[j + 1];
                                a[j + 1] = t;
                            }
                            j = j + 1;
                        }
                        i = i + 1;
                    }
                    putarray(n, a);
                    return n;
                }";

    let outcome = run(text, &[6, 5, -2, 9, 0, 5, 1]);
    assert_eq!(outcome.output, "6: -2 0 1 5 5 9\n");
    assert_eq!(outcome.exit, 6);
}

#[test]
fn large_local_arrays() {
    let text = "int main() {
                    int big[1200] = {1, 2, 3};
                    big[1100] = 7;
                    int i = getint();
                    big[i] = big[i] + big[2];
                    return big[1100] + big[i] + big[0];
                }";

    assert_eq!(exit(text, &[1000]), 7 + 3 + 1);
}

#[test]
fn tigger_dump_lists_frames() {
    let program = compile("int g; int main() { int a[3]; a[0] = g; return a[0]; }", true);
    let dump = program.to_string();

    assert!(dump.starts_with("v0 = 0\n"));
    assert!(dump.contains("f_main [0] [3]"));
    assert!(dump.contains("end f_main"));
}
