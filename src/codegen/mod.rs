//! Traducción de Eeyore a Tigger.
//!
//! Por cada función se calcula la vida de sus símbolos, se colorea el
//! grafo de interferencia y se dispone el marco de pila. Después cada
//! instrucción se reescribe sobre registros físicos: los símbolos
//! derramados se cargan y almacenan alrededor de cada uso a través de
//! `t0` y `t1`, que nunca se asignan a símbolos.
//!
//! Convención de llamada: los argumentos viajan en `a0`-`a7` y el
//! resultado en `a0`. La función llamada preserva `s0`-`s11`; los
//! demás registros asignables los preserva quien llama, y solo si
//! siguen vivos después de la llamada.

use std::collections::HashSet;

use log::debug;

use crate::{
    analysis::Dataflow,
    ir::{self, BinOp, RValue, Symbol, SymbolKind},
    tigger::{
        self, Global, GlobalDecl, Instruction, Operand, Reg, MAX_ARGUMENTS, REGISTER_COUNT,
    },
};

use liveness::{Interference, Liveness};
use moves::parallel_move;
use regs::RegSet;

mod color;
mod liveness;
mod moves;
mod regs;

pub fn lower(program: &ir::Program) -> tigger::Program {
    let arrays: HashSet<Symbol> = program
        .globals
        .iter()
        .filter(|decl| decl.size.is_some())
        .map(|decl| decl.symbol)
        .collect();

    let globals = program
        .globals
        .iter()
        .map(|decl| {
            assert_eq!(decl.symbol.kind, SymbolKind::Var, "global {} is not a variable", decl.symbol);

            GlobalDecl {
                global: Global(decl.symbol.id),
                size: decl.size,
            }
        })
        .collect();

    let code = program
        .code
        .iter()
        .map(|function| lower_function(function, &arrays))
        .collect();

    tigger::Program { globals, code }
}

/// Ubicación de una ranura local durante toda la función.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Home {
    Reg(Reg),

    /// Escalar derramado, en la ranura de pila indicada.
    Stack(u32),

    /// Arreglo local a partir de la ranura de pila indicada.
    Array(u32),
}

/// Disposición del marco de pila, en palabras.
///
/// Orden: parámetros derramados, registros `s` que la función ocupa,
/// registros que se preservan alrededor de llamadas, y por último
/// escalares derramados y arreglos en orden de declaración.
struct Frame {
    homes: Vec<Home>,
    callee_saved: Vec<(Reg, u32)>,
    caller_saved: [Option<u32>; REGISTER_COUNT],
    size: u32,
}

impl Frame {
    fn new(function: &ir::Function, dataflow: &Dataflow, registers: &[Option<Reg>], has_calls: bool) -> Self {
        fn take(size: &mut u32, words: u32) -> u32 {
            let slot = *size;
            *size += words;
            slot
        }

        let mut size = 0;
        let mut homes = Vec::with_capacity(dataflow.slot_count());
        let parameters = function.parameters as usize;

        for register in &registers[..parameters] {
            homes.push(match register {
                Some(reg) => Home::Reg(*reg),
                None => Home::Stack(take(&mut size, 1)),
            });
        }

        let used = registers
            .iter()
            .flatten()
            .fold(RegSet::empty(), |set, &reg| set | RegSet::single(reg));

        let callee_saved = (used & RegSet::CALLEE_SAVED)
            .regs()
            .map(|reg| (reg, take(&mut size, 1)))
            .collect();

        let mut caller_saved = [None; REGISTER_COUNT];
        if has_calls {
            for reg in (used & RegSet::CALLER_SAVED).regs() {
                caller_saved[reg.index()] = Some(take(&mut size, 1));
            }
        }

        for slot in parameters..dataflow.slot_count() {
            let decl = dataflow.slot_decl(slot);
            homes.push(match (decl.size, registers[slot]) {
                (Some(len), _) => Home::Array(take(&mut size, len)),
                (None, Some(reg)) => Home::Reg(reg),
                (None, None) => Home::Stack(take(&mut size, 1)),
            });
        }

        Frame {
            homes,
            callee_saved,
            caller_saved,
            size,
        }
    }
}

fn lower_function(function: &ir::Function, global_arrays: &HashSet<Symbol>) -> tigger::Function {
    assert!(
        function.parameters as usize <= MAX_ARGUMENTS,
        "f_{} takes more than {} parameters",
        function.name,
        MAX_ARGUMENTS
    );

    let dataflow = Dataflow::new(function);
    let liveness = Liveness::new(function, &dataflow);
    let interference = Interference::new(&liveness, dataflow.slot_count());
    let registers = color::assign(function, &dataflow, &interference);

    let has_calls = function
        .body
        .iter()
        .any(|instruction| matches!(instruction, ir::Instruction::Call { .. }));

    let frame = Frame::new(function, &dataflow, &registers, has_calls);

    debug!(
        "f_{}: {} slots, {} in registers, {} saved registers, frame of {} words",
        function.name,
        dataflow.slot_count(),
        registers.iter().flatten().count(),
        frame.callee_saved.len(),
        frame.size
    );

    let mut lowering = Lowering {
        function,
        dataflow: &dataflow,
        liveness: &liveness,
        global_arrays,
        frame: &frame,
        body: Vec::new(),
    };

    if !function.body.is_empty() {
        lowering.entry();
    }

    for position in 0..function.body.len() {
        lowering.instruction(position);
    }

    tigger::Function {
        name: function.name.clone(),
        parameters: function.parameters,
        frame: frame.size,
        body: lowering.body,
    }
}

struct Lowering<'a> {
    function: &'a ir::Function,
    dataflow: &'a Dataflow,
    liveness: &'a Liveness,
    global_arrays: &'a HashSet<Symbol>,
    frame: &'a Frame,
    body: Vec<Instruction>,
}

impl Lowering<'_> {
    fn emit(&mut self, instruction: Instruction) {
        self.body.push(instruction);
    }

    fn home(&self, symbol: Symbol) -> Option<Home> {
        self.dataflow.slot(symbol).map(|slot| self.frame.homes[slot])
    }

    fn is_dead_after(&self, position: usize, symbol: Symbol) -> bool {
        match self.dataflow.slot(symbol) {
            Some(slot) => !self.liveness.is_live_out(self.dataflow, position, slot),
            None => false,
        }
    }

    /// Preserva registros `s` y ubica los parámetros vivos en su hogar.
    fn entry(&mut self) {
        for &(reg, slot) in &self.frame.callee_saved {
            self.body.push(Instruction::StackStore { value: reg, slot });
        }

        let mut moves = Vec::new();
        for param in 0..self.function.parameters {
            let source = Reg::argument(param as usize);
            let slot = match self.dataflow.slot(Symbol::param(param)) {
                Some(slot) if self.liveness.is_live_in(0, slot) => slot,
                _ => continue,
            };

            match self.frame.homes[slot] {
                Home::Reg(reg) => moves.push((reg, source)),
                Home::Stack(slot) => self.emit(Instruction::StackStore { value: source, slot }),
                Home::Array(_) => unreachable!("parameter p{} is a local array", param),
            }
        }

        self.body.extend(parallel_move(&moves, Reg::T0));
    }

    /// Registro que contiene a `value`, cargándolo en `scratch` si no
    /// reside en uno. Un arreglo produce su dirección.
    fn read(&mut self, value: RValue, scratch: Reg) -> Reg {
        let symbol = match value {
            RValue::Const(0) => return Reg::ZERO,
            RValue::Const(value) => {
                self.emit(Instruction::LoadImm { dest: scratch, value });
                return scratch;
            }

            RValue::Symbol(symbol) => symbol,
        };

        let dest = scratch;
        let instruction = match self.home(symbol) {
            Some(Home::Reg(reg)) => return reg,
            Some(Home::Stack(slot)) => Instruction::StackLoad { slot, dest },
            Some(Home::Array(slot)) => Instruction::StackAddress { slot, dest },

            None => {
                let global = Global(symbol.id);
                if self.global_arrays.contains(&symbol) {
                    Instruction::GlobalAddress { global, dest }
                } else {
                    Instruction::GlobalLoad { global, dest }
                }
            }
        };

        self.emit(instruction);
        scratch
    }

    /// Deja a `value` exactamente en `dest`.
    fn read_into(&mut self, value: RValue, dest: Reg) {
        match value {
            RValue::Const(value) => self.emit(Instruction::LoadImm { dest, value }),
            RValue::Symbol(_) => {
                let source = self.read(value, dest);
                if source != dest {
                    self.emit(Instruction::Move { dest, source });
                }
            }
        }
    }

    /// Registro donde se calcula un nuevo valor de `symbol`.
    fn target(&self, symbol: Symbol, scratch: Reg) -> Reg {
        match self.home(symbol) {
            Some(Home::Reg(reg)) => reg,
            _ => scratch,
        }
    }

    /// Lleva a su hogar un valor de `symbol` calculado en `reg`.
    fn commit(&mut self, symbol: Symbol, reg: Reg) {
        match self.home(symbol) {
            Some(Home::Reg(_)) => (),
            Some(Home::Stack(slot)) => self.emit(Instruction::StackStore { value: reg, slot }),
            Some(Home::Array(_)) => unreachable!("array {} is assigned as a scalar", symbol),

            None => {
                let address = reg.other_scratch();
                self.emit(Instruction::GlobalAddress {
                    global: Global(symbol.id),
                    dest: address,
                });

                self.emit(Instruction::Store {
                    base: address,
                    offset: 0,
                    value: reg,
                });
            }
        }
    }

    /// Base y desplazamiento de `array[index]`. Ocupa `t0` y `t1`.
    fn address(&mut self, array: Symbol, index: RValue) -> (Reg, i32) {
        let base = self.read(RValue::Symbol(array), Reg::T0);

        match index {
            RValue::Const(offset) => (base, offset),
            RValue::Symbol(_) => {
                let index = self.read(index, Reg::T1);
                self.emit(Instruction::Binary {
                    dest: Reg::T0,
                    op: BinOp::Add,
                    lhs: base,
                    rhs: Operand::Reg(index),
                });

                (Reg::T0, 0)
            }
        }
    }

    fn instruction(&mut self, position: usize) {
        use ir::Instruction as Ir;

        let function = self.function;
        match &function.body[position] {
            Ir::Unary { dest, op, operand } => {
                if self.is_dead_after(position, *dest) {
                    return;
                }

                let reg = self.target(*dest, Reg::T0);
                match operand {
                    RValue::Const(value) => self.emit(Instruction::LoadImm {
                        dest: reg,
                        value: op.fold(*value),
                    }),

                    RValue::Symbol(_) => {
                        let operand = self.read(*operand, Reg::T0);
                        self.emit(Instruction::Unary {
                            dest: reg,
                            op: *op,
                            operand,
                        });
                    }
                }

                self.commit(*dest, reg);
            }

            Ir::Binary { dest, op, lhs, rhs } => {
                if self.is_dead_after(position, *dest) {
                    return;
                }

                let (op, lhs, rhs) = match (lhs, rhs) {
                    (RValue::Const(_), RValue::Const(_)) => {
                        panic!("unfolded constant operation in f_{}", function.name)
                    }

                    (RValue::Const(_), _) => match op.swapped() {
                        Some(swapped) => (swapped, *rhs, *lhs),
                        None => (*op, *lhs, *rhs),
                    },

                    _ => (*op, *lhs, *rhs),
                };

                let lhs = self.read(lhs, Reg::T0);
                let rhs = match rhs {
                    RValue::Const(value) => Operand::Imm(value),
                    RValue::Symbol(_) => Operand::Reg(self.read(rhs, Reg::T1)),
                };

                let reg = self.target(*dest, Reg::T0);
                self.emit(Instruction::Binary {
                    dest: reg,
                    op,
                    lhs,
                    rhs,
                });

                self.commit(*dest, reg);
            }

            Ir::Assign { target, value } => match target.index {
                Some(index) => {
                    let (base, offset) = self.address(target.symbol, index);
                    let value = self.read(*value, Reg::T1);
                    self.emit(Instruction::Store {
                        base,
                        offset,
                        value,
                    });
                }

                None => {
                    let dest = target.symbol;
                    if self.is_dead_after(position, dest) {
                        return;
                    }

                    let reg = self.target(dest, Reg::T0);
                    match value {
                        RValue::Const(value) => {
                            self.emit(Instruction::LoadImm { dest: reg, value: *value });
                            self.commit(dest, reg);
                        }

                        RValue::Symbol(_) => {
                            let source = self.read(*value, reg);
                            match self.home(dest) {
                                Some(Home::Reg(_)) if source != reg => {
                                    self.emit(Instruction::Move { dest: reg, source })
                                }

                                Some(Home::Reg(_)) => (),
                                _ => self.commit(dest, source),
                            }
                        }
                    }
                }
            },

            Ir::Load { dest, array, index } => {
                if self.is_dead_after(position, *dest) {
                    return;
                }

                let (base, offset) = self.address(*array, *index);
                let reg = self.target(*dest, Reg::T1);
                self.emit(Instruction::Load {
                    dest: reg,
                    base,
                    offset,
                });

                self.commit(*dest, reg);
            }

            Ir::Branch {
                lhs,
                rel,
                rhs,
                target,
            } => {
                let lhs = self.read(*lhs, Reg::T0);
                let rhs = self.read(*rhs, Reg::T1);
                self.emit(Instruction::Branch {
                    lhs,
                    rel: *rel,
                    rhs,
                    target: *target,
                });
            }

            Ir::Jump(target) => self.emit(Instruction::Jump(*target)),
            Ir::SetLabel(label) => self.emit(Instruction::SetLabel(*label)),

            Ir::Call {
                target,
                arguments,
                output,
            } => self.call(position, target, arguments, *output),

            Ir::Return(value) => {
                if let Some(value) = value {
                    self.read_into(*value, Reg::A0);
                }

                for &(reg, slot) in &self.frame.callee_saved {
                    self.body.push(Instruction::StackLoad { slot, dest: reg });
                }

                self.emit(Instruction::Return);
            }
        }
    }

    fn call(&mut self, position: usize, target: &str, arguments: &[RValue], output: Option<Symbol>) {
        assert!(
            arguments.len() <= MAX_ARGUMENTS,
            "call to f_{} passes more than {} arguments",
            target,
            MAX_ARGUMENTS
        );

        let output = output.filter(|&output| !self.is_dead_after(position, output));
        let output_reg = output.and_then(|output| match self.home(output) {
            Some(Home::Reg(reg)) => Some(reg),
            _ => None,
        });

        let frame = self.frame;
        let preserved: Vec<(Reg, u32)> = self
            .liveness
            .live_out(self.dataflow, position)
            .into_iter()
            .filter_map(|slot| match frame.homes[slot] {
                Home::Reg(reg) if Some(reg) != output_reg => {
                    frame.caller_saved[reg.index()].map(|save| (reg, save))
                }

                _ => None,
            })
            .collect();

        for &(reg, slot) in &preserved {
            self.emit(Instruction::StackStore { value: reg, slot });
        }

        // Los argumentos que ya están en registros se permutan primero;
        // el resto se carga directamente en su registro final
        let mut moves = Vec::new();
        let mut loads = Vec::new();
        for (index, &argument) in arguments.iter().enumerate() {
            let dest = Reg::argument(index);
            match argument.symbol().and_then(|symbol| self.home(symbol)) {
                Some(Home::Reg(source)) => moves.push((dest, source)),
                _ => loads.push((dest, argument)),
            }
        }

        self.body.extend(parallel_move(&moves, Reg::T0));
        for (dest, argument) in loads {
            self.read_into(argument, dest);
        }

        self.emit(Instruction::Call(target.to_owned()));

        if let Some(output) = output {
            match output_reg {
                Some(reg) if reg != Reg::A0 => self.emit(Instruction::Move {
                    dest: reg,
                    source: Reg::A0,
                }),

                Some(_) => (),
                None => self.commit(output, Reg::A0),
            }
        }

        for (reg, slot) in preserved {
            self.emit(Instruction::StackLoad { slot, dest: reg });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse, source::consume};

    fn resolve(source: &str) -> ir::Program {
        let (start, stream) = consume(source.as_bytes(), "test.sy");
        let tokens = Lexer::new(start, stream)
            .try_exhaustive()
            .expect("lexer failed");

        parse::parse(tokens.iter())
            .expect("parser failed")
            .resolve()
            .expect("semantic error")
    }

    fn lower_source(source: &str) -> tigger::Program {
        lower(&resolve(source))
    }

    fn body(program: &tigger::Program, name: &str) -> Vec<String> {
        program
            .code
            .iter()
            .find(|function| function.name == name)
            .unwrap()
            .body
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn leaf_function_uses_argument_registers() {
        let program = lower_source("int add(int a, int b) { return a + b; } int main() { return add(1, 2); }");

        let add = body(&program, "add");
        assert_eq!(program.code[0].frame, 0);
        assert_eq!(add.last().map(String::as_str), Some("return"));
        assert!(add
            .iter()
            .all(|line| !line.starts_with("store") && !line.starts_with("load")));

        assert_eq!(
            body(&program, "main"),
            ["a0 = 1", "a1 = 2", "call f_add", "return"]
        );
    }

    #[test]
    fn globals_are_loaded_and_stored_through_scratch() {
        let program = lower_source("int g; int main() { g = g + 1; return g; }");
        let main = body(&program, "main");

        assert!(main.contains(&String::from("load v0 t0")));
        assert!(main.iter().any(|line| line.starts_with("loadaddr v0")));
        assert!(main.iter().any(|line| line.contains("[0] = ")));
        assert_eq!(program.globals.len(), 1);
    }

    #[test]
    fn local_arrays_live_on_the_stack() {
        let program = lower_source("int main() { int a[4]; a[2] = 7; return a[2]; }");
        let main = &program.code[0];

        assert_eq!(main.frame, 4);
        assert!(body(&program, "main").contains(&String::from("loadaddr 0 t0")));
    }

    #[test]
    fn values_live_across_calls_survive() {
        let program = lower_source(
            "int f() { return 1; } \
             int main() { int x = getint(); int y = f(); return x + y; }",
        );

        let main = &program.code[1];
        let saved: Vec<_> = main
            .body
            .iter()
            .filter(|instruction| matches!(instruction, Instruction::StackStore { .. }))
            .collect();

        // x sobrevive a la llamada a f
        assert!(!saved.is_empty());
        assert!(main.frame >= 1);
    }

    #[test]
    fn colored_slots_never_share_live_registers() {
        let source = "int f(int n) { \
                          int a = n + 1, b = n * 2, c = a - b, d = c * a; \
                          int i = 0, s = 0; \
                          while (i < n) { s = s + a * i + b - c / (d + 1); i = i + 1; } \
                          return s + f(n - 1); \
                      } \
                      int main() { return f(getint()); }";

        let program = resolve(source);

        for function in &program.code {
            let dataflow = Dataflow::new(function);
            let liveness = Liveness::new(function, &dataflow);
            let interference = Interference::new(&liveness, dataflow.slot_count());
            let registers = color::assign(function, &dataflow, &interference);

            for position in 0..dataflow.len() {
                let live: Vec<_> = liveness
                    .live_in(position)
                    .iter()
                    .filter_map(|&slot| registers[slot])
                    .collect();

                let distinct: HashSet<_> = live.iter().collect();
                assert_eq!(distinct.len(), live.len(), "f_{} at {}", function.name, position);
            }
        }
    }
}
