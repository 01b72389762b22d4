//! Intérprete de Tigger para pruebas de extremo a extremo.
//!
//! Modela el banco de registros, una memoria plana direccionada por
//! bytes (globales abajo, pila arriba) y la biblioteca de SysY. Además
//! verifica la convención de llamada: tras cada llamada se corrompen
//! los registros que preserva quien llama, y al retornar se comprueba
//! que la función llamada restauró `s0`-`s11`.

use std::collections::{HashMap, VecDeque};

use sysyc::{
    ir::Label,
    lex::Lexer,
    opt, parse, source, target,
    tigger::{Function, Instruction, Operand, Program, Reg, REGISTER_COUNT},
};

const MEMORY_WORDS: usize = 1 << 20;
const GLOBAL_BASE: i32 = 0x1000;
const STEP_LIMIT: u64 = 50_000_000;
const POISON: i32 = 0x5a5a_5a5a;

/// Compila a Tigger, con o sin optimizaciones.
pub fn compile(text: &str, optimize: bool) -> Program {
    let mut program = resolve(text);
    if optimize {
        program = opt::optimize(program);
    }

    target::lower(&program)
}

pub fn resolve(text: &str) -> sysyc::ir::Program {
    let (start, stream) = source::consume(text.as_bytes(), "test.sy");
    let tokens = Lexer::new(start, stream)
        .try_exhaustive()
        .unwrap_or_else(|_| panic!("lexer failed"));

    let ast = parse::parse(tokens.iter()).unwrap_or_else(|error| panic!("{}", error.val()));
    ast.resolve().unwrap_or_else(|error| panic!("{}", error.val()))
}

/// Resultado de una ejecución: valor de retorno de `main` y salida.
#[derive(Debug, PartialEq, Eq)]
pub struct Outcome {
    pub exit: i32,
    pub output: String,
}

/// Ejecuta el programa en ambos niveles de optimización y exige que
/// coincidan.
pub fn run(text: &str, input: &[i32]) -> Outcome {
    let plain = Machine::new(&compile(text, false), input).run();
    let optimized = Machine::new(&compile(text, true), input).run();

    assert_eq!(plain, optimized, "optimization changed behavior");
    optimized
}

pub struct Machine<'a> {
    functions: HashMap<&'a str, &'a Function>,
    globals: HashMap<u32, i32>,
    regs: [i32; REGISTER_COUNT],
    sp: i32,
    memory: Vec<i32>,
    input: VecDeque<i32>,
    output: String,
    steps: u64,
}

impl<'a> Machine<'a> {
    pub fn new(program: &'a Program, input: &[i32]) -> Self {
        let mut globals = HashMap::new();
        let mut next = GLOBAL_BASE;
        for decl in &program.globals {
            globals.insert(decl.global.0, next);
            next += 4 * decl.size.unwrap_or(1) as i32;
        }

        let functions = program
            .code
            .iter()
            .map(|function| (function.name.as_str(), function))
            .collect();

        Machine {
            functions,
            globals,
            regs: [POISON; REGISTER_COUNT],
            sp: (MEMORY_WORDS * 4) as i32,
            memory: vec![0; MEMORY_WORDS],
            input: input.iter().copied().collect(),
            output: String::new(),
            steps: 0,
        }
    }

    pub fn run(mut self) -> Outcome {
        self.regs[Reg::ZERO.index()] = 0;
        self.call("main");

        Outcome {
            exit: self.get(Reg::A0),
            output: self.output,
        }
    }

    fn get(&self, reg: Reg) -> i32 {
        self.regs[reg.index()]
    }

    fn set(&mut self, reg: Reg, value: i32) {
        if reg != Reg::ZERO {
            self.regs[reg.index()] = value;
        }
    }

    fn word(&self, address: i32) -> usize {
        assert!(
            address >= GLOBAL_BASE && address % 4 == 0,
            "invalid address {:#x}",
            address
        );

        let word = (address / 4) as usize;
        assert!(word < MEMORY_WORDS, "address {:#x} is out of memory", address);
        word
    }

    fn load(&self, address: i32) -> i32 {
        self.memory[self.word(address)]
    }

    fn store(&mut self, address: i32, value: i32) {
        let word = self.word(address);
        self.memory[word] = value;
    }

    /// Registros que la función llamada puede destruir.
    fn clobber(&mut self) {
        for index in 13..REGISTER_COUNT {
            if index != Reg::A0.index() {
                self.regs[index] = POISON;
            }
        }
    }

    fn call(&mut self, name: &str) {
        if self.builtin(name) {
            return;
        }

        let function: &'a Function = *self
            .functions
            .get(name)
            .unwrap_or_else(|| panic!("call to undefined function {}", name));

        let labels: HashMap<Label, usize> = function
            .body
            .iter()
            .enumerate()
            .filter_map(|(position, instruction)| match instruction {
                Instruction::SetLabel(label) => Some((*label, position)),
                _ => None,
            })
            .collect();

        let saved: Vec<i32> = self.regs[1..=12].to_vec();

        // Espacio para `ra` y el marco
        let stack = 4 * function.frame as i32 + 16;
        self.sp -= stack;
        let frame = self.sp;

        let mut pc = 0;
        loop {
            let instruction = function
                .body
                .get(pc)
                .unwrap_or_else(|| panic!("f_{} runs off its end", function.name));

            pc += 1;
            self.steps += 1;
            assert!(self.steps < STEP_LIMIT, "step limit exceeded");

            use Instruction::*;
            match instruction {
                Binary { dest, op, lhs, rhs } => {
                    let rhs = match rhs {
                        Operand::Reg(reg) => self.get(*reg),
                        Operand::Imm(value) => *value,
                    };

                    let value = op.fold(self.get(*lhs), rhs).expect("division by zero");
                    self.set(*dest, value);
                }

                Unary { dest, op, operand } => self.set(*dest, op.fold(self.get(*operand))),
                Move { dest, source } => self.set(*dest, self.get(*source)),
                LoadImm { dest, value } => self.set(*dest, *value),

                Store {
                    base,
                    offset,
                    value,
                } => self.store(self.get(*base) + offset, self.get(*value)),

                Load { dest, base, offset } => {
                    let value = self.load(self.get(*base) + offset);
                    self.set(*dest, value);
                }

                Branch {
                    lhs,
                    rel,
                    rhs,
                    target,
                } => {
                    if rel.holds(self.get(*lhs), self.get(*rhs)) {
                        pc = labels[target];
                    }
                }

                Jump(target) => pc = labels[target],
                SetLabel(_) => (),

                Call(target) => {
                    self.call(target);
                    self.clobber();
                }

                Return => break,

                StackStore { value, slot } => {
                    assert!(*slot < function.frame, "slot {} outside of f_{}", slot, function.name);
                    self.store(frame + 4 * *slot as i32, self.get(*value));
                }

                StackLoad { slot, dest } => {
                    assert!(*slot < function.frame, "slot {} outside of f_{}", slot, function.name);
                    let value = self.load(frame + 4 * *slot as i32);
                    self.set(*dest, value);
                }

                StackAddress { slot, dest } => self.set(*dest, frame + 4 * *slot as i32),
                GlobalLoad { global, dest } => {
                    let value = self.load(self.globals[&global.0]);
                    self.set(*dest, value);
                }

                GlobalAddress { global, dest } => self.set(*dest, self.globals[&global.0]),
            }
        }

        self.sp += stack;
        assert_eq!(
            &self.regs[1..=12],
            &saved[..],
            "f_{} does not preserve s0-s11",
            function.name
        );
    }

    fn builtin(&mut self, name: &str) -> bool {
        let a0 = self.get(Reg::A0);

        match name {
            "getint" | "getch" => {
                let value = self.input.pop_front().unwrap_or(-1);
                self.set(Reg::A0, value);
            }

            "getarray" => {
                let len = self.input.pop_front().unwrap_or(0);
                for index in 0..len {
                    let value = self.input.pop_front().expect("input exhausted");
                    self.store(a0 + 4 * index, value);
                }

                self.set(Reg::A0, len);
            }

            "putint" => self.output.push_str(&a0.to_string()),
            "putch" => self.output.push(a0 as u8 as char),

            "putarray" => {
                let base = self.get(Reg::argument(1));
                self.output.push_str(&format!("{}:", a0));
                for index in 0..a0 {
                    let value = self.load(base + 4 * index);
                    self.output.push_str(&format!(" {}", value));
                }

                self.output.push('\n');
            }

            "starttime" | "stoptime" => (),
            _ => return false,
        }

        true
    }
}
