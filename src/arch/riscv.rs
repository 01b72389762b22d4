//! Implementación para RISC-V de 32 bits.
//!
//! # Manual de ISA
//! <https://riscv.org/technical/specifications/>
//!
//! Cada función reserva su marco al entrar: la dirección de retorno se
//! guarda justo debajo del `sp` original y las ranuras Tigger quedan en
//! `0(sp)`, `4(sp)`, etc. El tamaño del marco se redondea a 16 bytes.
//! `t0` y `t1` están disponibles como registros auxiliares para
//! expandir pseudo-operaciones.

use std::io::{self, Write};

use crate::{
    ir::{BinOp, Label, RelOp, UnOp, TIMING_FUNCTIONS},
    tigger::{Function, GlobalDecl, Instruction, Operand, Program, Reg},
};

/// Emite un programa completo como ensamblador GNU.
pub fn emit<W: Write>(program: &Program, output: &mut W) -> io::Result<()> {
    let mut emitter = Emitter { output };

    for global in &program.globals {
        emitter.global(global)?;
    }

    for function in &program.code {
        emitter.function(function)?;
    }

    Ok(())
}

struct Emitter<'a, W> {
    output: &'a mut W,
}

/// Rango de un inmediato de 12 bits con signo.
fn is_imm12(value: i32) -> bool {
    (-2048..2048).contains(&value)
}

/// Registro auxiliar distinto de `reg`.
fn tmpreg(reg: Reg) -> Reg {
    reg.other_scratch()
}

struct LocalLabel(Label);

impl std::fmt::Display for LocalLabel {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, ".l{}", (self.0).0)
    }
}

impl<W: Write> Emitter<'_, W> {
    fn output(&mut self) -> &mut W {
        &mut *self.output
    }

    fn global(&mut self, decl: &GlobalDecl) -> io::Result<()> {
        let name = decl.global;

        match decl.size {
            None => {
                emit!(self, ".global", "{}", name)?;
                emit!(self, ".section", ".sdata")?;
                emit!(self, ".align", "2")?;
                emit!(self, ".type", "{}, @object", name)?;
                emit!(self, ".size", "{}, 4", name)?;
                writeln!(self.output(), "{}:", name)?;
                emit!(self, ".word", "0")
            }

            Some(size) => emit!(self, ".comm", "{}, {}, 4", name, 4 * size),
        }
    }

    fn function(&mut self, function: &Function) -> io::Result<()> {
        let name = &function.name;

        emit!(self, ".text")?;
        emit!(self, ".align", "2")?;
        emit!(self, ".global", "{}", name)?;
        emit!(self, ".type", "{}, @function", name)?;
        writeln!(self.output(), "{}:", name)?;

        // Una palabra extra para `ra`, alineado a 16 bytes
        let stack = (function.frame as i32 / 4 + 1) * 16;

        emit!(self, "sw", "ra, -4(sp)")?;
        self.move_sp(-stack)?;

        for instruction in &function.body {
            self.instruction(instruction, stack)?;
        }

        emit!(self, ".size", "{0}, .-{0}", name)?;
        writeln!(self.output())
    }

    fn move_sp(&mut self, delta: i32) -> io::Result<()> {
        if is_imm12(delta) {
            emit!(self, "addi", "sp, sp, {}", delta)
        } else {
            emit!(self, "li", "t0, {}", delta)?;
            emit!(self, "add", "sp, sp, t0")
        }
    }

    fn instruction(&mut self, instruction: &Instruction, stack: i32) -> io::Result<()> {
        use Instruction::*;

        match instruction {
            Binary {
                dest,
                op,
                lhs,
                rhs: Operand::Reg(rhs),
            } => self.binary(*dest, *op, *lhs, *rhs),

            Binary {
                dest,
                op,
                lhs,
                rhs: Operand::Imm(rhs),
            } => self.binary_imm(*dest, *op, *lhs, *rhs),

            Unary { dest, op, operand } => match op {
                UnOp::Neg => emit!(self, "neg", "{}, {}", dest, operand),
                UnOp::Not => emit!(self, "seqz", "{}, {}", dest, operand),
            },

            Move { dest, source } => emit!(self, "mv", "{}, {}", dest, source),
            LoadImm { dest, value } => emit!(self, "li", "{}, {}", dest, value),

            Store {
                base,
                offset,
                value,
            } => self.store(*base, *offset, *value),

            Load { dest, base, offset } => {
                if is_imm12(*offset) {
                    emit!(self, "lw", "{}, {}({})", dest, offset, base)
                } else {
                    let address = if dest != base { *dest } else { tmpreg(*base) };

                    emit!(self, "li", "{}, {}", address, offset)?;
                    emit!(self, "add", "{0}, {0}, {1}", address, base)?;
                    emit!(self, "lw", "{}, 0({})", dest, address)
                }
            }

            Branch {
                lhs,
                rel,
                rhs,
                target,
            } => {
                let opcode = match rel {
                    RelOp::Lt => "blt",
                    RelOp::Gt => "bgt",
                    RelOp::Le => "ble",
                    RelOp::Ge => "bge",
                    RelOp::Ne => "bne",
                    RelOp::Eq => "beq",
                };

                emit!(self, opcode, "{}, {}, {}", lhs, rhs, LocalLabel(*target))
            }

            Jump(target) => emit!(self, "j", "{}", LocalLabel(*target)),
            SetLabel(label) => writeln!(self.output(), "{}:", LocalLabel(*label)),

            Call(target) if TIMING_FUNCTIONS.contains(&target.as_str()) => {
                emit!(self, "call", "_sysy_{}", target)
            }

            Call(target) => emit!(self, "call", "{}", target),

            Return => {
                self.move_sp(stack)?;
                emit!(self, "lw", "ra, -4(sp)")?;
                emit!(self, "ret")
            }

            StackStore { value, slot } => {
                let offset = 4 * *slot as i32;
                if is_imm12(offset) {
                    emit!(self, "sw", "{}, {}(sp)", value, offset)
                } else {
                    let address = tmpreg(*value);

                    emit!(self, "li", "{}, {}", address, offset)?;
                    emit!(self, "add", "{0}, {0}, sp", address)?;
                    emit!(self, "sw", "{}, 0({})", value, address)
                }
            }

            StackLoad { slot, dest } => {
                let offset = 4 * *slot as i32;
                if is_imm12(offset) {
                    emit!(self, "lw", "{}, {}(sp)", dest, offset)
                } else {
                    emit!(self, "li", "{}, {}", dest, offset)?;
                    emit!(self, "add", "{0}, {0}, sp", dest)?;
                    emit!(self, "lw", "{0}, 0({0})", dest)
                }
            }

            StackAddress { slot, dest } => {
                let offset = 4 * *slot as i32;
                if is_imm12(offset) {
                    emit!(self, "addi", "{}, sp, {}", dest, offset)
                } else {
                    emit!(self, "li", "{}, {}", dest, offset)?;
                    emit!(self, "add", "{0}, sp, {0}", dest)
                }
            }

            GlobalLoad { global, dest } => {
                emit!(self, "lui", "{}, %hi({})", dest, global)?;
                emit!(self, "lw", "{0}, %lo({1})({0})", dest, global)
            }

            GlobalAddress { global, dest } => emit!(self, "la", "{}, {}", dest, global),
        }
    }

    fn binary(&mut self, dest: Reg, op: BinOp, a: Reg, b: Reg) -> io::Result<()> {
        let simple = match op {
            BinOp::Add => Some("add"),
            BinOp::Sub => Some("sub"),
            BinOp::Mul => Some("mul"),
            BinOp::Div => Some("div"),
            BinOp::Rem => Some("rem"),
            BinOp::Lt => Some("slt"),
            BinOp::Gt => Some("sgt"),
            _ => None,
        };

        if let Some(opcode) = simple {
            return emit!(self, opcode, "{}, {}, {}", dest, a, b);
        }

        match op {
            BinOp::Le => {
                emit!(self, "sgt", "{}, {}, {}", dest, a, b)?;
                emit!(self, "seqz", "{0}, {0}", dest)
            }

            BinOp::Ge => {
                emit!(self, "slt", "{}, {}, {}", dest, a, b)?;
                emit!(self, "seqz", "{0}, {0}", dest)
            }

            BinOp::Eq => {
                emit!(self, "xor", "{}, {}, {}", dest, a, b)?;
                emit!(self, "seqz", "{0}, {0}", dest)
            }

            BinOp::Ne => {
                emit!(self, "xor", "{}, {}, {}", dest, a, b)?;
                emit!(self, "snez", "{0}, {0}", dest)
            }

            BinOp::Or => {
                emit!(self, "or", "{}, {}, {}", dest, a, b)?;
                emit!(self, "snez", "{0}, {0}", dest)
            }

            BinOp::And => {
                // `b` debe leerse antes de sobrescribir `dest`
                let (a, b) = if b == dest { (b, a) } else { (a, b) };
                let tmp = tmpreg(dest);

                emit!(self, "snez", "{}, {}", dest, a)?;
                emit!(self, "snez", "{}, {}", tmp, b)?;
                emit!(self, "and", "{0}, {0}, {1}", dest, tmp)
            }

            _ => unreachable!(),
        }
    }

    fn binary_imm(&mut self, dest: Reg, op: BinOp, a: Reg, b: i32) -> io::Result<()> {
        let tmp = tmpreg(a);
        let power = (b > 1 && b & (b - 1) == 0).then(|| b.trailing_zeros());

        match (op, power) {
            (BinOp::Add, _) if is_imm12(b) => emit!(self, "addi", "{}, {}, {}", dest, a, b),
            (BinOp::Sub, _) if b.checked_neg().map_or(false, is_imm12) => {
                emit!(self, "addi", "{}, {}, {}", dest, a, -b)
            }

            (BinOp::Lt, _) if is_imm12(b) => emit!(self, "slti", "{}, {}, {}", dest, a, b),
            (BinOp::Mul, Some(shift)) => emit!(self, "slli", "{}, {}, {}", dest, a, shift),

            // Redondeo hacia cero: los negativos se sesgan por b - 1
            (BinOp::Div, Some(shift)) if b <= 2048 => {
                emit!(self, "srai", "{}, {}, 31", tmp, a)?;
                emit!(self, "andi", "{0}, {0}, {1}", tmp, b - 1)?;
                emit!(self, "add", "{}, {}, {}", dest, tmp, a)?;
                emit!(self, "srai", "{0}, {0}, {1}", dest, shift)
            }

            // El residuo conserva el signo del dividendo
            (BinOp::Rem, Some(shift)) if b <= 2048 => {
                let biased = tmpreg(tmp);

                emit!(self, "srai", "{}, {}, 31", tmp, a)?;
                emit!(self, "srli", "{0}, {0}, {1}", tmp, 32 - shift)?;
                emit!(self, "add", "{}, {}, {}", biased, a, tmp)?;
                emit!(self, "andi", "{0}, {0}, {1}", biased, b - 1)?;
                emit!(self, "sub", "{}, {}, {}", dest, biased, tmp)
            }

            _ => {
                emit!(self, "li", "{}, {}", tmp, b)?;
                self.binary(dest, op, a, tmp)
            }
        }
    }

    fn store(&mut self, base: Reg, offset: i32, value: Reg) -> io::Result<()> {
        if is_imm12(offset) {
            return emit!(self, "sw", "{}, {}({})", value, offset, base);
        }

        let mut address = tmpreg(base);
        if address == value {
            address = tmpreg(value);
        }

        if address != base {
            emit!(self, "li", "{}, {}", address, offset)?;
            emit!(self, "add", "{0}, {0}, {1}", address, base)?;
            return emit!(self, "sw", "{}, 0({})", value, address);
        }

        // Ambos auxiliares están ocupados: se presta `s0` debajo de la pila
        emit!(self, "sw", "s0, -4(sp)")?;
        emit!(self, "li", "s0, {}", offset)?;
        emit!(self, "add", "s0, s0, {}", base)?;
        emit!(self, "sw", "{}, 0(s0)", value)?;
        emit!(self, "lw", "s0, -4(sp)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tigger::Global;

    fn function(frame: u32, body: Vec<Instruction>) -> String {
        let program = Program {
            globals: Vec::new(),
            code: vec![Function {
                name: String::from("f"),
                parameters: 0,
                frame,
                body,
            }],
        };

        let mut output = Vec::new();
        emit(&program, &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    /// Líneas de código sin directivas ni etiquetas, con espacios normalizados.
    fn lines(text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('.') && !line.ends_with(':'))
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect()
    }

    fn binary(dest: Reg, op: BinOp, lhs: Reg, rhs: Operand) -> Instruction {
        Instruction::Binary { dest, op, lhs, rhs }
    }

    #[test]
    fn immediates_fold_into_instructions() {
        let a0 = Reg::A0;
        let text = function(
            0,
            vec![
                binary(a0, BinOp::Add, a0, Operand::Imm(2047)),
                binary(a0, BinOp::Add, a0, Operand::Imm(2048)),
                binary(a0, BinOp::Sub, a0, Operand::Imm(5)),
                binary(a0, BinOp::Lt, a0, Operand::Imm(-3)),
                binary(a0, BinOp::Ge, a0, Operand::Imm(7)),
            ],
        );

        assert_eq!(
            lines(&text)[2..],
            [
                "addi a0, a0, 2047",
                "li t0, 2048",
                "add a0, a0, t0",
                "addi a0, a0, -5",
                "slti a0, a0, -3",
                "li t0, 7",
                "slt a0, a0, t0",
                "seqz a0, a0",
            ]
        );
    }

    #[test]
    fn powers_of_two_become_shifts() {
        let (s1, t0) = (Reg::new(2), Reg::T0);
        let text = function(
            0,
            vec![
                binary(s1, BinOp::Mul, s1, Operand::Imm(8)),
                binary(t0, BinOp::Div, s1, Operand::Imm(4)),
                binary(t0, BinOp::Rem, s1, Operand::Imm(16)),
                binary(t0, BinOp::Div, s1, Operand::Imm(4096)),
            ],
        );

        assert_eq!(
            lines(&text)[2..],
            [
                "slli s1, s1, 3",
                "srai t0, s1, 31",
                "andi t0, t0, 3",
                "add t0, t0, s1",
                "srai t0, t0, 2",
                "srai t0, s1, 31",
                "srli t0, t0, 28",
                "add t1, s1, t0",
                "andi t1, t1, 15",
                "sub t0, t1, t0",
                "li t0, 4096",
                "div t0, s1, t0",
            ]
        );
    }

    #[test]
    fn logical_and_reads_both_operands_first() {
        let (a0, a1) = (Reg::A0, Reg::argument(1));
        let text = function(0, vec![binary(a1, BinOp::And, a0, Operand::Reg(a1))]);

        assert_eq!(
            lines(&text)[2..],
            ["snez a1, a1", "snez t0, a0", "and a1, a1, t0"]
        );
    }

    #[test]
    fn frames_round_up_and_large_frames_use_registers() {
        let small = lines(&function(3, vec![Instruction::Return]));
        assert_eq!(
            small,
            ["sw ra, -4(sp)", "addi sp, sp, -16", "addi sp, sp, 16", "lw ra, -4(sp)", "ret"]
        );

        let large = lines(&function(
            1000,
            vec![
                Instruction::StackLoad {
                    slot: 600,
                    dest: Reg::A0,
                },
                Instruction::StackStore {
                    value: Reg::A0,
                    slot: 700,
                },
                Instruction::Return,
            ],
        ));

        assert_eq!(
            large,
            [
                "sw ra, -4(sp)",
                "li t0, -4016",
                "add sp, sp, t0",
                "li a0, 2400",
                "add a0, a0, sp",
                "lw a0, 0(a0)",
                "li t0, 2800",
                "add t0, t0, sp",
                "sw a0, 0(t0)",
                "li t0, 4016",
                "add sp, sp, t0",
                "lw ra, -4(sp)",
                "ret",
            ]
        );
    }

    #[test]
    fn stores_with_large_offsets_avoid_clobbering() {
        let text = function(
            0,
            vec![Instruction::Store {
                base: Reg::T0,
                offset: 4000,
                value: Reg::T1,
            }],
        );

        assert_eq!(
            lines(&text)[2..],
            [
                "sw s0, -4(sp)",
                "li s0, 4000",
                "add s0, s0, t0",
                "sw t1, 0(s0)",
                "lw s0, -4(sp)",
            ]
        );
    }

    #[test]
    fn globals_and_timing_calls() {
        let program = Program {
            globals: vec![
                GlobalDecl {
                    global: Global(0),
                    size: None,
                },
                GlobalDecl {
                    global: Global(1),
                    size: Some(100),
                },
            ],
            code: vec![Function {
                name: String::from("main"),
                parameters: 0,
                frame: 0,
                body: vec![
                    Instruction::GlobalLoad {
                        global: Global(0),
                        dest: Reg::A0,
                    },
                    Instruction::GlobalAddress {
                        global: Global(1),
                        dest: Reg::T0,
                    },
                    Instruction::LoadImm {
                        dest: Reg::A0,
                        value: 3,
                    },
                    Instruction::Call(String::from("starttime")),
                    Instruction::Call(String::from("putint")),
                    Instruction::SetLabel(Label(4)),
                    Instruction::Jump(Label(4)),
                ],
            }],
        };

        let mut output = Vec::new();
        emit(&program, &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();

        assert!(text.contains("v0:\n"));
        assert!(text.contains(".comm  v1, 400, 4"));
        assert!(text.contains(".section .sdata"));
        assert!(text.contains(".global main\n"));
        assert!(text.contains("\n.l4:\n"));
        assert!(text.contains(".size  main, .-main\n"));

        assert_eq!(
            lines(&text)[2..],
            [
                "lui a0, %hi(v0)",
                "lw a0, %lo(v0)(a0)",
                "la t0, v1",
                "li a0, 3",
                "call _sysy_starttime",
                "call putint",
                "j .l4",
            ]
        );
    }
}
