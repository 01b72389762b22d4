//! Representación con registros físicos (Tigger).
//!
//! Tigger conserva la forma de tres direcciones de Eeyore, pero sus
//! operandos son registros de una máquina de 28 registros al estilo
//! RISC-V. Los valores que no residen en registros viven en ranuras
//! de la pila de la función (en palabras) o en variables globales,
//! que se nombran con el número de su variable `T` original.

use std::fmt::{self, Display};

use crate::ir::{BinOp, Label, RelOp, UnOp};

/// Cantidad de registros, incluyendo al registro cero.
pub const REGISTER_COUNT: usize = 28;

/// Cantidad máxima de argumentos en registros.
pub const MAX_ARGUMENTS: usize = 8;

const NAMES: [&str; REGISTER_COUNT] = [
    "x0", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t0", "t1",
    "t2", "t3", "t4", "t5", "t6", "a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7",
];

/// Registro físico.
///
/// Numeración: `x0` es 0, `s0`-`s11` son 1-12, `t0`-`t6` son 13-19 y
/// `a0`-`a7` son 20-27.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

impl Reg {
    pub const ZERO: Reg = Reg(0);
    pub const T0: Reg = Reg(13);
    pub const T1: Reg = Reg(14);
    pub const A0: Reg = Reg(20);

    pub fn new(index: usize) -> Reg {
        assert!(index < REGISTER_COUNT, "register x{} does not exist", index);
        Reg(index as u8)
    }

    /// Registro del `n`-ésimo argumento.
    pub fn argument(n: usize) -> Reg {
        assert!(n < MAX_ARGUMENTS, "argument {} does not fit in a register", n);
        Reg(Self::A0.0 + n as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// El otro registro de trabajo: `t1` si este es `t0`, `t0` en otro caso.
    pub fn other_scratch(self) -> Reg {
        if self == Reg::T0 {
            Reg::T1
        } else {
            Reg::T0
        }
    }
}

/// Segundo operando de una operación binaria.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Imm(i32),
}

/// Variable global, identificada por el número de su `T`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Global(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Binary {
        dest: Reg,
        op: BinOp,
        lhs: Reg,
        rhs: Operand,
    },

    Unary {
        dest: Reg,
        op: UnOp,
        operand: Reg,
    },

    Move {
        dest: Reg,
        source: Reg,
    },

    LoadImm {
        dest: Reg,
        value: i32,
    },

    /// `base[offset] = value`, con desplazamiento en bytes.
    Store {
        base: Reg,
        offset: i32,
        value: Reg,
    },

    /// `dest = base[offset]`, con desplazamiento en bytes.
    Load {
        dest: Reg,
        base: Reg,
        offset: i32,
    },

    Branch {
        lhs: Reg,
        rel: RelOp,
        rhs: Reg,
        target: Label,
    },

    Jump(Label),
    SetLabel(Label),
    Call(String),
    Return,

    StackStore {
        value: Reg,
        slot: u32,
    },

    StackLoad {
        slot: u32,
        dest: Reg,
    },

    StackAddress {
        slot: u32,
        dest: Reg,
    },

    GlobalLoad {
        global: Global,
        dest: Reg,
    },

    GlobalAddress {
        global: Global,
        dest: Reg,
    },
}

pub struct GlobalDecl {
    pub global: Global,

    /// Cantidad de elementos, si es arreglo.
    pub size: Option<u32>,
}

pub struct Function {
    pub name: String,
    pub parameters: u32,

    /// Tamaño del marco de pila, en palabras.
    pub frame: u32,
    pub body: Vec<Instruction>,
}

pub struct Program {
    pub globals: Vec<GlobalDecl>,
    pub code: Vec<Function>,
}

impl Display for Reg {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(NAMES[self.index()])
    }
}

impl Display for Operand {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(fmt, "{}", reg),
            Operand::Imm(value) => write!(fmt, "{}", value),
        }
    }
}

impl Display for Global {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "v{}", self.0)
    }
}

impl Display for Instruction {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        match self {
            Binary { dest, op, lhs, rhs } => write!(fmt, "{} = {} {} {}", dest, lhs, op, rhs),
            Unary { dest, op, operand } => write!(fmt, "{} = {} {}", dest, op, operand),
            Move { dest, source } => write!(fmt, "{} = {}", dest, source),
            LoadImm { dest, value } => write!(fmt, "{} = {}", dest, value),
            Store {
                base,
                offset,
                value,
            } => write!(fmt, "{}[{}] = {}", base, offset, value),

            Load { dest, base, offset } => write!(fmt, "{} = {}[{}]", dest, base, offset),

            Branch {
                lhs,
                rel,
                rhs,
                target,
            } => write!(fmt, "if {} {} {} goto {}", lhs, rel, rhs, target),

            Jump(target) => write!(fmt, "goto {}", target),
            SetLabel(label) => write!(fmt, "{}:", label),
            Call(target) => write!(fmt, "call f_{}", target),
            Return => fmt.write_str("return"),
            StackStore { value, slot } => write!(fmt, "store {} {}", value, slot),
            StackLoad { slot, dest } => write!(fmt, "load {} {}", slot, dest),
            StackAddress { slot, dest } => write!(fmt, "loadaddr {} {}", slot, dest),
            GlobalLoad { global, dest } => write!(fmt, "load {} {}", global, dest),
            GlobalAddress { global, dest } => write!(fmt, "loadaddr {} {}", global, dest),
        }
    }
}

impl Display for GlobalDecl {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            None => write!(fmt, "{} = 0", self.global),
            Some(size) => write!(fmt, "{} = malloc {}", self.global, 4 * size),
        }
    }
}

impl Display for Function {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "f_{} [{}] [{}]", self.name, self.parameters, self.frame)?;

        for instruction in &self.body {
            match instruction {
                Instruction::SetLabel(_) => writeln!(fmt, "{}", instruction)?,
                _ => writeln!(fmt, "  {}", instruction)?,
            }
        }

        writeln!(fmt, "end f_{}", self.name)
    }
}

impl Display for Program {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in &self.globals {
            writeln!(fmt, "{}", global)?;
        }

        writeln!(fmt)?;
        for function in &self.code {
            writeln!(fmt, "{}", function)?;
        }

        Ok(())
    }
}
