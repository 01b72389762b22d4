//! Representación intermedia de tres direcciones (Eeyore).
//!
//! Un programa se compone de declaraciones globales y funciones. Cada
//! función es una lista lineal de instrucciones que operan sobre
//! símbolos, los cuales pueden ser variables del programa fuente (`T`),
//! temporales (`t`) o parámetros (`p`). Las variables locales comparten
//! numeración con las globales: una función conoce sus locales a partir
//! de su propia lista de declaraciones, todo otro `T` es global.
//!
//! Los índices de arreglo se expresan en bytes. Leer un símbolo que
//! nombra un arreglo produce su dirección, no su contenido.
//!
//! La implementación de [`Display`] produce el volcado textual de Eeyore.

use std::fmt::{self, Display};

/// Funciones de instrumentación que no aparecen en el volcado Eeyore.
pub const TIMING_FUNCTIONS: [&str; 2] = ["starttime", "stoptime"];

/// Tamaño de una celda de arreglo, en bytes.
pub const WORD_SIZE: i32 = 4;

pub struct Program {
    pub globals: Vec<Decl>,
    pub code: Vec<Function>,
}

pub struct Function {
    pub name: String,
    pub parameters: u32,
    pub decls: Vec<Decl>,
    pub body: Vec<Instruction>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolKind {
    /// Variable del programa fuente, global o local.
    Var,

    /// Temporal de función.
    Temp,

    /// Parámetro formal.
    Param,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub id: u32,
}

/// Declaración de un símbolo, con su cantidad de elementos si es arreglo.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Decl {
    pub symbol: Symbol,
    pub size: Option<u32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RValue {
    Const(i32),
    Symbol(Symbol),
}

/// Destino de una asignación; el índice, si existe, está en bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LValue {
    pub symbol: Symbol,
    pub index: Option<RValue>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

/// Operador relacional de un salto condicional.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Le,
    Gt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Unary {
        dest: Symbol,
        op: UnOp,
        operand: RValue,
    },

    Binary {
        dest: Symbol,
        op: BinOp,
        lhs: RValue,
        rhs: RValue,
    },

    Assign {
        target: LValue,
        value: RValue,
    },

    /// Lectura de un elemento: `dest = array[index]`.
    Load {
        dest: Symbol,
        array: Symbol,
        index: RValue,
    },

    Branch {
        lhs: RValue,
        rel: RelOp,
        rhs: RValue,
        target: Label,
    },

    Jump(Label),

    SetLabel(Label),

    Call {
        target: String,
        arguments: Vec<RValue>,
        output: Option<Symbol>,
    },

    Return(Option<RValue>),
}

impl Symbol {
    pub fn var(id: u32) -> Self {
        Symbol {
            kind: SymbolKind::Var,
            id,
        }
    }

    pub fn temp(id: u32) -> Self {
        Symbol {
            kind: SymbolKind::Temp,
            id,
        }
    }

    pub fn param(id: u32) -> Self {
        Symbol {
            kind: SymbolKind::Param,
            id,
        }
    }
}

impl RValue {
    pub fn symbol(self) -> Option<Symbol> {
        match self {
            RValue::Symbol(symbol) => Some(symbol),
            RValue::Const(_) => None,
        }
    }

    pub fn constant(self) -> Option<i32> {
        match self {
            RValue::Const(value) => Some(value),
            RValue::Symbol(_) => None,
        }
    }
}

impl From<Symbol> for RValue {
    fn from(symbol: Symbol) -> Self {
        RValue::Symbol(symbol)
    }
}

impl From<i32> for RValue {
    fn from(value: i32) -> Self {
        RValue::Const(value)
    }
}

impl UnOp {
    pub fn fold(self, operand: i32) -> i32 {
        match self {
            UnOp::Neg => operand.wrapping_neg(),
            UnOp::Not => (operand == 0) as i32,
        }
    }
}

impl BinOp {
    /// Evalúa en tiempo de compilación con aritmética de 32 bits
    /// en complemento a dos. Falla únicamente al dividir entre cero.
    pub fn fold(self, lhs: i32, rhs: i32) -> Option<i32> {
        use BinOp::*;

        let result = match self {
            Add => lhs.wrapping_add(rhs),
            Sub => lhs.wrapping_sub(rhs),
            Mul => lhs.wrapping_mul(rhs),
            Div | Rem if rhs == 0 => return None,
            Div => lhs.wrapping_div(rhs),
            Rem => lhs.wrapping_rem(rhs),
            And => (lhs != 0 && rhs != 0) as i32,
            Or => (lhs != 0 || rhs != 0) as i32,
            Lt | Gt | Le | Ge | Eq | Ne => self.relation()?.holds(lhs, rhs) as i32,
        };

        Some(result)
    }

    pub fn relation(self) -> Option<RelOp> {
        let rel = match self {
            BinOp::Lt => RelOp::Lt,
            BinOp::Gt => RelOp::Gt,
            BinOp::Le => RelOp::Le,
            BinOp::Ge => RelOp::Ge,
            BinOp::Eq => RelOp::Eq,
            BinOp::Ne => RelOp::Ne,
            _ => return None,
        };

        Some(rel)
    }

    /// Operación equivalente con los operandos intercambiados, si existe.
    pub fn swapped(self) -> Option<BinOp> {
        use BinOp::*;

        match self {
            Add | Mul | Eq | Ne | And | Or => Some(self),
            Lt => Some(Gt),
            Gt => Some(Lt),
            Le => Some(Ge),
            Ge => Some(Le),
            Sub | Div | Rem => None,
        }
    }
}

impl RelOp {
    pub fn holds(self, lhs: i32, rhs: i32) -> bool {
        match self {
            RelOp::Eq => lhs == rhs,
            RelOp::Ne => lhs != rhs,
            RelOp::Lt => lhs < rhs,
            RelOp::Ge => lhs >= rhs,
            RelOp::Le => lhs <= rhs,
            RelOp::Gt => lhs > rhs,
        }
    }

    /// Relación que se cumple exactamente cuando esta no.
    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Ge => RelOp::Lt,
            RelOp::Le => RelOp::Gt,
            RelOp::Gt => RelOp::Le,
        }
    }
}

impl Instruction {
    /// Símbolo escalar que esta instrucción sobrescribe, si alguno.
    ///
    /// Una escritura indexada no redefine al arreglo.
    pub fn definition(&self) -> Option<Symbol> {
        match self {
            Instruction::Unary { dest, .. }
            | Instruction::Binary { dest, .. }
            | Instruction::Load { dest, .. } => Some(*dest),

            Instruction::Assign {
                target: LValue {
                    symbol,
                    index: None,
                },
                ..
            } => Some(*symbol),

            Instruction::Call { output, .. } => *output,
            _ => None,
        }
    }

    /// Símbolos leídos por esta instrucción, incluyendo la base de
    /// un acceso indexado.
    pub fn uses(&self) -> Vec<Symbol> {
        let mut uses = Vec::new();
        let mut push = |value: &RValue| uses.extend(value.symbol());

        match self {
            Instruction::Unary { operand, .. } => push(operand),

            Instruction::Binary { lhs, rhs, .. } | Instruction::Branch { lhs, rhs, .. } => {
                push(lhs);
                push(rhs);
            }

            Instruction::Assign { target, value } => {
                if let Some(index) = &target.index {
                    push(&RValue::Symbol(target.symbol));
                    push(index);
                }

                push(value);
            }

            Instruction::Load { array, index, .. } => {
                push(&RValue::Symbol(*array));
                push(index);
            }

            Instruction::Call { arguments, .. } => arguments.iter().for_each(push),
            Instruction::Return(Some(value)) => push(value),
            Instruction::Return(None) | Instruction::Jump(_) | Instruction::SetLabel(_) => (),
        }

        uses
    }

    /// Visita los operandos de valor (no las bases de arreglo ni los destinos).
    pub fn operands_mut<F: FnMut(&mut RValue)>(&mut self, mut visit: F) {
        match self {
            Instruction::Unary { operand, .. } => visit(operand),

            Instruction::Binary { lhs, rhs, .. } | Instruction::Branch { lhs, rhs, .. } => {
                visit(lhs);
                visit(rhs);
            }

            Instruction::Assign { target, value } => {
                if let Some(index) = &mut target.index {
                    visit(index);
                }

                visit(value);
            }

            Instruction::Load { index, .. } => visit(index),
            Instruction::Call { arguments, .. } => arguments.iter_mut().for_each(visit),
            Instruction::Return(Some(value)) => visit(value),
            Instruction::Return(None) | Instruction::Jump(_) | Instruction::SetLabel(_) => (),
        }
    }

    /// Visita todo símbolo mencionado, incluyendo destinos y bases.
    pub fn symbols_mut<F: FnMut(&mut Symbol)>(&mut self, mut visit: F) {
        self.operands_mut(|value| {
            if let RValue::Symbol(symbol) = value {
                visit(symbol);
            }
        });

        match self {
            Instruction::Unary { dest, .. } | Instruction::Binary { dest, .. } => visit(dest),

            Instruction::Load { dest, array, .. } => {
                visit(dest);
                visit(array);
            }

            Instruction::Assign { target, .. } => visit(&mut target.symbol),
            Instruction::Call {
                output: Some(output),
                ..
            } => visit(output),

            _ => (),
        }
    }

    /// Etiqueta destino de un salto, condicional o no.
    pub fn jump_target(&self) -> Option<Label> {
        match self {
            Instruction::Branch { target, .. } | Instruction::Jump(target) => Some(*target),
            _ => None,
        }
    }

    /// Indica si la ejecución nunca continúa a la siguiente instrucción.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::Jump(_) | Instruction::Return(_))
    }
}

impl Function {
    /// Determina si un símbolo `T` pertenece a esta función.
    pub fn is_local(&self, symbol: Symbol) -> bool {
        match symbol.kind {
            SymbolKind::Var => self.decls.iter().any(|decl| decl.symbol == symbol),
            _ => true,
        }
    }
}

impl Display for SymbolKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            SymbolKind::Var => "T",
            SymbolKind::Temp => "t",
            SymbolKind::Param => "p",
        })
    }
}

impl Display for Symbol {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}{}", self.kind, self.id)
    }
}

impl Display for Label {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "l{}", self.0)
    }
}

impl Display for RValue {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RValue::Const(value) => write!(fmt, "{}", value),
            RValue::Symbol(symbol) => write!(fmt, "{}", symbol),
        }
    }
}

impl Display for LValue {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            None => write!(fmt, "{}", self.symbol),
            Some(index) => write!(fmt, "{}[{}]", self.symbol, index),
        }
    }
}

impl Display for UnOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
        })
    }
}

impl Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinOp::*;

        fmt.write_str(match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Rem => "%",
            Lt => "<",
            Gt => ">",
            Le => "<=",
            Ge => ">=",
            Eq => "==",
            Ne => "!=",
            And => "&&",
            Or => "||",
        })
    }
}

impl Display for RelOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            RelOp::Eq => "==",
            RelOp::Ne => "!=",
            RelOp::Lt => "<",
            RelOp::Ge => ">=",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
        })
    }
}

impl Display for Decl {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(fmt, "var {} {}", size as i32 * WORD_SIZE, self.symbol),
            None => write!(fmt, "var {}", self.symbol),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Unary { dest, op, operand } => write!(fmt, "\t{} = {}{}", dest, op, operand),

            Instruction::Binary { dest, op, lhs, rhs } => {
                write!(fmt, "\t{} = {} {} {}", dest, lhs, op, rhs)
            }

            Instruction::Assign { target, value } => write!(fmt, "\t{} = {}", target, value),

            Instruction::Load { dest, array, index } => {
                write!(fmt, "\t{} = {}[{}]", dest, array, index)
            }

            Instruction::Branch {
                lhs,
                rel,
                rhs,
                target,
            } => write!(fmt, "\tif {} {} {} goto {}", lhs, rel, rhs, target),

            Instruction::Jump(target) => write!(fmt, "\tgoto {}", target),
            Instruction::SetLabel(label) => write!(fmt, "{}:", label),

            Instruction::Call {
                target,
                arguments,
                output,
            } => {
                for argument in arguments {
                    writeln!(fmt, "\tparam {}", argument)?;
                }

                match output {
                    Some(output) => write!(fmt, "\t{} = call f_{}", output, target),
                    None => write!(fmt, "\tcall f_{}", target),
                }
            }

            Instruction::Return(Some(value)) => write!(fmt, "\treturn {}", value),
            Instruction::Return(None) => fmt.write_str("\treturn"),
        }
    }
}

impl Display for Function {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "f_{} [{}]", self.name, self.parameters)?;
        for decl in &self.decls {
            writeln!(fmt, "{}", decl)?;
        }

        writeln!(fmt)?;
        for instruction in &self.body {
            match instruction {
                Instruction::Call { target, .. } if TIMING_FUNCTIONS.contains(&target.as_str()) => {
                    continue
                }

                _ => writeln!(fmt, "{}", instruction)?,
            }
        }

        writeln!(fmt, "end f_{}", self.name)
    }
}

impl Display for Program {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for decl in &self.globals {
            writeln!(fmt, "{}", decl)?;
        }

        writeln!(fmt)?;
        for function in &self.code {
            writeln!(fmt, "{}", function)?;
        }

        Ok(())
    }
}
