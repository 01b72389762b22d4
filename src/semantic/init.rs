//! Declaraciones e inicializadores.

use std::ops::Range;

use super::{scope::Definition, Context, Semantic, SemanticError};
use crate::{
    ir::{BinOp, Instruction, LValue, RValue, RelOp, Symbol, WORD_SIZE},
    parse::{self, Def, Expr, Init},
    source::{Located, Location},
};

/// Longitud mínima de una racha de ceros que se limpia con un ciclo.
const ZERO_LOOP_THRESHOLD: usize = 4;

impl Context<'_> {
    pub(super) fn declare(&mut self, decl: &parse::Decl, global: bool) -> Semantic<()> {
        for def in &decl.defs {
            self.define(def, decl.constant, global)?;
        }

        Ok(())
    }

    /// Evalúa dimensiones de arreglo, que deben ser constantes positivas.
    pub(super) fn dims(&mut self, exprs: &[Located<Expr>]) -> Semantic<Vec<i32>> {
        exprs
            .iter()
            .map(|expr| match self.constant(expr)? {
                dim if dim > 0 => Ok(dim),
                dim => Err(Located::at(
                    SemanticError::BadDimension(dim),
                    expr.location().clone(),
                )),
            })
            .collect()
    }

    fn define(&mut self, def: &Def, constant: bool, global: bool) -> Semantic<()> {
        let dims = self.dims(&def.dims)?;
        let len = element_count(&dims, def.name.location())?;

        let size = (!dims.is_empty()).then(|| len);
        let symbol = self.var(size);

        let values = match &def.init {
            Some(init) => self.initialize(symbol, &dims, init, constant, global)?,
            None if constant => {
                return Err(Located::at(
                    SemanticError::UninitializedConst(def.name.as_ref().clone()),
                    def.name.location().clone(),
                ))
            }

            None => None,
        };

        let definition = Definition {
            symbol,
            dims,
            values,
        };

        self.unit.scopes.define(&def.name, definition)
    }

    /// Genera las escrituras de un inicializador y retorna los valores
    /// plegados si la definición es constante.
    fn initialize(
        &mut self,
        symbol: Symbol,
        dims: &[i32],
        init: &Located<Init>,
        constant: bool,
        global: bool,
    ) -> Semantic<Option<Vec<i32>>> {
        let mut slots = vec![None; dims.iter().product::<i32>() as usize];
        flatten(dims, init, &mut slots)?;

        let scalar = dims.is_empty();
        let mut values = Vec::new();
        let mut zeros = 0..0;

        for (position, slot) in slots.into_iter().enumerate() {
            let value = match slot {
                Some(expr) if constant => RValue::Const(self.constant(expr)?),
                Some(expr) => self.eval(expr)?,
                None => RValue::Const(0),
            };

            if let (true, RValue::Const(value)) = (constant, value) {
                values.push(value);
            }

            // Las constantes escalares siempre se pliegan y la memoria
            // global inicia en cero
            if constant && scalar {
                continue;
            } else if value == RValue::Const(0) && (global || !scalar) {
                if !global {
                    if zeros.is_empty() {
                        zeros.start = position;
                    }

                    zeros.end = position + 1;
                }

                continue;
            }

            self.clear(symbol, std::mem::replace(&mut zeros, 0..0));

            let index = (!scalar).then(|| RValue::Const(position as i32 * WORD_SIZE));
            self.push(Instruction::Assign {
                target: LValue { symbol, index },
                value,
            });
        }

        self.clear(symbol, zeros);
        Ok(constant.then(|| values))
    }

    /// Escribe ceros en un rango de elementos de un arreglo local.
    fn clear(&mut self, array: Symbol, run: Range<usize>) {
        let store = |index| Instruction::Assign {
            target: LValue {
                symbol: array,
                index: Some(index),
            },
            value: RValue::Const(0),
        };

        if run.len() < ZERO_LOOP_THRESHOLD {
            for position in run {
                self.push(store(RValue::Const(position as i32 * WORD_SIZE)));
            }

            return;
        }

        let cursor = self.temp();
        let top = self.label();

        self.push(Instruction::Assign {
            target: LValue {
                symbol: cursor,
                index: None,
            },
            value: RValue::Const(run.start as i32 * WORD_SIZE),
        });

        self.push(Instruction::SetLabel(top));
        self.push(store(RValue::Symbol(cursor)));
        self.push(Instruction::Binary {
            dest: cursor,
            op: BinOp::Add,
            lhs: RValue::Symbol(cursor),
            rhs: RValue::Const(WORD_SIZE),
        });

        self.push(Instruction::Branch {
            lhs: RValue::Symbol(cursor),
            rel: RelOp::Lt,
            rhs: RValue::Const(run.end as i32 * WORD_SIZE),
            target: top,
        });
    }
}

/// Cantidad de elementos de un arreglo, cuyo tamaño en bytes debe
/// ser representable.
pub(super) fn element_count(dims: &[i32], at: &Location) -> Semantic<u32> {
    dims.iter()
        .try_fold(1u32, |count, &dim| count.checked_mul(dim as u32))
        .filter(|&count| count <= i32::MAX as u32 / WORD_SIZE as u32)
        .ok_or_else(|| Located::at(SemanticError::ArrayTooLarge, at.clone()))
}

/// Distribuye un inicializador anidado sobre los elementos en orden.
///
/// Una sublista inicializa el subarreglo de mayor tamaño cuyo inicio
/// coincide con la posición actual. Los elementos sin inicializador
/// quedan como `None`.
fn flatten<'e>(
    dims: &[i32],
    init: &'e Located<Init>,
    slots: &mut [Option<&'e Located<Expr>>],
) -> Semantic<()> {
    let fail = |error: SemanticError, at: &Location| -> Semantic<()> { Err(Located::at(error, at.clone())) };

    let list = match (init.as_ref(), dims.is_empty()) {
        (Init::Expr(expr), true) => {
            slots[0] = Some(expr);
            return Ok(());
        }

        (Init::List(_), true) => return fail(SemanticError::ScalarBraces, init.location()),
        (Init::Expr(_), false) => return fail(SemanticError::ExpectedList, init.location()),
        (Init::List(list), false) => list,
    };

    let stride = |dims: &[i32]| dims.iter().map(|&dim| dim as usize).product::<usize>();

    let mut position = 0;
    for item in list {
        if position >= slots.len() {
            return fail(SemanticError::TooManyInitializers, item.location());
        }

        match item.as_ref() {
            Init::Expr(expr) => {
                slots[position] = Some(expr);
                position += 1;
            }

            Init::List(_) => {
                let depth = (1..dims.len()).find(|&depth| position % stride(&dims[depth..]) == 0);
                let depth = match depth {
                    Some(depth) => depth,
                    None if dims.len() == 1 => {
                        return fail(SemanticError::ScalarBraces, item.location())
                    }

                    None => return fail(SemanticError::MisalignedList, item.location()),
                };

                let size = stride(&dims[depth..]);
                flatten(&dims[depth..], item, &mut slots[position..position + size])?;
                position += size;
            }
        }
    }

    Ok(())
}
