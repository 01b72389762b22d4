//! Expresiones, accesos a variables y condiciones de salto.
//!
//! Una expresión postfija se descompone desde su último elemento:
//! el operando derecho de un operador binario es el sufijo más corto
//! que aporta exactamente un valor a la pila. Esto permite tratar las
//! expresiones como árboles sin construirlos.

use super::{Context, Semantic, SemanticError};
use crate::{
    ir::{BinOp, Instruction, LValue, Label, RValue, RelOp, Symbol, UnOp, TIMING_FUNCTIONS, WORD_SIZE},
    lex::Identifier,
    parse::{self, Element, Expr, LVal, Logic, ReturnType, Term, UnaryOp},
    source::{Located, Location},
};

/// Resultado estático de un salto condicional generado.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum Flow {
    Always,
    Never,
    Maybe,
}

enum View<'e> {
    Term(&'e Located<Term>),
    Unary(UnaryOp, &'e [Element]),
    Binary(parse::BinOp, &'e [Element], &'e [Element]),
    Logic(Logic, &'e [Element], &'e [Element]),
}

/// Ubicación de un valor nombrado tras resolver sus índices.
enum Place {
    Const(i32),
    Scalar(Symbol),
    Pointer(RValue),
    Element { array: Symbol, index: RValue },
}

fn view(elements: &[Element]) -> View<'_> {
    let (last, rest) = elements.split_last().expect("empty expression");

    match last {
        Element::Term(term) => {
            assert!(rest.is_empty(), "dangling operands in expression");
            View::Term(term)
        }

        Element::Unary(op) => View::Unary(*op, rest),

        Element::Binary(op) => {
            let mut values = 0;
            let split = rest
                .iter()
                .rposition(|element| {
                    values += match element {
                        Element::Term(_) => 1,
                        Element::Binary(_) => -1,
                        Element::Unary(_) | Element::Split(_) => 0,
                    };

                    values == 1
                })
                .expect("malformed postfix expression");

            let (lhs, rhs) = rest.split_at(split);
            match op {
                parse::BinOp::And | parse::BinOp::Or => match lhs.split_last() {
                    Some((Element::Split(logic), lhs)) => View::Logic(*logic, lhs, rhs),
                    _ => unreachable!("logical operator without split marker"),
                },

                _ => View::Binary(*op, lhs, rhs),
            }
        }

        Element::Split(_) => unreachable!("split marker at end of expression"),
    }
}

fn lower_op(op: parse::BinOp) -> BinOp {
    use parse::BinOp::*;

    match op {
        Add => BinOp::Add,
        Sub => BinOp::Sub,
        Mul => BinOp::Mul,
        Div => BinOp::Div,
        Rem => BinOp::Rem,
        Less => BinOp::Lt,
        Greater => BinOp::Gt,
        LessOrEqual => BinOp::Le,
        GreaterOrEqual => BinOp::Ge,
        Equal => BinOp::Eq,
        NotEqual => BinOp::Ne,
        And => BinOp::And,
        Or => BinOp::Or,
    }
}

impl Context<'_> {
    pub(super) fn eval(&mut self, expr: &Located<Expr>) -> Semantic<RValue> {
        self.reduce(&expr.as_ref().0, expr.location())
    }

    pub(super) fn constant(&mut self, expr: &Located<Expr>) -> Semantic<i32> {
        match self.eval(expr)? {
            RValue::Const(value) => Ok(value),
            RValue::Symbol(_) => Err(Located::at(
                SemanticError::NotConstant,
                expr.location().clone(),
            )),
        }
    }

    /// Genera un salto a `target` que se toma si y solo si el valor de
    /// verdad de la condición es `when`.
    pub(super) fn branch(&mut self, condition: &Located<Expr>, when: bool, target: Label) -> Semantic<Flow> {
        self.branch_on(&condition.as_ref().0, when, target, condition.location())
    }

    pub(super) fn read(&mut self, lval: &LVal) -> Semantic<RValue> {
        let value = match self.place(lval, false)? {
            Place::Const(value) => RValue::Const(value),
            Place::Scalar(symbol) => RValue::Symbol(symbol),
            Place::Pointer(pointer) => pointer,
            Place::Element { array, index } => {
                let dest = self.temp();
                self.push(Instruction::Load { dest, array, index });
                RValue::Symbol(dest)
            }
        };

        Ok(value)
    }

    pub(super) fn target(&mut self, lval: &LVal) -> Semantic<LValue> {
        match self.place(lval, true)? {
            Place::Scalar(symbol) => Ok(LValue {
                symbol,
                index: None,
            }),

            Place::Element { array, index } => Ok(LValue {
                symbol: array,
                index: Some(index),
            }),

            Place::Const(_) | Place::Pointer(_) => unreachable!("non-assignable place"),
        }
    }

    /// Genera una llamada y retorna el símbolo que recibe su resultado,
    /// si la función produce uno.
    pub(super) fn call(
        &mut self,
        function: &Located<Identifier>,
        arguments: &[Located<Expr>],
        at: &Location,
    ) -> Semantic<Option<Symbol>> {
        let name = function.as_ref();
        let signature = *self.unit.signatures.get(name).ok_or_else(|| {
            Located::at(
                SemanticError::Undefined(name.clone()),
                function.location().clone(),
            )
        })?;

        if arguments.len() != signature.arity {
            return Err(Located::at(
                SemanticError::Arity(name.clone(), signature.arity, arguments.len()),
                at.clone(),
            ));
        }

        let mut values = arguments
            .iter()
            .map(|argument| self.eval(argument))
            .collect::<Semantic<Vec<_>>>()?;

        // La biblioteca recibe la línea de la llamada para su reporte
        let target: &str = name.as_ref();
        if TIMING_FUNCTIONS.contains(&target) {
            values.push(RValue::Const(at.start().line() as i32));
        }

        let output = match signature.returns {
            ReturnType::Int => Some(self.temp()),
            ReturnType::Void => None,
        };

        self.push(Instruction::Call {
            target: target.to_owned(),
            arguments: values,
            output,
        });

        Ok(output)
    }

    fn reduce(&mut self, elements: &[Element], at: &Location) -> Semantic<RValue> {
        match view(elements) {
            View::Term(term) => self.term(term),

            View::Unary(op, operand) => {
                let operand = self.reduce(operand, at)?;
                Ok(match op {
                    UnaryOp::Plus => operand,
                    UnaryOp::Minus => self.unary(UnOp::Neg, operand),
                    UnaryOp::Not => self.unary(UnOp::Not, operand),
                })
            }

            View::Binary(op, lhs, rhs) => {
                let lhs = self.reduce(lhs, at)?;
                let rhs = self.reduce(rhs, at)?;
                self.binary(lower_op(op), lhs, rhs, at)
            }

            View::Logic(logic, lhs, rhs) => self.logic(logic, lhs, rhs, at),
        }
    }

    fn term(&mut self, term: &Located<Term>) -> Semantic<RValue> {
        match term.as_ref() {
            Term::Literal(value) => Ok(RValue::Const(*value)),
            Term::Read(lval) => self.read(lval),

            Term::Call {
                function,
                arguments,
            } => self
                .call(function, arguments, term.location())?
                .map(RValue::Symbol)
                .ok_or_else(|| {
                    Located::at(
                        SemanticError::VoidValue(function.as_ref().clone()),
                        term.location().clone(),
                    )
                }),
        }
    }

    fn unary(&mut self, op: UnOp, operand: RValue) -> RValue {
        match operand {
            RValue::Const(value) => RValue::Const(op.fold(value)),
            RValue::Symbol(_) => {
                let dest = self.temp();
                self.push(Instruction::Unary { dest, op, operand });
                RValue::Symbol(dest)
            }
        }
    }

    fn binary(&mut self, op: BinOp, lhs: RValue, rhs: RValue, at: &Location) -> Semantic<RValue> {
        if let (RValue::Const(lhs), RValue::Const(rhs)) = (lhs, rhs) {
            return op
                .fold(lhs, rhs)
                .map(RValue::Const)
                .ok_or_else(|| Located::at(SemanticError::DivisionByZero, at.clone()));
        }

        let dest = self.temp();
        self.push(Instruction::Binary { dest, op, lhs, rhs });
        Ok(RValue::Symbol(dest))
    }

    fn scale(&mut self, value: RValue, factor: i32, at: &Location) -> Semantic<RValue> {
        match factor {
            1 => Ok(value),
            _ => self.binary(BinOp::Mul, value, RValue::Const(factor), at),
        }
    }

    /// Valor 0/1 de un `&&` o `||`, evaluando el operando derecho solo
    /// cuando el izquierdo no determina el resultado.
    fn logic(&mut self, logic: Logic, lhs: &[Element], rhs: &[Element], at: &Location) -> Semantic<RValue> {
        let proceed_on = logic == Logic::And;

        match self.reduce(lhs, at)? {
            RValue::Const(value) if (value != 0) != proceed_on => {
                Ok(RValue::Const((value != 0) as i32))
            }

            RValue::Const(_) => {
                let rhs = self.reduce(rhs, at)?;
                self.binary(BinOp::Ne, rhs, RValue::Const(0), at)
            }

            left @ RValue::Symbol(_) => {
                let result = self.temp();
                let done = self.label();

                self.truth_into(result, left);
                self.push(Instruction::Branch {
                    lhs: RValue::Symbol(result),
                    rel: if proceed_on { RelOp::Eq } else { RelOp::Ne },
                    rhs: RValue::Const(0),
                    target: done,
                });

                let right = self.reduce(rhs, at)?;
                self.truth_into(result, right);
                self.push(Instruction::SetLabel(done));

                Ok(RValue::Symbol(result))
            }
        }
    }

    fn truth_into(&mut self, dest: Symbol, value: RValue) {
        let instruction = match value {
            RValue::Const(value) => Instruction::Assign {
                target: LValue {
                    symbol: dest,
                    index: None,
                },
                value: RValue::Const((value != 0) as i32),
            },

            RValue::Symbol(_) => Instruction::Binary {
                dest,
                op: BinOp::Ne,
                lhs: value,
                rhs: RValue::Const(0),
            },
        };

        self.push(instruction);
    }

    fn branch_on(&mut self, elements: &[Element], when: bool, target: Label, at: &Location) -> Semantic<Flow> {
        match view(elements) {
            View::Unary(UnaryOp::Not, operand) => self.branch_on(operand, !when, target, at),

            // Salta si cualquiera de los operandos salta
            View::Logic(logic, lhs, rhs) if (logic == Logic::Or) == when => {
                let flow = match self.branch_on(lhs, when, target, at)? {
                    Flow::Always => Flow::Always,
                    Flow::Never => self.branch_on(rhs, when, target, at)?,
                    Flow::Maybe => match self.branch_on(rhs, when, target, at)? {
                        Flow::Always => Flow::Always,
                        _ => Flow::Maybe,
                    },
                };

                Ok(flow)
            }

            // Salta solo si ambos operandos saltan
            View::Logic(_, lhs, rhs) => {
                let skip = self.label();
                let flow = match self.branch_on(lhs, !when, skip, at)? {
                    Flow::Always => Flow::Never,
                    Flow::Never => self.branch_on(rhs, when, target, at)?,
                    Flow::Maybe => match self.branch_on(rhs, when, target, at)? {
                        Flow::Never => Flow::Never,
                        _ => Flow::Maybe,
                    },
                };

                self.push(Instruction::SetLabel(skip));
                Ok(flow)
            }

            _ => {
                let value = self.reduce(elements, at)?;
                Ok(self.jump_if(value, when, target))
            }
        }
    }

    fn jump_if(&mut self, value: RValue, when: bool, target: Label) -> Flow {
        let symbol = match value {
            RValue::Symbol(symbol) => symbol,
            RValue::Const(value) if (value != 0) == when => {
                self.push(Instruction::Jump(target));
                return Flow::Always;
            }

            RValue::Const(_) => return Flow::Never,
        };

        // Una comparación recién calculada se funde con el salto
        let fused = match self.code.body.last() {
            Some(&Instruction::Binary { dest, op, lhs, rhs }) if dest == symbol => {
                op.relation().map(|rel| (lhs, rel, rhs))
            }

            _ => None,
        };

        let (lhs, rel, rhs) = match fused {
            Some(comparison) => {
                self.code.body.pop();
                if self.code.decls.last().map(|decl| decl.symbol) == Some(symbol) {
                    self.code.decls.pop();
                    self.code.temps -= 1;
                }

                comparison
            }

            None => (RValue::Symbol(symbol), RelOp::Ne, RValue::Const(0)),
        };

        self.push(Instruction::Branch {
            lhs,
            rel: if when { rel } else { rel.negate() },
            rhs,
            target,
        });

        Flow::Maybe
    }

    fn place(&mut self, lval: &LVal, write: bool) -> Semantic<Place> {
        let definition = self.unit.scopes.lookup(&lval.name)?;
        let name = lval.name.as_ref();
        let at = lval.name.location();
        let fail = |error: SemanticError| -> Semantic<Place> { Err(Located::at(error, at.clone())) };

        let rank = definition.dims.len();
        let indexed = lval.indices.len();

        if indexed > rank {
            return fail(SemanticError::TooManyIndices(name.clone()));
        } else if write && definition.values.is_some() {
            return fail(SemanticError::AssignToConst(name.clone()));
        } else if write && indexed < rank {
            return fail(SemanticError::AssignToArray(name.clone()));
        }

        let symbol = definition.symbol;
        let offset = match lval.indices.is_empty() {
            true => None,
            false => Some(self.offset(&definition.dims, &lval.indices, at)?),
        };

        let place = match (offset, &definition.values) {
            (None, _) if indexed < rank => Place::Pointer(RValue::Symbol(symbol)),
            (Some(offset), _) if indexed < rank => {
                Place::Pointer(self.binary(BinOp::Add, RValue::Symbol(symbol), offset, at)?)
            }

            (None, Some(values)) => Place::Const(values[0]),
            (None, None) => Place::Scalar(symbol),

            (Some(RValue::Const(offset)), Some(values)) => {
                let index = offset / WORD_SIZE;
                match usize::try_from(index).ok().and_then(|index| values.get(index)) {
                    Some(value) => Place::Const(*value),
                    None => return fail(SemanticError::IndexOutOfBounds(name.clone(), index)),
                }
            }

            (Some(index), _) => Place::Element {
                array: symbol,
                index,
            },
        };

        Ok(place)
    }

    /// Desplazamiento en bytes del elemento o subarreglo seleccionado.
    fn offset(&mut self, dims: &[i32], indices: &[Located<Expr>], at: &Location) -> Semantic<RValue> {
        let mut offset = self.eval(&indices[0])?;
        for (dim, index) in dims.iter().zip(indices).skip(1) {
            let scaled = self.scale(offset, *dim, at)?;
            let index = self.eval(index)?;
            offset = self.binary(BinOp::Add, scaled, index, at)?;
        }

        let stride = dims[indices.len()..].iter().product::<i32>() * WORD_SIZE;
        self.scale(offset, stride, at)
    }
}
