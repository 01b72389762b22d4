use super::{init::element_count, scope::Definition, Context, Semantic, SemanticError};
use crate::{
    ir::{Instruction, Label, RValue, Symbol},
    parse::{self, Block, BlockItem, Element, Expr, ReturnType, Statement, Term},
    source::Located,
};

/// Destinos de `continue` y `break` del ciclo más interno.
#[derive(Copy, Clone)]
struct Loop {
    head: Label,
    exit: Label,
}

impl Context<'_> {
    pub(super) fn body(&mut self, function: &parse::Function) -> Semantic<()> {
        self.unit.scopes.enter();

        for (index, parameter) in function.parameters.iter().enumerate() {
            let dims = match &parameter.dims {
                None => Vec::new(),
                Some(rest) => {
                    let rest = self.dims(rest)?;
                    element_count(&rest, parameter.name.location())?;

                    std::iter::once(0).chain(rest).collect()
                }
            };

            let definition = Definition {
                symbol: Symbol::param(index as u32),
                dims,
                values: None,
            };

            self.unit.scopes.define(&parameter.name, definition)?;
        }

        self.block(&function.body, None)?;
        self.unit.scopes.leave();

        let falls_through = !matches!(self.code.body.last(), Some(last) if last.is_terminator());
        if falls_through {
            let value = match self.returns {
                ReturnType::Int => Some(RValue::Const(0)),
                ReturnType::Void => None,
            };

            self.push(Instruction::Return(value));
        }

        Ok(())
    }

    fn block(&mut self, block: &Block, innermost: Option<Loop>) -> Semantic<()> {
        self.unit.scopes.enter();

        for item in &block.0 {
            match item {
                BlockItem::Decl(decl) => self.declare(decl, false)?,
                BlockItem::Statement(statement) => self.statement(statement, innermost)?,
            }
        }

        self.unit.scopes.leave();
        Ok(())
    }

    fn statement(&mut self, statement: &Statement, innermost: Option<Loop>) -> Semantic<()> {
        match statement {
            Statement::Assign { target, value } => {
                let target = self.target(target.as_ref())?;
                let value = self.eval(value)?;
                self.push(Instruction::Assign { target, value });
            }

            Statement::Expr(expr) => self.discard(expr)?,
            Statement::Empty => (),
            Statement::Block(block) => self.block(block, innermost)?,

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                let skip = self.label();
                self.branch(condition, false, skip)?;
                self.statement(then, innermost)?;

                match otherwise {
                    None => self.push(Instruction::SetLabel(skip)),
                    Some(otherwise) => {
                        let end = self.label();
                        self.push(Instruction::Jump(end));
                        self.push(Instruction::SetLabel(skip));
                        self.statement(otherwise, innermost)?;
                        self.push(Instruction::SetLabel(end));
                    }
                }
            }

            Statement::While { condition, body } => {
                let head = self.label();
                let exit = self.label();

                self.push(Instruction::SetLabel(head));
                self.branch(condition, false, exit)?;
                self.statement(body, Some(Loop { head, exit }))?;
                self.push(Instruction::Jump(head));
                self.push(Instruction::SetLabel(exit));
            }

            Statement::Break(location) => {
                let exit = innermost
                    .map(|innermost| innermost.exit)
                    .ok_or_else(|| Located::at(SemanticError::BreakOutsideLoop, location.clone()))?;

                self.push(Instruction::Jump(exit));
            }

            Statement::Continue(location) => {
                let head = innermost
                    .map(|innermost| innermost.head)
                    .ok_or_else(|| Located::at(SemanticError::ContinueOutsideLoop, location.clone()))?;

                self.push(Instruction::Jump(head));
            }

            Statement::Return(value) => {
                let value = match (self.returns, value.val()) {
                    (ReturnType::Int, Some(expr)) => Some(self.eval(expr)?),
                    (ReturnType::Void, None) => None,

                    (ReturnType::Int, None) => {
                        let at = value.location().clone();
                        return Err(Located::at(SemanticError::MissingReturnValue, at));
                    }

                    (ReturnType::Void, Some(expr)) => {
                        let at = expr.location().clone();
                        return Err(Located::at(SemanticError::ReturnInVoid, at));
                    }
                };

                self.push(Instruction::Return(value));
            }
        }

        Ok(())
    }

    /// Evalúa una expresión por sus efectos. Una llamada aislada puede
    /// invocar una función sin valor de retorno.
    fn discard(&mut self, expr: &Located<Expr>) -> Semantic<()> {
        if let [Element::Term(term)] = expr.as_ref().0.as_slice() {
            if let Term::Call {
                function,
                arguments,
            } = term.as_ref()
            {
                self.call(function, arguments, term.location())?;
                return Ok(());
            }
        }

        self.eval(expr)?;
        Ok(())
    }
}
