use std::{collections::HashMap, rc::Rc};

use super::{Semantic, SemanticError};
use crate::{ir::Symbol, lex::Identifier, source::Located};

/// Lo que se sabe de un nombre definido.
#[derive(Debug)]
pub struct Definition {
    pub symbol: Symbol,

    /// Dimensiones declaradas. Un parámetro arreglo no conoce su
    /// primera dimensión, que se registra como cero.
    pub dims: Vec<i32>,

    /// Valores plegados, solo para definiciones `const`.
    pub values: Option<Vec<i32>>,
}

/// Pila de ámbitos léxicos. El fondo es el ámbito global.
pub struct Scopes {
    frames: Vec<HashMap<Identifier, Rc<Definition>>>,
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes {
            frames: vec![HashMap::new()],
        }
    }
}

impl Scopes {
    pub fn enter(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn leave(&mut self) {
        assert!(self.frames.len() > 1, "attempted to leave the global scope");
        self.frames.pop();
    }

    pub fn define(&mut self, name: &Located<Identifier>, definition: Definition) -> Semantic<()> {
        let frame = self.frames.last_mut().expect("empty scope stack");
        let id = name.as_ref();

        if frame.contains_key(id) {
            return Err(Located::at(
                SemanticError::Redefinition(id.clone()),
                name.location().clone(),
            ));
        }

        frame.insert(id.clone(), Rc::new(definition));
        Ok(())
    }

    pub fn lookup(&self, name: &Located<Identifier>) -> Semantic<Rc<Definition>> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name.as_ref()))
            .cloned()
            .ok_or_else(|| {
                Located::at(
                    SemanticError::Undefined(name.as_ref().clone()),
                    name.location().clone(),
                )
            })
    }
}
