//! Análisis semántico y generación de Eeyore.
//!
//! El árbol sintáctico se recorre una sola vez. Las expresiones cuyos
//! operandos son constantes se pliegan durante el recorrido, el resto
//! produce instrucciones sobre temporales nuevos. Las definiciones se
//! resuelven mediante una pila de ámbitos léxicos.
//!
//! La inicialización de variables globales se genera como código
//! ordinario que luego se reubica al inicio de `main`, junto con los
//! temporales que haya requerido.

use std::collections::HashMap;
use thiserror::Error;

use crate::{
    ir::{self, Decl, Instruction, Label, Symbol, SymbolKind},
    lex::Identifier,
    parse::{self, Item, ReturnType},
    source::Located,
};

mod expr;
mod init;
mod scope;
mod stmt;

use scope::Scopes;

pub type Semantic<T> = Result<T, Located<SemanticError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Entrypoint not found, define `int main()`")]
    NoMain,

    #[error("Symbol `{0}` is undefined")]
    Undefined(Identifier),

    #[error("Redefinition of `{0}` in the same scope")]
    Redefinition(Identifier),

    #[error("Expected a constant expression")]
    NotConstant,

    #[error("Constant `{0}` must be initialized")]
    UninitializedConst(Identifier),

    #[error("Division by zero in constant expression")]
    DivisionByZero,

    #[error("Array dimension must be positive, found {0}")]
    BadDimension(i32),

    #[error("Array is too large")]
    ArrayTooLarge,

    #[error("Too many indices for `{0}`")]
    TooManyIndices(Identifier),

    #[error("Constant index {1} is out of bounds for `{0}`")]
    IndexOutOfBounds(Identifier, i32),

    #[error("Cannot assign to constant `{0}`")]
    AssignToConst(Identifier),

    #[error("Cannot assign to array `{0}`, it is not fully indexed")]
    AssignToArray(Identifier),

    #[error("Too many initializers")]
    TooManyInitializers,

    #[error("Braces around scalar initializer")]
    ScalarBraces,

    #[error("Array initializer must be a brace-enclosed list")]
    ExpectedList,

    #[error("Nested initializer list does not start at a subarray boundary")]
    MisalignedList,

    #[error("Function `{0}` expects {1} arguments, found {2}")]
    Arity(Identifier, usize, usize),

    #[error("Function `{0}` returns void, its result cannot be used")]
    VoidValue(Identifier),

    #[error("A void function cannot return a value")]
    ReturnInVoid,

    #[error("Expected a return value")]
    MissingReturnValue,

    #[error("`break` outside of a loop")]
    BreakOutsideLoop,

    #[error("`continue` outside of a loop")]
    ContinueOutsideLoop,
}

/// Funciones de biblioteca declaradas implícitamente: nombre, aridad y
/// si producen un valor.
const RUNTIME: [(&str, usize, ReturnType); 8] = [
    ("getint", 0, ReturnType::Int),
    ("getch", 0, ReturnType::Int),
    ("getarray", 1, ReturnType::Int),
    ("putint", 1, ReturnType::Void),
    ("putch", 1, ReturnType::Void),
    ("putarray", 2, ReturnType::Void),
    ("starttime", 0, ReturnType::Void),
    ("stoptime", 0, ReturnType::Void),
];

#[derive(Copy, Clone)]
struct Signature {
    returns: ReturnType,
    arity: usize,
}

/// Estado compartido por toda la unidad de compilación.
struct Unit {
    scopes: Scopes,
    signatures: HashMap<Identifier, Signature>,
    last_label: u32,
    next_var: u32,
}

/// Código en construcción, con sus declaraciones y temporales.
#[derive(Default)]
struct Code {
    body: Vec<Instruction>,
    decls: Vec<Decl>,
    temps: u32,
}

struct Context<'a> {
    unit: &'a mut Unit,
    code: &'a mut Code,
    returns: ReturnType,
}

impl parse::Ast {
    pub fn resolve(&self) -> Semantic<ir::Program> {
        let mut unit = Unit {
            scopes: Scopes::default(),
            signatures: self.scan_signatures()?,
            last_label: 0,
            next_var: 0,
        };

        let mut init = Code::default();
        let mut code = Vec::new();

        for item in &self.items {
            match item {
                Item::Decl(decl) => {
                    let mut context = Context {
                        unit: &mut unit,
                        code: &mut init,
                        returns: ReturnType::Int,
                    };

                    context.declare(decl, true)?;
                }

                Item::Function(function) => code.push(unit.function(function)?),
            }
        }

        let main = code
            .iter_mut()
            .find(|function| function.name == "main")
            .ok_or_else(|| Located::at(SemanticError::NoMain, self.eof.clone()))?;

        let globals = relocate_init(init, main);

        log::debug!(
            "Generated {} functions and {} globals, {} labels",
            code.len(),
            globals.len(),
            unit.last_label
        );

        Ok(ir::Program { globals, code })
    }

    fn scan_signatures(&self) -> Semantic<HashMap<Identifier, Signature>> {
        let mut signatures: HashMap<_, _> = RUNTIME
            .iter()
            .map(|&(name, arity, returns)| (Identifier::from(name), Signature { returns, arity }))
            .collect();

        let functions = self.items.iter().filter_map(|item| match item {
            Item::Function(function) => Some(function),
            Item::Decl(_) => None,
        });

        for function in functions {
            let signature = Signature {
                returns: function.returns,
                arity: function.parameters.len(),
            };

            let name = function.name.as_ref();
            if signatures.insert(name.clone(), signature).is_some() {
                return Err(Located::at(
                    SemanticError::Redefinition(name.clone()),
                    function.name.location().clone(),
                ));
            }
        }

        Ok(signatures)
    }
}

impl Unit {
    fn function(&mut self, function: &parse::Function) -> Semantic<ir::Function> {
        let mut code = Code::default();
        let mut context = Context {
            unit: self,
            code: &mut code,
            returns: function.returns,
        };

        context.body(function)?;

        let function = ir::Function {
            name: function.name.as_ref().to_string(),
            parameters: function.parameters.len() as u32,
            decls: code.decls,
            body: code.body,
        };

        log::debug!(
            "f_{}: {} instructions, {} declarations",
            function.name,
            function.body.len(),
            function.decls.len()
        );

        Ok(function)
    }
}

impl Context<'_> {
    fn label(&mut self) -> Label {
        self.unit.last_label += 1;
        Label(self.unit.last_label)
    }

    fn temp(&mut self) -> Symbol {
        let symbol = Symbol::temp(self.code.temps);
        self.code.temps += 1;

        self.code.decls.push(Decl { symbol, size: None });
        symbol
    }

    fn var(&mut self, size: Option<u32>) -> Symbol {
        let symbol = Symbol::var(self.unit.next_var);
        self.unit.next_var += 1;

        self.code.decls.push(Decl { symbol, size });
        symbol
    }

    fn push(&mut self, instruction: Instruction) {
        self.code.body.push(instruction);
    }
}

/// Reubica el código de inicialización global al inicio de `main`.
///
/// Los temporales de inicialización se renumeran después de los de
/// `main`, que ya fue generado. Retorna las declaraciones globales.
fn relocate_init(init: Code, main: &mut ir::Function) -> Vec<Decl> {
    let offset = main
        .decls
        .iter()
        .filter(|decl| decl.symbol.kind == SymbolKind::Temp)
        .count() as u32;

    let shift = |symbol: &mut Symbol| {
        if symbol.kind == SymbolKind::Temp {
            symbol.id += offset;
        }
    };

    let (temps, globals): (Vec<_>, Vec<_>) = init
        .decls
        .into_iter()
        .partition(|decl| decl.symbol.kind == SymbolKind::Temp);

    main.decls.extend(temps.into_iter().map(|mut decl| {
        shift(&mut decl.symbol);
        decl
    }));

    let mut body = init.body;
    for instruction in &mut body {
        instruction.symbols_mut(shift);
    }

    body.append(&mut main.body);
    main.body = body;

    globals
}

#[cfg(test)]
mod tests;
