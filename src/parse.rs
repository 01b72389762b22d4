//! Análisis sintáctico.
//!
//! Las expresiones no se representan como árboles, sino como secuencias
//! en notación postfija ([`Expr`]). Los operadores `&&` y `||` insertan
//! además un marcador [`Element::Split`] inmediatamente después de su
//! operando izquierdo, de forma que el evaluador pueda omitir el operando
//! derecho sin tener que reconstruir la estructura de la expresión.

use std::{iter::Peekable, marker::PhantomData};
use thiserror::Error;

use crate::{
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};

#[derive(Debug)]
pub struct Ast {
    pub items: Vec<Item>,
    pub eof: Location,
}

#[derive(Debug)]
pub enum Item {
    Decl(Decl),
    Function(Function),
}

#[derive(Debug)]
pub struct Decl {
    pub constant: bool,
    pub defs: Vec<Def>,
}

#[derive(Debug)]
pub struct Def {
    pub name: Located<Identifier>,
    pub dims: Vec<Located<Expr>>,
    pub init: Option<Located<Init>>,
}

#[derive(Debug)]
pub enum Init {
    Expr(Located<Expr>),
    List(Vec<Located<Init>>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReturnType {
    Int,
    Void,
}

#[derive(Debug)]
pub struct Function {
    pub returns: ReturnType,
    pub name: Located<Identifier>,
    pub parameters: Vec<Parameter>,
    pub body: Block,
}

/// Parámetro formal.
///
/// Un parámetro arreglo omite su primera dimensión, por lo que
/// `dims` solo lista las restantes.
#[derive(Debug)]
pub struct Parameter {
    pub name: Located<Identifier>,
    pub dims: Option<Vec<Located<Expr>>>,
}

#[derive(Debug, Default)]
pub struct Block(pub Vec<BlockItem>);

#[derive(Debug)]
pub enum BlockItem {
    Decl(Decl),
    Statement(Statement),
}

#[derive(Debug)]
pub enum Statement {
    Assign {
        target: Located<LVal>,
        value: Located<Expr>,
    },

    Expr(Located<Expr>),

    Empty,

    Block(Block),

    If {
        condition: Located<Expr>,
        then: Box<Statement>,
        otherwise: Option<Box<Statement>>,
    },

    While {
        condition: Located<Expr>,
        body: Box<Statement>,
    },

    Break(Location),

    Continue(Location),

    Return(Located<Option<Located<Expr>>>),
}

#[derive(Debug)]
pub struct LVal {
    pub name: Located<Identifier>,
    pub indices: Vec<Located<Expr>>,
}

/// Expresión en notación postfija.
#[derive(Debug)]
pub struct Expr(pub Vec<Element>);

#[derive(Debug)]
pub enum Element {
    Term(Located<Term>),
    Unary(UnaryOp),
    Binary(BinOp),

    /// Frontera entre los operandos de un `&&` o `||`. El operador
    /// binario correspondiente cierra el operando derecho.
    Split(Logic),
}

#[derive(Debug)]
pub enum Term {
    Literal(i32),
    Call {
        function: Located<Identifier>,
        arguments: Vec<Located<Expr>>,
    },
    Read(LVal),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Logic {
    And,
    Or,
}

impl From<Logic> for BinOp {
    fn from(logic: Logic) -> Self {
        match logic {
            Logic::And => BinOp::And,
            Logic::Or => BinOp::Or,
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected token {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected token {0}, none was found instead")]
    MissingToken(Token),

    #[error("Expected identifier")]
    ExpectedId,

    #[error("Expected any of `int`, `void`")]
    ExpectedType,

    #[error("Expected an expression")]
    ExpectedExpr,

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

pub fn parse<'a, I>(tokens: I) -> Result<Ast, Located<ParserError>>
where
    I: Iterator<Item = &'a Located<Token>> + Clone,
{
    let mut parser = Parser {
        tokens: tokens.peekable(),
        last_known: Location::default(),
        lifetime_hack: PhantomData,
    };

    parser.program().map_err(Failure::coerce)
}

#[derive(Clone)]
struct Parser<'a, I: Iterator<Item = &'a Located<Token>> + Clone> {
    tokens: Peekable<I>,
    last_known: Location,
    lifetime_hack: PhantomData<&'a ()>,
}

enum Failure {
    Weak(Located<ParserError>),
    Strict(Located<ParserError>),
}

impl Failure {
    fn weak(self) -> Self {
        Failure::Weak(self.coerce())
    }

    fn strict(self) -> Self {
        Failure::Strict(self.coerce())
    }

    fn coerce(self) -> Located<ParserError> {
        match self {
            Failure::Weak(error) => error,
            Failure::Strict(error) => error,
        }
    }
}

type Parse<T> = Result<T, Failure>;

impl<'a, I> Parser<'a, I>
where
    I: Iterator<Item = &'a Located<Token>> + Clone,
{
    fn program(&mut self) -> Parse<Ast> {
        let mut items = Vec::new();
        while self.peek().is_some() {
            let is_function = self
                .lookahead(|s| {
                    s.return_type()?;
                    s.id()?;
                    s.expect(Token::OpenParen)
                })
                .is_ok();

            let item = if is_function {
                Item::Function(self.function()?)
            } else {
                Item::Decl(self.decl()?)
            };

            items.push(item);
        }

        Ok(Ast {
            items,
            eof: self.last_known.clone(),
        })
    }

    fn decl(&mut self) -> Parse<Decl> {
        let constant = self.accept(&Token::Keyword(Keyword::Const));
        self.keyword(Keyword::Int)?;

        let defs = self.comma_separated(Parser::def, false)?;
        self.expect(Token::Semicolon)?;

        Ok(Decl { constant, defs })
    }

    fn def(&mut self) -> Parse<Def> {
        let name = self.id().map_err(Failure::weak)?;
        let dims = self.indices()?;

        let init = if self.accept(&Token::Assign) {
            Some(self.init()?)
        } else {
            None
        };

        Ok(Def { name, dims, init })
    }

    fn init(&mut self) -> Parse<Located<Init>> {
        let start = self.here();
        if !self.accept(&Token::OpenCurly) {
            let expr = self.expr()?;
            let location = expr.location().clone();
            return Ok(Located::at(Init::Expr(expr), location));
        }

        let items = if self.accept(&Token::CloseCurly) {
            Vec::new()
        } else {
            let items = self.comma_separated(Parser::init, false)?;
            self.expect(Token::CloseCurly)?;
            items
        };

        Ok(Located::at(Init::List(items), self.since(start)))
    }

    fn function(&mut self) -> Parse<Function> {
        let returns = self.return_type()?;
        let name = self.id()?;

        self.expect(Token::OpenParen)?;
        let parameters = self.comma_separated(Parser::parameter, true)?;
        self.expect(Token::CloseParen)?;

        let body = self.block()?;

        Ok(Function {
            returns,
            name,
            parameters,
            body,
        })
    }

    fn return_type(&mut self) -> Parse<ReturnType> {
        match self.next()?.into_inner() {
            Token::Keyword(Keyword::Int) => Ok(ReturnType::Int),
            Token::Keyword(Keyword::Void) => Ok(ReturnType::Void),
            _ => self.fail(ParserError::ExpectedType),
        }
    }

    fn parameter(&mut self) -> Parse<Parameter> {
        self.keyword(Keyword::Int).map_err(Failure::weak)?;
        let name = self.id()?;

        let dims = if self.accept(&Token::OpenSquare) {
            self.expect(Token::CloseSquare)?;
            Some(self.indices()?)
        } else {
            None
        };

        Ok(Parameter { name, dims })
    }

    fn block(&mut self) -> Parse<Block> {
        self.expect(Token::OpenCurly)?;

        let mut items = Vec::new();
        while !self.accept(&Token::CloseCurly) {
            let item = match self.peek() {
                Some(Token::Keyword(Keyword::Const | Keyword::Int)) => BlockItem::Decl(self.decl()?),
                _ => BlockItem::Statement(self.statement()?),
            };

            items.push(item);
        }

        Ok(Block(items))
    }

    fn statement(&mut self) -> Parse<Statement> {
        let start = self.here();

        let statement = match self.peek() {
            Some(Token::OpenCurly) => Statement::Block(self.block()?),

            Some(Token::Semicolon) => {
                self.next()?;
                Statement::Empty
            }

            Some(Token::Keyword(Keyword::If)) => {
                self.next()?;
                let condition = self.condition()?;
                let then = Box::new(self.statement()?);

                let otherwise = if self.accept(&Token::Keyword(Keyword::Else)) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };

                Statement::If {
                    condition,
                    then,
                    otherwise,
                }
            }

            Some(Token::Keyword(Keyword::While)) => {
                self.next()?;
                let condition = self.condition()?;
                let body = Box::new(self.statement()?);

                Statement::While { condition, body }
            }

            Some(Token::Keyword(Keyword::Break)) => {
                self.next()?;
                self.expect(Token::Semicolon)?;
                Statement::Break(self.since(start))
            }

            Some(Token::Keyword(Keyword::Continue)) => {
                self.next()?;
                self.expect(Token::Semicolon)?;
                Statement::Continue(self.since(start))
            }

            Some(Token::Keyword(Keyword::Return)) => {
                self.next()?;
                let value = if self.accept(&Token::Semicolon) {
                    None
                } else {
                    let value = self.expr()?;
                    self.expect(Token::Semicolon)?;
                    Some(value)
                };

                Statement::Return(Located::at(value, self.since(start)))
            }

            _ => {
                let assignment = self.attempt(|s| {
                    let target = s.lval().map_err(Failure::weak)?;
                    s.expect(Token::Assign).map_err(Failure::weak)?;
                    Ok(target)
                });

                match assignment {
                    Ok(target) => {
                        let value = self.expr()?;
                        self.expect(Token::Semicolon)?;
                        Statement::Assign { target, value }
                    }

                    Err(Failure::Weak(_)) => {
                        let expr = self.expr()?;
                        self.expect(Token::Semicolon)?;
                        Statement::Expr(expr)
                    }

                    Err(error) => return Err(error),
                }
            }
        };

        Ok(statement)
    }

    fn condition(&mut self) -> Parse<Located<Expr>> {
        self.expect(Token::OpenParen)?;
        let condition = self.expr()?;
        self.expect(Token::CloseParen)?;

        Ok(condition)
    }

    fn lval(&mut self) -> Parse<Located<LVal>> {
        let name = self.id()?;
        let start = name.location().clone();
        let indices = self.indices()?;

        Ok(Located::at(LVal { name, indices }, self.since(start)))
    }

    fn indices(&mut self) -> Parse<Vec<Located<Expr>>> {
        let mut indices = Vec::new();
        while self.accept(&Token::OpenSquare) {
            indices.push(self.expr()?);
            self.expect(Token::CloseSquare)?;
        }

        Ok(indices)
    }

    fn expr(&mut self) -> Parse<Located<Expr>> {
        let start = self.here();

        let mut elements = Vec::new();
        self.binary(&mut elements, 0)?;

        Ok(Located::at(Expr(elements), self.since(start)))
    }

    /// Precedencia por niveles, de menor a mayor, emitiendo en postfijo.
    fn binary(&mut self, out: &mut Vec<Element>, level: usize) -> Parse<()> {
        if level == PRECEDENCE_LEVELS {
            return self.unary(out);
        }

        self.binary(out, level + 1)?;
        loop {
            let op = match self.peek().and_then(|token| binary_op(level, &token)) {
                Some(op) => op,
                None => break Ok(()),
            };

            self.next()?;
            match op {
                BinOp::And => out.push(Element::Split(Logic::And)),
                BinOp::Or => out.push(Element::Split(Logic::Or)),
                _ => (),
            }

            self.binary(out, level + 1).map_err(Failure::strict)?;
            out.push(Element::Binary(op));
        }
    }

    fn unary(&mut self, out: &mut Vec<Element>) -> Parse<()> {
        let op = match self.peek() {
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Minus) => UnaryOp::Minus,
            Some(Token::Not) => UnaryOp::Not,
            _ => return self.primary(out),
        };

        self.next()?;
        self.unary(out).map_err(Failure::strict)?;
        out.push(Element::Unary(op));

        Ok(())
    }

    fn primary(&mut self, out: &mut Vec<Element>) -> Parse<()> {
        let (location, token) = self.next()?.split();

        let term = match token {
            Token::OpenParen => {
                self.binary(out, 0)?;
                return self.expect(Token::CloseParen);
            }

            Token::IntLiteral(integer) => Term::Literal(integer),

            Token::Id(id) if self.accept(&Token::OpenParen) => {
                let function = Located::at(id, location.clone());
                let arguments = if self.accept(&Token::CloseParen) {
                    Vec::new()
                } else {
                    let arguments = self.comma_separated(Parser::expr, false)?;
                    self.expect(Token::CloseParen)?;
                    arguments
                };

                Term::Call {
                    function,
                    arguments,
                }
            }

            Token::Id(id) => {
                let name = Located::at(id, location.clone());
                let indices = self.indices()?;

                Term::Read(LVal { name, indices })
            }

            _ => return self.fail(ParserError::ExpectedExpr).map_err(Failure::weak),
        };

        out.push(Element::Term(Located::at(term, self.since(location))));
        Ok(())
    }

    fn attempt<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        let mut fork = self.clone();

        let result = rule(&mut fork);
        if result.is_ok() {
            *self = fork;
        }

        result
    }

    fn lookahead<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        rule(&mut self.clone())
    }

    fn comma_separated<T, F>(&mut self, mut rule: F, allow_empty: bool) -> Parse<Vec<T>>
    where
        F: FnMut(&mut Self) -> Parse<T>,
    {
        let mut items = match self.attempt(|s| rule(s)) {
            Err(Failure::Weak(_)) if allow_empty => return Ok(Vec::new()),
            item => vec![item.map_err(Failure::strict)?],
        };

        while self.accept(&Token::Comma) {
            items.push(rule(self).map_err(Failure::strict)?);
        }

        Ok(items)
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            _ => self.fail(ParserError::ExpectedId),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.next().map(Located::into_inner) {
            Ok(found) if found == token => Ok(()),
            Ok(found) => self.fail(ParserError::UnexpectedToken(token, found)),
            Err(_) => self.fail(ParserError::MissingToken(token)),
        }
    }

    /// Consume el siguiente token solo si es el indicado.
    fn accept(&mut self, token: &Token) -> bool {
        let matches = matches!(self.tokens.peek(), Some(next) if next.val() == token);
        if matches {
            if let Some(next) = self.tokens.next() {
                self.last_known = next.location().clone();
            }
        }

        matches
    }

    fn peek(&mut self) -> Option<Token> {
        self.tokens.peek().map(|next| next.val().clone())
    }

    /// Ubicación del siguiente token, o del último si ya no hay más.
    fn here(&mut self) -> Location {
        match self.tokens.peek() {
            Some(next) => next.location().clone(),
            None => self.last_known.clone(),
        }
    }

    /// Rango desde `start` hasta el último token consumido.
    fn since(&self, start: Location) -> Location {
        Location::span(start, &self.last_known)
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.next() {
            Some(token) => {
                self.last_known = token.location().clone();
                Ok(token.clone())
            }

            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Failure::Strict(Located::at(error, self.last_known.clone())))
    }
}

const PRECEDENCE_LEVELS: usize = 6;

fn binary_op(level: usize, token: &Token) -> Option<BinOp> {
    use BinOp::*;

    let op = match (level, token) {
        (0, Token::Or) => Or,
        (1, Token::And) => And,
        (2, Token::Equal) => Equal,
        (2, Token::NotEqual) => NotEqual,
        (3, Token::Less) => Less,
        (3, Token::Greater) => Greater,
        (3, Token::LessOrEqual) => LessOrEqual,
        (3, Token::GreaterOrEqual) => GreaterOrEqual,
        (4, Token::Plus) => Add,
        (4, Token::Minus) => Sub,
        (5, Token::Times) => Mul,
        (5, Token::Div) => Div,
        (5, Token::Rem) => Rem,
        _ => return None,
    };

    Some(op)
}
