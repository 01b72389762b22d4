//! Compilador de SysY a RISC-V.
//!
//! # Front end
//! Cada programa deriva de un único archivo de código fuente.
//! Este archivo se somete primero a análisis léxico en [`lex`], de
//! lo cual se obtiene un flujo de tokens. El flujo de tokens se
//! dispone en un AST por medio de análisis sintáctico en [`parse`].
//! El árbol sintáctico es procesado por análisis semántico en
//! [`semantic`], de lo cual se genera la representación intermedia
//! de tres direcciones descrita en [`ir`] (Eeyore).
//!
//! # Middle end
//! [`analysis`] construye el grafo de control y el árbol de
//! dominadores de cada función, sobre los cuales [`opt`] aplica
//! propagación de copias, eliminación de subexpresiones comunes y
//! reutilización de lecturas de arreglo.
//!
//! # Back end
//! Es en este segmento donde ocurre asignación de registros a símbolos
//! y la traducción a [`tigger`], una representación sobre registros
//! físicos. El programa Tigger se emite finalmente como ensamblador
//! RISC-V. Ambas etapas se exponen en [`target`].

#[macro_use]
mod macros;

pub mod analysis;
pub mod error;
pub mod ir;
pub mod lex;
pub mod opt;
pub mod parse;
pub mod semantic;
pub mod source;
pub mod tigger;

mod arch;
mod codegen;

/// Generación de código.
///
/// Este módulo reexporta suficientes ítems internos relacionados a generación de código para
/// traducir IR a Tigger y de Tigger a ensamblador.
pub mod target {
    pub use crate::arch::riscv::emit;
    pub use crate::codegen::lower;
}
