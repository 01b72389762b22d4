//! Emisión de ensamblador para la arquitectura objetivo.
//!
//! La única arquitectura soportada es RV32IM, con la ABI `ilp32`. La
//! entrada es un programa Tigger ya asignado a registros, de modo que
//! la emisión es una traducción local, instrucción por instrucción,
//! más el prólogo y epílogo de cada función.

pub mod riscv;
