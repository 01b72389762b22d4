/// Escribe una línea de ensamblador con sangría.
///
/// La primera forma emite un mnemónico u directiva sin operandos; la
/// segunda alinea los operandos, que siguen la sintaxis de `format!()`.
macro_rules! emit {
    ($context:expr, $opcode:expr) => {
        writeln!($context.output(), "  {}", $opcode)
    };

    ($context:expr, $opcode:expr, $($format:tt)*) => {{
        write!($context.output(), "  {:6} ", $opcode)?;
        writeln!($context.output(), $($format)*)
    }};
}
