//! Movimientos paralelos entre registros.

use crate::tigger::{Instruction, Reg};

/// Secuencializa un conjunto de copias que ocurren simultáneamente.
///
/// Cada destino aparece a lo sumo una vez. Una copia se emite cuando su
/// destino ya no es origen de ninguna otra pendiente; si todas las
/// pendientes forman ciclos, el destino de una de ellas se evacúa a
/// `scratch`, que no puede ser origen ni destino de ninguna copia.
pub fn parallel_move(moves: &[(Reg, Reg)], scratch: Reg) -> Vec<Instruction> {
    let mut pending: Vec<(Reg, Reg)> = moves
        .iter()
        .copied()
        .filter(|(dest, source)| dest != source)
        .collect();

    for (index, &(dest, source)) in pending.iter().enumerate() {
        assert!(dest != scratch && source != scratch, "scratch register in parallel move");
        assert!(
            pending[index + 1..].iter().all(|&(other, _)| other != dest),
            "{} is written twice by a parallel move",
            dest
        );
    }

    let mut output = Vec::new();
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|&(dest, _)| pending.iter().all(|&(_, source)| source != dest));

        let index = match ready {
            Some(index) => index,
            None => {
                // Todo lo pendiente está en ciclos, se rompe uno
                let (blocked, _) = pending[0];
                output.push(Instruction::Move {
                    dest: scratch,
                    source: blocked,
                });

                for (_, source) in pending.iter_mut().filter(|(_, source)| *source == blocked) {
                    *source = scratch;
                }

                0
            }
        };

        let (dest, source) = pending.remove(index);
        output.push(Instruction::Move { dest, source });
    }

    output
}
