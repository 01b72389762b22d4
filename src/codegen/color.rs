//! Coloreo del grafo de interferencia.
//!
//! Se simplifica el grafo retirando nodos de grado menor a [`COLORS`];
//! cuando no queda ninguno se retira de forma optimista el de menor
//! peso. Al reinsertar en orden inverso cada nodo toma el menor color
//! libre, o se derrama a la pila si no hay. Finalmente los colores se
//! traducen a registros, respetando primero las preferencias que evitan
//! copias alrededor de llamadas, parámetros y retornos.

use log::trace;

use super::{
    liveness::Interference,
    regs::{palette, RegSet, COLORS},
};

use crate::{
    analysis::Dataflow,
    ir::{Function, Instruction, RValue, Symbol},
    tigger::{Reg, MAX_ARGUMENTS},
};

/// Registro asignado a cada ranura; `None` si se derrama o es arreglo.
pub fn assign(function: &Function, dataflow: &Dataflow, interference: &Interference) -> Vec<Option<Reg>> {
    let colorable: Vec<bool> = (0..dataflow.slot_count())
        .map(|slot| !dataflow.is_array(slot))
        .collect();

    let weights = weights(function, dataflow);
    let stack = simplify(interference, &colorable, &weights);
    let colors = select(interference, &stack);

    paint(function, dataflow, &colors)
}

/// Frecuencia estimada de acceso: cada lectura o escritura pesa uno más
/// la profundidad de ciclos de la instrucción.
fn weights(function: &Function, dataflow: &Dataflow) -> Vec<u64> {
    let mut weights = vec![0; dataflow.slot_count()];

    for (position, instruction) in function.body.iter().enumerate() {
        let weight = dataflow.loop_depth(position) as u64 + 1;
        for symbol in instruction.uses().into_iter().chain(instruction.definition()) {
            if let Some(slot) = dataflow.slot(symbol) {
                weights[slot] += weight;
            }
        }
    }

    weights
}

fn simplify(interference: &Interference, colorable: &[bool], weights: &[u64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..colorable.len()).filter(|&slot| colorable[slot]).collect();
    order.sort_by_key(|&slot| (weights[slot], slot));

    let mut degree: Vec<usize> = (0..colorable.len())
        .map(|slot| interference.neighbors(slot).filter(|&other| colorable[other]).count())
        .collect();

    let mut removed = vec![false; colorable.len()];
    let mut stack = Vec::with_capacity(order.len());

    loop {
        let mut remaining = order.iter().copied().filter(|&slot| !removed[slot]);
        let next = remaining
            .clone()
            .find(|&slot| degree[slot] < COLORS)
            .or_else(|| remaining.next());

        let slot = match next {
            Some(slot) => slot,
            None => break,
        };

        if degree[slot] >= COLORS {
            trace!("slot {} is a spill candidate (weight {})", slot, weights[slot]);
        }

        removed[slot] = true;
        stack.push(slot);

        for neighbor in interference.neighbors(slot) {
            if colorable[neighbor] {
                degree[neighbor] -= 1;
            }
        }
    }

    stack
}

fn select(interference: &Interference, stack: &[usize]) -> Vec<Option<usize>> {
    let mut colors = vec![None; interference.slot_count()];

    for &slot in stack.iter().rev() {
        let mut taken = [false; COLORS];
        for neighbor in interference.neighbors(slot) {
            if let Some(color) = colors[neighbor] {
                taken[color] = true;
            }
        }

        colors[slot] = taken.iter().position(|&taken| !taken);
    }

    colors
}

/// Traduce colores a registros.
fn paint(function: &Function, dataflow: &Dataflow, colors: &[Option<usize>]) -> Vec<Option<Reg>> {
    let mut palette_map: [Option<Reg>; COLORS] = [None; COLORS];
    let mut taken = RegSet::empty();
    let mut has_calls = false;

    let mut prefer = |symbol: Symbol, reg: Reg| {
        let color = dataflow.slot(symbol).and_then(|slot| colors[slot]);
        if let Some(color) = color {
            if palette_map[color].is_none() && !taken.has(reg) {
                palette_map[color] = Some(reg);
                taken |= RegSet::single(reg);
            }
        }
    };

    for param in 0..function.parameters.min(MAX_ARGUMENTS as u32) {
        prefer(Symbol::param(param), Reg::argument(param as usize));
    }

    for instruction in &function.body {
        match instruction {
            Instruction::Call {
                arguments, output, ..
            } => {
                has_calls = true;
                if let Some(output) = output {
                    prefer(*output, Reg::A0);
                }

                let registers = arguments.iter().take(MAX_ARGUMENTS).enumerate();
                for (index, argument) in registers {
                    if let Some(symbol) = argument.symbol() {
                        prefer(symbol, Reg::argument(index));
                    }
                }
            }

            Instruction::Return(Some(RValue::Symbol(symbol))) => prefer(*symbol, Reg::A0),
            _ => (),
        }
    }

    let mut free = palette(has_calls).filter(|&reg| !taken.has(reg));
    for color in 0..COLORS {
        let needed = colors.iter().any(|&assigned| assigned == Some(color));
        if needed && palette_map[color].is_none() {
            palette_map[color] = Some(free.next().expect("register palette exhausted"));
        }
    }

    colors
        .iter()
        .map(|color| color.and_then(|color| palette_map[color]))
        .collect()
}
