//! Vida de símbolos e interferencia entre ellos.

use std::collections::HashSet;

use crate::{analysis::Dataflow, ir::Function};

/// Ranuras vivas a la entrada de cada instrucción.
///
/// Un símbolo leído por una instrucción está vivo a su entrada aunque
/// la misma instrucción lo redefina. Desde ahí se propaga hacia atrás
/// hasta alcanzar una definición. Los arreglos no se rastrean.
pub struct Liveness {
    live_in: Vec<Vec<usize>>,
}

impl Liveness {
    pub fn new(function: &Function, dataflow: &Dataflow) -> Self {
        let len = dataflow.len();

        let mut uses = vec![Vec::new(); dataflow.slot_count()];
        for (position, instruction) in function.body.iter().enumerate() {
            for symbol in instruction.uses() {
                match dataflow.slot(symbol) {
                    Some(slot) if !dataflow.is_array(slot) => uses[slot].push(position),
                    _ => (),
                }
            }
        }

        let mut live_in = vec![Vec::new(); len];
        let mut marked = vec![false; len];
        let mut touched = Vec::new();

        for (slot, positions) in uses.iter().enumerate() {
            let symbol = dataflow.slot_decl(slot).symbol;

            for &start in positions {
                let mut first = true;
                dataflow.walk_back(start, |position| {
                    let defines = !std::mem::take(&mut first)
                        && function.body[position].definition() == Some(symbol);

                    if marked[position] || defines {
                        return true;
                    }

                    marked[position] = true;
                    touched.push(position);
                    false
                });
            }

            for position in touched.drain(..) {
                marked[position] = false;
                live_in[position].push(slot);
            }
        }

        Liveness { live_in }
    }

    /// Ranuras vivas a la entrada, en orden ascendente.
    pub fn live_in(&self, position: usize) -> &[usize] {
        &self.live_in[position]
    }

    pub fn is_live_in(&self, position: usize, slot: usize) -> bool {
        self.live_in[position].binary_search(&slot).is_ok()
    }

    pub fn is_live_out(&self, dataflow: &Dataflow, position: usize, slot: usize) -> bool {
        dataflow
            .successors(position)
            .iter()
            .any(|&successor| self.is_live_in(successor, slot))
    }

    pub fn live_out(&self, dataflow: &Dataflow, position: usize) -> Vec<usize> {
        let mut live: Vec<usize> = dataflow
            .successors(position)
            .iter()
            .flat_map(|&successor| self.live_in(successor).iter().copied())
            .collect();

        live.sort_unstable();
        live.dedup();
        live
    }
}

/// Grafo de interferencia: dos ranuras son adyacentes si ambas están
/// vivas a la entrada de alguna instrucción.
pub struct Interference {
    adjacent: Vec<HashSet<usize>>,
}

impl Interference {
    pub fn new(liveness: &Liveness, slots: usize) -> Self {
        let mut adjacent = vec![HashSet::new(); slots];

        for live in &liveness.live_in {
            for (index, &a) in live.iter().enumerate() {
                for &b in &live[index + 1..] {
                    adjacent[a].insert(b);
                    adjacent[b].insert(a);
                }
            }
        }

        Interference { adjacent }
    }

    pub fn slot_count(&self) -> usize {
        self.adjacent.len()
    }

    pub fn neighbors(&self, slot: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacent[slot].iter().copied()
    }

    pub fn interferes(&self, a: usize, b: usize) -> bool {
        self.adjacent[a].contains(&b)
    }
}
