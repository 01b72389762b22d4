//! Análisis de flujo de datos sobre una función Eeyore.
//!
//! [`Dataflow`] resume el grafo de control de una función (aristas
//! por posición de instrucción), asigna índices densos a sus símbolos
//! locales y estima la profundidad de anidamiento en ciclos. Es una
//! estructura desechable: se construye a partir de una instantánea de
//! la función y debe reconstruirse si la función cambia.

use std::collections::{HashMap, VecDeque};

use crate::ir::{Decl, Function, Instruction, Label, Symbol};

mod dominators;

pub use dominators::DominatorTree;

pub struct Dataflow {
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    labels: HashMap<Label, usize>,
    loop_depth: Vec<u32>,
    slots: Vec<Decl>,
    symbols: HashMap<Symbol, usize>,
}

impl Dataflow {
    pub fn new(function: &Function) -> Self {
        let body = &function.body;
        let len = body.len();

        let labels: HashMap<_, _> = body
            .iter()
            .enumerate()
            .filter_map(|(position, instruction)| match instruction {
                Instruction::SetLabel(label) => Some((*label, position)),
                _ => None,
            })
            .collect();

        let mut successors = vec![Vec::new(); len];
        let mut predecessors = vec![Vec::new(); len];

        for (position, instruction) in body.iter().enumerate() {
            let mut edge = |to: usize| {
                successors[position].push(to);
                predecessors[to].push(position);
            };

            if let Some(target) = instruction.jump_target() {
                let to = *labels
                    .get(&target)
                    .unwrap_or_else(|| panic!("label {} is not defined in f_{}", target, function.name));

                edge(to);
            }

            let falls_through = !matches!(instruction, Instruction::Jump(_));
            if falls_through && position + 1 < len {
                edge(position + 1);
            }
        }

        // Cada arista hacia atrás incrementa la profundidad de todo el
        // rango que encierra, acumulado como arreglo de diferencias
        let mut delta = vec![0i64; len + 1];
        for (from, targets) in successors.iter().enumerate() {
            for &to in targets.iter().filter(|&&to| to < from) {
                delta[to] += 1;
                delta[from + 1] -= 1;
            }
        }

        let loop_depth = delta
            .iter()
            .take(len)
            .scan(0i64, |depth, delta| {
                *depth += delta;
                Some(*depth as u32)
            })
            .collect();

        let slots: Vec<Decl> = (0..function.parameters)
            .map(|id| Decl {
                symbol: Symbol::param(id),
                size: None,
            })
            .chain(function.decls.iter().copied())
            .collect();

        let symbols = slots
            .iter()
            .enumerate()
            .map(|(slot, decl)| (decl.symbol, slot))
            .collect();

        Dataflow {
            successors,
            predecessors,
            labels,
            loop_depth,
            slots,
            symbols,
        }
    }

    /// Cantidad de instrucciones.
    pub fn len(&self) -> usize {
        self.successors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    pub fn successors(&self, position: usize) -> &[usize] {
        &self.successors[position]
    }

    pub fn predecessors(&self, position: usize) -> &[usize] {
        &self.predecessors[position]
    }

    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    /// Estimación de cuántos ciclos encierran a una instrucción.
    pub fn loop_depth(&self, position: usize) -> u32 {
        self.loop_depth[position]
    }

    /// Índice denso de un símbolo local; `None` para globales.
    ///
    /// Los parámetros ocupan los primeros índices, seguidos por las
    /// declaraciones en orden.
    pub fn slot(&self, symbol: Symbol) -> Option<usize> {
        self.symbols.get(&symbol).copied()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_decl(&self, slot: usize) -> Decl {
        self.slots[slot]
    }

    pub fn is_array(&self, slot: usize) -> bool {
        self.slots[slot].size.is_some()
    }

    /// Recorrido hacia atrás en anchura a partir de `start`.
    ///
    /// `stop` se invoca sobre cada posición alcanzada, incluyendo a
    /// `start`, y decide si el recorrido se detiene ahí. No hay registro
    /// interno de posiciones visitadas: `stop` debe detener posiciones
    /// ya vistas, o el recorrido no termina en presencia de ciclos.
    pub fn walk_back<F>(&self, start: usize, mut stop: F)
    where
        F: FnMut(usize) -> bool,
    {
        if stop(start) {
            return;
        }

        let mut queue = VecDeque::from([start]);
        while let Some(position) = queue.pop_front() {
            for &predecessor in &self.predecessors[position] {
                if !stop(predecessor) {
                    queue.push_back(predecessor);
                }
            }
        }
    }

    /// Posiciones alcanzables desde la entrada.
    pub fn reachable(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.len()];
        let mut pending: Vec<usize> = (!self.is_empty()).then(|| 0).into_iter().collect();

        while let Some(position) = pending.pop() {
            if !std::mem::replace(&mut reachable[position], true) {
                pending.extend(self.successors[position].iter().copied());
            }
        }

        reachable
    }

    pub fn dominator_tree(&self) -> DominatorTree {
        DominatorTree::new(self)
    }
}
