//! Optimización de Eeyore guiada por dominancia.
//!
//! Cada función se recorre en profundidad sobre su árbol de
//! dominancia. Un hecho registrado en un nodo (una copia, un cálculo,
//! una lectura de arreglo) es visible únicamente en el subárbol que
//! ese nodo domina; al abandonar el subárbol los hechos se deshacen.
//! Antes de aprovechar un hecho se verifica, recorriendo el grafo de
//! control hacia atrás, que ninguna instrucción intermedia haya
//! modificado los símbolos involucrados.
//!
//! Una llamada se considera escritura de toda variable global.

use log::{debug, trace};

use crate::{
    analysis::{Dataflow, DominatorTree},
    ir::{BinOp, Function, Instruction, LValue, Program, RValue, Symbol, SymbolKind, UnOp},
};

mod scoped;

use scoped::{Checkpoint, ScopedMap};

/// Cantidad máxima de pasadas por función.
const ROUNDS: usize = 3;

pub fn optimize(program: Program) -> Program {
    let code = program.code.into_iter().map(optimize_function).collect();

    Program {
        globals: program.globals,
        code,
    }
}

fn optimize_function(mut function: Function) -> Function {
    prune(&mut function);

    for round in 1..=ROUNDS {
        let dataflow = Dataflow::new(&function);
        let tree = dataflow.dominator_tree();

        let mut pass = Pass {
            dataflow: &dataflow,
            body: &mut function.body,
            defs: Default::default(),
            computations: Default::default(),
            loads: Default::default(),
            rewrites: 0,
        };

        pass.run(&tree);

        let rewrites = pass.rewrites;
        debug!("f_{}: round {} made {} rewrites", function.name, round, rewrites);

        if rewrites == 0 {
            break;
        }
    }

    function
}

/// Elimina instrucciones inalcanzables desde la entrada.
fn prune(function: &mut Function) {
    let reachable = Dataflow::new(function).reachable();
    let before = function.body.len();

    let mut reachable = reachable.into_iter();
    function.body.retain(|_| reachable.next().unwrap_or(false));

    let pruned = before - function.body.len();
    if pruned > 0 {
        debug!("f_{}: pruned {} unreachable instructions", function.name, pruned);
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
enum Computation {
    Unary(UnOp, RValue),
    Binary(BinOp, RValue, RValue),
}

impl Computation {
    fn swapped(self) -> Option<Computation> {
        match self {
            Computation::Binary(op, lhs, rhs) => op.swapped().map(|op| Computation::Binary(op, rhs, lhs)),
            Computation::Unary(..) => None,
        }
    }

    fn operands(self) -> Vec<Symbol> {
        match self {
            Computation::Unary(_, operand) => operand.symbol().into_iter().collect(),
            Computation::Binary(_, lhs, rhs) => lhs.symbol().into_iter().chain(rhs.symbol()).collect(),
        }
    }
}

enum Visit {
    Enter(usize),
    Leave([Checkpoint; 3]),
}

struct Pass<'a> {
    dataflow: &'a Dataflow,
    body: &'a mut [Instruction],

    /// Definición más cercana de cada símbolo en el camino de dominancia.
    defs: ScopedMap<Symbol, usize>,
    computations: ScopedMap<Computation, usize>,
    loads: ScopedMap<(Symbol, RValue), usize>,
    rewrites: usize,
}

impl Pass<'_> {
    fn run(&mut self, tree: &DominatorTree) {
        let mut pending = vec![Visit::Enter(0)];

        while let Some(visit) = pending.pop() {
            match visit {
                Visit::Leave(checkpoints) => self.restore(checkpoints),

                Visit::Enter(position) => {
                    pending.push(Visit::Leave(self.checkpoint()));
                    self.rewrite(position);

                    let children = tree.children(position).iter().rev();
                    pending.extend(children.map(|&child| Visit::Enter(child)));
                }
            }
        }
    }

    fn checkpoint(&self) -> [Checkpoint; 3] {
        [
            self.defs.checkpoint(),
            self.computations.checkpoint(),
            self.loads.checkpoint(),
        ]
    }

    fn restore(&mut self, [defs, computations, loads]: [Checkpoint; 3]) {
        self.defs.restore(defs);
        self.computations.restore(computations);
        self.loads.restore(loads);
    }

    fn rewrite(&mut self, position: usize) {
        let mut instruction = self.body[position].clone();
        let mut propagated = 0;

        instruction.operands_mut(|value| {
            let source = value
                .symbol()
                .and_then(|symbol| self.copy_source(symbol, position));

            if let Some(source) = source {
                trace!("{}: {} <- {}", position, value, source);

                *value = RValue::Symbol(source);
                propagated += 1;
            }
        });

        let redundant = match instruction {
            Instruction::Unary { dest, op, operand } => {
                self.reuse(position, Computation::Unary(op, operand), dest)
                    .map(|prior| (dest, prior))
            }

            Instruction::Binary { dest, op, lhs, rhs } => self
                .reuse(position, Computation::Binary(op, lhs, rhs), dest)
                .map(|prior| (dest, prior)),

            Instruction::Load { dest, array, index } => self
                .reuse_load(position, array, index, dest)
                .map(|prior| (dest, prior)),

            _ => None,
        };

        if let Some((dest, prior)) = redundant {
            trace!("{}: `{}` repeats {}", position, instruction.to_string().trim(), prior);

            instruction = Instruction::Assign {
                target: LValue {
                    symbol: dest,
                    index: None,
                },
                value: RValue::Symbol(prior),
            };

            self.rewrites += 1;
        }

        if let Some(symbol) = instruction.definition() {
            self.defs.insert(symbol, position);
        }

        self.rewrites += propagated;
        self.body[position] = instruction;
    }

    /// Origen de una copia `symbol = source` que aún es válida en `position`.
    fn copy_source(&self, symbol: Symbol, position: usize) -> Option<Symbol> {
        let &definition = self.defs.get(&symbol)?;

        let source = match &self.body[definition] {
            Instruction::Assign {
                target: LValue { index: None, .. },
                value: RValue::Symbol(source),
            } if *source != symbol => *source,

            _ => return None,
        };

        let watched = [symbol, source];
        let clean = self.unchanged(position, definition, |instruction| {
            self.writes_any(instruction, &watched)
        });

        clean.then(|| source)
    }

    /// Busca un cálculo idéntico previo cuyo resultado siga vigente.
    fn reuse(&mut self, position: usize, key: Computation, dest: Symbol) -> Option<Symbol> {
        let earlier = self
            .computations
            .get(&key)
            .or_else(|| key.swapped().and_then(|swapped| self.computations.get(&swapped)))
            .copied();

        if let Some(earlier) = earlier {
            let prior = self.body[earlier]
                .definition()
                .expect("recorded computation has no destination");

            let mut watched = key.operands();
            watched.push(prior);

            let clean = self.unchanged(position, earlier, |instruction| {
                self.writes_any(instruction, &watched)
            });

            if clean {
                return Some(prior);
            }
        }

        // `x = x + 1` invalida su propio cálculo
        if !key.operands().contains(&dest) {
            self.computations.insert(key, position);
        }

        None
    }

    fn reuse_load(&mut self, position: usize, array: Symbol, index: RValue, dest: Symbol) -> Option<Symbol> {
        let key = (array, index);

        if let Some(&earlier) = self.loads.get(&key) {
            let prior = self.body[earlier]
                .definition()
                .expect("recorded load has no destination");

            let watched: Vec<_> = index.symbol().into_iter().chain([prior]).collect();
            let clean = self.unchanged(position, earlier, |instruction| {
                self.writes_any(instruction, &watched) || clobbers(instruction, array)
            });

            if clean {
                return Some(prior);
            }
        }

        if index.symbol() != Some(dest) {
            self.loads.insert(key, position);
        }

        None
    }

    fn writes_any(&self, instruction: &Instruction, symbols: &[Symbol]) -> bool {
        let definition = instruction.definition();
        let is_call = matches!(instruction, Instruction::Call { .. });

        symbols.iter().any(|&symbol| {
            definition == Some(symbol) || (is_call && self.dataflow.slot(symbol).is_none())
        })
    }

    /// Determina si ningún camino de `to` a `from` atraviesa una
    /// instrucción para la cual `pollutes` es verdadero. Los extremos
    /// no se examinan, salvo que `from` se repita dentro de un ciclo.
    fn unchanged<F>(&self, from: usize, to: usize, pollutes: F) -> bool
    where
        F: Fn(&Instruction) -> bool,
    {
        let mut seen = vec![false; self.body.len()];
        let mut clean = true;
        let mut first = true;

        self.dataflow.walk_back(from, |position| {
            if std::mem::take(&mut first) {
                return false;
            } else if !clean || position == to || std::mem::replace(&mut seen[position], true) {
                return true;
            }

            clean = !pollutes(&self.body[position]);
            !clean
        });

        clean
    }
}

/// Indica si una instrucción puede modificar elementos de `array`.
///
/// Un parámetro puede apuntar a cualquier arreglo.
fn clobbers(instruction: &Instruction, array: Symbol) -> bool {
    match instruction {
        Instruction::Call { .. } => true,

        Instruction::Assign {
            target: LValue {
                symbol,
                index: Some(_),
            },
            ..
        } => *symbol == array || symbol.kind == SymbolKind::Param || array.kind == SymbolKind::Param,

        _ => false,
    }
}
