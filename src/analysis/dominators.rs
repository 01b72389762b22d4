//! Árbol de dominadores por Lengauer-Tarjan.
//!
//! Se numeran las instrucciones en preorden de un recorrido en
//! profundidad desde la entrada, se calculan semidominadores en orden
//! inverso de numeración y finalmente se corrigen los dominadores
//! inmediatos en orden directo. Las consultas `eval` sobre el bosque
//! enlazado comprimen caminos de forma iterativa.

use super::Dataflow;

pub struct DominatorTree {
    idom: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
}

impl DominatorTree {
    /// Construye el árbol. Toda instrucción debe ser alcanzable
    /// desde la entrada.
    pub fn new(dataflow: &Dataflow) -> Self {
        let len = dataflow.len();
        let mut idom = vec![None; len];
        let mut children = vec![Vec::new(); len];

        if len == 0 {
            return DominatorTree { idom, children };
        }

        // Preorden iterativo, respetando el orden de sucesores
        let mut number = vec![usize::MAX; len];
        let mut vertex = Vec::with_capacity(len);
        let mut parent = vec![0; len];

        let mut stack = vec![(0, 0)];
        number[0] = 0;
        vertex.push(0);

        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            match dataflow.successors(node).get(*next) {
                Some(&successor) => {
                    *next += 1;
                    if number[successor] == usize::MAX {
                        number[successor] = vertex.len();
                        vertex.push(successor);
                        parent[successor] = node;
                        stack.push((successor, 0));
                    }
                }

                None => {
                    stack.pop();
                }
            }
        }

        if let Some(unreachable) = number.iter().position(|&n| n == usize::MAX) {
            panic!("instruction {} is unreachable from entry", unreachable);
        }

        // `semi` guarda números de preorden, no posiciones
        let mut semi = number.clone();
        let mut forest = Forest::new(len);
        let mut bucket = vec![Vec::new(); len];

        for &w in vertex.iter().skip(1).rev() {
            for &v in dataflow.predecessors(w) {
                let u = forest.eval(v, &semi);
                semi[w] = semi[w].min(semi[u]);
            }

            bucket[vertex[semi[w]]].push(w);
            forest.link(parent[w], w);

            for v in std::mem::take(&mut bucket[parent[w]]) {
                let u = forest.eval(v, &semi);
                idom[v] = Some(if semi[u] < semi[v] { u } else { parent[w] });
            }
        }

        for &w in vertex.iter().skip(1) {
            if let Some(dominator) = idom[w] {
                if dominator != vertex[semi[w]] {
                    idom[w] = idom[dominator];
                }
            }

            if let Some(dominator) = idom[w] {
                children[dominator].push(w);
            }
        }

        DominatorTree { idom, children }
    }

    /// Dominador inmediato; `None` solo para la entrada.
    pub fn idom(&self, position: usize) -> Option<usize> {
        self.idom[position]
    }

    pub fn children(&self, position: usize) -> &[usize] {
        &self.children[position]
    }

    /// Determina si `a` domina a `b`.
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        let mut current = Some(b);
        while let Some(position) = current {
            if position == a {
                return true;
            }

            current = self.idom[position];
        }

        false
    }
}

/// Bosque de enlace y evaluación con compresión de caminos.
struct Forest {
    ancestor: Vec<Option<usize>>,
    label: Vec<usize>,
}

impl Forest {
    fn new(len: usize) -> Self {
        Forest {
            ancestor: vec![None; len],
            label: (0..len).collect(),
        }
    }

    fn link(&mut self, parent: usize, child: usize) {
        self.ancestor[child] = Some(parent);
    }

    /// Nodo de semidominador mínimo en el camino hacia la raíz del árbol de `v`.
    fn eval(&mut self, v: usize, semi: &[usize]) -> usize {
        if self.ancestor[v].is_none() {
            return v;
        }

        self.compress(v, semi);
        self.label[v]
    }

    fn compress(&mut self, v: usize, semi: &[usize]) {
        let mut path = Vec::new();

        let mut node = v;
        while let Some(ancestor) = self.ancestor[node] {
            if self.ancestor[ancestor].is_none() {
                break;
            }

            path.push(node);
            node = ancestor;
        }

        // Los nodos más cercanos a la raíz se resuelven primero
        for &node in path.iter().rev() {
            if let Some(ancestor) = self.ancestor[node] {
                if semi[self.label[ancestor]] < semi[self.label[node]] {
                    self.label[node] = self.label[ancestor];
                }

                self.ancestor[node] = self.ancestor[ancestor];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Instruction, LValue, Label, RValue, RelOp, Symbol};

    /// Generador congruencial, suficiente para variar grafos de prueba.
    struct Rng(u64);

    impl Rng {
        fn below(&mut self, n: u64) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);

            (self.0 >> 33) % n
        }
    }

    fn random_function(rng: &mut Rng) -> Function {
        let len = 2 + rng.below(11) as usize;
        let labels = 1 + rng.below(4) as u32;

        let mut body: Vec<Instruction> = (0..len)
            .map(|_| Instruction::Assign {
                target: LValue {
                    symbol: Symbol::temp(0),
                    index: None,
                },
                value: RValue::Const(0),
            })
            .collect();

        let mut free: Vec<usize> = (1..len).collect();
        let mut defined = Vec::new();
        for label in 0..labels {
            if free.is_empty() {
                break;
            }

            let position = free.remove(rng.below(free.len() as u64) as usize);
            body[position] = Instruction::SetLabel(Label(label));
            defined.push(Label(label));
        }

        for position in free {
            let target = defined[rng.below(defined.len() as u64) as usize];
            body[position] = match rng.below(3) {
                0 => Instruction::Jump(target),
                1 => Instruction::Branch {
                    lhs: RValue::Symbol(Symbol::temp(0)),
                    rel: RelOp::Ne,
                    rhs: RValue::Const(0),
                    target,
                },
                _ => continue,
            };
        }

        Function {
            name: String::from("random"),
            parameters: 0,
            decls: Vec::new(),
            body,
        }
    }

    /// `d` domina a `v` si `v` deja de ser alcanzable al retirar `d`.
    fn brute_force_dominates(dataflow: &Dataflow, d: usize, v: usize) -> bool {
        if d == 0 || d == v {
            return true;
        }

        let mut seen = vec![false; dataflow.len()];
        let mut pending = vec![0];
        seen[0] = true;

        while let Some(node) = pending.pop() {
            if node == v {
                return false;
            }

            for &next in dataflow.successors(node) {
                if next != d && !seen[next] {
                    seen[next] = true;
                    pending.push(next);
                }
            }
        }

        true
    }

    #[test]
    fn matches_exhaustive_dominance() {
        let mut rng = Rng(0x5eed);
        let mut checked = 0;

        for _ in 0..2000 {
            let function = random_function(&mut rng);
            let dataflow = Dataflow::new(&function);
            if dataflow.reachable().contains(&false) {
                continue;
            }

            let tree = dataflow.dominator_tree();
            assert_eq!(tree.idom(0), None);

            for v in 0..dataflow.len() {
                for d in 0..dataflow.len() {
                    assert_eq!(
                        tree.dominates(d, v),
                        brute_force_dominates(&dataflow, d, v),
                        "d = {}, v = {}, body = {:?}",
                        d,
                        v,
                        function.body
                    );
                }
            }

            for v in 1..dataflow.len() {
                let idom = tree.idom(v).expect("missing idom");
                assert!(tree.children(idom).contains(&v));
            }

            checked += 1;
        }

        assert!(checked > 100);
    }

    #[test]
    #[should_panic(expected = "unreachable")]
    fn unreachable_code_is_rejected() {
        let function = Function {
            name: String::from("dead"),
            parameters: 0,
            decls: Vec::new(),
            body: vec![
                Instruction::Jump(Label(0)),
                Instruction::Return(None),
                Instruction::SetLabel(Label(0)),
                Instruction::Return(None),
            ],
        };

        Dataflow::new(&function).dominator_tree();
    }
}
