//! Conjuntos y preferencias de registros físicos.

use bitflags::bitflags;

use crate::tigger::{Reg, REGISTER_COUNT};

bitflags! {
    /// Conjunto de registros físicos, un bit por número de registro.
    pub struct RegSet: u32 {
        const ZERO = 1 << 0;

        /// `s0`-`s11`, preservados por la función llamada.
        const CALLEE_SAVED = 0xfff << 1;

        /// `t0` y `t1`, reservados para cargas y cálculos intermedios.
        const SCRATCH = 0b11 << 13;

        /// `t2`-`t6`.
        const TEMPORARIES = 0b1_1111 << 15;

        /// `a0`-`a7`.
        const ARGUMENTS = 0xff << 20;

        const CALLER_SAVED = Self::SCRATCH.bits | Self::TEMPORARIES.bits | Self::ARGUMENTS.bits;
        const ALLOCATABLE = Self::CALLEE_SAVED.bits | Self::TEMPORARIES.bits | Self::ARGUMENTS.bits;
    }
}

/// Cantidad de colores disponibles para asignación.
pub const COLORS: usize = 25;

impl RegSet {
    pub fn single(reg: Reg) -> RegSet {
        RegSet::from_bits_truncate(1 << reg.index())
    }

    pub fn has(self, reg: Reg) -> bool {
        self.contains(RegSet::single(reg))
    }

    pub fn regs(self) -> impl Iterator<Item = Reg> {
        (0..REGISTER_COUNT)
            .map(Reg::new)
            .filter(move |&reg| self.has(reg))
    }
}

/// Orden en que se ocupan los registros sin preferencia.
///
/// Una función sin llamadas prefiere registros que no debe preservar.
/// Una función con llamadas prefiere registros que sobreviven a ellas.
pub fn palette(has_calls: bool) -> impl Iterator<Item = Reg> {
    let (first, second) = match has_calls {
        false => (RegSet::TEMPORARIES | RegSet::ARGUMENTS, RegSet::CALLEE_SAVED),
        true => (RegSet::CALLEE_SAVED, RegSet::TEMPORARIES | RegSet::ARGUMENTS),
    };

    first.regs().chain(second.regs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_partition_the_file() {
        let classes = [
            RegSet::ZERO,
            RegSet::CALLEE_SAVED,
            RegSet::SCRATCH,
            RegSet::TEMPORARIES,
            RegSet::ARGUMENTS,
        ];

        let total: u32 = classes.iter().map(|class| class.bits().count_ones()).sum();
        assert_eq!(total as usize, REGISTER_COUNT);
        assert_eq!(RegSet::all().bits().count_ones() as usize, REGISTER_COUNT);
        assert_eq!(RegSet::ALLOCATABLE.bits().count_ones() as usize, COLORS);

        assert!(RegSet::SCRATCH.has(Reg::T0));
        assert!(RegSet::ARGUMENTS.has(Reg::A0));
        assert!(!RegSet::ALLOCATABLE.has(Reg::T1));
    }

    #[test]
    fn palette_order() {
        let leaf: Vec<_> = palette(false).map(|reg| reg.to_string()).collect();
        assert_eq!(leaf.len(), COLORS);
        assert_eq!(leaf[0], "t2");
        assert_eq!(leaf[5], "a0");
        assert_eq!(leaf[13], "s0");

        let caller: Vec<_> = palette(true).map(|reg| reg.to_string()).collect();
        assert_eq!(caller[0], "s0");
        assert_eq!(caller[12], "t2");
    }
}
