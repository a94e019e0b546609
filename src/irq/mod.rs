//! Interrupt virtualization: the PIRQ<->VIRQ mapping table and the single
//! normative physical IRQ service routine.

pub mod isr;
pub mod pirq_virq_map;
