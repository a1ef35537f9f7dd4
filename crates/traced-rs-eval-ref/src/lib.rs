pub mod cpu;

pub use cpu::RefEvaluator;
