pub mod programs;
pub mod runtime;
