//! # Instruction Engine
//!
//! Programs are graphs: statements link to an instruction and an argument
//! cluster, code blocks are clusters of statements. The `Processor` walks
//! them with an explicit frame stack, creating temporaries it releases
//! when finished.

pub mod builder;
pub mod coerce;
pub mod engine;
pub mod instruction;
mod ops;
pub mod registry;
pub mod stack;

pub use builder::ProgramBuilder;
pub use engine::{ExecutionResult, Processor};
pub use instruction::{
    Arithmetic, Arity, Comparison, Count, FastEval, InstructionClass, InstructionKind, TryAsBool,
    TryAsDouble, TryAsInt,
};
pub use registry::{PredefinedEntry, instruction_for, instruction_id, predefined_by_name};
pub use stack::StackStats;
