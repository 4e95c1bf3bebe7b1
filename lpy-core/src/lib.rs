//! Core of the lpy toolchain.
//!
//! The pipeline is:
//!
//!   source text
//!     -> lexer / parser     (syntax tree)
//!     -> visit              (numeric literal observations)
//!     -> transform/rewrite  (timestamped print calls, implicit returns)
//!     -> locations          (every node located)
//!     -> codegen_wasm       (wasm-encoder)
//!     -> runtime            (wasmi)
//!
//! Front ends such as the CLI should drive [`compiler::Pipeline`] rather
//! than calling the stages one by one.

// ---------------------------------------------------------------------
// Error handling and locations
// ---------------------------------------------------------------------

pub mod error;
pub mod span;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod sources;

// ---------------------------------------------------------------------
// Tree traversal and rewriting
// ---------------------------------------------------------------------

pub mod locations;
pub mod rewrite;
pub mod transform;
pub mod unparse;
pub mod visit;

// ---------------------------------------------------------------------
// Back-end: code generation, execution and orchestration
// ---------------------------------------------------------------------

pub mod builtins;
pub mod codegen_wasm;
pub mod compiler;
pub mod runtime;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{
    Backend, CompilationArtifact, Observation, Observed, Pipeline, PipelineOptions, WasmBackend,
    compile_wasm,
};
pub use error::CoreError;
pub use rewrite::TimestampPolicy;
pub use runtime::{Environment, Output};
