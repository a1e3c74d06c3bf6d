//! SQL generation: dialect capability descriptors and expression/stage
//! codegen over the typed AST.

pub mod dialect;
pub mod gen_expr;
pub mod gen_stage;

pub use dialect::{Dialect, GenericJson, OracleJson};
