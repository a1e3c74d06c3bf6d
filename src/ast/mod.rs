//! The Pipeline/Stage/Expression AST. Tagged variants replace the class
//! hierarchy the source models stages and expressions with — each becomes
//! a sum type and render is pattern-matched rather than double-dispatched.

pub mod expr;
pub mod stage;

pub use expr::{
    AccumulatorOp, ArithmeticOp, ArrayFn, ComparisonOp, ConvertFn, DateFn, Expr, FieldPath,
    LogicalOp, OMap, ObjectFn, RankFn, ReturningType, SetFn, StringFn,
};
pub use stage::{
    BucketAutoGranularity, GroupId, LookupKind, MergeWhenMatched, MergeWhenNotMatched, Pipeline,
    ProjectionSpec, SortDirection, Stage, WindowBound, WindowField, WindowSpec, WindowUnit,
};
