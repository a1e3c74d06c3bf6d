//! Recursive-descent parser turning a JSON pipeline document into the
//! typed [`Pipeline`](crate::ast::Pipeline) AST. Two grammars share this
//! module: aggregation expressions (`expr`) and pipeline stages (`stage`).

pub mod expr;
pub mod stage;

use serde_json::Value as Json;

use crate::ast::Pipeline;
use crate::error::{Error, Result, WithErrorInfo};

/// Parses a bare array of stage documents into a [`Pipeline`] against the
/// given collection name.
pub fn parse_pipeline(collection: impl Into<String>, stages: &[Json]) -> Result<Pipeline> {
    let mut parsed = Vec::with_capacity(stages.len());
    for (i, doc) in stages.iter().enumerate() {
        parsed.push(stage::parse_stage(doc).with_context(format!("stage[{i}]"))?);
    }
    Ok(Pipeline::new(collection, parsed))
}

/// Parses a pipeline from a raw JSON array value (the common on-disk shape).
pub fn parse_pipeline_value(collection: impl Into<String>, value: &Json) -> Result<Pipeline> {
    let arr = value
        .as_array()
        .ok_or_else(|| Error::invalid_argument("a pipeline must be a JSON array of stage documents"))?;
    parse_pipeline(collection, arr)
}
