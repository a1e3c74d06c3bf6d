//! # aggsql
//!
//! Compiles MongoDB-style aggregation pipelines into a single SQL statement
//! for a JSON-aware relational database (Oracle-family: `JSON_VALUE`,
//! `JSON_TABLE`, `JSON_OBJECT`, `JSON_ARRAYAGG`, recursive CTEs).
//!
//! ```ascii
//!         pipeline JSON
//!              │
//!    (parse)   ▼
//!         Pipeline AST  (crate::ast)
//!              │
//!  (compile)   ▼
//!         RenderContext  (crate::render, crate::sql)
//!              │
//!              ▼
//!       sql string + bind list
//! ```
//!
//! [`translate`] is the one-call entry point most callers want:
//!
//! ```
//! use aggsql::translate;
//!
//! let pipeline = serde_json::json!([
//!     { "$match": { "status": "active" } },
//!     { "$group": { "_id": "$region", "total": { "$sum": "$amount" } } },
//! ]);
//! let out = translate("orders", &pipeline, &Default::default()).unwrap();
//! assert!(out.sql.starts_with("SELECT"));
//! ```

#![forbid(unsafe_code)]

pub mod ast;
pub mod compiler;
pub mod config;
pub mod error;
pub mod parser;
pub mod render;
pub mod sql;

pub use ast::Pipeline;
pub use config::{CompileOutput, Config};
pub use error::{Error, Reason, Result, WithErrorInfo};

/// Parses a pipeline document (a JSON array of stage documents) into a
/// typed [`Pipeline`] for `collection`.
pub fn parse_pipeline(collection: impl Into<String>, stages: &serde_json::Value) -> Result<Pipeline> {
    parser::parse_pipeline_value(collection, stages)
}

/// Compiles an already-parsed [`Pipeline`] into SQL.
pub fn compile(pipeline: &Pipeline, config: &Config) -> Result<CompileOutput> {
    compiler::compile(pipeline, config)
}

/// Parses and compiles a pipeline document in one call.
pub fn translate(collection: impl Into<String>, stages: &serde_json::Value, config: &Config) -> Result<CompileOutput> {
    let pipeline = parse_pipeline(collection, stages)?;
    compile(&pipeline, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_simple_match_and_group() {
        let stages = serde_json::json!([
            { "$match": { "status": "active" } },
            { "$group": { "_id": "$region", "total": { "$sum": "$amount" } } },
        ]);
        let out = translate("orders", &stages, &Config::default()).unwrap();
        assert!(out.sql.contains("GROUP BY"));
        assert!(out.sql.contains("JSON_VALUE"));
    }

    #[test]
    fn translate_rejects_unknown_stage() {
        let stages = serde_json::json!([{ "$bogus": {} }]);
        let err = translate("orders", &stages, &Config::default()).unwrap_err();
        assert!(matches!(err.reason(), Reason::UnsupportedOperator(_)));
    }
}
