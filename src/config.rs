//! Compiler-wide options and the result type `compile()` returns.

use serde_json::Value as Json;

use crate::sql::dialect::{Dialect, OracleJson};

/// Options governing a single `compile()` call: which dialect to target,
/// how to qualify the source collection, and whether bind variables are
/// materialized as placeholders or inlined as literal SQL text.
pub struct Config {
    pub schema: Option<String>,
    pub base_alias: String,
    pub inline_literals: bool,
    pub dialect: Box<dyn Dialect>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            schema: None,
            base_alias: "base".to_string(),
            inline_literals: false,
            dialect: Box::new(OracleJson),
        }
    }
}

impl Config {
    pub fn new(dialect: Box<dyn Dialect>) -> Self {
        Config {
            dialect,
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_base_alias(mut self, alias: impl Into<String>) -> Self {
        self.base_alias = alias.into();
        self
    }

    pub fn with_inline_literals(mut self, inline: bool) -> Self {
        self.inline_literals = inline;
        self
    }

    /// The `<schema>.` prefix to apply to bare collection names, empty
    /// when no schema is configured.
    pub fn schema_prefix(&self) -> String {
        match &self.schema {
            Some(s) => format!("{s}."),
            None => String::new(),
        }
    }
}

/// The result of compiling a pipeline: the SQL text and its ordered bind
/// values, positionally matching the `:N` placeholders in `sql`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOutput {
    pub sql: String,
    pub binds: Vec<Json>,
}
