//! `RenderContext`: the single piece of mutable state threaded through SQL
//! generation. Carries the active dialect, the inline-literal/bind-variable
//! mode, and the monotonic counters needed to keep bind numbering and
//! generated aliases stable across an entire statement.

use serde_json::Value as Json;

use crate::sql::dialect::Dialect;

/// Threaded through every `render_*` call in `crate::sql`. One instance per
/// compiled statement.
pub struct RenderContext<'d> {
    dialect: &'d dyn Dialect,
    inline_literals: bool,
    base_alias: String,
    /// `<schema>.` prefix applied to every bare collection/table name
    /// referenced during rendering, empty when no schema is configured.
    schema_prefix: String,
    binds: Vec<Json>,
    alias_counter: u32,
    /// Recursive-query CTEs hoisted out of nested stage rendering
    /// (`$graphLookup`), emitted as a leading `WITH` clause by the
    /// compiler once the whole pipeline has been rendered.
    ctes: Vec<(String, String)>,
}

impl<'d> RenderContext<'d> {
    pub fn new(
        dialect: &'d dyn Dialect,
        base_alias: impl Into<String>,
        schema_prefix: impl Into<String>,
        inline_literals: bool,
    ) -> Self {
        RenderContext {
            dialect,
            inline_literals,
            base_alias: base_alias.into(),
            schema_prefix: schema_prefix.into(),
            binds: Vec::new(),
            alias_counter: 0,
            ctes: Vec::new(),
        }
    }

    /// The `<schema>.` prefix to apply to bare collection names, empty
    /// when no schema is configured.
    pub fn schema_prefix(&self) -> &str {
        &self.schema_prefix
    }

    /// Registers a CTE to be hoisted into the statement's leading `WITH`
    /// clause.
    pub fn push_cte(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.ctes.push((name.into(), body.into()));
    }

    pub fn ctes(&self) -> &[(String, String)] {
        &self.ctes
    }

    pub fn dialect(&self) -> &'d dyn Dialect {
        self.dialect
    }

    /// The correlation name bound to the pipeline's source collection.
    pub fn base_alias(&self) -> &str {
        &self.base_alias
    }

    /// Rebinds the alias that `FieldPath`/`Literal` rendering resolves
    /// against, for entering a new nested derived table while keeping the
    /// same bind-variable sequence and alias counter for the statement.
    pub fn set_base_alias(&mut self, alias: impl Into<String>) {
        self.base_alias = alias.into();
    }

    /// Quotes an identifier only when it isn't already a bare SQL name
    /// (`^[A-Za-z_][A-Za-z0-9_]*$`), doubling embedded quote characters
    /// when it does need quoting.
    pub fn identifier(&self, name: &str) -> String {
        let bare = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if bare {
            name.to_string()
        } else {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }

    /// Emits a literal either as inline SQL text, or as a numbered bind
    /// placeholder, depending on the active mode. Bind numbers are 1-based
    /// and monotonically increasing for the lifetime of this context.
    pub fn bind(&mut self, value: Json) -> String {
        if self.inline_literals {
            return self.render_inline(&value);
        }
        self.binds.push(value);
        format!(":{}", self.binds.len())
    }

    fn render_inline(&self, value: &Json) -> String {
        match value {
            Json::Null => "NULL".to_string(),
            Json::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Json::Number(n) => n.to_string(),
            Json::String(s) => format!("'{}'", s.replace('\'', "''")),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }

    /// Generates a fresh, unique alias with the given prefix, for
    /// sub-selects, joins, and CTEs introduced during rendering.
    pub fn next_alias(&mut self, prefix: &str) -> String {
        self.alias_counter += 1;
        format!("{prefix}{}", self.alias_counter)
    }

    pub fn binds(&self) -> &[Json] {
        &self.binds
    }

    pub fn into_binds(self) -> Vec<Json> {
        self.binds
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sql::OracleJson;

    #[test]
    fn bind_numbers_are_1_based_and_monotonic() {
        let dialect = OracleJson;
        let mut ctx = RenderContext::new(&dialect, "base", "", false);
        assert_eq!(ctx.bind(Json::from(1)), ":1");
        assert_eq!(ctx.bind(Json::from("x")), ":2");
        assert_eq!(ctx.binds(), &[Json::from(1), Json::from("x")]);
    }

    #[test]
    fn inline_mode_renders_literals_in_place_and_keeps_binds_empty() {
        let dialect = OracleJson;
        let mut ctx = RenderContext::new(&dialect, "base", "", true);
        assert_eq!(ctx.bind(Json::String("it's".to_string())), "'it''s'");
        assert_eq!(ctx.bind(Json::Bool(true)), "true");
        assert!(ctx.binds().is_empty());
    }

    #[test]
    fn identifier_quotes_only_non_bare_names() {
        let dialect = OracleJson;
        let ctx = RenderContext::new(&dialect, "base", "", false);
        assert_eq!(ctx.identifier("total"), "total");
        assert_eq!(ctx.identifier("_id"), "_id");
        assert_eq!(ctx.identifier("order"), "order");
        assert_eq!(ctx.identifier("my col"), "\"my col\"");
        assert_eq!(ctx.identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn next_alias_is_unique_per_prefix_call() {
        let dialect = OracleJson;
        let mut ctx = RenderContext::new(&dialect, "base", "", false);
        assert_eq!(ctx.next_alias("s"), "s1");
        assert_eq!(ctx.next_alias("s"), "s2");
        assert_eq!(ctx.next_alias("t"), "t3");
    }
}
