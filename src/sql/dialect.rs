//! Feature map for SQL dialects.
//!
//! The target surface is a family of JSON-aware relational databases that
//! mostly agree on SQL/JSON syntax (`JSON_VALUE`, `JSON_TABLE`,
//! `JSON_ARRAYAGG`) but differ on a handful of capabilities. A `Dialect`
//! is a capability descriptor, not a SQL string template: codegen asks it
//! yes/no questions and renders accordingly, the same way PRQL's
//! `DialectHandler` trait lets `gen_expr`/`gen_query` stay dialect-generic
//! except at specific decision points.

/// Capability flags for a JSON-aware SQL dialect. Default methods describe
/// the most capable member of the family (Oracle); narrower dialects
/// override individual flags.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// `JSON_VALUE(doc, path RETURNING <type>)` — false means the bare
    /// textual form must be cast with an explicit `TO_NUMBER`/`TO_CHAR`
    /// wrapper instead of a `RETURNING` clause.
    fn supports_json_value_returning(&self) -> bool {
        true
    }

    /// `JSON_TABLE`/`JSON_ARRAYAGG` for array- and set-valued expressions.
    fn supports_json_collection_tables(&self) -> bool {
        true
    }

    /// `JSON_MERGEPATCH(a, b)` for `$mergeObjects`.
    fn supports_json_mergepatch(&self) -> bool {
        true
    }

    /// Whether `FETCH FIRST n ROWS ONLY` is available, vs. falling back to
    /// `ROWNUM`-style limiting.
    fn supports_fetch_first(&self) -> bool {
        true
    }
}

/// The full-featured member of the family: Oracle 19c+ SQL/JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleJson;

impl Dialect for OracleJson {
    fn name(&self) -> &'static str {
        "oracle_json"
    }
}

/// A conservative member of the family lacking `JSON_MERGEPATCH`, standing
/// in for older JSON-aware engines in this family that only added SQL/JSON
/// support incrementally.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericJson;

impl Dialect for GenericJson {
    fn name(&self) -> &'static str {
        "generic_json"
    }

    fn supports_json_mergepatch(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn oracle_json_supports_everything() {
        let d = OracleJson;
        assert!(d.supports_json_value_returning());
        assert!(d.supports_json_collection_tables());
        assert!(d.supports_json_mergepatch());
        assert!(d.supports_fetch_first());
        assert_eq!(d.name(), "oracle_json");
    }

    #[test]
    fn generic_json_only_drops_mergepatch() {
        let d = GenericJson;
        assert!(d.supports_json_value_returning());
        assert!(d.supports_json_collection_tables());
        assert!(!d.supports_json_mergepatch());
        assert!(d.supports_fetch_first());
        assert_eq!(d.name(), "generic_json");
    }
}
