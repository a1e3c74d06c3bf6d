//! Typed stage AST and the top-level `Pipeline` container.

use super::expr::{Expr, OMap};

/// Ordered sequence of stages applied to a named collection. Immutable
/// after parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub collection: String,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(collection: impl Into<String>, stages: Vec<Stage>) -> Self {
        Pipeline {
            collection: collection.into(),
            stages,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionSpec {
    Include,
    Exclude,
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupId {
    Single(Expr),
    Compound(OMap<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupKind {
    Equality { local: String, foreign: String },
    Pipeline {
        r#let: OMap<Vec<String>>,
        sub_pipeline: Vec<Stage>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BucketAutoGranularity {
    R5,
    R10,
    R20,
    E6,
    E12,
    E24,
    E48,
    E96,
    E192,
    PowersOf2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowField {
    pub op: Expr,
    pub spec: Option<WindowSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUnit {
    Documents,
    Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowBound {
    Unbounded,
    Current,
    Offset(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub unit: WindowUnit,
    pub from: WindowBound,
    pub to: WindowBound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeWhenMatched {
    Replace,
    Keep,
    Merge,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeWhenNotMatched {
    Insert,
    Discard,
    Fail,
}

/// Every pipeline stage this system understands. Unknown operator names
/// never reach this type — the parser rejects them as `UnsupportedOperator`
/// before an AST node would be constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Expr),
    Project(OMap<ProjectionSpec>),
    Group {
        id: GroupId,
        accumulators: OMap<Expr>,
    },
    Sort(Vec<(Expr, SortDirection)>),
    Skip(u64),
    Limit(u64),
    Lookup {
        from: String,
        kind: LookupKind,
        r#as: String,
    },
    Unwind {
        path: Vec<String>,
        include_array_index: Option<String>,
        preserve_null_and_empty_arrays: bool,
    },
    AddFields(OMap<Expr>),
    UnionWith {
        from: String,
        sub_pipeline: Vec<Stage>,
    },
    Bucket {
        group_by: Expr,
        boundaries: Vec<serde_json::Value>,
        default: Option<serde_json::Value>,
        output: OMap<Expr>,
    },
    BucketAuto {
        group_by: Expr,
        n_buckets: u64,
        output: OMap<Expr>,
        granularity: Option<BucketAutoGranularity>,
    },
    Facet(OMap<Vec<Stage>>),
    SetWindowFields {
        partition_by: Option<Expr>,
        sort_by: Vec<(String, SortDirection)>,
        output: OMap<WindowField>,
    },
    GraphLookup {
        from: String,
        start_with: Expr,
        connect_from_field: String,
        connect_to_field: String,
        r#as: String,
        max_depth: Option<u64>,
        depth_field: Option<String>,
        restrict_search_with_match: Option<Expr>,
    },
    Count(String),
    Sample(u64),
    Redact(Expr),
    ReplaceRoot(Expr),
    Merge {
        target: String,
        on_fields: Vec<String>,
        when_matched: MergeWhenMatched,
        when_not_matched: MergeWhenNotMatched,
    },
}

impl Stage {
    /// Whether this stage is a pivot stage per the compiler's preflight
    /// classification (§3 glossary: "pivot stage").
    pub fn is_pivot(&self) -> bool {
        matches!(
            self,
            Stage::Group { .. } | Stage::Bucket { .. } | Stage::BucketAuto { .. } | Stage::Count(_)
        )
    }

    pub fn is_window(&self) -> bool {
        matches!(self, Stage::SetWindowFields { .. })
    }
}
