//! Typed expression AST. Each variant is immutable once constructed and
//! knows how to render itself (see `crate::sql::gen_expr`).

use indexmap::IndexMap;
use serde_json::Value as Json;

/// Ordered map, used everywhere the source encodes a sequence as an object
/// literal (projections, accumulators, facets, window outputs, switch
/// branches never actually need this one, but compound group keys and
/// `$addFields` do).
pub type OMap<V> = IndexMap<String, V>;

/// A dotted field-path access, e.g. `$a.b.c` becomes `["a", "b", "c"]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    pub path: Vec<String>,
    pub returning: ReturningType,
}

impl FieldPath {
    pub fn new(path: Vec<String>) -> Self {
        FieldPath {
            path,
            returning: ReturningType::Default,
        }
    }

    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
}

/// Forces a typed return from a `FieldPath` access (`RETURNING NUMBER`, or
/// an equivalent `CAST` wrapper).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningType {
    Default,
    Number,
    Varchar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
    Nor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Abs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFn {
    Concat,
    Substr,
    Split,
    RegexMatch,
    RegexFind,
    ReplaceOne,
    ReplaceAll,
    IndexOfCp,
    Trim,
    Ltrim,
    Rtrim,
    Length,
    ToUpper,
    ToLower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFn {
    Year,
    Month,
    DayOfMonth,
    Hour,
    Minute,
    Second,
    DayOfWeek,
    DayOfYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayFn {
    ArrayElemAt,
    Size,
    First,
    Last,
    ConcatArrays,
    Slice,
    Filter,
    Map,
    Reduce,
    IndexOfArray,
    Reverse,
    SortArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetFn {
    Union,
    Intersection,
    Difference,
    Equals,
    IsSubset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFn {
    MergeObjects,
    ObjectToArray,
    ArrayToObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertFn {
    ToInt,
    ToLong,
    ToDouble,
    ToDecimal,
    ToString,
    ToBool,
    ToDate,
    ToObjectId,
    Type,
    IsNumber,
    IsString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    First,
    Last,
    Push,
    AddToSet,
}

/// Ranking window functions, valid only as a `$setWindowFields` output op
/// (they take no argument and have no `$group`/`$bucket` equivalent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankFn {
    Rank,
    DenseRank,
    DocumentNumber,
}

/// A parsed expression, ready for compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `isNull` is implicit: a `Json::Null` literal renders as the bare
    /// `NULL` keyword rather than being bound.
    Literal(Json),
    FieldPath(FieldPath),
    Comparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        args: Vec<Expr>,
    },
    Arithmetic {
        op: ArithmeticOp,
        args: Vec<Expr>,
    },
    StringFn {
        op: StringFn,
        args: Vec<Expr>,
    },
    DateFn {
        op: DateFn,
        arg: Box<Expr>,
    },
    Conditional {
        if_: Box<Expr>,
        then: Box<Expr>,
        else_: Box<Expr>,
    },
    IfNull {
        expr: Box<Expr>,
        replacement: Box<Expr>,
    },
    Switch {
        branches: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
    },
    /// Array operators. `input` is the array-valued operand; `args` carries
    /// op-specific extras (index for `arrayElemAt`, skip/count for `slice`,
    /// a predicate expression for `filter`/`map` evaluated with the
    /// synthetic field path `$$this` standing for the current element).
    ArrayFn {
        op: ArrayFn,
        input: Box<Expr>,
        args: Vec<Expr>,
    },
    SetFn {
        op: SetFn,
        args: Vec<Expr>,
    },
    ObjectFn {
        op: ObjectFn,
        args: Vec<Expr>,
    },
    Convert {
        op: ConvertFn,
        input: Box<Expr>,
        on_error: Option<Box<Expr>>,
        on_null: Option<Box<Expr>>,
    },
    Accumulator {
        op: AccumulatorOp,
        arg: Option<Box<Expr>>,
    },
    RankFn(RankFn),
}

impl Expr {
    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expr::Literal(Json::Null))
    }

    /// The field path this expression resolves to, if it is a bare path
    /// access — used by the compiler to recognize e.g. `$sum: 1` vs
    /// `$sum: "$amount"`, and to special-case array ops on raw paths.
    pub fn as_field_path(&self) -> Option<&FieldPath> {
        match self {
            Expr::FieldPath(fp) => Some(fp),
            _ => None,
        }
    }
}
