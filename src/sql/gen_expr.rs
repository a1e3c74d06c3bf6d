//! Renders a typed [`Expr`] into a SQL text fragment against a
//! [`RenderContext`]. Each function here handles one operator family;
//! dispatch is a single match in [`render_expr`].

use itertools::Itertools;
use serde_json::Value as Json;

use crate::ast::expr::*;
use crate::error::{Error, Result};
use crate::render::RenderContext;

pub(crate) const DATA_COLUMN: &str = "DATA";

/// True when `expr` renders as a bare SQL predicate (usable directly as a
/// `WHEN`/`WHERE` condition) rather than a value. Value positions
/// (computed projections, accumulator arguments) need these wrapped in a
/// `CASE WHEN ... THEN 1 ELSE 0 END` to get a genuine scalar.
pub fn is_predicate(expr: &Expr) -> bool {
    matches!(expr, Expr::Comparison { .. } | Expr::Logical { .. })
        || matches!(expr, Expr::StringFn { op: StringFn::RegexMatch, .. })
}

/// Renders `expr` for a value position, wrapping a bare predicate in a
/// `CASE` so the result is a genuine scalar rather than a boolean condition.
pub fn render_value_expr(expr: &Expr, ctx: &mut RenderContext) -> Result<String> {
    let sql = render_expr(expr, ctx)?;
    if is_predicate(expr) {
        Ok(format!("(CASE WHEN {sql} THEN 1 ELSE 0 END)"))
    } else {
        Ok(sql)
    }
}

pub fn render_expr(expr: &Expr, ctx: &mut RenderContext) -> Result<String> {
    match expr {
        Expr::Literal(Json::Null) => Ok("NULL".to_string()),
        Expr::Literal(v) => Ok(ctx.bind(v.clone())),
        Expr::FieldPath(fp) => render_field_path(fp, ctx),
        Expr::Comparison { op, left, right } => render_comparison(*op, left, right, ctx),
        Expr::Logical { op, args } => render_logical(*op, args, ctx),
        Expr::Arithmetic { op, args } => render_arithmetic(*op, args, ctx),
        Expr::StringFn { op, args } => render_string_fn(*op, args, ctx),
        Expr::DateFn { op, arg } => render_date_fn(*op, arg, ctx),
        Expr::Conditional { if_, then, else_ } => render_conditional(if_, then, else_, ctx),
        Expr::IfNull { expr, replacement } => {
            let e = render_expr(expr, ctx)?;
            let r = render_expr(replacement, ctx)?;
            Ok(format!("NVL({e}, {r})"))
        }
        Expr::Switch { branches, default } => render_switch(branches, default.as_deref(), ctx),
        Expr::ArrayFn { op, input, args } => render_array_fn(*op, input, args, ctx),
        Expr::SetFn { op, args } => render_set_fn(*op, args, ctx),
        Expr::ObjectFn { op, args } => render_object_fn(*op, args, ctx),
        Expr::Convert {
            op,
            input,
            on_error,
            on_null,
        } => render_convert(*op, input, on_error.as_deref(), on_null.as_deref(), ctx),
        Expr::Accumulator { op, arg } => render_accumulator(*op, arg.as_deref(), ctx),
        Expr::RankFn(_) => Err(Error::translation(
            "$rank/$denseRank/$documentNumber are only valid as a $setWindowFields output",
        )),
    }
}

pub(crate) fn base_data(ctx: &RenderContext) -> String {
    format!("{}.{}", ctx.base_alias(), ctx.identifier(DATA_COLUMN))
}

fn render_field_path(fp: &FieldPath, ctx: &mut RenderContext) -> Result<String> {
    if fp.path.is_empty() {
        return Ok(base_data(ctx));
    }
    if fp.path.len() == 1 && fp.path[0].starts_with('$') {
        return match fp.path[0].as_str() {
            "$NOW" => Ok("SYSTIMESTAMP".to_string()),
            "$CURRENT" | "$ROOT" => Ok(base_data(ctx)),
            other => Err(Error::translation(format!(
                "unsupported system variable `{other}`"
            ))),
        };
    }
    let json_path = format!("$.{}", fp.path.join("."));
    let bound = ctx.bind(Json::String(json_path));
    let doc = base_data(ctx);
    if ctx.dialect().supports_json_value_returning() {
        let returning = match fp.returning {
            ReturningType::Number => " RETURNING NUMBER",
            ReturningType::Varchar => " RETURNING VARCHAR2(4000)",
            ReturningType::Default => "",
        };
        Ok(format!("JSON_VALUE({doc}, {bound}{returning})"))
    } else {
        let base = format!("JSON_VALUE({doc}, {bound})");
        Ok(match fp.returning {
            ReturningType::Number => format!("TO_NUMBER({base})"),
            _ => base,
        })
    }
}

/// Renders `expr` as a document (not scalar) reference — `JSON_QUERY`
/// rather than `JSON_VALUE` for a field path, used where a full JSON
/// object or array is needed (`$mergeObjects` operands).
pub(crate) fn render_doc_expr(expr: &Expr, ctx: &mut RenderContext) -> Result<String> {
    if let Expr::FieldPath(fp) = expr {
        if fp.path.is_empty() {
            return Ok(base_data(ctx));
        }
        let bound = ctx.bind(Json::String(format!("$.{}", fp.path.join("."))));
        let doc = base_data(ctx);
        return Ok(format!("JSON_QUERY({doc}, {bound})"));
    }
    render_expr(expr, ctx)
}

fn array_path<'a>(op: &str, input: &'a Expr) -> Result<&'a FieldPath> {
    input
        .as_field_path()
        .ok_or_else(|| Error::translation(format!("{op} requires a field-path array operand")))
}

/// A `SELECT v FROM JSON_TABLE(...)` fragment enumerating the elements of
/// the array at `path`, for use inside set-combinator subqueries.
fn json_table_array(path: &FieldPath, ctx: &mut RenderContext) -> String {
    let json_path = format!("$.{}[*]", path.dotted());
    let bound = ctx.bind(Json::String(json_path));
    let doc = base_data(ctx);
    let alias = ctx.next_alias("jt");
    format!(
        "SELECT v FROM JSON_TABLE({doc}, {bound} COLUMNS (v VARCHAR2(4000) PATH '$')) {alias}"
    )
}

fn render_comparison(op: ComparisonOp, left: &Expr, right: &Expr, ctx: &mut RenderContext) -> Result<String> {
    if matches!(op, ComparisonOp::In | ComparisonOp::Nin) {
        let items = match right {
            Expr::Literal(Json::Array(arr)) => arr,
            _ => {
                return Err(Error::invalid_argument(
                    "$in/$nin requires a literal array on the right-hand side",
                ))
            }
        };
        if items.is_empty() {
            return Err(Error::translation("$in/$nin requires a non-empty array"));
        }
        let left_sql = render_expr(left, ctx)?;
        let list = items.iter().map(|v| ctx.bind(v.clone())).join(", ");
        let kw = if op == ComparisonOp::In { "IN" } else { "NOT IN" };
        return Ok(format!("({left_sql} {kw} ({list}))"));
    }
    if right.is_null_literal() && matches!(op, ComparisonOp::Eq | ComparisonOp::Ne) {
        let l = render_expr(left, ctx)?;
        return Ok(match op {
            ComparisonOp::Eq => format!("({l} IS NULL)"),
            ComparisonOp::Ne => format!("({l} IS NOT NULL)"),
            _ => unreachable!(),
        });
    }
    let l = render_expr(left, ctx)?;
    let r = render_expr(right, ctx)?;
    let sym = match op {
        ComparisonOp::Eq => "=",
        ComparisonOp::Ne => "<>",
        ComparisonOp::Gt => ">",
        ComparisonOp::Gte => ">=",
        ComparisonOp::Lt => "<",
        ComparisonOp::Lte => "<=",
        ComparisonOp::In | ComparisonOp::Nin => unreachable!(),
    };
    Ok(format!("({l} {sym} {r})"))
}

fn truthy(expr: &Expr, sql: String) -> String {
    if is_predicate(expr) {
        sql
    } else {
        format!("({sql} <> 0)")
    }
}

fn render_logical(op: LogicalOp, args: &[Expr], ctx: &mut RenderContext) -> Result<String> {
    match op {
        LogicalOp::Not => {
            let inner = render_expr(&args[0], ctx)?;
            Ok(format!("(NOT {})", truthy(&args[0], inner)))
        }
        LogicalOp::And | LogicalOp::Or | LogicalOp::Nor => {
            let joiner = match op {
                LogicalOp::And => " AND ",
                LogicalOp::Or | LogicalOp::Nor => " OR ",
                LogicalOp::Not => unreachable!(),
            };
            let mut parts = Vec::with_capacity(args.len());
            for a in args {
                let sql = render_expr(a, ctx)?;
                parts.push(truthy(a, sql));
            }
            let joined = parts.join(joiner);
            Ok(if op == LogicalOp::Nor {
                format!("(NOT ({joined}))")
            } else {
                format!("({joined})")
            })
        }
    }
}

fn render_arithmetic(op: ArithmeticOp, args: &[Expr], ctx: &mut RenderContext) -> Result<String> {
    let rendered = args
        .iter()
        .map(|a| render_expr(a, ctx))
        .collect::<Result<Vec<_>>>()?;
    Ok(match op {
        ArithmeticOp::Add => format!("({})", rendered.join(" + ")),
        ArithmeticOp::Mul => format!("({})", rendered.join(" * ")),
        ArithmeticOp::Sub => format!("({} - {})", rendered[0], rendered[1]),
        ArithmeticOp::Div => format!("({} / {})", rendered[0], rendered[1]),
        ArithmeticOp::Mod => format!("MOD({}, {})", rendered[0], rendered[1]),
        ArithmeticOp::Abs => format!("ABS({})", rendered[0]),
    })
}

fn render_string_fn(op: StringFn, args: &[Expr], ctx: &mut RenderContext) -> Result<String> {
    if op == StringFn::Split {
        return Err(Error::translation(
            "$split has no scalar-expression equivalent under this JSON dialect",
        ));
    }
    let rendered = args
        .iter()
        .map(|a| render_expr(a, ctx))
        .collect::<Result<Vec<_>>>()?;
    Ok(match op {
        StringFn::Concat => format!("({})", rendered.join(" || ")),
        StringFn::Substr => {
            let len = rendered.get(2).map(|l| format!(", {l}")).unwrap_or_default();
            format!("SUBSTR({}, ({}) + 1{len})", rendered[0], rendered[1])
        }
        StringFn::RegexMatch => format!("REGEXP_LIKE({}, {})", rendered[0], rendered[1]),
        StringFn::RegexFind => format!("REGEXP_SUBSTR({}, {})", rendered[0], rendered[1]),
        StringFn::ReplaceOne => format!(
            "REGEXP_REPLACE({}, {}, {}, 1, 1)",
            rendered[0], rendered[1], rendered[2]
        ),
        StringFn::ReplaceAll => format!("REGEXP_REPLACE({}, {}, {})", rendered[0], rendered[1], rendered[2]),
        StringFn::IndexOfCp => format!("(REGEXP_INSTR({}, {}) - 1)", rendered[0], rendered[1]),
        StringFn::Trim => match rendered.get(1) {
            Some(chars) => format!("TRIM({chars} FROM {})", rendered[0]),
            None => format!("TRIM({})", rendered[0]),
        },
        StringFn::Ltrim => match rendered.get(1) {
            Some(chars) => format!("LTRIM({}, {chars})", rendered[0]),
            None => format!("LTRIM({})", rendered[0]),
        },
        StringFn::Rtrim => match rendered.get(1) {
            Some(chars) => format!("RTRIM({}, {chars})", rendered[0]),
            None => format!("RTRIM({})", rendered[0]),
        },
        StringFn::Length => format!("LENGTH({})", rendered[0]),
        StringFn::ToUpper => format!("UPPER({})", rendered[0]),
        StringFn::ToLower => format!("LOWER({})", rendered[0]),
        StringFn::Split => unreachable!(),
    })
}

fn render_date_fn(op: DateFn, arg: &Expr, ctx: &mut RenderContext) -> Result<String> {
    let arg_sql = render_expr(arg, ctx)?;
    let ts = format!("TO_TIMESTAMP_TZ({arg_sql}, 'YYYY-MM-DD\"T\"HH24:MI:SS.FF3TZH:TZM')");
    Ok(match op {
        DateFn::Year => format!("EXTRACT(YEAR FROM {ts})"),
        DateFn::Month => format!("EXTRACT(MONTH FROM {ts})"),
        DateFn::DayOfMonth => format!("EXTRACT(DAY FROM {ts})"),
        DateFn::Hour => format!("EXTRACT(HOUR FROM {ts})"),
        DateFn::Minute => format!("EXTRACT(MINUTE FROM {ts})"),
        DateFn::Second => format!("EXTRACT(SECOND FROM {ts})"),
        DateFn::DayOfWeek => format!("TO_NUMBER(TO_CHAR({ts}, 'D'))"),
        DateFn::DayOfYear => format!("TO_NUMBER(TO_CHAR({ts}, 'DDD'))"),
    })
}

fn render_conditional(if_: &Expr, then: &Expr, else_: &Expr, ctx: &mut RenderContext) -> Result<String> {
    let cond_sql = render_expr(if_, ctx)?;
    let cond = truthy(if_, cond_sql);
    let then_sql = render_expr(then, ctx)?;
    let else_sql = render_expr(else_, ctx)?;
    Ok(format!("(CASE WHEN {cond} THEN {then_sql} ELSE {else_sql} END)"))
}

fn render_switch(branches: &[(Expr, Expr)], default: Option<&Expr>, ctx: &mut RenderContext) -> Result<String> {
    let mut sql = String::from("(CASE");
    for (case, then) in branches {
        let cond_sql = render_expr(case, ctx)?;
        let cond = truthy(case, cond_sql);
        let then_sql = render_expr(then, ctx)?;
        sql.push_str(&format!(" WHEN {cond} THEN {then_sql}"));
    }
    if let Some(default) = default {
        let default_sql = render_expr(default, ctx)?;
        sql.push_str(&format!(" ELSE {default_sql}"));
    }
    sql.push_str(" END)");
    Ok(sql)
}

fn render_array_fn(op: ArrayFn, input: &Expr, args: &[Expr], ctx: &mut RenderContext) -> Result<String> {
    match op {
        ArrayFn::Size => {
            let path = array_path("$size", input)?;
            let bound = ctx.bind(Json::String(format!("$.{}.size()", path.dotted())));
            let doc = base_data(ctx);
            Ok(format!("JSON_VALUE({doc}, {bound} RETURNING NUMBER)"))
        }
        ArrayFn::First => {
            let path = array_path("$first", input)?;
            let bound = ctx.bind(Json::String(format!("$.{}[0]", path.dotted())));
            let doc = base_data(ctx);
            Ok(format!("JSON_VALUE({doc}, {bound})"))
        }
        ArrayFn::Last => {
            let path = array_path("$last", input)?;
            let bound = ctx.bind(Json::String(format!("$.{}[last]", path.dotted())));
            let doc = base_data(ctx);
            Ok(format!("JSON_VALUE({doc}, {bound})"))
        }
        ArrayFn::ArrayElemAt => {
            let path = array_path("$arrayElemAt", input)?;
            let idx = match &args[0] {
                Expr::Literal(Json::Number(n)) if n.is_i64() => n.as_i64().unwrap(),
                _ => {
                    return Err(Error::translation(
                        "$arrayElemAt requires a literal integer index under this JSON dialect",
                    ))
                }
            };
            let bound = ctx.bind(Json::String(format!("$.{}[{idx}]", path.dotted())));
            let doc = base_data(ctx);
            Ok(format!("JSON_VALUE({doc}, {bound})"))
        }
        ArrayFn::ConcatArrays => {
            if !ctx.dialect().supports_json_collection_tables() {
                return Err(Error::translation(
                    "$concatArrays requires JSON_TABLE/JSON_ARRAYAGG support",
                ));
            }
            let mut paths = vec![array_path("$concatArrays", input)?.clone()];
            for a in args {
                paths.push(array_path("$concatArrays", a)?.clone());
            }
            let parts: Vec<String> = paths.iter().map(|p| json_table_array(p, ctx)).collect();
            Ok(format!(
                "(SELECT JSON_ARRAYAGG(v) FROM ({}))",
                parts.join(" UNION ALL ")
            ))
        }
        ArrayFn::Slice
        | ArrayFn::Filter
        | ArrayFn::Map
        | ArrayFn::Reduce
        | ArrayFn::IndexOfArray
        | ArrayFn::Reverse
        | ArrayFn::SortArray => Err(Error::translation(format!(
            "{op:?} requires row-level reconstruction not supported in scalar-expression context"
        ))),
    }
}

fn render_set_fn(op: SetFn, args: &[Expr], ctx: &mut RenderContext) -> Result<String> {
    if !ctx.dialect().supports_json_collection_tables() {
        return Err(Error::translation(format!(
            "{op:?} requires JSON_TABLE/JSON_ARRAYAGG support"
        )));
    }
    let paths = args
        .iter()
        .map(|a| array_path("set operator", a).cloned())
        .collect::<Result<Vec<_>>>()?;
    let parts: Vec<String> = paths.iter().map(|p| json_table_array(p, ctx)).collect();
    match op {
        SetFn::Union => Ok(format!(
            "(SELECT JSON_ARRAYAGG(v) FROM ({}))",
            parts.join(" UNION ")
        )),
        SetFn::Intersection => Ok(format!(
            "(SELECT JSON_ARRAYAGG(v) FROM ({}))",
            parts.join(" INTERSECT ")
        )),
        SetFn::Difference => {
            if parts.len() != 2 {
                return Err(Error::invalid_argument("$setDifference requires exactly 2 arguments"));
            }
            Ok(format!(
                "(SELECT JSON_ARRAYAGG(v) FROM ({} MINUS {}))",
                parts[0], parts[1]
            ))
        }
        SetFn::Equals => {
            if parts.len() != 2 {
                return Err(Error::invalid_argument("$setEquals requires exactly 2 arguments"));
            }
            Ok(format!(
                "(NOT EXISTS ({} MINUS {}) AND NOT EXISTS ({} MINUS {}))",
                parts[0], parts[1], parts[1], parts[0]
            ))
        }
        SetFn::IsSubset => {
            if parts.len() != 2 {
                return Err(Error::invalid_argument("$setIsSubset requires exactly 2 arguments"));
            }
            Ok(format!("NOT EXISTS ({} MINUS {})", parts[0], parts[1]))
        }
    }
}

fn render_object_fn(op: ObjectFn, args: &[Expr], ctx: &mut RenderContext) -> Result<String> {
    match op {
        ObjectFn::MergeObjects => {
            if !ctx.dialect().supports_json_mergepatch() {
                return Err(Error::translation(
                    "$mergeObjects requires JSON_MERGEPATCH support under this dialect",
                ));
            }
            let mut docs = args
                .iter()
                .map(|a| render_doc_expr(a, ctx))
                .collect::<Result<Vec<_>>>()?;
            let mut acc = docs.remove(0);
            for doc in docs {
                acc = format!("JSON_MERGEPATCH({acc}, {doc})");
            }
            Ok(acc)
        }
        ObjectFn::ObjectToArray | ObjectFn::ArrayToObject => Err(Error::translation(format!(
            "{op:?} requires row-level reconstruction not supported in scalar-expression context"
        ))),
    }
}

fn render_convert(
    op: ConvertFn,
    input: &Expr,
    on_error: Option<&Expr>,
    on_null: Option<&Expr>,
    ctx: &mut RenderContext,
) -> Result<String> {
    let input_sql = render_expr(input, ctx)?;
    let on_error_sql = on_error.map(|e| render_expr(e, ctx)).transpose()?;
    let base = match op {
        ConvertFn::ToInt | ConvertFn::ToLong | ConvertFn::ToDouble | ConvertFn::ToDecimal => {
            let oe = on_error_sql
                .as_ref()
                .map(|v| format!(" DEFAULT {v} ON CONVERSION ERROR"))
                .unwrap_or_default();
            format!("TO_NUMBER({input_sql}{oe})")
        }
        ConvertFn::ToDate => {
            let oe = on_error_sql
                .as_ref()
                .map(|v| format!(" DEFAULT {v} ON CONVERSION ERROR"))
                .unwrap_or_default();
            format!("TO_TIMESTAMP_TZ({input_sql}, 'YYYY-MM-DD\"T\"HH24:MI:SS.FF3TZH:TZM'{oe})")
        }
        ConvertFn::ToString | ConvertFn::ToObjectId => format!("TO_CHAR({input_sql})"),
        ConvertFn::ToBool => format!(
            "(CASE WHEN LOWER(TO_CHAR({input_sql})) IN ('true', '1') THEN 1 \
             WHEN LOWER(TO_CHAR({input_sql})) IN ('false', '0') THEN 0 ELSE NULL END)"
        ),
        ConvertFn::Type => {
            return Err(Error::translation(
                "$type is not representable under this JSON dialect",
            ))
        }
        ConvertFn::IsNumber => format!(
            "(CASE WHEN REGEXP_LIKE(TO_CHAR({input_sql}), '^-?[0-9]+(\\.[0-9]+)?$') THEN 1 ELSE 0 END)"
        ),
        ConvertFn::IsString => format!(
            "(CASE WHEN REGEXP_LIKE(TO_CHAR({input_sql}), '^-?[0-9]+(\\.[0-9]+)?$') THEN 0 ELSE 1 END)"
        ),
    };
    match on_null {
        Some(n) => {
            let n_sql = render_expr(n, ctx)?;
            Ok(format!("NVL({base}, {n_sql})"))
        }
        None => Ok(base),
    }
}

/// Renders a `$group`/`$bucket`/`$bucketAuto`/`$setWindowFields` output
/// accumulator. `$first`/`$last` without a known preceding sort resolve to
/// an arbitrary (but deterministic-within-SQL) row via `MIN`/`MAX`; the
/// compiler logs a warning when it cannot establish document order.
fn render_accumulator(op: AccumulatorOp, arg: Option<&Expr>, ctx: &mut RenderContext) -> Result<String> {
    if op == AccumulatorOp::Count {
        return Ok("COUNT(*)".to_string());
    }
    let arg = arg.ok_or_else(|| Error::invalid_argument("accumulator requires an argument"))?;
    let arg_sql = render_value_expr(arg, ctx)?;
    Ok(match op {
        AccumulatorOp::Sum => format!("SUM({arg_sql})"),
        AccumulatorOp::Avg => format!("AVG({arg_sql})"),
        AccumulatorOp::Min => format!("MIN({arg_sql})"),
        AccumulatorOp::Max => format!("MAX({arg_sql})"),
        // No ordering is threaded into a bare accumulator expression, so
        // these pick an arbitrary row within the group; the compiler logs
        // a warning when no preceding `$sort` makes the choice meaningful.
        AccumulatorOp::First => format!("MIN({arg_sql}) KEEP (DENSE_RANK FIRST ORDER BY NULL)"),
        AccumulatorOp::Last => format!("MAX({arg_sql}) KEEP (DENSE_RANK LAST ORDER BY NULL)"),
        AccumulatorOp::Push => format!("JSON_ARRAYAGG({arg_sql})"),
        AccumulatorOp::AddToSet => format!("JSON_ARRAYAGG(DISTINCT {arg_sql})"),
        AccumulatorOp::Count => unreachable!(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sql::OracleJson;

    fn ctx() -> RenderContext<'static> {
        RenderContext::new(&OracleJson, "base", "", false)
    }

    #[test]
    fn null_literal_renders_as_the_bare_keyword() {
        let mut c = ctx();
        assert_eq!(render_expr(&Expr::Literal(Json::Null), &mut c).unwrap(), "NULL");
    }

    #[test]
    fn non_null_literals_are_bound() {
        let mut c = ctx();
        assert_eq!(render_expr(&Expr::Literal(Json::from(42)), &mut c).unwrap(), ":1");
        assert_eq!(c.binds(), &[Json::from(42)]);
    }

    #[test]
    fn field_path_renders_as_a_json_value_lookup() {
        let mut c = ctx();
        let fp = Expr::FieldPath(FieldPath::new(vec!["amount".to_string()]));
        let sql = render_expr(&fp, &mut c).unwrap();
        assert!(sql.starts_with("JSON_VALUE(base."), "{sql}");
        assert_eq!(c.binds(), &[Json::String("$.amount".to_string())]);
    }

    #[test]
    fn empty_field_path_resolves_to_the_whole_document() {
        let mut c = ctx();
        let fp = Expr::FieldPath(FieldPath::new(vec![]));
        assert_eq!(render_expr(&fp, &mut c).unwrap(), base_data(&c));
    }

    #[test]
    fn comparison_renders_an_equality_predicate() {
        let mut c = ctx();
        let expr = Expr::Comparison {
            op: ComparisonOp::Eq,
            left: Box::new(Expr::FieldPath(FieldPath::new(vec!["status".to_string()]))),
            right: Box::new(Expr::Literal(Json::String("active".to_string()))),
        };
        assert!(is_predicate(&expr));
        let sql = render_expr(&expr, &mut c).unwrap();
        assert!(sql.contains('='), "{sql}");
    }

    #[test]
    fn eq_null_renders_as_is_null_not_equality() {
        let mut c = ctx();
        let expr = Expr::Comparison {
            op: ComparisonOp::Eq,
            left: Box::new(Expr::FieldPath(FieldPath::new(vec!["status".to_string()]))),
            right: Box::new(Expr::Literal(Json::Null)),
        };
        let sql = render_expr(&expr, &mut c).unwrap();
        assert!(sql.ends_with("IS NULL)"), "{sql}");
        assert!(!sql.contains('='), "{sql}");
    }

    #[test]
    fn ne_null_renders_as_is_not_null_not_inequality() {
        let mut c = ctx();
        let expr = Expr::Comparison {
            op: ComparisonOp::Ne,
            left: Box::new(Expr::FieldPath(FieldPath::new(vec!["_id".to_string()]))),
            right: Box::new(Expr::Literal(Json::Null)),
        };
        let sql = render_expr(&expr, &mut c).unwrap();
        assert!(sql.ends_with("IS NOT NULL)"), "{sql}");
        assert!(!sql.contains("<>"), "{sql}");
    }

    #[test]
    fn rank_fn_errors_outside_a_window_context() {
        let mut c = ctx();
        let err = render_expr(&Expr::RankFn(RankFn::Rank), &mut c).unwrap_err();
        assert!(matches!(err.reason(), crate::error::Reason::TranslationError(_)));
    }

    #[test]
    fn count_accumulator_with_no_arg_renders_count_star() {
        let mut c = ctx();
        let expr = Expr::Accumulator { op: AccumulatorOp::Count, arg: None };
        assert_eq!(render_expr(&expr, &mut c).unwrap(), "COUNT(*)");
    }
}
