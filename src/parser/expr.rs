//! Aggregation-expression grammar: `{"$op": <args>}` documents, field-path
//! strings, and literals. Shared across every stage that embeds
//! expressions ($project, $group, $addFields, $bucket output, …).

use std::collections::HashMap;
use std::sync::OnceLock;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::ast::expr::*;
use crate::error::{Error, Result};

type ExprParseFn = fn(&str, &Json) -> Result<Expr>;

/// Registry mapping operator name to the sub-parser responsible for that
/// operator family. Built once; repeated calls to [`parse_expr`] in the
/// same process reuse it.
fn registry() -> &'static HashMap<&'static str, ExprParseFn> {
    static REGISTRY: OnceLock<HashMap<&'static str, ExprParseFn>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: HashMap<&'static str, ExprParseFn> = HashMap::new();
        for name in ["$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin"] {
            m.insert(name, parse_comparison);
        }
        for name in ["$and", "$or", "$not", "$nor"] {
            m.insert(name, parse_logical);
        }
        for name in ["$add", "$subtract", "$multiply", "$divide", "$mod", "$abs"] {
            m.insert(name, parse_arithmetic);
        }
        for name in [
            "$concat",
            "$substr",
            "$substrCP",
            "$split",
            "$regexMatch",
            "$regexFind",
            "$replaceOne",
            "$replaceAll",
            "$indexOfCP",
            "$trim",
            "$ltrim",
            "$rtrim",
            "$strLenCP",
            "$toUpper",
            "$toLower",
        ] {
            m.insert(name, parse_string_fn);
        }
        for name in [
            "$year",
            "$month",
            "$dayOfMonth",
            "$hour",
            "$minute",
            "$second",
            "$dayOfWeek",
            "$dayOfYear",
        ] {
            m.insert(name, parse_date_fn);
        }
        m.insert("$cond", parse_cond);
        m.insert("$ifNull", parse_ifnull);
        m.insert("$switch", parse_switch);
        for name in [
            "$arrayElemAt",
            "$size",
            "$first",
            "$last",
            "$concatArrays",
            "$slice",
            "$filter",
            "$map",
            "$reduce",
            "$indexOfArray",
            "$reverseArray",
            "$sortArray",
        ] {
            m.insert(name, parse_array_fn);
        }
        for name in [
            "$setUnion",
            "$setIntersection",
            "$setDifference",
            "$setEquals",
            "$setIsSubset",
        ] {
            m.insert(name, parse_set_fn);
        }
        for name in ["$mergeObjects", "$objectToArray", "$arrayToObject"] {
            m.insert(name, parse_object_fn);
        }
        for name in [
            "$toInt",
            "$toLong",
            "$toDouble",
            "$toDecimal",
            "$toString",
            "$toBool",
            "$toDate",
            "$toObjectId",
            "$type",
            "$isNumber",
            "$isString",
            "$convert",
        ] {
            m.insert(name, parse_convert);
        }
        for name in [
            "$sum", "$avg", "$min", "$max", "$count", "$push", "$addToSet",
        ] {
            m.insert(name, parse_accumulator);
        }
        m
    })
}

/// Parses a value in aggregation-expression position: a field-path string,
/// a literal scalar/array/object, or a single-key operator document.
pub fn parse_expr(value: &Json) -> Result<Expr> {
    match value {
        Json::String(s) => Ok(parse_string_literal_or_path(s)),
        Json::Object(map) => parse_expr_object(map),
        Json::Array(_) | Json::Number(_) | Json::Bool(_) | Json::Null => {
            Ok(Expr::Literal(value.clone()))
        }
    }
}

fn parse_string_literal_or_path(s: &str) -> Expr {
    if let Some(rest) = s.strip_prefix("$literal:") {
        return Expr::Literal(Json::String(rest.to_string()));
    }
    if let Some(rest) = s.strip_prefix("$$") {
        if rest == "ROOT" {
            return Expr::FieldPath(FieldPath::new(vec![]));
        }
        // Other system variables ($$NOW, $$CURRENT, …) are surfaced as an
        // opaque single-component path prefixed with `$` so downstream
        // codegen can recognize and special-case them.
        return Expr::FieldPath(FieldPath::new(vec![format!("${rest}")]));
    }
    if let Some(rest) = s.strip_prefix('$') {
        let path: Vec<String> = rest.split('.').map(|p| p.to_string()).collect();
        return Expr::FieldPath(FieldPath::new(path));
    }
    Expr::Literal(Json::String(s.to_string()))
}

fn single_operator_key(map: &IndexMap<String, Json>) -> Option<(&str, &Json)> {
    if map.len() != 1 {
        return None;
    }
    let (k, v) = map.iter().next().unwrap();
    k.starts_with('$').then_some((k.as_str(), v))
}

fn parse_expr_object(map: &serde_json::Map<String, Json>) -> Result<Expr> {
    // serde_json::Map preserves insertion order when the `preserve_order`
    // feature is enabled.
    let as_indexmap: IndexMap<String, Json> =
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    if let Some((op, arg)) = single_operator_key(&as_indexmap) {
        let handler = registry()
            .get(op)
            .ok_or_else(|| Error::unsupported_operator(op))?;
        return handler(op, arg);
    }

    let dollar_keys = as_indexmap.keys().filter(|k| k.starts_with('$')).count();
    if dollar_keys > 0 {
        return Err(Error::invalid_argument(format!(
            "expression document must have exactly one operator key, found {dollar_keys} alongside other keys"
        )));
    }

    // No operator key at all: a literal document (e.g. `$addFields` value
    // that nests a plain object).
    Ok(Expr::Literal(Json::Object(map.clone())))
}

fn want_array<'a>(op: &str, value: &'a Json) -> Result<&'a Vec<Json>> {
    value
        .as_array()
        .ok_or_else(|| Error::invalid_argument(format!("{op} requires an array argument")))
}

fn parse_comparison(op: &str, value: &Json) -> Result<Expr> {
    let cmp = match op {
        "$eq" => ComparisonOp::Eq,
        "$ne" => ComparisonOp::Ne,
        "$gt" => ComparisonOp::Gt,
        "$gte" => ComparisonOp::Gte,
        "$lt" => ComparisonOp::Lt,
        "$lte" => ComparisonOp::Lte,
        "$in" => ComparisonOp::In,
        "$nin" => ComparisonOp::Nin,
        _ => unreachable!(),
    };
    let arr = want_array(op, value)?;
    if arr.len() != 2 {
        return Err(Error::invalid_argument(format!(
            "{op} requires exactly 2 arguments, found {}",
            arr.len()
        )));
    }
    Ok(Expr::Comparison {
        op: cmp,
        left: Box::new(parse_expr(&arr[0])?),
        right: Box::new(parse_expr(&arr[1])?),
    })
}

fn parse_logical(op: &str, value: &Json) -> Result<Expr> {
    let lop = match op {
        "$and" => LogicalOp::And,
        "$or" => LogicalOp::Or,
        "$not" => LogicalOp::Not,
        "$nor" => LogicalOp::Nor,
        _ => unreachable!(),
    };
    let arr = want_array(op, value)?;
    if arr.is_empty() {
        return Err(Error::empty_input(format!("{op} requires a non-empty array")));
    }
    if lop == LogicalOp::Not && arr.len() != 1 {
        return Err(Error::invalid_argument("$not requires exactly 1 argument"));
    }
    let args = arr.iter().map(parse_expr).collect::<Result<Vec<_>>>()?;
    Ok(Expr::Logical { op: lop, args })
}

fn parse_arithmetic(op: &str, value: &Json) -> Result<Expr> {
    let aop = match op {
        "$add" => ArithmeticOp::Add,
        "$subtract" => ArithmeticOp::Sub,
        "$multiply" => ArithmeticOp::Mul,
        "$divide" => ArithmeticOp::Div,
        "$mod" => ArithmeticOp::Mod,
        "$abs" => ArithmeticOp::Abs,
        _ => unreachable!(),
    };
    let args = match (aop, value) {
        (ArithmeticOp::Abs, _) => vec![parse_expr(value)?],
        (_, Json::Array(arr)) => arr.iter().map(parse_expr).collect::<Result<Vec<_>>>()?,
        _ => return Err(Error::invalid_argument(format!("{op} requires an array argument"))),
    };
    let args = force_numeric(args);
    match aop {
        ArithmeticOp::Sub | ArithmeticOp::Div | ArithmeticOp::Mod if args.len() != 2 => {
            return Err(Error::invalid_argument(format!(
                "{op} requires exactly 2 arguments"
            )))
        }
        ArithmeticOp::Add | ArithmeticOp::Mul if args.is_empty() => {
            return Err(Error::empty_input(format!("{op} requires at least 1 argument")))
        }
        _ => {}
    }
    Ok(Expr::Arithmetic { op: aop, args })
}

/// Marks bare field-path arguments as requiring a numeric `RETURNING`,
/// since every arithmetic operand must be a number.
fn force_numeric(args: Vec<Expr>) -> Vec<Expr> {
    args.into_iter()
        .map(|mut a| {
            if let Expr::FieldPath(fp) = &mut a {
                fp.returning = ReturningType::Number;
            }
            a
        })
        .collect()
}

/// Marks bare field-path arguments as requiring a varchar `RETURNING`,
/// since every string-function operand must be text.
fn force_varchar(args: Vec<Expr>) -> Vec<Expr> {
    args.into_iter()
        .map(|mut a| {
            if let Expr::FieldPath(fp) = &mut a {
                fp.returning = ReturningType::Varchar;
            }
            a
        })
        .collect()
}

fn doc_field<'a>(value: &'a Json, field: &str) -> Option<&'a Json> {
    value.as_object().and_then(|o| o.get(field))
}

fn parse_string_fn(op: &str, value: &Json) -> Result<Expr> {
    let sf = match op {
        "$concat" => StringFn::Concat,
        "$substr" | "$substrCP" => StringFn::Substr,
        "$split" => StringFn::Split,
        "$regexMatch" => StringFn::RegexMatch,
        "$regexFind" => StringFn::RegexFind,
        "$replaceOne" => StringFn::ReplaceOne,
        "$replaceAll" => StringFn::ReplaceAll,
        "$indexOfCP" => StringFn::IndexOfCp,
        "$trim" => StringFn::Trim,
        "$ltrim" => StringFn::Ltrim,
        "$rtrim" => StringFn::Rtrim,
        "$strLenCP" => StringFn::Length,
        "$toUpper" => StringFn::ToUpper,
        "$toLower" => StringFn::ToLower,
        _ => unreachable!(),
    };
    let args = match sf {
        StringFn::Concat | StringFn::Split => force_varchar(
            want_array(op, value)?
                .iter()
                .map(parse_expr)
                .collect::<Result<Vec<_>>>()?,
        ),
        StringFn::Substr | StringFn::IndexOfCp => {
            let mut args = want_array(op, value)?
                .iter()
                .map(parse_expr)
                .collect::<Result<Vec<_>>>()?;
            if let Some(Expr::FieldPath(fp)) = args.first_mut() {
                fp.returning = ReturningType::Varchar;
            }
            args
        }
        StringFn::RegexMatch | StringFn::RegexFind => {
            let input = doc_field(value, "input")
                .ok_or_else(|| Error::invalid_argument(format!("{op} requires an `input` field")))?;
            let regex = doc_field(value, "regex")
                .ok_or_else(|| Error::invalid_argument(format!("{op} requires a `regex` field")))?;
            force_varchar(vec![parse_expr(input)?, parse_expr(regex)?])
        }
        StringFn::ReplaceOne | StringFn::ReplaceAll => {
            let input = doc_field(value, "input")
                .ok_or_else(|| Error::invalid_argument(format!("{op} requires an `input` field")))?;
            let find = doc_field(value, "find")
                .ok_or_else(|| Error::invalid_argument(format!("{op} requires a `find` field")))?;
            let replacement = doc_field(value, "replacement").ok_or_else(|| {
                Error::invalid_argument(format!("{op} requires a `replacement` field"))
            })?;
            force_varchar(vec![
                parse_expr(input)?,
                parse_expr(find)?,
                parse_expr(replacement)?,
            ])
        }
        StringFn::Trim | StringFn::Ltrim | StringFn::Rtrim => {
            let input = doc_field(value, "input")
                .ok_or_else(|| Error::invalid_argument(format!("{op} requires an `input` field")))?;
            let mut args = vec![parse_expr(input)?];
            if let Some(chars) = doc_field(value, "chars") {
                args.push(parse_expr(chars)?);
            }
            force_varchar(args)
        }
        StringFn::Length | StringFn::ToUpper | StringFn::ToLower => {
            force_varchar(vec![parse_expr(value)?])
        }
    };
    Ok(Expr::StringFn { op: sf, args })
}

fn parse_date_fn(op: &str, value: &Json) -> Result<Expr> {
    let df = match op {
        "$year" => DateFn::Year,
        "$month" => DateFn::Month,
        "$dayOfMonth" => DateFn::DayOfMonth,
        "$hour" => DateFn::Hour,
        "$minute" => DateFn::Minute,
        "$second" => DateFn::Second,
        "$dayOfWeek" => DateFn::DayOfWeek,
        "$dayOfYear" => DateFn::DayOfYear,
        _ => unreachable!(),
    };
    let date_expr = doc_field(value, "date").unwrap_or(value);
    Ok(Expr::DateFn {
        op: df,
        arg: Box::new(parse_expr(date_expr)?),
    })
}

fn parse_cond(_op: &str, value: &Json) -> Result<Expr> {
    let (if_, then, else_) = if let Json::Array(arr) = value {
        if arr.len() != 3 {
            return Err(Error::invalid_argument(format!(
                "$cond array requires exactly 3 elements, found {}",
                arr.len()
            )));
        }
        (&arr[0], &arr[1], &arr[2])
    } else {
        let if_ = doc_field(value, "if")
            .ok_or_else(|| Error::invalid_argument("$cond requires an `if` field"))?;
        let then = doc_field(value, "then")
            .ok_or_else(|| Error::invalid_argument("$cond requires a `then` field"))?;
        let else_ = doc_field(value, "else")
            .ok_or_else(|| Error::invalid_argument("$cond requires an `else` field"))?;
        (if_, then, else_)
    };
    Ok(Expr::Conditional {
        if_: Box::new(parse_expr(if_)?),
        then: Box::new(parse_expr(then)?),
        else_: Box::new(parse_expr(else_)?),
    })
}

fn parse_ifnull(_op: &str, value: &Json) -> Result<Expr> {
    let arr = want_array("$ifNull", value)?;
    if arr.len() < 2 {
        return Err(Error::invalid_argument(
            "$ifNull requires at least 2 arguments",
        ));
    }
    // Fold right-to-left: ifNull(a, b, c) = ifNull(a, ifNull(b, c))
    let mut iter = arr.iter().rev();
    let mut acc = parse_expr(iter.next().unwrap())?;
    for item in iter {
        acc = Expr::IfNull {
            expr: Box::new(parse_expr(item)?),
            replacement: Box::new(acc),
        };
    }
    Ok(acc)
}

fn parse_switch(_op: &str, value: &Json) -> Result<Expr> {
    let branches_json = doc_field(value, "branches")
        .ok_or_else(|| Error::invalid_argument("$switch requires a `branches` field"))?;
    let branches_arr = want_array("$switch.branches", branches_json)?;
    if branches_arr.is_empty() {
        return Err(Error::empty_input("$switch requires at least 1 branch"));
    }
    let mut branches = Vec::with_capacity(branches_arr.len());
    for b in branches_arr {
        let case = doc_field(b, "case")
            .ok_or_else(|| Error::invalid_argument("$switch branch requires a `case` field"))?;
        let then = doc_field(b, "then")
            .ok_or_else(|| Error::invalid_argument("$switch branch requires a `then` field"))?;
        branches.push((parse_expr(case)?, parse_expr(then)?));
    }
    let default = doc_field(value, "default")
        .map(parse_expr)
        .transpose()?
        .map(Box::new);
    Ok(Expr::Switch { branches, default })
}

fn parse_array_fn(op: &str, value: &Json) -> Result<Expr> {
    let af = match op {
        "$arrayElemAt" => ArrayFn::ArrayElemAt,
        "$size" => ArrayFn::Size,
        "$first" => ArrayFn::First,
        "$last" => ArrayFn::Last,
        "$concatArrays" => ArrayFn::ConcatArrays,
        "$slice" => ArrayFn::Slice,
        "$filter" => ArrayFn::Filter,
        "$map" => ArrayFn::Map,
        "$reduce" => ArrayFn::Reduce,
        "$indexOfArray" => ArrayFn::IndexOfArray,
        "$reverseArray" => ArrayFn::Reverse,
        "$sortArray" => ArrayFn::SortArray,
        _ => unreachable!(),
    };
    let (input, args) = match af {
        ArrayFn::ArrayElemAt => {
            let arr = want_array(op, value)?;
            if arr.len() != 2 {
                return Err(Error::invalid_argument(
                    "$arrayElemAt requires exactly 2 arguments",
                ));
            }
            (parse_expr(&arr[0])?, vec![parse_expr(&arr[1])?])
        }
        ArrayFn::Size | ArrayFn::First | ArrayFn::Last | ArrayFn::Reverse => {
            (parse_expr(value)?, vec![])
        }
        ArrayFn::ConcatArrays => {
            let arr = want_array(op, value)?;
            let mut it = arr.iter();
            let first = it
                .next()
                .ok_or_else(|| Error::empty_input("$concatArrays requires at least 1 array"))?;
            let rest = it.map(parse_expr).collect::<Result<Vec<_>>>()?;
            (parse_expr(first)?, rest)
        }
        ArrayFn::Slice => {
            let arr = want_array(op, value)?;
            if arr.len() < 2 || arr.len() > 3 {
                return Err(Error::invalid_argument(
                    "$slice requires 2 or 3 arguments",
                ));
            }
            let input = parse_expr(&arr[0])?;
            let args = arr[1..].iter().map(parse_expr).collect::<Result<Vec<_>>>()?;
            (input, args)
        }
        ArrayFn::IndexOfArray => {
            let arr = want_array(op, value)?;
            if arr.len() < 2 {
                return Err(Error::invalid_argument(
                    "$indexOfArray requires at least 2 arguments",
                ));
            }
            (parse_expr(&arr[0])?, vec![parse_expr(&arr[1])?])
        }
        ArrayFn::Filter | ArrayFn::Map => {
            let input = doc_field(value, "input")
                .ok_or_else(|| Error::invalid_argument(format!("{op} requires an `input` field")))?;
            let inner = doc_field(value, "cond").or_else(|| doc_field(value, "in")).ok_or_else(|| {
                Error::invalid_argument(format!("{op} requires a `cond` or `in` field"))
            })?;
            (parse_expr(input)?, vec![parse_expr(inner)?])
        }
        ArrayFn::Reduce => {
            let input = doc_field(value, "input")
                .ok_or_else(|| Error::invalid_argument("$reduce requires an `input` field"))?;
            (parse_expr(input)?, vec![])
        }
        ArrayFn::SortArray => {
            let input = doc_field(value, "input")
                .ok_or_else(|| Error::invalid_argument("$sortArray requires an `input` field"))?;
            let sort_by = doc_field(value, "sortBy")
                .ok_or_else(|| Error::invalid_argument("$sortArray requires a `sortBy` field"))?;
            (parse_expr(input)?, vec![parse_expr(sort_by)?])
        }
    };
    Ok(Expr::ArrayFn {
        op: af,
        input: Box::new(input),
        args,
    })
}

fn parse_set_fn(op: &str, value: &Json) -> Result<Expr> {
    let sf = match op {
        "$setUnion" => SetFn::Union,
        "$setIntersection" => SetFn::Intersection,
        "$setDifference" => SetFn::Difference,
        "$setEquals" => SetFn::Equals,
        "$setIsSubset" => SetFn::IsSubset,
        _ => unreachable!(),
    };
    let arr = want_array(op, value)?;
    if arr.len() < 2 {
        return Err(Error::invalid_argument(format!(
            "{op} requires at least 2 arguments"
        )));
    }
    let args = arr.iter().map(parse_expr).collect::<Result<Vec<_>>>()?;
    Ok(Expr::SetFn { op: sf, args })
}

fn parse_object_fn(op: &str, value: &Json) -> Result<Expr> {
    let of = match op {
        "$mergeObjects" => ObjectFn::MergeObjects,
        "$objectToArray" => ObjectFn::ObjectToArray,
        "$arrayToObject" => ObjectFn::ArrayToObject,
        _ => unreachable!(),
    };
    let args = match (&of, value) {
        (ObjectFn::MergeObjects, Json::Array(arr)) => {
            arr.iter().map(parse_expr).collect::<Result<Vec<_>>>()?
        }
        (ObjectFn::MergeObjects, other) => vec![parse_expr(other)?],
        (_, other) => vec![parse_expr(other)?],
    };
    if args.is_empty() {
        return Err(Error::empty_input(format!("{op} requires at least 1 argument")));
    }
    Ok(Expr::ObjectFn { op: of, args })
}

fn parse_convert(op: &str, value: &Json) -> Result<Expr> {
    let cf = match op {
        "$toInt" => ConvertFn::ToInt,
        "$toLong" => ConvertFn::ToLong,
        "$toDouble" => ConvertFn::ToDouble,
        "$toDecimal" => ConvertFn::ToDecimal,
        "$toString" => ConvertFn::ToString,
        "$toBool" => ConvertFn::ToBool,
        "$toDate" => ConvertFn::ToDate,
        "$toObjectId" => ConvertFn::ToObjectId,
        "$type" => ConvertFn::Type,
        "$isNumber" => ConvertFn::IsNumber,
        "$isString" => ConvertFn::IsString,
        "$convert" => {
            let input = doc_field(value, "input")
                .ok_or_else(|| Error::invalid_argument("$convert requires an `input` field"))?;
            let to = doc_field(value, "to")
                .and_then(Json::as_str)
                .ok_or_else(|| Error::invalid_argument("$convert requires a `to` field"))?;
            let target = target_type(to)?;
            let on_error = doc_field(value, "onError").map(parse_expr).transpose()?.map(Box::new);
            let on_null = doc_field(value, "onNull").map(parse_expr).transpose()?.map(Box::new);
            return Ok(Expr::Convert {
                op: target,
                input: Box::new(parse_expr(input)?),
                on_error,
                on_null,
            });
        }
        _ => unreachable!(),
    };
    Ok(Expr::Convert {
        op: cf,
        input: Box::new(parse_expr(value)?),
        on_error: None,
        on_null: None,
    })
}

fn target_type(name: &str) -> Result<ConvertFn> {
    match name {
        "int" => Ok(ConvertFn::ToInt),
        "long" => Ok(ConvertFn::ToLong),
        "double" => Ok(ConvertFn::ToDouble),
        "decimal" => Ok(ConvertFn::ToDecimal),
        "string" => Ok(ConvertFn::ToString),
        "bool" => Ok(ConvertFn::ToBool),
        "date" => Ok(ConvertFn::ToDate),
        "objectId" => Ok(ConvertFn::ToObjectId),
        other => Err(Error::invalid_argument(format!(
            "unknown $convert target type `{other}`"
        ))),
    }
}

/// Parses an accumulator expression (`$group`/`$bucket`/`$bucketAuto`
/// output, `$setWindowFields` output). Exposed for the stage parser.
pub fn parse_accumulator(op: &str, value: &Json) -> Result<Expr> {
    let aop = match op {
        "$sum" => AccumulatorOp::Sum,
        "$avg" => AccumulatorOp::Avg,
        "$min" => AccumulatorOp::Min,
        "$max" => AccumulatorOp::Max,
        "$count" => AccumulatorOp::Count,
        "$first" => AccumulatorOp::First,
        "$last" => AccumulatorOp::Last,
        "$push" => AccumulatorOp::Push,
        "$addToSet" => AccumulatorOp::AddToSet,
        _ => return Err(Error::unsupported_operator(op)),
    };
    let arg = if matches!(value, Json::Null) && aop == AccumulatorOp::Count {
        None
    } else {
        Some(Box::new(parse_expr(value)?))
    };
    Ok(Expr::Accumulator { op: aop, arg })
}

/// Parses a `$match`/`$redact`/`restrictSearchWithMatch`-style filter
/// document: `{field: value}` equality, `{field: {$gt: value, ...}}`, and
/// `$and`/`$or`/`$nor` combinators.
pub fn parse_filter(value: &Json) -> Result<Expr> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::invalid_argument("filter must be a document"))?;
    if map.is_empty() {
        return Err(Error::empty_input("filter document must not be empty"));
    }

    let mut clauses = Vec::with_capacity(map.len());
    for (key, val) in map {
        if key == "$and" || key == "$or" || key == "$nor" {
            let arr = want_array(key, val)?;
            if arr.is_empty() {
                return Err(Error::empty_input(format!("{key} requires a non-empty array")));
            }
            let sub = arr.iter().map(parse_filter).collect::<Result<Vec<_>>>()?;
            let lop = match key.as_str() {
                "$and" => LogicalOp::And,
                "$or" => LogicalOp::Or,
                _ => LogicalOp::Nor,
            };
            clauses.push(Expr::Logical { op: lop, args: sub });
            continue;
        }
        if key.starts_with('$') {
            return Err(Error::unsupported_operator(key));
        }
        clauses.push(parse_field_filter(key, val)?);
    }

    if clauses.len() == 1 {
        Ok(clauses.into_iter().next().unwrap())
    } else {
        Ok(Expr::Logical {
            op: LogicalOp::And,
            args: clauses,
        })
    }
}

fn parse_field_filter(field: &str, val: &Json) -> Result<Expr> {
    let path = Expr::FieldPath(FieldPath::new(field.split('.').map(str::to_string).collect()));
    match val.as_object() {
        Some(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
            let mut comparisons = Vec::with_capacity(ops.len());
            for (op, opval) in ops {
                comparisons.push(parse_field_operator(op, path.clone(), opval)?);
            }
            if comparisons.len() == 1 {
                Ok(comparisons.into_iter().next().unwrap())
            } else {
                Ok(Expr::Logical {
                    op: LogicalOp::And,
                    args: comparisons,
                })
            }
        }
        _ => Ok(Expr::Comparison {
            op: ComparisonOp::Eq,
            left: Box::new(path),
            right: Box::new(parse_expr(val)?),
        }),
    }
}

fn parse_field_operator(op: &str, path: Expr, value: &Json) -> Result<Expr> {
    let cmp = match op {
        "$eq" => ComparisonOp::Eq,
        "$ne" => ComparisonOp::Ne,
        "$gt" => ComparisonOp::Gt,
        "$gte" => ComparisonOp::Gte,
        "$lt" => ComparisonOp::Lt,
        "$lte" => ComparisonOp::Lte,
        "$in" => ComparisonOp::In,
        "$nin" => ComparisonOp::Nin,
        "$not" => {
            let inner = parse_field_filter_value(&path, value)?;
            return Ok(Expr::Logical {
                op: LogicalOp::Not,
                args: vec![inner],
            });
        }
        _ => return Err(Error::unsupported_operator(op)),
    };
    if matches!(cmp, ComparisonOp::In | ComparisonOp::Nin) {
        want_array(op, value)?;
    }
    Ok(Expr::Comparison {
        op: cmp,
        left: Box::new(path),
        right: Box::new(parse_expr(value)?),
    })
}

fn parse_field_filter_value(path: &Expr, value: &Json) -> Result<Expr> {
    match value.as_object() {
        Some(ops) if !ops.is_empty() => {
            let mut comparisons = Vec::with_capacity(ops.len());
            for (op, opval) in ops {
                comparisons.push(parse_field_operator(op, path.clone(), opval)?);
            }
            if comparisons.len() == 1 {
                Ok(comparisons.into_iter().next().unwrap())
            } else {
                Ok(Expr::Logical {
                    op: LogicalOp::And,
                    args: comparisons,
                })
            }
        }
        _ => Ok(Expr::Comparison {
            op: ComparisonOp::Eq,
            left: Box::new(path.clone()),
            right: Box::new(parse_expr(value)?),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Reason;
    use serde_json::json;

    #[test]
    fn bare_dollar_string_parses_as_a_field_path() {
        let expr = parse_expr(&json!("$amount")).unwrap();
        assert_eq!(expr.as_field_path().map(|fp| fp.dotted()), Some("amount".to_string()));
    }

    #[test]
    fn plain_string_parses_as_a_literal() {
        let expr = parse_expr(&json!("amount")).unwrap();
        assert_eq!(expr, Expr::Literal(Json::String("amount".to_string())));
    }

    #[test]
    fn arithmetic_operand_field_paths_are_typed_numeric() {
        let expr = parse_expr(&json!({ "$add": ["$a", "$b"] })).unwrap();
        match expr {
            Expr::Arithmetic { args, .. } => {
                for a in args {
                    let fp = a.as_field_path().unwrap();
                    assert_eq!(fp.returning, ReturningType::Number);
                }
            }
            other => panic!("expected an Arithmetic expr, got {other:?}"),
        }
    }

    #[test]
    fn string_fn_operand_field_paths_are_typed_varchar() {
        let expr = parse_expr(&json!({ "$toUpper": "$name" })).unwrap();
        match expr {
            Expr::StringFn { args, .. } => {
                assert_eq!(args[0].as_field_path().unwrap().returning, ReturningType::Varchar);
            }
            other => panic!("expected a StringFn expr, got {other:?}"),
        }
    }

    #[test]
    fn equality_shorthand_becomes_eq_comparison() {
        let filter = parse_filter(&json!({ "status": "active" })).unwrap();
        assert!(matches!(filter, Expr::Comparison { op: ComparisonOp::Eq, .. }));
    }

    #[test]
    fn multiple_operators_on_one_field_and_together() {
        let filter = parse_filter(&json!({ "amount": { "$gt": 10, "$lt": 100 } })).unwrap();
        match filter {
            Expr::Logical { op: LogicalOp::And, args } => assert_eq!(args.len(), 2),
            other => panic!("expected an AND of two comparisons, got {other:?}"),
        }
    }

    #[test]
    fn empty_filter_document_is_an_error() {
        let err = parse_filter(&json!({})).unwrap_err();
        assert!(matches!(err.reason(), Reason::EmptyInput(_)));
    }

    #[test]
    fn in_requires_an_array_argument() {
        let err = parse_filter(&json!({ "status": { "$in": "active" } })).unwrap_err();
        assert!(matches!(err.reason(), Reason::InvalidArgument(_)));
    }

    #[test]
    fn count_accumulator_with_no_argument_has_no_arg() {
        let expr = parse_accumulator("$count", &Json::Null).unwrap();
        assert_eq!(expr, Expr::Accumulator { op: AccumulatorOp::Count, arg: None });
    }

    #[test]
    fn sum_accumulator_keeps_its_argument() {
        let expr = parse_accumulator("$sum", &json!("$amount")).unwrap();
        match expr {
            Expr::Accumulator { op: AccumulatorOp::Sum, arg: Some(arg) } => {
                assert_eq!(arg.as_field_path().map(|fp| fp.dotted()), Some("amount".to_string()));
            }
            other => panic!("expected a $sum accumulator, got {other:?}"),
        }
    }

    #[test]
    fn unknown_accumulator_is_an_unsupported_operator_error() {
        let err = parse_accumulator("$bogus", &Json::Null).unwrap_err();
        assert!(matches!(err.reason(), Reason::UnsupportedOperator(_)));
    }
}
