//! Stage grammar: one `{"$stageName": <arg>}` document per pipeline
//! element, dispatched to a typed sub-parser per stage.

use indexmap::IndexMap;
use serde_json::Value as Json;

use super::expr::{parse_accumulator, parse_expr, parse_filter};
use crate::ast::expr::{Expr, FieldPath, OMap, RankFn};
use crate::ast::stage::*;
use crate::error::{Error, Result, WithErrorInfo};

pub fn parse_stage(doc: &Json) -> Result<Stage> {
    let map = doc
        .as_object()
        .ok_or_else(|| Error::invalid_argument("a pipeline stage must be a document"))?;
    if map.len() != 1 {
        return Err(Error::invalid_argument(format!(
            "a pipeline stage must have exactly one key, found {}",
            map.len()
        )));
    }
    let (key, value) = map.iter().next().unwrap();
    let stage = match key.as_str() {
        "$match" => Stage::Match(parse_filter(value)?),
        "$project" => parse_project(value)?,
        "$group" => parse_group(value)?,
        "$sort" => parse_sort(value)?,
        "$skip" => Stage::Skip(as_u64("$skip", value)?),
        "$limit" => Stage::Limit(as_u64("$limit", value)?),
        "$lookup" => parse_lookup(value)?,
        "$unwind" => parse_unwind(value)?,
        "$addFields" | "$set" => Stage::AddFields(parse_field_map(value)?),
        "$unionWith" => parse_union_with(value)?,
        "$bucket" => parse_bucket(value)?,
        "$bucketAuto" => parse_bucket_auto(value)?,
        "$facet" => parse_facet(value)?,
        "$setWindowFields" => parse_set_window_fields(value)?,
        "$graphLookup" => parse_graph_lookup(value)?,
        "$count" => Stage::Count(as_string("$count", value)?),
        "$sample" => parse_sample(value)?,
        "$redact" => Stage::Redact(parse_expr(value)?),
        "$replaceRoot" => {
            let new_root = doc_field(value, "newRoot")
                .ok_or_else(|| Error::invalid_argument("$replaceRoot requires a `newRoot` field"))?;
            Stage::ReplaceRoot(parse_expr(new_root)?)
        }
        "$replaceWith" => Stage::ReplaceRoot(parse_expr(value)?),
        "$merge" => parse_merge(value)?,
        other => return Err(Error::unsupported_operator(other)),
    };
    Ok(stage)
}

fn doc_field<'a>(value: &'a Json, field: &str) -> Option<&'a Json> {
    value.as_object().and_then(|o| o.get(field))
}

fn as_u64(op: &str, value: &Json) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Error::invalid_argument(format!("{op} requires a non-negative integer")))
}

fn as_string(op: &str, value: &Json) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_argument(format!("{op} requires a string")))
}

fn field_path(dotted: &str) -> Expr {
    Expr::FieldPath(FieldPath::new(dotted.split('.').map(str::to_string).collect()))
}

fn parse_field_map(value: &Json) -> Result<OMap<Expr>> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::invalid_argument("expected a document"))?;
    let mut out = IndexMap::with_capacity(map.len());
    for (k, v) in map {
        out.insert(k.clone(), parse_expr(v).with_context(k.clone())?);
    }
    Ok(out)
}

fn parse_project(value: &Json) -> Result<Stage> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::invalid_argument("$project requires a document"))?;
    if map.is_empty() {
        return Err(Error::empty_input("$project requires at least one field"));
    }
    let mut out = IndexMap::with_capacity(map.len());
    for (k, v) in map {
        let spec = match v {
            Json::Bool(true) => ProjectionSpec::Include,
            Json::Bool(false) => ProjectionSpec::Exclude,
            Json::Number(n) if n.as_i64() == Some(1) => ProjectionSpec::Include,
            Json::Number(n) if n.as_i64() == Some(0) => ProjectionSpec::Exclude,
            other => ProjectionSpec::Computed(parse_expr(other).with_context(k.clone())?),
        };
        out.insert(k.clone(), spec);
    }
    Ok(Stage::Project(out))
}

fn parse_group_id(id_val: &Json) -> Result<GroupId> {
    match id_val {
        Json::Object(map) if !map.is_empty() && map.keys().all(|k| !k.starts_with('$')) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), parse_expr(v).with_context(k.clone())?);
            }
            Ok(GroupId::Compound(out))
        }
        other => Ok(GroupId::Single(parse_expr(other)?)),
    }
}

fn parse_group(value: &Json) -> Result<Stage> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::invalid_argument("$group requires a document"))?;
    let id_val = map
        .get("_id")
        .ok_or_else(|| Error::invalid_argument("$group requires an `_id` field"))?;
    let id = parse_group_id(id_val).with_context("_id")?;

    let mut accumulators = IndexMap::new();
    for (k, v) in map {
        if k == "_id" {
            continue;
        }
        let op_map = v
            .as_object()
            .ok_or_else(|| Error::invalid_argument(format!("accumulator `{k}` must be a document")))?;
        if op_map.len() != 1 {
            return Err(Error::invalid_argument(format!(
                "accumulator `{k}` must have exactly one operator key"
            )));
        }
        let (op, arg) = op_map.iter().next().unwrap();
        accumulators.insert(k.clone(), parse_accumulator(op, arg).with_context(k.clone())?);
    }
    Ok(Stage::Group { id, accumulators })
}

fn sort_direction(v: &Json) -> Result<SortDirection> {
    match v {
        Json::Number(n) if n.as_i64() == Some(1) => Ok(SortDirection::Asc),
        Json::Number(n) if n.as_i64() == Some(-1) => Ok(SortDirection::Desc),
        Json::String(s) if s == "asc" => Ok(SortDirection::Asc),
        Json::String(s) if s == "desc" => Ok(SortDirection::Desc),
        _ => Err(Error::invalid_argument(
            "sort direction must be 1, -1, \"asc\", or \"desc\"",
        )),
    }
}

fn parse_sort(value: &Json) -> Result<Stage> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::invalid_argument("$sort requires a document"))?;
    if map.is_empty() {
        return Err(Error::empty_input("$sort requires at least one key"));
    }
    let mut keys = Vec::with_capacity(map.len());
    for (k, v) in map {
        keys.push((field_path(k), sort_direction(v).with_context(k.clone())?));
    }
    Ok(Stage::Sort(keys))
}

fn parse_lookup(value: &Json) -> Result<Stage> {
    let from = doc_field(value, "from")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::invalid_argument("$lookup requires a `from` field"))?
        .to_string();
    let as_field = doc_field(value, "as")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::invalid_argument("$lookup requires an `as` field"))?
        .to_string();

    let kind = if let (Some(local), Some(foreign)) = (
        doc_field(value, "localField").and_then(Json::as_str),
        doc_field(value, "foreignField").and_then(Json::as_str),
    ) {
        LookupKind::Equality {
            local: local.to_string(),
            foreign: foreign.to_string(),
        }
    } else if let Some(pipeline_val) = doc_field(value, "pipeline") {
        let mut r#let = IndexMap::new();
        if let Some(let_map) = doc_field(value, "let").and_then(Json::as_object) {
            for (k, v) in let_map {
                let path = v
                    .as_str()
                    .and_then(|s| s.strip_prefix('$'))
                    .ok_or_else(|| Error::invalid_argument(format!("`let.{k}` must be a field path")))?;
                r#let.insert(k.clone(), path.split('.').map(str::to_string).collect());
            }
        }
        let stages = pipeline_val
            .as_array()
            .ok_or_else(|| Error::invalid_argument("$lookup.pipeline requires an array"))?
            .iter()
            .map(parse_stage)
            .collect::<Result<Vec<_>>>()
            .with_context("pipeline")?;
        LookupKind::Pipeline {
            r#let,
            sub_pipeline: stages,
        }
    } else {
        return Err(Error::invalid_argument(
            "$lookup requires either localField/foreignField or pipeline",
        ));
    };

    Ok(Stage::Lookup {
        from,
        kind,
        r#as: as_field,
    })
}

fn parse_unwind(value: &Json) -> Result<Stage> {
    let (path_str, include_array_index, preserve_null) = match value {
        Json::String(s) => (s.clone(), None, false),
        Json::Object(_) => {
            let path_str = doc_field(value, "path")
                .and_then(Json::as_str)
                .ok_or_else(|| Error::invalid_argument("$unwind requires a `path` field"))?
                .to_string();
            let include_array_index = doc_field(value, "includeArrayIndex")
                .and_then(Json::as_str)
                .map(str::to_string);
            let preserve_null = doc_field(value, "preserveNullAndEmptyArrays")
                .and_then(Json::as_bool)
                .unwrap_or(false);
            (path_str, include_array_index, preserve_null)
        }
        _ => return Err(Error::invalid_argument("$unwind requires a string or document")),
    };
    let path_str = path_str
        .strip_prefix('$')
        .ok_or_else(|| Error::invalid_argument("$unwind path must start with `$`"))?;
    Ok(Stage::Unwind {
        path: path_str.split('.').map(str::to_string).collect(),
        include_array_index,
        preserve_null_and_empty_arrays: preserve_null,
    })
}

fn parse_union_with(value: &Json) -> Result<Stage> {
    match value {
        Json::String(coll) => Ok(Stage::UnionWith {
            from: coll.clone(),
            sub_pipeline: vec![],
        }),
        Json::Object(_) => {
            let coll = doc_field(value, "coll")
                .and_then(Json::as_str)
                .ok_or_else(|| Error::invalid_argument("$unionWith requires a `coll` field"))?
                .to_string();
            let stages = match doc_field(value, "pipeline") {
                Some(p) => p
                    .as_array()
                    .ok_or_else(|| Error::invalid_argument("$unionWith.pipeline requires an array"))?
                    .iter()
                    .map(parse_stage)
                    .collect::<Result<Vec<_>>>()
                    .with_context("pipeline")?,
                None => vec![],
            };
            Ok(Stage::UnionWith {
                from: coll,
                sub_pipeline: stages,
            })
        }
        _ => Err(Error::invalid_argument(
            "$unionWith requires a string or document",
        )),
    }
}

fn parse_output_map(value: Option<&Json>) -> Result<OMap<Expr>> {
    match value {
        None => {
            let mut m = IndexMap::new();
            m.insert(
                "count".to_string(),
                Expr::Accumulator {
                    op: crate::ast::expr::AccumulatorOp::Sum,
                    arg: Some(Box::new(Expr::Literal(Json::from(1)))),
                },
            );
            Ok(m)
        }
        Some(v) => {
            let map = v
                .as_object()
                .ok_or_else(|| Error::invalid_argument("`output` requires a document"))?;
            let mut out = IndexMap::with_capacity(map.len());
            for (k, v) in map {
                let op_map = v.as_object().ok_or_else(|| {
                    Error::invalid_argument(format!("output field `{k}` must be a document"))
                })?;
                if op_map.len() != 1 {
                    return Err(Error::invalid_argument(format!(
                        "output field `{k}` must have exactly one operator key"
                    )));
                }
                let (op, arg) = op_map.iter().next().unwrap();
                out.insert(k.clone(), parse_accumulator(op, arg).with_context(k.clone())?);
            }
            Ok(out)
        }
    }
}

fn parse_bucket(value: &Json) -> Result<Stage> {
    let group_by = doc_field(value, "groupBy")
        .ok_or_else(|| Error::invalid_argument("$bucket requires a `groupBy` field"))?;
    let group_by = parse_expr(group_by).with_context("groupBy")?;
    let boundaries = doc_field(value, "boundaries")
        .and_then(Json::as_array)
        .ok_or_else(|| Error::invalid_argument("$bucket requires a `boundaries` array"))?;
    if boundaries.len() < 2 {
        return Err(Error::invalid_argument(
            "$bucket.boundaries requires at least 2 values",
        ));
    }
    let default = doc_field(value, "default").cloned();
    let output = parse_output_map(doc_field(value, "output")).with_context("output")?;
    Ok(Stage::Bucket {
        group_by,
        boundaries: boundaries.clone(),
        default,
        output,
    })
}

fn parse_bucket_auto(value: &Json) -> Result<Stage> {
    let group_by = doc_field(value, "groupBy")
        .ok_or_else(|| Error::invalid_argument("$bucketAuto requires a `groupBy` field"))?;
    let group_by = parse_expr(group_by).with_context("groupBy")?;
    let n_buckets = doc_field(value, "buckets")
        .and_then(Json::as_u64)
        .ok_or_else(|| Error::invalid_argument("$bucketAuto requires a `buckets` integer"))?;
    if n_buckets == 0 {
        return Err(Error::invalid_argument("$bucketAuto.buckets must be positive"));
    }
    let output = parse_output_map(doc_field(value, "output")).with_context("output")?;
    let granularity = match doc_field(value, "granularity").and_then(Json::as_str) {
        None => None,
        Some("R5") => Some(BucketAutoGranularity::R5),
        Some("R10") => Some(BucketAutoGranularity::R10),
        Some("R20") => Some(BucketAutoGranularity::R20),
        Some("E6") => Some(BucketAutoGranularity::E6),
        Some("E12") => Some(BucketAutoGranularity::E12),
        Some("E24") => Some(BucketAutoGranularity::E24),
        Some("E48") => Some(BucketAutoGranularity::E48),
        Some("E96") => Some(BucketAutoGranularity::E96),
        Some("E192") => Some(BucketAutoGranularity::E192),
        Some("POWERSOF2") => Some(BucketAutoGranularity::PowersOf2),
        Some(other) => {
            return Err(Error::invalid_argument(format!(
                "unknown $bucketAuto granularity `{other}`"
            )))
        }
    };
    Ok(Stage::BucketAuto {
        group_by,
        n_buckets,
        output,
        granularity,
    })
}

fn parse_facet(value: &Json) -> Result<Stage> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::invalid_argument("$facet requires a document"))?;
    if map.is_empty() {
        return Err(Error::empty_input("$facet requires at least one branch"));
    }
    let mut out = IndexMap::with_capacity(map.len());
    for (k, v) in map {
        let stages = v
            .as_array()
            .ok_or_else(|| Error::invalid_argument(format!("$facet branch `{k}` must be an array")))?
            .iter()
            .map(parse_stage)
            .collect::<Result<Vec<_>>>()
            .with_context(k.clone())?;
        out.insert(k.clone(), stages);
    }
    Ok(Stage::Facet(out))
}

fn parse_window_bound(v: &Json) -> Result<WindowBound> {
    match v {
        Json::String(s) if s == "unbounded" => Ok(WindowBound::Unbounded),
        Json::String(s) if s == "current" => Ok(WindowBound::Current),
        Json::Number(n) => n
            .as_i64()
            .map(WindowBound::Offset)
            .ok_or_else(|| Error::invalid_argument("window bound integer out of range")),
        _ => Err(Error::invalid_argument(
            "window bound must be \"unbounded\", \"current\", or an integer offset",
        )),
    }
}

fn parse_window_spec(v: &Json) -> Result<WindowSpec> {
    let (unit, bounds) = if let Some(arr) = doc_field(v, "documents").and_then(Json::as_array) {
        (WindowUnit::Documents, arr)
    } else if let Some(arr) = doc_field(v, "range").and_then(Json::as_array) {
        (WindowUnit::Range, arr)
    } else {
        return Err(Error::invalid_argument(
            "window requires a `documents` or `range` array",
        ));
    };
    if bounds.len() != 2 {
        return Err(Error::invalid_argument(
            "window bound array requires exactly 2 elements",
        ));
    }
    Ok(WindowSpec {
        unit,
        from: parse_window_bound(&bounds[0])?,
        to: parse_window_bound(&bounds[1])?,
    })
}

fn parse_set_window_fields(value: &Json) -> Result<Stage> {
    let partition_by = doc_field(value, "partitionBy")
        .map(parse_expr)
        .transpose()
        .with_context("partitionBy")?;
    let mut sort_by = Vec::new();
    if let Some(sort_map) = doc_field(value, "sortBy").and_then(Json::as_object) {
        for (k, v) in sort_map {
            sort_by.push((k.clone(), sort_direction(v).with_context(k.clone())?));
        }
    }
    let output_map = doc_field(value, "output")
        .and_then(Json::as_object)
        .ok_or_else(|| Error::invalid_argument("$setWindowFields requires an `output` document"))?;
    if output_map.is_empty() {
        return Err(Error::empty_input(
            "$setWindowFields.output requires at least one field",
        ));
    }
    let mut output = IndexMap::with_capacity(output_map.len());
    for (k, v) in output_map {
        let field_doc = v
            .as_object()
            .ok_or_else(|| Error::invalid_argument(format!("output field `{k}` must be a document")))?;
        let (op_key, op_arg) = field_doc
            .iter()
            .find(|(key, _)| key.as_str() != "window")
            .ok_or_else(|| Error::invalid_argument(format!("output field `{k}` requires an operator key")))?;
        let op = match op_key.as_str() {
            "$rank" => Expr::RankFn(RankFn::Rank),
            "$denseRank" => Expr::RankFn(RankFn::DenseRank),
            "$documentNumber" => Expr::RankFn(RankFn::DocumentNumber),
            _ => parse_accumulator(op_key, op_arg).with_context(k.clone())?,
        };
        let spec = field_doc
            .get("window")
            .map(parse_window_spec)
            .transpose()
            .with_context(k.clone())?;
        output.insert(k.clone(), WindowField { op, spec });
    }
    Ok(Stage::SetWindowFields {
        partition_by,
        sort_by,
        output,
    })
}

fn parse_graph_lookup(value: &Json) -> Result<Stage> {
    let from = doc_field(value, "from")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::invalid_argument("$graphLookup requires a `from` field"))?
        .to_string();
    let start_with = doc_field(value, "startWith")
        .ok_or_else(|| Error::invalid_argument("$graphLookup requires a `startWith` field"))?;
    let start_with = parse_expr(start_with).with_context("startWith")?;
    let connect_from_field = doc_field(value, "connectFromField")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::invalid_argument("$graphLookup requires a `connectFromField` field"))?
        .to_string();
    let connect_to_field = doc_field(value, "connectToField")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::invalid_argument("$graphLookup requires a `connectToField` field"))?
        .to_string();
    let as_field = doc_field(value, "as")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::invalid_argument("$graphLookup requires an `as` field"))?
        .to_string();
    let max_depth = doc_field(value, "maxDepth").and_then(Json::as_u64);
    let depth_field = doc_field(value, "depthField")
        .and_then(Json::as_str)
        .map(str::to_string);
    let restrict_search_with_match = doc_field(value, "restrictSearchWithMatch")
        .map(parse_filter)
        .transpose()
        .with_context("restrictSearchWithMatch")?;
    Ok(Stage::GraphLookup {
        from,
        start_with,
        connect_from_field,
        connect_to_field,
        r#as: as_field,
        max_depth,
        depth_field,
        restrict_search_with_match,
    })
}

fn parse_sample(value: &Json) -> Result<Stage> {
    let size = doc_field(value, "size")
        .and_then(Json::as_u64)
        .ok_or_else(|| Error::invalid_argument("$sample requires a `size` field"))?;
    Ok(Stage::Sample(size))
}

fn parse_merge(value: &Json) -> Result<Stage> {
    match value {
        Json::String(target) => Ok(Stage::Merge {
            target: target.clone(),
            on_fields: vec![],
            when_matched: MergeWhenMatched::Merge,
            when_not_matched: MergeWhenNotMatched::Insert,
        }),
        Json::Object(_) => {
            let target = doc_field(value, "into")
                .and_then(Json::as_str)
                .ok_or_else(|| Error::invalid_argument("$merge requires an `into` field"))?
                .to_string();
            let on_fields = match doc_field(value, "on") {
                None => vec![],
                Some(Json::String(s)) => vec![s.clone()],
                Some(Json::Array(arr)) => arr
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| Error::invalid_argument("$merge.on array must contain strings"))
                    })
                    .collect::<Result<Vec<_>>>()?,
                Some(_) => return Err(Error::invalid_argument("$merge.on must be a string or array")),
            };
            let when_matched = match doc_field(value, "whenMatched").and_then(Json::as_str) {
                None | Some("merge") => MergeWhenMatched::Merge,
                Some("replace") => MergeWhenMatched::Replace,
                Some("keepExisting") => MergeWhenMatched::Keep,
                Some("fail") => MergeWhenMatched::Fail,
                Some(other) => {
                    return Err(Error::invalid_argument(format!(
                        "unknown $merge.whenMatched `{other}`"
                    )))
                }
            };
            let when_not_matched = match doc_field(value, "whenNotMatched").and_then(Json::as_str) {
                None | Some("insert") => MergeWhenNotMatched::Insert,
                Some("discard") => MergeWhenNotMatched::Discard,
                Some("fail") => MergeWhenNotMatched::Fail,
                Some(other) => {
                    return Err(Error::invalid_argument(format!(
                        "unknown $merge.whenNotMatched `{other}`"
                    )))
                }
            };
            Ok(Stage::Merge {
                target,
                on_fields,
                when_matched,
                when_not_matched,
            })
        }
        _ => Err(Error::invalid_argument("$merge requires a string or document")),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Reason;
    use serde_json::json;

    #[test]
    fn match_parses_into_a_filter_stage() {
        let stage = parse_stage(&json!({ "$match": { "status": "active" } })).unwrap();
        assert!(matches!(stage, Stage::Match(_)));
    }

    #[test]
    fn skip_and_limit_parse_their_integer_argument() {
        assert_eq!(parse_stage(&json!({ "$skip": 10 })).unwrap(), Stage::Skip(10));
        assert_eq!(parse_stage(&json!({ "$limit": 5 })).unwrap(), Stage::Limit(5));
    }

    #[test]
    fn a_stage_document_must_have_exactly_one_key() {
        let err = parse_stage(&json!({ "$skip": 1, "$limit": 2 })).unwrap_err();
        assert!(matches!(err.reason(), Reason::InvalidArgument(_)));
    }

    #[test]
    fn unknown_stage_name_is_unsupported() {
        let err = parse_stage(&json!({ "$bogus": {} })).unwrap_err();
        assert!(matches!(err.reason(), Reason::UnsupportedOperator(_)));
    }

    #[test]
    fn set_window_fields_recognizes_rank_family_ops_without_an_argument() {
        let stage = parse_stage(&json!({
            "$setWindowFields": {
                "sortBy": { "salary": -1 },
                "output": {
                    "r": { "$rank": {} },
                    "dr": { "$denseRank": {} },
                    "dn": { "$documentNumber": {} },
                }
            }
        }))
        .unwrap();
        match stage {
            Stage::SetWindowFields { output, .. } => {
                assert_eq!(output.get("r").unwrap().op, Expr::RankFn(RankFn::Rank));
                assert_eq!(output.get("dr").unwrap().op, Expr::RankFn(RankFn::DenseRank));
                assert_eq!(output.get("dn").unwrap().op, Expr::RankFn(RankFn::DocumentNumber));
            }
            other => panic!("expected $setWindowFields, got {other:?}"),
        }
    }

    #[test]
    fn replace_with_is_an_alias_for_replace_root() {
        let stage = parse_stage(&json!({ "$replaceWith": "$newDoc" })).unwrap();
        assert!(matches!(stage, Stage::ReplaceRoot(_)));
    }
}
