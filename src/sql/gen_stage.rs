//! Per-stage SQL fragment construction. Each `render_*` function takes the
//! SQL text of everything compiled so far (`prev_sql`, always a valid,
//! parenthesizable `SELECT`) and wraps it in a new derived table realizing
//! one stage's semantics. Every derived table exposes exactly one JSON
//! column, `"DATA"`, so subsequent stages compose uniformly regardless of
//! how many stages preceded them.

use serde_json::Value as Json;

use crate::ast::expr::*;
use crate::ast::stage::*;
use crate::error::{Error, Result};
use crate::render::RenderContext;
use crate::sql::gen_expr::{base_data, is_predicate, render_doc_expr, render_expr, render_value_expr, DATA_COLUMN};

fn enter(ctx: &mut RenderContext, prefix: &str) -> String {
    let alias = ctx.next_alias(prefix);
    ctx.set_base_alias(alias.clone());
    alias
}

fn truthy(expr: &Expr, sql: String) -> String {
    if is_predicate(expr) {
        sql
    } else {
        format!("({sql} <> 0)")
    }
}

pub fn render_match(prev_sql: &str, filter: &Expr, ctx: &mut RenderContext) -> Result<String> {
    let alias = enter(ctx, "m");
    let cond_sql = render_expr(filter, ctx)?;
    let cond = truthy(filter, cond_sql);
    let d = ctx.identifier(DATA_COLUMN);
    Ok(format!(
        "SELECT {alias}.{d} AS {d} FROM ({prev_sql}) {alias} WHERE {cond}"
    ))
}

/// `$project`. A document whose specs are all `Exclude` removes fields via
/// `JSON_MERGEPATCH` (RFC 7396: merging a `null` value deletes the key);
/// any other mix rebuilds the document field-by-field via `JSON_OBJECT`.
pub fn render_project(prev_sql: &str, spec: &OMap<ProjectionSpec>, ctx: &mut RenderContext) -> Result<String> {
    let alias = enter(ctx, "p");
    let d = ctx.identifier(DATA_COLUMN);
    let all_exclude = spec.values().all(|s| matches!(s, ProjectionSpec::Exclude));

    let new_data = if all_exclude {
        let mut parts = Vec::with_capacity(spec.len());
        for key in spec.keys() {
            parts.push(format!("'{key}' VALUE NULL"));
        }
        let patch = format!("JSON_OBJECT({})", parts.join(", "));
        format!("JSON_MERGEPATCH({}, {patch})", base_data(ctx))
    } else {
        let mut parts = Vec::with_capacity(spec.len());
        for (key, s) in spec {
            let value_sql = match s {
                ProjectionSpec::Exclude => continue,
                ProjectionSpec::Include => render_doc_expr(&Expr::FieldPath(FieldPath::new(vec![key.clone()])), ctx)?,
                ProjectionSpec::Computed(e) => {
                    if e.as_field_path().is_some() {
                        render_doc_expr(e, ctx)?
                    } else {
                        render_value_expr(e, ctx)?
                    }
                }
            };
            let format_json = matches!(s, ProjectionSpec::Include)
                || matches!(s, ProjectionSpec::Computed(e) if e.as_field_path().is_some());
            if format_json {
                parts.push(format!("'{key}' VALUE {value_sql} FORMAT JSON"));
            } else {
                parts.push(format!("'{key}' VALUE {value_sql}"));
            }
        }
        format!("JSON_OBJECT({})", parts.join(", "))
    };

    Ok(format!(
        "SELECT {new_data} AS {d} FROM ({prev_sql}) {alias}"
    ))
}

/// `$addFields`/`$set`: always a merge-patch over the incoming document.
pub fn render_add_fields(prev_sql: &str, fields: &OMap<Expr>, ctx: &mut RenderContext) -> Result<String> {
    let alias = enter(ctx, "a");
    let d = ctx.identifier(DATA_COLUMN);
    let mut parts = Vec::with_capacity(fields.len());
    for (key, e) in fields {
        if e.as_field_path().is_some() {
            let v = render_doc_expr(e, ctx)?;
            parts.push(format!("'{key}' VALUE {v} FORMAT JSON"));
        } else {
            let v = render_value_expr(e, ctx)?;
            parts.push(format!("'{key}' VALUE {v}"));
        }
    }
    let patch = format!("JSON_OBJECT({})", parts.join(", "));
    let new_data = format!("JSON_MERGEPATCH({}, {patch})", base_data(ctx));
    Ok(format!("SELECT {new_data} AS {d} FROM ({prev_sql}) {alias}"))
}

fn render_sort_keys(keys: &[(Expr, SortDirection)], ctx: &mut RenderContext) -> Result<String> {
    let mut parts = Vec::with_capacity(keys.len());
    for (e, dir) in keys {
        let sql = render_value_expr(e, ctx)?;
        let dir_sql = match dir {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        parts.push(format!("{sql} {dir_sql}"));
    }
    Ok(parts.join(", "))
}

/// Renders a (possibly fused) run of `$sort`/`$skip`/`$limit`. The
/// compiler's preflight pass collapses an adjacent run of these stages
/// into a single call so the row-limiting clause lands in one `SELECT`
/// rather than three nested ones.
pub fn render_sort_skip_limit(
    prev_sql: &str,
    sort: Option<&[(Expr, SortDirection)]>,
    skip: Option<u64>,
    limit: Option<u64>,
    ctx: &mut RenderContext,
) -> Result<String> {
    let alias = enter(ctx, "o");
    let d = ctx.identifier(DATA_COLUMN);
    let order_by = match sort {
        Some(keys) if !keys.is_empty() => format!(" ORDER BY {}", render_sort_keys(keys, ctx)?),
        _ => String::new(),
    };
    let ordered = format!("SELECT {alias}.{d} AS {d} FROM ({prev_sql}) {alias}{order_by}");

    if ctx.dialect().supports_fetch_first() {
        let mut tail = String::new();
        if let Some(n) = skip {
            tail.push_str(&format!(" OFFSET {n} ROWS"));
        }
        if let Some(n) = limit {
            tail.push_str(&format!(" FETCH FIRST {n} ROWS ONLY"));
        }
        return Ok(format!("{ordered}{tail}"));
    }

    Ok(rownum_paginate(&ordered, skip, limit, ctx))
}

/// `ROWNUM`-based pagination for dialects without `FETCH FIRST`/`OFFSET`.
/// `ordered` must already carry any `ORDER BY` the caller needs, since
/// `ROWNUM` is assigned before ordering is otherwise guaranteed.
fn rownum_paginate(ordered: &str, skip: Option<u64>, limit: Option<u64>, ctx: &mut RenderContext) -> String {
    let d = ctx.identifier(DATA_COLUMN);
    match (skip, limit) {
        (None, None) => ordered.to_string(),
        (None, Some(n)) => {
            let alias = ctx.next_alias("rn");
            format!("SELECT {alias}.{d} AS {d} FROM ({ordered}) {alias} WHERE ROWNUM <= {n}")
        }
        (Some(s), limit) => {
            let inner_alias = ctx.next_alias("rn");
            let outer_alias = ctx.next_alias("rn");
            let upper = match limit {
                Some(n) => format!(" WHERE ROWNUM <= {}", s + n),
                None => String::new(),
            };
            format!(
                "SELECT {outer_alias}.{d} AS {d} FROM (SELECT {inner_alias}.{d} AS {d}, ROWNUM rn_seq FROM ({ordered}) {inner_alias}{upper}) {outer_alias} WHERE {outer_alias}.rn_seq > {s}"
            )
        }
    }
}

fn render_group_key_expr(id: &GroupId, ctx: &mut RenderContext) -> Result<(String, Vec<String>)> {
    match id {
        GroupId::Single(e) => {
            let sql = render_value_expr(e, ctx)?;
            Ok((format!("'_id' VALUE {sql}"), vec![sql]))
        }
        GroupId::Compound(fields) => {
            let mut obj_parts = Vec::with_capacity(fields.len());
            let mut group_by = Vec::with_capacity(fields.len());
            for (key, e) in fields {
                let sql = render_value_expr(e, ctx)?;
                obj_parts.push(format!("'{key}' VALUE {sql}"));
                group_by.push(sql);
            }
            let id_obj = format!("JSON_OBJECT({})", obj_parts.join(", "));
            Ok((format!("'_id' VALUE {id_obj} FORMAT JSON"), group_by))
        }
    }
}

pub fn render_group(prev_sql: &str, id: &GroupId, accumulators: &OMap<Expr>, ctx: &mut RenderContext) -> Result<String> {
    let alias = enter(ctx, "g");
    let d = ctx.identifier(DATA_COLUMN);
    let (id_field, group_by) = render_group_key_expr(id, ctx)?;

    let mut select_parts = vec![id_field];
    for (key, acc) in accumulators {
        let sql = render_expr(acc, ctx)?;
        select_parts.push(format!("'{key}' VALUE {sql}"));
    }
    let new_data = format!("JSON_OBJECT({})", select_parts.join(", "));
    let group_by_clause = if group_by.is_empty() {
        String::new()
    } else {
        format!(" GROUP BY {}", group_by.join(", "))
    };
    Ok(format!(
        "SELECT {new_data} AS {d} FROM ({prev_sql}) {alias}{group_by_clause}"
    ))
}

pub fn render_count(prev_sql: &str, field: &str, ctx: &mut RenderContext) -> Result<String> {
    let alias = enter(ctx, "c");
    let d = ctx.identifier(DATA_COLUMN);
    Ok(format!(
        "SELECT JSON_OBJECT('{field}' VALUE COUNT(*)) AS {d} FROM ({prev_sql}) {alias}"
    ))
}

pub fn render_sample(prev_sql: &str, size: u64, ctx: &mut RenderContext) -> Result<String> {
    let alias = enter(ctx, "smp");
    let d = ctx.identifier(DATA_COLUMN);
    let shuffled = format!("SELECT {alias}.{d} AS {d} FROM ({prev_sql}) {alias} ORDER BY DBMS_RANDOM.VALUE");
    if ctx.dialect().supports_fetch_first() {
        return Ok(format!("{shuffled} FETCH FIRST {size} ROWS ONLY"));
    }
    Ok(rownum_paginate(&shuffled, None, Some(size), ctx))
}

pub fn render_redact(prev_sql: &str, expr: &Expr, ctx: &mut RenderContext) -> Result<String> {
    // `$redact` determines keep/drop per document from an expression; we
    // support the common boolean-keep-predicate form.
    let alias = enter(ctx, "r");
    let d = ctx.identifier(DATA_COLUMN);
    let cond_sql = render_expr(expr, ctx)?;
    let cond = truthy(expr, cond_sql);
    Ok(format!(
        "SELECT {alias}.{d} AS {d} FROM ({prev_sql}) {alias} WHERE {cond}"
    ))
}

pub fn render_replace_root(prev_sql: &str, new_root: &Expr, ctx: &mut RenderContext) -> Result<String> {
    let alias = enter(ctx, "rr");
    let d = ctx.identifier(DATA_COLUMN);
    let new_data = render_doc_expr(new_root, ctx)?;
    Ok(format!("SELECT {new_data} AS {d} FROM ({prev_sql}) {alias}"))
}

pub fn render_unwind(
    prev_sql: &str,
    path: &[String],
    include_array_index: Option<&str>,
    preserve_null_and_empty_arrays: bool,
    ctx: &mut RenderContext,
) -> Result<String> {
    let alias = enter(ctx, "u");
    let jt_alias = ctx.next_alias("jt");
    let d = ctx.identifier(DATA_COLUMN);
    let dotted = path.join(".");
    let array_path_bound = ctx.bind(Json::String(format!("$.{dotted}[*]")));
    let base_doc = base_data(ctx);
    let field_path_bound = ctx.bind(Json::String(format!("$.{dotted}")));
    let idx_col = match include_array_index {
        Some(name) => format!(", '{name}' VALUE {jt_alias}.idx"),
        None => String::new(),
    };
    let patch = format!(
        "JSON_MERGEPATCH({base_doc}, JSON_OBJECT('{dotted}' VALUE {jt_alias}.elem FORMAT JSON{idx_col}))"
    );
    let join_kind = if preserve_null_and_empty_arrays { "LEFT JOIN" } else { "JOIN" };
    Ok(format!(
        "SELECT {patch} AS {d} FROM ({prev_sql}) {alias} {join_kind} JSON_TABLE({base_doc}, {array_path_bound} \
         COLUMNS (idx FOR ORDINALITY, elem VARCHAR2(4000) PATH '$')) {jt_alias} ON JSON_EXISTS({base_doc}, {field_path_bound})"
    ))
}

pub fn render_lookup(
    prev_sql: &str,
    from: &str,
    kind: &LookupKind,
    as_field: &str,
    schema_prefix: &str,
    ctx: &mut RenderContext,
) -> Result<String> {
    let alias = enter(ctx, "l");
    let d = ctx.identifier(DATA_COLUMN);
    let foreign_alias = ctx.next_alias("f");

    match kind {
        LookupKind::Equality { local, foreign } => {
            let local_path = ctx.bind(Json::String(format!("$.{local}")));
            let local_doc = base_data(ctx);
            let local_val = format!("JSON_VALUE({local_doc}, {local_path})");
            let foreign_path = ctx.bind(Json::String(format!("$.{foreign}")));
            let foreign_val = format!(
                "JSON_VALUE({foreign_alias}.{d}, {foreign_path})",
            );
            let matches = format!(
                "(SELECT JSON_ARRAYAGG({foreign_alias}.{d}) FROM {schema_prefix}{from} {foreign_alias} \
                 WHERE {foreign_val} = {local_val})"
            );
            let new_data = format!(
                "JSON_MERGEPATCH({local_doc}, JSON_OBJECT('{as_field}' VALUE NVL({matches}, JSON_ARRAY())))"
            );
            Ok(format!("SELECT {new_data} AS {d} FROM ({prev_sql}) {alias}"))
        }
        LookupKind::Pipeline { r#let, sub_pipeline } => {
            if !r#let.is_empty() {
                return Err(Error::translation(
                    "$lookup with `let` bindings into a sub-pipeline is not supported",
                ));
            }
            let base_sql = format!("SELECT {d} FROM {schema_prefix}{from}", d = ctx.identifier(DATA_COLUMN));
            let sub_sql = crate::compiler::compile_stage_chain(&base_sql, sub_pipeline, ctx)?;
            let local_doc = base_data(ctx);
            let matches = format!(
                "(SELECT JSON_ARRAYAGG({d}) FROM ({sub_sql}))",
                d = ctx.identifier(DATA_COLUMN)
            );
            let new_data = format!(
                "JSON_MERGEPATCH({local_doc}, JSON_OBJECT('{as_field}' VALUE NVL({matches}, JSON_ARRAY())))"
            );
            Ok(format!("SELECT {new_data} AS {d} FROM ({prev_sql}) {alias}"))
        }
    }
}

pub fn render_union_with(
    prev_sql: &str,
    from: &str,
    sub_pipeline: &[Stage],
    schema_prefix: &str,
    ctx: &mut RenderContext,
) -> Result<String> {
    let d = ctx.identifier(DATA_COLUMN);
    let base_sql = format!("SELECT {d} FROM {schema_prefix}{from}");
    let branch_sql = crate::compiler::compile_stage_chain(&base_sql, sub_pipeline, ctx)?;
    Ok(format!("{prev_sql} UNION ALL {branch_sql}"))
}

fn bucket_case_ladder(group_by_sql: &str, boundaries: &[Json], default: Option<&Json>, ctx: &mut RenderContext) -> String {
    let mut sql = String::from("(CASE");
    for w in boundaries.windows(2) {
        let lo = ctx.bind(w[0].clone());
        let hi = ctx.bind(w[1].clone());
        let label = ctx.bind(w[0].clone());
        sql.push_str(&format!(
            " WHEN {group_by_sql} >= {lo} AND {group_by_sql} < {hi} THEN {label}"
        ));
    }
    if let Some(d) = default {
        let d_sql = ctx.bind(d.clone());
        sql.push_str(&format!(" ELSE {d_sql}"));
    }
    sql.push_str(" END)");
    sql
}

pub fn render_bucket(
    prev_sql: &str,
    group_by: &Expr,
    boundaries: &[Json],
    default: Option<&Json>,
    output: &OMap<Expr>,
    ctx: &mut RenderContext,
) -> Result<String> {
    let alias = enter(ctx, "bk");
    let d = ctx.identifier(DATA_COLUMN);
    let group_by_sql = render_value_expr(group_by, ctx)?;
    let bucket_id_sql = bucket_case_ladder(&group_by_sql, boundaries, default, ctx);

    let mut select_parts = vec![format!("'_id' VALUE {bucket_id_sql}")];
    for (key, acc) in output {
        let sql = render_expr(acc, ctx)?;
        select_parts.push(format!("'{key}' VALUE {sql}"));
    }
    let new_data = format!("JSON_OBJECT({})", select_parts.join(", "));
    Ok(format!(
        "SELECT {new_data} AS {d} FROM ({prev_sql}) {alias} GROUP BY {bucket_id_sql}"
    ))
}

pub fn render_bucket_auto(
    prev_sql: &str,
    group_by: &Expr,
    n_buckets: u64,
    output: &OMap<Expr>,
    ctx: &mut RenderContext,
) -> Result<String> {
    let alias = enter(ctx, "ba");
    let d = ctx.identifier(DATA_COLUMN);
    let group_by_sql = render_value_expr(group_by, ctx)?;
    let bucket_no = format!("NTILE({n_buckets}) OVER (ORDER BY {group_by_sql})");
    let inner = format!("SELECT {alias}.{d} AS {d}, {bucket_no} AS bucket_no FROM ({prev_sql}) {alias}");

    // NTILE is a window function, so bucketing happens in a layer
    // underneath the GROUP BY that aggregates per-bucket output.
    let bucketed_alias = ctx.next_alias("bap");
    ctx.set_base_alias(bucketed_alias.clone());

    let mut select_parts = vec![format!("'_id' VALUE {bucketed_alias}.bucket_no")];
    for (key, acc) in output {
        let sql = render_expr(acc, ctx)?;
        select_parts.push(format!("'{key}' VALUE {sql}"));
    }
    let new_data = format!("JSON_OBJECT({})", select_parts.join(", "));
    Ok(format!(
        "SELECT {new_data} AS {d} FROM ({inner}) {bucketed_alias} GROUP BY {bucketed_alias}.bucket_no"
    ))
}

pub fn render_facet(prev_sql: &str, branches: &OMap<Vec<Stage>>, ctx: &mut RenderContext) -> Result<String> {
    let d = ctx.identifier(DATA_COLUMN);
    let mut parts = Vec::with_capacity(branches.len());
    for (key, stages) in branches {
        let branch_sql = crate::compiler::compile_stage_chain(prev_sql, stages, ctx)?;
        parts.push(format!(
            "'{key}' VALUE (SELECT JSON_ARRAYAGG({d}) FROM ({branch_sql})) FORMAT JSON"
        ));
    }
    Ok(format!("SELECT JSON_OBJECT({}) AS {d} FROM DUAL", parts.join(", ")))
}

fn render_window_bound_frame(spec: &WindowSpec) -> String {
    let kind = match spec.unit {
        WindowUnit::Documents => "ROWS",
        WindowUnit::Range => "RANGE",
    };
    let bound = |b: &WindowBound, is_from: bool| -> String {
        match b {
            WindowBound::Unbounded => format!("UNBOUNDED {}", if is_from { "PRECEDING" } else { "FOLLOWING" }),
            WindowBound::Current => "CURRENT ROW".to_string(),
            WindowBound::Offset(n) if *n < 0 => format!("{} PRECEDING", -n),
            WindowBound::Offset(n) => format!("{n} FOLLOWING"),
        }
    };
    format!(
        "{kind} BETWEEN {} AND {}",
        bound(&spec.from, true),
        bound(&spec.to, false)
    )
}

pub fn render_set_window_fields(
    prev_sql: &str,
    partition_by: Option<&Expr>,
    sort_by: &[(String, SortDirection)],
    output: &OMap<WindowField>,
    ctx: &mut RenderContext,
) -> Result<String> {
    let alias = enter(ctx, "w");
    let d = ctx.identifier(DATA_COLUMN);

    let partition_clause = match partition_by {
        Some(e) => format!(" PARTITION BY {}", render_value_expr(e, ctx)?),
        None => String::new(),
    };
    let order_clause = if sort_by.is_empty() {
        String::new()
    } else {
        let keys = sort_by
            .iter()
            .map(|(field, dir)| {
                let fp = Expr::FieldPath(FieldPath::new(field.split('.').map(str::to_string).collect()));
                let sql = render_expr(&fp, ctx)?;
                let dir_sql = match dir {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                Ok(format!("{sql} {dir_sql}"))
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        format!(" ORDER BY {keys}")
    };

    // Each output field is an analytic (windowed) form of its accumulator:
    // the same aggregate function name as `$group` uses, reused with an
    // `OVER` clause rather than a `GROUP BY`.
    let mut field_parts = Vec::with_capacity(output.len());
    for (key, field) in output {
        let frame = field
            .spec
            .as_ref()
            .map(render_window_bound_frame)
            .map(|f| format!(" {f}"))
            .unwrap_or_default();
        let agg = match field.op {
            Expr::Accumulator {
                op: AccumulatorOp::First,
                arg: Some(ref arg),
            } => format!("FIRST_VALUE({})", render_value_expr(arg, ctx)?),
            Expr::Accumulator {
                op: AccumulatorOp::Last,
                arg: Some(ref arg),
            } => format!("LAST_VALUE({})", render_value_expr(arg, ctx)?),
            Expr::RankFn(RankFn::Rank) => "RANK()".to_string(),
            Expr::RankFn(RankFn::DenseRank) => "DENSE_RANK()".to_string(),
            Expr::RankFn(RankFn::DocumentNumber) => "ROW_NUMBER()".to_string(),
            ref other => render_expr(other, ctx)?,
        };
        field_parts.push(format!(
            "'{key}' VALUE {agg} OVER ({partition_clause}{order_clause}{frame})"
        ));
    }
    let patch = format!("JSON_OBJECT({})", field_parts.join(", "));
    let new_data = format!("JSON_MERGEPATCH({}, {patch})", base_data(ctx));
    Ok(format!("SELECT {new_data} AS {d} FROM ({prev_sql}) {alias}"))
}

#[allow(clippy::too_many_arguments)]
pub fn render_graph_lookup(
    prev_sql: &str,
    from: &str,
    start_with: &Expr,
    connect_from_field: &str,
    connect_to_field: &str,
    as_field: &str,
    max_depth: Option<u64>,
    depth_field: Option<&str>,
    restrict_search_with_match: Option<&Expr>,
    schema_prefix: &str,
    ctx: &mut RenderContext,
) -> Result<String> {
    let seed_cte = format!("graph_{as_field}_seed");
    let rec_cte = format!("graph_{as_field}");

    let seed_alias = enter(ctx, "s");
    let row_id_sql = "ROW_NUMBER() OVER (ORDER BY NULL)".to_string();
    let root_data_sql = base_data(ctx);
    let seed_body = format!(
        "SELECT {root_data_sql} AS root_data, {row_id_sql} AS root_id FROM ({prev_sql}) {seed_alias}"
    );
    ctx.push_cte(seed_cte.clone(), seed_body);

    let anchor_root_alias = ctx.next_alias("sr");
    ctx.set_base_alias(anchor_root_alias.clone());
    let start_with_sql = render_expr(start_with, ctx)?;

    let match_alias = ctx.next_alias("gm");
    ctx.set_base_alias(match_alias.clone());
    let to_path_bound = ctx.bind(Json::String(format!("$.{connect_to_field}")));
    let to_value_sql = format!("JSON_VALUE({}, {to_path_bound})", base_data(ctx));
    let restrict_sql = match restrict_search_with_match {
        Some(e) => {
            let cond = render_expr(e, ctx)?;
            format!(" AND {}", truthy(e, cond))
        }
        None => String::new(),
    };
    let anchor = format!(
        "SELECT {anchor_root_alias}.root_id AS root_id, {anchor_root_alias}.root_data AS root_data, \
         {match_alias}.{d} AS matched_data, 1 AS depth \
         FROM {seed_cte} {anchor_root_alias} JOIN {schema_prefix}{from} {match_alias} \
         ON {to_value_sql} = {start_with_sql}{restrict_sql}",
        d = ctx.identifier(DATA_COLUMN),
    );

    let prior_alias = ctx.next_alias("gp");
    let next_alias = ctx.next_alias("gn");
    ctx.set_base_alias(next_alias.clone());
    let next_to_path_bound = ctx.bind(Json::String(format!("$.{connect_to_field}")));
    let next_to_value_sql = format!("JSON_VALUE({}, {next_to_path_bound})", base_data(ctx));
    ctx.set_base_alias(prior_alias.clone());
    let from_path_bound = ctx.bind(Json::String(format!("$.{connect_from_field}")));
    let prior_from_value_sql = format!("JSON_VALUE({prior_alias}.matched_data, {from_path_bound})");
    let depth_guard = match max_depth {
        Some(n) => format!(" WHERE {prior_alias}.depth < {}", n + 1),
        None => String::new(),
    };
    ctx.set_base_alias(next_alias.clone());
    let restrict_recursive_sql = match restrict_search_with_match {
        Some(e) => {
            let cond = render_expr(e, ctx)?;
            format!(" AND {}", truthy(e, cond))
        }
        None => String::new(),
    };
    let recursive = format!(
        "SELECT {prior_alias}.root_id, {prior_alias}.root_data, {next_alias}.{d} AS matched_data, {prior_alias}.depth + 1 \
         FROM {rec_cte} {prior_alias} JOIN {schema_prefix}{from} {next_alias} \
         ON {next_to_value_sql} = {prior_from_value_sql}{restrict_recursive_sql}{depth_guard}",
        d = ctx.identifier(DATA_COLUMN),
    );

    ctx.push_cte(
        rec_cte.clone(),
        format!("SELECT * FROM ({anchor}) UNION ALL SELECT * FROM ({recursive})"),
    );

    let g_alias = ctx.next_alias("g");
    let x_alias = ctx.next_alias("x");
    let matched_with_depth = match depth_field {
        Some(field) => format!(
            "JSON_MERGEPATCH({x_alias}.matched_data, JSON_OBJECT('{field}' VALUE {x_alias}.depth - 1))"
        ),
        None => format!("{x_alias}.matched_data"),
    };
    let d = ctx.identifier(DATA_COLUMN);
    let new_data = format!(
        "JSON_MERGEPATCH({g_alias}.root_data, JSON_OBJECT('{as_field}' VALUE NVL((SELECT JSON_ARRAYAGG({matched_with_depth}) \
         FROM {rec_cte} {x_alias} WHERE {x_alias}.root_id = {g_alias}.root_id), JSON_ARRAY()) FORMAT JSON))"
    );
    ctx.set_base_alias(g_alias.clone());
    Ok(format!(
        "SELECT {new_data} AS {d} FROM {seed_cte} {g_alias}"
    ))
}

pub fn render_merge(
    prev_sql: &str,
    target: &str,
    on_fields: &[String],
    when_matched: &MergeWhenMatched,
    when_not_matched: &MergeWhenNotMatched,
    schema_prefix: &str,
    ctx: &mut RenderContext,
) -> Result<String> {
    let src_alias = ctx.next_alias("src");
    let tgt_alias = ctx.next_alias("tgt");
    let d = ctx.identifier(DATA_COLUMN);

    let on_clause = if on_fields.is_empty() {
        format!("{tgt_alias}.{d} = {src_alias}.{d}")
    } else {
        let mut parts = Vec::with_capacity(on_fields.len());
        for f in on_fields {
            let path_bound = ctx.bind(Json::String(format!("$.{f}")));
            parts.push(format!(
                "JSON_VALUE({tgt_alias}.{d}, {path_bound}) = JSON_VALUE({src_alias}.{d}, {path_bound})"
            ));
        }
        parts.join(" AND ")
    };

    let matched_clause = match when_matched {
        MergeWhenMatched::Replace => format!(
            "WHEN MATCHED THEN UPDATE SET {tgt_alias}.{d} = {src_alias}.{d}"
        ),
        MergeWhenMatched::Merge => format!(
            "WHEN MATCHED THEN UPDATE SET {tgt_alias}.{d} = JSON_MERGEPATCH({tgt_alias}.{d}, {src_alias}.{d})"
        ),
        MergeWhenMatched::Keep => String::new(),
        MergeWhenMatched::Fail => String::new(),
    };
    let not_matched_clause = match when_not_matched {
        MergeWhenNotMatched::Insert => format!("WHEN NOT MATCHED THEN INSERT ({d}) VALUES ({src_alias}.{d})"),
        MergeWhenNotMatched::Discard | MergeWhenNotMatched::Fail => String::new(),
    };

    Ok(format!(
        "MERGE INTO {schema_prefix}{target} {tgt_alias} USING ({prev_sql}) {src_alias} ON ({on_clause}) {matched_clause} {not_matched_clause}"
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sql::dialect::Dialect;
    use crate::sql::OracleJson;

    #[derive(Debug, Clone, Copy)]
    struct NoFetchFirst;

    impl Dialect for NoFetchFirst {
        fn name(&self) -> &'static str {
            "no_fetch_first"
        }
        fn supports_fetch_first(&self) -> bool {
            false
        }
    }

    fn base_select(ctx: &mut RenderContext) -> String {
        let d = ctx.identifier(DATA_COLUMN);
        format!("SELECT base.{d} AS {d} FROM orders base")
    }

    #[test]
    fn skip_and_limit_use_offset_fetch_when_supported() {
        let dialect = OracleJson;
        let mut ctx = RenderContext::new(&dialect, "base", "", true);
        let base = base_select(&mut ctx);
        let sql = render_sort_skip_limit(&base, None, Some(10), Some(5), &mut ctx).unwrap();
        assert!(sql.contains("OFFSET 10 ROWS FETCH FIRST 5 ROWS ONLY"), "{sql}");
    }

    #[test]
    fn skip_and_limit_fall_back_to_rownum_pagination() {
        let dialect = NoFetchFirst;
        let mut ctx = RenderContext::new(&dialect, "base", "", true);
        let base = base_select(&mut ctx);
        let sql = render_sort_skip_limit(&base, None, Some(10), Some(5), &mut ctx).unwrap();
        assert!(!sql.contains("FETCH FIRST"), "{sql}");
        assert!(sql.contains("ROWNUM <= 15"), "{sql}");
        assert!(sql.contains("rn_seq > 10"), "{sql}");
    }

    #[test]
    fn limit_only_falls_back_to_a_single_rownum_bound() {
        let dialect = NoFetchFirst;
        let mut ctx = RenderContext::new(&dialect, "base", "", true);
        let base = base_select(&mut ctx);
        let sql = render_sort_skip_limit(&base, None, None, Some(5), &mut ctx).unwrap();
        assert!(sql.contains("ROWNUM <= 5"), "{sql}");
        assert!(!sql.contains("rn_seq"), "{sql}");
    }
}
