//! Pipeline compiler: the single orchestrator that walks a `Pipeline` AST
//! and writes to one `RenderContext`, producing one SQL statement.
//!
//! Each stage becomes one more layer of derived-table wrapping around the
//! SQL text accumulated so far (`crate::sql::gen_stage`); this module's own
//! job is the cross-stage concerns a single stage can't see on its own:
//! fusing adjacent `$match` stages into one `WHERE`, fusing adjacent
//! `$sort`/`$skip`/`$limit` runs into one row-limiting clause, and hoisting
//! `$graphLookup`'s recursive CTEs into the statement's leading `WITH`.

use crate::ast::expr::{AccumulatorOp, Expr, LogicalOp, OMap};
use crate::ast::stage::{Pipeline, SortDirection, Stage, WindowField};
use crate::config::{CompileOutput, Config};
use crate::error::Result;
use crate::render::RenderContext;
use crate::sql::gen_expr::DATA_COLUMN;
use crate::sql::gen_stage;

/// Compiles `stages` against `base_sql` (anything that can appear inside
/// `FROM (...)`), sharing `ctx`'s bind register and alias counters. Used
/// both for a pipeline's top-level stage list and for the sub-pipelines of
/// `$lookup`, `$unionWith`, and `$facet`.
pub fn compile_stage_chain(base_sql: &str, stages: &[Stage], ctx: &mut RenderContext) -> Result<String> {
    let mut sql = base_sql.to_string();
    let mut i = 0;
    while i < stages.len() {
        match &stages[i] {
            Stage::Match(_) => {
                let mut exprs = Vec::new();
                let mut j = i;
                while let Some(Stage::Match(e)) = stages.get(j) {
                    exprs.push(e.clone());
                    j += 1;
                }
                log::debug!("fusing {} consecutive $match stage(s)", j - i);
                let fused = if exprs.len() == 1 {
                    exprs.into_iter().next().unwrap()
                } else {
                    Expr::Logical {
                        op: LogicalOp::And,
                        args: exprs,
                    }
                };
                sql = gen_stage::render_match(&sql, &fused, ctx)?;
                i = j;
            }
            Stage::Sort(_) | Stage::Skip(_) | Stage::Limit(_) => {
                let mut sort: Option<Vec<(Expr, SortDirection)>> = None;
                let mut skip: Option<u64> = None;
                let mut limit: Option<u64> = None;
                let mut j = i;
                loop {
                    match stages.get(j) {
                        Some(Stage::Sort(keys)) if sort.is_none() => {
                            sort = Some(keys.clone());
                            j += 1;
                        }
                        Some(Stage::Skip(n)) => {
                            skip = Some(skip.unwrap_or(0) + n);
                            j += 1;
                        }
                        Some(Stage::Limit(n)) => {
                            limit = Some(limit.map_or(*n, |m| m.min(*n)));
                            j += 1;
                        }
                        _ => break,
                    }
                }
                log::debug!("fusing sort/skip/limit run of {} stage(s)", j - i);
                sql = gen_stage::render_sort_skip_limit(&sql, sort.as_deref(), skip, limit, ctx)?;
                i = j;
            }
            other => {
                sql = render_single_stage(&sql, other, ctx)?;
                i += 1;
            }
        }
    }
    Ok(sql)
}

fn render_single_stage(prev_sql: &str, stage: &Stage, ctx: &mut RenderContext) -> Result<String> {
    let schema_prefix = ctx.schema_prefix().to_string();
    match stage {
        Stage::Match(_) | Stage::Sort(_) | Stage::Skip(_) | Stage::Limit(_) => {
            unreachable!("fused in compile_stage_chain")
        }
        Stage::Project(spec) => gen_stage::render_project(prev_sql, spec, ctx),
        Stage::Group { id, accumulators } => {
            if accumulators_use_first_last(accumulators) {
                log::warn!("$group accumulator uses $first/$last without an established sort order");
            }
            gen_stage::render_group(prev_sql, id, accumulators, ctx)
        }
        Stage::Lookup { from, kind, r#as } => gen_stage::render_lookup(prev_sql, from, kind, r#as, &schema_prefix, ctx),
        Stage::Unwind {
            path,
            include_array_index,
            preserve_null_and_empty_arrays,
        } => gen_stage::render_unwind(
            prev_sql,
            path,
            include_array_index.as_deref(),
            *preserve_null_and_empty_arrays,
            ctx,
        ),
        Stage::AddFields(fields) => gen_stage::render_add_fields(prev_sql, fields, ctx),
        Stage::UnionWith { from, sub_pipeline } => {
            gen_stage::render_union_with(prev_sql, from, sub_pipeline, &schema_prefix, ctx)
        }
        Stage::Bucket {
            group_by,
            boundaries,
            default,
            output,
        } => {
            if accumulators_use_first_last(output) {
                log::warn!("$bucket accumulator uses $first/$last without an established sort order");
            }
            gen_stage::render_bucket(prev_sql, group_by, boundaries, default.as_ref(), output, ctx)
        }
        Stage::BucketAuto {
            group_by,
            n_buckets,
            output,
            granularity: _,
        } => {
            if accumulators_use_first_last(output) {
                log::warn!("$bucketAuto accumulator uses $first/$last without an established sort order");
            }
            gen_stage::render_bucket_auto(prev_sql, group_by, *n_buckets, output, ctx)
        }
        Stage::Facet(branches) => gen_stage::render_facet(prev_sql, branches, ctx),
        Stage::SetWindowFields {
            partition_by,
            sort_by,
            output,
        } => {
            if window_output_uses_first_last(output) && sort_by.is_empty() {
                log::warn!("$setWindowFields uses $first/$last with no sortBy");
            }
            gen_stage::render_set_window_fields(prev_sql, partition_by.as_ref(), sort_by, output, ctx)
        }
        Stage::GraphLookup {
            from,
            start_with,
            connect_from_field,
            connect_to_field,
            r#as,
            max_depth,
            depth_field,
            restrict_search_with_match,
        } => {
            if max_depth.is_none() {
                log::debug!("$graphLookup `{as_field}` has no maxDepth; recursive CTE has no depth guard", as_field = r#as);
            }
            gen_stage::render_graph_lookup(
                prev_sql,
                from,
                start_with,
                connect_from_field,
                connect_to_field,
                r#as,
                *max_depth,
                depth_field.as_deref(),
                restrict_search_with_match.as_ref(),
                &schema_prefix,
                ctx,
            )
        }
        Stage::Count(field) => gen_stage::render_count(prev_sql, field, ctx),
        Stage::Sample(size) => gen_stage::render_sample(prev_sql, *size, ctx),
        Stage::Redact(expr) => gen_stage::render_redact(prev_sql, expr, ctx),
        Stage::ReplaceRoot(expr) => gen_stage::render_replace_root(prev_sql, expr, ctx),
        Stage::Merge {
            target,
            on_fields,
            when_matched,
            when_not_matched,
        } => gen_stage::render_merge(prev_sql, target, on_fields, when_matched, when_not_matched, &schema_prefix, ctx),
    }
}

fn is_first_or_last(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Accumulator {
            op: AccumulatorOp::First | AccumulatorOp::Last,
            ..
        }
    )
}

fn accumulators_use_first_last(accumulators: &OMap<Expr>) -> bool {
    accumulators.values().any(is_first_or_last)
}

fn window_output_uses_first_last(output: &OMap<WindowField>) -> bool {
    output.values().any(|f| is_first_or_last(&f.op))
}

/// Compiles a full pipeline into a single SQL statement, per `config`.
pub fn compile(pipeline: &Pipeline, config: &Config) -> Result<CompileOutput> {
    let dialect = config.dialect.as_ref();
    let mut ctx = RenderContext::new(dialect, config.base_alias.clone(), config.schema_prefix(), config.inline_literals);
    let d = ctx.identifier(DATA_COLUMN);
    let base_sql = format!(
        "SELECT {alias}.{d} AS {d} FROM {schema}{coll} {alias}",
        alias = config.base_alias,
        schema = config.schema_prefix(),
        coll = pipeline.collection,
    );
    log::debug!(
        "compiling pipeline over collection `{}`, {} stage(s), dialect `{}`",
        pipeline.collection,
        pipeline.stages.len(),
        dialect.name(),
    );
    let body = compile_stage_chain(&base_sql, &pipeline.stages, &mut ctx)?;

    let sql = if ctx.ctes().is_empty() {
        body
    } else {
        let with_parts: Vec<String> = ctx
            .ctes()
            .iter()
            .map(|(name, cte_body)| format!("{name} AS ({cte_body})"))
            .collect();
        format!("WITH {} {body}", with_parts.join(", "))
    };

    Ok(CompileOutput {
        sql,
        binds: ctx.into_binds(),
    })
}
