//! End-to-end snapshots: pipeline JSON in, compiled SQL out.

use aggsql::{translate, Config};
use insta::assert_snapshot;
use serde_json::json;

fn compile(collection: &str, stages: serde_json::Value) -> String {
    let out = translate(collection, &stages, &Config::default()).unwrap();
    out.sql
}

fn compile_with(collection: &str, stages: serde_json::Value, config: &Config) -> aggsql::CompileOutput {
    translate(collection, &stages, config).unwrap()
}

#[test]
fn empty_pipeline() {
    let sql = compile("orders", json!([]));
    assert_snapshot!(sql, @"SELECT base.DATA AS DATA FROM orders base");
}

#[test]
fn skip_then_limit_fuses_into_one_offset_fetch() {
    let sql = compile("orders", json!([{ "$skip": 10 }, { "$limit": 5 }]));
    assert!(sql.contains("OFFSET 10 ROWS FETCH FIRST 5 ROWS ONLY"), "{sql}");
}

#[test]
fn consecutive_matches_fuse_into_one_where_with_sequential_binds() {
    let out = compile_with(
        "orders",
        json!([
            { "$match": { "status": "active" } },
            { "$match": { "amount": { "$gt": 100 } } },
        ]),
        &Config::default(),
    );
    assert_eq!(out.sql.matches("WHERE").count(), 1);
    assert!(out.sql.contains("AND"));
    assert_eq!(
        out.binds,
        vec![json!("$.status"), json!("active"), json!("$.amount"), json!(100)]
    );
}

#[test]
fn group_with_sort_and_limit_keeps_canonical_clause_order() {
    let sql = compile(
        "orders",
        json!([
            { "$match": { "status": "active" } },
            { "$group": { "_id": "$category", "total": { "$sum": "$amount" } } },
            { "$sort": { "total": -1 } },
            { "$limit": 10 },
        ]),
    );
    let where_pos = sql.find("WHERE").unwrap();
    let group_pos = sql.find("GROUP BY").unwrap();
    let order_pos = sql.find("ORDER BY").unwrap();
    let fetch_pos = sql.find("FETCH FIRST").unwrap();
    assert!(where_pos < group_pos, "{sql}");
    assert!(group_pos < order_pos, "{sql}");
    assert!(order_pos < fetch_pos, "{sql}");
}

#[test]
fn graph_lookup_emits_a_depth_bounded_recursive_cte() {
    let sql = compile(
        "orders",
        json!([{
            "$graphLookup": {
                "from": "employees",
                "startWith": "$reportsTo",
                "connectFromField": "reportsTo",
                "connectToField": "name",
                "as": "hierarchy",
                "maxDepth": 5,
                "depthField": "level",
            }
        }]),
    );
    assert!(sql.starts_with("WITH"), "{sql}");
    assert!(sql.contains("graph_hierarchy"), "{sql}");
    assert!(sql.contains("UNION ALL"), "{sql}");
    assert!(sql.contains("depth < 6"), "{sql}");
}

#[test]
fn facet_assembles_one_json_object_from_scalar_subqueries() {
    let sql = compile(
        "orders",
        json!([{
            "$facet": {
                "byStatus": [{ "$group": { "_id": "$status", "n": { "$sum": 1 } } }],
                "total": [{ "$count": "n" }],
            }
        }]),
    );
    assert!(sql.matches("SELECT").count() >= 3, "{sql}");
    assert!(sql.contains("JSON_OBJECT"), "{sql}");
    assert!(sql.to_uppercase().contains("FROM DUAL") || sql.contains("DUAL"), "{sql}");
}

#[test]
fn post_window_match_wraps_in_an_outer_select() {
    let sql = compile(
        "employees",
        json!([
            {
                "$setWindowFields": {
                    "partitionBy": "$department",
                    "sortBy": { "salary": -1 },
                    "output": { "salaryRank": { "$rank": {} } }
                }
            },
            { "$match": { "salaryRank": 1 } },
        ]),
    );
    assert!(sql.contains("RANK() OVER"), "{sql}");
    let match_pos = sql.rfind("WHERE").unwrap();
    let rank_pos = sql.find("RANK() OVER").unwrap();
    assert!(rank_pos < match_pos, "{sql}");
}

#[test]
fn inline_literals_mode_leaves_binds_empty() {
    let config = Config::default().with_inline_literals(true);
    let out = compile_with("orders", json!([{ "$match": { "status": "active" } }]), &config);
    assert!(out.binds.is_empty());
    assert!(out.sql.contains("'active'"), "{}", out.sql);
}

#[test]
fn schema_prefix_qualifies_the_base_collection() {
    let config = Config::default().with_schema("sales");
    let out = compile_with("orders", json!([]), &config);
    assert!(out.sql.contains("FROM sales.orders"), "{}", out.sql);
}

#[test]
fn unknown_stage_is_a_translation_error() {
    let err = translate("orders", &json!([{ "$bogus": {} }]), &Config::default()).unwrap_err();
    assert!(matches!(err.reason(), aggsql::Reason::UnsupportedOperator(_)));
}

#[test]
fn match_against_null_rewrites_to_is_null() {
    let sql = compile("orders", json!([{ "$match": { "status": null } }]));
    assert!(sql.contains("IS NULL"), "{sql}");
    assert!(!sql.contains("= NULL") && !sql.contains("=NULL"), "{sql}");
}

#[test]
fn ne_null_rewrites_to_is_not_null() {
    let sql = compile("orders", json!([{ "$match": { "_id": { "$ne": null } } }]));
    assert!(sql.contains("IS NOT NULL"), "{sql}");
    assert!(!sql.contains("<> NULL"), "{sql}");
}

#[test]
fn unwind_adds_a_lateral_join() {
    let sql = compile("orders", json!([{ "$unwind": "$items" }]));
    assert!(sql.to_uppercase().contains("JSON_TABLE") || sql.to_uppercase().contains("LATERAL"), "{sql}");
}
