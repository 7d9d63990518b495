//! Executes a [`Plan`] against a [`DataSource`], producing the rows a
//! consumer ultimately sees.
//!
//! Rows carry fully-qualified `"alias.field"` keys while fetched and joined,
//! which lets expressions keep resolving source fields unambiguously even
//! after a `select` step has produced its own unqualified output row. Only
//! the final, post-`select` rows are unqualified.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;

use crate::ast::{JoinKind, Source};
use crate::error::QueryError;
use crate::expr::{evaluate, EvalContext};
use crate::planner::{Plan, PlanStep};

pub type Row = HashMap<String, Value>;

/// Supplies rows for a single `Source`. Implementations return rows keyed by
/// their own unqualified field names; the engine applies the source's alias
/// prefix.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, source: &Source) -> anyhow::Result<Vec<Row>>;
}

fn qualify(alias: &str, row: &Row) -> Row {
    row.iter().map(|(k, v)| (format!("{alias}.{k}"), v.clone())).collect()
}

/// A grouped bucket: one representative (first-seen) row plus every row
/// that shares its group key, for aggregate builtins to consult.
struct Group {
    representative: Row,
    members: Vec<Row>,
}

pub async fn execute(plan: &Plan, data_source: &dyn DataSource) -> Result<Vec<Row>, QueryError> {
    execute_with_params(plan, data_source, &HashMap::new()).await
}

pub async fn execute_with_params(
    plan: &Plan,
    data_source: &dyn DataSource,
    params: &HashMap<String, Value>,
) -> Result<Vec<Row>, QueryError> {
    let mut working: Vec<Row> = Vec::new();
    let mut groups: Option<Vec<Group>> = None;
    let mut output: Option<Vec<(Row, Row)>> = None;

    for step in &plan.steps {
        match step {
            PlanStep::Fetch { source } => {
                let rows = data_source.fetch(source).await?;
                working = rows.iter().map(|r| qualify(&source.alias, r)).collect();
            }

            PlanStep::Join { join } => {
                let right_rows: Vec<Row> = data_source
                    .fetch(&join.source)
                    .await?
                    .iter()
                    .map(|r| qualify(&join.source.alias, r))
                    .collect();
                working = apply_join(join.kind, &working, &right_rows, join.on.as_ref(), params)?;
            }

            PlanStep::Filter { predicate } => {
                let mut kept = Vec::with_capacity(working.len());
                for row in working.into_iter() {
                    let ctx = EvalContext::new(&row).with_params(params);
                    if as_bool(evaluate(predicate, &ctx)?) {
                        kept.push(row);
                    }
                }
                working = kept;
            }

            PlanStep::Group { keys } => {
                let mut buckets: Vec<Group> = Vec::new();
                let mut index: HashMap<String, usize> = HashMap::new();
                for row in working.iter() {
                    let ctx = EvalContext::new(row).with_params(params);
                    let mut key_parts = Vec::with_capacity(keys.len());
                    for key_expr in keys {
                        key_parts.push(evaluate(key_expr, &ctx)?);
                    }
                    let key = serde_json::to_string(&key_parts).unwrap_or_default();
                    match index.get(&key) {
                        Some(&pos) => buckets[pos].members.push(row.clone()),
                        None => {
                            index.insert(key, buckets.len());
                            buckets.push(Group {
                                representative: row.clone(),
                                members: vec![row.clone()],
                            });
                        }
                    }
                }
                groups = Some(buckets);
            }

            PlanStep::Having { predicate } => {
                let buckets = groups.take().unwrap_or_else(|| single_row_groups(&working));
                let mut kept = Vec::with_capacity(buckets.len());
                for group in buckets {
                    let ctx = EvalContext::with_group(&group.representative, &group.members).with_params(params);
                    if as_bool(evaluate(predicate, &ctx)?) {
                        kept.push(group);
                    }
                }
                groups = Some(kept);
            }

            PlanStep::Select { fields } => {
                let buckets = groups.take().unwrap_or_else(|| single_row_groups(&working));
                let mut rows = Vec::with_capacity(buckets.len());
                for group in buckets {
                    let ctx = EvalContext::with_group(&group.representative, &group.members).with_params(params);
                    let mut out: Row = HashMap::with_capacity(fields.len());
                    for field in fields {
                        out.insert(field.alias.clone(), evaluate(&field.expr, &ctx)?);
                    }
                    rows.push((group.representative, out));
                }
                output = Some(rows);
            }

            PlanStep::Distinct => {
                let rows = output.take().unwrap_or_default();
                let mut seen = HashSet::new();
                let mut deduped = Vec::with_capacity(rows.len());
                for (eval_row, out_row) in rows {
                    let canonical = canonical_key(&out_row);
                    if seen.insert(canonical) {
                        deduped.push((eval_row, out_row));
                    }
                }
                output = Some(deduped);
            }

            PlanStep::OrderBy { keys } => {
                let mut rows = output.take().unwrap_or_default();
                rows.sort_by(|(a, _), (b, _)| compare_rows(a, b, keys, params));
                output = Some(rows);
            }

            PlanStep::Limit { limit, offset } => {
                let rows = output.take().unwrap_or_default();
                let skip = offset.unwrap_or(0).max(0) as usize;
                let take = limit.map(|l| l.max(0) as usize);
                let sliced = match take {
                    Some(n) => rows.into_iter().skip(skip).take(n).collect(),
                    None => rows.into_iter().skip(skip).collect(),
                };
                output = Some(sliced);
            }
        }
    }

    Ok(output.unwrap_or_default().into_iter().map(|(_, out)| out).collect())
}

fn single_row_groups(working: &[Row]) -> Vec<Group> {
    working
        .iter()
        .map(|row| Group {
            representative: row.clone(),
            members: vec![row.clone()],
        })
        .collect()
}

fn apply_join(
    kind: JoinKind,
    left_rows: &[Row],
    right_rows: &[Row],
    on: Option<&crate::ast::Expression>,
    params: &HashMap<String, Value>,
) -> Result<Vec<Row>, QueryError> {
    let mut out = Vec::new();

    match kind {
        JoinKind::Cross => {
            for left in left_rows {
                for right in right_rows {
                    out.push(merge(left, right));
                }
            }
        }
        JoinKind::Inner => {
            let predicate = on.ok_or_else(|| QueryError::MissingOperand { op: "join.on".into() })?;
            for left in left_rows {
                for right in right_rows {
                    let merged = merge(left, right);
                    let ctx = EvalContext::new(&merged).with_params(params);
                    if as_bool(evaluate(predicate, &ctx)?) {
                        out.push(merged);
                    }
                }
            }
        }
        JoinKind::Left => {
            let predicate = on.ok_or_else(|| QueryError::MissingOperand { op: "join.on".into() })?;
            for left in left_rows {
                let mut matched = false;
                for right in right_rows {
                    let merged = merge(left, right);
                    let ctx = EvalContext::new(&merged).with_params(params);
                    if as_bool(evaluate(predicate, &ctx)?) {
                        out.push(merged);
                        matched = true;
                    }
                }
                if !matched {
                    out.push(left.clone());
                }
            }
        }
        JoinKind::Right => {
            let predicate = on.ok_or_else(|| QueryError::MissingOperand { op: "join.on".into() })?;
            for right in right_rows {
                let mut matched = false;
                for left in left_rows {
                    let merged = merge(left, right);
                    let ctx = EvalContext::new(&merged).with_params(params);
                    if as_bool(evaluate(predicate, &ctx)?) {
                        out.push(merged);
                        matched = true;
                    }
                }
                if !matched {
                    out.push(right.clone());
                }
            }
        }
    }

    Ok(out)
}

fn merge(left: &Row, right: &Row) -> Row {
    let mut merged = left.clone();
    merged.extend(right.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn canonical_key(row: &Row) -> String {
    let ordered: std::collections::BTreeMap<_, _> = row.iter().collect();
    serde_json::to_string(&ordered).unwrap_or_default()
}

fn compare_rows(a: &Row, b: &Row, keys: &[crate::ast::OrderByKey], params: &HashMap<String, Value>) -> std::cmp::Ordering {
    use crate::ast::{NullsOrder, SortDirection};
    use std::cmp::Ordering;

    for key in keys {
        let av = evaluate(&key.expr, &EvalContext::new(a).with_params(params)).unwrap_or(Value::Null);
        let bv = evaluate(&key.expr, &EvalContext::new(b).with_params(params)).unwrap_or(Value::Null);

        let ordering = match (av.is_null(), bv.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if key.nulls == NullsOrder::First {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if key.nulls == NullsOrder::First {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => value_ordering(&av, &bv),
        };

        let ordering = if key.direction == SortDirection::Desc {
            ordering.reverse()
        } else {
            ordering
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    std::cmp::Ordering::Equal
}

fn value_ordering(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Truthiness per the glossary's falsy set (`null`, `undefined`, `0`, `""`,
/// `false`); everything else, including an empty array or object, is truthy.
pub fn as_bool(value: Value) -> bool {
    match value {
        Value::Bool(b) => b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) => true,
        Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::planner::plan;

    struct StaticSource {
        rows_by_collection: HashMap<String, Vec<Row>>,
    }

    #[async_trait]
    impl DataSource for StaticSource {
        async fn fetch(&self, source: &Source) -> anyhow::Result<Vec<Row>> {
            Ok(self.rows_by_collection.get(&source.collection).cloned().unwrap_or_default())
        }
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn select_projects_qualified_fields_into_unqualified_aliases() {
        let mut rows_by_collection = HashMap::new();
        rows_by_collection.insert(
            "app.avaast.computed".to_string(),
            vec![row(&[("id", Value::String("1".into())), ("total", serde_json::json!(10))])],
        );
        let source = StaticSource { rows_by_collection };

        let query = Query {
            select: vec![SelectField {
                alias: "total".into(),
                expr: Expression::field("p", "total"),
            }],
            from: Source {
                alias: "p".into(),
                collection: "app.avaast.computed".into(),
                authority_id: None,
            },
            joins: vec![],
            where_: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: false,
        };

        let result = execute(&plan(&query), &source).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("total"), Some(&serde_json::json!(10)));
    }

    #[tokio::test]
    async fn left_join_keeps_unmatched_left_rows() {
        let mut rows_by_collection = HashMap::new();
        rows_by_collection.insert(
            "parents".to_string(),
            vec![row(&[("id", serde_json::json!(1))]), row(&[("id", serde_json::json!(2))])],
        );
        rows_by_collection.insert("children".to_string(), vec![row(&[("parentId", serde_json::json!(1))])]);
        let source = StaticSource { rows_by_collection };

        let query = Query {
            select: vec![
                SelectField {
                    alias: "parentId".into(),
                    expr: Expression::field("p", "id"),
                },
                SelectField {
                    alias: "childParent".into(),
                    expr: Expression::field("c", "parentId"),
                },
            ],
            from: Source {
                alias: "p".into(),
                collection: "parents".into(),
                authority_id: None,
            },
            joins: vec![Join {
                kind: JoinKind::Left,
                source: Source {
                    alias: "c".into(),
                    collection: "children".into(),
                    authority_id: None,
                },
                on: Some(Expression::Comparison {
                    op: ComparisonOp::Eq,
                    left: Box::new(Expression::field("p", "id")),
                    right: Some(Box::new(Expression::field("c", "parentId"))),
                }),
            }],
            where_: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: false,
        };

        let result = execute(&plan(&query), &source).await.unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.iter().any(|r| r.get("childParent") == Some(&Value::Null)));
    }

    #[tokio::test]
    async fn distinct_dedupes_by_canonical_output() {
        let mut rows_by_collection = HashMap::new();
        rows_by_collection.insert(
            "app.avaast.computed".to_string(),
            vec![
                row(&[("category", Value::String("a".into()))]),
                row(&[("category", Value::String("a".into()))]),
                row(&[("category", Value::String("b".into()))]),
            ],
        );
        let source = StaticSource { rows_by_collection };

        let query = Query {
            select: vec![SelectField {
                alias: "category".into(),
                expr: Expression::field("p", "category"),
            }],
            from: Source {
                alias: "p".into(),
                collection: "app.avaast.computed".into(),
                authority_id: None,
            },
            joins: vec![],
            where_: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: true,
        };

        let result = execute(&plan(&query), &source).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn as_bool_matches_the_glossary_falsy_set() {
        assert!(!as_bool(Value::Null));
        assert!(!as_bool(serde_json::json!(0)));
        assert!(!as_bool(Value::String(String::new())));
        assert!(!as_bool(Value::Bool(false)));
        assert!(as_bool(Value::Bool(true)));
        assert!(as_bool(serde_json::json!(-1)));
        assert!(as_bool(Value::String("0".into())));
        assert!(as_bool(serde_json::json!([])));
        assert!(as_bool(serde_json::json!({})));
    }
}
