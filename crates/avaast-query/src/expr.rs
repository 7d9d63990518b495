//! Evaluates [`Expression`] trees against a row (and, for aggregates, the
//! group's member bag).

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::ast::{ArithmeticOpKind, ComparisonOp, Expression, LogicalOpKind};
use crate::engine::Row;
use crate::error::QueryError;

const PARAMS_SOURCE: &str = "$params";

fn empty_params() -> &'static HashMap<String, Value> {
    static EMPTY: OnceLock<HashMap<String, Value>> = OnceLock::new();
    EMPTY.get_or_init(HashMap::new)
}

/// The row under evaluation, plus the bag of sibling rows sharing its group
/// key when evaluating inside a `groupBy`/`having` step (aggregates read the
/// bag; everything else reads only `row`), plus the caller-supplied query
/// parameters a `fieldRef` may address via the `$params` source alias.
pub struct EvalContext<'a> {
    pub row: &'a Row,
    pub group_members: Option<&'a [Row]>,
    pub params: &'a HashMap<String, Value>,
}

impl<'a> EvalContext<'a> {
    pub fn new(row: &'a Row) -> Self {
        Self {
            row,
            group_members: None,
            params: empty_params(),
        }
    }

    pub fn with_group(row: &'a Row, group_members: &'a [Row]) -> Self {
        Self {
            row,
            group_members: Some(group_members),
            params: empty_params(),
        }
    }

    pub fn with_params(mut self, params: &'a HashMap<String, Value>) -> Self {
        self.params = params;
        self
    }
}

pub fn evaluate(expr: &Expression, ctx: &EvalContext<'_>) -> Result<Value, QueryError> {
    match expr {
        Expression::FieldRef {
            source_alias,
            field_path,
        } if source_alias == PARAMS_SOURCE => Ok(ctx
            .params
            .get(field_path)
            .map(value_to_display_string)
            .map(Value::String)
            .unwrap_or(Value::Null)),

        Expression::FieldRef {
            source_alias,
            field_path,
        } => Ok(resolve_field(ctx.row, source_alias, field_path)),

        Expression::Literal {
            string_value,
            integer_value,
            boolean_value,
        } => {
            if let Some(s) = string_value {
                Ok(Value::String(s.clone()))
            } else if let Some(i) = integer_value {
                Ok(Value::Number((*i).into()))
            } else if let Some(b) = boolean_value {
                Ok(Value::Bool(*b))
            } else {
                Ok(Value::Null)
            }
        }

        Expression::Comparison { op, left, right } => evaluate_comparison(*op, left, right.as_deref(), ctx),

        Expression::LogicalOp { op, operands } => evaluate_logical(*op, operands, ctx),

        Expression::ArithmeticOp { op, left, right } => {
            let l = as_f64(&evaluate(left, ctx)?);
            let r = as_f64(&evaluate(right, ctx)?);
            let result = match op {
                ArithmeticOpKind::Add => l + r,
                ArithmeticOpKind::Subtract => l - r,
                ArithmeticOpKind::Multiply => l * r,
                ArithmeticOpKind::Divide => {
                    if r == 0.0 {
                        0.0
                    } else {
                        l / r
                    }
                }
                ArithmeticOpKind::Modulo => {
                    if r == 0.0 {
                        0.0
                    } else {
                        l % r
                    }
                }
            };
            Ok(number_value(result))
        }

        Expression::BuiltinCall { name, args } => evaluate_builtin(name, args, ctx),

        Expression::FunctionCall { reference, .. } => {
            Err(QueryError::UnsupportedExpression(format!("functionCall:{reference}")))
        }

        Expression::CaseExpression { branches, else_value } => {
            for branch in branches {
                if as_bool(&evaluate(&branch.when, ctx)?) {
                    return evaluate(&branch.then, ctx);
                }
            }
            match else_value {
                Some(expr) => evaluate(expr, ctx),
                None => Ok(Value::Null),
            }
        }
    }
}

/// Walks the qualified row keyspace using a longest-prefix match: the
/// longest `alias.<segment...>` key present in the row is treated as the
/// base value, and any remaining path segments are resolved as nested JSON
/// field lookups into it.
fn resolve_field(row: &Row, alias: &str, field_path: &str) -> Value {
    let segments: Vec<&str> = field_path.split('.').collect();
    for split in (0..=segments.len()).rev() {
        let key = if split == 0 {
            alias.to_string()
        } else {
            format!("{alias}.{}", segments[..split].join("."))
        };
        if let Some(base) = row.get(&key) {
            let remainder = &segments[split..];
            return walk_nested(base, remainder);
        }
    }
    Value::Null
}

fn walk_nested(value: &Value, remainder: &[&str]) -> Value {
    let mut current = value;
    for segment in remainder {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn evaluate_comparison(
    op: ComparisonOp,
    left: &Expression,
    right: Option<&Expression>,
    ctx: &EvalContext<'_>,
) -> Result<Value, QueryError> {
    let lv = evaluate(left, ctx)?;

    match op {
        ComparisonOp::IsNull => return Ok(Value::Bool(lv.is_null())),
        ComparisonOp::IsNotNull => return Ok(Value::Bool(!lv.is_null())),
        _ => {}
    }

    let right = right.ok_or_else(|| QueryError::MissingOperand { op: format!("{op:?}") })?;

    match op {
        ComparisonOp::Eq => Ok(Value::Bool(values_equal(&lv, &evaluate(right, ctx)?))),
        ComparisonOp::Neq => Ok(Value::Bool(!values_equal(&lv, &evaluate(right, ctx)?))),
        ComparisonOp::Gt => Ok(Value::Bool(compare_numeric(&lv, &evaluate(right, ctx)?) == std::cmp::Ordering::Greater)),
        ComparisonOp::Gte => {
            let ord = compare_numeric(&lv, &evaluate(right, ctx)?);
            Ok(Value::Bool(ord != std::cmp::Ordering::Less))
        }
        ComparisonOp::Lt => Ok(Value::Bool(compare_numeric(&lv, &evaluate(right, ctx)?) == std::cmp::Ordering::Less)),
        ComparisonOp::Lte => {
            let ord = compare_numeric(&lv, &evaluate(right, ctx)?);
            Ok(Value::Bool(ord != std::cmp::Ordering::Greater))
        }
        ComparisonOp::Like => {
            let rv = evaluate(right, ctx)?;
            let pattern = rv.as_str().unwrap_or_default();
            let haystack = lv.as_str().unwrap_or_default();
            Ok(Value::Bool(like_match(haystack, pattern)?))
        }
        ComparisonOp::In => {
            let rv = evaluate(right, ctx)?;
            let arr = rv
                .as_array()
                .ok_or_else(|| QueryError::ExpectedArrayOperand { op: "in".into() })?;
            Ok(Value::Bool(arr.iter().any(|item| values_equal(item, &lv))))
        }
        ComparisonOp::NotIn => {
            let rv = evaluate(right, ctx)?;
            let arr = rv
                .as_array()
                .ok_or_else(|| QueryError::ExpectedArrayOperand { op: "notIn".into() })?;
            Ok(Value::Bool(!arr.iter().any(|item| values_equal(item, &lv))))
        }
        ComparisonOp::Between => {
            let rv = evaluate(right, ctx)?;
            let arr = rv
                .as_array()
                .ok_or_else(|| QueryError::ExpectedArrayOperand { op: "between".into() })?;
            if arr.len() != 2 {
                return Err(QueryError::ExpectedArrayOperand { op: "between".into() });
            }
            let lo = compare_numeric(&lv, &arr[0]) != std::cmp::Ordering::Less;
            let hi = compare_numeric(&lv, &arr[1]) != std::cmp::Ordering::Greater;
            Ok(Value::Bool(lo && hi))
        }
        ComparisonOp::IsNull | ComparisonOp::IsNotNull => unreachable!(),
    }
}

fn evaluate_logical(op: LogicalOpKind, operands: &[Expression], ctx: &EvalContext<'_>) -> Result<Value, QueryError> {
    match op {
        LogicalOpKind::And => {
            for operand in operands {
                if !as_bool(&evaluate(operand, ctx)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        LogicalOpKind::Or => {
            for operand in operands {
                if as_bool(&evaluate(operand, ctx)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        LogicalOpKind::Not => {
            if operands.len() != 1 {
                return Err(QueryError::MissingOperand { op: "not".into() });
            }
            Ok(Value::Bool(!as_bool(&evaluate(&operands[0], ctx)?)))
        }
    }
}

fn evaluate_builtin(name: &str, args: &[Expression], ctx: &EvalContext<'_>) -> Result<Value, QueryError> {
    match name {
        "now" => Ok(Value::String(chrono::Utc::now().to_rfc3339())),
        "concat" => {
            let mut out = String::new();
            for arg in args {
                let v = evaluate(arg, ctx)?;
                out.push_str(&value_to_display_string(&v));
            }
            Ok(Value::String(out))
        }
        "lower" => {
            let v = evaluate(args.first().ok_or_else(missing_arg)?, ctx)?;
            Ok(Value::String(value_to_display_string(&v).to_lowercase()))
        }
        "upper" => {
            let v = evaluate(args.first().ok_or_else(missing_arg)?, ctx)?;
            Ok(Value::String(value_to_display_string(&v).to_uppercase()))
        }
        "trim" => {
            let v = evaluate(args.first().ok_or_else(missing_arg)?, ctx)?;
            Ok(Value::String(value_to_display_string(&v).trim().to_string()))
        }
        "length" => {
            let v = evaluate(args.first().ok_or_else(missing_arg)?, ctx)?;
            Ok(number_value(value_to_display_string(&v).chars().count() as f64))
        }
        "substring" => {
            let v = value_to_display_string(&evaluate(args.first().ok_or_else(missing_arg)?, ctx)?);
            let start = args
                .get(1)
                .map(|a| evaluate(a, ctx))
                .transpose()?
                .map(|v| as_f64(&v) as usize)
                .unwrap_or(0);
            let len = args.get(2).map(|a| evaluate(a, ctx)).transpose()?.map(|v| as_f64(&v) as usize);
            let chars: Vec<char> = v.chars().collect();
            let end = len.map(|l| (start + l).min(chars.len())).unwrap_or(chars.len());
            let slice: String = chars.get(start.min(chars.len())..end.max(start.min(chars.len()))).unwrap_or(&[]).iter().collect();
            Ok(Value::String(slice))
        }
        "abs" => Ok(number_value(as_f64(&evaluate(args.first().ok_or_else(missing_arg)?, ctx)?).abs())),
        "round" => Ok(number_value(as_f64(&evaluate(args.first().ok_or_else(missing_arg)?, ctx)?).round())),
        "floor" => Ok(number_value(as_f64(&evaluate(args.first().ok_or_else(missing_arg)?, ctx)?).floor())),
        "ceil" => Ok(number_value(as_f64(&evaluate(args.first().ok_or_else(missing_arg)?, ctx)?).ceil())),
        "coalesce" => {
            for arg in args {
                let v = evaluate(arg, ctx)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }
        "count" | "sum" | "avg" | "min" | "max" => {
            let arg = args.first().ok_or_else(missing_arg)?;

            // Without a bag, treat the single argument as the collection when
            // it evaluates to one, otherwise pass its value straight through.
            let Some(members) = ctx.group_members else {
                let v = evaluate(arg, ctx)?;
                return Ok(match (name, &v) {
                    ("count", Value::Array(items)) => number_value(items.iter().filter(|i| !i.is_null()).count() as f64),
                    (_, Value::Array(items)) => reduce_numeric(name, items.iter().map(as_f64)),
                    _ => v,
                });
            };

            if name == "count" {
                let mut non_null = 0usize;
                for member in members {
                    let member_ctx = EvalContext::new(member);
                    if !evaluate(arg, &member_ctx)?.is_null() {
                        non_null += 1;
                    }
                }
                return Ok(number_value(non_null as f64));
            }

            let mut values = Vec::with_capacity(members.len());
            for member in members {
                let member_ctx = EvalContext::new(member);
                let v = evaluate(arg, &member_ctx)?;
                if !v.is_null() {
                    values.push(as_f64(&v));
                }
            }
            Ok(reduce_numeric(name, values.into_iter()))
        }
        other => Err(QueryError::UnsupportedExpression(format!("builtinCall:{other}"))),
    }
}

fn reduce_numeric(name: &str, values: impl Iterator<Item = f64>) -> Value {
    let values: Vec<f64> = values.collect();
    match name {
        "sum" => number_value(values.iter().sum()),
        "avg" => {
            if values.is_empty() {
                Value::Null
            } else {
                number_value(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        "min" => values
            .iter()
            .cloned()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
            .map(number_value)
            .unwrap_or(Value::Null),
        "max" => values
            .iter()
            .cloned()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
            .map(number_value)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn missing_arg() -> QueryError {
    QueryError::MissingOperand { op: "builtinCall".into() }
}

fn like_match(haystack: &str, pattern: &str) -> Result<bool, QueryError> {
    let mut regex_str = String::with_capacity(pattern.len() + 2);
    regex_str.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => regex_str.push_str(".*"),
            '_' => regex_str.push('.'),
            c => regex_str.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_str.push('$');
    let re = Regex::new(&regex_str).map_err(|e| QueryError::InvalidLikePattern(e.to_string()))?;
    Ok(re.is_match(haystack))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_number() && b.is_number() {
        return as_f64(a) == as_f64(b);
    }
    a == b
}

fn compare_numeric(a: &Value, b: &Value) -> std::cmp::Ordering {
    if let (Some(sa), Some(sb)) = (a.as_str(), b.as_str()) {
        return sa.cmp(sb);
    }
    as_f64(a).partial_cmp(&as_f64(b)).unwrap_or(std::cmp::Ordering::Equal)
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => s.parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn number_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<HashMap<_, _>>()
    }

    #[test]
    fn field_ref_resolves_exact_qualified_key() {
        let r = row(&[("p.id", Value::String("abc".into()))]);
        let ctx = EvalContext::new(&r);
        let v = resolve_field(&r, "p", "id");
        assert_eq!(v, Value::String("abc".into()));
        let _ = ctx;
    }

    #[test]
    fn field_ref_walks_nested_path_via_longest_prefix() {
        let nested = serde_json::json!({"name": {"first": "Anne"}});
        let r = row(&[("p.profile", nested)]);
        let v = resolve_field(&r, "p", "profile.name.first");
        assert_eq!(v, Value::String("Anne".into()));
    }

    #[test]
    fn like_translates_percent_and_underscore_wildcards() {
        assert!(like_match("hello world", "hello%").unwrap());
        assert!(like_match("cat", "c_t").unwrap());
        assert!(!like_match("cart", "c_t").unwrap());
    }

    #[test]
    fn divide_and_modulo_by_zero_yield_zero() {
        let r = row(&[]);
        let ctx = EvalContext::new(&r);
        let expr = Expression::ArithmeticOp {
            op: ArithmeticOpKind::Divide,
            left: Box::new(Expression::integer(10)),
            right: Box::new(Expression::integer(0)),
        };
        assert_eq!(evaluate(&expr, &ctx).unwrap(), Value::Number(0.into()));
    }

    #[test]
    fn function_call_is_always_unsupported() {
        let r = row(&[]);
        let ctx = EvalContext::new(&r);
        let expr = Expression::FunctionCall {
            reference: "app.avaast.function/doThing".into(),
            args: vec![],
        };
        let err = evaluate(&expr, &ctx).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedExpression(_)));
    }

    #[test]
    fn case_expression_picks_first_truthy_branch() {
        let r = row(&[]);
        let ctx = EvalContext::new(&r);
        let expr = Expression::CaseExpression {
            branches: vec![
                crate::ast::CaseBranch {
                    when: Expression::boolean(false),
                    then: Expression::string("no"),
                },
                crate::ast::CaseBranch {
                    when: Expression::boolean(true),
                    then: Expression::string("yes"),
                },
            ],
            else_value: Some(Box::new(Expression::string("else"))),
        };
        assert_eq!(evaluate(&expr, &ctx).unwrap(), Value::String("yes".into()));
    }

    #[test]
    fn not_requires_exactly_one_operand() {
        let r = row(&[]);
        let ctx = EvalContext::new(&r);
        let expr = Expression::LogicalOp {
            op: LogicalOpKind::Not,
            operands: vec![Expression::boolean(true), Expression::boolean(false)],
        };
        assert!(evaluate(&expr, &ctx).is_err());
    }

    #[test]
    fn params_source_returns_stringified_parameter() {
        let r = row(&[]);
        let mut params = HashMap::new();
        params.insert("authorityId".to_string(), Value::String("did:web:example.com".into()));
        let ctx = EvalContext::new(&r).with_params(&params);
        let expr = Expression::field(PARAMS_SOURCE, "authorityId");
        assert_eq!(evaluate(&expr, &ctx).unwrap(), Value::String("did:web:example.com".into()));
    }

    #[test]
    fn string_and_math_builtins_cover_the_full_catalogue() {
        let r = row(&[]);
        let ctx = EvalContext::new(&r);
        let call = |name: &str, args: Vec<Expression>| {
            evaluate(&Expression::BuiltinCall { name: name.into(), args }, &ctx).unwrap()
        };
        assert_eq!(call("trim", vec![Expression::string("  hi  ")]), Value::String("hi".into()));
        assert_eq!(call("length", vec![Expression::string("hello")]), Value::Number(5.into()));
        assert_eq!(
            call("substring", vec![Expression::string("hello world"), Expression::integer(6), Expression::integer(5)]),
            Value::String("world".into())
        );
        assert_eq!(call("abs", vec![Expression::integer(-4)]), Value::Number(4.into()));
        assert_eq!(call("floor", vec![Expression::string("2.7")]), serde_json::json!(2.0));
        assert_eq!(call("ceil", vec![Expression::string("2.1")]), serde_json::json!(3.0));
        assert_eq!(call("round", vec![Expression::string("2.5")]), serde_json::json!(3.0));
    }

    #[test]
    fn count_without_bag_counts_non_null_array_items() {
        let r = row(&[("p.items", serde_json::json!([1, null, 3]))]);
        let ctx = EvalContext::new(&r);
        let expr = Expression::BuiltinCall {
            name: "count".into(),
            args: vec![Expression::field("p", "items")],
        };
        assert_eq!(evaluate(&expr, &ctx).unwrap(), Value::Number(2.into()));
    }
}
