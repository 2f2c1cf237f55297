// Condition expression tree: leaves are literals or `{"var": "dotted.path"}`
// lookups into the event data; internal nodes map a single operator key to a
// list of child expressions.

use serde_json::Value;

/// Evaluate `expr` against `data`, resolving `var` leaves by dotted-path
/// lookup (missing path resolves to `Value::Null`, never an error).
pub fn evaluate(expr: &Value, data: &Value) -> Value {
    match expr {
        Value::Object(map) if map.len() == 1 => {
            let (op, operand) = map.iter().next().expect("len == 1");
            match op.as_str() {
                "var" => resolve_var(operand, data),
                "eq" => binary(operand, data, |a, b| a == b).into(),
                "ne" => binary(operand, data, |a, b| a != b).into(),
                "gt" => numeric_binary(operand, data, |a, b| a > b).into(),
                "lt" => numeric_binary(operand, data, |a, b| a < b).into(),
                "ge" => numeric_binary(operand, data, |a, b| a >= b).into(),
                "le" => numeric_binary(operand, data, |a, b| a <= b).into(),
                "and" => and(operand, data).into(),
                "or" => or(operand, data).into(),
                "not" => (!truthy(&evaluate(operand, data))).into(),
                "bool" => truthy(&evaluate(operand, data)).into(),
                _ => Value::Null,
            }
        }
        other => other.clone(),
    }
}

fn resolve_var(path_expr: &Value, data: &Value) -> Value {
    let path = match path_expr.as_str() {
        Some(p) => p,
        None => return Value::Null,
    };
    let mut current = data;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn children(operand: &Value) -> Vec<Value> {
    match operand {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn binary(operand: &Value, data: &Value, f: impl Fn(&Value, &Value) -> bool) -> bool {
    let items = children(operand);
    if items.len() != 2 {
        return false;
    }
    let left = evaluate(&items[0], data);
    let right = evaluate(&items[1], data);
    f(&left, &right)
}

fn numeric_binary(operand: &Value, data: &Value, f: impl Fn(f64, f64) -> bool) -> bool {
    let items = children(operand);
    if items.len() != 2 {
        return false;
    }
    let left = evaluate(&items[0], data).as_f64();
    let right = evaluate(&items[1], data).as_f64();
    match (left, right) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

/// `and` of an empty list is `true` (a vacuous conjunction imposes no
/// constraint); short-circuits on the first `false` child.
fn and(operand: &Value, data: &Value) -> bool {
    children(operand).iter().all(|child| truthy(&evaluate(child, data)))
}

/// `or` of an empty list is `false`. This is a real logical OR:
/// short-circuits on the first `true` child.
fn or(operand: &Value, data: &Value) -> bool {
    children(operand).iter().any(|child| truthy(&evaluate(child, data)))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn var_resolves_a_dotted_path() {
        let data = json!({"payload": {"amount": 42}});
        let resolved = evaluate(&json!({"var": "payload.amount"}), &data);
        assert_eq!(resolved, json!(42));
    }

    #[test]
    fn var_resolves_missing_path_to_null() {
        let data = json!({"payload": {}});
        let resolved = evaluate(&json!({"var": "payload.missing.deep"}), &data);
        assert_eq!(resolved, Value::Null);
    }

    #[test]
    fn eq_compares_resolved_values() {
        let data = json!({"status": "ready"});
        let expr = json!({"eq": [{"var": "status"}, "ready"]});
        assert_eq!(evaluate(&expr, &data), json!(true));
    }

    #[test]
    fn gt_compares_numerically() {
        let data = json!({"amount": 10});
        let expr = json!({"gt": [{"var": "amount"}, 5]});
        assert_eq!(evaluate(&expr, &data), json!(true));
    }

    #[test]
    fn and_of_empty_list_is_true() {
        assert_eq!(evaluate(&json!({"and": []}), &Value::Null), json!(true));
    }

    #[test]
    fn or_of_empty_list_is_false() {
        assert_eq!(evaluate(&json!({"or": []}), &Value::Null), json!(false));
    }

    /// `or` must be a genuine logical OR, not an accidental `and`: true if
    /// any branch is true, even when others are false.
    #[test]
    fn or_is_not_and() {
        let data = json!({"a": true, "b": false});
        let expr = json!({"or": [{"var": "a"}, {"var": "b"}]});
        assert_eq!(evaluate(&expr, &data), json!(true));

        let expr_both_false = json!({"or": [{"var": "b"}, {"var": "b"}]});
        assert_eq!(evaluate(&expr_both_false, &data), json!(false));
    }

    #[test]
    fn not_negates_truthiness() {
        assert_eq!(evaluate(&json!({"not": false}), &Value::Null), json!(true));
        assert_eq!(evaluate(&json!({"not": "non-empty"}), &Value::Null), json!(false));
    }

    #[test]
    fn nested_and_or_short_circuits_correctly() {
        let data = json!({"ready": true, "count": 3});
        let expr = json!({
            "and": [
                {"var": "ready"},
                {"or": [
                    {"eq": [{"var": "count"}, 0]},
                    {"gt": [{"var": "count"}, 1]}
                ]}
            ]
        });
        assert_eq!(evaluate(&expr, &data), json!(true));
    }
}
