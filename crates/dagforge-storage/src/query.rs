// Query expression tree: unary, binary, and variadic operators over dotted
// field paths. Backends compile this tree with a visitor instead of
// interpreting it directly, so adding a backend never touches this module.

use serde_json::Value;

/// A field path into a document, dot-separated (`"metadata.name"`).
pub type FieldPath = String;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Not(Box<Expr>),
    Exists(FieldPath),
    Eq(FieldPath, Value),
    Ne(FieldPath, Value),
    Lt(FieldPath, Value),
    Le(FieldPath, Value),
    Gt(FieldPath, Value),
    Ge(FieldPath, Value),
    In(FieldPath, Vec<Value>),
    NotIn(FieldPath, Vec<Value>),
    Matches(FieldPath, String),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// True if at least one element of the array at `path` satisfies `elem`.
    AnyOf(FieldPath, Box<Expr>),
    /// True if every element of the array at `path` satisfies `elem`.
    AllOf(FieldPath, Box<Expr>),
}

/// Resolves a dotted path within `doc`, returning `None` if any segment is
/// missing.
pub fn resolve_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn compare_numeric(value: &Value, other: &Value, f: impl Fn(f64, f64) -> bool) -> bool {
    match (value.as_f64(), other.as_f64()) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

/// A visitor over the expression tree. The in-memory evaluator and the
/// Postgres SQL compiler each implement this once instead of duplicating
/// tree-walking logic.
pub trait Visitor {
    type Output;

    fn visit(&mut self, expr: &Expr) -> Self::Output;
}

/// Evaluates an `Expr` against a single JSON document, used by the
/// in-memory backend's `find`/`find_one`.
pub struct InMemoryEvaluator<'a> {
    pub doc: &'a Value,
}

impl<'a> Visitor for InMemoryEvaluator<'a> {
    type Output = bool;

    fn visit(&mut self, expr: &Expr) -> bool {
        match expr {
            Expr::Not(inner) => !self.visit(inner),
            Expr::Exists(path) => resolve_path(self.doc, path).is_some(),
            Expr::Eq(path, value) => resolve_path(self.doc, path) == Some(value),
            Expr::Ne(path, value) => resolve_path(self.doc, path) != Some(value),
            Expr::Lt(path, value) => resolve_path(self.doc, path)
                .map(|v| compare_numeric(v, value, |a, b| a < b))
                .unwrap_or(false),
            Expr::Le(path, value) => resolve_path(self.doc, path)
                .map(|v| compare_numeric(v, value, |a, b| a <= b))
                .unwrap_or(false),
            Expr::Gt(path, value) => resolve_path(self.doc, path)
                .map(|v| compare_numeric(v, value, |a, b| a > b))
                .unwrap_or(false),
            Expr::Ge(path, value) => resolve_path(self.doc, path)
                .map(|v| compare_numeric(v, value, |a, b| a >= b))
                .unwrap_or(false),
            Expr::In(path, values) => resolve_path(self.doc, path)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            Expr::NotIn(path, values) => resolve_path(self.doc, path)
                .map(|v| !values.contains(v))
                .unwrap_or(true),
            Expr::Matches(path, pattern) => resolve_path(self.doc, path)
                .and_then(Value::as_str)
                .map(|s| s.contains(pattern.as_str()))
                .unwrap_or(false),
            Expr::And(children) => children.iter().all(|c| self.visit(c)),
            Expr::Or(children) => children.iter().any(|c| self.visit(c)),
            Expr::AnyOf(path, elem) => match resolve_path(self.doc, path) {
                Some(Value::Array(items)) => items.iter().any(|item| InMemoryEvaluator { doc: item }.visit(elem)),
                _ => false,
            },
            Expr::AllOf(path, elem) => match resolve_path(self.doc, path) {
                Some(Value::Array(items)) => items.iter().all(|item| InMemoryEvaluator { doc: item }.visit(elem)),
                _ => false,
            },
        }
    }
}

pub fn matches(doc: &Value, expr: &Expr) -> bool {
    InMemoryEvaluator { doc }.visit(expr)
}

/// Compiles an `Expr` into a Postgres `WHERE` fragment over a JSONB column,
/// using `$N` placeholders and collecting bind values in declaration order.
/// Field paths are rendered as `column #>> '{a,b}'` (text extraction) or,
/// for array quantification, `jsonb_array_elements`.
pub struct PostgresCompiler<'a> {
    pub column: &'a str,
    pub params: Vec<Value>,
}

impl<'a> PostgresCompiler<'a> {
    pub fn new(column: &'a str) -> Self {
        Self { column, params: Vec::new() }
    }

    fn path_expr(&self, path: &str) -> String {
        let segments: Vec<String> = path.split('.').map(|s| format!("\"{s}\"")).collect();
        format!("{} #>> '{{{}}}'", self.column, segments.join(","))
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }
}

impl<'a> Visitor for PostgresCompiler<'a> {
    type Output = String;

    fn visit(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Not(inner) => format!("NOT ({})", self.visit(inner)),
            Expr::Exists(path) => format!("{} IS NOT NULL", self.path_expr(path)),
            Expr::Eq(path, value) => {
                let placeholder = self.bind(value.clone());
                format!("{} = {}", self.path_expr(path), placeholder)
            }
            Expr::Ne(path, value) => {
                let placeholder = self.bind(value.clone());
                format!("{} != {}", self.path_expr(path), placeholder)
            }
            Expr::Lt(path, value) => self.numeric_cmp(path, value, "<"),
            Expr::Le(path, value) => self.numeric_cmp(path, value, "<="),
            Expr::Gt(path, value) => self.numeric_cmp(path, value, ">"),
            Expr::Ge(path, value) => self.numeric_cmp(path, value, ">="),
            Expr::In(path, values) => {
                let placeholders: Vec<String> = values.iter().map(|v| self.bind(v.clone())).collect();
                format!("{} IN ({})", self.path_expr(path), placeholders.join(", "))
            }
            Expr::NotIn(path, values) => {
                let placeholders: Vec<String> = values.iter().map(|v| self.bind(v.clone())).collect();
                format!("{} NOT IN ({})", self.path_expr(path), placeholders.join(", "))
            }
            Expr::Matches(path, pattern) => {
                let placeholder = self.bind(Value::String(format!("%{pattern}%")));
                format!("{} LIKE {}", self.path_expr(path), placeholder)
            }
            Expr::And(children) => {
                if children.is_empty() {
                    return "TRUE".to_string();
                }
                let parts: Vec<String> = children.iter().map(|c| self.visit(c)).collect();
                format!("({})", parts.join(" AND "))
            }
            Expr::Or(children) => {
                if children.is_empty() {
                    return "FALSE".to_string();
                }
                let parts: Vec<String> = children.iter().map(|c| self.visit(c)).collect();
                format!("({})", parts.join(" OR "))
            }
            Expr::AnyOf(path, elem) => {
                let inner = PostgresArrayCompiler { column: self.column, array_path: path };
                let condition = inner.compile(elem, self);
                format!(
                    "EXISTS (SELECT 1 FROM jsonb_array_elements({} #> '{{{}}}') AS elem WHERE {})",
                    self.column,
                    path.replace('.', ","),
                    condition
                )
            }
            Expr::AllOf(path, elem) => {
                let inner = PostgresArrayCompiler { column: self.column, array_path: path };
                let condition = inner.compile(elem, self);
                format!(
                    "NOT EXISTS (SELECT 1 FROM jsonb_array_elements({} #> '{{{}}}') AS elem WHERE NOT ({}))",
                    self.column,
                    path.replace('.', ","),
                    condition
                )
            }
        }
    }
}

impl<'a> PostgresCompiler<'a> {
    fn numeric_cmp(&mut self, path: &str, value: &Value, op: &str) -> String {
        let placeholder = self.bind(value.clone());
        format!("({})::numeric {} ({})::numeric", self.path_expr(path), op, placeholder)
    }
}

/// Element-scoped compiler for `AnyOf`/`AllOf`: field paths inside `elem`
/// resolve against the `elem` row alias rather than the outer column.
struct PostgresArrayCompiler<'a> {
    column: &'a str,
    array_path: &'a str,
}

impl<'a> PostgresArrayCompiler<'a> {
    fn compile(&self, expr: &Expr, outer: &mut PostgresCompiler) -> String {
        let mut sub = PostgresCompiler { column: "elem", params: Vec::new() };
        let rendered = sub.visit(expr);
        outer.params.extend(sub.params);
        let _ = (self.column, self.array_path);
        rendered
    }
}
