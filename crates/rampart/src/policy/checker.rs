//! Static type-checker for predicate expressions.
//!
//! Rhai is dynamically typed, so predicates are checked against the method's
//! input schema before they are accepted into a store. The checker walks the
//! parsed expression and infers a [`Type`] for every node; anything it cannot
//! type (unknown names, unknown fields, operators applied to the wrong types,
//! statements or closures) is a compile error rather than a runtime surprise.
//!
//! # Chains
//!
//! Rhai encodes `a.b[c].d` as a right-nested chain: the rhs of a `Dot` node is
//! applied to the value of its lhs, and the rhs of an `Index` node is either
//! the index itself (when flagged `BREAK`) or a chain whose lhs is the index
//! and whose rhs continues from the indexed value.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;

use rhai::{AST, ASTFlags, Dynamic, Expr, Position, Stmt};

use crate::descriptor::FieldType;
use crate::policy::schema::InputSchema;
use crate::roles::{HAS_ALL, HAS_ANY, PERMISSIONS_VAR, REQUEST_VAR};

/// Type of a predicate sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Bool,
    Int,
    Double,
    String,
    List(Box<Type>),
    Map(Box<Type>),
    Message(String),
    Permissions,
    Permission,
    /// Element type of an empty literal; fits anything.
    Any,
}

impl Type {
    fn list(inner: Type) -> Self {
        Self::List(Box::new(inner))
    }

    fn from_field(field: &FieldType) -> Self {
        match field {
            FieldType::Bool => Self::Bool,
            FieldType::Int => Self::Int,
            FieldType::Double => Self::Double,
            FieldType::String => Self::String,
            FieldType::List(inner) => Self::list(Self::from_field(inner)),
            FieldType::Map(inner) => Self::Map(Box::new(Self::from_field(inner))),
            FieldType::Message(name) => Self::Message(name.clone()),
        }
    }

    /// Whether a value of this type can be used where `expected` is required.
    fn fits(&self, expected: &Type) -> bool {
        match (self, expected) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::List(a), Self::List(b)) | (Self::Map(a), Self::Map(b)) => a.fits(b),
            (a, b) => a == b,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Double | Self::Any)
    }

    fn has_len(&self) -> bool {
        matches!(
            self,
            Self::String | Self::List(_) | Self::Map(_) | Self::Permissions | Self::Any
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Double => f.write_str("double"),
            Self::String => f.write_str("string"),
            Self::List(inner) => write!(f, "list({inner})"),
            Self::Map(inner) => write!(f, "map(string, {inner})"),
            Self::Message(name) => f.write_str(name),
            Self::Permissions => f.write_str("list(permission)"),
            Self::Permission => f.write_str("permission"),
            Self::Any => f.write_str("dyn"),
        }
    }
}

/// Least common type of two values sharing a list or map.
fn unify(a: Type, b: Type) -> Option<Type> {
    match (a, b) {
        (Type::Any, t) | (t, Type::Any) => Some(t),
        (Type::Int, Type::Double) | (Type::Double, Type::Int) => Some(Type::Double),
        (Type::List(x), Type::List(y)) => unify(*x, *y).map(Type::list),
        (Type::Map(x), Type::Map(y)) => unify(*x, *y).map(|t| Type::Map(Box::new(t))),
        (a, b) if a == b => Some(a),
        _ => None,
    }
}

const FUNCTIONS: [&str; 9] = [
    HAS_ANY,
    HAS_ALL,
    "len",
    "is_empty",
    "contains",
    "starts_with",
    "ends_with",
    "to_lower",
    "to_upper",
];

type CheckResult = Result<Type, String>;

/// Type environment of one method: role constants, `u`, and `r`.
pub struct Checker<'a> {
    schema: &'a InputSchema,
    roles: &'a HashSet<String>,
    message_reads: Cell<usize>,
}

impl<'a> Checker<'a> {
    #[must_use]
    pub fn new(schema: &'a InputSchema, roles: &'a HashSet<String>) -> Self {
        Self {
            schema,
            roles,
            message_reads: Cell::new(0),
        }
    }

    /// Message field reads seen so far. No chain from `r` is longer, so a
    /// request zero-filled this deep never misses a field the predicate reads.
    #[must_use]
    pub fn read_depth(&self) -> usize {
        self.message_reads.get()
    }

    /// Infer the result type of a compiled expression.
    pub fn check(&self, ast: &AST) -> CheckResult {
        match ast.statements() {
            [Stmt::Expr(expr)] => self.expr(expr),
            [] => Err("predicate is empty".to_string()),
            _ => Err("predicate must be a single expression".to_string()),
        }
    }

    fn expr(&self, expr: &Expr) -> CheckResult {
        match expr {
            Expr::BoolConstant(..) => Ok(Type::Bool),
            Expr::IntegerConstant(..) => Ok(Type::Int),
            Expr::FloatConstant(..) => Ok(Type::Double),
            Expr::StringConstant(..) => Ok(Type::String),
            Expr::DynamicConstant(value, pos) => type_of_constant(value, *pos),
            Expr::InterpolatedString(_, pos) => {
                Err(format!("string interpolation is not supported, use '+' ({pos})"))
            }
            Expr::Array(items, pos) => {
                let mut element = Type::Any;
                for item in items.iter() {
                    let t = self.expr(item)?;
                    element = unify(element.clone(), t.clone())
                        .ok_or_else(|| format!("list mixes {element} and {t} ({pos})"))?;
                }
                Ok(Type::list(element))
            }
            Expr::Map(entries, pos) => {
                let mut value = Type::Any;
                for (_, item) in entries.0.iter() {
                    let t = self.expr(item)?;
                    value = unify(value.clone(), t.clone())
                        .ok_or_else(|| format!("map mixes {value} and {t} ({pos})"))?;
                }
                Ok(Type::Map(Box::new(value)))
            }
            Expr::Variable(x, _, pos) => {
                if !x.2.is_empty() {
                    return Err(format!("namespaced references are not supported ({pos})"));
                }
                self.variable(&x.1, *pos)
            }
            Expr::And(operands, pos) | Expr::Or(operands, pos) => {
                for operand in operands.iter() {
                    let t = self.expr(operand)?;
                    if !t.fits(&Type::Bool) {
                        return Err(format!("logical operator expects bool, got {t} ({pos})"));
                    }
                }
                Ok(Type::Bool)
            }
            Expr::FnCall(f, pos) => {
                if f.is_qualified() || f.capture_parent_scope {
                    return Err(format!("unsupported call to '{}' ({pos})", f.name));
                }
                let args = f
                    .args
                    .iter()
                    .map(|arg| self.expr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(&f.name, &args, *pos)
            }
            Expr::Dot(x, flags, pos) => {
                reject_elvis(*flags, *pos)?;
                let base = self.expr(&x.lhs)?;
                self.dot(base, &x.rhs)
            }
            Expr::Index(x, flags, pos) => {
                reject_elvis(*flags, *pos)?;
                let base = self.expr(&x.lhs)?;
                self.index_chain(base, &x.rhs, *flags)
            }
            Expr::CharConstant(_, pos) => {
                Err(format!("character literals are not supported, use a string ({pos})"))
            }
            other => Err(format!("unsupported syntax ({})", other.position())),
        }
    }

    fn variable(&self, name: &str, pos: Position) -> CheckResult {
        match name {
            REQUEST_VAR => Ok(Type::Message(self.schema.root().to_string())),
            PERMISSIONS_VAR => Ok(Type::Permissions),
            role if self.roles.contains(role) => Ok(Type::Int),
            other => Err(format!("undeclared reference to '{other}' ({pos})")),
        }
    }

    /// Apply the rhs of a `.` to a value of type `base`.
    fn dot(&self, base: Type, rhs: &Expr) -> CheckResult {
        match rhs {
            Expr::Property(x, pos) => self.property(base, &x.2, *pos),
            Expr::MethodCall(f, pos) => {
                let mut args = Vec::with_capacity(f.args.len() + 1);
                args.push(base);
                for arg in f.args.iter() {
                    args.push(self.expr(arg)?);
                }
                self.call(&f.name, &args, *pos)
            }
            Expr::Dot(x, flags, pos) => {
                reject_elvis(*flags, *pos)?;
                let step = self.dot(base, &x.lhs)?;
                self.dot(step, &x.rhs)
            }
            Expr::Index(x, flags, pos) => {
                reject_elvis(*flags, *pos)?;
                let step = self.dot(base, &x.lhs)?;
                self.index_chain(step, &x.rhs, *flags)
            }
            other => Err(format!("unsupported syntax ({})", other.position())),
        }
    }

    /// Index a value of type `base`, then continue the chain if any.
    fn index_chain(&self, base: Type, rhs: &Expr, flags: ASTFlags) -> CheckResult {
        if flags.contains(ASTFlags::BREAK) {
            let idx = self.expr(rhs)?;
            return self.index(base, idx, rhs.position());
        }

        match rhs {
            Expr::Dot(x, next, pos) => {
                reject_elvis(*next, *pos)?;
                let idx = self.expr(&x.lhs)?;
                let step = self.index(base, idx, *pos)?;
                self.dot(step, &x.rhs)
            }
            Expr::Index(x, next, pos) => {
                reject_elvis(*next, *pos)?;
                let idx = self.expr(&x.lhs)?;
                let step = self.index(base, idx, *pos)?;
                self.index_chain(step, &x.rhs, *next)
            }
            other => {
                let idx = self.expr(other)?;
                self.index(base, idx, other.position())
            }
        }
    }

    fn index(&self, base: Type, idx: Type, pos: Position) -> CheckResult {
        match base {
            Type::List(element) if idx.fits(&Type::Int) => Ok(*element),
            Type::Map(value) if idx.fits(&Type::String) => Ok(*value),
            Type::Permissions if idx.fits(&Type::Int) => Ok(Type::Permission),
            Type::Any => Ok(Type::Any),
            base => Err(format!("cannot index {base} with {idx} ({pos})")),
        }
    }

    fn property(&self, base: Type, name: &str, pos: Position) -> CheckResult {
        match (base, name) {
            (Type::Message(message), field) => {
                self.message_reads.set(self.message_reads.get() + 1);
                self.schema
                    .message(&message)
                    .and_then(|schema| schema.fields.get(field))
                    .map(Type::from_field)
                    .ok_or_else(|| format!("undefined field '{field}' on {message} ({pos})"))
            }
            (Type::Map(value), _) => Ok(*value),
            (Type::Permission, "level") => Ok(Type::Int),
            (Type::Permission, "resources") => Ok(Type::list(Type::String)),
            (t, "len") if t.has_len() => Ok(Type::Int),
            (t, "is_empty") if t.has_len() => Ok(Type::Bool),
            (Type::Any, _) => Ok(Type::Any),
            (t, name) => Err(format!("type {t} has no property '{name}' ({pos})")),
        }
    }

    fn call(&self, name: &str, args: &[Type], pos: Position) -> CheckResult {
        use Type::{Bool, Int, Permissions};

        let result = match (name, args) {
            (HAS_ANY | HAS_ALL, [set, level, resources])
                if *set == Permissions && level.fits(&Int) && resources.fits(&Type::list(Type::String)) =>
            {
                Some(Bool)
            }
            ("len", [t]) if t.has_len() => Some(Int),
            ("is_empty", [t]) if t.has_len() => Some(Bool),
            ("contains", [Type::List(element), item]) if item.fits(element) => Some(Bool),
            ("contains", [Type::Map(_) | Type::String, key]) if key.fits(&Type::String) => Some(Bool),
            ("starts_with" | "ends_with", [Type::String, s]) if s.fits(&Type::String) => Some(Bool),
            ("to_lower" | "to_upper", [Type::String]) => Some(Type::String),
            ("!", [b]) if b.fits(&Bool) => Some(Bool),
            ("==" | "!=", [a, b]) if equatable(a, b) => Some(Bool),
            ("<" | "<=" | ">" | ">=", [a, b])
                if (a.is_numeric() && b.is_numeric()) || (a.fits(&Type::String) && b.fits(&Type::String)) =>
            {
                Some(Bool)
            }
            ("+", [a, b]) => arithmetic(a, b).or_else(|| concat(a, b)),
            ("-" | "*" | "/" | "%", [a, b]) => arithmetic(a, b),
            ("-" | "+", [a]) if a.is_numeric() => Some(a.clone()),
            _ => None,
        };

        result.ok_or_else(|| {
            let operator = !rhai::is_valid_identifier(name);
            if operator || FUNCTIONS.contains(&name) {
                let signature = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                format!("found no matching overload for '{name}' applied to ({signature}) ({pos})")
            } else {
                format!("undeclared reference to function '{name}' ({pos})")
            }
        })
    }
}

fn reject_elvis(flags: ASTFlags, pos: Position) -> Result<(), String> {
    if flags.contains(ASTFlags::NEGATED) {
        return Err(format!("'?.' and '?[' are not supported ({pos})"));
    }
    Ok(())
}

fn equatable(a: &Type, b: &Type) -> bool {
    let comparable = |t: &Type| !matches!(t, Type::Permissions | Type::Permission);
    comparable(a) && comparable(b) && (a.fits(b) || (a.is_numeric() && b.is_numeric()))
}

fn arithmetic(a: &Type, b: &Type) -> Option<Type> {
    match (a, b) {
        (Type::Int, Type::Int) => Some(Type::Int),
        (a, b) if a.is_numeric() && b.is_numeric() => Some(Type::Double),
        _ => None,
    }
}

fn concat(a: &Type, b: &Type) -> Option<Type> {
    match (a, b) {
        (Type::String, Type::String) => Some(Type::String),
        (Type::List(_), Type::List(_)) => unify(a.clone(), b.clone()),
        _ => None,
    }
}

fn type_of_constant(value: &Dynamic, pos: Position) -> CheckResult {
    if value.is_bool() {
        Ok(Type::Bool)
    } else if value.is_int() {
        Ok(Type::Int)
    } else if value.is_float() {
        Ok(Type::Double)
    } else if value.is_string() {
        Ok(Type::String)
    } else if value.is_array() {
        let mut element = Type::Any;
        if let Some(items) = value.read_lock::<rhai::Array>() {
            for item in items.iter() {
                let t = type_of_constant(item, pos)?;
                element = unify(element.clone(), t.clone())
                    .ok_or_else(|| format!("list mixes {element} and {t} ({pos})"))?;
            }
        }
        Ok(Type::list(element))
    } else {
        Err(format!("unsupported constant of type {} ({pos})", value.type_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Catalog, MessageSchema};

    fn schema() -> InputSchema {
        let catalog = Catalog::new()
            .with_message(
                MessageSchema::new("acme.v1.Req")
                    .with_field("parent", FieldType::String)
                    .with_field("count", FieldType::Int)
                    .with_field("ratio", FieldType::Double)
                    .with_field("tags", FieldType::List(Box::new(FieldType::String)))
                    .with_field("labels", FieldType::Map(Box::new(FieldType::String)))
                    .with_field("book", FieldType::Message("acme.v1.Book".to_string()))
                    .with_field(
                        "books",
                        FieldType::List(Box::new(FieldType::Message("acme.v1.Book".to_string()))),
                    ),
            )
            .with_message(
                MessageSchema::new("acme.v1.Book")
                    .with_field("name", FieldType::String)
                    .with_field("authors", FieldType::List(Box::new(FieldType::String))),
            );
        InputSchema::resolve(&catalog, "/m", "acme.v1.Req").unwrap()
    }

    fn check(script: &str) -> CheckResult {
        let mut engine = rhai::Engine::new();
        engine.set_optimization_level(rhai::OptimizationLevel::None);
        let ast = engine.compile_expression(script).map_err(|e| e.to_string())?;
        let schema = schema();
        let roles: HashSet<String> = ["OWNER", "VIEWER"].into_iter().map(str::to_string).collect();
        Checker::new(&schema, &roles).check(&ast)
    }

    // -------------------------------------------------------------------------
    // Accepted predicates
    // -------------------------------------------------------------------------

    #[test]
    fn test_aggregate_calls() {
        assert_eq!(check(r#"hasAny(u, OWNER, [r.parent + "/examples/"])"#), Ok(Type::Bool));
        assert_eq!(check("u.hasAll(VIEWER, r.tags)"), Ok(Type::Bool));
        assert_eq!(check("hasAll(u, OWNER, [])"), Ok(Type::Bool));
    }

    #[test]
    fn test_field_chains() {
        assert_eq!(check("r.book.name"), Ok(Type::String));
        assert_eq!(check("r.books[0].name"), Ok(Type::String));
        assert_eq!(check("r.books[0].authors[1]"), Ok(Type::String));
        assert_eq!(check("r.book.authors[0].len()"), Ok(Type::Int));
        assert_eq!(check(r#"r.labels["env"]"#), Ok(Type::String));
        assert_eq!(check("r.tags.len"), Ok(Type::Int));
        assert_eq!(check("u[0].resources"), Ok(Type::list(Type::String)));
    }

    #[test]
    fn test_read_depth_counts_message_fields() {
        let read_depth = |script: &str| {
            let mut engine = rhai::Engine::new();
            engine.set_optimization_level(rhai::OptimizationLevel::None);
            let ast = engine.compile_expression(script).unwrap();
            let schema = schema();
            let roles = HashSet::new();
            let checker = Checker::new(&schema, &roles);
            checker.check(&ast).unwrap();
            checker.read_depth()
        };

        assert_eq!(read_depth("true"), 0);
        assert_eq!(read_depth("u[0].level == 1"), 0);
        assert_eq!(read_depth("r.tags.len() > 0"), 1);
        assert_eq!(read_depth(r#"r.books[0].name == "" || r.book.authors.len() == 0"#), 4);
    }

    #[test]
    fn test_operators() {
        assert_eq!(check("r.count > 3 && r.ratio <= 1.5 || !(r.parent == \"\")"), Ok(Type::Bool));
        assert_eq!(check("\"a\" in r.tags"), Ok(Type::Bool));
        assert_eq!(check("\"env\" in r.labels"), Ok(Type::Bool));
        assert_eq!(check("r.count + 1"), Ok(Type::Int));
        assert_eq!(check("r.count * r.ratio"), Ok(Type::Double));
        assert_eq!(check("r.parent.starts_with(\"/parents/\")"), Ok(Type::Bool));
        assert_eq!(check("-r.count"), Ok(Type::Int));
    }

    // -------------------------------------------------------------------------
    // Rejected predicates
    // -------------------------------------------------------------------------

    #[test]
    fn test_unknown_names() {
        assert!(check("r.missing").unwrap_err().contains("undefined field 'missing' on acme.v1.Req"));
        assert!(check("ADMIN == 1").unwrap_err().contains("undeclared reference to 'ADMIN'"));
        assert!(check("explode(r)").unwrap_err().contains("undeclared reference to function 'explode'"));
    }

    #[test]
    fn test_bad_overloads() {
        let err = check("hasAny(u, \"OWNER\", [r.parent])").unwrap_err();
        assert!(err.contains("found no matching overload for 'hasAny'"), "{err}");

        assert!(check("hasAny(u, OWNER, [1, 2])").is_err());
        assert!(check("hasAny(r, OWNER, [])").is_err());
        assert!(check("r.count == \"3\"").is_err());
        assert!(check("r.parent - 1").is_err());
        assert!(check("u == u").is_err());
    }

    #[test]
    fn test_non_bool_results_are_typed() {
        assert_eq!(check("r.count"), Ok(Type::Int));
        assert_eq!(check("[1, 2.5]"), Ok(Type::list(Type::Double)));
        assert!(check("[1, \"x\"]").is_err());
    }

    #[test]
    fn test_unsupported_syntax() {
        assert!(check("'c' == 'c'").is_err());
        assert!(check("r?.parent == \"\"").is_err());
        assert!(check("()").is_err());
        assert!(check("`${r.parent}/books` == \"\"").is_err());
    }
}
