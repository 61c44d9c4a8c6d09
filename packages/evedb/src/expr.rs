//! Boolean expressions over event fields.
//!
//! Queries enter the core as a tree of predicates combined with
//! conjunction, disjunction, and negation. [`Expression::normalize`]
//! rewrites a tree into negation normal form (negations pushed into the
//! predicates' operators) and flattens nested connectives; evaluation
//! downstream only has to handle positive predicates.

use std::fmt;

use crate::data::{Data, TypeKind};

// ── Relational operators ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
}

impl RelOp {
    /// The operator equivalent to negating the predicate.
    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Equal => RelOp::NotEqual,
            RelOp::NotEqual => RelOp::Equal,
            RelOp::Less => RelOp::GreaterEqual,
            RelOp::LessEqual => RelOp::Greater,
            RelOp::Greater => RelOp::LessEqual,
            RelOp::GreaterEqual => RelOp::Less,
            RelOp::In => RelOp::NotIn,
            RelOp::NotIn => RelOp::In,
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelOp::Equal => "==",
            RelOp::NotEqual => "!=",
            RelOp::Less => "<",
            RelOp::LessEqual => "<=",
            RelOp::Greater => ">",
            RelOp::GreaterEqual => ">=",
            RelOp::In => "in",
            RelOp::NotIn => "not in",
        };
        write!(f, "{}", s)
    }
}

// ── Extractors ─────────────────────────────────────────────────────

/// Event metadata addressed by name rather than field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaExtractor {
    /// The layout name of the event's record type.
    Type,
    /// The event timestamp column(s).
    Time,
    /// The instant the partition was sealed.
    ImportTime,
}

/// A way to address columns in a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    /// Dot-boundary suffix match against flattened column paths.
    Field(String),
    Meta(MetaExtractor),
    /// All columns of the given kind.
    Type(TypeKind),
}

impl fmt::Display for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extractor::Field(name) => write!(f, "{}", name),
            Extractor::Meta(MetaExtractor::Type) => write!(f, "#type"),
            Extractor::Meta(MetaExtractor::Time) => write!(f, "#time"),
            Extractor::Meta(MetaExtractor::ImportTime) => write!(f, "#import_time"),
            Extractor::Type(kind) => write!(f, ":{:?}", kind),
        }
    }
}

// ── Expressions ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub lhs: Extractor,
    pub op: RelOp,
    pub rhs: Data,
}

impl Predicate {
    pub fn new(lhs: Extractor, op: RelOp, rhs: Data) -> Self {
        Self { lhs, op, rhs }
    }

    /// Field predicate shorthand.
    pub fn field(name: &str, op: RelOp, rhs: Data) -> Self {
        Self::new(Extractor::Field(name.to_string()), op, rhs)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Predicate(Predicate),
    Conjunction(Vec<Expression>),
    Disjunction(Vec<Expression>),
    Negation(Box<Expression>),
}

impl Expression {
    pub fn pred(lhs: Extractor, op: RelOp, rhs: Data) -> Self {
        Expression::Predicate(Predicate::new(lhs, op, rhs))
    }

    pub fn and(exprs: Vec<Expression>) -> Self {
        Expression::Conjunction(exprs)
    }

    pub fn or(exprs: Vec<Expression>) -> Self {
        Expression::Disjunction(exprs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expression) -> Self {
        Expression::Negation(Box::new(expr))
    }

    /// Rewrite into negation normal form and flatten nested connectives
    /// of the same kind. The result contains no `Negation` nodes;
    /// negated predicates carry the negated operator instead.
    pub fn normalize(self) -> Expression {
        flatten(push_negations(self, false))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, xs: &[Expression], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, x) in xs.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", x)?;
            }
            write!(f, ")")
        }
        match self {
            Expression::Predicate(p) => write!(f, "{}", p),
            Expression::Conjunction(xs) => join(f, xs, "&&"),
            Expression::Disjunction(xs) => join(f, xs, "||"),
            Expression::Negation(x) => write!(f, "! {}", x),
        }
    }
}

fn push_negations(expr: Expression, negated: bool) -> Expression {
    match expr {
        Expression::Negation(inner) => push_negations(*inner, !negated),
        Expression::Predicate(mut p) => {
            if negated {
                p.op = p.op.negate();
            }
            Expression::Predicate(p)
        }
        Expression::Conjunction(xs) => {
            let xs = xs.into_iter().map(|x| push_negations(x, negated)).collect();
            if negated {
                Expression::Disjunction(xs)
            } else {
                Expression::Conjunction(xs)
            }
        }
        Expression::Disjunction(xs) => {
            let xs = xs.into_iter().map(|x| push_negations(x, negated)).collect();
            if negated {
                Expression::Conjunction(xs)
            } else {
                Expression::Disjunction(xs)
            }
        }
    }
}

fn flatten(expr: Expression) -> Expression {
    match expr {
        Expression::Conjunction(xs) => {
            let mut out = Vec::new();
            for x in xs {
                match flatten(x) {
                    Expression::Conjunction(inner) => out.extend(inner),
                    other => out.push(other),
                }
            }
            if out.len() == 1 {
                out.pop().unwrap()
            } else {
                Expression::Conjunction(out)
            }
        }
        Expression::Disjunction(xs) => {
            let mut out = Vec::new();
            for x in xs {
                match flatten(x) {
                    Expression::Disjunction(inner) => out.extend(inner),
                    other => out.push(other),
                }
            }
            if out.len() == 1 {
                out.pop().unwrap()
            } else {
                Expression::Disjunction(out)
            }
        }
        other => other,
    }
}

// ── Value-level predicate semantics ────────────────────────────────

/// Evaluate `lhs op rhs` on concrete values. This is the reference
/// semantics the value indexes must agree with. Nil cells match only
/// `== nil`; container cells match when any element does.
pub fn eval_op(op: RelOp, lhs: &Data, rhs: &Data) -> bool {
    if lhs.is_nil() {
        return op == RelOp::Equal && rhs.is_nil();
    }
    if rhs.is_nil() {
        return op == RelOp::NotEqual;
    }
    // Containers: positive operators hold when any element matches;
    // negative operators are their complements ("no element matches").
    if let Some(elems) = container_elements(lhs) {
        return match op {
            RelOp::NotEqual => !elems.iter().any(|x| eval_op(RelOp::Equal, x, rhs)),
            RelOp::NotIn => !elems.iter().any(|x| eval_op(RelOp::In, x, rhs)),
            _ => elems.iter().any(|x| eval_op(op, x, rhs)),
        };
    }
    // A pattern on the right-hand side matches string cells.
    if let (Data::String(s), Data::Pattern(p)) = (lhs, rhs) {
        return match op {
            RelOp::Equal => p.is_match(s),
            RelOp::NotEqual => !p.is_match(s),
            _ => false,
        };
    }
    match op {
        RelOp::Equal => cmp_data(lhs, rhs) == Some(std::cmp::Ordering::Equal),
        RelOp::NotEqual => cmp_data(lhs, rhs) != Some(std::cmp::Ordering::Equal),
        RelOp::Less => cmp_data(lhs, rhs) == Some(std::cmp::Ordering::Less),
        RelOp::LessEqual => {
            matches!(cmp_data(lhs, rhs), Some(o) if o != std::cmp::Ordering::Greater)
        }
        RelOp::Greater => cmp_data(lhs, rhs) == Some(std::cmp::Ordering::Greater),
        RelOp::GreaterEqual => {
            matches!(cmp_data(lhs, rhs), Some(o) if o != std::cmp::Ordering::Less)
        }
        RelOp::In => eval_in(lhs, rhs),
        RelOp::NotIn => !eval_in(lhs, rhs),
    }
}

fn container_elements(value: &Data) -> Option<Vec<&Data>> {
    match value {
        Data::List(xs) => Some(xs.iter().collect()),
        Data::Map(xs) => Some(xs.iter().map(|(_, v)| v).collect()),
        _ => None,
    }
}

/// Same-tag comparison, with integer/count cross-comparison.
fn cmp_data(lhs: &Data, rhs: &Data) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Data::Integer(a), Data::Count(b)) => Some((*a as i128).cmp(&(*b as i128))),
        (Data::Count(a), Data::Integer(b)) => Some((*a as i128).cmp(&(*b as i128))),
        (a, b) if a.tag() == b.tag() => Some(a.cmp(b)),
        _ => None,
    }
}

fn eval_in(lhs: &Data, rhs: &Data) -> bool {
    match (lhs, rhs) {
        (Data::Address(a), Data::Subnet(s)) => s.contains(a),
        (Data::Subnet(a), Data::Subnet(s)) => s.contains_subnet(a),
        (Data::String(a), Data::String(s)) => s.contains(a.as_str()),
        (_, Data::List(xs)) => xs.iter().any(|x| eval_op(RelOp::Equal, lhs, x)),
        _ => false,
    }
}
