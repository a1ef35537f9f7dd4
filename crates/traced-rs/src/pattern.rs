//! Declarative single-expression operator patterns.
//!
//! A pattern is a set of operator identities. Leaves are built with [`is_op`] and
//! combined with `|` / `|=`; unions are flattened, so matching is a membership
//! test over the leaves.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::graph::{Expr, FunctionRef, OpDefKind, Target};

/// Operator identity compared by patterns.
///
/// Functions compare by `(module, name)`, methods by their literal name, and
/// opdefs by kind (never by parameters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKey {
    Function(FunctionRef),
    Method(String),
    OpDef(OpDefKind),
}

impl OpKey {
    /// Identity of an expression target; `None` for targets no pattern can name.
    pub fn of(target: &Target) -> Option<OpKey> {
        match target {
            Target::CallFunction(func) => Some(OpKey::Function(func.clone())),
            Target::CallMethod(name) => Some(OpKey::Method(name.clone())),
            Target::Apply(op) => Some(OpKey::OpDef(op.kind())),
            Target::Input
            | Target::Constant
            | Target::GetAttr(_)
            | Target::CallModule => None,
        }
    }

    pub fn as_method(&self) -> Option<&str> {
        match self {
            OpKey::Method(name) => Some(name),
            _ => None,
        }
    }
}

impl From<FunctionRef> for OpKey {
    fn from(func: FunctionRef) -> Self {
        OpKey::Function(func)
    }
}

impl From<&str> for OpKey {
    fn from(method: &str) -> Self {
        OpKey::Method(method.to_string())
    }
}

impl From<OpDefKind> for OpKey {
    fn from(kind: OpDefKind) -> Self {
        OpKey::OpDef(kind)
    }
}

impl fmt::Display for OpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKey::Function(func) => write!(f, "{func}"),
            OpKey::Method(name) => f.write_str(name),
            OpKey::OpDef(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Op(OpKey),
    Or(Vec<OpKey>),
}

/// Leaf pattern matching expressions whose target is `op`.
pub fn is_op(op: impl Into<OpKey>) -> Pattern {
    Pattern::Op(op.into())
}

impl Pattern {
    /// Leaves of this pattern, in the order they were combined.
    pub fn leaves(&self) -> &[OpKey] {
        match self {
            Pattern::Op(op) => std::slice::from_ref(op),
            Pattern::Or(ops) => ops,
        }
    }

    pub fn matches(&self, expr: &Expr) -> bool {
        self.matching_leaf(expr).is_some()
    }

    fn matching_leaf(&self, expr: &Expr) -> Option<&OpKey> {
        let key = OpKey::of(&expr.target)?;
        self.leaves().iter().find(|leaf| **leaf == key)
    }
}

impl BitOr for Pattern {
    type Output = Pattern;

    fn bitor(mut self, rhs: Pattern) -> Pattern {
        self |= rhs;
        self
    }
}

impl BitOrAssign for Pattern {
    fn bitor_assign(&mut self, rhs: Pattern) {
        let mut leaves = self.leaves().to_vec();
        for leaf in rhs.leaves() {
            if !leaves.contains(leaf) {
                leaves.push(leaf.clone());
            }
        }
        *self = Pattern::Or(leaves);
    }
}

/// Per-attempt matcher recording which leaf pattern matched.
#[derive(Debug, Default)]
pub struct PatternMatcher {
    matched_patterns: Vec<Pattern>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches `pattern` against `expr`; on success the matched leaf is recorded.
    pub fn matches(&mut self, pattern: &Pattern, expr: &Expr) -> bool {
        self.matched_patterns.clear();
        match pattern.matching_leaf(expr) {
            Some(leaf) => {
                self.matched_patterns.push(Pattern::Op(leaf.clone()));
                true
            }
            None => false,
        }
    }

    pub fn matched_patterns(&self) -> &[Pattern] {
        &self.matched_patterns
    }

    /// Target identity of the first matched leaf.
    pub fn matched_op(&self) -> Option<&OpKey> {
        match self.matched_patterns.first()? {
            Pattern::Op(op) => Some(op),
            Pattern::Or(ops) => ops.first(),
        }
    }
}
