//! Typed path expressions over [`ParamValue`] records
//!
//! Grammar:
//!
//! ```text
//! path    := segment ( '/' segment )*
//! segment := field ( '[' index ']' )*
//! field   := one or more chars except '/', '[' and ']'
//! index   := decimal integer
//! ```
//!
//! `"optimizer/layers[2]/units"` parses into
//! `[Field("optimizer"), Field("layers"), Index(2), Field("units")]`.

use super::ParamValue;
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// One step of a path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Named field of a record
    Field(String),
    /// Position in a list
    Index(usize),
}

/// Parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    steps: Vec<PathStep>,
}

impl PathExpr {
    /// Parse a path expression.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] on empty segments, unbalanced brackets
    /// or non-numeric indices.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidInput(format!("invalid path '{path}': {why}"));
        let mut steps = Vec::new();
        for segment in path.split('/') {
            let (field, mut rest) = match segment.find('[') {
                Some(pos) => segment.split_at(pos),
                None => (segment, ""),
            };
            if field.is_empty() || field.contains(']') {
                return Err(invalid("empty or malformed field name"));
            }
            steps.push(PathStep::Field(field.to_string()));
            while !rest.is_empty() {
                let inner = rest
                    .strip_prefix('[')
                    .ok_or_else(|| invalid("expected '['"))?;
                let close = inner.find(']').ok_or_else(|| invalid("missing ']'"))?;
                let index = inner[..close]
                    .parse::<usize>()
                    .map_err(|_| invalid("index is not a non-negative integer"))?;
                steps.push(PathStep::Index(index));
                rest = &inner[close + 1..];
            }
        }
        Ok(Self { steps })
    }

    /// Steps in evaluation order.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Evaluate against a record.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] naming the first step that does not resolve.
    pub fn eval<'a>(&self, root: &'a ParamValue) -> Result<&'a ParamValue> {
        let mut current = root;
        for (depth, step) in self.steps.iter().enumerate() {
            let next = match step {
                PathStep::Field(name) => current.field(name),
                PathStep::Index(idx) => current.index(*idx),
            };
            current = next.ok_or_else(|| {
                Error::InvalidInput(format!("path '{self}' does not resolve at step {depth} ({step:?})"))
            })?;
        }
        Ok(current)
    }
}

impl FromStr for PathExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                PathStep::Field(name) if i == 0 => write!(f, "{name}")?,
                PathStep::Field(name) => write!(f, "/{name}")?,
                PathStep::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}
