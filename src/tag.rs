//! Projection of combinations into metric labels.
//!
//! | Selection | Label value |
//! |-----------|-------------|
//! | `key = v` | `v` |
//! | `key != v` | `!v` |
//! | `key` unset | `-` |

use crate::combination::{Combination, Selection};
use crate::pattern::{ValuePattern, NEGATE};

/// Label value exposed for a property that is not set.
pub const NOT_SET: &str = "-";

/// A resolved metric label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Project a single selection.
    pub fn from_selection(selection: &Selection) -> Self {
        let value = match &selection.pattern {
            ValuePattern::Equals(v) => v.clone(),
            ValuePattern::NotEquals(v) => format!("{NEGATE}{v}"),
            ValuePattern::Unset => NOT_SET.to_string(),
        };
        Tag::new(selection.key.clone(), value)
    }

    /// Recover the selection this tag was projected from.
    ///
    /// Ambiguous only for a positive pattern whose literal is `-` itself.
    pub fn selection(&self) -> Selection {
        let pattern = if self.value == NOT_SET {
            ValuePattern::Unset
        } else if let Some(v) = self.value.strip_prefix(NEGATE) {
            ValuePattern::NotEquals(v.to_string())
        } else {
            ValuePattern::Equals(self.value.clone())
        };
        Selection::new(self.name.clone(), pattern)
    }
}

/// Project a combination into labels, one per selection, in order.
pub fn project(combination: &Combination) -> Vec<Tag> {
    combination
        .selections()
        .iter()
        .map(Tag::from_selection)
        .collect()
}
