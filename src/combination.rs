//! Expansion of a property spec into the cartesian product of filters.
//!
//! Every [`Combination`] makes exactly one pattern choice per property group.
//! A spec with groups of sizes `s1..sn` expands to `s1 * ... * sn`
//! combinations; an empty spec expands to a single empty combination that
//! matches every entity.

use indexmap::IndexMap;

use crate::pattern::{PropertyGroup, PropertySpec, ValuePattern, NEGATE};

/// Filter in the count source's wire form: label key to values.
///
/// Negated selections use the key with a trailing `!`.
pub type Filter = IndexMap<String, Vec<String>>;

/// The pattern chosen for one property key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selection {
    pub key: String,
    pub pattern: ValuePattern,
}

impl Selection {
    pub fn new(key: impl Into<String>, pattern: ValuePattern) -> Self {
        Self {
            key: key.into(),
            pattern,
        }
    }

    /// Key as sent to the count source: `key` or `key!`.
    pub fn filter_key(&self) -> String {
        if self.pattern.is_negated() {
            format!("{}{}", self.key, NEGATE)
        } else {
            self.key.clone()
        }
    }
}

/// One concrete filter assignment across all property groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Combination {
    selections: Vec<Selection>,
}

impl Combination {
    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    /// The empty combination matches every entity.
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Pattern chosen for `key`, if the key is part of this combination.
    pub fn get(&self, key: &str) -> Option<&ValuePattern> {
        self.selections
            .iter()
            .find(|s| s.key == key)
            .map(|s| &s.pattern)
    }

    /// Render the filter handed to [`CountSource::count`](crate::source::CountSource::count).
    ///
    /// # Example
    ///
    /// ```
    /// use tally_rs::combination::generate;
    /// use tally_rs::pattern::PropertySpec;
    ///
    /// let spec = PropertySpec::parse("a:1;b:!3").unwrap();
    /// let filter = generate(&spec)[0].to_filter();
    /// assert_eq!(filter["a"], vec!["1"]);
    /// assert_eq!(filter["b!"], vec!["3"]);
    /// ```
    pub fn to_filter(&self) -> Filter {
        self.selections
            .iter()
            .map(|s| (s.filter_key(), vec![s.pattern.literal().to_string()]))
            .collect()
    }
}

impl FromIterator<Selection> for Combination {
    fn from_iter<I: IntoIterator<Item = Selection>>(iter: I) -> Self {
        Self {
            selections: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, s) in self.selections.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", s.key, s.pattern)?;
        }
        f.write_str("}")
    }
}

/// Expand a spec into all of its combinations, in cartesian order.
pub fn generate(spec: &PropertySpec) -> Vec<Combination> {
    let mut out = Vec::with_capacity(spec.combination_count());
    let mut current = Vec::with_capacity(spec.len());
    expand(spec.groups(), &mut current, &mut out);
    out
}

fn expand(groups: &[PropertyGroup], current: &mut Vec<Selection>, out: &mut Vec<Combination>) {
    let Some((group, rest)) = groups.split_first() else {
        out.push(Combination {
            selections: current.clone(),
        });
        return;
    };

    for pattern in &group.patterns {
        current.push(Selection::new(group.key.clone(), pattern.clone()));
        expand(rest, current, out);
        current.pop();
    }
}
