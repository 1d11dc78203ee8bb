//! Property spec and tag list parsing.
//!
//! A property spec describes, per property key, the value patterns to track:
//!
//! ```text
//! spec    = group (";" group)*
//! group   = key ":" pattern ("," pattern)*
//! pattern = ["!"] literal
//! ```
//!
//! - `"area:linac"` tracks entities whose `area` property equals `linac`
//! - `"area:!linac"` tracks entities whose `area` is set to anything but `linac`
//! - `"area:!*"` tracks entities with no `area` property at all

use std::fmt;

use crate::error::{Result, TallyError};

/// Prefix marking a negated value pattern.
pub const NEGATE: &str = "!";

/// Literal that, when negated, means "property not set".
pub const WILDCARD: &str = "*";

/// Largest number of combinations a spec may expand to. Each one becomes a
/// gauge and a count query per tick.
pub const MAX_COMBINATIONS: usize = 100_000;

/// One value choice for a property key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValuePattern {
    /// Property is set and matches the value.
    Equals(String),
    /// Property is set and does not match the value.
    NotEquals(String),
    /// Property is not set at all.
    Unset,
}

impl ValuePattern {
    /// Parse a single raw pattern such as `"x"`, `"!x"` or `"!*"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern (after stripping `!`) is empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let pattern = match raw.strip_prefix(NEGATE).map(str::trim) {
            Some(WILDCARD) => ValuePattern::Unset,
            Some(value) => ValuePattern::NotEquals(value.to_string()),
            None => ValuePattern::Equals(raw.to_string()),
        };
        match &pattern {
            ValuePattern::Equals(v) | ValuePattern::NotEquals(v) if v.is_empty() => {
                Err(TallyError::spec(raw, "empty value pattern"))
            }
            _ => Ok(pattern),
        }
    }

    /// Whether this pattern selects on the negated form of its key.
    pub fn is_negated(&self) -> bool {
        !matches!(self, ValuePattern::Equals(_))
    }

    /// The literal handed to the count source (`*` for [`ValuePattern::Unset`]).
    pub fn literal(&self) -> &str {
        match self {
            ValuePattern::Equals(v) | ValuePattern::NotEquals(v) => v,
            ValuePattern::Unset => WILDCARD,
        }
    }
}

impl fmt::Display for ValuePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuePattern::Equals(v) => write!(f, "{v}"),
            ValuePattern::NotEquals(v) => write!(f, "{NEGATE}{v}"),
            ValuePattern::Unset => write!(f, "{NEGATE}{WILDCARD}"),
        }
    }
}

/// A property key with its ordered value patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyGroup {
    pub key: String,
    pub patterns: Vec<ValuePattern>,
}

impl PropertyGroup {
    pub fn new(key: impl Into<String>, patterns: Vec<ValuePattern>) -> Self {
        Self {
            key: key.into(),
            patterns,
        }
    }
}

/// Ordered set of property groups, keyed by property name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySpec {
    groups: Vec<PropertyGroup>,
}

impl PropertySpec {
    /// An empty spec: one combination, matching everything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a property spec string.
    ///
    /// Empty or whitespace-only input yields an empty spec.
    ///
    /// # Examples
    ///
    /// ```
    /// use tally_rs::pattern::{PropertySpec, ValuePattern};
    ///
    /// let spec = PropertySpec::parse("a: 1, 2; b: !3, !*").unwrap();
    /// assert_eq!(spec.len(), 2);
    /// assert_eq!(spec.groups()[1].patterns, vec![
    ///     ValuePattern::NotEquals("3".to_string()),
    ///     ValuePattern::Unset,
    /// ]);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `TallyError::InvalidPropertySpec` for a group without exactly
    /// one `:`, an empty or invalid key, an empty pattern, a repeated key, or
    /// a spec expanding to more than [`MAX_COMBINATIONS`] combinations.
    pub fn parse(s: &str) -> Result<Self> {
        let mut spec = Self::empty();

        for group in s.split(';') {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }

            let (key, values) = group
                .split_once(':')
                .ok_or_else(|| TallyError::spec(group, "missing ':' separator"))?;
            if values.contains(':') {
                return Err(TallyError::spec(group, "more than one ':' separator"));
            }

            let key = key.trim();
            validate_key(key).map_err(|reason| TallyError::spec(group, reason))?;

            let patterns = values
                .split(',')
                .map(|raw| {
                    ValuePattern::parse(raw)
                        .map_err(|_| TallyError::spec(group, "empty value pattern"))
                })
                .collect::<Result<Vec<_>>>()?;

            spec.push(PropertyGroup::new(key, patterns))
                .map_err(|reason| TallyError::spec(group, reason))?;
        }

        Ok(spec)
    }

    /// Build a spec programmatically, with the same checks as [`parse`](Self::parse).
    ///
    /// A group without patterns is accepted and expands to no combinations.
    ///
    /// # Errors
    ///
    /// Returns `TallyError::InvalidPropertySpec` for an invalid or repeated
    /// key, or too many combinations.
    pub fn try_from_groups<I>(groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = PropertyGroup>,
    {
        let mut spec = Self::empty();
        for group in groups {
            let key = group.key.clone();
            validate_key(&key).map_err(|reason| TallyError::spec(&key, reason))?;
            spec.push(group).map_err(|reason| TallyError::spec(&key, reason))?;
        }
        Ok(spec)
    }

    fn push(&mut self, group: PropertyGroup) -> std::result::Result<(), String> {
        if self.get(&group.key).is_some() {
            return Err(format!("key '{}' declared more than once", group.key));
        }
        let count = self
            .checked_combination_count()
            .and_then(|n| n.checked_mul(group.patterns.len()))
            .filter(|&n| n <= MAX_COMBINATIONS);
        if count.is_none() {
            return Err(format!(
                "expands to more than {} combinations",
                MAX_COMBINATIONS
            ));
        }
        self.groups.push(group);
        Ok(())
    }

    fn checked_combination_count(&self) -> Option<usize> {
        self.groups
            .iter()
            .try_fold(1usize, |n, g| n.checked_mul(g.patterns.len()))
    }

    /// Look up a group by key.
    pub fn get(&self, key: &str) -> Option<&PropertyGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    pub fn groups(&self) -> &[PropertyGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of combinations this spec expands to, at most [`MAX_COMBINATIONS`].
    pub fn combination_count(&self) -> usize {
        self.checked_combination_count().unwrap_or(usize::MAX)
    }
}

impl fmt::Display for PropertySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}:", group.key)?;
            for (j, pattern) in group.patterns.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{pattern}")?;
            }
        }
        Ok(())
    }
}

/// Parse a comma-separated tag list, e.g. `"tag0, tag1"`.
///
/// Blank entries are dropped; order is preserved.
///
/// # Errors
///
/// Returns `TallyError::InvalidTagList` if a tag is listed twice.
pub fn parse_tag_list(s: &str) -> Result<Vec<String>> {
    normalize_tags(s.split(','))
}

/// Trim, drop blanks and reject duplicates in an already split tag list.
pub fn normalize_tags<I, S>(tags: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            continue;
        }
        if out.iter().any(|t| t == tag) {
            return Err(TallyError::InvalidTagList(format!(
                "tag '{}' listed more than once",
                tag
            )));
        }
        out.push(tag.to_string());
    }
    Ok(out)
}

/// Property keys become metric label names, so they follow the label grammar
/// `[a-zA-Z_][a-zA-Z0-9_]*` and may not use the reserved `__` prefix.
fn validate_key(key: &str) -> std::result::Result<(), String> {
    if key.is_empty() {
        return Err("empty key".to_string());
    }
    if key.starts_with("__") {
        return Err(format!("key '{}' uses the reserved '__' prefix", key));
    }
    let valid = key.chars().enumerate().all(|(i, c)| {
        if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        }
    });
    if !valid {
        return Err(format!("key '{}' is not a valid label name", key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(v: &str) -> ValuePattern {
        ValuePattern::Equals(v.to_string())
    }

    fn ne(v: &str) -> ValuePattern {
        ValuePattern::NotEquals(v.to_string())
    }

    #[test]
    fn test_parse_single_group() {
        let spec = PropertySpec::parse("area:linac").unwrap();
        assert_eq!(spec.groups(), &[PropertyGroup::new("area", vec![eq("linac")])]);
    }

    #[test]
    fn test_parse_preserves_order_and_trims() {
        let spec = PropertySpec::parse(" z : 3 , 1 ; a: !2 , !* ").unwrap();
        let keys: Vec<_> = spec.groups().iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert_eq!(spec.get("z").unwrap().patterns, vec![eq("3"), eq("1")]);
        assert_eq!(
            spec.get("a").unwrap().patterns,
            vec![ne("2"), ValuePattern::Unset]
        );
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(PropertySpec::parse("").unwrap().is_empty());
        assert!(PropertySpec::parse("   ").unwrap().is_empty());
        assert_eq!(PropertySpec::parse("").unwrap().combination_count(), 1);
    }

    #[test]
    fn test_parse_skips_blank_segments() {
        let spec = PropertySpec::parse("a:1;;b:2;").unwrap();
        assert_eq!(spec.len(), 2);
    }

    #[test]
    fn test_parse_missing_separator() {
        let err = PropertySpec::parse("a:1;b").unwrap_err();
        match err {
            TallyError::InvalidPropertySpec { group, reason } => {
                assert_eq!(group, "b");
                assert!(reason.contains("missing ':'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_groups() {
        for bad in [":1", "a:", "a:1,,2", "a:!", "a:1:2", "a-b:1", "__a:1", "~name:x"] {
            assert!(
                matches!(
                    PropertySpec::parse(bad),
                    Err(TallyError::InvalidPropertySpec { .. })
                ),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_duplicate_key() {
        let err = PropertySpec::parse("a:1;a:2").unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_value_pattern_parse() {
        assert_eq!(ValuePattern::parse("x").unwrap(), eq("x"));
        assert_eq!(ValuePattern::parse("!x").unwrap(), ne("x"));
        assert_eq!(ValuePattern::parse("!*").unwrap(), ValuePattern::Unset);
        // A bare wildcard is an ordinary positive pattern
        assert_eq!(ValuePattern::parse("*").unwrap(), eq("*"));
        assert!(ValuePattern::parse("!").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let raw = "a:1,!2,!*;b:x";
        assert_eq!(PropertySpec::parse(raw).unwrap().to_string(), raw);
    }

    #[test]
    fn test_combination_count() {
        let spec = PropertySpec::parse("a:1,2;b:!3,4;c:5,6,7").unwrap();
        assert_eq!(spec.combination_count(), 12);
    }

    #[test]
    fn test_parse_negation_with_inner_whitespace() {
        let spec = PropertySpec::parse("a: ! * , ! x").unwrap();
        assert_eq!(spec.get("a").unwrap().patterns, vec![ValuePattern::Unset, ne("x")]);
    }

    #[test]
    fn test_parse_rejects_oversized_product() {
        let group: Vec<String> = (0..10).map(|v| v.to_string()).collect();
        let raw: Vec<String> = (0..20)
            .map(|k| format!("k{}:{}", k, group.join(",")))
            .collect();
        match PropertySpec::parse(&raw.join(";")) {
            Err(TallyError::InvalidPropertySpec { reason, .. }) => {
                assert!(reason.contains("combinations"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        // 10^5 is exactly at the limit
        let at_limit = raw[..5].join(";");
        let spec = PropertySpec::parse(&at_limit).unwrap();
        assert_eq!(spec.combination_count(), MAX_COMBINATIONS);
    }

    #[test]
    fn test_try_from_groups() {
        let spec = PropertySpec::try_from_groups([
            PropertyGroup::new("a", vec![eq("1")]),
            PropertyGroup::new("b", vec![ValuePattern::Unset]),
        ])
        .unwrap();
        assert_eq!(spec.to_string(), "a:1;b:!*");

        let err = PropertySpec::try_from_groups([
            PropertyGroup::new("a", vec![eq("1")]),
            PropertyGroup::new("a", vec![eq("2")]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));

        assert!(PropertySpec::try_from_groups([PropertyGroup::new("a-b", vec![])]).is_err());
    }

    #[test]
    fn test_parse_tag_list() {
        assert_eq!(
            parse_tag_list("testTag0, testTag1").unwrap(),
            vec!["testTag0", "testTag1"]
        );
        assert!(parse_tag_list("").unwrap().is_empty());
        assert_eq!(parse_tag_list(" a ,, b ,").unwrap(), vec!["a", "b"]);
        assert!(matches!(
            parse_tag_list("a,b,a"),
            Err(TallyError::InvalidTagList(_))
        ));
    }
}
