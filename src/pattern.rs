//! Generalized n-gram patterns
//!
//! A pattern describes, for each position of an n-gram window, what is kept
//! of the underlying token: the word itself, its part-of-speech tag, a
//! wildcard, or nothing at all. Patterns are the unit of counting: every
//! pattern gets its own count file, and its string form (one symbol per
//! element) is the key under which those counts are stored and looked up.

use crate::error::CountError;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::BTreeSet,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

/// Rendering of a [`PatternElem::Skip`] position
pub const SKIPPED_WORD: &str = "_";

/// Rendering of a continuation marker position
pub const WSKIPPED_WORD: &str = "%";

/// Single position of a [`Pattern`]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PatternElem {
    /// The word is kept as is
    Count,

    /// The word is marginalized out into a wildcard
    Skip,

    /// The part-of-speech tag of the word is kept
    Pos,

    /// Continuation over word identity
    WordSkip,

    /// Continuation over part-of-speech tags
    PosSkip,

    /// Continuation over both word identity and part-of-speech tag
    WordPosSkip,

    /// The position is ignored entirely, without even a separator
    Delete,
}
//
impl PatternElem {
    /// Every pattern element, in symbol order
    pub const ALL: [Self; 7] = [
        Self::Skip,
        Self::Count,
        Self::Pos,
        Self::Delete,
        Self::WordSkip,
        Self::PosSkip,
        Self::WordPosSkip,
    ];

    /// Symbol used in the string form of patterns
    pub fn symbol(self) -> char {
        match self {
            Self::Count => '1',
            Self::Skip => '0',
            Self::Pos => '2',
            Self::WordSkip => 'x',
            Self::PosSkip => 'y',
            Self::WordPosSkip => 'z',
            Self::Delete => 'd',
        }
    }

    /// Decode a pattern symbol
    pub fn from_symbol(symbol: char) -> Option<Self> {
        Self::ALL.into_iter().find(|elem| elem.symbol() == symbol)
    }

    /// Truth that this element marks a continuation count position
    pub fn is_continuation_marker(self) -> bool {
        matches!(self, Self::WordSkip | Self::PosSkip | Self::WordPosSkip)
    }

    /// Truth that this element generalizes its position away
    pub fn is_skip(self) -> bool {
        self == Self::Skip || self.is_continuation_marker()
    }

    /// Literal element that a continuation marker generalizes
    pub fn continuation_source(self) -> Option<Self> {
        match self {
            Self::WordSkip | Self::WordPosSkip => Some(Self::Count),
            Self::PosSkip => Some(Self::Pos),
            Self::Count | Self::Skip | Self::Pos | Self::Delete => None,
        }
    }

    /// Render a token (word and part-of-speech tag) through this element
    pub fn apply<'token>(self, word: &'token str, pos: &'token str) -> &'token str {
        match self {
            Self::Count => word,
            Self::Pos => pos,
            Self::Skip => SKIPPED_WORD,
            Self::WordSkip | Self::PosSkip | Self::WordPosSkip => WSKIPPED_WORD,
            Self::Delete => "",
        }
    }
}

/// Family of counts that a pattern belongs to
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Raw occurence counts
    Absolute,

    /// Distinct context counts
    Continuation,
}
//
impl Family {
    /// Name of the family, as used for directory names and logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Absolute => "absolute",
            Self::Continuation => "continuation",
        }
    }
}
//
impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// N-gram template
///
/// Immutable and cheap to clone. Equality, ordering and hashing follow the
/// string form, which is in one-to-one correspondence with the element
/// sequence.
#[derive(Clone, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    /// Elements, one per n-gram position
    elems: Arc<[PatternElem]>,

    /// Concatenated element symbols
    text: Arc<str>,
}
//
#[allow(clippy::len_without_is_empty)]
impl Pattern {
    /// Build a pattern from its elements
    pub fn new(elems: impl Into<Arc<[PatternElem]>>) -> Result<Self, CountError> {
        let elems = elems.into();
        let text = elems.iter().map(|elem| elem.symbol()).collect::<String>();
        if elems.is_empty() {
            return Err(CountError::InvalidPattern {
                pattern: text,
                reason: "patterns must have at least one element",
            });
        }
        Ok(Self {
            elems,
            text: text.into(),
        })
    }

    /// String form of the pattern
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of n-gram positions covered by the pattern
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Element at some position
    pub fn get(&self, index: usize) -> PatternElem {
        self.elems[index]
    }

    /// Elements of the pattern
    pub fn elems(&self) -> &[PatternElem] {
        &self.elems[..]
    }

    /// Iterate over the elements of the pattern
    pub fn iter(&self) -> impl Iterator<Item = PatternElem> + '_ {
        self.elems.iter().copied()
    }

    /// Truth that this pattern only counts raw occurences
    pub fn is_absolute(&self) -> bool {
        !self.elems.iter().any(|elem| elem.is_continuation_marker())
    }

    /// Family of counts that this pattern belongs to
    pub fn family(&self) -> Family {
        if self.is_absolute() {
            Family::Absolute
        } else {
            Family::Continuation
        }
    }

    /// Truth that counting this pattern requires part-of-speech tags
    pub fn contains_pos(&self) -> bool {
        self.elems.contains(&PatternElem::Pos)
    }

    /// Truth that at least one position is generalized away
    pub fn contains_skip(&self) -> bool {
        self.elems.iter().any(|elem| elem.is_skip())
    }

    /// Truth that every position is generalized away
    pub fn only_skip(&self) -> bool {
        self.elems.iter().all(|elem| elem.is_skip())
    }

    /// First element that is not a plain skip, or `Skip` if there is none
    pub fn first_non_skip(&self) -> PatternElem {
        (self.elems.iter().copied())
            .find(|&elem| elem != PatternElem::Skip)
            .unwrap_or(PatternElem::Skip)
    }

    /// Number of continuation markers in the pattern
    ///
    /// Deriving a continuation source lowers this by exactly one, which is
    /// what makes pattern dependencies acyclic.
    pub fn continuation_marker_count(&self) -> usize {
        (self.elems.iter())
            .filter(|elem| elem.is_continuation_marker())
            .count()
    }

    /// Render the window of tokens starting at `position`
    ///
    /// `words` and `pos` must have the same length, and the window must fit
    /// inside of them.
    pub fn apply(&self, words: &[&str], pos: &[&str], position: usize) -> String {
        let mut result = String::new();
        let mut first = true;
        for (offset, elem) in self.elems.iter().enumerate() {
            if *elem == PatternElem::Delete {
                continue;
            }
            if !first {
                result.push(' ');
            }
            first = false;
            result.push_str(elem.apply(words[position + offset], pos[position + offset]));
        }
        result
    }

    /// Replace every occurence of an element
    pub fn replace(&self, target: PatternElem, replacement: PatternElem) -> Self {
        let elems = (self.elems.iter())
            .map(|&elem| if elem == target { replacement } else { elem })
            .collect::<Vec<_>>();
        Self::new(elems).expect("replacing elements preserves the pattern length")
    }

    /// Replace the rightmost occurence of an element
    pub fn replace_last(&self, target: PatternElem, replacement: PatternElem) -> Self {
        let mut elems = self.elems.to_vec();
        if let Some(elem) = elems.iter_mut().rev().find(|elem| **elem == target) {
            *elem = replacement;
        }
        Self::new(elems).expect("replacing elements preserves the pattern length")
    }

    /// Position of the rightmost continuation marker
    fn last_continuation_marker(&self) -> Option<usize> {
        self.elems.iter().rposition(|elem| elem.is_continuation_marker())
    }

    /// Pattern whose counts this continuation pattern is derived from
    ///
    /// Obtained by replacing the rightmost continuation marker with the
    /// literal element it generalizes. `None` for absolute patterns.
    pub fn continuation_source(&self) -> Option<Self> {
        let index = self.last_continuation_marker()?;
        let mut elems = self.elems.to_vec();
        elems[index] = elems[index]
            .continuation_source()
            .expect("continuation markers have a source element");
        Some(Self::new(elems).expect("replacing elements preserves the pattern length"))
    }

    /// Index, within rendered sequences, of the token that the rightmost
    /// continuation marker generalizes
    ///
    /// Differs from the element index when `Delete` elements precede it.
    pub fn continuation_token_index(&self) -> Option<usize> {
        let index = self.last_continuation_marker()?;
        Some(
            self.elems[..index]
                .iter()
                .filter(|&&elem| elem != PatternElem::Delete)
                .count(),
        )
    }

    /// Length of the longest pattern in a set
    pub fn model_length<'a>(patterns: impl IntoIterator<Item = &'a Pattern>) -> usize {
        patterns.into_iter().map(Pattern::len).max().unwrap_or(0)
    }

    /// Every pattern of length 1 to `model_length` made of some elements
    pub fn combinations(model_length: usize, elems: &[PatternElem]) -> BTreeSet<Self> {
        let mut patterns = BTreeSet::new();
        if elems.is_empty() {
            return patterns;
        }
        let mut current = Vec::with_capacity(model_length);
        for length in 1..=model_length {
            Self::push_combinations(length, elems, &mut current, &mut patterns);
        }
        patterns
    }

    /// Recursive helper of [`combinations()`](Self::combinations)
    fn push_combinations(
        length: usize,
        elems: &[PatternElem],
        current: &mut Vec<PatternElem>,
        output: &mut BTreeSet<Self>,
    ) {
        if current.len() == length {
            output.insert(Self::new(current.clone()).expect("length is at least 1"));
            return;
        }
        for &elem in elems {
            current.push(elem);
            Self::push_combinations(length, elems, current, output);
            current.pop();
        }
    }

    /// For each pattern with skipped positions, the variants where `target`
    /// is replaced by each of `elems`
    pub fn replace_target_with_elems<'a>(
        patterns: impl IntoIterator<Item = &'a Pattern>,
        target: PatternElem,
        elems: &[PatternElem],
    ) -> BTreeSet<Self> {
        let mut result = BTreeSet::new();
        for pattern in patterns {
            if pattern.contains_skip() {
                for &elem in elems {
                    result.insert(pattern.replace(target, elem));
                }
            }
        }
        result
    }
}
//
impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({})", self.text)
    }
}
//
impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
//
impl FromStr for Pattern {
    type Err = CountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let elems = s
            .chars()
            .map(|symbol| {
                PatternElem::from_symbol(symbol).ok_or_else(|| CountError::InvalidPattern {
                    pattern: s.to_owned(),
                    reason: "unknown pattern element symbol",
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(elems)
    }
}
//
impl TryFrom<String> for Pattern {
    type Error = CountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
//
impl From<Pattern> for String {
    fn from(value: Pattern) -> Self {
        value.text.to_string()
    }
}
//
impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}
//
impl Eq for Pattern {}
//
impl PartialOrd for Pattern {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
//
impl Ord for Pattern {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}
//
impl Hash for Pattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state)
    }
}

#[cfg(test)]
mod tests {
    use super::{PatternElem::*, *};

    fn p(s: &str) -> Pattern {
        s.parse().unwrap()
    }

    #[test]
    fn string_form_roundtrips_through_elements() {
        let pattern = Pattern::new(vec![Count, Skip, Pos, WordSkip, PosSkip, WordPosSkip, Delete])
            .unwrap();
        assert_eq!(pattern.as_str(), "102xyzd");
        assert_eq!(pattern.to_string(), "102xyzd");
        assert_eq!(p("102xyzd"), pattern);
        assert_eq!(pattern.len(), 7);
        assert_eq!(pattern.get(3), WordSkip);
        assert_eq!(pattern.iter().collect::<Vec<_>>(), pattern.elems());
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert!(matches!(
            "".parse::<Pattern>(),
            Err(CountError::InvalidPattern { .. })
        ));
        assert!(matches!(
            "1a".parse::<Pattern>(),
            Err(CountError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn classification() {
        assert!(p("101").is_absolute());
        assert!(p("2d1").is_absolute());
        assert!(!p("x1").is_absolute());
        assert_eq!(p("x1").family(), Family::Continuation);
        assert!(p("21").contains_pos());
        assert!(!p("y1").contains_pos());
        assert!(p("10").contains_skip());
        assert!(!p("11").contains_skip());
        assert!(p("0xz").only_skip());
        assert!(!p("0x1").only_skip());
        assert_eq!(p("00x1").first_non_skip(), WordSkip);
        assert_eq!(p("00").first_non_skip(), Skip);
        assert_eq!(p("xy1z").continuation_marker_count(), 3);
    }

    #[test]
    fn apply_renders_windows() {
        let words = ["the", "quick", "fox", "jumps"];
        let pos = ["DT", "JJ", "NN", "VBZ"];
        assert_eq!(p("11").apply(&words, &pos, 1), "quick fox");
        assert_eq!(p("101").apply(&words, &pos, 0), "the _ fox");
        assert_eq!(p("x2").apply(&words, &pos, 2), "% VBZ");
        assert_eq!(p("d11").apply(&words, &pos, 0), "quick fox");
        assert_eq!(p("1d1").apply(&words, &pos, 1), "quick jumps");
    }

    #[test]
    fn replacements_make_new_patterns() {
        let original = p("0101");
        assert_eq!(original.replace(Skip, WordSkip), p("x1x1"));
        assert_eq!(original.replace_last(Skip, WordSkip), p("01x1"));
        assert_eq!(original.replace_last(Pos, WordSkip), original);
        assert_eq!(original, p("0101"));
    }

    #[test]
    fn continuation_sources() {
        assert_eq!(p("11").continuation_source(), None);
        assert_eq!(p("x1").continuation_source(), Some(p("11")));
        assert_eq!(p("xx").continuation_source(), Some(p("x1")));
        assert_eq!(p("x1y").continuation_source(), Some(p("x12")));
        assert_eq!(p("z0").continuation_source(), Some(p("10")));
        let mut pattern = p("xyzx");
        let mut steps = 0;
        while let Some(source) = pattern.continuation_source() {
            assert_eq!(
                source.continuation_marker_count() + 1,
                pattern.continuation_marker_count()
            );
            pattern = source;
            steps += 1;
        }
        assert_eq!(steps, 4);
        assert!(pattern.is_absolute());
    }

    #[test]
    fn continuation_token_index_skips_deleted_positions() {
        assert_eq!(p("x1").continuation_token_index(), Some(0));
        assert_eq!(p("1x").continuation_token_index(), Some(1));
        assert_eq!(p("dd1x").continuation_token_index(), Some(1));
        assert_eq!(p("x1x").continuation_token_index(), Some(2));
        assert_eq!(p("11").continuation_token_index(), None);
    }

    #[test]
    fn combinations_cover_all_lengths() {
        let patterns = Pattern::combinations(2, &[Count, Skip]);
        let expected = ["0", "1", "00", "01", "10", "11"]
            .into_iter()
            .map(p)
            .collect::<BTreeSet<_>>();
        assert_eq!(patterns, expected);
        assert_eq!(Pattern::model_length(&patterns), 2);
        assert_eq!(Pattern::combinations(3, &[Count, Skip, Pos]).len(), 3 + 9 + 27);
    }

    #[test]
    fn continuation_variants_of_skipped_patterns() {
        let absolute = Pattern::combinations(2, &[Count, Skip]);
        let continuation = Pattern::replace_target_with_elems(&absolute, Skip, &[WordSkip]);
        let expected = ["x", "1x", "x1", "xx"]
            .into_iter()
            .map(p)
            .collect::<BTreeSet<_>>();
        assert_eq!(continuation, expected);
    }

    #[test]
    fn serde_uses_string_form() {
        let json = serde_json::to_string(&p("x1")).unwrap();
        assert_eq!(json, "\"x1\"");
        assert_eq!(serde_json::from_str::<Pattern>(&json).unwrap(), p("x1"));
        assert!(serde_json::from_str::<Pattern>("\"q\"").is_err());
    }
}
