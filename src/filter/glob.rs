//! Dot-separated path globs.
//!
//! Syntax:
//! - `*` matches zero or more characters within one segment (never `.`)
//! - `**` matches zero or more characters across segments
//! - `?` matches exactly one non-`.` character
//! - `[abc]`, `[a-z]`, `[!abc]` / `[^abc]` character classes (never `.`)
//! - `{a,b}` alternatives, nestable
//! - `\x` matches `x` literally
//!
//! Matching is always against the whole path.

use std::cell::Cell;
use std::fmt;

use thiserror::Error;

/// Path segment separator.
pub const SEPARATOR: char = '.';

/// Work bound per match attempt; pathological patterns such as `*a*a*a*a*b`
/// report a non-match instead of burning CPU.
const MAX_MATCH_CALLS: usize = 100_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,

    #[error("pattern '{pattern}': unclosed '[' at offset {offset}")]
    UnclosedClass { pattern: String, offset: usize },

    #[error("pattern '{pattern}': unclosed '{{'")]
    UnclosedBrace { pattern: String },

    #[error("pattern '{pattern}': unmatched '}}' at offset {offset}")]
    UnmatchedBrace { pattern: String, offset: usize },

    #[error("pattern '{pattern}': dangling '\\' at end")]
    DanglingEscape { pattern: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    Star,
    SuperStar,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn accepts(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => c != SEPARATOR,
            Token::Class { negated, ranges } => {
                c != SEPARATOR && ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi) != *negated
            }
            Token::Star | Token::SuperStar => false,
        }
    }
}

/// A compiled glob. Braces are expanded at compile time, so a pattern is a
/// set of plain token sequences and matches if any of them does.
#[derive(Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    alternatives: Vec<Vec<Token>>,
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, PatternError> {
        if source.is_empty() {
            return Err(PatternError::Empty);
        }
        let chars: Vec<char> = source.chars().collect();
        let mut parser = Parser {
            source,
            chars: &chars,
            pos: 0,
        };
        let alternatives = parser.sequence(false)?;
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    /// Pattern that matches every path.
    pub fn everything() -> Self {
        Self {
            source: "**".to_string(),
            alternatives: vec![vec![Token::SuperStar]],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        let input: Vec<char> = path.chars().collect();
        self.alternatives.iter().any(|tokens| {
            let calls = Cell::new(0usize);
            match_from(tokens, 0, &input, 0, &calls)
        })
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: &'a [char],
    pos: usize,
}

impl Parser<'_> {
    /// Parse up to end of input, or up to an unnested `,`/`}` when inside a
    /// brace group. Returns every expansion of what was read.
    fn sequence(&mut self, in_brace: bool) -> Result<Vec<Vec<Token>>, PatternError> {
        let mut expansions: Vec<Vec<Token>> = vec![Vec::new()];

        while let Some(&c) = self.chars.get(self.pos) {
            match c {
                ',' | '}' if in_brace => return Ok(expansions),
                '}' => {
                    return Err(PatternError::UnmatchedBrace {
                        pattern: self.source.to_string(),
                        offset: self.pos,
                    });
                }
                '{' => {
                    self.pos += 1;
                    let branches = self.group()?;
                    expansions = expansions
                        .into_iter()
                        .flat_map(|prefix| {
                            branches.iter().map(move |branch| {
                                let mut joined = prefix.clone();
                                joined.extend(branch.iter().cloned());
                                joined
                            })
                        })
                        .collect();
                    continue;
                }
                _ => {}
            }

            let token = self.token()?;
            for expansion in &mut expansions {
                expansion.push(token.clone());
            }
        }

        if in_brace {
            return Err(PatternError::UnclosedBrace {
                pattern: self.source.to_string(),
            });
        }
        Ok(expansions)
    }

    /// Called just past `{`; consumes through the matching `}`.
    fn group(&mut self) -> Result<Vec<Vec<Token>>, PatternError> {
        let mut branches = Vec::new();
        loop {
            branches.extend(self.sequence(true)?);
            match self.chars.get(self.pos) {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(branches);
                }
                _ => {
                    return Err(PatternError::UnclosedBrace {
                        pattern: self.source.to_string(),
                    });
                }
            }
        }
    }

    fn token(&mut self) -> Result<Token, PatternError> {
        let c = self.chars[self.pos];
        self.pos += 1;
        Ok(match c {
            '*' => {
                if self.chars.get(self.pos) == Some(&'*') {
                    while self.chars.get(self.pos) == Some(&'*') {
                        self.pos += 1;
                    }
                    Token::SuperStar
                } else {
                    Token::Star
                }
            }
            '?' => Token::AnyChar,
            '[' => self.class(self.pos - 1)?,
            '\\' => match self.chars.get(self.pos) {
                Some(&escaped) => {
                    self.pos += 1;
                    Token::Literal(escaped)
                }
                None => {
                    return Err(PatternError::DanglingEscape {
                        pattern: self.source.to_string(),
                    });
                }
            },
            other => Token::Literal(other),
        })
    }

    /// Called just past `[`.
    fn class(&mut self, offset: usize) -> Result<Token, PatternError> {
        let unclosed = || PatternError::UnclosedClass {
            pattern: self.source.to_string(),
            offset,
        };

        let negated = matches!(self.chars.get(self.pos), Some('!' | '^'));
        if negated {
            self.pos += 1;
        }

        let mut ranges = Vec::new();
        let mut first = true;
        loop {
            let c = *self.chars.get(self.pos).ok_or_else(unclosed)?;
            // A ']' right after the opening bracket is a member, not the end.
            if c == ']' && !first {
                self.pos += 1;
                break;
            }
            first = false;
            self.pos += 1;

            let lo = if c == '\\' {
                let escaped = *self.chars.get(self.pos).ok_or_else(unclosed)?;
                self.pos += 1;
                escaped
            } else {
                c
            };

            let is_range = self.chars.get(self.pos) == Some(&'-')
                && self.chars.get(self.pos + 1).is_some_and(|&n| n != ']');
            if is_range {
                let hi = self.chars[self.pos + 1];
                self.pos += 2;
                ranges.push((lo.min(hi), lo.max(hi)));
            } else {
                ranges.push((lo, lo));
            }
        }

        Ok(Token::Class { negated, ranges })
    }
}

fn match_from(tokens: &[Token], ti: usize, input: &[char], ii: usize, calls: &Cell<usize>) -> bool {
    let count = calls.get() + 1;
    calls.set(count);
    if count > MAX_MATCH_CALLS {
        return false;
    }

    let Some(token) = tokens.get(ti) else {
        return ii == input.len();
    };

    match token {
        Token::SuperStar => {
            if ti + 1 == tokens.len() {
                return true;
            }
            (ii..=input.len()).any(|next| match_from(tokens, ti + 1, input, next, calls))
        }
        Token::Star => {
            let segment_end = input[ii..]
                .iter()
                .position(|&c| c == SEPARATOR)
                .map_or(input.len(), |offset| ii + offset);
            (ii..=segment_end).any(|next| match_from(tokens, ti + 1, input, next, calls))
        }
        single => match input.get(ii) {
            Some(&c) if single.accepts(c) => match_from(tokens, ti + 1, input, ii + 1, calls),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        Pattern::new(pattern).unwrap().matches(path)
    }

    #[test]
    fn literal_is_whole_path() {
        assert!(matches("a.b", "a.b"));
        assert!(!matches("a.b", "a.b.c"));
        assert!(!matches("a.b", "xa.b"));
        assert!(!matches("a", "a.b"));
    }

    #[test]
    fn star_stays_within_segment() {
        assert!(matches("a.*", "a.b"));
        assert!(matches("a.*", "a."));
        assert!(!matches("a.*", "a.b.c"));
        assert!(matches("*_date", "last_analysis_date"));
        assert!(!matches("*_date", "x.last_date"));
        assert!(matches("a.*.c", "a.anything.c"));
    }

    #[test]
    fn superstar_crosses_segments() {
        assert!(matches("**", "a"));
        assert!(matches("**", "a.b.c"));
        assert!(matches("foo**", "foo"));
        assert!(matches("foo**", "foo.qux.quux.key1"));
        assert!(matches("**.quux", "foo.qux.quux"));
        assert!(!matches("**.quux", "quux"));
        assert!(matches("a.**", "a.b"));
        assert!(!matches("a.**", "b.a"));
        assert!(matches("**.key?", "foo.qux.quux.key3"));
    }

    #[test]
    fn single_char_and_classes() {
        assert!(matches("key?", "key1"));
        assert!(!matches("a?b", "a.b"));
        assert!(matches("key[12]", "key2"));
        assert!(!matches("key[12]", "key3"));
        assert!(matches("key[1-3]", "key3"));
        assert!(matches("key[!1-3]", "key9"));
        assert!(!matches("key[^1-3]", "key2"));
        assert!(!matches("a[!x]b", "a.b"));
        assert!(matches("[]]", "]"));
    }

    #[test]
    fn braces_expand_alternatives() {
        assert!(matches("{names,tags}", "tags"));
        assert!(matches("stats.{harmless,malicious}", "stats.malicious"));
        assert!(!matches("stats.{harmless,malicious}", "stats.undetected"));
        assert!(matches("a.{b,c.{d,e}}", "a.c.e"));
        assert!(matches("a{,.b}", "a"));
        assert!(matches("a{,.b}", "a.b"));
    }

    #[test]
    fn escapes_are_literal() {
        assert!(matches(r"a\*", "a*"));
        assert!(!matches(r"a\*", "ab"));
        assert!(matches(r"a\.b", "a.b"));
    }

    #[test]
    fn malformed_patterns_fail_to_compile() {
        assert_eq!(Pattern::new(""), Err(PatternError::Empty));
        assert!(matches!(
            Pattern::new("a.[bc"),
            Err(PatternError::UnclosedClass { offset: 2, .. })
        ));
        assert!(matches!(
            Pattern::new("a.{b,c"),
            Err(PatternError::UnclosedBrace { .. })
        ));
        assert!(matches!(
            Pattern::new("a}"),
            Err(PatternError::UnmatchedBrace { offset: 1, .. })
        ));
        assert!(matches!(
            Pattern::new("a\\"),
            Err(PatternError::DanglingEscape { .. })
        ));
    }

    #[test]
    fn pathological_pattern_terminates() {
        let pattern = Pattern::new("*a*a*a*a*a*a*a*a*a*b").unwrap();
        assert!(!pattern.matches(&"a".repeat(64)));
    }
}
