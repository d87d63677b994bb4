//! Glob patterns for cache key filters.
//!
//! Supports `*` (any run, including empty), `?` (one character) and `[...]`
//! classes with ranges (`a-z`) and negation (`[^...]`). Patterns are checked
//! once when compiled so matching itself cannot fail.

use kvwire_common::{KvError, KvResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Star,
    Any,
    Literal(char),
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

impl ClassItem {
    fn contains(self, ch: char) -> bool {
        match self {
            ClassItem::Char(expected) => expected == ch,
            ClassItem::Range(lo, hi) => (lo.min(hi)..=lo.max(hi)).contains(&ch),
        }
    }
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    pattern: String,
    tokens: Vec<Token>,
}

impl Glob {
    /// Compiles `pattern`; an unterminated `[` class is a configuration error.
    pub fn new(pattern: &str) -> KvResult<Self> {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            let token = match ch {
                '*' => Token::Star,
                '?' => Token::Any,
                '[' => {
                    let negated = chars.next_if_eq(&'^').is_some();
                    let mut items = Vec::new();
                    let mut closed = false;
                    while let Some(ch) = chars.next() {
                        if ch == ']' {
                            closed = true;
                            break;
                        }
                        match (chars.peek().copied(), chars.clone().nth(1)) {
                            (Some('-'), Some(hi)) if hi != ']' => {
                                chars.next();
                                chars.next();
                                items.push(ClassItem::Range(ch, hi));
                            }
                            _ => items.push(ClassItem::Char(ch)),
                        }
                    }
                    if !closed {
                        return Err(KvError::Configuration(format!(
                            "unterminated character class in pattern {:?}",
                            pattern
                        )));
                    }
                    Token::Class { negated, items }
                }
                other => Token::Literal(other),
            };
            tokens.push(token);
        }
        Ok(Glob {
            pattern: pattern.to_string(),
            tokens,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, input: &str) -> bool {
        let input: Vec<char> = input.chars().collect();
        match_tokens(&self.tokens, &input)
    }
}

/// One-shot match of `input` against `pattern`.
pub fn matches(input: &str, pattern: &str) -> KvResult<bool> {
    Ok(Glob::new(pattern)?.matches(input))
}

impl Token {
    /// Whether a single-character token accepts `ch`. Stars never do.
    fn accepts(&self, ch: char) -> bool {
        match self {
            Token::Star => false,
            Token::Any => true,
            Token::Literal(expected) => *expected == ch,
            Token::Class { negated, items } => {
                items.iter().any(|item| item.contains(ch)) != *negated
            }
        }
    }
}

/// Star-backtracking matcher: only the most recent `*` is ever retried, so
/// matching is iterative and at worst `tokens * input` steps.
fn match_tokens(tokens: &[Token], input: &[char]) -> bool {
    let (mut t, mut i) = (0, 0);
    // Token index of the last star and the input position it resumes from.
    let mut resume: Option<(usize, usize)> = None;
    while i < input.len() {
        match tokens.get(t) {
            Some(Token::Star) => {
                resume = Some((t, i));
                t += 1;
                continue;
            }
            Some(token) if token.accepts(input[i]) => {
                t += 1;
                i += 1;
                continue;
            }
            _ => {}
        }
        match resume {
            Some((star, from)) => {
                // Let the star swallow one more character and retry.
                resume = Some((star, from + 1));
                t = star + 1;
                i = from + 1;
            }
            None => return false,
        }
    }
    tokens[t..].iter().all(|token| *token == Token::Star)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stars_and_question_marks() {
        assert!(matches("foo:123", "foo:*").unwrap());
        assert!(matches("foo:123", "foo:?23").unwrap());
        assert!(matches("foo:", "foo:*").unwrap());
        assert!(matches("foo", "f**").unwrap());
        assert!(!matches("foo:123", "bar:*").unwrap());
        assert!(!matches("foo", "foo?").unwrap());
    }

    #[test]
    fn empty_pattern_only_matches_empty_input() {
        assert!(matches("", "").unwrap());
        assert!(matches("", "*").unwrap());
        assert!(!matches("a", "").unwrap());
        assert!(!matches("", "?").unwrap());
    }

    #[test]
    fn classes() {
        assert!(matches("foo:123", "foo:[0-9]*").unwrap());
        assert!(!matches("foo:abc", "foo:[0-9]*").unwrap());
        assert!(matches("cat", "[bc]at").unwrap());
        assert!(!matches("hat", "[bc]at").unwrap());
        assert!(matches("hat", "[^bc]at").unwrap());
        assert!(matches("a-b", "a[-]b").unwrap());
    }

    #[test]
    fn unterminated_class_is_configuration_error() {
        let err = matches("foo:1", "foo:[0-9").unwrap_err();
        assert!(matches!(err, KvError::Configuration(_)));
        assert!(Glob::new("[").is_err());
    }

    #[test]
    fn backtracks_to_the_latest_star() {
        assert!(matches("abcbd", "a*b?").unwrap());
        assert!(matches("user:1:profile:name", "user:*:profile:*").unwrap());
        assert!(!matches("user:1:settings", "user:*:profile:*").unwrap());
        assert!(matches("xaab", "*a*b").unwrap());
        assert!(!matches("xaac", "*a*b").unwrap());
    }

    #[test]
    fn long_keys_and_many_stars_stay_cheap() {
        let key = "a".repeat(100_000);
        assert!(matches(&key, "*a").unwrap());
        assert!(!matches(&key, "*a*a*a*a*a*a*a*a*b").unwrap());
    }

    #[test]
    fn non_ascii_characters_count_once() {
        assert!(matches("café", "caf?").unwrap());
        assert!(matches("日本", "?本").unwrap());
    }
}
