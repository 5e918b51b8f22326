//! Token ranges and their normalization.
//!
//! A [`TokenRange`] is the half-open span `(left, right]`. A range whose
//! `left >= right` wraps around the end of the ring, except when `right` is
//! [`Token::MIN`], which means "up to the end of the ring". `(t, t]` covers
//! the full ring.

use std::fmt;

use crate::token::Token;

/// The token span `(left, right]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenRange {
    pub left: Token,
    pub right: Token,
}

impl TokenRange {
    #[must_use]
    pub fn new(left: Token, right: Token) -> Self {
        Self { left, right }
    }

    /// The range covering every token.
    #[must_use]
    pub fn full_ring() -> Self {
        Self::new(Token::MIN, Token::MIN)
    }

    #[must_use]
    pub fn is_wrap_around(&self) -> bool {
        self.left >= self.right && !self.right.is_minimum()
    }

    /// Returns `true` if `token` lies in `(left, right]`.
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        if self.is_wrap_around() {
            token > self.left || token <= self.right
        } else {
            token > self.left && (self.right.is_minimum() || token <= self.right)
        }
    }

    /// Splits a wrapping range at the ring minimum. Non-wrapping ranges are
    /// returned unchanged.
    #[must_use]
    pub fn unwrap(&self) -> Vec<TokenRange> {
        if self.is_wrap_around() {
            vec![
                TokenRange::new(self.left, Token::MIN),
                TokenRange::new(Token::MIN, self.right),
            ]
        } else {
            vec![*self]
        }
    }

    /// Unwraps, sorts and merges `ranges` into a sorted list of
    /// non-overlapping, non-wrapping ranges.
    ///
    /// The result is ordered by `left`, so a sequence of ascending tokens
    /// can be matched against it with a single forward scan.
    #[must_use]
    pub fn normalize<I>(ranges: I) -> Vec<TokenRange>
    where
        I: IntoIterator<Item = TokenRange>,
    {
        let mut unwrapped: Vec<TokenRange> = ranges.into_iter().flat_map(|r| r.unwrap()).collect();
        unwrapped.sort_by(|a, b| {
            a.left
                .cmp(&b.left)
                .then_with(|| end_key(a.right).cmp(&end_key(b.right)))
        });

        let mut out: Vec<TokenRange> = Vec::with_capacity(unwrapped.len());
        for range in unwrapped {
            match out.last_mut() {
                // Extends to the end of the ring, nothing sorted after it can escape it.
                Some(last) if last.right.is_minimum() => {}
                Some(last) if range.left <= last.right => {
                    if end_key(range.right) > end_key(last.right) {
                        last.right = range.right;
                    }
                }
                _ => out.push(range),
            }
        }
        out
    }
}

/// Sort key for a right bound: MIN as a right bound means "end of ring".
fn end_key(right: Token) -> i128 {
    if right.is_minimum() {
        i128::from(i64::MAX) + 1
    } else {
        i128::from(right.0)
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}]", self.left, self.right)
    }
}

/// Formats a range list as `[(a,b], (c,d]]` for diagnostics.
#[must_use]
pub fn format_ranges(ranges: &[TokenRange]) -> String {
    let parts: Vec<String> = ranges.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}
