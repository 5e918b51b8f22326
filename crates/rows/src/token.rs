//! Ring placement: tokens, the partitioner and decorated keys.

use std::cmp::Ordering;
use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

/// A position on the token ring.
///
/// `Token::MIN` is the ring minimum. It is never produced for a key; it only
/// appears as a range bound meaning "start/end of the ring".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub i64);

impl Token {
    pub const MIN: Token = Token(i64::MIN);

    #[must_use]
    pub fn is_minimum(self) -> bool {
        self == Self::MIN
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash partitioner deriving a token from the raw key bytes (xxh3-64).
///
/// Tokens depend only on the bytes of the key, never on how its columns
/// are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Partitioner;

impl Partitioner {
    /// Returns the token for `key`.
    #[must_use]
    pub fn token(&self, key: &[u8]) -> Token {
        let raw = xxh3_64(key) as i64;
        // MIN is reserved for range bounds.
        if raw == i64::MIN {
            Token(i64::MAX)
        } else {
            Token(raw)
        }
    }

    /// Pairs `key` with its token.
    #[must_use]
    pub fn decorate_key(&self, key: Vec<u8>) -> DecoratedKey {
        DecoratedKey {
            token: self.token(&key),
            key,
        }
    }
}

/// A partition key together with its ring token.
///
/// Ordered by token first, then by raw key bytes, which is the order
/// partitions appear in a segment.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DecoratedKey {
    token: Token,
    key: Vec<u8>,
}

impl DecoratedKey {
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn into_key(self) -> Vec<u8> {
        self.key
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecoratedKey({}, {})", self.token, hex(&self.key))
    }
}

impl fmt::Display for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
