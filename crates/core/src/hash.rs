//! 64-bit FNV-1a, the hash behind report ids, result ids and label buckets.

const OFFSET: u64 = 0xcbf29ce484222325;
const PRIME: u64 = 0x100000001b3;
// Never occurs in UTF-8, so field boundaries cannot be forged by content.
const SEPARATOR: u8 = 0xff;

/// Incremental FNV-1a hasher. Every non-empty field is followed by a separator
/// byte; folding an empty string leaves the state untouched, so absent fields
/// never contribute to a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fnv64(u64);

impl Fnv64 {
    pub fn new() -> Self {
        Self(OFFSET)
    }

    pub fn add_str(self, s: &str) -> Self {
        if s.is_empty() {
            return self;
        }
        let mut h = self.0;
        for b in s.as_bytes().iter().chain(std::iter::once(&SEPARATOR)) {
            h ^= *b as u64;
            h = h.wrapping_mul(PRIME);
        }
        Self(h)
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for Fnv64 {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash a sequence of strings in order.
pub fn fnv1a<'a>(parts: impl IntoIterator<Item = &'a str>) -> u64 {
    parts.into_iter().fold(Fnv64::new(), Fnv64::add_str).finish()
}
