//! Path interner: the authoritative bidirectional `string <-> token`
//! mapping held by the client. Tokens are derived from a deterministic
//! 64-bit hash of the string, first-seen wins, and remain stable for the
//! life of the instance. They are not portable across processes or runs.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::handle::PathHandle;

#[derive(Default)]
pub struct PathInterner {
    to_string: HashMap<PathHandle, String>,
    to_token: HashMap<String, PathHandle>,
}

impl PathInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a path string, returning its stable non-zero token.
    pub fn intern(&mut self, path: &str) -> PathHandle {
        if let Some(&token) = self.to_token.get(path) {
            return token;
        }

        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let mut raw = hasher.finish();
        // zero is the null path; collisions probe linearly (first-seen wins)
        loop {
            if raw == 0 {
                raw = 1;
                continue;
            }
            let candidate = PathHandle::from_raw(raw);
            if !self.to_string.contains_key(&candidate) {
                self.to_string.insert(candidate, path.to_owned());
                self.to_token.insert(path.to_owned(), candidate);
                return candidate;
            }
            raw = raw.wrapping_add(1);
        }
    }

    /// Token for an already-interned string, if any.
    pub fn token_of(&self, path: &str) -> Option<PathHandle> {
        self.to_token.get(path).copied()
    }

    pub fn string_of(&self, token: PathHandle) -> Option<&str> {
        self.to_string.get(&token).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.to_string.clear();
        self.to_token.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_exact() {
        let mut interner = PathInterner::new();
        let token = interner.intern("/user/hand/left");
        assert!(!token.is_null());
        assert_eq!(interner.string_of(token), Some("/user/hand/left"));
    }

    #[test]
    fn same_string_same_token() {
        let mut interner = PathInterner::new();
        let first = interner.intern("/user/hand/left/input/trigger/value");
        let second = interner.intern("/user/hand/left/input/trigger/value");
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_strings_distinct_tokens() {
        let mut interner = PathInterner::new();
        let mut tokens = std::collections::HashSet::new();
        for i in 0..1000 {
            let token = interner.intern(&format!("/user/gadget/{i}"));
            assert!(tokens.insert(token), "token collision leaked to caller");
        }
    }

    #[test]
    fn tokens_survive_many_interns() {
        let mut interner = PathInterner::new();
        let anchor = interner.intern("/user/head");
        for i in 0..100 {
            interner.intern(&format!("/user/other/{i}"));
        }
        assert_eq!(interner.token_of("/user/head"), Some(anchor));
        assert_eq!(interner.string_of(anchor), Some("/user/head"));
    }
}
