use std::fmt;

/// Hierarchical datastore key.
///
/// A key is a `/`-separated path. It always starts with `/`, never ends
/// with one (except the root key itself) and contains no empty, `.` or
/// `..` segments. Constructing a key from any string cleans it into that
/// form, so `"pins/Qm"`, `"/pins//Qm/"` and `"/pins/./Qm"` are the same key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.as_ref().split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        Self(format!("/{}", segments.join("/")))
    }

    pub fn root() -> Self {
        Self("/".to_owned())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Appends `name` (which may itself contain `/`) below this key.
    pub fn child(&self, name: impl AsRef<str>) -> Self {
        Self::new(format!("{}/{}", self.0, name.as_ref()))
    }

    /// Joins a relative key below this one.
    pub fn join(&self, other: &Key) -> Self {
        self.child(other.as_str())
    }

    /// The path segments of this key; empty for the root.
    pub fn namespaces(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// The last segment, or `""` for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Returns true if `self` lives strictly below `prefix`.
    pub fn is_descendant_of(&self, prefix: &Key) -> bool {
        if prefix.is_root() {
            return !self.is_root();
        }
        self.0.len() > prefix.0.len()
            && self.0.starts_with(&prefix.0)
            && self.0.as_bytes()[prefix.0.len()] == b'/'
    }

    /// Re-roots a descendant of `prefix` so that it is relative to it.
    pub fn strip_prefix(&self, prefix: &Key) -> Option<Key> {
        if prefix.is_root() {
            return Some(self.clone());
        }
        if !self.is_descendant_of(prefix) {
            return None;
        }
        Some(Key::new(&self.0[prefix.0.len()..]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.0).finish()
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::new(value)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::new(value)
    }
}
