//! Stream naming.

use rand::Rng;
use std::fmt;

/// The name of the stream a harness manages: `test-<project>-<8 hex digits>`.
///
/// Generated once per harness and never changed; every backend call made on
/// the harness's behalf uses it. The random suffix keeps concurrent test runs
/// of the same project from colliding on a shared account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamName(String);

impl StreamName {
    /// A fresh name for `project`.
    ///
    /// A project tag made only of `[a-zA-Z0-9_.-]` is used as given. Any other
    /// character is replaced by `-`, since the service rejects it in stream
    /// names: `@scope/my pkg` yields `test--scope-my-pkg-<suffix>`.
    pub fn generate(project: &str) -> Self {
        let suffix: u32 = rand::thread_rng().gen();
        Self(format!("test-{}-{suffix:08x}", sanitize(project)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StreamName {
    /// Use an existing name as is, e.g. to attach to a stream created elsewhere.
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Stream names only allow `[a-zA-Z0-9_.-]`; anything else in a project
/// name (scoped package names, spaces) becomes `-`.
fn sanitize(project: &str) -> String {
    project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
