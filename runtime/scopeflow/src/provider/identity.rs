use std::fmt;
use std::sync::Arc;

/// The stable key of a provider declaration.
///
/// Two declarations with the same identity are the same logical dependency:
/// within one request they resolve to the same cached value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Arc<str>);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&Identity> for Identity {
    fn from(value: &Identity) -> Self {
        value.clone()
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
/// A set of coordinates to identify a precise spot in a source file.
///
/// It's captured via `#[track_caller]` whenever a provider or an endpoint is declared,
/// so that diagnostics can point back at the registration site.
pub struct Location {
    /// The line number, 1-indexed.
    pub line: u32,
    /// The column number, 1-indexed.
    pub column: u32,
    /// The name of the source file.
    pub file: &'static str,
}

impl Location {
    #[track_caller]
    pub fn caller() -> Self {
        std::panic::Location::caller().into()
    }
}

impl From<&'static std::panic::Location<'static>> for Location {
    fn from(l: &'static std::panic::Location<'static>) -> Self {
        Self {
            line: l.line(),
            column: l.column(),
            file: l.file(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
