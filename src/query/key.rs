use std::fmt;
use std::sync::Arc;

/// Opaque identifier locating a cached value and an invalidation channel.
///
/// A key is an immutable list of components. Sub-keys (for example the
/// page-qualified keys of a paginated query) are derived with
/// [`QueryKey::appending`], which never mutates the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    components: Arc<[String]>,
}

impl QueryKey {
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            components: Arc::from(vec![root.into()]),
        }
    }

    #[must_use]
    pub fn from_components<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// Derives a new key with `component` appended
    #[must_use]
    pub fn appending(&self, component: impl fmt::Display) -> Self {
        let mut components = self.components.to_vec();
        components.push(component.to_string());
        Self {
            components: Arc::from(components),
        }
    }

    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Whether `self` is `other` or was derived from it
    #[must_use]
    pub fn starts_with(&self, other: &Self) -> bool {
        self.components.starts_with(&other.components)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join(":"))
    }
}

impl From<&str> for QueryKey {
    fn from(root: &str) -> Self {
        Self::new(root)
    }
}

impl From<String> for QueryKey {
    fn from(root: String) -> Self {
        Self::new(root)
    }
}
