use std::fmt;

/// Ordered cursor through a paginated result. Its `Display` form becomes
/// the last component of the page's cache key.
pub trait PageIdentifier: Clone + Ord + fmt::Display + Send + Sync + 'static {
    fn first() -> Self;

    /// The following page; always greater than `self`
    #[must_use]
    fn next(&self) -> Self;
}

/// One-based page number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNumber(u32);

impl PageNumber {
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(if number == 0 { 1 } else { number })
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl PageIdentifier for PageNumber {
    fn first() -> Self {
        Self(1)
    }

    fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

/// Zero-based item offset advanced by a fixed page size
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset<const SIZE: usize>(usize);

impl<const SIZE: usize> Offset<SIZE> {
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl<const SIZE: usize> PageIdentifier for Offset<SIZE> {
    fn first() -> Self {
        Self(0)
    }

    fn next(&self) -> Self {
        Self(self.0.saturating_add(SIZE))
    }
}

impl<const SIZE: usize> fmt::Display for Offset<SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset-{}", self.0)
    }
}
