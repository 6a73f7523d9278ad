use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Io(std::io::Error),

    /// A fetch function failed
    Fetch(String),

    /// Process-wide state was set up twice
    AlreadyInitialized(String),

    /// Custom error message
    Custom(String),
}

impl Error {
    /// Convenience constructor for fetch functions
    #[must_use]
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch(message.into())
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Io(e) => write!(fmt, "io error: {e}"),
            Self::Fetch(message) => write!(fmt, "fetch failed: {message}"),
            Self::AlreadyInitialized(component) => write!(fmt, "{component} already initialized"),
            Self::Custom(message) => write!(fmt, "{message}"),
        }
    }
}

impl std::error::Error for Error {}
