use crate::error::Error;
use std::sync::Arc;

/// Observable state of a controller. Always replaced as a whole.
#[derive(Debug, Clone)]
pub enum State<T> {
    Idle,
    Loading,
    Succeeded(T),
    Failed(Arc<Error>),
}

/// Field-less discriminant of [`State`], for administration and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Idle,
    Loading,
    Succeeded,
    Failed,
}

impl<T> State<T> {
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::Failed(Arc::new(error))
    }

    #[must_use]
    pub const fn kind(&self) -> StateKind {
        match self {
            Self::Idle => StateKind::Idle,
            Self::Loading => StateKind::Loading,
            Self::Succeeded(_) => StateKind::Succeeded,
            Self::Failed(_) => StateKind::Failed,
        }
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed(error) => Some(error.as_ref()),
            _ => None,
        }
    }

    /// Maps the success value, passing every other state through
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> State<U> {
        match self {
            Self::Idle => State::Idle,
            Self::Loading => State::Loading,
            Self::Succeeded(value) => State::Succeeded(f(value)),
            Self::Failed(error) => State::Failed(error),
        }
    }
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self::Idle
    }
}

// Errors compare by identity; two failures are equal only if they share the same error.
impl<T: PartialEq> PartialEq for State<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Idle, Self::Idle) | (Self::Loading, Self::Loading) => true,
            (Self::Succeeded(a), Self::Succeeded(b)) => a == b,
            (Self::Failed(a), Self::Failed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
