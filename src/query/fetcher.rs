use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;

/// The asynchronous, failable function behind a controller.
///
/// Any `Fn(R) -> impl Future<Output = Result<T>>` closure is a fetcher.
#[async_trait]
pub trait Fetcher<R, T>: Send + Sync {
    async fn fetch(&self, request: R) -> Result<T>;
}

#[async_trait]
impl<R, T, F, Fut> Fetcher<R, T> for F
where
    R: Send + 'static,
    T: Send + 'static,
    F: Fn(R) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    async fn fetch(&self, request: R) -> Result<T> {
        (self)(request).await
    }
}

/// Fetcher for one page of a paginated result
#[async_trait]
pub trait PageFetcher<R, P, E>: Send + Sync {
    async fn fetch_page(&self, request: R, page: P) -> Result<Vec<E>>;
}

#[async_trait]
impl<R, P, E, F, Fut> PageFetcher<R, P, E> for F
where
    R: Send + 'static,
    P: Send + 'static,
    E: Send + 'static,
    F: Fn(R, P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<E>>> + Send + 'static,
{
    async fn fetch_page(&self, request: R, page: P) -> Result<Vec<E>> {
        (self)(request, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_closure_fetcher() {
        let fetcher = |id: u32| async move {
            if id == 0 {
                Err(Error::fetch("no such id"))
            } else {
                Ok(format!("user-{id}"))
            }
        };

        assert_eq!(Fetcher::fetch(&fetcher, 7).await.ok().as_deref(), Some("user-7"));
        assert!(Fetcher::fetch(&fetcher, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_closure_page_fetcher() {
        let fetcher = |base: u32, page: u32| async move { Ok::<_, Error>(vec![base + page * 10]) };
        assert_eq!(fetcher.fetch_page(1, 2).await.ok(), Some(vec![21]));
    }
}
