//! Continuation-driven listings as lazy streams
//!
//! Object listing, part listing and upload listing share one loop: fetch a
//! page with the current marker, yield its items in server order, then follow
//! the next marker while the page says it is truncated.

use futures::future::Future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::s3::error::{Result, S3Error};

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage<T, M> {
    pub items: Vec<T>,
    /// Marker to send with the next request
    pub next_marker: Option<M>,
    pub is_truncated: bool,
}

impl<T, M> ListingPage<T, M> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_marker: None,
            is_truncated: false,
        }
    }

    pub fn truncated(items: Vec<T>, next_marker: M) -> Self {
        Self {
            items,
            next_marker: Some(next_marker),
            is_truncated: true,
        }
    }
}

enum Cursor<M> {
    First,
    Next(M),
    Done,
}

/// Stream every item of a paginated listing.
///
/// `fetch` receives `None` for the first page and the previous page's marker
/// afterwards. The stream ends after the first page that is not truncated.
/// A truncated page without a marker is reported as an error instead of
/// refetching the same page forever.
pub fn paginate<T, M, F, Fut>(fetch: F) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    M: Send + 'static,
    F: FnMut(Option<M>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<ListingPage<T, M>>> + Send + 'static,
{
    stream::try_unfold((fetch, Cursor::First), |(mut fetch, cursor)| async move {
        let marker = match cursor {
            Cursor::First => None,
            Cursor::Next(marker) => Some(marker),
            Cursor::Done => return Ok(None),
        };

        let page = fetch(marker).await?;
        let next = match (page.is_truncated, page.next_marker) {
            (false, _) => Cursor::Done,
            (true, Some(marker)) => Cursor::Next(marker),
            (true, None) => {
                return Err(S3Error::InvalidResponse(
                    "truncated listing page carries no continuation marker".to_string(),
                ))
            }
        };

        let items = stream::iter(page.items.into_iter().map(Ok::<T, S3Error>));
        Ok(Some((items, (fetch, next))))
    })
    .try_flatten()
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn scripted(
        pages: Vec<ListingPage<u32, String>>,
    ) -> (BoxStream<'static, Result<u32>>, Arc<Mutex<Vec<Option<String>>>>) {
        let markers = Arc::new(Mutex::new(Vec::new()));
        let seen = markers.clone();
        let mut pages = pages.into_iter();
        let stream = paginate(move |marker: Option<String>| {
            seen.lock().unwrap().push(marker);
            let page = pages.next();
            async move { page.ok_or_else(|| S3Error::InvalidResponse("no more pages".to_string())) }
        });
        (stream, markers)
    }

    #[tokio::test]
    async fn test_concatenates_pages_in_order() {
        let (stream, markers) = scripted(vec![
            ListingPage::truncated(vec![1, 2], "a".to_string()),
            ListingPage::truncated(vec![], "b".to_string()),
            ListingPage::truncated(vec![3], "c".to_string()),
            ListingPage::last(vec![4, 5]),
        ]);

        let items: Vec<u32> = stream.try_collect().await.unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            *markers.lock().unwrap(),
            vec![
                None,
                Some("a".to_string()),
                Some("b".to_string()),
                Some("c".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_single_page() {
        let (stream, markers) = scripted(vec![ListingPage::last(vec![7])]);
        let items: Vec<u32> = stream.try_collect().await.unwrap();
        assert_eq!(items, vec![7]);
        assert_eq!(markers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_truncated_without_marker_is_an_error() {
        let (mut stream, _) = scripted(vec![ListingPage {
            items: vec![1],
            next_marker: None,
            is_truncated: true,
        }]);
        assert!(matches!(
            stream.next().await,
            Some(Err(S3Error::InvalidResponse(_)))
        ));
    }

    #[tokio::test]
    async fn test_fetch_error_surfaces() {
        let (stream, _) = scripted(vec![ListingPage::truncated(vec![1], "a".to_string())]);
        let result: Result<Vec<u32>> = stream.try_collect().await;
        assert!(result.is_err());
    }
}
