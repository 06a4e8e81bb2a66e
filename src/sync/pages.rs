//! Cursor-paginated page streams.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, stream};

use crate::Result;
use crate::traits::DataSource;
use crate::types::Page;

/// Boxed stream of collection pages.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<Page>> + Send>>;

struct Cursor {
    source: Arc<dyn DataSource>,
    collection: String,
    page_size: usize,
    next: Option<String>,
}

/// Lazily walk every page of `collection`.
///
/// Nothing is requested until the stream is polled. The stream ends after
/// the page whose `next_cursor` is `None`; an empty page that carries a
/// cursor is yielded and followed. An error is yielded once and ends the
/// stream. Calling `pages` again starts a new sweep from the first page.
pub fn pages(
    source: Arc<dyn DataSource>,
    collection: impl Into<String>,
    page_size: usize,
) -> PageStream {
    let start = Cursor {
        source,
        collection: collection.into(),
        page_size,
        next: None,
    };
    Box::pin(stream::unfold(Some(start), |state| async move {
        let mut cursor = state?;
        let page = cursor
            .source
            .fetch_page(&cursor.collection, cursor.next.as_deref(), cursor.page_size)
            .await;
        match page {
            Ok(page) => {
                let rest = page.next_cursor.clone().map(|next| {
                    cursor.next = Some(next);
                    cursor
                });
                Some((Ok(page), rest))
            }
            Err(e) => Some((Err(e), None)),
        }
    }))
}
