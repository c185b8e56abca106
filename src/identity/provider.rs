use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, TryStreamExt};

use super::credentials::Identity;
use crate::ident::EntityKey;
use crate::upstream::{EntityScope, Page, PageRange, Record, UpstreamError};

/// Records fetched per upstream page.
pub const PAGE_SIZE: u64 = 100;

/// An authenticated upstream handle.
///
/// `renew` mutates session-internal state and is only ever called with the
/// session cache lock held.
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    fn needs_renewal(&self) -> bool;

    async fn renew(&self) -> Result<(), UpstreamError>;

    async fn fetch_page(&self, scope: EntityScope, range: PageRange) -> Result<Page<Record>, UpstreamError>;

    async fn fetch_one(&self, key: &EntityKey) -> Result<Record, UpstreamError>;
}

/// Creates upstream sessions from login inputs.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn login(&self, identity: &Identity) -> Result<Arc<dyn UpstreamSession>, UpstreamError>;
}

/// Lazily walk every page of `scope`. Each call starts again from offset 0.
///
/// Continuation is driven by `has_more`; an empty page ends the walk even if
/// upstream claims more.
pub fn paginate(
    session: Arc<dyn UpstreamSession>,
    scope: EntityScope,
    page_size: u64,
) -> impl Stream<Item = Result<Record, UpstreamError>> + Send {
    stream::try_unfold(Some(PageRange::first(page_size)), move |next| {
        let session = session.clone();
        async move {
            let Some(range) = next else { return Ok(None); };
            let page = session.fetch_page(scope, range).await?;
            let next = if page.has_more && !page.items.is_empty() { Some(range.next()) } else { None };
            Ok(Some((stream::iter(page.items.into_iter().map(Ok::<Record, UpstreamError>)), next)))
        }
    })
    .try_flatten()
}

pub async fn fetch_all(session: Arc<dyn UpstreamSession>, scope: EntityScope) -> Result<Vec<Record>, UpstreamError> {
    paginate(session, scope, PAGE_SIZE).try_collect().await
}
