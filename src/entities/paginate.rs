use tracing::{debug, info};

use crate::entities::SearchPage;
use crate::error::HarvestError;

/// An offset-paginated result listing.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;

    /// Fetches up to `count` items starting at `start`. The first page must carry the total.
    async fn fetch_page(
        &self,
        start: usize,
        count: usize,
    ) -> Result<SearchPage<Self::Item>, HarvestError>;
}

/// Collects every item of a listing in server order.
///
/// The first request (offset 0) learns the declared total `N`; further pages are requested at
/// offsets `page_size, 2 * page_size, …` while below `N`, with the last request clamped to the
/// remaining count. A listing with `N > 0` therefore costs `ceil(N / page_size)` fetches.
///
/// # Errors
///
/// Any page error aborts the whole pagination; nothing partial is returned.
pub async fn paginate<S: PageSource>(
    source: &S,
    page_size: usize,
) -> Result<Vec<S::Item>, HarvestError> {
    if page_size == 0 {
        return Err(HarvestError::InvalidArgument(
            "Page size must be at least 1".into(),
        ));
    }

    let first = source.fetch_page(0, page_size).await?;
    let total = first.total.unwrap_or(first.results.len());
    info!(total, page_size, "Search results declared");

    let mut items = Vec::with_capacity(total);
    let mut page = first.results;
    let mut offset = 0;
    while offset < total {
        items.append(&mut page);
        let next = offset + page_size;
        if next < total {
            let count = page_size.min(total - next);
            debug!(start = next, count, "Fetching results page");
            page = source.fetch_page(next, count).await?.results;
            info!(fetched = next + count, total, "Search results progress");
        }
        offset = next;
    }

    Ok(items)
}
