use anyhow::Result;
use std::future::Future;
use tracing::{debug, warn};

/// One fetched listing page: its extracted records and whether a next-page
/// affordance was present
#[derive(Debug, Clone)]
pub struct PageChunk<T> {
    pub records: Vec<T>,
    pub has_next: bool,
}

/// Why a pagination run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The page held no records; the sole guaranteed terminator
    EmptyPage,

    /// Records were present but no next-page affordance
    NoNextPage,

    /// A fetch failed; the run keeps what it accumulated
    FetchError,
}

/// Accumulated result of a pagination run
#[derive(Debug)]
pub struct Paginated<T> {
    pub records: Vec<T>,
    pub pages_fetched: u32,
    pub stop: StopReason,
}

/// Fetch-extract-advance over a paginated listing, starting at page 1.
///
/// An empty page terminates the loop; so does a missing next-page
/// affordance. A fetch error ends the run early with whatever was
/// accumulated, logged rather than raised: "no more pages" and a transient
/// navigation failure are indistinguishable from here.
pub async fn paginate<T, F, Fut>(mut fetch: F) -> Paginated<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PageChunk<T>>>,
{
    let mut records = Vec::new();
    let mut page = 1u32;

    loop {
        match fetch(page).await {
            Ok(chunk) => {
                if chunk.records.is_empty() {
                    debug!("Page {} is empty, stopping with {} records", page, records.len());
                    return Paginated {
                        records,
                        pages_fetched: page,
                        stop: StopReason::EmptyPage,
                    };
                }

                records.extend(chunk.records);

                if !chunk.has_next {
                    debug!("Page {} has no next page, stopping with {} records", page, records.len());
                    return Paginated {
                        records,
                        pages_fetched: page,
                        stop: StopReason::NoNextPage,
                    };
                }

                page += 1;
            }
            Err(e) => {
                warn!(
                    "Fetch of page {} failed, keeping {} records already extracted: {:#}",
                    page,
                    records.len(),
                    e
                );
                return Paginated {
                    records,
                    pages_fetched: page,
                    stop: StopReason::FetchError,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_after_first_empty_page() {
        let fetches = Arc::new(AtomicU32::new(0));
        let counter = fetches.clone();

        // 3 non-empty pages, then an empty one
        let result = paginate(|page| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let records = if page <= 3 {
                    vec![format!("p{}a", page), format!("p{}b", page)]
                } else {
                    vec![]
                };
                Ok(PageChunk { records, has_next: true })
            }
        })
        .await;

        assert_eq!(fetches.load(Ordering::SeqCst), 4);
        assert_eq!(result.pages_fetched, 4);
        assert_eq!(result.stop, StopReason::EmptyPage);
        assert_eq!(
            result.records,
            vec!["p1a", "p1b", "p2a", "p2b", "p3a", "p3b"]
        );
    }

    #[tokio::test]
    async fn stops_when_next_affordance_is_absent() {
        let result = paginate(|page| async move {
            Ok(PageChunk {
                records: vec![page],
                has_next: page < 2,
            })
        })
        .await;

        assert_eq!(result.records, vec![1, 2]);
        assert_eq!(result.pages_fetched, 2);
        assert_eq!(result.stop, StopReason::NoNextPage);
    }

    #[tokio::test]
    async fn fetch_error_keeps_accumulated_records() {
        let result = paginate(|page| async move {
            if page == 3 {
                Err(anyhow!("navigation timed out"))
            } else {
                Ok(PageChunk {
                    records: vec![page],
                    has_next: true,
                })
            }
        })
        .await;

        assert_eq!(result.records, vec![1, 2]);
        assert_eq!(result.stop, StopReason::FetchError);
    }

    #[tokio::test]
    async fn empty_first_page_yields_nothing() {
        let result = paginate(|_page| async move {
            Ok(PageChunk::<String> {
                records: vec![],
                has_next: true,
            })
        })
        .await;

        assert!(result.records.is_empty());
        assert_eq!(result.pages_fetched, 1);
    }
}
