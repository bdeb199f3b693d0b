//! All-or-nothing routing under a deadline
//!
//! Used for the cover/primary-image phase: every item must succeed before the
//! deadline or the whole phase fails. In-flight routes are dropped on the
//! first failure or when time runs out.

use std::time::Duration;

use futures::future::try_join_all;

use crate::media::MediaReference;

use super::types::{Address, MediaRouter, Payload, RouteError};

/// Route every item concurrently; addresses come back in input order
pub async fn route_required(
    router: &dyn MediaRouter,
    items: Vec<(MediaReference, Payload)>,
    deadline: Duration,
) -> Result<Vec<Address>, RouteError> {
    let count = items.len();
    let routes = items
        .into_iter()
        .map(|(item, payload)| async move { router.route(&item, payload).await });

    match tokio::time::timeout(deadline, try_join_all(routes)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                items = count,
                deadline_ms = deadline.as_millis() as u64,
                "Required routing phase timed out"
            );
            Err(RouteError::DeadlineExceeded(deadline))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRouter;

    fn items(urls: &[&str]) -> Vec<(MediaReference, Payload)> {
        urls.iter()
            .map(|url| (MediaReference::cover(*url), Payload::probe()))
            .collect()
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let router = FakeRouter::new();
        let addresses = route_required(
            &router,
            items(&["https://o.example/slow-a.jpg", "https://o.example/b.jpg"]),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(addresses[0].url(), "https://img.example/r/slow-a.jpg");
        assert_eq!(addresses[1].url(), "https://img.example/r/b.jpg");
    }

    #[tokio::test]
    async fn test_one_failure_fails_the_phase() {
        let router = FakeRouter::new();
        let result = route_required(
            &router,
            items(&["https://o.example/a.jpg", "https://o.example/fail.jpg"]),
            Duration::from_secs(5),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_deadline_fails_the_phase() {
        let router = FakeRouter::new().with_slow_delay(Duration::from_secs(10));
        let result = route_required(
            &router,
            items(&["https://o.example/a.jpg", "https://o.example/slow.jpg"]),
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(result, Err(RouteError::DeadlineExceeded(_))));
    }
}
