//! Deadline wrapper for device, renderer and encoder round-trips.
//!
//! Only bounds how long a caller waits. Retry policy lives at each call site.

use std::future::Future;
use std::time::Duration;

/// Deadline for any network round-trip to a playback device.
pub(crate) const NETWORK_DEADLINE: Duration = Duration::from_secs(60);
/// Deadline for the best-effort "stop playback" call issued before a reload.
pub(crate) const STOP_DEADLINE: Duration = Duration::from_secs(5);

/// An operation did not settle before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("timed out: {label} after {}ms", .after.as_millis())]
pub struct Timeout {
    pub label: String,
    pub after: Duration,
}

/// Race `fut` against a timer of length `after`.
///
/// On expiry the future is dropped and `Timeout` (labelled) is converted into the
/// caller's error type. Implementations behind `fut` must release anything they
/// acquired when dropped mid-flight.
pub(crate) async fn with_deadline<T, E, F>(label: &str, after: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Timeout>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(Timeout {
            label: label.to_string(),
            after,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Timeout(Timeout),
        Failed,
    }

    impl From<Timeout> for TestError {
        fn from(value: Timeout) -> Self {
            TestError::Timeout(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_with_operation_outcome_when_first() {
        let ok: Result<u32, TestError> = with_deadline("quick", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(7)
        })
        .await;
        assert_eq!(ok, Ok(7));

        let failed: Result<u32, TestError> =
            with_deadline("quick", Duration::from_secs(1), async { Err(TestError::Failed) }).await;
        assert_eq!(failed, Err(TestError::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn fails_with_labelled_timeout_when_deadline_elapses() {
        let result: Result<(), TestError> =
            with_deadline("took too long to connect", NETWORK_DEADLINE, async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok(())
            })
            .await;
        let Err(TestError::Timeout(timeout)) = result else {
            panic!("expected timeout, got {result:?}");
        };
        assert_eq!(timeout.label, "took too long to connect");
        assert_eq!(
            timeout.to_string(),
            "timed out: took too long to connect after 60000ms"
        );
    }
}
