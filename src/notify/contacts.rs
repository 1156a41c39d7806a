use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
#[cfg(test)]
use mockall::automock;

/// One place a contact number may be stored.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContactSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, subject_ref: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// A usable number for `subject_ref`, or `None`. Never fails.
    async fn resolve(&self, subject_ref: &str) -> Option<String>;
}

/// Queries two sources at once and takes the first non-empty answer.
pub struct DualSourceResolver {
    primary: Arc<dyn ContactSource>,
    secondary: Arc<dyn ContactSource>,
}

impl DualSourceResolver {
    pub fn new(primary: Arc<dyn ContactSource>, secondary: Arc<dyn ContactSource>) -> Self {
        Self { primary, secondary }
    }
}

fn usable(source: &dyn ContactSource, subject_ref: &str, result: Result<Option<String>>) -> Option<String> {
    match result {
        Ok(Some(number)) if !number.trim().is_empty() => Some(number.trim().to_string()),
        Ok(_) => {
            debug!("No contact for {subject_ref} in {}", source.name());
            None
        }
        Err(err) => {
            warn!("Contact lookup for {subject_ref} in {} failed: {err:#}", source.name());
            None
        }
    }
}

#[async_trait]
impl ContactResolver for DualSourceResolver {
    async fn resolve(&self, subject_ref: &str) -> Option<String> {
        let primary = self.primary.lookup(subject_ref);
        let secondary = self.secondary.lookup(subject_ref);
        tokio::pin!(primary);
        tokio::pin!(secondary);

        let mut primary_done = false;
        let mut secondary_done = false;

        loop {
            tokio::select! {
                result = &mut primary, if !primary_done => {
                    primary_done = true;
                    if let Some(number) = usable(self.primary.as_ref(), subject_ref, result) {
                        return Some(number);
                    }
                }
                result = &mut secondary, if !secondary_done => {
                    secondary_done = true;
                    if let Some(number) = usable(self.secondary.as_ref(), subject_ref, result) {
                        return Some(number);
                    }
                }
                else => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::time::Duration;

    fn mock(name: &'static str, answer: fn() -> Result<Option<String>>) -> Arc<dyn ContactSource> {
        let mut source = MockContactSource::new();
        source.expect_name().return_const(name);
        source.expect_lookup().returning(move |_| answer());
        Arc::new(source)
    }

    struct SlowSource {
        delay: Duration,
        number: Option<&'static str>,
    }

    #[async_trait]
    impl ContactSource for SlowSource {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn lookup(&self, _subject_ref: &str) -> Result<Option<String>> {
            tokio::time::sleep(self.delay).await;
            Ok(self.number.map(str::to_string))
        }
    }

    #[tokio::test]
    async fn falls_through_empty_primary() {
        let resolver = DualSourceResolver::new(
            mock("personnel", || Ok(Some("   ".into()))),
            mock("guardian", || Ok(Some(" +15550100 ".into()))),
        );
        assert_eq!(resolver.resolve("P-1").await.as_deref(), Some("+15550100"));
    }

    #[tokio::test]
    async fn lookup_errors_count_as_missing() {
        let resolver = DualSourceResolver::new(
            mock("personnel", || Err(anyhow!("db locked"))),
            mock("guardian", || Ok(None)),
        );
        assert_eq!(resolver.resolve("P-1").await, None);
    }

    #[tokio::test]
    async fn error_in_one_source_does_not_hide_the_other() {
        let resolver = DualSourceResolver::new(
            mock("personnel", || Ok(Some("0917".into()))),
            mock("guardian", || Err(anyhow!("timeout"))),
        );
        assert_eq!(resolver.resolve("P-1").await.as_deref(), Some("0917"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_non_empty_answer_wins() {
        let resolver = DualSourceResolver::new(
            Arc::new(SlowSource {
                delay: Duration::from_secs(30),
                number: Some("slow-number"),
            }),
            Arc::new(SlowSource {
                delay: Duration::from_millis(10),
                number: Some("fast-number"),
            }),
        );

        let started = tokio::time::Instant::now();
        assert_eq!(resolver.resolve("P-1").await.as_deref(), Some("fast-number"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
