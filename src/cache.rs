use std::time::Duration;

use tokio::time::Instant;

/// A locally held value that is only handed out until `expires_at`.
#[derive(Debug, Clone)]
pub struct TimedCache<T> {
    entry: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T: Clone> TimedCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    pub fn get(&self) -> Option<T> {
        match &self.entry {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, value: T) {
        if self.ttl.is_zero() {
            return;
        }
        self.entry = Some((value, Instant::now() + self.ttl));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_value_expires_after_ttl() {
        let mut cache = TimedCache::new(Duration::from_secs(2));
        assert_eq!(cache.get(), None::<u8>);

        cache.set(7u8);
        tokio::time::advance(Duration::from_millis(1999)).await;
        assert_eq!(cache.get(), Some(7));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_caches() {
        let mut cache = TimedCache::new(Duration::ZERO);
        cache.set("default");
        assert_eq!(cache.get(), None);
    }
}
