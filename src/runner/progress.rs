use std::time::{Duration, Instant};

const LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Token generation metrics, logged at most every two seconds
#[derive(Debug)]
pub struct GenerationProgress {
    started: Instant,
    last_log: Option<Instant>,
    prompt_chars: usize,
    max_tokens: usize,
    tokens: usize,
}

impl GenerationProgress {
    #[must_use]
    pub fn start(prompt_chars: usize, max_tokens: usize) -> Self {
        tracing::info!(
            prompt_chars,
            max_tokens,
            "Starting response generation"
        );
        Self {
            started: Instant::now(),
            last_log: None,
            prompt_chars,
            max_tokens,
            tokens: 0,
        }
    }

    /// Record one more generated token
    pub fn tick(&mut self) {
        self.tokens += 1;
        let now = Instant::now();
        let due = self
            .last_log
            .map_or(now.duration_since(self.started) >= LOG_INTERVAL, |last| {
                now.duration_since(last) >= LOG_INTERVAL
            });
        if due {
            self.last_log = Some(now);
            tracing::info!(
                "Progress: {:.1}% | Generated: {}/{} tokens | Speed: {:.1} tokens/sec | ETA: {:.1}s",
                self.percentage(),
                self.tokens,
                self.max_tokens,
                self.tokens_per_second(),
                self.eta().as_secs_f64()
            );
        }
    }

    #[must_use]
    pub const fn tokens(&self) -> usize {
        self.tokens
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tokens_per_second(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed == 0.0 || self.tokens == 0 {
            return 0.0;
        }
        self.tokens as f64 / elapsed
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn eta(&self) -> Duration {
        let speed = self.tokens_per_second();
        if speed == 0.0 {
            return Duration::ZERO;
        }
        let remaining = self.max_tokens.saturating_sub(self.tokens) as f64;
        Duration::from_secs_f64(remaining / speed)
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        (self.tokens as f64 / self.max_tokens as f64 * 100.0).min(100.0)
    }

    /// Log the summary line
    pub fn finish(&self) {
        tracing::info!(
            "Response generation completed: {} tokens in {:.2}s ({:.2} tokens/sec, prompt {} chars)",
            self.tokens,
            self.started.elapsed().as_secs_f64(),
            self.tokens_per_second(),
            self.prompt_chars
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_progress_is_zero() {
        let progress = GenerationProgress::start(10, 64);
        assert_eq!(progress.tokens(), 0);
        assert!(progress.percentage().abs() < f64::EPSILON);
        assert_eq!(progress.eta(), Duration::ZERO);
        assert!(progress.tokens_per_second().abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentage_counts_ticks() {
        let mut progress = GenerationProgress::start(10, 4);
        progress.tick();
        assert!((progress.percentage() - 25.0).abs() < 1e-9);
        for _ in 0..10 {
            progress.tick();
        }
        assert!((progress.percentage() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_max_tokens() {
        let mut progress = GenerationProgress::start(0, 0);
        progress.tick();
        assert!(progress.percentage().abs() < f64::EPSILON);
        assert_eq!(progress.eta(), Duration::ZERO);
    }
}
