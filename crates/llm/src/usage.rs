use crate::PromptLanguage;
use chrono::{Local, NaiveDate};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Approximate token count: whitespace separated words times a per-language ratio.
pub fn estimate_tokens(text: &str, language: PromptLanguage) -> u64 {
    (text.split_whitespace().count() as f64 * language.token_ratio()) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub date: NaiveDate,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageSnapshot {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// In-process per-day token accumulator used as a soft gate before generation.
///
/// The count resets when the local date changes. Nothing is persisted.
///
/// `allows` and `record` are separate steps around the remote call, so
/// concurrent callers can all pass the gate before any of them records and
/// the day may end somewhat above the limit.
pub struct DailyUsageCounter {
    limit: u64,
    usage: Mutex<UsageSnapshot>,
}

impl DailyUsageCounter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            usage: Mutex::new(UsageSnapshot::empty(Self::today())),
        }
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.snapshot_on(Self::today())
    }

    /// Whether a call estimated at `estimated_input` tokens stays within the limit.
    pub fn allows(&self, estimated_input: u64) -> bool {
        self.allows_on(Self::today(), estimated_input)
    }

    /// Record a completed call.
    pub fn record(&self, input_tokens: u64, output_tokens: u64) {
        self.record_on(Self::today(), input_tokens, output_tokens)
    }

    fn lock_on(&self, date: NaiveDate) -> std::sync::MutexGuard<'_, UsageSnapshot> {
        let mut usage = match self.usage.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("usage counter lock poisoned, continuing");
                poisoned.into_inner()
            }
        };
        if usage.date != date {
            debug!("usage counter rolled over to {}", date);
            *usage = UsageSnapshot::empty(date);
        }
        usage
    }

    pub(crate) fn snapshot_on(&self, date: NaiveDate) -> UsageSnapshot {
        *self.lock_on(date)
    }

    pub(crate) fn allows_on(&self, date: NaiveDate, estimated_input: u64) -> bool {
        let usage = self.lock_on(date);
        usage.total().saturating_add(estimated_input) <= self.limit
    }

    pub(crate) fn record_on(&self, date: NaiveDate, input_tokens: u64, output_tokens: u64) {
        let mut usage = self.lock_on(date);
        usage.input_tokens += input_tokens;
        usage.output_tokens += output_tokens;
        debug!(
            "daily usage {} / {} tokens",
            usage.total(),
            self.limit
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_by_language_ratio() {
        assert_eq!(estimate_tokens("나는 오늘 공원에 갔다", PromptLanguage::Korean), 8);
        assert_eq!(estimate_tokens("a b c d e", PromptLanguage::English), 6);
        assert_eq!(estimate_tokens("   ", PromptLanguage::Korean), 0);
    }

    #[test]
    fn gate_refuses_only_when_projection_exceeds_limit() {
        let counter = DailyUsageCounter::new(100);
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        assert!(counter.allows_on(day, 100));
        assert!(!counter.allows_on(day, 101));

        counter.record_on(day, 40, 20);
        assert_eq!(counter.snapshot_on(day).total(), 60);
        assert!(counter.allows_on(day, 40));
        assert!(!counter.allows_on(day, 41));
        assert!(!counter.allows_on(day, u64::MAX));
    }

    #[test]
    fn new_day_starts_from_zero() {
        let counter = DailyUsageCounter::new(100);
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        counter.record_on(day, 100, 0);
        assert!(!counter.allows_on(day, 1));

        let next = day.succ_opt().unwrap();
        assert!(counter.allows_on(next, 10));
        assert_eq!(counter.snapshot_on(next).total(), 0);
    }
}
