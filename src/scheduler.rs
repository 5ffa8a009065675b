//! Adaptive selection of the next tip or question for a subject
//!
//! Selection runs in two phases. Items whose eligibility window has elapsed
//! (or that were never shown) are grouped by level and one is drawn at random
//! from the most important non-empty group. When nothing is due, every item
//! in the pool is ranked by its pressure score and one of the top-ranked
//! items is drawn at random, so a non-empty pool always yields content.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::content::{ContentItem, ContentRepository, ExposureKind, Level};

/// Cap on the days-since term of the pressure score. Never-shown items get the cap.
pub const MAX_PRESSURE_DAYS: i64 = 30;

const SECONDS_PER_DAY: i64 = 86_400;

/// Whole days elapsed since `item` was last shown as `kind`, or `None` if never shown
pub fn days_since(item: &ContentItem, kind: ExposureKind, now: DateTime<Utc>) -> Option<i64> {
    item.last_appearance(kind).map(|date| days_between(date, now))
}

fn days_between(date: NaiveDate, now: DateTime<Utc>) -> i64 {
    let shown_at = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (now - shown_at).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Whether `item` may be shown again as `kind`
pub fn is_eligible(item: &ContentItem, kind: ExposureKind, now: DateTime<Utc>) -> bool {
    match days_since(item, kind, now) {
        None => true,
        Some(days) => days >= item.level.required_interval_days(),
    }
}

/// Fallback ranking used when no item is currently due
pub fn pressure_score(level: Level, days_since: Option<i64>) -> i64 {
    let level_priority = (6 - i64::from(level.value())) * 100;
    let time_priority = days_since.map_or(MAX_PRESSURE_DAYS, |d| d.min(MAX_PRESSURE_DAYS));
    level_priority + time_priority
}

/// Picks the next item to surface and records the exposure in the ledger
pub struct ContentScheduler {
    repository: Arc<dyn ContentRepository>,
    rng: Mutex<StdRng>,
}

impl ContentScheduler {
    /// Create a scheduler with an OS-seeded random source
    pub fn new(repository: Arc<dyn ContentRepository>) -> Self {
        Self {
            repository,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Create a scheduler whose random draws are reproducible
    pub fn with_seed(repository: Arc<dyn ContentRepository>, seed: u64) -> Self {
        Self {
            repository,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Choose one item from `pool` without touching the ledger
    pub fn select_next(&self, pool: &[ContentItem], kind: ExposureKind) -> Option<ContentItem> {
        self.select_next_at(pool, kind, Utc::now())
    }

    /// Choose one item from `pool` as of `now`
    pub fn select_next_at(
        &self,
        pool: &[ContentItem],
        kind: ExposureKind,
        now: DateTime<Utc>,
    ) -> Option<ContentItem> {
        if pool.is_empty() {
            return None;
        }

        let eligible: Vec<&ContentItem> = pool
            .iter()
            .filter(|item| is_eligible(item, kind, now))
            .collect();

        let candidates = if eligible.is_empty() {
            debug!(%kind, pool = pool.len(), "no item due, ranking by pressure score");
            top_scored(pool, kind, now)
        } else {
            // Levels are normalized to 1..=5, so the minimum is the most important group.
            let best = eligible.iter().map(|item| item.level).min()?;
            eligible.into_iter().filter(|item| item.level == best).collect()
        };

        let index = self.pick_index(candidates.len())?;
        candidates.get(index).map(|item| (*item).clone())
    }

    /// Choose one item from `pool` and record the exposure for today
    pub async fn select_and_record(
        &self,
        pool: &[ContentItem],
        kind: ExposureKind,
        now: DateTime<Utc>,
    ) -> Option<ContentItem> {
        let selected = self.select_next_at(pool, kind, now)?;

        let today = now.date_naive();
        let recorded = match self
            .repository
            .record_appearance(&selected.id, kind, today)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(item_id = %selected.id, %kind, error = %e, "failed to record appearance");
                false
            }
        };

        info!(
            item_id = %selected.id,
            %kind,
            item_level = %selected.level,
            recorded,
            last_appearance = ?selected.last_appearance(kind),
            "selected content"
        );

        Some(selected)
    }

    /// Fetch the pool for `subject` and pick the next `kind` exposure
    pub async fn next_for_subject(&self, subject: &str, kind: ExposureKind) -> Option<ContentItem> {
        self.next_for_subject_at(subject, kind, Utc::now()).await
    }

    /// Same as [`next_for_subject`](Self::next_for_subject) as of `now`
    pub async fn next_for_subject_at(
        &self,
        subject: &str,
        kind: ExposureKind,
        now: DateTime<Utc>,
    ) -> Option<ContentItem> {
        let pool = match self.repository.query_pool(subject).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(%subject, %kind, error = %e, "failed to load content pool");
                return None;
            }
        };

        if pool.is_empty() {
            info!(%subject, %kind, "no content available for subject");
            return None;
        }

        self.select_and_record(&pool, kind, now).await
    }

    fn pick_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Some(rng.random_range(0..len))
    }
}

fn top_scored(pool: &[ContentItem], kind: ExposureKind, now: DateTime<Utc>) -> Vec<&ContentItem> {
    let scored: Vec<(i64, &ContentItem)> = pool
        .iter()
        .map(|item| (pressure_score(item.level, days_since(item, kind, now)), item))
        .collect();

    let Some(max) = scored.iter().map(|(score, _)| *score).max() else {
        return Vec::new();
    };

    scored
        .into_iter()
        .filter(|(score, _)| *score == max)
        .map(|(_, item)| item)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    #[derive(Default)]
    struct RecordingRepo {
        pool: Vec<ContentItem>,
        fail_writes: bool,
        writes: Mutex<Vec<(String, ExposureKind, NaiveDate)>>,
    }

    #[async_trait]
    impl ContentRepository for RecordingRepo {
        async fn query_pool(&self, _subject: &str) -> Result<Vec<ContentItem>> {
            Ok(self.pool.clone())
        }

        async fn record_appearance(
            &self,
            item_id: &str,
            kind: ExposureKind,
            date: NaiveDate,
        ) -> Result<()> {
            if self.fail_writes {
                return Err(Error::storage("ledger offline"));
            }
            self.writes
                .lock()
                .unwrap()
                .push((item_id.to_string(), kind, date));
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 15, 30, 0).unwrap()
    }

    fn days_ago(days: i64) -> NaiveDate {
        (now() - Duration::days(days)).date_naive()
    }

    fn item(id: &str, level: i64) -> ContentItem {
        ContentItem::new(id, "java", format!("prompt {id}"), "answer").with_level(Level::new(level))
    }

    fn scheduler(repo: RecordingRepo) -> (Arc<RecordingRepo>, ContentScheduler) {
        let repo = Arc::new(repo);
        let scheduler = ContentScheduler::with_seed(repo.clone(), 7);
        (repo, scheduler)
    }

    #[test]
    fn never_shown_items_are_eligible() {
        for level in 1..=5 {
            assert!(is_eligible(&item("a", level), ExposureKind::Tip, now()));
        }
    }

    #[test]
    fn level_one_waits_a_full_day() {
        let shown_today = item("a", 1).with_last_appearance(ExposureKind::Question, days_ago(0));
        assert!(!is_eligible(&shown_today, ExposureKind::Question, now()));
        assert!(is_eligible(&shown_today, ExposureKind::Question, now() + Duration::days(1)));
    }

    #[test]
    fn eligibility_is_tracked_per_kind() {
        let shown = item("a", 3).with_last_appearance(ExposureKind::Tip, days_ago(1));
        assert!(!is_eligible(&shown, ExposureKind::Tip, now()));
        assert!(is_eligible(&shown, ExposureKind::Question, now()));
    }

    #[test]
    fn days_since_floors_partial_days() {
        let shown = item("a", 1).with_last_appearance(ExposureKind::Tip, days_ago(2));
        assert_eq!(days_since(&shown, ExposureKind::Tip, now()), Some(2));
        assert_eq!(days_since(&shown, ExposureKind::Question, now()), None);
    }

    #[test]
    fn pressure_score_examples() {
        assert_eq!(pressure_score(Level::new(1), Some(40)), 530);
        assert_eq!(pressure_score(Level::new(5), Some(2)), 102);
        assert_eq!(pressure_score(Level::new(3), None), 330);
    }

    #[test]
    fn pressure_score_is_monotonic() {
        for level in 1..5 {
            for days in 0..40 {
                let higher = pressure_score(Level::new(level), Some(days));
                let lower = pressure_score(Level::new(level + 1), Some(days));
                assert!(higher >= lower);
                assert!(pressure_score(Level::new(level), Some(days + 1)) >= higher);
            }
        }
    }

    #[test]
    fn empty_pool_yields_none() {
        let (_, scheduler) = scheduler(RecordingRepo::default());
        assert!(scheduler.select_next_at(&[], ExposureKind::Tip, now()).is_none());
    }

    #[test]
    fn picks_from_most_important_eligible_level() {
        let (_, scheduler) = scheduler(RecordingRepo::default());
        let pool = vec![
            item("low", 5),
            item("mid-a", 2),
            item("mid-b", 2),
            // Level 1 but shown today, so not due
            item("top", 1).with_last_appearance(ExposureKind::Tip, days_ago(0)),
        ];

        for _ in 0..20 {
            let chosen = scheduler
                .select_next_at(&pool, ExposureKind::Tip, now())
                .unwrap();
            assert!(chosen.id.starts_with("mid-"), "picked {}", chosen.id);
        }
    }

    fn raw_level_item(id: &str, raw_level: i64) -> ContentItem {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "subject": "java",
            "level": raw_level,
        }))
        .unwrap()
    }

    #[test]
    fn out_of_range_level_is_grouped_with_level_five() {
        let (_, scheduler) = scheduler(RecordingRepo::default());
        let pool = vec![
            raw_level_item("raw", 9),
            item("five", 5),
            item("two", 2).with_last_appearance(ExposureKind::Tip, days_ago(0)),
        ];
        assert_eq!(pool[0].level, Level::LOWEST);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..40 {
            let chosen = scheduler
                .select_next_at(&pool, ExposureKind::Tip, now())
                .unwrap();
            seen.insert(chosen.id);
        }
        assert!(seen.contains("raw"));
        assert!(seen.contains("five"));
        assert!(!seen.contains("two"));
    }

    #[test]
    fn out_of_range_level_uses_level_five_interval_and_score() {
        let (_, scheduler) = scheduler(RecordingRepo::default());
        let raw = raw_level_item("raw", 0).with_last_appearance(ExposureKind::Tip, days_ago(6));
        assert!(!is_eligible(&raw, ExposureKind::Tip, now()));
        assert!(is_eligible(&raw, ExposureKind::Tip, now() + Duration::days(1)));
        assert_eq!(pressure_score(raw.level, days_since(&raw, ExposureKind::Tip, now())), 106);

        // raw: 106, four: 202
        let pool = vec![
            raw,
            item("four", 4).with_last_appearance(ExposureKind::Tip, days_ago(2)),
        ];
        let chosen = scheduler
            .select_next_at(&pool, ExposureKind::Tip, now())
            .unwrap();
        assert_eq!(chosen.id, "four");
    }

    #[test]
    fn fallback_always_returns_a_winner() {
        let (_, scheduler) = scheduler(RecordingRepo::default());
        let pool = vec![
            item("a", 1).with_last_appearance(ExposureKind::Tip, days_ago(0)),
            item("b", 3).with_last_appearance(ExposureKind::Tip, days_ago(2)),
            item("c", 5).with_last_appearance(ExposureKind::Tip, days_ago(6)),
        ];

        let chosen = scheduler
            .select_next_at(&pool, ExposureKind::Tip, now())
            .unwrap();
        // a: 500, b: 302, c: 106
        assert_eq!(chosen.id, "a");
    }

    #[test]
    fn fallback_ties_are_drawn_from_the_max_set() {
        let pool = vec![
            item("a", 2).with_last_appearance(ExposureKind::Tip, days_ago(1)),
            item("b", 2).with_last_appearance(ExposureKind::Tip, days_ago(1)),
            item("c", 2).with_last_appearance(ExposureKind::Tip, days_ago(0)),
        ];

        let (_, first) = scheduler(RecordingRepo::default());
        let (_, second) = scheduler(RecordingRepo::default());
        for _ in 0..10 {
            let x = first.select_next_at(&pool, ExposureKind::Tip, now()).unwrap();
            let y = second.select_next_at(&pool, ExposureKind::Tip, now()).unwrap();
            assert!(x.id == "a" || x.id == "b");
            assert_eq!(x.id, y.id);
        }
    }

    #[tokio::test]
    async fn records_exactly_one_appearance() {
        let repo = RecordingRepo {
            pool: vec![item("only", 2)],
            ..Default::default()
        };
        let (repo, scheduler) = scheduler(repo);

        let chosen = scheduler
            .next_for_subject_at("java", ExposureKind::Question, now())
            .await
            .unwrap();

        assert_eq!(chosen.id, "only");
        let writes = repo.writes.lock().unwrap();
        assert_eq!(
            *writes,
            vec![("only".to_string(), ExposureKind::Question, now().date_naive())]
        );
    }

    #[tokio::test]
    async fn ledger_failure_still_returns_content() {
        let repo = RecordingRepo {
            pool: vec![item("only", 4)],
            fail_writes: true,
            ..Default::default()
        };
        let (_, scheduler) = scheduler(repo);

        let chosen = scheduler
            .next_for_subject_at("java", ExposureKind::Tip, now())
            .await;
        assert_eq!(chosen.map(|c| c.id), Some("only".to_string()));
    }

    #[tokio::test]
    async fn empty_subject_yields_none_without_writes() {
        let (repo, scheduler) = scheduler(RecordingRepo::default());
        assert!(scheduler
            .next_for_subject_at("angular", ExposureKind::Tip, now())
            .await
            .is_none());
        assert!(repo.writes.lock().unwrap().is_empty());
    }
}
