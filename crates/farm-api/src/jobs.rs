//! Timer job implementations and the async runner.
//!
//! The runner wakes on a fixed interval, asks the registry what is due,
//! and runs each due job to completion. A failing job is logged and left
//! for its next boundary; sibling jobs are unaffected, and the per-job
//! running flag keeps a slow run from overlapping itself.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use contracts::{ContestKind, NotificationCategory, NotificationPriority};
use farm_core::vip;
use farm_core::{clock, patch};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{persistence, GameService, ServiceError, StoreError};

/// How often the runner polls the registry. Fine enough for the
/// minute-granularity crop sweep.
const RUNNER_TICK_SECS: u64 = 20;

/// Rows older than this fall to the cleanup job.
const RETENTION_DAYS: i64 = 30;

/// Backups kept by the rotation.
const BACKUP_KEEP: usize = 10;

impl GameService {
    /// Execute one named registry job. Unknown names are a registry bug
    /// and reported as corruption rather than silently ignored.
    pub fn run_job(&mut self, name: &str, now: DateTime<Utc>) -> Result<(), ServiceError> {
        match name {
            "crop-monitor" => self.sweep_crops(now).map(|_| ()),
            "vip-rewards" => self.vip_reward_sweep(now).map(|_| ()),
            "daily-contest" => self.create_scheduled_contest(ContestKind::Daily, now).map(|_| ()),
            "weekly-contest" => self
                .create_scheduled_contest(ContestKind::Weekly, now)
                .map(|_| ()),
            "monthly-contest" => self
                .create_scheduled_contest(ContestKind::Monthly, now)
                .map(|_| ()),
            "contest-winners" => self.settle_due_contests(now).map(|_| ()),
            "vip-expiry" => self.expire_vips(now).map(|_| ()),
            "daily-stats" => self.daily_stats_rollover(now).map(|_| ()),
            "cleanup" => self.cleanup(now).map(|_| ()),
            "backup" => self.backup(now).map(|_| ()),
            other => Err(ServiceError::Store(StoreError::Corrupt(format!(
                "unknown job {other:?}"
            )))),
        }
    }

    /// Crop readiness sweep: flag every growing patch whose harvest time
    /// has passed. Idempotent; re-running flags nothing new.
    pub fn sweep_crops(&mut self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        self.store_mut().transaction(|tx| {
            let growing = persistence::growing_patches(tx)?;
            let due = patch::sweep_ready(&growing, now);
            let marked = persistence::mark_patches_ready(tx, &due)?;
            Ok::<_, ServiceError>(marked)
        })
    }

    /// Grant the daily VIP bundle to every active subscriber who has not
    /// claimed today. Each user commits independently so one bad row
    /// cannot starve the rest.
    pub fn vip_reward_sweep(&mut self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        let subscriptions = persistence::active_subscriptions(self.store_mut().connection())?;
        let day = clock::utc_day(now);

        // Highest tier wins when a user carries overlapping subscriptions.
        let mut best: std::collections::BTreeMap<i64, &vip::VipSubscription> =
            std::collections::BTreeMap::new();
        for subscription in subscriptions.iter().filter(|sub| sub.is_current(now)) {
            best.entry(subscription.user_id)
                .and_modify(|held| {
                    if subscription.tier > held.tier {
                        *held = subscription;
                    }
                })
                .or_insert(subscription);
        }

        let mut processed = 0;
        for (user_id, subscription) in best {
            let tier = subscription.tier;
            let started_at = subscription.started_at;
            let granted = self.store_mut().transaction(|tx| {
                if persistence::reward_claim_exists(tx, user_id, day)? {
                    return Ok::<_, ServiceError>(false);
                }
                let bundle = vip::daily_reward_bundle(tier, started_at, now);
                let mut ledger =
                    persistence::load_ledger(tx, user_id)?.ok_or_else(|| {
                        ServiceError::Store(StoreError::Corrupt(format!(
                            "ledger row missing for vip user {user_id}"
                        )))
                    })?;
                bundle.apply(&mut ledger);
                persistence::save_ledger(tx, user_id, &ledger)?;

                let rewards_json = serde_json::to_string(&bundle).map_err(StoreError::from)?;
                persistence::insert_reward_claim(tx, user_id, day, tier, &rewards_json, now)?;
                persistence::enqueue_notification(
                    tx,
                    user_id,
                    "Your VIP daily rewards have arrived!",
                    NotificationCategory::Vip,
                    NotificationPriority::Normal,
                    now,
                )?;
                Ok(true)
            });

            match granted {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(user_id, error = %err, "vip reward sweep failed for user");
                }
            }
        }
        Ok(processed)
    }

    /// Deactivate subscriptions whose end has passed (boundary inclusive).
    pub fn expire_vips(&mut self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        self.store_mut().transaction(|tx| {
            let mut subscriptions = persistence::active_subscriptions(tx)?;
            let expired = vip::expire_sweep(&mut subscriptions, now);
            let changed = persistence::deactivate_subscriptions(tx, &expired)?;
            Ok::<_, ServiceError>(changed)
        })
    }

    pub fn create_scheduled_contest(
        &mut self,
        kind: ContestKind,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        let contest = farm_core::contest::Contest::scheduled(kind, now);
        let id = self.create_contest(&contest, now)?;
        info!(contest_id = id, kind = %kind, "created scheduled contest");
        Ok(id)
    }

    /// Settle every active contest whose window has closed.
    pub fn settle_due_contests(&mut self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        let due: Vec<i64> = persistence::ending_contests(self.store_mut().connection(), now)?
            .into_iter()
            .map(|contest| contest.id)
            .collect();

        let mut settled = 0;
        let mut rng = rand::thread_rng();
        for contest_id in due {
            match self.settle_contest(contest_id, now, false, &mut rng) {
                Ok(_) => settled += 1,
                Err(err) => {
                    // Left active; the next sweep retries it.
                    error!(contest_id, error = %err, "contest settlement failed");
                }
            }
        }
        Ok(settled)
    }

    /// Day rollover: reset the per-day ad counters and log the aggregate
    /// dashboard numbers.
    pub fn daily_stats_rollover(&mut self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        let reset = persistence::reset_daily_ad_counters(self.store_mut().connection())?;
        let counts = persistence::overview_counts(self.store_mut().connection(), now)?;
        info!(
            total_users = counts.total_users,
            new_today = counts.new_today,
            active_today = counts.active_today,
            crops_harvested = counts.crops_harvested,
            "daily statistics"
        );
        Ok(reset)
    }

    /// Prune reward claims and ended contests past the retention window.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        let cutoff = now - Duration::days(RETENTION_DAYS);
        self.store_mut().transaction(|tx| {
            let claims = persistence::prune_reward_claims(tx, clock::utc_day(cutoff))?;
            let contests = persistence::prune_ended_contests(tx, cutoff)?;
            Ok::<_, ServiceError>(claims + contests)
        })
    }

    /// Copy the database file into the backup directory and rotate old
    /// copies out.
    pub fn backup(&mut self, now: DateTime<Utc>) -> Result<PathBuf, ServiceError> {
        let source = PathBuf::from(&self.config().sqlite_path);
        let dir = PathBuf::from(&self.config().backup_dir);
        backup_file(&source, &dir, now).map_err(|err| {
            ServiceError::Store(StoreError::Corrupt(format!("backup failed: {err}")))
        })
    }
}

fn backup_file(
    source: &Path,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, std::io::Error> {
    fs::create_dir_all(dir)?;
    let stamp = now.format("%Y%m%dT%H%M%S");
    let target = dir.join(format!("farm_backup_{stamp}.sqlite"));
    fs::copy(source, &target)?;

    // Keep only the newest copies.
    let mut backups: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("farm_backup_") && name.ends_with(".sqlite"))
                .unwrap_or(false)
        })
        .collect();
    backups.sort();
    while backups.len() > BACKUP_KEEP {
        let oldest = backups.remove(0);
        let _ = fs::remove_file(oldest);
    }
    Ok(target)
}

/// Drive the job registry until the process exits. Each due job runs to
/// completion inside the service lock; failures are recorded on the
/// registry and logged, never propagated.
pub async fn run_scheduler(service: Arc<Mutex<GameService>>) {
    let mut ticker = tokio::time::interval(StdDuration::from_secs(RUNNER_TICK_SECS));
    info!("scheduler started (tick every {RUNNER_TICK_SECS}s)");

    loop {
        ticker.tick().await;
        let now = Utc::now();

        let due: Vec<String> = {
            let service = service.lock().await;
            service
                .job_status()
                .into_iter()
                .filter(|status| !status.running && status.next_due <= now)
                .map(|status| status.name)
                .collect()
        };

        for name in due {
            let mut service = service.lock().await;
            if !service.registry_mut().begin(&name) {
                continue;
            }
            let result = service.run_job(&name, now);
            match &result {
                Ok(()) => info!(job = %name, "job completed"),
                Err(err) => error!(job = %name, error = %err, "job failed"),
            }
            service
                .registry_mut()
                .finish(&name, Utc::now(), result.map_err(|err| err.to_string()));
        }
    }
}
