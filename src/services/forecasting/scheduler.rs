use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use super::BatchResult;
use crate::config::ForecastingConfig;
use crate::entities::forecast_config::{self, SINGLETON_ID};
use crate::errors::ServiceError;
use crate::metrics::FORECAST_METRICS;

/// Persisted regeneration schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ForecastSettings {
    pub last_generated: Option<DateTime<Utc>>,
    pub interval_days: u32,
    pub enabled: bool,
}

impl ForecastSettings {
    /// Enabled and either never generated or at least `interval_days` old.
    pub fn should_generate(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_generated {
            None => true,
            Some(last) => now - last >= Duration::days(i64::from(self.interval_days)),
        }
    }

    pub fn next_generation_at(&self) -> Option<DateTime<Utc>> {
        if !self.enabled {
            return None;
        }
        self.last_generated
            .map(|last| last + Duration::days(i64::from(self.interval_days)))
    }

    /// Whole days left before the next run is due; `Some(0)` when due,
    /// `None` when generation is disabled.
    pub fn days_until_next_generation(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.enabled {
            return None;
        }
        match self.last_generated {
            None => Some(0),
            Some(last) => {
                let elapsed = (now - last).num_days();
                Some((i64::from(self.interval_days) - elapsed).max(0))
            }
        }
    }
}

impl From<forecast_config::Model> for ForecastSettings {
    fn from(model: forecast_config::Model) -> Self {
        Self {
            last_generated: model.last_generated,
            interval_days: u32::try_from(model.interval_days).unwrap_or(1).max(1),
            enabled: model.enabled,
        }
    }
}

/// Storage of the process-wide schedule.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForecastStateStore: Send + Sync {
    async fn get(&self) -> Result<ForecastSettings, ServiceError>;
    async fn mark_generated(&self, at: DateTime<Utc>) -> Result<ForecastSettings, ServiceError>;
    async fn set_enabled(&self, enabled: bool) -> Result<ForecastSettings, ServiceError>;
    async fn set_interval_days(&self, days: u32) -> Result<ForecastSettings, ServiceError>;
}

/// Singleton `forecast_config` row, created from config defaults on first use.
#[derive(Debug, Clone)]
pub struct DbForecastStateStore {
    db: Arc<DatabaseConnection>,
    default_interval_days: u32,
    default_enabled: bool,
}

impl DbForecastStateStore {
    pub fn new(db: Arc<DatabaseConnection>, defaults: &ForecastingConfig) -> Self {
        Self {
            db,
            default_interval_days: defaults.interval_days,
            default_enabled: defaults.auto_generate,
        }
    }

    async fn load_or_create(&self) -> Result<forecast_config::Model, ServiceError> {
        if let Some(row) = forecast_config::Entity::find_by_id(SINGLETON_ID)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
        {
            return Ok(row);
        }

        let row = forecast_config::ActiveModel {
            id: Set(SINGLETON_ID),
            last_generated: Set(None),
            interval_days: Set(self.default_interval_days as i32),
            enabled: Set(self.default_enabled),
            updated_at: Set(Utc::now()),
        };
        match row.insert(&*self.db).await {
            Ok(created) => {
                info!(
                    interval_days = created.interval_days,
                    enabled = created.enabled,
                    "Created forecast schedule"
                );
                Ok(created)
            }
            // Lost a creation race: the row exists now.
            Err(insert_err) => forecast_config::Entity::find_by_id(SINGLETON_ID)
                .one(&*self.db)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or(ServiceError::DatabaseError(insert_err)),
        }
    }

    async fn update<F>(&self, apply: F) -> Result<ForecastSettings, ServiceError>
    where
        F: FnOnce(&mut forecast_config::ActiveModel) + Send,
    {
        let mut row = self.load_or_create().await?.into_active_model();
        apply(&mut row);
        row.updated_at = Set(Utc::now());
        let saved = row.update(&*self.db).await.map_err(ServiceError::db_error)?;
        Ok(saved.into())
    }
}

#[async_trait]
impl ForecastStateStore for DbForecastStateStore {
    async fn get(&self) -> Result<ForecastSettings, ServiceError> {
        Ok(self.load_or_create().await?.into())
    }

    async fn mark_generated(&self, at: DateTime<Utc>) -> Result<ForecastSettings, ServiceError> {
        self.update(|row| row.last_generated = Set(Some(at))).await
    }

    async fn set_enabled(&self, enabled: bool) -> Result<ForecastSettings, ServiceError> {
        self.update(|row| row.enabled = Set(enabled)).await
    }

    async fn set_interval_days(&self, days: u32) -> Result<ForecastSettings, ServiceError> {
        if days == 0 {
            return Err(ServiceError::InvalidInput(
                "interval_days must be at least 1".to_string(),
            ));
        }
        self.update(|row| row.interval_days = Set(days as i32)).await
    }
}

/// At most one generation run per process.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<SingleFlightPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        FORECAST_METRICS.set_in_flight(true);
        Some(SingleFlightPermit {
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Clears the in-flight flag when dropped, including during unwinding.
#[derive(Debug)]
pub struct SingleFlightPermit {
    running: Arc<AtomicBool>,
}

impl Drop for SingleFlightPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        FORECAST_METRICS.set_in_flight(false);
    }
}

/// Something that regenerates forecasts for every eligible product.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run_batch(&self) -> Result<BatchResult, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Disabled,
    NotDue,
    AlreadyRunning,
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LastRun {
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub forecasts_generated: u64,
    pub products_processed: u64,
    pub error_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ForecastStatus {
    pub enabled: bool,
    pub interval_days: u32,
    pub last_generated: Option<DateTime<Utc>>,
    pub next_generation_at: Option<DateTime<Utc>>,
    pub days_until_next_generation: Option<i64>,
    pub generation_in_progress: bool,
    pub last_run: Option<LastRun>,
}

/// Source of the current time; swapped out in tests.
pub type Clock = fn() -> DateTime<Utc>;

struct GenerationJob {
    permit: SingleFlightPermit,
    requested_at: DateTime<Utc>,
}

/// Decides when to regenerate and runs generation off the request path.
pub struct ForecastScheduler {
    store: Arc<dyn ForecastStateStore>,
    runner: Arc<dyn BatchRunner>,
    guard: SingleFlight,
    jobs: mpsc::Sender<GenerationJob>,
    last_run: Arc<RwLock<Option<LastRun>>>,
    clock: Clock,
}

impl ForecastScheduler {
    /// Creates the scheduler and its single background worker.
    ///
    /// The worker exits once the scheduler is dropped.
    pub fn spawn(
        store: Arc<dyn ForecastStateStore>,
        runner: Arc<dyn BatchRunner>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        Self::spawn_with_clock(store, runner, Utc::now)
    }

    /// Like [`ForecastScheduler::spawn`], reading the time from `clock`.
    pub fn spawn_with_clock(
        store: Arc<dyn ForecastStateStore>,
        runner: Arc<dyn BatchRunner>,
        clock: Clock,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<GenerationJob>(1);
        let last_run = Arc::new(RwLock::new(None));

        let worker = {
            let store = Arc::clone(&store);
            let runner = Arc::clone(&runner);
            let last_run = Arc::clone(&last_run);
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let store = Arc::clone(&store);
                    let runner = Arc::clone(&runner);
                    let last_run = Arc::clone(&last_run);
                    let requested_at = job.requested_at;

                    // Own task so a panic surfaces as a JoinError here
                    let handle = tokio::spawn(async move {
                        let _permit = job.permit;
                        execute(store.as_ref(), runner.as_ref(), &last_run, clock).await
                    });

                    match handle.await {
                        Ok(Ok(result)) => info!(
                            %requested_at,
                            forecasts_generated = result.forecasts_generated,
                            products_processed = result.products_processed,
                            errors = result.errors.len(),
                            "Background forecast generation completed"
                        ),
                        Ok(Err(e)) => {
                            error!(%requested_at, error = %e, "Background forecast generation failed")
                        }
                        Err(join_err) => {
                            FORECAST_METRICS.record_batch_failure();
                            error!(%requested_at, error = %join_err, "Background forecast generation aborted");
                        }
                    }
                }
                info!("Forecast generation worker stopped");
            })
        };

        let scheduler = Arc::new(Self {
            store,
            runner,
            guard: SingleFlight::new(),
            jobs: tx,
            last_run,
            clock,
        });
        (scheduler, worker)
    }

    /// Queues a background run if one is due and none is in flight. Never
    /// waits for the run itself.
    #[instrument(skip(self))]
    pub async fn maybe_trigger(&self) -> Result<TriggerOutcome, ServiceError> {
        let settings = self.store.get().await?;
        if !settings.enabled {
            return Ok(TriggerOutcome::Disabled);
        }
        if !settings.should_generate((self.clock)()) {
            return Ok(TriggerOutcome::NotDue);
        }

        let Some(permit) = self.guard.try_acquire() else {
            return Ok(TriggerOutcome::AlreadyRunning);
        };

        // Another process or a just-finished run may have updated the row
        if !self.store.get().await?.should_generate((self.clock)()) {
            return Ok(TriggerOutcome::NotDue);
        }

        let job = GenerationJob {
            permit,
            requested_at: (self.clock)(),
        };
        match self.jobs.try_send(job) {
            Ok(()) => {
                info!("Queued background forecast generation");
                Ok(TriggerOutcome::Queued)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Ok(TriggerOutcome::AlreadyRunning),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ServiceError::ServiceUnavailable(
                "forecast generation worker is not running".to_string(),
            )),
        }
    }

    /// Runs generation now regardless of the schedule.
    #[instrument(skip(self))]
    pub async fn run_now(&self) -> Result<BatchResult, ServiceError> {
        let _permit = self.guard.try_acquire().ok_or_else(|| {
            ServiceError::Conflict("forecast generation is already in progress".to_string())
        })?;
        execute(
            self.store.as_ref(),
            self.runner.as_ref(),
            &self.last_run,
            self.clock,
        )
        .await
    }

    pub async fn settings(&self) -> Result<ForecastSettings, ServiceError> {
        self.store.get().await
    }

    #[instrument(skip(self))]
    pub async fn update_settings(
        &self,
        enabled: Option<bool>,
        interval_days: Option<u32>,
    ) -> Result<ForecastSettings, ServiceError> {
        let mut settings = self.store.get().await?;
        if let Some(days) = interval_days {
            settings = self.store.set_interval_days(days).await?;
        }
        if let Some(enabled) = enabled {
            settings = self.store.set_enabled(enabled).await?;
        }
        info!(
            enabled = settings.enabled,
            interval_days = settings.interval_days,
            "Forecast schedule updated"
        );
        Ok(settings)
    }

    pub async fn status(&self, now: DateTime<Utc>) -> Result<ForecastStatus, ServiceError> {
        let settings = self.store.get().await?;
        Ok(ForecastStatus {
            enabled: settings.enabled,
            interval_days: settings.interval_days,
            last_generated: settings.last_generated,
            next_generation_at: settings.next_generation_at(),
            days_until_next_generation: settings.days_until_next_generation(now),
            generation_in_progress: self.guard.is_running(),
            last_run: self.last_run.read().await.clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }
}

/// One generation run; the caller holds the single-flight permit.
async fn execute(
    store: &dyn ForecastStateStore,
    runner: &dyn BatchRunner,
    last_run: &RwLock<Option<LastRun>>,
    clock: Clock,
) -> Result<BatchResult, ServiceError> {
    let outcome = runner.run_batch().await;

    let record = match &outcome {
        Ok(result) => LastRun {
            finished_at: clock(),
            succeeded: true,
            forecasts_generated: result.forecasts_generated,
            products_processed: result.products_processed,
            error_count: result.errors.len(),
            failure: None,
        },
        Err(e) => {
            FORECAST_METRICS.record_batch_failure();
            LastRun {
                finished_at: clock(),
                succeeded: false,
                forecasts_generated: 0,
                products_processed: 0,
                error_count: 0,
                failure: Some(e.to_string()),
            }
        }
    };
    *last_run.write().await = Some(record);

    let result = outcome?;
    if let Err(e) = store.mark_generated(clock()).await {
        warn!(error = %e, "Forecasts generated but schedule could not be updated");
        return Err(e);
    }
    Ok(result)
}
