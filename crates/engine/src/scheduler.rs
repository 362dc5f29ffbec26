//! Alert scheduler: drives the pipeline on a fixed interval.
//!
//! One cycle:
//! 1. Load every device and group its locations by coordinate
//! 2. Fetch conditions for each coordinate concurrently (bounded, with timeout)
//! 3. Under the run-lock, for each location name at a coordinate: analyze,
//!    then per candidate check cooldown, filter per recipient, dispatch and
//!    write exactly one history row
//! 4. Update the in-process counters
//!
//! Cycles never overlap: a trigger that arrives while a cycle is running waits
//! for it to finish. Retention cleanup runs on its own timer and does not take
//! the run-lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use uuid::Uuid;

use nimbus_common::config::SchedulerConfig;
use nimbus_common::error::AppError;
use nimbus_common::types::{AlertCandidate, AlertStatus, Device, DevicePreferences, MonitoredLocation};
use nimbus_notifier::PushChannel;
use nimbus_weather::{LocationConditions, UpstreamError, WeatherProvider};

use crate::analyzer::ThresholdAnalyzer;
use crate::cooldown::CooldownEngine;
use crate::dispatcher::{DeliveryDispatcher, DeliveryOutcome};
use crate::history::HistoryLedger;
use crate::preferences::PreferenceFilter;
use crate::store::{AlertStore, PurgeCounts};

/// Result of one cycle, returned by the on-demand trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Distinct coordinates evaluated this cycle
    pub locations_checked: usize,
    /// Coordinates whose fetch failed or timed out
    pub locations_failed: usize,
    /// Candidates or recipients skipped after a store error
    pub units_failed: usize,
    pub alerts_sent: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
struct SchedulerState {
    running: bool,
    cycle_in_progress: bool,
    last_run_at: Option<DateTime<Utc>>,
    run_count: u64,
    total_alerts_sent: u64,
    last_summary: Option<CycleSummary>,
}

/// Snapshot exposed on `GET /api/scheduler/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub cycle_in_progress: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub total_alerts_sent: u64,
    pub channel_ready: bool,
    pub last_summary: Option<CycleSummary>,
    pub config: SchedulerConfig,
}

/// Devices grouped under one fetch coordinate.
#[derive(Debug)]
struct Site {
    latitude: f64,
    longitude: f64,
    /// Recipients keyed by the location name they used for this coordinate
    recipients: BTreeMap<String, Vec<Device>>,
}

/// Per-cycle scratch state.
struct CycleContext {
    now: DateTime<Utc>,
    hour: u8,
    /// Devices deleted by self-healing earlier in this cycle
    removed: HashSet<Uuid>,
    preferences: HashMap<Uuid, Option<DevicePreferences>>,
    failures: usize,
}

pub struct Scheduler {
    store: Arc<dyn AlertStore>,
    provider: Arc<dyn WeatherProvider>,
    analyzer: ThresholdAnalyzer,
    cooldown: CooldownEngine,
    dispatcher: DeliveryDispatcher,
    history: HistoryLedger,
    config: SchedulerConfig,
    fetch_timeout: Duration,
    run_lock: Mutex<()>,
    state: RwLock<SchedulerState>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn AlertStore>,
        provider: Arc<dyn WeatherProvider>,
        channel: Arc<dyn PushChannel>,
        config: SchedulerConfig,
        fetch_timeout: Duration,
        push_timeout: Duration,
    ) -> Self {
        let window = i64::try_from(config.cooldown_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX);
        Self {
            cooldown: CooldownEngine::new(store.clone(), window),
            dispatcher: DeliveryDispatcher::new(store.clone(), channel, push_timeout),
            history: HistoryLedger::new(store.clone()),
            analyzer: ThresholdAnalyzer::default(),
            store,
            provider,
            config,
            fetch_timeout,
            run_lock: Mutex::new(()),
            state: RwLock::new(SchedulerState::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryLedger {
        &self.history
    }

    /// Run one cycle now and return its summary.
    pub async fn trigger(&self) -> Result<CycleSummary, AppError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle with `now` as the cycle time.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleSummary, AppError> {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();

        self.state.write().await.cycle_in_progress = true;
        let result = self.run_cycle(now).await;

        let mut state = self.state.write().await;
        state.cycle_in_progress = false;

        let mut summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(error = %e, "Alert cycle could not start");
                return Err(e);
            }
        };
        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        state.last_run_at = Some(now);
        state.run_count += 1;
        state.total_alerts_sent += summary.alerts_sent as u64;
        state.last_summary = Some(summary.clone());

        tracing::info!(
            run_count = state.run_count,
            locations_checked = summary.locations_checked,
            locations_failed = summary.locations_failed,
            units_failed = summary.units_failed,
            alerts_sent = summary.alerts_sent,
            duration_ms = summary.duration_ms,
            "Alert cycle complete"
        );

        Ok(summary)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.read().await;
        SchedulerStatus {
            running: state.running,
            cycle_in_progress: state.cycle_in_progress,
            last_run_at: state.last_run_at,
            run_count: state.run_count,
            total_alerts_sent: state.total_alerts_sent,
            channel_ready: self.dispatcher.channel_ready(),
            last_summary: state.last_summary.clone(),
            config: self.config.clone(),
        }
    }

    /// Zero the counters. Whether the timers are armed is left untouched.
    pub async fn reset_state(&self) {
        let mut state = self.state.write().await;
        *state = SchedulerState {
            running: state.running,
            cycle_in_progress: state.cycle_in_progress,
            ..Default::default()
        };
        tracing::info!("Scheduler state reset");
    }

    /// Apply retention. `None` uses the configured number of days.
    pub async fn cleanup(&self, retention_days: Option<u32>) -> Result<PurgeCounts, AppError> {
        self.history
            .cleanup(retention_days.unwrap_or(self.config.retention_days), Utc::now())
            .await
    }

    /// Arm the cycle and cleanup timers.
    pub async fn start(self: &Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        if self.config.enabled {
            self.state.write().await.running = true;
            tasks.push(tokio::spawn(
                Arc::clone(self).cycle_loop(shutdown_rx.clone()),
            ));
            tracing::info!(
                interval_secs = self.config.interval_secs,
                cooldown_hours = self.config.cooldown_hours,
                "Alert scheduler started"
            );
        } else {
            tracing::info!("Alert scheduler disabled, only on-demand triggers will run");
        }

        tasks.push(tokio::spawn(Arc::clone(self).cleanup_loop(shutdown_rx)));

        SchedulerHandle {
            scheduler: Arc::clone(self),
            shutdown: shutdown_tx,
            tasks,
        }
    }

    async fn cycle_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.trigger().await {
                        tracing::error!(error = %e, "Scheduled alert cycle failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Alert cycle timer stopped");
    }

    async fn cleanup_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.cleanup_interval_hours.max(1) * 3600);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup(None).await {
                        tracing::error!(error = %e, "Alert history cleanup failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Cleanup timer stopped");
    }

    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary, AppError> {
        let devices = self.store.list_devices().await?;
        let sites = Self::group_sites(devices);

        tracing::info!(locations = sites.len(), "Alert cycle started");

        let fetched = self.fetch_all(&sites).await;

        let mut summary = CycleSummary {
            locations_checked: sites.len(),
            ..Default::default()
        };
        let mut ctx = CycleContext {
            now,
            hour: now.hour() as u8,
            removed: HashSet::new(),
            preferences: HashMap::new(),
            failures: 0,
        };

        for (site, conditions) in sites.iter().zip(fetched) {
            let Some(conditions) = conditions else {
                summary.locations_failed += 1;
                continue;
            };
            summary.alerts_sent += self.evaluate_site(site, &conditions, &mut ctx).await;
        }
        summary.units_failed = ctx.failures;

        Ok(summary)
    }

    /// Fetch conditions for every site. `None` marks a failed site.
    async fn fetch_all(&self, sites: &[Site]) -> Vec<Option<LocationConditions>> {
        let mut results = vec![None; sites.len()];
        let mut pending = JoinSet::new();
        let limit = self.config.fetch_concurrency.max(1);

        for (idx, site) in sites.iter().enumerate() {
            if pending.len() >= limit {
                if let Some(joined) = pending.join_next().await {
                    Self::collect_fetch(joined, sites, &mut results);
                }
            }

            let provider = Arc::clone(&self.provider);
            let timeout = self.fetch_timeout;
            let (latitude, longitude) = (site.latitude, site.longitude);
            pending.spawn(async move {
                let result = match tokio::time::timeout(timeout, provider.fetch(latitude, longitude)).await {
                    Ok(result) => result,
                    Err(_) => Err(UpstreamError::Timeout(timeout)),
                };
                (idx, result)
            });
        }

        while let Some(joined) = pending.join_next().await {
            Self::collect_fetch(joined, sites, &mut results);
        }

        results
    }

    fn collect_fetch(
        joined: Result<(usize, Result<LocationConditions, UpstreamError>), JoinError>,
        sites: &[Site],
        results: &mut [Option<LocationConditions>],
    ) {
        match joined {
            Ok((idx, Ok(conditions))) => results[idx] = Some(conditions),
            Ok((idx, Err(e))) => {
                let site = &sites[idx];
                tracing::warn!(
                    latitude = site.latitude,
                    longitude = site.longitude,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Weather fetch failed, skipping location this cycle"
                );
            }
            Err(e) => tracing::error!(error = %e, "Weather fetch task panicked"),
        }
    }

    /// Analyze each location name at a site. Returns the number of deliveries.
    async fn evaluate_site(
        &self,
        site: &Site,
        conditions: &LocationConditions,
        ctx: &mut CycleContext,
    ) -> usize {
        let mut sent = 0;

        for (name, recipients) in &site.recipients {
            let location = MonitoredLocation {
                latitude: site.latitude,
                longitude: site.longitude,
                name: name.clone(),
            };
            let candidates = self.analyzer.analyze(
                &conditions.weather,
                conditions.air_quality.as_ref(),
                &location,
            );

            for candidate in &candidates {
                match self.process_candidate(candidate, recipients, ctx).await {
                    Ok(delivered) => sent += delivered,
                    Err(e) => {
                        ctx.failures += 1;
                        tracing::error!(
                            alert_id = %candidate.id,
                            error = %e,
                            "Failed to process alert candidate"
                        );
                    }
                }
            }
        }

        sent
    }

    async fn process_candidate(
        &self,
        candidate: &AlertCandidate,
        recipients: &[Device],
        ctx: &mut CycleContext,
    ) -> Result<usize, AppError> {
        let now = ctx.now;

        if self
            .cooldown
            .is_on_cooldown(candidate.alert_type, &candidate.location_name, now)
            .await?
        {
            self.history
                .record(candidate, AlertStatus::Cooldown, 0, now)
                .await?;
            return Ok(0);
        }

        let mut evaluated = 0;
        let mut filtered = 0;
        let mut delivered = 0;

        for device in recipients {
            if ctx.removed.contains(&device.id) {
                continue;
            }
            evaluated += 1;

            let preferences = match self.preferences(ctx, device.id).await {
                Ok(p) => p,
                Err(e) => {
                    ctx.failures += 1;
                    tracing::warn!(device_id = %device.id, error = %e, "Failed to load preferences");
                    continue;
                }
            };

            if !PreferenceFilter::accepts(candidate, preferences.as_ref()) {
                filtered += 1;
                continue;
            }
            if PreferenceFilter::in_quiet_hours(preferences.as_ref(), ctx.hour) {
                tracing::debug!(
                    device_id = %device.id,
                    alert_id = %candidate.id,
                    hour = ctx.hour,
                    "Delivery held back by quiet hours"
                );
                filtered += 1;
                continue;
            }

            match self.dispatcher.dispatch(device, candidate).await {
                Ok(DeliveryOutcome::Sent) => delivered += 1,
                Ok(DeliveryOutcome::RecipientRemoved) => {
                    ctx.removed.insert(device.id);
                }
                Ok(_) => {}
                Err(e) => {
                    ctx.failures += 1;
                    tracing::warn!(
                        device_id = %device.id,
                        alert_id = %candidate.id,
                        error = %e,
                        "Delivery failed"
                    );
                }
            }
        }

        let status = if delivered > 0 {
            self.cooldown
                .record_sent(candidate.alert_type, &candidate.location_name, now)
                .await?;
            AlertStatus::Sent
        } else if evaluated > 0 && filtered == evaluated {
            AlertStatus::Filtered
        } else {
            AlertStatus::Generated
        };

        // Deliveries already happened; a lost history row must not hide them.
        if let Err(e) = self.history.record(candidate, status, delivered, now).await {
            ctx.failures += 1;
            tracing::error!(
                alert_id = %candidate.id,
                status = %status,
                error = %e,
                "Failed to record alert history"
            );
        }
        Ok(delivered)
    }

    async fn preferences(
        &self,
        ctx: &mut CycleContext,
        device_id: Uuid,
    ) -> Result<Option<DevicePreferences>, AppError> {
        if let Some(cached) = ctx.preferences.get(&device_id) {
            return Ok(cached.clone());
        }
        let loaded = self.store.get_preferences(device_id).await?;
        ctx.preferences.insert(device_id, loaded.clone());
        Ok(loaded)
    }

    /// Group device locations by coordinate rounded to 4 decimals, keeping
    /// the first-seen exact coordinate for the fetch.
    fn group_sites(devices: Vec<Device>) -> Vec<Site> {
        let mut index: HashMap<(i64, i64), usize> = HashMap::new();
        let mut sites: Vec<Site> = Vec::new();

        for device in devices {
            for location in &device.locations {
                let key = (
                    (location.latitude * 10_000.0).round() as i64,
                    (location.longitude * 10_000.0).round() as i64,
                );
                let idx = *index.entry(key).or_insert_with(|| {
                    sites.push(Site {
                        latitude: location.latitude,
                        longitude: location.longitude,
                        recipients: BTreeMap::new(),
                    });
                    sites.len() - 1
                });

                let recipients = sites[idx]
                    .recipients
                    .entry(location.name.clone())
                    .or_default();
                if !recipients.iter().any(|d| d.id == device.id) {
                    recipients.push(device.clone());
                }
            }
        }

        sites
    }
}

/// Running timers. Dropping the handle also stops them, but without waiting.
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop both timers. An in-flight cycle finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Scheduler task ended abnormally");
            }
        }
        self.scheduler.state.write().await.running = false;
        tracing::info!("Alert scheduler stopped");
    }
}
