//! The top-level control loop.
//!
//! Each iteration polls every route concurrently, runs one stop-matching
//! pass and, when due, vehicle discovery. All of them are joined before the
//! backoff decision picks how long to sleep.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span};

use crate::backoff::{EmptyResponseTracker, ResponseKind, SleepKind};
use crate::config::Config;
use crate::feed::PositionFeed;
use crate::matcher::{MatchSummary, make_vehicle_stop_times};
use crate::poll::{RouteReport, RouteState};
use crate::registry::{DiscoverySchedule, discover_new_vehicles};
use crate::store::Store;

/// What happened during one iteration.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub routes: Vec<RouteReport>,
    /// `None` if the matcher pass failed as a whole.
    pub matched: Option<MatchSummary>,
    /// `None` if discovery was not due or failed.
    pub discovered: Option<usize>,
    pub sleep: SleepKind,
}

pub struct Scheduler {
    config: Config,
    feed: Arc<dyn PositionFeed>,
    store: Arc<dyn Store>,
    routes: Vec<RouteState>,
    backoff: EmptyResponseTracker,
    discovery: DiscoverySchedule,
    match_lag: chrono::Duration,
}

impl Scheduler {
    pub fn new(config: Config, feed: Arc<dyn PositionFeed>, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        let routes = config.routes.iter().map(RouteState::new).collect();
        let backoff = EmptyResponseTracker::new(&config.routes);
        let discovery_interval = chrono::Duration::from_std(config.discovery_interval)?;
        let match_lag = chrono::Duration::from_std(config.match_lag)?;

        Ok(Self {
            config,
            feed,
            store,
            routes,
            backoff,
            discovery: DiscoverySchedule::new(discovery_interval),
            match_lag,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backoff(&self) -> &EmptyResponseTracker {
        &self.backoff
    }

    pub fn sleep_duration(&self, kind: SleepKind) -> Duration {
        match kind {
            SleepKind::Normal => self.config.normal_sleep,
            SleepKind::Extended => self.config.extended_sleep,
        }
    }

    /// Runs one iteration at wall-clock time `now` and returns its report.
    ///
    /// Route states are moved into their tasks and handed back on join, so
    /// no two tasks ever share one.
    pub async fn run_iteration(&mut self, now: DateTime<Utc>) -> IterationReport {
        let mut route_tasks = Vec::with_capacity(self.routes.len());
        for mut state in self.routes.drain(..) {
            let feed = self.feed.clone();
            let store = self.store.clone();
            let route = state.route().to_string();
            let span = info_span!("poll_route", route = %route);
            let task = tokio::spawn(
                async move {
                    let report = state.poll(&*feed, &*store).await;
                    (state, report)
                }
                .instrument(span),
            );
            route_tasks.push((route, task));
        }

        let match_task = {
            let store = self.store.clone();
            let max_distance_m = self.config.max_distance_m;
            let upper = now - self.match_lag;
            tokio::spawn(
                async move { make_vehicle_stop_times(&*store, max_distance_m, upper).await }
                    .instrument(info_span!("make_stop_times")),
            )
        };

        let discovery_task = self.discovery.poll_due(now).then(|| {
            let store = self.store.clone();
            tokio::spawn(
                async move { discover_new_vehicles(&*store, now).await }
                    .instrument(info_span!("discover_vehicles")),
            )
        });

        let mut reports = Vec::with_capacity(route_tasks.len());
        for (route, task) in route_tasks {
            match task.await {
                Ok((state, report)) => {
                    self.backoff.record(&route, report.outcome.response_kind());
                    self.routes.push(state);
                    reports.push(report);
                }
                Err(e) => {
                    error!(route = %route, error = %e, "Route poll task failed");
                    self.backoff.record(&route, ResponseKind::Empty);
                    self.routes.push(RouteState::new(route));
                }
            }
        }

        let matched = match match_task.await {
            Ok(Ok(summary)) => Some(summary),
            Ok(Err(e)) => {
                error!(error = %format!("{e:#}"), "Stop matching pass failed");
                None
            }
            Err(e) => {
                error!(error = %e, "Stop matching task failed");
                None
            }
        };

        let discovered = match discovery_task {
            None => None,
            Some(task) => match task.await {
                Ok(Ok(added)) => Some(added),
                Ok(Err(e)) => {
                    error!(error = %format!("{e:#}"), "Vehicle discovery failed");
                    None
                }
                Err(e) => {
                    error!(error = %e, "Vehicle discovery task failed");
                    None
                }
            },
        };

        for (route, b) in self.backoff.iter() {
            debug!(route, retries = b.retries(), was_empty = b.was_empty(), "Backoff state");
        }
        let sleep = self.backoff.decide(self.config.max_retries);

        IterationReport {
            routes: reports,
            matched,
            discovered,
            sleep,
        }
    }

    /// Loops forever: iterate, then sleep for the duration the backoff chose.
    pub async fn run_forever(mut self) {
        loop {
            let report = self.run_iteration(Utc::now()).await;
            let duration = self.sleep_duration(report.sleep);
            match report.sleep {
                SleepKind::Extended => info!(secs = duration.as_secs(), "Sleeping for extended duration"),
                SleepKind::Normal => info!(secs = duration.as_secs(), "Sleeping for normal duration"),
            }
            tokio::time::sleep(duration).await;
            debug!("Wake up");
        }
    }
}
