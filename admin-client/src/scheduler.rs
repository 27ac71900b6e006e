use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::ApplicationFactory;
use crate::config::SchedulingConfig;
use crate::registrator::{RegistrationId, Registrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationPhase {
    #[default]
    Idle,
    /// Ready was signalled but the registry has not accepted us yet, or the last refresh failed.
    Registering,
    Registered,
    Deregistering,
    Stopped,
}

impl RegistrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationPhase::Idle => "idle",
            RegistrationPhase::Registering => "registering",
            RegistrationPhase::Registered => "registered",
            RegistrationPhase::Deregistering => "deregistering",
            RegistrationPhase::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

/// Snapshot of the scheduler's view of the registration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationState {
    pub phase: RegistrationPhase,
    /// Id from the most recent successful registration.
    pub registration_id: Option<RegistrationId>,
    pub last_outcome: Option<AttemptOutcome>,
    pub consecutive_failures: u32,
    pub last_attempt_at: Option<OffsetDateTime>,
}

enum Event {
    Ready,
    Tick,
    /// `None` once every handle is gone.
    Stop(Option<oneshot::Sender<()>>),
}

/// Handle to the registration worker.
///
/// All registry calls run one at a time on a single spawned task that owns the
/// `RegistrationState` and its timer. The handle only signals it: a pending ready signal
/// absorbs further ones, and stop requests are served ahead of anything else.
#[derive(Clone)]
pub struct RegistrationScheduler {
    ready: mpsc::Sender<()>,
    stop: mpsc::Sender<oneshot::Sender<()>>,
    state: watch::Receiver<RegistrationState>,
}

impl RegistrationScheduler {
    /// Spawn the worker on the current tokio runtime. Nothing is sent to the registry until
    /// `on_application_ready` is called.
    pub fn spawn(
        mut config: SchedulingConfig,
        factory: Arc<dyn ApplicationFactory>,
        registrator: Arc<dyn Registrator>,
    ) -> Self {
        if config.period.is_zero() {
            warn!(
                "registration period must not be zero, using {:?}",
                SchedulingConfig::default().period
            );
            config.period = SchedulingConfig::default().period;
        }

        let (ready, ready_receiver) = mpsc::channel(1);
        let (stop, stop_receiver) = mpsc::channel(1);
        let (state_sender, state) = watch::channel(RegistrationState::default());

        let worker = SchedulerWorker {
            config,
            factory,
            registrator,
            state: state_sender,
            timer: None,
        };
        tokio::spawn(worker.run(ready_receiver, stop_receiver));

        Self { ready, stop, state }
    }

    /// Register right away, then keep refreshing the registration every period.
    pub fn on_application_ready(&self) {
        match self.ready.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("application ready already pending"),
            Err(TrySendError::Closed(())) => debug!("registration worker already stopped"),
        }
    }

    /// Stop refreshing and remove the registration. Returns once the worker is done, which
    /// is bounded by the attempt in flight plus the deregistration, each limited by the
    /// registrator's request timeout.
    pub async fn on_application_stopping(&self) {
        let (done, finished) = oneshot::channel();

        if self.stop.send(done).await.is_err() {
            debug!("registration worker already stopped");
            return;
        }

        if finished.await.is_err() {
            debug!("registration worker stopped before acknowledging this request");
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state.borrow().clone()
    }

    /// A receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.state.clone()
    }
}

struct SchedulerWorker {
    config: SchedulingConfig,
    factory: Arc<dyn ApplicationFactory>,
    registrator: Arc<dyn Registrator>,
    state: watch::Sender<RegistrationState>,
    /// Armed by the first ready signal. Only polled while the worker is idle, so ticks
    /// never pile up behind a slow attempt.
    timer: Option<Interval>,
}

impl SchedulerWorker {
    async fn run(
        mut self,
        mut ready: mpsc::Receiver<()>,
        mut stop: mpsc::Receiver<oneshot::Sender<()>>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                done = stop.recv() => Event::Stop(done),
                Some(()) = ready.recv() => Event::Ready,
                () = next_tick(&mut self.timer) => Event::Tick,
            };

            match event {
                Event::Ready => self.on_ready().await,
                Event::Tick => self.on_tick().await,
                Event::Stop(Some(done)) => {
                    self.on_stop().await;
                    if done.send(()).is_err() {
                        debug!("stop requester went away before deregistration finished");
                    }
                    break;
                }
                Event::Stop(None) => {
                    debug!("all scheduler handles dropped, leaving registration in place");
                    break;
                }
            }
        }

        self.timer = None;
    }

    fn phase(&self) -> RegistrationPhase {
        self.state.borrow().phase
    }

    async fn on_ready(&mut self) {
        if !self.config.auto_register {
            debug!("automatic registration disabled, staying idle");
            return;
        }

        self.arm_timer();
        self.state.send_modify(|state| {
            if state.phase == RegistrationPhase::Idle {
                state.phase = RegistrationPhase::Registering;
            }
        });
        self.register().await;
    }

    async fn on_tick(&mut self) {
        match self.phase() {
            RegistrationPhase::Registering | RegistrationPhase::Registered => {
                self.register().await
            }
            phase => debug!(phase = phase.as_str(), "ignoring registration tick"),
        }
    }

    async fn on_stop(&mut self) {
        self.timer = None;

        let registration_id = self.state.borrow().registration_id.clone();

        match registration_id {
            Some(id) if self.config.auto_deregister => {
                self.state
                    .send_modify(|state| state.phase = RegistrationPhase::Deregistering);
                self.deregister(id).await;
            }
            Some(_) => debug!("automatic deregistration disabled, leaving registration in place"),
            None => debug!("application was never registered, nothing to deregister"),
        }

        self.state
            .send_modify(|state| state.phase = RegistrationPhase::Stopped);
    }

    /// Replace any running timer with a new one that ticks one period from now.
    fn arm_timer(&mut self) {
        let period = self.config.period;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(interval);
    }

    async fn register(&mut self) {
        let started = Instant::now();

        let result = match self.factory.describe() {
            Ok(description) => self
                .registrator
                .register(&description)
                .await
                .map_err(|error| error.to_string()),
            Err(error) => {
                error!("failed to describe application for registration: {}", error);
                Err(error.to_string())
            }
        };

        metrics::histogram!("admin_client_registration_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(id) => {
                let previous = self.state.borrow().registration_id.clone();
                if previous.as_ref() != Some(&id) {
                    info!(id = %id, "application registered");
                } else {
                    debug!(id = %id, "application registration refreshed");
                }

                metrics::counter!("admin_client_registrations_total", "outcome" => "success")
                    .increment(1);
                metrics::gauge!("admin_client_consecutive_failures").set(0.0);

                self.state.send_modify(|state| {
                    state.phase = RegistrationPhase::Registered;
                    state.registration_id = Some(id);
                    state.last_outcome = Some(AttemptOutcome::Success);
                    state.consecutive_failures = 0;
                    state.last_attempt_at = Some(OffsetDateTime::now_utc());
                });
            }
            Err(reason) => {
                let failures = self.state.borrow().consecutive_failures + 1;
                warn!(
                    failures,
                    "failed to register application, retrying in {:?}: {}",
                    self.config.period,
                    reason
                );

                metrics::counter!("admin_client_registrations_total", "outcome" => "failure")
                    .increment(1);
                metrics::gauge!("admin_client_consecutive_failures").set(failures as f64);

                self.state.send_modify(|state| {
                    state.phase = RegistrationPhase::Registering;
                    state.last_outcome = Some(AttemptOutcome::Failure(reason));
                    state.consecutive_failures = failures;
                    state.last_attempt_at = Some(OffsetDateTime::now_utc());
                });
            }
        }

        // The next attempt starts one full period after this one ended.
        if let Some(timer) = self.timer.as_mut() {
            timer.reset();
        }
    }

    async fn deregister(&mut self, id: RegistrationId) {
        match self.registrator.deregister(&id).await {
            Ok(()) => {
                info!(id = %id, "application deregistered");
                metrics::counter!("admin_client_deregistrations_total", "outcome" => "success")
                    .increment(1);
                self.state.send_modify(|state| state.registration_id = None);
            }
            Err(error) => {
                warn!(id = %id, "failed to deregister application: {}", error);
                metrics::counter!("admin_client_deregistrations_total", "outcome" => "failure")
                    .increment(1);
            }
        }
    }
}

/// Resolves on the next tick of `timer`, never when no timer is armed.
async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
