//! Continuous sampling.
//!
//! A [`Session`] owns the [`Scale`] and polls it with `Q` on a fixed
//! interval from a background task. Failed exchanges never end the loop,
//! they are reported to the observer as `Error` readings. Only
//! [`Session::stop`] (or dropping the session) ends it, and only between
//! cycles: an exchange in flight always runs to completion first.

use futures::FutureExt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::proto::{
    command::Command,
    response::WeightReading,
    ProtoError, Result,
};
use crate::sample::Sample;
use crate::scale::Scale;
use crate::DEFAULT_INTERVAL;

/// Receives one [`Sample`] per completed cycle.
pub trait Observer: Send + 'static {
    fn observe(&mut self, sample: Sample);
}

impl<F> Observer for F
where
    F: FnMut(Sample) + Send + 'static,
{
    fn observe(&mut self, sample: Sample) {
        self(sample)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Stopping,
}

/// Outcome of [`Session::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Start {
    Started,
    /// A sampling loop is already running, nothing was changed
    AlreadyActive,
}

struct Worker<O> {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<(Scale, O)>,
}

pub struct Session<O: Observer> {
    state: SessionState,
    // Scale and observer while idle, the worker holds them while active
    parts: Option<(Scale, O)>,
    worker: Option<Worker<O>>,
}

impl<O: Observer> Session<O> {
    pub fn new(scale: Scale, observer: O) -> Self {
        Self {
            state: SessionState::Idle,
            parts: Some((scale, observer)),
            worker: None,
        }
    }

    /// A loop that ended on its own (its observer panicked) reports `Idle`.
    pub fn state(&self) -> SessionState {
        match &self.worker {
            Some(worker) if worker.handle.is_finished() => SessionState::Idle,
            _ => self.state,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Start polling every `interval` (default [`DEFAULT_INTERVAL`]).
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, interval: Option<Duration>) -> Result<Start> {
        self.reap();
        if self.state != SessionState::Idle {
            warn!(state = ?self.state, "sampling already active");
            return Ok(Start::AlreadyActive);
        }

        let (scale, observer) = self.parts.take().ok_or(ProtoError::Abort)?;
        let interval = interval.unwrap_or(DEFAULT_INTERVAL);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(sample_loop(scale, observer, interval, stop_rx));

        self.worker = Some(Worker {
            stop_tx: Some(stop_tx),
            handle,
        });
        self.state = SessionState::Active;
        info!(?interval, "sampling started");
        Ok(Start::Started)
    }

    /// Stop polling after the cycle in flight. Returns once the loop has
    /// exited; no exchange is issued after that. Calling it on an idle
    /// session does nothing.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.as_mut() else {
            return;
        };

        self.state = SessionState::Stopping;
        if let Some(stop_tx) = worker.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let joined = (&mut worker.handle).await;
        self.worker = None;
        match joined {
            Ok(parts) => self.parts = Some(parts),
            Err(err) => error!(error = %err, "sampling task aborted, channel lost"),
        }
        self.state = SessionState::Idle;
        info!("sampling stopped");
    }

    /// Collect a sampling task that has already finished.
    fn reap(&mut self) {
        if !self.worker.as_ref().map_or(false, |w| w.handle.is_finished()) {
            return;
        }
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.handle.now_or_never() {
            Some(Ok(parts)) => self.parts = Some(parts),
            Some(Err(err)) => error!(error = %err, "sampling task aborted, channel lost"),
            None => {}
        }
        self.state = SessionState::Idle;
    }

    /// Single exchange outside the sampling loop.
    pub async fn send(&mut self, command: Command) -> Result<WeightReading> {
        self.reap();
        if self.state != SessionState::Idle {
            return Err(ProtoError::SessionActive);
        }
        let (scale, _) = self.parts.as_mut().ok_or(ProtoError::Abort)?;
        scale.send(command).await
    }

    /// Query the current weight outside the sampling loop
    pub async fn read_weight(&mut self) -> Result<WeightReading> {
        self.send(Command::Query).await
    }
}

impl<O: Observer> Drop for Session<O> {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.worker.as_mut().and_then(|w| w.stop_tx.take()) {
            debug!("session dropped while active, stopping loop");
            let _ = stop_tx.send(());
        }
    }
}

async fn sample_loop<O: Observer>(
    mut scale: Scale,
    mut observer: O,
    interval: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> (Scale, O) {
    let mut seq = 0;
    loop {
        let reading = match scale.send(Command::Query).await {
            Ok(reading) => reading,
            Err(err) => {
                warn!(error = %err, "exchange failed");
                WeightReading::error()
            }
        };
        seq += 1;
        observer.observe(Sample::new(seq, reading));

        // A dropped sender counts as stop as well
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(cycles = seq, "sampling loop exited");
    (scale, observer)
}
