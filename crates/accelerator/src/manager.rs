//! Single-accelerator lifecycle manager.
//!
//! [`AcceleratorManager`] owns the launch command's child process and the
//! one [`AcceleratorState`] instance, which it publishes on a
//! [`tokio::sync::watch`] channel. Log lines from the child drive the
//! state forward through the provisioning stages; active `/health`
//! probes decide when the worker is actually `ready`.
//!
//! Each provisioning attempt gets a generation number. Output and exit
//! notifications from an older generation are ignored, so a stale child
//! being torn down cannot knock a fresh one offline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex, Notify};

use crate::api::WorkerApi;
use crate::classifier::LogClassifier;
use crate::config::AcceleratorConfig;
use crate::process::{self, OutputLine};
use crate::state::{AcceleratorStage, AcceleratorState, Classification};

/// Owns the accelerator process and its published state.
///
/// Created once at startup and shared via `Arc`.
pub struct AcceleratorManager {
    api: WorkerApi,
    shared: Arc<Shared>,
    child: Mutex<Option<Child>>,
    /// Serializes `ensure_ready` callers.
    provision_lock: Mutex<()>,
}

/// State reachable from the output-consumer task.
struct Shared {
    config: AcceleratorConfig,
    classifier: LogClassifier,
    state_tx: watch::Sender<AcceleratorState>,
    generation: AtomicU64,
    /// Woken when the log announces startup so the next health probe
    /// runs without waiting out the interval.
    ready_hint: Notify,
}

impl AcceleratorManager {
    pub fn new(config: AcceleratorConfig) -> Self {
        Self::with_classifier(config, LogClassifier::default())
    }

    pub fn with_classifier(config: AcceleratorConfig, classifier: LogClassifier) -> Self {
        let (state_tx, _) = watch::channel(AcceleratorState::default());
        Self {
            api: WorkerApi::new(),
            shared: Arc::new(Shared {
                config,
                classifier,
                state_tx,
                generation: AtomicU64::new(0),
                ready_hint: Notify::new(),
            }),
            child: Mutex::new(None),
            provision_lock: Mutex::new(()),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> AcceleratorState {
        self.shared.state_tx.borrow().clone()
    }

    /// Receive every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<AcceleratorState> {
        self.shared.state_tx.subscribe()
    }

    /// Last known worker base URL.
    pub fn endpoint(&self) -> Option<String> {
        self.shared.state_tx.borrow().worker_endpoint.clone()
    }

    pub fn api(&self) -> &WorkerApi {
        &self.api
    }

    pub fn config(&self) -> &AcceleratorConfig {
        &self.shared.config
    }

    /// Feed one log line into the classifier as if the current child had
    /// printed it.
    pub fn ingest_line(&self, line: &str) {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.ingest(generation, line);
    }

    /// Force the state to `offline`. Re-provisioning happens on the next
    /// [`ensure_ready`](Self::ensure_ready).
    pub fn mark_offline(&self, reason: &str) {
        self.shared.mark_offline(reason);
    }

    /// Return a healthy worker endpoint, provisioning the accelerator if
    /// needed.
    ///
    /// Concurrent callers queue on the provisioning lock; the second one
    /// finds the state already `ready` and only pays for one probe.
    pub async fn ensure_ready(&self) -> Result<String, AcceleratorError> {
        let _guard = self.provision_lock.lock().await;
        let config = &self.shared.config;

        let snapshot = self.state();
        if snapshot.is_ready() {
            if let Some(endpoint) = snapshot.worker_endpoint {
                match self.api.health(&endpoint, config.health_timeout).await {
                    Ok(_) => return Ok(endpoint),
                    Err(e) => {
                        tracing::warn!(endpoint = %endpoint, error = %e, "Ready accelerator failed health check");
                        self.shared.mark_offline(&format!("Health check failed: {e}"));
                    }
                }
            }
        }

        self.provision().await
    }

    /// Kill the child process and ask the provider to stop the machine.
    ///
    /// Every step is bounded by `shutdown_timeout`; failures are logged
    /// and never returned. The state ends at `idle`.
    pub async fn shutdown(&self) {
        let config = &self.shared.config;
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_child().await;

        if let Some((program, args)) = config.stop_command.split_first() {
            tracing::info!(program = %program, "Running accelerator stop command");

            let result = tokio::time::timeout(
                config.shutdown_timeout,
                Command::new(program).args(args).kill_on_drop(true).output(),
            )
            .await;

            match result {
                Ok(Ok(output)) if output.status.success() => {
                    tracing::info!("Accelerator stop command succeeded");
                }
                Ok(Ok(output)) => {
                    tracing::warn!(
                        exit_code = ?output.status.code(),
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "Accelerator stop command failed",
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to execute accelerator stop command");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = config.shutdown_timeout.as_secs(),
                        "Accelerator stop command timed out",
                    );
                }
            }
        }

        self.shared
            .state_tx
            .send_modify(|s| s.reset_to(AcceleratorStage::Idle, "Accelerator stopped", None));
        tracing::info!("Accelerator shut down");
    }

    // ---- private helpers ----

    async fn provision(&self) -> Result<String, AcceleratorError> {
        let config = &self.shared.config;

        self.stop_child().await;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.shared.state_tx.send_modify(|s| {
            s.reset_to(
                AcceleratorStage::Detecting,
                "Launching accelerator",
                Some(config.initial_endpoint()),
            )
        });
        tracing::info!(generation, "Provisioning accelerator");

        let launched = match process::spawn(&config.launch_argv()) {
            Ok(launched) => launched,
            Err(e) => {
                tracing::error!(error = %e, "Failed to launch accelerator command");
                self.shared.mark_offline("Failed to launch accelerator");
                return Err(AcceleratorError::Spawn(e.to_string()));
            }
        };
        *self.child.lock().await = Some(launched.child);
        tokio::spawn(consume_output(
            Arc::clone(&self.shared),
            generation,
            launched.lines,
        ));

        for attempt in 1..=config.health_attempts {
            tokio::select! {
                _ = tokio::time::sleep(config.health_interval) => {}
                _ = self.shared.ready_hint.notified() => {}
            }

            let state = self.state();
            if state.stage == AcceleratorStage::Offline {
                self.stop_child().await;
                return Err(AcceleratorError::Unavailable(
                    "accelerator process exited before becoming healthy".into(),
                ));
            }
            let Some(endpoint) = state.worker_endpoint else {
                continue;
            };

            match self.api.health(&endpoint, config.health_timeout).await {
                Ok(health) => {
                    let ready = Classification {
                        stage: AcceleratorStage::Ready,
                        message: "Worker ready".into(),
                        percent: 100,
                    };
                    if self.shared.state_tx.send_if_modified(|s| s.apply(&ready)) {
                        tracing::info!(
                            endpoint = %endpoint,
                            attempt,
                            models_loaded = health.models_loaded,
                            "Accelerator ready",
                        );
                        return Ok(endpoint);
                    }
                }
                Err(e) => {
                    tracing::debug!(attempt, endpoint = %endpoint, error = %e, "Health probe failed");
                }
            }
        }

        let reason = format!(
            "worker not healthy after {} attempts",
            config.health_attempts
        );
        tracing::error!(%reason, "Accelerator provisioning timed out");
        self.shared.mark_offline("Accelerator did not become healthy");
        self.stop_child().await;
        Err(AcceleratorError::Unavailable(reason))
    }

    async fn stop_child(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        let pid = child.id();
        let timeout = self.shared.config.shutdown_timeout;
        match tokio::time::timeout(timeout, child.kill()).await {
            Ok(Ok(())) => tracing::info!(pid = ?pid, "Accelerator process stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to kill accelerator process"),
            Err(_) => tracing::warn!("Timed out killing accelerator process"),
        }
    }
}

impl Shared {
    fn current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn ingest(&self, generation: u64, line: &str) {
        if !self.current(generation) {
            return;
        }
        let outcome = self.classifier.classify(line);

        if let Some(remap) = outcome.remap {
            let endpoint = self.config.endpoint_for_port(remap.local);
            tracing::info!(
                remote = remap.remote,
                local = remap.local,
                endpoint = %endpoint,
                "Worker port remapped",
            );
            self.state_tx
                .send_modify(|s| s.worker_endpoint = Some(endpoint));
        }

        let Some(classification) = outcome.classification else {
            return;
        };
        tracing::debug!(stage = %classification.stage, line = %line, "Classified accelerator output");

        // Ready is confirmed by a health probe, never by the log alone.
        if classification.stage == AcceleratorStage::Ready {
            self.ready_hint.notify_one();
            return;
        }

        let before = self.state_tx.borrow().stage;
        if self.state_tx.send_if_modified(|s| s.apply(&classification)) {
            let after = self.state_tx.borrow().stage;
            if after != before {
                tracing::info!(from = %before, to = %after, "Accelerator stage changed");
            }
        }
    }

    fn on_exit(&self, generation: u64) {
        if !self.current(generation) {
            return;
        }
        tracing::warn!(generation, "Accelerator process output closed");
        self.mark_offline("Accelerator process exited");
    }

    fn mark_offline(&self, reason: &str) {
        let offline = Classification {
            stage: AcceleratorStage::Offline,
            message: reason.to_string(),
            percent: 0,
        };
        if self.state_tx.send_if_modified(|s| s.apply(&offline)) {
            tracing::warn!(reason, "Accelerator offline");
        }
    }
}

async fn consume_output(
    shared: Arc<Shared>,
    generation: u64,
    mut lines: mpsc::UnboundedReceiver<OutputLine>,
) {
    while let Some(line) = lines.recv().await {
        shared.ingest(generation, &line.text);
    }
    shared.on_exit(generation);
}

/// Errors surfaced by [`AcceleratorManager::ensure_ready`].
#[derive(Debug, thiserror::Error)]
pub enum AcceleratorError {
    /// The worker did not become healthy, or its process exited first.
    #[error("Accelerator unavailable: {0}")]
    Unavailable(String),

    /// The launch command could not be started.
    #[error("Failed to launch accelerator: {0}")]
    Spawn(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
