//! Accelerator lifecycle stages and the published state snapshot.

use gazer_core::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of the remote accelerator.
///
/// Provisioning stages are listed in the order the launch command moves
/// through them; [`AcceleratorStage::rank`] encodes that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorStage {
    Idle,
    Detecting,
    Resolving,
    Provisioning,
    Connecting,
    Syncing,
    Installing,
    Starting,
    DownloadingWeights,
    LoadingModels,
    Ready,
    Offline,
}

impl AcceleratorStage {
    /// Position in the forward provisioning order. `Idle` and `Offline`
    /// both sit at zero.
    pub fn rank(self) -> u8 {
        match self {
            Self::Idle | Self::Offline => 0,
            Self::Detecting => 1,
            Self::Resolving => 2,
            Self::Provisioning => 3,
            Self::Connecting => 4,
            Self::Syncing => 5,
            Self::Installing => 6,
            Self::Starting => 7,
            Self::DownloadingWeights => 8,
            Self::LoadingModels => 9,
            Self::Ready => 11,
        }
    }

    /// The `[low, high]` provisioning-percent band for this stage.
    pub fn band(self) -> (u8, u8) {
        match self {
            Self::Idle | Self::Offline => (0, 0),
            Self::Detecting => (0, 5),
            Self::Resolving => (5, 10),
            Self::Provisioning => (10, 20),
            Self::Connecting => (20, 30),
            Self::Syncing => (30, 45),
            Self::Installing => (45, 55),
            Self::Starting => (55, 65),
            Self::DownloadingWeights => (65, 80),
            Self::LoadingModels => (80, 95),
            Self::Ready => (100, 100),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::Resolving => "resolving",
            Self::Provisioning => "provisioning",
            Self::Connecting => "connecting",
            Self::Syncing => "syncing",
            Self::Installing => "installing",
            Self::Starting => "starting",
            Self::DownloadingWeights => "downloading_weights",
            Self::LoadingModels => "loading_models",
            Self::Ready => "ready",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for AcceleratorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified observation about the accelerator, produced from a log
/// line or a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub stage: AcceleratorStage,
    pub message: String,
    pub percent: u8,
}

/// Snapshot published on the manager's watch channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorState {
    pub stage: AcceleratorStage,
    pub message: String,
    pub progress_percent: u8,
    /// Base URL of the worker's HTTP API, once known.
    pub worker_endpoint: Option<String>,
    pub updated_at: Timestamp,
}

impl Default for AcceleratorState {
    fn default() -> Self {
        Self {
            stage: AcceleratorStage::Idle,
            message: "Accelerator idle".into(),
            progress_percent: 0,
            worker_endpoint: None,
            updated_at: chrono::Utc::now(),
        }
    }
}

impl AcceleratorState {
    pub fn is_ready(&self) -> bool {
        self.stage == AcceleratorStage::Ready
    }

    /// Fold a classification into the state.
    ///
    /// Forward-only: a lower-ranked stage is ignored, the same stage
    /// refreshes the message and keeps the larger percent. `Offline`
    /// always applies. Returns whether anything changed.
    pub fn apply(&mut self, classification: &Classification) -> bool {
        let incoming = classification.stage;

        if incoming == AcceleratorStage::Offline {
            if self.stage == AcceleratorStage::Offline
                && self.message == classification.message
            {
                return false;
            }
            self.stage = AcceleratorStage::Offline;
            self.message = classification.message.clone();
            self.progress_percent = 0;
            self.touch();
            return true;
        }

        // Leaving offline/idle needs an explicit reset by the manager.
        if self.stage == AcceleratorStage::Offline {
            return false;
        }

        let current_rank = self.stage.rank();
        let incoming_rank = incoming.rank();

        if incoming_rank > current_rank {
            self.stage = incoming;
            self.message = classification.message.clone();
            self.progress_percent = classification.percent.min(100);
            self.touch();
            true
        } else if incoming_rank == current_rank && incoming == self.stage {
            let percent = self.progress_percent.max(classification.percent.min(100));
            if percent == self.progress_percent && self.message == classification.message {
                return false;
            }
            self.progress_percent = percent;
            self.message = classification.message.clone();
            self.touch();
            true
        } else {
            false
        }
    }

    /// Reset to the start of a provisioning attempt.
    pub fn reset_to(&mut self, stage: AcceleratorStage, message: &str, endpoint: Option<String>) {
        self.stage = stage;
        self.message = message.to_string();
        self.progress_percent = stage.band().0;
        self.worker_endpoint = endpoint;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}
