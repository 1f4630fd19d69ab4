//! Job progress stages and their overall-percent bands.
//!
//! The worker reports only per-stage counters (`current` of `total`).
//! Each stage owns a fixed `[low, high]` slice of the overall 0-100
//! range, laid out in execution order, so interpolating inside the band
//! yields an overall percent that never moves backwards across a stage
//! transition.

use serde::{Deserialize, Serialize};

/// A named phase of a single job's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    /// Waiting for the accelerator to become ready.
    Provisioning,
    Initializing,
    Loading,
    Preparing,
    Generating,
    RemovingBackground,
    Stitching,
    Encoding,
    Uploading,
    Complete,
    Failed,
}

impl JobStage {
    /// Map a stage name reported by the worker onto a [`JobStage`].
    ///
    /// Returns `None` for names the worker uses while it has no record of
    /// the job (`"unknown"`) and for anything unrecognised.
    pub fn from_worker(name: &str) -> Option<Self> {
        let stage = match name.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "provisioning" => Self::Provisioning,
            "initializing" => Self::Initializing,
            "loading" | "loading_rembg" => Self::Loading,
            "preparing" => Self::Preparing,
            "generating" => Self::Generating,
            "removing_bg" | "removing_background" | "removingbackground" => {
                Self::RemovingBackground
            }
            "stitching" | "saving" => Self::Stitching,
            "encoding" => Self::Encoding,
            "uploading" => Self::Uploading,
            "complete" | "completed" => Self::Complete,
            "failed" | "error" => Self::Failed,
            _ => return None,
        };
        Some(stage)
    }

    /// The `[low, high]` percent band owned by this stage.
    pub fn band(self) -> (u8, u8) {
        match self {
            Self::Queued => (0, 0),
            Self::Provisioning => (0, 2),
            Self::Initializing | Self::Loading | Self::Preparing => (2, 5),
            Self::Generating => (5, 25),
            Self::RemovingBackground => (25, 45),
            Self::Stitching => (45, 85),
            Self::Encoding => (85, 90),
            Self::Uploading => (90, 95),
            Self::Complete => (95, 100),
            Self::Failed => (0, 0),
        }
    }

    /// Interpolate the overall percent for `current` of `total` inside
    /// this stage's band.
    ///
    /// Missing or zero totals yield the band's lower bound; `current` is
    /// clamped to `total`.
    pub fn percent(self, current: Option<u64>, total: Option<u64>) -> u8 {
        let (low, high) = self.band();
        let (Some(current), Some(total)) = (current, total) else {
            return low;
        };
        if total == 0 {
            return low;
        }
        let span = u128::from(high - low);
        let offset = span * u128::from(current.min(total)) / u128::from(total);
        low + offset as u8
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_names_map_to_stages() {
        assert_eq!(JobStage::from_worker("generating"), Some(JobStage::Generating));
        assert_eq!(
            JobStage::from_worker("removing_bg"),
            Some(JobStage::RemovingBackground)
        );
        assert_eq!(JobStage::from_worker("saving"), Some(JobStage::Stitching));
        assert_eq!(JobStage::from_worker(" Complete "), Some(JobStage::Complete));
        assert_eq!(JobStage::from_worker("unknown"), None);
        assert_eq!(JobStage::from_worker(""), None);
    }

    #[test]
    fn bands_are_ordered_and_contiguous() {
        let ordered = [
            JobStage::Provisioning,
            JobStage::Preparing,
            JobStage::Generating,
            JobStage::RemovingBackground,
            JobStage::Stitching,
            JobStage::Encoding,
            JobStage::Uploading,
            JobStage::Complete,
        ];
        for pair in ordered.windows(2) {
            let (_, prev_high) = pair[0].band();
            let (next_low, _) = pair[1].band();
            assert_eq!(prev_high, next_low, "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert_eq!(JobStage::Complete.band().1, 100);
    }

    #[test]
    fn percent_interpolates_inside_band() {
        assert_eq!(JobStage::Generating.percent(Some(0), Some(900)), 5);
        assert_eq!(JobStage::Generating.percent(Some(450), Some(900)), 15);
        assert_eq!(JobStage::Generating.percent(Some(900), Some(900)), 25);
        assert_eq!(JobStage::Stitching.percent(Some(4), Some(8)), 65);
    }

    #[test]
    fn only_complete_and_failed_are_terminal() {
        assert!(JobStage::Complete.is_terminal());
        assert!(JobStage::Failed.is_terminal());
        assert!(!JobStage::Uploading.is_terminal());
        assert!(!JobStage::Generating.is_terminal());
    }

    #[test]
    fn percent_handles_huge_counters() {
        let half = u64::MAX / 2;
        assert_eq!(JobStage::Generating.percent(Some(half), Some(half)), 25);
        assert_eq!(JobStage::Generating.percent(Some(u64::MAX), Some(u64::MAX)), 25);
        assert_eq!(JobStage::Stitching.percent(Some(half), Some(u64::MAX)), 64);
        assert_eq!(JobStage::Encoding.percent(Some(u64::MAX), Some(3)), 90);
    }

    #[test]
    fn percent_without_counters_is_lower_bound() {
        assert_eq!(JobStage::RemovingBackground.percent(None, None), 25);
        assert_eq!(JobStage::Encoding.percent(Some(3), Some(0)), 85);
    }

    #[test]
    fn percent_clamps_overshoot() {
        assert_eq!(JobStage::Uploading.percent(Some(12), Some(10)), 95);
    }

    #[test]
    fn stage_transition_does_not_go_backwards() {
        let late_generating = JobStage::Generating.percent(Some(864), Some(900));
        let early_bg = JobStage::RemovingBackground.percent(Some(45), Some(900));
        assert_eq!(late_generating, 24);
        assert_eq!(early_bg, 26);
        assert!(early_bg >= late_generating);
    }
}
