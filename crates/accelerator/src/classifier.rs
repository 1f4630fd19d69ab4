//! Ordered rule table that turns launch-command log lines into
//! [`Classification`]s.
//!
//! Every rule is evaluated against every line and the **last** matching
//! rule wins, so more specific or later-phase rules are listed after the
//! general ones. Port-remap announcements are detected separately since
//! they carry no stage information.

use std::sync::LazyLock;

use regex::Regex;

use crate::state::{AcceleratorStage, Classification};

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid regex"));

static SYNC_COUNTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)sync(?:ing|ed)?\D*?(\d+)\s*/\s*(\d+)\s*files?").expect("valid regex")
});

static PORT_REMAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)remote\s*:?\s*(\d{1,5})\s*->\s*local(?:host)?\s*:?\s*(\d{1,5})")
        .expect("valid regex")
});

// ---------------------------------------------------------------------------
// Rule types
// ---------------------------------------------------------------------------

/// How a rule recognises a line.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Any of the needles occurs, case-insensitively.
    Contains(&'static [&'static str]),
    /// The regex matches. Counter rules read captures 1 and 2 as `N/M`.
    Pattern(Regex),
}

/// How a matched rule derives its percent.
#[derive(Debug, Clone, Copy)]
pub enum PercentRule {
    Fixed(u8),
    /// Interpolate inside the stage band from an `N/M` capture pair.
    Counter,
}

#[derive(Debug, Clone)]
pub struct LogRule {
    pub matcher: Matcher,
    pub stage: AcceleratorStage,
    pub message: &'static str,
    pub percent: PercentRule,
}

impl LogRule {
    pub fn contains(
        needles: &'static [&'static str],
        stage: AcceleratorStage,
        message: &'static str,
        percent: u8,
    ) -> Self {
        Self {
            matcher: Matcher::Contains(needles),
            stage,
            message,
            percent: PercentRule::Fixed(percent),
        }
    }

    pub fn counter(pattern: Regex, stage: AcceleratorStage, message: &'static str) -> Self {
        Self {
            matcher: Matcher::Pattern(pattern),
            stage,
            message,
            percent: PercentRule::Counter,
        }
    }

    fn evaluate(&self, line: &str, lowered: &str) -> Option<Classification> {
        match &self.matcher {
            Matcher::Contains(needles) => needles
                .iter()
                .any(|needle| lowered.contains(needle))
                .then(|| self.fixed()),
            Matcher::Pattern(re) => {
                let caps = re.captures(line)?;
                match self.percent {
                    PercentRule::Fixed(_) => Some(self.fixed()),
                    PercentRule::Counter => {
                        let current = caps.get(1)?.as_str().parse::<u64>().ok()?;
                        let total = caps.get(2)?.as_str().parse::<u64>().ok()?;
                        Some(Classification {
                            stage: self.stage,
                            message: format!("{} ({current}/{total})", self.message),
                            percent: interpolate(self.stage, current, total),
                        })
                    }
                }
            }
        }
    }

    fn fixed(&self) -> Classification {
        let percent = match self.percent {
            PercentRule::Fixed(p) => p,
            PercentRule::Counter => self.stage.band().0,
        };
        Classification {
            stage: self.stage,
            message: self.message.to_string(),
            percent,
        }
    }
}

/// A `remote <X> -> local <Y>` announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRemap {
    pub remote: u16,
    pub local: u16,
}

/// Result of classifying one line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineOutcome {
    pub classification: Option<Classification>,
    pub remap: Option<PortRemap>,
}

// ---------------------------------------------------------------------------
// LogClassifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LogClassifier {
    rules: Vec<LogRule>,
}

impl Default for LogClassifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl LogClassifier {
    pub fn new(rules: Vec<LogRule>) -> Self {
        Self { rules }
    }

    /// Classify a single raw output line.
    pub fn classify(&self, raw: &str) -> LineOutcome {
        let line = ANSI_RE.replace_all(raw, "");
        let line = line.trim();
        if line.is_empty() {
            return LineOutcome::default();
        }
        let lowered = line.to_lowercase();

        let classification = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(line, &lowered))
            .last();

        LineOutcome {
            classification,
            remap: parse_port_remap(line),
        }
    }
}

/// Extract a port-forward remap from a line, if it announces one.
pub fn parse_port_remap(line: &str) -> Option<PortRemap> {
    let caps = PORT_REMAP_RE.captures(line)?;
    let remote = caps.get(1)?.as_str().parse().ok()?;
    let local = caps.get(2)?.as_str().parse().ok()?;
    Some(PortRemap { remote, local })
}

fn interpolate(stage: AcceleratorStage, current: u64, total: u64) -> u8 {
    let (low, high) = stage.band();
    if total == 0 {
        return low;
    }
    let span = u128::from(high - low);
    low + (span * u128::from(current.min(total)) / u128::from(total)) as u8
}

/// The built-in rule table, ordered from earliest to latest phase.
pub fn default_rules() -> Vec<LogRule> {
    use AcceleratorStage::*;

    vec![
        LogRule::contains(
            &["detecting", "checking gpu", "looking for gpu"],
            Detecting,
            "Detecting accelerator",
            2,
        ),
        LogRule::contains(
            &["resolving", "selecting machine", "finding available"],
            Resolving,
            "Resolving machine",
            7,
        ),
        LogRule::contains(
            &["provisioning", "creating pod", "allocating", "starting instance"],
            Provisioning,
            "Provisioning accelerator",
            15,
        ),
        LogRule::contains(
            &["connecting", "establishing ssh", "ssh connection"],
            Connecting,
            "Connecting to accelerator",
            25,
        ),
        LogRule::contains(
            &["syncing", "uploading files", "rsync"],
            Syncing,
            "Syncing files",
            30,
        ),
        LogRule::counter(SYNC_COUNTER_RE.clone(), Syncing, "Syncing files"),
        LogRule::contains(
            &["installing", "pip install", "requirements"],
            Installing,
            "Installing dependencies",
            50,
        ),
        LogRule::contains(
            &["running command", "starting server", "cloning liveportrait", "launching"],
            Starting,
            "Starting worker",
            60,
        ),
        LogRule::contains(
            &[
                "checking for liveportrait weights",
                "downloading liveportrait weights",
                "downloading weights",
            ],
            DownloadingWeights,
            "Downloading model weights",
            70,
        ),
        LogRule::contains(
            &["weights already present", "weights downloaded successfully"],
            DownloadingWeights,
            "Model weights ready",
            80,
        ),
        LogRule::contains(
            &["loading liveportrait models", "loading models"],
            LoadingModels,
            "Loading models",
            85,
        ),
        LogRule::contains(
            &["models pre-loaded successfully", "models loaded successfully"],
            LoadingModels,
            "Models loaded",
            95,
        ),
        LogRule::contains(
            &["uvicorn running", "application startup complete"],
            Ready,
            "Worker ready",
            100,
        ),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
