// External crates
use anyhow::{bail, Result};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

// Internal modules
use crate::constants::{
    MIN_SESSION_LENGTH, NUM_FEATURES, SEQUENCE_LENGTH, SPEED_TO_PIXELS, TARGET_NOISE_FACTOR,
};
use crate::util::file_utils::SessionEvent;

/// Sliding-window parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub sequence_length: usize,
    pub min_session_length: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            sequence_length: SEQUENCE_LENGTH,
            min_session_length: MIN_SESSION_LENGTH,
        }
    }
}

/// Supervised examples aligned by index: `windows[k]`, `targets[k]`,
/// `configs[k]` and `session_ids[k]` all describe example `k`
#[derive(Debug, Clone, Default)]
pub struct SequenceSet {
    pub sequence_length: usize,
    pub windows: Vec<Vec<[f64; NUM_FEATURES]>>,
    pub targets: Vec<[f64; 2]>,
    pub configs: Vec<f64>,
    pub session_ids: Vec<String>,
}

impl SequenceSet {
    pub fn new(sequence_length: usize) -> Self {
        Self {
            sequence_length,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn push(&mut self, window: Vec<[f64; NUM_FEATURES]>, target: [f64; 2], config: f64, session: &str) {
        self.windows.push(window);
        self.targets.push(target);
        self.configs.push(config);
        self.session_ids.push(session.to_string());
    }

    /// Copy out the examples at `indices`, keeping alignment
    pub fn subset(&self, indices: &[usize]) -> Self {
        let mut out = Self::new(self.sequence_length);
        for &i in indices {
            out.push(
                self.windows[i].clone(),
                self.targets[i],
                self.configs[i],
                &self.session_ids[i],
            );
        }
        out
    }
}

/// Ideal escape velocity before noise: the unit vector pointing from the
/// pointer to the agent, scaled to pixels/second by the session max speed.
///
/// When the pointer sits exactly on the agent the heading is drawn uniformly
/// from `[0, 2π)`.
pub fn ideal_escape_velocity<R: Rng + ?Sized>(
    agent: (f64, f64),
    pointer: (f64, f64),
    max_speed: f64,
    rng: &mut R,
) -> [f64; 2] {
    let speed = max_speed * SPEED_TO_PIXELS;
    let dx = agent.0 - pointer.0;
    let dy = agent.1 - pointer.1;
    let distance = (dx * dx + dy * dy).sqrt();

    if distance > 0.0 {
        [dx / distance * speed, dy / distance * speed]
    } else {
        let angle = rng.random_range(0.0..2.0 * PI);
        [angle.cos() * speed, angle.sin() * speed]
    }
}

/// Escape velocity target with independent Gaussian noise on each axis
pub fn escape_velocity_target<R: Rng + ?Sized>(
    agent: (f64, f64),
    pointer: (f64, f64),
    max_speed: f64,
    rng: &mut R,
) -> Result<[f64; 2]> {
    let [vx, vy] = ideal_escape_velocity(agent, pointer, max_speed, rng);
    let noise = Normal::new(0.0, TARGET_NOISE_FACTOR * max_speed * SPEED_TO_PIXELS)
        .map_err(|e| anyhow::anyhow!("Invalid noise scale for max speed {}: {}", max_speed, e))?;
    Ok([vx + noise.sample(rng), vy + noise.sample(rng)])
}

/// Turn session events into sliding windows and escape-velocity targets
///
/// # Arguments
///
/// * `events` - Events of any number of sessions, in any order
/// * `config` - Window length and minimum session length
/// * `rng` - Source of the tie-break headings and target noise
///
/// # Returns
///
/// Returns the aligned examples; sessions shorter than the minimum length
/// contribute nothing
pub fn build_sequences<R: Rng + ?Sized>(
    events: &[SessionEvent],
    config: &SequenceConfig,
    rng: &mut R,
) -> Result<SequenceSet> {
    let seq_len = config.sequence_length;
    if seq_len == 0 {
        bail!("Sequence length must be at least 1");
    }

    // Group by session; BTreeMap keeps the session order stable between runs
    let mut sessions: BTreeMap<&str, Vec<&SessionEvent>> = BTreeMap::new();
    for event in events {
        sessions.entry(event.session_uid.as_str()).or_default().push(event);
    }

    let mut set = SequenceSet::new(seq_len);
    let mut skipped_sessions = 0usize;

    for (session_uid, mut session) in sessions {
        if session.len() < config.min_session_length {
            skipped_sessions += 1;
            continue;
        }

        session.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let max_speed = session[0].max_speed;
        if !max_speed.is_finite() || max_speed < 0.0 {
            bail!(
                "Session '{}' has an invalid maxSpeed value: {}",
                session_uid,
                max_speed
            );
        }

        let features: Vec<[f64; NUM_FEATURES]> = session.iter().map(|e| e.features()).collect();

        for i in seq_len..features.len() {
            let window = features[i - seq_len..i].to_vec();

            let [dot_x, dot_y, mouse_x, mouse_y] = features[i];
            let target =
                escape_velocity_target((dot_x, dot_y), (mouse_x, mouse_y), max_speed, rng)?;

            set.push(window, target, max_speed, session_uid);
        }
        debug!(
            "Session {}: {} events -> {} windows",
            session_uid,
            features.len(),
            features.len().saturating_sub(seq_len)
        );
    }

    info!(
        "Created {} training sequences ({} sessions skipped as shorter than {} events)",
        set.len(),
        skipped_sessions,
        config.min_session_length
    );
    Ok(set)
}

/// Splits examples into shuffled training and validation sets
///
/// # Arguments
///
/// * `set` - Examples to split
/// * `validation_split` - Ratio of examples to use for validation (0.0 to 1.0)
/// * `rng` - Source of the shuffle
///
/// # Returns
///
/// Returns a tuple of (training_set, validation_set)
pub fn split_train_validation<R: Rng + ?Sized>(
    set: &SequenceSet,
    validation_split: f64,
    rng: &mut R,
) -> Result<(SequenceSet, SequenceSet)> {
    if set.is_empty() {
        bail!("No training data could be prepared");
    }
    if !(0.0..1.0).contains(&validation_split) || validation_split <= 0.0 {
        bail!("Validation split must be in (0.0, 1.0), got {}", validation_split);
    }
    if set.len() < 2 {
        bail!(
            "At least 2 sequences are needed for a train/validation split, got {}",
            set.len()
        );
    }

    let n_samples = set.len();
    let n_val = ((n_samples as f64 * validation_split).ceil() as usize).clamp(1, n_samples - 1);

    let mut indices: Vec<usize> = (0..n_samples).collect();
    indices.shuffle(rng);
    let (val_idx, train_idx) = indices.split_at(n_val);

    Ok((set.subset(train_idx), set.subset(val_idx)))
}
