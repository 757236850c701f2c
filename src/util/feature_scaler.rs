// External crates
use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::Serialize;

// Internal modules
use crate::constants::NUM_FEATURES;
use crate::evasion::step_1_sequence_preparation::SequenceSet;

/// Z-score standardization with per-column mean and population standard deviation
///
/// A scaler only exists in fitted form: `fit` is the sole constructor and every
/// other method borrows it immutably.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on rows of equal width
    pub fn fit<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        if rows.is_empty() {
            bail!("Cannot fit a scaler on zero rows");
        }
        let width = rows[0].as_ref().len();
        if width == 0 {
            bail!("Cannot fit a scaler on zero-width rows");
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            let row = row.as_ref();
            if row.len() != width {
                bail!("Row width {} does not match {}", row.len(), width);
            }
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; width];
        for row in rows {
            for ((v, x), m) in var.iter_mut().zip(row.as_ref()).zip(&mean) {
                *v += (x - m) * (x - m);
            }
        }

        // Constant columns keep unit scale so transformed values stay finite
        let scale = var
            .into_iter()
            .map(|v| {
                let std = (v / n).sqrt();
                if std < f64::EPSILON {
                    1.0
                } else {
                    std
                }
            })
            .collect();

        Ok(Self { mean, scale })
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    pub fn inverse_transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| x * s + m)
            .collect()
    }

    pub fn transform<R: AsRef<[f64]>>(&self, rows: &[R]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r.as_ref())).collect()
    }

    pub fn inverse_transform<R: AsRef<[f64]>>(&self, rows: &[R]) -> Vec<Vec<f64>> {
        rows.iter()
            .map(|r| self.inverse_transform_row(r.as_ref()))
            .collect()
    }
}

/// Scaled examples flattened into `f32` buffers ready for tensor creation
#[derive(Debug, Clone)]
pub struct ScaledDataset {
    pub sequence_length: usize,
    /// `[len, sequence_length, NUM_FEATURES]`, row-major
    pub windows: Vec<f32>,
    /// `[len, 2]`, row-major
    pub targets: Vec<f32>,
    /// `[len]`, passed through unscaled
    pub configs: Vec<f32>,
}

impl ScaledDataset {
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.sequence_length * NUM_FEATURES
    }
}

/// The feature and target scalers, fitted together on the training split
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalerPair {
    pub features: StandardScaler,
    pub targets: StandardScaler,
}

impl ScalerPair {
    /// Fit on a training set; window features are flattened across the
    /// window-length dimension so every time step shares one set of statistics
    pub fn fit(training: &SequenceSet) -> Result<Self> {
        if training.is_empty() {
            bail!("Cannot fit scalers on an empty training set");
        }
        let feature_rows: Vec<[f64; NUM_FEATURES]> =
            training.windows.iter().flatten().copied().collect();
        let features = StandardScaler::fit(&feature_rows)?;
        let targets = StandardScaler::fit(&training.targets)?;
        Ok(Self { features, targets })
    }

    /// Standardize a set with the already fitted statistics
    pub fn apply(&self, set: &SequenceSet) -> ScaledDataset {
        let seq_len = set.sequence_length;
        let window_size = seq_len * NUM_FEATURES;

        let mut windows = vec![0f32; set.len() * window_size];
        windows
            .par_chunks_mut(window_size.max(1))
            .zip(set.windows.par_iter())
            .for_each(|(chunk, window)| {
                for (j, step) in window.iter().enumerate() {
                    let scaled = self.features.transform_row(step);
                    for (k, value) in scaled.into_iter().enumerate() {
                        chunk[j * NUM_FEATURES + k] = value as f32;
                    }
                }
            });

        let targets = set
            .targets
            .iter()
            .flat_map(|t| self.targets.transform_row(t))
            .map(|v| v as f32)
            .collect();
        let configs = set.configs.iter().map(|&c| c as f32).collect();

        ScaledDataset {
            sequence_length: seq_len,
            windows,
            targets,
            configs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &[f64], b: &[f64], tol: f64) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    fn sample_set() -> SequenceSet {
        let mut set = SequenceSet::new(2);
        for i in 0..6 {
            let x = i as f64;
            set.windows.push(vec![[x, 2.0 * x, 5.0, -x], [x + 1.0, 2.0 * x + 1.0, 5.0, -x - 1.0]]);
            set.targets.push([100.0 * x, -50.0 + x]);
            set.configs.push(1.5);
            set.session_ids.push("s".to_string());
        }
        set
    }

    #[test]
    fn test_fit_statistics() -> Result<()> {
        let scaler = StandardScaler::fit(&[[1.0, 10.0], [3.0, 10.0]])?;
        assert_eq!(scaler.mean(), &[2.0, 10.0]);
        // Population std of [1, 3] is 1; constant column keeps scale 1
        assert_eq!(scaler.scale(), &[1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_zero_variance_output_is_finite() -> Result<()> {
        let rows = vec![[7.0, 7.0]; 4];
        let scaler = StandardScaler::fit(&rows)?;
        let out = scaler.transform(&rows);
        assert!(out.iter().flatten().all(|v| v.is_finite() && *v == 0.0));
        Ok(())
    }

    #[test]
    fn test_round_trip_features_and_targets() -> Result<()> {
        let set = sample_set();
        let scalers = ScalerPair::fit(&set)?;

        for window in &set.windows {
            let scaled = scalers.features.transform(window);
            let restored = scalers.features.inverse_transform(&scaled);
            for (orig, back) in window.iter().zip(&restored) {
                assert!(approx_eq(orig, back, 1e-9));
            }
        }

        let scaled = scalers.targets.transform(&set.targets);
        let restored = scalers.targets.inverse_transform(&scaled);
        for (orig, back) in set.targets.iter().zip(&restored) {
            assert!(approx_eq(orig, back, 1e-9));
        }
        Ok(())
    }

    #[test]
    fn test_transform_leaves_fitted_state_untouched() -> Result<()> {
        let train = sample_set();
        let scalers = ScalerPair::fit(&train)?;
        let before = scalers.clone();

        let mut validation = sample_set();
        for t in validation.targets.iter_mut() {
            t[0] += 1e4;
        }
        let _ = scalers.apply(&validation);
        let _ = scalers.targets.transform(&validation.targets);

        assert_eq!(scalers, before);
        // A scaler fitted on the validation data would differ
        let refit = ScalerPair::fit(&validation)?;
        assert_ne!(refit.targets.mean(), scalers.targets.mean());
        Ok(())
    }

    #[test]
    fn test_features_shared_across_window_positions() -> Result<()> {
        let set = sample_set();
        let scalers = ScalerPair::fit(&set)?;
        // dotX over all 12 rows: 0..=5 and 1..=6 -> mean 3.0
        assert!((scalers.features.mean()[0] - 3.0).abs() < 1e-12);
        assert_eq!(scalers.features.width(), NUM_FEATURES);
        assert_eq!(scalers.targets.width(), 2);
        Ok(())
    }

    #[test]
    fn test_apply_layout() -> Result<()> {
        let set = sample_set();
        let scalers = ScalerPair::fit(&set)?;
        let scaled = scalers.apply(&set);

        assert_eq!(scaled.len(), 6);
        assert_eq!(scaled.windows.len(), 6 * 2 * NUM_FEATURES);
        assert_eq!(scaled.targets.len(), 12);
        assert_eq!(scaled.configs, vec![1.5f32; 6]);

        // Second time step of the third window, first feature
        let expected = scalers.features.transform_row(&set.windows[2][1])[0] as f32;
        assert_eq!(scaled.windows[2 * 8 + NUM_FEATURES], expected);
        // Constant mouseX column standardizes to zero
        assert!(scaled.windows.iter().skip(2).step_by(NUM_FEATURES).all(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn test_fit_rejects_empty() {
        let rows: Vec<[f64; 2]> = Vec::new();
        assert!(StandardScaler::fit(&rows).is_err());
        assert!(ScalerPair::fit(&SequenceSet::new(3)).is_err());
    }
}
