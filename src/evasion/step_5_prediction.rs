// External imports
use anyhow::{bail, Result};
use burn::tensor::{backend::Backend, Tensor, TensorData};

// Internal imports
use super::step_3_evasion_model_arch::EvasionLstm;
use super::step_4_train_model::TrainedModel;
use crate::constants::NUM_FEATURES;
use crate::util::feature_scaler::ScalerPair;

/// Answers escape-velocity queries in raw units: positions in pixels in,
/// velocity in pixels/second out
pub struct EvasionPredictor<B: Backend> {
    model: EvasionLstm<B>,
    scalers: ScalerPair,
    device: B::Device,
}

impl<B: Backend> EvasionPredictor<B> {
    pub fn new(model: EvasionLstm<B>, scalers: ScalerPair, device: B::Device) -> Self {
        Self {
            model,
            scalers,
            device,
        }
    }

    pub fn from_trained(trained: TrainedModel<B>, device: B::Device) -> Self {
        Self::new(trained.model, trained.scalers, device)
    }

    pub fn model(&self) -> &EvasionLstm<B> {
        &self.model
    }

    /// Predict `[vx, vy]` for one history of any length ≥ 1
    ///
    /// # Arguments
    ///
    /// * `history` - Raw `[dotX, dotY, mouseX, mouseY]` per time step, oldest first
    /// * `max_speed` - The session's max speed configuration
    pub fn predict(&self, history: &[[f64; NUM_FEATURES]], max_speed: f64) -> Result<[f64; 2]> {
        if history.is_empty() {
            bail!("Prediction needs at least one time step of history");
        }

        let scaled: Vec<f32> = history
            .iter()
            .flat_map(|step| self.scalers.features.transform_row(step))
            .map(|v| v as f32)
            .collect();
        let input = Tensor::<B, 3>::from_data(
            TensorData::new(scaled, [1, history.len(), NUM_FEATURES]),
            &self.device,
        );
        let config =
            Tensor::<B, 2>::from_data(TensorData::new(vec![max_speed as f32], [1, 1]), &self.device);

        let (vx, vy) = self.model.forward(input, config);
        let output = Tensor::cat(vec![vx, vy], 1)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to read prediction: {:?}", e))?;

        let raw = self
            .scalers
            .targets
            .inverse_transform_row(&[output[0] as f64, output[1] as f64]);
        Ok([raw[0], raw[1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evasion::step_1_sequence_preparation::SequenceSet;
    use crate::evasion::step_3_evasion_model_arch::ModelConfig;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn predictor() -> EvasionPredictor<NdArray> {
        let device = NdArrayDevice::default();
        let mut rng = StdRng::seed_from_u64(11);
        let config = ModelConfig {
            hidden_size: 8,
            ..Default::default()
        };
        let model = EvasionLstm::new(&config, &mut rng, &device);

        let mut set = SequenceSet::new(2);
        for i in 0..4 {
            let x = i as f64;
            set.windows.push(vec![[x, x, 0.0, 1.0], [x + 1.0, x, 2.0, 1.0]]);
            set.targets.push([150.0 * x, -80.0 + x]);
            set.configs.push(1.0);
            set.session_ids.push("s".into());
        }
        let scalers = ScalerPair::fit(&set).unwrap();
        EvasionPredictor::new(model, scalers, device)
    }

    #[test]
    fn test_predict_any_length() -> Result<()> {
        let predictor = predictor();
        for len in [1, 10, 50] {
            let history: Vec<[f64; NUM_FEATURES]> =
                (0..len).map(|t| [t as f64, 2.0, 3.0, 4.0]).collect();
            let [vx, vy] = predictor.predict(&history, 2.0)?;
            assert!(vx.is_finite() && vy.is_finite());
        }
        Ok(())
    }

    #[test]
    fn test_predict_matches_scaled_forward() -> Result<()> {
        let predictor = predictor();
        let history = [[1.0, 2.0, 3.0, 4.0], [2.0, 2.0, 3.0, 4.0]];
        let [vx, _] = predictor.predict(&history, 1.5)?;

        // Undo the target scaling by hand
        let device = NdArrayDevice::default();
        let scaled: Vec<f32> = history
            .iter()
            .flat_map(|s| predictor.scalers.features.transform_row(s))
            .map(|v| v as f32)
            .collect();
        let (raw_vx, _) = predictor.model.forward(
            Tensor::from_data(TensorData::new(scaled, [1, 2, NUM_FEATURES]), &device),
            Tensor::from_data(TensorData::new(vec![1.5f32], [1, 1]), &device),
        );
        let raw_vx = raw_vx.into_data().to_vec::<f32>().unwrap()[0] as f64;
        let expected = raw_vx * predictor.scalers.targets.scale()[0]
            + predictor.scalers.targets.mean()[0];
        assert!((vx - expected).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_empty_history_rejected() {
        assert!(predictor().predict(&[], 1.0).is_err());
    }
}
