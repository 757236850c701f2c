// External imports
use anyhow::{bail, Result};
use burn::module::Module;
use burn::nn::Linear;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::Rng;
use serde::{Deserialize, Serialize};

// Internal imports
use super::step_2_lstm_cell::{seeded_linear, LSTM};
use crate::constants::{DROPOUT, HIDDEN_SIZE, NUM_FEATURES, OUTPUT_SIZE};

/// Shape and regularization of the evasion model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_size: NUM_FEATURES,
            hidden_size: HIDDEN_SIZE,
            dropout: DROPOUT,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.hidden_size == 0 {
            bail!(
                "Model sizes must be positive (input_size={}, hidden_size={})",
                self.input_size,
                self.hidden_size
            );
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("Dropout must be in [0.0, 1.0), got {}", self.dropout);
        }
        Ok(())
    }
}

/// LSTM encoder plus a linear head mapping (history, maxSpeed config) to an
/// escape velocity
#[derive(Module, Debug)]
pub struct EvasionLstm<B: Backend> {
    lstm: LSTM<B>,
    output: Linear<B>,
    dropout: f64,
}

impl<B: Backend> EvasionLstm<B> {
    /// Create a new model with every parameter drawn from `rng`
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R, device: &B::Device) -> Self {
        let lstm = LSTM::new(config.input_size, config.hidden_size, rng, device);
        // +1 for the config scalar concatenated to the hidden summary
        let head_inputs = config.hidden_size + 1;
        let bound = 1.0 / (head_inputs as f64).sqrt();
        let output = seeded_linear(head_inputs, OUTPUT_SIZE, bound, rng, device);

        Self {
            lstm,
            output,
            dropout: config.dropout,
        }
    }

    pub fn lstm(&self) -> &LSTM<B> {
        &self.lstm
    }

    /// Head projection, weight shape `[hidden_size + 1, 2]`
    pub fn output(&self) -> &Linear<B> {
        &self.output
    }

    pub fn input_size(&self) -> usize {
        self.lstm.input_size()
    }

    pub fn hidden_size(&self) -> usize {
        self.lstm.hidden_size()
    }

    pub fn dropout(&self) -> f64 {
        self.dropout
    }

    /// Every linear layer, in a fixed order
    pub fn linears(&self) -> [&Linear<B>; 3] {
        [
            self.lstm.input_weights(),
            self.lstm.hidden_weights(),
            &self.output,
        ]
    }

    /// Evaluation-mode forward pass (no dropout)
    ///
    /// # Arguments
    ///
    /// * `history` - Scaled features, `[batch, seq_len, input_size]`
    /// * `config` - Max speed per example, `[batch, 1]`
    ///
    /// # Returns
    ///
    /// Returns `(targetVx, targetVy)`, each `[batch, 1]`
    pub fn forward(&self, history: Tensor<B, 3>, config: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        self.forward_with_mask(history, config, None)
    }

    /// Training-mode forward pass: hidden activations are zeroed with
    /// probability `dropout` and the survivors rescaled by `1 / (1 - dropout)`
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        history: Tensor<B, 3>,
        config: Tensor<B, 2>,
        rng: &mut R,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let batch_size = history.dims()[0];
        let mask = self.dropout_mask(batch_size, rng, &history.device());
        self.forward_with_mask(history, config, mask)
    }

    fn dropout_mask<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Option<Tensor<B, 2>> {
        if self.dropout <= 0.0 {
            return None;
        }
        let hidden = self.hidden_size();
        let keep_scale = (1.0 / (1.0 - self.dropout)) as f32;
        let values: Vec<f32> = (0..batch_size * hidden)
            .map(|_| {
                if rng.random::<f64>() < self.dropout {
                    0.0
                } else {
                    keep_scale
                }
            })
            .collect();
        Some(Tensor::from_data(
            TensorData::new(values, [batch_size, hidden]),
            device,
        ))
    }

    fn forward_with_mask(
        &self,
        history: Tensor<B, 3>,
        config: Tensor<B, 2>,
        mask: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        // Only the final time step's hidden state is used
        let last_output = self.lstm.forward(history);
        let last_output = match mask {
            Some(mask) => last_output * mask,
            None => last_output,
        };

        let combined = Tensor::cat(vec![last_output, config], 1);
        let output = self.output.forward(combined);

        let target_vx = output.clone().narrow(1, 0, 1);
        let target_vy = output.narrow(1, 1, 1);
        (target_vx, target_vy)
    }
}
