// External imports
use anyhow::{bail, Context, Result};
use burn::module::{AutodiffModule, ParamId};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor, TensorData};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Internal imports
use super::step_1_sequence_preparation::{split_train_validation, SequenceConfig, SequenceSet};
use super::step_3_evasion_model_arch::{EvasionLstm, ModelConfig};
use crate::constants::{
    ADAM_EPSILON, BATCH_SIZE, DEFAULT_SEED, EPOCHS, GRAD_CLIP_NORM, LEARNING_RATE, LR_FACTOR, LR_PATIENCE,
    LR_THRESHOLD, NUM_FEATURES, VALIDATION_SPLIT_RATIO, WEIGHT_DECAY,
};
use crate::util::feature_scaler::{ScaledDataset, ScalerPair};

/// Configuration for training the model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub validation_split: f64,
    pub weight_decay: f32,
    pub grad_clip_norm: f64,
    pub lr_patience: usize,
    pub lr_factor: f64,
    pub seed: u64,
    pub sequence: SequenceConfig,
    pub model: ModelConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: LEARNING_RATE,
            batch_size: BATCH_SIZE,
            epochs: EPOCHS,
            validation_split: VALIDATION_SPLIT_RATIO,
            weight_decay: WEIGHT_DECAY as f32,
            grad_clip_norm: GRAD_CLIP_NORM,
            lr_patience: LR_PATIENCE,
            lr_factor: LR_FACTOR,
            seed: DEFAULT_SEED,
            sequence: SequenceConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Read a JSON config; fields that are absent keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("Batch size must be at least 1");
        }
        if self.epochs == 0 {
            bail!("Epoch count must be at least 1");
        }
        if !(self.learning_rate > 0.0) {
            bail!("Learning rate must be positive, got {}", self.learning_rate);
        }
        if !(self.grad_clip_norm > 0.0) {
            bail!("Gradient clip norm must be positive, got {}", self.grad_clip_norm);
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            bail!("Learning-rate factor must be in (0, 1), got {}", self.lr_factor);
        }
        if self.model.input_size != NUM_FEATURES {
            bail!(
                "Model input size {} does not match the {} window features",
                self.model.input_size,
                NUM_FEATURES
            );
        }
        self.model.validate()
    }
}

/// Scales the learning rate by `factor` once more than `patience` consecutive
/// epochs pass without a relative improvement of `threshold`. With patience 5
/// the cut lands on the sixth bad epoch
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    learning_rate: f64,
    factor: f64,
    patience: usize,
    threshold: f64,
    best: f64,
    bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(learning_rate: f64, factor: f64, patience: usize, threshold: f64) -> Self {
        Self {
            learning_rate,
            factor,
            patience,
            threshold,
            best: f64::INFINITY,
            bad_epochs: 0,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Feed one epoch's validation loss; returns the learning rate for the next epoch
    pub fn step(&mut self, val_loss: f64) -> f64 {
        if val_loss < self.best * (1.0 - self.threshold) {
            self.best = val_loss;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
            if self.bad_epochs > self.patience {
                self.learning_rate *= self.factor;
                self.bad_epochs = 0;
                info!("Validation loss plateaued, learning rate reduced to {:.2e}", self.learning_rate);
            }
        }
        self.learning_rate
    }
}

/// Per-epoch history of a training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    pub learning_rates: Vec<f64>,
    pub train_samples: usize,
    pub val_samples: usize,
}

/// A frozen model together with the scalers its inputs and outputs assume
pub struct TrainedModel<B: Backend> {
    pub model: EvasionLstm<B>,
    pub scalers: ScalerPair,
    pub report: TrainingReport,
}

/// Gather rows of a scaled dataset into `(history, config, targets)` tensors
pub fn batch_tensors<B: Backend>(
    data: &ScaledDataset,
    indices: &[usize],
    device: &B::Device,
) -> (Tensor<B, 3>, Tensor<B, 2>, Tensor<B, 2>) {
    let window_size = data.window_size();
    let n = indices.len();

    let mut windows = Vec::with_capacity(n * window_size);
    let mut targets = Vec::with_capacity(n * 2);
    let mut configs = Vec::with_capacity(n);
    for &i in indices {
        windows.extend_from_slice(&data.windows[i * window_size..(i + 1) * window_size]);
        targets.extend_from_slice(&data.targets[2 * i..2 * i + 2]);
        configs.push(data.configs[i]);
    }

    let history = Tensor::from_data(
        TensorData::new(windows, [n, data.sequence_length, NUM_FEATURES]),
        device,
    );
    let config = Tensor::from_data(TensorData::new(configs, [n, 1]), device);
    let targets = Tensor::from_data(TensorData::new(targets, [n, 2]), device);
    (history, config, targets)
}

/// Mean squared error over both velocity components jointly
pub fn mse_loss<B: Backend>(
    pred_vx: Tensor<B, 2>,
    pred_vy: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let pred = Tensor::cat(vec![pred_vx, pred_vy], 1);
    let diff = pred - targets;
    (diff.clone() * diff).mean()
}

fn squared_norm<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> f64 {
    let t = tensor.clone();
    (t.clone() * t).sum().into_scalar().elem::<f64>()
}

/// Scale factor applied to every gradient so the global norm stays within `max_norm`
pub fn clip_coefficient(total_norm: f64, max_norm: f64) -> f64 {
    let coef = max_norm / (total_norm + 1e-6);
    coef.min(1.0)
}

/// Collect the model's gradients, rescaled together so their global L2 norm
/// is at most `max_norm`
///
/// # Returns
///
/// Returns the clipped gradients and the global norm before clipping
pub fn clip_gradients<B: AutodiffBackend>(
    model: &EvasionLstm<B>,
    grads: &B::Gradients,
    max_norm: f64,
) -> (GradientsParams, f64) {
    let mut matrices: Vec<(ParamId, Tensor<B::InnerBackend, 2>)> = Vec::new();
    let mut vectors: Vec<(ParamId, Tensor<B::InnerBackend, 1>)> = Vec::new();

    for linear in model.linears() {
        if let Some(grad) = linear.weight.val().grad(grads) {
            matrices.push((linear.weight.id.clone(), grad));
        }
        if let Some(bias) = &linear.bias {
            if let Some(grad) = bias.val().grad(grads) {
                vectors.push((bias.id.clone(), grad));
            }
        }
    }

    let squared: f64 = matrices.iter().map(|(_, g)| squared_norm(g)).sum::<f64>()
        + vectors.iter().map(|(_, g)| squared_norm(g)).sum::<f64>();
    let total_norm = squared.sqrt();
    let coef = clip_coefficient(total_norm, max_norm);

    let mut clipped = GradientsParams::new();
    for (id, grad) in matrices {
        let grad = if coef < 1.0 { grad.mul_scalar(coef) } else { grad };
        clipped.register(id, grad);
    }
    for (id, grad) in vectors {
        let grad = if coef < 1.0 { grad.mul_scalar(coef) } else { grad };
        clipped.register(id, grad);
    }
    (clipped, total_norm)
}

/// Mean of per-batch MSE over a dataset, evaluation mode, no gradients
pub fn evaluate_loss<B: Backend>(
    model: &EvasionLstm<B>,
    data: &ScaledDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<f64> {
    if data.is_empty() {
        bail!("Cannot evaluate on an empty dataset");
    }
    let indices: Vec<usize> = (0..data.len()).collect();
    let mut total = 0.0;
    let mut batches = 0usize;
    for batch in indices.chunks(batch_size.max(1)) {
        let (history, config, targets) = batch_tensors::<B>(data, batch, device);
        let (vx, vy) = model.forward(history, config);
        total += mse_loss(vx, vy, targets).into_scalar().elem::<f64>();
        batches += 1;
    }
    Ok(total / batches as f64)
}

/// Adam with L2 weight decay and a 1e-8 epsilon
pub fn optimizer_config(config: &TrainingConfig) -> AdamConfig {
    AdamConfig::new()
        .with_epsilon(ADAM_EPSILON)
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay)))
}

/// Train the evasion model
///
/// # Arguments
///
/// * `set` - Every example produced by the sequence builder
/// * `config` - Hyperparameters
/// * `rng` - Drives the split, parameter init, batch shuffling and dropout
/// * `device` - Device for the autodiff backend
///
/// # Returns
///
/// Returns the final-epoch model (frozen, without autodiff), the scalers fitted
/// on its training split and the loss history
pub fn train_model<B: AutodiffBackend, R: Rng + ?Sized>(
    set: &SequenceSet,
    config: &TrainingConfig,
    rng: &mut R,
    device: &B::Device,
) -> Result<TrainedModel<B::InnerBackend>> {
    config.validate()?;
    if set.is_empty() {
        bail!("No training data could be prepared: every session was filtered out");
    }

    // Split before fitting so validation statistics never leak into the scalers
    let (train_set, val_set) = split_train_validation(set, config.validation_split, rng)?;
    info!("Training set: {} samples", train_set.len());
    info!("Validation set: {} samples", val_set.len());

    let scalers = ScalerPair::fit(&train_set)?;
    let train_data = scalers.apply(&train_set);
    let val_data = scalers.apply(&val_set);

    let mut model = EvasionLstm::<B>::new(&config.model, rng, device);
    let mut optimizer = optimizer_config(config).init::<B, EvasionLstm<B>>();
    let mut scheduler = PlateauScheduler::new(
        config.learning_rate,
        config.lr_factor,
        config.lr_patience,
        LR_THRESHOLD,
    );

    let mut report = TrainingReport {
        train_samples: train_data.len(),
        val_samples: val_data.len(),
        ..Default::default()
    };
    let mut indices: Vec<usize> = (0..train_data.len()).collect();

    info!("Starting training for {} epochs", config.epochs);
    for epoch in 1..=config.epochs {
        let current_lr = scheduler.learning_rate();
        indices.shuffle(rng);

        let mut epoch_loss = 0.0;
        let mut batches = 0usize;
        for batch in indices.chunks(config.batch_size) {
            let (history, batch_config, targets) = batch_tensors::<B>(&train_data, batch, device);

            let (pred_vx, pred_vy) = model.forward_train(history, batch_config, rng);
            let loss = mse_loss(pred_vx, pred_vy, targets);
            epoch_loss += loss.clone().into_scalar().elem::<f64>();

            let grads = loss.backward();
            let (grads, grad_norm) = clip_gradients(&model, &grads, config.grad_clip_norm);
            if grad_norm > config.grad_clip_norm {
                debug!("Epoch {}: gradient norm {:.4} clipped", epoch, grad_norm);
            }
            model = optimizer.step(current_lr, model, grads);
            batches += 1;
        }
        let avg_train_loss = epoch_loss / batches as f64;

        let avg_val_loss = evaluate_loss(&model.valid(), &val_data, config.batch_size, device)?;
        scheduler.step(avg_val_loss);

        report.train_losses.push(avg_train_loss);
        report.val_losses.push(avg_val_loss);
        report.learning_rates.push(current_lr);

        if epoch % 5 == 1 || epoch == config.epochs {
            info!(
                "Epoch [{}/{}], Train Loss: {:.4}, Val Loss: {:.4}",
                epoch, config.epochs, avg_train_loss, avg_val_loss
            );
        } else {
            debug!(
                "Epoch [{}/{}], Train Loss: {:.4}, Val Loss: {:.4}, LR: {:.2e}",
                epoch, config.epochs, avg_train_loss, avg_val_loss, current_lr
            );
        }
    }

    info!("Training completed");
    Ok(TrainedModel {
        model: model.valid(),
        scalers,
        report,
    })
}
