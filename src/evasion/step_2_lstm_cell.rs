// External imports
use burn::module::{Module, Param};
use burn::nn::Linear;
use burn::tensor::{activation, backend::Backend, Tensor, TensorData};
use rand::Rng;

/// Build a linear layer with weights and bias drawn from `U(-bound, bound)`
///
/// The generator is passed in so initialization never touches backend-global
/// random state.
pub fn seeded_linear<B: Backend, R: Rng + ?Sized>(
    d_input: usize,
    d_output: usize,
    bound: f64,
    rng: &mut R,
    device: &B::Device,
) -> Linear<B> {
    // Burn stores linear weights as [d_input, d_output]
    let weight = uniform_tensor::<B, 2, R>([d_input, d_output], bound, rng, device);
    let bias = uniform_tensor::<B, 1, R>([d_output], bound, rng, device);
    Linear {
        weight: Param::from_tensor(weight),
        bias: Some(Param::from_tensor(bias)),
    }
}

fn uniform_tensor<B: Backend, const D: usize, R: Rng + ?Sized>(
    shape: [usize; D],
    bound: f64,
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, D> {
    let count: usize = shape.iter().product();
    let values: Vec<f32> = (0..count)
        .map(|_| rng.random_range(-bound..=bound) as f32)
        .collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// Single-layer, unidirectional LSTM cell
///
/// Gates are packed along the output dimension of both projections in the
/// order input, forget, cell, output.
#[derive(Module, Debug)]
pub struct LSTM<B: Backend> {
    input_size: usize,
    hidden_size: usize,
    input_weights: Linear<B>,
    hidden_weights: Linear<B>,
}

impl<B: Backend> LSTM<B> {
    /// Create a new LSTM cell with parameters drawn from `U(-1/√H, 1/√H)`
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        hidden_size: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let gate_size = 4 * hidden_size; // input, forget, cell, output gates combined
        let bound = 1.0 / (hidden_size as f64).sqrt();

        let input_weights = seeded_linear(input_size, gate_size, bound, rng, device);
        let hidden_weights = seeded_linear(hidden_size, gate_size, bound, rng, device);

        Self {
            input_size,
            hidden_size,
            input_weights,
            hidden_weights,
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Input-to-hidden projection, weight shape `[input_size, 4 * hidden_size]`
    pub fn input_weights(&self) -> &Linear<B> {
        &self.input_weights
    }

    /// Hidden-to-hidden projection, weight shape `[hidden_size, 4 * hidden_size]`
    pub fn hidden_weights(&self) -> &Linear<B> {
        &self.hidden_weights
    }

    /// Run the sequence `[batch, seq_len, input_size]` from a zero state and
    /// return the hidden state after the last time step, `[batch, hidden_size]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, seq_len, input_size] = x.dims();
        let device = x.device();
        let hidden = self.hidden_size;

        // Project every time step through the input weights in one matmul
        let input_projection = self
            .input_weights
            .forward(x.reshape([batch_size * seq_len, input_size]))
            .reshape([batch_size, seq_len, 4 * hidden]);

        let mut h: Tensor<B, 2> = Tensor::zeros([batch_size, hidden], &device);
        let mut c: Tensor<B, 2> = Tensor::zeros([batch_size, hidden], &device);

        for t in 0..seq_len {
            let x_t = input_projection
                .clone()
                .narrow(1, t, 1)
                .reshape([batch_size, 4 * hidden]);
            let gates = x_t + self.hidden_weights.forward(h);

            let i = activation::sigmoid(gates.clone().narrow(1, 0, hidden));
            let f = activation::sigmoid(gates.clone().narrow(1, hidden, hidden));
            let g = activation::tanh(gates.clone().narrow(1, 2 * hidden, hidden));
            let o = activation::sigmoid(gates.narrow(1, 3 * hidden, hidden));

            c = f * c + i * g;
            h = o * activation::tanh(c.clone());
        }

        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_lstm_creation() {
        let device = NdArrayDevice::default();
        let mut rng = StdRng::seed_from_u64(0);
        let lstm: LSTM<NdArray> = LSTM::new(4, 8, &mut rng, &device);

        assert_eq!(lstm.input_weights.weight.dims(), [4, 32]);
        assert_eq!(lstm.hidden_weights.weight.dims(), [8, 32]);
        assert_eq!(lstm.input_size(), 4);
        assert_eq!(lstm.hidden_size(), 8);
    }

    #[test]
    fn test_init_within_bounds() {
        let device = NdArrayDevice::default();
        let mut rng = StdRng::seed_from_u64(1);
        let lstm: LSTM<NdArray> = LSTM::new(4, 16, &mut rng, &device);

        let values = lstm
            .hidden_weights
            .weight
            .val()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(values.iter().all(|v| v.abs() <= 0.25 + 1e-6));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let device = NdArrayDevice::default();
        let a: LSTM<NdArray> = LSTM::new(4, 8, &mut StdRng::seed_from_u64(7), &device);
        let b: LSTM<NdArray> = LSTM::new(4, 8, &mut StdRng::seed_from_u64(7), &device);

        let wa = a.input_weights.weight.val().into_data().to_vec::<f32>().unwrap();
        let wb = b.input_weights.weight.val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(wa, wb);
    }

    #[test]
    fn test_forward_shapes() {
        let device = NdArrayDevice::default();
        let mut rng = StdRng::seed_from_u64(2);
        let lstm: LSTM<NdArray> = LSTM::new(4, 8, &mut rng, &device);

        for seq_len in [1, 10, 50] {
            let x = Tensor::<NdArray, 3>::ones([3, seq_len, 4], &device);
            let h = lstm.forward(x);
            assert_eq!(h.dims(), [3, 8]);
            let values = h.into_data().to_vec::<f32>().unwrap();
            // tanh-bounded hidden state
            assert!(values.iter().all(|v| v.is_finite() && v.abs() < 1.0));
        }
    }
}
