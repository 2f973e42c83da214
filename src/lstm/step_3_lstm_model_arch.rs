// External imports
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};

// Internal imports
use crate::lstm::step_2_lstm_cell::LstmLayer;

/// Capability contract for anything that can map a batch of feature windows
/// to one prediction per window. Keeps training and forecasting code
/// independent of the concrete architecture.
pub trait SequenceRegressor<B: Backend> {
    /// Predicts `[batch, 1]` scaled targets from `[batch, steps, features]`
    /// input windows.
    fn predict(&self, windows: Tensor<B, 3>) -> Tensor<B, 2>;
}

/// Construction contract for the regressor: input shape plus architecture
/// hyperparameters.
#[derive(Debug, Clone)]
pub struct PriceLstmConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    pub num_layers: usize,
    pub bidirectional: bool,
    pub dropout: f64,
}

impl PriceLstmConfig {
    pub fn new(input_size: usize) -> Self {
        Self {
            input_size,
            hidden_size: 50,
            output_size: 1,
            num_layers: 2,
            bidirectional: false,
            dropout: 0.2,
        }
    }

    /// Builds a fresh, untrained model on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> PriceLstm<B> {
        let mut layers = Vec::with_capacity(self.num_layers.max(1));
        let mut layer_input = self.input_size;
        for _ in 0..self.num_layers.max(1) {
            let layer = LstmLayer::new(layer_input, self.hidden_size, self.bidirectional, device);
            layer_input = layer.output_size();
            layers.push(layer);
        }

        let dropout = DropoutConfig::new(self.dropout).init();
        let output = LinearConfig::new(layer_input, self.output_size).init(device);

        PriceLstm {
            input_size: self.input_size,
            hidden_size: self.hidden_size,
            output_size: self.output_size,
            bidirectional: self.bidirectional,
            layers,
            dropout,
            output,
        }
    }
}

/// Stacked LSTM regressor for scaled closing prices.
///
/// Recurrent layers feed each other's full hidden sequence (dropout in
/// between), the last time step is pooled and projected to the output width.
#[derive(Module, Debug)]
pub struct PriceLstm<B: Backend> {
    input_size: usize,
    hidden_size: usize,
    output_size: usize,
    bidirectional: bool,
    layers: Vec<LstmLayer<B>>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> PriceLstm<B> {
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn is_bidirectional(&self) -> bool {
        self.bidirectional
    }

    /// Forward pass: `[batch, steps, features]` -> `[batch, output_size]`.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let mut sequence = x;
        for (idx, layer) in self.layers.iter().enumerate() {
            sequence = layer.forward(sequence);
            if idx + 1 < self.layers.len() {
                sequence = self.dropout.forward(sequence);
            }
        }

        let [batch_size, seq_len, width] = sequence.dims();
        let pooled = sequence
            .narrow(1, seq_len - 1, 1)
            .reshape([batch_size, width]);

        let dropped = self.dropout.forward(pooled);
        // Targets are min-max scaled; keep predictions inside their range
        self.output.forward(dropped).clamp(0.0, 1.0)
    }
}

impl<B: Backend> SequenceRegressor<B> for PriceLstm<B> {
    fn predict(&self, windows: Tensor<B, 3>) -> Tensor<B, 2> {
        self.forward(windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn test_model_creation() {
        let device = NdArrayDevice::default();
        let config = PriceLstmConfig::new(15);
        let model: PriceLstm<NdArray> = config.init(&device);

        assert_eq!(model.input_size(), 15);
        assert_eq!(model.hidden_size(), 50);
        assert_eq!(model.num_layers(), 2);
        assert!(!model.is_bidirectional());
    }

    #[test]
    fn test_forward_output_shape_and_range() {
        let device = NdArrayDevice::default();
        let config = PriceLstmConfig::new(15);
        let model: PriceLstm<NdArray> = config.init(&device);

        let input = Tensor::<NdArray, 3>::ones([4, 10, 15], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [4, 1]);

        let data = output.to_data().convert::<f32>();
        for &v in data.as_slice::<f32>().unwrap() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_bidirectional_stack() {
        let device = NdArrayDevice::default();
        let config = PriceLstmConfig {
            bidirectional: true,
            num_layers: 3,
            ..PriceLstmConfig::new(15)
        };
        let model: PriceLstm<NdArray> = config.init(&device);

        let input = Tensor::<NdArray, 3>::ones([2, 6, 15], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 1]);
    }
}
