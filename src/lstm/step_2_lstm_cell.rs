// External imports
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{activation, backend::Backend, Tensor};

/// Single recurrent layer processing a full sequence.
///
/// All four gates share one input projection and one hidden projection; a
/// bidirectional layer carries an independent weight pair for the reverse
/// pass and concatenates both directions per time step.
#[derive(Module, Debug)]
pub struct LstmLayer<B: Backend> {
    input_size: usize,
    hidden_size: usize,
    bidirectional: bool,

    input_weights: Linear<B>,
    hidden_weights: Linear<B>,
    reverse_input_weights: Option<Linear<B>>,
    reverse_hidden_weights: Option<Linear<B>>,
}

impl<B: Backend> LstmLayer<B> {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        bidirectional: bool,
        device: &B::Device,
    ) -> Self {
        // input, forget, cell and output gates combined into one projection
        let gate_size = 4 * hidden_size;

        let input_weights = LinearConfig::new(input_size, gate_size).init(device);
        let hidden_weights = LinearConfig::new(hidden_size, gate_size).init(device);

        let (reverse_input_weights, reverse_hidden_weights) = if bidirectional {
            (
                Some(LinearConfig::new(input_size, gate_size).init(device)),
                Some(LinearConfig::new(hidden_size, gate_size).init(device)),
            )
        } else {
            (None, None)
        };

        Self {
            input_size,
            hidden_size,
            bidirectional,
            input_weights,
            hidden_weights,
            reverse_input_weights,
            reverse_hidden_weights,
        }
    }

    /// Width of the per-step output: doubled when bidirectional.
    pub fn output_size(&self) -> usize {
        if self.bidirectional {
            2 * self.hidden_size
        } else {
            self.hidden_size
        }
    }

    /// Runs one direction over the sequence, returning the hidden state at
    /// every step in forward time order.
    fn process_direction(&self, x: &Tensor<B, 3>, reverse: bool) -> Tensor<B, 3> {
        let device = x.device();
        let [batch_size, seq_len, _] = x.dims();

        let (input_weights, hidden_weights) = if reverse {
            (
                self.reverse_input_weights
                    .as_ref()
                    .expect("reverse weights exist for bidirectional layers"),
                self.reverse_hidden_weights
                    .as_ref()
                    .expect("reverse weights exist for bidirectional layers"),
            )
        } else {
            (&self.input_weights, &self.hidden_weights)
        };

        let mut h = Tensor::zeros([batch_size, self.hidden_size], &device);
        let mut c = Tensor::zeros([batch_size, self.hidden_size], &device);
        let mut hidden_states: Vec<Tensor<B, 2>> = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            let time_idx = if reverse { seq_len - 1 - t } else { t };
            let x_t = x
                .clone()
                .narrow(1, time_idx, 1)
                .reshape([batch_size, self.input_size]);

            let gates = input_weights.forward(x_t) + hidden_weights.forward(h);
            let gates = gates.reshape([batch_size, 4, self.hidden_size]);

            let i = activation::sigmoid(
                gates.clone().narrow(1, 0, 1).reshape([batch_size, self.hidden_size]),
            );
            let f = activation::sigmoid(
                gates.clone().narrow(1, 1, 1).reshape([batch_size, self.hidden_size]),
            );
            let g = activation::tanh(
                gates.clone().narrow(1, 2, 1).reshape([batch_size, self.hidden_size]),
            );
            let o = activation::sigmoid(
                gates.narrow(1, 3, 1).reshape([batch_size, self.hidden_size]),
            );

            c = f * c + i * g;
            h = o * activation::tanh(c.clone());

            hidden_states.push(h.clone());
        }

        if reverse {
            hidden_states.reverse();
        }
        Tensor::stack::<3>(hidden_states, 1)
    }

    /// Forward pass over a `[batch, seq, input]` sequence, producing
    /// `[batch, seq, output_size]` hidden states.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let forward_output = self.process_direction(&x, false);

        if self.bidirectional {
            let reverse_output = self.process_direction(&x, true);
            Tensor::cat(vec![forward_output, reverse_output], 2)
        } else {
            forward_output
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn test_layer_output_shape() {
        let device = NdArrayDevice::default();
        let layer: LstmLayer<NdArray> = LstmLayer::new(15, 32, false, &device);

        let input = Tensor::<NdArray, 3>::ones([2, 7, 15], &device);
        let output = layer.forward(input);
        assert_eq!(output.dims(), [2, 7, 32]);
    }

    #[test]
    fn test_bidirectional_doubles_output_width() {
        let device = NdArrayDevice::default();
        let layer: LstmLayer<NdArray> = LstmLayer::new(15, 32, true, &device);
        assert_eq!(layer.output_size(), 64);

        let input = Tensor::<NdArray, 3>::ones([1, 4, 15], &device);
        let output = layer.forward(input);
        assert_eq!(output.dims(), [1, 4, 64]);
    }
}
