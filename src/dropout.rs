//! Inverted dropout driven by an explicitly seeded generator.
//!
//! Layers never own a random source. Training calls borrow a [`DropoutRng`]
//! for the duration of one forward pass, inference calls pass none and every
//! dropout site becomes the identity.

use burn::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Seeded source of dropout masks.
#[derive(Debug, Clone)]
pub struct DropoutRng {
    rng: StdRng,
}

impl DropoutRng {
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self { rng }
    }

    /// Zeroes each element with probability `prob` and scales survivors by `1 / (1 - prob)`.
    pub fn dropout<B: Backend, const D: usize>(
        &mut self,
        input: Tensor<B, D>,
        prob: f64,
    ) -> Tensor<B, D> {
        if prob <= 0.0 {
            return input;
        }
        if prob >= 1.0 {
            return input.zeros_like();
        }

        let dims = input.dims();
        let numel: usize = dims.iter().product();
        let scale = (1.0 / (1.0 - prob)) as f32;
        let keep: Vec<f32> = (0..numel)
            .map(|_| if self.rng.gen::<f64>() < prob { 0.0 } else { scale })
            .collect();

        let mask = Tensor::<B, D>::from_data(TensorData::new(keep, dims), &input.device());
        input * mask
    }
}

/// Applies dropout when a generator is supplied (training), identity otherwise.
pub(crate) fn maybe_dropout<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    prob: f64,
    rng: Option<&mut DropoutRng>,
) -> Tensor<B, D> {
    match rng {
        Some(rng) => rng.dropout(input, prob),
        None => input,
    }
}
