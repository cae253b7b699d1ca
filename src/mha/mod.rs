use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
};
pub use burn::backend::wgpu::{Wgpu as DefaultBackend, WgpuDevice as DefaultDevice};
use tracing::{debug, trace};

use crate::dropout::DropoutRng;
use crate::error::{
    ensure_positive, ensure_probability, LayerError, Result as LayerResult,
};

mod utils;
pub use utils::{
    apply_attention_mask, apply_causal_mask, causal_bias, extended_attention_mask, merge_heads,
    scaled_dot_product_attention, split_heads, stable_softmax, MASK_SENTINEL,
};

#[derive(Config, Debug)]
pub struct MhaConfig {
    pub d_model: usize,
    pub n_heads: usize,
    /// Dropout applied to the attention probabilities.
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl MhaConfig {
    /// Checks the head split and the dropout range.
    pub fn validate(&self) -> LayerResult<()> {
        ensure_positive("d_model", self.d_model)?;
        ensure_positive("n_heads", self.n_heads)?;
        if self.d_model % self.n_heads != 0 {
            return Err(LayerError::InvalidConfig(format!(
                "d_model ({}) must be divisible by n_heads ({})",
                self.d_model, self.n_heads
            )));
        }
        ensure_probability("attention dropout", self.dropout)
    }

    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> LayerResult<CausalSelfAttention<B>> {
        self.validate()?;
        let d_head = self.d_model / self.n_heads;

        let projection = || {
            LinearConfig::new(self.d_model, self.d_model).init(device)
        };

        debug!(
            d_model = self.d_model,
            n_heads = self.n_heads,
            d_head,
            dropout = self.dropout,
            "initialised causal self-attention"
        );

        Ok(CausalSelfAttention {
            query: projection(),
            key: projection(),
            value: projection(),
            dropout: self.dropout,
            n_heads: self.n_heads,
            d_head,
            d_model: self.d_model,
        })
    }
}

#[derive(Debug)]
pub struct MhaOutput<B: Backend> {
    /// Merged heads, `[batch, seq, d_model]`.
    pub context: Tensor<B, 3>,
    /// Post-softmax attention probabilities, `[batch, heads, seq, seq]`, taken before dropout.
    pub weights: Tensor<B, 4>,
}

/// Multi-head causal self-attention without an output projection.
///
/// The projection back to the residual stream belongs to the surrounding layer.
#[derive(Module, Debug)]
pub struct CausalSelfAttention<B: Backend> {
    pub query: Linear<B>,
    pub key: Linear<B>,
    pub value: Linear<B>,
    pub dropout: f64,
    pub n_heads: usize,
    pub d_head: usize,
    pub d_model: usize,
}

impl<B: Backend> CausalSelfAttention<B> {
    /// Construct a module using an explicit device.
    pub fn new(d_model: usize, n_heads: usize, device: &B::Device) -> LayerResult<Self> {
        MhaConfig::new(d_model, n_heads).init(device)
    }

    /// Inference forward pass: attention dropout is disabled.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        mask: Option<Tensor<B, 4>>,
    ) -> LayerResult<MhaOutput<B>> {
        self.forward_with(input, mask, None)
    }

    /// Training forward pass: attention probabilities go through dropout drawn from `rng`.
    pub fn forward_train(
        &self,
        input: Tensor<B, 3>,
        mask: Option<Tensor<B, 4>>,
        rng: &mut DropoutRng,
    ) -> LayerResult<MhaOutput<B>> {
        self.forward_with(input, mask, Some(rng))
    }

    pub(crate) fn forward_with(
        &self,
        input: Tensor<B, 3>,
        mask: Option<Tensor<B, 4>>,
        rng: Option<&mut DropoutRng>,
    ) -> LayerResult<MhaOutput<B>> {
        let dims = input.dims();
        self.check_input(dims)?;
        if let Some(mask) = &mask {
            check_mask(mask.dims(), dims[0], dims[1])?;
        }
        trace!(input = ?dims, masked = mask.is_some(), "attention forward");

        let k = self.project(input.clone(), &self.key);
        let v = self.project(input.clone(), &self.value);
        let q = self.project(input, &self.query);

        Ok(self.attend(q, k, v, mask, rng))
    }

    /// Linear projection followed by the head split, `[batch, heads, seq, d_head]`.
    pub fn project(&self, x: Tensor<B, 3>, linear: &Linear<B>) -> Tensor<B, 4> {
        split_heads(linear.forward(x), self.n_heads)
    }

    /// Scaled dot-product attention over already projected heads, merged back to `d_model`.
    pub fn attend(
        &self,
        query: Tensor<B, 4>,
        key: Tensor<B, 4>,
        value: Tensor<B, 4>,
        mask: Option<Tensor<B, 4>>,
        rng: Option<&mut DropoutRng>,
    ) -> MhaOutput<B> {
        let (context, weights) =
            scaled_dot_product_attention(query, key, value, mask, self.dropout, rng);

        #[cfg(debug_assertions)]
        {
            let [_, h, _, d] = context.dims();
            debug_assert_eq!(h, self.n_heads);
            debug_assert_eq!(d, self.d_head);
        }

        MhaOutput {
            context: merge_heads(context),
            weights,
        }
    }

    /// Rejects a wrong width and empty batches or sequences.
    pub(crate) fn check_input(&self, dims: [usize; 3]) -> LayerResult<()> {
        if dims[0] == 0 || dims[1] == 0 || dims[2] != self.d_model {
            return Err(LayerError::ShapeMismatch {
                what: "hidden_states",
                expected: vec![dims[0].max(1), dims[1].max(1), self.d_model],
                got: dims.to_vec(),
            });
        }
        Ok(())
    }
}

/// Padding masks must be exactly `[batch, 1, 1, seq]`.
pub(crate) fn check_mask(
    dims: [usize; 4],
    batch_size: usize,
    seq_len: usize,
) -> LayerResult<()> {
    let expected = [batch_size, 1, 1, seq_len];
    if dims != expected {
        return Err(LayerError::ShapeMismatch {
            what: "attention_mask",
            expected: expected.to_vec(),
            got: dims.to_vec(),
        });
    }
    Ok(())
}

/// Wrapper to provide a simple, PyTorch-like API with default backend handling.
pub struct MultiHeadAttention {
    model: CausalSelfAttention<DefaultBackend>,
    device: DefaultDevice,
}

impl MultiHeadAttention {
    pub fn new(d_model: usize, n_heads: usize) -> LayerResult<Self> {
        Self::with_device(d_model, n_heads, DefaultDevice::default())
    }

    pub fn with_device(
        d_model: usize,
        n_heads: usize,
        device: DefaultDevice,
    ) -> LayerResult<Self> {
        let model = CausalSelfAttention::<DefaultBackend>::new(d_model, n_heads, &device)?;
        Ok(Self { model, device })
    }

    pub fn forward(
        &self,
        input: Tensor<DefaultBackend, 3>,
        mask: Option<Tensor<DefaultBackend, 4>>,
    ) -> LayerResult<MhaOutput<DefaultBackend>> {
        self.model.forward(input, mask)
    }

    pub fn device(&self) -> &DefaultDevice {
        &self.device
    }

    pub fn inner(&self) -> &CausalSelfAttention<DefaultBackend> {
        &self.model
    }
}
