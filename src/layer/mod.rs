//! GPT-2 decoder layer: pre-norm causal self-attention followed by a GELU
//! feed-forward block, with the output normalised after the second residual.

use burn::{
    nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::gelu,
};
use tracing::{debug, trace};

use crate::dropout::{maybe_dropout, DropoutRng};
use crate::error::{
    ensure_positive, ensure_probability, LayerError, Result as LayerResult,
};
use crate::mha::{CausalSelfAttention, DefaultBackend, DefaultDevice, MhaConfig};

#[derive(Config, Debug)]
pub struct LayerConfig {
    pub hidden_size: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[config(default = 0.1)]
    pub attention_probs_dropout_prob: f64,
    #[config(default = 0.1)]
    pub hidden_dropout_prob: f64,
    #[config(default = 1e-5)]
    pub layer_norm_eps: f64,
}

impl LayerConfig {
    /// GPT-2 small: 768 hidden, 12 heads, 3072 intermediate.
    pub fn gpt2_small() -> Self {
        Self::new(768, 12, 3072)
    }

    pub fn validate(&self) -> LayerResult<()> {
        ensure_positive("intermediate_size", self.intermediate_size)?;
        ensure_probability("hidden_dropout_prob", self.hidden_dropout_prob)?;
        if !(self.layer_norm_eps > 0.0) {
            return Err(LayerError::InvalidConfig(format!(
                "layer_norm_eps must be > 0, got {}",
                self.layer_norm_eps
            )));
        }
        self.attention_config().validate()
    }

    pub fn attention_config(&self) -> MhaConfig {
        MhaConfig::new(self.hidden_size, self.num_attention_heads)
            .with_dropout(self.attention_probs_dropout_prob)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> LayerResult<GPT2Layer<B>> {
        self.validate()?;

        let self_attention = self.attention_config().init(device)?;
        let norm = || {
            LayerNormConfig::new(self.hidden_size)
                .with_epsilon(self.layer_norm_eps)
                .init(device)
        };

        debug!(
            hidden_size = self.hidden_size,
            heads = self.num_attention_heads,
            intermediate_size = self.intermediate_size,
            eps = self.layer_norm_eps,
            "initialised decoder layer"
        );

        Ok(GPT2Layer {
            self_attention,
            attention_norm: norm(),
            attention_dense: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            expand_dense: LinearConfig::new(self.hidden_size, self.intermediate_size).init(device),
            contract_dense: LinearConfig::new(self.intermediate_size, self.hidden_size)
                .init(device),
            output_norm: norm(),
            hidden_dropout: self.hidden_dropout_prob,
        })
    }
}

/// Result of a layer pass that also keeps the attention residual stream.
#[derive(Debug)]
pub struct LayerOutput<B: Backend> {
    /// Normalised layer output, `[batch, seq, hidden]`.
    pub hidden_states: Tensor<B, 3>,
    /// `hidden_states + dropout(attention_dense(attention))`, before the feed-forward block.
    pub attention_residual: Tensor<B, 3>,
}

#[derive(Module, Debug)]
pub struct GPT2Layer<B: Backend> {
    pub self_attention: CausalSelfAttention<B>,
    /// Pre-attention normalisation.
    pub attention_norm: LayerNorm<B>,
    pub attention_dense: Linear<B>,
    /// hidden -> intermediate
    pub expand_dense: Linear<B>,
    /// intermediate -> hidden
    pub contract_dense: Linear<B>,
    /// Applied after the feed-forward residual.
    pub output_norm: LayerNorm<B>,
    pub hidden_dropout: f64,
}

impl<B: Backend> GPT2Layer<B> {
    /// Inference forward pass, every dropout disabled.
    pub fn forward(
        &self,
        hidden_states: Tensor<B, 3>,
        attention_mask: Option<Tensor<B, 4>>,
    ) -> LayerResult<Tensor<B, 3>> {
        Ok(self
            .forward_with(hidden_states, attention_mask, None)?
            .hidden_states)
    }

    /// Training forward pass; attention and hidden dropout masks come from `rng`.
    pub fn forward_train(
        &self,
        hidden_states: Tensor<B, 3>,
        attention_mask: Option<Tensor<B, 4>>,
        rng: &mut DropoutRng,
    ) -> LayerResult<Tensor<B, 3>> {
        Ok(self
            .forward_with(hidden_states, attention_mask, Some(rng))?
            .hidden_states)
    }

    /// Inference pass that also returns the attention residual.
    pub fn forward_with_residual(
        &self,
        hidden_states: Tensor<B, 3>,
        attention_mask: Option<Tensor<B, 4>>,
    ) -> LayerResult<LayerOutput<B>> {
        self.forward_with(hidden_states, attention_mask, None)
    }

    fn forward_with(
        &self,
        hidden_states: Tensor<B, 3>,
        attention_mask: Option<Tensor<B, 4>>,
        mut rng: Option<&mut DropoutRng>,
    ) -> LayerResult<LayerOutput<B>> {
        let dims = hidden_states.dims();
        // Checked before the norm, which would otherwise panic on the width.
        self.self_attention.check_input(dims)?;
        trace!(input = ?dims, "decoder layer forward");

        let normed = self.attention_norm.forward(hidden_states.clone());
        let attention = self
            .self_attention
            .forward_with(normed, attention_mask, rng.as_deref_mut())?;

        // Residual bypasses the pre-attention norm.
        let attention_residual = self.add_residual(
            hidden_states,
            attention.context,
            &self.attention_dense,
            rng.as_deref_mut(),
        );

        let ff_hidden = gelu(self.expand_dense.forward(attention_residual.clone()));
        let ff_residual = self.add_residual(
            attention_residual.clone(),
            ff_hidden,
            &self.contract_dense,
            rng,
        );

        Ok(LayerOutput {
            hidden_states: self.output_norm.forward(ff_residual),
            attention_residual,
        })
    }

    /// `input + dropout(dense(output))`. No normalisation happens here.
    pub fn add_residual<const D: usize>(
        &self,
        input: Tensor<B, D>,
        output: Tensor<B, D>,
        dense: &Linear<B>,
        rng: Option<&mut DropoutRng>,
    ) -> Tensor<B, D> {
        let output = dense.forward(output);
        let output = maybe_dropout(output, self.hidden_dropout, rng);
        output + input
    }
}

/// [`GPT2Layer`] on the default backend, bundled with its device.
pub struct DecoderLayer {
    model: GPT2Layer<DefaultBackend>,
    device: DefaultDevice,
}

impl DecoderLayer {
    pub fn new(config: &LayerConfig) -> LayerResult<Self> {
        Self::with_device(config, DefaultDevice::default())
    }

    pub fn with_device(config: &LayerConfig, device: DefaultDevice) -> LayerResult<Self> {
        let model = config.init::<DefaultBackend>(&device)?;
        Ok(Self { model, device })
    }

    pub fn forward(
        &self,
        hidden_states: Tensor<DefaultBackend, 3>,
        attention_mask: Option<Tensor<DefaultBackend, 4>>,
    ) -> LayerResult<Tensor<DefaultBackend, 3>> {
        self.model.forward(hidden_states, attention_mask)
    }

    pub fn device(&self) -> &DefaultDevice {
        &self.device
    }

    pub fn inner(&self) -> &GPT2Layer<DefaultBackend> {
        &self.model
    }
}
