//! Causal multi-head self-attention and the GPT-2 decoder layer built on top of it.
//!
//! - [`mha`]: projection into heads, causally masked scaled dot-product attention, head merge.
//! - [`layer`]: pre-norm attention, residual adds, GELU feed-forward and output norm.
//! - [`dropout`]: seeded dropout source threaded through training calls.

pub mod dropout;
pub mod error;
pub mod layer;
pub mod mha;

pub use dropout::DropoutRng;
pub use error::{LayerError, Result};
pub use layer::{DecoderLayer, GPT2Layer, LayerConfig, LayerOutput};
pub use mha::{CausalSelfAttention, MhaConfig, MhaOutput, MultiHeadAttention};

#[cfg(test)]
mod test_utils;
