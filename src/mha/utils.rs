use burn::{prelude::*, tensor::activation::softmax};

use crate::dropout::{maybe_dropout, DropoutRng};

/// Additive mask value that marks a key position as padding.
pub const MASK_SENTINEL: f32 = -10000.0;

/// Applies stable softmax by subtracting the maximum value before computing softmax.
pub fn stable_softmax<B: Backend, const D: usize>(tensor: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let max_val = tensor.clone().max_dim(dim);
    let stabilized = tensor - max_val;
    softmax(stabilized, dim)
}

/// Splits `[batch, seq, heads * d_head]` into `[batch, heads, seq, d_head]`.
///
/// Head `h` owns feature indices `[h * d_head, (h + 1) * d_head)`.
pub fn split_heads<B: Backend>(x: Tensor<B, 3>, n_heads: usize) -> Tensor<B, 4> {
    let [batch_size, seq_len, d_model] = x.dims();
    x.reshape([batch_size, seq_len, n_heads, d_model / n_heads])
        .swap_dims(1, 2)
}

/// Inverse of [`split_heads`].
pub fn merge_heads<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch_size, n_heads, seq_len, d_head] = x.dims();
    x.swap_dims(1, 2).reshape([batch_size, seq_len, n_heads * d_head])
}

/// Causal bias of shape `[seq_len, seq_len]`: `0` where key <= query, `-inf` above the diagonal.
pub fn causal_bias<B: Backend>(seq_len: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut values = Vec::with_capacity(seq_len * seq_len);
    for query in 0..seq_len {
        for key in 0..seq_len {
            values.push(if key > query { f32::NEG_INFINITY } else { 0.0 });
        }
    }
    Tensor::from_data(TensorData::new(values, [seq_len, seq_len]), device)
}

/// Adds the causal bias to `[batch, heads, seq, seq]` scores.
pub fn apply_causal_mask<B: Backend>(scores: Tensor<B, 4>) -> Tensor<B, 4> {
    let dims = scores.dims();
    let bias = causal_bias::<B>(dims[2], &scores.device())
        .unsqueeze::<4>()
        .expand(dims);
    scores + bias
}

/// Adds a `[batch, 1, 1, seq]` padding mask to attention scores.
///
/// Entries equal to [`MASK_SENTINEL`] become `-inf`; every other value is added as is.
pub fn apply_attention_mask<B: Backend>(
    scores: Tensor<B, 4>,
    mask: Option<Tensor<B, 4>>,
) -> Tensor<B, 4> {
    match mask {
        Some(m) => {
            let dims = scores.dims();
            let m = m.to_device(&scores.device());
            let masked = m.clone().equal_elem(MASK_SENTINEL);
            let additive = m.mask_fill(masked, f32::NEG_INFINITY);
            scores + additive.expand(dims)
        }
        None => scores,
    }
}

/// Builds the additive `[batch, 1, 1, seq]` mask from a `[batch, seq]` keep-mask
/// (`1` = attend, `0` = padding).
pub fn extended_attention_mask<B: Backend>(keep: Tensor<B, 2, Int>) -> Tensor<B, 4> {
    let [batch_size, seq_len] = keep.dims();
    let keep = keep.float().reshape([batch_size, 1, 1, seq_len]);
    keep.neg().add_scalar(1.0).mul_scalar(MASK_SENTINEL)
}

/// Core scaled dot-product attention over `[batch, heads, seq, d_head]` inputs.
///
/// Returns the per-head context and the post-softmax weights (before dropout).
pub fn scaled_dot_product_attention<B: Backend>(
    q: Tensor<B, 4>,
    k: Tensor<B, 4>,
    v: Tensor<B, 4>,
    mask: Option<Tensor<B, 4>>,
    dropout: f64,
    rng: Option<&mut DropoutRng>,
) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let d_k = q.dims()[3] as f64;

    // Q * K^T -> [batch, heads, seq, seq]
    let k_t = k.swap_dims(2, 3);
    let scores = q.matmul(k_t) / d_k.sqrt();

    let scores = apply_causal_mask(scores);
    let scores = apply_attention_mask(scores, mask);

    let weights = stable_softmax(scores, 3);

    // Dropout only in training
    let dropped = maybe_dropout(weights.clone(), dropout, rng);

    // Weights * V -> [batch, heads, seq, d_head]
    let context = dropped.matmul(v);

    (context, weights)
}
