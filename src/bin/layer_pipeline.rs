use burn::{prelude::*, tensor::Distribution};
use gpt2_layer::{
    mha::{extended_attention_mask, DefaultBackend},
    DecoderLayer, LayerConfig,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LayerConfig::gpt2_small();
    let layer = DecoderLayer::new(&config)?;
    let device = layer.device();

    let (batch, seq) = (4, 128);
    let input = Tensor::<DefaultBackend, 3>::random(
        [batch, seq, config.hidden_size],
        Distribution::Default,
        device,
    );
    tracing::info!(dims = ?input.dims(), "input");

    // Last sequence padded for its final 32 tokens.
    let mut keep = vec![1i64; batch * seq];
    keep[(batch - 1) * seq + seq - 32..].fill(0);
    let keep =
        Tensor::<DefaultBackend, 2, Int>::from_data(TensorData::new(keep, [batch, seq]), device);

    let output = layer.forward(input, Some(extended_attention_mask(keep)))?;
    tracing::info!(dims = ?output.dims(), "output");

    Ok(())
}
