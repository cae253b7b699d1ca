use thiserror::Error;

/// Errors raised while building or running an attention layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    /// The configuration violates a structural constraint (sizes, probabilities, epsilon).
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// A tensor handed to `forward` does not have the shape the layer expects.
    #[error("Shape mismatch for {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

pub type Result<T> = std::result::Result<T, LayerError>;

pub(crate) fn ensure_probability(name: &str, prob: f64) -> Result<()> {
    if (0.0..=1.0).contains(&prob) {
        Ok(())
    } else {
        Err(LayerError::InvalidConfig(format!(
            "{name} must be in [0, 1], got {prob}"
        )))
    }
}

pub(crate) fn ensure_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(LayerError::InvalidConfig(format!("{name} must be > 0")));
    }
    Ok(())
}
