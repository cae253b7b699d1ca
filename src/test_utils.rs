use burn::{module::Param, nn::Linear, prelude::*};
use burn_ndarray::NdArray;

pub type TestBackend = NdArray<f32>;

fn weight_at(row: usize, col: usize, seed: usize) -> f32 {
    (((row * 7 + col * 3 + seed) % 11) as f32 - 5.0) * 0.05
}

fn bias_at(col: usize, seed: usize) -> f32 {
    (((col * 5 + seed) % 7) as f32 - 3.0) * 0.02
}

/// Deterministic, non-trivial dense layer used by the reference-value tests.
pub fn patterned_linear<B: Backend>(
    d_in: usize,
    d_out: usize,
    seed: usize,
    device: &B::Device,
) -> Linear<B> {
    let weight: Vec<f32> = (0..d_in)
        .flat_map(|row| (0..d_out).map(move |col| weight_at(row, col, seed)))
        .collect();
    let bias: Vec<f32> = (0..d_out).map(|col| bias_at(col, seed)).collect();

    Linear {
        weight: Param::from_tensor(Tensor::from_data(
            TensorData::new(weight, [d_in, d_out]),
            device,
        )),
        bias: Some(Param::from_tensor(Tensor::from_data(
            TensorData::new(bias, [d_out]),
            device,
        ))),
    }
}

/// The `[1, 3, 4]` input the reference values were computed for.
pub fn reference_input<B: Backend>(device: &B::Device) -> Tensor<B, 3> {
    Tensor::from_floats(
        [[
            [0.1, -0.2, 0.3, 0.4],
            [0.5, 0.1, -0.3, 0.2],
            [-0.4, 0.6, 0.2, -0.1],
        ]],
        device,
    )
}

pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().convert::<f32>().to_vec().unwrap()
}

pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tol,
            "index {i}: got {a}, expected {e} (tol {tol})"
        );
    }
}
