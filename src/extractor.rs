//! Feature extractors: the pluggable network that maps a conditioning batch `[B, D_context]`
//! to hidden features `[B, D_hidden]`.
//!
//! Any closure `Fn(Tensor<B, 2>) -> Tensor<B, 2>` is an extractor, which is also the way to lend
//! a network owned elsewhere: `|x| net.forward(x)`.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// A differentiable map from a batch of conditioning vectors to a batch of hidden features.
pub trait FeatureExtractor<B: Backend> {
    fn forward(&self, context: Tensor<B, 2>) -> Tensor<B, 2>;
}

impl<B, F> FeatureExtractor<B> for F
where
    B: Backend,
    F: Fn(Tensor<B, 2>) -> Tensor<B, 2>,
{
    fn forward(&self, context: Tensor<B, 2>) -> Tensor<B, 2> {
        self(context)
    }
}

/// Passes the context through unchanged, so `D_hidden == D_context`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<B: Backend> FeatureExtractor<B> for Identity {
    fn forward(&self, context: Tensor<B, 2>) -> Tensor<B, 2> {
        context
    }
}

#[derive(Config, Debug)]
pub struct MlpConfig {
    pub d_input: usize,
    pub d_hidden: usize,
    #[config(default = "3")]
    pub n_layers: usize,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Mlp<B> {
        let layers = (0..self.n_layers.max(1))
            .map(|i| {
                let d_in = if i == 0 { self.d_input } else { self.d_hidden };
                LinearConfig::new(d_in, self.d_hidden).init(device)
            })
            .collect();
        Mlp { layers }
    }
}

/// A stack of `Linear` layers, each followed by a ReLU.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.layers
            .iter()
            .fold(x, |out, layer| relu(layer.forward(out)))
    }
}

impl<B: Backend> FeatureExtractor<B> for Mlp<B> {
    fn forward(&self, context: Tensor<B, 2>) -> Tensor<B, 2> {
        Mlp::forward(self, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn test_mlp_output_shape() {
        let device = Default::default();
        let mlp = MlpConfig::new(10, 32).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::random([4, 10], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(FeatureExtractor::forward(&mlp, x).dims(), [4, 32]);
    }

    #[test]
    fn test_mlp_output_is_non_negative() {
        let device = Default::default();
        let mlp = MlpConfig::new(3, 8).with_n_layers(2).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::random([6, 3], Distribution::Normal(0.0, 1.0), &device);
        let values = mlp.forward(x).into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_closure_extractor_borrows_network() {
        let device = Default::default();
        let mlp = MlpConfig::new(2, 5).init::<TestBackend>(&device);
        let extractor = |x: Tensor<TestBackend, 2>| mlp.forward(x);
        let out = FeatureExtractor::forward(&extractor, Tensor::zeros([3, 2], &device));
        assert_eq!(out.dims(), [3, 5]);
    }

    #[test]
    fn test_identity_keeps_context() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0]], &device);
        let out = FeatureExtractor::<TestBackend>::forward(&Identity, x);
        assert_eq!(out.into_data().to_vec::<f32>().unwrap(), vec![1.0, -2.0]);
    }
}
