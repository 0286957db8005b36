//! The mixture parameter head: three affine projections from hidden features to the
//! parameters of a `K`-component, `F`-dimensional diagonal Gaussian mixture.

use crate::error::MdnError;
use crate::mixture::{normalize_logits, MixtureParameters, NoiseMode};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Hyper-parameters of a mixture density network.
#[derive(Config, Debug)]
pub struct MdnConfig {
    /// Dimensionality `F` of the target variable.
    pub features: usize,
    /// Number `K` of mixture components.
    pub num_components: usize,
    /// Width `D_hidden` of the feature extractor's output.
    pub hidden_features: usize,
    /// How the Gaussian noise is drawn when sampling.
    #[config(default = "NoiseMode::SharedAcrossFeatures")]
    pub noise: NoiseMode,
    /// Initializer for all three projections.
    #[config(default = "Initializer::KaimingUniform{gain:1.0/num_traits::Float::sqrt(3.0), \
                         fan_out_only:false}")]
    pub initializer: Initializer,
}

impl MdnConfig {
    /// Rejects configurations with an empty axis.
    pub fn check(&self) -> crate::error::Result<()> {
        if self.features == 0 {
            return Err(MdnError::Config("features must be positive".into()));
        }
        if self.num_components == 0 {
            return Err(MdnError::Config("num_components must be positive".into()));
        }
        if self.hidden_features == 0 {
            return Err(MdnError::Config("hidden_features must be positive".into()));
        }
        Ok(())
    }

    /// Initializes a fresh head with this configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> MixtureHead<B> {
        let projection = |d_output: usize| {
            LinearConfig::new(self.hidden_features, d_output)
                .with_initializer(self.initializer.clone())
                .init(device)
        };
        MixtureHead {
            logits: projection(self.num_components),
            means: projection(self.num_components * self.features),
            log_variances: projection(self.num_components * self.features),
            features: self.features,
            num_components: self.num_components,
            hidden_features: self.hidden_features,
        }
    }
}

/// The learned parameter block of a mixture density network.
#[derive(Module, Debug)]
pub struct MixtureHead<B: Backend> {
    logits: Linear<B>,
    means: Linear<B>,
    log_variances: Linear<B>,
    features: usize,
    num_components: usize,
    hidden_features: usize,
}

impl<B: Backend> MixtureHead<B> {
    pub fn features(&self) -> usize {
        self.features
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn hidden_features(&self) -> usize {
        self.hidden_features
    }

    /// Maps hidden features `[B, D_hidden]` to mixture parameters.
    ///
    /// Log-variances are unconstrained; the returned variances are their exponential, so they
    /// are positive but may be arbitrarily large for an untrained head.
    pub fn forward(&self, hidden: Tensor<B, 2>) -> crate::error::Result<MixtureParameters<B>> {
        let [batch, width] = hidden.dims();
        if width != self.hidden_features {
            return Err(MdnError::Shape(format!(
                "expected hidden features of width {}, got {}",
                self.hidden_features, width
            )));
        }
        let (k, f) = (self.num_components, self.features);

        let log_weights = normalize_logits(self.logits.forward(hidden.clone()));
        let means = self.means.forward(hidden.clone()).reshape([batch, k, f]);
        let variances = self
            .log_variances
            .forward(hidden)
            .reshape([batch, k, f])
            .exp();

        Ok(MixtureParameters {
            log_weights,
            means,
            variances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let head = MdnConfig::new(2, 4, 16).init::<TestBackend>(&device);
        let hidden =
            Tensor::<TestBackend, 2>::random([5, 16], Distribution::Normal(0.0, 1.0), &device);
        let params = head.forward(hidden).unwrap();
        assert_eq!(params.log_weights.dims(), [5, 4]);
        assert_eq!(params.dims(), [5, 4, 2]);
        assert_eq!(params.variances.dims(), [5, 4, 2]);
    }

    #[test]
    fn test_weights_normalized_and_variances_positive() {
        let device = Default::default();
        let head = MdnConfig::new(3, 5, 8).init::<TestBackend>(&device);
        let hidden =
            Tensor::<TestBackend, 2>::random([10, 8], Distribution::Normal(0.0, 3.0), &device);
        let params = head.forward(hidden).unwrap();

        let sums = params
            .log_weights
            .clone()
            .exp()
            .sum_dim(1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        for s in sums {
            assert_abs_diff_eq!(s, 1.0, epsilon = 1e-5);
        }
        let variances = params.variances.into_data().to_vec::<f32>().unwrap();
        assert!(variances.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_zero_initializer_gives_standard_components() {
        let device = Default::default();
        let head = MdnConfig::new(1, 3, 4)
            .with_initializer(Initializer::Zeros)
            .init::<TestBackend>(&device);
        let params = head.forward(Tensor::ones([2, 4], &device)).unwrap();
        let log_weights = params.log_weights.into_data().to_vec::<f32>().unwrap();
        for lw in log_weights {
            assert_abs_diff_eq!(lw, -(3.0f32).ln(), epsilon = 1e-6);
        }
        let variances = params.variances.into_data().to_vec::<f32>().unwrap();
        assert!(variances.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_hidden_width_mismatch() {
        let device = Default::default();
        let head = MdnConfig::new(1, 2, 8).init::<TestBackend>(&device);
        let result = head.forward(Tensor::zeros([3, 7], &device));
        assert!(matches!(result, Err(MdnError::Shape(_))));
    }

    #[test]
    fn test_check_rejects_empty_axes() {
        assert!(MdnConfig::new(2, 3, 4).check().is_ok());
        assert!(MdnConfig::new(0, 3, 4).check().is_err());
        assert!(MdnConfig::new(2, 0, 4).check().is_err());
        assert!(MdnConfig::new(2, 3, 0).check().is_err());
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = MdnConfig::new(2, 4, 16).with_noise(NoiseMode::Independent);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        config.save(&path).unwrap();
        let loaded = MdnConfig::load(&path).unwrap();
        assert_eq!(loaded.features, 2);
        assert_eq!(loaded.num_components, 4);
        assert_eq!(loaded.hidden_features, 16);
        assert_eq!(loaded.noise, NoiseMode::Independent);
    }
}
