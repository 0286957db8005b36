/*!
Mixture-of-Gaussians math for diagonal-covariance mixtures.

Everything in this module is a pure function over batches: parameters come in as
[`MixtureParameters`], results go out as tensors. The only state touched is the random number
generator handed to [`mog_sample`].

Shapes use `B` for the batch size, `K` for the number of components and `F` for the
dimensionality of the target (e.g. the simulator parameters `theta`).

# Examples

```rust
use burn::backend::NdArray;
use burn::tensor::Tensor;
use mdn_sbi::mixture::{mog_log_prob, normalize_logits, MixtureParameters};

let device = Default::default();
// One batch row, a single standard normal component in one dimension.
let params = MixtureParameters::<NdArray>::new(
    normalize_logits(Tensor::from_floats([[0.0]], &device)),
    Tensor::from_floats([[[0.0]]], &device),
    Tensor::from_floats([[[1.0]]], &device),
)?;
let log_p = mog_log_prob(Tensor::from_floats([[0.0]], &device), &params)?;
let value = log_p.into_data().to_vec::<f32>().unwrap()[0];
assert!((value + 0.918_938_5).abs() < 1e-5);
# Ok::<(), mdn_sbi::error::MdnError>(())
```
*/

use crate::error::{MdnError, Result};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::trace;

/// How the standard normal noise of the conditional Gaussian draw is generated.
///
/// `SharedAcrossFeatures` draws a single scalar per batch row and uses it for every one of the
/// `F` target dimensions. Existing trained models were evaluated with this behaviour, but it
/// is not a correct draw from an `F`-dimensional diagonal Gaussian for
/// `F > 1`: all dimensions move together along the direction `sqrt(variance)`.
/// `Independent` draws `F` independent scalars per row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseMode {
    #[default]
    SharedAcrossFeatures,
    Independent,
}

/// The parameters of a batch of `K`-component diagonal Gaussian mixtures.
///
/// A value of this type belongs to exactly one conditioning batch; it is recomputed from the
/// context on every call and never cached.
#[derive(Debug, Clone)]
pub struct MixtureParameters<B: Backend> {
    /// Normalized log mixing weights, `[B, K]`. Every row log-sum-exps to zero.
    pub log_weights: Tensor<B, 2>,
    /// Component means, `[B, K, F]`.
    pub means: Tensor<B, 3>,
    /// Component variances, `[B, K, F]`, strictly positive.
    pub variances: Tensor<B, 3>,
}

impl<B: Backend> MixtureParameters<B> {
    /// Bundles the three parameter tensors after checking that their shapes agree.
    pub fn new(
        log_weights: Tensor<B, 2>,
        means: Tensor<B, 3>,
        variances: Tensor<B, 3>,
    ) -> Result<Self> {
        let [batch, k] = log_weights.dims();
        let [m_batch, m_k, m_f] = means.dims();
        let [v_batch, v_k, v_f] = variances.dims();
        if m_batch != batch {
            return Err(MdnError::mismatch("means batch size", batch, m_batch));
        }
        if m_k != k {
            return Err(MdnError::mismatch("means component count", k, m_k));
        }
        if v_batch != batch {
            return Err(MdnError::mismatch("variances batch size", batch, v_batch));
        }
        if v_k != k {
            return Err(MdnError::mismatch("variances component count", k, v_k));
        }
        if v_f != m_f {
            return Err(MdnError::mismatch("variances feature count", m_f, v_f));
        }
        Ok(Self {
            log_weights,
            means,
            variances,
        })
    }

    /// `[B, K, F]`.
    pub fn dims(&self) -> [usize; 3] {
        self.means.dims()
    }

    pub fn batch_size(&self) -> usize {
        self.dims()[0]
    }

    pub fn num_components(&self) -> usize {
        self.dims()[1]
    }

    pub fn features(&self) -> usize {
        self.dims()[2]
    }

    /// Linear mixing weights, `[B, K]`.
    pub fn weights(&self) -> Tensor<B, 2> {
        softmax(self.log_weights.clone(), 1)
    }

    /// Drops the autodiff graph from all three tensors.
    pub fn detach(self) -> Self {
        Self {
            log_weights: self.log_weights.detach(),
            means: self.means.detach(),
            variances: self.variances.detach(),
        }
    }

    /// Repeats a single-context parameter set `n` times along the batch axis.
    ///
    /// Batch sizes never broadcast implicitly; this is the explicit way to evaluate many
    /// targets under one context. A parameter set that already has `n` rows is returned as is.
    pub fn expand_batch(self, n: usize) -> Result<Self> {
        let batch = self.batch_size();
        if batch == n {
            return Ok(self);
        }
        if batch != 1 {
            return Err(MdnError::mismatch("expandable batch size", 1, batch));
        }
        Ok(Self {
            log_weights: self.log_weights.repeat_dim(0, n),
            means: self.means.repeat_dim(0, n),
            variances: self.variances.repeat_dim(0, n),
        })
    }
}

/// Maximum along `dim`, with infinite maxima replaced by zero so that subtracting it never
/// produces `inf - inf`.
fn finite_max<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let max = x.max_dim(dim).detach();
    let infinite = max.clone().abs().equal_elem(f32::INFINITY);
    max.mask_fill(infinite, 0.0)
}

/// Numerically stable `log(sum(exp(x)))` along `dim`. The reduced axis is kept with size 1.
///
/// A slice that is entirely `-inf` reduces to `-inf`, not NaN.
pub fn log_sum_exp<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let max = finite_max(x.clone(), dim);
    (x - max.clone()).exp().sum_dim(dim).log() + max
}

/// Turns raw logits `[B, K]` into normalized log mixing weights.
///
/// The row maximum is subtracted before normalizing; adding it back, as [`log_sum_exp`] does,
/// would round at the float spacing of large logits.
pub fn normalize_logits<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2> {
    let shifted = logits.clone() - finite_max(logits, 1);
    shifted.clone() - shifted.exp().sum_dim(1).log()
}

/// Log-density of `theta` (`[B, F]`) under the mixture of the same batch row.
///
/// Returns a `[B]` tensor. Row `i` of `theta` is compared against the `K` components of row `i`
/// only.
pub fn mog_log_prob<B: Backend>(
    theta: Tensor<B, 2>,
    params: &MixtureParameters<B>,
) -> Result<Tensor<B, 1>> {
    let [batch, _k, features] = params.dims();
    let [theta_batch, theta_features] = theta.dims();
    if theta_batch != batch {
        return Err(MdnError::mismatch("log_prob batch size", batch, theta_batch));
    }
    if theta_features != features {
        return Err(MdnError::mismatch("log_prob feature count", features, theta_features));
    }

    // [B, 1, F] against [B, K, F]
    let diff = theta.unsqueeze_dim::<3>(1) - params.means.clone();
    let mahalanobis: Tensor<B, 2> = (diff.clone() * diff / params.variances.clone())
        .sum_dim(2)
        .squeeze(2);
    // Sum of logs rather than log of the product; the product overflows for large F.
    let log_det: Tensor<B, 2> = params.variances.clone().log().sum_dim(2).squeeze(2);
    let log_norm = -(features as f64) / 2.0 * (2.0 * PI).ln();

    let component_log_prob = (log_det + mahalanobis).mul_scalar(-0.5).add_scalar(log_norm);
    let joint = params.log_weights.clone() + component_log_prob;
    Ok(log_sum_exp(joint, 1).squeeze(1))
}

/// Draws one sample per batch row: a component first, then the component's Gaussian.
///
/// Returns a `[B, F]` tensor. The result carries no autodiff graph.
pub fn mog_sample<B: Backend, R: Rng + ?Sized>(
    params: &MixtureParameters<B>,
    noise: NoiseMode,
    rng: &mut R,
) -> Result<Tensor<B, 2>> {
    let [batch, k, features] = params.dims();
    let device = params.means.device();

    let probs = params
        .weights()
        .detach()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| MdnError::TensorData(format!("{e:?}")))?;

    let mut choices: Vec<i64> = Vec::with_capacity(batch * features);
    for row in probs.chunks(k) {
        let component = WeightedIndex::new(row)?.sample(rng);
        choices.extend(std::iter::repeat(component as i64).take(features));
    }
    trace!(batch, k, features, "selected mixture components");

    let indices = Tensor::<B, 3, Int>::from_data(
        TensorData::new(choices, [batch, 1, features]).convert::<B::IntElem>(),
        &device,
    );
    let chosen_means: Tensor<B, 2> = params
        .means
        .clone()
        .detach()
        .gather(1, indices.clone())
        .squeeze(1);
    let chosen_variances: Tensor<B, 2> = params
        .variances
        .clone()
        .detach()
        .gather(1, indices)
        .squeeze(1);

    let noise_width = match noise {
        NoiseMode::SharedAcrossFeatures => 1,
        NoiseMode::Independent => features,
    };
    let draws: Vec<f32> = (0..batch * noise_width)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    let standard_normal = Tensor::<B, 2>::from_data(
        TensorData::new(draws, [batch, noise_width]).convert::<B::FloatElem>(),
        &device,
    );

    Ok(chosen_means + standard_normal * chosen_variances.sqrt())
}
