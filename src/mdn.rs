//! The mixture density network: a feature extractor followed by a [`MixtureHead`], evaluated
//! with the mixture math in [`crate::mixture`].
//!
//! The network models `p(theta | x)`. The conditioning batch `x` has shape `[B, D_context]`,
//! targets `theta` have shape `[B, F]`, and [`Mdn::sample`] returns `[B, N, F]`.

use crate::error::{MdnError, Result};
use crate::extractor::FeatureExtractor;
use crate::head::{MdnConfig, MixtureHead};
use crate::mixture::{mog_log_prob, mog_sample, MixtureParameters};
use burn::config::Config;
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use burn::tensor::cast::ToElement;
use burn::tensor::{Tensor, TensorData};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use std::path::Path;
use tracing::{debug, info, warn};

const CONFIG_FILE: &str = "config.json";
// The recorder appends its own extension.
const HEAD_FILE: &str = "head";

/// A conditional density model `p(theta | x)` given by a mixture of diagonal Gaussians.
///
/// # Type Parameters
///
/// * `B`: The `burn` backend. Use `Autodiff<_>` to train the head with a `burn` optimizer.
/// * `H`: The feature extractor, see [`FeatureExtractor`].
#[derive(Debug)]
pub struct Mdn<B: Backend, H> {
    config: MdnConfig,
    extractor: H,
    head: MixtureHead<B>,
    version: u64,
}

impl<B, H> Mdn<B, H>
where
    B: Backend,
    H: FeatureExtractor<B>,
{
    /// Creates a network with a freshly initialized head.
    pub fn new(config: MdnConfig, extractor: H, device: &B::Device) -> Result<Self> {
        config.check()?;
        let head = config.init(device);
        Ok(Self {
            config,
            extractor,
            head,
            version: 0,
        })
    }

    /// Assembles a network from an existing head, e.g. one restored from disk.
    pub fn from_parts(config: MdnConfig, extractor: H, head: MixtureHead<B>) -> Result<Self> {
        config.check()?;
        if head.features() != config.features {
            return Err(MdnError::mismatch("head feature count", config.features, head.features()));
        }
        if head.num_components() != config.num_components {
            return Err(MdnError::mismatch(
                "head component count",
                config.num_components,
                head.num_components(),
            ));
        }
        if head.hidden_features() != config.hidden_features {
            return Err(MdnError::mismatch(
                "head hidden width",
                config.hidden_features,
                head.hidden_features(),
            ));
        }
        Ok(Self {
            config,
            extractor,
            head,
            version: 0,
        })
    }

    pub fn config(&self) -> &MdnConfig {
        &self.config
    }

    pub fn features(&self) -> usize {
        self.config.features
    }

    pub fn num_components(&self) -> usize {
        self.config.num_components
    }

    pub fn hidden_features(&self) -> usize {
        self.config.hidden_features
    }

    pub fn extractor(&self) -> &H {
        &self.extractor
    }

    pub fn extractor_mut(&mut self) -> &mut H {
        &mut self.extractor
    }

    pub fn head(&self) -> &MixtureHead<B> {
        &self.head
    }

    /// Number of updates applied to the head since construction.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Replaces the head with `update(head)`, typically an optimizer step.
    ///
    /// ```ignore
    /// let grads = GradientsParams::from_grads(loss.backward(), mdn.head());
    /// mdn.update_head(|head| optim.step(lr, head, grads));
    /// ```
    pub fn update_head<F>(&mut self, update: F)
    where
        F: FnOnce(MixtureHead<B>) -> MixtureHead<B>,
    {
        self.head = update(self.head.clone());
        self.version += 1;
    }

    /// Computes the mixture parameters for every row of the conditioning batch.
    pub fn get_mixture_components(&self, context: Tensor<B, 2>) -> Result<MixtureParameters<B>> {
        let [batch, context_dim] = context.dims();
        if batch == 0 {
            return Err(MdnError::Shape("conditioning batch is empty".into()));
        }
        debug!(batch, context_dim, "computing mixture components");
        let hidden = self.extractor.forward(context);
        self.head.forward(hidden)
    }

    /// Log-density of each `theta` row under the mixture conditioned on the matching context row.
    pub fn log_prob(&self, theta: Tensor<B, 2>, context: Tensor<B, 2>) -> Result<Tensor<B, 1>> {
        let [theta_batch, theta_features] = theta.dims();
        let [batch, _] = context.dims();
        if theta_batch != batch {
            return Err(MdnError::mismatch("log_prob batch size", batch, theta_batch));
        }
        if theta_features != self.features() {
            return Err(MdnError::mismatch(
                "log_prob feature count",
                self.features(),
                theta_features,
            ));
        }
        let params = self.get_mixture_components(context)?;
        mog_log_prob(theta, &params)
    }

    /// Log-density of each of the `N` rows of `thetas` under a single context `[1, D_context]`.
    pub fn log_prob_grid(
        &self,
        thetas: Tensor<B, 2>,
        context: Tensor<B, 2>,
    ) -> Result<Tensor<B, 1>> {
        let [n, _] = thetas.dims();
        let [batch, _] = context.dims();
        if batch != 1 {
            return Err(MdnError::mismatch("log_prob_grid context rows", 1, batch));
        }
        let params = self.get_mixture_components(context)?.expand_batch(n)?;
        mog_log_prob(thetas, &params)
    }

    /// Draws `num_samples` samples for every context row, returned as `[B, num_samples, F]`.
    ///
    /// The context is tiled to `[B * num_samples, D_context]` and pushed through the network
    /// once, without tracking gradients.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        num_samples: usize,
        context: Tensor<B, 2>,
        rng: &mut R,
    ) -> Result<Tensor<B, 3>> {
        let [batch, context_dim] = context.dims();
        if num_samples == 0 {
            return Err(MdnError::Shape("num_samples must be positive".into()));
        }
        let tiled = context
            .detach()
            .unsqueeze_dim::<3>(1)
            .repeat_dim(1, num_samples)
            .reshape([batch * num_samples, context_dim]);
        let params = self.get_mixture_components(tiled)?.detach();
        let samples = mog_sample(&params, self.config.noise, rng)?;
        Ok(samples.reshape([batch, num_samples, self.features()]))
    }

    /// Like [`Mdn::sample`], but draws in chunks of at most `chunk_size` samples per context
    /// and reports progress on the terminal.
    pub fn sample_with_progress<R: Rng + ?Sized>(
        &self,
        num_samples: usize,
        context: Tensor<B, 2>,
        chunk_size: usize,
        rng: &mut R,
    ) -> Result<Tensor<B, 3>> {
        if num_samples == 0 || chunk_size == 0 {
            return Err(MdnError::Shape("num_samples and chunk_size must be positive".into()));
        }
        let pb = ProgressBar::new(num_samples as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_prefix("MDN");

        let mut chunks = Vec::with_capacity(num_samples.div_ceil(chunk_size));
        let mut drawn = 0;
        while drawn < num_samples {
            let n = chunk_size.min(num_samples - drawn);
            chunks.push(self.sample(n, context.clone(), rng)?);
            drawn += n;
            pb.inc(n as u64);
        }
        let samples = Tensor::cat(chunks, 1);

        let n_nan = samples.clone().is_nan().int().sum().into_scalar().to_usize();
        if n_nan > 0 {
            warn!(n_nan, "samples contain NaN values; check the head's log-variances");
        }
        pb.finish_with_message("Done!");
        Ok(samples)
    }

    /// Writes the configuration and the head weights into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        self.config.save(dir.join(CONFIG_FILE))?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.head
            .clone()
            .save_file(dir.join(HEAD_FILE), &recorder)
            .map_err(|e| MdnError::Recorder(format!("{e:?}")))?;
        info!(dir = %dir.display(), version = self.version, "saved mixture density network");
        Ok(())
    }

    /// Restores a network written by [`Mdn::save`]. The extractor is not part of the snapshot
    /// and has to be supplied again.
    pub fn load(dir: impl AsRef<Path>, extractor: H, device: &B::Device) -> Result<Self> {
        let dir = dir.as_ref();
        let config = MdnConfig::load(dir.join(CONFIG_FILE))
            .map_err(|e| MdnError::Config(format!("{e:?}")))?;
        config.check()?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let head = config
            .init::<B>(device)
            .load_file(dir.join(HEAD_FILE), &recorder, device)
            .map_err(|e| MdnError::Recorder(format!("{e:?}")))?;
        info!(dir = %dir.display(), "loaded mixture density network");
        Self::from_parts(config, extractor, head)
    }
}

/// Builds a conditioning batch from host data, checking at runtime that it is rank 2.
pub fn context_from_data<B: Backend>(
    data: TensorData,
    device: &B::Device,
) -> Result<Tensor<B, 2>> {
    if data.shape.len() != 2 {
        return Err(MdnError::Shape(format!(
            "context should have a batch dimension: expected rank 2, got shape {:?}",
            data.shape
        )));
    }
    Ok(Tensor::from_data(data.convert::<B::FloatElem>(), device))
}
