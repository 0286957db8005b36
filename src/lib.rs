//! Mixture Density Networks for conditional density estimation `p(theta | x)`, as used in
//! simulation-based inference, on top of the `burn` tensor/autodiff framework.
//!
//! A [`mdn::Mdn`] composes a pluggable [`extractor::FeatureExtractor`] with a
//! [`head::MixtureHead`] and evaluates the resulting diagonal Gaussian mixture with the pure
//! functions in [`mixture`].

pub mod error;
pub mod extractor;
pub mod head;
pub mod io;
pub mod mdn;
pub mod mixture;

pub use error::{MdnError, Result};
pub use extractor::{FeatureExtractor, Identity, Mlp, MlpConfig};
pub use head::{MdnConfig, MixtureHead};
pub use mdn::{context_from_data, Mdn};
pub use mixture::{
    log_sum_exp, mog_log_prob, mog_sample, normalize_logits, MixtureParameters, NoiseMode,
};
