//! Trains a small mixture density network on a toy inverse problem with a bimodal posterior,
//! then evaluates and samples the learned conditional density `p(theta | x_o)`.
//!
//! The simulator is `x = theta + 0.3 * sin(2 * pi * theta) + noise` with `theta ~ U(0, 1)`.
//! For `x_o` around 0.5 several values of `theta` explain the observation equally well.

use burn::backend::{Autodiff, NdArray};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::cast::ToElement;
use burn::tensor::{Tensor, TensorData};
use mdn_sbi::{Mdn, MdnConfig, MixtureHead, Mlp, MlpConfig};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::error::Error;
use std::f32::consts::PI;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type B = Autodiff<NdArray>;

/// Simulates `n` pairs `(theta, x)`.
fn simulate(n: usize, rng: &mut SmallRng) -> Result<(Vec<f32>, Vec<f32>), Box<dyn Error>> {
    let noise = Normal::new(0.0f32, 0.05)?;
    let theta: Vec<f32> = (0..n).map(|_| rng.gen::<f32>()).collect();
    let x = theta
        .iter()
        .map(|&t| t + 0.3 * (2.0 * PI * t).sin() + noise.sample(rng))
        .collect();
    Ok((theta, x))
}

fn column(values: &[f32], device: &<B as burn::tensor::backend::Backend>::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len(), 1]), device)
}

fn main() -> Result<(), Box<dyn Error>> {
    const N_TRAIN: usize = 2_000;
    const BATCH_SIZE: usize = 50;
    const EPOCHS: usize = 30;
    const LEARNING_RATE: f64 = 1e-3;
    const N_SAMPLES: usize = 10_000;
    const SEED: u64 = 42;

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,mdn_sbi=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    let device = Default::default();
    let mut rng = SmallRng::seed_from_u64(SEED);
    let (theta, x) = simulate(N_TRAIN, &mut rng)?;

    let extractor = MlpConfig::new(1, 20).init::<B>(&device);
    let mut mdn = Mdn::new(MdnConfig::new(1, 5, 20), extractor, &device)?;
    let mut head_optim = AdamConfig::new().init::<B, MixtureHead<B>>();
    let mut net_optim = AdamConfig::new().init::<B, Mlp<B>>();

    for epoch in 0..EPOCHS {
        let mut epoch_loss = 0.0;
        let mut n_batches = 0;
        for start in (0..N_TRAIN).step_by(BATCH_SIZE) {
            let end = (start + BATCH_SIZE).min(N_TRAIN);
            let loss = mdn
                .log_prob(column(&theta[start..end], &device), column(&x[start..end], &device))?
                .mean()
                .neg();
            epoch_loss += loss.clone().into_scalar().to_f64();
            n_batches += 1;

            let mut grads = loss.backward();
            let head_grads = GradientsParams::from_module(&mut grads, mdn.head());
            let net_grads = GradientsParams::from_module(&mut grads, mdn.extractor());
            mdn.update_head(|head| head_optim.step(LEARNING_RATE, head, head_grads));
            let net = mdn.extractor().clone();
            *mdn.extractor_mut() = net_optim.step(LEARNING_RATE, net, net_grads);
        }
        info!(epoch, loss = epoch_loss / n_batches as f64, "finished epoch");
    }

    // Evaluate the learned density on a grid of theta values for x_o = 0.5.
    let x_o = column(&[0.5], &device);
    let grid: Vec<f32> = (0..100).map(|i| -0.1 + 1.1 * i as f32 / 99.0).collect();
    let log_probs = mdn
        .log_prob_grid(column(&grid, &device), x_o.clone())?
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| format!("{e:?}"))?;
    let (best, best_lp) = grid
        .iter()
        .zip(log_probs.iter())
        .fold((0.0f32, f32::NEG_INFINITY), |acc, (&t, &lp)| if lp > acc.1 { (t, lp) } else { acc });
    println!("Posterior mode on grid: theta = {:.3} (log p = {:.3})", best, best_lp);

    let samples = mdn.sample_with_progress(N_SAMPLES, x_o, 1_000, &mut rng)?;
    let values = samples
        .clone()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| format!("{e:?}"))?;
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    println!("Drew {} posterior samples, mean = {:.3}", values.len(), mean);

    let out_dir = std::env::temp_dir().join("mdn_sbi_demo");
    mdn.save(&out_dir)?;
    println!("Saved model to {}", out_dir.display());

    #[cfg(feature = "csv")]
    {
        let csv_path = out_dir.join("samples.csv");
        mdn_sbi::io::csv::save_samples_csv_tensor(&samples, &csv_path)?;
        println!("Saved samples to {}", csv_path.display());
    }

    Ok(())
}

#[test]
fn test_main() {
    main().expect("Expected main to not return an error.");
    assert!(
        std::env::temp_dir()
            .join("mdn_sbi_demo")
            .join("config.json")
            .exists(),
        "Expected config.json to exist."
    );
}
