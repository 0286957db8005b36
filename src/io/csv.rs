/*!
# Saving MDN samples to CSV

Enable via the `csv` feature.
*/

use crate::error::{MdnError, Result};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use csv::Writer;
use ndarray::{Array3, Axis};
use std::fs::File;
use std::path::Path;

/**
Saves samples of shape **context × sample × dimension** as a CSV file.

The resulting CSV file will have:
- A header row containing `"context"`, `"sample"`, and one column per dimension
  named `"dim_0"`, `"dim_1"`, etc.
- One row per drawn sample, tagged with the index of the context it was conditioned on.

# Examples

```rust
use mdn_sbi::io::csv::save_samples_csv;
use ndarray::arr3;

// Two contexts, one sample each, in two dimensions.
let data = arr3(&[[[1.0f32, 2.0]], [[3.0, 4.0]]]);
let dir = tempfile::tempdir()?;
save_samples_csv(&data, dir.path().join("mdn_samples.csv"))?;
# Ok::<(), mdn_sbi::error::MdnError>(())
```
*/
pub fn save_samples_csv<T: std::fmt::Display>(
    data: &Array3<T>,
    filename: impl AsRef<Path>,
) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    let n_dims = data.shape()[2];

    let mut header: Vec<String> = vec!["context".to_string(), "sample".to_string()];
    header.extend((0..n_dims).map(|i| format!("dim_{}", i)));
    wtr.write_record(&header)?;

    for (context_idx, context) in data.axis_iter(Axis(0)).enumerate() {
        for (sample_idx, sample) in context.axis_iter(Axis(0)).enumerate() {
            let mut row = vec![context_idx.to_string(), sample_idx.to_string()];
            row.extend(sample.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Copies a `[B, N, F]` sample tensor, as returned by [`crate::mdn::Mdn::sample`], to the host.
pub fn samples_to_array<B: Backend>(samples: &Tensor<B, 3>) -> Result<Array3<f32>> {
    let [batch, n, features] = samples.dims();
    let values = samples
        .clone()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| MdnError::TensorData(format!("{e:?}")))?;
    Array3::from_shape_vec((batch, n, features), values).map_err(|e| MdnError::Shape(e.to_string()))
}

/// Saves a `[B, N, F]` sample tensor as CSV, see [`save_samples_csv`].
pub fn save_samples_csv_tensor<B: Backend>(
    samples: &Tensor<B, 3>,
    filename: impl AsRef<Path>,
) -> Result<()> {
    save_samples_csv(&samples_to_array(samples)?, filename)
}
