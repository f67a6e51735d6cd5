use anyhow::{Result, anyhow};
use statrs::statistics::Statistics;

/// Calculate the Pearson correlation coefficient between two return series
///
/// # Arguments
/// * `series1` - First return series
/// * `series2` - Second return series, same length as `series1`
///
/// Constant series have no defined correlation; 0.0 is returned in that case
/// instead of NaN so downstream classification stays total.
pub fn pearson_correlation(series1: &[f64], series2: &[f64]) -> Result<f64> {
    if series1.len() != series2.len() {
        return Err(anyhow!(
            "Series must have same length: {} vs {}",
            series1.len(),
            series2.len()
        ));
    }
    if series1.len() < 2 {
        return Err(anyhow!("Need at least 2 observations for correlation"));
    }

    let mean1 = series1.mean();
    let mean2 = series2.mean();

    let mut cov = 0.0;
    let mut var1 = 0.0;
    let mut var2 = 0.0;

    for i in 0..series1.len() {
        let diff1 = series1[i] - mean1;
        let diff2 = series2[i] - mean2;
        cov += diff1 * diff2;
        var1 += diff1 * diff1;
        var2 += diff2 * diff2;
    }

    if var1 > 0.0 && var2 > 0.0 {
        Ok(cov / (var1.sqrt() * var2.sqrt()))
    } else {
        Ok(0.0)
    }
}

/// Combine component return series into a single weighted series
///
/// # Arguments
/// * `components` - (weight, returns) pairs; all series must share a length
///
/// Weights are the value shares at snapshot time, held fixed across the
/// window. This is a documented approximation, not a rebalanced return.
pub fn weighted_return_series(components: &[(f64, &[f64])]) -> Result<Vec<f64>> {
    if components.is_empty() {
        return Err(anyhow!("Cannot combine zero return series"));
    }

    let len = components[0].1.len();
    if components.iter().any(|(_, series)| series.len() != len) {
        return Err(anyhow!("Component return series must have same length"));
    }

    let mut combined = vec![0.0; len];
    for (weight, series) in components {
        for (i, r) in series.iter().enumerate() {
            combined[i] += weight * r;
        }
    }

    Ok(combined)
}
