//! Two-sample Kolmogorov-Smirnov test used for train/test drift detection.

use serde::{Deserialize, Serialize};
use indexmap::IndexMap;

/// Result of a two-sample KS test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsResult {
    /// Largest distance between the two empirical CDFs.
    pub statistic: f64,
    pub p_value: f64,
}

/// Drift outcome for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnDrift {
    Tested { p_value: f64, drift_status: bool },
    Skipped { status: String, reason: String },
}

impl ColumnDrift {
    pub fn skipped(reason: &str) -> Self {
        Self::Skipped {
            status: "skipped".to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn drifted(&self) -> bool {
        matches!(self, Self::Tested { drift_status: true, .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Per-column drift report, serialized as a mapping of column name to outcome
/// in the order the columns appear in the base data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriftReport {
    pub columns: IndexMap<String, ColumnDrift>,
}

impl DriftReport {
    /// `true` when no tested column drifted. Skipped columns never count.
    pub fn passed(&self) -> bool {
        !self.columns.values().any(ColumnDrift::drifted)
    }

    pub fn drifted_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, d)| d.drifted())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Drop NaN and infinite values.
pub fn sanitize(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Two-sample KS test. Returns `None` when either sample is empty.
///
/// The statistic is computed over the merged sorted samples so tied values
/// advance both sides together; this keeps the result identical when the two
/// samples are swapped.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> Option<KsResult> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let (n1, n2) = (a.len(), b.len());
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < n1 && j < n2 {
        let x = if a[i] <= b[j] { a[i] } else { b[j] };
        while i < n1 && a[i] <= x {
            i += 1;
        }
        while j < n2 && b[j] <= x {
            j += 1;
        }
        let gap = (i as f64 / n1 as f64 - j as f64 / n2 as f64).abs();
        d = d.max(gap);
    }

    let en = ((n1 * n2) as f64 / (n1 + n2) as f64).sqrt();
    // Stephens' small-sample correction to the asymptotic distribution.
    let lambda = (en + 0.12 + 0.11 / en) * d;
    Some(KsResult {
        statistic: d,
        p_value: ks_p_value(lambda),
    })
}

/// Survival function of the Kolmogorov distribution:
/// `Q(λ) = 2 Σ_{k≥1} (-1)^{k-1} exp(-2 k² λ²)`.
pub fn ks_p_value(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    // The alternating series converges too slowly near zero; Q is 1 to
    // double precision below this point.
    if lambda < 0.2 {
        return 1.0;
    }
    let mut p = 0.0;
    for k in 1..=100 {
        let sign = if k % 2 == 1 { 1.0 } else { -1.0 };
        let term = sign * (-2.0 * f64::from(k).powi(2) * lambda.powi(2)).exp();
        p += term;
        if term.abs() < 1e-12 {
            break;
        }
    }
    (2.0 * p).clamp(0.0, 1.0)
}
