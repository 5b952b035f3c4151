use crate::config::EntryConfig;
use crate::ports::venue::{VenueConnector, VenueError};
use crate::trade::position::LegSide;

const MIN_STD: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadSignal {
    pub z: f64,
    pub spread: f64,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntrySignal {
    pub z: f64,
    pub side_a: LegSide,
    pub side_b: LegSide,
}

/// Standardized deviation of the latest spread `a - hedge_ratio * b` over the last
/// `window` points. `None` for mismatched or short series, non-finite input, or a flat spread.
pub fn spread_z_score(
    series_a: &[f64],
    series_b: &[f64],
    hedge_ratio: f64,
    window: usize,
) -> Option<SpreadSignal> {
    let window = window.max(2);
    if series_a.len() != series_b.len() || series_a.len() < window {
        return None;
    }
    if !hedge_ratio.is_finite() {
        return None;
    }
    let start = series_a.len() - window;
    let spreads: Vec<f64> = series_a[start..]
        .iter()
        .zip(&series_b[start..])
        .map(|(a, b)| a - hedge_ratio * b)
        .collect();
    if spreads.iter().any(|s| !s.is_finite()) {
        return None;
    }
    let (mean, std) = mean_sample_std(&spreads)?;
    if std < MIN_STD {
        return None;
    }
    let spread = *spreads.last()?;
    Some(SpreadSignal {
        z: (spread - mean) / std,
        spread,
        mean,
        std,
    })
}

/// Entry trigger on `|z| >= threshold`. A negative z buys the spread (A long, B short).
pub fn entry_signal(signal: &SpreadSignal, threshold: f64) -> Option<EntrySignal> {
    if signal.z.abs() < threshold || signal.z == 0.0 {
        return None;
    }
    let side_a = if signal.z < 0.0 {
        LegSide::Long
    } else {
        LegSide::Short
    };
    Some(EntrySignal {
        z: signal.z,
        side_a,
        side_b: side_a.opposite(),
    })
}

/// Pulls closes for both markets and scores the spread at `hedge_ratio`.
pub async fn fetch_spread_signal(
    venue: &(dyn VenueConnector + Send + Sync),
    market_a: &str,
    market_b: &str,
    hedge_ratio: f64,
    cfg: &EntryConfig,
) -> Result<Option<SpreadSignal>, VenueError> {
    let series_a = venue
        .get_candles(market_a, &cfg.candle_resolution, cfg.candle_limit)
        .await?;
    let series_b = venue
        .get_candles(market_b, &cfg.candle_resolution, cfg.candle_limit)
        .await?;
    let signal = spread_z_score(&series_a, &series_b, hedge_ratio, cfg.z_window);
    if signal.is_none() {
        log::debug!(
            "[SIGNAL] no score for {}/{} (len {} / {}, window {})",
            market_a,
            market_b,
            series_a.len(),
            series_b.len(),
            cfg.z_window
        );
    }
    Ok(signal)
}

fn mean_sample_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1.0);
    Some((mean, var.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize, last: f64) -> (Vec<f64>, Vec<f64>) {
        let mut a: Vec<f64> = (0..len).map(|i| 100.0 + (i % 2) as f64).collect();
        let b = vec![50.0; len];
        if let Some(x) = a.last_mut() {
            *x = last;
        }
        (a, b)
    }

    #[test]
    fn z_score_matches_hand_computation() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [0.0, 0.0, 0.0, 0.0];
        let sig = spread_z_score(&a, &b, 1.0, 4).unwrap();
        // mean 2.5, sample std sqrt(5/3)
        let expected = 1.5 / (5.0f64 / 3.0).sqrt();
        assert!((sig.z - expected).abs() < 1e-12);
        assert_eq!(sig.spread, 4.0);
    }

    #[test]
    fn only_the_trailing_window_is_used() {
        let a = [1000.0, 1.0, 2.0, 3.0, 4.0];
        let b = [0.0; 5];
        let full = spread_z_score(&a[1..], &b[1..], 1.0, 4).unwrap();
        let windowed = spread_z_score(&a, &b, 1.0, 4).unwrap();
        assert_eq!(full, windowed);
    }

    #[test]
    fn degenerate_inputs_give_no_signal() {
        assert!(spread_z_score(&[1.0, 2.0, 3.0], &[1.0, 2.0], 1.0, 2).is_none());
        assert!(spread_z_score(&[1.0, 2.0], &[1.0, 2.0], 1.0, 3).is_none());
        assert!(spread_z_score(&[5.0; 10], &[1.0; 10], 1.0, 5).is_none());
        assert!(spread_z_score(&[1.0, f64::NAN, 3.0], &[0.0; 3], 1.0, 3).is_none());
        assert!(spread_z_score(&[], &[], 1.0, 0).is_none());
    }

    #[test]
    fn negative_z_goes_long_a() {
        let (a, b) = ramp(21, 90.0);
        let sig = spread_z_score(&a, &b, 1.0, 21).unwrap();
        assert!(sig.z < -1.5);
        let entry = entry_signal(&sig, 1.5).unwrap();
        assert_eq!(entry.side_a, LegSide::Long);
        assert_eq!(entry.side_b, LegSide::Short);
    }

    #[test]
    fn positive_z_goes_short_a_and_threshold_gates() {
        let (a, b) = ramp(21, 110.0);
        let sig = spread_z_score(&a, &b, 1.0, 21).unwrap();
        let entry = entry_signal(&sig, 1.5).unwrap();
        assert_eq!(entry.side_a, LegSide::Short);
        assert_eq!(entry.side_b, LegSide::Long);
        assert!(entry_signal(&sig, sig.z.abs() + 0.01).is_none());
        assert!(entry_signal(&sig, sig.z.abs()).is_some());
    }
}
