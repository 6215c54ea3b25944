// =============================================================================
// Volume Analysis
// =============================================================================
//
// Relative volume compares the latest bar's volume against its 20-period
// simple moving average.  Values above 2.0 flag climactic activity (panic
// bottoms, FOMO tops); values below 0.7 flag participation drying up.

/// 20-period (or `period`) simple moving average of volume.
///
/// Returns `None` with fewer than `period` bars.
pub fn volume_sma(volumes: &[u64], period: usize) -> Option<f64> {
    if period == 0 || volumes.len() < period {
        return None;
    }
    let window = &volumes[volumes.len() - period..];
    Some(window.iter().sum::<u64>() as f64 / period as f64)
}

/// Current volume divided by its moving average.
///
/// Defined as 1.0 when the average is zero so a dead tape reads as "normal"
/// rather than infinitely surging.
pub fn relative_volume(volumes: &[u64], period: usize) -> Option<f64> {
    let sma = volume_sma(volumes, period)?;
    let current = *volumes.last()? as f64;
    if sma == 0.0 {
        return Some(1.0);
    }
    let ratio = current / sma;
    if ratio.is_finite() {
        Some(ratio)
    } else {
        Some(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_insufficient_data() {
        assert!(volume_sma(&[100, 200], 20).is_none());
    }

    #[test]
    fn sma_basic() {
        let volumes: Vec<u64> = vec![100; 20];
        assert!((volume_sma(&volumes, 20).unwrap() - 100.0).abs() < 1e-10);
    }

    #[test]
    fn relative_volume_surge() {
        let mut volumes: Vec<u64> = vec![100; 19];
        volumes.push(300);
        let ratio = relative_volume(&volumes, 20).unwrap();
        // Average = (19*100 + 300)/20 = 110; 300/110 ≈ 2.73.
        assert!(ratio > 2.0, "expected surge ratio, got {ratio}");
    }

    #[test]
    fn relative_volume_zero_average_is_one() {
        let volumes: Vec<u64> = vec![0; 20];
        assert!((relative_volume(&volumes, 20).unwrap() - 1.0).abs() < 1e-10);
    }
}
