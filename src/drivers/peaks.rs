//! Local-maximum search with distance and prominence constraints.
//!
//! Semantics follow `scipy.signal.find_peaks`:
//! - plateaus report their (rounded down) midpoint,
//! - the distance constraint runs first and keeps the highest peaks,
//! - prominence is measured against the lowest point on each side before the
//!   signal rises above the peak again; the lowest point on the left is the
//!   peak's left base.
/// A detected peak, all positions are sample indices into the searched slice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
}
#[derive(Clone, Copy, Debug)]
pub struct PeakCriteria {
    pub min_prominence: f64,
    pub min_distance: usize,
}
pub fn find_peaks(signal: &[f64], criteria: PeakCriteria) -> Vec<Peak> {
    let candidates = local_maxima(signal);
    let spaced = select_by_distance(signal, &candidates, criteria.min_distance.max(1));
    spaced
        .into_iter()
        .map(|index| prominence(signal, index))
        .filter(|peak| peak.prominence >= criteria.min_prominence)
        .collect()
}
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}
fn select_by_distance(x: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    let mut keep = vec![true; peaks.len()];
    let mut by_height: Vec<usize> = (0..peaks.len()).collect();
    by_height.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));
    for &j in by_height.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, kept)| kept.then_some(p))
        .collect()
}
fn prominence(x: &[f64], peak: usize) -> Peak {
    let height = x[peak];
    let mut left_base = peak;
    let mut left_min = height;
    let mut i = peak;
    loop {
        if x[i] > height {
            break;
        }
        if x[i] < left_min {
            left_min = x[i];
            left_base = i;
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }
    let mut right_base = peak;
    let mut right_min = height;
    for (offset, &value) in x[peak..].iter().enumerate() {
        if value > height {
            break;
        }
        if value < right_min {
            right_min = value;
            right_base = peak + offset;
        }
    }
    Peak {
        index: peak,
        prominence: height - left_min.max(right_min),
        left_base,
        right_base,
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn loose() -> PeakCriteria {
        PeakCriteria {
            min_prominence: 0.0,
            min_distance: 1,
        }
    }
    #[test]
    fn finds_simple_maxima_and_bases() {
        let x = [0.0, 1.0, 0.0, 2.0, 0.5, 0.0];
        let peaks = find_peaks(&x, loose());
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].index, 1);
        assert_eq!(peaks[1].index, 3);
        assert_eq!(peaks[1].left_base, 2);
        assert_eq!(peaks[1].right_base, 5);
        assert!((peaks[0].prominence - 1.0).abs() < 1e-12);
        assert!((peaks[1].prominence - 2.0).abs() < 1e-12);
    }
    #[test]
    fn plateau_reports_midpoint() {
        let x = [0.0, 1.0, 1.0, 1.0, 1.0, 0.0];
        let peaks = find_peaks(&x, loose());
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 2);
    }
    #[test]
    fn edges_are_never_peaks() {
        let x = [5.0, 1.0, 0.0, 1.0, 5.0];
        assert!(find_peaks(&x, loose()).is_empty());
    }
    #[test]
    fn distance_keeps_the_higher_peak() {
        let x = [0.0, 1.0, 0.0, 3.0, 0.0, 2.0, 0.0];
        let peaks = find_peaks(
            &x,
            PeakCriteria {
                min_prominence: 0.0,
                min_distance: 3,
            },
        );
        let indices: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![3]);
    }
    #[test]
    fn prominence_threshold_drops_small_bumps() {
        let x = [0.0, 0.1, 0.05, 0.08, 0.0, 2.0, 0.0];
        let peaks = find_peaks(
            &x,
            PeakCriteria {
                min_prominence: 0.5,
                min_distance: 1,
            },
        );
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 5);
    }
}
