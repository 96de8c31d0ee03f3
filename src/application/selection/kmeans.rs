//! K-means over 2-d feature vectors for cluster assignment of ranked
//! symbols. Random init picks K distinct points; iteration stops after
//! 100 rounds or when no centroid moves more than 1e-4. Clusters that go
//! empty keep their previous centroid.

use rand::Rng;
use rand::seq::index::sample;

pub const MAX_ITERATIONS: usize = 100;
pub const CONVERGENCE_TOL: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Cluster index per input point, in `[0, k)`.
    pub assignments: Vec<usize>,
    pub centroids: Vec<[f64; 2]>,
}

fn distance_sq(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

pub fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    distance_sq(a, b).sqrt()
}

/// Min-Max normalizes each dimension into `[0, 1]` in place. A flat
/// dimension maps to zero.
pub fn min_max_normalize(points: &mut [[f64; 2]]) {
    for dim in 0..2 {
        let min = points.iter().map(|p| p[dim]).fold(f64::INFINITY, f64::min);
        let max = points
            .iter()
            .map(|p| p[dim])
            .fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        for point in points.iter_mut() {
            point[dim] = if range > 0.0 {
                (point[dim] - min) / range
            } else {
                0.0
            };
        }
    }
}

/// Clusters `points` into at most `k` groups. With fewer points than `k`
/// the effective K shrinks to the point count.
pub fn kmeans<R: Rng>(points: &[[f64; 2]], k: usize, rng: &mut R) -> KMeansResult {
    if points.is_empty() || k == 0 {
        return KMeansResult {
            assignments: Vec::new(),
            centroids: Vec::new(),
        };
    }

    let k = k.min(points.len());
    let mut centroids: Vec<[f64; 2]> = sample(rng, points.len(), k)
        .into_iter()
        .map(|i| points[i])
        .collect();
    let mut assignments = vec![0usize; points.len()];

    for _ in 0..MAX_ITERATIONS {
        // Assignment step.
        for (i, point) in points.iter().enumerate() {
            let mut best = 0;
            let mut best_dist = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = distance_sq(*point, *centroid);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            assignments[i] = best;
        }

        // Update step; empty clusters keep their previous centroid.
        let mut sums = vec![[0.0f64; 2]; k];
        let mut counts = vec![0usize; k];
        for (i, point) in points.iter().enumerate() {
            let c = assignments[i];
            sums[c][0] += point[0];
            sums[c][1] += point[1];
            counts[c] += 1;
        }

        let mut max_shift = 0.0f64;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let next = [sums[c][0] / counts[c] as f64, sums[c][1] / counts[c] as f64];
            max_shift = max_shift.max(distance(centroids[c], next));
            centroids[c] = next;
        }

        if max_shift < CONVERGENCE_TOL {
            break;
        }
    }

    KMeansResult {
        assignments,
        centroids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_empty_input() {
        let mut rng = StdRng::seed_from_u64(7);
        let result = kmeans(&[], 10, &mut rng);
        assert!(result.assignments.is_empty());
        assert!(result.centroids.is_empty());
    }

    #[test]
    fn test_two_obvious_groups_separate() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut points = Vec::new();
        for i in 0..10 {
            points.push([0.01 * i as f64, 0.0]);
            points.push([1.0 - 0.01 * i as f64, 1.0]);
        }
        let result = kmeans(&points, 2, &mut rng);

        // Points in the same corner share a cluster; the corners differ.
        let low = result.assignments[0];
        let high = result.assignments[1];
        assert_ne!(low, high);
        for (i, assignment) in result.assignments.iter().enumerate() {
            let expected = if i % 2 == 0 { low } else { high };
            assert_eq!(*assignment, expected);
        }
    }

    #[test]
    fn test_k_larger_than_point_count() {
        let mut rng = StdRng::seed_from_u64(7);
        let points = [[0.0, 0.0], [1.0, 1.0]];
        let result = kmeans(&points, 10, &mut rng);
        assert_eq!(result.centroids.len(), 2);
        assert_eq!(result.assignments.len(), 2);
    }

    #[test]
    fn test_min_max_normalization_bounds() {
        let mut points = vec![[2.0, 50.0], [4.0, 100.0], [6.0, 75.0]];
        min_max_normalize(&mut points);
        assert_eq!(points[0], [0.0, 0.0]);
        assert_eq!(points[1], [1.0, 1.0]);
        assert_eq!(points[2], [0.5, 0.5]);
    }

    #[test]
    fn test_flat_dimension_normalizes_to_zero() {
        let mut points = vec![[5.0, 1.0], [5.0, 2.0]];
        min_max_normalize(&mut points);
        assert_eq!(points[0][0], 0.0);
        assert_eq!(points[1][0], 0.0);
    }
}
