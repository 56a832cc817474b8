use std::f64::consts::{PI, TAU};

/// Build `n` evenly spaced angles covering $`[0, 2\pi)`$
pub fn angle_grid(n: usize) -> Vec<f64> {
    let step = TAU / n as f64;
    (0..n).map(|i| i as f64 * step).collect()
}

/// Map an angle onto $`[0, 2\pi)`$
pub fn wrap_angle(theta: f64) -> f64 {
    let r = theta.rem_euclid(TAU);
    // `rem_euclid` can round up to exactly TAU for tiny negative inputs
    if r >= TAU {
        0.0
    } else {
        // normalizes -0.0
        r + 0.0
    }
}

/// The shortest distance between two angles along the circle, in $`[0, \pi]`$
pub fn circular_distance(a: f64, b: f64) -> f64 {
    let d = wrap_angle(a - b);
    if d > PI {
        TAU - d
    } else {
        d
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_angle_grid() {
        let grid = angle_grid(8);
        assert_eq!(grid.len(), 8);
        assert_eq!(grid[0], 0.0);
        assert!((grid[4] - PI).abs() < 1e-12);
        assert!(*grid.last().unwrap() < TAU);
    }

    #[rstest::rstest]
    #[case(0.0, 0.0)]
    #[case(TAU, 0.0)]
    #[case(-PI / 2.0, 1.5 * PI)]
    #[case(5.0 * PI, PI)]
    #[case(-0.0, 0.0)]
    fn test_wrap_angle(#[case] theta: f64, #[case] expected: f64) {
        let wrapped = wrap_angle(theta);
        assert!((wrapped - expected).abs() < 1e-12, "{theta} wrapped to {wrapped}");
        assert!(wrapped.is_sign_positive());
        assert!((0.0..TAU).contains(&wrapped));
    }

    #[test]
    fn test_circular_distance() {
        assert!((circular_distance(0.1, TAU - 0.1) - 0.2).abs() < 1e-12);
        assert!((circular_distance(0.0, PI) - PI).abs() < 1e-12);
        assert!((circular_distance(1.0, 1.0 + 3.0 * TAU)).abs() < 1e-9);
    }
}
