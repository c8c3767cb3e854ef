//! Monte Carlo estimation of Pi
//!
//! Samples points uniformly in the unit square and counts the fraction that
//! lands inside the quarter circle. The result is always within `[0, 4]`.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};

/// Samples drawn between two checks of the cancellation flag
const CHUNK: u64 = 1 << 16;

/// Estimate Pi with `iterations` samples from the thread-local RNG
///
/// Zero iterations yields 0.0 rather than NaN.
pub fn estimate_pi(iterations: u64) -> f64 {
    estimate_pi_with(&mut rand::thread_rng(), iterations)
}

/// Estimate Pi with a caller-supplied RNG
pub fn estimate_pi_with<R: Rng + ?Sized>(rng: &mut R, iterations: u64) -> f64 {
    let never = AtomicBool::new(false);
    estimate_pi_until(rng, iterations, &never).unwrap_or(0.0)
}

/// Estimate Pi, giving up once `cancelled` is set
///
/// The flag is checked before every chunk of samples, so a cancelled run
/// stops within one chunk and returns `None`.
pub fn estimate_pi_until<R: Rng + ?Sized>(
    rng: &mut R,
    iterations: u64,
    cancelled: &AtomicBool,
) -> Option<f64> {
    if iterations == 0 {
        return Some(0.0);
    }

    let mut inside: u64 = 0;
    let mut remaining = iterations;
    while remaining > 0 {
        if cancelled.load(Ordering::Relaxed) {
            return None;
        }
        let chunk = remaining.min(CHUNK);
        for _ in 0..chunk {
            let x: f64 = rng.gen();
            let y: f64 = rng.gen();
            if x * x + y * y <= 1.0 {
                inside += 1;
            }
        }
        remaining -= chunk;
    }

    Some(4.0 * inside as f64 / iterations as f64)
}
