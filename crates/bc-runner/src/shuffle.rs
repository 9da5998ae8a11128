//! Partial Fisher–Yates shuffle applied to a freshly-created campaign's
//! ordinals. Strict sequential order is a detection signature; a full
//! shuffle would destroy analytics ordering. 15-20% of positions are
//! selected uniformly and permuted among themselves.

use rand::rngs::StdRng;
use rand::Rng;

/// Shuffles `ordinals` in place, touching only a uniformly-selected 15-20%
/// subset of positions. `rng` is the campaign's seeded RNG so the result is
/// reproducible given the same seed.
pub fn partial_shuffle(ordinals: &mut [u32], rng: &mut StdRng) {
    let n = ordinals.len();
    if n < 2 {
        return;
    }

    let fraction = rng.gen_range(0.15..=0.20);
    let touch_count = ((n as f64) * fraction).round().max(2.0) as usize;
    let touch_count = touch_count.min(n);

    let mut positions: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        positions.swap(i, j);
    }
    let selected = &positions[..touch_count];

    let mut values: Vec<u32> = selected.iter().map(|&i| ordinals[i]).collect();
    for i in (1..values.len()).rev() {
        let j = rng.gen_range(0..=i);
        values.swap(i, j);
    }
    for (&pos, value) in selected.iter().zip(values.into_iter()) {
        ordinals[pos] = value;
    }
}
