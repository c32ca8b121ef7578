//! Chaos Image Pipeline - Logistic Map Block Scrambler
//!
//! The orbit of `x_{n+1} = mu * x_n * (1 - x_n)` is cut into one window per
//! block-row. Sorting a window yields a permutation of the 8x8 blocks in that
//! row. Rows and planes consume the orbit back to back, so the same key always
//! produces the same schedule.

use super::key::CryptoKey;

/// Edge of a square scramble block, in pixels
pub const BLOCK_SIZE: usize = 8;

/// Which way to apply a permutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Inverse,
}

/// Running logistic map orbit
#[derive(Debug, Clone)]
pub struct ChaoticOrbit {
    x: f64,
    mu: f64,
}

impl ChaoticOrbit {
    /// Start an orbit at the key's initial condition
    pub fn new(key: &CryptoKey) -> Self {
        Self {
            x: key.x0_value(),
            mu: key.mu_value(),
        }
    }

    fn step(&mut self) -> f64 {
        self.x = self.mu * self.x * (1.0 - self.x);
        self.x
    }

    /// Draw `len` values and return the positions in ascending chaos order
    ///
    /// `perm[k]` is the original position of the k-th smallest value. Equal
    /// values keep their position order.
    pub fn next_permutation(&mut self, len: usize) -> Vec<usize> {
        let mut window: Vec<(f64, usize)> = (0..len).map(|pos| (self.step(), pos)).collect();
        window.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        window.into_iter().map(|(_, pos)| pos).collect()
    }

    /// Advance past one plane without touching pixels
    pub fn skip_plane(&mut self, width: usize, height: usize) {
        let (blocks_per_row, block_rows) = block_grid(width, height);
        for _ in 0..blocks_per_row * block_rows {
            self.step();
        }
    }
}

/// Number of full blocks per row and full block-rows in a plane
pub fn block_grid(width: usize, height: usize) -> (usize, usize) {
    (width / BLOCK_SIZE, height / BLOCK_SIZE)
}

/// Permute the full 8x8 blocks of one row-major 8-bit plane in place
///
/// Pixels past the last full block (right and bottom margins) are left as is.
pub fn scramble_plane(
    plane: &mut [u8],
    width: usize,
    height: usize,
    orbit: &mut ChaoticOrbit,
    direction: Direction,
) {
    debug_assert_eq!(plane.len(), width * height);

    let (blocks_per_row, block_rows) = block_grid(width, height);
    let mut strip = vec![0u8; BLOCK_SIZE * width];

    for block_row in 0..block_rows {
        let perm = orbit.next_permutation(blocks_per_row);
        let top = block_row * BLOCK_SIZE * width;
        let strip_len = BLOCK_SIZE * width;
        strip.copy_from_slice(&plane[top..top + strip_len]);

        for line in 0..BLOCK_SIZE {
            let line_start = line * width;
            for (slot, &origin) in perm.iter().enumerate() {
                let (from, to) = match direction {
                    Direction::Forward => (origin, slot),
                    Direction::Inverse => (slot, origin),
                };
                let src = line_start + from * BLOCK_SIZE;
                let dst = top + line_start + to * BLOCK_SIZE;
                plane[dst..dst + BLOCK_SIZE].copy_from_slice(&strip[src..src + BLOCK_SIZE]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CryptoKey {
        CryptoKey::build("5.55555555555555555556e-1", "3.577777777777777777e0").unwrap()
    }

    fn gradient(width: usize, height: usize) -> Vec<u8> {
        (0..width * height).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_permutation_is_complete() {
        let mut orbit = ChaoticOrbit::new(&key());
        let mut perm = orbit.next_permutation(50);
        perm.sort_unstable();
        assert_eq!(perm, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_orbit_is_deterministic_per_key() {
        let a = ChaoticOrbit::new(&key()).next_permutation(32);
        let b = ChaoticOrbit::new(&key()).next_permutation(32);
        let other = CryptoKey::fixed().unwrap();
        let c = ChaoticOrbit::new(&other).next_permutation(32);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_inverse_restores_plane() {
        let (width, height) = (83, 41);
        let original = gradient(width, height);
        let mut plane = original.clone();

        scramble_plane(&mut plane, width, height, &mut ChaoticOrbit::new(&key()), Direction::Forward);
        assert_ne!(plane, original);

        scramble_plane(&mut plane, width, height, &mut ChaoticOrbit::new(&key()), Direction::Inverse);
        assert_eq!(plane, original);
    }

    #[test]
    fn test_margins_untouched() {
        let (width, height) = (20, 12);
        let original = gradient(width, height);
        let mut plane = original.clone();

        scramble_plane(&mut plane, width, height, &mut ChaoticOrbit::new(&key()), Direction::Forward);

        // columns 16..20 and rows 8..12 are outside the block grid
        for y in 0..height {
            for x in 0..width {
                if x >= 16 || y >= 8 {
                    assert_eq!(plane[y * width + x], original[y * width + x]);
                }
            }
        }
    }

    #[test]
    fn test_skip_plane_matches_scramble_consumption() {
        let (width, height) = (64, 32);
        let mut scrambled = ChaoticOrbit::new(&key());
        let mut plane = gradient(width, height);
        scramble_plane(&mut plane, width, height, &mut scrambled, Direction::Forward);

        let mut skipped = ChaoticOrbit::new(&key());
        skipped.skip_plane(width, height);

        assert_eq!(scrambled.next_permutation(8), skipped.next_permutation(8));
    }
}
