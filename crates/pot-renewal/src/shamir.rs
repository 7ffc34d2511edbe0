//! Secret-sharing arithmetic for proof-of-transit profiles.
//!
//! Self-contained numeric component, nothing here knows about paths,
//! timers or distribution. All arithmetic is modulo a prime `p < 2^64`,
//! products go through `u128`.
//!
//! A profile for `n` hops is built from:
//! - a secret polynomial `P1` of degree `n - 1`; `P1(0)` is the validator secret
//!   and hop `i` holds the share `P1(x_i)`
//! - a public polynomial `P2` with a zero constant term; hop `i` holds `P2(x_i)`
//! - the Lagrange basis coefficient at zero for each `x_i`
//!
//! Every hop folds `lpc_i * (share_i + public_i + rnd)` into a running sum.
//! Because the basis coefficients sum to one and `P2(0) = 0`, a packet that
//! crossed every hop ends with `secret + rnd (mod p)`.

use rand::Rng;

use crate::profile::{HopShare, Profile};

/// Witnesses that make Miller–Rabin deterministic for every `u64`.
const MR_BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

pub fn mul_mod(a: u64, b: u64, p: u64) -> u64 {
    ((a as u128 * b as u128) % p as u128) as u64
}

pub fn add_mod(a: u64, b: u64, p: u64) -> u64 {
    ((a as u128 + b as u128) % p as u128) as u64
}

pub fn sub_mod(a: u64, b: u64, p: u64) -> u64 {
    let (a, b) = (a % p, b % p);
    if a >= b {
        a - b
    } else {
        p - (b - a)
    }
}

pub fn pow_mod(mut base: u64, mut exp: u64, p: u64) -> u64 {
    let mut acc = 1 % p;
    base %= p;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, p);
        }
        base = mul_mod(base, base, p);
        exp >>= 1;
    }
    acc
}

/// Multiplicative inverse via Fermat. `p` must be prime and `a` non-zero mod `p`.
pub fn inv_mod(a: u64, p: u64) -> u64 {
    pow_mod(a, p - 2, p)
}

/// Deterministic Miller–Rabin over `u64`.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for &b in &MR_BASES {
        if n % b == 0 {
            return n == b;
        }
    }

    let mut d = n - 1;
    let mut r = 0;
    while d % 2 == 0 {
        d /= 2;
        r += 1;
    }

    'witness: for &a in &MR_BASES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..r {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Random prime with exactly `bits` bits (top bit set). `bits` in `2..=64`.
pub fn random_prime<R: Rng + ?Sized>(bits: u32, rng: &mut R) -> u64 {
    let bits = bits.clamp(2, 64);
    let low = 1u64 << (bits - 1);
    let high = if bits == 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    };
    loop {
        let candidate = rng.random_range(low..=high) | 1;
        if is_prime(candidate) {
            return candidate;
        }
    }
}

/// Evaluate a polynomial (coefficients lowest degree first) at `x`.
pub fn eval_poly(coeffs: &[u64], x: u64, p: u64) -> u64 {
    coeffs
        .iter()
        .rev()
        .fold(0, |acc, &c| add_mod(mul_mod(acc, x, p), c, p))
}

/// Lagrange basis coefficient at zero for point `xs[i]`.
pub fn lagrange_at_zero(xs: &[u64], i: usize, p: u64) -> u64 {
    let xi = xs[i];
    xs.iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .fold(1, |acc, (_, &xj)| {
            let num = xj % p;
            let den = sub_mod(xj, xi, p);
            mul_mod(acc, mul_mod(num, inv_mod(den, p), p), p)
        })
}

/// Recover `P(0)` from `(x, P(x))` points.
pub fn reconstruct(points: &[(u64, u64)], p: u64) -> u64 {
    let xs: Vec<u64> = points.iter().map(|(x, _)| *x).collect();
    points.iter().enumerate().fold(0, |acc, (i, (_, y))| {
        add_mod(acc, mul_mod(*y, lagrange_at_zero(&xs, i, p), p), p)
    })
}

/// `n` distinct non-zero evaluation points below `p`.
fn distinct_points<R: Rng + ?Sized>(n: usize, p: u64, rng: &mut R) -> Vec<u64> {
    let mut xs = Vec::with_capacity(n);
    while xs.len() < n {
        let x = rng.random_range(1..p);
        if !xs.contains(&x) {
            xs.push(x);
        }
    }
    xs
}

/// Build one verification profile for `hops` hops over a `bits`-bit prime.
pub fn generate_profile<R: Rng + ?Sized>(hops: usize, bits: u32, rng: &mut R) -> Profile {
    let prime = random_prime(bits, rng);
    let xs = distinct_points(hops, prime, rng);

    let secret_poly: Vec<u64> = (0..hops).map(|_| rng.random_range(0..prime)).collect();
    let mut public_poly: Vec<u64> = (0..hops).map(|_| rng.random_range(0..prime)).collect();
    public_poly[0] = 0;

    let shares = xs
        .iter()
        .enumerate()
        .map(|(i, &x)| HopShare {
            lpc: lagrange_at_zero(&xs, i, prime),
            share: eval_poly(&secret_poly, x, prime),
            public_coefficient: eval_poly(&public_poly, x, prime),
        })
        .collect();

    Profile {
        prime,
        bit_width: bits,
        validator_secret: secret_poly[0],
        shares,
    }
}

/// Fold one hop's contribution into a packet's cumulative value.
pub fn transit_step(cumulative: u64, hop: &HopShare, rnd: u64, prime: u64) -> u64 {
    let term = add_mod(add_mod(hop.share, hop.public_coefficient, prime), rnd, prime);
    add_mod(cumulative, mul_mod(hop.lpc, term, prime), prime)
}

/// Whether a packet's cumulative value proves it crossed every hop.
pub fn verify_transit(profile: &Profile, cumulative: u64, rnd: u64) -> bool {
    cumulative == add_mod(profile.validator_secret, rnd, profile.prime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn known_primes() {
        assert!(is_prime(2));
        assert!(is_prime(65_521));
        assert!(is_prime(18_446_744_073_709_551_557)); // largest u64 prime
        assert!(!is_prime(1));
        assert!(!is_prime(65_535));
        assert!(!is_prime(3_215_031_751)); // strong pseudoprime to 2, 3, 5, 7
    }

    #[test]
    fn random_prime_has_requested_width() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for bits in [16, 32, 48, 64] {
            let p = random_prime(bits, &mut rng);
            assert!(is_prime(p));
            assert_eq!(64 - p.leading_zeros(), bits);
        }
    }

    #[test]
    fn inverse_roundtrip() {
        let p = 65_521;
        for a in [1, 2, 12_345, 65_520] {
            assert_eq!(mul_mod(a, inv_mod(a, p), p), 1);
        }
    }

    #[test]
    fn reconstruct_recovers_constant_term() {
        let p = 65_521;
        let coeffs = [42, 7, 1000];
        let points: Vec<(u64, u64)> = [3, 9, 27]
            .iter()
            .map(|&x| (x, eval_poly(&coeffs, x, p)))
            .collect();
        assert_eq!(reconstruct(&points, p), 42);
    }

    #[test]
    fn full_transit_verifies() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let profile = generate_profile(4, 64, &mut rng);
        let rnd = 0xdead_beef;
        let cumulative = profile
            .shares
            .iter()
            .fold(0, |acc, hop| transit_step(acc, hop, rnd, profile.prime));
        assert!(verify_transit(&profile, cumulative, rnd));
    }

    #[test]
    fn skipped_hop_fails_verification() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let profile = generate_profile(3, 32, &mut rng);
        let rnd = 99;
        let cumulative = profile
            .shares
            .iter()
            .skip(1)
            .fold(0, |acc, hop| transit_step(acc, hop, rnd, profile.prime));
        assert!(!verify_transit(&profile, cumulative, rnd));
    }
}
