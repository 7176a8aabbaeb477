//! Integer helpers for loop extents and tilings.

/// Product of `factors`, or `None` if it does not fit in an `i64`.
pub fn checked_product(factors: &[i64]) -> Option<i64> {
    factors.iter().try_fold(1i64, |acc, f| acc.checked_mul(*f))
}

/// Prime factorization of `n` in increasing order, with multiplicity.
///
/// Returns an empty list for `n < 2`.
pub fn prime_factorization(mut n: i64) -> Vec<i64> {
    let mut primes = Vec::new();
    let mut p = 2;
    while n > 1 && p <= n / p {
        while n % p == 0 {
            primes.push(p);
            n /= p;
        }
        p += if p == 2 { 1 } else { 2 };
    }
    if n > 1 {
        primes.push(n);
    }
    primes
}

/// Distinct prime factors of `n` in increasing order.
pub fn prime_factors(n: i64) -> Vec<i64> {
    let mut primes = prime_factorization(n);
    primes.dedup();
    primes
}
