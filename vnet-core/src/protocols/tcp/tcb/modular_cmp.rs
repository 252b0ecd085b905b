//! Comparisons on sequence numbers, which live on a ring of 2^32 values.
//! Two numbers compare by which way around the ring the shorter path
//! between them runs.

/// a < b under modular arithmetic
pub fn mod_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Does `x` fall in `low..=high` going forward around the ring from `low`?
pub fn mod_between(low: u32, x: u32, high: u32) -> bool {
    x.wrapping_sub(low) <= high.wrapping_sub(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modular_comparison() {
        assert!(mod_lt(10, 20));
        assert!(!mod_lt(20, 10));
        assert!(mod_lt(2_000_000_000, 3_000_000_000));
        assert!(!mod_lt(3_000_000_000, 2_000_000_000));
        assert!(mod_lt(u32::MAX - 5, 5));
        assert!(!mod_lt(5, u32::MAX - 5));

        assert!(!mod_lt(5, 5));
    }

    #[test]
    fn bounded() {
        assert!(mod_between(5, 10, 15));
        assert!(mod_between(5, 5, 15));
        assert!(mod_between(5, 15, 15));
        assert!(!mod_between(5, 16, 15));
        assert!(!mod_between(15, 10, 5));

        assert!(mod_between(u32::MAX - 5, 5, 10));
        assert!(!mod_between(u32::MAX - 5, 11, 10));
        assert!(mod_between(u32::MAX - 10, u32::MAX - 5, 5));
        assert!(mod_between(10, 10, 10));
    }
}
