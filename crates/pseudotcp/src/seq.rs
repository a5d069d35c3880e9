//! Sequence-number arithmetic, wrapping-aware (serial number arithmetic,
//! RFC 1982-style) so the 32-bit space doesn't need the whole transfer to
//! fit without wraparound.

pub fn lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

pub fn le(a: u32, b: u32) -> bool {
    a == b || lt(a, b)
}

pub fn gt(a: u32, b: u32) -> bool {
    lt(b, a)
}

pub fn ge(a: u32, b: u32) -> bool {
    le(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_wraparound() {
        assert!(lt(u32::MAX, 0));
        assert!(gt(0, u32::MAX));
        assert!(le(u32::MAX, u32::MAX));
    }

    #[test]
    fn ordinary_ordering() {
        assert!(lt(1, 2));
        assert!(gt(2, 1));
        assert!(ge(2, 2));
    }
}
