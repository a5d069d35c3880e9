use aws_lc_rs::hmac;

use crate::Error;

/// HMAC-SHA1 digest, used for the STUN MESSAGE-INTEGRITY attribute.
///
/// # Test
///
/// ```
/// use codec::crypto::hmac_sha1;
///
/// let key = b"key";
/// let a = hmac_sha1(key, &[b"hello", b" world"]).unwrap();
/// let b = hmac_sha1(key, &[b"hello world"]).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn hmac_sha1(key: &[u8], source: &[&[u8]]) -> Result<[u8; 20], Error> {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    let mut ctx = hmac::Context::with_key(&key);

    for buf in source {
        ctx.update(buf);
    }

    let mut out = [0u8; 20];
    out.copy_from_slice(ctx.sign().as_ref());
    Ok(out)
}

/// CRC32 fingerprint, as used by the STUN FINGERPRINT attribute.
///
/// # Test
///
/// ```
/// use codec::crypto::fingerprint;
///
/// assert_eq!(fingerprint(b"1"), 3498621689);
/// ```
pub fn fingerprint(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes) ^ 0x5354_554e
}
