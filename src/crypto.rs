//! SHA-256 digests and HMAC-SHA-256 signatures as they appear on the wire.
//!
//! Everything here is a pure function. Text is hashed as its UTF-8 bytes and results are
//! base64 encoded, optionally wrapped in the XML fragment the service expects.
use digest::Digest;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SHA256_ALGORITHM: &str = "SHA256";
pub const HMAC_SHA256_ALGORITHM: &str = "HMACSHA256";

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("shared secret is not valid base64: {0}")]
    InvalidKeyEncoding(String),
    #[error("signature is not valid base64: {0}")]
    InvalidSignatureEncoding(String),
    #[error("unable to create HMAC signer: {0}")]
    InvalidKey(String),
}

/// Decodes a base64 shared secret into key bytes.
pub fn decode_key(secret: &str) -> Result<Vec<u8>, Error> {
    base64::decode(secret.trim()).map_err(|e| Error::InvalidKeyEncoding(e.to_string()))
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Base64 SHA-256 of `data`.
pub fn sha256_base64(data: &str) -> String {
    base64::encode(sha256(data.as_bytes()))
}

/// `<hash-data algName="SHA256">…</hash-data>`
pub fn sha256_wrapped(data: &str) -> String {
    format!(
        r#"<hash-data algName="{SHA256_ALGORITHM}">{}</hash-data>"#,
        sha256_base64(data)
    )
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], Error> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| Error::InvalidKey(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Base64 HMAC-SHA-256 of `data` under `key`.
pub fn hmac_sha256_base64(key: &[u8], data: &str) -> Result<String, Error> {
    Ok(base64::encode(hmac_sha256(key, data.as_bytes())?))
}

/// `<hmac-data algName="HMACSHA256">…</hmac-data>`
pub fn hmac_sha256_wrapped(key: &[u8], data: &str) -> Result<String, Error> {
    Ok(format!(
        r#"<hmac-data algName="{HMAC_SHA256_ALGORITHM}">{}</hmac-data>"#,
        hmac_sha256_base64(key, data)?
    ))
}

/// Checks a base64 signature produced by [hmac_sha256_base64] in constant time.
pub fn verify_hmac_sha256(key: &[u8], data: &str, signature: &str) -> Result<bool, Error> {
    let tag = base64::decode(signature.trim())
        .map_err(|e| Error::InvalidSignatureEncoding(e.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| Error::InvalidKey(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(mac.verify_slice(&tag).is_ok())
}

#[cfg(test)]
mod test {
    use super::*;
    use hex::FromHex;

    #[test]
    fn sha256_known_answer() {
        // FIPS 180-2 "abc"
        let expected =
            Vec::<u8>::from_hex("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .unwrap();
        assert_eq!(sha256(b"abc").to_vec(), expected);
        assert_eq!(sha256_base64("abc"), base64::encode(&expected));
    }

    #[test]
    fn hmac_known_answer() {
        // RFC 4231 test case 2
        let expected =
            Vec::<u8>::from_hex("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
                .unwrap();
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(mac.to_vec(), expected);
    }

    #[test]
    fn wrapped_fragments() {
        assert_eq!(
            sha256_wrapped("abc"),
            r#"<hash-data algName="SHA256">ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=</hash-data>"#
        );
        let wrapped = hmac_sha256_wrapped(b"key", "<info/>").unwrap();
        assert!(wrapped.starts_with(r#"<hmac-data algName="HMACSHA256">"#));
        assert!(wrapped.ends_with("</hmac-data>"));
    }

    #[test]
    fn signatures_are_deterministic_and_verify() {
        let key = decode_key("c2VjcmV0LWtleQ==").unwrap();
        for body in ["<info/>", "<info><a>&amp;</a></info>", ""] {
            let first = hmac_sha256_base64(&key, body).unwrap();
            let second = hmac_sha256_base64(&key, body).unwrap();
            assert_eq!(first, second);
            assert!(verify_hmac_sha256(&key, body, &first).unwrap());
            assert!(!verify_hmac_sha256(b"other key", body, &first).unwrap());
        }
    }

    #[test]
    fn bad_base64_is_an_error() {
        assert!(matches!(
            decode_key("not base64!"),
            Err(Error::InvalidKeyEncoding(_))
        ));
        assert!(matches!(
            verify_hmac_sha256(b"k", "data", "%%%"),
            Err(Error::InvalidSignatureEncoding(_))
        ));
    }
}
