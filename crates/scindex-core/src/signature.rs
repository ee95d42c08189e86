//! Armored signed messages and the registry authenticity check.
//!
//! A signed message is a PEM-style block:
//!
//! ```text
//! -----BEGIN DERO SIGNED MESSAGE-----
//! Address: dero1qy...
//! C: 1f0c...
//! S: 0a9b...
//!
//! <base64 message>
//! -----END DERO SIGNED MESSAGE-----
//! ```
//!
//! The curve arithmetic (recomputing the challenge from the public key,
//! `s·G − c·P` and the message) lives behind [`SignatureVerifier`].

use crate::error::IndexerError;

const BEGIN: &str = "-----BEGIN ";
const END: &str = "-----END ";
const DASHES: &str = "-----";

/// A parsed armored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub label: String,
    /// Signer address (`Address` header).
    pub address: String,
    /// Challenge scalar, hex (`C` header).
    pub c: String,
    /// Response scalar, hex (`S` header).
    pub s: String,
    /// Decoded message body.
    pub message: Vec<u8>,
}

fn is_hex_scalar(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse an armored signed message.
pub fn parse_signed_message(input: &str) -> Result<SignedMessage, IndexerError> {
    let mut lines = input.lines().map(str::trim_end);

    let label = lines
        .by_ref()
        .find_map(|l| {
            l.trim_start()
                .strip_prefix(BEGIN)
                .and_then(|rest| rest.strip_suffix(DASHES))
        })
        .ok_or_else(|| IndexerError::Signature("missing BEGIN line".into()))?
        .to_string();

    let mut address = None;
    let mut c = None;
    let mut s = None;
    let mut body = String::new();
    let mut in_body = false;
    let mut terminated = false;

    for line in lines {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix(END) {
            if rest.strip_suffix(DASHES) != Some(label.as_str()) {
                return Err(IndexerError::Signature("mismatched END line".into()));
            }
            terminated = true;
            break;
        }
        if !in_body {
            if line.is_empty() {
                in_body = true;
                continue;
            }
            match line.split_once(':') {
                Some((key, value)) => {
                    let value = value.trim().to_string();
                    match key.trim() {
                        "Address" => address = Some(value),
                        "C" => c = Some(value),
                        "S" => s = Some(value),
                        _ => {}
                    }
                    continue;
                }
                None => in_body = true,
            }
        }
        body.push_str(line.trim());
    }

    if !terminated {
        return Err(IndexerError::Signature("missing END line".into()));
    }

    let address = address.ok_or_else(|| IndexerError::Signature("missing Address header".into()))?;
    let c = c.ok_or_else(|| IndexerError::Signature("missing C header".into()))?;
    let s = s.ok_or_else(|| IndexerError::Signature("missing S header".into()))?;
    if !is_hex_scalar(&c) {
        return Err(IndexerError::Signature("unknown C format".into()));
    }
    if !is_hex_scalar(&s) {
        return Err(IndexerError::Signature("unknown S format".into()));
    }

    let message =
        base64::decode(&body).map_err(|e| IndexerError::Signature(format!("body: {e}")))?;

    Ok(SignedMessage {
        label,
        address,
        c,
        s,
        message,
    })
}

/// Schnorr-style verification over the chain's curve.
pub trait SignatureVerifier: Send + Sync {
    /// Check `msg.c` against the recomputed challenge. Returns the signer
    /// address on success.
    fn verify(&self, msg: &SignedMessage) -> Result<String, IndexerError>;
}

/// Verifier used when no curve backend is linked. Every check fails, so
/// fastsync always falls back to historical replay.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableVerifier;

impl SignatureVerifier for UnavailableVerifier {
    fn verify(&self, _msg: &SignedMessage) -> Result<String, IndexerError> {
        Err(IndexerError::Signature("no signature verifier configured".into()))
    }
}

/// Validate that `armored` is a valid signature whose message is exactly
/// `code`. Returns the signer address.
pub fn validate_code_signature(
    verifier: &dyn SignatureVerifier,
    code: &str,
    armored: &str,
) -> Result<String, IndexerError> {
    if armored.is_empty() {
        return Err(IndexerError::Signature("empty signature".into()));
    }
    let msg = parse_signed_message(armored)?;
    let signer = verifier.verify(&msg)?;
    if msg.message != code.as_bytes() {
        return Err(IndexerError::Signature(
            "signed message does not match contract code".into(),
        ));
    }
    Ok(signer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armor(message: &str) -> String {
        format!(
            "-----BEGIN DERO SIGNED MESSAGE-----\n\
             Address: dero1qyregistry\n\
             C: 1f0c9a\n\
             S: 0a9b77\n\
             \n\
             {}\n\
             -----END DERO SIGNED MESSAGE-----\n",
            base64::encode(message)
        )
    }

    struct AcceptC(&'static str);

    impl SignatureVerifier for AcceptC {
        fn verify(&self, msg: &SignedMessage) -> Result<String, IndexerError> {
            if msg.c == self.0 {
                Ok(msg.address.clone())
            } else {
                Err(IndexerError::Signature("signature mismatch".into()))
            }
        }
    }

    #[test]
    fn parses_headers_and_body() {
        let msg = parse_signed_message(&armor("Function Initialize() Uint64")).unwrap();
        assert_eq!(msg.label, "DERO SIGNED MESSAGE");
        assert_eq!(msg.address, "dero1qyregistry");
        assert_eq!(msg.c, "1f0c9a");
        assert_eq!(msg.s, "0a9b77");
        assert_eq!(msg.message, b"Function Initialize() Uint64");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_signed_message("not armored").is_err());
        let no_end = "-----BEGIN X-----\nAddress: a\nC: 1\nS: 2\n\naGk=\n";
        assert!(parse_signed_message(no_end).is_err());
        let bad_c = "-----BEGIN X-----\nAddress: a\nC: zz\nS: 2\n\naGk=\n-----END X-----";
        assert!(parse_signed_message(bad_c).is_err());
    }

    #[test]
    fn code_must_match_signed_message() {
        let code = "Function Initialize() Uint64\n10 RETURN 0\nEnd Function";
        let armored = armor(code);
        let verifier = AcceptC("1f0c9a");

        assert_eq!(
            validate_code_signature(&verifier, code, &armored).unwrap(),
            "dero1qyregistry"
        );
        assert!(validate_code_signature(&verifier, "tampered", &armored).is_err());
        assert!(validate_code_signature(&AcceptC("ff"), code, &armored).is_err());
        assert!(validate_code_signature(&UnavailableVerifier, code, &armored).is_err());
    }
}
