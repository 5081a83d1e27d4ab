// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Conversion between the two ECDSA P-256 signature encodings this crate
//! touches: ASN.1 DER (what `ring` signs and verifies) and fixed-width
//! P-1363 `r || s` (what JWS/RFC 8292 requires on the wire).

use thiserror::Error;

/// Width in bytes of a single P-256 scalar (`r` or `s`).
const SCALAR_LEN: usize = 32;
/// Width of a full P-1363 signature for P-256.
pub const P1363_LEN: usize = SCALAR_LEN * 2;

/// Errors converting between DER and P-1363 ECDSA signature encodings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigFormatError {
    /// Input was not valid ASN.1 DER, or not a two-INTEGER SEQUENCE.
    #[error("malformed DER signature")]
    MalformedDer,
    /// An encoded INTEGER had a scalar wider than 32 bytes (not a valid
    /// P-256 component).
    #[error("scalar too wide for P-256")]
    ScalarTooWide,
    /// Input was not exactly 64 bytes.
    #[error("malformed P-1363 signature")]
    MalformedP1363,
}

/// The two signature encodings this crate round-trips between, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFormat {
    /// ASN.1 DER `SEQUENCE { r INTEGER, s INTEGER }`.
    Der,
    /// Fixed-width `r(32) || s(32)`.
    P1363,
    /// Neither shape: not 64 bytes, and doesn't start with a DER `SEQUENCE` tag.
    Unknown,
}

/// Guess the encoding of a signature buffer from its shape: P-1363 for
/// exactly 64 bytes, DER if the first byte is the `SEQUENCE` tag `0x30`,
/// otherwise unknown.
pub fn detect_signature_format(sig: &[u8]) -> SignatureFormat {
    if sig.len() == P1363_LEN {
        SignatureFormat::P1363
    } else if sig.first() == Some(&0x30) {
        SignatureFormat::Der
    } else {
        SignatureFormat::Unknown
    }
}

/// Convert a DER-encoded ECDSA signature into fixed-width P-1363.
pub fn der_to_p1363(der: &[u8]) -> Result<[u8; P1363_LEN], SigFormatError> {
    let mut pos = 0usize;
    expect_tag(der, &mut pos, 0x30)?;
    let (seq_len, _) = read_der_len(der, &mut pos)?;
    if pos + seq_len != der.len() {
        return Err(SigFormatError::MalformedDer);
    }

    let r = parse_der_integer(der, &mut pos)?;
    let s = parse_der_integer(der, &mut pos)?;
    if pos != der.len() {
        return Err(SigFormatError::MalformedDer);
    }

    let mut out = [0u8; P1363_LEN];
    out[..SCALAR_LEN].copy_from_slice(&fixed_width(&r)?);
    out[SCALAR_LEN..].copy_from_slice(&fixed_width(&s)?);
    Ok(out)
}

/// Convert a fixed-width P-1363 signature into DER.
pub fn p1363_to_der(sig: &[u8]) -> Result<Vec<u8>, SigFormatError> {
    if sig.len() != P1363_LEN {
        return Err(SigFormatError::MalformedP1363);
    }
    let r = encode_der_integer(&sig[..SCALAR_LEN]);
    let s = encode_der_integer(&sig[SCALAR_LEN..]);

    let mut body = Vec::with_capacity(r.len() + s.len());
    body.extend_from_slice(&r);
    body.extend_from_slice(&s);

    let mut out = Vec::with_capacity(body.len() + 4);
    out.push(0x30);
    out.extend(encode_der_len(body.len()));
    out.extend(body);
    Ok(out)
}

fn expect_tag(buf: &[u8], pos: &mut usize, tag: u8) -> Result<(), SigFormatError> {
    if *pos >= buf.len() || buf[*pos] != tag {
        return Err(SigFormatError::MalformedDer);
    }
    *pos += 1;
    Ok(())
}

/// Read a DER length field (short or long form) at `*pos`, advancing it
/// past the length bytes. Returns `(length, bytes_consumed)`.
fn read_der_len(buf: &[u8], pos: &mut usize) -> Result<(usize, usize), SigFormatError> {
    if *pos >= buf.len() {
        return Err(SigFormatError::MalformedDer);
    }
    let first = buf[*pos];
    *pos += 1;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let num_bytes = (first & 0x7f) as usize;
    if num_bytes == 0 || num_bytes > std::mem::size_of::<usize>() {
        return Err(SigFormatError::MalformedDer);
    }
    if *pos + num_bytes > buf.len() {
        return Err(SigFormatError::MalformedDer);
    }
    let mut len = 0usize;
    for &b in &buf[*pos..*pos + num_bytes] {
        len = (len << 8) | (b as usize);
    }
    *pos += num_bytes;
    Ok((len, 1 + num_bytes))
}

/// Parse one `INTEGER` TLV at `*pos`, advancing past it, returning its
/// content bytes (including any DER sign-padding leading zero).
fn parse_der_integer(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>, SigFormatError> {
    expect_tag(buf, pos, 0x02)?;
    let (len, _) = read_der_len(buf, pos)?;
    if len == 0 || *pos + len > buf.len() {
        return Err(SigFormatError::MalformedDer);
    }
    let content = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(content)
}

/// Strip DER sign-padding (a single leading `0x00` required only when the
/// next byte's high bit is set) and left-pad with zeros to exactly
/// [`SCALAR_LEN`] bytes.
fn fixed_width(der_integer: &[u8]) -> Result<[u8; SCALAR_LEN], SigFormatError> {
    let trimmed = trim_leading_zeros(der_integer);
    if trimmed.len() > SCALAR_LEN {
        return Err(SigFormatError::ScalarTooWide);
    }
    let mut out = [0u8; SCALAR_LEN];
    out[SCALAR_LEN - trimmed.len()..].copy_from_slice(trimmed);
    Ok(out)
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let mut i = 0;
    while i + 1 < bytes.len() && bytes[i] == 0 {
        i += 1;
    }
    &bytes[i..]
}

/// Encode a fixed-width 32-byte scalar as a DER `INTEGER`, stripping
/// insignificant leading zeros and re-adding exactly one sign-padding
/// byte when the most significant remaining bit is set.
fn encode_der_integer(scalar: &[u8]) -> Vec<u8> {
    let mut trimmed = trim_leading_zeros(scalar);
    if trimmed.is_empty() {
        trimmed = &[0u8];
    }
    let needs_pad = trimmed[0] & 0x80 != 0;
    let content_len = trimmed.len() + if needs_pad { 1 } else { 0 };

    let mut out = Vec::with_capacity(content_len + 2);
    out.push(0x02);
    out.extend(encode_der_len(content_len));
    if needs_pad {
        out.push(0x00);
    }
    out.extend_from_slice(trimmed);
    out
}

fn encode_der_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        let be = len.to_be_bytes();
        let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
        let trimmed = &be[first_nonzero..];
        let mut out = Vec::with_capacity(trimmed.len() + 1);
        out.push(0x80 | trimmed.len() as u8);
        out.extend_from_slice(trimmed);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::primitives;

    #[test]
    fn round_trips_real_signatures() {
        let kp = primitives::generate_p256_keypair().unwrap();
        for msg in [&b""[..], b"a", b"vapid jwt signing input"] {
            let der = primitives::sign_ecdsa_p256_der(&kp.pkcs8, msg).unwrap();
            assert_eq!(detect_signature_format(&der), SignatureFormat::Der);
            let p1363 = der_to_p1363(&der).unwrap();
            assert_eq!(detect_signature_format(&p1363), SignatureFormat::P1363);
            let der_again = p1363_to_der(&p1363).unwrap();
            primitives::verify_ecdsa_p256_der(&kp.public_key_raw, msg, &der_again).unwrap();
        }
    }

    #[test]
    fn detects_unknown_for_garbage_not_shaped_like_either_encoding() {
        assert_eq!(detect_signature_format(&[0u8; 50]), SignatureFormat::Unknown);
        assert_eq!(detect_signature_format(&[0xFFu8; 63]), SignatureFormat::Unknown);
        assert_eq!(detect_signature_format(&[]), SignatureFormat::Unknown);
    }

    #[test]
    fn der_to_p1363_handles_sign_padding() {
        // r has high bit set (needs 0x00 pad in DER), s does not.
        let mut r = [0u8; 32];
        r[0] = 0x80;
        let mut s = [0u8; 32];
        s[31] = 0x01;
        let der = p1363_to_der(&{
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&r);
            buf[32..].copy_from_slice(&s);
            buf
        })
        .unwrap();
        // r's INTEGER should carry a leading 0x00 pad byte.
        assert_eq!(der[2], 0x02); // r tag
        assert_eq!(der[3], 33); // r length: 32 + 1 pad byte
        assert_eq!(der[4], 0x00);

        let back = der_to_p1363(&der).unwrap();
        assert_eq!(&back[..32], &r[..]);
        assert_eq!(&back[32..], &s[..]);
    }

    #[test]
    fn der_to_p1363_handles_short_integers() {
        // r and s both small enough to need leading-zero stripping and
        // left-padding on the way back.
        let mut sig = [0u8; 64];
        sig[31] = 0x2a; // r = 42
        sig[63] = 0x01; // s = 1
        let der = p1363_to_der(&sig).unwrap();
        let back = der_to_p1363(&der).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn rejects_malformed_der() {
        assert!(der_to_p1363(&[]).is_err());
        assert!(der_to_p1363(&[0x30, 0x05, 0x02, 0x01]).is_err());
        assert!(der_to_p1363(&[0x31, 0x00]).is_err());
    }

    #[test]
    fn rejects_wrong_length_p1363() {
        assert_eq!(p1363_to_der(&[0u8; 63]), Err(SigFormatError::MalformedP1363));
        assert_eq!(p1363_to_der(&[0u8; 65]), Err(SigFormatError::MalformedP1363));
    }
}
