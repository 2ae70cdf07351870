use std::io::{Cursor, Read};

use byteorder::ReadBytesExt;
use log::debug;
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};

use crate::error::Error;
use crate::proto::apdu::{Apdu, AuthenticateApdu, RegisterApdu};
use crate::proto::constants::*;

/// Raw ECDSA signature components, minimal unsigned big-endian integers with
/// the DER sign-disambiguation byte already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

fn read_der_integer(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>, Error> {
    let tag = reader.read_u8()?;
    if tag != DER_INTEGER_TAG {
        return Err(Error::MalformedResponse);
    }

    let length = reader.read_u8()?;
    let mut value = vec![0u8; usize::from(length)];
    reader.read_exact(&mut value)?;

    // DER pads a component whose high bit is set with one leading zero byte
    match value.split_first() {
        Some((0x00, rest)) if !rest.is_empty() => Ok(rest.to_vec()),
        _ => Ok(value),
    }
}

/// Extracts (r, s) from a DER signature `30 len 02 len r 02 len s`.
pub fn extract_raw_components(signature: &[u8]) -> Result<RawSignature, Error> {
    let mut reader = Cursor::new(signature);

    let tag = reader.read_u8()?;
    if tag != DER_SEQUENCE_TAG {
        return Err(Error::MalformedResponse);
    }
    let _total_length = reader.read_u8()?;

    let r = read_der_integer(&mut reader)?;
    let s = read_der_integer(&mut reader)?;

    Ok(RawSignature { r, s })
}

/// Capability extracting the raw public key bytes embedded in an X.509
/// certificate, consumed by register verification.
pub trait CertificateKeyExtractor {
    fn extract_public_key(&self, certificate: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Default extractor returning the certificate's SubjectPublicKeyInfo bit
/// string bytes.
pub struct X509KeyExtractor;

impl CertificateKeyExtractor for X509KeyExtractor {
    fn extract_public_key(&self, certificate: &[u8]) -> Result<Vec<u8>, Error> {
        let (_, certificate) =
            x509_parser::parse_x509_certificate(certificate).map_err(|_| Error::MalformedResponse)?;
        Ok(certificate.public_key().subject_public_key.data.to_vec())
    }
}

fn verify_p256(public_key: &[u8], message: &[u8], signature: &RawSignature) -> bool {
    if signature.r.len() > U2F_EC_KEY_SIZE || signature.s.len() > U2F_EC_KEY_SIZE {
        return false;
    }

    // ring's fixed encoding wants both components left-padded to 32 bytes
    let mut fixed = [0u8; U2F_EC_KEY_SIZE * 2];
    fixed[U2F_EC_KEY_SIZE - signature.r.len()..U2F_EC_KEY_SIZE].copy_from_slice(&signature.r);
    fixed[U2F_EC_KEY_SIZE * 2 - signature.s.len()..].copy_from_slice(&signature.s);

    let public_key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key);
    public_key.verify(message, &fixed).is_ok()
}

/// Checks the attestation signature of a parsed register response over
/// `00 | application | challenge | key handle | public key`, using the public
/// key carried by the attestation certificate.
///
/// Any missing field, extraction failure or signature mismatch is `false`.
pub fn verify_register(apdu: &RegisterApdu, certificates: &impl CertificateKeyExtractor) -> bool {
    let (certificate, signature, key_handle, public_key) = match (
        apdu.certificate(),
        apdu.signature(),
        apdu.key_handle(),
        apdu.public_key(),
    ) {
        (Some(certificate), Some(signature), Some(key_handle), Some(public_key)) => {
            (certificate, signature, key_handle, public_key)
        }
        _ => return false,
    };

    let certificate_key = match certificates.extract_public_key(certificate) {
        Ok(key) => key,
        Err(e) => {
            debug!("unable to extract the certificate public key: {}", e);
            return false;
        }
    };

    let components = match extract_raw_components(signature) {
        Ok(components) => components,
        Err(_) => return false,
    };

    let mut message =
        Vec::with_capacity(1 + U2F_APPID_SIZE + U2F_CHAL_SIZE + key_handle.len() + U2F_EC_POINT_SIZE);
    message.push(U2F_REGISTER_HASH_ID);
    message.extend_from_slice(apdu.application());
    message.extend_from_slice(apdu.challenge());
    message.extend_from_slice(key_handle);
    message.extend_from_slice(public_key);

    verify_p256(&certificate_key, &message, &components)
}

/// Checks the signature of a parsed authenticate response over
/// `application | presence | counter(be32) | challenge`, using the register
/// APDU's public key.
pub fn verify_authenticate(apdu: &AuthenticateApdu) -> bool {
    let (public_key, user_presence, counter, signature) = match (
        apdu.register_public_key(),
        apdu.user_presence(),
        apdu.counter(),
        apdu.signature(),
    ) {
        (Some(public_key), Some(user_presence), Some(counter), Some(signature)) => {
            (public_key, user_presence, counter, signature)
        }
        _ => return false,
    };

    let components = match extract_raw_components(signature) {
        Ok(components) => components,
        Err(_) => return false,
    };

    let mut message = Vec::with_capacity(U2F_APPID_SIZE + 1 + U2F_CTR_SIZE + U2F_CHAL_SIZE);
    message.extend_from_slice(apdu.application());
    message.push(user_presence);
    message.extend_from_slice(&counter.to_be_bytes());
    message.extend_from_slice(apdu.challenge());

    verify_p256(public_key, &message, &components)
}

/// Dispatches on the APDU kind; register verification needs the certificate
/// capability, authenticate verification does not.
pub fn verify(apdu: &Apdu, certificates: &impl CertificateKeyExtractor) -> bool {
    match apdu {
        Apdu::Register(register) => verify_register(register, certificates),
        Apdu::Authenticate(authenticate) => verify_authenticate(authenticate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

    struct StaticKeyExtractor(Vec<u8>);

    impl CertificateKeyExtractor for StaticKeyExtractor {
        fn extract_public_key(&self, _certificate: &[u8]) -> Result<Vec<u8>, Error> {
            Ok(self.0.clone())
        }
    }

    fn test_key_pair() -> (EcdsaKeyPair, Vec<u8>) {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng).unwrap();
        let public_key = key_pair.public_key().as_ref().to_vec();
        (key_pair, public_key)
    }

    fn sign(key_pair: &EcdsaKeyPair, message: &[u8]) -> Vec<u8> {
        let rng = SystemRandom::new();
        let fixed = key_pair.sign(&rng, message).unwrap();
        der_from_fixed(fixed.as_ref())
    }

    // Encodes a fixed-width r||s signature as DER, padding each component
    // with a leading zero when its high bit is set.
    fn der_from_fixed(fixed: &[u8]) -> Vec<u8> {
        fn der_integer(component: &[u8]) -> Vec<u8> {
            let stripped: Vec<u8> = {
                let mut slice = component;
                while slice.len() > 1 && slice[0] == 0x00 {
                    slice = &slice[1..];
                }
                slice.to_vec()
            };

            let mut out = vec![0x02];
            if stripped[0] & 0x80 != 0 {
                out.push(stripped.len() as u8 + 1);
                out.push(0x00);
            } else {
                out.push(stripped.len() as u8);
            }
            out.extend_from_slice(&stripped);
            out
        }

        let r = der_integer(&fixed[..32]);
        let s = der_integer(&fixed[32..]);

        let mut out = vec![0x30, (r.len() + s.len()) as u8];
        out.extend_from_slice(&r);
        out.extend_from_slice(&s);
        out
    }

    #[test]
    fn extract_strips_padding_bytes() {
        let der = [0x30, 0x08, 0x02, 0x02, 0x00, 0x7F, 0x02, 0x02, 0x00, 0x80];
        let components = extract_raw_components(&der).unwrap();
        assert_eq!(components.r, vec![0x7F]);
        assert_eq!(components.s, vec![0x80]);
    }

    #[test]
    fn extract_keeps_unpadded_components() {
        let der = [0x30, 0x06, 0x02, 0x01, 0x7F, 0x02, 0x03, 0x01, 0x02, 0x03];
        let components = extract_raw_components(&der).unwrap();
        assert_eq!(components.r, vec![0x7F]);
        assert_eq!(components.s, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn extract_rejects_overrun_and_bad_tags() {
        // s declares 4 bytes but only 2 remain
        let overrun = [0x30, 0x08, 0x02, 0x01, 0x7F, 0x02, 0x04, 0x01, 0x02];
        assert_eq!(extract_raw_components(&overrun), Err(Error::MalformedResponse));

        let bad_seq = [0x31, 0x06, 0x02, 0x01, 0x7F, 0x02, 0x01, 0x01];
        assert_eq!(extract_raw_components(&bad_seq), Err(Error::MalformedResponse));

        let bad_int = [0x30, 0x06, 0x03, 0x01, 0x7F, 0x02, 0x01, 0x01];
        assert_eq!(extract_raw_components(&bad_int), Err(Error::MalformedResponse));

        assert_eq!(extract_raw_components(&[]), Err(Error::MalformedResponse));
    }

    #[test]
    fn register_verification_round_trip() {
        let (attestation_key, attestation_public) = test_key_pair();

        let challenge = [0x11u8; 32];
        let application = [0x22u8; 32];
        let user_public_key = [0x04u8; 65];
        let key_handle = [0xDEu8, 0xAD, 0xBE, 0xEF];

        let mut message = vec![0x00];
        message.extend_from_slice(&application);
        message.extend_from_slice(&challenge);
        message.extend_from_slice(&key_handle);
        message.extend_from_slice(&user_public_key);
        let signature = sign(&attestation_key, &message);

        let mut response = vec![0x05];
        response.extend_from_slice(&user_public_key);
        response.push(key_handle.len() as u8);
        response.extend_from_slice(&key_handle);
        response.extend_from_slice(&[0x30, 0x81, 0x02, 0xAA, 0xBB]); // stand-in certificate
        response.extend_from_slice(&signature);

        let extractor = StaticKeyExtractor(attestation_public);

        let mut apdu = RegisterApdu::new(&challenge, &application).unwrap();
        apdu.parse_response(&response).unwrap();
        assert!(verify_register(&apdu, &extractor));

        // same response against a different challenge fails the check
        let mut wrong = RegisterApdu::new(&[0x12u8; 32], &application).unwrap();
        wrong.parse_response(&response).unwrap();
        assert!(!verify_register(&wrong, &extractor));
    }

    #[test]
    fn register_verification_requires_a_parsed_response() {
        let (_, attestation_public) = test_key_pair();
        let apdu = RegisterApdu::new(&[0x11; 32], &[0x22; 32]).unwrap();
        assert!(!verify_register(&apdu, &StaticKeyExtractor(attestation_public)));
    }

    #[test]
    fn authenticate_verification_round_trip() {
        let (register_key, register_public) = test_key_pair();

        let challenge = [0x33u8; 32];
        let application = [0x44u8; 32];
        let counter = 0x01020304u32;

        let mut message = Vec::new();
        message.extend_from_slice(&application);
        message.push(0x01);
        message.extend_from_slice(&counter.to_be_bytes());
        message.extend_from_slice(&challenge);
        let signature = sign(&register_key, &message);

        let mut response = vec![0x01];
        response.extend_from_slice(&counter.to_be_bytes());
        response.extend_from_slice(&signature);

        let mut apdu =
            AuthenticateApdu::with_key_handle(&challenge, &application, &[0xAB; 8], false).unwrap();
        apdu.set_register_public_key(&register_public).unwrap();
        apdu.parse_response(&response).unwrap();
        assert!(verify_authenticate(&apdu));

        // flipping the counter invalidates the signature
        let mut tampered = response.clone();
        tampered[4] ^= 0x01;
        let mut wrong =
            AuthenticateApdu::with_key_handle(&challenge, &application, &[0xAB; 8], false).unwrap();
        wrong.set_register_public_key(&register_public).unwrap();
        wrong.parse_response(&tampered).unwrap();
        assert!(!verify_authenticate(&wrong));
    }

    #[test]
    fn authenticate_verification_requires_register_key() {
        let mut apdu =
            AuthenticateApdu::with_key_handle(&[0x33; 32], &[0x44; 32], &[0xAB; 8], false).unwrap();

        let mut response = vec![0x01];
        response.extend_from_slice(&1u32.to_be_bytes());
        response.extend_from_slice(&[0x30, 0x02, 0x01, 0x02]);
        apdu.parse_response(&response).unwrap();

        assert!(!verify_authenticate(&apdu));
    }

    #[test]
    fn x509_extractor_rejects_garbage() {
        assert!(X509KeyExtractor.extract_public_key(&[0x30, 0x03, 0x01, 0x02, 0x03]).is_err());
    }
}
