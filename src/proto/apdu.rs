use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use log::debug;
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::proto::constants::*;

/// Hashes an arbitrary string into a 32-byte challenge or application
/// parameter, the way U2F clients derive them from the client data and the
/// application id.
pub fn params_from_str(input: &str) -> [u8; U2F_CHAL_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().into()
}

fn read_param(value: &[u8], field: &'static str) -> Result<[u8; U2F_CHAL_SIZE], Error> {
    value.try_into().map_err(|_| Error::InvalidParameterLength {
        field,
        len: value.len(),
    })
}

/// Reads a DER block `0x30 [0x81 len | 0x82 len:be16] body` and returns it
/// re-serialized, header included.
fn read_der_certificate(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>, Error> {
    let tag = reader.read_u8()?;
    if tag != DER_SEQUENCE_TAG {
        return Err(Error::MalformedResponse);
    }

    let length_kind = reader.read_u8()?;
    let mut block = vec![tag, length_kind];

    let length = match length_kind {
        DER_LENGTH_ONE_BYTE => {
            let len = reader.read_u8()?;
            block.push(len);
            usize::from(len)
        }
        DER_LENGTH_TWO_BYTES => {
            let len = reader.read_u16::<BigEndian>()?;
            block.extend_from_slice(&len.to_be_bytes());
            usize::from(len)
        }
        _ => return Err(Error::MalformedResponse),
    };

    let body_start = block.len();
    block.resize(body_start + length, 0);
    reader.read_exact(&mut block[body_start..])?;

    Ok(block)
}

/// Reads a DER block `0x30 len body` with a single length byte and returns it
/// re-serialized, header included.
fn read_der_signature(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>, Error> {
    let tag = reader.read_u8()?;
    if tag != DER_SEQUENCE_TAG {
        return Err(Error::MalformedResponse);
    }

    let length = reader.read_u8()?;
    let mut block = vec![tag, length];

    let body_start = block.len();
    block.resize(body_start + usize::from(length), 0);
    reader.read_exact(&mut block[body_start..])?;

    Ok(block)
}

#[derive(Debug, Clone)]
struct RegisterResponse {
    public_key: [u8; U2F_EC_POINT_SIZE],
    key_handle: Vec<u8>,
    certificate: Vec<u8>,
    signature: Vec<u8>,
}

/// U2F REGISTER exchange: request builder plus response parser.
///
/// Response fields are set exactly once by [`RegisterApdu::parse_response`]
/// and are immutable afterwards.
#[derive(Debug, Clone)]
pub struct RegisterApdu {
    challenge: [u8; U2F_CHAL_SIZE],
    application: [u8; U2F_APPID_SIZE],
    response: Option<RegisterResponse>,
}

impl RegisterApdu {
    pub fn new(challenge: &[u8], application: &[u8]) -> Result<Self, Error> {
        Ok(RegisterApdu {
            challenge: read_param(challenge, "challenge")?,
            application: read_param(application, "application parameter")?,
            response: None,
        })
    }

    /// Extended-length encoding:
    /// `00 01 00 00 | 00 00 40 | challenge | application | 00 00`
    pub fn build_request(&self) -> Vec<u8> {
        let mut request = Vec::with_capacity(REGISTER_REQUEST_SIZE);
        request.extend_from_slice(&[CLA_ISO7816, U2F_REGISTER, 0x00, 0x00]);
        request.extend_from_slice(&[0x00, 0x00, 0x40]);
        request.extend_from_slice(&self.challenge);
        request.extend_from_slice(&self.application);
        request.extend_from_slice(&[0x00, 0x00]); // le
        request
    }

    /// Parses `05 | public key(65) | kh len(1) | kh | DER cert | DER sig`.
    ///
    /// Fails fast on any malformed field; nothing is retained on failure.
    /// Trailing bytes (the APDU status words) are tolerated.
    pub fn parse_response(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.response.is_some() {
            return Err(Error::InvalidState {
                operation: "parsing a second register response",
            });
        }

        let mut reader = Cursor::new(data);

        let reserved = reader.read_u8()?;
        if reserved != U2F_REGISTER_ID {
            return Err(Error::MalformedResponse);
        }

        let mut public_key = [0u8; U2F_EC_POINT_SIZE];
        reader.read_exact(&mut public_key)?;

        let key_handle_len = reader.read_u8()?;
        let mut key_handle = vec![0u8; usize::from(key_handle_len)];
        reader.read_exact(&mut key_handle)?;

        let certificate = read_der_certificate(&mut reader)?;
        let signature = read_der_signature(&mut reader)?;

        debug!(
            "parsed register response: key handle = {}, certificate = {} byte(s), signature = {} byte(s)",
            hex::encode(&key_handle),
            certificate.len(),
            signature.len()
        );

        self.response = Some(RegisterResponse {
            public_key,
            key_handle,
            certificate,
            signature,
        });

        Ok(())
    }

    pub fn challenge(&self) -> &[u8; U2F_CHAL_SIZE] {
        &self.challenge
    }

    pub fn application(&self) -> &[u8; U2F_APPID_SIZE] {
        &self.application
    }

    pub fn public_key(&self) -> Option<&[u8; U2F_EC_POINT_SIZE]> {
        self.response.as_ref().map(|r| &r.public_key)
    }

    pub fn key_handle(&self) -> Option<&[u8]> {
        self.response.as_ref().map(|r| r.key_handle.as_slice())
    }

    pub fn certificate(&self) -> Option<&[u8]> {
        self.response.as_ref().map(|r| r.certificate.as_slice())
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.response.as_ref().map(|r| r.signature.as_slice())
    }
}

#[derive(Debug, Clone)]
struct AuthenticateResponse {
    user_presence: u8,
    counter: u32,
    signature: Vec<u8>,
}

/// U2F AUTHENTICATE exchange: request builder plus response parser.
#[derive(Debug, Clone)]
pub struct AuthenticateApdu {
    challenge: [u8; U2F_CHAL_SIZE],
    application: [u8; U2F_APPID_SIZE],
    key_handle: Vec<u8>,
    register_public_key: Option<[u8; U2F_EC_POINT_SIZE]>,
    check_only: bool,
    response: Option<AuthenticateResponse>,
}

impl AuthenticateApdu {
    /// Builds an authenticate APDU against a parsed register APDU, capturing
    /// its key handle and public key. Fails if `register` has no parsed
    /// response yet.
    pub fn new(
        register: &RegisterApdu,
        challenge: &[u8],
        application: &[u8],
        check_only: bool,
    ) -> Result<Self, Error> {
        let key_handle = register
            .key_handle()
            .ok_or(Error::InvalidState {
                operation: "authenticating against an unparsed register APDU",
            })?
            .to_vec();

        let mut apdu = Self::with_key_handle(challenge, application, &key_handle, check_only)?;
        apdu.register_public_key = register.public_key().copied();
        Ok(apdu)
    }

    /// Builds an authenticate APDU from a stored key handle. Verification of
    /// the response additionally needs [`AuthenticateApdu::set_register_public_key`].
    pub fn with_key_handle(
        challenge: &[u8],
        application: &[u8],
        key_handle: &[u8],
        check_only: bool,
    ) -> Result<Self, Error> {
        if key_handle.is_empty() || key_handle.len() > U2F_MAX_KH_SIZE {
            return Err(Error::InvalidParameterLength {
                field: "key handle",
                len: key_handle.len(),
            });
        }

        Ok(AuthenticateApdu {
            challenge: read_param(challenge, "challenge")?,
            application: read_param(application, "application parameter")?,
            key_handle: key_handle.to_vec(),
            register_public_key: None,
            check_only,
            response: None,
        })
    }

    pub fn set_register_public_key(&mut self, public_key: &[u8]) -> Result<(), Error> {
        self.register_public_key =
            Some(
                public_key
                    .try_into()
                    .map_err(|_| Error::InvalidParameterLength {
                        field: "register public key",
                        len: public_key.len(),
                    })?,
            );
        Ok(())
    }

    /// Extended-length encoding:
    /// `00 02 {03|07} 00 | 00 00 (40+1+kh len) | challenge | application |
    /// kh len | kh | 00 00`
    pub fn build_request(&self) -> Vec<u8> {
        let control = if self.check_only { U2F_AUTH_CHECK_ONLY } else { U2F_AUTH_ENFORCE };
        let data_len = 0x40 + 1 + self.key_handle.len() as u8;

        let mut request = Vec::with_capacity(7 + usize::from(data_len) + 2);
        request.extend_from_slice(&[CLA_ISO7816, U2F_AUTHENTICATE, control, 0x00]);
        request.extend_from_slice(&[0x00, 0x00, data_len]);
        request.extend_from_slice(&self.challenge);
        request.extend_from_slice(&self.application);
        request.push(self.key_handle.len() as u8);
        request.extend_from_slice(&self.key_handle);
        request.extend_from_slice(&[0x00, 0x00]); // le
        request
    }

    /// Parses `presence(1) | counter(be32) | DER sig`.
    pub fn parse_response(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.response.is_some() {
            return Err(Error::InvalidState {
                operation: "parsing a second authenticate response",
            });
        }

        let mut reader = Cursor::new(data);

        let user_presence = reader.read_u8()?;
        let counter = reader.read_u32::<BigEndian>()?;
        let signature = read_der_signature(&mut reader)?;

        debug!(
            "parsed authenticate response: presence = {:#04x}, counter = {}, signature = {} byte(s)",
            user_presence,
            counter,
            signature.len()
        );

        self.response = Some(AuthenticateResponse {
            user_presence,
            counter,
            signature,
        });

        Ok(())
    }

    pub fn challenge(&self) -> &[u8; U2F_CHAL_SIZE] {
        &self.challenge
    }

    pub fn application(&self) -> &[u8; U2F_APPID_SIZE] {
        &self.application
    }

    pub fn key_handle(&self) -> &[u8] {
        &self.key_handle
    }

    pub fn register_public_key(&self) -> Option<&[u8; U2F_EC_POINT_SIZE]> {
        self.register_public_key.as_ref()
    }

    pub fn check_only(&self) -> bool {
        self.check_only
    }

    pub fn user_presence(&self) -> Option<u8> {
        self.response.as_ref().map(|r| r.user_presence)
    }

    pub fn counter(&self) -> Option<u32> {
        self.response.as_ref().map(|r| r.counter)
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.response.as_ref().map(|r| r.signature.as_slice())
    }
}

/// The two APDU kinds exchanged with the authenticator, dispatched by
/// pattern matching.
#[derive(Debug, Clone)]
pub enum Apdu {
    Register(RegisterApdu),
    Authenticate(AuthenticateApdu),
}

impl Apdu {
    pub fn build_request(&self) -> Vec<u8> {
        match self {
            Apdu::Register(register) => register.build_request(),
            Apdu::Authenticate(authenticate) => authenticate.build_request(),
        }
    }

    pub fn parse_response(&mut self, data: &[u8]) -> Result<(), Error> {
        match self {
            Apdu::Register(register) => register.parse_response(data),
            Apdu::Authenticate(authenticate) => authenticate.parse_response(data),
        }
    }
}
