#![allow(dead_code)]

// From: FIDO Bluetooth Transport Specification - Review Draft

// GATT service and characteristics used by Link implementors

pub const FIDO_SERVICE_UUID: &str = "0000FFFD-0000-1000-8000-00805F9B34FB";
pub const FIDO_CONTROL_POINT_UUID: &str = "F1D0FFF1-DEAA-ECEE-B42F-C9BA7ED623BB"; // write
pub const FIDO_STATUS_UUID: &str = "F1D0FFF2-DEAA-ECEE-B42F-C9BA7ED623BB"; // notify
pub const FIDO_CONTROL_POINT_LENGTH_UUID: &str = "F1D0FFF3-DEAA-ECEE-B42F-C9BA7ED623BB"; // chunk size

// Fragment layout - command and continuation fragments

pub const TYPE_MASK: u8 = 0x80; // High bit set marks a command fragment

pub const CMD_PING: u8 = 0x81;
pub const CMD_KEEPALIVE: u8 = 0x82;
pub const CMD_MSG: u8 = 0x83;
pub const CMD_ERROR: u8 = 0xbf;

pub const INIT_HEADER_SIZE: usize = 3; // [cmd:1][total length:2]
pub const CONT_HEADER_SIZE: usize = 1; // [sequence:1]
pub const MIN_CHUNK_SIZE: usize = 8;
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

// From: Common U2F raw message format header - Review Draft
// 2014-10-08

pub const CLA_ISO7816: u8 = 0x00;

pub const U2F_REGISTER: u8 = 0x01; // Registration command
pub const U2F_AUTHENTICATE: u8 = 0x02; // Authenticate/sign command

pub const U2F_REGISTER_ID: u8 = 0x05; // Version 2 registration identifier
pub const U2F_REGISTER_HASH_ID: u8 = 0x00; // Version 2 hash identifier

// Authentication control byte

pub const U2F_AUTH_ENFORCE: u8 = 0x03; // Enforce user presence and sign
pub const U2F_AUTH_CHECK_ONLY: u8 = 0x07; // Check only

// General constants

pub const U2F_CHAL_SIZE: usize = 32; // Size of challenge parameter
pub const U2F_APPID_SIZE: usize = 32; // Size of application parameter
pub const U2F_EC_KEY_SIZE: usize = 32; // EC key size in bytes
pub const U2F_EC_POINT_SIZE: usize = (U2F_EC_KEY_SIZE * 2) + 1; // Size of uncompressed EC point
pub const U2F_MAX_KH_SIZE: usize = 128; // Max size of key handle
pub const U2F_CTR_SIZE: usize = 4; // Size of counter field

pub const REGISTER_REQUEST_SIZE: usize = 7 + U2F_CHAL_SIZE + U2F_APPID_SIZE + 2;

// ASN.1 DER constants

pub const DER_SEQUENCE_TAG: u8 = 0x30;
pub const DER_INTEGER_TAG: u8 = 0x02;
pub const DER_LENGTH_ONE_BYTE: u8 = 0x81; // One following length byte
pub const DER_LENGTH_TWO_BYTES: u8 = 0x82; // Two following big-endian length bytes
