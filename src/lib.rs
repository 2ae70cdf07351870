//! # u2f-ble
//!
//! FIDO U2F APDU exchange with a BLE authenticator.
//!
//! The crate covers the three layers between a caller and the physical
//! transport: fragment framing over the size-limited GATT characteristic
//! ([`transport::chunk`]), the REGISTER/AUTHENTICATE raw message codecs
//! ([`proto::apdu`]) and ECDSA-P256/SHA-256 signature verification of the
//! responses ([`proto::verify`]). [`transport::session`] ties them together
//! as an event-driven state machine over an abstract [`transport::session::Link`].

pub mod error;
pub mod proto;
pub mod transport;
