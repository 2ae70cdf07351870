pub mod apdu;
pub mod constants;
pub mod verify;
