#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate u2f_ble;

use u2f_ble::proto::apdu::{AuthenticateApdu, RegisterApdu};
use u2f_ble::proto::verify::extract_raw_components;
use u2f_ble::transport::chunk::{classify, join, CommandType};

fuzz_target!(|data: &[u8]| {
    let mut register = RegisterApdu::new(&[0u8; 32], &[0u8; 32]).unwrap();
    let _ = register.parse_response(data);

    let mut authenticate =
        AuthenticateApdu::with_key_handle(&[0u8; 32], &[0u8; 32], &[1u8; 8], false).unwrap();
    let _ = authenticate.parse_response(data);

    let _ = extract_raw_components(data);

    let _ = classify(data);
    let _ = join(&[data.to_vec()], CommandType::Message);
});
