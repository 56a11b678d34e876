#![allow(dead_code)]

pub mod mocks;

use copilot::Principal;

pub fn principal() -> Principal {
    Principal::new("u-17", "acme").with_role("erp-admin")
}
