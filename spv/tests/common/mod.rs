#![allow(dead_code)]

pub mod fake_peer;
pub mod helpers;
