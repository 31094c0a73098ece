//! Shared fixtures for nightrate-engine integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;

pub use db_utils::*;
pub use fakes::*;
