#![allow(dead_code)]

pub mod cogni_env;
pub mod people;
