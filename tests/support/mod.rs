#![allow(dead_code)]

pub mod plates;
