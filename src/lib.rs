#![warn(non_snake_case)]

pub mod config;
pub mod expr;
pub mod net;
pub mod options;
pub mod sim;
