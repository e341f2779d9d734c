#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod observability;
pub mod parser;
pub mod store;
pub mod workflow;
