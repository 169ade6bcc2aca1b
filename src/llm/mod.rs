//! Generative backend client and request/response types.

mod client;
mod types;

pub use client::{generator_from_config, DisabledGenerator, GenerationClient, Generator};
pub use types::*;
