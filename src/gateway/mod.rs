//! Gateway module - Circuit breaking, GPU arbitration, and the image client

pub mod circuit_breaker;
pub mod gpu_arbiter;
pub mod image_client;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use gpu_arbiter::{GpuArbiter, GpuOccupant, GpuStatus};
pub use image_client::{ImageClient, RetryPolicy};
