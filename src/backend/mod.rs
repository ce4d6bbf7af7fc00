//! Backend module - Traits and HTTP clients for the image backend and model runtime

pub mod http_backend;
pub mod model_runtime;
pub mod traits;

pub use http_backend::HttpImageBackend;
pub use model_runtime::HttpModelRuntime;
pub use traits::{ImageBackend, ModelRuntime, ProgressReport, Txt2ImgRequest, Txt2ImgResponse};
