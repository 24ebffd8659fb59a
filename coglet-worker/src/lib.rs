//! A queue-driven prediction worker: claims jobs from a stream-based queue,
//! drives a single in-process [`Predictor`], and streams Status Frames back
//! to each job's reply channel.

pub mod config;
pub mod decode;
pub mod driver;
pub mod encode;
pub mod error;
pub mod frame;
pub mod predictor;
pub mod stream;
pub mod telemetry;
pub mod timing;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{DecodeError, DriverError, EncodeError, MessageError, StreamError};
pub use frame::{FrameOutput, FrameStatus, StatusFrame, TimingRecord};
pub use predictor::{BinaryHandle, OutputValue, Predictor, PredictorError};
pub use worker::Worker;
