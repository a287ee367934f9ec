mod error;
mod gateway;
mod lsf;
pub mod process;

pub use error::{GatewayError, Result};
pub use gateway::{SchedulerGateway, SchedulerJobState, SubmitRequest};
pub use lsf::LsfGateway;
