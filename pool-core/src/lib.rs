//! Job and share processing core for an Autolykos2 stratum mining pool.
//!
//! The crate turns daemon block-template snapshots into stratum jobs, issues
//! per-client work parameters, and validates submitted shares against both
//! the client's assigned difficulty and the network target. It deliberately
//! stops at the processing seam: no sockets, no daemon RPC, no payment
//! logic. The embedding server supplies templates and client sessions and
//! consumes the manager's event stream.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pool_core::{Autolykos2, BlockTemplate, GenerationSplitter, JobManager, PoolConfig};
//!
//! struct Splitter;
//!
//! impl GenerationSplitter for Splitter {
//!     fn split_generation(
//!         &self,
//!         _template: &BlockTemplate,
//!         _placeholder: &[u8],
//!     ) -> (Vec<u8>, Vec<u8>) {
//!         // Build the coinbase around the extranonce placeholder.
//!         (Vec::new(), Vec::new())
//!     }
//! }
//!
//! let engine = Arc::new(Autolykos2::network());
//! let (mut manager, mut events) =
//!     JobManager::new(PoolConfig::default(), engine, Box::new(Splitter));
//! // Poll the daemon, call manager.handle_template(..), serve
//! // manager.job_parameters(..) to clients, feed manager.handle_share(..).
//! ```

pub mod autolykos;
pub mod client;
pub mod error;
pub mod job;
pub mod manager;
pub mod merkle;
pub mod template;
pub mod tracing;
pub mod u256;

pub use autolykos::Autolykos2;
pub use client::ClientSession;
pub use error::{PowParamsError, ShareError, TemplateError};
pub use job::{Job, JobParams};
pub use manager::{
    ExtraNonceCounter, JobManager, ManagerEvent, PoolConfig, ShareAccepted, ShareKind,
    ShareRecord, ShareSubmission,
};
pub use template::{BlockTemplate, GenerationSplitter, TemplateTransaction};
pub use u256::U256;
