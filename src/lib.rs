//! smile-sync - Multi-modal synchronization for behavioral neurophysiology sessions
//!
//! smile-sync turns a session's trial records into one time-aligned feature table
//! through a deterministic pipeline: trial loading → state projection →
//! kinematic resampling → spike quality control and binning → inner join on
//! (trial, time bin) with per-trial metadata.
//!
//! ## Modules
//!
//! - **Neural**: Population-level spike filters and per-trial spike count matrices
//! - **Kinematics**: Hand marker gap fill and polyphase resampling onto the grid
//! - **States**: Task state transitions projected onto the grid by forward fill
//! - **Pipeline**: Session composition and the modality join

pub mod config;
pub mod error;
pub mod kinematics;
pub mod loader;
pub mod metadata;
pub mod neural;
pub mod pipeline;
pub mod states;
pub mod trial;
pub mod types;

pub use config::{BinWidth, ExtractConfig, ResampleConfig, ResampleWindow, SpikeFilterConfig};
pub use error::ExtractError;
pub use kinematics::KinematicResampler;
pub use loader::{JsonTrialLoader, TrialCollectionLoader};
pub use metadata::{TaskLabel, TrialMeta, TrialResult};
pub use neural::{SpikeBinner, SpikeExtraction};
pub use pipeline::{compose_session_frame, compose_session_json, join_modalities, SessionComposer};
pub use states::StateProjector;
pub use trial::Trial;
pub use types::{BinnedSpikeMatrix, ContinuousSignal, SessionFrame, SessionRow, StateSeries, UnitIdentity};

/// smile-sync version
pub const SYNC_VERSION: &str = env!("CARGO_PKG_VERSION");
