//! Lane animation engine for the swim pacer
//!
//! This library moves light pulses along per-lane LED strips at a pace
//! derived from the configured swim speed, and composites them with
//! countdown indicators and underwater zones into one frame per lane. It is
//! hardware-agnostic: output goes through [`RenderDriver`] and settings
//! persistence through [`SettingsStore`], so everything here can be tested
//! without embedded hardware.

pub use rgb::RGB8;

pub mod change;
pub mod compositor;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod render;
pub mod settings;
pub mod stepper;
pub mod store;
pub mod swimmer;

pub use change::{ConfigChange, Invalidation, Invalidations};
pub use engine::{EngineConfig, EngineStatus, PacerEngine, TickReport};
pub use error::{PacerError, StoreError};
pub use geometry::Geometry;
pub use render::{FrameThrottle, RenderDriver, RenderStats};
pub use settings::{BlendMode, PaceSummary, PacerSettings, UnderwaterSettings, MAX_LANES, MAX_SWIMMERS};
pub use store::{MemoryStore, SettingsStore, SharedSettings};
pub use swimmer::{Direction, Swimmer, SwimmerTable};
