//src/features/mod.rs

pub mod conservation;
pub mod probability;
pub mod score;
pub mod targetscan;
pub mod thermo;

pub use conservation::{ConservationEstimator, MotifPresenceConservation, TreeSource};
pub use thermo::{FoldingEngine, NearestNeighborModel, ViennaExecutables};
