//! Blocks: blocking measures at a location, tied to incidents.

pub mod machine;
pub mod types;

pub use machine::{
    BLOCK_TRANSITIONS, BlockEdge, BlockTransition, BlockTransitionPlan, Cascade, CascadeScene,
};
pub use types::{
    Block, BlockLocation, BlockRequest, BlockRequestOutcome, BlockState, BlockType,
};
