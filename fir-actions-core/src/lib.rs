//! # FIR Actions Core
//!
//! Workflow engine for incident remediation: actions assigned to business
//! lines, blocking measures at network locations, the cascades between the
//! two, action templates instantiated on new incidents and indicator
//! extraction from block targets.

pub mod action;
pub mod artifacts;
pub mod block;
pub mod business_line;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fixtures;
pub mod hooks;
pub mod incident;
pub mod permissions;
pub mod persistence;
pub mod store;
pub mod templates;
pub mod types;

pub use action::{
    Action, ActionComment, ActionState, ActionTransition, ActionTransitionOutcome,
    ActionTransitionRequest, ActionType, NewAction,
};
pub use artifacts::{Artifact, ArtifactCorrelator, ArtifactKind};
pub use block::{
    Block, BlockLocation, BlockRequest, BlockRequestOutcome, BlockState, BlockTransition,
    BlockType,
};
pub use business_line::{BusinessLine, BusinessLineTree};
pub use config::{FirConfig, load_config};
pub use engine::{BlockTransitionReport, Engine, IncidentCreated};
pub use error::{ErrorKind, FirError, Result, TransitionError};
pub use events::{ActionEvent, EventBus};
pub use fixtures::{Fixture, FixtureReport};
pub use hooks::{LifecycleEvent, LifecycleHook, TracingHook};
pub use incident::{Incident, NewIncident};
pub use permissions::{Grant, Permission, PermissionOracle, TreeAuthorization, User};
pub use store::{ActionFilter, BlockFilter, Store};
pub use types::{
    ActionId, BlockId, BlockLocationId, BlockTypeId, BusinessLineId, EntityRef, IncidentId,
    Status,
};
