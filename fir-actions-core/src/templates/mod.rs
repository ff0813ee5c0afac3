//! Action-template resolution and rendering.

pub mod render;
pub mod resolver;

pub use render::render_string;
pub use resolver::{
    ActionList, ActionTemplate, NewActionList, NewActionTemplate, TemplateCatalog,
};
