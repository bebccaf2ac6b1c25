//! Scene graph, transforms and cameras
//!
//! A [`Scene`] is a forest of named nodes. World matrices are cached on the
//! nodes and refreshed eagerly whenever a transform changes, so the
//! renderer only reads them.

pub mod camera;
pub mod controller;
pub mod graph;
pub mod light;
pub mod transform;

pub use camera::{Camera, Viewport};
pub use controller::{ControllerInput, FirstPersonController};
pub use graph::{CameraNode, MeshNode, NodeKey, NodeKind, Scene, SceneError, SceneNode, SceneResult};
pub use light::DirectionalLight;
pub use transform::Transform;
