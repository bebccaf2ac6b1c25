//! Scene graph
//!
//! Nodes live in a generational arena owned by the [`Scene`]; parent/child
//! links are [`NodeKey`]s into that arena. Mesh and camera nodes are also
//! indexed by name in two insertion-ordered tables. The renderer walks the
//! mesh table, so draw order is insertion order, not tree order.
//!
//! World matrices are cached per node and recomputed eagerly, depth-first,
//! for the whole subtree of any node whose transform changes.

use std::collections::HashMap;
use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};

use crate::foundation::math::{Mat4, Vec3};
use crate::render::material::Material;
use crate::render::mesh::Mesh;
use crate::scene::camera::{Camera, Viewport};
use crate::scene::transform::Transform;

new_key_type! {
    /// Stable handle to a node of a [`Scene`]
    pub struct NodeKey;
}

/// Scene graph errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// The key does not refer to a live node of this scene
    #[error("Node {0:?} does not exist in this scene")]
    NodeNotFound(NodeKey),

    /// The node exists but is of another kind
    #[error("Node '{name}' is not a {expected} node")]
    WrongNodeKind {
        /// Name of the node
        name: String,
        /// Kind the operation needs
        expected: &'static str,
    },

    /// A parent's world matrix has no inverse (zero scale)
    #[error("World matrix of '{name}' is singular")]
    SingularTransform {
        /// Name of the node
        name: String,
    },
}

/// Result type for scene graph operations
pub type SceneResult<T> = Result<T, SceneError>;

/// Payload of a mesh node
#[derive(Debug, Clone, Default)]
pub struct MeshNode {
    /// Geometry to draw; nodes without a mesh are skipped
    pub mesh: Option<Arc<Mesh>>,
    /// Material override; `None` draws with the engine default
    pub material: Option<Arc<Material>>,
}

/// Payload of a camera node
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraNode {
    /// Projection parameters
    pub camera: Camera,
    /// Target rectangle this camera renders into
    pub viewport: Viewport,
}

/// Variant data of a node
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Entry point with no payload
    Root,
    /// Drawable geometry
    Mesh(MeshNode),
    /// Point of view
    Camera(CameraNode),
}

impl NodeKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Mesh(_) => "mesh",
            Self::Camera(_) => "camera",
        }
    }
}

/// A node of the scene graph
#[derive(Debug, Clone)]
pub struct SceneNode {
    name: String,
    transform: Transform,
    world: Mat4,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
    kind: NodeKind,
}

impl SceneNode {
    /// Lookup name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local transform relative to the parent
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Cached `parent world · local` matrix
    pub fn world_matrix(&self) -> Mat4 {
        self.world
    }

    /// Parent node, `None` for roots
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    /// Variant payload
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Mesh payload, if this is a mesh node
    pub fn as_mesh(&self) -> Option<&MeshNode> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Camera payload, if this is a camera node
    pub fn as_camera(&self) -> Option<&CameraNode> {
        match &self.kind {
            NodeKind::Camera(camera) => Some(camera),
            _ => None,
        }
    }
}

/// Name → key table that remembers insertion order
#[derive(Debug, Default)]
struct NodeTable {
    entries: Vec<(String, NodeKey)>,
    index: HashMap<String, usize>,
}

impl NodeTable {
    /// Insert or replace. A replaced entry keeps its position.
    fn insert(&mut self, name: &str, key: NodeKey) -> Option<NodeKey> {
        if let Some(&slot) = self.index.get(name) {
            let previous = std::mem::replace(&mut self.entries[slot].1, key);
            return Some(previous);
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push((name.to_string(), key));
        None
    }

    fn get(&self, name: &str) -> Option<NodeKey> {
        self.index.get(name).map(|&slot| self.entries[slot].1)
    }

    fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.entries.iter().map(|(_, key)| *key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Arena of scene nodes plus name tables for mesh and camera lookup
#[derive(Debug, Default)]
pub struct Scene {
    nodes: SlotMap<NodeKey, SceneNode>,
    roots: Vec<NodeKey>,
    meshes: NodeTable,
    cameras: NodeTable,
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached root node
    pub fn create_root(&mut self, name: impl Into<String>, transform: Transform) -> NodeKey {
        let key = self.nodes.insert(SceneNode {
            name: name.into(),
            transform,
            world: transform.world_matrix(),
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Root,
        });
        self.roots.push(key);
        key
    }

    /// Attach a mesh node under `parent`
    ///
    /// Reusing a name replaces the table entry; the previous node stays in
    /// the arena and in its parent's child list.
    pub fn add_mesh(
        &mut self,
        parent: NodeKey,
        name: impl Into<String>,
        mesh: Option<Arc<Mesh>>,
        transform: Transform,
        material: Option<Arc<Material>>,
    ) -> SceneResult<NodeKey> {
        let kind = NodeKind::Mesh(MeshNode { mesh, material });
        let key = self.attach(parent, name.into(), transform, kind)?;

        let name = &self.nodes[key].name;
        if let Some(previous) = self.meshes.insert(name, key) {
            log::warn!("Mesh node '{name}' replaced {previous:?} in the lookup table");
        }
        Ok(key)
    }

    /// Attach a camera node under `parent`
    pub fn add_camera(
        &mut self,
        parent: NodeKey,
        name: impl Into<String>,
        camera: Camera,
        transform: Transform,
        viewport: Viewport,
    ) -> SceneResult<NodeKey> {
        let kind = NodeKind::Camera(CameraNode { camera, viewport });
        let key = self.attach(parent, name.into(), transform, kind)?;

        let name = &self.nodes[key].name;
        if let Some(previous) = self.cameras.insert(name, key) {
            log::warn!("Camera node '{name}' replaced {previous:?} in the lookup table");
        }
        Ok(key)
    }

    fn attach(&mut self, parent: NodeKey, name: String, transform: Transform, kind: NodeKind) -> SceneResult<NodeKey> {
        let parent_world = self.get(parent)?.world;

        let key = self.nodes.insert(SceneNode {
            name,
            transform,
            world: Mat4::identity(),
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent].children.push(key);
        self.propagate(key, parent_world);

        log::trace!("Attached {} node '{}' under {parent:?}", self.nodes[key].kind.label(), self.nodes[key].name);
        Ok(key)
    }

    /// Replace a node's local transform and refresh its subtree
    pub fn update_transform(&mut self, key: NodeKey, transform: Transform) -> SceneResult<()> {
        let node = self.get_mut(key)?;
        node.transform = transform;
        let parent_world = self.parent_world(key);
        self.propagate(key, parent_world);
        Ok(())
    }

    /// Replace only the position
    pub fn update_position(&mut self, key: NodeKey, position: Vec3) -> SceneResult<()> {
        let transform = Transform {
            position,
            ..*self.get(key)?.transform()
        };
        self.update_transform(key, transform)
    }

    /// Move by `delta` in parent space
    pub fn translate(&mut self, key: NodeKey, delta: Vec3) -> SceneResult<()> {
        let mut transform = *self.get(key)?.transform();
        transform.position += delta;
        self.update_transform(key, transform)
    }

    /// Add to the Euler angles
    pub fn rotate(&mut self, key: NodeKey, yaw: f32, pitch: f32, roll: f32) -> SceneResult<()> {
        let mut transform = *self.get(key)?.transform();
        transform.yaw += yaw;
        transform.pitch += pitch;
        transform.roll += roll;
        self.update_transform(key, transform)
    }

    /// Swap the geometry of a mesh node
    pub fn set_mesh(&mut self, key: NodeKey, mesh: Option<Arc<Mesh>>) -> SceneResult<()> {
        self.mesh_node_mut(key)?.mesh = mesh;
        Ok(())
    }

    /// Swap the material of a mesh node
    pub fn set_material(&mut self, key: NodeKey, material: Option<Arc<Material>>) -> SceneResult<()> {
        self.mesh_node_mut(key)?.material = material;
        Ok(())
    }

    /// Change a camera's projection parameters
    pub fn set_camera(&mut self, key: NodeKey, camera: Camera) -> SceneResult<()> {
        self.camera_node_mut(key)?.camera = camera;
        Ok(())
    }

    /// Change the rectangle a camera renders into
    pub fn set_viewport(&mut self, key: NodeKey, viewport: Viewport) -> SceneResult<()> {
        self.camera_node_mut(key)?.viewport = viewport;
        Ok(())
    }

    /// Look up a mesh node by name
    pub fn get_mesh(&self, name: &str) -> Option<NodeKey> {
        self.meshes.get(name)
    }

    /// Look up a camera node by name
    pub fn get_camera(&self, name: &str) -> Option<NodeKey> {
        self.cameras.get(name)
    }

    /// Borrow a node
    pub fn node(&self, key: NodeKey) -> SceneResult<&SceneNode> {
        self.get(key)
    }

    /// Cached world matrix of a node
    pub fn world_matrix(&self, key: NodeKey) -> SceneResult<Mat4> {
        Ok(self.get(key)?.world)
    }

    /// Children of a node in insertion order
    pub fn children(&self, key: NodeKey) -> SceneResult<&[NodeKey]> {
        Ok(&self.get(key)?.children)
    }

    /// Parent of a node
    pub fn parent(&self, key: NodeKey) -> SceneResult<Option<NodeKey>> {
        Ok(self.get(key)?.parent)
    }

    /// Roots in creation order
    pub fn roots(&self) -> &[NodeKey] {
        &self.roots
    }

    /// Mesh nodes in table order
    pub fn meshes(&self) -> impl Iterator<Item = (NodeKey, &SceneNode)> + '_ {
        self.meshes
            .keys()
            .filter_map(move |key| self.nodes.get(key).map(|node| (key, node)))
    }

    /// Camera nodes in table order
    pub fn cameras(&self) -> impl Iterator<Item = (NodeKey, &SceneNode)> + '_ {
        self.cameras
            .keys()
            .filter_map(move |key| self.nodes.get(key).map(|node| (key, node)))
    }

    /// Number of entries in the mesh table
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Total number of nodes, including ones shadowed in the name tables
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// View matrix of a camera node
    ///
    /// The camera's local view matrix composed with the inverse of its
    /// parent's world matrix.
    pub fn view_matrix(&self, camera: NodeKey) -> SceneResult<Mat4> {
        let node = self.get(camera)?;
        if node.as_camera().is_none() {
            return Err(SceneError::WrongNodeKind {
                name: node.name.clone(),
                expected: "camera",
            });
        }

        let local = node.transform.view_matrix();
        match node.parent {
            None => Ok(local),
            Some(parent) => {
                let parent = self.get(parent)?;
                let inverse = parent.world.try_inverse().ok_or_else(|| SceneError::SingularTransform {
                    name: parent.name.clone(),
                })?;
                Ok(local * inverse)
            }
        }
    }

    fn get(&self, key: NodeKey) -> SceneResult<&SceneNode> {
        self.nodes.get(key).ok_or(SceneError::NodeNotFound(key))
    }

    fn get_mut(&mut self, key: NodeKey) -> SceneResult<&mut SceneNode> {
        self.nodes.get_mut(key).ok_or(SceneError::NodeNotFound(key))
    }

    fn mesh_node_mut(&mut self, key: NodeKey) -> SceneResult<&mut MeshNode> {
        let node = self.get_mut(key)?;
        match &mut node.kind {
            NodeKind::Mesh(mesh) => Ok(mesh),
            _ => Err(SceneError::WrongNodeKind {
                name: node.name.clone(),
                expected: "mesh",
            }),
        }
    }

    fn camera_node_mut(&mut self, key: NodeKey) -> SceneResult<&mut CameraNode> {
        let node = self.get_mut(key)?;
        match &mut node.kind {
            NodeKind::Camera(camera) => Ok(camera),
            _ => Err(SceneError::WrongNodeKind {
                name: node.name.clone(),
                expected: "camera",
            }),
        }
    }

    fn parent_world(&self, key: NodeKey) -> Mat4 {
        self.nodes[key]
            .parent
            .and_then(|parent| self.nodes.get(parent))
            .map_or_else(Mat4::identity, |parent| parent.world)
    }

    fn propagate(&mut self, key: NodeKey, parent_world: Mat4) {
        let node = &mut self.nodes[key];
        node.world = parent_world * node.transform.world_matrix();
        let world = node.world;

        for i in 0..self.nodes[key].children.len() {
            let child = self.nodes[key].children[i];
            self.propagate(child, world);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    fn offset(x: f32, y: f32, z: f32) -> Transform {
        Transform::from_position(Vec3::new(x, y, z))
    }

    #[test]
    fn test_child_world_is_parent_world_times_local() {
        let mut scene = Scene::new();
        let root = scene.create_root("root", offset(1.0, 0.0, 0.0).with_rotation(0.3, 0.0, 0.0));
        let child = scene.add_mesh(root, "child", None, offset(0.0, 2.0, 0.0).with_scale(2.0), None).unwrap();

        let expected = scene.node(root).unwrap().transform().world_matrix()
            * scene.node(child).unwrap().transform().world_matrix();
        assert_relative_eq!(scene.world_matrix(child).unwrap(), expected, epsilon = 1e-6);
    }

    #[test]
    fn test_update_transform_refreshes_descendants() {
        let mut scene = Scene::new();
        let root = scene.create_root("root", Transform::default());
        let a = scene.add_mesh(root, "a", None, offset(1.0, 0.0, 0.0), None).unwrap();
        let b = scene.add_mesh(a, "b", None, offset(0.0, 1.0, 0.0), None).unwrap();

        scene.update_transform(root, offset(0.0, 0.0, 5.0)).unwrap();

        let origin = scene.world_matrix(b).unwrap() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin.xyz(), Vec3::new(1.0, 1.0, 5.0), epsilon = 1e-6);
    }

    #[test]
    fn test_update_transform_on_child_keeps_parent_contribution() {
        let mut scene = Scene::new();
        let root = scene.create_root("root", offset(0.0, 3.0, 0.0));
        let child = scene.add_mesh(root, "child", None, Transform::default(), None).unwrap();

        scene.update_position(child, Vec3::new(1.0, 0.0, 0.0)).unwrap();

        let origin = scene.world_matrix(child).unwrap() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin.xyz(), Vec3::new(1.0, 3.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_same_name_replaces_table_entry_in_place() {
        let mut scene = Scene::new();
        let root = scene.create_root("root", Transform::default());
        let first = scene.add_mesh(root, "Brick", None, Transform::default(), None).unwrap();
        scene.add_mesh(root, "Floor", None, Transform::default(), None).unwrap();
        let second = scene.add_mesh(root, "Brick", None, Transform::default(), None).unwrap();

        assert_eq!(scene.get_mesh("Brick"), Some(second));
        assert_eq!(scene.children(root).unwrap(), &[first, scene.get_mesh("Floor").unwrap(), second]);

        let order: Vec<&str> = scene.meshes().map(|(_, node)| node.name()).collect();
        assert_eq!(order, ["Brick", "Floor"]);
        assert_eq!(scene.meshes().next().map(|(key, _)| key), Some(second));
        assert_eq!(scene.node_count(), 4);
    }

    #[test]
    fn test_mesh_and_camera_tables_are_separate() {
        let mut scene = Scene::new();
        let root = scene.create_root("root", Transform::default());
        let mesh = scene.add_mesh(root, "thing", None, Transform::default(), None).unwrap();
        let camera = scene
            .add_camera(root, "thing", Camera::default(), Transform::default(), Viewport::FULL)
            .unwrap();

        assert_eq!(scene.get_mesh("thing"), Some(mesh));
        assert_eq!(scene.get_camera("thing"), Some(camera));
        assert_eq!(scene.get_mesh("missing"), None);
    }

    #[test]
    fn test_wrong_kind_and_missing_nodes_are_errors() {
        let mut scene = Scene::new();
        let root = scene.create_root("root", Transform::default());
        let mesh = scene.add_mesh(root, "m", None, Transform::default(), None).unwrap();

        assert!(matches!(
            scene.set_viewport(mesh, Viewport::FULL),
            Err(SceneError::WrongNodeKind { expected: "camera", .. })
        ));
        assert!(matches!(scene.view_matrix(mesh), Err(SceneError::WrongNodeKind { .. })));

        let other = Scene::new().create_root("elsewhere", Transform::default());
        let mut empty = Scene::new();
        assert_eq!(empty.translate(other, Vec3::x()), Err(SceneError::NodeNotFound(other)));
    }

    #[test]
    fn test_camera_view_accounts_for_parent() {
        let mut scene = Scene::new();
        let root = scene.create_root("root", offset(0.0, 0.0, 4.0));
        let camera = scene
            .add_camera(root, "main", Camera::default(), offset(0.0, 0.0, 1.0), Viewport::FULL)
            .unwrap();

        // camera sits at world z = 5, looking down -Z
        let target = scene.view_matrix(camera).unwrap() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(target.xyz(), Vec3::new(0.0, 0.0, -5.0), epsilon = 1e-5);
    }

    #[test]
    fn test_camera_under_identity_root_uses_local_view() {
        let mut scene = Scene::new();
        let root = scene.create_root("root", Transform::default());
        let transform = offset(0.5, 1.0, 2.0).with_rotation(0.4, -0.2, 0.0);
        let camera = scene
            .add_camera(root, "main", Camera::default(), transform, Viewport::FULL)
            .unwrap();

        assert_relative_eq!(scene.view_matrix(camera).unwrap(), transform.view_matrix(), epsilon = 1e-6);
    }
}
