//! Scene graph
//!
//! Nodes live in an arena owned by the [`Scene`]. Each node exclusively owns
//! its children; the parent link is a plain back-reference used for transform
//! composition. Components are a closed set of variants visited with `match`.

mod camera;
mod component;
mod environment;
mod light;
mod particles;
mod transform;

pub use camera::*;
pub use component::*;
pub use environment::*;
pub use light::*;
pub use particles::*;
pub use transform::*;

use glam::Mat4;
use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

new_key_type! {
    /// Handle to a scene node
    pub struct NodeId;
}

/// Scene error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("Node {0:?} does not exist")]
    NodeNotFound(NodeId),
    #[error("Attaching {node:?} under {parent:?} would create a cycle")]
    CycleDetected { node: NodeId, parent: NodeId },
    #[error("The root node cannot be removed or reparented")]
    RootNode,
    #[error("Model '{model}': index {index} out of range (len {len})")]
    InvalidIndex { model: String, index: usize, len: usize },
    #[error("Model '{model}': node '{node}' already lists children, link them through their parent instead")]
    PresetChildren { model: String, node: String },
    #[error("Unknown animation '{0}'")]
    UnknownAnimation(String),
}

pub type SceneResult<T> = Result<T, SceneError>;

/// A scene graph node
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    world: Mat4,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    components: Vec<Component>,
}

impl Node {
    fn new(name: &str, transform: Transform, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            transform,
            world: transform.matrix(),
            parent,
            children: Vec::new(),
            components: Vec::new(),
        }
    }

    /// World transform as of the last propagation
    pub fn world(&self) -> Mat4 {
        self.world
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [Component] {
        &mut self.components
    }
}

/// The scene graph
pub struct Scene {
    nodes: SlotMap<NodeId, Node>,
    root: NodeId,
}

impl Scene {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new("root", Transform::default(), None));
        Self { nodes, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Create a node as the last child of `parent`
    pub fn add_node(&mut self, name: &str, transform: Transform, parent: NodeId) -> SceneResult<NodeId> {
        if !self.nodes.contains_key(parent) {
            return Err(SceneError::NodeNotFound(parent));
        }
        let id = self.nodes.insert(Node::new(name, transform, Some(parent)));
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Create a node under the root
    pub fn spawn(&mut self, name: &str, transform: Transform) -> NodeId {
        let id = self.nodes.insert(Node::new(name, transform, Some(self.root)));
        self.nodes[self.root].children.push(id);
        id
    }

    pub fn add_component(&mut self, id: NodeId, component: impl Into<Component>) -> SceneResult<()> {
        let node = self.nodes.get_mut(id).ok_or(SceneError::NodeNotFound(id))?;
        node.components.push(component.into());
        Ok(())
    }

    /// Move `node` with its subtree under `parent`
    pub fn reparent(&mut self, node: NodeId, parent: NodeId) -> SceneResult<()> {
        if node == self.root {
            return Err(SceneError::RootNode);
        }
        for id in [node, parent] {
            if !self.nodes.contains_key(id) {
                return Err(SceneError::NodeNotFound(id));
            }
        }
        if self.is_ancestor_or_self(node, parent) {
            return Err(SceneError::CycleDetected { node, parent });
        }

        self.detach(node);
        self.nodes[node].parent = Some(parent);
        self.nodes[parent].children.push(node);
        Ok(())
    }

    /// Remove `node` and every node it owns; returns the number removed
    pub fn remove_node(&mut self, node: NodeId) -> SceneResult<usize> {
        if node == self.root {
            return Err(SceneError::RootNode);
        }
        if !self.nodes.contains_key(node) {
            return Err(SceneError::NodeNotFound(node));
        }
        self.detach(node);

        let mut removed = 0;
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(removed_node) = self.nodes.remove(id) {
                stack.extend(removed_node.children);
                removed += 1;
            }
        }
        log::trace!("Scene: removed {} nodes", removed);
        Ok(removed)
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node].parent.take() {
            if let Some(parent) = self.nodes.get_mut(parent) {
                parent.children.retain(|child| *child != node);
            }
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Visit every node depth first, parents before children, children in order
    pub fn traverse<'s>(&'s self, mut f: impl FnMut(NodeId, &'s Node)) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            f(id, node);
            stack.extend(node.children.iter().rev());
        }
    }

    /// Recompute world transforms top-down and write derived data back into
    /// components (light directions, camera views, model joints)
    pub fn propagate_transforms(&mut self) {
        let mut stack = vec![(self.root, Mat4::IDENTITY)];
        while let Some((id, parent_world)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            node.world = match node.parent {
                Some(_) => parent_world * node.transform.matrix(),
                None => node.transform.matrix(),
            };
            let world = node.world;
            for component in &mut node.components {
                component.update_from_world(world);
            }
            stack.extend(node.children.iter().rev().map(|child| (*child, world)));
        }
    }

    /// Advance animations by `dt` seconds, then propagate transforms
    pub fn update(&mut self, dt: f32) {
        for node in self.nodes.values_mut() {
            for component in &mut node.components {
                component.animate(dt);
            }
        }
        self.propagate_transforms();
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn names(scene: &Scene) -> Vec<String> {
        let mut out = Vec::new();
        scene.traverse(|_, node| out.push(node.name.clone()));
        out
    }

    #[test]
    fn test_traversal_is_preorder() {
        let mut scene = Scene::new();
        let a = scene.spawn("a", Transform::default());
        scene.add_node("a1", Transform::default(), a).unwrap();
        scene.add_node("a2", Transform::default(), a).unwrap();
        scene.spawn("b", Transform::default());
        assert_eq!(names(&scene), ["root", "a", "a1", "a2", "b"]);
    }

    #[test]
    fn test_world_composes_parent() {
        let mut scene = Scene::new();
        let parent = scene.spawn("parent", Transform::from_position(Vec3::new(1.0, 0.0, 0.0)));
        let child = scene
            .add_node("child", Transform::from_position(Vec3::new(0.0, 2.0, 0.0)), parent)
            .unwrap();
        scene.propagate_transforms();
        let position = scene.node(child).unwrap().world().transform_point3(Vec3::ZERO);
        assert_eq!(position, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_reparent_rejects_cycles() {
        let mut scene = Scene::new();
        let a = scene.spawn("a", Transform::default());
        let b = scene.add_node("b", Transform::default(), a).unwrap();
        assert_eq!(scene.reparent(a, b), Err(SceneError::CycleDetected { node: a, parent: b }));
        assert_eq!(scene.reparent(a, a), Err(SceneError::CycleDetected { node: a, parent: a }));
        assert_eq!(scene.reparent(scene.root(), a), Err(SceneError::RootNode));

        let c = scene.spawn("c", Transform::default());
        scene.reparent(b, c).unwrap();
        assert!(scene.node(a).unwrap().children().is_empty());
        assert_eq!(scene.node(b).unwrap().parent(), Some(c));
    }

    #[test]
    fn test_remove_drops_subtree() {
        let mut scene = Scene::new();
        let a = scene.spawn("a", Transform::default());
        let b = scene.add_node("b", Transform::default(), a).unwrap();
        scene.add_node("c", Transform::default(), b).unwrap();
        assert_eq!(scene.remove_node(a), Ok(3));
        assert_eq!(scene.len(), 1);
        assert!(scene.node(b).is_none());
        assert!(scene.node(scene.root()).unwrap().children().is_empty());
    }

    #[test]
    fn test_update_writes_back_light_direction() {
        let mut scene = Scene::new();
        let sun = scene.spawn(
            "sun",
            Transform::default().looking_at(Vec3::new(0.0, -1.0, 0.0), Vec3::Z),
        );
        scene.add_component(sun, DirectionalLight::default()).unwrap();
        scene.update(0.016);

        let Component::DirectionalLight(light) = &scene.node(sun).unwrap().components()[0] else {
            panic!("expected a directional light");
        };
        assert!(light.direction.abs_diff_eq(-Vec3::Y, 1e-5));
    }
}
