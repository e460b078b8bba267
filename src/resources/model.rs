//! Models: a flat node hierarchy with meshes, materials, skins and animations

use crate::animation::{AnimationClip, AnimationPlayback};
use crate::backend::types::MeshHandle;
use crate::resources::Material;
use crate::scene::{SceneError, SceneResult, Transform};
use glam::Mat4;

/// A mesh drawn with one of the model's materials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Primitive {
    pub mesh: MeshHandle,
    /// Index into [`Model::materials`]
    pub material: usize,
}

/// Node of a model's hierarchy
#[derive(Debug, Clone)]
pub struct ModelNode {
    pub name: String,
    /// Rest transform; animation channels override parts of it
    pub base: Transform,
    /// Current local transform
    pub transform: Transform,
    /// World transform including the owning scene node
    pub world: Mat4,
    pub children: Vec<usize>,
    pub primitives: Vec<Primitive>,
    /// Index into [`Model::skins`]
    pub skin: Option<usize>,
}

impl ModelNode {
    pub fn new(name: &str, transform: Transform) -> Self {
        Self {
            name: name.to_string(),
            base: transform,
            transform,
            world: transform.matrix(),
            children: Vec::new(),
            primitives: Vec::new(),
            skin: None,
        }
    }

    pub fn with_primitive(mut self, mesh: MeshHandle, material: usize) -> Self {
        self.primitives.push(Primitive { mesh, material });
        self
    }

    pub fn with_skin(mut self, skin: usize) -> Self {
        self.skin = Some(skin);
        self
    }
}

/// Joint bound to a model node by index
#[derive(Debug, Clone, Copy)]
pub struct Joint {
    pub node: usize,
    pub inverse_bind: Mat4,
}

/// Joints of one skin and their current matrices
#[derive(Debug, Clone, Default)]
pub struct Skin {
    pub joints: Vec<Joint>,
    joint_matrices: Vec<Mat4>,
}

impl Skin {
    pub fn new(joints: Vec<Joint>) -> Self {
        let joint_matrices = vec![Mat4::IDENTITY; joints.len()];
        Self { joints, joint_matrices }
    }

    /// Joint matrices as of the last [`Model::update_joints`]
    pub fn joint_matrices(&self) -> &[Mat4] {
        &self.joint_matrices
    }
}

/// A renderable model
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    nodes: Vec<ModelNode>,
    roots: Vec<usize>,
    pub materials: Vec<Material>,
    skins: Vec<Skin>,
    animations: Vec<AnimationClip>,
    playback: Option<AnimationPlayback>,
}

impl Model {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            roots: Vec::new(),
            materials: Vec::new(),
            skins: Vec::new(),
            animations: Vec::new(),
            playback: None,
        }
    }

    /// Single-node model drawing one mesh
    pub fn single(name: &str, mesh: MeshHandle, material: Material) -> Self {
        let mut model = Self::new(name);
        let material = model.add_material(material);
        model.nodes.push(ModelNode::new(name, Transform::default()).with_primitive(mesh, material));
        model.roots.push(0);
        model
    }

    pub fn nodes(&self) -> &[ModelNode] {
        &self.nodes
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn skins(&self) -> &[Skin] {
        &self.skins
    }

    pub fn animations(&self) -> &[AnimationClip] {
        &self.animations
    }

    pub fn playback(&self) -> Option<&AnimationPlayback> {
        self.playback.as_ref()
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut ModelNode> {
        self.nodes.get_mut(index)
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    /// Add a node under `parent`, or as a root.
    ///
    /// Children are linked only through this call, so `node.children` must
    /// be empty.
    pub fn add_node(&mut self, node: ModelNode, parent: Option<usize>) -> SceneResult<usize> {
        if !node.children.is_empty() {
            return Err(SceneError::PresetChildren {
                model: self.name.clone(),
                node: node.name,
            });
        }
        if let Some(skin) = node.skin {
            self.check_index(skin, self.skins.len())?;
        }
        for primitive in &node.primitives {
            self.check_index(primitive.material, self.materials.len())?;
        }
        let index = self.nodes.len();
        match parent {
            Some(parent) => {
                self.check_index(parent, self.nodes.len())?;
                self.nodes[parent].children.push(index);
            }
            None => self.roots.push(index),
        }
        self.nodes.push(node);
        Ok(index)
    }

    /// Add a skin; joints may reference any node of the model
    pub fn add_skin(&mut self, skin: Skin) -> SceneResult<usize> {
        for joint in &skin.joints {
            self.check_index(joint.node, self.nodes.len())?;
        }
        self.skins.push(skin);
        Ok(self.skins.len() - 1)
    }

    pub fn add_animation(&mut self, clip: AnimationClip) -> SceneResult<usize> {
        for channel in &clip.channels {
            self.check_index(channel.node, self.nodes.len())?;
        }
        self.animations.push(clip);
        Ok(self.animations.len() - 1)
    }

    fn check_index(&self, index: usize, len: usize) -> SceneResult<()> {
        if index < len {
            Ok(())
        } else {
            Err(SceneError::InvalidIndex {
                model: self.name.clone(),
                index,
                len,
            })
        }
    }

    /// Start playing a clip from its beginning
    pub fn play(&mut self, playback: AnimationPlayback) -> SceneResult<()> {
        self.check_index(playback.clip, self.animations.len())?;
        self.playback = Some(playback);
        Ok(())
    }

    /// Start a looping clip by name
    pub fn play_named(&mut self, name: &str) -> SceneResult<()> {
        let clip = self
            .animations
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| SceneError::UnknownAnimation(name.to_string()))?;
        self.play(AnimationPlayback::new(clip))
    }

    /// Stop playback and return every node to its base transform
    pub fn stop(&mut self) {
        self.playback = None;
        for node in &mut self.nodes {
            node.transform = node.base;
        }
    }

    /// Advance playback and write sampled channels into node transforms
    pub fn animate(&mut self, dt: f32) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        let Some(clip) = self.animations.get(playback.clip) else {
            return;
        };
        playback.advance(dt, clip.duration());
        let time = playback.time;

        for channel in &clip.channels {
            let Some(sample) = channel.sample(time) else {
                continue;
            };
            if let Some(node) = self.nodes.get_mut(channel.node) {
                node.transform = node.base.apply_keyframe(&sample);
            }
        }
    }

    /// Recompute node world transforms below `parent_world`
    pub fn update_world(&mut self, parent_world: Mat4) {
        let mut stack: Vec<(usize, Mat4)> = self.roots.iter().rev().map(|r| (*r, parent_world)).collect();
        while let Some((index, parent)) = stack.pop() {
            let node = &mut self.nodes[index];
            node.world = parent * node.transform.matrix();
            let world = node.world;
            stack.extend(node.children.iter().rev().map(|c| (*c, world)));
        }
    }

    /// Recompute joint matrices from node world transforms
    pub fn update_joints(&mut self) {
        for skin in &mut self.skins {
            skin.joint_matrices = skin
                .joints
                .iter()
                .map(|joint| self.nodes[joint.node].world * joint.inverse_bind)
                .collect();
        }
    }

    /// Visit nodes depth first, parents before children
    pub fn visit(&self, mut f: impl FnMut(&ModelNode)) {
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            f(node);
            stack.extend(node.children.iter().rev());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{AnimationChannel, InterpolationMode, Keyframe};
    use glam::{Quat, Vec3};

    fn arm() -> Model {
        let mut model = Model::new("arm");
        let root = model
            .add_node(ModelNode::new("shoulder", Transform::from_position(Vec3::new(0.0, 1.0, 0.0))), None)
            .unwrap();
        model
            .add_node(ModelNode::new("hand", Transform::from_position(Vec3::new(2.0, 0.0, 0.0))), Some(root))
            .unwrap();
        model
    }

    #[test]
    fn test_world_transforms_compose() {
        let mut model = arm();
        model.update_world(Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)));
        let hand = model.nodes()[1].world.transform_point3(Vec3::ZERO);
        assert!(hand.abs_diff_eq(Vec3::new(2.0, 1.0, 5.0), 1e-5));
    }

    #[test]
    fn test_joint_matrix_is_world_times_inverse_bind() {
        let mut model = arm();
        let inverse_bind = Mat4::from_translation(Vec3::new(-2.0, -1.0, 0.0));
        model
            .add_skin(Skin::new(vec![Joint { node: 1, inverse_bind }]))
            .unwrap();

        model.update_world(Mat4::IDENTITY);
        model.update_joints();
        // bind pose: joint matrix is identity
        assert!(model.skins()[0].joint_matrices()[0].abs_diff_eq(Mat4::IDENTITY, 1e-5));

        model.node_mut(0).unwrap().transform.position.y = 3.0;
        model.update_world(Mat4::IDENTITY);
        model.update_joints();
        let moved = model.skins()[0].joint_matrices()[0].transform_point3(Vec3::ZERO);
        assert!(moved.abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn test_skin_rejects_unknown_node() {
        let mut model = arm();
        let err = model
            .add_skin(Skin::new(vec![Joint {
                node: 7,
                inverse_bind: Mat4::IDENTITY,
            }]))
            .unwrap_err();
        assert!(matches!(err, SceneError::InvalidIndex { index: 7, len: 2, .. }));
    }

    #[test]
    fn test_add_node_rejects_preset_children() {
        let mut model = arm();
        let mut node = ModelNode::new("finger", Transform::default());
        node.children.push(5);
        let err = model.add_node(node, Some(1)).unwrap_err();
        assert!(matches!(err, SceneError::PresetChildren { ref node, .. } if node == "finger"));

        // nothing was linked, so the hierarchy still walks cleanly
        assert_eq!(model.nodes().len(), 2);
        assert!(model.nodes()[1].children.is_empty());
        model.update_world(Mat4::IDENTITY);
        let mut visited = 0;
        model.visit(|_| visited += 1);
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_animation_overrides_only_sampled_channels() {
        let mut model = arm();
        let base_rotation = Quat::from_rotation_z(0.5);
        model.node_mut(1).unwrap().base.rotation = base_rotation;
        let clip = AnimationClip::new(
            "wave",
            vec![AnimationChannel::new(
                1,
                vec![
                    Keyframe::new(0.0).with_translation(Vec3::ZERO),
                    Keyframe::new(1.0).with_translation(Vec3::new(0.0, 4.0, 0.0)),
                ],
                InterpolationMode::Linear,
            )],
        );
        model.add_animation(clip).unwrap();
        model.play_named("wave").unwrap();

        model.animate(0.25);
        let hand = &model.nodes()[1];
        assert!(hand.transform.position.abs_diff_eq(Vec3::new(0.0, 1.0, 0.0), 1e-5));
        assert_eq!(hand.transform.rotation, base_rotation);

        model.stop();
        assert_eq!(model.nodes()[1].transform.position, Vec3::new(2.0, 0.0, 0.0));
    }
}
