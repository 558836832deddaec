use crate::{
    accel::*, animation::*, device::*, error::*, references::*, resource::*, scene::*, skeleton::*,
};
use std::path::Path;
use strum::{EnumString, EnumVariantNames};
use tracing::{debug, trace};

/// When to re-upload the geometry reference tables after a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumVariantNames)]
#[strum(serialize_all = "kebab_case")]
pub enum ReferenceRefresh {
    /// Upload new tables every frame.
    EveryFrame,
    /// Upload only when the collected buffer addresses differ from the current tables.
    WhenChanged,
}

impl Default for ReferenceRefresh {
    fn default() -> Self {
        Self::EveryFrame
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneAccelParams {
    pub build: BuildParams,
    pub reference_refresh: ReferenceRefresh,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub skinned_mesh_count: usize,
    pub build: BuildStats,
    pub references_uploaded: bool,
}

struct Animation {
    pass: AnimationPass,
    animator: Animator,
}

/// Owns a scene and keeps its acceleration structures and reference tables
/// current, one frame at a time.
pub struct SceneAccel {
    device: SharedDevice,
    params: SceneAccelParams,
    root: Node,
    builder: AccelerationStructureBuilder,
    animation: Option<Animation>,
    references: Option<GeometryReferences>,
    frame: u64,
}

impl SceneAccel {
    pub fn new(device: &SharedDevice, root: Node, params: SceneAccelParams) -> Result<Self> {
        Ok(Self {
            device: SharedDevice::clone(device),
            params,
            builder: AccelerationStructureBuilder::new(device, params.build)?,
            root,
            animation: None,
            references: None,
            frame: 0,
        })
    }

    /// Skins every skinned mesh of the scene with the bones of `animator` each frame.
    pub fn with_animation(mut self, animator: Animator, shader: impl AsRef<Path>) -> Result<Self> {
        let pass = AnimationPass::builder(&self.device)
            .shader(shader)
            .scene(&self.root)
            .build()?;
        self.animation = Some(Animation { pass, animator });
        Ok(self)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn animator_mut(&mut self) -> Option<&mut Animator> {
        self.animation.as_mut().map(|animation| &mut animation.animator)
    }

    pub fn animation_pass(&self) -> Option<&AnimationPass> {
        self.animation.as_ref().map(|animation| &animation.pass)
    }

    /// The structure to trace against, present once a frame has been built from an interior root.
    pub fn top_level(&self) -> Option<&AccelerationStructure> {
        self.root
            .accel
            .as_ref()
            .filter(|accel| accel.level() == AccelerationStructureLevel::TopLevel)
    }

    pub fn references(&self) -> Option<&GeometryReferences> {
        self.references.as_ref()
    }

    /// Runs one frame: skinning, then acceleration structures, then reference tables.
    pub fn update(&mut self, dt: f32) -> Result<FrameStats> {
        let mut skinned_mesh_count = 0;
        if let Some(animation) = self.animation.as_mut() {
            animation.animator.update(dt);
            animation.pass.process(animation.animator.final_bone_matrices())?;
            skinned_mesh_count = animation.pass.mesh_count();
        }

        let build = self.builder.build(&mut self.root)?;

        let collector = GeometryReferenceCollector::collect(&self.root);
        let unchanged = match (self.params.reference_refresh, self.references.as_ref()) {
            (ReferenceRefresh::WhenChanged, Some(current)) => current.addresses() == &collector,
            _ => false,
        };
        if unchanged {
            trace!(frame = self.frame, "geometry references unchanged");
        } else {
            self.references = Some(collector.upload(&self.device)?);
        }

        let stats = FrameStats {
            frame: self.frame,
            skinned_mesh_count,
            build,
            references_uploaded: !unchanged,
        };
        debug!(frame = self.frame, instances = stats.build.instance_count, "frame complete");
        self.frame += 1;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        maths::*,
        mesh::*,
        mock::{self, MockDevice},
    };
    use approx::assert_relative_eq;
    use std::mem;

    fn scene(device: &SharedDevice) -> Node {
        let mut root = Node::new("root");
        root.push_child(Node::skinned_mesh("skinned", mock::skinned_quad(device, "skinned")))
            .unwrap();
        root.push_child(Node::mesh("static", mock::triangle(device, "static"))).unwrap();
        root
    }

    fn animator() -> Animator {
        let skeleton = Skeleton::new(vec![
            Bone::new("base", None, BonePose::default()),
            Bone::new("tip", Some(0), BonePose::from_translation(Vec3::unit_y())),
        ])
        .unwrap()
        .bind_at_rest();
        Animator::new(skeleton)
    }

    #[test]
    fn frame_skins_builds_and_collects() {
        let (mock, device) = MockDevice::shared();
        let mut scene_accel = SceneAccel::new(&device, scene(&device), SceneAccelParams::default())
            .unwrap()
            .with_animation(animator(), "skin.comp.spv")
            .unwrap();
        assert!(scene_accel.top_level().is_none());

        let stats = scene_accel.update(1.0 / 60.0).unwrap();
        assert_eq!(stats.frame, 0);
        assert_eq!(stats.skinned_mesh_count, 1);
        assert_eq!(stats.build.bottom_level_count, 2);
        assert_eq!(stats.build.top_level_count, 1);
        assert!(stats.references_uploaded);
        assert_eq!(mock.dispatches().len(), 1);

        let top_level = scene_accel.top_level().unwrap();
        assert_eq!(top_level.level(), AccelerationStructureLevel::TopLevel);
        assert_eq!(scene_accel.references().unwrap().count(), 2);
        assert_eq!(scene_accel.animation_pass().unwrap().bone_capacity(), 2);
    }

    #[test]
    fn skinning_lands_before_the_rebuild() {
        let (mock, device) = MockDevice::shared();
        mock.set_kernel(mock::cpu_skinning());
        let mut track = BoneTrack::new(1);
        track.translations = vec![Keyframe::new(0.0, Vec3::new(0.0, 1.0, 1.0))];
        let mut animator = animator();
        animator
            .play(AnimationClip::new("lift", vec![track]), PlaybackMode::Clamp)
            .unwrap();
        let mut scene_accel = SceneAccel::new(&device, scene(&device), SceneAccelParams::default())
            .unwrap()
            .with_animation(animator, "skin.comp.spv")
            .unwrap();
        scene_accel.update(0.0).unwrap();

        let skinned = &scene_accel.root().children()[0];
        let record = mock.build_record(skinned.accel.as_ref().unwrap().id()).unwrap();
        assert!(mock.dispatch_ticks().iter().all(|&tick| tick < record.tick));

        let vertices: Vec<Vertex> = record
            .vertices
            .chunks_exact(mem::size_of::<Vertex>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_relative_eq!(vertices[0].position.z, 0.0, epsilon = 1.0e-5);
        assert_relative_eq!(vertices[2].position.z, 0.5, epsilon = 1.0e-5);
        assert_relative_eq!(vertices[3].position.z, 1.0, epsilon = 1.0e-5);
    }

    #[test]
    fn leaf_root_has_no_top_level() {
        let (_mock, device) = MockDevice::shared();
        let root = Node::mesh("lonely", mock::triangle(&device, "lonely"));
        let mut scene_accel = SceneAccel::new(&device, root, SceneAccelParams::default()).unwrap();
        scene_accel.update(0.0).unwrap();
        assert!(scene_accel.root().accel.is_some());
        assert!(scene_accel.top_level().is_none());
    }

    #[test]
    fn references_refresh_every_frame_by_default() {
        let (mock, device) = MockDevice::shared();
        let mut scene_accel = SceneAccel::new(&device, scene(&device), SceneAccelParams::default()).unwrap();
        scene_accel.update(0.0).unwrap();
        let table = scene_accel.references().unwrap().table.id();
        let stats = scene_accel.update(0.0).unwrap();
        assert!(stats.references_uploaded);
        assert_ne!(scene_accel.references().unwrap().table.id(), table);
        assert_eq!(stats.frame, 1);
        assert!(mock.dispatches().is_empty());
    }

    #[test]
    fn unchanged_references_can_be_kept() {
        let (_mock, device) = MockDevice::shared();
        let params = SceneAccelParams {
            reference_refresh: ReferenceRefresh::WhenChanged,
            ..Default::default()
        };
        let mut scene_accel = SceneAccel::new(&device, scene(&device), params)
            .unwrap()
            .with_animation(animator(), "skin.comp.spv")
            .unwrap();
        assert!(scene_accel.update(0.1).unwrap().references_uploaded);
        let table = scene_accel.references().unwrap().table.id();
        let stats = scene_accel.update(0.1).unwrap();
        assert!(!stats.references_uploaded);
        assert_eq!(scene_accel.references().unwrap().table.id(), table);
    }

    #[test]
    fn refresh_parses_from_kebab_case() {
        use std::str::FromStr;
        assert_eq!(
            ReferenceRefresh::from_str("when-changed").unwrap(),
            ReferenceRefresh::WhenChanged
        );
    }
}
