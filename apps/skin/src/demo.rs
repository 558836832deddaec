use canopy::prelude::*;
use std::f32::consts::PI;

pub struct Scene {
    pub root: Node,
    pub animator: Animator,
}

const TUBE_RADIUS: f32 = 0.2;
const TUBE_HEIGHT: f32 = 2.0;
const TUBE_RINGS: u32 = 16;
const TUBE_SEGMENTS: u32 = 12;

fn ground(device: &SharedDevice) -> Result<MeshData> {
    let normal = Vec3::unit_y();
    let vertices = [
        Vertex::new(Vec3::new(-5.0, 0.0, -5.0), normal, Vec2::new(0.0, 0.0)),
        Vertex::new(Vec3::new(-5.0, 0.0, 5.0), normal, Vec2::new(0.0, 1.0)),
        Vertex::new(Vec3::new(5.0, 0.0, 5.0), normal, Vec2::new(1.0, 1.0)),
        Vertex::new(Vec3::new(5.0, 0.0, -5.0), normal, Vec2::new(1.0, 0.0)),
    ];
    MeshData::new(device, "ground", &vertices, &[0, 1, 2, 0, 2, 3])
}

fn cube(device: &SharedDevice, name: &str) -> Result<MeshData> {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for axis in 0..3 {
        for &sign in &[-1.0f32, 1.0] {
            let mut normal = [0.0; 3];
            normal[axis] = sign;
            let mut u = [0.0; 3];
            u[(axis + 1) % 3] = 1.0;
            let (normal, u) = (Vec3::from(normal), Vec3::from(u));
            let v = normal.cross(u);
            let base = vertices.len() as u32;
            for &(s, t) in &[(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let position = (normal + u * s + v * t) * 0.5;
                vertices.push(Vertex::new(position, normal, Vec2::new(0.5 * (s + 1.0), 0.5 * (t + 1.0))));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
    }
    MeshData::new(device, name, &vertices, &indices)
}

/// An open cylinder along y, blended from the base bone to the tip bone over its middle half.
fn tube(device: &SharedDevice) -> Result<SkinnedMeshData> {
    let mut vertices = Vec::new();
    let mut skinning = Vec::new();
    for ring in 0..=TUBE_RINGS {
        let t = ring as f32 / TUBE_RINGS as f32;
        let y = t * TUBE_HEIGHT;
        let tip_weight = (y - 0.5).max(0.0).min(1.0);
        for segment in 0..=TUBE_SEGMENTS {
            let s = segment as f32 / TUBE_SEGMENTS as f32;
            let (sin, cos) = (2.0 * PI * s).sin_cos();
            let normal = Vec3::new(cos, 0.0, sin);
            vertices.push(Vertex::new(
                Vec3::new(TUBE_RADIUS * cos, y, TUBE_RADIUS * sin),
                normal,
                Vec2::new(s, t),
            ));
            skinning.push(if tip_weight == 0.0 {
                SkinningData::single(0)
            } else if tip_weight == 1.0 {
                SkinningData::single(1)
            } else {
                SkinningData::new(&[(0, 1.0 - tip_weight), (1, tip_weight)])?
            });
        }
    }

    let stride = TUBE_SEGMENTS + 1;
    let mut indices = Vec::new();
    for ring in 0..TUBE_RINGS {
        for segment in 0..TUBE_SEGMENTS {
            let i0 = ring * stride + segment;
            let i1 = i0 + 1;
            let i2 = i0 + stride;
            let i3 = i2 + 1;
            indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
        }
    }
    SkinnedMeshData::new(device, "tube", &vertices, &skinning, &indices)
}

fn bend_clip() -> AnimationClip {
    let mut track = BoneTrack::new(1);
    track.rotations = vec![
        Keyframe::new(0.0, Rotor3::identity()),
        Keyframe::new(1.0, Rotor3::from_rotation_xy(0.9)),
        Keyframe::new(2.0, Rotor3::identity()),
        Keyframe::new(3.0, Rotor3::from_rotation_xy(-0.9)),
        Keyframe::new(4.0, Rotor3::identity()),
    ];
    AnimationClip::new("bend", vec![track])
}

/// Leaves sit directly under the root so that every instance refers to a bottom level structure.
pub fn create_scene(device: &SharedDevice) -> Result<Scene> {
    let mut root = Node::new("root");
    root.push_child(Node::mesh("ground", ground(device)?))?;
    root.push_child(Node::skinned_mesh("tube", tube(device)?).with_transform(Mat4::from_translation(Vec3::new(
        0.0, 0.0, -1.0,
    ))))?;
    for (i, &(x, z, angle)) in [(2.0f32, 0.0f32, 0.3f32), (-2.0, 1.0, -0.6), (1.5, 2.5, 1.2)]
        .iter()
        .enumerate()
    {
        let name = format!("crate_{}", i);
        let transform = Mat4::from_translation_rotation_scale(
            Vec3::new(x, 0.5, z),
            Rotor3::from_rotation_xz(angle),
            Vec3::one(),
        );
        root.push_child(Node::mesh(name.as_str(), cube(device, &name)?).with_transform(transform))?;
    }

    let skeleton = Skeleton::new(vec![
        Bone::new("base", None, BonePose::default()),
        Bone::new("tip", Some(0), BonePose::from_translation(Vec3::unit_y())),
    ])?
    .bind_at_rest();
    let mut animator = Animator::new(skeleton);
    animator.play(bend_clip(), PlaybackMode::Loop)?;

    Ok(Scene { root, animator })
}
