use crate::{error::*, maths::*};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonePose {
    pub translation: Vec3,
    pub rotation: Rotor3,
    pub scale: Vec3,
}

impl BonePose {
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    pub fn into_mat4(self) -> Mat4 {
        Mat4::from_translation_rotation_scale(self.translation, self.rotation, self.scale)
    }
}

impl Default for BonePose {
    fn default() -> Self {
        Self {
            translation: Vec3::zero(),
            rotation: Rotor3::identity(),
            scale: Vec3::one(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub inverse_bind: Mat4,
    pub rest: BonePose,
}

impl Bone {
    pub fn new(name: impl Into<String>, parent: Option<usize>, rest: BonePose) -> Self {
        Self {
            name: name.into(),
            parent,
            inverse_bind: Mat4::identity(),
            rest,
        }
    }
}

/// Bones ordered so that every parent precedes its children.
#[derive(Debug, Clone)]
pub struct Skeleton {
    bones: Vec<Bone>,
}

impl Skeleton {
    pub fn new(bones: Vec<Bone>) -> Result<Self> {
        for (index, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= index {
                    return Err(Error::InvalidBoneParent {
                        name: bone.name.clone(),
                        parent,
                    });
                }
            }
        }
        Ok(Self { bones })
    }

    /// Sets each inverse bind matrix from the rest pose, so the rest pose skins to the identity.
    pub fn bind_at_rest(mut self) -> Self {
        let globals = self.compose(self.bones.iter().map(|bone| bone.rest.into_mat4()));
        for (bone, global) in self.bones.iter_mut().zip(globals.iter()) {
            bone.inverse_bind = global.inversed();
        }
        self
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name == name)
    }

    fn compose(&self, locals: impl Iterator<Item = Mat4>) -> Vec<Mat4> {
        let mut globals: Vec<Mat4> = Vec::with_capacity(self.bones.len());
        for (bone, local) in self.bones.iter().zip(locals) {
            let global = match bone.parent {
                Some(parent) => globals[parent] * local,
                None => local,
            };
            globals.push(global);
        }
        globals
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe<T> {
    pub time: f32,
    pub value: T,
}

impl<T> Keyframe<T> {
    pub fn new(time: f32, value: T) -> Self {
        Self { time, value }
    }
}

/// Normalized lerp between rotors, taking the short way round since `r` and `-r` are the same rotation.
fn nlerp(a: Rotor3, b: Rotor3, t: f32) -> Rotor3 {
    let end = if a.dot(b) < 0.0 { b * -1.0 } else { b };
    a.lerp(end, t).normalized()
}

fn sample_keys<T: Copy>(keys: &[Keyframe<T>], time: f32, lerp: impl Fn(T, T, f32) -> T) -> Option<T> {
    let first = keys.first()?;
    let last = keys.last()?;
    if time <= first.time {
        return Some(first.value);
    }
    if time >= last.time {
        return Some(last.value);
    }
    let next = keys.partition_point(|key| key.time <= time);
    let (a, b) = (&keys[next - 1], &keys[next]);
    let t = (time - a.time) / (b.time - a.time);
    Some(lerp(a.value, b.value, t))
}

/// Keyframes for one bone, each channel sorted by time.
#[derive(Debug, Clone, Default)]
pub struct BoneTrack {
    pub bone: usize,
    pub translations: Vec<Keyframe<Vec3>>,
    pub rotations: Vec<Keyframe<Rotor3>>,
    pub scales: Vec<Keyframe<Vec3>>,
}

impl BoneTrack {
    pub fn new(bone: usize) -> Self {
        Self {
            bone,
            ..Default::default()
        }
    }

    fn end_time(&self) -> f32 {
        let last = |times: Option<f32>| times.unwrap_or(0.0);
        last(self.translations.last().map(|key| key.time))
            .max(last(self.rotations.last().map(|key| key.time)))
            .max(last(self.scales.last().map(|key| key.time)))
    }

    /// Channels without keys keep the value of `rest`.
    pub fn sample(&self, time: f32, rest: BonePose) -> BonePose {
        BonePose {
            translation: sample_keys(&self.translations, time, |a, b, t| a.lerp(b, t)).unwrap_or(rest.translation),
            rotation: sample_keys(&self.rotations, time, nlerp).unwrap_or(rest.rotation),
            scale: sample_keys(&self.scales, time, |a, b, t| a.lerp(b, t)).unwrap_or(rest.scale),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<BoneTrack>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, tracks: Vec<BoneTrack>) -> Self {
        let duration = tracks.iter().map(BoneTrack::end_time).fold(0.0, f32::max);
        Self {
            name: name.into(),
            duration,
            tracks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Loop,
    Clamp,
}

/// Evaluates a clip on a skeleton and produces the matrices consumed by skinning.
#[derive(Debug)]
pub struct Animator {
    skeleton: Skeleton,
    clip: Option<AnimationClip>,
    mode: PlaybackMode,
    time: f32,
    final_matrices: Vec<Mat4>,
}

impl Animator {
    pub fn new(skeleton: Skeleton) -> Self {
        let mut animator = Self {
            final_matrices: Vec::with_capacity(skeleton.len()),
            skeleton,
            clip: None,
            mode: PlaybackMode::Loop,
            time: 0.0,
        };
        animator.evaluate();
        animator
    }

    pub fn play(&mut self, clip: AnimationClip, mode: PlaybackMode) -> Result<()> {
        let bone_count = self.skeleton.len();
        if let Some(track) = clip.tracks.iter().find(|track| track.bone >= bone_count) {
            return Err(Error::InvalidTrack {
                bone: track.bone,
                bone_count,
            });
        }
        debug!(clip = clip.name.as_str(), duration = clip.duration, "playing");
        self.clip = Some(clip);
        self.mode = mode;
        self.time = 0.0;
        self.evaluate();
        Ok(())
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn update(&mut self, dt: f32) {
        let duration = self.clip.as_ref().map_or(0.0, |clip| clip.duration);
        self.time += dt;
        self.time = match self.mode {
            PlaybackMode::Loop if duration > 0.0 => self.time.rem_euclid(duration),
            PlaybackMode::Loop => 0.0,
            PlaybackMode::Clamp => self.time.max(0.0).min(duration),
        };
        self.evaluate();
    }

    /// One matrix per bone, ordered by bone id.
    pub fn final_bone_matrices(&self) -> &[Mat4] {
        &self.final_matrices
    }

    fn evaluate(&mut self) {
        let mut locals: Vec<BonePose> = self.skeleton.bones.iter().map(|bone| bone.rest).collect();
        if let Some(clip) = self.clip.as_ref() {
            for track in clip.tracks.iter() {
                locals[track.bone] = track.sample(self.time, locals[track.bone]);
            }
        }
        let globals = self
            .skeleton
            .compose(locals.into_iter().map(BonePose::into_mat4));
        self.final_matrices.clear();
        self.final_matrices.extend(
            globals
                .iter()
                .zip(self.skeleton.bones.iter())
                .map(|(global, bone)| *global * bone.inverse_bind),
        );
    }
}
