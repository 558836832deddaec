use spark::vk;
use std::{io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{call} failed: {result}")]
    Vulkan { call: &'static str, result: vk::Result },

    #[error("{call} failed to load: {message}")]
    Loader { call: &'static str, message: String },

    #[error("device does not support {0}")]
    Unsupported(&'static str),

    #[error("no memory type in filter {type_filter:#x} has the requested properties")]
    MissingMemoryType { type_filter: u32 },

    #[error("failed to load shader {path:?}")]
    Shader {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("buffer `{name}` is not host visible")]
    NotHostVisible { name: String },

    #[error("access of {len} bytes at offset {offset} is outside buffer `{name}` of {size} bytes")]
    OutOfBounds {
        name: String,
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("mesh `{name}`: {reason}")]
    InvalidMesh { name: String, reason: String },

    #[error("node `{name}` holds mesh data and cannot have children")]
    LeafWithChildren { name: String },

    #[error("{count} bone influences given, at most 4 are supported")]
    TooManyInfluences { count: usize },

    #[error("bone `{name}` has parent {parent} which does not precede it")]
    InvalidBoneParent { name: String, parent: usize },

    #[error("animation track targets bone {bone} but the skeleton has {bone_count} bones")]
    InvalidTrack { bone: usize, bone_count: usize },

    #[error("no bone matrices given to the animation pass")]
    EmptyBoneMatrices,

    #[error("scene has no meshes to reference")]
    EmptyGeometryReferences,

    #[error("instance custom index {0} does not fit in 24 bits")]
    CustomIndexOverflow(u32),

    #[error("pipeline `{pipeline}` has no storage buffer binding {binding}")]
    InvalidBinding { pipeline: String, binding: u32 },

    #[error("no compute shader set for the animation pass")]
    MissingShader,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) trait ResultExt<T> {
    fn vk_context(self, call: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T, vk::Result> {
    fn vk_context(self, call: &'static str) -> Result<T> {
        self.map_err(|result| {
            tracing::error!("{} failed: {}", call, result);
            Error::Vulkan { call, result }
        })
    }
}

pub(crate) trait LoaderResultExt<T> {
    fn loader_context(self, call: &'static str) -> Result<T>;
}

impl<T> LoaderResultExt<T> for Result<T, spark::LoaderError> {
    fn loader_context(self, call: &'static str) -> Result<T> {
        self.map_err(|err| {
            tracing::error!("{} failed: {}", call, err);
            Error::Loader {
                call,
                message: err.to_string(),
            }
        })
    }
}
