mod accel;
mod animation;
mod device;
mod error;
mod maths;
mod mesh;
mod references;
mod resource;
mod scene;
mod scene_accel;
mod skeleton;
mod visitor;
pub mod vulkan;

#[cfg(test)]
mod mock;

pub mod prelude {
    pub use crate::accel::*;
    pub use crate::animation::*;
    pub use crate::device::*;
    pub use crate::error::*;
    pub use crate::maths::*;
    pub use crate::mesh::*;
    pub use crate::references::*;
    pub use crate::resource::*;
    pub use crate::scene::*;
    pub use crate::scene_accel::*;
    pub use crate::skeleton::*;
    pub use crate::visitor::*;
}
