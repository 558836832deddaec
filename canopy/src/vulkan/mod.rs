mod barrier;
mod command_buffer;
mod context;
mod descriptor;
mod device;
mod shader;

pub use self::context::{Context, ContextFeature, ContextParams, SharedContext};
pub use self::device::VulkanDevice;
