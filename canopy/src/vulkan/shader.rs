use crate::error::*;
use spark::{vk, Device};
use std::{
    fs::File,
    io::{self, Read},
    mem,
    path::Path,
};

fn read_file_words(path: &Path) -> io::Result<Vec<u32>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "SPIR-V size is not a multiple of 4"));
    }
    Ok(bytes
        .chunks(4)
        .map(|c| u32::from(c[3]) << 24 | u32::from(c[2]) << 16 | u32::from(c[1]) << 8 | u32::from(c[0]))
        .collect())
}

pub(crate) fn load_shader_module(device: &Device, path: &Path) -> Result<vk::ShaderModule> {
    let words = read_file_words(path).map_err(|source| Error::Shader {
        path: path.to_owned(),
        source,
    })?;
    let shader_module_create_info = vk::ShaderModuleCreateInfo {
        code_size: words.len() * mem::size_of::<u32>(),
        p_code: words.as_ptr(),
        ..Default::default()
    };
    unsafe { device.create_shader_module(&shader_module_create_info, None) }.vk_context("vkCreateShaderModule")
}
