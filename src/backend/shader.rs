// Shader module loading
//
// Shaders arrive as precompiled SPIR-V blobs. This module turns a path or a
// byte slice into a vk::ShaderModule; authoring and compilation happen elsewhere.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

/// Read a SPIR-V blob from disk.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read shader {:?}", path))?;
    decode_spirv(&bytes).with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

/// Reinterpret bytes as SPIR-V words.
///
/// Handles unaligned input and byte-swapped blobs.
pub fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
    Ok(words)
}

pub fn create_shader_module(device: &ash::Device, words: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(words);

    unsafe { device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}
