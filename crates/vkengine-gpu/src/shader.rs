//! SPIR-V shader modules.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::vertex::VertexInput;
use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

/// Entry point every stage is compiled with.
pub const ENTRY_POINT: &CStr = c"main";

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode a SPIR-V binary into words, checking its length and magic number.
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(GpuError::ShaderLoad(format!(
            "SPIR-V length {} is not a non-zero multiple of 4",
            bytes.len()
        )));
    }

    // read_spv also swaps byte order for big-endian binaries.
    let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(GpuError::ShaderLoad("missing SPIR-V magic number".to_string()));
    }
    Ok(words)
}

/// A compiled shader stage.
pub struct ShaderModule {
    device: Arc<LogicalDevice>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Load a module from a `.spv` file.
    pub fn from_file(device: &Arc<LogicalDevice>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            GpuError::ShaderLoad(format!("cannot read shader file '{}': {e}", path.display()))
        })?;
        tracing::debug!(
            "Read shader file '{}', size = {}",
            path.display(),
            bytes.len()
        );
        Self::from_bytes(device, &bytes)
    }

    /// Create a module from SPIR-V bytes.
    pub fn from_bytes(device: &Arc<LogicalDevice>, bytes: &[u8]) -> Result<Self> {
        let code = parse_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None) }
            .map_err(|e| GpuError::ShaderLoad(e.to_string()))?;

        Ok(Self {
            device: Arc::clone(device),
            module,
        })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description for pipeline creation.
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
    }
}

/// A vertex stage whose inputs are laid out as `V`.
pub struct VertexShaderModule<V: VertexInput> {
    module: ShaderModule,
    _vertex: PhantomData<fn() -> V>,
}

impl<V: VertexInput> VertexShaderModule<V> {
    pub fn new(module: ShaderModule) -> Self {
        Self {
            module,
            _vertex: PhantomData,
        }
    }

    pub fn from_file(device: &Arc<LogicalDevice>, path: impl AsRef<Path>) -> Result<Self> {
        ShaderModule::from_file(device, path).map(Self::new)
    }

    pub fn module(&self) -> &ShaderModule {
        &self.module
    }

    pub fn binding_descriptions(&self) -> Vec<vk::VertexInputBindingDescription> {
        vec![V::binding_description()]
    }

    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        V::attribute_descriptions()
    }

    /// Plain triangle lists; no primitive restart.
    pub fn input_assembly(&self) -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn accepts_well_formed_spirv() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_truncated_binary() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000]);
        bytes.pop();
        assert!(matches!(parse_spirv(&bytes), Err(GpuError::ShaderLoad(_))));
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = words_to_bytes(&[0xdead_beef, 0x0001_0000]);
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn entry_point_is_main() {
        assert_eq!(ENTRY_POINT.to_str().unwrap(), "main");
    }
}
