// Shader module loading
//
// Vulkan consumes SPIR-V only. GLSL sources are rejected here rather than
// compiled at runtime.

use super::context::VulkanContext;
use crate::error::{RenderError, RenderResult};
use crate::render::shader::{ShaderInfo, ShaderSource, ShaderStage};
use ash::vk;
use std::sync::Arc;

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    ctx: Arc<VulkanContext>,
}

fn stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

impl ShaderModule {
    pub fn new(ctx: Arc<VulkanContext>, stage: ShaderStage, source: &ShaderSource) -> RenderResult<Self> {
        let words = match source {
            ShaderSource::Spirv(words) => words,
            ShaderSource::Glsl(_) => {
                return Err(RenderError::Shader(format!(
                    "{stage:?} shader is GLSL; the Vulkan backend needs SPIR-V"
                )))
            }
        };

        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let module = unsafe { ctx.device.create_shader_module(&create_info, None) }
            .map_err(|e| RenderError::Shader(format!("{stage:?} shader module rejected: {e:?}")))?;

        Ok(Self {
            module,
            stage: stage_flags(stage),
            ctx,
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_shader_module(self.module, None) };
    }
}

/// Modules for every stage `info` provides, in pipeline order.
pub fn load_stages(ctx: &Arc<VulkanContext>, info: &ShaderInfo) -> RenderResult<Vec<ShaderModule>> {
    [ShaderStage::Vertex, ShaderStage::Fragment, ShaderStage::Compute]
        .into_iter()
        .filter_map(|stage| info.get(stage).map(|source| (stage, source)))
        .map(|(stage, source)| ShaderModule::new(ctx.clone(), stage, source))
        .collect()
}
