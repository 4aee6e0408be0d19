// Shader sources attached to a renderer
//
// Shaders arrive precompiled: SPIR-V words for Vulkan, GLSL text for
// OpenGL. A renderer is either graphics (vertex + fragment) or compute.

use crate::error::{RenderError, RenderResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    Spirv(Vec<u32>),
    Glsl(String),
}

impl ShaderSource {
    /// Parse a SPIR-V binary as read from disk. The length must be a
    /// multiple of four and the module must start with the SPIR-V magic.
    pub fn spirv_from_bytes(bytes: &[u8]) -> RenderResult<Self> {
        if bytes.len() % 4 != 0 {
            return Err(RenderError::Shader(format!(
                "SPIR-V length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        let words: Vec<u32> = bytemuck::pod_collect_to_vec(bytes);
        match words.first() {
            Some(&SPIRV_MAGIC) => Ok(ShaderSource::Spirv(words)),
            Some(&magic) if magic.swap_bytes() == SPIRV_MAGIC => Ok(ShaderSource::Spirv(
                words.into_iter().map(u32::swap_bytes).collect(),
            )),
            _ => Err(RenderError::Shader("missing SPIR-V magic number".to_string())),
        }
    }

    pub fn glsl(source: impl Into<String>) -> Self {
        ShaderSource::Glsl(source.into())
    }
}

/// Whether a shader set drives the raster pipeline or a compute dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    Graphics,
    Compute,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderInfo {
    vertex: Option<ShaderSource>,
    fragment: Option<ShaderSource>,
    compute: Option<ShaderSource>,
}

impl ShaderInfo {
    pub fn set_shader(&mut self, stage: ShaderStage, source: ShaderSource) {
        *self.slot_mut(stage) = Some(source);
    }

    pub fn has_shader(&self, stage: ShaderStage) -> bool {
        self.get(stage).is_some()
    }

    pub fn get(&self, stage: ShaderStage) -> Option<&ShaderSource> {
        match stage {
            ShaderStage::Vertex => self.vertex.as_ref(),
            ShaderStage::Fragment => self.fragment.as_ref(),
            ShaderStage::Compute => self.compute.as_ref(),
        }
    }

    fn slot_mut(&mut self, stage: ShaderStage) -> &mut Option<ShaderSource> {
        match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Fragment => &mut self.fragment,
            ShaderStage::Compute => &mut self.compute,
        }
    }

    /// Graphics needs exactly vertex + fragment, compute needs the compute
    /// stage alone. Anything else is rejected.
    pub fn kind(&self) -> RenderResult<ShaderKind> {
        match (
            self.vertex.is_some(),
            self.fragment.is_some(),
            self.compute.is_some(),
        ) {
            (true, true, false) => Ok(ShaderKind::Graphics),
            (false, false, true) => Ok(ShaderKind::Compute),
            (vertex, fragment, compute) => Err(RenderError::InvalidRendererInfo(format!(
                "shader stages must be vertex+fragment or compute alone \
                 (vertex: {vertex}, fragment: {fragment}, compute: {compute})"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_needs_magic_and_whole_words() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 1, 0]);
        let ShaderSource::Spirv(words) = ShaderSource::spirv_from_bytes(&bytes).unwrap() else {
            panic!("expected SPIR-V");
        };
        assert_eq!(words.len(), 2);

        assert!(ShaderSource::spirv_from_bytes(&bytes[..5]).is_err());
        assert!(ShaderSource::spirv_from_bytes(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn stage_pairs() {
        let mut info = ShaderInfo::default();
        assert!(info.kind().is_err());

        info.set_shader(ShaderStage::Vertex, ShaderSource::glsl("void main() {}"));
        assert!(info.kind().is_err());

        info.set_shader(ShaderStage::Fragment, ShaderSource::glsl("void main() {}"));
        assert_eq!(info.kind().unwrap(), ShaderKind::Graphics);

        info.set_shader(ShaderStage::Compute, ShaderSource::glsl("void main() {}"));
        assert!(info.kind().is_err());
    }
}
