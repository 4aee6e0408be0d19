// Render pass description
//
// A render pass is an ordered list of subpasses, one per attachment entry.
// The builder is mutable; the pass built from it is not.

use crate::backend::Backend;
use crate::render::format::ImageFormat;
use crate::render::output::OutputTarget;

/// What one subpass writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPassAttachment {
    Colour,
    Depth,
    ColourDepth,
}

impl RenderPassAttachment {
    pub fn has_colour(self) -> bool {
        matches!(self, Self::Colour | Self::ColourDepth)
    }

    pub fn has_depth(self) -> bool {
        matches!(self, Self::Depth | Self::ColourDepth)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPassBuilder {
    attachments: Vec<RenderPassAttachment>,
    colour_format: ImageFormat,
    target: OutputTarget,
}

impl Default for RenderPassBuilder {
    fn default() -> Self {
        Self {
            attachments: Vec::new(),
            colour_format: ImageFormat::Bgra32Unorm,
            target: OutputTarget::Window,
        }
    }
}

impl RenderPassBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subpass. Subpasses execute in insertion order.
    pub fn add_pass(&mut self, attachment: RenderPassAttachment) -> &mut Self {
        self.attachments.push(attachment);
        self
    }

    pub fn set_colour_format(&mut self, format: ImageFormat) -> &mut Self {
        self.colour_format = format;
        self
    }

    pub fn set_target(&mut self, target: OutputTarget) -> &mut Self {
        self.target = target;
        self
    }

    pub fn attachments(&self) -> &[RenderPassAttachment] {
        &self.attachments
    }

    pub fn colour_format(&self) -> ImageFormat {
        self.colour_format
    }

    pub fn target(&self) -> OutputTarget {
        self.target
    }

    pub fn has_depth(&self) -> bool {
        self.attachments.iter().any(|a| a.has_depth())
    }
}

/// Snapshot a backend needs to build its native render pass.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassDesc<'a> {
    pub attachments: &'a [RenderPassAttachment],
    pub colour_format: ImageFormat,
    pub target: OutputTarget,
}

pub struct RenderPass<B: Backend> {
    attachments: Box<[RenderPassAttachment]>,
    colour_format: ImageFormat,
    target: OutputTarget,
    native: B::RenderPass,
}

impl<B: Backend> RenderPass<B> {
    pub(crate) fn new(builder: &RenderPassBuilder, native: B::RenderPass) -> Self {
        Self {
            attachments: builder.attachments.clone().into_boxed_slice(),
            colour_format: builder.colour_format,
            target: builder.target,
            native,
        }
    }

    pub fn attachments(&self) -> &[RenderPassAttachment] {
        &self.attachments
    }

    pub fn subpass_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn colour_format(&self) -> ImageFormat {
        self.colour_format
    }

    pub fn target(&self) -> OutputTarget {
        self.target
    }

    pub fn has_depth(&self) -> bool {
        self.attachments.iter().any(|a| a.has_depth())
    }

    pub(crate) fn native(&self) -> &B::RenderPass {
        &self.native
    }
}

impl<B: Backend> std::fmt::Debug for RenderPass<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("attachments", &self.attachments)
            .field("colour_format", &self.colour_format)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_insertion_order() {
        let mut builder = RenderPassBuilder::new();
        builder
            .add_pass(RenderPassAttachment::Depth)
            .add_pass(RenderPassAttachment::Colour)
            .add_pass(RenderPassAttachment::ColourDepth);
        assert_eq!(
            builder.attachments(),
            [
                RenderPassAttachment::Depth,
                RenderPassAttachment::Colour,
                RenderPassAttachment::ColourDepth
            ]
        );
        assert!(builder.has_depth());
    }

    #[test]
    fn colour_only_has_no_depth() {
        let mut builder = RenderPassBuilder::new();
        builder.add_pass(RenderPassAttachment::Colour);
        assert!(!builder.has_depth());
    }
}
