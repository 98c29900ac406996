//! Pipeline handles the engine draws and dispatches with.
//!
//! The engine does not build or destroy pipelines. The caller constructs them
//! (see `field_rhi::pipeline`), keeps them alive for the engine's lifetime and
//! passes the raw handles in a [`PipelineSet`].

use field_rhi::vk;

/// The mesh pipeline, its layout and the set layout of its uniforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphicsPipelineHandles {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layout: vk::DescriptorSetLayout,
}

/// The particle simulation pipeline and its layouts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComputePipelineHandles {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layout: vk::DescriptorSetLayout,
}

/// All pipeline objects the frame loop needs.
///
/// `particle` shares `main.layout`; `render_pass` orders its attachments MSAA
/// colour, depth, resolve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineSet {
    pub render_pass: vk::RenderPass,
    pub main: GraphicsPipelineHandles,
    pub particle: vk::Pipeline,
    pub compute: ComputePipelineHandles,
}
