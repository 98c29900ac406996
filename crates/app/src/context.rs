//! Vulkan objects that outlive the engine.
//!
//! `GpuContext` creates the instance, surface, device and pipelines for a
//! window and hands the engine a [`VulkanGpu`] plus the pipeline handles.
//! Fields drop in declaration order, which is the required destruction order.

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use field_core::EngineConfig;
use field_engine::{ComputePipelineHandles, GraphicsPipelineHandles, Particle, PipelineSet, Vertex};
use field_platform::{Surface, Window, present_mode};
use field_rhi::descriptor::{DescriptorSetLayout, compute_bindings, graphics_bindings};
use field_rhi::device::Device;
use field_rhi::instance::Instance;
use field_rhi::physical_device::select_physical_device;
use field_rhi::pipeline::{
    GraphicsPipelineBuilder, MIN_SAMPLE_SHADING, Pipeline, PipelineLayout, RenderPass,
};
use field_rhi::shader::{Shader, ShaderStage, files};
use field_rhi::swapchain::{SwapchainSupportDetails, choose_surface_format};
use field_rhi::vertex::VertexInput;
use field_rhi::vulkan::VulkanGpu;
use tracing::info;

/// Render pass, layouts and the three pipelines.
struct PipelineObjects {
    main: Pipeline,
    particle: Pipeline,
    compute: Pipeline,
    graphics_layout: PipelineLayout,
    compute_layout: PipelineLayout,
    graphics_set_layout: DescriptorSetLayout,
    compute_set_layout: DescriptorSetLayout,
    render_pass: RenderPass,
}

impl PipelineObjects {
    fn new(device: &Arc<Device>, shader_dir: &Path, color_format: vk::Format) -> Result<Self> {
        let physical = device.physical_device();
        let samples = physical.msaa_samples;

        let render_pass =
            RenderPass::new(device.clone(), color_format, physical.depth_format, samples)?;

        let graphics_set_layout = DescriptorSetLayout::new(device.clone(), &graphics_bindings())?;
        let compute_set_layout = DescriptorSetLayout::new(device.clone(), &compute_bindings())?;
        let graphics_layout = PipelineLayout::new(device.clone(), &[graphics_set_layout.handle()])?;
        let compute_layout = PipelineLayout::new(device.clone(), &[compute_set_layout.handle()])?;

        let load = |name: &str, stage: ShaderStage| -> Result<Shader> {
            let path = shader_dir.join(name);
            Shader::from_spirv_file(device.clone(), &path, stage, "main")
                .with_context(|| format!("loading shader {}", path.display()))
        };

        let mesh_vertex = load(files::MESH_VERTEX, ShaderStage::Vertex)?;
        let mesh_fragment = load(files::MESH_FRAGMENT, ShaderStage::Fragment)?;
        let main = GraphicsPipelineBuilder::new()
            .vertex_shader(&mesh_vertex)
            .fragment_shader(&mesh_fragment)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .rasterization_samples(samples)
            .sample_shading(MIN_SAMPLE_SHADING)
            .build(device.clone(), &graphics_layout, &render_pass)?;

        let particle_vertex = load(files::PARTICLE_VERTEX, ShaderStage::Vertex)?;
        let particle_fragment = load(files::PARTICLE_FRAGMENT, ShaderStage::Fragment)?;
        let particle = GraphicsPipelineBuilder::new()
            .vertex_shader(&particle_vertex)
            .fragment_shader(&particle_fragment)
            .vertex_binding(Particle::binding_description())
            .vertex_attributes(&Particle::attribute_descriptions())
            .topology(vk::PrimitiveTopology::POINT_LIST)
            .rasterization_samples(samples)
            .sample_shading(MIN_SAMPLE_SHADING)
            .build(device.clone(), &graphics_layout, &render_pass)?;

        let simulation = load(files::SIMULATION, ShaderStage::Compute)?;
        let compute = Pipeline::create_compute(device.clone(), &simulation, &compute_layout)?;

        Ok(Self {
            main,
            particle,
            compute,
            graphics_layout,
            compute_layout,
            graphics_set_layout,
            compute_set_layout,
            render_pass,
        })
    }

    fn handles(&self) -> PipelineSet {
        PipelineSet {
            render_pass: self.render_pass.handle(),
            main: GraphicsPipelineHandles {
                pipeline: self.main.handle(),
                layout: self.graphics_layout.handle(),
                set_layout: self.graphics_set_layout.handle(),
            },
            particle: self.particle.handle(),
            compute: ComputePipelineHandles {
                pipeline: self.compute.handle(),
                layout: self.compute_layout.handle(),
                set_layout: self.compute_set_layout.handle(),
            },
        }
    }
}

pub struct GpuContext {
    pipelines: PipelineObjects,
    gpu: Arc<VulkanGpu>,
    device: Arc<Device>,
    _surface: Surface,
    _instance: Instance,
}

impl GpuContext {
    pub fn new(window: &Window, config: &EngineConfig) -> Result<Self> {
        let application_name = CString::new(config.window.title.as_str())
            .unwrap_or_else(|_| CString::from(c"field-control"));
        let instance = Instance::new(
            &application_name,
            config.enable_validation,
            &window.required_extensions()?,
        )?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let physical =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical)?;

        let support =
            SwapchainSupportDetails::query(physical.device, surface.handle(), surface.loader())?;
        let color_format = choose_surface_format(&support.formats).format;

        let pipelines = PipelineObjects::new(&device, &config.shader_dir, color_format)?;

        let presentation = surface.presentation(config.forced_present_mode.map(present_mode));
        let gpu = Arc::new(VulkanGpu::new(device.clone(), presentation)?);

        info!("GPU context ready on '{}'", physical.device_name());

        Ok(Self {
            pipelines,
            gpu,
            device,
            _surface: surface,
            _instance: instance,
        })
    }

    pub fn gpu(&self) -> Arc<VulkanGpu> {
        self.gpu.clone()
    }

    pub fn pipelines(&self) -> PipelineSet {
        self.pipelines.handles()
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle during shutdown: {}", e);
        }
    }
}
