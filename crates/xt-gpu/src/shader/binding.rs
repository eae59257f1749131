//! Descriptor set layout shared by translated shaders and the pipeline layout
//!
//! Sets are ordered from the most to the least frequently changed: fetch
//! constants come first and shared memory with EDRAM comes last. Every
//! resource lives at binding 0 of its set, except textures, which occupy
//! consecutive bindings.

use ash::vk;

use crate::xenos::ShaderType;

/// Descriptor set indices
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorSet {
    /// Vertex and texture fetch constants
    FetchConstants = 0,
    FloatConstantsVertex = 1,
    FloatConstantsPixel = 2,
    TexturesPixel = 3,
    TexturesVertex = 4,
    SystemConstants = 5,
    BoolLoopConstants = 6,
    /// Guest memory, read by vertex fetches
    SharedMemoryAndEdram = 7,
}

/// Number of descriptor sets in the layout.
pub const DESCRIPTOR_SET_COUNT: u32 = 8;

impl DescriptorSet {
    /// All sets in binding order.
    pub const ALL: [DescriptorSet; DESCRIPTOR_SET_COUNT as usize] = [
        DescriptorSet::FetchConstants,
        DescriptorSet::FloatConstantsVertex,
        DescriptorSet::FloatConstantsPixel,
        DescriptorSet::TexturesPixel,
        DescriptorSet::TexturesVertex,
        DescriptorSet::SystemConstants,
        DescriptorSet::BoolLoopConstants,
        DescriptorSet::SharedMemoryAndEdram,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    /// The float constant set of a stage.
    pub fn float_constants(shader_type: ShaderType) -> Self {
        match shader_type {
            ShaderType::Vertex => DescriptorSet::FloatConstantsVertex,
            ShaderType::Pixel => DescriptorSet::FloatConstantsPixel,
        }
    }

    /// The texture set of a stage.
    pub fn textures(shader_type: ShaderType) -> Self {
        match shader_type {
            ShaderType::Vertex => DescriptorSet::TexturesVertex,
            ShaderType::Pixel => DescriptorSet::TexturesPixel,
        }
    }

    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            DescriptorSet::TexturesPixel | DescriptorSet::TexturesVertex => {
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            }
            DescriptorSet::SharedMemoryAndEdram => vk::DescriptorType::STORAGE_BUFFER,
            _ => vk::DescriptorType::UNIFORM_BUFFER,
        }
    }

    /// Stages that read the set.
    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            DescriptorSet::FloatConstantsVertex | DescriptorSet::TexturesVertex => {
                vk::ShaderStageFlags::VERTEX
            }
            DescriptorSet::FloatConstantsPixel | DescriptorSet::TexturesPixel => {
                vk::ShaderStageFlags::FRAGMENT
            }
            _ => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Layout bindings of the set.
    ///
    /// `texture_count` is only used for the texture sets; a stage without
    /// textures gets an empty set.
    pub fn layout_bindings(self, texture_count: u32) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        let count = match self {
            DescriptorSet::TexturesPixel | DescriptorSet::TexturesVertex => texture_count,
            _ => 1,
        };
        if self.descriptor_type() == vk::DescriptorType::COMBINED_IMAGE_SAMPLER {
            return (0..count)
                .map(|binding| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(binding)
                        .descriptor_type(self.descriptor_type())
                        .descriptor_count(1)
                        .stage_flags(self.stage_flags())
                })
                .collect();
        }
        vec![vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(self.descriptor_type())
            .descriptor_count(count)
            .stage_flags(self.stage_flags())]
    }
}
