use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;
use gpu_allocator::MemoryLocation;

use crate::renderer::geometry::Buffer;
use crate::renderer::shader_data::PerFrameData;
use crate::renderer::util;

/// One small uniform buffer and descriptor set per swapchain image.
///
/// A set is baked into its image's prerecorded command buffer; the buffer is
/// rewritten just before submit, after the frame pipeline's hazard wait has
/// proven the GPU is done reading it.
pub struct FrameUniforms {
    pub set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    buffers: Vec<Buffer>,
}

impl FrameUniforms {
    pub fn new(
        device: Arc<ash::Device>,
        mem_allocator: Arc<Mutex<Allocator>>,
        image_count: usize,
    ) -> Result<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let set_layout = unsafe {
            device.create_descriptor_set_layout(&layout_info, None)?
        };

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(util::safe_u32(image_count)?)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(util::safe_u32(image_count)?)
            .pool_sizes(&pool_sizes);
        let pool = unsafe {
            device.create_descriptor_pool(&pool_info, None)?
        };

        let set_layouts = vec![set_layout; image_count];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let sets = unsafe {
            device.allocate_descriptor_sets(&allocate_info)?
        };

        let mut buffers = Vec::with_capacity(image_count);
        for i in 0..image_count {
            let buffer = Buffer::new(
                size_of::<PerFrameData>() as u64,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                &format!("frame-uniforms-{}", i),
                MemoryLocation::CpuToGpu,
                mem_allocator.clone(),
                device.clone(),
            )?;

            let buffer_info = [vk::DescriptorBufferInfo::default()
                .buffer(buffer.buffer)
                .offset(0)
                .range(size_of::<PerFrameData>() as u64)];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(sets[i])
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info);
            unsafe {
                device.update_descriptor_sets(&[write], &[]);
            }

            buffers.push(buffer);
        }

        Ok(Self {
            set_layout,
            pool,
            sets,
            buffers,
        })
    }

    pub fn set_for_image(&self, image_index: usize) -> vk::DescriptorSet {
        self.sets[image_index]
    }

    pub fn write(&mut self, image_index: usize, data: &PerFrameData) -> Result<()> {
        self.buffers[image_index].write(std::slice::from_ref(data), 0)?;
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(self.pool, None);
                self.pool = vk::DescriptorPool::null();
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.set_layout, None);
                self.set_layout = vk::DescriptorSetLayout::null();
            }
        }
        self.sets.clear();
        self.buffers.clear();
    }
}
