use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};

use crate::renderer::model::MeshData;
use crate::renderer::util;

/// Host-visible GPU buffer bound to its own dedicated allocation.
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new(
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        mem_loc: MemoryLocation,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let buffer = {
            let buffer_info = vk::BufferCreateInfo {
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            unsafe { device.create_buffer(&buffer_info, None)? }
        };

        let requirements = unsafe {
            device.get_buffer_memory_requirements(buffer)
        };
        let allocation = mem_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: mem_loc,
                linear: true,
                allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
            })?;

        unsafe {
            device.bind_buffer_memory(
                buffer,
                allocation.memory(),
                allocation.offset(),
            )?;
        }

        Ok(Self {
            buffer,
            size,

            allocation: Some(allocation),
            memory_allocator: mem_allocator,
            device,
        })
    }

    pub fn write<T>(
        &mut self,
        data: &[T],
        start_offset: usize,
    ) -> Result<presser::CopyRecord>
    where
        T: Copy,
    {
        Ok(presser::copy_from_slice_to_offset(
            data,
            self.allocation.as_mut().unwrap(),
            start_offset,
        )?)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.memory_allocator
                .lock()
                .unwrap()
                .free(self.allocation.take().unwrap())
                .unwrap();
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

// Fixed, generously sized allocations written once at startup. Not derived
// from the asset; an oversized mesh is rejected instead.
const POSITION_BUFFER_SIZE: u64 = 4 * 1024 * 1024;
const ATTRIBUTE_BUFFER_SIZE: u64 = 12 * 1024 * 1024;
const INDEX_BUFFER_SIZE: u64 = 4 * 1024 * 1024;

/// Byte offsets of the non-position attribute streams packed back to back
/// into the shared attribute buffer.
pub fn packed_attribute_offsets(mesh: &MeshData) -> [u64; 4] {
    let normals = 0;
    let uvs = normals + (mesh.normals.len() * size_of::<f32>()) as u64;
    let weights = uvs + (mesh.uvs.len() * size_of::<f32>()) as u64;
    let joints = weights + (mesh.weights.len() * size_of::<f32>()) as u64;
    [normals, uvs, weights, joints]
}

/// Write-once vertex and index storage for the demo mesh.
///
/// Positions get their own buffer; normals, uvs, weights and joint ids share
/// a second buffer and are bound four more times at their packed offsets.
pub struct StaticGeometry {
    pub positions: Buffer,
    pub attributes: Buffer,
    pub indices: Buffer,
    pub index_count: u32,
    attribute_offsets: [u64; 4],
}

impl StaticGeometry {
    pub fn upload(
        mesh: &MeshData,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let position_bytes = (mesh.positions.len() * size_of::<f32>()) as u64;
        let index_bytes = (mesh.indices.len() * size_of::<u32>()) as u64;
        let attribute_offsets = packed_attribute_offsets(mesh);
        let attribute_bytes =
            attribute_offsets[3] + (mesh.joints.len() * size_of::<f32>()) as u64;

        if position_bytes > POSITION_BUFFER_SIZE
            || attribute_bytes > ATTRIBUTE_BUFFER_SIZE
            || index_bytes > INDEX_BUFFER_SIZE
        {
            return Err(eyre!("Mesh does not fit the fixed geometry buffers"));
        }

        let mut positions = Buffer::new(
            POSITION_BUFFER_SIZE,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "positions",
            MemoryLocation::CpuToGpu,
            mem_allocator.clone(),
            device.clone(),
        )?;
        let mut attributes = Buffer::new(
            ATTRIBUTE_BUFFER_SIZE,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "attributes",
            MemoryLocation::CpuToGpu,
            mem_allocator.clone(),
            device.clone(),
        )?;
        let mut indices = Buffer::new(
            INDEX_BUFFER_SIZE,
            vk::BufferUsageFlags::INDEX_BUFFER,
            "indices",
            MemoryLocation::CpuToGpu,
            mem_allocator,
            device,
        )?;

        positions.write(&mesh.positions, 0)?;
        attributes.write(&mesh.normals, attribute_offsets[0] as usize)?;
        attributes.write(&mesh.uvs, attribute_offsets[1] as usize)?;
        attributes.write(&mesh.weights, attribute_offsets[2] as usize)?;
        attributes.write(&mesh.joints, attribute_offsets[3] as usize)?;
        indices.write(&mesh.indices, 0)?;

        Ok(Self {
            positions,
            attributes,
            indices,
            index_count: util::safe_u32(mesh.index_count())?,
            attribute_offsets,
        })
    }

    /// The five buffers to bind, matching [`Self::binding_descriptions`].
    pub fn vertex_buffers(&self) -> [vk::Buffer; 5] {
        [
            self.positions.buffer,
            self.attributes.buffer,
            self.attributes.buffer,
            self.attributes.buffer,
            self.attributes.buffer,
        ]
    }

    pub fn vertex_offsets(&self) -> [vk::DeviceSize; 5] {
        [
            0,
            self.attribute_offsets[0],
            self.attribute_offsets[1],
            self.attribute_offsets[2],
            self.attribute_offsets[3],
        ]
    }

    pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 5] {
        let binding = |index: u32, stride: u32| {
            vk::VertexInputBindingDescription::default()
                .binding(index)
                .stride(stride)
                .input_rate(vk::VertexInputRate::VERTEX)
        };
        [
            binding(0, 3 * size_of::<f32>() as u32), // positions
            binding(1, 3 * size_of::<f32>() as u32), // normals
            binding(2, 2 * size_of::<f32>() as u32), // uvs
            binding(3, 3 * size_of::<f32>() as u32), // weights
            binding(4, 3 * size_of::<f32>() as u32), // joint ids, as floats
        ]
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 5] {
        let attribute = |location: u32, format: vk::Format| {
            vk::VertexInputAttributeDescription::default()
                .location(location)
                .binding(location)
                .format(format)
                .offset(0)
        };
        [
            attribute(0, vk::Format::R32G32B32_SFLOAT),
            attribute(1, vk::Format::R32G32B32_SFLOAT),
            attribute(2, vk::Format::R32G32_SFLOAT),
            attribute(3, vk::Format::R32G32B32_SFLOAT),
            attribute(4, vk::Format::R32G32B32_SFLOAT),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::model::rigged_column;

    #[test]
    fn attribute_streams_pack_back_to_back() {
        let (mesh, _) = rigged_column(8, 6, 4).unwrap();
        let offsets = packed_attribute_offsets(&mesh);

        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], (mesh.normals.len() * 4) as u64);
        assert_eq!(offsets[2], offsets[1] + (mesh.uvs.len() * 4) as u64);
        assert_eq!(offsets[3], offsets[2] + (mesh.weights.len() * 4) as u64);
        // Everything stays 4-byte aligned so the mapped writes land exactly
        // where the bind offsets say
        assert!(offsets.iter().all(|offset| offset % 4 == 0));
    }

    #[test]
    fn bindings_and_attributes_line_up() {
        let bindings = StaticGeometry::binding_descriptions();
        let attributes = StaticGeometry::attribute_descriptions();
        for (binding, attribute) in bindings.iter().zip(attributes.iter()) {
            assert_eq!(binding.binding, attribute.binding);
        }
    }
}
