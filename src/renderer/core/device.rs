use std::ffi::{c_char, CStr};
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use smallvec::SmallVec;

use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::surface::RenderSurface;
use crate::renderer::util;

/// Owns the logical device and the task-specific queues carved out of it.
///
/// Presentation always goes through the graphics queue; device creation fails
/// if no graphics family can present to the target surface.
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,

    pub graphics_queue: Queue,
    pub compute_queue: Queue,
    pub transfer_queue: Queue,
    pub sparse_queue: Option<Queue>,
    pub protected_queue: Option<Queue>,
}

pub struct Queue {
    pub handle: vk::Queue,
    pub family: u32,
}

impl RenderDevice {
    pub fn new(ins: &RenderInstance, surface: &RenderSurface) -> Result<Self> {
        let physical = Self::select_physical_device(&ins.instance)?;

        let queue_families = unsafe {
            ins.instance.get_physical_device_queue_family_properties(physical)
        };
        let plan = plan_queues(&queue_families, |family| unsafe {
            surface
                .loader
                .get_physical_device_surface_support(physical, family, surface.handle)
                .unwrap_or(false)
        })?;

        let logical = Self::create_logical_device(&ins.instance, physical, &plan)?;

        let fetch = |slot: &QueueSlot| Queue {
            handle: unsafe { logical.get_device_queue(slot.family, slot.index) },
            family: slot.family,
        };
        let graphics_queue = fetch(&plan.graphics);
        let compute_queue = fetch(&plan.compute);
        let transfer_queue = fetch(&plan.transfer);
        let sparse_queue = plan.sparse.as_ref().map(&fetch);
        let protected_queue = plan.protected.as_ref().map(&fetch);

        log::info!(
            "Created device with queue families: graphics {}, compute {}, transfer {}",
            graphics_queue.family,
            compute_queue.family,
            transfer_queue.family,
        );

        Ok(Self {
            logical: Arc::new(logical),
            physical,
            graphics_queue,
            compute_queue,
            transfer_queue,
            sparse_queue,
            protected_queue,
        })
    }

    /// The present queue aliases the graphics queue; family selection already
    /// guaranteed it can present.
    pub fn present_queue(&self) -> &Queue {
        &self.graphics_queue
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices()? };
        if devices.is_empty() {
            return Err(eyre!("No Vulkan physical devices found"));
        }

        let discrete = devices.iter().copied().find(|device| {
            let props = unsafe { instance.get_physical_device_properties(*device) };
            props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
        });

        Ok(match discrete {
            Some(device) => device,
            None => {
                log::warn!("No discrete GPU found, falling back to the first enumerated device");
                devices[0]
            }
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical: vk::PhysicalDevice,
        plan: &QueuePlan,
    ) -> Result<ash::Device> {
        let req_device_exts = Self::get_required_device_extensions();
        let supported_extensions = unsafe {
            instance.enumerate_device_extension_properties(physical)?
        };
        for req_ext in &req_device_exts {
            let supported = supported_extensions.iter().any(|ext| {
                ext.extension_name_as_c_str()
                    .map_or(false, |name| name == *req_ext)
            });
            if !supported {
                return Err(eyre!("Device extension {:?} not supported", req_ext));
            }
        }

        let queue_create_infos = plan
            .families
            .iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family.family)
                    .queue_priorities(&family.priorities)
            })
            .collect::<Vec<_>>();

        let enabled_extension_names = req_device_exts
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names);

        Ok(unsafe {
            instance.create_device(physical, &device_create_info, None)?
        })
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,

            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            self.logical.destroy_device(None);
        }
    }
}

/// Scheduling weight per queue role. These express importance to the driver's
/// scheduler, not execution order.
fn queue_priority(flags: vk::QueueFlags) -> f32 {
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        0.75
    } else if flags.contains(vk::QueueFlags::COMPUTE) {
        1.00
    } else if flags.contains(vk::QueueFlags::TRANSFER) {
        0.50
    } else if flags.contains(vk::QueueFlags::SPARSE_BINDING) {
        0.20
    } else if flags.contains(vk::QueueFlags::PROTECTED) {
        0.10
    } else {
        0.0
    }
}

/// Where a logical queue landed: which family, and which queue index inside
/// that family's creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSlot {
    pub family: u32,
    pub index: u32,
}

/// One consolidated creation request per queue family. Multiple logical
/// queues landing in the same family become multiple priorities here.
#[derive(Debug)]
pub struct FamilyRequest {
    pub family: u32,
    pub priorities: SmallVec<[f32; 5]>,
}

#[derive(Debug)]
pub struct QueuePlan {
    pub graphics: QueueSlot,
    pub compute: QueueSlot,
    pub transfer: QueueSlot,
    pub sparse: Option<QueueSlot>,
    pub protected: Option<QueueSlot>,
    pub families: Vec<FamilyRequest>,
}

/// Resolves the five logical queue roles against the advertised families.
///
/// Graphics must come from a family that can also present; compute prefers a
/// family disjoint from graphics; transfer prefers a family disjoint from
/// both, falling back all the way to reusing the graphics queue itself.
/// Sparse-binding and protected queues are best-effort. Each claimed slot
/// consumes one unit of its family's queue capacity.
pub fn plan_queues(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Result<QueuePlan> {
    fn claim(
        families: &[vk::QueueFamilyProperties],
        remaining: &mut [u32],
        want: vk::QueueFlags,
        disallow: vk::QueueFlags,
    ) -> Option<u32> {
        let index = families.iter().enumerate().position(|(i, family)| {
            family.queue_flags.contains(want)
                && !family.queue_flags.intersects(disallow)
                && remaining[i] > 0
        })?;
        remaining[index] -= 1;
        Some(index as u32)
    }

    let mut remaining = families
        .iter()
        .map(|family| family.queue_count)
        .collect::<Vec<u32>>();

    let graphics_family = {
        let index = families.iter().enumerate().position(|(i, family)| {
            family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && supports_present(i as u32)
                && remaining[i] > 0
        });
        let index = index.ok_or_else(|| {
            eyre!("No graphics queue family with presentation support found")
        })?;
        remaining[index] -= 1;
        index as u32
    };

    let compute_family = claim(families, &mut remaining, vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS)
        .or_else(|| claim(families, &mut remaining, vk::QueueFlags::COMPUTE, vk::QueueFlags::empty()))
        .ok_or_else(|| eyre!("No compute queue family found"))?;

    let transfer_family = claim(
        families,
        &mut remaining,
        vk::QueueFlags::TRANSFER,
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
    )
    .or_else(|| claim(families, &mut remaining, vk::QueueFlags::TRANSFER, vk::QueueFlags::COMPUTE))
    .or_else(|| claim(families, &mut remaining, vk::QueueFlags::TRANSFER, vk::QueueFlags::empty()));

    let sparse_family = claim(families, &mut remaining, vk::QueueFlags::SPARSE_BINDING, vk::QueueFlags::empty());
    let protected_family = claim(families, &mut remaining, vk::QueueFlags::PROTECTED, vk::QueueFlags::empty());

    // Consolidate the claimed slots into one creation request per family
    let mut requests: Vec<FamilyRequest> = Vec::new();
    let mut place = |family: u32, priority: f32| -> Result<QueueSlot> {
        let request = match requests.iter_mut().find(|r| r.family == family) {
            Some(request) => request,
            None => {
                requests.push(FamilyRequest {
                    family,
                    priorities: SmallVec::new(),
                });
                requests.last_mut().unwrap()
            }
        };
        request.priorities.push(priority);
        Ok(QueueSlot {
            family,
            index: util::safe_u32(request.priorities.len() - 1)?,
        })
    };

    let graphics = place(graphics_family, queue_priority(vk::QueueFlags::GRAPHICS))?;
    let compute = place(compute_family, queue_priority(vk::QueueFlags::COMPUTE))?;
    let transfer = match transfer_family {
        Some(family) => place(family, queue_priority(vk::QueueFlags::TRANSFER))?,
        // Every family is exhausted; share the graphics queue itself
        None => graphics,
    };
    let sparse = match sparse_family {
        Some(family) => Some(place(family, queue_priority(vk::QueueFlags::SPARSE_BINDING))?),
        None => None,
    };
    let protected = match protected_family {
        Some(family) => Some(place(family, queue_priority(vk::QueueFlags::PROTECTED))?),
        None => None,
    };

    Ok(QueuePlan {
        graphics,
        compute,
        transfer,
        sparse,
        protected,
        families: requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    const G: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const C: vk::QueueFlags = vk::QueueFlags::COMPUTE;
    const T: vk::QueueFlags = vk::QueueFlags::TRANSFER;
    const S: vk::QueueFlags = vk::QueueFlags::SPARSE_BINDING;

    #[test]
    fn dedicated_families_get_their_own_slots() {
        let families = [
            family(G | C | T | S, 16),
            family(T | S, 2),
            family(C | T | S, 8),
        ];
        let plan = plan_queues(&families, |_| true).unwrap();

        assert_eq!(plan.graphics, QueueSlot { family: 0, index: 0 });
        // Compute avoids the graphics family
        assert_eq!(plan.compute.family, 2);
        // Transfer avoids both graphics and compute
        assert_eq!(plan.transfer.family, 1);
        // Sparse is best-effort and lands wherever capacity remains
        assert_eq!(plan.sparse.unwrap().family, 0);
        assert!(plan.protected.is_none());
    }

    #[test]
    fn shared_family_slots_are_consolidated() {
        let families = [family(G | C | T | S, 16)];
        let plan = plan_queues(&families, |_| true).unwrap();

        assert_eq!(plan.families.len(), 1);
        let request = &plan.families[0];
        // graphics, compute, transfer, sparse all in one request
        assert_eq!(request.priorities.as_slice(), &[0.75, 1.0, 0.5, 0.2]);
        assert_eq!(plan.graphics.index, 0);
        assert_eq!(plan.compute.index, 1);
        assert_eq!(plan.transfer.index, 2);
        assert_eq!(plan.sparse.unwrap().index, 3);
    }

    #[test]
    fn exhausted_capacity_falls_back_to_the_graphics_queue() {
        let families = [family(G | C | T, 2)];
        let plan = plan_queues(&families, |_| true).unwrap();

        // Two queues: graphics and compute. Transfer shares graphics.
        assert_eq!(plan.families[0].priorities.len(), 2);
        assert_eq!(plan.transfer, plan.graphics);
        assert!(plan.sparse.is_none());
    }

    #[test]
    fn missing_present_support_is_fatal() {
        let families = [family(G | C | T, 4)];
        assert!(plan_queues(&families, |_| false).is_err());
    }

    #[test]
    fn missing_compute_is_fatal() {
        let families = [family(G | T, 4)];
        assert!(plan_queues(&families, |_| true).is_err());
    }

    #[test]
    fn priorities_follow_the_fixed_table() {
        assert_eq!(queue_priority(G), 0.75);
        assert_eq!(queue_priority(C), 1.00);
        assert_eq!(queue_priority(T), 0.50);
        assert_eq!(queue_priority(S), 0.20);
        assert_eq!(queue_priority(vk::QueueFlags::PROTECTED), 0.10);
    }

    #[test]
    fn claims_consume_family_capacity() {
        // Second family has one queue; transfer claims it, sparse then has
        // to fall back to the big family
        let families = [family(G | C | S, 8), family(T | S, 1)];
        let plan = plan_queues(&families, |_| true).unwrap();

        assert_eq!(plan.transfer.family, 1);
        assert_eq!(plan.sparse.unwrap().family, 0);
    }
}
