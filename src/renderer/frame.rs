use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use thiserror::Error;

use crate::renderer::core::swapchain::Swapchain;
use crate::renderer::util;

/// Frame-loop failures that are not ordinary recoverable staleness.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A fence wait ran past its budget. The GPU is assumed gone; there is
    /// no retry path.
    #[error("device lost: fence not signaled within {timeout_ns} ns")]
    DeviceLost { timeout_ns: u64 },
    #[error("vulkan call failed: {0}")]
    Vk(#[from] vk::Result),
}

/// What a completed draw call asks of the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum DrawOutcome {
    Presented,
    /// The surface no longer matches the chain; recreate and skip this frame.
    SwapchainStale,
}

/// CPU-side bookkeeping of the frame protocol: the fence guarding each
/// in-flight slot, and the fence that last used each swapchain image.
///
/// The rule it encodes: a slot may not be reused until its fence has been
/// waited, and an image acquired for one slot while another slot's
/// submission still references it forces a wait on that older fence first.
pub struct InFlightLedger {
    slot_fences: Vec<vk::Fence>,
    image_fences: Vec<vk::Fence>,
    current: usize,
}

impl InFlightLedger {
    pub fn new(slot_fences: Vec<vk::Fence>, image_count: usize) -> Self {
        Self {
            slot_fences,
            image_fences: vec![vk::Fence::null(); image_count],
            current: 0,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_fences.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// The fence that must be signaled before the current slot's resources
    /// may be touched again.
    pub fn current_fence(&self) -> vk::Fence {
        self.slot_fences[self.current]
    }

    /// Marks `image_index` as in use by the current slot. Returns the fence
    /// of a *different* slot whose submission still owns the image, which
    /// must be waited before the image's command buffer is resubmitted.
    pub fn claim_image(&mut self, image_index: u32) -> Option<vk::Fence> {
        let slot_fence = self.current_fence();
        let previous = self.image_fences[image_index as usize];
        self.image_fences[image_index as usize] = slot_fence;

        if previous != vk::Fence::null() && previous != slot_fence {
            Some(previous)
        } else {
            None
        }
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slot_fences.len();
    }

    /// Forgets every image-to-fence association. Called whenever the
    /// swapchain is recreated, since image indices no longer mean anything.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_fences.clear();
        self.image_fences.resize(image_count, vk::Fence::null());
    }

    pub fn fences(&self) -> &[vk::Fence] {
        &self.slot_fences
    }
}

/// Owns the per-slot synchronization objects and per-image command buffers,
/// and runs the acquire → record → submit → present cycle with at most
/// `slot_count` frames in flight.
pub struct FramePipeline {
    device: Arc<ash::Device>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    ledger: InFlightLedger,
    fence_timeout_ns: u64,
}

impl FramePipeline {
    pub fn new(
        device: Arc<ash::Device>,
        graphics_family: u32,
        graphics_queue: vk::Queue,
        present_queue: vk::Queue,
        slot_count: u32,
        image_count: usize,
        fence_timeout_ns: u64,
    ) -> Result<Self> {
        let command_pool = {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(graphics_family);
            unsafe { device.create_command_pool(&pool_info, None)? }
        };

        let mut image_available = Vec::with_capacity(slot_count as usize);
        let mut render_finished = Vec::with_capacity(slot_count as usize);
        let mut slot_fences = Vec::with_capacity(slot_count as usize);
        for _ in 0..slot_count {
            unsafe {
                image_available.push(
                    device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?,
                );
                render_finished.push(
                    device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?,
                );
                // Signaled so the first wait on each slot passes immediately
                slot_fences.push(device.create_fence(
                    &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                    None,
                )?);
            }
        }

        let mut pipeline = Self {
            device,
            graphics_queue,
            present_queue,
            command_pool,
            command_buffers: Vec::new(),
            image_available,
            render_finished,
            ledger: InFlightLedger::new(slot_fences, image_count),
            fence_timeout_ns,
        };
        pipeline.reallocate_command_buffers(image_count)?;

        Ok(pipeline)
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    pub fn free_command_buffers(&mut self) {
        if !self.command_buffers.is_empty() {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pool, &self.command_buffers);
            }
            self.command_buffers.clear();
        }
    }

    /// One primary command buffer per swapchain image, re-recorded in full
    /// by the caller after every swapchain rebuild.
    pub fn reallocate_command_buffers(&mut self, image_count: usize) -> Result<()> {
        self.free_command_buffers();

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(util::safe_u32(image_count)?);
        self.command_buffers = unsafe {
            self.device.allocate_command_buffers(&allocate_info)?
        };

        Ok(())
    }

    pub fn reset_image_fences(&mut self, image_count: usize) {
        self.ledger.reset_images(image_count);
    }

    /// Runs one full frame: wait, acquire, hazard check, submit, present.
    ///
    /// `before_submit` is invoked with the acquired image index once the
    /// hazard wait has proven the GPU no longer references that image's
    /// resources; this is where the per-frame uniform upload happens.
    pub fn draw(
        &mut self,
        swapchain: &Swapchain,
        before_submit: impl FnOnce(u32) -> Result<()>,
    ) -> Result<DrawOutcome> {
        let slot = self.ledger.current_slot();
        self.wait_fence(self.ledger.current_fence())?;

        let acquire = unsafe {
            swapchain.loader.acquire_next_image(
                swapchain.handle,
                u64::MAX,
                self.image_available[slot],
                vk::Fence::null(),
            )
        };
        let image_index = match acquire {
            // A suboptimal acquire still delivered a usable image; present
            // will report the staleness once this frame is on screen
            Ok((index, _suboptimal)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date during acquire");
                return Ok(DrawOutcome::SwapchainStale);
            }
            Err(err) => return Err(FrameError::from(err).into()),
        };

        if let Some(previous_owner) = self.ledger.claim_image(image_index) {
            self.wait_fence(previous_owner)?;
        }

        before_submit(image_index)?;

        let fence = self.ledger.current_fence();
        unsafe {
            self.device.reset_fences(&[fence]).map_err(FrameError::from)?;
        }

        let wait_semaphores = [self.image_available[slot]];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[image_index as usize]];
        let signal_semaphores = [self.render_finished[slot]];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
                .map_err(FrameError::from)?;
        }

        let swapchains = [swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let present = unsafe {
            swapchain
                .loader
                .queue_present(self.present_queue, &present_info)
        };

        self.ledger.advance();

        match present {
            Ok(false) => Ok(DrawOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain stale during present");
                Ok(DrawOutcome::SwapchainStale)
            }
            Err(err) => Err(FrameError::from(err).into()),
        }
    }

    fn wait_fence(&self, fence: vk::Fence) -> std::result::Result<(), FrameError> {
        let result = unsafe {
            self.device
                .wait_for_fences(&[fence], true, self.fence_timeout_ns)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(FrameError::DeviceLost {
                timeout_ns: self.fence_timeout_ns,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Only safe after the device has gone idle.
    pub fn destroy(&mut self) {
        unsafe {
            for semaphore in self.image_available.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            for semaphore in self.render_finished.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            for &fence in self.ledger.fences() {
                self.device.destroy_fence(fence, None);
            }
            self.ledger.slot_fences.clear();
            self.free_command_buffers();
            if self.command_pool != vk::CommandPool::null() {
                self.device.destroy_command_pool(self.command_pool, None);
                self.command_pool = vk::CommandPool::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::collections::HashSet;

    fn fence(id: u64) -> vk::Fence {
        vk::Fence::from_raw(id)
    }

    fn ledger(slots: u64, images: usize) -> InFlightLedger {
        InFlightLedger::new((1..=slots).map(fence).collect(), images)
    }

    /// Simulates the CPU loop against a GPU that never completes anything.
    /// Every slot fence starts signaled, is consumed on submit, and is never
    /// signaled again; the (N+1)-th frame must find its fence unsignaled.
    #[test]
    fn cpu_blocks_on_the_frame_after_the_last_free_slot() {
        let slots = 3u64;
        let mut ledger = ledger(slots, 4);
        let mut signaled: HashSet<vk::Fence> = (1..=slots).map(fence).collect();

        for frame in 0..slots {
            let guard = ledger.current_fence();
            assert!(
                signaled.contains(&guard),
                "frame {} should not have to block",
                frame
            );
            // Submit: the fence is now pending on the stalled GPU
            signaled.remove(&guard);
            ledger.claim_image(frame as u32);
            ledger.advance();
        }

        // Fourth frame: the wheel is back at slot 0 and its fence is still
        // pending, so the protocol demands a blocking wait here
        assert!(!signaled.contains(&ledger.current_fence()));
    }

    #[test]
    fn image_reuse_by_another_slot_requires_waiting_its_fence() {
        let mut ledger = ledger(2, 3);

        assert_eq!(ledger.claim_image(0), None);
        ledger.advance();

        // Slot 1 grabs the image slot 0 still owns
        assert_eq!(ledger.claim_image(0), Some(fence(1)));
        // And the ownership record now points at slot 1
        ledger.advance();
        assert_eq!(ledger.claim_image(0), Some(fence(2)));
    }

    #[test]
    fn same_slot_reacquiring_its_own_image_needs_no_wait() {
        let mut ledger = ledger(2, 2);

        assert_eq!(ledger.claim_image(1), None);
        // Same slot, same image: its own fence wait already covered it
        assert_eq!(ledger.claim_image(1), None);
    }

    #[test]
    fn fresh_images_carry_no_hazard() {
        let mut ledger = ledger(3, 3);
        for image in 0..3 {
            assert_eq!(ledger.claim_image(image), None);
            ledger.advance();
        }
    }

    #[test]
    fn reset_clears_image_ownership() {
        let mut ledger = ledger(2, 2);
        ledger.claim_image(0);
        ledger.advance();

        ledger.reset_images(3);
        assert_eq!(ledger.claim_image(0), None);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut ledger = ledger(2, 2);
        ledger.claim_image(0);
        ledger.reset_images(2);
        ledger.reset_images(2);
        assert_eq!(ledger.claim_image(0), None);
        assert_eq!(ledger.slot_count(), 2);
    }

    #[test]
    fn slots_cycle_modulo_n() {
        let mut ledger = ledger(3, 3);
        for expected in [0usize, 1, 2, 0, 1] {
            assert_eq!(ledger.current_slot(), expected);
            ledger.advance();
        }
    }
}
