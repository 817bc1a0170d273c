//! Timeline semaphores tracking submission progress.

use ash::vk;

use crate::command_list::QueueType;
use crate::error::GraphicsError;

/// One timeline per logical queue.
///
/// Every queue type shares the same hardware queue, but submissions are still
/// numbered per queue type so values never leak across types.
pub struct Timelines {
    semaphores: [vk::Semaphore; 3],
    next_values: [u64; 3],
}

impl Timelines {
    /// Create three timeline semaphores starting at zero.
    pub fn new(device: &ash::Device) -> Result<Self, GraphicsError> {
        let mut semaphores = [vk::Semaphore::null(); 3];
        for index in 0..semaphores.len() {
            match create_timeline(device) {
                Ok(semaphore) => semaphores[index] = semaphore,
                Err(e) => {
                    for semaphore in &semaphores[..index] {
                        unsafe { device.destroy_semaphore(*semaphore, None) };
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            semaphores,
            next_values: [1; 3],
        })
    }

    /// Semaphore of a queue.
    pub fn semaphore(&self, queue: QueueType) -> vk::Semaphore {
        self.semaphores[queue.index()]
    }

    /// Value the next submission on `queue` will signal.
    pub fn next_value(&self, queue: QueueType) -> u64 {
        self.next_values[queue.index()]
    }

    /// Mark the value from [`Self::next_value`] as submitted.
    pub fn commit(&mut self, queue: QueueType) {
        self.next_values[queue.index()] += 1;
    }

    /// Latest signaled value of every queue, indexed by [`QueueType::index`].
    pub fn completed_all(&self, device: &ash::Device) -> Result<[u64; 3], GraphicsError> {
        let mut values = [0; 3];
        for queue in QueueType::ALL {
            values[queue.index()] = self.completed(device, queue)?;
        }
        Ok(values)
    }

    /// Latest value signaled on `queue`.
    pub fn completed(&self, device: &ash::Device, queue: QueueType) -> Result<u64, GraphicsError> {
        unsafe { device.get_semaphore_counter_value(self.semaphore(queue)) }.map_err(map_device_error)
    }

    /// Block until `value` is signaled on `queue`.
    pub fn wait(
        &self,
        device: &ash::Device,
        queue: QueueType,
        value: u64,
    ) -> Result<(), GraphicsError> {
        if value >= self.next_values[queue.index()] {
            return Err(GraphicsError::InvalidParameter(format!(
                "submission {value} on {queue:?} was never submitted"
            )));
        }
        let semaphores = [self.semaphore(queue)];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { device.wait_semaphores(&wait_info, u64::MAX) }.map_err(map_device_error)
    }

    /// Destroy the semaphores. The device must be idle.
    pub fn destroy(&mut self, device: &ash::Device) {
        for semaphore in &mut self.semaphores {
            unsafe { device.destroy_semaphore(*semaphore, None) };
            *semaphore = vk::Semaphore::null();
        }
    }
}

fn create_timeline(device: &ash::Device) -> Result<vk::Semaphore, GraphicsError> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(0);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
    unsafe { device.create_semaphore(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create timeline semaphore: {:?}", e))
    })
}

/// Map a Vulkan error from a queue or wait operation.
pub fn map_device_error(result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => GraphicsError::Internal(format!("Vulkan error: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_errors_map() {
        assert_eq!(
            map_device_error(vk::Result::ERROR_DEVICE_LOST),
            GraphicsError::DeviceLost
        );
        assert_eq!(
            map_device_error(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GraphicsError::OutOfMemory
        );
        assert!(matches!(
            map_device_error(vk::Result::TIMEOUT),
            GraphicsError::Internal(_)
        ));
    }
}
