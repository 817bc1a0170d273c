//! GPU time spent in each pass.
//!
//! Every execution writes a timestamp before and after each pass into its own
//! slot of one query pool and resolves the slot into a readback buffer. A
//! slot is read back when the same slot comes around again, `frame_count + 1`
//! frames later, which is when the device guarantees the GPU is done with it.

use std::time::Duration;

use crate::command_list::CommandList;
use crate::device::{BufferId, Device, QueryPoolId};
use crate::error::GraphicsError;
use crate::types::BufferDescriptor;

const TIMESTAMP_SIZE: u64 = std::mem::size_of::<u64>() as u64;

/// GPU time of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassTiming {
    /// Pass name.
    pub name: String,
    /// Time between the timestamps around the pass.
    pub duration: Duration,
    /// Device frame counter of the execution that was measured.
    pub frame: u64,
}

#[derive(Debug)]
pub(crate) struct PassTimer {
    pool: QueryPoolId,
    readback: BufferId,
    pass_count: u32,
    /// Nanoseconds per tick.
    period: f64,
    /// Frame counter each slot was last recorded in.
    recorded: Vec<Option<u64>>,
    /// Slot of the execution being recorded.
    current: u32,
}

impl PassTimer {
    /// Create the pool and readback buffer, or `None` when the device has no
    /// timestamps.
    pub fn new(device: &mut Device, pass_count: usize) -> Result<Option<Self>, GraphicsError> {
        let period = device.timestamp_period();
        if pass_count == 0 || period <= 0.0 {
            return Ok(None);
        }
        let pass_count = u32::try_from(pass_count)
            .map_err(|_| GraphicsError::InvalidParameter("too many passes to time".into()))?;
        let slots = device.config().frame_count + 1;
        let queries = slots * 2 * pass_count;
        let pool = device.create_query_pool(queries)?;
        let desc = BufferDescriptor::readback(u64::from(queries) * TIMESTAMP_SIZE)
            .with_label("pass timestamps");
        let readback = match device.create_buffer(&desc) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.release_query_pool(pool)?;
                return Err(err);
            }
        };
        log::debug!("Timing {} passes over {} frame slots", pass_count, slots);
        Ok(Some(Self {
            pool,
            readback,
            pass_count,
            period,
            recorded: vec![None; slots as usize],
            current: 0,
        }))
    }

    fn first_query(&self, slot: u32) -> u32 {
        slot * 2 * self.pass_count
    }

    /// Read back the results of the execution recorded one slot cycle ago, if
    /// it is complete.
    pub fn collect<'n>(
        &self,
        device: &mut Device,
        names: impl Iterator<Item = &'n str>,
    ) -> Result<Option<Vec<PassTiming>>, GraphicsError> {
        let counter = device.frame_counter();
        let slot = (counter % self.recorded.len() as u64) as usize;
        let frame_count = u64::from(device.config().frame_count);
        let Some(frame) = self.recorded[slot].filter(|&at| at + frame_count + 1 <= counter) else {
            return Ok(None);
        };

        let len = 2 * u64::from(self.pass_count);
        let offset = u64::from(self.first_query(slot as u32)) * TIMESTAMP_SIZE;
        let bytes = device.read_buffer_data(self.readback, offset, len * TIMESTAMP_SIZE)?;
        let ticks: Vec<u64> = bytes
            .chunks_exact(TIMESTAMP_SIZE as usize)
            .map(bytemuck::pod_read_unaligned::<u64>)
            .collect();
        Ok(Some(
            names
                .zip(ticks.chunks_exact(2))
                .map(|(name, pair)| PassTiming {
                    name: name.to_string(),
                    duration: Duration::from_nanos(
                        (pair[1].saturating_sub(pair[0]) as f64 * self.period) as u64,
                    ),
                    frame,
                })
                .collect(),
        ))
    }

    /// Reset this frame's slot. Call before any pass is recorded.
    pub fn begin(&mut self, device: &Device, cmd: &mut CommandList) {
        let counter = device.frame_counter();
        self.current = (counter % self.recorded.len() as u64) as u32;
        cmd.reset_queries(self.pool, self.first_query(self.current), 2 * self.pass_count);
    }

    pub fn pass_begin(&self, cmd: &mut CommandList, pass: usize) {
        cmd.write_timestamp(self.pool, self.first_query(self.current) + 2 * pass as u32);
    }

    pub fn pass_end(&self, cmd: &mut CommandList, pass: usize) {
        cmd.write_timestamp(self.pool, self.first_query(self.current) + 2 * pass as u32 + 1);
    }

    /// Copy this frame's slot into the readback buffer.
    pub fn finish(&mut self, device: &Device, cmd: &mut CommandList) {
        let first = self.first_query(self.current);
        cmd.resolve_queries(
            self.pool,
            first,
            2 * self.pass_count,
            self.readback,
            u64::from(first) * TIMESTAMP_SIZE,
        );
        self.recorded[self.current as usize] = Some(device.frame_counter());
    }

    /// Release the pool and the readback buffer through the deferred path.
    pub fn release(self, device: &mut Device) -> Result<(), GraphicsError> {
        let pool = device.release_query_pool(self.pool);
        let buffer = device.release_buffer(self.readback);
        pool.and(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_list::{Command, QueueType};
    use crate::device::DeviceConfig;

    #[test]
    fn test_slots_cycle_with_frames() {
        let mut device = Device::new(DeviceConfig::dummy().with_frame_count(2)).unwrap();
        let mut timer = PassTimer::new(&mut device, 2).unwrap().unwrap();
        assert_eq!(device.query_pool(timer.pool).unwrap().count(), 12);

        let mut cmd = CommandList::new(QueueType::Graphics);
        for frame in 0..4u32 {
            cmd.begin().unwrap();
            timer.begin(&device, &mut cmd);
            cmd.close().unwrap();
            let first = frame % 3 * 4;
            assert!(matches!(
                cmd.commands()[0],
                Command::ResetQueries { first: f, count: 4, .. } if f == first
            ));
            device.on_update().unwrap();
        }
        timer.release(&mut device).unwrap();
    }

    #[test]
    fn test_collect_waits_for_the_slot() {
        let mut device = Device::new(DeviceConfig::dummy().with_frame_count(1)).unwrap();
        let mut timer = PassTimer::new(&mut device, 1).unwrap().unwrap();
        let mut cmd = CommandList::new(QueueType::Graphics);
        cmd.begin().unwrap();
        timer.begin(&device, &mut cmd);
        timer.pass_begin(&mut cmd, 0);
        cmd.dispatch(1, 1, 1);
        timer.pass_end(&mut cmd, 0);
        timer.finish(&device, &mut cmd);
        cmd.close().unwrap();
        device.submit(&mut cmd, QueueType::Graphics).unwrap();

        assert_eq!(timer.collect(&mut device, ["a"].into_iter()).unwrap(), None);
        device.on_update().unwrap();
        assert_eq!(timer.collect(&mut device, ["a"].into_iter()).unwrap(), None);
        device.on_update().unwrap();

        let timings = timer.collect(&mut device, ["a"].into_iter()).unwrap().unwrap();
        assert_eq!(timings.len(), 1);
        assert_eq!(timings[0].name, "a");
        assert_eq!(timings[0].frame, 0);
        assert_eq!(
            timings[0].duration,
            Duration::from_nanos(2 * crate::backend::DUMMY_TICKS_PER_COMMAND)
        );
        timer.release(&mut device).unwrap();
    }

    #[test]
    fn test_no_timer_without_passes() {
        let mut device = Device::new(DeviceConfig::dummy()).unwrap();
        assert!(PassTimer::new(&mut device, 0).unwrap().is_none());
        assert_eq!(device.query_pool_count(), 0);
    }
}
