use embassy_time::{Duration, Timer};

use crate::config::{is_valid_channel, ChannelSet, PipelineConfig, SharedConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    InvalidChannel,
    /// The driver couldn't retune right now.
    Busy,
}
pub type RadioResult<T> = Result<T, RadioError>;

/// The part of the radio driver needed by the pipeline.
pub trait Radio {
    /// Set the channel on which to receive.
    fn set_channel(&self, channel_number: u8) -> RadioResult<()>;
}
impl<R: Radio + ?Sized> Radio for &R {
    fn set_channel(&self, channel_number: u8) -> RadioResult<()> {
        (**self).set_channel(channel_number)
    }
}

/// Cycles through the configured channel set.
///
/// The cursor is the only state, so the set, the interval and the enable flag can be changed at
/// any time and take effect on the next cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelHopper {
    cursor: usize,
}
impl ChannelHopper {
    pub const fn new() -> Self {
        Self { cursor: 0 }
    }
    /// The position of the next channel in the set.
    pub const fn cursor(&self) -> usize {
        self.cursor
    }
    /// Return the channel at the cursor and advance it, wrapping around at the end of the set.
    ///
    /// An empty set is treated as `{1}`.
    pub fn next_channel(&mut self, channels: &ChannelSet) -> u8 {
        let cycle_len = channels.cycle_len();
        let position = self.cursor % cycle_len;
        self.cursor = (position + 1) % cycle_len;
        channels.channel_at(position)
    }
    /// Run one hop cycle without sleeping.
    ///
    /// Returns the channel tuned to, or [None] if hopping is disabled or retuning failed.
    pub fn step(&mut self, config: &PipelineConfig, radio: &impl Radio) -> Option<u8> {
        if !config.hop_enabled {
            return None;
        }
        let channel_number = self.next_channel(&config.channels);
        debug_assert!(is_valid_channel(channel_number));
        match radio.set_channel(channel_number) {
            Ok(()) => {
                trace!("Hopped to channel {}.", channel_number);
                Some(channel_number)
            }
            Err(err) => {
                warn!("Failed to hop to channel {}: {:?}", channel_number, err);
                None
            }
        }
    }
    /// Hop forever.
    ///
    /// When hopping is disabled, this still sleeps for the configured interval, so enabling it
    /// takes effect within one interval.
    pub async fn run(&mut self, config: &SharedConfig, radio: &impl Radio) {
        loop {
            let snapshot = config.snapshot();
            self.step(&snapshot, radio);
            Timer::after(Duration::from_millis(snapshot.hop_interval_ms as u64)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    #[derive(Default)]
    struct RecordingRadio {
        tuned: RefCell<heapless::Vec<u8, 64>>,
        refuse: Option<u8>,
    }
    impl Radio for RecordingRadio {
        fn set_channel(&self, channel_number: u8) -> RadioResult<()> {
            if self.refuse == Some(channel_number) {
                return Err(RadioError::Busy);
            }
            self.tuned.borrow_mut().push(channel_number).unwrap();
            Ok(())
        }
    }

    fn hopping(channels: &[u8]) -> PipelineConfig {
        PipelineConfig {
            hop_enabled: true,
            channels: ChannelSet::from_slice(channels).unwrap(),
            ..PipelineConfig::DEFAULT
        }
    }

    #[test]
    fn cycles_with_period_of_set_size() {
        let radio = RecordingRadio::default();
        let mut hopper = ChannelHopper::new();
        let config = hopping(&[1, 6, 11]);
        for _ in 0..9 {
            hopper.step(&config, &radio);
        }
        assert_eq!(
            radio.tuned.borrow().as_slice(),
            &[1, 6, 11, 1, 6, 11, 1, 6, 11]
        );
        assert_eq!(hopper.cursor(), 0);
    }

    #[test]
    fn empty_set_is_channel_one() {
        let radio = RecordingRadio::default();
        let mut hopper = ChannelHopper::new();
        let config = hopping(&[]);
        for _ in 0..3 {
            assert_eq!(hopper.step(&config, &radio), Some(1));
        }
    }

    #[test]
    fn disabled_does_not_retune() {
        let radio = RecordingRadio::default();
        let mut hopper = ChannelHopper::new();
        let config = PipelineConfig::DEFAULT;
        assert!(!config.hop_enabled);
        assert_eq!(hopper.step(&config, &radio), None);
        assert!(radio.tuned.borrow().is_empty());
        assert_eq!(hopper.cursor(), 0);
    }

    #[test]
    fn shrinking_set_wraps_cursor() {
        let radio = RecordingRadio::default();
        let mut hopper = ChannelHopper::new();
        hopper.step(&hopping(&[1, 2, 3, 4]), &radio);
        hopper.step(&hopping(&[1, 2, 3, 4]), &radio);
        hopper.step(&hopping(&[1, 2, 3, 4]), &radio);
        assert_eq!(hopper.step(&hopping(&[7, 8]), &radio), Some(8));
        assert_eq!(hopper.step(&hopping(&[7, 8]), &radio), Some(7));
    }

    #[test]
    fn radio_errors_are_skipped() {
        let radio = RecordingRadio {
            refuse: Some(6),
            ..Default::default()
        };
        let mut hopper = ChannelHopper::new();
        let config = hopping(&[1, 6, 11]);
        assert_eq!(hopper.step(&config, &radio), Some(1));
        assert_eq!(hopper.step(&config, &radio), None);
        assert_eq!(hopper.step(&config, &radio), Some(11));
    }
}
