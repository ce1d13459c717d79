//! Audio path: core callbacks push into a lock-free ring, the output device
//! pulls from it in real time.

#[cfg(feature = "audio")]
pub mod output;
pub mod ring;

use std::time::Duration;

use crate::config::AudioMode;
use crate::error::HostError;

pub use ring::{RingConsumer, RingProducer, RingStats, StereoFrame, audio_ring, capacity_for};

enum Drain {
    #[cfg(feature = "audio")]
    Device(output::AudioOutput),
    /// No device: the consumer stays with the host so it can be inspected.
    Detached(RingConsumer),
}

/// Owns the consuming half of the session's audio ring.
pub struct AudioPipeline {
    mode: AudioMode,
    latency: Duration,
    drain: Option<Drain>,
    stats: Option<RingStats>,
    rate: f64,
    device_error: Option<String>,
}

impl AudioPipeline {
    pub fn new(mode: AudioMode, latency: Duration) -> Self {
        Self {
            mode,
            latency,
            drain: None,
            stats: None,
            rate: 0.0,
            device_error: None,
        }
    }

    /// Builds a fresh ring sized for `rate` and connects its consumer.
    ///
    /// Returns the producer for the emulation side. A device that fails to
    /// open degrades to a detached ring.
    pub fn start(&mut self, rate: f64) -> RingProducer {
        self.stop();
        let capacity = capacity_for(rate, self.latency);
        let (mut producer, consumer) = audio_ring(capacity);
        let drain = match self.mode {
            AudioMode::Disabled => Drain::Detached(consumer),
            AudioMode::Auto => match open_device(consumer, rate) {
                Ok(drain) => {
                    self.device_error = None;
                    drain
                }
                Err(reason) => {
                    tracing::warn!("audio output unavailable, continuing silently: {reason}");
                    self.device_error = Some(reason);
                    let (fresh_prod, fresh_cons) = audio_ring(capacity);
                    producer = fresh_prod;
                    Drain::Detached(fresh_cons)
                }
            },
        };
        self.stats = Some(producer.stats());
        self.rate = rate;
        self.drain = Some(drain);
        producer
    }

    /// Disconnects the output. The ring is discarded.
    pub fn stop(&mut self) {
        if self.drain.take().is_some() {
            tracing::debug!("audio output stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.drain.is_some()
    }

    /// Whether frames are actually reaching an output device.
    pub fn is_audible(&self) -> bool {
        match &self.drain {
            #[cfg(feature = "audio")]
            Some(Drain::Device(_)) => true,
            _ => false,
        }
    }

    /// Sample rate of the attached output device.
    pub fn device_rate(&self) -> Option<u32> {
        match &self.drain {
            #[cfg(feature = "audio")]
            Some(Drain::Device(out)) => Some(out.device_rate()),
            _ => None,
        }
    }

    /// Why the last `start` ran without a device, when audio was requested.
    pub fn device_status(&self) -> Result<(), HostError> {
        match &self.device_error {
            Some(reason) => Err(HostError::Audio(reason.clone())),
            None => Ok(()),
        }
    }

    /// Rate the current ring was built for.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn stats(&self) -> Option<RingStats> {
        self.stats.clone()
    }

    /// The ring consumer when no device is attached.
    pub fn detached_consumer(&mut self) -> Option<&mut RingConsumer> {
        match &mut self.drain {
            Some(Drain::Detached(consumer)) => Some(consumer),
            _ => None,
        }
    }
}

#[cfg(feature = "audio")]
fn open_device(consumer: RingConsumer, rate: f64) -> Result<Drain, String> {
    output::AudioOutput::open(consumer, rate)
        .map(Drain::Device)
        .map_err(|e| format!("{e:#}"))
}

#[cfg(not(feature = "audio"))]
fn open_device(_consumer: RingConsumer, _rate: f64) -> Result<Drain, String> {
    Err("built without the `audio` feature".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_pipeline_keeps_consumer_detached() {
        let mut pipeline = AudioPipeline::new(AudioMode::Disabled, Duration::from_millis(500));
        let mut producer = pipeline.start(32_000.0);
        assert_eq!(producer.capacity(), 16_000);
        assert!(pipeline.is_running());
        assert!(!pipeline.is_audible());
        assert!(pipeline.device_status().is_ok());

        producer.write(&[16384, 16384], 1);
        let consumer = pipeline.detached_consumer().expect("detached");
        assert_eq!(consumer.next_frame(), [0.5, 0.5]);

        pipeline.stop();
        assert!(!pipeline.is_running());
        assert!(pipeline.detached_consumer().is_none());
    }

    #[test]
    fn restart_builds_a_fresh_ring() {
        let mut pipeline = AudioPipeline::new(AudioMode::Disabled, Duration::from_millis(100));
        let mut first = pipeline.start(10_000.0);
        first.write(&[1, 1, 2, 2], 2);

        let _second = pipeline.start(20_000.0);
        assert_eq!(pipeline.rate(), 20_000.0);
        let consumer = pipeline.detached_consumer().expect("detached");
        assert_eq!(consumer.available(), 0);
    }
}
