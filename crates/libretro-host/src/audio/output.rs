use anyhow::{Context, Result};
use cpal::{
    FromSample, Sample, SampleFormat, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};

use super::ring::RingConsumer;

/// Linear interpolation from the core rate to the device rate.
struct Resampler {
    step: f64,
    pos: f64,
    prev: [f32; 2],
    next: [f32; 2],
}

impl Resampler {
    fn new(core_rate: f64, device_rate: f64) -> Self {
        Self {
            step: core_rate / device_rate,
            pos: 1.0,
            prev: [0.0; 2],
            next: [0.0; 2],
        }
    }

    fn is_passthrough(&self) -> bool {
        (self.step - 1.0).abs() < 1e-9
    }

    fn next(&mut self, ring: &mut RingConsumer) -> [f32; 2] {
        if self.is_passthrough() {
            return ring.next_frame();
        }
        while self.pos >= 1.0 {
            self.prev = self.next;
            self.next = ring.next_frame();
            self.pos -= 1.0;
        }
        let t = self.pos as f32;
        self.pos += self.step;
        [
            self.prev[0] + (self.next[0] - self.prev[0]) * t,
            self.prev[1] + (self.next[1] - self.prev[1]) * t,
        ]
    }
}

/// cpal output stream draining an audio ring on the default device.
pub struct AudioOutput {
    device_rate: u32,
    _stream: cpal::Stream,
}

impl AudioOutput {
    /// Opens the default output device and starts pulling from `ring`, whose
    /// frames are produced at `core_rate` Hz.
    pub fn open(ring: RingConsumer, core_rate: f64) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("no default output device")?;

        let config = device
            .default_output_config()
            .context("no default output config")?;
        let device_rate = config.sample_rate().0;
        let resampler = Resampler::new(core_rate, f64::from(device_rate));

        let stream = match config.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), ring, resampler)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), ring, resampler)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), ring, resampler)?,
            other => anyhow::bail!("unsupported sample format {other:?}"),
        };
        stream.play()?;

        tracing::info!(
            "audio output started: core {:.0} Hz -> device {} Hz",
            core_rate,
            device_rate
        );
        Ok(Self {
            device_rate,
            _stream: stream,
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut ring: RingConsumer,
    mut resampler: Resampler,
) -> Result<cpal::Stream>
where
    T: Sample + SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_fn = |err| tracing::warn!("audio stream error: {err}");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            for frame in data.chunks_mut(channels) {
                let [l, r] = resampler.next(&mut ring);
                match channels {
                    0 => {}
                    1 => {
                        frame[0] = ((l + r) * 0.5).to_sample::<T>();
                    }
                    _ => {
                        let r_conv: T = r.to_sample::<T>();
                        frame[0] = l.to_sample::<T>();
                        frame[1] = r_conv;
                        for ch in &mut frame[2..] {
                            *ch = r_conv;
                        }
                    }
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ring::audio_ring;

    #[test]
    fn equal_rates_pass_frames_through() {
        let (mut prod, mut cons) = audio_ring(4);
        prod.write(&[16384, 16384, -16384, -16384], 2);
        let mut rs = Resampler::new(48_000.0, 48_000.0);
        assert_eq!(rs.next(&mut cons), [0.5, 0.5]);
        assert_eq!(rs.next(&mut cons), [-0.5, -0.5]);
    }

    #[test]
    fn upsampling_interpolates_between_frames() {
        let (mut prod, mut cons) = audio_ring(8);
        prod.write(&[0, 0, 16384, 16384, 16384, 16384], 3);
        let mut rs = Resampler::new(24_000.0, 48_000.0);
        let left: Vec<f32> = (0..5).map(|_| rs.next(&mut cons)[0]).collect();
        assert_eq!(left, vec![0.0, 0.0, 0.0, 0.25, 0.5]);
    }
}
