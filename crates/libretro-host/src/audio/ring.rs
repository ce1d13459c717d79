use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};

/// One interleaved stereo frame as produced by the core.
pub type StereoFrame = [i16; 2];

#[derive(Debug, Default)]
struct RingShared {
    flush: AtomicBool,
    overruns: AtomicU64,
    underruns: AtomicU64,
}

/// Creates a fresh SPSC ring holding `capacity` stereo frames.
pub fn audio_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let rb = HeapRb::<StereoFrame>::new(capacity.max(1));
    let (prod, cons) = rb.split();
    let shared = Arc::new(RingShared::default());
    (
        RingProducer {
            prod,
            shared: shared.clone(),
        },
        RingConsumer { cons, shared },
    )
}

/// Ring capacity in frames for `latency` of audio at `rate` Hz.
pub fn capacity_for(rate: f64, latency: std::time::Duration) -> usize {
    if !rate.is_finite() || rate <= 0.0 {
        return 1;
    }
    ((rate * latency.as_secs_f64()).ceil() as usize).max(1)
}

/// Write side, owned by the emulation thread.
pub struct RingProducer {
    prod: HeapProd<StereoFrame>,
    shared: Arc<RingShared>,
}

impl RingProducer {
    /// Appends up to `frame_count` frames from interleaved `samples`.
    ///
    /// Frames that do not fit are dropped and counted as overruns; unread
    /// frames are never overwritten. Returns the number of frames queued.
    pub fn write(&mut self, samples: &[i16], frame_count: usize) -> usize {
        let frames = frame_count.min(samples.len() / 2);
        let mut written = 0;
        for chunk in samples.chunks_exact(2).take(frames) {
            if self.prod.try_push([chunk[0], chunk[1]]).is_err() {
                break;
            }
            written += 1;
        }
        let dropped = frames - written;
        if dropped > 0 {
            self.shared
                .overruns
                .fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::trace!("audio ring full, dropped {} frames", dropped);
        }
        written
    }

    pub fn write_frame(&mut self, left: i16, right: i16) -> bool {
        self.write(&[left, right], 1) == 1
    }

    /// Asks the consumer to discard everything queued before its next read.
    pub fn request_flush(&self) {
        self.shared.flush.store(true, Ordering::SeqCst);
    }

    pub fn queued(&self) -> usize {
        self.prod.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.prod.capacity().get()
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            shared: self.shared.clone(),
        }
    }
}

/// Read side, owned by the real-time audio callback.
pub struct RingConsumer {
    cons: HeapCons<StereoFrame>,
    shared: Arc<RingShared>,
}

impl RingConsumer {
    fn apply_flush(&mut self) {
        if self.shared.flush.swap(false, Ordering::SeqCst) {
            while self.cons.try_pop().is_some() {}
        }
    }

    /// Next frame as `f32`, or silence (counted as an underrun) when empty.
    pub fn next_frame(&mut self) -> [f32; 2] {
        self.apply_flush();
        match self.cons.try_pop() {
            Some([l, r]) => [f32::from(l) / 32768.0, f32::from(r) / 32768.0],
            None => {
                self.shared.underruns.fetch_add(1, Ordering::Relaxed);
                [0.0, 0.0]
            }
        }
    }

    /// Fills `frame_count` interleaved stereo frames of `out`.
    pub fn read(&mut self, out: &mut [f32], frame_count: usize) {
        for frame in out.chunks_exact_mut(2).take(frame_count) {
            let [l, r] = self.next_frame();
            frame[0] = l;
            frame[1] = r;
        }
    }

    pub fn available(&self) -> usize {
        self.cons.occupied_len()
    }
}

/// Cloneable view of ring counters.
#[derive(Clone)]
pub struct RingStats {
    shared: Arc<RingShared>,
}

impl RingStats {
    /// Frames dropped because the ring was full.
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// Frames of silence emitted because the ring was empty.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn frames_come_out_in_order_as_f32() {
        let (mut prod, mut cons) = audio_ring(8);
        assert_eq!(prod.write(&[16384, -16384, 0, 32767], 2), 2);

        let mut out = [1.0f32; 4];
        cons.read(&mut out, 2);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], -0.5);
        assert_eq!(out[2], 0.0);
        assert!((out[3] - 32767.0 / 32768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn overflow_drops_tail_of_the_call() {
        let (mut prod, mut cons) = audio_ring(2);
        let samples = [1, 1, 2, 2, 3, 3];
        assert_eq!(prod.write(&samples, 3), 2);
        assert_eq!(prod.stats().overruns(), 1);

        let mut out = [0.0f32; 4];
        cons.read(&mut out, 2);
        assert_eq!(out, [1.0 / 32768.0, 1.0 / 32768.0, 2.0 / 32768.0, 2.0 / 32768.0]);
    }

    #[test]
    fn empty_ring_reads_silence_and_counts_underrun() {
        let (prod, mut cons) = audio_ring(4);
        let mut out = [9.0f32; 6];
        cons.read(&mut out, 3);
        assert_eq!(out, [0.0; 6]);
        assert_eq!(prod.stats().underruns(), 3);
    }

    #[test]
    fn flush_discards_queued_frames() {
        let (mut prod, mut cons) = audio_ring(4);
        prod.write(&[5, 5, 6, 6], 2);
        prod.request_flush();
        assert_eq!(cons.next_frame(), [0.0, 0.0]);
        assert_eq!(cons.available(), 0);
    }

    #[test]
    fn frame_count_bounds_the_write() {
        let (mut prod, _cons) = audio_ring(8);
        assert_eq!(prod.write(&[1, 1, 2, 2, 3, 3], 1), 1);
        assert_eq!(prod.queued(), 1);
        assert_eq!(prod.write(&[1, 1, 2], 4), 1);
    }

    #[test]
    fn capacity_tracks_latency() {
        assert_eq!(capacity_for(32_000.0, Duration::from_millis(750)), 24_000);
        assert_eq!(capacity_for(0.0, Duration::from_millis(750)), 1);
        let (prod, _) = audio_ring(capacity_for(44_100.0, Duration::from_millis(500)));
        assert_eq!(prod.capacity(), 22_050);
    }
}
