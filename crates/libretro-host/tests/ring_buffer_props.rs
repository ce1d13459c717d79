use std::collections::VecDeque;

use libretro_host::audio::audio_ring;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Write(Vec<i16>),
    Read(usize),
    Flush,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => prop::collection::vec(any::<i16>(), 0..64).prop_map(|mut samples| {
            samples.truncate(samples.len() & !1);
            Op::Write(samples)
        }),
        3 => (0usize..40).prop_map(Op::Read),
        1 => Just(Op::Flush),
    ]
}

fn to_f32(frame: [i16; 2]) -> [f32; 2] {
    [
        f32::from(frame[0]) / 32768.0,
        f32::from(frame[1]) / 32768.0,
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn ring_matches_a_bounded_fifo(
        capacity in 1usize..48,
        ops in prop::collection::vec(op_strategy(), 1..64),
    ) {
        let (mut producer, mut consumer) = audio_ring(capacity);
        let stats = producer.stats();
        let mut model: VecDeque<[i16; 2]> = VecDeque::new();
        let mut pending_flush = false;
        let mut overruns = 0u64;
        let mut underruns = 0u64;

        for op in ops {
            match op {
                Op::Write(samples) => {
                    let frames = samples.len() / 2;
                    let written = producer.write(&samples, frames);
                    let room = capacity - model.len();
                    prop_assert_eq!(written, frames.min(room));
                    for chunk in samples.chunks_exact(2).take(written) {
                        model.push_back([chunk[0], chunk[1]]);
                    }
                    overruns += (frames - written) as u64;
                }
                Op::Read(count) => {
                    // The consumer applies a pending flush on its first pop.
                    if pending_flush && count > 0 {
                        model.clear();
                        pending_flush = false;
                    }
                    let mut out = vec![1.0f32; count * 2];
                    consumer.read(&mut out, count);
                    for frame in out.chunks_exact(2) {
                        let expected = match model.pop_front() {
                            Some(queued) => to_f32(queued),
                            None => {
                                underruns += 1;
                                [0.0, 0.0]
                            }
                        };
                        prop_assert_eq!([frame[0], frame[1]], expected);
                    }
                }
                Op::Flush => {
                    producer.request_flush();
                    pending_flush = true;
                }
            }
            prop_assert!(producer.queued() <= capacity);
        }

        prop_assert_eq!(stats.overruns(), overruns);
        prop_assert_eq!(stats.underruns(), underruns);
    }

    #[test]
    fn writes_never_exceed_capacity(capacity in 1usize..32, frames in 0usize..96) {
        let (mut producer, consumer) = audio_ring(capacity);
        let samples = vec![7i16; frames * 2];
        let written = producer.write(&samples, frames);
        prop_assert_eq!(written, frames.min(capacity));
        prop_assert_eq!(consumer.available(), written);
        prop_assert_eq!(producer.stats().overruns(), (frames - written) as u64);
    }
}
