#[cfg(test)]
mod proptest_interlock {
    use crate::input::DebouncedInput;
    use crate::hal::InputLine;
    use crate::interlock::{Direction, EnergizedState};
    use crate::pulse::PulseRingBuffer;
    use crate::rpm::raw_rpm;
    use crate::safety::{DirectionCommand, InterlockViolation};
    use proptest::prelude::*;

    fn energized_state() -> impl Strategy<Value = EnergizedState> {
        prop_oneof![
            Just(EnergizedState::DeEnergized),
            Just(EnergizedState::Energizing),
            Just(EnergizedState::Energized),
            Just(EnergizedState::DeEnergizing),
        ]
    }

    fn direction() -> impl Strategy<Value = Direction> {
        prop_oneof![
            Just(Direction::Neutral),
            Just(Direction::Forward),
            Just(Direction::Backward),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        // Accepted transitions are never closer together than the interval.
        #[test]
        fn debounce_spaces_transitions(
            steps in prop::collection::vec((any::<bool>(), 0u64..80_000), 1..200),
            interval_us in 1u64..100_000,
        ) {
            let mut input = DebouncedInput::new(InputLine::Forward, false);
            let mut now_us = 0u64;
            let mut last_accept: Option<u64> = None;
            for (raw, dt) in steps {
                now_us += dt;
                if let Some(level) = input.update(raw, now_us, interval_us) {
                    prop_assert_eq!(level, raw);
                    if let Some(prev) = last_accept {
                        prop_assert!(now_us - prev >= interval_us,
                            "accepted at {} after {} with interval {}", now_us, prev, interval_us);
                    }
                    last_accept = Some(now_us);
                }
                if last_accept.is_none() {
                    prop_assert!(!input.state());
                }
            }
        }

        // Buffer stays bounded and time-ordered whatever is pushed.
        #[test]
        fn ring_is_bounded_and_ordered(
            pushes in prop::collection::vec(0u64..10_000_000, 0..64),
        ) {
            let mut ring = PulseRingBuffer::<16>::new();
            for ts in pushes {
                ring.push(ts);
                prop_assert!(ring.len() <= 16);
            }
            let stamps = ring.to_vec();
            prop_assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        }

        // A constant pulse period yields 60e6 / period.
        #[test]
        fn constant_period_gives_exact_rpm(
            period_us in 1_000u64..1_000_000,
            count in 2usize..=16,
        ) {
            let stamps: Vec<u64> = (0..count as u64).map(|i| 1_000 + i * period_us).collect();
            let now_us = *stamps.last().unwrap_or(&0);
            let rpm = raw_rpm(&stamps, now_us, u64::MAX);
            let expected = 60_000_000.0 / period_us as f64;
            prop_assert!(rpm.is_some());
            prop_assert!((rpm.unwrap_or_default() - expected).abs() < 1e-6 * expected);
        }

        // Direction commands authorize only when de-energized and clear.
        #[test]
        fn authorization_requires_de_energized(
            dir in direction(),
            state in energized_state(),
            emergency in any::<bool>(),
        ) {
            let result = DirectionCommand::new(dir).authorize(state, emergency);
            match (emergency, state) {
                (true, _) => prop_assert_eq!(result.err(), Some(InterlockViolation::EmergencyActive)),
                (false, EnergizedState::DeEnergized) => prop_assert!(result.is_ok()),
                (false, other) => prop_assert_eq!(
                    result.err(),
                    Some(InterlockViolation::Energized { state: other })
                ),
            }
        }
    }
}
