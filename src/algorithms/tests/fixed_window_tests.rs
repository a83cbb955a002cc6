#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::algorithms::{FixedWindow, Step};
    use crate::policy::{Policy, QuotaType};
    use crate::rate::Rate;

    const KEY: &str = "rl:svc";

    fn policy(limit: u64, refresh_ms: u64) -> Policy {
        Policy::requests(limit, Duration::from_millis(refresh_ms), vec![]).unwrap()
    }

    /// Feed a sequence of steps through the algorithm as a backend would
    fn run(policy: &Policy, steps: &[(Step, u64)]) -> Vec<(bool, u64, u64)> {
        let mut state: Option<Rate> = None;
        steps
            .iter()
            .map(|&(step, now)| {
                let transition = FixedWindow::apply(state.take(), KEY, policy, step, now);
                let out = (
                    transition.admitted,
                    transition.rate.remaining,
                    transition.rate.reset,
                );
                state = Some(transition.rate);
                out
            })
            .collect()
    }

    #[test]
    fn test_first_limit_requests_are_admitted() {
        let p = policy(5, 60_000);
        let steps: Vec<_> = (0..6).map(|i| (Step::Consume(1), 1_000 + i)).collect();
        let results = run(&p, &steps);

        for (i, (admitted, remaining, _)) in results.iter().take(5).enumerate() {
            assert!(admitted, "Request {} should be admitted", i);
            assert_eq!(*remaining, 4 - i as u64);
        }
        assert_eq!(results[5], (false, 0, 61_000));
    }

    #[test]
    fn test_two_per_second_scenario() {
        // limit 2 per second: t=0,0,0 then t=2s
        let p = policy(2, 1_000);
        let results = run(
            &p,
            &[
                (Step::Consume(1), 0),
                (Step::Consume(1), 0),
                (Step::Consume(1), 0),
                (Step::Consume(1), 2_000),
            ],
        );

        assert_eq!(results[0], (true, 1, 1_000));
        assert_eq!(results[1], (true, 0, 1_000));
        assert_eq!(results[2], (false, 0, 1_000));
        assert_eq!(results[3], (true, 1, 3_000));
    }

    #[test]
    fn test_rejection_at_boundary_keeps_window() {
        let p = policy(1, 1_000);
        let results = run(
            &p,
            &[
                (Step::Consume(1), 0),
                (Step::Consume(1), 999),
                (Step::Consume(1), 1_000),
            ],
        );

        assert_eq!(results[1], (false, 0, 1_000));
        // now == reset starts the next window
        assert_eq!(results[2], (true, 0, 2_000));
    }

    #[test]
    fn test_zero_limit_always_rejects() {
        let p = policy(0, 1_000);
        let results = run(
            &p,
            &[
                (Step::Consume(1), 0),
                (Step::Consume(1), 5_000),
            ],
        );
        assert!(results.iter().all(|(admitted, remaining, _)| !admitted && *remaining == 0));
    }

    #[test]
    fn test_multi_unit_consume_does_not_go_negative() {
        let p = policy(5, 1_000);
        let results = run(
            &p,
            &[
                (Step::Consume(3), 0),
                (Step::Consume(3), 1),
                (Step::Consume(2), 2),
            ],
        );

        assert!(results[0].0);
        assert_eq!((results[1].0, results[1].1), (false, 2));
        assert_eq!((results[2].0, results[2].1), (true, 0));
    }

    #[test]
    fn test_reset_strictly_increases_across_rollovers() {
        let p = policy(1, 500);
        let steps: Vec<_> = [0, 700, 1_300, 1_300, 4_000]
            .iter()
            .map(|&t| (Step::Consume(1), t))
            .collect();
        let resets: Vec<u64> = run(&p, &steps).into_iter().map(|(_, _, r)| r).collect();

        assert_eq!(resets, vec![500, 1_200, 1_800, 1_800, 4_500]);
        assert!(resets.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_probe_and_settle_for_response_time() {
        let p = Policy::new(
            1_000,
            Duration::from_secs(10),
            QuotaType::ResponseTime,
            vec![],
        )
        .unwrap();
        let results = run(
            &p,
            &[
                (Step::Probe, 0),
                (Step::Settle(600), 10),
                (Step::Probe, 20),
                (Step::Settle(600), 30),
                (Step::Probe, 40),
                (Step::Probe, 10_000),
            ],
        );

        assert_eq!(results[0], (true, 1_000, 10_000));
        assert_eq!(results[1], (true, 400, 10_000));
        assert_eq!(results[2], (true, 400, 10_000));
        assert_eq!(results[3], (true, 0, 10_000));
        assert_eq!(results[4], (false, 0, 10_000));
        assert_eq!(results[5], (true, 1_000, 20_000));
    }

    #[test]
    fn test_policy_change_is_detected() {
        let stored = Rate {
            key: KEY.to_string(),
            limit: 100,
            remaining: 50,
            reset: 10_000,
        };

        let transition = FixedWindow::apply(Some(stored), KEY, &policy(10, 10_000), Step::Consume(1), 0);
        assert!(transition.admitted);
        assert_eq!(transition.rate.limit, 10);
        assert_eq!(transition.rate.remaining, 9);
        assert_eq!(transition.rate.reset, 10_000);
    }

    #[test]
    fn test_remaining_never_exceeds_limit() {
        let p = policy(3, 100);
        let steps: Vec<_> = (0..50u64).map(|i| (Step::Consume(1 + i % 2), i * 37)).collect();
        for (_, remaining, _) in run(&p, &steps) {
            assert!(remaining <= 3);
        }
    }
}
