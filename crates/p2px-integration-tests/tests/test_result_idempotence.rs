//! Re-delivering the same dispute result any number of times leaves the same
//! state as delivering it once; only the acknowledgements repeat.

mod common;

use common::*;
use p2px_node::{replay, ReplayReport, Scenario, ScenarioStep};
use p2px_state::DisputeState;
use p2px_support::{ScriptedOutcome, SupportMessage};
use proptest::prelude::*;

fn run(deliveries: usize, dispute_first: bool, buyer: u64, seller: u64) -> (ReplayReport, usize) {
    let result = result_message("T1", buyer, seller);
    let closing = closing_uid(&result);
    let mut steps = Vec::new();
    if dispute_first {
        steps.push(ScenarioStep::Deliver {
            message: peer_opened("T1"),
        });
    }
    for _ in 0..deliveries {
        steps.push(ScenarioStep::Deliver {
            message: SupportMessage::DisputeResult(result.clone()),
        });
    }
    if !dispute_first {
        steps.push(ScenarioStep::Deliver {
            message: peer_opened("T1"),
        });
    }
    steps.push(ScenarioStep::Advance { millis: 5_000 });

    let scenario = Scenario {
        node_address: addr("me.onion:9999"),
        trades: vec![trade("T1", DisputeState::NoDispute)],
        open_offers: vec![],
        disputes: vec![],
        payout: ScriptedOutcome::Succeed,
        publish_on_finalize: false,
        retry_delay_millis: Some(2_000),
        steps,
    };
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let report = runtime.block_on(replay(scenario)).unwrap();
    let acks = report
        .acks
        .iter()
        .filter(|a| a.source_uid == closing)
        .count();
    (report, acks)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn repeated_results_converge(
        deliveries in 1usize..5,
        buyer in 0u64..2_000_000,
        seller in 0u64..2_000_000,
    ) {
        let (once, _) = run(1, true, buyer, seller);
        let (many, acks) = run(deliveries, true, buyer, seller);

        prop_assert_eq!(acks, deliveries);
        prop_assert_eq!(&many.trades, &once.trades);
        prop_assert_eq!(
            many.disputes[0].chat_messages().len(),
            once.disputes[0].chat_messages().len()
        );
        prop_assert_eq!(many.pending_retries, 0);
    }

    #[test]
    fn early_results_apply_exactly_once(deliveries in 1usize..5) {
        // Only the first early delivery schedules a retry; the rest are dropped.
        let (report, acks) = run(deliveries, false, 950_000, 40_000);
        prop_assert_eq!(acks, 1);
        prop_assert_eq!(report.pending_retries, 0);
        prop_assert_eq!(
            report.trades.trades[0].dispute_state,
            DisputeState::MediationClosed
        );
    }
}
