use crate::adaptation::{PolicyKind, create_policy};
use crate::client::StreamController;
use crate::metrics::MemorySink;
use crate::test_helpers::*;

/// 1, 2 and 4 Mbit/s at two-second segments.
const LADDER: [u64; 3] = [250_000, 500_000, 1_000_000];

fn session(kind: PolicyKind, client_id: u32, latency_us: u64) -> (StreamController, LoopbackIo) {
    let catalog = uniform_catalog(&LADDER, 10);
    let mut controller = StreamController::with_policy(
        client_id,
        catalog,
        create_policy(kind, client_id),
        Box::new(MemorySink::new()),
    );
    let mut io = LoopbackIo::with_default_latency(latency_us);
    run_to_completion(&mut controller, &mut io);
    (controller, io)
}

#[test]
fn test_every_policy_completes_a_session() {
    for kind in PolicyKind::ALL {
        let (controller, io) = session(kind, 0, 250_000);
        let stats = controller.stats();
        assert!(controller.is_terminal(), "{kind} did not finish");
        assert!(!stats.aborted, "{kind} aborted: {:?}", stats.error);
        assert_eq!(stats.segments_played, 10, "{kind}");
        assert_eq!(controller.playback_history().len(), 10, "{kind}");
        assert_eq!(io.requests.len(), 10, "{kind}");
        assert!(io.requests.iter().all(|r| r.representation < LADDER.len()));
    }
}

#[test]
fn test_segments_are_requested_in_order() {
    for kind in PolicyKind::ALL {
        let (_controller, io) = session(kind, 1, 100_000);
        let indices: Vec<u64> = io.requests.iter().map(|r| r.segment_index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>(), "{kind}");
    }
}

#[test]
fn test_sessions_are_reproducible() {
    for kind in PolicyKind::ALL {
        let (a, _) = session(kind, 5, 400_000);
        let (b, _) = session(kind, 5, 400_000);
        assert_eq!(a.playback_history(), b.playback_history(), "{kind}");
        assert_eq!(a.transitions(), b.transitions(), "{kind}");
    }
}
