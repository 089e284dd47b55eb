use std::path::Path;

use crate::adaptation::PolicyKind;
use crate::config::parse_client_batches;
use crate::error::Error;

const BATCHES: &str = "\
# amount policy video seconds
2 panda bbb.txt 2

1 festive sintel.txt 4
two tobasco bbb.txt 2
1 bba bbb.txt 2
1 tobasco bbb.txt 0
";

#[test]
fn test_batches_skip_malformed_lines() {
    let parsed = parse_client_batches("sim1_clients.txt", BATCHES);
    assert_eq!(parsed.batches.len(), 2);
    assert_eq!(parsed.total_clients(), 3);
    assert_eq!(parsed.skipped.len(), 3);
    assert!(matches!(
        parsed.skipped[0],
        Error::Format {
            line: 5,
            field: Some(1),
            ..
        }
    ));
    assert!(matches!(
        parsed.skipped[1],
        Error::Format {
            line: 6,
            field: Some(2),
            ..
        }
    ));
    assert!(matches!(
        parsed.skipped[2],
        Error::Format {
            line: 7,
            field: Some(4),
            ..
        }
    ));
}

#[test]
fn test_batches_expand_to_sessions() {
    let parsed = parse_client_batches("sim1_clients.txt", BATCHES);
    let sessions = parsed.sessions(Path::new("videos"), 3).unwrap();

    let ids: Vec<u32> = sessions.iter().map(|s| s.client_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(sessions[0].policy, PolicyKind::Panda);
    assert_eq!(sessions[1].catalog_path, Path::new("videos/bbb.txt"));
    assert_eq!(sessions[2].policy, PolicyKind::Festive);
    assert_eq!(sessions[2].segment_duration_us, 4_000_000);
    assert_eq!(sessions[2].catalog_path, Path::new("videos/sintel.txt"));
    assert!(sessions.iter().all(|s| s.number_of_clients == 3));
}

#[test]
fn test_batch_total_must_match_client_count() {
    let parsed = parse_client_batches("sim1_clients.txt", "2 panda bbb.txt 2\n");
    assert!(matches!(
        parsed.sessions(Path::new("videos"), 3),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_wrong_field_count_is_reported_without_field() {
    let parsed = parse_client_batches("c.txt", "1 panda bbb.txt\n");
    assert!(parsed.batches.is_empty());
    assert!(matches!(
        parsed.skipped[0],
        Error::Format {
            line: 1,
            field: None,
            ..
        }
    ));
}
