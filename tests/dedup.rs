use skyfetch::dedup::{ResultDeduplicator, dedupe};
use skyfetch::domain::Instrument;

fn ids(values: &[Option<&str>]) -> Vec<Option<String>> {
    values.iter().map(|v| v.map(str::to_string)).collect()
}

#[test]
fn drops_missing_and_duplicate_ids() {
    let science = ids(&[Some("s1"), Some("s2"), None, Some("s1")]);
    let bias = ids(&[Some("b1"), None, Some("s2")]);
    let unique = dedupe([&science, &bias]);
    assert_eq!(
        unique.into_iter().collect::<Vec<_>>(),
        vec!["b1", "s1", "s2"]
    );
}

#[test]
fn dedupe_is_idempotent() {
    let raw = ids(&[Some("x"), None, Some("y"), Some("x"), None, Some("z"), Some("y")]);
    let once = dedupe([&raw]);
    let again_input = once.iter().cloned().map(Some).collect::<Vec<_>>();
    let twice = dedupe([&again_input]);
    assert_eq!(once, twice);
    assert_eq!(once.len(), 3);
}

#[test]
fn empty_lists_give_empty_set() {
    let empty: Vec<Option<String>> = Vec::new();
    assert!(dedupe([&empty, &empty]).is_empty());
}

#[test]
fn manifest_batches_keep_every_entry() {
    let mut dedup = ResultDeduplicator::new();
    for i in 0..2_500 {
        dedup.add_id(&format!("SUPA{i:08}"), Instrument::SuprimeCam);
    }
    dedup.add_id("SUPA00000001", Instrument::HyperSuprimeCam);
    assert_eq!(dedup.len(), 2_500);

    let manifest = dedup.finish();
    let batches = manifest.batches(1_000).unwrap();
    assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![1_000, 1_000, 500]);
    assert!(
        manifest
            .entries
            .iter()
            .all(|entry| entry.instrument == Instrument::SuprimeCam)
    );
}
