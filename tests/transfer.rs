use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use skyfetch::domain::{Credentials, Instrument};
use skyfetch::error::SkyError;
use skyfetch::search::Artifact;
use skyfetch::transfer::{
    CancelFlag, IntegrityPolicy, TransferCoordinator, TransferOutcome, TransferProvider,
    TransferStream,
};
use skyfetch::warning::RunWarning;

/// Replays canned responses: (status, declared length, body).
struct MockProvider {
    responses: Mutex<VecDeque<(u16, Option<u64>, &'static str)>>,
    opened: Mutex<usize>,
}

impl MockProvider {
    fn new(responses: Vec<(u16, Option<u64>, &'static str)>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            opened: Mutex::new(0),
        }
    }

    fn opened(&self) -> usize {
        *self.opened.lock().unwrap()
    }
}

impl TransferProvider for MockProvider {
    fn open(
        &self,
        _artifact: &Artifact,
        _credentials: Option<&Credentials>,
    ) -> Result<TransferStream, SkyError> {
        *self.opened.lock().unwrap() += 1;
        let (status, content_length, body) = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SkyError::ArchiveHttp {
                archive: "mock".to_string(),
                message: "connection refused".to_string(),
            })?;
        Ok(TransferStream {
            status,
            content_length,
            body: Box::new(Cursor::new(body.as_bytes().to_vec())),
        })
    }
}

fn artifact(id: &str) -> Artifact {
    Artifact {
        id: id.to_string(),
        instrument: Instrument::Vimos,
        file_name: format!("{id}.fits.Z"),
        url: format!("https://archive.invalid/{id}"),
    }
}

fn destination(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8Path::from_path(dir.path())
        .unwrap()
        .join("VIMOS")
        .join(name)
}

fn leftover_parts(dir: &Utf8Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_name().to_string_lossy().starts_with(".skyfetch-part"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn complete_download_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(vec![(200, Some(5), "FITS!")]);
    let coordinator = TransferCoordinator::new(&provider, IntegrityPolicy::Keep, CancelFlag::new());
    let dest = destination(&dir, "a.fits.Z");

    let report = coordinator.fetch(&artifact("a"), &dest, None);

    assert_eq!(report.outcome, TransferOutcome::Downloaded);
    assert!(report.warnings.is_empty());
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "FITS!");
    assert_eq!(leftover_parts(dest.parent().unwrap()), 0);
}

#[test]
fn existing_file_is_not_fetched_again() {
    let dir = tempfile::tempdir().unwrap();
    let dest = destination(&dir, "a.fits.Z");
    std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
    std::fs::write(&dest, "old").unwrap();

    let provider = MockProvider::new(vec![(200, Some(3), "new")]);
    let coordinator = TransferCoordinator::new(&provider, IntegrityPolicy::Keep, CancelFlag::new());
    let report = coordinator.fetch(&artifact("a"), &dest, None);

    assert_eq!(report.outcome, TransferOutcome::AlreadyPresent);
    assert_eq!(provider.opened(), 0);
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "old");
}

#[test]
fn error_status_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(vec![(404, None, "not found")]);
    let coordinator = TransferCoordinator::new(&provider, IntegrityPolicy::Keep, CancelFlag::new());
    let dest = destination(&dir, "a.fits.Z");

    let report = coordinator.fetch(&artifact("a"), &dest, None);

    assert_eq!(report.outcome, TransferOutcome::Failed("HTTP status 404".to_string()));
    assert!(!dest.as_std_path().exists());
}

#[test]
fn short_download_is_kept_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(vec![(200, Some(10), "short")]);
    let coordinator = TransferCoordinator::new(&provider, IntegrityPolicy::Keep, CancelFlag::new());
    let dest = destination(&dir, "a.fits.Z");

    let report = coordinator.fetch(&artifact("a"), &dest, None);

    assert_eq!(report.outcome, TransferOutcome::Downloaded);
    assert_eq!(
        report.warnings,
        vec![RunWarning::Integrity {
            id: "a".to_string(),
            expected: 10,
            written: 5,
        }]
    );
    assert!(dest.as_std_path().exists());
}

#[test]
fn short_download_is_discarded_under_delete_policy() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(vec![(200, Some(10), "short")]);
    let coordinator =
        TransferCoordinator::new(&provider, IntegrityPolicy::Delete, CancelFlag::new());
    let dest = destination(&dir, "a.fits.Z");

    let report = coordinator.fetch(&artifact("a"), &dest, None);

    assert!(matches!(report.outcome, TransferOutcome::Failed(_)));
    assert_eq!(report.warnings.len(), 1);
    assert!(!dest.as_std_path().exists());
    assert_eq!(leftover_parts(dest.parent().unwrap()), 0);
}

#[test]
fn retry_policy_refetches_until_complete() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(vec![
        (200, Some(10), "short"),
        (200, Some(10), "0123456789"),
    ]);
    let coordinator = TransferCoordinator::new(
        &provider,
        IntegrityPolicy::Retry { attempts: 2 },
        CancelFlag::new(),
    );
    let dest = destination(&dir, "a.fits.Z");

    let report = coordinator.fetch(&artifact("a"), &dest, None);

    assert_eq!(report.outcome, TransferOutcome::Downloaded);
    assert_eq!(provider.opened(), 2);
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "0123456789");
}

#[test]
fn undeclared_length_is_not_checked() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(vec![(200, Some(0), "abc"), (200, None, "def")]);
    let coordinator =
        TransferCoordinator::new(&provider, IntegrityPolicy::Delete, CancelFlag::new());

    for name in ["a", "b"] {
        let report = coordinator.fetch(&artifact(name), &destination(&dir, name), None);
        assert_eq!(report.outcome, TransferOutcome::Downloaded);
        assert!(report.warnings.is_empty());
    }
}

#[test]
fn batch_continues_past_failures() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(vec![(200, Some(1), "x"), (500, None, ""), (200, None, "z")]);
    let coordinator = TransferCoordinator::new(&provider, IntegrityPolicy::Keep, CancelFlag::new());
    let items = ["a", "b", "c"]
        .into_iter()
        .map(|id| (artifact(id), destination(&dir, id)))
        .collect::<Vec<_>>();

    let summary = coordinator.fetch_all(&items, None);

    assert_eq!(summary.downloaded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.outcomes[1].0, "b");
}

#[test]
fn cancelled_batch_fetches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(vec![(200, None, "x")]);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let coordinator = TransferCoordinator::new(&provider, IntegrityPolicy::Keep, cancel);
    let items = vec![(artifact("a"), destination(&dir, "a"))];

    let summary = coordinator.fetch_all(&items, None);

    assert_eq!(summary.failed, 1);
    assert_eq!(provider.opened(), 0);
}
