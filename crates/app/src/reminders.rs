//! Periodic reminder delivery

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use wormhole_core::{AssignmentEngine, Digest};

use crate::error::Result;

#[derive(Error, Debug)]
#[error("Failed to deliver digest: {0}")]
pub struct NotifyError(pub String);

/// Channel a digest is handed to
pub trait DigestNotifier: Send + Sync {
    fn deliver(&self, digest: &Digest) -> std::result::Result<(), NotifyError>;
}

/// Writes digests to the service log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl DigestNotifier for LogNotifier {
    fn deliver(&self, digest: &Digest) -> std::result::Result<(), NotifyError> {
        info!(
            recipients = ?digest.recipients(),
            tickets = digest.tickets().len(),
            subject = digest.subject(),
            "{}",
            digest.body()
        );
        Ok(())
    }
}

/// Compose and hand off every due digest, returning how many were delivered.
///
/// One failed delivery does not stop the rest.
pub fn deliver_digests(engine: &AssignmentEngine, notifier: &dyn DigestNotifier) -> Result<usize> {
    let digests = engine.compose_digests()?;
    let mut delivered = 0;
    for digest in &digests {
        match notifier.deliver(digest) {
            Ok(()) => delivered += 1,
            Err(e) => warn!(recipients = ?digest.recipients(), "{}", e),
        }
    }
    Ok(delivered)
}

/// Deliver digests every `every` until shutdown is signalled
pub async fn run(
    engine: Arc<AssignmentEngine>,
    notifier: Arc<dyn DigestNotifier>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    // The first tick fires immediately; reminders start one period in
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let engine = engine.clone();
                let notifier = notifier.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    deliver_digests(&engine, notifier.as_ref())
                })
                .await;
                match outcome {
                    Ok(Ok(count)) => info!(count, "Reminder digests delivered"),
                    Ok(Err(e)) => error!("Reminder run failed: {}", e),
                    Err(e) => error!("Reminder task panicked: {}", e),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("Reminder job stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use wormhole_core::{
        AssistantId, CallerIdentity, CsvArchive, Database, ManualClock, NullPublisher,
    };

    #[derive(Default)]
    struct Collecting {
        subjects: Mutex<Vec<&'static str>>,
    }

    impl DigestNotifier for Collecting {
        fn deliver(&self, digest: &Digest) -> std::result::Result<(), NotifyError> {
            self.subjects.lock().unwrap().push(digest.subject());
            Ok(())
        }
    }

    struct Refusing;

    impl DigestNotifier for Refusing {
        fn deliver(&self, _digest: &Digest) -> std::result::Result<(), NotifyError> {
            Err(NotifyError("mail relay down".into()))
        }
    }

    fn engine(dir: &tempfile::TempDir) -> AssignmentEngine {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_assistant(AssistantId(1), "Head TA", true).unwrap();
        db.upsert_assistant(AssistantId(7), "Grace", false).unwrap();
        AssignmentEngine::new(
            db,
            Arc::new(NullPublisher),
            Arc::new(CsvArchive::open(dir.path().join("archive.csv")).unwrap()),
            Arc::new(ManualClock::new(Utc::now())),
            Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_delivers_assignee_and_unassigned() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        engine.submit_ticket("Ada", "PHYS 1250", "Table 2").unwrap();
        engine.submit_ticket("Alan", "MATH 2210", "Table 3").unwrap();
        engine.claim_next(&CallerIdentity::assistant(7)).unwrap();

        let notifier = Collecting::default();
        assert_eq!(deliver_digests(&engine, &notifier).unwrap(), 2);
        assert_eq!(
            *notifier.subjects.lock().unwrap(),
            vec![
                "Action Required: Unclosed Wormhole Tickets",
                "Alert: New Tickets in Queue"
            ]
        );
    }

    #[test]
    fn test_quiet_queue_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        assert_eq!(deliver_digests(&engine, &LogNotifier).unwrap(), 0);
    }

    #[test]
    fn test_failed_delivery_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        engine.submit_ticket("Ada", "PHYS 1250", "Table 2").unwrap();
        assert_eq!(deliver_digests(&engine, &Refusing).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_job_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine(&dir));
        let (tx, rx) = watch::channel(false);
        let job = tokio::spawn(run(
            engine,
            Arc::new(LogNotifier),
            Duration::from_secs(3600),
            rx,
        ));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), job)
            .await
            .unwrap()
            .unwrap();
    }
}
