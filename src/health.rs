use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::polling::Poller;
use crate::rasax::RasaX;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const READY_TIMEOUT: Duration = Duration::from_secs(360);

/// Progress reported while waiting for Rasa X.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    Unreachable,
    Migration { progress_in_percent: f32 },
    MigrationCompleted,
    Worker { status: u16 },
    WorkerReady,
}

impl HealthEvent {
    pub fn message(&self) -> String {
        match self {
            HealthEvent::Unreachable => "Waiting for Rasa X to be reachable...".into(),
            HealthEvent::Migration { progress_in_percent } => format!(
                "Waiting for database migration to be completed...{:.2}%",
                progress_in_percent
            ),
            HealthEvent::MigrationCompleted => "Database migration has been completed".into(),
            HealthEvent::Worker { status } => {
                format!("Waiting for the Rasa worker to be ready, status: {}", status)
            }
            HealthEvent::WorkerReady => "The Rasa worker is ready".into(),
        }
    }
}

/// Poll cadence and deadline of the readiness checks.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout: READY_TIMEOUT,
        }
    }
}

impl Readiness {
    fn poller(&self, what: &str) -> Poller {
        Poller::new(self.interval, self.timeout, what)
    }
}

/// Wait until `/api/health` reports a completed database migration.
pub async fn wait_for_database_migration(
    rasax: &RasaX,
    readiness: Readiness,
    tx: &mpsc::UnboundedSender<HealthEvent>,
) -> Result<()> {
    readiness
        .poller("the database migration")
        .poll_until(move || async move {
            match rasax.health().await {
                Ok(health) if health.database_migration.is_completed() => {
                    tx.send(HealthEvent::MigrationCompleted).ok();
                    Ok(true)
                }
                Ok(health) => {
                    tx.send(HealthEvent::Migration {
                        progress_in_percent: health.database_migration.progress_in_percent,
                    })
                    .ok();
                    Ok(false)
                }
                Err(e) => {
                    debug!(error = %e, "health endpoint not available yet");
                    tx.send(HealthEvent::Unreachable).ok();
                    Ok(false)
                }
            }
        })
        .await
}

/// Wait until `/api/health` reports the worker environment as ready.
pub async fn wait_for_worker(
    rasax: &RasaX,
    readiness: Readiness,
    tx: &mpsc::UnboundedSender<HealthEvent>,
) -> Result<()> {
    readiness
        .poller("the Rasa worker")
        .poll_until(move || async move {
            match rasax.health().await {
                Ok(health) if health.worker.is_ready() => {
                    tx.send(HealthEvent::WorkerReady).ok();
                    Ok(true)
                }
                Ok(health) => {
                    tx.send(HealthEvent::Worker {
                        status: health.worker.status,
                    })
                    .ok();
                    Ok(false)
                }
                Err(e) => {
                    debug!(error = %e, "health endpoint not available yet");
                    tx.send(HealthEvent::Unreachable).ok();
                    Ok(false)
                }
            }
        })
        .await
}

/// Wait for both the migration and the worker; the first failure wins.
pub async fn wait_for_rasa_x(
    rasax: &RasaX,
    readiness: Readiness,
    tx: &mpsc::UnboundedSender<HealthEvent>,
) -> Result<()> {
    let both = async {
        tokio::try_join!(
            wait_for_database_migration(rasax, readiness, tx),
            wait_for_worker(rasax, readiness, tx),
        )
    };
    match tokio::time::timeout(readiness.timeout, both).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => anyhow::bail!(
            "timeout after {}s waiting for Rasa X to be ready",
            readiness.timeout.as_secs()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast() -> Readiness {
        Readiness {
            interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
        }
    }

    async fn health_server(body: serde_json::Value, times: Option<u64>) -> MockServer {
        let server = MockServer::start().await;
        let mock = Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body));
        match times {
            Some(n) => mock.up_to_n_times(n).mount(&server).await,
            None => mock.mount(&server).await,
        }
        server
    }

    #[tokio::test]
    async fn migration_progress_is_reported() {
        let server = health_server(
            json!({"database_migration": {"status": "pending", "progress_in_percent": 50.0}}),
            Some(2),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"database_migration": {"status": "completed", "progress_in_percent": 100.0}}),
            ))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let rasax = RasaX::new(&server.uri()).unwrap();
        wait_for_database_migration(&rasax, fast(), &tx).await.unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                HealthEvent::Migration { progress_in_percent: 50.0 },
                HealthEvent::Migration { progress_in_percent: 50.0 },
                HealthEvent::MigrationCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn both_conditions_must_hold() {
        let server = health_server(
            json!({
                "database_migration": {"status": "completed", "progress_in_percent": 100.0},
                "worker": {"version": "2.8.1", "status": 200},
            }),
            None,
        )
        .await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let rasax = RasaX::new(&server.uri()).unwrap();
        wait_for_rasa_x(&rasax, fast(), &tx).await.unwrap();
    }

    #[tokio::test]
    async fn worker_that_never_starts_times_out() {
        let server = health_server(
            json!({
                "database_migration": {"status": "completed"},
                "worker": {"status": 503},
            }),
            None,
        )
        .await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let rasax = RasaX::new(&server.uri()).unwrap();
        let readiness = Readiness {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(200),
        };
        let err = wait_for_rasa_x(&rasax, readiness, &tx).await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn failed_poller_cancels_the_other_one() {
        let server = health_server(
            json!({
                "database_migration": {"status": "pending", "progress_in_percent": 10.0},
                "worker": {"status": 503},
            }),
            None,
        )
        .await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let rasax = RasaX::new(&server.uri()).unwrap();
        let readiness = Readiness {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(300),
        };
        let started = tokio::time::Instant::now();
        let err = wait_for_rasa_x(&rasax, readiness, &tx).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(err.to_string().starts_with("timeout after"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), seen);
    }

    #[test]
    fn readiness_deadline_is_six_minutes() {
        let readiness = Readiness::default();
        assert_eq!(readiness.timeout, Duration::from_secs(360));
        assert_eq!(readiness.interval, Duration::from_secs(5));
    }

    #[test]
    fn messages() {
        assert_eq!(
            HealthEvent::Migration { progress_in_percent: 12.5 }.message(),
            "Waiting for database migration to be completed...12.50%"
        );
        assert_eq!(
            HealthEvent::Worker { status: 503 }.message(),
            "Waiting for the Rasa worker to be ready, status: 503"
        );
    }
}
