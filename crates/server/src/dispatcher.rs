use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use dispatch_common::config::LeaseConfig;
use dispatch_common::ids::TaskId;
use dispatch_common::types::{DockingParams, HeartbeatSample};

use crate::channel::{read_frame, write_frame};
use crate::store::{LeaseOutcome, LeasedWorkItem, StoreClient, SubmitOutcome};

/// Outcome a node reports for a leased ligand. Absent means `completed`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Completed,
    Failed,
}

/// One command frame received from a compute node.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Auth {
        password: String,
    },
    GetTask,
    SubmitResult {
        task_id: String,
        ligand_id: String,
        output_file: Option<String>,
        #[serde(default)]
        status: Option<SubmitStatus>,
    },
    Heartbeat {
        cpu_usage: f64,
        memory_usage: f64,
    },
}

/// The single reply sent back for exactly one received command frame.
///
/// `get_task` replies carry no `status` field at all — just `task_id`
/// (null when there's no work) and, when there is work, the ligand and its
/// docking parameters. Every other frame replies with `{"status": "ok"}` or
/// `{"status": "error", "message": ...}`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ack {
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Task {
        task_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ligand_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ligand_file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<DockingParams>,
    },
}

impl Response {
    fn ok() -> Self {
        Response::Ack {
            status: "ok",
            message: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Response::Ack {
            status: "error",
            message: Some(message.into()),
        }
    }

    fn no_task() -> Self {
        Response::Task {
            task_id: None,
            ligand_id: None,
            ligand_file: None,
            params: None,
        }
    }

    fn task(item: LeasedWorkItem) -> Self {
        Response::Task {
            task_id: Some(item.task_id.to_string()),
            ligand_id: Some(item.ligand_id),
            ligand_file: Some(item.ligand_file),
            params: Some(item.params),
        }
    }
}

/// Per-connection state: whether this node has successfully authenticated.
/// Every frame but the first `auth` requires this to be true.
struct Session {
    authenticated: bool,
}

/// Drive one accepted, TLS-wrapped connection for its entire lifetime:
/// one transaction per frame, until the peer disconnects or goes idle
/// past `idle_read_timeout`.
///
/// A channel-level decode failure (malformed length prefix, non-UTF-8 body,
/// invalid JSON) is fatal: the connection is closed and not retried on.
/// A frame that decodes as valid JSON but doesn't match a known command is
/// a protocol-level error only: it gets an `{"status": "error"}` reply and
/// the connection stays open for the next frame.
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    store: Arc<StoreClient>,
    lease: LeaseConfig,
    idle_read_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session {
        authenticated: false,
    };

    loop {
        let raw = match tokio::time::timeout(
            idle_read_timeout,
            read_frame::<_, serde_json::Value>(&mut stream),
        )
        .await
        {
            Ok(Ok(Some(value))) => value,
            Ok(Ok(None)) => {
                tracing::info!(%peer, "connection closed by peer");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(%peer, error = %e, "channel decode error, closing connection");
                let _ = write_frame(&mut stream, &Response::error(e.to_string())).await;
                return;
            }
            Err(_) => {
                tracing::info!(%peer, "idle read timeout, closing connection");
                return;
            }
        };

        let request: Request = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "unrecognized frame");
                if write_frame(&mut stream, &Response::error("unrecognized frame"))
                    .await
                    .is_err()
                {
                    tracing::warn!(%peer, "failed to write response, closing connection");
                    return;
                }
                continue;
            }
        };

        let response = handle_frame(request, &mut session, &store, &lease, peer).await;
        if write_frame(&mut stream, &response).await.is_err() {
            tracing::warn!(%peer, "failed to write response, closing connection");
            return;
        }
    }
}

async fn handle_frame(
    request: Request,
    session: &mut Session,
    store: &StoreClient,
    lease: &LeaseConfig,
    peer: SocketAddr,
) -> Response {
    match request {
        Request::Auth { password } => {
            let outcome = crate::auth::verify_password(store, &password).await;
            match outcome {
                Ok(true) => {
                    session.authenticated = true;
                    tracing::info!(%peer, "authentication succeeded");
                    metrics::counter!("dispatch_auth_total", "outcome" => "success").increment(1);
                    Response::ok()
                }
                Ok(false) => {
                    tracing::warn!(%peer, "authentication failed");
                    metrics::counter!("dispatch_auth_total", "outcome" => "failure").increment(1);
                    Response::error("authentication failed")
                }
                Err(e) => Response::error(e.to_string()),
            }
        }
        other if !session.authenticated => {
            tracing::warn!(%peer, frame = ?other, "frame received before authentication");
            Response::error("not authenticated")
        }
        Request::GetTask => match store.lease_next_work_item().await {
            Ok(LeaseOutcome::Leased(item)) => {
                tracing::info!(%peer, task_id = %item.task_id, ligand_id = %item.ligand_id, "lease granted");
                metrics::counter!("dispatch_leases_granted_total").increment(1);
                Response::task(item)
            }
            Ok(LeaseOutcome::NoWorkAvailable) => Response::no_task(),
            Err(e) => Response::error(e.to_string()),
        },
        Request::SubmitResult {
            task_id,
            ligand_id,
            output_file,
            status,
        } => {
            let task_id = match TaskId::parse(task_id) {
                Ok(id) => id,
                Err(e) => return Response::error(e.to_string()),
            };
            let success = !matches!(status, Some(SubmitStatus::Failed));

            let outcome = store
                .submit_result(
                    &task_id,
                    &ligand_id,
                    success,
                    output_file.as_deref(),
                    lease.max_retries,
                )
                .await;

            match outcome {
                Ok(SubmitOutcome::Accepted) => {
                    tracing::info!(%peer, %task_id, ligand_id, success, "result submitted");
                    metrics::counter!("dispatch_submissions_total", "status" => "accepted")
                        .increment(1);
                    Response::ok()
                }
                Ok(SubmitOutcome::Stale) => {
                    tracing::info!(%peer, %task_id, ligand_id, "stale submission dropped");
                    metrics::counter!("dispatch_submissions_total", "status" => "stale")
                        .increment(1);
                    Response::ok()
                }
                Ok(SubmitOutcome::NotFound) => Response::error("no such task/ligand"),
                Err(e) => Response::error(e.to_string()),
            }
        }
        Request::Heartbeat {
            cpu_usage,
            memory_usage,
        } => {
            let sample = HeartbeatSample {
                client_addr: peer.to_string(),
                cpu_usage,
                memory_usage,
                last_heartbeat: chrono::Utc::now(),
            };
            metrics::counter!("dispatch_heartbeats_total").increment(1);
            match store.record_heartbeat(&sample).await {
                Ok(()) => Response::ok(),
                Err(e) => Response::error(e.to_string()),
            }
        }
        Request::Auth { .. } => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_common::config::LeaseConfig;
    use dispatch_common::ids::TaskId;
    use dispatch_common::types::{DockingParams, Task, TaskStatus};

    fn test_lease_config() -> LeaseConfig {
        LeaseConfig {
            lease_timeout_secs: 300,
            max_retries: 3,
            reclaim_interval_secs: 60,
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn test_docking_params() -> DockingParams {
        DockingParams {
            center_x: 1.0,
            center_y: 2.0,
            center_z: 3.0,
            size_x: 20.0,
            size_y: 20.0,
            size_z: 20.0,
            num_modes: 9,
            energy_range: 3.0,
            cpu: 4,
        }
    }

    async fn setup_store_with_password(password: &str) -> StoreClient {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreClient::connect(dir.path().join("dispatcher_test.sqlite").to_str().unwrap())
            .await
            .unwrap();
        store.migrate().await.unwrap();
        let hash = crate::auth::hash_password(password).unwrap();
        store.set_password_hash(&hash).await.unwrap();
        store
    }

    #[tokio::test]
    async fn frames_before_auth_are_rejected() {
        let store = setup_store_with_password("secret").await;
        let mut session = Session {
            authenticated: false,
        };
        let response = handle_frame(
            Request::GetTask,
            &mut session,
            &store,
            &test_lease_config(),
            peer(),
        )
        .await;
        assert!(matches!(response, Response::Ack { status: "error", .. }));
        assert!(!session.authenticated);
    }

    #[tokio::test]
    async fn correct_password_authenticates_the_session() {
        let store = setup_store_with_password("secret").await;
        let mut session = Session {
            authenticated: false,
        };
        let response = handle_frame(
            Request::Auth {
                password: "secret".into(),
            },
            &mut session,
            &store,
            &test_lease_config(),
            peer(),
        )
        .await;
        assert!(matches!(response, Response::Ack { status: "ok", .. }));
        assert!(session.authenticated);
    }

    #[tokio::test]
    async fn wrong_password_leaves_session_unauthenticated() {
        let store = setup_store_with_password("secret").await;
        let mut session = Session {
            authenticated: false,
        };
        let response = handle_frame(
            Request::Auth {
                password: "wrong".into(),
            },
            &mut session,
            &store,
            &test_lease_config(),
            peer(),
        )
        .await;
        assert!(matches!(response, Response::Ack { status: "error", .. }));
        assert!(!session.authenticated);
    }

    #[tokio::test]
    async fn get_task_after_auth_returns_leased_work() {
        let store = setup_store_with_password("secret").await;
        let task = Task {
            id: TaskId::parse("disp-task").unwrap(),
            receptor_path: "tasks/disp-task/receptor.pdbqt".into(),
            docking_params: test_docking_params(),
            status: TaskStatus::Pending,
            total_ligands: 1,
            created_at: chrono::Utc::now(),
        };
        store.create_task(&task).await.unwrap();
        store
            .create_work_items(&task.id, &[("ligand-a".into(), "ligand-a.pdbqt".into())])
            .await
            .unwrap();

        let mut session = Session {
            authenticated: true,
        };
        let response = handle_frame(
            Request::GetTask,
            &mut session,
            &store,
            &test_lease_config(),
            peer(),
        )
        .await;
        match response {
            Response::Task {
                ligand_id,
                ligand_file,
                params,
                ..
            } => {
                assert_eq!(ligand_id.as_deref(), Some("ligand-a"));
                assert_eq!(ligand_file.as_deref(), Some("ligand-a.pdbqt"));
                assert!(params.is_some());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_task_with_no_work_returns_null_task_id() {
        let store = setup_store_with_password("secret").await;
        let mut session = Session {
            authenticated: true,
        };
        let response = handle_frame(
            Request::GetTask,
            &mut session,
            &store,
            &test_lease_config(),
            peer(),
        )
        .await;
        match response {
            Response::Task { task_id, .. } => assert!(task_id.is_none()),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_result_for_unknown_work_item_errors() {
        let store = setup_store_with_password("secret").await;
        let mut session = Session {
            authenticated: true,
        };
        let response = handle_frame(
            Request::SubmitResult {
                task_id: "no-such-task".into(),
                ligand_id: "x".into(),
                output_file: None,
                status: None,
            },
            &mut session,
            &store,
            &test_lease_config(),
            peer(),
        )
        .await;
        assert!(matches!(response, Response::Ack { status: "error", .. }));
    }

    #[tokio::test]
    async fn heartbeat_is_keyed_by_peer_address_not_a_client_field() {
        let store = setup_store_with_password("secret").await;
        let mut session = Session {
            authenticated: true,
        };
        let response = handle_frame(
            Request::Heartbeat {
                cpu_usage: 12.5,
                memory_usage: 40.0,
            },
            &mut session,
            &store,
            &test_lease_config(),
            peer(),
        )
        .await;
        assert!(matches!(response, Response::Ack { status: "ok", .. }));
    }

    #[tokio::test]
    async fn end_to_end_connection_over_duplex_stream() {
        let store = Arc::new(setup_store_with_password("secret").await);
        let (client, server) = tokio::io::duplex(4096);

        let store_clone = store.clone();
        let server_task = tokio::spawn(async move {
            handle_connection(
                server,
                peer(),
                store_clone,
                test_lease_config(),
                Duration::from_secs(5),
            )
            .await;
        });

        let mut client = client;
        write_frame(
            &mut client,
            &serde_json::json!({"type": "auth", "password": "secret"}),
        )
        .await
        .unwrap();
        let reply: serde_json::Value = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(reply["status"], "ok");

        write_frame(&mut client, &serde_json::json!({"type": "bogus"}))
            .await
            .unwrap();
        let reply: serde_json::Value = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(reply["status"], "error");

        write_frame(&mut client, &serde_json::json!({"type": "get_task"}))
            .await
            .unwrap();
        let reply: serde_json::Value = read_frame(&mut client).await.unwrap().unwrap();
        assert!(reply["task_id"].is_null());

        drop(client);
        tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .expect("server task did not finish")
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_closes_the_connection() {
        let store = Arc::new(setup_store_with_password("secret").await);
        let (mut client, server) = tokio::io::duplex(4096);

        let store_clone = store.clone();
        let server_task = tokio::spawn(async move {
            handle_connection(
                server,
                peer(),
                store_clone,
                test_lease_config(),
                Duration::from_secs(5),
            )
            .await;
        });

        use tokio::io::AsyncWriteExt;
        // A length prefix larger than MAX_FRAME_BYTES: the channel must
        // close the connection rather than keep reading.
        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        client.flush().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .expect("server task did not close the connection")
            .unwrap();
    }
}
