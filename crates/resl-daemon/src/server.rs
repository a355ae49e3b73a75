//! Unix socket server

use resl_core::{
    Pipeline,
    input::normalize_source,
    protocol::{self, Request, Response},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Accept connections until `shutdown` resolves.
///
/// On shutdown, idle connections are closed and in-flight executions get
/// `drain` to finish. Whatever is still running after that is aborted,
/// which tears its containers down.
pub async fn run<F>(
    listener: UnixListener,
    pipeline: Pipeline,
    shutdown: F,
    drain: Duration,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()>,
{
    let pipeline = Arc::new(pipeline);
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("shutdown requested, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let pipeline = Arc::clone(&pipeline);
                let stop_rx = stop_rx.clone();

                connections.spawn(async move {
                    if let Err(e) = handle_connection(stream, pipeline, stop_rx).await {
                        tracing::error!(error = %e, "connection error");
                    }
                });
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "connection task failed");
                }
            }
        }
    }

    stop_tx.send_replace(true);
    if !connections.is_empty() {
        tracing::info!(
            connections = connections.len(),
            drain_ms = drain.as_millis() as u64,
            "waiting for in-flight executions"
        );
    }
    let drained = tokio::time::timeout(drain, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            connections = connections.len(),
            "drain timed out, aborting executions"
        );
        connections.shutdown().await;
    }

    Ok(())
}

/// Serve one client until it disconnects or the server stops.
///
/// Shutdown is only observed between requests; an execution that already
/// started runs to its own outcome.
async fn handle_connection(
    mut stream: UnixStream,
    pipeline: Arc<Pipeline>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let request = tokio::select! {
            request = protocol::read_frame::<_, Request>(&mut stream) => request?,
            _ = stop.changed() => break,
        };
        let Some(request) = request else { break };
        tracing::debug!(?request, "received request");

        let response = handle_request(request, &pipeline).await;

        protocol::write_frame(&mut stream, &response).await?;
    }

    Ok(())
}

/// Handle a single request
async fn handle_request(request: Request, pipeline: &Pipeline) -> Response {
    match request {
        Request::Execute(req) => {
            if req.language.trim().is_empty() {
                return Response::Error {
                    message: "no language given".into(),
                };
            }
            let code = normalize_source(&req.code);
            Response::Execute(pipeline.execute(req.language.trim(), &code).await)
        }
        Request::Languages => Response::Languages {
            keys: pipeline.registry().keys().map(str::to_owned).collect(),
        },
        Request::Ping => Response::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resl_core::{
        LanguageConfig, LanguageRegistry, OutcomeKind, SandboxConfig, protocol::ExecuteRequest,
    };

    fn pipeline(root: &std::path::Path) -> Pipeline {
        let registry = LanguageRegistry::from_configs([LanguageConfig::interpreted(
            "sh", "alpine:3", "sh", "sh",
        )])
        .unwrap();
        Pipeline::new(
            SandboxConfig::builder()
                .runtime("/nonexistent/docker")
                .workspace_root(root.join("workspaces"))
                .build(),
            registry,
        )
    }

    #[tokio::test]
    async fn serves_requests_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("resl.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let shutdown = async {
            let _ = stop_rx.await;
        };
        let server = tokio::spawn(run(
            listener,
            pipeline(dir.path()),
            shutdown,
            Duration::from_secs(30),
        ));

        let mut client = UnixStream::connect(&socket).await.unwrap();

        protocol::write_frame(&mut client, &Request::Ping).await.unwrap();
        let pong: Response = protocol::read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(pong, Response::Pong);

        protocol::write_frame(&mut client, &Request::Languages).await.unwrap();
        let languages: Response = protocol::read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(languages, Response::Languages { keys: vec!["sh".into()] });

        let execute = Request::Execute(ExecuteRequest {
            language: "cobol".into(),
            code: "`DISPLAY 'HI'.`".into(),
        });
        protocol::write_frame(&mut client, &execute).await.unwrap();
        match protocol::read_frame(&mut client).await.unwrap().unwrap() {
            Response::Execute(report) => assert_eq!(report.kind, OutcomeKind::UnsupportedLanguage),
            other => panic!("unexpected response {other:?}"),
        }

        let execute = Request::Execute(ExecuteRequest {
            language: "sh".into(),
            code: "echo hi".into(),
        });
        protocol::write_frame(&mut client, &execute).await.unwrap();
        match protocol::read_frame(&mut client).await.unwrap().unwrap() {
            Response::Execute(report) => assert_eq!(report.kind, OutcomeKind::InfrastructureError),
            other => panic!("unexpected response {other:?}"),
        }

        // The client stays connected; an idle connection must not hold shutdown
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("idle connection delayed shutdown")
            .unwrap()
            .unwrap();
        drop(client);
    }

    #[tokio::test]
    async fn stuck_execution_is_aborted_after_drain() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("resl.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        // A runtime that ignores its arguments and never finishes in time
        let config = SandboxConfig::builder()
            .runtime("/bin/sh")
            .runtime_arg("-c")
            .runtime_arg("sleep 10")
            .workspace_root(dir.path().join("workspaces"))
            .build();
        let registry = LanguageRegistry::from_configs([LanguageConfig::interpreted(
            "sh", "alpine:3", "sh", "sh",
        )])
        .unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async {
            let _ = stop_rx.await;
        };
        let server = tokio::spawn(run(
            listener,
            Pipeline::new(config, registry),
            shutdown,
            Duration::from_millis(200),
        ));

        let mut client = UnixStream::connect(&socket).await.unwrap();
        let execute = Request::Execute(ExecuteRequest {
            language: "sh".into(),
            code: "echo hi".into(),
        });
        protocol::write_frame(&mut client, &execute).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("drain bound not honoured")
            .unwrap()
            .unwrap();

        // Aborting the execution closed the connection without an answer
        let answer: Option<Response> = protocol::read_frame(&mut client).await.unwrap();
        assert!(answer.is_none());
        assert_eq!(std::fs::read_dir(dir.path().join("workspaces")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_language_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = handle_request(
            Request::Execute(ExecuteRequest {
                language: " ".into(),
                code: "1".into(),
            }),
            &pipeline(dir.path()),
        )
        .await;
        assert!(matches!(response, Response::Error { .. }));
    }
}
