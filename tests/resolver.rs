mod common;

use common::{quiet_logger, server_record, test_config, FakeEngineFactory, FakeTransport};
use hostctl::errors::ToolErrorKind;
use hostctl::services::context::{Cancellation, ExecutionContext};
use hostctl::services::logger::{LogLevel, Logger};
use hostctl::services::registry::ReachabilityProbe;
use hostctl::services::resolver::{
    ConnectionResolver, CredentialSource, Credentials, EngineOrigin,
};
use std::sync::Arc;
use uuid::Uuid;

fn resolver(transport: Arc<FakeTransport>, engines: Arc<FakeEngineFactory>) -> ConnectionResolver {
    ConnectionResolver::new(quiet_logger(), Arc::new(test_config()), transport, engines)
}

fn bound(password: Option<&str>, key: Option<&str>) -> ExecutionContext {
    let server = server_record(password, key, Uuid::new_v4(), Uuid::new_v4());
    ExecutionContext::new().with_target(Some(server))
}

#[tokio::test]
async fn bound_record_without_credentials_fails_without_dialing() {
    let transport = Arc::new(FakeTransport::accepting(&["password", "private_key"]));
    let resolver = resolver(transport.clone(), Arc::new(FakeEngineFactory::new(&[])));

    let err = resolver.connect(&bound(None, None)).await.err().expect("must fail");
    assert_eq!(err.kind, ToolErrorKind::AuthenticationFailed);
    assert!(transport.dial_log().is_empty());
}

#[tokio::test]
async fn failing_key_falls_back_to_password() {
    let transport = Arc::new(FakeTransport::accepting(&["password"]));
    let resolver = resolver(transport.clone(), Arc::new(FakeEngineFactory::new(&[])));
    let ctx = bound(Some("pw"), Some("/keys/id.pem"));
    let server_id = ctx.target.as_ref().map(|s| s.id).unwrap();

    let mut handle = resolver.connect(&ctx).await.expect("password fallback");
    assert_eq!(handle.source(), CredentialSource::BoundServer(server_id));
    assert_eq!(
        transport.dial_log(),
        vec!["private_key@10.0.0.5:22", "password@10.0.0.5:22"]
    );

    let output = handle.run("uptime").await.expect("exec");
    assert_eq!(output.stdout, "ran: uptime");
    assert!(output.success());
    handle.close().await;
    assert_eq!(transport.command_log(), vec!["uptime"]);
}

#[tokio::test]
async fn both_failures_are_reported_together() {
    let transport = Arc::new(FakeTransport::accepting(&[]));
    let resolver = resolver(transport.clone(), Arc::new(FakeEngineFactory::new(&[])));

    let err = resolver
        .connect(&bound(Some("pw"), Some("/keys/id.pem")))
        .await
        .err()
        .expect("must fail");
    assert_eq!(err.kind, ToolErrorKind::AuthenticationFailed);
    let details = err.details.expect("reasons");
    assert_eq!(details["private_key"], "private_key rejected");
    assert_eq!(details["password"], "password rejected");
    assert_eq!(transport.dial_log().len(), 2);
}

#[tokio::test]
async fn unreachable_host_is_not_an_auth_failure() {
    let transport = Arc::new(FakeTransport::unreachable());
    let resolver = resolver(transport, Arc::new(FakeEngineFactory::new(&[])));

    let err = resolver
        .connect(&bound(Some("pw"), None))
        .await
        .err()
        .expect("must fail");
    assert_eq!(err.kind, ToolErrorKind::SshUnreachable);
}

#[tokio::test]
async fn unbound_context_uses_platform_defaults() {
    let transport = Arc::new(FakeTransport::accepting(&["password"]));
    let resolver = resolver(transport.clone(), Arc::new(FakeEngineFactory::new(&[])));

    let handle = resolver
        .connect(&ExecutionContext::new())
        .await
        .expect("default host");
    assert_eq!(handle.source(), CredentialSource::PlatformDefault);
    assert_eq!(transport.dial_log(), vec!["password@10.9.9.9:22"]);
    handle.close().await;
}

#[tokio::test]
async fn cancelled_context_never_dials() {
    let transport = Arc::new(FakeTransport::accepting(&["password"]));
    let resolver = resolver(transport.clone(), Arc::new(FakeEngineFactory::new(&[])));
    let cancellation = Cancellation::new();
    cancellation.cancel();
    let ctx = bound(Some("pw"), None).with_cancellation(cancellation);

    let err = resolver.connect(&ctx).await.err().expect("cancelled");
    assert_eq!(err.kind, ToolErrorKind::Cancelled);
    assert!(transport.dial_log().is_empty());

    let err = resolver.engine(&ctx).await.err().expect("cancelled");
    assert_eq!(err.kind, ToolErrorKind::Cancelled);
}

#[tokio::test]
async fn bound_target_gets_its_remote_engine() {
    let transport = Arc::new(FakeTransport::accepting(&["password"]));
    let resolver = resolver(transport, Arc::new(FakeEngineFactory::new(&[])));
    let ctx = bound(Some("pw"), None);
    let server_id = ctx.target.as_ref().map(|s| s.id).unwrap();

    let handle = resolver.engine(&ctx).await.expect("remote engine");
    assert_eq!(
        handle.origin(),
        EngineOrigin::Remote(CredentialSource::BoundServer(server_id))
    );
}

#[tokio::test]
async fn explicit_target_engine_failure_never_falls_back() {
    let transport = Arc::new(FakeTransport::accepting(&["password"]));
    let engines = Arc::new(FakeEngineFactory::new(&[]).refusing_remote());
    let resolver = resolver(transport, engines);
    let ctx = bound(Some("pw"), None);
    let server_id = ctx.target.as_ref().map(|s| s.id).unwrap();

    let err = resolver.engine(&ctx).await.err().expect("no fallback");
    assert_eq!(err.kind, ToolErrorKind::EngineUnavailable);
    assert_eq!(err.details.unwrap()["server_id"], server_id.to_string());
}

#[tokio::test]
async fn explicit_target_without_dial_stdio_fails() {
    let transport = Arc::new(FakeTransport::accepting(&["password"]).without_engine_bridge());
    let resolver = resolver(transport, Arc::new(FakeEngineFactory::new(&[])));

    let err = resolver
        .engine(&bound(Some("pw"), None))
        .await
        .err()
        .expect("no fallback");
    assert_eq!(err.kind, ToolErrorKind::EngineUnavailable);
}

#[tokio::test]
async fn explicit_target_ssh_failure_is_engine_unavailable() {
    let transport = Arc::new(FakeTransport::unreachable());
    let resolver = resolver(transport, Arc::new(FakeEngineFactory::new(&[])));

    let err = resolver
        .engine(&bound(Some("pw"), None))
        .await
        .err()
        .expect("no fallback");
    assert_eq!(err.kind, ToolErrorKind::EngineUnavailable);
    assert_eq!(err.details.unwrap()["cause"], "SSH_UNREACHABLE");
}

#[tokio::test]
async fn unbound_context_degrades_to_local_socket() {
    let transport = Arc::new(FakeTransport::unreachable());
    let resolver = resolver(transport, Arc::new(FakeEngineFactory::new(&[])));

    let handle = resolver
        .engine(&ExecutionContext::new())
        .await
        .expect("local fallback");
    assert_eq!(handle.origin(), EngineOrigin::LocalSocket);
}

#[tokio::test]
async fn reachability_check_honours_the_callers_cancellation() {
    let transport = Arc::new(FakeTransport::accepting(&["password"]));
    let resolver = resolver(transport.clone(), Arc::new(FakeEngineFactory::new(&[])));
    let server = server_record(Some("pw"), None, Uuid::new_v4(), Uuid::new_v4());
    let cancellation = Cancellation::new();
    cancellation.cancel();
    let ctx = ExecutionContext::new().with_cancellation(cancellation);

    let err = resolver
        .probe(&ctx, Credentials::from_server(&server))
        .await
        .err()
        .expect("cancelled");
    assert_eq!(err.kind, ToolErrorKind::Cancelled);
    assert!(transport.dial_log().is_empty());

    resolver
        .probe(&ExecutionContext::new(), Credentials::from_server(&server))
        .await
        .expect("reachable");
    assert_eq!(transport.dial_log(), vec!["password@10.0.0.5:22"]);
}

#[tokio::test]
async fn failed_session_teardown_is_logged_not_raised() {
    let logger = Logger::with_level("test", LogLevel::Debug);
    let transport = Arc::new(FakeTransport::accepting(&["password"]).panicking_on_close());
    let resolver = ConnectionResolver::new(
        logger.clone(),
        Arc::new(test_config()),
        transport,
        Arc::new(FakeEngineFactory::new(&[])),
    );

    let handle = resolver.connect(&bound(Some("pw"), None)).await.expect("connect");
    let before = logger.stats()["debug"].as_u64().unwrap();
    handle.close().await;
    assert_eq!(logger.stats()["debug"].as_u64().unwrap(), before + 1);
}
