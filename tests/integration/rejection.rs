use crate::*;

use beacon_core::ValidationError;
use beacon_services::{CacheSizes, Ingested};

async fn assert_rejected(raw: &str, expected: ValidationError) -> Result<()> {
    let (pipeline, mut events) = start()?;

    assert_eq!(pipeline.ingest(raw)?, Ingested::Rejected(expected.clone()));
    assert_eq!(pipeline.cache_sizes(), CacheSizes { content: 0, paths: 0 });
    assert!(pipeline.monitor().is_empty());
    assert_eq!(
        pipeline.last_rejection().map(|r| r.reason),
        Some(expected)
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_quiet(&mut events);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_missing_device_is_dropped() -> Result<()> {
    let mut p = params(DEVICE, "eth0", "10.0.0.5", 15);
    p.as_object_mut().context("params object")?.remove("device");
    assert_rejected(&envelope(p), ValidationError::MissingDevice).await
}

#[tokio::test(start_paused = true)]
async fn test_missing_interface_name_is_dropped() -> Result<()> {
    let mut p = params(DEVICE, "eth0", "10.0.0.5", 15);
    p["netSettings"]["interface"]
        .as_object_mut()
        .context("interface object")?
        .remove("name");
    assert_rejected(&envelope(p), ValidationError::MissingInterfaceName).await
}

#[tokio::test(start_paused = true)]
async fn test_router_without_uuid_is_dropped() -> Result<()> {
    let mut p = params(DEVICE, "eth0", "10.0.0.5", 15);
    p["router"] = json!({ "name": "edge" });
    assert_rejected(&envelope(p), ValidationError::MissingRouterUuid).await
}

#[tokio::test(start_paused = true)]
async fn test_future_api_version_is_dropped() -> Result<()> {
    let mut p = params(DEVICE, "eth0", "10.0.0.5", 15);
    p["apiVersion"] = json!("2.0");
    let expected = ValidationError::UnsupportedApiVersion(Some("2.0".to_string()));
    assert!(expected.is_protocol_evolution());
    assert_rejected(&envelope(p), expected).await
}

#[tokio::test(start_paused = true)]
async fn test_garbage_is_dropped() -> Result<()> {
    assert_rejected("{\"jsonrpc\":", ValidationError::MalformedJson).await?;
    let wrong_method = json!({
        "jsonrpc": "2.0",
        "method": "configure",
        "params": params(DEVICE, "eth0", "10.0.0.5", 15)
    })
    .to_string();
    assert_rejected(
        &wrong_method,
        ValidationError::UnsupportedMethod(Some("configure".to_string())),
    )
    .await
}

/// A bad sender does not disturb anyone else's presence.
#[tokio::test(start_paused = true)]
async fn test_rejections_do_not_affect_other_senders() -> Result<()> {
    let (pipeline, mut events) = start()?;
    pipeline.ingest(&announce(DEVICE, "eth0", "10.0.0.5", 15))?;
    next_event(&mut events).await?;

    for raw in ["", "null", "[]", "{\"method\":\"announce\",\"params\":42}"] {
        assert!(matches!(pipeline.ingest(raw)?, Ingested::Rejected(_)));
    }
    assert_eq!(pipeline.monitor().len(), 1);
    assert_eq!(pipeline.stats().rejected, 4);
    assert_quiet(&mut events);
    Ok(())
}
