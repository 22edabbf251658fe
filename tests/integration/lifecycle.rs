use crate::*;

use beacon_services::{EventKind, Ingested, MonitorError, Transition};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_unrefreshed_announce_is_lost_once() -> Result<()> {
    let (pipeline, mut events) = start()?;
    let raw = announce(DEVICE, "eth0", "172.19.192.57", 1);

    let received = Instant::now();
    pipeline.ingest(&raw)?;
    assert_eq!(next_event(&mut events).await?.kind(), EventKind::New);

    let lost = next_event(&mut events).await?;
    let elapsed = received.elapsed();
    assert_eq!(lost.kind(), EventKind::Lost);
    assert!(elapsed >= Duration::from_secs(1), "lost too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "lost too late: {elapsed:?}");
    assert!(pipeline.monitor().get(&lost.identity()).is_none());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_quiet(&mut events);

    // Same bytes again: served from cache, but the path starts over.
    assert_eq!(pipeline.ingest(&raw)?, Ingested::Cached(Transition::New));
    assert_eq!(next_event(&mut events).await?.kind(), EventKind::New);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_missing_expiration_uses_default() -> Result<()> {
    let (pipeline, mut events) = start()?;
    let mut p = params(DEVICE, "eth0", "10.0.0.5", 0);
    p.as_object_mut().context("params object")?.remove("expiration");

    let received = Instant::now();
    pipeline.ingest(&envelope(p))?;
    let new = next_event(&mut events).await?;
    assert_eq!(new.announce().expiration_secs, 6);

    next_event(&mut events).await?;
    let elapsed = received.elapsed();
    assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_configured_default_expiration() -> Result<()> {
    let pipeline = AnnouncePipeline::new(PipelineConfig {
        default_expiration: Duration::from_secs(30),
        ..PipelineConfig::default()
    })?;
    let mut events = pipeline.subscribe_channel();

    pipeline.ingest(&announce(DEVICE, "eth0", "10.0.0.5", -5))?;
    assert_eq!(next_event(&mut events).await?.announce().expiration_secs, 30);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_quiet(&mut events);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(next_event(&mut events).await?.kind(), EventKind::Lost);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_bounded_and_silent() -> Result<()> {
    let (pipeline, mut events) = start()?;
    pipeline.ingest(&announce(DEVICE, "eth0", "10.0.0.5", 2))?;
    pipeline.ingest(&announce(DEVICE, "eth1", "10.0.1.5", 2))?;
    next_event(&mut events).await?;
    next_event(&mut events).await?;

    tokio::time::timeout(
        Duration::from_secs(1),
        pipeline.shutdown(Duration::from_millis(100)),
    )
    .await
    .context("shutdown must not hang")??;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_quiet(&mut events);
    assert_eq!(
        pipeline.ingest(&announce(DEVICE, "eth0", "10.0.0.5", 2)),
        Err(MonitorError::ShutDown)
    );

    // Second shutdown is a no-op.
    pipeline.shutdown(Duration::from_millis(100)).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_handler_stops_receiving() -> Result<()> {
    let (pipeline, mut events) = start()?;
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let id = pipeline.subscribe({
        let seen = seen.clone();
        move |event: &PresenceEvent| {
            if let Ok(mut seen) = seen.lock() {
                seen.push(event.kind());
            }
        }
    });

    pipeline.ingest(&announce(DEVICE, "eth0", "10.0.0.5", 2))?;
    assert!(pipeline.unsubscribe(id));
    pipeline.ingest(&announce(DEVICE, "eth0", "10.0.0.6", 2))?;

    next_event(&mut events).await?;
    next_event(&mut events).await?;
    assert_eq!(*seen.lock().unwrap(), vec![EventKind::New]);
    Ok(())
}
