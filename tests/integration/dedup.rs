use crate::*;

use beacon_services::{EventKind, Ingested, Transition};

#[tokio::test(start_paused = true)]
async fn test_identical_bytes_skip_validation() -> Result<()> {
    let (pipeline, mut events) = start()?;
    let raw = announce(DEVICE, "eth0", "172.19.192.57", 15);

    assert_eq!(pipeline.ingest(&raw)?, Ingested::Validated(Transition::New));
    assert_eq!(pipeline.ingest(&raw)?, Ingested::Cached(Transition::Refreshed));

    let stats = pipeline.stats();
    assert_eq!(stats.validations, 1);
    assert_eq!(stats.cache_hits, 1);

    assert_eq!(next_event(&mut events).await?.kind(), EventKind::New);
    assert_quiet(&mut events);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_repeated_announce_is_one_new_then_silent_refreshes() -> Result<()> {
    let (pipeline, mut events) = start()?;
    let raw = announce(DEVICE, "eth0", "172.19.192.57", 15);

    let outcomes = (0..5)
        .map(|_| pipeline.ingest(&raw))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(outcomes[0], Ingested::Validated(Transition::New));
    assert!(outcomes[1..]
        .iter()
        .all(|o| *o == Ingested::Cached(Transition::Refreshed)));

    assert_eq!(next_event(&mut events).await?.kind(), EventKind::New);
    assert_quiet(&mut events);
    assert_eq!(pipeline.stats().validations, 1);
    Ok(())
}

/// A refresh from the cache still pushes the expiration out.
#[tokio::test(start_paused = true)]
async fn test_cached_refresh_reschedules_expiration() -> Result<()> {
    let (pipeline, mut events) = start()?;
    let raw = announce(DEVICE, "eth0", "172.19.192.57", 4);

    pipeline.ingest(&raw)?;
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(pipeline.ingest(&raw)?, Ingested::Cached(Transition::Refreshed));
    }

    assert_eq!(next_event(&mut events).await?.kind(), EventKind::New);
    assert_quiet(&mut events);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(next_event(&mut events).await?.kind(), EventKind::Lost);
    Ok(())
}

/// Adding a service is one Update, and the old bytes are no longer cached.
#[tokio::test(start_paused = true)]
async fn test_service_added_is_single_update() -> Result<()> {
    let (pipeline, mut events) = start()?;

    let before = params(DEVICE, "eth0", "172.19.192.57", 15);
    let mut after = before.clone();
    after["services"] = json!([{ "type": "http", "port": 80 }]);
    let before = envelope(before);
    let after = envelope(after);

    pipeline.ingest(&before)?;
    assert_eq!(pipeline.ingest(&after)?, Ingested::Validated(Transition::Updated));

    assert_eq!(next_event(&mut events).await?.kind(), EventKind::New);
    let update = next_event(&mut events).await?;
    assert_eq!(update.kind(), EventKind::Update);
    assert_eq!(update.announce().service_port("http"), Some(80));
    assert_quiet(&mut events);

    // The stale bytes miss the cache and go through the validator again.
    let validations = pipeline.stats().validations;
    assert_eq!(pipeline.ingest(&before)?, Ingested::Validated(Transition::Updated));
    assert_eq!(pipeline.stats().validations, validations + 1);
    Ok(())
}
