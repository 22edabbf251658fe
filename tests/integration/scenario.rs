use crate::*;

use beacon_services::{EventKind, Ingested, Transition};
use tokio::time::Instant;

/// New on first sight, Update when the address moves, Lost once the
/// last announce's expiration runs out.
#[tokio::test(start_paused = true)]
async fn test_address_change_then_silence() -> Result<()> {
    let (pipeline, mut events) = start()?;

    let first = announce(DEVICE, "eth0", "172.19.192.57", 15);
    assert_eq!(pipeline.ingest(&first)?, Ingested::Validated(Transition::New));

    let PresenceEvent::New { identity, announce: initial } = next_event(&mut events).await? else {
        panic!("expected New");
    };
    assert_eq!(initial.device.uuid, DEVICE);
    assert_eq!(initial.router_uuid, None);
    assert_eq!(initial.expiration_secs, 15);

    tokio::time::sleep(Duration::from_secs(5)).await;

    let moved = announce(DEVICE, "eth0", "172.19.192.99", 15);
    assert_eq!(pipeline.ingest(&moved)?, Ingested::Validated(Transition::Updated));
    let updated_at = Instant::now();

    let PresenceEvent::Update { identity: updated, old, new } = next_event(&mut events).await?
    else {
        panic!("expected Update");
    };
    assert_eq!(updated, identity);
    assert_eq!(old, initial);

    // Old and new differ only in the address.
    let mut patched = (*old).clone();
    patched.interface.ipv4[0].address = "172.19.192.99".to_string();
    assert_eq!(patched, *new);

    tokio::time::sleep(Duration::from_secs(16)).await;

    let lost = next_event(&mut events).await?;
    assert_eq!(lost.kind(), EventKind::Lost);
    assert_eq!(lost.identity(), identity);
    assert_eq!(lost.announce(), &new);
    assert!(updated_at.elapsed() >= Duration::from_secs(15));

    assert_quiet(&mut events);
    assert!(pipeline.monitor().is_empty());
    Ok(())
}

/// eth0 and eth1 on the same device each run their own lifecycle.
#[tokio::test(start_paused = true)]
async fn test_interfaces_are_independent_presences() -> Result<()> {
    let (pipeline, mut events) = start()?;

    pipeline.ingest(&announce(DEVICE, "eth0", "10.0.0.5", 3))?;
    pipeline.ingest(&announce(DEVICE, "eth1", "10.1.0.5", 3))?;
    let eth0 = next_event(&mut events).await?.identity();
    let eth1 = next_event(&mut events).await?.identity();
    assert_ne!(eth0, eth1);
    assert_eq!(pipeline.monitor().len(), 2);

    // Keep eth1 alive, let eth0 lapse.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        pipeline.ingest(&announce(DEVICE, "eth1", "10.1.0.5", 3))?;
    }

    let lost = next_event(&mut events).await?;
    assert_eq!((lost.kind(), lost.identity()), (EventKind::Lost, eth0));
    assert_quiet(&mut events);
    assert!(pipeline.monitor().get(&eth1).is_some());

    // An eth1 change is an Update for eth1 only.
    pipeline.ingest(&announce(DEVICE, "eth1", "10.1.0.6", 3))?;
    let update = next_event(&mut events).await?;
    assert_eq!((update.kind(), update.identity()), (EventKind::Update, eth1));
    Ok(())
}

/// The same device and interface reached through a router is another path.
#[tokio::test(start_paused = true)]
async fn test_router_path_is_distinct() -> Result<()> {
    let (pipeline, mut events) = start()?;

    let direct = params(DEVICE, "eth0", "10.0.0.5", 10);
    let mut routed = direct.clone();
    routed["router"] = json!({ "uuid": "ROUTER-1" });

    pipeline.ingest(&envelope(direct))?;
    pipeline.ingest(&envelope(routed))?;

    let a = next_event(&mut events).await?;
    let b = next_event(&mut events).await?;
    assert_eq!((a.kind(), b.kind()), (EventKind::New, EventKind::New));
    assert_ne!(a.identity(), b.identity());
    assert_eq!(b.announce().router_uuid.as_deref(), Some("ROUTER-1"));
    Ok(())
}
