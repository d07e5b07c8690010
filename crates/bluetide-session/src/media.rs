//! Media position tracking.
//!
//! AVRCP players report position only when something changes; a
//! progress display polling the provider for every repaint would be
//! wasteful. A [`PositionUpdater`] owns the last observed media
//! snapshot and a monotonic clock, and advances the position locally
//! between provider events.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use bluetide_core::bus::Subscription;
use bluetide_core::{Address, MediaData};

/// How often the locally advanced position is re-published.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// A background task that follows one device's media events and keeps
/// a skew-compensated playback position available through a watch
/// channel.
pub struct PositionUpdater {
    rx: watch::Receiver<MediaData>,
    handle: JoinHandle<()>,
}

impl PositionUpdater {
    pub(crate) fn spawn(
        mut events: Subscription<MediaData, MediaData>,
        address: Address,
        initial: MediaData,
    ) -> Self {
        let (tx, rx) = watch::channel(initial.clone());

        let handle = tokio::spawn(async move {
            let mut last = initial;
            let mut observed_at = Instant::now();
            let mut tick = tokio::time::interval(TICK_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    added = events.added.recv() => match added {
                        Some(media) if media.address == address => {
                            last = media;
                            observed_at = Instant::now();
                            let _ = tx.send(last.clone());
                        }
                        Some(_) => {}
                        None => break,
                    },

                    updated = events.updated.recv() => match updated {
                        Some(media) if media.address == address => {
                            last = media;
                            observed_at = Instant::now();
                            let _ = tx.send(last.clone());
                        }
                        Some(_) => {}
                        None => break,
                    },

                    _ = events.done.changed() => break,

                    _ = tick.tick() => {
                        if !last.status.is_playing() {
                            continue;
                        }

                        let elapsed = observed_at.elapsed().as_millis() as u32;
                        let mut advanced = last.clone();
                        advanced.position = last.position.saturating_add(elapsed);
                        advanced.clamp_position();
                        let _ = tx.send(advanced);
                    }
                }
            }
        });

        Self { rx, handle }
    }

    /// A receiver of the latest (possibly locally advanced) snapshot.
    pub fn watch(&self) -> watch::Receiver<MediaData> {
        self.rx.clone()
    }
}

impl Drop for PositionUpdater {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use bluetide_core::{EventBus, MediaStatus, TrackData};

    use super::*;

    fn media(address: Address, status: MediaStatus, position: u32) -> MediaData {
        MediaData {
            address,
            status,
            position,
            track: TrackData {
                title: "track".into(),
                duration: 60_000,
                ..TrackData::default()
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn advances_position_between_events() {
        let bus = EventBus::new();
        let address: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();

        let updater = PositionUpdater::spawn(
            bus.media.subscribe(),
            address,
            media(address, MediaStatus::Stopped, 0),
        );
        let mut rx = updater.watch();

        bus.media
            .publish_updated(media(address, MediaStatus::Playing, 1_000));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().position, 1_000);

        // With no further provider events the position keeps moving.
        tokio::time::advance(Duration::from_secs(2)).await;
        rx.changed().await.unwrap();
        let advanced = rx.borrow().position;
        assert!(advanced >= 2_000, "position {advanced} should have advanced");
    }

    #[tokio::test(start_paused = true)]
    async fn paused_player_does_not_advance() {
        let bus = EventBus::new();
        let address: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();

        let updater = PositionUpdater::spawn(
            bus.media.subscribe(),
            address,
            media(address, MediaStatus::Paused, 5_000),
        );
        let rx = updater.watch();

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;

        assert_eq!(rx.borrow().position, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_other_devices() {
        let bus = EventBus::new();
        let address: Address = "AA:BB:CC:DD:EE:01".parse().unwrap();
        let other: Address = "AA:BB:CC:DD:EE:02".parse().unwrap();

        let updater = PositionUpdater::spawn(
            bus.media.subscribe(),
            address,
            media(address, MediaStatus::Paused, 0),
        );
        let rx = updater.watch();

        bus.media
            .publish_updated(media(other, MediaStatus::Playing, 9_000));
        tokio::task::yield_now().await;

        assert_eq!(rx.borrow().position, 0);
    }
}
