// radiobot-core/src/tasks/status_publisher.rs

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radiobot_common::models::now_playing::NowPlaying;
use crate::status::{derive_label, ChannelStatusSink, MetadataSource, StatusConfig};
use crate::Error;

/// Mirrors the station feed into the voice channel status.
pub struct StatusPublisher {
    source: Arc<dyn MetadataSource>,
    sink: Arc<dyn ChannelStatusSink>,
    config: StatusConfig,
    latest: NowPlaying,
    last_pushed: Option<String>,
}

impl StatusPublisher {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        sink: Arc<dyn ChannelStatusSink>,
        config: StatusConfig,
    ) -> Self {
        Self {
            source,
            sink,
            config,
            latest: NowPlaying::default(),
            last_pushed: None,
        }
    }

    pub fn config(&self) -> &StatusConfig {
        &self.config
    }

    pub fn latest(&self) -> &NowPlaying {
        &self.latest
    }

    pub fn last_pushed(&self) -> Option<&str> {
        self.last_pushed.as_deref()
    }

    /// Polls the feed. On failure the previous snapshot stays in place.
    pub async fn refresh(&mut self) {
        match self.source.fetch().await {
            Ok(now) => self.latest = now,
            Err(e) => warn!("[StatusPublisher] failed to fetch now-playing feed: {e}"),
        }
    }

    /// Pushes the current label if it differs from the last one that went
    /// through. Returns whether a push happened.
    pub async fn publish(&mut self) -> Result<bool, Error> {
        let Some(label) = derive_label(&self.latest, &self.config) else {
            return Ok(false);
        };
        if self.last_pushed.as_deref() == Some(label.as_str()) {
            return Ok(false);
        }

        self.sink.set_status(&label).await?;
        info!("[StatusPublisher] status updated to: {label}");
        self.last_pushed = Some(label);
        Ok(true)
    }
}

/// Runs fetch and publish on their own intervals until `shutdown` fires.
pub fn spawn_status_publisher(
    mut publisher: StatusPublisher,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut fetch_tick = interval(publisher.config().fetch_interval);
        let mut publish_tick = interval(publisher.config().publish_interval);
        fetch_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        publish_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = fetch_tick.tick() => publisher.refresh().await,
                _ = publish_tick.tick() => {
                    if let Err(e) = publisher.publish().await {
                        warn!("[StatusPublisher] failed to update status: {e}");
                    }
                }
            }
        }
        debug!("[StatusPublisher] stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use mockall::Sequence;
    use parking_lot::Mutex;
    use radiobot_common::models::now_playing::SongEntry;

    use crate::status::{MockChannelStatusSink, MockMetadataSource};

    fn playing(singer: &str, song: &str) -> NowPlaying {
        NowPlaying {
            song: Some(SongEntry {
                time: "10:00".into(),
                singer: singer.into(),
                song: song.into(),
            }),
            dj: None,
        }
    }

    fn recording_sink(pushed: &Arc<Mutex<Vec<String>>>) -> MockChannelStatusSink {
        let pushed = pushed.clone();
        let mut sink = MockChannelStatusSink::new();
        sink.expect_set_status().returning(move |label| {
            pushed.lock().push(label.to_string());
            Ok(())
        });
        sink
    }

    #[tokio::test]
    async fn test_publish_only_on_change() {
        let mut source = MockMetadataSource::new();
        let mut seq = Sequence::new();
        source
            .expect_fetch()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| Ok(playing("MONATIK", "Вечность")));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(playing("Хіт FM", "promo")));

        let pushed = Arc::new(Mutex::new(Vec::new()));
        let mut publisher = StatusPublisher::new(
            Arc::new(source),
            Arc::new(recording_sink(&pushed)),
            StatusConfig::default(),
        );

        assert!(!publisher.publish().await.unwrap(), "nothing fetched yet");

        publisher.refresh().await;
        assert!(publisher.publish().await.unwrap());
        publisher.refresh().await;
        assert!(!publisher.publish().await.unwrap());
        publisher.refresh().await;
        assert!(publisher.publish().await.unwrap());

        assert_eq!(
            *pushed.lock(),
            vec!["🎤 MONATIK - 💽 Вечность".to_string(), "Ad / talk break".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_push_is_retried_next_tick() {
        let mut source = MockMetadataSource::new();
        source
            .expect_fetch()
            .returning(|| Ok(playing("Антитіла", "TDME")));

        let mut sink = MockChannelStatusSink::new();
        let mut seq = Sequence::new();
        sink.expect_set_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::Platform("HTTP 429".into())));
        sink.expect_set_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut publisher =
            StatusPublisher::new(Arc::new(source), Arc::new(sink), StatusConfig::default());
        publisher.refresh().await;

        assert!(publisher.publish().await.is_err());
        assert_eq!(publisher.last_pushed(), None);
        assert!(publisher.publish().await.unwrap());
        assert_eq!(publisher.last_pushed(), Some("🎤 Антитіла - 💽 TDME"));
        assert!(!publisher.publish().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let mut source = MockMetadataSource::new();
        let mut seq = Sequence::new();
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(playing("Jerry Heil", "Охрана")));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(Error::Parse("now-playing feed is not an array".into())));

        let pushed = Arc::new(Mutex::new(Vec::new()));
        let mut publisher = StatusPublisher::new(
            Arc::new(source),
            Arc::new(recording_sink(&pushed)),
            StatusConfig::default(),
        );

        publisher.refresh().await;
        publisher.publish().await.unwrap();
        publisher.refresh().await;
        assert_eq!(publisher.latest(), &playing("Jerry Heil", "Охрана"));
        assert!(!publisher.publish().await.unwrap());
        assert_eq!(pushed.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_until_cancelled() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let mut source = MockMetadataSource::new();
        let counter = fetches.clone();
        source.expect_fetch().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(playing("The Hardkiss", "Helpless"))
        });

        let pushed = Arc::new(Mutex::new(Vec::new()));
        let publisher = StatusPublisher::new(
            Arc::new(source),
            Arc::new(recording_sink(&pushed)),
            StatusConfig::default(),
        );

        let shutdown = CancellationToken::new();
        let handle = spawn_status_publisher(publisher, shutdown.clone());

        tokio::time::sleep(Duration::from_secs(12)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // Ticks at 0s, 5s and 10s.
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        assert_eq!(*pushed.lock(), vec!["🎤 The Hardkiss - 💽 Helpless".to_string()]);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }
}
