use crate::models::{
    ChannelConfig, ChannelState, StreamerSnapshot, StreamerStatus, VideoObservation, VideoStatus,
};
use crate::services::feed_prober::FeedProber;
use crate::services::registry::ChannelRegistry;
use crate::services::snapshot_cache::SnapshotSource;
use crate::services::state_store::{ChannelStateStore, ChannelStates};
use crate::services::video_batcher::VideoStatusBatcher;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Channels live or waiting within this window get the deeper probe.
    pub active_window: Duration,
    /// How long an empty feed falls back to the last known video.
    pub rss_grace_window: Duration,
    pub offline_confirm_polls: u32,
    /// Tried in order for recently active channels; the first non-empty result wins.
    pub active_depths: Vec<usize>,
    pub dormant_depth: usize,
    pub probe_concurrency: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        ResolverSettings {
            active_window: Duration::minutes(15),
            rss_grace_window: Duration::minutes(2),
            offline_confirm_polls: 3,
            active_depths: vec![3, 1],
            dormant_depth: 1,
            probe_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingReason {
    /// Missed polls are being counted before the channel is declared offline.
    Confirming,
    /// The feed's newest matching video is an upcoming stream.
    ScheduledHit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Live,
    Waiting(WaitingReason),
    /// Reserved for a scheduled stream known without a feed hit.
    Scheduled,
    Offline,
}

impl ChannelPhase {
    pub fn status(self) -> StreamerStatus {
        match self {
            ChannelPhase::Live => StreamerStatus::Live,
            ChannelPhase::Waiting(_) => StreamerStatus::Waiting,
            ChannelPhase::Scheduled => StreamerStatus::Scheduled,
            ChannelPhase::Offline => StreamerStatus::Offline,
        }
    }
}

/// What one poll saw for a channel.
#[derive(Debug, Clone, Copy)]
pub enum PollOutcome<'a> {
    Hit(&'a VideoObservation),
    Miss { had_candidates: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub phase: ChannelPhase,
    pub state: ChannelState,
    pub live_video_id: Option<String>,
    pub concurrent_viewers: Option<u64>,
}

/// Applies one poll's outcome to a channel's carried state.
///
/// A hit resets the miss counter. A miss bumps it, and a channel that has been
/// active reports `Waiting` while the counter taken before this poll is below
/// `offline_confirm_polls`. Only those waiting polls refresh `last_active_at`.
pub fn transition(
    prior: &ChannelState,
    outcome: PollOutcome<'_>,
    now: DateTime<Utc>,
    offline_confirm_polls: u32,
) -> Transition {
    match outcome {
        PollOutcome::Hit(observation) => {
            let state = ChannelState {
                offline_polls: 0,
                last_active_at: Some(now),
                last_known_video_id: Some(observation.video_id.clone()),
            };
            match observation.status {
                VideoStatus::Live => Transition {
                    phase: ChannelPhase::Live,
                    state,
                    live_video_id: Some(observation.video_id.clone()),
                    concurrent_viewers: Some(observation.concurrent_viewers.unwrap_or(0)),
                },
                VideoStatus::Scheduled => Transition {
                    phase: ChannelPhase::Waiting(WaitingReason::ScheduledHit),
                    state,
                    live_video_id: None,
                    concurrent_viewers: None,
                },
            }
        }
        PollOutcome::Miss { had_candidates } => {
            let mut state = prior.clone();
            if had_candidates || prior.last_known_video_id.is_some() {
                state.offline_polls = prior.offline_polls.saturating_add(1);
            }

            let confirming =
                prior.last_active_at.is_some() && prior.offline_polls < offline_confirm_polls;
            let phase = if confirming {
                state.last_active_at = Some(now);
                ChannelPhase::Waiting(WaitingReason::Confirming)
            } else {
                ChannelPhase::Offline
            };

            Transition {
                phase,
                state,
                live_video_id: None,
                concurrent_viewers: None,
            }
        }
    }
}

fn active_within(state: &ChannelState, window: Duration, now: DateTime<Utc>) -> bool {
    state
        .last_active_at
        .is_some_and(|at| now.signed_duration_since(at) < window)
}

/// Probe depths for one channel, shallowest-cost plan first.
pub fn probe_depths(
    state: &ChannelState,
    now: DateTime<Utc>,
    settings: &ResolverSettings,
) -> Vec<usize> {
    if active_within(state, settings.active_window, now) && !settings.active_depths.is_empty() {
        settings.active_depths.clone()
    } else {
        vec![settings.dormant_depth]
    }
}

/// The last known video, while the feed may still be lagging behind it.
pub fn grace_candidate(
    state: &ChannelState,
    now: DateTime<Utc>,
    settings: &ResolverSettings,
) -> Option<String> {
    if active_within(state, settings.rss_grace_window, now) {
        state.last_known_video_id.clone()
    } else {
        None
    }
}

/// Candidate videos gathered for one channel in the probe phase.
struct ProbeResult {
    candidates: Vec<String>,
    from_feed: bool,
}

pub struct LiveStatusResolver {
    registry: ChannelRegistry,
    states: ChannelStateStore,
    prober: Arc<dyn FeedProber>,
    batcher: VideoStatusBatcher,
    settings: ResolverSettings,
}

impl LiveStatusResolver {
    pub fn new(
        registry: ChannelRegistry,
        states: ChannelStateStore,
        prober: Arc<dyn FeedProber>,
        batcher: VideoStatusBatcher,
        settings: ResolverSettings,
    ) -> Self {
        LiveStatusResolver {
            registry,
            states,
            prober,
            batcher,
            settings,
        }
    }

    async fn probe_channel(
        &self,
        channel_id: &str,
        prior: &ChannelState,
        now: DateTime<Utc>,
    ) -> ProbeResult {
        for depth in probe_depths(prior, now, &self.settings) {
            let ids = self.prober.probe(channel_id, depth).await;
            if !ids.is_empty() {
                return ProbeResult {
                    candidates: ids,
                    from_feed: true,
                };
            }
        }

        ProbeResult {
            candidates: grace_candidate(prior, now, &self.settings).into_iter().collect(),
            from_feed: false,
        }
    }

    /// One full resolution pass. Never fails: missing data degrades to the
    /// offline-confirmation path.
    pub async fn resolve_at(&self, now: DateTime<Utc>) -> Vec<StreamerSnapshot> {
        let channels = match self.registry.list_enabled().await {
            Ok(channels) => channels,
            Err(e) => {
                error!("Failed to load channel roster: {e:?}");
                return Vec::new();
            }
        };
        if channels.is_empty() {
            return Vec::new();
        }

        // A failed read must not be written back over the stored record.
        let (mut states, persist) = match self.states.load_all().await {
            Ok(states) => (states, true),
            Err(e) => {
                warn!("Failed to load channel state, resolving without it: {e:?}");
                (ChannelStates::new(), false)
            }
        };

        let priors: Vec<ChannelState> = channels
            .iter()
            .map(|channel| states.get(&channel.id).cloned().unwrap_or_default())
            .collect();

        let probes: Vec<ProbeResult> = stream::iter(0..channels.len())
            .map(|i| self.probe_channel(&channels[i].id, &priors[i], now))
            .buffered(self.settings.probe_concurrency.max(1))
            .collect()
            .await;

        let observations = self
            .batcher
            .classify(
                probes.iter().flat_map(|probe| probe.candidates.iter().cloned()),
                now,
            )
            .await;

        let snapshots = self.apply(&channels, &priors, &probes, &observations, &mut states, now);

        if persist {
            if let Err(e) = self.states.save_all(&states).await {
                error!("Failed to persist channel state: {e:?}");
            }
        }

        let count =
            |status: StreamerStatus| snapshots.iter().filter(|s| s.status == status).count();
        info!(
            "Resolved {} channels from {} candidates: {} live, {} waiting, {} offline",
            snapshots.len(),
            probes.iter().map(|p| p.candidates.len()).sum::<usize>(),
            count(StreamerStatus::Live),
            count(StreamerStatus::Waiting),
            count(StreamerStatus::Offline),
        );

        snapshots
    }

    fn apply(
        &self,
        channels: &[ChannelConfig],
        priors: &[ChannelState],
        probes: &[ProbeResult],
        observations: &HashMap<String, VideoObservation>,
        states: &mut ChannelStates,
        now: DateTime<Utc>,
    ) -> Vec<StreamerSnapshot> {
        channels
            .iter()
            .zip(priors)
            .zip(probes)
            .map(|((channel, prior), probe)| {
                let outcome = probe
                    .candidates
                    .iter()
                    .find_map(|id| observations.get(id))
                    .map(PollOutcome::Hit)
                    .unwrap_or(PollOutcome::Miss {
                        had_candidates: probe.from_feed,
                    });

                let result = transition(prior, outcome, now, self.settings.offline_confirm_polls);
                states.insert(channel.id.clone(), result.state);

                StreamerSnapshot {
                    id: channel.id.clone(),
                    display_name: channel.display_name.clone(),
                    groups: channel.group_tags.clone(),
                    status: result.phase.status(),
                    live_video_id: result.live_video_id,
                    concurrent_viewers: result.concurrent_viewers,
                }
            })
            .collect()
    }
}

#[rocket::async_trait]
impl SnapshotSource for LiveStatusResolver {
    async fn resolve(&self) -> Vec<StreamerSnapshot> {
        self.resolve_at(Utc::now()).await
    }
}
