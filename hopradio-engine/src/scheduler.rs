//! Rotation scheduler: weighted music selection, ad cadence, jingles.
//!
//! The scheduler maintains a FIFO queue of upcoming tracks. `refill`
//! appends one batch: either a single ad (when enough songs have played
//! since the last one) or a handful of weighted music draws, each with a
//! chance of a trailing jingle. Counter bookkeeping happens when tracks
//! are *enqueued*, so a queue inspection always reflects the cadence the
//! listener will hear.

use std::collections::VecDeque;

use hopradio_common::Track;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::catalog::Catalog;

/// Redraws allowed before a slot is abandoned. Only reachable when the
/// music pool has a single distinct id, in which case no draw can
/// satisfy the no-adjacent-repeat rule.
const MAX_REDRAWS: usize = 16;

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Songs between ad breaks.
    pub ad_frequency: u32,
    /// Music draws per refill batch.
    pub refill_count: usize,
    /// Chance of a jingle after each accepted music draw.
    pub jingle_probability: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ad_frequency: 4,
            refill_count: 5,
            jingle_probability: 0.3,
        }
    }
}

/// Weighted rotation scheduler over a station catalog.
pub struct PlaylistScheduler {
    catalog: Catalog,
    cfg: SchedulerConfig,
    queue: VecDeque<Track>,
    history: Vec<u64>,
    songs_since_ad: u32,
    rng: StdRng,
}

impl PlaylistScheduler {
    pub fn new(catalog: Catalog, cfg: SchedulerConfig) -> Self {
        Self::with_rng(catalog, cfg, StdRng::from_entropy())
    }

    /// Seeded constructor for deterministic selection.
    pub fn with_rng(catalog: Catalog, cfg: SchedulerConfig, rng: StdRng) -> Self {
        Self {
            catalog,
            cfg,
            queue: VecDeque::new(),
            history: Vec::new(),
            songs_since_ad: 0,
            rng,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn queue(&self) -> &VecDeque<Track> {
        &self.queue
    }

    pub fn history(&self) -> &[u64] {
        &self.history
    }

    pub fn songs_since_ad(&self) -> u32 {
        self.songs_since_ad
    }

    /// Ensure the queue is non-empty if the catalog allows it.
    pub fn prepare(&mut self) {
        if self.queue.is_empty() {
            self.refill();
        }
    }

    /// Pop the next track to play, refilling first when the queue is
    /// empty. Returns `None` when the catalog has nothing playable.
    pub fn next_track(&mut self) -> Option<Track> {
        if self.queue.is_empty() {
            self.refill();
        }
        let track = self.queue.pop_front()?;
        self.history.push(track.id);
        debug!(id = track.id, kind = %track.kind, title = %track.title, "rotation advanced");
        Some(track)
    }

    /// Peek at the upcoming track without consuming it.
    pub fn peek_next(&self) -> Option<&Track> {
        self.queue.front()
    }

    /// Append one batch to the queue.
    ///
    /// When the ad counter has reached the cadence and the catalog has
    /// ads, exactly one ad is enqueued and the batch ends there. An ad
    /// break is never split by music from the same refill.
    pub fn refill(&mut self) {
        if self.songs_since_ad >= self.cfg.ad_frequency {
            let ads = self.catalog.ads();
            if !ads.is_empty() {
                let ad = ads[self.rng.gen_range(0..ads.len())].clone();
                trace!(id = ad.id, "ad break enqueued");
                self.queue.push_back(ad);
                self.songs_since_ad = 0;
                return;
            }
        }

        // Weighted pool: each music track appears `weight` times.
        let pool: Vec<&Track> = self
            .catalog
            .music()
            .flat_map(|t| std::iter::repeat(t).take(t.weight as usize))
            .collect();
        if pool.is_empty() {
            trace!("catalog has no weighted music; refill is a no-op");
            return;
        }
        let jingles = self.catalog.jingles();

        for _ in 0..self.cfg.refill_count {
            let mut drawn = None;
            for _ in 0..MAX_REDRAWS {
                let candidate = pool[self.rng.gen_range(0..pool.len())];
                // A rejected draw redraws the same slot; it never
                // consumes the batch position.
                if self.queue.back().map(|t| t.id) == Some(candidate.id) {
                    continue;
                }
                drawn = Some(candidate.clone());
                break;
            }
            let Some(track) = drawn else {
                trace!("no non-repeating draw possible; slot dropped");
                continue;
            };
            self.queue.push_back(track);
            self.songs_since_ad += 1;

            if !jingles.is_empty() && self.rng.gen::<f64>() < self.cfg.jingle_probability {
                let jingle = jingles[self.rng.gen_range(0..jingles.len())].clone();
                self.queue.push_back(jingle);
            }
        }
    }
}
