//! Walkie-Talkie: half-duplex mold padding.
//!
//! Traffic alternates between a talkie end (currently sending a burst) and a
//! listening end. Each end pads its bursts up to a precomputed per-webpage
//! schedule that molds the real page's burst sequence into a decoy page's,
//! so the two pages become indistinguishable by burst volume.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::constants::MPU;
use crate::dist::Dist;
use crate::transport::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkieTalkieConfig {
    /// Fixed payload length in bytes.
    pub psize: usize,
    /// Directory of real burst sequences, one `<id>.json` per webpage.
    pub burst_dir: PathBuf,
    /// Directory of decoy burst sequences, one `<id>.json` per webpage.
    pub decoy_dir: PathBuf,
}

impl Default for WalkieTalkieConfig {
    fn default() -> Self {
        WalkieTalkieConfig {
            psize: MPU,
            burst_dir: PathBuf::new(),
            decoy_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkieTalkie {
    config: WalkieTalkieConfig,
    /// Per-burst padding budgets (client, server), decoy minus real,
    /// clamped at zero.
    pad_seq: Vec<(u64, u64)>,
    /// Bursts seen so far. Each direction flip is one burst, so the pad
    /// sequence index is `burst_count / 2`.
    burst_count: u64,
    /// Padding messages already sent in the current burst.
    pad_count: u64,
    /// Whether this end is currently the talking one.
    talkie: bool,
}

impl WalkieTalkie {
    pub fn new(config: WalkieTalkieConfig) -> Self {
        WalkieTalkie {
            config,
            pad_seq: Vec::new(),
            burst_count: 0,
            pad_count: 0,
            talkie: false,
        }
    }

    /// The client talks first.
    pub fn on_session_start(&mut self, role: Role, length_dist: &mut Dist) {
        self.burst_count = 0;
        self.pad_count = 0;
        self.talkie = role.is_client();
        *length_dist = Dist::fixed(self.config.psize as f64);
    }

    /// Load the real and decoy burst sequences for the visited page and
    /// derive the padding budgets over their common prefix. A missing or
    /// unreadable sequence file degrades to an empty schedule: data still
    /// flows, no mold padding is added.
    pub fn set_pad_sequence(&mut self, id: &str) {
        let real = load_burst_sequence(&self.config.burst_dir, id);
        let decoy = load_burst_sequence(&self.config.decoy_dir, id);
        self.pad_seq = decoy
            .iter()
            .zip(real.iter())
            .map(|(d, r)| (d.0.saturating_sub(r.0), d.1.saturating_sub(r.1)))
            .collect();
        self.burst_count = 0;
        self.pad_count = 0;
        info!(
            "derived pad sequence for page {id}: {} bursts",
            self.pad_seq.len()
        );
    }

    /// Upstream data while listening flips this end to talkie and starts a
    /// new burst.
    pub fn when_received_upstream(&mut self) {
        if !self.talkie {
            self.burst_count += 1;
            self.pad_count = 0;
            self.talkie = true;
            debug!("turned talkie at burst {}", self.burst_count);
        }
    }

    /// Downstream data while talking flips this end to listening.
    pub fn when_received_downstream(&mut self) {
        if self.talkie {
            self.burst_count += 1;
            self.pad_count = 0;
            self.talkie = false;
            debug!("turned listener at burst {}", self.burst_count);
        }
    }

    /// A listening end never pads; a talking end pads until the budget for
    /// the current burst is spent.
    pub fn allow_padding(&mut self, role: Role) -> bool {
        if self.talkie && self.pad_count < self.burst_target(role) {
            self.pad_count += 1;
            true
        } else {
            false
        }
    }

    /// When the talkie end runs out of data mid-burst, the remaining budget
    /// is flushed at once so the burst closes at its molded size.
    pub fn burst_padding_on_empty(&self, role: Role) -> Option<u64> {
        if self.talkie {
            Some(self.burst_target(role).saturating_sub(self.pad_count))
        } else {
            None
        }
    }

    fn burst_target(&self, role: Role) -> u64 {
        let index = (self.burst_count / 2) as usize;
        match self.pad_seq.get(index) {
            Some(&(client, server)) => {
                if role.is_client() {
                    client
                } else {
                    server
                }
            }
            None => 0,
        }
    }
}

fn load_burst_sequence(dir: &Path, id: &str) -> Vec<(u64, u64)> {
    let path = dir.join(format!("{id}.json"));
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            warn!("cannot open burst sequence {}: {e}", path.display());
            return Vec::new();
        }
    };
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(seq) => seq,
        Err(e) => {
            warn!("cannot parse burst sequence {}: {e}", path.display());
            Vec::new()
        }
    }
}
