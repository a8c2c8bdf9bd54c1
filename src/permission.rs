//! Command permission gate.
//!
//! Participants in the disabled registry lose the elevated capability and
//! may only run communication verbs. The registry outlives disconnects:
//! an entry is removed only by an explicit restore or a session reset, and
//! is re-enforced on reconnect and by a periodic reconciliation pass.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::host::{Audience, CommandInterceptor, Notice, ParticipantId, Simulation, Verdict};
use crate::observability::metrics;

/// Verbs a disabled participant may still use with arguments.
pub const ALLOWED_PREFIXES: [&str; 6] = ["msg ", "tell ", "whisper ", "w ", "me ", "say "];

/// Verbs a disabled participant may still use bare.
pub const ALLOWED_EXACT: [&str; 3] = ["help", "list", "online"];

/// Message shown when a command is vetoed.
pub const DENIAL_MESSAGE: &str = "Your command permissions have been revoked by an administrator.";

/// Message shown to a disabled participant on (re)join.
pub const JOIN_WARNING: &str = "Warning: your command permissions are revoked for this session.";

/// Whether a raw command (without slash) is on the communication allow-list.
#[must_use]
pub fn is_allowed(raw: &str) -> bool {
    let command = raw.trim().to_lowercase();
    if command.is_empty() {
        return false;
    }
    ALLOWED_PREFIXES.iter().any(|p| command.starts_with(p))
        || ALLOWED_EXACT.contains(&command.as_str())
}

/// A disabled participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisabledEntry {
    /// Display name when disabled
    pub name: String,
    /// Whether they held the elevated capability when disabled
    pub was_elevated: bool,
    /// When the participant was disabled
    pub since: DateTime<Utc>,
}

/// Registry of participants whose command privileges are revoked.
#[derive(Debug, Default)]
pub struct PermissionGate {
    disabled: DashMap<ParticipantId, DisabledEntry>,
}

impl PermissionGate {
    /// Creates an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a participant to the registry, remembering whether they were
    /// elevated. Returns `false` if already there.
    pub fn disable(&self, id: ParticipantId, name: &str, was_elevated: bool) -> bool {
        let mut newly = false;
        self.disabled.entry(id).or_insert_with(|| {
            newly = true;
            DisabledEntry {
                name: name.to_owned(),
                was_elevated,
                since: Utc::now(),
            }
        });
        if newly {
            debug!(participant = %id, name, "command permissions disabled");
            metrics::set_disabled(self.len());
        }
        newly
    }

    /// Removes a participant from the registry, returning their entry.
    pub fn restore(&self, id: ParticipantId) -> Option<DisabledEntry> {
        let removed = self.disabled.remove(&id).map(|(_, entry)| entry);
        if removed.is_some() {
            debug!(participant = %id, "command permissions restored");
            metrics::set_disabled(self.len());
        }
        removed
    }

    /// Looks up a disabled participant by name, case-insensitively.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<(ParticipantId, DisabledEntry)> {
        self.disabled
            .iter()
            .find(|e| e.value().name.eq_ignore_ascii_case(name))
            .map(|e| (*e.key(), e.value().clone()))
    }

    /// Whether the participant is in the registry.
    #[must_use]
    pub fn is_disabled(&self, id: ParticipantId) -> bool {
        self.disabled.contains_key(&id)
    }

    /// Identities of every disabled participant.
    #[must_use]
    pub fn list_disabled(&self) -> HashSet<ParticipantId> {
        self.disabled.iter().map(|e| *e.key()).collect()
    }

    /// Every registry entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<(ParticipantId, DisabledEntry)> {
        let mut entries: Vec<_> = self
            .disabled
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(_, e)| e.since);
        entries
    }

    /// Number of disabled participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.disabled.len()
    }

    /// Whether nobody is disabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.disabled.is_empty()
    }

    /// Empties the registry; returns the entries removed, oldest first.
    pub fn restore_all(&self) -> Vec<(ParticipantId, DisabledEntry)> {
        let mut restored: Vec<_> = self
            .list_disabled()
            .into_iter()
            .filter_map(|id| self.disabled.remove(&id))
            .collect();
        restored.sort_by_key(|(_, e)| e.since);
        metrics::set_disabled(self.len());
        restored
    }

    /// Decides whether a participant's raw command may be forwarded.
    #[must_use]
    pub fn check(&self, id: ParticipantId, raw: &str) -> Verdict {
        if !self.is_disabled(id) || is_allowed(raw) {
            return Verdict::Forward;
        }
        metrics::record_command_denied();
        Verdict::Deny(DENIAL_MESSAGE.to_owned())
    }

    /// Strips the elevated capability from a disabled participant if they
    /// hold it. Returns whether anything changed.
    pub fn enforce(&self, sim: &mut dyn Simulation, id: ParticipantId) -> bool {
        if !self.is_disabled(id) || !sim.is_elevated(id) {
            return false;
        }
        sim.set_elevated(id, false);
        sim.refresh_commands(id);
        true
    }

    /// Re-asserts that no online disabled participant holds the elevated
    /// capability. Returns how many participants were corrected.
    pub fn reconcile(&self, sim: &mut dyn Simulation) -> usize {
        let mut corrected = 0;
        for participant in sim.online() {
            if self.enforce(&mut *sim, participant.id) {
                corrected += 1;
            }
        }
        if corrected > 0 {
            info!(corrected, "reconciliation removed out-of-band elevation");
            metrics::record_reconciled(corrected);
        }
        corrected
    }

    /// Join hook: re-applies the restriction to a returning participant.
    pub fn on_join(&self, sim: &mut dyn Simulation, id: ParticipantId) -> bool {
        if !self.is_disabled(id) {
            return false;
        }
        if sim.is_elevated(id) {
            sim.set_elevated(id, false);
        }
        sim.refresh_commands(id);
        sim.deliver(Audience::Only(id), &Notice::chat(JOIN_WARNING));
        true
    }

    /// Forgets every entry without touching the host.
    pub fn clear(&self) {
        self.disabled.clear();
        metrics::set_disabled(0);
    }
}

impl CommandInterceptor for PermissionGate {
    fn name(&self) -> &'static str {
        "permission-gate"
    }

    fn intercept(&self, participant: ParticipantId, raw: &str) -> Verdict {
        self.check(participant, raw)
    }
}
