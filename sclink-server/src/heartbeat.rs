use log::{info, warn};
use sclink_osc::Message;
use serde::{Deserialize, Serialize};

/// Decoded `/status.reply`.
///
/// `/status.reply: [unused, ugens, synths, groups, synthdefs, avg_cpu,
/// peak_cpu, nominal_sr, actual_sr]`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusReply {
    pub ugens: i32,
    pub synths: i32,
    pub groups: i32,
    pub synthdefs: i32,
    pub avg_cpu: f32,
    pub peak_cpu: f32,
    pub nominal_sample_rate: f64,
    pub actual_sample_rate: f64,
}

impl StatusReply {
    pub fn parse(msg: &Message) -> Option<Self> {
        let int = |i: usize| msg.args.get(i).and_then(|a| a.as_number()).map(|v| v as i32);
        let num = |i: usize| msg.args.get(i).and_then(|a| a.as_number());
        Some(Self {
            ugens: int(1)?,
            synths: int(2)?,
            groups: int(3)?,
            synthdefs: int(4)?,
            avg_cpu: num(5).unwrap_or_default() as f32,
            peak_cpu: num(6).unwrap_or_default() as f32,
            nominal_sample_rate: num(7).unwrap_or_default(),
            actual_sample_rate: num(8).unwrap_or_default(),
        })
    }

    /// No synths, no synthdefs and only the root group.
    pub fn is_fresh_server(&self) -> bool {
        self.synths == 0 && self.synthdefs == 0 && self.groups == 1
    }
}

/// When a status reply counts as "the server has booted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootPolicy {
    /// Only a freshly started server (see [`StatusReply::is_fresh_server`]).
    #[default]
    FreshServer,
    /// Any status reply.
    AnyReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    Booted,
    Lost,
}

/// Boot/liveness tracking driven by `/status` polls and their replies.
#[derive(Debug)]
pub struct Heartbeat {
    policy: BootPolicy,
    max_missed: u32,
    booted: bool,
    initialized: bool,
    missed: u32,
    last_status: Option<StatusReply>,
}

impl Heartbeat {
    pub fn new(policy: BootPolicy, max_missed: u32) -> Self {
        Self {
            policy,
            max_missed,
            booted: false,
            initialized: false,
            missed: 0,
            last_status: None,
        }
    }

    pub fn is_booted(&self) -> bool {
        self.booted
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn last_status(&self) -> Option<StatusReply> {
        self.last_status
    }

    /// Called once per poll sent.
    pub fn on_status_sent(&mut self) -> Option<HeartbeatEvent> {
        if !self.booted {
            return None;
        }
        self.missed += 1;
        if self.missed > self.max_missed {
            warn!(
                target: "server::session",
                "no /status.reply for {} polls, server considered lost",
                self.missed
            );
            self.booted = false;
            self.initialized = false;
            self.missed = 0;
            return Some(HeartbeatEvent::Lost);
        }
        None
    }

    pub fn on_status_reply(&mut self, status: StatusReply) -> Option<HeartbeatEvent> {
        self.last_status = Some(status);
        self.missed = 0;
        if self.booted {
            return None;
        }
        let boots = match self.policy {
            BootPolicy::FreshServer => status.is_fresh_server(),
            BootPolicy::AnyReply => true,
        };
        if !boots {
            return None;
        }
        info!(
            target: "server::session",
            "server booted ({} ugens, {} synths, {} groups, {} synthdefs)",
            status.ugens, status.synths, status.groups, status.synthdefs
        );
        self.booted = true;
        Some(HeartbeatEvent::Booted)
    }

    /// `/done /d_loadDir` arrived.
    pub fn on_synthdefs_loaded(&mut self) {
        self.initialized = true;
    }

    /// Forget boot state, e.g. when the session is stopped.
    pub fn reset(&mut self) {
        self.booted = false;
        self.initialized = false;
        self.missed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(synths: i32, groups: i32, defs: i32) -> StatusReply {
        StatusReply {
            synths,
            groups,
            synthdefs: defs,
            ..StatusReply::default()
        }
    }

    #[test]
    fn boots_only_on_fresh_server() {
        let mut hb = Heartbeat::new(BootPolicy::FreshServer, 12);
        assert_eq!(hb.on_status_reply(status(3, 1, 0)), None);
        assert_eq!(hb.on_status_reply(status(0, 2, 0)), None);
        assert_eq!(hb.on_status_reply(status(0, 1, 5)), None);
        assert!(!hb.is_booted());
        assert_eq!(hb.on_status_reply(status(0, 1, 0)), Some(HeartbeatEvent::Booted));
        assert_eq!(hb.on_status_reply(status(0, 1, 0)), None);
        assert!(hb.is_booted());
    }

    #[test]
    fn any_reply_policy_boots_immediately() {
        let mut hb = Heartbeat::new(BootPolicy::AnyReply, 12);
        assert_eq!(hb.on_status_reply(status(9, 4, 30)), Some(HeartbeatEvent::Booted));
    }

    #[test]
    fn lost_after_too_many_missed_replies() {
        let mut hb = Heartbeat::new(BootPolicy::FreshServer, 12);
        hb.on_status_reply(status(0, 1, 0));
        hb.on_synthdefs_loaded();
        assert!(hb.is_initialized());
        for _ in 0..12 {
            assert_eq!(hb.on_status_sent(), None);
        }
        assert_eq!(hb.on_status_sent(), Some(HeartbeatEvent::Lost));
        assert!(!hb.is_booted());
        assert!(!hb.is_initialized());
        assert_eq!(hb.on_status_sent(), None);
    }

    #[test]
    fn reply_resets_missed_count() {
        let mut hb = Heartbeat::new(BootPolicy::FreshServer, 2);
        hb.on_status_reply(status(0, 1, 0));
        hb.on_status_sent();
        hb.on_status_sent();
        hb.on_status_reply(status(1, 1, 1));
        assert_eq!(hb.missed(), 0);
        assert_eq!(hb.on_status_sent(), None);
        assert!(hb.is_booted());
    }

    #[test]
    fn parses_status_reply() {
        let msg = Message::new("/status.reply")
            .arg(1)
            .arg(12)
            .arg(0)
            .arg(1)
            .arg(0)
            .arg(1.5f32)
            .arg(3.0f32)
            .arg(44100.0f64)
            .arg(44099.9f64);
        let status = StatusReply::parse(&msg).unwrap();
        assert_eq!(status.ugens, 12);
        assert!(status.is_fresh_server());
        assert_eq!(status.avg_cpu, 1.5);
        assert_eq!(status.nominal_sample_rate, 44100.0);
    }

    #[test]
    fn short_status_reply_is_rejected() {
        let msg = Message::new("/status.reply").arg(1).arg(0);
        assert!(StatusReply::parse(&msg).is_none());
    }
}
