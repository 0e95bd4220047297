//! Settings type definitions.
//!
//! Every type uses `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file may name only the fields it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeeperSettings {
    /// Listening side (vision host).
    pub server: ServerSettings,
    /// Connecting side (actuator node).
    pub client: ClientSettings,
    /// Detection recognizer and priority scales.
    pub detection: DetectionSettings,
    /// Alert sound trigger and envelope.
    pub sound: SoundSettings,
    /// Actuator power-on ramp.
    pub startup: StartupSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl PeeperSettings {
    /// Clamp ratio fields to [0.0, 1.0] and correct invalid intervals.
    ///
    /// Out-of-range values are corrected with a warning rather than rejected.
    pub fn validate(&mut self) {
        fn clamp_ratio(val: &mut f64, name: &str) {
            if val.is_nan() || *val < 0.0 || *val > 1.0 {
                let clamped = if val.is_nan() { 0.0 } else { val.clamp(0.0, 1.0) };
                tracing::warn!("{name} out of range ({val}), clamped to {clamped}");
                *val = clamped;
            }
        }

        fn at_least(val: &mut u64, min: u64, name: &str) {
            if *val < min {
                tracing::warn!("{name} too small ({val}), raised to {min}");
                *val = min;
            }
        }

        let d = &mut self.detection;
        clamp_ratio(&mut d.person_scale, "person_scale");
        clamp_ratio(&mut d.cup_scale, "cup_scale");
        clamp_ratio(&mut d.other_scale, "other_scale");

        let s = &mut self.sound;
        clamp_ratio(&mut s.threshold, "sound threshold");
        clamp_ratio(&mut s.volume_depth, "volume_depth");
        clamp_ratio(&mut s.volume, "volume");
        at_least(&mut s.step_ms, 1, "sound step_ms");

        at_least(&mut self.server.send_interval_ms, 1, "send_interval_ms");
        at_least(&mut self.server.idle_ping_ms, 1, "server idle_ping_ms");
        at_least(&mut self.server.pong_grace_ms, 1, "server pong_grace_ms");
        at_least(&mut self.server.handshake_timeout_ms, 1, "server handshake_timeout_ms");
        at_least(&mut self.server.write_timeout_ms, 1, "server write_timeout_ms");
        at_least(&mut self.client.idle_ping_ms, 1, "client idle_ping_ms");
        at_least(&mut self.client.pong_grace_ms, 1, "client pong_grace_ms");
        at_least(&mut self.client.handshake_timeout_ms, 1, "client handshake_timeout_ms");
        at_least(&mut self.client.write_timeout_ms, 1, "client write_timeout_ms");

        if self.startup.steps == 0 {
            tracing::warn!("startup steps is 0, using 1");
            self.startup.steps = 1;
        }
    }
}

/// Listening side: accept loop and per-peer cadence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Per-peer push cadence for the latest signal.
    pub send_interval_ms: u64,
    /// Ping a peer after this long without traffic.
    pub idle_ping_ms: u64,
    /// How long an idle peer has to answer a ping.
    pub pong_grace_ms: u64,
    /// Upper bound on the upgrade exchange.
    pub handshake_timeout_ms: u64,
    /// Upper bound on one frame write; a peer that stops reading is dropped.
    pub write_timeout_ms: u64,
    /// Largest accepted frame payload.
    pub max_payload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6789,
            send_interval_ms: 500,
            idle_ping_ms: 10_000,
            pong_grace_ms: 5_000,
            handshake_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            max_payload_bytes: 1 << 20,
        }
    }
}

impl ServerSettings {
    /// `send_interval_ms` as a [`Duration`].
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    /// `idle_ping_ms` as a [`Duration`].
    pub fn idle_ping(&self) -> Duration {
        Duration::from_millis(self.idle_ping_ms)
    }

    /// `pong_grace_ms` as a [`Duration`].
    pub fn pong_grace(&self) -> Duration {
        Duration::from_millis(self.pong_grace_ms)
    }

    /// `handshake_timeout_ms` as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// `write_timeout_ms` as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Connecting side: target server and reconnect policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server host name or address.
    pub server_host: String,
    /// Server port.
    pub server_port: u16,
    /// Request path for the upgrade.
    pub path: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Ping the server after this long without traffic.
    pub idle_ping_ms: u64,
    /// How long the server has to answer a ping.
    pub pong_grace_ms: u64,
    /// Upper bound on TCP connect plus the upgrade exchange.
    pub handshake_timeout_ms: u64,
    /// Upper bound on one frame write.
    pub write_timeout_ms: u64,
    /// Require a correct `Sec-WebSocket-Accept` from the server.
    pub verify_accept: bool,
    /// Largest accepted frame payload.
    pub max_payload_bytes: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_host: "peeper.local".to_string(),
            server_port: 6789,
            path: "/".to_string(),
            reconnect_delay_ms: 5_000,
            idle_ping_ms: 30_000,
            pong_grace_ms: 10_000,
            handshake_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            verify_accept: true,
            max_payload_bytes: 1 << 20,
        }
    }
}

impl ClientSettings {
    /// `reconnect_delay_ms` as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// `idle_ping_ms` as a [`Duration`].
    pub fn idle_ping(&self) -> Duration {
        Duration::from_millis(self.idle_ping_ms)
    }

    /// `pong_grace_ms` as a [`Duration`].
    pub fn pong_grace(&self) -> Duration {
        Duration::from_millis(self.pong_grace_ms)
    }

    /// `handshake_timeout_ms` as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// `write_timeout_ms` as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Detection recognizer and priority scales.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionSettings {
    /// Scale applied to a lone person's confidence.
    pub person_scale: f64,
    /// Scale applied to a lone cup's confidence.
    pub cup_scale: f64,
    /// Scale applied to the first interesting object's confidence.
    pub other_scale: f64,
    /// Low-priority labels, in priority order.
    pub interesting_objects: Vec<String>,
    /// Substrings that mark a line as a detection report.
    pub markers: Vec<String>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            person_scale: 0.7,
            cup_scale: 0.3,
            other_scale: 0.1,
            interesting_objects: [
                "bottle",
                "laptop",
                "cell phone",
                "book",
                "tv",
                "mouse",
                "keyboard",
                "remote",
                "wine glass",
                "banana",
                "apple",
                "sandwich",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            markers: vec!["object".to_string(), "detection".to_string()],
        }
    }
}

/// Alert sound trigger and UFO-tone envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoundSettings {
    /// Duty above which a sound may fire.
    pub threshold: f64,
    /// Minimum spacing between sound starts.
    pub cooldown_ms: u64,
    /// Envelope attack.
    pub fade_in_ms: u64,
    /// Envelope hold.
    pub sustain_ms: u64,
    /// Envelope release.
    pub fade_out_ms: u64,
    /// Output update granularity.
    pub step_ms: u64,
    /// Center frequency in Hz.
    pub base_freq: f64,
    /// Pitch modulation depth in Hz.
    pub freq_depth: f64,
    /// Pitch/amplitude LFO rate in Hz.
    pub lfo_rate: f64,
    /// Amplitude modulation depth (0–1).
    pub volume_depth: f64,
    /// Global volume (0–1).
    pub volume: f64,
}

impl Default for SoundSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            cooldown_ms: 5_000,
            fade_in_ms: 100,
            sustain_ms: 2_000,
            fade_out_ms: 1_000,
            step_ms: 5,
            base_freq: 600.0,
            freq_depth: 300.0,
            lfo_rate: 15.0 / 2.3,
            volume_depth: 0.3,
            volume: 1.0,
        }
    }
}

impl SoundSettings {
    /// `cooldown_ms` as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Actuator power-on ramp.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartupSettings {
    /// Run the ramp before the first connection.
    pub enabled: bool,
    /// Duration of each half (up, then down).
    pub ramp_ms: u64,
    /// Steps per half.
    pub steps: u32,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ramp_ms: 2_000,
            steps: 100,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_values() {
        let s = PeeperSettings::default();
        assert_eq!(s.server.port, 6789);
        assert_eq!(s.client.server_port, 6789);
        assert_eq!(s.server.send_interval(), Duration::from_millis(500));
        assert_eq!(s.client.reconnect_delay(), Duration::from_secs(5));
        assert!((s.detection.person_scale - 0.7).abs() < f64::EPSILON);
        assert!((s.detection.cup_scale - 0.3).abs() < f64::EPSILON);
        assert!((s.detection.other_scale - 0.1).abs() < f64::EPSILON);
        assert_eq!(s.detection.interesting_objects[0], "bottle");
        assert_eq!(s.sound.cooldown(), Duration::from_secs(5));
        assert_eq!(s.client.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(s.server.write_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let json = serde_json::to_value(PeeperSettings::default()).unwrap();
        assert!(json["server"].get("sendIntervalMs").is_some());
        assert!(json["client"].get("reconnectDelayMs").is_some());
        assert!(json["detection"].get("interestingObjects").is_some());
        assert!(json["sound"].get("fadeInMs").is_some());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: PeeperSettings =
            serde_json::from_str(r#"{"sound": {"threshold": 0.8}}"#).unwrap();
        assert!((s.sound.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(s.sound.cooldown_ms, 5_000);
        assert_eq!(s.server.port, 6789);
    }

    #[test]
    fn validate_clamps_ratios() {
        let mut s = PeeperSettings::default();
        s.detection.person_scale = 1.5;
        s.detection.cup_scale = -0.2;
        s.sound.threshold = f64::NAN;
        s.validate();
        assert!((s.detection.person_scale - 1.0).abs() < f64::EPSILON);
        assert!(s.detection.cup_scale.abs() < f64::EPSILON);
        assert!(s.sound.threshold.abs() < f64::EPSILON);
    }

    #[test]
    fn validate_raises_zero_intervals() {
        let mut s = PeeperSettings::default();
        s.server.send_interval_ms = 0;
        s.client.handshake_timeout_ms = 0;
        s.sound.step_ms = 0;
        s.startup.steps = 0;
        s.validate();
        assert_eq!(s.server.send_interval_ms, 1);
        assert_eq!(s.client.handshake_timeout_ms, 1);
        assert_eq!(s.sound.step_ms, 1);
        assert_eq!(s.startup.steps, 1);
    }
}
