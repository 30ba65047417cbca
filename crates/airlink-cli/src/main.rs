mod sim;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use airlink_peripheral::antiflicker::AntiflickerMode;
use airlink_peripheral::cellular::{ApnConfig, CellularMode};
use airlink_peripheral::SettingConfig;

#[derive(Debug, Parser)]
#[command(name = "airlink", version, about = "airlink - drone peripheral settings with optimistic sync")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config file.
    Doctor,
    /// Drive the peripherals against a simulated, lossy device and print
    /// every state change.
    Sim {
        /// Number of scripted request rounds.
        #[arg(long, default_value_t = 3)]
        steps: u32,
        /// Print one JSON object per state change.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub setting: SettingConfig,
    pub device: DeviceCfg,
    pub antiflicker: AntiflickerCfg,
    pub cellular: CellularCfg,
    pub gimbal: GimbalCfg,
}

#[derive(Debug, serde::Deserialize)]
pub struct DeviceCfg {
    /// false: no backend link, every transmit is refused.
    pub connected: bool,
    pub ack_latency_ms: u64,
    /// Probability that a command is lost, 0.0..=1.0.
    pub drop_rate: f64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

#[derive(Debug, serde::Deserialize)]
pub struct AntiflickerCfg {
    pub initial: AntiflickerMode,
    pub supported: Vec<AntiflickerMode>,
}

#[derive(Debug, serde::Deserialize)]
pub struct CellularCfg {
    pub supported_modes: Vec<CellularMode>,
    pub apn_manual: bool,
    pub apn_url: String,
    pub apn_username: String,
    pub apn_password: Option<String>,
}

impl CellularCfg {
    pub fn apn(&self) -> ApnConfig {
        ApnConfig {
            manual: self.apn_manual,
            url: self.apn_url.clone(),
            username: self.apn_username.clone(),
            password: self.apn_password.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct GimbalCfg {
    pub max_speed: f64,
    pub max_speed_min: f64,
    pub max_speed_max: f64,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Sim { steps, json } => {
            doctor(&cfg)?;
            sim::run(&cfg, steps, json).await?
        }
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    let timeout = cfg.setting.rollback_timeout();
    anyhow::ensure!(timeout.as_millis() >= 100, "setting.rollback_timeout_ms too small");

    let d = &cfg.device;
    anyhow::ensure!((0.0..=1.0).contains(&d.drop_rate), "device.drop_rate should be 0.0..1.0");
    if d.ack_latency_ms as u128 >= timeout.as_millis() {
        warn!("doctor: device.ack_latency_ms >= rollback timeout, every change will roll back");
    }
    if !d.connected {
        info!("doctor: device disconnected, requests will be refused locally");
    }

    let af = &cfg.antiflicker;
    anyhow::ensure!(!af.supported.is_empty(), "antiflicker.supported is empty");
    anyhow::ensure!(af.supported.contains(&af.initial), "antiflicker.initial not in antiflicker.supported");

    let cell = &cfg.cellular;
    anyhow::ensure!(!cell.supported_modes.is_empty(), "cellular.supported_modes is empty");
    if cell.apn_manual {
        anyhow::ensure!(!cell.apn_url.is_empty(), "cellular.apn_url missing (apn_manual=true)");
    }

    let g = &cfg.gimbal;
    anyhow::ensure!(g.max_speed_min <= g.max_speed_max, "gimbal.max_speed_min > gimbal.max_speed_max");
    anyhow::ensure!(
        (g.max_speed_min..=g.max_speed_max).contains(&g.max_speed),
        "gimbal.max_speed out of [max_speed_min, max_speed_max]"
    );

    info!("doctor: OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = include_str!("../../../config/airlink.toml");

    #[test]
    fn sample_config_passes_doctor() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.setting.rollback_timeout().as_millis(), 5000);
        doctor(&cfg).unwrap();
    }

    #[test]
    fn doctor_rejects_bad_drop_rate() {
        let mut cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.device.drop_rate = 1.5;
        assert!(doctor(&cfg).is_err());
    }

    #[test]
    fn doctor_rejects_unsupported_initial_mode() {
        let mut cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.antiflicker.supported = vec![AntiflickerMode::Auto];
        cfg.antiflicker.initial = AntiflickerMode::Off;
        let err = doctor(&cfg).unwrap_err();
        assert!(err.to_string().contains("antiflicker.initial"));
    }

    #[test]
    fn doctor_rejects_nan_and_inverted_gimbal() {
        let mut cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.gimbal.max_speed_min = 50.0;
        cfg.gimbal.max_speed_max = 5.0;
        assert!(doctor(&cfg).is_err());

        let mut cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.device.drop_rate = f64::NAN;
        assert!(doctor(&cfg).is_err());
    }

    #[test]
    fn setting_section_is_optional() {
        let stripped: String = SAMPLE
            .lines()
            .filter(|l| !l.starts_with("[setting]") && !l.starts_with("rollback_timeout_ms"))
            .collect::<Vec<_>>()
            .join("\n");
        let cfg: Config = toml::from_str(&stripped).unwrap();
        assert_eq!(cfg.setting.rollback_timeout(), airlink_setting::ROLLBACK_TIMEOUT);
    }
}
