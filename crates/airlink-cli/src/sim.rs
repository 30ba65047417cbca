use std::fmt;
use std::time::Duration;

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use airlink_peripheral::antiflicker::{AntiflickerCommand, AntiflickerCore, AntiflickerMode, AntiflickerReport, AntiflickerRequest};
use airlink_peripheral::cellular::{CellularCommand, CellularCore, CellularMode, CellularReport, CellularRequest};
use airlink_peripheral::gimbal::{GimbalAxis, GimbalCommand, GimbalCore, GimbalReport, GimbalRequest};
use airlink_peripheral::{command_channel, spawn, Reporter};

use crate::{Config, DeviceCfg, GimbalCfg};

/// Simulated radio link to the device: fixed latency, random loss.
struct DeviceLink {
    latency: Duration,
    drop_rate: f64,
    rng: StdRng,
}

impl DeviceLink {
    fn new(cfg: &DeviceCfg, stream: u64) -> Result<Self> {
        anyhow::ensure!((0.0..=1.0).contains(&cfg.drop_rate), "device.drop_rate should be 0.0..1.0");
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            latency: Duration::from_millis(cfg.ack_latency_ms),
            drop_rate: cfg.drop_rate,
            rng,
        })
    }

    fn keep(&mut self) -> bool {
        !self.rng.gen_bool(self.drop_rate)
    }

    /// Waits for the link latency. Returns false if the command was lost.
    async fn deliver(&mut self) -> bool {
        tokio::time::sleep(self.latency).await;
        self.keep()
    }
}

#[derive(Serialize)]
struct StateLine<'a, S> {
    ts_unix_ms: i64,
    peripheral: &'a str,
    state: &'a S,
}

fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn spawn_printer<S>(name: &'static str, mut states: watch::Receiver<S>, json: bool) -> JoinHandle<()>
where
    S: Serialize + fmt::Debug + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            let ts_unix_ms = now_unix_ms();
            if json {
                match serde_json::to_string(&StateLine { ts_unix_ms, peripheral: name, state: &state }) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("sim: encode state failed: {}", e),
                }
            } else {
                println!("{} {} {:?}", ts_unix_ms, name, state);
            }
        }
    })
}

async fn antiflicker_device(
    mut commands: mpsc::Receiver<AntiflickerCommand>,
    reporter: Reporter<AntiflickerCore>,
    supported: Vec<AntiflickerMode>,
    mode: AntiflickerMode,
    mut link: DeviceLink,
) -> Result<()> {
    reporter.report(AntiflickerReport::State { supported, mode }).await?;
    while let Some(cmd) = commands.recv().await {
        if !link.deliver().await {
            info!("device: lost {:?}", cmd);
            continue;
        }
        match cmd {
            AntiflickerCommand::SetMode(m) => reporter.report(AntiflickerReport::Mode(m)).await?,
        }
    }
    Ok(())
}

async fn cellular_device(
    mut commands: mpsc::Receiver<CellularCommand>,
    reporter: Reporter<CellularCore>,
    supported: Vec<CellularMode>,
    mut link: DeviceLink,
) -> Result<()> {
    reporter.report(CellularReport::SupportedModes(supported)).await?;
    while let Some(cmd) = commands.recv().await {
        if !link.deliver().await {
            info!("device: lost {:?}", cmd);
            continue;
        }
        match cmd {
            CellularCommand::SetMode(m) => reporter.report(CellularReport::Mode(m)).await?,
            CellularCommand::SetRoaming(r) => reporter.report(CellularReport::Roaming(r)).await?,
            CellularCommand::SetApn(apn) => {
                // the modem acknowledges field by field; each ack may be lost
                let fields = [
                    CellularReport::ApnManual(apn.manual),
                    CellularReport::ApnUrl(apn.url),
                    CellularReport::ApnUsername(apn.username),
                    CellularReport::ApnPassword(apn.password),
                ];
                for report in fields {
                    if link.keep() {
                        reporter.report(report).await?;
                    } else {
                        debug!("device: lost apn field ack");
                    }
                }
            }
        }
    }
    Ok(())
}

async fn gimbal_device(
    mut commands: mpsc::Receiver<GimbalCommand>,
    reporter: Reporter<GimbalCore>,
    cfg: GimbalEnvelope,
    mut link: DeviceLink,
) -> Result<()> {
    for axis in GimbalAxis::ALL {
        reporter
            .report(GimbalReport::MaxSpeed { axis, min: Some(cfg.min), value: Some(cfg.initial), max: Some(cfg.max) })
            .await?;
    }
    while let Some(cmd) = commands.recv().await {
        if !link.deliver().await {
            info!("device: lost {:?}", cmd);
            continue;
        }
        let report = match cmd {
            GimbalCommand::SetMaxSpeed { axis, value } => GimbalReport::MaxSpeed {
                axis,
                min: None,
                value: Some(cfg.clamp(value)),
                max: None,
            },
            GimbalCommand::SetStabilization { axis, enabled } => GimbalReport::Stabilization { axis, enabled },
        };
        reporter.report(report).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct GimbalEnvelope {
    min: f64,
    initial: f64,
    max: f64,
}

impl GimbalEnvelope {
    fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

impl TryFrom<&GimbalCfg> for GimbalEnvelope {
    type Error = anyhow::Error;

    fn try_from(g: &GimbalCfg) -> Result<Self> {
        anyhow::ensure!(g.max_speed_min <= g.max_speed_max, "gimbal.max_speed_min > gimbal.max_speed_max");
        anyhow::ensure!(!g.max_speed.is_nan(), "gimbal.max_speed is NaN");
        Ok(Self { min: g.max_speed_min, initial: g.max_speed, max: g.max_speed_max })
    }
}

pub async fn run(cfg: &Config, steps: u32, json: bool) -> Result<()> {
    let timeout = cfg.setting.rollback_timeout();
    info!("sim: starting steps={} rollback_timeout={:?} connected={}", steps, timeout, cfg.device.connected);
    let envelope = GimbalEnvelope::try_from(&cfg.gimbal)?;
    let af_link = DeviceLink::new(&cfg.device, 0)?;
    let cell_link = DeviceLink::new(&cfg.device, 1)?;
    let gimbal_link = DeviceLink::new(&cfg.device, 2)?;

    let (af_tx, af_rx) = command_channel();
    let (cell_tx, cell_rx) = command_channel();
    let (gimbal_tx, gimbal_rx) = command_channel();

    let (antiflicker, af_reporter, af_task) = spawn(AntiflickerCore::new(cfg.antiflicker.initial, timeout, &af_tx));
    let (cellular, cell_reporter, cell_task) = spawn(CellularCore::new(cfg.cellular.apn(), timeout, &cell_tx));
    let (gimbal, gimbal_reporter, gimbal_task) = spawn(GimbalCore::new(cfg.gimbal.max_speed, timeout, &gimbal_tx));
    // the cores keep their own senders
    drop((af_tx, cell_tx, gimbal_tx));

    let printers = vec![
        spawn_printer("antiflicker", antiflicker.subscribe(), json),
        spawn_printer("cellular", cellular.subscribe(), json),
        spawn_printer("gimbal", gimbal.subscribe(), json),
    ];

    let mut devices: Vec<JoinHandle<Result<()>>> = Vec::new();
    if cfg.device.connected {
        devices.push(tokio::spawn(antiflicker_device(
            af_rx,
            af_reporter,
            cfg.antiflicker.supported.clone(),
            cfg.antiflicker.initial,
            af_link,
        )));
        devices.push(tokio::spawn(cellular_device(
            cell_rx,
            cell_reporter,
            cfg.cellular.supported_modes.clone(),
            cell_link,
        )));
        devices.push(tokio::spawn(gimbal_device(
            gimbal_rx,
            gimbal_reporter,
            envelope,
            gimbal_link,
        )));
    } else {
        warn!("sim: device not connected, commands will be refused");
        drop((af_rx, cell_rx, gimbal_rx));
    }

    let latency = Duration::from_millis(cfg.device.ack_latency_ms);
    // let the initial state reports land before scripting requests
    tokio::time::sleep(latency).await;

    let modes = &cfg.antiflicker.supported;
    for step in 0..steps {
        info!("sim: step {}", step + 1);
        if !modes.is_empty() {
            let mode = modes[(step as usize + 1) % modes.len()];
            antiflicker.request(AntiflickerRequest::SetMode(mode)).await?;
        }
        cellular.request(CellularRequest::SetRoaming(step % 2 == 0)).await?;
        cellular.request(CellularRequest::SetMode(CellularMode::Data)).await?;
        cellular
            .request(CellularRequest::SetManualApn {
                url: format!("apn{}.sim", step + 1),
                username: "drone".into(),
                password: "sim".into(),
            })
            .await?;
        gimbal
            .request(GimbalRequest::SetMaxSpeed { axis: GimbalAxis::Yaw, value: 90.0 * f64::from(step + 1) })
            .await?;
        gimbal
            .request(GimbalRequest::SetStabilization { axis: GimbalAxis::Pitch, enabled: step % 2 == 0 })
            .await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    // every request is either confirmed or rolled back by now
    tokio::time::sleep(timeout + latency * 4 + Duration::from_millis(500)).await;

    info!("sim: final antiflicker={:?}", antiflicker.snapshot());
    info!("sim: final cellular={:?}", cellular.snapshot());
    info!("sim: final gimbal={:?}", gimbal.snapshot());

    drop((antiflicker, cellular, gimbal));
    for task in [af_task, cell_task, gimbal_task] {
        if let Err(e) = task.await {
            warn!("sim: driver task failed: {}", e);
        }
    }
    for task in printers {
        task.await.ok();
    }
    for task in devices {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("sim: device stopped: {:#}", e),
            Err(e) => warn!("sim: device task failed: {}", e),
        }
    }

    info!("sim: done");
    Ok(())
}
