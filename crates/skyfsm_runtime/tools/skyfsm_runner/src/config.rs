use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use skyfsm_runtime::config::{FailsafeKind, RuntimeConfig};

use crate::sighting::Sighting;

pub const ENV_MISSION: &str = "SKYFSM_MISSION";
pub const ENV_CHECK_ONLY: &str = "SKYFSM_CHECK_ONLY";
pub const DEFAULT_SIM_LATENCY_MS: u64 = 200;

pub struct Config {
    pub mission: PathBuf,
    pub runtime: RuntimeConfig,
    pub check_only: bool,
    pub sim_latency: Duration,
    pub sightings: Vec<Sighting>,
}

impl Config {
    pub fn from_args() -> Result<Self> {
        Self::from_args_iter(env::args())
    }

    /// Flags override `SKYFSM_*` environment variables, which override defaults.
    pub fn from_args_iter<I, S>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut runtime = RuntimeConfig::from_env().context("runtime settings from environment")?;
        let mut mission = env::var(ENV_MISSION).ok().map(PathBuf::from);
        let mut check_only = env::var(ENV_CHECK_ONLY)
            .ok()
            .and_then(parse_bool)
            .unwrap_or(false);
        let mut sim_latency = Duration::from_millis(DEFAULT_SIM_LATENCY_MS);
        let mut sightings: Vec<Sighting> = Vec::new();

        let mut args = iter.into_iter();
        let _ = args.next();
        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
                _ => (arg, None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next().map(|v| v.as_ref().to_string()))
                    .ok_or_else(|| anyhow!("{flag} expects a value"))
            };
            match flag {
                "-h" | "--help" => {
                    print_usage();
                    std::process::exit(0);
                }
                "--mission" => mission = Some(PathBuf::from(value()?)),
                "--failsafe" => {
                    let v = value()?;
                    runtime.failsafe = FailsafeKind::parse(&v)
                        .ok_or_else(|| anyhow!("--failsafe '{v}': expected hover, return_home or land"))?;
                }
                "--poll-ms" => runtime.poll_interval = millis(flag, &value()?)?,
                "--grace-ms" => runtime.teardown_grace = millis(flag, &value()?)?,
                "--sim-latency-ms" => sim_latency = millis(flag, &value()?)?,
                "--sighting" => sightings.push(value()?.parse()?),
                "--check-only" => check_only = true,
                _ => {}
            }
        }

        let Some(mission) = mission else {
            bail!("no mission document: pass --mission <path> or set {ENV_MISSION}");
        };

        Ok(Self {
            mission,
            runtime,
            check_only,
            sim_latency,
            sightings,
        })
    }
}

fn print_usage() {
    println!(
        "skyfsm_runner --mission <path.yaml|path.json> [--failsafe hover|return_home|land] \
         [--poll-ms N] [--grace-ms N] [--sim-latency-ms N] \
         [--sighting source/class@start+seconds]... [--check-only]"
    );
}

fn millis(flag: &str, value: &str) -> Result<Duration> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => bail!("{flag} '{value}': expected a positive number of milliseconds"),
    }
}

fn parse_bool(value: String) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
