// src/sim/process.rs
//
// SUMO process launcher.
//
// Port allocation is probabilistic: pick a random port inside this
// worker's range, bind-test it, spawn the simulator on it and connect with
// bounded retries. Any failure kills the child and retries on a fresh port
// after a short randomised backoff, up to `max_start_attempts`.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::traci::TraciConnection;
use super::{SimError, SimLauncher, Simulator};
use crate::config::SimulatorConfig;

/// Random ports probed per start attempt before giving up on that attempt.
const PORT_PROBES: usize = 32;

/// Launches a TraCI-speaking simulator process per `launch()` call.
#[derive(Debug, Clone)]
pub struct TraciLauncher {
    config_file: PathBuf,
    cfg: SimulatorConfig,
    port_range: (u16, u16),
}

impl TraciLauncher {
    pub fn new(config_file: PathBuf, cfg: SimulatorConfig, port_range: (u16, u16)) -> Self {
        Self {
            config_file,
            cfg,
            port_range,
        }
    }

    /// Command-line arguments for a simulator listening on `port`.
    pub fn command_args(&self, port: u16) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.config_file.display().to_string(),
            "--remote-port".to_string(),
            port.to_string(),
            "--step-length".to_string(),
            self.cfg.step_length.to_string(),
            "--seed".to_string(),
            self.cfg.seed.to_string(),
            "--no-step-log".to_string(),
            "true".to_string(),
            "--no-warnings".to_string(),
            "true".to_string(),
        ];
        args.extend(self.cfg.extra_args.iter().cloned());
        args
    }

    fn pick_port(&self, rng: &mut ChaCha8Rng) -> Option<u16> {
        let (lo, hi) = self.port_range;
        if lo >= hi {
            return None;
        }
        (0..PORT_PROBES)
            .map(|_| rng.gen_range(lo..hi))
            .find(|&port| TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok())
    }

    fn backoff(&self, rng: &mut ChaCha8Rng) {
        let (lo, hi) = self.cfg.backoff_ms;
        let ms = if lo >= hi { lo } else { rng.gen_range(lo..=hi) };
        thread::sleep(Duration::from_millis(ms));
    }

    fn connect(&self, child: &mut Child, port: u16) -> Option<TcpStream> {
        for _ in 0..self.cfg.connect_retries {
            if let Ok(Some(status)) = child.try_wait() {
                log::warn!("[sim] simulator on port {port} exited early ({status})");
                return None;
            }
            if let Ok(stream) = TcpStream::connect((Ipv4Addr::LOCALHOST, port)) {
                return Some(stream);
            }
            thread::sleep(Duration::from_millis(self.cfg.connect_retry_ms));
        }
        None
    }
}

fn kill(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl SimLauncher for TraciLauncher {
    fn launch(&self) -> Result<Box<dyn Simulator>, SimError> {
        if !self.config_file.exists() {
            return Err(SimError::Launch(format!(
                "config file {} does not exist",
                self.config_file.display()
            )));
        }

        let mut rng = ChaCha8Rng::from_entropy();
        for attempt in 1..=self.cfg.max_start_attempts {
            let Some(port) = self.pick_port(&mut rng) else {
                log::warn!(
                    "[sim] attempt {attempt}: no free port in {:?}",
                    self.port_range
                );
                self.backoff(&mut rng);
                continue;
            };

            let spawned = Command::new(&self.cfg.binary)
                .args(self.command_args(port))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            let mut child = match spawned {
                Ok(c) => c,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(SimError::Launch(format!(
                        "simulator binary '{}' not found",
                        self.cfg.binary
                    )));
                }
                Err(e) => {
                    log::warn!("[sim] attempt {attempt}: spawn failed: {e}");
                    self.backoff(&mut rng);
                    continue;
                }
            };

            let Some(stream) = self.connect(&mut child, port) else {
                log::warn!("[sim] attempt {attempt}: could not connect on port {port}");
                kill(child);
                self.backoff(&mut rng);
                continue;
            };

            let label = format!("sumo:{port}");
            let mut conn = TraciConnection::new(stream, Some(child), label);
            match conn.version() {
                Ok((api, ident)) => {
                    log::debug!("[sim] connected on port {port}: api={api} {ident}");
                    return Ok(Box::new(conn));
                }
                Err(e) => {
                    log::warn!("[sim] attempt {attempt}: handshake failed on port {port}: {e}");
                    drop(conn);
                    self.backoff(&mut rng);
                }
            }
        }

        Err(SimError::Launch(format!(
            "no simulator after {} attempts",
            self.cfg.max_start_attempts
        )))
    }

    fn name(&self) -> &str {
        "sumo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_carries_port_and_seed() {
        let cfg = SimulatorConfig {
            extra_args: vec!["--time-to-teleport".into(), "-1".into()],
            ..SimulatorConfig::default()
        };
        let launcher = TraciLauncher::new("grid.sumocfg".into(), cfg, (20_000, 20_010));
        let args = launcher.command_args(20_005);
        let pos = args.iter().position(|a| a == "--remote-port").unwrap();
        assert_eq!(args[pos + 1], "20005");
        assert!(args.contains(&"grid.sumocfg".to_string()));
        assert!(args.contains(&"--seed".to_string()));
        assert_eq!(args.last().unwrap(), "-1");
    }

    #[test]
    fn missing_config_fails_fast() {
        let launcher = TraciLauncher::new(
            "/definitely/not/here.sumocfg".into(),
            SimulatorConfig::default(),
            (20_000, 20_010),
        );
        assert!(matches!(launcher.launch(), Err(SimError::Launch(_))));
    }

    #[test]
    fn missing_binary_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_file = dir.path().join("a.sumocfg");
        std::fs::write(&cfg_file, "<configuration/>").unwrap();
        let cfg = SimulatorConfig {
            binary: "greenwave-no-such-simulator-binary".into(),
            ..SimulatorConfig::default()
        };
        let launcher = TraciLauncher::new(cfg_file, cfg, (30_000, 30_500));
        match launcher.launch() {
            Err(SimError::Launch(msg)) => assert!(msg.contains("not found")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("launch should fail"),
        }
    }
}
