use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};

use crate::implem::encoder::EncoderArgs;
use crate::model::encoder::{EncoderState, RestartPolicy};
use crate::utils::{Am, am};

const STDOUT_CHUNK: usize = 64 << 10;

struct Monitor {
	stop: oneshot::Sender<()>,
	handle: JoinHandle<()>,
}

/// Owns the lifecycle of one encoder subprocess role.
///
/// The subprocess is spawned and watched by a monitor task. Unexpected exits are
/// restarted according to the [RestartPolicy]; once the budget is spent the state
/// settles on [EncoderState::Failed] until someone calls `start` again.
pub struct EncoderSupervisor {
	name: &'static str,
	args: EncoderArgs,
	policy: RestartPolicy,
	stdout_sink: Option<mpsc::Sender<Vec<u8>>>,
	monitor: Am<Option<Monitor>>,
	state: Arc<watch::Sender<EncoderState>>,
	spawns: Arc<AtomicU32>,
}

impl EncoderSupervisor {
	pub fn new(name: &'static str, args: EncoderArgs, policy: RestartPolicy) -> Self {
		let (state, _) = watch::channel(EncoderState::Absent);

		EncoderSupervisor {
			name,
			args,
			policy,
			stdout_sink: None,
			monitor: am(None),
			state: Arc::new(state),
			spawns: Arc::new(AtomicU32::new(0)),
		}
	}

	/// Sends every chunk the child writes to stdout into `sink`.
	pub fn with_stdout_sink(mut self, sink: mpsc::Sender<Vec<u8>>) -> Self {
		self.args.with_stdout_piped();
		self.stdout_sink = Some(sink);

		return self;
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Spawns the subprocess unless one is already supervised. Returns whether it spawned.
	pub async fn start(&self) -> bool {
		let mut monitor = self.monitor.lock().await;
		self.start_locked(&mut monitor)
	}

	pub async fn stop(&self) {
		let mut monitor = self.monitor.lock().await;
		self.stop_locked(&mut monitor).await;
	}

	pub async fn restart(&self) {
		let mut monitor = self.monitor.lock().await;
		self.stop_locked(&mut monitor).await;
		self.start_locked(&mut monitor);
	}

	pub fn state(&self) -> EncoderState {
		self.state.borrow().clone()
	}

	#[cfg(test)]
	pub fn subscribe(&self) -> watch::Receiver<EncoderState> {
		self.state.subscribe()
	}

	/// Number of processes spawned over the supervisor's lifetime, restarts included.
	pub fn spawn_count(&self) -> u32 {
		self.spawns.load(Ordering::SeqCst)
	}

	fn start_locked(&self, monitor: &mut Option<Monitor>) -> bool {
		if let Some(m) = monitor.as_ref() {
			if !m.handle.is_finished() {
				return false;
			}
		}

		let (stop, stop_rx) = oneshot::channel();
		let task = MonitorTask {
			name: self.name,
			args: self.args.clone(),
			policy: self.policy,
			stdout_sink: self.stdout_sink.clone(),
			state: self.state.clone(),
			spawns: self.spawns.clone(),
		};
		let handle = tokio::spawn(task.run(stop_rx));
		*monitor = Some(Monitor { stop, handle });

		return true;
	}

	async fn stop_locked(&self, monitor: &mut Option<Monitor>) {
		if let Some(Monitor { stop, handle }) = monitor.take() {
			let _ = stop.send(());
			if let Err(e) = handle.await {
				error!("[{}] monitor task ended abnormally: {}", self.name, e);
			}
		}

		self.state.send_replace(EncoderState::Absent);
	}
}

struct MonitorTask {
	name: &'static str,
	args: EncoderArgs,
	policy: RestartPolicy,
	stdout_sink: Option<mpsc::Sender<Vec<u8>>>,
	state: Arc<watch::Sender<EncoderState>>,
	spawns: Arc<AtomicU32>,
}

impl MonitorTask {
	async fn run(self, mut stop: oneshot::Receiver<()>) {
		let mut restarts = 0;
		let mut attempt = 0;

		loop {
			let started = Instant::now();
			let code = match self.args.spawn() {
				Ok(mut child) => {
					self.spawns.fetch_add(1, Ordering::SeqCst);
					let pid = child.id();
					info!("[{}] encoder started (pid {:?})", self.name, pid);
					self.state.send_replace(EncoderState::Running { pid, restarts });
					self.forward_output(&mut child);

					let exit = tokio::select! {
						_ = &mut stop => None,
						status = child.wait() => Some(status),
					};

					match exit {
						None => {
							terminate(child, self.policy.stop_grace, self.name).await;
							return;
						}
						Some(Ok(status)) => {
							warn!("[{}] encoder exited with {}", self.name, status);
							status.code()
						}
						Some(Err(e)) => {
							warn!("[{}] lost track of encoder: {}", self.name, e);
							None
						}
					}
				}
				Err(e) => {
					error!("[{}] failed to spawn encoder: {}", self.name, e);
					None
				}
			};

			if started.elapsed() >= self.policy.stable_after {
				attempt = 0;
			}
			attempt += 1;

			if attempt > self.policy.max_restarts {
				error!("[{}] encoder gave up after {} restarts, the feed is down", self.name, restarts);
				self.state.send_replace(EncoderState::Failed { code, restarts });
				return;
			}

			let delay = self.policy.backoff(attempt);
			info!("[{}] restarting encoder in {:?} (attempt {})", self.name, delay, attempt);
			self.state.send_replace(EncoderState::Backoff {
				attempt,
				delay_ms: delay.as_millis() as u64,
			});

			tokio::select! {
				_ = &mut stop => return,
				_ = sleep(delay) => {}
			}
			restarts += 1;
		}
	}

	fn forward_output(&self, child: &mut Child) {
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(log_stderr(self.name, stderr));
		}

		if let (Some(stdout), Some(sink)) = (child.stdout.take(), &self.stdout_sink) {
			tokio::spawn(forward_stdout(stdout, sink.clone()));
		}
	}
}

/// SIGINT first so ffmpeg can flush, SIGKILL once the grace period runs out.
async fn terminate(mut child: Child, grace: Duration, name: &str) {
	let pid = match child.id() {
		Some(pid) => pid,
		None => return,
	};

	if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
		warn!("[{}] failed to interrupt encoder {}: {}", name, pid, e);
	}

	match timeout(grace, child.wait()).await {
		Ok(Ok(status)) => {
			info!("[{}] encoder stopped with {}", name, status);
			return;
		}
		Ok(Err(e)) => warn!("[{}] failed to wait for encoder {}: {}", name, pid, e),
		Err(_) => warn!("[{}] encoder {} ignored SIGINT for {:?}, killing", name, pid, grace),
	}

	if let Err(e) = child.kill().await {
		error!("[{}] failed to kill encoder {}: {}", name, pid, e);
	}
}

/// ffmpeg terminates progress lines with `\r`, so both line endings split.
async fn log_stderr(name: &'static str, mut stderr: ChildStderr) {
	let mut buf = [0u8; 4096];
	let mut line = Vec::with_capacity(256);

	while let Ok(n) = stderr.read(&mut buf).await {
		if n == 0 {
			break;
		}

		for &b in &buf[..n] {
			if b == b'\n' || b == b'\r' {
				if !line.is_empty() {
					info!("[{}] {}", name, String::from_utf8_lossy(&line));
					line.clear();
				}
			} else {
				line.push(b);
			}
		}
	}

	if !line.is_empty() {
		info!("[{}] {}", name, String::from_utf8_lossy(&line));
	}
}

async fn forward_stdout(mut stdout: ChildStdout, sink: mpsc::Sender<Vec<u8>>) {
	let mut buf = vec![0u8; STDOUT_CHUNK];

	while let Ok(n) = stdout.read(&mut buf).await {
		if n == 0 || sink.send(buf[..n].to_vec()).await.is_err() {
			break;
		}
	}
}
