//! Instrument acquisition loop
//!
//! An [`Instrument`] is the handle to a scope or logic analyzer; the crate
//! never speaks its wire protocol. One acquisition pass arms the trigger,
//! polls until it fires, pulls the channel data into the graph's capture
//! sources and refreshes everything downstream, all under the graph lock.
//!
//! [`AcquisitionRunner`] repeats passes on a dedicated thread and reports
//! each completed pass on a crossbeam channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, TrySendError};
use tracing::{debug, error, info, trace};

use super::errors::AcquisitionError;
use super::graph::SharedGraph;
use super::waveform::WaveformData;

/// State reported by the instrument's trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed,
    Triggered,
}

/// Input coupling of an analog channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coupling {
    #[default]
    Dc1M,
    Ac1M,
    Dc50,
    Ground,
}

/// Front-end settings of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub coupling: Coupling,
    /// Probe attenuation factor (10.0 for a 10x probe)
    pub attenuation: f64,
    /// Bandwidth limit in MHz, 0 for full bandwidth
    pub bandwidth_limit_mhz: u32,
    /// Full-scale vertical range in volts
    pub voltage_range: f64,
    pub offset: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            coupling: Coupling::default(),
            attenuation: 1.0,
            bandwidth_limit_mhz: 0,
            voltage_range: 1.0,
            offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerType {
    #[default]
    Rising,
    Falling,
    Both,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriggerConfig {
    pub source: usize,
    pub level: f64,
    pub kind: TriggerType,
}

/// Instrument collaborator
///
/// Implementations own the transport; the acquisition loop only needs the
/// trigger handshake and the resulting per-channel waveforms.
pub trait Instrument: Send {
    fn channel_count(&self) -> usize;

    fn arm_trigger(&mut self) -> Result<(), AcquisitionError>;

    fn poll_trigger(&mut self) -> Result<TriggerState, AcquisitionError>;

    /// One entry per channel; `None` for disabled channels
    fn acquire_data(&mut self) -> Result<Vec<Option<WaveformData>>, AcquisitionError>;

    fn channel_config(&self, channel: usize) -> Result<ChannelConfig, AcquisitionError>;

    fn set_channel_config(
        &mut self,
        channel: usize,
        config: ChannelConfig,
    ) -> Result<(), AcquisitionError>;

    fn trigger_config(&self) -> TriggerConfig;

    fn set_trigger_config(&mut self, config: TriggerConfig) -> Result<(), AcquisitionError>;

    /// Supported sample rates in samples per second
    fn sample_rates(&self) -> Vec<u64>;

    /// Supported memory depths in samples
    fn sample_depths(&self) -> Vec<u64>;
}

/// Route from an instrument channel to a capture source stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub channel: usize,
    pub node: String,
    pub stream: usize,
}

impl ChannelBinding {
    pub fn new(channel: usize, node: impl Into<String>, stream: usize) -> Self {
        Self {
            channel,
            node: node.into(),
            stream,
        }
    }
}

/// Polling behaviour of one pass
#[derive(Debug, Clone)]
pub struct AcquisitionOptions {
    pub poll_interval: Duration,
    /// Polls before giving up on the trigger
    pub max_polls: usize,
    /// Pass notifications buffered before new ones are dropped
    pub queue_depth: usize,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_polls: 1000,
            queue_depth: 16,
        }
    }
}

/// Outcome of one completed pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Channels that delivered data
    pub channels: usize,
    /// Graph nodes refreshed
    pub refreshed: usize,
}

/// Arm, wait for the trigger, acquire and refresh, holding the graph lock
/// for the whole pass
pub fn acquire_once(
    graph: &SharedGraph,
    instrument: &mut dyn Instrument,
    bindings: &[ChannelBinding],
    options: &AcquisitionOptions,
) -> Result<PassReport, AcquisitionError> {
    run_pass(graph, instrument, bindings, options, None)?.ok_or(AcquisitionError::Stopped)
}

fn run_pass(
    graph: &SharedGraph,
    instrument: &mut dyn Instrument,
    bindings: &[ChannelBinding],
    options: &AcquisitionOptions,
    stop_signal: Option<&AtomicBool>,
) -> Result<Option<PassReport>, AcquisitionError> {
    let mut graph = graph.lock().unwrap_or_else(PoisonError::into_inner);

    instrument.arm_trigger()?;
    let mut polls = 0usize;
    loop {
        if stop_signal.is_some_and(|s| s.load(Ordering::Relaxed)) {
            return Ok(None);
        }
        match instrument.poll_trigger()? {
            TriggerState::Triggered => break,
            state => trace!("Trigger {:?} after {} polls", state, polls),
        }
        polls += 1;
        if polls >= options.max_polls {
            return Err(AcquisitionError::TriggerTimeout(polls));
        }
        thread::sleep(options.poll_interval);
    }

    let data = instrument.acquire_data()?;
    // Resolve every binding before touching any source, so a failed pass
    // leaves the graph as it was
    let staged = bindings
        .iter()
        .map(|binding| -> Result<_, AcquisitionError> {
            let wave = data
                .get(binding.channel)
                .ok_or(AcquisitionError::NoSuchChannel(binding.channel))?;
            graph.check_source(&binding.node)?;
            Ok((binding, wave.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut channels = 0usize;
    for (binding, wave) in staged {
        channels += usize::from(wave.is_some());
        graph.load_source(&binding.node, binding.stream, wave)?;
    }
    let refreshed = graph.refresh_changed();
    debug!(
        "Acquired {} channels, refreshed {} nodes",
        channels, refreshed
    );
    Ok(Some(PassReport {
        channels,
        refreshed,
    }))
}

/// Repeats acquisition passes on a worker thread until stopped
///
/// No pass is retried: the first instrument or graph error ends the run and
/// is returned from [`AcquisitionRunner::join`].
pub struct AcquisitionRunner {
    stop_signal: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<u64, AcquisitionError>>>,
    passes: Receiver<PassReport>,
}

impl AcquisitionRunner {
    pub fn start(
        graph: SharedGraph,
        mut instrument: Box<dyn Instrument>,
        bindings: Vec<ChannelBinding>,
        options: AcquisitionOptions,
    ) -> Self {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(options.queue_depth.max(1));
        let thread_stop = Arc::clone(&stop_signal);

        info!(
            "Starting acquisition on {} channels",
            instrument.channel_count()
        );

        let handle = thread::spawn(move || {
            let mut completed = 0u64;
            while !thread_stop.load(Ordering::Relaxed) {
                let report = match run_pass(
                    &graph,
                    instrument.as_mut(),
                    &bindings,
                    &options,
                    Some(&thread_stop),
                ) {
                    Ok(Some(report)) => report,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Acquisition failed after {} passes: {}", completed, e);
                        return Err(e);
                    }
                };
                completed += 1;
                match tx.try_send(report) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        trace!("Pass {} notification dropped, queue full", completed)
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            info!("Acquisition stopped. Completed {} passes.", completed);
            Ok(completed)
        });

        Self {
            stop_signal,
            handle: Some(handle),
            passes: rx,
        }
    }

    /// Notifications of completed passes
    pub fn passes(&self) -> &Receiver<PassReport> {
        &self.passes
    }

    /// Ask the worker to finish after the current pass
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Stop the worker and wait for it; returns the number of passes
    /// completed or the error that ended the run
    pub fn join(mut self) -> Result<u64, AcquisitionError> {
        self.stop();
        self.wait()
    }

    fn wait(&mut self) -> Result<u64, AcquisitionError> {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                error!("Acquisition thread panicked");
                Err(AcquisitionError::Instrument("acquisition thread panicked".to_string()))
            }),
            None => Ok(0),
        }
    }
}

impl Drop for AcquisitionRunner {
    fn drop(&mut self) {
        self.stop();
        let _ = self.wait();
    }
}
