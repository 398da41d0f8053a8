//! The capture pipeline and its command interpreter.
//!
//! A [Pipeline] owns all state shared between the tasks. It's meant to be placed in a `static`,
//! so the receive interrupt can call [Pipeline::capture], while the executor runs
//! [Pipeline::run] or the individual task loops.

use core::fmt::{self, Write as _};

use embassy_futures::join::join4;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};
use heapless::String;

use crate::{
    caplog::{AppendOutcome, CaptureLog, LogStore},
    capture::{capture_frame, now_millis, CaptureOutcome, CaptureStats},
    command::{Command, CommandError, HELP_LINES},
    config::{PipelineConfig, SharedConfig},
    console::{run_console, run_drain},
    frame::{CapturedFrame, RawFrame},
    hop::{ChannelHopper, Radio},
    parser::parse,
    queue::PacketQueue,
    record::{render_export, render_live, Line},
    sync::DropOldestQueue,
    DefaultRawMutex,
};

/// The amount of lines, that can wait for the control link.
pub const TX_QUEUE_DEPTH: usize = 16;
/// How long switching to file logging waits for pending text output.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);
/// The maximum length of a reply message, without the level prefix.
pub const REPLY_MAX: usize = 256;

/// Lines waiting to be written to the control link.
pub type TxQueue = DropOldestQueue<Line, TX_QUEUE_DEPTH>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReplyLevel {
    Ok,
    /// The command was valid, but didn't change anything.
    Warn,
    Err,
}
impl ReplyLevel {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Err => "ERR",
        }
    }
}

/// The terminal line of a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub level: ReplyLevel,
    pub message: String<REPLY_MAX>,
}
impl Reply {
    /// Format a reply. Overlong messages are truncated.
    pub fn new(level: ReplyLevel, args: fmt::Arguments<'_>) -> Self {
        let mut message = String::new();
        let _ = message.write_fmt(args);
        Self { level, message }
    }
    pub fn ok(args: fmt::Arguments<'_>) -> Self {
        Self::new(ReplyLevel::Ok, args)
    }
    pub fn warn(args: fmt::Arguments<'_>) -> Self {
        Self::new(ReplyLevel::Warn, args)
    }
    pub fn err(args: fmt::Arguments<'_>) -> Self {
        Self::new(ReplyLevel::Err, args)
    }
    pub fn to_line(&self) -> Line {
        let mut line = Line::new();
        let _ = write!(line, "{self}");
        line
    }
}
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level.prefix(), self.message)
    }
}

const fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// All state of the capture pipeline.
pub struct Pipeline<S> {
    packets: PacketQueue,
    config: SharedConfig,
    tx: TxQueue,
    log: Mutex<DefaultRawMutex, CaptureLog<S>>,
    stats: CaptureStats,
}
impl<S: LogStore> Pipeline<S> {
    pub const fn new(config: PipelineConfig, store: S) -> Self {
        Self {
            packets: PacketQueue::new(),
            config: SharedConfig::new(config),
            tx: TxQueue::new(),
            log: Mutex::new(CaptureLog::new(store)),
            stats: CaptureStats::new(),
        }
    }
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }
    pub fn packets(&self) -> &PacketQueue {
        &self.packets
    }
    pub fn tx(&self) -> &TxQueue {
        &self.tx
    }
    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }
    /// Hand a received frame to the pipeline.
    ///
    /// This is meant to be called from the receive interrupt and never blocks.
    pub fn capture(&self, frame: Option<RawFrame<'_>>) -> CaptureOutcome {
        capture_frame(
            frame,
            self.config.filter(),
            now_millis(),
            &self.packets,
            &self.stats,
        )
    }
    /// Queue an unsolicited status line, discarding the oldest pending line if necessary.
    fn notify(&self, args: fmt::Arguments<'_>) {
        let mut line = Line::new();
        let _ = line.write_str("STATUS: ");
        let _ = line.write_fmt(args);
        if !self.tx.push(line) {
            trace!("TX queue full, dropped the oldest line.");
        }
    }
    /// Route one frame to the active sink.
    pub async fn process(&self, frame: &CapturedFrame) {
        let config = self.config.snapshot();
        if config.file_logging {
            let mut log = self.log.lock().await;
            // The interpreter may have switched sinks, while we were waiting for the log.
            let config = self.config.snapshot();
            if !config.file_logging {
                return;
            }
            match log.append(frame, config.log_mode, config.log_max_bytes) {
                Ok(AppendOutcome::Written | AppendOutcome::Wrapped) => {}
                Ok(AppendOutcome::Full) => {
                    self.config.set_file_logging(false);
                    self.notify(format_args!(
                        "capture log full ({} bytes), file logging off",
                        config.log_max_bytes
                    ));
                }
                Err(err) => {
                    self.config.set_file_logging(false);
                    self.notify(format_args!("capture log failed: {err}, file logging off"));
                }
            }
        } else if config.text_output {
            if let Some(line) = render_live(frame, &parse(frame)) {
                if !self.tx.push(line) {
                    trace!("TX queue full, dropped the oldest line.");
                }
            }
        }
    }
    /// Process frames forever.
    pub async fn run_worker(&self) {
        loop {
            let frame = self.packets.dequeue().await;
            self.process(&frame).await;
        }
    }
    /// Hop channels forever.
    pub async fn run_hopper(&self, radio: &impl Radio) {
        ChannelHopper::new().run(&self.config, radio).await
    }
    /// Queue a line, waiting for room instead of discarding anything.
    async fn send(&self, line: Line) {
        self.tx.push_wait(line).await
    }
    /// Queue a reply.
    pub async fn reply(&self, reply: &Reply) {
        self.send(reply.to_line()).await
    }
    /// Parse and apply a command line, then queue the reply.
    pub async fn execute(&self, line: &str) -> Reply {
        let reply = match Command::parse(line) {
            Ok(command) => {
                debug!("Executing {:?}.", command);
                self.apply(command).await
            }
            Err(CommandError::Unknown) => {
                Reply::err(format_args!("unknown command '{}'", line.trim()))
            }
            Err(err) => Reply::err(format_args!("{err}")),
        };
        self.reply(&reply).await;
        reply
    }
    /// Apply a command and return the reply.
    ///
    /// All state changes have been made, by the time this returns.
    pub async fn apply(&self, command: Command) -> Reply {
        match command {
            Command::Hop(enabled) => {
                if self.config.set_hop_enabled(enabled) == enabled {
                    Reply::warn(format_args!("hopping already {}", on_off(enabled)))
                } else {
                    Reply::ok(format_args!("hopping {}", on_off(enabled)))
                }
            }
            Command::SetChannels(channels) => {
                self.config.set_channels(channels);
                Reply::ok(format_args!("channels {channels}"))
            }
            Command::RemoveChannel(channel) => match self.config.remove_channel(channel) {
                Some(channels) => Reply::ok(format_args!("channels {channels}")),
                None => Reply::warn(format_args!("channel {channel} not in hop set")),
            },
            Command::ClearChannels => {
                self.config.clear_channels();
                Reply::ok(format_args!("channels none"))
            }
            Command::ShowChannels => {
                Reply::ok(format_args!("channels {}", self.config.snapshot().channels))
            }
            Command::SetHopInterval(interval_ms) => {
                let interval_ms = self.config.set_hop_interval(interval_ms);
                Reply::ok(format_args!("hop interval {interval_ms} ms"))
            }
            Command::AddTypes(types) => {
                let added = self.config.add_types(types);
                if added.is_empty() {
                    Reply::warn(format_args!("types {types} already captured"))
                } else {
                    Reply::ok(format_args!("types {}", self.config.filter()))
                }
            }
            Command::RemoveTypes(types) => {
                let removed = self.config.remove_types(types);
                if removed.is_empty() {
                    Reply::warn(format_args!("types {types} not captured"))
                } else {
                    Reply::ok(format_args!("types {}", self.config.filter()))
                }
            }
            Command::OnlyTypes(types) => {
                self.config.set_types(types);
                Reply::ok(format_args!("types {types}"))
            }
            Command::ShowTypes => Reply::ok(format_args!("types {}", self.config.filter())),
            Command::TextOutput(true) => self.select_text_output().await,
            Command::TextOutput(false) => {
                if self.config.set_text_output(false) {
                    Reply::ok(format_args!("text output off"))
                } else {
                    Reply::warn(format_args!("text output already off"))
                }
            }
            Command::FileLogging(true) => self.select_file_logging().await,
            Command::FileLogging(false) => {
                let was_enabled = self.config.set_file_logging(false);
                self.log.lock().await.close();
                if was_enabled {
                    Reply::ok(format_args!("file logging off"))
                } else {
                    Reply::warn(format_args!("file logging already off"))
                }
            }
            Command::FileMode(log_mode) => {
                self.config.set_log_mode(log_mode);
                // Resumed in the new mode by the next append. Only FILE ON truncates.
                self.log.lock().await.close();
                Reply::ok(format_args!("file mode {}", log_mode.keyword()))
            }
            Command::FileMax(max_bytes) => {
                let max_bytes = self.config.set_log_max_bytes(max_bytes);
                Reply::ok(format_args!("file max {max_bytes} bytes"))
            }
            Command::FileStatus => {
                let config = self.config.snapshot();
                match self.log.lock().await.status(config.log_max_bytes) {
                    Ok(status) => match status.size {
                        Some(size) => Reply::ok(format_args!(
                            "log {size} of {} bytes, mode {}, logging {}",
                            status.limit,
                            config.log_mode.keyword(),
                            on_off(config.file_logging)
                        )),
                        None => Reply::ok(format_args!(
                            "no log, limit {} bytes, mode {}",
                            status.limit,
                            config.log_mode.keyword()
                        )),
                    },
                    Err(err) => Reply::err(format_args!("log status failed: {err}")),
                }
            }
            Command::FileClear => match self.log.lock().await.clear() {
                Ok(()) => Reply::ok(format_args!("log cleared")),
                Err(err) => Reply::err(format_args!("clearing log failed: {err}")),
            },
            Command::FileExport => self.export_text().await,
            Command::FileDump => self.export_dump().await,
            Command::FsFormat => {
                self.config.set_file_logging(false);
                match self.log.lock().await.format() {
                    Ok(()) => Reply::ok(format_args!("volume formatted, file logging off")),
                    Err(err) => Reply::err(format_args!("format failed: {err}")),
                }
            }
            Command::Status => self.status(),
            Command::Ping => Reply::ok(format_args!("PONG")),
            Command::Help => {
                for help_line in HELP_LINES {
                    let mut line = Line::new();
                    let _ = line.push_str(help_line);
                    self.send(line).await;
                }
                Reply::ok(format_args!("end of help"))
            }
        }
    }
    fn status(&self) -> Reply {
        let config = self.config.snapshot();
        let counters = self.stats.counters();
        Reply::ok(format_args!(
            "hop={} interval={}ms ch={} types={} text={} file={} mode={} max={} queued={} filtered={} dropped={} tx_dropped={}",
            on_off(config.hop_enabled),
            config.hop_interval_ms,
            config.channels,
            config.filter,
            on_off(config.text_output),
            on_off(config.file_logging),
            config.log_mode.keyword(),
            config.log_max_bytes,
            counters.queued,
            counters.filtered,
            counters.dropped,
            self.tx.dropped()
        ))
    }
    async fn select_text_output(&self) -> Reply {
        let was_text = self.config.snapshot().text_output;
        let was_file = self.config.select_text_output();
        if was_file {
            self.log.lock().await.close();
            info!("Switched from file logging to text output.");
            Reply::ok(format_args!("text output on, file logging off"))
        } else if was_text {
            Reply::warn(format_args!("text output already on"))
        } else {
            Reply::ok(format_args!("text output on"))
        }
    }
    /// Switch from text output to file logging.
    ///
    /// Text output is stopped first and pending lines get [DRAIN_GRACE] to reach the link, so
    /// live records and the acknowledgement don't interleave. If the log can't be opened, file
    /// logging stays off and text output is restored.
    async fn select_file_logging(&self) -> Reply {
        let config = self.config.snapshot();
        if config.file_logging {
            return Reply::warn(format_args!("file logging already on"));
        }
        let was_text = self.config.set_text_output(false);
        if was_text && with_timeout(DRAIN_GRACE, self.tx.wait_drained()).await.is_err() {
            debug!("TX queue didn't drain in time, switching anyway.");
        }
        let mut log = self.log.lock().await;
        if let Err(err) = log.open(config.log_mode, config.log_max_bytes) {
            warn!("Opening the capture log failed: {:?}", err.kind());
            self.config.set_text_output(was_text);
            return Reply::err(format_args!("cannot open log: {err}"));
        }
        self.config.set_file_logging(true);
        info!("Switched to file logging.");
        Reply::ok(format_args!(
            "file logging on, mode {}, max {} bytes",
            config.log_mode.keyword(),
            config.log_max_bytes
        ))
    }
    async fn export_text(&self) -> Reply {
        let mut log = self.log.lock().await;
        let records = match log.export_text() {
            Ok(records) => records,
            Err(err) => return Reply::err(format_args!("export failed: {err}")),
        };
        let mut exported = 0u32;
        for record in records {
            let frame = match record {
                Ok(frame) => frame,
                Err(err) => {
                    return Reply::err(format_args!(
                        "export failed after {exported} records: {err}"
                    ))
                }
            };
            if let Some(line) = render_export(&frame, &parse(&frame)) {
                self.send(line).await;
            }
            exported += 1;
        }
        Reply::ok(format_args!("exported {exported} records"))
    }
    async fn export_dump(&self) -> Reply {
        let mut log = self.log.lock().await;
        let chunks = match log.export_dump() {
            Ok(chunks) => chunks,
            Err(err) => return Reply::err(format_args!("dump failed: {err}")),
        };
        let mut lines = 0u32;
        for chunk in chunks {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    return Reply::err(format_args!("dump failed after {lines} lines: {err}"))
                }
            };
            let mut line = Line::new();
            let _ = line.push_str(&chunk);
            self.send(line).await;
            lines += 1;
        }
        Reply::ok(format_args!("dumped {lines} lines"))
    }
    /// Run all tasks of the pipeline on the current executor.
    ///
    /// Only returns once `input` reached its end and every other task finished, which in
    /// practice means never.
    pub async fn run(&self, radio: impl Radio, mut input: impl Read, mut output: impl Write) {
        join4(
            self.run_worker(),
            self.run_hopper(&radio),
            run_console(self, &mut input),
            run_drain(&self.tx, &mut output),
        )
        .await;
    }
}
impl<S: LogStore + Default> Default for Pipeline<S> {
    fn default() -> Self {
        Self::new(PipelineConfig::DEFAULT, S::default())
    }
}
