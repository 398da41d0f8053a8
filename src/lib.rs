//! # `esp-wifi-sniffer`
//! This is a passive 802.11 capture pipeline for ESP32-series chips. It receives frames in the
//! receive interrupt of the radio, parses them on a worker task and either streams them as JSON
//! over a serial link or writes them to a size limited log on flash, while another task hops
//! across a configurable set of channels. Everything can be reconfigured at run time, through a
//! line based command language on the same serial link.
//!
//! The crate is `no_std` and doesn't allocate. The radio and the flash file system are accessed
//! through the [Radio] and [LogStore] traits, the serial link through `embedded-io-async`.
//! ## Architecture
//! This chapter will give a short overview of how frames flow through the pipeline.
//!
//! ### Capture
//! The radio driver calls [Pipeline::capture] from its receive callback for every frame. The
//! frame class reported by the driver is checked against the filter, and up to
//! [frame::MAX_COPY] bytes of the frame, together with the RSSI, the channel and a millisecond
//! timestamp, are copied into a [CapturedFrame]. That is then handed to the worker through a
//! bounded [PacketQueue]. If the queue is full, the frame is dropped and counted, since the
//! interrupt must never wait.
//!
//! ### Processing
//! The worker takes frames out of the queue in order. Depending on the configuration, the raw
//! frame is appended to the [CaptureLog], or the frame is parsed and rendered as a JSON line,
//! which is pushed into the TX queue. Only one of the two sinks is active at a time. The TX
//! queue is drained to the serial link by its own task and discards the oldest line, if the
//! link can't keep up. Frames may be truncated, so the parser never indexes past the copied
//! bytes and simply leaves out fields, that aren't present.
//!
//! ### Capture log
//! The log is a flat file of records, each consisting of an eight byte header and the raw frame.
//! Once it reaches its size limit, it either wraps around and continues at the start, or closes
//! and disables file logging. The log can be exported over the link as JSON, which runs every
//! record through the same parser as the live stream, or as a base64 dump.
//!
//! ### Control
//! Commands are read line by line and each one is answered with exactly one line starting with
//! `OK:`, `WARN:` or `ERR:`. All configuration lives in a single [PipelineConfig], which is only
//! modified by the command interpreter and only ever read as a whole by the other tasks. The
//! [ChannelHopper] retunes the radio through the configured channels at a fixed interval.
//!
//! ## Usage
//! The [Pipeline] is meant to be placed in a `static`, so that the receive callback can reach it.
//! On a single executor, [Pipeline::run] drives all tasks. Alternatively
//! [Pipeline::run_worker], [Pipeline::run_hopper], [console::run_console] and
//! [console::run_drain] can be spawned as separate tasks, for example to run the worker at a
//! higher priority.

#![cfg_attr(not(test), no_std)]
pub(crate) mod fmt;

pub mod caplog;
pub mod capture;
pub mod command;
pub mod config;
pub mod console;
pub mod frame;
pub mod hop;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod record;
mod sync;

pub use caplog::{CaptureLog, LogStore};
pub use command::Command;
pub use config::{ChannelSet, FrameTypes, LogMode, PipelineConfig, SharedConfig};
pub use frame::{CapturedFrame, FrameClass, RawFrame};
pub use hop::{ChannelHopper, Radio, RadioError, RadioResult};
pub use parser::{parse, ParsedFrame};
pub use pipeline::{Pipeline, Reply, ReplyLevel, TxQueue};
pub use queue::PacketQueue;
pub use sync::DropOldestQueue;

type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
