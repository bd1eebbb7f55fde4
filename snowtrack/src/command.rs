//! Inbound command handling.
//!
//! [`CommandIngest`] runs in the link's inbound path: it validates a frame,
//! queues the command with a bounded wait and answers rejections with a
//! status frame. [`CommandConsumer`] drains the queue one command at a time.

use embassy_futures::select::{select, Either};
use embedded_hal_async::delay::DelayNs;
use rtic_sync::channel::{Receiver, ReceiveError, Sender};
use snowtrack_common::cmd::{Command, CommandStatus, CommandType};
use snowtrack_common::msg::status_frame;

use crate::link::Link;

pub const COMMAND_QUEUE_LEN: usize = 10;

pub type CommandSender<'a> = Sender<'a, Command, COMMAND_QUEUE_LEN>;
pub type CommandReceiver<'a> = Receiver<'a, Command, COMMAND_QUEUE_LEN>;

#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    /// Longest wait for room on the command queue.
    pub enqueue_wait_ms: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enqueue_wait_ms: 100,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Queued,
    /// Not queued; the status was sent back over the link.
    Rejected(CommandStatus),
}

fn reply<L: Link>(link: &mut L, status: CommandStatus) {
    if let Err(e) = link.send(&status_frame(status)) {
        warn!("status {:?} not sent: {:?}", status, e);
    }
}

pub struct CommandIngest<'a, L, D> {
    sender: CommandSender<'a>,
    link: L,
    delay: D,
    config: IngestConfig,
}

impl<'a, L: Link, D: DelayNs> CommandIngest<'a, L, D> {
    pub fn new(sender: CommandSender<'a>, link: L, delay: D, config: IngestConfig) -> Self {
        Self {
            sender,
            link,
            delay,
            config,
        }
    }

    /// Handle one inbound frame. A queued command produces no reply here.
    pub async fn on_bytes(&mut self, frame: &[u8]) -> Ingest {
        let command = match Command::from_frame(frame) {
            Ok(command) => command,
            Err(status) => {
                warn!("invalid command code {:?}", frame.first());
                reply(&mut self.link, status);
                return Ingest::Rejected(status);
            }
        };

        let wait = self.config.enqueue_wait_ms;
        match select(self.sender.send(command), self.delay.delay_ms(wait)).await {
            Either::First(Ok(())) => {
                debug!("queued {:?}", command.command_type);
                Ingest::Queued
            }
            Either::First(Err(_)) => {
                error!("command queue has no consumer");
                reply(&mut self.link, CommandStatus::Error);
                Ingest::Rejected(CommandStatus::Error)
            }
            Either::Second(()) => {
                warn!("command queue full, dropped {:?}", command.command_type);
                reply(&mut self.link, CommandStatus::QueueFull);
                Ingest::Rejected(CommandStatus::QueueFull)
            }
        }
    }
}

/// Carries out commands. Returns the status to report, if any.
pub trait CommandExecutor {
    fn execute(&mut self, command: &Command) -> Option<CommandStatus>;
}

pub struct CommandConsumer<'a, E, L> {
    receiver: CommandReceiver<'a>,
    executor: E,
    link: L,
}

impl<'a, E: CommandExecutor, L: Link> CommandConsumer<'a, E, L> {
    pub fn new(receiver: CommandReceiver<'a>, executor: E, link: L) -> Self {
        Self {
            receiver,
            executor,
            link,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Wait for one command and execute it. `false` once every sender is
    /// gone.
    pub async fn serve_one(&mut self) -> bool {
        match self.receiver.recv().await {
            Ok(command) => {
                if let Some(status) = self.executor.execute(&command) {
                    reply(&mut self.link, status);
                }
                true
            }
            Err(ReceiveError::NoSender) => false,
            Err(ReceiveError::Empty) => true,
        }
    }

    pub async fn run(&mut self) {
        while self.serve_one().await {}
        warn!("command queue closed");
    }
}

/// Tracks whether a recording is in progress. There is no sample store, so
/// commands that need one are refused.
#[derive(Debug, Default)]
pub struct RecordingSwitch {
    recording: bool,
}

impl RecordingSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

impl CommandExecutor for RecordingSwitch {
    fn execute(&mut self, command: &Command) -> Option<CommandStatus> {
        match command.command_type {
            CommandType::StartRecording => {
                info!("recording on");
                self.recording = true;
                Some(CommandStatus::Ok)
            }
            CommandType::StopRecording => {
                info!("recording off");
                self.recording = false;
                Some(CommandStatus::Ok)
            }
            CommandType::ReceiveRecordings | CommandType::ClearRecordings => {
                warn!("{:?} needs a recording store", command.command_type);
                Some(CommandStatus::Error)
            }
        }
    }
}
