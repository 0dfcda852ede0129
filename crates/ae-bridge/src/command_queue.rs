//! Lock-free command/ack rings between the control thread(s) and the audio thread
//! (`SPEC_FULL.md` §5, §6).
//!
//! Commands flow control → audio through one SPSC ring; acknowledgements for deferred
//! (structural) commands flow audio → control through a second, much shallower ring. Neither
//! side blocks: a full ring on either side is reported to the caller rather than awaited.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::commands::{CommandAck, CommandEnvelope};

/// Command ring capacity. Sized generously above any plausible per-block command burst so a
/// full ring reliably indicates the control thread is misbehaving, not ordinary load.
pub const COMMAND_QUEUE_SIZE: usize = 2048;

/// Acknowledgement ring capacity; acks are one small struct per structural command, far rarer
/// than parameter/note commands.
pub const ACK_QUEUE_SIZE: usize = 256;

/// Owns both rings before they are split into their control-side and audio-side halves.
pub struct CommandQueueManager {
    command_producer: Producer<CommandEnvelope>,
    command_consumer: Consumer<CommandEnvelope>,
    ack_producer: Producer<CommandAck>,
    ack_consumer: Consumer<CommandAck>,
}

impl CommandQueueManager {
    pub fn new() -> Self {
        let (command_producer, command_consumer) = RingBuffer::new(COMMAND_QUEUE_SIZE);
        let (ack_producer, ack_consumer) = RingBuffer::new(ACK_QUEUE_SIZE);
        Self { command_producer, command_consumer, ack_producer, ack_consumer }
    }

    /// Splits into the control-thread handle (sends commands, reads acks) and the audio-thread
    /// handle (reads commands, sends acks).
    pub fn split(self) -> (ControlCommandHandle, AudioCommandHandle) {
        (
            ControlCommandHandle { command_producer: self.command_producer, ack_consumer: self.ack_consumer },
            AudioCommandHandle { command_consumer: self.command_consumer, ack_producer: self.ack_producer },
        )
    }
}

impl Default for CommandQueueManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Control-thread side: enqueue commands, drain acks.
pub struct ControlCommandHandle {
    command_producer: Producer<CommandEnvelope>,
    ack_consumer: Consumer<CommandAck>,
}

impl ControlCommandHandle {
    /// Enqueues one command. Non-blocking: returns `false` if the ring is full.
    #[inline]
    pub fn send(&mut self, command: CommandEnvelope) -> bool {
        self.command_producer.push(command).is_ok()
    }

    #[inline]
    pub fn has_space(&self) -> bool {
        !self.command_producer.is_full()
    }

    #[inline]
    pub fn available_space(&self) -> usize {
        self.command_producer.slots()
    }

    /// Drains every ack currently available, in FIFO order.
    pub fn poll_acks(&mut self) -> AckIterator<'_> {
        AckIterator { consumer: &mut self.ack_consumer }
    }
}

/// Audio-thread side: drain commands, enqueue acks.
pub struct AudioCommandHandle {
    command_consumer: Consumer<CommandEnvelope>,
    ack_producer: Producer<CommandAck>,
}

impl AudioCommandHandle {
    /// Returns an iterator draining every command currently available. Call once at the top of
    /// each block (`SPEC_FULL.md` §5: "Audio thread drains the queue at the top of each block").
    #[inline]
    pub fn drain(&mut self) -> CommandIterator<'_> {
        CommandIterator { consumer: &mut self.command_consumer }
    }

    #[inline]
    pub fn has_commands(&self) -> bool {
        !self.command_consumer.is_empty()
    }

    /// Publishes one ack. Best-effort: if the (shallow) ack ring is full the ack is dropped and
    /// the control side will observe the deferred handle as still-pending; this never blocks
    /// the audio thread.
    #[inline]
    pub fn send_ack(&mut self, ack: CommandAck) -> bool {
        self.ack_producer.push(ack).is_ok()
    }
}

pub struct CommandIterator<'a> {
    consumer: &'a mut Consumer<CommandEnvelope>,
}

impl<'a> Iterator for CommandIterator<'a> {
    type Item = CommandEnvelope;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.consumer.pop().ok()
    }
}

pub struct AckIterator<'a> {
    consumer: &'a mut Consumer<CommandAck>,
}

impl<'a> Iterator for AckIterator<'a> {
    type Item = CommandAck;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.consumer.pop().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{DeferredHandle, EngineCommand};

    fn envelope(handle: u64, command: EngineCommand) -> CommandEnvelope {
        CommandEnvelope { handle: DeferredHandle(handle), command }
    }

    #[test]
    fn command_sent_by_control_is_observed_by_audio() {
        let manager = CommandQueueManager::new();
        let (mut control, mut audio) = manager.split();

        assert!(control.send(envelope(1, EngineCommand::TransportPlay)));

        let drained: Vec<_> = audio.drain().collect();
        assert_eq!(drained.len(), 1);
        assert!(matches!(drained[0].command, EngineCommand::TransportPlay));
    }

    #[test]
    fn ack_sent_by_audio_is_observed_by_control() {
        let manager = CommandQueueManager::new();
        let (mut control, mut audio) = manager.split();

        audio.send_ack(CommandAck { handle: DeferredHandle(7), result: Ok(()) });

        let acks: Vec<_> = control.poll_acks().collect();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].handle, DeferredHandle(7));
    }

    #[test]
    fn commands_observed_in_submission_order() {
        let manager = CommandQueueManager::new();
        let (mut control, mut audio) = manager.split();

        control.send(envelope(1, EngineCommand::TransportPlay));
        control.send(envelope(2, EngineCommand::TransportPause));
        control.send(envelope(3, EngineCommand::TransportStop));

        let drained: Vec<_> = audio.drain().collect();
        assert!(matches!(drained[0].command, EngineCommand::TransportPlay));
        assert!(matches!(drained[1].command, EngineCommand::TransportPause));
        assert!(matches!(drained[2].command, EngineCommand::TransportStop));
    }
}
