use crate::error::Error;
use crate::frame::{MessageKind, MessageRef, OpCode};
use crate::utils::xor_mask;

// Single frames and reassembled messages alike must fit a 32-bit signed
// length; anything beyond that fails the connection.
const MAX_MESSAGE_SIZE: u64 = i32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    FlagsOpcode,
    MaskLen,
    ExtLen16,
    ExtLen64,
    MaskKey,
    Payload,
}

/// Streaming parser for server-bound WebSocket frames.
///
/// Fed with whatever slice the socket delivered; invokes the sink once per
/// fully reassembled message, in order. Control frames may arrive between
/// the fragments of a data message and are delivered immediately without
/// disturbing the reassembly in progress.
///
/// A message whose entire payload sits in the current feed is delivered
/// borrowed from it, unmasked in place, with no copies. Payloads that span
/// feeds or fragments are accumulated in scratch lists and delivered from
/// there; the sink's borrow always ends when the callback returns.
pub struct FrameDecoder {
    phase: Phase,
    final_fragment: bool,
    is_control: bool,
    expect_more_fragments: bool,
    data_kind: MessageKind,
    control_kind: MessageKind,
    payload_size: u64,
    // bytes consumed of the current multi-byte region (extended length,
    // masking key, or payload)
    counter: usize,
    mask: [u8; 4],
    data_fragments: Vec<Vec<u8>>,
    control_fragments: Vec<Vec<u8>>,
    combined_size: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            phase: Phase::FlagsOpcode,
            final_fragment: true,
            is_control: false,
            expect_more_fragments: false,
            data_kind: MessageKind::Binary,
            control_kind: MessageKind::Ping,
            payload_size: 0,
            counter: 0,
            mask: [0; 4],
            data_fragments: Vec::new(),
            control_fragments: Vec::new(),
            combined_size: 0,
        }
    }

    /// Run the received bytes through the state machine, unmasking payload
    /// regions in place and handing each completed message to `sink`.
    pub fn feed<F>(&mut self, data: &mut [u8], mut sink: F) -> Result<(), Error>
    where
        F: FnMut(MessageRef<'_>) -> Result<(), Error>,
    {
        let mut pos = 0;
        while pos < data.len() {
            match self.phase {
                Phase::FlagsOpcode => {
                    let byte = data[pos];
                    pos += 1;

                    // RSV bits are only meaningful under a negotiated
                    // extension, and we negotiate none
                    if byte & 0b0111_0000 != 0 {
                        return Err(Error::ReservedFlagsSet);
                    }

                    self.final_fragment = byte & 0b1000_0000 != 0;
                    let opcode = OpCode::from(byte & 0b0000_1111)?;

                    if opcode.is_control() {
                        if !self.final_fragment {
                            return Err(Error::FragmentedControlFrame);
                        }
                        self.is_control = true;
                        self.control_kind = match opcode {
                            OpCode::Close => MessageKind::Close,
                            OpCode::Ping => MessageKind::Ping,
                            _ => MessageKind::Pong,
                        };
                    } else if opcode == OpCode::Continue {
                        if !self.expect_more_fragments {
                            return Err(Error::UnexpectedContinuation);
                        }
                        self.is_control = false;
                        // the reassembled message keeps the opcode of the
                        // first fragment, so data_kind stays untouched
                    } else {
                        if self.expect_more_fragments {
                            return Err(Error::DataInterleavedWithFragment);
                        }
                        self.is_control = false;
                        self.data_kind = match opcode {
                            OpCode::Text => MessageKind::Text,
                            _ => MessageKind::Binary,
                        };
                    }

                    self.phase = Phase::MaskLen;
                }
                Phase::MaskLen => {
                    let byte = data[pos];
                    pos += 1;

                    // Everything a client sends a server must be masked
                    if byte & 0b1000_0000 == 0 {
                        return Err(Error::UnmaskedFrame);
                    }

                    self.payload_size = 0;
                    self.counter = 0;
                    match byte & 0b0111_1111 {
                        126 => self.phase = Phase::ExtLen16,
                        127 => self.phase = Phase::ExtLen64,
                        direct => {
                            self.payload_size = direct as u64;
                            self.phase = Phase::MaskKey;
                        }
                    }
                }
                Phase::ExtLen16 => {
                    // big-endian, consumed one byte at a time so a feed
                    // boundary can fall anywhere inside the length
                    self.payload_size = self.payload_size << 8 | data[pos] as u64;
                    pos += 1;
                    self.counter += 1;
                    if self.counter == 2 {
                        self.counter = 0;
                        self.phase = Phase::MaskKey;
                    }
                }
                Phase::ExtLen64 => {
                    self.payload_size = self.payload_size << 8 | data[pos] as u64;
                    pos += 1;
                    self.counter += 1;
                    if self.counter == 8 {
                        if self.payload_size > MAX_MESSAGE_SIZE {
                            return Err(Error::PayloadTooLarge);
                        }
                        self.counter = 0;
                        self.phase = Phase::MaskKey;
                    }
                }
                Phase::MaskKey => {
                    self.mask[self.counter] = data[pos];
                    pos += 1;
                    self.counter += 1;
                    if self.counter == 4 {
                        self.counter = 0;
                        self.phase = Phase::Payload;
                        // nothing to wait for on an empty payload
                        if self.payload_size == 0 {
                            self.finish_frame(&[], &mut sink)?;
                        }
                    }
                }
                Phase::Payload => {
                    let remaining = self.payload_size as usize - self.counter;
                    let available = data.len() - pos;
                    let take = remaining.min(available);

                    let span = &mut data[pos..pos + take];
                    // counter is the position within the frame payload, which
                    // keeps the mask phase right across feed boundaries
                    xor_mask(span, self.mask, self.counter);
                    self.counter += take;
                    pos += take;

                    if self.counter == self.payload_size as usize {
                        // sink gets a shared reborrow; the mutation is done
                        let span = &data[pos - take..pos];
                        self.finish_frame(span, &mut sink)?;
                    } else {
                        // the rest of this payload is in a later feed
                        self.stash(span.to_vec())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The current frame's payload is complete; `span` is the part of it
    /// sitting in the current feed (everything, in the common case).
    fn finish_frame<F>(&mut self, span: &[u8], sink: &mut F) -> Result<(), Error>
    where
        F: FnMut(MessageRef<'_>) -> Result<(), Error>,
    {
        self.phase = Phase::FlagsOpcode;
        self.counter = 0;

        if self.is_control {
            if self.control_fragments.is_empty() {
                return sink(MessageRef {
                    kind: self.control_kind,
                    payload: span,
                });
            }
            let mut joined =
                Vec::with_capacity(self.control_fragments.iter().map(Vec::len).sum::<usize>() + span.len());
            for fragment in self.control_fragments.drain(..) {
                joined.extend_from_slice(&fragment);
            }
            joined.extend_from_slice(span);
            return sink(MessageRef {
                kind: self.control_kind,
                payload: &joined,
            });
        }

        if !self.final_fragment {
            self.expect_more_fragments = true;
            return self.push_data_fragment(span.to_vec());
        }

        self.expect_more_fragments = false;
        if self.data_fragments.is_empty() {
            // whole message in the current feed: zero-copy delivery
            return sink(MessageRef {
                kind: self.data_kind,
                payload: span,
            });
        }

        self.check_combined(span.len())?;
        let mut joined = Vec::with_capacity(self.combined_size as usize + span.len());
        for fragment in self.data_fragments.drain(..) {
            joined.extend_from_slice(&fragment);
        }
        joined.extend_from_slice(span);
        self.combined_size = 0;
        sink(MessageRef {
            kind: self.data_kind,
            payload: &joined,
        })
    }

    /// Park a partial payload while the rest of the frame is still in
    /// flight. Control and data accumulate independently, so a control
    /// frame between fragments never touches the data reassembly.
    fn stash(&mut self, span: Vec<u8>) -> Result<(), Error> {
        if self.is_control {
            self.control_fragments.push(span);
            Ok(())
        } else {
            self.push_data_fragment(span)
        }
    }

    fn push_data_fragment(&mut self, span: Vec<u8>) -> Result<(), Error> {
        self.check_combined(span.len())?;
        self.combined_size += span.len() as u64;
        self.data_fragments.push(span);
        Ok(())
    }

    fn check_combined(&self, additional: usize) -> Result<(), Error> {
        if self.combined_size + additional as u64 > MAX_MESSAGE_SIZE {
            return Err(Error::PayloadTooLarge);
        }
        Ok(())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
