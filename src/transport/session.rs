use std::collections::VecDeque;

use log::{debug, trace};

use crate::error::Error;
use crate::proto::constants::MIN_CHUNK_SIZE;
use crate::transport::chunk::{self, ChunkType, CommandType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Binding,
    Bound,
}

/// Everything the link can report to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    BindRequested,
    /// Characteristics resolved and notifications confirmed active.
    CharacteristicsBound,
    ChunkSizeNegotiated(u16),
    WriteAcknowledged,
    WriteFailed,
    FragmentReceived(Vec<u8>),
    LinkClosed,
}

/// Everything the session can ask its surroundings to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    BindLink,
    ReadChunkSize,
    WriteFragment(Vec<u8>),
    /// A complete, still-serialized APDU response buffer.
    ApduReceived(Vec<u8>),
}

/// Transport session state machine.
///
/// Owns the outbound fragment queue (one write in flight at a time) and the
/// inbound reassembly buffer. Physical I/O stays outside: events go in
/// through [`Session::handle_event`], requested I/O comes back out as
/// [`SessionEffect`]s, so the transition logic is testable without a link.
pub struct Session {
    state: SessionState,
    chunk_size: usize,
    pending: VecDeque<Vec<u8>>,
    inbound: Vec<Vec<u8>>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            state: SessionState::Unbound,
            chunk_size: 0,
            pending: VecDeque::new(),
            inbound: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn chunk_size(&self) -> Option<usize> {
        if self.state == SessionState::Bound {
            Some(self.chunk_size)
        } else {
            None
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Result<Vec<SessionEffect>, Error> {
        match (self.state, event) {
            (SessionState::Unbound, SessionEvent::BindRequested) => {
                debug!("binding session");
                self.state = SessionState::Binding;
                Ok(vec![SessionEffect::BindLink])
            }
            (SessionState::Binding, SessionEvent::CharacteristicsBound) => {
                Ok(vec![SessionEffect::ReadChunkSize])
            }
            (SessionState::Binding, SessionEvent::ChunkSizeNegotiated(size)) => {
                let size = usize::from(size);
                if size < MIN_CHUNK_SIZE {
                    self.reset();
                    return Err(Error::InvalidChunkSize(size));
                }
                debug!("session bound, chunk size = {}", size);
                self.chunk_size = size;
                self.state = SessionState::Bound;
                Ok(vec![])
            }
            (SessionState::Bound, SessionEvent::WriteAcknowledged) => Ok(self
                .pending
                .pop_front()
                .map(SessionEffect::WriteFragment)
                .into_iter()
                .collect()),
            (SessionState::Bound, SessionEvent::FragmentReceived(fragment)) => {
                self.handle_fragment(fragment)
            }
            (_, SessionEvent::WriteFailed) => {
                self.reset();
                Err(Error::Link("fragment write failed".to_string()))
            }
            (_, SessionEvent::LinkClosed) => {
                self.reset();
                Ok(vec![])
            }
            (state, event) => {
                // Misdelivered events are ignored, matching the guard-and-return
                // style of the delegate callbacks this replaces.
                trace!("ignoring {:?} in state {:?}", event, state);
                Ok(vec![])
            }
        }
    }

    /// Splits a request buffer and starts writing it out. Only valid once
    /// bound; a split failure resets the session.
    pub fn exchange_apdu(&mut self, data: &[u8]) -> Result<Vec<SessionEffect>, Error> {
        if self.state != SessionState::Bound {
            return Err(Error::InvalidState {
                operation: "exchange_apdu",
            });
        }

        let chunks = match chunk::split(data, CommandType::Message, self.chunk_size) {
            Ok(chunks) => chunks,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        debug!("sending {} byte APDU as {} fragment(s)", data.len(), chunks.len());

        let mut pending: VecDeque<Vec<u8>> = chunks.into();
        match pending.pop_front() {
            Some(first) => {
                self.pending = pending;
                Ok(vec![SessionEffect::WriteFragment(first)])
            }
            None => {
                self.reset();
                Err(Error::EmptyPayload)
            }
        }
    }

    fn handle_fragment(&mut self, fragment: Vec<u8>) -> Result<Vec<SessionEffect>, Error> {
        match chunk::classify(&fragment) {
            ChunkType::KeepAlive | ChunkType::Error | ChunkType::Ping | ChunkType::Unknown => {
                trace!("dropping {:?} fragment: {}", chunk::classify(&fragment), hex::encode(&fragment));
                return Ok(vec![]);
            }
            ChunkType::Message | ChunkType::Continuation => {}
        }

        self.inbound.push(fragment);

        match chunk::join(&self.inbound, CommandType::Message) {
            Ok(apdu) => {
                debug!("reassembled {} byte APDU", apdu.len());
                self.inbound.clear();
                Ok(vec![SessionEffect::ApduReceived(apdu)])
            }
            // More fragments are on the way, join again once they arrive.
            Err(Error::LengthMismatch { remaining }) if remaining > 0 => Ok(vec![]),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn reset(&mut self) {
        if self.state != SessionState::Unbound {
            debug!("session reset to unbound");
        }
        self.state = SessionState::Unbound;
        self.chunk_size = 0;
        self.pending.clear();
        self.inbound.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

/// Physical transport capability consumed by [`SessionDriver`]. Discovery,
/// pairing and timeouts live behind this seam.
pub trait Link {
    /// Resolve service and characteristics and enable notifications.
    fn bind_characteristics(&mut self) -> Result<(), Error>;
    /// Read the negotiated maximum fragment size.
    fn read_chunk_size(&mut self) -> Result<u16, Error>;
    /// Write one fragment; acknowledgment arrives later through the driver.
    fn write_fragment(&mut self, fragment: &[u8]) -> Result<(), Error>;
}

/// Thin glue between a [`Session`] and a [`Link`]: applies the session's
/// effects to the link and hands completed APDUs back to the caller.
pub struct SessionDriver<L: Link> {
    session: Session,
    link: L,
}

impl<L: Link> SessionDriver<L> {
    pub fn new(link: L) -> Self {
        SessionDriver {
            session: Session::new(),
            link,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn bind(&mut self) -> Result<(), Error> {
        let effects = self.session.handle_event(SessionEvent::BindRequested)?;
        self.apply(effects).map(|_| ())
    }

    pub fn exchange_apdu(&mut self, data: &[u8]) -> Result<(), Error> {
        let effects = self.session.exchange_apdu(data)?;
        self.apply(effects).map(|_| ())
    }

    /// Reports that the link acknowledged the previous write, releasing the
    /// next queued fragment.
    pub fn on_write_acknowledged(&mut self) -> Result<(), Error> {
        let effects = self.session.handle_event(SessionEvent::WriteAcknowledged)?;
        self.apply(effects).map(|_| ())
    }

    /// Feeds one inbound notification; returns the completed APDU response
    /// buffer once reassembly finishes.
    pub fn on_fragment(&mut self, fragment: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let effects = self
            .session
            .handle_event(SessionEvent::FragmentReceived(fragment.to_vec()))?;
        self.apply(effects)
    }

    /// Discards all session state, e.g. on disconnect.
    pub fn close(&mut self) {
        let _ = self.session.handle_event(SessionEvent::LinkClosed);
    }

    fn apply(&mut self, effects: Vec<SessionEffect>) -> Result<Option<Vec<u8>>, Error> {
        let mut delivered = None;
        let mut queue: VecDeque<SessionEffect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                SessionEffect::BindLink => match self.link.bind_characteristics() {
                    Ok(()) => {
                        queue.extend(self.session.handle_event(SessionEvent::CharacteristicsBound)?);
                    }
                    Err(e) => {
                        let _ = self.session.handle_event(SessionEvent::LinkClosed);
                        return Err(e);
                    }
                },
                SessionEffect::ReadChunkSize => match self.link.read_chunk_size() {
                    Ok(size) => {
                        queue.extend(
                            self.session
                                .handle_event(SessionEvent::ChunkSizeNegotiated(size))?,
                        );
                    }
                    Err(e) => {
                        let _ = self.session.handle_event(SessionEvent::LinkClosed);
                        return Err(e);
                    }
                },
                SessionEffect::WriteFragment(fragment) => {
                    if let Err(e) = self.link.write_fragment(&fragment) {
                        let _ = self.session.handle_event(SessionEvent::WriteFailed);
                        return Err(e);
                    }
                }
                SessionEffect::ApduReceived(apdu) => {
                    delivered = Some(apdu);
                }
            }
        }

        Ok(delivered)
    }
}
