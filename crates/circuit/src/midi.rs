//! MIDI port access for the transport session.
//!
//! The session only talks to the OS through [`MidiBackend`], so it can run
//! against real hardware ([`MidirBackend`]), nothing at all ([`NullBackend`]),
//! or a simulated device in tests.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use crate::error::TransportError;

/// Callback receiving every inbound MIDI message of a connection
pub type InboundHandler = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// An open input/output pair on one port. Dropping it closes both sides.
pub trait MidiConnection: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Port enumeration and connection capability
pub trait MidiBackend: Send + Sync {
    fn input_port_names(&self) -> Vec<String>;

    fn output_port_names(&self) -> Vec<String>;

    /// Open both directions of `port_name`, delivering inbound messages to `handler`.
    fn open(
        &self,
        port_name: &str,
        handler: InboundHandler,
    ) -> Result<Box<dyn MidiConnection>, TransportError>;
}

/// Ports present in both the input and output lists, in input order.
pub fn bidirectional_ports(backend: &dyn MidiBackend) -> Vec<String> {
    let outputs = backend.output_port_names();
    backend
        .input_port_names()
        .into_iter()
        .filter(|name| outputs.contains(name))
        .collect()
}

fn pattern_rank(name: &str, patterns: &[String]) -> Option<usize> {
    let name = name.to_lowercase();
    patterns
        .iter()
        .position(|pattern| name.contains(&pattern.to_lowercase()))
}

/// Sort ports by the first pattern they match. Non-matching ports go last;
/// ties keep their order.
pub fn rank_ports(mut ports: Vec<String>, patterns: &[String]) -> Vec<String> {
    ports.sort_by_key(|name| pattern_rank(name, patterns).unwrap_or(usize::MAX));
    ports
}

/// Best bidirectional port matching any pattern.
pub fn find_device_port(backend: &dyn MidiBackend, patterns: &[String]) -> Option<String> {
    rank_ports(bidirectional_ports(backend), patterns)
        .into_iter()
        .find(|name| pattern_rank(name, patterns).is_some())
}

// ─── midir ────────────────────────────────────────────────────────────────────

/// Hardware backend on top of midir
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl MidiBackend for MidirBackend {
    fn input_port_names(&self) -> Vec<String> {
        let midi_in = match MidiInput::new(&format!("{}-list", self.client_name)) {
            Ok(m) => m,
            Err(_) => return Vec::new(),
        };
        midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect()
    }

    fn output_port_names(&self) -> Vec<String> {
        let midi_out = match MidiOutput::new(&format!("{}-list", self.client_name)) {
            Ok(m) => m,
            Err(_) => return Vec::new(),
        };
        midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect()
    }

    fn open(
        &self,
        port_name: &str,
        mut handler: InboundHandler,
    ) -> Result<Box<dyn MidiConnection>, TransportError> {
        let backend_err = |message: String| TransportError::Backend { message };

        let mut midi_in = MidiInput::new(&self.client_name)
            .map_err(|e| backend_err(format!("Failed to create MIDI input: {}", e)))?;
        // Keep SysEx and transport messages; clock is filtered again by the session
        midi_in.ignore(Ignore::TimeAndActiveSense);

        let in_port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).ok().as_deref() == Some(port_name))
            .ok_or_else(|| TransportError::PortNotFound {
                port: port_name.to_string(),
            })?;

        let midi_out = MidiOutput::new(&self.client_name)
            .map_err(|e| backend_err(format!("Failed to create MIDI output: {}", e)))?;
        let out_port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).ok().as_deref() == Some(port_name))
            .ok_or_else(|| TransportError::PortNotFound {
                port: port_name.to_string(),
            })?;

        let input = midi_in
            .connect(
                &in_port,
                "circuit-in",
                move |_timestamp_us, data, _| handler(data),
                (),
            )
            .map_err(|e| backend_err(format!("Failed to connect MIDI input: {}", e)))?;
        let output = midi_out
            .connect(&out_port, "circuit-out")
            .map_err(|e| backend_err(format!("Failed to connect MIDI output: {}", e)))?;

        Ok(Box::new(MidirConnection {
            _input: input,
            output,
        }))
    }
}

struct MidirConnection {
    _input: MidiInputConnection<()>,
    output: MidiOutputConnection,
}

impl MidiConnection for MidirConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.output.send(bytes).map_err(|e| TransportError::Backend {
            message: format!("Failed to send: {}", e),
        })
    }
}

/// Backend with no ports, for platforms without MIDI support
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl MidiBackend for NullBackend {
    fn input_port_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_port_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn open(
        &self,
        port_name: &str,
        _handler: InboundHandler,
    ) -> Result<Box<dyn MidiConnection>, TransportError> {
        Err(TransportError::PortNotFound {
            port: port_name.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory backend with a simulated Circuit Tracks behind one port.

    use std::collections::HashSet;
    use std::sync::Arc;

    use circuit_core::RawPatch;
    use circuit_core::sysex::{self, BANK_SIZE, Track};
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;

    pub(crate) struct SentMessage {
        pub at: Instant,
        pub bytes: Vec<u8>,
    }

    struct DeviceState {
        ports: Vec<String>,
        sent: Vec<SentMessage>,
        bank: Vec<RawPatch>,
        current: [RawPatch; 2],
        auto_reply: bool,
        silent: HashSet<u8>,
        failing_writes: HashSet<u8>,
        opened: usize,
    }

    #[derive(Clone)]
    pub(crate) struct MockBackend {
        state: Arc<Mutex<DeviceState>>,
        handlers: Arc<Mutex<Vec<InboundHandler>>>,
    }

    impl MockBackend {
        /// One bidirectional port with a replying device behind it.
        pub fn with_device(port: &str) -> Self {
            let bank = (0..BANK_SIZE)
                .map(|i| circuit_core::encode_name(&format!("Device {}", i), &RawPatch::init(i)))
                .collect();
            Self {
                state: Arc::new(Mutex::new(DeviceState {
                    ports: vec![port.to_string()],
                    sent: Vec::new(),
                    bank,
                    current: [RawPatch::init(0), RawPatch::init(1)],
                    auto_reply: true,
                    silent: HashSet::new(),
                    failing_writes: HashSet::new(),
                    opened: 0,
                })),
                handlers: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn set_ports(&self, ports: &[&str]) {
            self.state.lock().ports = ports.iter().map(|p| p.to_string()).collect();
        }

        pub fn set_auto_reply(&self, enabled: bool) {
            self.state.lock().auto_reply = enabled;
        }

        /// Never answer dump requests for `index`.
        pub fn silence(&self, index: u8) {
            self.state.lock().silent.insert(index);
        }

        /// Fail the send of any write to `index`.
        pub fn fail_write(&self, index: u8) {
            self.state.lock().failing_writes.insert(index);
        }

        pub fn bank_patch(&self, index: usize) -> RawPatch {
            self.state.lock().bank[index].clone()
        }

        pub fn current_patch(&self, track: Track) -> RawPatch {
            self.state.lock().current[track.index()].clone()
        }

        pub fn sent(&self) -> Vec<(Instant, Vec<u8>)> {
            self.state
                .lock()
                .sent
                .iter()
                .map(|m| (m.at, m.bytes.clone()))
                .collect()
        }

        pub fn opened(&self) -> usize {
            self.state.lock().opened
        }

        /// Deliver `bytes` on the newest connection.
        pub fn inject(&self, bytes: &[u8]) {
            if let Some(handler) = self.handlers.lock().last_mut() {
                handler(bytes);
            }
        }

        /// Deliver `bytes` on the `n`-th connection ever opened.
        pub fn inject_on(&self, n: usize, bytes: &[u8]) {
            if let Some(handler) = self.handlers.lock().get_mut(n) {
                handler(bytes);
            }
        }

        fn handle_sent(&self, bytes: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
            let mut state = self.state.lock();
            state.sent.push(SentMessage {
                at: Instant::now(),
                bytes: bytes.to_vec(),
            });
            let Some(command) = sysex::command_byte(bytes) else {
                return Ok(None);
            };
            match command {
                sysex::CMD_REQUEST_PATCH_DUMP => {
                    let index = bytes[8];
                    if !state.auto_reply || state.silent.contains(&index) {
                        return Ok(None);
                    }
                    let raw = state.bank[index as usize].clone();
                    Ok(Some(sysex::patch_dump_message(&raw, index, 0)))
                }
                sysex::CMD_REQUEST_CURRENT_PATCH => {
                    if !state.auto_reply {
                        return Ok(None);
                    }
                    let selector = bytes[7];
                    let raw = &state.current[selector as usize & 1];
                    let mut reply = vec![0xF0, 0x00, 0x20, 0x29, 0x01, 0x64];
                    reply.push(sysex::CMD_CURRENT_PATCH_DUMP);
                    reply.push(0);
                    reply.extend(circuit_core::codec::pack(raw.as_bytes()));
                    reply.push(0xF7);
                    Ok(Some(reply))
                }
                sysex::CMD_WRITE_PATCH => {
                    let index = bytes[8];
                    if state.failing_writes.contains(&index) {
                        return Err(TransportError::Backend {
                            message: format!("write {} rejected", index),
                        });
                    }
                    if let Some(circuit_core::ParsedFrame::Unknown { data, .. }) =
                        circuit_core::parse_frame(bytes)
                    {
                        let raw = RawPatch::from_bytes(&circuit_core::codec::unpack(&data[2..]));
                        state.bank[index as usize] = raw;
                    }
                    Ok(None)
                }
                sysex::CMD_REPLACE_CURRENT_PATCH => {
                    if let Some(circuit_core::ParsedFrame::Unknown { data, .. }) =
                        circuit_core::parse_frame(bytes)
                    {
                        let raw = RawPatch::from_bytes(&circuit_core::codec::unpack(&data[1..]));
                        state.current[data[0] as usize & 1] = raw;
                    }
                    Ok(None)
                }
                _ => Ok(None),
            }
        }
    }

    impl MidiBackend for MockBackend {
        fn input_port_names(&self) -> Vec<String> {
            self.state.lock().ports.clone()
        }

        fn output_port_names(&self) -> Vec<String> {
            self.state.lock().ports.clone()
        }

        fn open(
            &self,
            port_name: &str,
            handler: InboundHandler,
        ) -> Result<Box<dyn MidiConnection>, TransportError> {
            let mut state = self.state.lock();
            if !state.ports.iter().any(|p| p == port_name) {
                return Err(TransportError::PortNotFound {
                    port: port_name.to_string(),
                });
            }
            state.opened += 1;
            self.handlers.lock().push(handler);
            Ok(Box::new(MockConnection {
                backend: self.clone(),
            }))
        }
    }

    struct MockConnection {
        backend: MockBackend,
    }

    impl MidiConnection for MockConnection {
        fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            // Reply outside the state lock; the handler re-enters the session
            if let Some(reply) = self.backend.handle_sent(bytes)? {
                self.backend.inject(&reply);
            }
            Ok(())
        }
    }
}
