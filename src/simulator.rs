//! In-process ELM327 emulator
//!
//! Behaves like an adapter on the other end of a serial line: echoes
//! commands until `ATE0`, tracks the `ATSH` header, answers scripted
//! requests per header and terminates every reply with the `>` prompt.
//! Clones share state, so a test can keep one handle while the transport
//! owns another.

use crate::error::TransportError;
use crate::link::AdapterLink;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const BANNER: &str = "ELM327 v1.5";

struct SimState {
    echo: bool,
    header: Option<String>,
    by_header: HashMap<(String, String), String>,
    by_command: HashMap<String, String>,
    input: Vec<u8>,
    output: VecDeque<u8>,
    received: Vec<String>,
    fail_writes: bool,
    fail_once: HashSet<String>,
    fail_reads: bool,
    silent: bool,
}

/// Simulated ELM327 adapter
#[derive(Clone)]
pub struct SimulatedAdapter {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn compact(command: &str) -> String {
    command
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                echo: true,
                header: None,
                by_header: HashMap::new(),
                by_command: HashMap::new(),
                input: Vec::new(),
                output: VecDeque::new(),
                received: Vec::new(),
                fail_writes: false,
                fail_once: HashSet::new(),
                fail_reads: false,
                silent: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `command` with `response` whatever header is set
    pub fn respond(&self, command: &str, response: &str) -> &Self {
        self.state()
            .by_command
            .insert(compact(command), response.to_string());
        self
    }

    /// Answer `command` with `response` only while `header` is set
    pub fn respond_for(&self, header: &str, command: &str, response: &str) -> &Self {
        self.state()
            .by_header
            .insert((compact(header), compact(command)), response.to_string());
        self
    }

    /// Make every write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Fail the next write of `command` once, then behave normally
    pub fn fail_next_write(&self, command: &str) {
        self.state().fail_once.insert(compact(command));
    }

    /// Make every read fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    /// Swallow commands without replying, as a hung adapter does
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Queue a line the adapter prints on its own, outside any command
    pub fn push_unsolicited(&self, line: &str) {
        let mut state = self.state();
        state.output.extend(line.as_bytes());
        state.output.push_back(b'\r');
    }

    /// Every command line received so far
    pub fn received(&self) -> Vec<String> {
        self.state().received.clone()
    }

    /// Header currently set with `ATSH`
    pub fn current_header(&self) -> Option<String> {
        self.state().header.clone()
    }

    /// Adapter preloaded with a Niva Restyle (Bosch M7.9.7, KWP2000) that
    /// has one stored engine code and a fault in the ABS unit
    pub fn niva_demo() -> Self {
        let sim = Self::new();
        let engine = "8110F1";
        let abs = "8128F1";
        let immobilizer = "812AF1";

        sim.respond_for(engine, "0100", "41 00 BE 3E B8 11")
            .respond_for(engine, "010C", "41 0C 0D 48")
            .respond_for(engine, "010D", "41 0D 00")
            .respond_for(engine, "0105", "41 05 7B")
            .respond_for(engine, "010F", "41 0F 44")
            .respond_for(engine, "0104", "41 04 33")
            .respond_for(engine, "0111", "41 11 0F")
            .respond_for(engine, "010E", "41 0E 94")
            .respond_for(engine, "0110", "41 10 01 F4")
            .respond_for(engine, "0106", "41 06 80")
            .respond_for(engine, "0107", "41 07 84")
            .respond_for(engine, "0114", "41 14 5A FF")
            .respond_for(engine, "0142", "41 42 34 58")
            .respond_for(engine, "03", "43 01 33 00 00 00 00")
            .respond_for(engine, "07", "47 00 00 00 00 00 00")
            .respond_for(engine, "020200", "42 02 00 01 33")
            .respond_for(engine, "020C00", "42 0C 00 0F A0")
            .respond_for(engine, "020500", "42 05 00 64")
            .respond_for(engine, "04", "44")
            .respond_for(engine, "1081", "50 81")
            .respond_for(engine, "3101", "71 01")
            .respond_for(engine, "3102", "71 02")
            .respond_for(engine, "3103", "71 03")
            .respond_for(engine, "1101", "51 01")
            .respond_for(engine, "3BA000", "7B A0")
            .respond_for(abs, "3E01", "7E")
            .respond_for(abs, "1800FF00", "58 01 50 31 60")
            .respond_for(abs, "14FF00", "54 FF 00")
            .respond_for(abs, "1081", "50 81")
            .respond_for(abs, "3120", "71 20")
            .respond_for(abs, "1101", "51 01")
            .respond_for(immobilizer, "3E01", "7E")
            .respond_for(immobilizer, "1800FF00", "58 00")
            .respond_for(immobilizer, "14FF00", "54 FF 00")
            .respond_for(immobilizer, "1081", "50 81")
            .respond_for(immobilizer, "3110", "7F 31 22");
        sim
    }

    fn answer(state: &mut SimState, line: &str) -> String {
        let command = compact(line);

        if let Some(header) = &state.header {
            if let Some(resp) = state.by_header.get(&(header.clone(), command.clone())) {
                return resp.clone();
            }
        }
        if let Some(resp) = state.by_command.get(&command) {
            let resp = resp.clone();
            if command == "ATZ" {
                state.echo = true;
                state.header = None;
            }
            return resp;
        }

        if command == "ATZ" {
            state.echo = true;
            state.header = None;
            return BANNER.to_string();
        }
        if command == "ATE0" {
            state.echo = false;
            return "OK".to_string();
        }
        if command == "ATE1" {
            state.echo = true;
            return "OK".to_string();
        }
        if let Some(header) = command.strip_prefix("ATSH") {
            state.header = Some(header.to_string());
            return "OK".to_string();
        }
        if command == "ATI" {
            return BANNER.to_string();
        }
        if command == "ATRV" {
            return "13.4V".to_string();
        }
        if command.starts_with("AT") {
            return "OK".to_string();
        }

        "NO DATA".to_string()
    }

    fn process_input(state: &mut SimState) {
        while let Some(pos) = state.input.iter().position(|b| *b == b'\r') {
            let line_bytes: Vec<u8> = state.input.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1])
                .trim()
                .to_string();
            if line.is_empty() {
                continue;
            }
            state.received.push(line.clone());
            if state.silent {
                continue;
            }

            // Echo reflects the mode before the command takes effect
            let echo = state.echo;
            let response = Self::answer(state, &line);
            let mut reply = String::new();
            if echo {
                reply.push_str(&line);
                reply.push('\r');
            }
            reply.push_str(&response);
            reply.push_str("\r\r>");
            state.output.extend(reply.as_bytes());
        }
    }
}

impl AdapterLink for SimulatedAdapter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(TransportError::Io("simulated write failure".to_string()));
        }
        if state.fail_once.remove(&compact(&String::from_utf8_lossy(data))) {
            return Err(TransportError::Io("simulated write glitch".to_string()));
        }
        state.input.extend_from_slice(data);
        Self::process_input(&mut state);
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state();
        if state.fail_reads {
            return Err(TransportError::Io("simulated read failure".to_string()));
        }
        Ok(state.output.drain(..).collect())
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.state().output.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        "simulator".to_string()
    }
}
