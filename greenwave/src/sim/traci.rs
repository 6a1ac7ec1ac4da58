// src/sim/traci.rs
//
// Minimal TraCI client: wire codec + a blocking TCP connection that
// implements `Simulator`.
//
// Wire format (big-endian throughout):
// - message  = u32 total length (including itself) + commands
// - command  = u8 length (incl. itself) | 0u8 + u32 length, then u8 id + body
// - response = one status command per request (id, result byte,
//              description) followed, for GET commands, by a response
//              command carrying (variable id, object id, typed value)
//
// Only the commands the adapter needs are implemented.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::process::Child;

use super::{PhaseDef, SimError, Simulator};
use crate::types::{PhaseIndex, SimTime};

// ----- Command ids -----
pub const CMD_GETVERSION: u8 = 0x00;
pub const CMD_SIMSTEP: u8 = 0x02;
pub const CMD_CLOSE: u8 = 0x7f;
pub const CMD_GET_TL_VARIABLE: u8 = 0xa2;
pub const CMD_GET_LANE_VARIABLE: u8 = 0xa3;
pub const CMD_GET_SIM_VARIABLE: u8 = 0xab;
pub const CMD_SET_TL_VARIABLE: u8 = 0xc2;
pub const CMD_SET_SIM_VARIABLE: u8 = 0xcb;

// ----- Variable ids -----
pub const ID_LIST: u8 = 0x00;
pub const LAST_STEP_VEHICLE_HALTING_NUMBER: u8 = 0x14;
pub const TL_PHASE_INDEX: u8 = 0x22;
pub const TL_PHASE_DURATION: u8 = 0x24;
pub const TL_CONTROLLED_LANES: u8 = 0x26;
pub const TL_CURRENT_PROGRAM: u8 = 0x29;
pub const TL_COMPLETE_DEFINITION_RYG: u8 = 0x2b;
pub const TL_NEXT_SWITCH: u8 = 0x2d;
pub const TL_SPENT_DURATION: u8 = 0x38;
pub const VAR_TIME: u8 = 0x66;
pub const VAR_MIN_EXPECTED_VEHICLES: u8 = 0x7d;
pub const CMD_SAVE_SIMSTATE: u8 = 0x95;
pub const CMD_LOAD_SIMSTATE: u8 = 0x96;

// ----- Value types -----
pub const TYPE_UBYTE: u8 = 0x07;
pub const TYPE_BYTE: u8 = 0x08;
pub const TYPE_INTEGER: u8 = 0x09;
pub const TYPE_DOUBLE: u8 = 0x0b;
pub const TYPE_STRING: u8 = 0x0c;
pub const TYPE_DOUBLELIST: u8 = 0x0d;
pub const TYPE_STRINGLIST: u8 = 0x0e;
pub const TYPE_COMPOUND: u8 = 0x0f;

// ----- Result codes -----
pub const RTYPE_OK: u8 = 0x00;
pub const RTYPE_NOTIMPLEMENTED: u8 = 0x01;
pub const RTYPE_ERR: u8 = 0xff;

/// Upper bound on a single response; protects against garbage lengths.
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// A typed TraCI value.
#[derive(Debug, Clone, PartialEq)]
pub enum TraciValue {
    UByte(u8),
    Byte(i8),
    Int(i32),
    Double(f64),
    Str(String),
    DoubleList(Vec<f64>),
    StrList(Vec<String>),
    Compound(Vec<TraciValue>),
}

impl TraciValue {
    pub fn as_int(&self) -> Result<i32, SimError> {
        match self {
            TraciValue::Int(v) => Ok(*v),
            TraciValue::UByte(v) => Ok(*v as i32),
            TraciValue::Byte(v) => Ok(*v as i32),
            other => Err(type_mismatch("int", other)),
        }
    }

    pub fn as_double(&self) -> Result<f64, SimError> {
        match self {
            TraciValue::Double(v) => Ok(*v),
            TraciValue::Int(v) => Ok(*v as f64),
            other => Err(type_mismatch("double", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str, SimError> {
        match self {
            TraciValue::Str(s) => Ok(s),
            other => Err(type_mismatch("string", other)),
        }
    }

    pub fn as_str_list(&self) -> Result<&[String], SimError> {
        match self {
            TraciValue::StrList(v) => Ok(v),
            other => Err(type_mismatch("string list", other)),
        }
    }

    pub fn as_compound(&self) -> Result<&[TraciValue], SimError> {
        match self {
            TraciValue::Compound(v) => Ok(v),
            other => Err(type_mismatch("compound", other)),
        }
    }
}

fn type_mismatch(expected: &str, got: &TraciValue) -> SimError {
    SimError::Protocol(format!("expected {expected}, got {got:?}"))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append-only big-endian encoder.
#[derive(Debug, Default, Clone)]
pub struct Storage {
    buf: Vec<u8>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_string(&mut self, s: &str) {
        self.put_i32(s.len() as i32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn put_typed(&mut self, value: &TraciValue) {
        match value {
            TraciValue::UByte(v) => {
                self.put_u8(TYPE_UBYTE);
                self.put_u8(*v);
            }
            TraciValue::Byte(v) => {
                self.put_u8(TYPE_BYTE);
                self.put_u8(*v as u8);
            }
            TraciValue::Int(v) => {
                self.put_u8(TYPE_INTEGER);
                self.put_i32(*v);
            }
            TraciValue::Double(v) => {
                self.put_u8(TYPE_DOUBLE);
                self.put_f64(*v);
            }
            TraciValue::Str(s) => {
                self.put_u8(TYPE_STRING);
                self.put_string(s);
            }
            TraciValue::DoubleList(v) => {
                self.put_u8(TYPE_DOUBLELIST);
                self.put_i32(v.len() as i32);
                for d in v {
                    self.put_f64(*d);
                }
            }
            TraciValue::StrList(v) => {
                self.put_u8(TYPE_STRINGLIST);
                self.put_i32(v.len() as i32);
                for s in v {
                    self.put_string(s);
                }
            }
            TraciValue::Compound(items) => {
                self.put_u8(TYPE_COMPOUND);
                self.put_i32(items.len() as i32);
                for item in items {
                    self.put_typed(item);
                }
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Frame one command (id + body) with the short or extended length header.
pub fn encode_command(cmd_id: u8, body: &[u8]) -> Vec<u8> {
    let short_len = 1 + 1 + body.len();
    let mut out = Vec::with_capacity(short_len + 4);
    if short_len <= 255 {
        out.push(short_len as u8);
    } else {
        out.push(0);
        out.extend_from_slice(&((1 + 4 + 1 + body.len()) as u32).to_be_bytes());
    }
    out.push(cmd_id);
    out.extend_from_slice(body);
    out
}

/// Wrap already-framed commands into one message.
pub fn encode_message(commands: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + commands.len());
    out.extend_from_slice(&((4 + commands.len()) as u32).to_be_bytes());
    out.extend_from_slice(commands);
    out
}

/// GET request body: variable id + object id.
pub fn get_body(var_id: u8, object_id: &str) -> Vec<u8> {
    let mut s = Storage::new();
    s.put_u8(var_id);
    s.put_string(object_id);
    s.into_bytes()
}

/// SET request body: variable id + object id + typed value.
pub fn set_body(var_id: u8, object_id: &str, value: &TraciValue) -> Vec<u8> {
    let mut s = Storage::new();
    s.put_u8(var_id);
    s.put_string(object_id);
    s.put_typed(value);
    s.into_bytes()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Cursor over a received message body.
#[derive(Debug, Clone)]
pub struct Reader {
    data: Vec<u8>,
    pos: usize,
}

impl Reader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&[u8], SimError> {
        if self.remaining() < n {
            return Err(SimError::Protocol(format!(
                "truncated message: need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, SimError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32, SimError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64, SimError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_be_bytes(arr))
    }

    fn read_count(&mut self) -> Result<usize, SimError> {
        let n = self.read_i32()?;
        if n < 0 {
            return Err(SimError::Protocol(format!("negative length {n}")));
        }
        Ok(n as usize)
    }

    pub fn read_string(&mut self) -> Result<String, SimError> {
        let n = self.read_count()?;
        let bytes = self.take(n)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Command length header (short or extended form).
    pub fn read_command_length(&mut self) -> Result<usize, SimError> {
        let short = self.read_u8()?;
        if short != 0 {
            return Ok(short as usize);
        }
        self.read_count()
    }

    pub fn read_typed(&mut self) -> Result<TraciValue, SimError> {
        let ty = self.read_u8()?;
        self.read_value_of(ty)
    }

    fn read_value_of(&mut self, ty: u8) -> Result<TraciValue, SimError> {
        Ok(match ty {
            TYPE_UBYTE => TraciValue::UByte(self.read_u8()?),
            TYPE_BYTE => TraciValue::Byte(self.read_u8()? as i8),
            TYPE_INTEGER => TraciValue::Int(self.read_i32()?),
            TYPE_DOUBLE => TraciValue::Double(self.read_f64()?),
            TYPE_STRING => TraciValue::Str(self.read_string()?),
            TYPE_DOUBLELIST => {
                let n = self.read_count()?;
                let mut v = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    v.push(self.read_f64()?);
                }
                TraciValue::DoubleList(v)
            }
            TYPE_STRINGLIST => {
                let n = self.read_count()?;
                let mut v = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    v.push(self.read_string()?);
                }
                TraciValue::StrList(v)
            }
            TYPE_COMPOUND => {
                let n = self.read_count()?;
                let mut v = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    v.push(self.read_typed()?);
                }
                TraciValue::Compound(v)
            }
            other => {
                return Err(SimError::Protocol(format!(
                    "unsupported value type 0x{other:02x}"
                )))
            }
        })
    }

    /// Consume the status command for `expected_cmd`; error on non-OK.
    pub fn read_status(&mut self, expected_cmd: u8) -> Result<(), SimError> {
        let _len = self.read_command_length()?;
        let cmd = self.read_u8()?;
        let result = self.read_u8()?;
        let description = self.read_string()?;
        if cmd != expected_cmd {
            return Err(SimError::Protocol(format!(
                "status for command 0x{cmd:02x}, expected 0x{expected_cmd:02x}"
            )));
        }
        match result {
            RTYPE_OK => Ok(()),
            RTYPE_NOTIMPLEMENTED => Err(SimError::Command {
                command: format!("0x{expected_cmd:02x}"),
                message: format!("not implemented: {description}"),
            }),
            _ => Err(SimError::Command {
                command: format!("0x{expected_cmd:02x}"),
                message: description,
            }),
        }
    }

    /// Consume a GET response command and return its typed value.
    pub fn read_get_response(
        &mut self,
        expected_response: u8,
        expected_var: u8,
    ) -> Result<TraciValue, SimError> {
        let _len = self.read_command_length()?;
        let response = self.read_u8()?;
        let var = self.read_u8()?;
        let _object = self.read_string()?;
        if response != expected_response || var != expected_var {
            return Err(SimError::Protocol(format!(
                "unexpected response 0x{response:02x}/0x{var:02x}, expected 0x{expected_response:02x}/0x{expected_var:02x}"
            )));
        }
        self.read_typed()
    }
}

/// Decode the RYG program definition into per-program phase lists.
///
/// Returns `(program_id, phases)` pairs in the order the simulator sent them.
pub fn decode_program_logics(value: &TraciValue) -> Result<Vec<(String, Vec<PhaseDef>)>, SimError> {
    let mut out = Vec::new();
    for logic in value.as_compound()? {
        let items = logic.as_compound()?;
        if items.len() < 4 {
            return Err(SimError::Protocol(format!(
                "program logic has {} fields, expected >= 4",
                items.len()
            )));
        }
        let program_id = items[0].as_str()?.to_string();
        let mut phases = Vec::new();
        for phase in items[3].as_compound()? {
            let p = phase.as_compound()?;
            if p.len() < 4 {
                return Err(SimError::Protocol(format!(
                    "phase has {} fields, expected >= 4",
                    p.len()
                )));
            }
            phases.push(PhaseDef {
                duration: p[0].as_double()?,
                state: p[1].as_str()?.to_string(),
                min_dur: p[2].as_double()?,
                max_dur: p[3].as_double()?,
            });
        }
        out.push((program_id, phases));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Blocking TraCI connection to one simulator process.
///
/// Owns the child process (if it spawned one); the process is killed on
/// drop if `close` was never reached.
pub struct TraciConnection {
    stream: TcpStream,
    child: Option<Child>,
    label: String,
    closed: bool,
}

impl TraciConnection {
    pub fn new(stream: TcpStream, child: Option<Child>, label: impl Into<String>) -> Self {
        let _ = stream.set_nodelay(true);
        Self {
            stream,
            child,
            label: label.into(),
            closed: false,
        }
    }

    /// Send one command and return a reader positioned after its status.
    fn exchange(&mut self, cmd_id: u8, body: &[u8]) -> Result<Reader, SimError> {
        if self.closed {
            return Err(SimError::NotRunning);
        }
        let msg = encode_message(&encode_command(cmd_id, body));
        self.stream.write_all(&msg)?;

        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf)?;
        let total = u32::from_be_bytes(len_buf) as usize;
        if !(4..=MAX_MESSAGE_BYTES).contains(&total) {
            return Err(SimError::Protocol(format!("bad message length {total}")));
        }
        let mut data = vec![0u8; total - 4];
        self.stream.read_exact(&mut data)?;

        let mut reader = Reader::new(data);
        reader.read_status(cmd_id)?;
        Ok(reader)
    }

    fn get(&mut self, domain: u8, var_id: u8, object_id: &str) -> Result<TraciValue, SimError> {
        let mut reader = self.exchange(domain, &get_body(var_id, object_id))?;
        reader.read_get_response(domain + 0x10, var_id)
    }

    fn set(&mut self, domain: u8, var_id: u8, object_id: &str, value: &TraciValue) -> Result<(), SimError> {
        self.exchange(domain, &set_body(var_id, object_id, value))?;
        Ok(())
    }

    /// API version + simulator identification string.
    pub fn version(&mut self) -> Result<(i32, String), SimError> {
        let mut reader = self.exchange(CMD_GETVERSION, &[])?;
        let _len = reader.read_command_length()?;
        let _id = reader.read_u8()?;
        let api = reader.read_i32()?;
        let ident = reader.read_string()?;
        Ok((api, ident))
    }

    fn reap_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}

impl Simulator for TraciConnection {
    fn simulation_step(&mut self) -> Result<(), SimError> {
        let mut body = Storage::new();
        body.put_f64(0.0);
        // Trailing subscription results are ignored; none are registered.
        self.exchange(CMD_SIMSTEP, body.as_bytes())?;
        Ok(())
    }

    fn time(&mut self) -> Result<SimTime, SimError> {
        self.get(CMD_GET_SIM_VARIABLE, VAR_TIME, "")?.as_double()
    }

    fn min_expected_vehicles(&mut self) -> Result<i32, SimError> {
        self.get(CMD_GET_SIM_VARIABLE, VAR_MIN_EXPECTED_VEHICLES, "")?
            .as_int()
    }

    fn traffic_light_ids(&mut self) -> Result<Vec<String>, SimError> {
        Ok(self
            .get(CMD_GET_TL_VARIABLE, ID_LIST, "")?
            .as_str_list()?
            .to_vec())
    }

    fn lane_halting_number(&mut self, lane: &str) -> Result<u32, SimError> {
        let n = self
            .get(CMD_GET_LANE_VARIABLE, LAST_STEP_VEHICLE_HALTING_NUMBER, lane)?
            .as_int()?;
        Ok(n.max(0) as u32)
    }

    fn phase_index(&mut self, tls: &str) -> Result<PhaseIndex, SimError> {
        let idx = self.get(CMD_GET_TL_VARIABLE, TL_PHASE_INDEX, tls)?.as_int()?;
        Ok(idx.max(0) as PhaseIndex)
    }

    fn set_phase_index(&mut self, tls: &str, index: PhaseIndex) -> Result<(), SimError> {
        self.set(
            CMD_SET_TL_VARIABLE,
            TL_PHASE_INDEX,
            tls,
            &TraciValue::Int(index as i32),
        )
    }

    fn next_switch(&mut self, tls: &str) -> Result<SimTime, SimError> {
        self.get(CMD_GET_TL_VARIABLE, TL_NEXT_SWITCH, tls)?.as_double()
    }

    fn set_phase_duration(&mut self, tls: &str, seconds: f64) -> Result<(), SimError> {
        self.set(
            CMD_SET_TL_VARIABLE,
            TL_PHASE_DURATION,
            tls,
            &TraciValue::Double(seconds),
        )
    }

    fn spent_duration(&mut self, tls: &str) -> Result<f64, SimError> {
        self.get(CMD_GET_TL_VARIABLE, TL_SPENT_DURATION, tls)?.as_double()
    }

    fn controlled_lanes(&mut self, tls: &str) -> Result<Vec<String>, SimError> {
        Ok(self
            .get(CMD_GET_TL_VARIABLE, TL_CONTROLLED_LANES, tls)?
            .as_str_list()?
            .to_vec())
    }

    fn program_logic(&mut self, tls: &str) -> Result<Vec<PhaseDef>, SimError> {
        let current = self
            .get(CMD_GET_TL_VARIABLE, TL_CURRENT_PROGRAM, tls)?
            .as_str()?
            .to_string();
        let value = self.get(CMD_GET_TL_VARIABLE, TL_COMPLETE_DEFINITION_RYG, tls)?;
        let mut logics = decode_program_logics(&value)?;
        let pos = logics.iter().position(|(id, _)| *id == current).unwrap_or(0);
        if logics.is_empty() {
            return Err(SimError::Unknown {
                kind: "program logic".to_string(),
                id: tls.to_string(),
            });
        }
        Ok(logics.swap_remove(pos).1)
    }

    fn save_state(&mut self, path: &Path) -> Result<(), SimError> {
        self.set(
            CMD_SET_SIM_VARIABLE,
            CMD_SAVE_SIMSTATE,
            "",
            &TraciValue::Str(path.display().to_string()),
        )
    }

    fn load_state(&mut self, path: &Path) -> Result<(), SimError> {
        if !path.exists() {
            return Err(SimError::State {
                path: path.display().to_string(),
                message: "snapshot file does not exist".to_string(),
            });
        }
        self.set(
            CMD_SET_SIM_VARIABLE,
            CMD_LOAD_SIMSTATE,
            "",
            &TraciValue::Str(path.display().to_string()),
        )
    }

    fn close(&mut self) -> Result<(), SimError> {
        if self.closed {
            return Ok(());
        }
        let res = self.exchange(CMD_CLOSE, &[]).map(|_| ());
        self.closed = true;
        let _ = self.stream.shutdown(Shutdown::Both);
        self.reap_child();
        res
    }

    fn name(&self) -> &str {
        &self.label
    }
}

impl Drop for TraciConnection {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
        self.reap_child();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_command_framing() {
        let cmd = encode_command(CMD_SIMSTEP, &[1, 2, 3]);
        assert_eq!(cmd, vec![5, CMD_SIMSTEP, 1, 2, 3]);
        let msg = encode_message(&cmd);
        assert_eq!(&msg[..4], &9u32.to_be_bytes());
    }

    #[test]
    fn extended_command_framing() {
        let body = vec![0u8; 300];
        let cmd = encode_command(CMD_SET_SIM_VARIABLE, &body);
        assert_eq!(cmd[0], 0);
        assert_eq!(&cmd[1..5], &(306u32).to_be_bytes());
        assert_eq!(cmd[5], CMD_SET_SIM_VARIABLE);
        assert_eq!(cmd.len(), 306);
    }

    #[test]
    fn typed_values_decode_nested() {
        let value = TraciValue::Compound(vec![
            TraciValue::Str("0".into()),
            TraciValue::Int(3),
            TraciValue::StrList(vec!["a".into(), "b".into()]),
            TraciValue::Compound(vec![TraciValue::Double(1.5)]),
        ]);
        let mut s = Storage::new();
        s.put_typed(&value);
        let mut r = Reader::new(s.into_bytes());
        assert_eq!(r.read_typed().unwrap(), value);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn status_error_is_reported() {
        let mut s = Storage::new();
        let desc = "Traffic light 'X' is not known";
        s.put_u8((1 + 1 + 1 + 4 + desc.len()) as u8);
        s.put_u8(CMD_GET_TL_VARIABLE);
        s.put_u8(RTYPE_ERR);
        s.put_string(desc);
        let mut r = Reader::new(s.into_bytes());
        match r.read_status(CMD_GET_TL_VARIABLE) {
            Err(SimError::Command { message, .. }) => assert!(message.contains("not known")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn get_response_roundtrip() {
        let mut s = Storage::new();
        // status
        s.put_u8(7);
        s.put_u8(CMD_GET_SIM_VARIABLE);
        s.put_u8(RTYPE_OK);
        s.put_string("");
        // response: len, id, var, object id, typed double
        s.put_u8(1 + 1 + 1 + 4 + 1 + 8);
        s.put_u8(CMD_GET_SIM_VARIABLE + 0x10);
        s.put_u8(VAR_TIME);
        s.put_string("");
        s.put_typed(&TraciValue::Double(42.0));

        let mut r = Reader::new(s.into_bytes());
        r.read_status(CMD_GET_SIM_VARIABLE).unwrap();
        let v = r
            .read_get_response(CMD_GET_SIM_VARIABLE + 0x10, VAR_TIME)
            .unwrap();
        assert_eq!(v.as_double().unwrap(), 42.0);
    }

    #[test]
    fn truncated_message_is_protocol_error() {
        let mut r = Reader::new(vec![0, 0]);
        assert!(matches!(r.read_i32(), Err(SimError::Protocol(_))));
    }

    #[test]
    fn program_logic_decoding() {
        let phase = |dur: f64, state: &str| {
            TraciValue::Compound(vec![
                TraciValue::Double(dur),
                TraciValue::Str(state.into()),
                TraciValue::Double(5.0),
                TraciValue::Double(50.0),
                TraciValue::Compound(vec![]),
                TraciValue::Str(String::new()),
            ])
        };
        let logic = TraciValue::Compound(vec![
            TraciValue::Str("0".into()),
            TraciValue::Int(0),
            TraciValue::Int(0),
            TraciValue::Compound(vec![phase(30.0, "GGrr"), phase(3.0, "yyrr")]),
            TraciValue::Compound(vec![]),
        ]);
        let all = TraciValue::Compound(vec![logic]);
        let logics = decode_program_logics(&all).unwrap();
        assert_eq!(logics.len(), 1);
        assert_eq!(logics[0].0, "0");
        assert_eq!(logics[0].1.len(), 2);
        assert_eq!(logics[0].1[0].state, "GGrr");
        assert_eq!(logics[0].1[1].duration, 3.0);
        assert_eq!(logics[0].1[0].max_dur, 50.0);
    }
}
