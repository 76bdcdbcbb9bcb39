//! A thin stand-in for the line-oriented configuration/control protocol named as an
//! external collaborator role: `*IDN?`, `*BLOCKS?`, `*CAPTURE.STATUS?`, the three
//! `*PCAP.*` verbs, and a minimal `name?`/`name=value` fallback against an in-memory
//! [`Registry`] so the binary is exercisable end-to-end without a real block/field/
//! attribute system behind it.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::coordinator::CaptureCoordinator;

/// A small name -> value map standing in for the metadata-key/enum-label/block-field
/// registries that stay out of scope for this crate.
#[derive(Default)]
pub struct Registry {
    values: parking_lot::Mutex<BTreeMap<String, String>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values.lock().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: &str) {
        self.values.lock().insert(name.to_owned(), value.to_owned());
    }
}

/// One parsed control line.
#[derive(Debug, PartialEq, Eq)]
pub enum Verb {
    Idn,
    Blocks,
    CaptureStatus,
    PcapArm,
    PcapDisarm,
    PcapReset,
    Get(String),
    Set(String, String),
}

/// Parse a stripped, newline-free control line into a [`Verb`].
///
/// This is not a full tokeniser (`parse_name`, `parse_uint`,
/// `parse_double` remain a collaborator interface), just enough routing to reach the
/// handful of verbs this crate actually implements.
pub fn parse_verb(line: &str) -> Option<Verb> {
    let line = line.trim_end();
    match line {
        "*IDN?" => return Some(Verb::Idn),
        "*BLOCKS?" => return Some(Verb::Blocks),
        "*CAPTURE.STATUS?" => return Some(Verb::CaptureStatus),
        "*PCAP.ARM=" => return Some(Verb::PcapArm),
        "*PCAP.DISARM=" => return Some(Verb::PcapDisarm),
        "*PCAP.RESET=" => return Some(Verb::PcapReset),
        _ => {}
    }

    if let Some(name) = line.strip_suffix('?') {
        if !name.is_empty() {
            return Some(Verb::Get(name.to_owned()));
        }
    }

    if let Some((name, value)) = line.split_once('=') {
        if !name.is_empty() {
            return Some(Verb::Set(name.to_owned(), value.to_owned()));
        }
    }

    None
}

/// Execute one control-protocol line against a coordinator and registry, returning the
/// exact reply text (always newline-terminated).
pub fn dispatch(coordinator: &Arc<CaptureCoordinator>, registry: &Registry, line: &str) -> String {
    match parse_verb(line) {
        Some(Verb::Idn) => "OK\nPandA\n".to_owned(),
        Some(Verb::Blocks) => "!CAPTURE\n.\n".to_owned(),
        Some(Verb::CaptureStatus) => format!("OK {}", coordinator.status_line()),
        Some(Verb::PcapArm) => match coordinator.arm() {
            Ok(()) => "OK\n".to_owned(),
            Err(e) => format!("ERR {e}\n"),
        },
        Some(Verb::PcapDisarm) => {
            coordinator.disarm();
            "OK\n".to_owned()
        }
        Some(Verb::PcapReset) => {
            coordinator.reset();
            "OK\n".to_owned()
        }
        Some(Verb::Get(name)) => match registry.get(&name) {
            Some(value) => format!("OK ={value}\n"),
            None => format!("ERR No such name: {name}\n"),
        },
        Some(Verb::Set(name, value)) if name.ends_with(".FUNC") => {
            // A LUT field's function text, e.g. `LUT1.FUNC=A&B`: compile through the
            // same `parse_lut` the hardware would be programmed with, and only commit
            // the compiled mask to the registry on success.
            let (status, mask) = lut_compiler::parse_lut(&value);
            if status == lut_compiler::LutStatus::Ok {
                registry.set(&name, &format!("0x{mask:08X}"));
                "OK\n".to_owned()
            } else {
                crate::internal_events::LutCompileFailed { input: value, status }.emit();
                format!("ERR {}\n", lut_compiler::parse_lut_error_string(status))
            }
        }
        Some(Verb::Set(name, value)) => {
            registry.set(&name, &value);
            "OK\n".to_owned()
        }
        None => "ERR Bad command\n".to_owned(),
    }
}
