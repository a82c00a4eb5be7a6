use evalwatch_core::{canonical, MachineError};
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct OutputMode {
    pub json: bool,
}

/// Prints `payload`: one canonical JSON line in `--json` mode, pretty otherwise.
pub(crate) fn emit_ok(output_mode: OutputMode, payload: &Value) -> Result<(), String> {
    if output_mode.json {
        let bytes = canonical::stable_json_bytes(payload).map_err(|e| e.to_string())?;
        let text = String::from_utf8(bytes).map_err(|e| e.to_string())?;
        println!("{text}");
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(payload).map_err(|e| e.to_string())?
        );
    }
    Ok(())
}

pub(crate) fn emit_error(error: &MachineError, machine_json: bool) {
    if machine_json {
        match serde_json::to_string(error) {
            Ok(payload) => eprintln!("{payload}"),
            Err(_) => eprintln!(
                "{{\"code\":\"internal_error\",\"message\":\"failed to encode structured error\",\"details\":{{}}}}"
            ),
        }
    } else {
        eprintln!("{}", error.message);
        for (key, value) in &error.details {
            eprintln!("  {key}: {value}");
        }
    }
}
