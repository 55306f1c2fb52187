use std::sync::Arc;

/// Turns a process exit code into a human-readable message.
pub type ExitCodeTranslator = Arc<dyn Fn(i32) -> String + Send + Sync>;

const SMARTCTL_EXIT_BITS: [&str; 8] = [
    "Command line did not parse.",
    "Device open failed, device did not return an IDENTIFY DEVICE structure, or device is in a low-power mode.",
    "Some SMART or other ATA command to the disk failed, or there was a checksum error in a SMART data structure.",
    "SMART status check returned \"DISK FAILING\".",
    "We found prefail Attributes <= threshold.",
    "SMART status check returned \"DISK OK\" but we found that some (usage or prefail) Attributes have been <= threshold at some time in the past.",
    "The device error log contains records of errors.",
    "The device self-test log contains records of errors.",
];

/// smartctl reports problems as a bit mask; every set bit becomes one sentence.
pub fn smartctl_exit_status_message(code: i32) -> String {
    SMARTCTL_EXIT_BITS
        .iter()
        .enumerate()
        .filter(|(bit, _)| code & (1 << bit) != 0)
        .map(|(_, message)| *message)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn smartctl_translator() -> ExitCodeTranslator {
    Arc::new(smartctl_exit_status_message)
}
